//! Discord event handler wiring the analysis pipeline together
//!
//! The flow is a three-step message-command loop: `!bug` analyzes a
//! conversation and replies with a draft report, `!fix` applies a
//! correction comment to the draft, and `!file` opens the GitHub issue.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{Context, EventHandler, Message, Ready};
use tokio::sync::Mutex;

use crate::analysis::IssueReport;
use crate::chat::discord::DiscordSource;
use crate::chat::{MessageSource, parse_message_link};
use crate::context::{ContextBuilder, EmbedResolver};
use crate::db::GuildConfig;
use crate::github::GitHubClient;
use crate::session::SessionCache;
use crate::Result;

/// Messages pulled into the chat log
const HISTORY_LIMIT: usize = 50;

/// Image descriptions allowed per author
const MAX_IMAGES_PER_AUTHOR: usize = 3;

/// A `!bug`/`!fix`/`!file` invocation
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Analyze { link: &'a str, hint: &'a str },
    Fix { comment: &'a str },
    File,
}

/// Gateway event handler
pub struct Handler {
    cache: Arc<SessionCache>,
    github: Arc<GitHubClient>,
    resolver: Arc<dyn EmbedResolver>,
    /// Draft report per guild, awaiting correction or filing
    drafts: Mutex<HashMap<u64, IssueReport>>,
}

impl Handler {
    #[must_use]
    pub fn new(
        cache: Arc<SessionCache>,
        github: Arc<GitHubClient>,
        resolver: Arc<dyn EmbedResolver>,
    ) -> Self {
        Self {
            cache,
            github,
            resolver,
            drafts: Mutex::new(HashMap::new()),
        }
    }

    /// Analyze a conversation and stash the draft report
    async fn handle_analyze(
        &self,
        ctx: &Context,
        guild_id: u64,
        link: &str,
        hint: &str,
    ) -> Result<String> {
        let config = self.cache.get_config(guild_id).await?;
        if let Some(field) = missing_config_field(&config) {
            return Ok(format!(
                "Configuration error: {} is not set",
                GuildConfig::field_label(field)
            ));
        }
        if self
            .github
            .repo_full_name(&config.github_repo)
            .await?
            .is_none()
        {
            return Ok(format!(
                "Configuration error: repository `{}` not found or not accessible",
                config.github_repo
            ));
        }

        let Some((link_guild, channel_id, message_id)) = parse_message_link(link) else {
            return Ok("That does not look like a Discord message link".to_string());
        };
        if link_guild != guild_id {
            return Ok("That message link points to a different server".to_string());
        }

        // One analysis per guild at a time
        let _guard = self.cache.acquire(guild_id).await?;

        let source = Arc::new(DiscordSource::new(ctx.http.clone(), guild_id));
        let anchor = source.fetch(channel_id, message_id).await?;

        let builder = ContextBuilder::new(
            Arc::clone(&self.cache),
            source,
            Arc::clone(&self.resolver),
        );
        let chat_log = builder
            .build_history(guild_id, &anchor, HISTORY_LIMIT, MAX_IMAGES_PER_AUTHOR)
            .await?;

        let suite = self.cache.analysis_suite(guild_id).await?;
        let report = suite.analyze_issue(&chat_log, hint).await?;

        let Some((_, body)) = suite.render_markdown(&report) else {
            return Ok("No issues found in the chat log!".to_string());
        };

        self.drafts.lock().await.insert(guild_id, report);
        Ok(format!(
            "{body}\n\nReply `!fix <comment>` to correct this draft, or `!file` to open the issue."
        ))
    }

    /// Apply a correction comment to the guild's draft report
    async fn handle_fix(&self, guild_id: u64, comment: &str) -> Result<String> {
        let Some(draft) = self.drafts.lock().await.get(&guild_id).cloned() else {
            return Ok("No draft report to correct; run `!bug` first".to_string());
        };

        let _guard = self.cache.acquire(guild_id).await?;

        let suite = self.cache.analysis_suite(guild_id).await?;
        let corrected = suite.correct_analysis(&draft, comment).await?;

        let Some((_, body)) = suite.render_markdown(&corrected) else {
            return Ok("The correction left the report empty; run `!bug` again".to_string());
        };

        self.drafts.lock().await.insert(guild_id, corrected);
        Ok(format!(
            "{body}\n\nReply `!fix <comment>` to correct this draft, or `!file` to open the issue."
        ))
    }

    /// File the guild's draft report as a GitHub issue
    async fn handle_file(&self, guild_id: u64) -> Result<String> {
        let Some(draft) = self.drafts.lock().await.get(&guild_id).cloned() else {
            return Ok("No draft report to file; run `!bug` first".to_string());
        };

        let config = self.cache.get_config(guild_id).await?;
        let suite = self.cache.analysis_suite(guild_id).await?;

        let Some((title, body)) = suite.render_markdown(&draft) else {
            return Ok("The draft report is empty; run `!bug` again".to_string());
        };

        let url = self
            .github
            .create_issue(&config.github_repo, &title, &body, &["bug"])
            .await?;

        self.drafts.lock().await.remove(&guild_id);
        tracing::info!(guild_id, issue_url = %url, "filed issue");
        Ok(format!("Filed issue: {url}"))
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(user = %ready.user.name, "connected to Discord");
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(command) = parse_command(&msg.content) else {
            return;
        };
        let Some(guild_id) = msg.guild_id.map(serenity::all::GuildId::get) else {
            return;
        };

        tracing::info!(guild_id, ?command, "received command");

        let outcome = match command {
            Command::Analyze { link, hint } => self.handle_analyze(&ctx, guild_id, link, hint).await,
            Command::Fix { comment } => self.handle_fix(guild_id, comment).await,
            Command::File => self.handle_file(guild_id).await,
        };

        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(guild_id, error = %e, "command failed");
                "Something went wrong, please try again later".to_string()
            }
        };

        if let Err(e) = msg.reply(&ctx.http, reply).await {
            tracing::error!(guild_id, error = %e, "failed to send reply");
        }
    }
}

/// Parse a command message; `None` for ordinary chatter
fn parse_command(content: &str) -> Option<Command<'_>> {
    let content = content.trim();

    if let Some(rest) = strip_command(content, "!bug") {
        if rest.is_empty() {
            return None;
        }
        return Some(match rest.split_once(char::is_whitespace) {
            Some((link, hint)) => Command::Analyze {
                link,
                hint: hint.trim(),
            },
            None => Command::Analyze {
                link: rest,
                hint: "",
            },
        });
    }

    if let Some(comment) = strip_command(content, "!fix") {
        if comment.is_empty() {
            return None;
        }
        return Some(Command::Fix { comment });
    }

    if strip_command(content, "!file") == Some("") {
        return Some(Command::File);
    }

    None
}

/// Strip a command prefix, requiring a word boundary after it
fn strip_command<'a>(content: &'a str, command: &str) -> Option<&'a str> {
    let rest = content.strip_prefix(command)?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim_start())
}

/// First unset configuration field, if any
fn missing_config_field(config: &GuildConfig) -> Option<&'static str> {
    if config.github_repo.is_empty() {
        return Some("github_repo");
    }
    if config.product_name.is_empty() {
        return Some("product_name");
    }
    if config.product_type.is_empty() {
        return Some("product_type");
    }
    if config.issue_categories.is_empty() {
        return Some("issue_categories");
    }
    if config.developer_role.is_empty() {
        return Some("developer_role");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_analyze_with_hint() {
        let content = "!bug https://discord.com/channels/1/2/3 crashes when saving";
        assert_eq!(
            parse_command(content),
            Some(Command::Analyze {
                link: "https://discord.com/channels/1/2/3",
                hint: "crashes when saving",
            })
        );
    }

    #[test]
    fn parses_analyze_without_hint() {
        assert_eq!(
            parse_command("!bug https://discord.com/channels/1/2/3"),
            Some(Command::Analyze {
                link: "https://discord.com/channels/1/2/3",
                hint: "",
            })
        );
    }

    #[test]
    fn parses_fix_and_file() {
        assert_eq!(
            parse_command("!fix the category should be UI"),
            Some(Command::Fix {
                comment: "the category should be UI"
            })
        );
        assert_eq!(parse_command("!file"), Some(Command::File));
    }

    #[test]
    fn ignores_other_messages() {
        assert!(parse_command("hello there").is_none());
        assert!(parse_command("!bug").is_none());
        assert!(parse_command("!bugged out").is_none());
        assert!(parse_command("!fix").is_none());
        assert!(parse_command("!filed under misc").is_none());
    }

    #[test]
    fn reports_first_missing_field() {
        let mut config = GuildConfig::default();
        assert_eq!(missing_config_field(&config), Some("github_repo"));

        config.github_repo = "acme/widgets".to_string();
        assert_eq!(missing_config_field(&config), Some("issue_categories"));

        config.issue_categories = vec!["crash".to_string()];
        assert_eq!(missing_config_field(&config), None);
    }
}
