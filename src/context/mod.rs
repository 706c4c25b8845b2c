//! Conversational context builder
//!
//! Walks channel history around an anchor message and flattens it into one
//! transcript for analysis: author names (with a developer marker), image
//! descriptions, and reply references merged into chronological lines.

pub mod embed;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::chat::{ChatAuthor, ChatMessage, MessageSource};
use crate::db::GuildConfig;
use crate::session::SessionCache;
use crate::Result;

pub use embed::{EmbedResolver, OgImageResolver};

/// Seconds before the anchor's timestamp the window opens, so
/// near-simultaneous messages are included
pub const GRACE_WINDOW_SECS: i64 = 3;

/// History window handed to the image-description call
const IMAGE_CONTEXT_MESSAGES: usize = 5;

/// Builds flattened chat transcripts
pub struct ContextBuilder {
    cache: Arc<SessionCache>,
    source: Arc<dyn MessageSource>,
    resolver: Arc<dyn EmbedResolver>,
}

impl ContextBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new(
        cache: Arc<SessionCache>,
        source: Arc<dyn MessageSource>,
        resolver: Arc<dyn EmbedResolver>,
    ) -> Self {
        Self {
            cache,
            source,
            resolver,
        }
    }

    /// Build a transcript of up to `limit` messages ending at `anchor`
    ///
    /// Each author may contribute at most `max_images_per_author` images
    /// across the window; pass 0 to skip image resolution entirely.
    /// Messages are rendered oldest first as `<author>: <content>` lines
    /// separated by blank lines. Work is sequential by design: the image
    /// quota and the transcript accumulate in message order.
    ///
    /// # Errors
    ///
    /// Returns error if history cannot be fetched, a replied-to message
    /// cannot be resolved, or the analysis suite fails. Image and embed
    /// resolution failures only skip the image.
    pub fn build_history<'a>(
        &'a self,
        guild_id: u64,
        anchor: &'a ChatMessage,
        limit: usize,
        max_images_per_author: usize,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let after = anchor.timestamp - chrono::Duration::seconds(GRACE_WINDOW_SECS);
            let messages = self.source.history(anchor.channel_id, after, limit).await?;
            let config = self.cache.get_config(guild_id).await?;

            let mut images_used: HashMap<u64, usize> = HashMap::new();
            let mut lines = Vec::with_capacity(messages.len());

            for message in &messages {
                let mut content = message.content.clone();

                if max_images_per_author > 0 {
                    let used = images_used.entry(message.author.id).or_insert(0);
                    let urls = self
                        .collect_images(message, *used, max_images_per_author)
                        .await;

                    if !urls.is_empty() {
                        *used += urls.len();
                        let description = self.describe_images(guild_id, message, &urls).await?;
                        content.push_str(&format!(
                            "\n<IMAGES ATTACHED TO THIS MESSAGE: {description}>"
                        ));
                    }
                }

                if let Some(referenced_id) = message.reply_to {
                    let referenced = self.source.fetch(message.channel_id, referenced_id).await?;
                    content.push_str(&format!(
                        "\n<REPLYING TO: {}: {}>",
                        display_name(&referenced.author, &config),
                        referenced.content
                    ));
                }

                lines.push(format!(
                    "{}: {content}",
                    display_name(&message.author, &config)
                ));
            }

            Ok(lines.join("\n\n"))
        })
    }

    /// Gather image URLs a message contributes within the author's quota
    ///
    /// Attachments are taken first, then image embeds resolved through the
    /// page's Open Graph metadata; unresolvable embeds are skipped.
    async fn collect_images(
        &self,
        message: &ChatMessage,
        used: usize,
        max_per_author: usize,
    ) -> Vec<String> {
        let mut urls = Vec::new();

        for attachment in &message.attachments {
            if used + urls.len() >= max_per_author {
                break;
            }
            if attachment.is_image() {
                urls.push(attachment.url.clone());
            }
        }

        for embed in &message.embeds {
            if used + urls.len() >= max_per_author {
                break;
            }
            if !embed.is_image() {
                continue;
            }
            let Some(page_url) = embed.url.as_deref() else {
                continue;
            };
            if let Some(image_url) = self.resolver.resolve_image_url(page_url).await {
                urls.push(image_url);
            }
        }

        urls
    }

    /// Describe a message's images with a short surrounding context window
    async fn describe_images(
        &self,
        guild_id: u64,
        message: &ChatMessage,
        urls: &[String],
    ) -> Result<String> {
        let context = self
            .build_history(guild_id, message, IMAGE_CONTEXT_MESSAGES, 0)
            .await?;
        let suite = self.cache.analysis_suite(guild_id).await?;
        suite.describe_images(&context, urls).await
    }
}

/// Author display name, marked when they hold the configured developer role
fn display_name(author: &ChatAuthor, config: &GuildConfig) -> String {
    let is_developer = !config.developer_role.is_empty()
        && author.roles.iter().any(|role| role == &config.developer_role);

    if is_developer {
        format!("{} (Developer)", author.name)
    } else {
        author.name.clone()
    }
}
