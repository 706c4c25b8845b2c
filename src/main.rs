use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serenity::all::GatewayIntents;
use tracing_subscriber::EnvFilter;

use bugbot_gateway::analysis::{GptSuiteFactory, OpenAiClient};
use bugbot_gateway::bot::Handler;
use bugbot_gateway::context::OgImageResolver;
use bugbot_gateway::db::{self, ConfigRepo, ConfigStore};
use bugbot_gateway::github::GitHubClient;
use bugbot_gateway::session::SessionCache;
use bugbot_gateway::Config;

/// Bugbot - Discord bug triage bot that files GitHub issues from chat
#[derive(Parser)]
#[command(name = "bugbot", version, about)]
struct Cli {
    /// Discord bot token
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    discord_token: Option<String>,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// GitHub personal access token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Directory for the configuration database
    #[arg(long, env = "BUGBOT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Update a guild's configuration
    SetConfig {
        /// Guild ID
        #[arg(short, long)]
        guild: u64,
        /// Target repository in owner/repo form
        #[arg(long)]
        repo: Option<String>,
        /// Product name used in analysis prompts
        #[arg(long)]
        product_name: Option<String>,
        /// Product type, e.g. "game" or "web app"
        #[arg(long)]
        product_type: Option<String>,
        /// Comma-separated issue categories
        #[arg(long, value_delimiter = ',')]
        categories: Option<Vec<String>>,
        /// Comma-separated extra information requests
        #[arg(long, value_delimiter = ',')]
        extra_info: Option<Vec<String>>,
        /// Role name marking developers in chat logs
        #[arg(long)]
        developer_role: Option<String>,
    },
    /// Print a guild's configuration
    GetConfig {
        /// Guild ID
        #[arg(short, long)]
        guild: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,bugbot_gateway=info",
        1 => "info,bugbot_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(bugbot_gateway::config::default_data_dir);
    std::fs::create_dir_all(&data_dir)?;
    let pool = db::init(data_dir.join("bugbot.db"))?;
    let repo = ConfigRepo::new(pool);

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::SetConfig {
                guild,
                repo: github_repo,
                product_name,
                product_type,
                categories,
                extra_info,
                developer_role,
            } => set_config(
                &repo,
                guild,
                github_repo,
                product_name,
                product_type,
                categories,
                extra_info,
                developer_role,
            ),
            Command::GetConfig { guild } => get_config(&repo, guild),
        };
    }

    let config = Config::new(
        cli.discord_token.unwrap_or_default(),
        cli.openai_api_key.unwrap_or_default(),
        cli.github_token.unwrap_or_default(),
        Some(data_dir),
    )?;

    tracing::info!(data_dir = %config.data_dir.display(), "starting bugbot gateway");

    let openai = Arc::new(OpenAiClient::new(config.openai_api_key.clone())?);
    let factory = Arc::new(GptSuiteFactory::new(openai));
    let cache = SessionCache::new(Arc::new(repo), factory);
    cache.spawn_purge();

    let github = Arc::new(GitHubClient::new(config.github_token.clone())?);
    let resolver = Arc::new(OgImageResolver::new());
    let handler = Handler::new(Arc::clone(&cache), github, resolver);

    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS;

    let mut client = serenity::Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .await?;

    tokio::select! {
        result = client.start() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    cache.shutdown();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn set_config(
    repo: &ConfigRepo,
    guild: u64,
    github_repo: Option<String>,
    product_name: Option<String>,
    product_type: Option<String>,
    categories: Option<Vec<String>>,
    extra_info: Option<Vec<String>>,
    developer_role: Option<String>,
) -> anyhow::Result<()> {
    let mut config = repo.load(guild)?;

    if let Some(value) = github_repo {
        config.github_repo = value;
    }
    if let Some(value) = product_name {
        config.product_name = value;
    }
    if let Some(value) = product_type {
        config.product_type = value;
    }
    if let Some(value) = categories {
        config.issue_categories = value;
    }
    if let Some(value) = extra_info {
        config.issue_extra_info = value;
    }
    if let Some(value) = developer_role {
        config.developer_role = value;
    }

    repo.save(guild, &config)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn get_config(repo: &ConfigRepo, guild: u64) -> anyhow::Result<()> {
    let config = repo.load(guild)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
