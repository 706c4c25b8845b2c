//! Bugbot Gateway - Discord bug triage bot
//!
//! This library provides the core functionality for the bugbot:
//! - Per-guild session cache with lazy initialization and idle eviction
//! - Conversational context builder (history, replies, image descriptions)
//! - OpenAI-backed issue analysis and report rendering
//! - GitHub issue filing
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Discord                          │
//! │        !bug <message link> [developer hint]          │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Bugbot Gateway                       │
//! │  Sessions  │  Context  │  Analysis  │  GitHub       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                    OpenAI                            │
//! │     chat analysis  │  vision  │  JSON formatting    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod analysis;
pub mod bot;
pub mod chat;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod github;
pub mod session;

pub use analysis::{AnalysisSuite, IssueReport, OpenAiClient, SuiteFactory};
pub use chat::{ChatAttachment, ChatAuthor, ChatEmbed, ChatMessage, MessageSource};
pub use config::Config;
pub use context::{ContextBuilder, EmbedResolver, OgImageResolver};
pub use db::{ConfigRepo, ConfigStore, DbConn, DbPool, GuildConfig};
pub use error::{Error, Result};
pub use github::GitHubClient;
pub use session::{BusyGuard, CacheOptions, SessionCache};
