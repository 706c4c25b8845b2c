//! Chat platform domain types
//!
//! The context builder works against these types and the [`MessageSource`]
//! trait; the Discord adapter converts serenity models into them.

pub mod discord;

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;

use crate::Result;

pub use discord::DiscordSource;

/// A message author
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatAuthor {
    pub id: u64,
    pub name: String,
    /// Role names the author holds in the guild
    pub roles: Vec<String>,
}

/// A file attached to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatAttachment {
    pub url: String,
    pub content_type: Option<String>,
}

impl ChatAttachment {
    /// True when the attachment's content type indicates an image
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|c| c.starts_with("image"))
    }
}

/// An embed carried by a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEmbed {
    pub kind: Option<String>,
    pub url: Option<String>,
}

impl ChatEmbed {
    /// True for image-type embeds
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.kind.as_deref() == Some("image")
    }
}

/// A chat message, decoupled from any platform SDK
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: u64,
    pub channel_id: u64,
    pub author: ChatAuthor,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub attachments: Vec<ChatAttachment>,
    pub embeds: Vec<ChatEmbed>,
    /// Id of the message this one replies to, if any
    pub reply_to: Option<u64>,
}

/// Read access to channel history
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Fetch up to `limit` messages posted after `after`, oldest first
    async fn history(
        &self,
        channel_id: u64,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>>;

    /// Fetch a single message by id
    async fn fetch(&self, channel_id: u64, message_id: u64) -> Result<ChatMessage>;
}

static MESSAGE_LINK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://discord\.com/channels/(\d+)/(\d+)/(\d+)$").expect("valid regex")
});

/// Parse a Discord message link into `(guild, channel, message)` ids
#[must_use]
pub fn parse_message_link(url: &str) -> Option<(u64, u64, u64)> {
    let captures = MESSAGE_LINK_REGEX.captures(url.trim())?;
    let guild = captures[1].parse().ok()?;
    let channel = captures[2].parse().ok()?;
    let message = captures[3].parse().ok()?;
    Some((guild, channel, message))
}
