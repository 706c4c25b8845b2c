//! Discord message source using serenity

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::all::{ChannelId, GuildId, Message, MessageId, RoleId, UserId};
use serenity::http::{Http, MessagePagination};

use super::{ChatAttachment, ChatAuthor, ChatEmbed, ChatMessage, MessageSource};
use crate::{Error, Result};

/// First second of 2015, the Discord snowflake epoch
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

/// Discord treats history limits above 100 as 100
const MAX_HISTORY_FETCH: usize = 100;

/// Reads channel history for one guild over the Discord REST API
pub struct DiscordSource {
    http: Arc<Http>,
    guild_id: GuildId,
}

impl DiscordSource {
    /// Create a source bound to a guild
    #[must_use]
    pub fn new(http: Arc<Http>, guild_id: u64) -> Self {
        Self {
            http,
            guild_id: GuildId::new(guild_id),
        }
    }

    /// Guild role id → name mapping, empty when the lookup fails
    async fn role_names(&self) -> HashMap<RoleId, String> {
        match self.http.get_guild_roles(self.guild_id).await {
            Ok(roles) => roles.into_iter().map(|r| (r.id, r.name)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch guild roles");
                HashMap::new()
            }
        }
    }

    /// Role names held by a user, empty when membership cannot be resolved
    /// (webhooks, users who left)
    async fn member_roles(
        &self,
        role_names: &HashMap<RoleId, String>,
        user_id: UserId,
    ) -> Vec<String> {
        match self.http.get_member(self.guild_id, user_id).await {
            Ok(member) => member
                .roles
                .iter()
                .filter_map(|id| role_names.get(id).cloned())
                .collect(),
            Err(e) => {
                tracing::debug!(%user_id, error = %e, "member lookup failed");
                Vec::new()
            }
        }
    }

    async fn convert(
        &self,
        message: Message,
        role_names: &HashMap<RoleId, String>,
        role_cache: &mut HashMap<UserId, Vec<String>>,
    ) -> ChatMessage {
        let roles = match role_cache.get(&message.author.id) {
            Some(roles) => roles.clone(),
            None => {
                let roles = self.member_roles(role_names, message.author.id).await;
                role_cache.insert(message.author.id, roles.clone());
                roles
            }
        };

        ChatMessage {
            id: message.id.get(),
            channel_id: message.channel_id.get(),
            author: ChatAuthor {
                id: message.author.id.get(),
                name: message.author.name.clone(),
                roles,
            },
            content: message.content.clone(),
            timestamp: DateTime::from_timestamp(message.timestamp.unix_timestamp(), 0)
                .unwrap_or_default(),
            attachments: message
                .attachments
                .iter()
                .map(|a| ChatAttachment {
                    url: a.url.clone(),
                    content_type: a.content_type.clone(),
                })
                .collect(),
            embeds: message
                .embeds
                .iter()
                .map(|e| ChatEmbed {
                    kind: e.kind.clone(),
                    url: e.url.clone(),
                })
                .collect(),
            reply_to: message
                .message_reference
                .as_ref()
                .and_then(|r| r.message_id)
                .map(MessageId::get),
        }
    }
}

#[async_trait]
impl MessageSource for DiscordSource {
    async fn history(
        &self,
        channel_id: u64,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        let cursor = MessageId::new(snowflake_at(after).max(1));
        let limit = u8::try_from(limit.min(MAX_HISTORY_FETCH)).unwrap_or(100);

        let mut messages = self
            .http
            .get_messages(
                ChannelId::new(channel_id),
                Some(MessagePagination::After(cursor)),
                Some(limit),
            )
            .await
            .map_err(|e| Error::Chat(format!("history fetch failed: {e}")))?;

        // Snowflakes order by creation time
        messages.sort_by_key(|m| m.id);

        let role_names = self.role_names().await;
        let mut role_cache = HashMap::new();

        let mut converted = Vec::with_capacity(messages.len());
        for message in messages {
            converted.push(self.convert(message, &role_names, &mut role_cache).await);
        }

        Ok(converted)
    }

    async fn fetch(&self, channel_id: u64, message_id: u64) -> Result<ChatMessage> {
        let message = self
            .http
            .get_message(ChannelId::new(channel_id), MessageId::new(message_id))
            .await
            .map_err(|e| Error::Chat(format!("message fetch failed: {e}")))?;

        let role_names = self.role_names().await;
        let mut role_cache = HashMap::new();

        Ok(self.convert(message, &role_names, &mut role_cache).await)
    }
}

/// Synthesize the snowflake a message created at `ts` would sort next to
fn snowflake_at(ts: DateTime<Utc>) -> u64 {
    let since_epoch = ts.timestamp_millis() - DISCORD_EPOCH_MS;
    u64::try_from(since_epoch.max(0)).unwrap_or(0) << 22
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_encodes_timestamp() {
        let ts = DateTime::from_timestamp(1_420_070_400 + 1, 0).unwrap();
        assert_eq!(snowflake_at(ts), 1000 << 22);
    }

    #[test]
    fn snowflake_clamps_pre_epoch_timestamps() {
        let ts = DateTime::from_timestamp(0, 0).unwrap();
        assert_eq!(snowflake_at(ts), 0);
    }

    #[test]
    fn snowflake_ordering_matches_time_ordering() {
        let earlier = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let later = DateTime::from_timestamp(1_700_000_003, 0).unwrap();
        assert!(snowflake_at(earlier) < snowflake_at(later));
    }
}
