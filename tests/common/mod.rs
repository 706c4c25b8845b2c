//! Shared test utilities

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Mutex;

use bugbot_gateway::analysis::{AnalysisSuite, IssueReport, SuiteFactory};
use bugbot_gateway::chat::{ChatAuthor, ChatMessage, MessageSource};
use bugbot_gateway::context::EmbedResolver;
use bugbot_gateway::db::GuildConfig;
use bugbot_gateway::{DbPool, Error, Result, db};

/// Set up an in-memory test database
#[must_use]
#[allow(dead_code)]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Analysis suite returning canned results while recording its inputs
#[derive(Default)]
pub struct MockSuite {
    pub report: IssueReport,
    pub analyzed: Mutex<Vec<(String, String)>>,
    pub described: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl AnalysisSuite for MockSuite {
    async fn describe_images(&self, _context: &str, image_urls: &[String]) -> Result<String> {
        self.described.lock().await.push(image_urls.to_vec());
        Ok(format!("described: {}", image_urls.join(", ")))
    }

    async fn analyze_issue(&self, chat_log: &str, hint: &str) -> Result<IssueReport> {
        self.analyzed
            .lock()
            .await
            .push((chat_log.to_string(), hint.to_string()));
        Ok(self.report.clone())
    }

    async fn correct_analysis(&self, report: &IssueReport, _comment: &str) -> Result<IssueReport> {
        Ok(report.clone())
    }

    fn render_markdown(&self, report: &IssueReport) -> Option<(String, String)> {
        if report.is_empty() {
            None
        } else {
            Some(("title".to_string(), "body".to_string()))
        }
    }
}

/// Factory handing out one shared [`MockSuite`], counting builds
pub struct MockFactory {
    pub suite: Arc<MockSuite>,
    pub builds: AtomicUsize,
}

impl MockFactory {
    #[must_use]
    #[allow(dead_code)]
    pub fn new(suite: Arc<MockSuite>) -> Self {
        Self {
            suite,
            builds: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SuiteFactory for MockFactory {
    async fn build(&self, _guild_id: u64, _config: &GuildConfig) -> Result<Arc<dyn AnalysisSuite>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.suite) as Arc<dyn AnalysisSuite>)
    }
}

/// Message source backed by a fixed in-memory transcript
pub struct MockSource {
    pub messages: Vec<ChatMessage>,
}

#[async_trait]
impl MessageSource for MockSource {
    async fn history(
        &self,
        channel_id: u64,
        after: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        let mut messages: Vec<ChatMessage> = self
            .messages
            .iter()
            .filter(|m| m.channel_id == channel_id && m.timestamp > after)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.id);
        messages.truncate(limit);
        Ok(messages)
    }

    async fn fetch(&self, channel_id: u64, message_id: u64) -> Result<ChatMessage> {
        self.messages
            .iter()
            .find(|m| m.channel_id == channel_id && m.id == message_id)
            .cloned()
            .ok_or_else(|| Error::Chat(format!("message {message_id} not found")))
    }
}

/// Embed resolver backed by a fixed page -> image mapping
#[derive(Default)]
pub struct MockResolver {
    pub images: HashMap<String, String>,
}

#[async_trait]
impl EmbedResolver for MockResolver {
    async fn resolve_image_url(&self, url: &str) -> Option<String> {
        self.images.get(url).cloned()
    }
}

/// Fixed point in time test transcripts hang off
#[must_use]
#[allow(dead_code)]
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid timestamp")
}

#[must_use]
#[allow(dead_code)]
pub fn author(id: u64, name: &str, roles: &[&str]) -> ChatAuthor {
    ChatAuthor {
        id,
        name: name.to_string(),
        roles: roles.iter().map(ToString::to_string).collect(),
    }
}

/// Plain message `offset_secs` after [`base_time`]
#[must_use]
#[allow(dead_code)]
pub fn message(id: u64, author: &ChatAuthor, content: &str, offset_secs: i64) -> ChatMessage {
    ChatMessage {
        id,
        channel_id: 10,
        author: author.clone(),
        content: content.to_string(),
        timestamp: base_time() + chrono::Duration::seconds(offset_secs),
        attachments: Vec::new(),
        embeds: Vec::new(),
        reply_to: None,
    }
}
