//! LLM-backed issue analysis
//!
//! Each guild gets its own analysis suite, initialized from that guild's
//! configuration: prompt templates are filled with the product details and
//! the extra report fields are given stable JSON keys up front.

mod openai;
pub mod prompts;
mod report;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::db::GuildConfig;
use crate::{Error, Result};

pub use openai::{ANALYSIS_MODEL, FORMAT_MODEL, OpenAiClient, VISION_MODEL};
pub use report::{IssueReport, STANDARD_FIELD_LABELS, STANDARD_REPORT_INFO, render_markdown};

/// Per-guild analysis operations
#[async_trait]
pub trait AnalysisSuite: Send + Sync {
    /// Describe a batch of images given their surrounding chat context
    async fn describe_images(&self, context: &str, image_urls: &[String]) -> Result<String>;

    /// Extract a structured issue report from a chat log
    ///
    /// An empty report means no issue was found.
    async fn analyze_issue(&self, chat_log: &str, hint: &str) -> Result<IssueReport>;

    /// Apply a correction comment to an existing report
    async fn correct_analysis(&self, report: &IssueReport, comment: &str) -> Result<IssueReport>;

    /// Render a report to a `(title, markdown body)` pair
    fn render_markdown(&self, report: &IssueReport) -> Option<(String, String)>;
}

/// Builds a fully initialized analysis suite for a guild
///
/// Initialization is async and must complete before the suite is handed
/// out, so construction and initialization live behind one call.
#[async_trait]
pub trait SuiteFactory: Send + Sync {
    /// Build and initialize a suite
    ///
    /// # Errors
    ///
    /// Returns error if initialization fails; the caller may retry later.
    async fn build(&self, guild_id: u64, config: &GuildConfig) -> Result<Arc<dyn AnalysisSuite>>;
}

/// OpenAI-backed suite factory
pub struct GptSuiteFactory {
    client: Arc<OpenAiClient>,
}

impl GptSuiteFactory {
    /// Create a factory sharing one API client across guilds
    #[must_use]
    pub fn new(client: Arc<OpenAiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SuiteFactory for GptSuiteFactory {
    async fn build(&self, guild_id: u64, config: &GuildConfig) -> Result<Arc<dyn AnalysisSuite>> {
        let suite = GptSuite::initialize(Arc::clone(&self.client), guild_id, config).await?;
        Ok(Arc::new(suite))
    }
}

/// OpenAI-backed analysis suite
pub struct GptSuite {
    client: Arc<OpenAiClient>,
    guild_id: u64,
    field_labels: BTreeMap<String, String>,
    prompt_analyze_chat: String,
    prompt_format_json: String,
}

impl GptSuite {
    /// Build and initialize a suite for one guild
    ///
    /// Derives JSON keys for the guild's extra report fields (one model
    /// call, skipped when there are none) and fills the prompt templates.
    ///
    /// # Errors
    ///
    /// Returns error if field-name derivation fails
    pub async fn initialize(
        client: Arc<OpenAiClient>,
        guild_id: u64,
        config: &GuildConfig,
    ) -> Result<Self> {
        let mut field_labels = derive_field_labels(&client, &config.issue_extra_info).await?;
        for (key, label) in STANDARD_FIELD_LABELS {
            field_labels.insert((*key).to_string(), (*label).to_string());
        }

        let mut report_info: Vec<&str> = STANDARD_REPORT_INFO.to_vec();
        report_info.extend(config.issue_extra_info.iter().map(String::as_str));

        let prompt_analyze_chat = prompts::fill(
            prompts::ANALYZE_CHAT,
            &[
                ("product_name", &config.product_name),
                ("product_type", &config.product_type),
                ("info", &bullet_list(&report_info)),
                ("categories", &category_list(&config.issue_categories)),
            ],
        );

        let prompt_format_json = prompts::fill(
            prompts::FORMAT_JSON,
            &[("fields", &format_fields(&field_labels))],
        );

        tracing::debug!(guild_id, fields = field_labels.len(), "analysis suite initialized");

        Ok(Self {
            client,
            guild_id,
            field_labels,
            prompt_analyze_chat,
            prompt_format_json,
        })
    }
}

#[async_trait]
impl AnalysisSuite for GptSuite {
    async fn describe_images(&self, context: &str, image_urls: &[String]) -> Result<String> {
        self.client
            .request(prompts::ANALYZE_IMAGES, context, image_urls, 0.33, VISION_MODEL)
            .await
    }

    async fn analyze_issue(&self, chat_log: &str, hint: &str) -> Result<IssueReport> {
        let hint = if hint.is_empty() { "<None>" } else { hint };
        let input = format!("Chat log:\n```\n{chat_log}\n```\n\nDeveloper hint: {hint}");

        let analysis = self
            .client
            .request(&self.prompt_analyze_chat, &input, &[], 0.1, ANALYSIS_MODEL)
            .await?;

        let object = self
            .client
            .request_json(&self.prompt_format_json, &analysis, FORMAT_MODEL)
            .await?;

        tracing::info!(guild_id = self.guild_id, fields = object.len(), "chat log analyzed");
        Ok(IssueReport::from_json(&object))
    }

    async fn correct_analysis(&self, report: &IssueReport, comment: &str) -> Result<IssueReport> {
        let json = serde_json::to_string_pretty(&Value::Object(report.to_json()))?;
        let input = format!("```json\n{json}\n```\n\nComment: {comment}");

        let object = self
            .client
            .request_json(prompts::CORRECT, &input, ANALYSIS_MODEL)
            .await?;

        Ok(IssueReport::from_json(&object))
    }

    fn render_markdown(&self, report: &IssueReport) -> Option<(String, String)> {
        report::render_markdown(&self.field_labels, report)
    }
}

/// Derive JSON keys for the guild's extra report fields
async fn derive_field_labels(
    client: &OpenAiClient,
    extra_info: &[String],
) -> Result<BTreeMap<String, String>> {
    if extra_info.is_empty() {
        return Ok(BTreeMap::new());
    }

    let numbered: String = extra_info
        .iter()
        .enumerate()
        .map(|(i, field)| format!("{}) {field}\n", i + 1))
        .collect();

    let object = client
        .request_json(prompts::FIELD_NAMES, &numbered, FORMAT_MODEL)
        .await?;

    if object.is_empty() {
        return Err(Error::Analysis("failed to derive field names".to_string()));
    }

    Ok(object
        .into_iter()
        .map(|(key, value)| {
            let label = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, label)
        })
        .collect())
}

/// Render entries as a `* ` bullet list
fn bullet_list(entries: &[&str]) -> String {
    entries
        .iter()
        .map(|entry| format!("* {entry}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render categories as an indented `- ` list
fn category_list(categories: &[String]) -> String {
    categories
        .iter()
        .map(|category| format!("  - {category}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render field keys as a JSON object skeleton for the format prompt
fn format_fields(field_labels: &BTreeMap<String, String>) -> String {
    field_labels
        .keys()
        .map(|key| format!("\"{key}\": \"...\""))
        .collect::<Vec<_>>()
        .join(",\n    ")
}
