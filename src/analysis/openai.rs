//! OpenAI chat-completions client

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::prompts;
use crate::{Error, Result};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
const MAX_TOKENS: u32 = 4096;

/// Model used for chat-log analysis and report correction
pub const ANALYSIS_MODEL: &str = "gpt-4-turbo-preview";
/// Model used for image description
pub const VISION_MODEL: &str = "gpt-4-vision-preview";
/// Model used for cheap JSON formatting passes
pub const FORMAT_MODEL: &str = "gpt-3.5-turbo";

/// OpenAI API client
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: MessageContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Blocks(Vec<ContentBlock<'a>>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentBlock<'a> {
    #[serde(rename = "text")]
    Text { text: &'a str },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiClient {
    /// Create a new client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
        })
    }

    /// Run a completion and return the assistant's text reply
    ///
    /// # Errors
    ///
    /// Returns error if the API call fails or yields no content
    pub async fn request(
        &self,
        system: &str,
        prompt: &str,
        image_urls: &[String],
        temperature: f32,
        model: &str,
    ) -> Result<String> {
        self.request_inner(system, prompt, image_urls, temperature, model, false)
            .await
    }

    /// Run a JSON-mode completion and parse the reply as a JSON object
    ///
    /// A reply that fails to parse gets one salvage attempt: the broken text
    /// and the parser error are sent back to the model for repair.
    ///
    /// # Errors
    ///
    /// Returns error if the API call fails or the reply cannot be salvaged
    pub async fn request_json(
        &self,
        system: &str,
        prompt: &str,
        model: &str,
    ) -> Result<serde_json::Map<String, Value>> {
        let text = self
            .request_inner(system, prompt, &[], 0.1, model, true)
            .await?;

        match parse_json_object(&text) {
            Ok(object) => Ok(object),
            Err(parse_err) => {
                tracing::warn!(error = %parse_err, "malformed JSON reply, attempting repair");

                let fix_prompt = prompts::fill(
                    prompts::FIX_JSON,
                    &[("json", &text), ("error", &parse_err.to_string())],
                );
                let fixed = self
                    .request_inner("", &fix_prompt, &[], 0.1, model, false)
                    .await?;

                parse_json_object(&fixed)
                    .map_err(|e| Error::Analysis(format!("unrecoverable JSON reply: {e}")))
            }
        }
    }

    async fn request_inner(
        &self,
        system: &str,
        prompt: &str,
        image_urls: &[String],
        temperature: f32,
        model: &str,
        json: bool,
    ) -> Result<String> {
        let mut blocks = vec![ContentBlock::Text { text: prompt }];
        blocks.extend(image_urls.iter().map(|url| ContentBlock::ImageUrl {
            image_url: ImageUrl { url },
        }));

        let request = ChatRequest {
            model,
            messages: vec![
                RequestMessage {
                    role: "system",
                    content: MessageContent::Text(system),
                },
                RequestMessage {
                    role: "user",
                    content: MessageContent::Blocks(blocks),
                },
            ],
            temperature,
            max_tokens: MAX_TOKENS,
            response_format: json.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Analysis(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Analysis(format!("API error {status}: {body}")));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Analysis(format!("parse error: {e}")))?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Analysis("empty completion".to_string()))
    }
}

/// Parse text as a JSON object, tolerating stray code fences
fn parse_json_object(text: &str) -> serde_json::Result<serde_json::Map<String, Value>> {
    let trimmed = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let value: Value = serde_json::from_str(trimmed)?;
    match value {
        Value::Object(object) => Ok(object),
        _ => Err(serde::de::Error::custom("expected a JSON object")),
    }
}
