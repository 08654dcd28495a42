//! Structured generation against an OpenAI-compatible chat completions API.

use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::content::Part;
use crate::schema::SchemaSpec;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

/// A model that fills in a record matching `schema` from the given prompt.
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    async fn generate(&self, schema: &SchemaSpec, parts: &[Part]) -> Result<Value, GenerationError>;
}

/// Generate and deserialize in one step.
pub async fn generate_record<T: DeserializeOwned>(
    generator: &dyn StructuredGenerator,
    schema: &SchemaSpec,
    parts: &[Part],
) -> Result<T, GenerationError> {
    let value = generator.generate(schema, parts).await?;
    serde_json::from_value(value)
        .map_err(|e| GenerationError::Parse(format!("{} does not match schema: {}", schema.name, e)))
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    strict: bool,
    schema: Value,
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

fn to_content_part(part: &Part) -> ContentPart {
    match part {
        Part::Text(text) => ContentPart::Text { text: text.clone() },
        Part::Image { image, detail } => ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: image.data_url(),
                detail: detail.as_str(),
            },
        },
    }
}

/// Parse the JSON object out of a completion, tolerating a markdown fence.
fn parse_json_payload(content: &str) -> Result<Value, GenerationError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    match serde_json::from_str::<Value>(unfenced.trim()) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(GenerationError::Parse(format!(
            "expected a JSON object, got {}",
            other
        ))),
        Err(e) => Err(GenerationError::Parse(e.to_string())),
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct OpenAiGenerator {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OpenAiGenerator {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn request<'a>(&'a self, schema: &SchemaSpec, parts: &[Part]) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: parts.iter().map(to_content_part).collect(),
            }],
            temperature: self.temperature,
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: schema.name,
                    strict: false,
                    schema: schema.to_json_schema(),
                },
            },
        }
    }
}

#[async_trait]
impl StructuredGenerator for OpenAiGenerator {
    async fn generate(&self, schema: &SchemaSpec, parts: &[Part]) -> Result<Value, GenerationError> {
        let start = Instant::now();

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request(schema, parts))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "structured generation request failed");
                GenerationError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %body, "structured generation API error");
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Parse(e.to_string()))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::Parse("completion had no content".into()))?;

        debug!(
            model = %self.model,
            schema = schema.name,
            parts = parts.len(),
            duration_ms = start.elapsed().as_millis(),
            "structured generation completed"
        );

        parse_json_payload(&content)
    }
}
