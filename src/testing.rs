//! Mock collaborators for unit tests. No network access.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};

use crate::content::Part;
use crate::images::{FetchError, FetchedImage, ImageFetcher, SkipReason};
use crate::llm::{GenerationError, StructuredGenerator};
use crate::models::ScrapedDocument;
use crate::observer::{PipelineEvent, PipelineObserver};
use crate::schema::SchemaSpec;
use crate::scrape::{ScrapeError, Scraper};

// ── Observer ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn stages(&self) -> Vec<PipelineEvent> {
        self.events()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    PipelineEvent::StageStarted(_) | PipelineEvent::StageCompleted(_)
                )
            })
            .collect()
    }

    pub fn images(&self) -> Vec<PipelineEvent> {
        self.events()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    PipelineEvent::ImageAccepted { .. } | PipelineEvent::ImageSkipped { .. }
                )
            })
            .collect()
    }

    pub fn skipped(&self) -> Vec<(String, SkipReason)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::ImageSkipped { reference, reason } => Some((reference, reason)),
                _ => None,
            })
            .collect()
    }
}

impl PipelineObserver for RecordingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ── Image fetcher ────────────────────────────────────────────────────────────

enum MockFetch {
    Respond(FetchedImage),
    Fail(String),
    Delay(Duration),
}

/// Serves canned responses by URL and records every requested URL.
#[derive(Default)]
pub struct MockImageFetcher {
    responses: HashMap<String, MockFetch>,
    calls: Mutex<Vec<String>>,
}

impl MockImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond with `size` zero bytes.
    pub fn with_image(mut self, url: &str, status: u16, content_type: Option<&str>, size: usize) -> Self {
        self.responses.insert(
            url.to_string(),
            MockFetch::Respond(FetchedImage {
                status,
                content_type: content_type.map(str::to_string),
                body: Bytes::from(vec![0u8; size]),
            }),
        );
        self
    }

    pub fn with_failure(mut self, url: &str, message: &str) -> Self {
        self.responses
            .insert(url.to_string(), MockFetch::Fail(message.to_string()));
        self
    }

    /// Sleep for `delay`, then respond with a valid PNG-sized body.
    pub fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.responses.insert(url.to_string(), MockFetch::Delay(delay));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageFetcher for MockImageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        match self.responses.get(url) {
            Some(MockFetch::Respond(image)) => Ok(image.clone()),
            Some(MockFetch::Fail(message)) => Err(FetchError::Network(message.clone())),
            Some(MockFetch::Delay(delay)) => {
                tokio::time::sleep(*delay).await;
                Ok(FetchedImage {
                    status: 200,
                    content_type: Some("image/png".to_string()),
                    body: Bytes::from(vec![0u8; 10_000]),
                })
            }
            None => Err(FetchError::Network(format!("no mock response for {}", url))),
        }
    }
}

// ── Scraper ──────────────────────────────────────────────────────────────────

pub struct MockScraper {
    result: Result<ScrapedDocument, String>,
    delay: Option<Duration>,
}

impl MockScraper {
    pub fn new(document: ScrapedDocument) -> Self {
        Self {
            result: Ok(document),
            delay: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Scraper for MockScraper {
    async fn scrape(&self, _url: &str) -> Result<ScrapedDocument, ScrapeError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result
            .clone()
            .map_err(ScrapeError::Provider)
    }
}

// ── Generator ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MockGenerateCall {
    pub schema: String,
    pub parts: Vec<Part>,
}

/// Returns a canned JSON value per schema name; unknown schemas get an API error.
#[derive(Default)]
pub struct MockGenerator {
    responses: HashMap<String, Value>,
    calls: Mutex<Vec<MockGenerateCall>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, schema: &str, value: Value) -> Self {
        self.responses.insert(schema.to_string(), value);
        self
    }

    pub fn calls(&self) -> Vec<MockGenerateCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StructuredGenerator for MockGenerator {
    async fn generate(&self, schema: &SchemaSpec, parts: &[Part]) -> Result<Value, GenerationError> {
        self.calls.lock().unwrap().push(MockGenerateCall {
            schema: schema.name.to_string(),
            parts: parts.to_vec(),
        });
        self.responses
            .get(schema.name)
            .cloned()
            .ok_or_else(|| GenerationError::Api {
                status: 500,
                body: format!("no mock response for {}", schema.name),
            })
    }
}

pub fn analysis_json() -> Value {
    json!({
        "marketAssessment": "Priced slightly under the local average.",
        "designAndLayout": "Compact but bright layout.",
        "spaceUsage": "Works as a holiday rental.",
        "prosAndCons": "Pro: sea view. Con: no parking.",
        "risksAndConsiderations": "Check maintenance fees.",
        "summaryAndRecommendation": "Consider with caveats."
    })
}
