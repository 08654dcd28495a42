use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{validate_url, ScrapeError, Scraper};
use crate::models::ScrapedDocument;

pub const DEFAULT_BASE_URL: &str = "https://api.firecrawl.dev";

/// Hosted scraper; renders JavaScript-heavy listing pages the local
/// scraper cannot.
pub struct FirecrawlScraper {
    http_client: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ScrapeBody<'a> {
    url: &'a str,
    formats: [&'static str; 2],
}

#[derive(Debug, Deserialize)]
struct ScrapeReply {
    #[serde(default)]
    success: bool,
    data: Option<ScrapeData>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ScrapeData {
    markdown: Option<String>,
    images: Option<Vec<String>>,
}

impl FirecrawlScraper {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

fn document_from_reply(url: &str, reply: ScrapeReply) -> Result<ScrapedDocument, ScrapeError> {
    if !reply.success {
        return Err(ScrapeError::Provider(
            reply.error.unwrap_or_else(|| "scrape was not successful".to_string()),
        ));
    }
    let data = reply.data.unwrap_or_default();
    Ok(ScrapedDocument {
        url: url.to_string(),
        markdown: data.markdown.unwrap_or_default(),
        image_references: data.images.unwrap_or_default(),
    })
}

#[async_trait]
impl Scraper for FirecrawlScraper {
    async fn scrape(&self, url: &str) -> Result<ScrapedDocument, ScrapeError> {
        validate_url(url)?;

        let response = self
            .http_client
            .post(format!("{}/v1/scrape", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&ScrapeBody {
                url,
                formats: ["markdown", "images"],
            })
            .send()
            .await
            .map_err(|e| ScrapeError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %body, "firecrawl scrape failed");
            return Err(ScrapeError::Provider(format!("HTTP {}: {}", status, body)));
        }

        let reply: ScrapeReply = response
            .json()
            .await
            .map_err(|e| ScrapeError::Provider(e.to_string()))?;

        document_from_reply(url, reply)
    }
}
