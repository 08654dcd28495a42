//! Scrape stage: turn a listing URL into markdown plus image references.

mod firecrawl;
mod html;

pub use firecrawl::{FirecrawlScraper, DEFAULT_BASE_URL as FIRECRAWL_BASE_URL};
pub use html::HtmlScraper;

use async_trait::async_trait;
use url::Url;

use crate::models::ScrapedDocument;

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("{0}")]
    InvalidUrl(String),
    #[error("URL did not return HTML")]
    NotHtml,
    #[error("Upstream returned HTTP {0}")]
    Upstream(u16),
    #[error("{0}")]
    Request(String),
    #[error("Scrape provider error: {0}")]
    Provider(String),
}

#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<ScrapedDocument, ScrapeError>;
}

/// Only absolute http(s) URLs with a host can be scraped.
pub fn validate_url(url: &str) -> Result<Url, ScrapeError> {
    let parsed = Url::parse(url).map_err(|_| ScrapeError::InvalidUrl("Invalid URL".to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ScrapeError::InvalidUrl(
            "Only http and https URLs are allowed".to_string(),
        ));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ScrapeError::InvalidUrl("URL has no host".to_string()));
    }
    Ok(parsed)
}
