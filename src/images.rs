//! Image resolution for the analysis stage.
//!
//! Turns the image references collected while scraping (remote URLs or
//! inline `data:` payloads) into a bounded, ordered list of base64 images in
//! one of the raster formats the vision model accepts. Individual images that
//! cannot be used are dropped here and never surface as errors.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use tracing::debug;

use crate::observer::{PipelineEvent, PipelineObserver};

// ── Constants ────────────────────────────────────────────────────────────────

pub const USER_AGENT: &str = "broker-ai-api/1.0 (+listing image fetcher)";
pub const IMAGE_FETCH_TIMEOUT: Duration = Duration::from_secs(12);
/// Bodies smaller than this are tracking pixels, spacers or icons.
pub const MIN_IMAGE_BYTES: usize = 5000;

const DATA_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64";

// ── MIME normalization ───────────────────────────────────────────────────────

/// The raster formats accepted by the analysis model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMime {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageMime {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageMime::Jpeg => "image/jpeg",
            ImageMime::Png => "image/png",
            ImageMime::Gif => "image/gif",
            ImageMime::Webp => "image/webp",
        }
    }

    /// Map any declared content type onto one of the four allowed types.
    ///
    /// Parameters and case are ignored. Anything unrecognized, including an
    /// absent type and the non-standard `image/jpg`, becomes `image/jpeg`.
    pub fn normalize(content_type: Option<&str>) -> Self {
        match content_type.map(essence).as_deref() {
            Some("image/png") => ImageMime::Png,
            Some("image/gif") => ImageMime::Gif,
            Some("image/webp") => ImageMime::Webp,
            _ => ImageMime::Jpeg,
        }
    }
}

impl fmt::Display for ImageMime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercased media type without parameters: `"Image/PNG; q=1"` -> `"image/png"`.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Whether a declared content type may carry a raster image.
///
/// A missing header is given the benefit of the doubt; vector formats are
/// refused because the model only reads bitmaps.
pub fn accepts_content_type(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => {
            let ct = essence(ct);
            ct.starts_with("image/") && !ct.contains("svg")
        }
    }
}

// ── Resolved image ───────────────────────────────────────────────────────────

/// An image carried entirely inline, ready to send without network access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub mime: ImageMime,
    pub base64: String,
}

impl ResolvedImage {
    pub fn from_bytes(content_type: Option<&str>, body: &[u8]) -> Self {
        Self {
            mime: ImageMime::normalize(content_type),
            base64: BASE64.encode(body),
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64)
    }
}

// ── Fetching ─────────────────────────────────────────────────────────────────

/// What came back from a single image request.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Network(String),
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError>;
}

/// reqwest-backed fetcher with a fixed timeout and client identity.
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration, insecure: bool) -> Result<Self, reqwest::Error> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "image/avif,image/webp,image/png,image/jpeg,image/*;q=0.8",
            ),
        );

        let mut builder = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(USER_AGENT)
            .default_headers(headers);

        if insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Don't pull bodies the resolver is going to throw away anyway.
        if !response.status().is_success() || !accepts_content_type(content_type.as_deref()) {
            return Ok(FetchedImage {
                status,
                content_type,
                body: Bytes::new(),
            });
        }

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        Ok(FetchedImage {
            status,
            content_type,
            body,
        })
    }
}

// ── Resolver ─────────────────────────────────────────────────────────────────

/// Why a single reference was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MalformedData,
    Timeout,
    Fetch(String),
    Status(u16),
    ContentType(String),
    TooSmall(usize),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MalformedData => f.write_str("embedded data is not base64 image data"),
            SkipReason::Timeout => f.write_str("fetch timed out"),
            SkipReason::Fetch(msg) => write!(f, "fetch failed: {}", msg),
            SkipReason::Status(code) => write!(f, "HTTP {}", code),
            SkipReason::ContentType(ct) => write!(f, "unsupported content type {}", ct),
            SkipReason::TooSmall(len) => write!(f, "only {} bytes", len),
        }
    }
}

enum Reference<'a> {
    Remote(&'a str),
    Embedded(&'a str),
}

fn classify(reference: &str) -> Option<Reference<'_>> {
    let lower = reference.get(..8).unwrap_or(reference).to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Some(Reference::Remote(reference))
    } else if lower.starts_with(DATA_PREFIX) {
        Some(Reference::Embedded(reference))
    } else {
        None
    }
}

/// Shortened reference for logs; inline payloads can be megabytes long.
pub fn short_reference(reference: &str) -> String {
    const LIMIT: usize = 80;
    match reference.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}…", &reference[..idx]),
        None => reference.to_string(),
    }
}

pub struct ImageResolver {
    fetcher: Arc<dyn ImageFetcher>,
    timeout: Duration,
    min_bytes: usize,
}

impl ImageResolver {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            fetcher,
            timeout: IMAGE_FETCH_TIMEOUT,
            min_bytes: MIN_IMAGE_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_min_bytes(mut self, min_bytes: usize) -> Self {
        self.min_bytes = min_bytes;
        self
    }

    /// Resolve at most `max` images, in input order.
    ///
    /// References are consumed lazily: once `max` images have been accepted
    /// the remaining ones are never fetched. References that are neither
    /// http(s) nor `data:` are ignored without an event.
    pub async fn resolve_images(
        &self,
        references: &[String],
        max: usize,
        observer: &dyn PipelineObserver,
    ) -> Vec<ResolvedImage> {
        let mut resolved = Vec::with_capacity(max.min(references.len()));

        for reference in references {
            if resolved.len() >= max {
                break;
            }

            let outcome = match classify(reference) {
                Some(Reference::Embedded(data)) => resolve_embedded(data),
                Some(Reference::Remote(url)) => self.resolve_remote(url).await,
                None => {
                    debug!(reference = %short_reference(reference), "ignoring non-fetchable image reference");
                    continue;
                }
            };

            match outcome {
                Ok(image) => {
                    observer.on_event(&PipelineEvent::ImageAccepted {
                        reference: short_reference(reference),
                        mime: image.mime,
                    });
                    resolved.push(image);
                }
                Err(reason) => observer.on_event(&PipelineEvent::ImageSkipped {
                    reference: short_reference(reference),
                    reason,
                }),
            }
        }

        resolved
    }

    async fn resolve_remote(&self, url: &str) -> Result<ResolvedImage, SkipReason> {
        let fetched = match tokio::time::timeout(self.timeout, self.fetcher.fetch(url)).await {
            Err(_) | Ok(Err(FetchError::Timeout)) => return Err(SkipReason::Timeout),
            Ok(Err(FetchError::Network(msg))) => return Err(SkipReason::Fetch(msg)),
            Ok(Ok(fetched)) => fetched,
        };

        if !(200..300).contains(&fetched.status) {
            return Err(SkipReason::Status(fetched.status));
        }

        let content_type = fetched.content_type.as_deref();
        if !accepts_content_type(content_type) {
            return Err(SkipReason::ContentType(
                content_type.unwrap_or_default().to_string(),
            ));
        }

        if fetched.body.len() < self.min_bytes {
            return Err(SkipReason::TooSmall(fetched.body.len()));
        }

        Ok(ResolvedImage::from_bytes(content_type, &fetched.body))
    }
}

/// `data:<mime>;base64,<payload>`: re-tag the MIME type, keep the payload.
fn resolve_embedded(reference: &str) -> Result<ResolvedImage, SkipReason> {
    let rest = &reference[DATA_PREFIX.len()..];
    let (header, payload) = rest.split_once(',').ok_or(SkipReason::MalformedData)?;

    let header_lower = header.to_ascii_lowercase();
    if !header_lower.ends_with(BASE64_MARKER) || payload.is_empty() {
        return Err(SkipReason::MalformedData);
    }

    let declared = header.split(';').next().filter(|m| !m.is_empty());
    Ok(ResolvedImage {
        mime: ImageMime::normalize(declared),
        base64: payload.to_string(),
    })
}
