use std::str::FromStr;
use std::time::Duration;

use crate::content::clamp_max_images;
use crate::images::{IMAGE_FETCH_TIMEOUT, MIN_IMAGE_BYTES};
use crate::{llm, scrape};

/// Listing analyzed when no URL is supplied.
pub const DEFAULT_LISTING_URL: &str =
    "https://www.imot.bg/obiava-1a176909066903505-prodava-ednostaen-apartament-oblast-burgas-gr-aheloy";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub firecrawl_api_key: Option<String>,
    pub firecrawl_base_url: String,
    pub listing_url: String,
    pub bind_addr: String,
    pub max_images: usize,
    pub image_fetch_timeout: Duration,
    pub min_image_bytes: usize,
    pub excerpt_chars: usize,
    pub include_images: bool,
    pub skip_analysis: bool,
    pub run_timeout: Option<Duration>,
    pub insecure_ssl: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            llm_api_key: get("OPENROUTER_API_KEY").ok_or(ConfigError::Missing("OPENROUTER_API_KEY"))?,
            llm_base_url: get("LLM_BASE_URL").unwrap_or_else(|| llm::DEFAULT_BASE_URL.to_string()),
            llm_model: get("LLM_MODEL").unwrap_or_else(|| llm::DEFAULT_MODEL.to_string()),
            llm_temperature: parse_or(&get, "LLM_TEMPERATURE", 0.0)?,
            firecrawl_api_key: get("FIRECRAWL_API_KEY"),
            firecrawl_base_url: get("FIRECRAWL_BASE_URL")
                .unwrap_or_else(|| scrape::FIRECRAWL_BASE_URL.to_string()),
            listing_url: get("LISTING_URL").unwrap_or_else(|| DEFAULT_LISTING_URL.to_string()),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            max_images: clamp_max_images(parse_or(&get, "MAX_IMAGES", 6i64)?),
            image_fetch_timeout: get("IMAGE_FETCH_TIMEOUT_SECS")
                .map(|v| parse_value::<u64>("IMAGE_FETCH_TIMEOUT_SECS", v).map(Duration::from_secs))
                .transpose()?
                .unwrap_or(IMAGE_FETCH_TIMEOUT),
            min_image_bytes: parse_or(&get, "MIN_IMAGE_BYTES", MIN_IMAGE_BYTES)?,
            excerpt_chars: parse_or(&get, "EXCERPT_CHARS", 6000usize)?,
            include_images: parse_flag(&get, "INCLUDE_IMAGES", true)?,
            skip_analysis: parse_flag(&get, "SKIP_ANALYSIS", false)?,
            run_timeout: get("RUN_TIMEOUT_SECS")
                .map(|v| parse_value::<u64>("RUN_TIMEOUT_SECS", v).map(Duration::from_secs))
                .transpose()?,
            insecure_ssl: parse_flag(&get, "BROKER_AI_INSECURE_SSL", false)?,
        })
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        Some(value) => parse_value(key, value),
        None => Ok(default),
    }
}

fn parse_flag(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match get(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            key,
            value: other.to_string(),
        }),
    }
}
