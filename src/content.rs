//! Prompt assembly for the two generation calls.

use crate::images::ResolvedImage;
use crate::models::ApartmentRecord;

const EXTRACTION_PREAMBLE: &str = "You are Broker AI, an assistant that analyzes apartment listings. \
Extract all relevant information about the target apartment from the scraped listing content. \
Return only the structured data; omit any field you cannot find. \
For numbers (price, area, rooms, etc.) use numeric values. For lists (amenities) use an array of strings.";

const ANALYSIS_PREAMBLE: &str = "You are Broker AI, an experienced real-estate broker, interior designer and \
space planner. Write a complete and thorough expert analysis of the apartment below for a prospective buyer. \
Ground every statement in the extracted data, the listing text and, when attached, the listing photos. \
Be specific, direct and actionable; do not invent facts the listing does not support.";

pub const EMPTY_EXCERPT_PLACEHOLDER: &str = "(no listing text available)";

/// How closely the model should look at an attached image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageDetail {
    Auto,
}

impl ImageDetail {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageDetail::Auto => "auto",
        }
    }
}

pub const ANALYSIS_IMAGE_DETAIL: ImageDetail = ImageDetail::Auto;

/// One piece of a multi-part user message.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Image {
        image: ResolvedImage,
        detail: ImageDetail,
    },
}

/// Prompt for the extraction call: instructions, source URL, scraped markdown.
pub fn build_extraction_content(markdown: &str, listing_url: &str) -> Vec<Part> {
    vec![Part::Text(format!(
        "{}\n\nListing URL: {}\n\n--- Scraped markdown ---\n\n{}",
        EXTRACTION_PREAMBLE, listing_url, markdown
    ))]
}

/// Prompt for the analysis call.
///
/// Always exactly one text part first, then at most `max_images` image parts
/// in the order given. The cap is applied here even if the caller already
/// truncated.
pub fn build_analysis_content(
    record: &ApartmentRecord,
    excerpt: &str,
    images: &[ResolvedImage],
    max_images: usize,
) -> Vec<Part> {
    let record_text = serde_json::to_string_pretty(record).unwrap_or_else(|_| format!("{:#?}", record));
    let excerpt = if excerpt.trim().is_empty() {
        EMPTY_EXCERPT_PLACEHOLDER
    } else {
        excerpt
    };

    let text = format!(
        "{}\n\n--- Extracted apartment data ---\n\n{}\n\n--- Listing text excerpt ---\n\n{}",
        ANALYSIS_PREAMBLE, record_text, excerpt
    );

    let mut parts = Vec::with_capacity(1 + images.len().min(max_images));
    parts.push(Part::Text(text));
    parts.extend(images.iter().take(max_images).map(|image| Part::Image {
        image: image.clone(),
        detail: ANALYSIS_IMAGE_DETAIL,
    }));
    parts
}

/// Clamp a signed image budget (from config or a request) to a usable bound.
/// Negative values mean "no images".
pub fn clamp_max_images(requested: i64) -> usize {
    usize::try_from(requested).unwrap_or(0)
}

/// First `max_chars` characters of `text`, cut on a char boundary.
pub fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
