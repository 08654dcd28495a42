use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ScrapeResponse {
    pub markdown: String,
    pub source_url: String,
    pub images: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeRequest {
    pub url: Option<String>,
    pub include_images: Option<bool>,
    pub skip_analysis: Option<bool>,
    /// Signed so that a negative budget can be clamped rather than rejected.
    pub max_images: Option<i64>,
}

/// Page content handed over by a scraper.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedDocument {
    pub url: String,
    pub markdown: String,
    /// Absolute http(s) URLs or inline `data:` references, in page order.
    pub image_references: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Floor {
    Number(f64),
    Label(String),
}

/// Attributes of the advertised apartment. Only the title is guaranteed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApartmentRecord {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_sqm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rooms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedrooms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor: Option<Floor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_floors: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub building_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_built: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amenities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_notes: Option<String>,
}

/// The six sections of the expert write-up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub market_assessment: String,
    pub design_and_layout: String,
    pub space_usage: String,
    pub pros_and_cons: String,
    pub risks_and_considerations: String,
    pub summary_and_recommendation: String,
}

impl AnalysisRecord {
    /// Section headings paired with their text, in presentation order.
    pub fn sections(&self) -> [(&'static str, &str); 6] {
        [
            ("Market assessment", &self.market_assessment),
            ("Design & layout", &self.design_and_layout),
            ("Space usage", &self.space_usage),
            ("Pros & cons", &self.pros_and_cons),
            ("Risks & considerations", &self.risks_and_considerations),
            ("Summary & recommendation", &self.summary_and_recommendation),
        ]
    }
}
