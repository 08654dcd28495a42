//! Field descriptions used to steer structured generation.
//!
//! A [`SchemaSpec`] is plain data: the field list, which fields are required,
//! and a human-readable hint per field. [`SchemaSpec::to_json_schema`] turns it
//! into the JSON Schema sent to the model.

use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Number,
    /// Either a number or a free-text label (e.g. floor "ground").
    NumberOrString,
    StringList,
    Enum(&'static [&'static str]),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub description: &'static str,
}

impl FieldSpec {
    pub const fn required(name: &'static str, field_type: FieldType, description: &'static str) -> Self {
        Self {
            name,
            field_type,
            required: true,
            description,
        }
    }

    pub const fn optional(name: &'static str, field_type: FieldType, description: &'static str) -> Self {
        Self {
            name,
            field_type,
            required: false,
            description,
        }
    }

    fn to_json_schema(&self) -> Value {
        let mut schema = match &self.field_type {
            FieldType::String => json!({"type": "string"}),
            FieldType::Number => json!({"type": "number"}),
            FieldType::NumberOrString => json!({"anyOf": [{"type": "number"}, {"type": "string"}]}),
            FieldType::StringList => json!({"type": "array", "items": {"type": "string"}}),
            FieldType::Enum(values) => json!({"type": "string", "enum": values}),
        };
        schema["description"] = Value::String(self.description.to_string());
        schema
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl SchemaSpec {
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            properties.insert(field.name.to_string(), field.to_json_schema());
        }

        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect();

        json!({
            "type": "object",
            "description": self.description,
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

/// Attributes pulled out of a scraped listing.
pub fn apartment_schema() -> SchemaSpec {
    use FieldType::*;

    SchemaSpec {
        name: "ApartmentExtraction",
        description: "Relevant information extracted from a scraped apartment listing",
        fields: vec![
            FieldSpec::required("title", String, "Listing title or short headline"),
            FieldSpec::optional("address", String, "Full address or location (city, district, area)"),
            FieldSpec::optional("price", Number, "Price as a number (no currency symbols)"),
            FieldSpec::optional("currency", String, "Currency code or symbol, e.g. EUR, BGN"),
            FieldSpec::optional("areaSqm", Number, "Living area in square meters"),
            FieldSpec::optional("rooms", Number, "Number of rooms (e.g. 2 for 2-room apartment)"),
            FieldSpec::optional("bedrooms", Number, "Number of bedrooms"),
            FieldSpec::optional("floor", NumberOrString, "Floor number or 'ground', 'last', etc."),
            FieldSpec::optional("totalFloors", Number, "Total floors in the building"),
            FieldSpec::optional("buildingType", String, "e.g. panel, brick, new construction"),
            FieldSpec::optional("yearBuilt", Number, "Year built or renovated"),
            FieldSpec::optional("condition", String, "Condition: renovated, needs renovation, new, etc."),
            FieldSpec::optional("amenities", StringList, "List of amenities: parking, elevator, balcony, etc."),
            FieldSpec::optional("description", String, "Full or summarized listing description"),
            FieldSpec::optional("contactName", String, "Name of seller or agent"),
            FieldSpec::optional("contactPhone", String, "Phone number for contact"),
            FieldSpec::optional("contactEmail", String, "Email for contact"),
            FieldSpec::optional("listingUrl", String, "Original listing URL"),
            FieldSpec::optional("rawNotes", String, "Any other relevant details not covered above"),
        ],
    }
}

/// The six-section expert analysis.
pub fn analysis_schema() -> SchemaSpec {
    use FieldType::String;

    SchemaSpec {
        name: "ApartmentAnalysis",
        description: "Complete expert analysis of an apartment from a buying/selling, design and space-usage perspective",
        fields: vec![
            FieldSpec::required(
                "marketAssessment",
                String,
                "Assessment of price vs market, value for the area, who this listing suits (investors, first-time buyers, families), and any market context. Be specific and reference the listing data.",
            ),
            FieldSpec::required(
                "designAndLayout",
                String,
                "Expert view on layout quality, room flow, natural light, ceiling height, finishes, and overall design, with strengths and weaknesses from an interior design and livability perspective.",
            ),
            FieldSpec::required(
                "spaceUsage",
                String,
                "How to use the space effectively: room roles, storage potential, flexibility for different lifestyles (e.g. WFH, kids), floor plan efficiency, and suggestions to maximize the space.",
            ),
            FieldSpec::required(
                "prosAndCons",
                String,
                "Main advantages and disadvantages of this apartment (location, building, condition, price, layout, etc.).",
            ),
            FieldSpec::required(
                "risksAndConsiderations",
                String,
                "Risks and things to verify: building/legal issues, maintenance, noise, future costs (renovation, fees), neighborhood factors, or anything a buyer should check before deciding.",
            ),
            FieldSpec::required(
                "summaryAndRecommendation",
                String,
                "Overall verdict: who should consider this apartment, whether it is good value, best use case (primary residence, rental, flip), and a clear recommendation (strong buy, consider with caveats, avoid).",
            ),
        ],
    }
}
