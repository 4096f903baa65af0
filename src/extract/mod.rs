//! Turning layout documents into [`ProcessedDocument`]s.

use schemars::JsonSchema;

use crate::{
    layout::{BoundingPoly, Vertex},
    prelude::*,
};

pub mod forms;
pub mod language;
pub mod math;
pub mod pipeline;
pub mod quality;
pub mod sanitize;
pub mod tables;

pub use self::{
    forms::FormData,
    language::LanguageInfo,
    math::MathematicalContent,
    pipeline::extract_document,
    quality::{OcrQualityInfo, OverallQuality},
    tables::TableContent,
};

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// An axis-aligned box around a region. Units are whatever the service used:
/// pixels when it reported pixel vertices, fractions of the page otherwise.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Compute the box around a polygon, preferring pixel vertices. Returns
    /// `None` for an empty polygon.
    pub fn from_poly(poly: &BoundingPoly) -> Option<Self> {
        let vertices = if poly.vertices.is_empty() {
            &poly.normalized_vertices
        } else {
            &poly.vertices
        };
        Self::from_vertices(vertices)
    }

    fn from_vertices(vertices: &[Vertex]) -> Option<Self> {
        let first = vertices.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for v in &vertices[1..] {
            min_x = min_x.min(v.x);
            min_y = min_y.min(v.y);
            max_x = max_x.max(v.x);
            max_y = max_y.max(v.y);
        }
        Some(Self {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }
}

/// The normalized, application-ready form of a document.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedDocument {
    /// Sanitized full text.
    pub text: String,
    pub page_count: usize,
    /// Average confidence, 0–1, rounded to 2 decimals.
    pub confidence: f64,
    pub processing_time_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<LanguageInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_quality: Option<OcrQualityInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<EntityInfo>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<DocumentStructure>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mathematics: Option<Vec<MathematicalContent>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageContent>>,

    pub formatting: FormattingInfo,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forms: Option<Vec<FormData>>,
}

/// Wrap a collection in `Some` only if it has something in it.
pub(crate) fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

/// An entity reported by the service.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityInfo {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub mention_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Document structure. Each list is omitted when empty.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStructure {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableContent>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paragraphs: Vec<ParagraphInfo>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderInfo>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lists: Vec<ListInfo>,
}

impl DocumentStructure {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
            && self.paragraphs.is_empty()
            && self.headers.is_empty()
            && self.lists.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParagraphStyle {
    Heading,
    ListItem,
    Body,
}

#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    Left,
    Center,
    Right,
    Justified,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphInfo {
    pub text: String,
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub style: ParagraphStyle,
    pub alignment: Alignment,
}

/// A heading. Level 1 for all-caps headings, 2 otherwise.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderInfo {
    pub text: String,
    pub page: u32,
    pub level: u8,
}

/// A run of consecutive list-item paragraphs.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListInfo {
    pub page: u32,
    pub ordered: bool,
    /// Item text, without the bullet or number.
    pub items: Vec<String>,
}

/// A figure or other visual element.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContent {
    pub page: u32,
    pub description: String,
    pub image_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

/// Typography hints. Layout output carries no real font data, so `fonts`
/// and `styles` hold defaults plus whatever the paragraph styles tell us.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattingInfo {
    pub fonts: Vec<String>,
    pub styles: Vec<String>,
    pub layout: PageLayoutInfo,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLayoutInfo {
    /// `portrait` or `landscape`, from the first page.
    pub orientation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub page_dimensions: Vec<PageDimensions>,
}

#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDimensions {
    pub page: u32,
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}
