//! Layout documents returned by the external document-understanding service.
//!
//! The service speaks proto3-style JSON: every field is optional, zero values
//! are omitted, and 64-bit integers may arrive as strings. We model all of that
//! here, once, with `serde` defaults, so the extraction code can work with
//! plain Rust values instead of poking at untyped JSON.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserializer, de};

use crate::prelude::*;

pub mod text_anchor;

pub use self::text_anchor::DocumentText;

/// A complete document, as returned by a processor.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayoutDocument {
    /// The full text of the document. All layout regions point into this.
    pub text: String,

    /// The MIME type of the original document, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Pages, in document order.
    pub pages: Vec<Page>,

    /// Entities detected by specialized processors.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Entity>,
}

impl LayoutDocument {
    /// Parse a document from either a bare document or a `:process` response
    /// of the form `{ "document": { ... } }`.
    pub fn from_json_value(value: Value) -> Result<Self> {
        let value = match value {
            Value::Object(mut map) if map.contains_key("document") => map
                .remove("document")
                .ok_or_else(|| anyhow!("missing document"))?,
            other => other,
        };
        serde_json::from_value(value).context("failed to parse layout document")
    }

    /// Parse a document from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value = serde_json::from_str::<Value>(json)
            .context("layout document is not valid JSON")?;
        Self::from_json_value(value)
    }
}

/// A single page.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Page {
    /// 1-based page number, if reported. We fall back to the page's position.
    #[serde(
        deserialize_with = "deserialize_opt_index",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<u64>")]
    pub page_number: Option<u64>,

    /// The physical size of the page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<Dimension>,

    /// Layout of the page as a whole.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,

    pub paragraphs: Vec<Paragraph>,
    pub tables: Vec<Table>,
    pub form_fields: Vec<FormField>,
    pub visual_elements: Vec<VisualElement>,
    pub symbols: Vec<Symbol>,
    pub detected_languages: Vec<DetectedLanguage>,
}

/// Page dimensions.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Dimension {
    pub width: f64,
    pub height: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// A layout region: a reference into the document text, plus optional
/// confidence and geometry.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Layout {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_anchor: Option<TextAnchor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_poly: Option<BoundingPoly>,

    /// Orientation of the region, e.g. `PAGE_UP`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<String>,
}

/// One or more segments of the document text.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextAnchor {
    pub text_segments: Vec<TextSegment>,

    /// Inline text, used by some processors instead of segments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A `[start_index, end_index)` range of code points in the document text.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextSegment {
    #[serde(
        deserialize_with = "deserialize_opt_index",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<u64>")]
    pub start_index: Option<u64>,

    #[serde(
        deserialize_with = "deserialize_opt_index",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<u64>")]
    pub end_index: Option<u64>,
}

/// A polygon, in pixels and/or normalized page coordinates.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoundingPoly {
    pub vertices: Vec<Vertex>,
    pub normalized_vertices: Vec<Vertex>,
}

/// A polygon vertex. Zero coordinates are omitted on the wire.
#[derive(Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Paragraph {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    pub detected_languages: Vec<DetectedLanguage>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Table {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    pub header_rows: Vec<TableRow>,
    pub body_rows: Vec<TableRow>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableRow {
    pub cells: Vec<TableCell>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableCell {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
}

/// A key/value pair found by a form parser.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormField {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_name: Option<Layout>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_value: Option<Layout>,

    /// Value type, e.g. `filled_checkbox`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
}

/// A non-text element, such as a figure or checkbox.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisualElement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub element_type: Option<String>,
}

/// A single glyph.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Symbol {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
}

/// A language signal attached to a page or paragraph.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectedLanguage {
    pub language_code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// An entity extracted by a specialized processor.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mention_text: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Accept an index encoded as a JSON number or a JSON string. Anything we
/// can't make sense of becomes `None`, so malformed input degrades gracefully.
fn deserialize_opt_index<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct IndexVisitor;

    impl<'de> de::Visitor<'de> for IndexVisitor {
        type Value = Option<u64>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "an integer index, as a number or a string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(u64::try_from(v).ok())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            if v.is_finite() && v >= 0.0 {
                Ok(Some(v.trunc() as u64))
            } else {
                Ok(None)
            }
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v.trim().parse::<u64>().ok())
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_any(self)
        }
    }

    deserializer.deserialize_option(IndexVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_string_and_numeric_indices() {
        let segment: TextSegment =
            serde_json::from_value(json!({ "startIndex": "12", "endIndex": 20 }))
                .unwrap();
        assert_eq!(segment.start_index, Some(12));
        assert_eq!(segment.end_index, Some(20));

        let segment: TextSegment =
            serde_json::from_value(json!({ "startIndex": "bogus", "endIndex": null }))
                .unwrap();
        assert_eq!(segment.start_index, None);
        assert_eq!(segment.end_index, None);
    }

    #[test]
    fn test_missing_fields_default() {
        let doc = LayoutDocument::from_json_value(json!({ "text": "hi" })).unwrap();
        assert_eq!(doc.text, "hi");
        assert!(doc.pages.is_empty());

        let doc =
            LayoutDocument::from_json_value(json!({ "pages": [{}, { "tables": [{}] }] }))
                .unwrap();
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[1].tables.len(), 1);
        assert!(doc.pages[1].tables[0].header_rows.is_empty());
    }

    #[test]
    fn test_process_response_envelope() {
        let doc = LayoutDocument::from_json_str(
            r#"{ "document": { "text": "abc", "pages": [{ "pageNumber": 1 }] } }"#,
        )
        .unwrap();
        assert_eq!(doc.text, "abc");
        assert_eq!(doc.pages[0].page_number, Some(1));
    }

    #[test]
    fn test_visual_element_type_field() {
        let element: VisualElement = serde_json::from_value(json!({
            "type": "filled_checkbox",
        }))
        .unwrap();
        assert_eq!(element.element_type.as_deref(), Some("filled_checkbox"));
    }
}
