//! Form extraction: key/value fields, form tables and checkboxes.

use schemars::JsonSchema;

use super::tables::{TableContent, extract_table};
use crate::{
    layout::{DocumentText, FormField, Layout, Page},
    prelude::*,
};

/// Checkbox and radio glyphs, and whether each one is checked.
const CHECKBOX_GLYPHS: &[(&str, bool)] =
    &[("☐", false), ("☑", true), ("○", false), ("●", true)];

/// What kind of table is this?
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    Form,
    Data,
    Invoice,
    Unknown,
}

impl TableType {
    /// Classify a table by scanning its text for keywords.
    pub fn classify(table: &TableContent) -> Self {
        let text = table
            .all_text()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        let contains_any = |words: &[&str]| words.iter().any(|w| text.contains(w));
        if contains_any(&["invoice", "bill", "amount"]) {
            TableType::Invoice
        } else if contains_any(&["name", "address", "signature"]) {
            TableType::Form
        } else if table.rows.len() > 5 {
            TableType::Data
        } else {
            TableType::Unknown
        }
    }
}

/// A table found on a form.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormTable {
    #[serde(flatten)]
    pub table: TableContent,

    pub table_type: TableType,
}

impl FormTable {
    pub fn new(table: TableContent) -> Self {
        let table_type = TableType::classify(&table);
        Self { table, table_type }
    }
}

/// A key/value field.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormFieldInfo {
    pub name: String,
    pub value: String,

    /// The lower of the name and value confidences, if either is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
}

/// A checkbox or radio button.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckboxInfo {
    /// Generated name, `checkbox_<page>_<index>`.
    pub name: String,
    pub is_checked: bool,
    pub page: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Everything form-like found on a single page.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormData {
    pub page: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FormFieldInfo>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<FormTable>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checkboxes: Vec<CheckboxInfo>,
}

impl FormData {
    fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.tables.is_empty() && self.checkboxes.is_empty()
    }
}

/// Extract form data from a page. Returns `None` if the page has no fields,
/// tables or checkboxes.
pub fn extract_form_data(
    text: &DocumentText<'_>,
    page: &Page,
    page_number: u32,
) -> Option<FormData> {
    let fields = page
        .form_fields
        .iter()
        .filter_map(|field| extract_field(text, field))
        .collect();

    let tables = page
        .tables
        .iter()
        .map(|table| FormTable::new(extract_table(text, table, page_number)))
        .collect();

    let mut checked = Vec::new();
    for symbol in &page.symbols {
        let glyph = text.resolve(symbol.layout.as_ref());
        let glyph = glyph.trim();
        if let Some(&(_, is_checked)) = CHECKBOX_GLYPHS.iter().find(|(g, _)| *g == glyph) {
            checked.push((is_checked, confidence_of(symbol.layout.as_ref())));
        }
    }
    for element in &page.visual_elements {
        let is_checked = match element.element_type.as_deref() {
            Some("filled_checkbox") => true,
            Some("unfilled_checkbox") => false,
            _ => continue,
        };
        checked.push((is_checked, confidence_of(element.layout.as_ref())));
    }
    let checkboxes = checked
        .into_iter()
        .enumerate()
        .map(|(index, (is_checked, confidence))| CheckboxInfo {
            name: format!("checkbox_{page_number}_{index}"),
            is_checked,
            page: page_number,
            confidence,
        })
        .collect();

    let data = FormData {
        page: page_number,
        fields,
        tables,
        checkboxes,
    };
    (!data.is_empty()).then_some(data)
}

fn confidence_of(layout: Option<&Layout>) -> Option<f64> {
    layout.and_then(|l| l.confidence)
}

/// Pair up a field's name and value. Fields with neither are skipped.
fn extract_field(text: &DocumentText<'_>, field: &FormField) -> Option<FormFieldInfo> {
    let name = text.resolve(field.field_name.as_ref()).trim().to_owned();
    let value = text.resolve(field.field_value.as_ref()).trim().to_owned();
    if name.is_empty() && value.is_empty() {
        return None;
    }
    let confidence = match (
        confidence_of(field.field_name.as_ref()),
        confidence_of(field.field_value.as_ref()),
    ) {
        (Some(n), Some(v)) => Some(n.min(v)),
        (n, v) => n.or(v),
    };
    Some(FormFieldInfo {
        name,
        value,
        confidence,
        value_type: field.value_type.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_classify_tables() {
        let invoice = TableContent::new(
            strings(&["Invoice Number", "Total"]),
            vec![strings(&["1", "2"])],
            1,
        );
        assert_eq!(TableType::classify(&invoice), TableType::Invoice);

        let form = TableContent::new(strings(&["Full NAME"]), vec![strings(&["Ada"])], 1);
        assert_eq!(TableType::classify(&form), TableType::Form);

        let rows = (0..6).map(|i| vec![i.to_string()]).collect::<Vec<_>>();
        let data = TableContent::new(strings(&["n"]), rows, 1);
        assert_eq!(TableType::classify(&data), TableType::Data);

        let small = TableContent::new(strings(&["x"]), vec![strings(&["1"])], 1);
        assert_eq!(TableType::classify(&small), TableType::Unknown);
    }

    #[test]
    fn test_extract_fields_and_checkboxes() {
        let raw = "Name: Ada ☑ ○ x";
        let text = DocumentText::new(raw);
        let anchor = |start: u64, end: u64, confidence: f64| {
            json!({
                "textAnchor": { "textSegments": [{ "startIndex": start, "endIndex": end }] },
                "confidence": confidence,
            })
        };
        let page: Page = serde_json::from_value(json!({
            "formFields": [
                { "fieldName": anchor(0, 5, 0.9), "fieldValue": anchor(6, 9, 0.7) },
                { "fieldName": anchor(3, 3, 0.9), "fieldValue": anchor(9, 10, 0.9) },
            ],
            "symbols": [
                { "layout": anchor(10, 11, 0.99) },
                { "layout": anchor(12, 13, 0.98) },
                { "layout": anchor(14, 15, 0.97) },
            ],
            "visualElements": [{ "type": "unfilled_checkbox" }, { "type": "image" }],
        }))
        .unwrap();

        let data = extract_form_data(&text, &page, 2).unwrap();
        assert_eq!(data.fields.len(), 1);
        assert_eq!(data.fields[0].name, "Name:");
        assert_eq!(data.fields[0].value, "Ada");
        assert_eq!(data.fields[0].confidence, Some(0.7));
        assert!(data.tables.is_empty());

        let boxes = data
            .checkboxes
            .iter()
            .map(|c| (c.name.as_str(), c.is_checked))
            .collect::<Vec<_>>();
        assert_eq!(
            boxes,
            vec![
                ("checkbox_2_0", true),
                ("checkbox_2_1", false),
                ("checkbox_2_2", false),
            ]
        );
    }

    #[test]
    fn test_empty_page_has_no_form_data() {
        let text = DocumentText::new("just prose");
        assert!(extract_form_data(&text, &Page::default(), 1).is_none());
    }
}
