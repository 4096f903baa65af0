//! Table extraction.

use schemars::JsonSchema;

use super::BoundingBox;
use crate::{
    layout::{DocumentText, Table, TableRow},
    prelude::*,
};

/// Table confidence when the service gives us nothing better.
pub const DEFAULT_TABLE_CONFIDENCE: f64 = 0.9;

/// A normalized table.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableContent {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,

    /// 1-based page number.
    pub page: u32,

    pub confidence: f64,

    /// Do the header and every row have the same number of cells?
    pub is_structured: bool,

    /// Per-cell confidences for `rows`, in row-major order. Only present when
    /// the service reported confidences for the cells.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_confidences: Option<Vec<Vec<f64>>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

impl TableContent {
    /// Create a new table, computing `is_structured` from the data so it can
    /// never disagree with it.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>, page: u32) -> Self {
        let is_structured = is_structured(&headers, &rows);
        Self {
            headers,
            rows,
            page,
            confidence: DEFAULT_TABLE_CONFIDENCE,
            is_structured,
            cell_confidences: None,
            bounding_box: None,
        }
    }

    /// The marker we use when rendering this table into text.
    fn marker(&self) -> &'static str {
        if self.is_structured {
            "STRUCTURED_TABLE"
        } else {
            "TABLE"
        }
    }

    /// Render this table as text, for inclusion in the full document text.
    pub fn render_text(&self) -> String {
        let marker = self.marker();
        let mut out = format!("[{marker}]\n");
        if !self.headers.is_empty() {
            out.push_str(&self.headers.join(" | "));
            out.push('\n');
        }
        for row in &self.rows {
            out.push_str(&row.join(" | "));
            out.push('\n');
        }
        out.push_str(&format!("[/{marker}]\n"));
        out
    }

    /// Every piece of text in this table, headers first.
    pub fn all_text(&self) -> impl Iterator<Item = &str> {
        self.headers
            .iter()
            .chain(self.rows.iter().flatten())
            .map(String::as_str)
    }
}

/// A table is structured if it has headers and rows, and every row is the
/// same width as the header.
pub fn is_structured(headers: &[String], rows: &[Vec<String>]) -> bool {
    !headers.is_empty() && !rows.is_empty() && rows.iter().all(|r| r.len() == headers.len())
}

/// Resolve the cells of a row, trimming whitespace. Also returns the native
/// cell confidences.
fn resolve_row(text: &DocumentText<'_>, row: &TableRow) -> (Vec<String>, Vec<Option<f64>>) {
    row.cells
        .iter()
        .map(|cell| {
            let value = text.resolve(cell.layout.as_ref()).trim().to_owned();
            let confidence = cell.layout.as_ref().and_then(|l| l.confidence);
            (value, confidence)
        })
        .unzip()
}

/// Convert a layout table into a [`TableContent`].
pub fn extract_table(text: &DocumentText<'_>, table: &Table, page: u32) -> TableContent {
    let headers = table
        .header_rows
        .iter()
        .flat_map(|row| resolve_row(text, row).0)
        .collect::<Vec<_>>();

    let mut rows = Vec::with_capacity(table.body_rows.len());
    let mut row_confidences = Vec::with_capacity(table.body_rows.len());
    for row in &table.body_rows {
        let (cells, confidences) = resolve_row(text, row);
        if cells.iter().all(|c| c.is_empty()) {
            continue;
        }
        rows.push(cells);
        row_confidences.push(confidences);
    }

    // Only report cell confidences if the service gave us some.
    let any_cell_confidence = row_confidences.iter().flatten().any(Option::is_some);
    let cell_confidences = any_cell_confidence.then(|| {
        row_confidences
            .iter()
            .map(|row| row.iter().map(|c| c.unwrap_or(0.0)).collect::<Vec<_>>())
            .collect::<Vec<_>>()
    });
    let known = row_confidences
        .iter()
        .flatten()
        .flatten()
        .copied()
        .collect::<Vec<_>>();

    let layout = table.layout.as_ref();
    let confidence = layout
        .and_then(|l| l.confidence)
        .or_else(|| {
            (!known.is_empty()).then(|| known.iter().sum::<f64>() / known.len() as f64)
        })
        .unwrap_or(DEFAULT_TABLE_CONFIDENCE);

    let mut content = TableContent::new(headers, rows, page);
    content.confidence = confidence;
    content.cell_confidences = cell_confidences;
    content.bounding_box = layout
        .and_then(|l| l.bounding_poly.as_ref())
        .and_then(BoundingBox::from_poly);
    content
}
