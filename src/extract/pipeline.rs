//! The extraction pipeline: one layout document in, one
//! [`ProcessedDocument`] out.
//!
//! We make a single pass over the pages, in order. For each page we resolve
//! paragraphs, then tables, then visual elements, appending each to the full
//! text as we go. Language, quality and sanitization happen once at the end.

use std::{sync::LazyLock, time::Instant};

use regex::Regex;

use super::{
    Alignment, BoundingBox, DocumentStructure, EntityInfo, FormattingInfo, HeaderInfo,
    ImageContent, ListInfo, PageDimensions, PageLayoutInfo, ParagraphInfo, ParagraphStyle,
    ProcessedDocument,
    forms::{FormData, extract_form_data},
    language::LanguageDetector,
    math::{MathematicalContent, extract_math},
    non_empty,
    quality::QualityAssessor,
    round2,
    sanitize::sanitize_text,
    tables::extract_table,
};
use crate::{
    layout::{DocumentText, Layout, LayoutDocument, Page},
    prelude::*,
};

/// Document confidence when no paragraph reported one.
pub const DEFAULT_DOCUMENT_CONFIDENCE: f64 = 0.95;

/// Layout output has no font information.
const DEFAULT_FONT: &str = "default";

/// Visual element types that are checkboxes, not images.
const CHECKBOX_ELEMENT_TYPES: &[&str] = &["filled_checkbox", "unfilled_checkbox"];

/// Bullets, or numbers/letters followed by `.` or `)`.
static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(?P<bullet>[-•*▪◦‣])|(?P<number>\d{1,3}[.)]|[A-Za-z][.)]))\s+")
        .expect("failed to compile regex")
});

/// Extract everything we can from a layout document.
#[instrument(level = "debug", skip_all, fields(pages = document.pages.len()))]
pub fn extract_document(document: &LayoutDocument) -> ProcessedDocument {
    let started = Instant::now();
    let mut extractor = Extractor::new(DocumentText::new(&document.text));
    for (index, page) in document.pages.iter().enumerate() {
        extractor.add_page(page, page_number(page, index));
    }
    let mut processed = extractor.finish(document);
    processed.processing_time_ms = elapsed_ms(started);
    processed
}

/// Milliseconds since `started`.
pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// The 1-based page number, trusting the service if it told us.
fn page_number(page: &Page, index: usize) -> u32 {
    page.page_number
        .and_then(|n| u32::try_from(n).ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(|| u32::try_from(index + 1).unwrap_or(u32::MAX))
}

/// Accumulated state for a single document.
struct Extractor<'a> {
    text: DocumentText<'a>,
    full_text: String,
    has_paragraph_text: bool,
    confidences: Vec<f64>,
    mathematics: Vec<MathematicalContent>,
    structure: DocumentStructure,
    images: Vec<ImageContent>,
    forms: Vec<FormData>,
    page_dimensions: Vec<PageDimensions>,
    orientation: Option<&'static str>,
    languages: LanguageDetector,
    quality: QualityAssessor,
}

impl<'a> Extractor<'a> {
    fn new(text: DocumentText<'a>) -> Self {
        Self {
            text,
            full_text: String::new(),
            has_paragraph_text: false,
            confidences: vec![],
            mathematics: vec![],
            structure: DocumentStructure::default(),
            images: vec![],
            forms: vec![],
            page_dimensions: vec![],
            orientation: None,
            languages: LanguageDetector::new(),
            quality: QualityAssessor::new(),
        }
    }

    fn add_page(&mut self, page: &Page, page_number: u32) {
        trace!(page = page_number, "Extracting page");
        self.languages.observe_all(&page.detected_languages, page_number);

        let page_confidences = self.add_paragraphs(page, page_number);
        self.quality.add_page(page_number, page_confidences.clone());
        self.confidences.extend(page_confidences);

        for table in &page.tables {
            let table = extract_table(&self.text, table, page_number);
            self.full_text.push_str(&table.render_text());
            for cell in table.all_text() {
                self.quality.add_text(cell);
            }
            self.structure.tables.push(table);
        }

        self.add_images(page, page_number);
        self.forms.extend(extract_form_data(&self.text, page, page_number));

        if let Some(dimension) = &page.dimension {
            self.page_dimensions.push(PageDimensions {
                page: page_number,
                width: dimension.width,
                height: dimension.height,
                unit: dimension.unit.clone(),
            });
        }
        if self.orientation.is_none() {
            self.orientation = Some(page_orientation(page));
        }
    }

    /// Resolve a page's paragraphs. Returns their confidences.
    fn add_paragraphs(&mut self, page: &Page, page_number: u32) -> Vec<f64> {
        let page_width = page.dimension.as_ref().map(|d| d.width);
        let mut confidences = vec![];
        let mut list: Option<ListInfo> = None;
        for paragraph in &page.paragraphs {
            let layout = paragraph.layout.as_ref();
            let resolved = self.text.resolve(layout);
            let content = resolved.trim();
            if content.is_empty() {
                continue;
            }
            self.has_paragraph_text = true;
            self.full_text.push_str(content);
            self.full_text.push('\n');
            self.quality.add_text(content);
            self.mathematics.extend(extract_math(content, page_number));
            self.languages.observe_all(&paragraph.detected_languages, page_number);

            let confidence = layout.and_then(|l| l.confidence);
            confidences.extend(confidence);

            let style = classify_style(content);
            match (style, strip_list_marker(content)) {
                (ParagraphStyle::ListItem, Some((ordered, item))) => {
                    // Switching between bullets and numbers starts a new list.
                    if list.as_ref().is_some_and(|l| l.ordered != ordered) {
                        self.structure.lists.extend(list.take());
                    }
                    list.get_or_insert_with(|| ListInfo {
                        page: page_number,
                        ordered,
                        items: vec![],
                    })
                    .items
                    .push(item.to_owned());
                }
                _ => self.structure.lists.extend(list.take()),
            }
            if style == ParagraphStyle::Heading {
                self.structure.headers.push(HeaderInfo {
                    text: content.to_owned(),
                    page: page_number,
                    level: if is_all_caps(content) { 1 } else { 2 },
                });
            }
            self.structure.paragraphs.push(ParagraphInfo {
                text: content.to_owned(),
                page: page_number,
                confidence,
                style,
                alignment: classify_alignment(layout, page_width, content.contains('\n')),
            });
        }
        self.structure.lists.extend(list);
        confidences
    }

    fn add_images(&mut self, page: &Page, page_number: u32) {
        for element in &page.visual_elements {
            let image_type = element.element_type.as_deref().unwrap_or("image");
            if CHECKBOX_ELEMENT_TYPES.contains(&image_type) {
                continue;
            }
            let layout = element.layout.as_ref();
            let resolved = self.text.resolve(layout);
            let description = match resolved.trim() {
                "" => format!("{image_type} on page {page_number}"),
                text => text.to_owned(),
            };
            self.full_text.push_str(&format!("[IMAGE: {description}]\n"));
            self.images.push(ImageContent {
                page: page_number,
                description,
                image_type: image_type.to_owned(),
                confidence: layout.and_then(|l| l.confidence),
                bounding_box: layout
                    .and_then(|l| l.bounding_poly.as_ref())
                    .and_then(BoundingBox::from_poly),
            });
        }
    }

    fn finish(self, document: &LayoutDocument) -> ProcessedDocument {
        let Self {
            full_text,
            has_paragraph_text,
            confidences,
            mut mathematics,
            structure,
            images,
            forms,
            page_dimensions,
            orientation,
            languages,
            mut quality,
            ..
        } = self;

        let text = if has_paragraph_text {
            full_text
        } else {
            debug!("No paragraph text found, using raw document text");
            mathematics = extract_math(&document.text, 1);
            // Table cells were counted already, but the raw text replaces them.
            quality.clear_words();
            quality.add_text(&document.text);
            document.text.clone()
        };

        let average_confidence = if confidences.is_empty() {
            DEFAULT_DOCUMENT_CONFIDENCE
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        let mut styles = vec!["normal".to_owned()];
        if !structure.headers.is_empty() {
            styles.push("heading".to_owned());
        }
        if !structure.lists.is_empty() {
            styles.push("list".to_owned());
        }
        let formatting = FormattingInfo {
            fonts: vec![DEFAULT_FONT.to_owned()],
            styles,
            layout: PageLayoutInfo {
                orientation: orientation.unwrap_or("portrait").to_owned(),
                page_dimensions,
            },
        };

        let entities = document
            .entities
            .iter()
            .map(|entity| EntityInfo {
                entity_type: entity.entity_type.clone(),
                mention_text: entity.mention_text.clone().unwrap_or_default(),
                confidence: entity.confidence,
            })
            .collect();

        ProcessedDocument {
            text: sanitize_text(&text),
            page_count: document.pages.len(),
            confidence: round2(average_confidence),
            processing_time_ms: 0,
            language: Some(languages.finish()),
            ocr_quality: Some(quality.finish(average_confidence)),
            entities: non_empty(entities),
            structure: (!structure.is_empty()).then_some(structure),
            mathematics: non_empty(mathematics),
            images: non_empty(images),
            formatting,
            forms: non_empty(forms),
        }
    }
}

fn classify_style(text: &str) -> ParagraphStyle {
    if LIST_MARKER.is_match(text) {
        ParagraphStyle::ListItem
    } else if looks_like_heading(text) {
        ParagraphStyle::Heading
    } else {
        ParagraphStyle::Body
    }
}

/// Short, single-line, unpunctuated, and either all caps or title case.
fn looks_like_heading(text: &str) -> bool {
    let words = text.split_whitespace().count();
    if words == 0 || words > 10 || text.contains('\n') || text.ends_with(['.', ',', ';']) {
        return false;
    }
    if !text.chars().any(char::is_alphabetic) {
        return false;
    }
    is_all_caps(text)
        || text.split_whitespace().all(|word| {
            word.chars()
                .next()
                .is_some_and(|c| !c.is_alphabetic() || c.is_uppercase())
        })
}

fn is_all_caps(text: &str) -> bool {
    let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
    letters.peek().is_some() && letters.all(char::is_uppercase)
}

/// Split a list item into `(ordered, item_text)`.
fn strip_list_marker(text: &str) -> Option<(bool, &str)> {
    let caps = LIST_MARKER.captures(text)?;
    let marker = caps.get(0)?;
    Some((caps.name("number").is_some(), text[marker.end()..].trim()))
}

/// Guess alignment from where the paragraph sits on the page. Without
/// geometry we assume left-aligned text.
fn classify_alignment(
    layout: Option<&Layout>,
    page_width: Option<f64>,
    multiline: bool,
) -> Alignment {
    let Some((left, right)) = horizontal_extent(layout, page_width) else {
        return Alignment::Left;
    };
    let right_margin = 1.0 - right;
    if left > 0.1 && (left - right_margin).abs() < 0.05 {
        Alignment::Center
    } else if left > 0.3 && right_margin < 0.1 {
        Alignment::Right
    } else if multiline && left < 0.15 && right_margin < 0.15 {
        Alignment::Justified
    } else {
        Alignment::Left
    }
}

/// The left and right edges of a region, as fractions of the page width.
fn horizontal_extent(layout: Option<&Layout>, page_width: Option<f64>) -> Option<(f64, f64)> {
    let poly = layout?.bounding_poly.as_ref()?;
    if !poly.normalized_vertices.is_empty() {
        let bbox = BoundingBox::from_vertices(&poly.normalized_vertices)?;
        return Some((bbox.x, bbox.x + bbox.width));
    }
    let width = page_width.filter(|&w| w > 0.0)?;
    let bbox = BoundingBox::from_vertices(&poly.vertices)?;
    Some((bbox.x / width, (bbox.x + bbox.width) / width))
}

/// `landscape` if the page is wider than it is tall, after accounting for
/// any rotation the service reported.
fn page_orientation(page: &Page) -> &'static str {
    let wide = page
        .dimension
        .as_ref()
        .is_some_and(|d| d.width > d.height);
    let rotated = matches!(
        page.layout.as_ref().and_then(|l| l.orientation.as_deref()),
        Some("PAGE_LEFT" | "PAGE_RIGHT")
    );
    if wide != rotated { "landscape" } else { "portrait" }
}
