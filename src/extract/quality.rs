//! OCR quality assessment.
//!
//! We combine two signals: the confidences the service reports for each
//! paragraph, and how many of the extracted "words" look like words at all.
//! Garbled OCR tends to produce runs of punctuation and digits.

use schemars::JsonSchema;

use super::round2;
use crate::prelude::*;

/// Pages with an average confidence below this are flagged.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Overall quality bucket.
#[derive(
    Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OverallQuality {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl OverallQuality {
    /// Classify a document. Both the confidence (0–1) and the readability
    /// (0–100) must clear a bucket's thresholds.
    pub fn classify(confidence: f64, readability: f64) -> Self {
        const BUCKETS: &[(f64, f64, OverallQuality)] = &[
            (0.95, 95.0, OverallQuality::Excellent),
            (0.85, 85.0, OverallQuality::Good),
            (0.70, 70.0, OverallQuality::Fair),
        ];
        BUCKETS
            .iter()
            .find(|(min_conf, min_read, _)| confidence >= *min_conf && readability >= *min_read)
            .map(|(_, _, quality)| *quality)
            .unwrap_or(OverallQuality::Poor)
    }
}

/// OCR quality for a whole document.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrQualityInfo {
    pub overall_quality: OverallQuality,
    pub average_confidence: f64,
    /// 1-based page numbers.
    pub low_confidence_pages: Vec<u32>,
    /// Percentage of words containing at least one letter.
    pub readability_score: f64,
}

/// Per-page data we hold on to until we know the document average.
#[derive(Debug)]
struct PageSample {
    page: u32,
    confidences: Vec<f64>,
}

/// Accumulates quality signals while we walk a document.
#[derive(Debug, Default)]
pub struct QualityAssessor {
    pages: Vec<PageSample>,
    total_words: usize,
    readable_words: usize,
}

impl QualityAssessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a page's paragraph confidences.
    pub fn add_page(&mut self, page: u32, paragraph_confidences: Vec<f64>) {
        self.pages.push(PageSample {
            page,
            confidences: paragraph_confidences,
        });
    }

    /// Count the words in some extracted text.
    pub fn add_text(&mut self, text: &str) {
        for word in text.split_whitespace() {
            self.total_words += 1;
            if word.chars().any(char::is_alphabetic) {
                self.readable_words += 1;
            }
        }
    }

    /// Forget all words counted so far, keeping page confidences.
    pub fn clear_words(&mut self) {
        self.total_words = 0;
        self.readable_words = 0;
    }

    /// The readability percentage so far. A document with no words at all
    /// has nothing readable in it.
    pub fn readability(&self) -> f64 {
        if self.total_words == 0 {
            0.0
        } else {
            self.readable_words as f64 / self.total_words as f64 * 100.0
        }
    }

    /// Produce the final assessment, given the document's average confidence.
    pub fn finish(self, document_confidence: f64) -> OcrQualityInfo {
        let readability = self.readability();
        let average_confidence = round2(document_confidence);
        let low_confidence_pages = self
            .pages
            .iter()
            .filter(|sample| {
                let page_average = if sample.confidences.is_empty() {
                    document_confidence
                } else {
                    sample.confidences.iter().sum::<f64>() / sample.confidences.len() as f64
                };
                page_average < LOW_CONFIDENCE_THRESHOLD
            })
            .map(|sample| sample.page)
            .collect();
        OcrQualityInfo {
            overall_quality: OverallQuality::classify(average_confidence, readability),
            average_confidence,
            low_confidence_pages,
            readability_score: round2(readability),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_boundaries() {
        use OverallQuality::*;
        assert_eq!(OverallQuality::classify(0.95, 95.0), Excellent);
        assert_eq!(OverallQuality::classify(0.94, 95.0), Good);
        assert_eq!(OverallQuality::classify(0.85, 85.0), Good);
        assert_eq!(OverallQuality::classify(0.99, 84.0), Fair);
        assert_eq!(OverallQuality::classify(0.70, 70.0), Fair);
        assert_eq!(OverallQuality::classify(0.69, 100.0), Poor);
        assert_eq!(OverallQuality::classify(1.0, 69.9), Poor);
    }

    #[test]
    fn test_readability() {
        let mut assessor = QualityAssessor::new();
        assert_eq!(assessor.readability(), 0.0);
        assessor.add_text("hello 123 w0rld ### ok");
        assert_eq!(assessor.readability(), 60.0);
    }

    #[test]
    fn test_low_confidence_pages() {
        let mut assessor = QualityAssessor::new();
        assessor.add_page(1, vec![0.9, 0.8]);
        assessor.add_page(2, vec![0.5, 0.6]);
        assessor.add_page(3, vec![]);
        assessor.add_text("all readable words here");
        let info = assessor.finish(0.65);
        assert_eq!(info.low_confidence_pages, vec![2, 3]);
        assert_eq!(info.readability_score, 100.0);
        assert_eq!(info.average_confidence, 0.65);
        assert_eq!(info.overall_quality, OverallQuality::Poor);
    }

    #[test]
    fn test_bucket_uses_unrounded_readability() {
        // 19000 of 20001 words readable is 94.995%, which rounds to 95.
        let mut assessor = QualityAssessor::new();
        assessor.add_page(1, vec![0.95]);
        assessor.add_text(&"word ".repeat(19_000));
        assessor.add_text(&"1234 ".repeat(1_001));
        let info = assessor.finish(0.95);
        assert_eq!(info.readability_score, 95.0);
        assert_eq!(info.overall_quality, OverallQuality::Good);
    }
}
