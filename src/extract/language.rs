//! Aggregating per-page and per-paragraph language signals.

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;

use crate::{layout::DetectedLanguage, prelude::*};

/// Language reported when nothing was detected.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Confidence a secondary language needs before we call a document
/// multilingual.
const MULTILINGUAL_THRESHOLD: f64 = 0.5;

/// One detected language.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageScore {
    pub language_code: String,
    pub confidence: f64,
    /// Pages where this language was seen, ascending.
    pub page_numbers: Vec<u32>,
}

/// Language information for a whole document.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageInfo {
    pub primary_language: String,
    /// Sorted by descending confidence.
    pub detected_languages: Vec<LanguageScore>,
    pub is_multilingual: bool,
}

#[derive(Debug, Default)]
struct LanguageStats {
    max_confidence: f64,
    pages: BTreeSet<u32>,
}

/// Accumulates language signals while we walk a document.
#[derive(Debug, Default)]
pub struct LanguageDetector {
    languages: BTreeMap<String, LanguageStats>,
}

impl LanguageDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one signal. A lower confidence never replaces a higher one.
    pub fn observe(&mut self, signal: &DetectedLanguage, page: u32) {
        let code = signal.language_code.trim();
        if code.is_empty() {
            return;
        }
        let confidence = signal.confidence.unwrap_or(0.0);
        let stats = self.languages.entry(code.to_owned()).or_default();
        stats.max_confidence = stats.max_confidence.max(confidence);
        stats.pages.insert(page);
    }

    /// Record all the signals for a page or paragraph.
    pub fn observe_all(&mut self, signals: &[DetectedLanguage], page: u32) {
        for signal in signals {
            self.observe(signal, page);
        }
    }

    /// Rank the languages we've seen.
    pub fn finish(self) -> LanguageInfo {
        let mut detected_languages = self
            .languages
            .into_iter()
            .map(|(language_code, stats)| LanguageScore {
                language_code,
                confidence: stats.max_confidence,
                page_numbers: stats.pages.into_iter().collect(),
            })
            .collect::<Vec<_>>();
        // Stable sort, and the map was ordered by code, so ties stay
        // alphabetical.
        detected_languages.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let primary_language = detected_languages
            .first()
            .map(|l| l.language_code.clone())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_owned());
        let is_multilingual = detected_languages
            .get(1)
            .is_some_and(|l| l.confidence > MULTILINGUAL_THRESHOLD);
        LanguageInfo {
            primary_language,
            detected_languages,
            is_multilingual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lang(code: &str, confidence: f64) -> DetectedLanguage {
        DetectedLanguage {
            language_code: code.to_owned(),
            confidence: Some(confidence),
        }
    }

    #[test]
    fn test_empty_defaults_to_english() {
        let info = LanguageDetector::new().finish();
        assert_eq!(info.primary_language, "en");
        assert!(info.detected_languages.is_empty());
        assert!(!info.is_multilingual);
    }

    #[test]
    fn test_ranking_and_pages() {
        let mut detector = LanguageDetector::new();
        detector.observe_all(&[lang("de", 0.6), lang("en", 0.9)], 2);
        detector.observe(&lang("en", 0.4), 1);
        detector.observe(&lang("fr", 0.3), 3);
        let info = detector.finish();

        assert_eq!(info.primary_language, "en");
        let codes = info
            .detected_languages
            .iter()
            .map(|l| l.language_code.as_str())
            .collect::<Vec<_>>();
        assert_eq!(codes, vec!["en", "de", "fr"]);
        assert_eq!(info.detected_languages[0].confidence, 0.9);
        assert_eq!(info.detected_languages[0].page_numbers, vec![1, 2]);
        assert!(info.is_multilingual);
        assert!(
            info.detected_languages
                .windows(2)
                .all(|w| w[0].confidence >= w[1].confidence)
        );
    }

    #[test]
    fn test_weak_second_language_is_not_multilingual() {
        let mut detector = LanguageDetector::new();
        detector.observe(&lang("en", 0.99), 1);
        detector.observe(&lang("es", 0.5), 1);
        let info = detector.finish();
        assert!(!info.is_multilingual);
    }
}
