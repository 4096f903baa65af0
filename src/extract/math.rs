//! Pattern-based detection of mathematical notation.
//!
//! Layout-only output gives us no math geometry, so we fall back to scanning
//! the resolved text with an ordered table of rules. Earlier rules win: once a
//! span of text has been claimed by one rule, later rules can't match inside
//! it. This keeps `$$x^2$$` from also being reported as an exponent.

use std::{ops::Range, sync::LazyLock};

use regex::Regex;
use schemars::JsonSchema;

use super::BoundingBox;
use crate::prelude::*;

/// Confidence we assign to anything found by pattern matching.
pub const PATTERN_CONFIDENCE: f64 = 0.8;

/// What kind of mathematical content did we find?
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MathKind {
    /// A delimited LaTeX equation.
    Equation,
    /// Arithmetic, fractions, roots, exponents, integrals and sums.
    Formula,
    /// A single mathematical symbol.
    Symbol,
}

/// A piece of mathematical content found on a page.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MathematicalContent {
    /// The matched text, including any delimiters.
    pub content: String,

    #[serde(rename = "type")]
    pub kind: MathKind,

    /// 1-based page number.
    pub page: u32,

    /// Where the content is on the page. Pattern matching doesn't know, so
    /// this is `None` rather than a made-up box.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,

    pub confidence: f64,

    /// The LaTeX source, for delimited equations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latex: Option<String>,
}

/// A single detection rule.
struct MathRule {
    /// Human-readable name, used in logs.
    name: &'static str,
    regex: Regex,
    kind: MathKind,
    /// Capture group holding the LaTeX source, if any.
    latex_group: Option<usize>,
}

impl MathRule {
    fn new(
        name: &'static str,
        pattern: &str,
        kind: MathKind,
        latex_group: Option<usize>,
    ) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("failed to compile math regex"),
            kind,
            latex_group,
        }
    }
}

/// Our rules, in priority order.
static MATH_RULES: LazyLock<Vec<MathRule>> = LazyLock::new(|| {
    use MathKind::*;
    vec![
        MathRule::new("latex_block", r"\$\$([^$]+?)\$\$", Equation, Some(1)),
        MathRule::new("latex_inline", r"\$([^$\n]+?)\$", Equation, Some(1)),
        MathRule::new(
            "arithmetic",
            r"\d+(?:\.\d+)?\s*[-+*/×÷]\s*\d+(?:\.\d+)?\s*=\s*\d+(?:\.\d+)?",
            Formula,
            None,
        ),
        MathRule::new("fraction", r"\b\d+/\d+\b", Formula, None),
        MathRule::new(
            "square_root",
            r"√\s*(?:\([^)\n]*\)|[A-Za-z0-9.]+)|\\sqrt\{[^}\n]*\}|\bsqrt\([^)\n]*\)",
            Formula,
            None,
        ),
        MathRule::new(
            "exponent",
            r"[A-Za-z0-9)]\^(?:\{[^}\n]*\}|\(?[A-Za-z0-9]+\)?)|[A-Za-z0-9)][⁰¹²³⁴⁵⁶⁷⁸⁹]+",
            Formula,
            None,
        ),
        MathRule::new(
            "integral",
            r"[∫∬∭∮](?:[^\n]*?\bd[a-zA-Z]\b)?|\\int\b(?:_\{[^}\n]*\}|_\S)?(?:\^\{[^}\n]*\}|\^\S)?",
            Formula,
            None,
        ),
        MathRule::new(
            "summation",
            r"[∑Σ](?:_\{[^}\n]*\}|_\S)?(?:\^\{[^}\n]*\}|\^\S)?|\\sum\b(?:_\{[^}\n]*\}|_\S)?(?:\^\{[^}\n]*\}|\^\S)?",
            Formula,
            None,
        ),
        MathRule::new("greek_letter", r"[α-ωΑ-Ω]", Symbol, None),
    ]
});

/// Find all mathematical content in `text`, in text order.
pub fn extract_math(text: &str, page: u32) -> Vec<MathematicalContent> {
    let mut claimed: Vec<Range<usize>> = Vec::new();
    let mut found: Vec<(usize, MathematicalContent)> = Vec::new();
    for rule in MATH_RULES.iter() {
        for caps in rule.regex.captures_iter(text) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let span = whole.range();
            if claimed
                .iter()
                .any(|c| c.start < span.end && span.start < c.end)
            {
                continue;
            }
            trace!(rule = rule.name, content = whole.as_str(), "Math match");
            let latex = rule
                .latex_group
                .and_then(|group| caps.get(group))
                .map(|m| m.as_str().trim().to_owned());
            found.push((
                span.start,
                MathematicalContent {
                    content: whole.as_str().to_owned(),
                    kind: rule.kind,
                    page,
                    bounding_box: None,
                    confidence: PATTERN_CONFIDENCE,
                    latex,
                },
            ));
            claimed.push(span);
        }
    }
    found.sort_by_key(|(start, _)| *start);
    found.into_iter().map(|(_, content)| content).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(found: &[MathematicalContent]) -> Vec<(&str, MathKind)> {
        found.iter().map(|m| (m.content.as_str(), m.kind)).collect()
    }

    #[test]
    fn test_latex_block_is_a_single_equation() {
        let found = extract_math("$$x^2+y^2=z^2$$", 1);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, MathKind::Equation);
        assert_eq!(found[0].latex.as_deref(), Some("x^2+y^2=z^2"));
        assert_eq!(found[0].confidence, 0.8);
        assert_eq!(found[0].page, 1);
        assert!(found[0].bounding_box.is_none());
    }

    #[test]
    fn test_inline_latex() {
        let found = extract_math("Euler says $e^{i\\pi}+1=0$ holds.", 2);
        assert_eq!(kinds(&found), vec![("$e^{i\\pi}+1=0$", MathKind::Equation)]);
        assert_eq!(found[0].latex.as_deref(), Some("e^{i\\pi}+1=0"));
        assert_eq!(found[0].page, 2);
    }

    #[test]
    fn test_formulas_and_symbols() {
        let found = extract_math("We know 2 + 2 = 4, take 3/4 and √16, then α.", 1);
        assert_eq!(
            kinds(&found),
            vec![
                ("2 + 2 = 4", MathKind::Formula),
                ("3/4", MathKind::Formula),
                ("√16", MathKind::Formula),
                ("α", MathKind::Symbol),
            ]
        );
        assert!(found.iter().all(|m| m.latex.is_none()));
    }

    #[test]
    fn test_exponents_integrals_and_sums() {
        let found = extract_math("area x^2 and ∫ f(x) dx plus ∑_{i=1}^{n}", 3);
        assert_eq!(
            kinds(&found),
            vec![
                ("x^2", MathKind::Formula),
                ("∫ f(x) dx", MathKind::Formula),
                ("∑_{i=1}^{n}", MathKind::Formula),
            ]
        );
    }

    #[test]
    fn test_multiple_matches_retained() {
        let found = extract_math("$a$ and $b$ and β and γ", 1);
        assert_eq!(found.len(), 4);
        assert_eq!(found[0].latex.as_deref(), Some("a"));
        assert_eq!(found[1].latex.as_deref(), Some("b"));
        assert_eq!(found[2].kind, MathKind::Symbol);
    }

    #[test]
    fn test_plain_text_has_no_math() {
        assert!(extract_math("Nothing to see here.", 1).is_empty());
    }
}
