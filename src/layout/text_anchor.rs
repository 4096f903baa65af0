//! Resolving layout regions against the document text buffer.

use std::borrow::Cow;

use super::{Layout, TextAnchor, TextSegment};

/// The flat text buffer of a document, indexed by code point.
///
/// Offsets from the service count Unicode code points, but Rust strings are
/// indexed by byte. For non-ASCII text we build a table of byte offsets once,
/// so that each lookup is O(1).
#[derive(Debug)]
pub struct DocumentText<'a> {
    text: &'a str,

    /// Byte offset of each code point, plus a final entry for `text.len()`.
    /// Empty when `text` is pure ASCII.
    char_offsets: Vec<usize>,
}

impl<'a> DocumentText<'a> {
    /// Wrap a document's text.
    pub fn new(text: &'a str) -> Self {
        let char_offsets = if text.is_ascii() {
            Vec::new()
        } else {
            text.char_indices()
                .map(|(offset, _)| offset)
                .chain(std::iter::once(text.len()))
                .collect()
        };
        Self { text, char_offsets }
    }

    /// The raw text.
    pub fn as_str(&self) -> &'a str {
        self.text
    }

    /// Length in code points.
    pub fn char_len(&self) -> usize {
        if self.char_offsets.is_empty() {
            self.text.len()
        } else {
            self.char_offsets.len() - 1
        }
    }

    /// Convert a code point index into a byte offset, clamping to the end.
    fn byte_offset(&self, index: u64) -> usize {
        let index = usize::try_from(index)
            .unwrap_or(usize::MAX)
            .min(self.char_len());
        if self.char_offsets.is_empty() {
            index
        } else {
            self.char_offsets[index]
        }
    }

    /// Return the text covered by a single segment.
    ///
    /// An omitted start index means 0, because zero values are left out on the
    /// wire. An omitted end index means we don't know where the segment ends,
    /// so we return nothing.
    pub fn segment(&self, segment: &TextSegment) -> &'a str {
        let Some(end) = segment.end_index else {
            return "";
        };
        let start = self.byte_offset(segment.start_index.unwrap_or(0));
        let end = self.byte_offset(end);
        if start >= end {
            return "";
        }
        &self.text[start..end]
    }

    /// Concatenate all the segments of a text anchor.
    pub fn resolve_anchor(&self, anchor: Option<&TextAnchor>) -> Cow<'a, str> {
        let Some(anchor) = anchor else {
            return Cow::Borrowed("");
        };
        match anchor.text_segments.as_slice() {
            [] => anchor
                .content
                .as_ref()
                .map(|content| Cow::Owned(content.clone()))
                .unwrap_or(Cow::Borrowed("")),
            [segment] => Cow::Borrowed(self.segment(segment)),
            segments => {
                Cow::Owned(segments.iter().map(|s| self.segment(s)).collect::<String>())
            }
        }
    }

    /// Resolve an optional layout region to its text.
    pub fn resolve(&self, layout: Option<&Layout>) -> Cow<'a, str> {
        self.resolve_anchor(layout.and_then(|layout| layout.text_anchor.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;

    fn layout(value: Value) -> Layout {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_concatenates_segments_in_order() {
        let text = DocumentText::new("Hello, brave new world");
        let region = layout(json!({
            "textAnchor": { "textSegments": [
                { "startIndex": 0, "endIndex": 6 },
                { "startIndex": "16", "endIndex": "22" },
            ]},
        }));
        assert_eq!(text.resolve(Some(&region)), "Hello, world");
    }

    #[test]
    fn test_missing_pieces_yield_empty() {
        let text = DocumentText::new("abc");
        assert_eq!(text.resolve(None), "");
        assert_eq!(text.resolve(Some(&Layout::default())), "");
        let no_end = layout(json!({
            "textAnchor": { "textSegments": [{ "startIndex": 1 }] },
        }));
        assert_eq!(text.resolve(Some(&no_end)), "");
    }

    #[test]
    fn test_omitted_start_means_zero_and_end_is_clamped() {
        let text = DocumentText::new("abc");
        let region = layout(json!({
            "textAnchor": { "textSegments": [{ "endIndex": "99" }] },
        }));
        assert_eq!(text.resolve(Some(&region)), "abc");
    }

    #[test]
    fn test_reversed_segment_is_empty() {
        let text = DocumentText::new("abcdef");
        let region = layout(json!({
            "textAnchor": { "textSegments": [{ "startIndex": 4, "endIndex": 2 }] },
        }));
        assert_eq!(text.resolve(Some(&region)), "");
    }

    #[test]
    fn test_code_point_offsets() {
        let text = DocumentText::new("αβγ déf");
        assert_eq!(text.char_len(), 7);
        let region = layout(json!({
            "textAnchor": { "textSegments": [{ "startIndex": 1, "endIndex": 5 }] },
        }));
        assert_eq!(text.resolve(Some(&region)), "βγ d");
    }

    #[test]
    fn test_inline_content() {
        let text = DocumentText::new("ignored");
        let region = layout(json!({ "textAnchor": { "content": "inline" } }));
        assert_eq!(text.resolve(Some(&region)), "inline");
    }
}
