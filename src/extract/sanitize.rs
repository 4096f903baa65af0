//! Content sanitization for extracted text.
//!
//! Extracted text ends up in HTML views and downstream prompts, so we strip
//! anything that looks like active content and normalize whitespace. The
//! passes are re-applied until nothing changes, which makes
//! `sanitize_text(sanitize_text(x)) == sanitize_text(x)` hold even for inputs
//! like `<scr<script></script>ipt>`.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// `<script>...</script>` blocks, across lines.
static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("failed to compile regex")
});

/// Inline event handlers such as `onclick="..."`.
static EVENT_HANDLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bon[a-z]+\s*=\s*(?:"[^"]*"|'[^']*')"#)
        .expect("failed to compile regex")
});

static JAVASCRIPT_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript\s*:").expect("failed to compile regex"));

/// `data:` URIs, capturing the media type so we can allow safe images.
static DATA_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)data:([a-z0-9.+\-]*/?[a-z0-9.+\-]*)").expect("failed to compile regex")
});

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{3,}").expect("failed to compile regex"));

static CONTROL_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").expect("failed to compile regex")
});

static LINE_ENDINGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r\n?").expect("failed to compile regex"));

/// Image types which may stay inline as `data:` URIs.
const SAFE_DATA_IMAGE_TYPES: &[&str] =
    &["image/png", "image/jpeg", "image/gif", "image/svg+xml"];

/// Sanitize extracted text.
pub fn sanitize_text(input: &str) -> String {
    let mut current = sanitize_once(input);
    loop {
        let next = sanitize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Sanitize raw bytes, replacing invalid UTF-8 sequences first.
pub fn sanitize_bytes(input: &[u8]) -> String {
    sanitize_text(&String::from_utf8_lossy(input))
}

/// One pass over all our rules, in order.
fn sanitize_once(input: &str) -> String {
    let text = SCRIPT_BLOCK.replace_all(input, "");
    let text = EVENT_HANDLER.replace_all(&text, "");
    let text = JAVASCRIPT_URI.replace_all(&text, "");
    let text = DATA_URI.replace_all(&text, |caps: &Captures<'_>| {
        let media_type = caps[1].to_ascii_lowercase();
        if SAFE_DATA_IMAGE_TYPES.contains(&media_type.as_str()) {
            caps[0].to_owned()
        } else {
            caps[1].to_owned()
        }
    });
    let text = WHITESPACE_RUN.replace_all(&text, "  ");
    let text = CONTROL_CHARS.replace_all(&text, "");
    let text = LINE_ENDINGS.replace_all(&text, "\n");
    text.trim().to_owned()
}
