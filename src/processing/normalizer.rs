//! Text normalization for OCR output.
//!
//! Normalization is idempotent: `normalize(normalize(x)) == normalize(x)`.
//! The raw OCR text is always preserved elsewhere; this produces the
//! canonical form used for entity extraction and indexing.

use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

fn hyphen_break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Hyphen or soft hyphen at a line break splits one word across lines.
    RE.get_or_init(|| Regex::new(r"[-\u{00AD}]\s*\n\s*").expect("static regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Normalize raw OCR text.
///
/// - joins words hyphenated across line breaks
/// - Unicode NFKC (which also expands the common ligatures)
/// - strips control characters and stray soft hyphens
/// - collapses whitespace runs to single spaces
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let joined = hyphen_break_re().replace_all(text, "");

    let composed: String = joined
        .nfkc()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .filter(|c| *c != '\u{00AD}')
        .collect();

    whitespace_re()
        .replace_all(&composed, " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_collapsed() {
        assert_eq!(normalize("a   b\t\tc\n\nd"), "a b c d");
    }

    #[test]
    fn test_hyphen_linebreak_joined() {
        assert_eq!(normalize("flow-\nchart"), "flowchart");
        assert_eq!(normalize("flow-\n  chart"), "flowchart");
        assert_eq!(normalize("flow\u{00AD}\nchart"), "flowchart");
    }

    #[test]
    fn test_inline_hyphen_preserved() {
        assert_eq!(normalize("well-known fact"), "well-known fact");
    }

    #[test]
    fn test_ligatures_expanded() {
        assert_eq!(normalize("ﬂight conﬁrmed"), "flight confirmed");
        assert_eq!(normalize("oﬃce staﬀ"), "office staff");
    }

    #[test]
    fn test_control_characters_stripped() {
        assert_eq!(normalize("a\u{0000}b\u{0007}c"), "abc");
    }

    #[test]
    fn test_stray_soft_hyphen_removed() {
        assert_eq!(normalize("co\u{00AD}operate"), "cooperate");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \n  "), "");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "flow-\nchart with  spaces",
            "ﬁrst ﬂoor\u{00AD}\nplan",
            "already normal text",
            "a\u{0001}b  c-\nd",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {s:?}");
        }
    }
}
