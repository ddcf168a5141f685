//! Search index construction.
//!
//! One row per OCR text: a lowercased punctuation-collapsed string plus
//! the ordered token sequence. Queries run through the same functions so
//! page text and query text always agree on tokenization.

use crate::models::{OcrText, SearchRecord};

/// Lowercase and collapse every non-alphanumeric run to a single space.
pub fn searchable_text(normalized: &str) -> String {
    let mut out = String::with_capacity(normalized.len());
    let mut last_was_space = true;
    for c in normalized.chars() {
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Tokenize on whitespace, keeping order and duplicates.
pub fn tokenize(searchable: &str) -> Vec<String> {
    searchable
        .split_whitespace()
        .map(|t| t.to_string())
        .collect()
}

/// Normalize a raw query the same way page text is indexed.
pub fn query_tokens(query: &str) -> Vec<String> {
    tokenize(&searchable_text(query))
}

/// Build the search row for one OCR text.
pub fn build_record(ocr: &OcrText) -> SearchRecord {
    let searchable = searchable_text(&ocr.normalized_text);
    let tokens = tokenize(&searchable);
    SearchRecord {
        id: uuid::Uuid::new_v4().to_string(),
        ocr_id: ocr.id.clone(),
        document_id: ocr.document_id.clone(),
        searchable_text: searchable,
        tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_searchable_text_collapses_punctuation() {
        assert_eq!(searchable_text("Hello, World!"), "hello world");
        assert_eq!(searchable_text("U.S. Navy"), "u s navy");
        assert_eq!(searchable_text("  lots   of---dashes  "), "lots of dashes");
    }

    #[test]
    fn test_tokens_keep_order_and_duplicates() {
        let tokens = tokenize(&searchable_text("the log, the log"));
        assert_eq!(tokens, vec!["the", "log", "the", "log"]);
    }

    #[test]
    fn test_query_tokens_match_page_tokenization() {
        assert_eq!(query_tokens("\"U.S.\""), query_tokens("U S"));
        assert_eq!(query_tokens("Flight-Log"), vec!["flight", "log"]);
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(searchable_text("...!!!"), "");
        assert!(query_tokens("").is_empty());
    }
}
