//! Source crawlers: discovery of candidate files from remote endpoints.
//!
//! Crawlers are read-only and idempotent: repeated runs against an
//! unchanged source yield the same descriptor set. Exclusion policy is
//! data, a list of matchers applied to each candidate, so rules are
//! testable without touching the crawl loop.

mod doj;
mod endpoint;
mod http;

pub use doj::DojCrawler;
pub use endpoint::EndpointCrawler;
pub use http::{backoff_delay, HttpClient};

use serde::{Deserialize, Serialize};

/// Extensions the pipeline accepts from any source.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "pdf", "jpg", "jpeg", "png", "tiff", "tif", "bmp", "gif",
];

/// Whether a filename carries an allowed extension.
pub fn allowed_extension(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// A candidate file discovered by a crawler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub url: String,
    pub filename: String,
    /// Extension-derived hint; the fetcher still inspects the filename.
    pub content_type_hint: Option<String>,
    /// Heading of the section the link appeared under.
    pub section_label: String,
    /// Set when an exclusion rule matched; excluded descriptors are
    /// reported for preview but never fetched.
    pub exclude_reason: Option<String>,
}

impl FileDescriptor {
    pub fn is_excluded(&self) -> bool {
        self.exclude_reason.is_some()
    }
}

/// What a crawl produced: descriptors plus the failures it survived.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub descriptors: Vec<FileDescriptor>,
    pub errors: Vec<String>,
}

/// One exclusion matcher. All populated fields are substring matches,
/// case-insensitive; a rule fires when the section test passes and at
/// least one of the link tests passes (or no link test is configured).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludeRule {
    /// Reason recorded on matching descriptors.
    pub reason: String,
    /// Substrings matched against the section label.
    #[serde(default)]
    pub section_contains: Vec<String>,
    /// Substrings matched against the anchor text.
    #[serde(default)]
    pub link_text_contains: Vec<String>,
    /// Substrings matched against the href.
    #[serde(default)]
    pub href_contains: Vec<String>,
}

impl ExcludeRule {
    /// Evaluate the rule against one candidate.
    pub fn matches(&self, section: &str, link_text: &str, href: &str) -> bool {
        let section = section.to_lowercase();
        let link_text = link_text.to_lowercase();
        let href = href.to_lowercase();

        let section_hit = self.section_contains.is_empty()
            || self.section_contains.iter().any(|s| section.contains(&s.to_lowercase()));
        if !section_hit {
            return false;
        }

        if self.link_text_contains.is_empty() && self.href_contains.is_empty() {
            return true;
        }
        self.link_text_contains
            .iter()
            .any(|s| link_text.contains(&s.to_lowercase()))
            || self.href_contains.iter().any(|s| href.contains(&s.to_lowercase()))
    }
}

/// Default exclusion policy for the justice.gov source.
pub fn default_exclude_rules() -> Vec<ExcludeRule> {
    vec![ExcludeRule {
        reason: "doj_disclosure_transparency_act".to_string(),
        section_contains: vec!["doj disclosure".to_string()],
        link_text_contains: vec![
            "transparency act".to_string(),
            "efta".to_string(),
        ],
        href_contains: vec!["transparency-act".to_string()],
    }]
}
