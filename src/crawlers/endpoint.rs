//! Generic JSON endpoint crawler.
//!
//! Tries a fixed set of listing paths under a base URL and extracts file
//! descriptors from whatever JSON shape the first successful response
//! has. Some worker-backed endpoints serve JSON with a text/plain
//! content type, so bodies that merely look like JSON are parsed too.

use serde_json::Value;
use url::Url;

use super::{allowed_extension, CrawlOutcome, FileDescriptor, HttpClient};
use crate::error::{Error, Result};

/// Candidate listing paths, in order. The first JSON response wins.
const LISTING_PATHS: &[&str] = &["api/all-files", "files.json", "list.json", "api/files", ""];

/// Crawler for generic JSON listing endpoints.
pub struct EndpointCrawler<'a> {
    client: &'a HttpClient,
    base_url: String,
}

impl<'a> EndpointCrawler<'a> {
    pub fn new(client: &'a HttpClient, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Discover candidate files from the endpoint.
    ///
    /// Exhausting every listing candidate yields a `discovery_failed`
    /// error alongside the (empty) descriptor list.
    pub async fn discover(&self) -> Result<CrawlOutcome> {
        let mut outcome = CrawlOutcome::default();

        for path in LISTING_PATHS {
            let url = if path.is_empty() {
                format!("{}/", self.base_url)
            } else {
                format!("{}/{}", self.base_url, path)
            };

            let body = match self.client.get_text(&url, Some("application/json")).await {
                Ok(body) => body,
                Err(e) => {
                    outcome.errors.push(format!("{url}: {e}"));
                    continue;
                }
            };

            match parse_listing(&body) {
                Some(data) => {
                    outcome.descriptors = extract_files_from_json(&data, &self.base_url);
                    tracing::info!(
                        "Discovered {} files from {}",
                        outcome.descriptors.len(),
                        url
                    );
                    return Ok(outcome);
                }
                None => {
                    outcome.errors.push(format!("{url}: body is not JSON"));
                }
            }
        }

        Err(Error::PermanentUpstream(format!(
            "discovery_failed: no listing candidate under {} returned JSON ({} attempts failed)",
            self.base_url,
            outcome.errors.len()
        )))
    }
}

/// Parse a listing body as JSON, accepting JSON-looking text/plain.
fn parse_listing(body: &str) -> Option<Value> {
    let trimmed = body.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    serde_json::from_str(body).ok()
}

/// Best-effort descriptor extraction from unknown JSON shapes.
///
/// Supported: arrays of strings, arrays of objects carrying one of
/// `key|url|href|path` plus `filename|name` (or the path tail), and
/// objects wrapping such arrays under `files|items|data|results`.
pub(crate) fn extract_files_from_json(data: &Value, download_base: &str) -> Vec<FileDescriptor> {
    let mut out = Vec::new();

    let mut handle_item = |item: &Value| {
        match item {
            Value::String(href) => {
                let filename = path_tail(href);
                if allowed_extension(&filename) {
                    if let Some(url) = resolve(download_base, href) {
                        out.push(descriptor(url, filename));
                    }
                }
            }
            Value::Object(map) => {
                let href = ["key", "url", "href", "path"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str));
                let Some(href) = href else { return };

                let filename = ["filename", "name"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str))
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| path_tail(href));

                if allowed_extension(&filename) {
                    if let Some(url) = resolve(download_base, href.trim_start_matches('/')) {
                        out.push(descriptor(url, filename));
                    }
                }
            }
            _ => {}
        }
    };

    match data {
        Value::Array(items) => {
            for item in items {
                handle_item(item);
            }
        }
        Value::Object(map) => {
            for key in ["files", "items", "data", "results"] {
                if let Some(Value::Array(items)) = map.get(key) {
                    for item in items {
                        handle_item(item);
                    }
                }
            }
        }
        _ => {}
    }

    out
}

fn descriptor(url: String, filename: String) -> FileDescriptor {
    let hint = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase());
    FileDescriptor {
        url,
        filename,
        content_type_hint: hint,
        section_label: String::new(),
        exclude_reason: None,
    }
}

fn path_tail(href: &str) -> String {
    href.rsplit('/').next().unwrap_or(href).to_string()
}

fn resolve(base: &str, href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    Url::parse(&format!("{base}/"))
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://files.example.org";

    #[test]
    fn test_array_of_strings() {
        let data: Value = serde_json::from_str(r#"["a.pdf", "b.txt", "dir/c.png"]"#).unwrap();
        let files = extract_files_from_json(&data, BASE);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].filename, "a.pdf");
        assert_eq!(files[0].url, format!("{BASE}/a.pdf"));
        assert_eq!(files[1].filename, "c.png");
        assert_eq!(files[1].url, format!("{BASE}/dir/c.png"));
    }

    #[test]
    fn test_array_of_objects_with_key() {
        let data: Value = serde_json::from_str(
            r#"[{"key": "files/scan1.pdf", "filename": "scan1.pdf", "size": 100}]"#,
        )
        .unwrap();
        let files = extract_files_from_json(&data, BASE);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].url, format!("{BASE}/files/scan1.pdf"));
        assert_eq!(files[0].content_type_hint.as_deref(), Some("pdf"));
    }

    #[test]
    fn test_wrapped_files_array() {
        let data: Value = serde_json::from_str(
            r#"{"files": [{"url": "https://cdn.example.org/x.jpg", "name": "x.jpg"}]}"#,
        )
        .unwrap();
        let files = extract_files_from_json(&data, BASE);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].url, "https://cdn.example.org/x.jpg");
    }

    #[test]
    fn test_filename_derived_from_path_tail() {
        let data: Value =
            serde_json::from_str(r#"{"items": [{"path": "deep/dir/report.tiff"}]}"#).unwrap();
        let files = extract_files_from_json(&data, BASE);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "report.tiff");
    }

    #[test]
    fn test_disallowed_extensions_skipped() {
        let data: Value =
            serde_json::from_str(r#"{"results": [{"url": "/x.exe", "name": "x.exe"}]}"#).unwrap();
        assert!(extract_files_from_json(&data, BASE).is_empty());
    }

    #[test]
    fn test_parse_listing_accepts_json_looking_text() {
        assert!(parse_listing(r#"  ["a.pdf"]"#).is_some());
        assert!(parse_listing("<html></html>").is_none());
        assert!(parse_listing("{broken").is_none());
    }
}
