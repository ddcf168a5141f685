//! Site-specific crawler for the justice.gov Epstein library.
//!
//! Walks the landing page and its `/epstein/...` subpages, collecting
//! anchor tags that point at document files. Each descriptor carries the
//! heading of the section it appeared under; the exclusion policy is the
//! rule list passed in, evaluated per candidate.

use std::collections::HashSet;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{allowed_extension, CrawlOutcome, ExcludeRule, FileDescriptor, HttpClient};
use crate::error::Result;

/// Crawler for the justice.gov Epstein page.
pub struct DojCrawler<'a> {
    client: &'a HttpClient,
    root_url: String,
    rules: Vec<ExcludeRule>,
}

impl<'a> DojCrawler<'a> {
    pub fn new(client: &'a HttpClient, root_url: &str, rules: Vec<ExcludeRule>) -> Self {
        Self {
            client,
            root_url: root_url.trim_end_matches('/').to_string(),
            rules,
        }
    }

    /// Discover all document links, including excluded ones (for
    /// preview); callers filter on `exclude_reason` before fetching.
    pub async fn discover(&self) -> Result<CrawlOutcome> {
        let mut outcome = CrawlOutcome::default();

        let root_html = match self.client.get_text(&self.root_url, None).await {
            Ok(html) => html,
            Err(e) => {
                outcome.errors.push(format!("{}: {e}", self.root_url));
                return Ok(outcome);
            }
        };

        let pages = subpages_from_landing(&root_html, &self.root_url);
        let mut seen: HashSet<String> = HashSet::new();

        for (page_url, page_label) in pages {
            let html = if page_url == self.root_url {
                root_html.clone()
            } else {
                match self.client.get_text(&page_url, None).await {
                    Ok(html) => html,
                    Err(e) => {
                        outcome.errors.push(format!("{page_url}: {e}"));
                        continue;
                    }
                }
            };

            let found =
                extract_descriptors(&html, &page_url, &page_label, &self.rules, &mut seen);
            outcome.descriptors.extend(found);
        }

        let excluded = outcome.descriptors.iter().filter(|d| d.is_excluded()).count();
        tracing::info!(
            "DOJ crawl discovered {} files ({} excluded)",
            outcome.descriptors.len(),
            excluded
        );
        Ok(outcome)
    }
}

/// Collect the landing page plus `/epstein/...` subpages it links to,
/// labeled from the path slug, de-duplicated in order.
fn subpages_from_landing(html: &str, root_url: &str) -> Vec<(String, String)> {
    let mut pages: Vec<(String, String)> = vec![(root_url.to_string(), "Epstein Library".into())];

    let document = Html::parse_document(html);
    let anchor = Selector::parse("a[href]").expect("static selector");

    for element in document.select(&anchor) {
        let href = element.value().attr("href").unwrap_or("").trim();
        if !href.starts_with("/epstein/") {
            continue;
        }
        let Some(full) = resolve_url(root_url, href) else {
            continue;
        };
        let slug = href.trim_start_matches("/epstein/").trim_matches('/');
        if slug.is_empty() {
            continue;
        }
        let label = slug
            .replace('-', " ")
            .split_whitespace()
            .map(capitalize)
            .collect::<Vec<_>>()
            .join(" ");
        pages.push((full, label));
    }

    let mut seen = HashSet::new();
    pages.retain(|(url, _)| seen.insert(url.clone()));
    pages
}

/// Pull document descriptors out of one page's HTML.
///
/// Anchors inside recognizable section containers get that section's
/// heading as their label; a second whole-page pass catches links the
/// markup does not wrap consistently.
fn extract_descriptors(
    html: &str,
    page_url: &str,
    page_label: &str,
    rules: &[ExcludeRule],
    seen: &mut HashSet<String>,
) -> Vec<FileDescriptor> {
    let document = Html::parse_document(html);
    let container = Selector::parse("div, section, article").expect("static selector");
    let heading = Selector::parse("h1, h2, h3, h4, h5").expect("static selector");
    let anchor = Selector::parse("a[href]").expect("static selector");
    let section_class =
        Regex::new(r"(?i)(content|document|file|download|view|field|block)").expect("static regex");

    let mut out = Vec::new();

    let mut maybe_add = |href: &str, link_text: &str, section: &str, out: &mut Vec<FileDescriptor>| {
        if href.is_empty() {
            return;
        }
        let Some(full_url) = resolve_url(page_url, href) else {
            return;
        };
        let filename = url_filename(&full_url);
        if !allowed_extension(&filename) {
            return;
        }
        if !seen.insert(full_url.clone()) {
            return;
        }

        let exclude_reason = rules
            .iter()
            .find(|r| r.matches(section, link_text, href))
            .map(|r| r.reason.clone());

        let hint = filename.rsplit_once('.').map(|(_, ext)| ext.to_lowercase());
        out.push(FileDescriptor {
            url: full_url,
            filename,
            content_type_hint: hint,
            section_label: section.to_string(),
            exclude_reason,
        });
    };

    for section_el in document.select(&container) {
        if !element_has_class(&section_el, &section_class) {
            continue;
        }
        let subsection = section_el
            .select(&heading)
            .next()
            .map(|h| h.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        let section_label = if subsection.is_empty() {
            page_label.to_string()
        } else {
            format!("{page_label} - {subsection}")
        };

        for a in section_el.select(&anchor) {
            let href = a.value().attr("href").unwrap_or("");
            let link_text = a.text().collect::<String>().trim().to_string();
            maybe_add(href, &link_text, &section_label, &mut out);
        }
    }

    // Pages without consistent section markup still expose direct links.
    for a in document.select(&anchor) {
        let href = a.value().attr("href").unwrap_or("");
        let link_text = a.text().collect::<String>().trim().to_string();
        maybe_add(href, &link_text, page_label, &mut out);
    }

    out
}

fn element_has_class(element: &ElementRef, pattern: &Regex) -> bool {
    element.value().classes().any(|c| pattern.is_match(c))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn resolve_url(base: &str, href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    Url::parse(base).and_then(|b| b.join(href)).map(|u| u.to_string()).ok()
}

fn url_filename(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| u.path().rsplit('/').next().unwrap_or("").to_string())
        .unwrap_or_default()
}
