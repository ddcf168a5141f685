//! Search engine: keyword, phrase, fuzzy, entity, and optional semantic
//! modes over the persistent index.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use super::indexer::query_tokens;
use super::semantic::{capability_disabled, cosine_similarity, Embedder};
use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::models::{BoundingBox, EntityKind, OcrText, SearchRecord, WordBox};
use crate::repository::Repository;

/// Hard ceiling on result list sizes.
const MAX_LIMIT: u32 = 1000;
/// Context kept on each side of a snippet match.
const SNIPPET_CONTEXT: usize = 80;

/// Search modes exposed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Keyword,
    Phrase,
    Fuzzy,
    Entity,
    Semantic,
}

impl SearchMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "keyword" => Some(Self::Keyword),
            "phrase" => Some(Self::Phrase),
            "fuzzy" => Some(Self::Fuzzy),
            "entity" => Some(Self::Entity),
            "semantic" => Some(Self::Semantic),
            _ => None,
        }
    }
}

/// Options accepted by every search call.
#[derive(Debug, Default, Clone)]
pub struct SearchOptions {
    pub limit: Option<u32>,
    /// Overrides the configured fuzzy threshold.
    pub fuzzy_threshold: Option<f32>,
    /// Required for entity mode.
    pub entity_kind: Option<EntityKind>,
}

/// One search result, located on a page.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub ocr_id: String,
    pub document_id: String,
    pub page_number: u32,
    pub snippet: String,
    pub full_text: String,
    pub score: f32,
    pub page_confidence: f32,
    pub image_path: String,
    pub bbox: BoundingBox,
    pub word_boxes: Vec<WordBox>,
}

/// Search engine over the repository's index rows.
pub struct SearchEngine {
    repo: Arc<Repository>,
    config: SearchConfig,
    embedder: Option<Arc<dyn Embedder>>,
}

impl SearchEngine {
    pub fn new(repo: Arc<Repository>, config: SearchConfig) -> Self {
        Self {
            repo,
            config,
            embedder: None,
        }
    }

    /// Enable semantic mode with the given embedder.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Run a search. Empty queries are invalid; `limit == 0` returns an
    /// empty list without error.
    pub fn search(
        &self,
        mode: SearchMode,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(Error::InvalidArgument("empty query".to_string()));
        }
        let limit = match opts.limit {
            Some(0) => return Ok(Vec::new()),
            Some(n) => n.min(MAX_LIMIT),
            None => self.config.default_limit.min(MAX_LIMIT),
        };

        match mode {
            SearchMode::Keyword => self.keyword_search(query, limit),
            SearchMode::Phrase => self.phrase_search(query, limit),
            SearchMode::Fuzzy => self.fuzzy_search(query, limit, opts),
            SearchMode::Entity => self.entity_search(query, limit, opts),
            SearchMode::Semantic => self.semantic_search(query, limit),
        }
    }

    /// AND over query tokens; proximity-weighted occurrence score.
    fn keyword_search(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>> {
        let tokens = query_tokens(query);
        if tokens.is_empty() {
            return Err(Error::InvalidArgument(
                "query contains no searchable tokens".to_string(),
            ));
        }

        let mut scored = Vec::new();
        for record in self.repo.get_search_records()? {
            if let Some(score) = keyword_score(&record.tokens, &tokens) {
                scored.push((score, record));
            }
        }
        self.build_hits(scored, &tokens, limit)
    }

    /// Contiguous token subsequence; score is the occurrence count.
    fn phrase_search(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>> {
        let tokens = query_tokens(query);
        if tokens.is_empty() {
            return Err(Error::InvalidArgument(
                "query contains no searchable tokens".to_string(),
            ));
        }

        let mut scored = Vec::new();
        for record in self.repo.get_search_records()? {
            let occurrences = count_subsequence(&record.tokens, &tokens);
            if occurrences > 0 {
                scored.push((occurrences as f32, record));
            }
        }
        self.build_hits(scored, &tokens, limit)
    }

    /// Trigram-similarity token matching.
    fn fuzzy_search(&self, query: &str, limit: u32, opts: &SearchOptions) -> Result<Vec<SearchHit>> {
        let tokens = query_tokens(query);
        if tokens.is_empty() {
            return Err(Error::InvalidArgument(
                "query contains no searchable tokens".to_string(),
            ));
        }
        let threshold = opts.fuzzy_threshold.unwrap_or(self.config.fuzzy_threshold);

        let mut scored = Vec::new();
        for record in self.repo.get_search_records()? {
            if record.tokens.is_empty() {
                continue;
            }
            let mut best_sims = Vec::with_capacity(tokens.len());
            for token in &tokens {
                let grams = trigrams(token);
                let best = record
                    .tokens
                    .iter()
                    .map(|page_token| jaccard(&grams, &trigrams(page_token)))
                    .fold(0.0f32, f32::max);
                best_sims.push(best);
            }
            let matched = best_sims.iter().filter(|s| **s >= threshold).count();
            // At least half of the query tokens must match somewhere.
            if matched * 2 >= tokens.len() && matched > 0 {
                let score = best_sims.iter().sum::<f32>() / best_sims.len() as f32;
                scored.push((score, record));
            }
        }
        self.build_hits(scored, &tokens, limit)
    }

    /// Exact entity lookup with a case-insensitive fallback.
    fn entity_search(&self, query: &str, limit: u32, opts: &SearchOptions) -> Result<Vec<SearchHit>> {
        let kind = opts.entity_kind.ok_or_else(|| {
            Error::InvalidArgument("entity search requires an entity type".to_string())
        })?;

        let mut entities = self
            .repo
            .find_entities(kind, &query.to_lowercase(), limit)?;
        if entities.is_empty() {
            entities = self.repo.find_entities_by_value(kind, query, limit)?;
        }

        let mut hits = Vec::new();
        let mut seen_ocr: HashSet<String> = HashSet::new();
        for entity in entities {
            if !seen_ocr.insert(entity.ocr_id.clone()) {
                continue;
            }
            let Some(ocr) = self.repo.get_ocr_text(&entity.ocr_id)? else {
                continue;
            };
            let image_path = self.image_path_for(&ocr)?;
            let snippet = snippet_around(&ocr.normalized_text, &entity.value);
            hits.push(SearchHit {
                ocr_id: ocr.id.clone(),
                document_id: ocr.document_id.clone(),
                page_number: ocr.page_number,
                snippet,
                full_text: ocr.normalized_text.clone(),
                score: entity.confidence,
                page_confidence: ocr.page_confidence,
                image_path,
                bbox: entity.bbox.unwrap_or(ocr.bbox),
                word_boxes: ocr.word_boxes,
            });
            if hits.len() as u32 >= limit {
                break;
            }
        }
        Ok(hits)
    }

    /// Embedding similarity; requires a configured embedder.
    fn semantic_search(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>> {
        let embedder = self.embedder.as_ref().ok_or_else(capability_disabled)?;
        let query_vec = embedder.embed(query)?;

        let mut scored = Vec::new();
        for record in self.repo.get_search_records()? {
            if record.searchable_text.is_empty() {
                continue;
            }
            let Some(ocr) = self.repo.get_ocr_text(&record.ocr_id)? else {
                continue;
            };
            let page_vec = embedder.embed(&ocr.normalized_text)?;
            let score = cosine_similarity(&query_vec, &page_vec);
            scored.push((score, record));
        }
        let tokens = query_tokens(query);
        self.build_hits(scored, &tokens, limit)
    }

    /// Turn scored records into sorted, snippeted hits.
    fn build_hits(
        &self,
        mut scored: Vec<(f32, SearchRecord)>,
        query_tokens: &[String],
        limit: u32,
    ) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for (score, record) in scored.drain(..) {
            let Some(ocr) = self.repo.get_ocr_text(&record.ocr_id)? else {
                continue;
            };
            if ocr.normalized_text.is_empty() {
                continue;
            }
            let image_path = self.image_path_for(&ocr)?;
            let needle = query_tokens.first().map(String::as_str).unwrap_or("");
            let snippet = snippet_around(&ocr.normalized_text, needle);
            hits.push((score, ocr, image_path, snippet));
        }

        // Total order: score desc, confidence desc, created_at asc.
        hits.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.1.page_confidence
                        .partial_cmp(&a.1.page_confidence)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.1.created_at.cmp(&b.1.created_at))
        });

        Ok(hits
            .into_iter()
            .take(limit as usize)
            .map(|(score, ocr, image_path, snippet)| SearchHit {
                ocr_id: ocr.id.clone(),
                document_id: ocr.document_id.clone(),
                page_number: ocr.page_number,
                snippet,
                full_text: ocr.normalized_text.clone(),
                score,
                page_confidence: ocr.page_confidence,
                image_path,
                bbox: ocr.bbox,
                word_boxes: ocr.word_boxes,
            })
            .collect())
    }

    fn image_path_for(&self, ocr: &OcrText) -> Result<String> {
        Ok(self
            .repo
            .get_page(&ocr.page_id)?
            .map(|p| p.image_path)
            .unwrap_or_default())
    }
}

/// AND-semantics keyword score, or None when a token is missing.
///
/// Per token: occurrences divided by (1 + distance to the nearest
/// occurrence of any other query token). Single-token queries score by
/// plain occurrence count.
fn keyword_score(page_tokens: &[String], query: &[String]) -> Option<f32> {
    let positions: Vec<Vec<usize>> = query
        .iter()
        .map(|token| {
            page_tokens
                .iter()
                .enumerate()
                .filter(|(_, t)| *t == token)
                .map(|(i, _)| i)
                .collect::<Vec<_>>()
        })
        .collect();

    if positions.iter().any(|p| p.is_empty()) {
        return None;
    }

    let mut score = 0.0f32;
    for (i, own) in positions.iter().enumerate() {
        let count = own.len() as f32;
        let distance = nearest_other_distance(&positions, i);
        score += count / (1.0 + distance as f32);
    }
    Some(score)
}

/// Minimum index distance from any occurrence of token `i` to any
/// occurrence of a different query token; 0 when there is no other token.
fn nearest_other_distance(positions: &[Vec<usize>], i: usize) -> usize {
    let mut best: Option<usize> = None;
    for (j, other) in positions.iter().enumerate() {
        if j == i {
            continue;
        }
        for &p in &positions[i] {
            for &q in other {
                let d = p.abs_diff(q);
                best = Some(best.map_or(d, |b| b.min(d)));
            }
        }
    }
    best.unwrap_or(0)
}

/// Occurrences of `needle` as a contiguous subsequence of `haystack`.
fn count_subsequence(haystack: &[String], needle: &[String]) -> usize {
    if needle.is_empty() || haystack.len() < needle.len() {
        return 0;
    }
    haystack
        .windows(needle.len())
        .filter(|window| *window == needle)
        .count()
}

/// Character trigrams; tokens shorter than three chars contribute
/// themselves as a single gram.
fn trigrams(token: &str) -> HashSet<String> {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() < 3 {
        let mut set = HashSet::new();
        set.insert(token.to_string());
        return set;
    }
    chars
        .windows(3)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = (a.len() + b.len()) as f32 - intersection;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Snippet around the first (case-insensitive) occurrence of `needle`,
/// with up to 80 characters of context on each side trimmed to word
/// boundaries. Short texts are returned whole.
fn snippet_around(text: &str, needle: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < 160 {
        return text.to_string();
    }

    let lower_text = text.to_lowercase();
    let lower_needle = needle.to_lowercase();
    let byte_pos = if lower_needle.is_empty() {
        None
    } else {
        lower_text.find(&lower_needle)
    };

    let (match_start, match_chars) = match byte_pos {
        Some(byte_pos) => (
            text[..byte_pos].chars().count(),
            lower_needle.chars().count(),
        ),
        None => (0, 0),
    };
    let match_end = match_start + match_chars;

    let mut start = match_start.saturating_sub(SNIPPET_CONTEXT);
    let mut end = (match_end + SNIPPET_CONTEXT).min(chars.len());

    // Trim leading/trailing partial words, never eating into the match.
    if start > 0 {
        while start < match_start && !chars[start].is_whitespace() {
            start += 1;
        }
        while start < match_start && chars[start].is_whitespace() {
            start += 1;
        }
    }
    if end < chars.len() {
        while end > match_end && !chars[end - 1].is_whitespace() {
            end -= 1;
        }
        while end > match_end && chars[end - 1].is_whitespace() {
            end -= 1;
        }
    }

    chars[start..end].iter().collect()
}
