//! Rule-based entity detection over normalized page text.
//!
//! Four kinds: emails, US-style phone numbers, dates, and capitalized
//! name sequences. Matches carry their character span so they can be
//! mapped back onto word boxes for highlighting.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;

use crate::models::{BoundingBox, EntityKind, WordBox};

/// An entity found in text, before it is tied to database rows.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedEntity {
    pub kind: EntityKind,
    pub value: String,
    pub normalized_value: Option<String>,
    /// Byte span in the normalized text.
    pub start: usize,
    pub end: usize,
    pub bbox: Option<BoundingBox>,
}

/// Capitalized words that are never names on their own: weekdays,
/// months, titles, document furniture, geographic and sentence-leading
/// words.
const NAME_STOPLIST: &[&str] = &[
    // Weekdays and months
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
    "January", "February", "March", "April", "May", "June", "July", "August",
    "September", "October", "November", "December",
    "Jan", "Feb", "Mar", "Apr", "Jun", "Jul", "Aug", "Sep", "Sept", "Oct", "Nov", "Dec",
    // Titles and honorifics
    "Mr", "Mrs", "Ms", "Dr", "Prof", "Sir", "Madam", "Miss", "Rev", "Hon",
    "Gen", "Col", "Capt", "Lt", "Sgt", "Maj", "Adm", "Gov", "Sen", "Rep",
    "Judge", "Justice", "Chief", "Officer", "Agent", "Attorney", "Esq",
    // Sentence-leading and function words
    "The", "This", "That", "These", "Those", "There", "Here", "When", "Where",
    "What", "Which", "While", "Who", "Whom", "Whose", "Why", "How", "If",
    "Then", "Than", "And", "But", "Or", "Nor", "For", "Yet", "So", "Because",
    "Since", "Although", "Though", "However", "Moreover", "Also", "Both",
    "Each", "Either", "Neither", "Not", "Now", "Once", "Only", "Just",
    "Still", "Even", "Ever", "Never", "Always", "Often", "Again", "After",
    "Before", "During", "Until", "From", "Into", "Onto", "Over", "Under",
    "Above", "Below", "Between", "Among", "Through", "Within", "Without",
    "About", "Against", "Along", "Around", "Upon", "Per", "Via",
    // Document furniture
    "Page", "Date", "Time", "Subject", "To", "Re", "Cc", "Bcc", "Dear",
    "Sincerely", "Regards", "Attachment", "Exhibit", "Case", "File",
    "Document", "Report", "Memo", "Memorandum", "Note", "Notes", "Section",
    "Chapter", "Part", "Volume", "Appendix", "Table", "Figure", "Source",
    "Copy", "Draft", "Final", "Confidential", "Classified", "Unclassified",
    "Redacted", "Sealed", "Number", "Item", "Total", "Witness", "Statement",
    "Deposition", "Transcript",
    // Geographic and institutional prefixes
    "North", "South", "East", "West", "New", "Old", "Upper", "Lower", "Lake",
    "Mount", "Fort", "Saint", "San", "Santa", "Los", "Las", "El", "La",
    "United", "States", "America", "American", "National", "Federal",
    "State", "County", "City", "Town", "District", "Court", "Office",
    "Department", "Agency", "Bureau", "Division", "Unit", "Street", "Avenue",
    "Road", "Island",
];

/// Rule-based entity extractor.
pub struct EntityExtractor {
    email: Regex,
    phones: Vec<Regex>,
    dates: Vec<Regex>,
    name: Regex,
    stoplist: HashSet<&'static str>,
}

impl EntityExtractor {
    pub fn new() -> Self {
        Self {
            email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                .expect("static regex"),
            phones: vec![
                Regex::new(r"\(\d{3}\)\s?\d{3}[-.]?\d{4}").expect("static regex"),
                Regex::new(r"\b\d{3}-\d{3}-\d{4}\b").expect("static regex"),
                Regex::new(r"\b\d{3}\.\d{3}\.\d{4}\b").expect("static regex"),
                Regex::new(r"\+1\s\d{3}\s\d{3}\s\d{4}").expect("static regex"),
                Regex::new(r"\b\d{10}\b").expect("static regex"),
            ],
            dates: vec![
                Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("static regex"),
                Regex::new(r"\b\d{1,2}/\d{1,2}/\d{2,4}\b").expect("static regex"),
                Regex::new(
                    r"(?i)\b(January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)\.?\s+\d{1,2},?\s+\d{4}\b",
                )
                .expect("static regex"),
                Regex::new(
                    r"(?i)\b\d{1,2}\s+(January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)\.?\s+\d{4}\b",
                )
                .expect("static regex"),
            ],
            name: Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+){1,3}\b").expect("static regex"),
            stoplist: NAME_STOPLIST.iter().copied().collect(),
        }
    }

    /// Detect all entity kinds in `text`, attach bounding boxes where the
    /// span maps onto `word_boxes`, and collapse duplicates.
    pub fn extract(&self, text: &str, word_boxes: &[WordBox]) -> Vec<DetectedEntity> {
        let mut entities = Vec::new();
        entities.extend(self.detect_emails(text));
        entities.extend(self.detect_phones(text));
        entities.extend(self.detect_dates(text));
        entities.extend(self.detect_names(text));

        for entity in &mut entities {
            entity.bbox = span_bbox(word_boxes, entity.start, entity.end);
        }

        dedupe(entities)
    }

    fn detect_emails(&self, text: &str) -> Vec<DetectedEntity> {
        self.email
            .find_iter(text)
            .map(|m| DetectedEntity {
                kind: EntityKind::Email,
                value: m.as_str().to_string(),
                normalized_value: Some(m.as_str().to_lowercase()),
                start: m.start(),
                end: m.end(),
                bbox: None,
            })
            .collect()
    }

    fn detect_phones(&self, text: &str) -> Vec<DetectedEntity> {
        let mut out = Vec::new();
        for pattern in &self.phones {
            for m in pattern.find_iter(text) {
                let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
                let last10 = if digits.len() > 10 {
                    digits[digits.len() - 10..].to_string()
                } else {
                    digits
                };
                out.push(DetectedEntity {
                    kind: EntityKind::Phone,
                    value: m.as_str().to_string(),
                    normalized_value: Some(last10),
                    start: m.start(),
                    end: m.end(),
                    bbox: None,
                });
            }
        }
        out
    }

    fn detect_dates(&self, text: &str) -> Vec<DetectedEntity> {
        let mut out = Vec::new();
        for pattern in &self.dates {
            for m in pattern.find_iter(text) {
                out.push(DetectedEntity {
                    kind: EntityKind::Date,
                    value: m.as_str().to_string(),
                    normalized_value: normalize_date(m.as_str()),
                    start: m.start(),
                    end: m.end(),
                    bbox: None,
                });
            }
        }
        out
    }

    fn detect_names(&self, text: &str) -> Vec<DetectedEntity> {
        let mut out = Vec::new();
        for m in self.name.find_iter(text) {
            let words: Vec<&str> = m.as_str().split_whitespace().collect();

            // Trim stoplisted words off both ends ("Mr John Smith").
            let mut lo = 0;
            let mut hi = words.len();
            while lo < hi && self.stoplist.contains(words[lo]) {
                lo += 1;
            }
            while hi > lo && self.stoplist.contains(words[hi - 1]) {
                hi -= 1;
            }
            let kept = &words[lo..hi];
            if kept.len() < 2 || kept.len() > 4 {
                continue;
            }
            // An interior stop word means this is prose, not a name.
            if kept.iter().any(|w| self.stoplist.contains(*w) || w.len() < 2) {
                continue;
            }

            // Span of the kept words inside the match.
            let skipped: usize = words[..lo].iter().map(|w| w.len() + 1).sum();
            let kept_len = kept.iter().map(|w| w.len()).sum::<usize>() + kept.len() - 1;
            let start = m.start() + skipped;
            let value = kept.join(" ");

            out.push(DetectedEntity {
                kind: EntityKind::Name,
                value: value.clone(),
                normalized_value: Some(value),
                start,
                end: start + kept_len,
                bbox: None,
            });
        }
        out
    }
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize a date string to ISO-8601, or None when the year is not
/// plausibly within [1900, current year + 1].
fn normalize_date(s: &str) -> Option<String> {
    let (year, month, day) = parse_date_parts(s)?;
    let max_year = Utc::now().year() + 1;
    if !(1900..=max_year).contains(&year) {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.format("%Y-%m-%d").to_string())
}

fn parse_date_parts(s: &str) -> Option<(i32, u32, u32)> {
    let s = s.trim();

    // YYYY-MM-DD
    if let Some((y, rest)) = s.split_once('-') {
        if y.len() == 4 {
            let (m, d) = rest.split_once('-')?;
            return Some((y.parse().ok()?, m.parse().ok()?, d.parse().ok()?));
        }
    }

    // M/D/YYYY or M/D/YY
    if s.contains('/') {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() == 3 {
            let month: u32 = parts[0].parse().ok()?;
            let day: u32 = parts[1].parse().ok()?;
            let year_raw: i32 = parts[2].parse().ok()?;
            let year = if parts[2].len() == 2 {
                // Two-digit years pivot on the current year.
                let pivot = (Utc::now().year() + 1) % 100;
                if year_raw <= pivot {
                    2000 + year_raw
                } else {
                    1900 + year_raw
                }
            } else {
                year_raw
            };
            return Some((year, month, day));
        }
    }

    // Month D, YYYY / D Month YYYY
    let cleaned = s.replace(',', " ").replace('.', " ");
    let parts: Vec<&str> = cleaned.split_whitespace().collect();
    if parts.len() == 3 {
        if let Some(month) = month_number(parts[0]) {
            return Some((parts[2].parse().ok()?, month, parts[1].parse().ok()?));
        }
        if let Some(month) = month_number(parts[1]) {
            return Some((parts[2].parse().ok()?, month, parts[0].parse().ok()?));
        }
    }

    None
}

fn month_number(name: &str) -> Option<u32> {
    let name = name.to_lowercase();
    let month = match name.as_str() {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sep" | "sept" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Minimal enclosing box over the word boxes a character span touches,
/// assuming boxes correspond to whitespace-separated tokens of the text.
fn span_bbox(word_boxes: &[WordBox], start: usize, end: usize) -> Option<BoundingBox> {
    if word_boxes.is_empty() {
        return None;
    }
    let mut overlapping: Vec<BoundingBox> = Vec::new();
    let mut pos = 0usize;
    for word in word_boxes {
        let word_start = pos;
        let word_end = pos + word.text.len();
        if word_end >= start && word_start <= end {
            overlapping.push(word.bbox());
        }
        pos = word_end + 1;
        if word_start > end {
            break;
        }
    }
    if overlapping.is_empty() {
        None
    } else {
        Some(BoundingBox::enclosing(overlapping.iter()))
    }
}

/// Collapse duplicates of the same kind and normalized value, keeping
/// the first occurrence (and its bbox).
fn dedupe(entities: Vec<DetectedEntity>) -> Vec<DetectedEntity> {
    let mut seen: HashMap<(EntityKind, String), ()> = HashMap::new();
    let mut out = Vec::new();
    let mut sorted = entities;
    sorted.sort_by_key(|e| e.start);
    for entity in sorted {
        let key = (
            entity.kind,
            entity
                .normalized_value
                .clone()
                .unwrap_or_else(|| entity.value.to_lowercase()),
        );
        if seen.insert(key, ()).is_none() {
            out.push(entity);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Vec<DetectedEntity> {
        EntityExtractor::new().extract(text, &[])
    }

    fn values_of(entities: &[DetectedEntity], kind: EntityKind) -> Vec<String> {
        entities
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.value.clone())
            .collect()
    }

    #[test]
    fn test_email_detection_and_normalization() {
        let found = extract("Contact A@B.COM or support@example.org today");
        let emails: Vec<_> = found.iter().filter(|e| e.kind == EntityKind::Email).collect();
        assert_eq!(emails.len(), 2);
        assert_eq!(emails[0].normalized_value.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn test_phone_formats() {
        for text in [
            "call (555) 123-4567 now",
            "call 555-123-4567 now",
            "call 555.123.4567 now",
            "call +1 555 123 4567 now",
            "call 5551234567 now",
        ] {
            let found = extract(text);
            let phones: Vec<_> =
                found.iter().filter(|e| e.kind == EntityKind::Phone).collect();
            assert_eq!(phones.len(), 1, "failed for {text}");
            assert_eq!(
                phones[0].normalized_value.as_deref(),
                Some("5551234567"),
                "failed for {text}"
            );
        }
    }

    #[test]
    fn test_date_formats_normalize_to_iso() {
        let cases = [
            ("meeting on 2003-07-24 it was", "2003-07-24"),
            ("meeting on 7/24/2003 it was", "2003-07-24"),
            ("meeting on 7/24/03 it was", "2003-07-24"),
            ("meeting on July 24, 2003 it was", "2003-07-24"),
            ("meeting on 24 July 2003 it was", "2003-07-24"),
        ];
        for (text, expected) in cases {
            let found = extract(text);
            let dates: Vec<_> = found.iter().filter(|e| e.kind == EntityKind::Date).collect();
            assert!(!dates.is_empty(), "no date found in {text}");
            assert_eq!(
                dates[0].normalized_value.as_deref(),
                Some(expected),
                "failed for {text}"
            );
        }
    }

    #[test]
    fn test_implausible_year_keeps_original() {
        let found = extract("ancient text from 1/1/3021 era");
        let dates: Vec<_> = found.iter().filter(|e| e.kind == EntityKind::Date).collect();
        assert_eq!(dates.len(), 1);
        assert!(dates[0].normalized_value.is_none());
        assert_eq!(dates[0].value, "1/1/3021");
    }

    #[test]
    fn test_name_detection() {
        let found = extract("Witness Ghislaine Maxwell met with John Smith");
        let names = values_of(&found, EntityKind::Name);
        assert!(names.contains(&"Ghislaine Maxwell".to_string()));
        assert!(names.contains(&"John Smith".to_string()));
    }

    #[test]
    fn test_single_capitalized_word_not_a_name() {
        let found = extract("Clinton attended");
        assert!(values_of(&found, EntityKind::Name).is_empty());
    }

    #[test]
    fn test_title_trimmed_from_name() {
        let found = extract("Statement of Mr John Smith taken under oath");
        let names = values_of(&found, EntityKind::Name);
        assert!(names.contains(&"John Smith".to_string()));
        assert!(!names.iter().any(|n| n.contains("Mr")));
    }

    #[test]
    fn test_stoplisted_sequences_rejected() {
        let found = extract("Flight Report Page Two");
        assert!(values_of(&found, EntityKind::Name).is_empty());
    }

    #[test]
    fn test_all_caps_headings_not_names() {
        let found = extract("DEPOSITION TRANSCRIPT CONTINUED");
        assert!(values_of(&found, EntityKind::Name).is_empty());
    }

    #[test]
    fn test_duplicates_collapsed_first_kept() {
        let boxes = vec![
            WordBox { text: "a@b.com".into(), x: 5.0, y: 5.0, width: 50.0, height: 10.0, confidence: 0.9 },
            WordBox { text: "and".into(), x: 60.0, y: 5.0, width: 20.0, height: 10.0, confidence: 0.9 },
            WordBox { text: "a@b.com".into(), x: 90.0, y: 5.0, width: 50.0, height: 10.0, confidence: 0.9 },
        ];
        let found = EntityExtractor::new().extract("a@b.com and a@b.com", &boxes);
        let emails: Vec<_> = found.iter().filter(|e| e.kind == EntityKind::Email).collect();
        assert_eq!(emails.len(), 1);
        // The retained bbox belongs to the first occurrence.
        let bbox = emails[0].bbox.unwrap();
        assert_eq!(bbox.x, 5.0);
    }

    #[test]
    fn test_span_bbox_maps_entity_onto_words() {
        let boxes = vec![
            WordBox { text: "Contact".into(), x: 0.0, y: 0.0, width: 60.0, height: 12.0, confidence: 0.9 },
            WordBox { text: "a@b.com".into(), x: 70.0, y: 0.0, width: 70.0, height: 12.0, confidence: 0.9 },
            WordBox { text: "today".into(), x: 150.0, y: 0.0, width: 40.0, height: 12.0, confidence: 0.9 },
        ];
        // "Contact a@b.com today" - the email spans bytes 8..15.
        let bbox = span_bbox(&boxes, 8, 15).unwrap();
        assert_eq!(bbox.x, 70.0);
        assert_eq!(bbox.width, 70.0);
    }
}
