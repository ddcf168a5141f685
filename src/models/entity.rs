//! Detected entity model.

use serde::{Deserialize, Serialize};

use super::ocr::BoundingBox;

/// Kinds of entities the extractor detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Name,
    Email,
    Phone,
    Date,
    Keyword,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Date => "date",
            Self::Keyword => "keyword",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "name" => Some(Self::Name),
            "email" => Some(Self::Email),
            "phone" => Some(Self::Phone),
            "date" => Some(Self::Date),
            "keyword" => Some(Self::Keyword),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An entity found in a page's normalized text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub ocr_id: String,
    pub document_id: String,
    pub page_number: u32,
    pub kind: EntityKind,
    /// The value as found in the text.
    pub value: String,
    /// Canonical form; None when normalization was not possible
    /// (e.g. a date with an implausible year).
    pub normalized_value: Option<String>,
    /// Minimal enclosing box over the words of the match, when the
    /// character span maps onto word boxes.
    pub bbox: Option<BoundingBox>,
    pub confidence: f32,
}
