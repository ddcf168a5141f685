//! OCR output models: word boxes and per-page extracted text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in original page pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Minimal box enclosing all the given boxes. Empty input yields the
    /// zero box.
    pub fn enclosing<'a, I>(boxes: I) -> Self
    where
        I: IntoIterator<Item = &'a BoundingBox>,
    {
        let mut iter = boxes.into_iter();
        let first = match iter.next() {
            Some(b) => *b,
            None => return Self::default(),
        };
        let (mut min_x, mut min_y) = (first.x, first.y);
        let (mut max_x, mut max_y) = (first.x + first.width, first.y + first.height);
        for b in iter {
            min_x = min_x.min(b.x);
            min_y = min_y.min(b.y);
            max_x = max_x.max(b.x + b.width);
            max_y = max_y.max(b.y + b.height);
        }
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }
        let inter = (x2 - x1) * (y2 - y1);
        let union = self.width * self.height + other.width * other.height - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One recognized word with position and confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordBox {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Recognition confidence in [0,1].
    pub confidence: f32,
}

impl WordBox {
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::new(self.x, self.y, self.width, self.height)
    }
}

/// Mean word confidence weighted by character length. Empty input yields 0.
pub fn page_confidence(boxes: &[WordBox]) -> f32 {
    let total_chars: usize = boxes.iter().map(|b| b.text.chars().count()).sum();
    if total_chars == 0 {
        return 0.0;
    }
    let weighted: f32 = boxes
        .iter()
        .map(|b| b.confidence * b.text.chars().count() as f32)
        .sum();
    weighted / total_chars as f32
}

/// Extracted OCR text with positional information for one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrText {
    pub id: String,
    pub page_id: String,
    pub document_id: String,
    pub page_number: u32,
    pub raw_text: String,
    pub normalized_text: String,
    /// Word boxes in original page pixel coordinates, reading order.
    pub word_boxes: Vec<WordBox>,
    /// Box enclosing all words on the page.
    pub bbox: BoundingBox,
    pub page_confidence: f32,
    /// Backend identifier that produced this text.
    pub engine: String,
    pub created_at: DateTime<Utc>,
}

impl OcrText {
    pub fn new(
        page_id: String,
        document_id: String,
        page_number: u32,
        raw_text: String,
        word_boxes: Vec<WordBox>,
        engine: String,
    ) -> Self {
        let boxes: Vec<BoundingBox> = word_boxes.iter().map(|w| w.bbox()).collect();
        let bbox = BoundingBox::enclosing(boxes.iter());
        let confidence = page_confidence(&word_boxes);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            page_id,
            document_id,
            page_number,
            normalized_text: raw_text.clone(),
            raw_text,
            word_boxes,
            bbox,
            page_confidence: confidence,
            engine,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, x: f32, y: f32, w: f32, h: f32, conf: f32) -> WordBox {
        WordBox {
            text: text.to_string(),
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
        }
    }

    #[test]
    fn test_page_confidence_weights_by_length() {
        // "aaaa" (conf 1.0) should dominate "b" (conf 0.0)
        let boxes = vec![
            word("aaaa", 0.0, 0.0, 10.0, 10.0, 1.0),
            word("b", 20.0, 0.0, 5.0, 10.0, 0.0),
        ];
        let conf = page_confidence(&boxes);
        assert!((conf - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_page_confidence_empty_is_zero() {
        assert_eq!(page_confidence(&[]), 0.0);
    }

    #[test]
    fn test_enclosing_box() {
        let a = BoundingBox::new(10.0, 10.0, 20.0, 10.0);
        let b = BoundingBox::new(50.0, 5.0, 10.0, 30.0);
        let enc = BoundingBox::enclosing([&a, &b]);
        assert_eq!(enc.x, 10.0);
        assert_eq!(enc.y, 5.0);
        assert_eq!(enc.width, 50.0);
        assert_eq!(enc.height, 30.0);
    }

    #[test]
    fn test_iou_disjoint_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(100.0, 100.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_identical_is_one() {
        let a = BoundingBox::new(5.0, 5.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }
}
