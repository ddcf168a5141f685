//! Ensemble OCR backend: word-level merge across engines.
//!
//! Every configured engine runs on the same image. Boxes that agree
//! (IOU >= 0.5, text equal case-insensitively within edit distance 1)
//! collapse into one box keeping the higher confidence and the longer
//! text; disagreements pass through. A global confidence floor prunes
//! the survivors.

use image::DynamicImage;

use super::backend::{OcrBackend, OcrEngineKind, OcrError, OcrPageResult};
use crate::models::WordBox;

/// Minimum overlap for two boxes to be merge candidates.
const MERGE_IOU: f32 = 0.5;

/// Ensemble over multiple OCR engines.
pub struct EnsembleBackend {
    engines: Vec<Box<dyn OcrBackend>>,
    /// Words below this confidence are dropped after merging.
    drop_confidence: f32,
}

impl EnsembleBackend {
    pub fn new(engines: Vec<Box<dyn OcrBackend>>, drop_confidence: f32) -> Self {
        Self {
            engines,
            drop_confidence,
        }
    }
}

impl OcrBackend for EnsembleBackend {
    fn kind(&self) -> OcrEngineKind {
        OcrEngineKind::Ensemble
    }

    fn is_available(&self) -> bool {
        self.engines.iter().any(|e| e.is_available())
    }

    fn availability_hint(&self) -> String {
        let hints: Vec<String> = self
            .engines
            .iter()
            .filter(|e| !e.is_available())
            .map(|e| format!("{}: {}", e.kind(), e.availability_hint()))
            .collect();
        if hints.is_empty() {
            "all ensemble engines available".to_string()
        } else {
            hints.join("; ")
        }
    }

    fn extract(
        &self,
        image: &DynamicImage,
        languages: &[String],
    ) -> Result<OcrPageResult, OcrError> {
        let mut merged: Vec<WordBox> = Vec::new();
        let mut ran_any = false;

        for engine in self.engines.iter().filter(|e| e.is_available()) {
            match engine.extract(image, languages) {
                Ok(result) => {
                    ran_any = true;
                    merge_into(&mut merged, result.word_boxes);
                }
                Err(e) => {
                    tracing::warn!("ensemble engine {} failed: {}", engine.kind(), e);
                }
            }
        }

        if !ran_any {
            return Err(OcrError::BackendNotAvailable(self.availability_hint()));
        }

        merged.retain(|b| b.confidence >= self.drop_confidence);
        Ok(OcrPageResult::from_word_boxes(
            merged,
            &OcrEngineKind::Ensemble,
        ))
    }
}

/// Merge a new engine's boxes into the accumulated set.
fn merge_into(merged: &mut Vec<WordBox>, incoming: Vec<WordBox>) {
    for word in incoming {
        let candidate = merged.iter_mut().find(|existing| {
            existing.bbox().iou(&word.bbox()) >= MERGE_IOU
                && texts_agree(&existing.text, &word.text)
        });
        match candidate {
            Some(existing) => *existing = merge_pair(existing, &word),
            None => merged.push(word),
        }
    }
}

/// Case-insensitive agreement within edit distance 1.
fn texts_agree(a: &str, b: &str) -> bool {
    edit_distance(&a.to_lowercase(), &b.to_lowercase()) <= 1
}

/// Keep the higher confidence and the longer text.
fn merge_pair(a: &WordBox, b: &WordBox) -> WordBox {
    let text = if b.text.chars().count() > a.text.chars().count() {
        b.text.clone()
    } else {
        a.text.clone()
    };
    let (base, confidence) = if b.confidence > a.confidence {
        (b, b.confidence)
    } else {
        (a, a.confidence)
    };
    WordBox {
        text,
        x: base.x,
        y: base.y,
        width: base.width,
        height: base.height,
        confidence,
    }
}

/// Levenshtein distance over chars.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, x: f32, conf: f32) -> WordBox {
        WordBox {
            text: text.into(),
            x,
            y: 0.0,
            width: 50.0,
            height: 10.0,
            confidence: conf,
        }
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("clinton", "clinton"), 0);
        assert_eq!(edit_distance("clinton", "clincton"), 1);
        assert_eq!(edit_distance("log", "dog"), 1);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("flight", "fight"), 1);
    }

    #[test]
    fn test_merge_agreeing_boxes_keeps_best() {
        let mut merged = vec![word("flight", 0.0, 0.7)];
        merge_into(&mut merged, vec![word("flight", 2.0, 0.9)]);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].confidence - 0.9).abs() < 1e-6);
        // Both are six chars; the original text wins the tie.
        assert_eq!(merged[0].text, "flight");
    }

    #[test]
    fn test_merge_keeps_longer_text() {
        let mut merged = vec![word("fligh", 0.0, 0.9)];
        merge_into(&mut merged, vec![word("flight", 1.0, 0.6)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "flight");
        assert!((merged[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_disjoint_boxes_pass_through() {
        let mut merged = vec![word("alpha", 0.0, 0.8)];
        merge_into(&mut merged, vec![word("beta", 500.0, 0.8)]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_different_text_same_place_not_merged() {
        let mut merged = vec![word("cat", 0.0, 0.8)];
        merge_into(&mut merged, vec![word("house", 1.0, 0.8)]);
        assert_eq!(merged.len(), 2);
    }
}
