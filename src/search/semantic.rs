//! Optional semantic search.
//!
//! Gated on an embedder at startup; without one, semantic queries fail
//! with a first-class `capability_disabled` error rather than silently
//! returning nothing.

use crate::error::{Error, Result};

/// Text embedding capability.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
    /// Identifier reported in diagnostics.
    fn model_id(&self) -> &str;
}

/// Cosine similarity of two vectors; 0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Error for semantic requests without a configured embedder.
pub fn capability_disabled() -> Error {
    Error::CapabilityDisabled(
        "semantic search requested but no embedder is configured".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_capability_disabled_kind() {
        assert_eq!(capability_disabled().kind(), "capability_disabled");
    }
}
