//! Text processing: normalization and entity extraction.

mod entities;
mod normalizer;

pub use entities::{DetectedEntity, EntityExtractor};
pub use normalizer::normalize;
