//! Search index construction and the multi-modal search engine.

mod engine;
mod indexer;
mod semantic;

pub use engine::{SearchEngine, SearchHit, SearchMode, SearchOptions};
pub use indexer::{build_record, query_tokens, searchable_text, tokenize};
pub use semantic::{cosine_similarity, Embedder};
