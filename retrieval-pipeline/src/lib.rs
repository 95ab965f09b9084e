#![allow(clippy::missing_docs_in_private_items)]

//! Hybrid retrieval over an ingested repository: dense-vector similarity on
//! the summary and code indexes fused with a lexical relevance signal, a
//! filename boost, and per-file deduplication.

pub mod lexical;
pub mod scoring;
pub mod search;

pub use scoring::HybridWeights;
pub use search::{hybrid_search, hybrid_search_with_embedding, CodeElement, SearchResult};
