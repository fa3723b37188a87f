//! lifelog-hybrid
//!
//! Keyword + vector retrieval fused with Reciprocal Rank Fusion. The keyword
//! side is a small BM25 index built from the documents the vector index
//! already stores; the vector side is delegated to the `VectorIndex`
//! collaborator. Scores from the two sides are never compared directly.

pub mod bm25;
pub mod ranker;
pub mod rrf;

pub use ranker::{HybridRanker, HybridResult, HybridSearchOptions, HybridStats};
