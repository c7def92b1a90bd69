//! Storage abstraction for the retrieval engine.
//!
//! The [`DocumentStore`] trait is the seam between the retriever and the
//! document collection, enabling pluggable backends (SQLite, in-memory,
//! stores with a native vector index).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`capabilities`](DocumentStore::capabilities) | Report native vector search support |
//! | [`vector_search`](DocumentStore::vector_search) | Store-side nearest-neighbour query (fast path) |
//! | [`scan`](DocumentStore::scan) | Batched stream of embedded chunks (slow path) |
//! | [`upsert_chunk`](DocumentStore::upsert_chunk) | Insert or replace a chunk by `id` |
//! | [`status`](DocumentStore::status) | Connectivity and corpus counts |

pub mod candidates;
pub mod memory;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Serialize;

use crate::error::StoreError;
use crate::models::{DocumentChunk, ScoredChunk};

/// What a store can do natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreCapabilities {
    /// The store can answer [`DocumentStore::vector_search`].
    pub vector_index: bool,
}

/// Lexical narrowing applied by [`DocumentStore::scan`].
///
/// Terms are matched as case-insensitive substrings of the chunk text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanFilter {
    All,
    /// Chunks whose text contains at least one term.
    Matching(Vec<String>),
    /// Chunks whose text contains none of the terms.
    Excluding(Vec<String>),
}

impl ScanFilter {
    /// Evaluate the filter against a chunk's text.
    pub fn accepts(&self, text: &str) -> bool {
        match self {
            ScanFilter::All => true,
            ScanFilter::Matching(terms) => {
                let lower = text.to_lowercase();
                terms.iter().any(|t| lower.contains(t.as_str()))
            }
            ScanFilter::Excluding(terms) => {
                let lower = text.to_lowercase();
                !terms.iter().any(|t| lower.contains(t.as_str()))
            }
        }
    }
}

/// Connectivity and corpus summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStatus {
    pub status: String,
    pub total_documents: i64,
    pub documents_with_embeddings: i64,
    pub embedding_dimension: usize,
    pub vector_index: bool,
}

/// Abstract document collection.
///
/// Only chunks with a non-empty embedding are ever returned by
/// [`scan`](DocumentStore::scan) or [`vector_search`](DocumentStore::vector_search).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn capabilities(&self) -> StoreCapabilities;

    /// Native approximate nearest-neighbour search.
    ///
    /// Considers up to `num_candidates` and returns at most `limit`
    /// chunks ranked by descending score. Stores without a vector index
    /// return [`StoreError::Unsupported`].
    async fn vector_search(
        &self,
        query_vec: &[f32],
        num_candidates: usize,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    /// Stream up to `limit` embedded chunks matching `filter`, fetched
    /// from the backend `batch_size` at a time.
    ///
    /// The stream is finite and consumed once. Undecodable records are
    /// yielded as [`StoreError::Malformed`] items; a backend failure is
    /// yielded as a single [`StoreError::Unavailable`] and ends the stream.
    fn scan(
        &self,
        filter: ScanFilter,
        limit: usize,
        batch_size: usize,
    ) -> BoxStream<'_, Result<DocumentChunk, StoreError>>;

    /// Insert or replace a chunk, keyed by its `id`.
    async fn upsert_chunk(&self, chunk: &DocumentChunk) -> Result<(), StoreError>;

    async fn status(&self) -> Result<StoreStatus, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_filter_matching_is_case_insensitive() {
        let f = ScanFilter::Matching(vec!["ballot".to_string(), "poll".to_string()]);
        assert!(f.accepts("Mail-in BALLOT deadlines"));
        assert!(f.accepts("Polling sites open at 6am"));
        assert!(!f.accepts("Candidate addresses"));
    }

    #[test]
    fn test_scan_filter_excluding_is_complement() {
        let terms = vec!["vote".to_string()];
        let m = ScanFilter::Matching(terms.clone());
        let e = ScanFilter::Excluding(terms);
        for text in ["How to vote early", "Bring a photo ID", ""] {
            assert_ne!(m.accepts(text), e.accepts(text), "text: {:?}", text);
        }
        assert!(ScanFilter::All.accepts("anything"));
    }
}
