//! In-memory [`DocumentStore`] implementation for testing and embedding
//! in other hosts.
//!
//! Chunks live in a `Vec` behind `std::sync::RwLock`, in insertion order
//! (upserts keep the original position). Scans snapshot the matching
//! chunks at call time. Vector search is brute-force cosine similarity and
//! is only offered when the store is built with
//! [`with_vector_index`](InMemoryStore::with_vector_index), which lets
//! tests exercise both retrieval paths.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};

use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::models::{DocumentChunk, ScoredChunk};

use super::{DocumentStore, ScanFilter, StoreCapabilities, StoreStatus};

/// In-memory store for tests and single-process deployments.
pub struct InMemoryStore {
    chunks: RwLock<Vec<DocumentChunk>>,
    vector_index: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            vector_index: false,
        }
    }

    /// A store that answers [`DocumentStore::vector_search`].
    pub fn with_vector_index() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            vector_index: true,
        }
    }

    /// Build a store pre-loaded with `chunks`.
    pub fn from_chunks(chunks: Vec<DocumentChunk>) -> Self {
        Self {
            chunks: RwLock::new(chunks),
            vector_index: false,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            vector_index: self.vector_index,
        }
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        num_candidates: usize,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        if !self.vector_index {
            return Err(StoreError::Unsupported);
        }
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let mut scored: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|c| !c.embedding.is_empty() && c.embedding.len() == query_vec.len())
            .take(num_candidates)
            .map(|c| ScoredChunk {
                score: cosine_similarity(query_vec, &c.embedding),
                chunk: c.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }

    fn scan(
        &self,
        filter: ScanFilter,
        limit: usize,
        _batch_size: usize,
    ) -> BoxStream<'_, Result<DocumentChunk, StoreError>> {
        let snapshot: Vec<Result<DocumentChunk, StoreError>> = self
            .chunks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| !c.embedding.is_empty() && filter.accepts(&c.text))
            .take(limit)
            .cloned()
            .map(Ok)
            .collect();
        stream::iter(snapshot).boxed()
    }

    async fn upsert_chunk(&self, chunk: &DocumentChunk) -> Result<(), StoreError> {
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        match chunks.iter_mut().find(|c| c.id == chunk.id) {
            Some(existing) => *existing = chunk.clone(),
            None => chunks.push(chunk.clone()),
        }
        Ok(())
    }

    async fn status(&self) -> Result<StoreStatus, StoreError> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let embedded: Vec<&DocumentChunk> =
            chunks.iter().filter(|c| !c.embedding.is_empty()).collect();
        Ok(StoreStatus {
            status: "connected".to_string(),
            total_documents: chunks.len() as i64,
            documents_with_embeddings: embedded.len() as i64,
            embedding_dimension: embedded.first().map(|c| c.embedding.len()).unwrap_or(0),
            vector_index: self.vector_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str, embedding: Vec<f32>) -> DocumentChunk {
        DocumentChunk {
            id: id.to_string(),
            source: format!("{}.json", id),
            text: text.to_string(),
            embedding,
            chunk_index: 0,
            total_chunks: 1,
        }
    }

    async fn collect(store: &InMemoryStore, filter: ScanFilter, limit: usize) -> Vec<String> {
        store
            .scan(filter, limit, 150)
            .map(|r| r.unwrap().id)
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_scan_skips_unembedded() {
        let store = InMemoryStore::from_chunks(vec![
            chunk("a", "alpha", vec![1.0]),
            chunk("b", "beta", vec![]),
            chunk("c", "gamma", vec![0.5]),
        ]);
        assert_eq!(collect(&store, ScanFilter::All, 10).await, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_scan_respects_limit_and_filter() {
        let store = InMemoryStore::from_chunks(vec![
            chunk("a", "ballot drop box", vec![1.0]),
            chunk("b", "photo id rules", vec![1.0]),
            chunk("c", "ballot tracking", vec![1.0]),
        ]);
        let matching = ScanFilter::Matching(vec!["ballot".to_string()]);
        assert_eq!(collect(&store, matching, 1).await, vec!["a"]);
        let excluding = ScanFilter::Excluding(vec!["ballot".to_string()]);
        assert_eq!(collect(&store, excluding, 10).await, vec!["b"]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_in_place() {
        let store = InMemoryStore::new();
        store.upsert_chunk(&chunk("a", "v1", vec![1.0])).await.unwrap();
        store.upsert_chunk(&chunk("b", "other", vec![1.0])).await.unwrap();
        store.upsert_chunk(&chunk("a", "v2", vec![1.0])).await.unwrap();
        assert_eq!(store.len(), 2);
        let first = store.scan(ScanFilter::All, 10, 10).next().await.unwrap().unwrap();
        assert_eq!(first.id, "a");
        assert_eq!(first.text, "v2");
    }

    #[tokio::test]
    async fn test_vector_search_requires_index() {
        let plain = InMemoryStore::new();
        assert_eq!(
            plain.vector_search(&[1.0], 10, 1).await,
            Err(StoreError::Unsupported)
        );

        let indexed = InMemoryStore::with_vector_index();
        indexed.upsert_chunk(&chunk("x", "x", vec![0.0, 1.0])).await.unwrap();
        indexed.upsert_chunk(&chunk("y", "y", vec![1.0, 0.0])).await.unwrap();
        let hits = indexed.vector_search(&[1.0, 0.0], 10, 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "y");
    }

    #[tokio::test]
    async fn test_status_counts() {
        let store = InMemoryStore::from_chunks(vec![
            chunk("a", "alpha", vec![1.0, 2.0, 3.0]),
            chunk("b", "beta", vec![]),
        ]);
        let status = store.status().await.unwrap();
        assert_eq!(status.total_documents, 2);
        assert_eq!(status.documents_with_embeddings, 1);
        assert_eq!(status.embedding_dimension, 3);
        assert!(!status.vector_index);
    }
}
