//! Top-k retrieval over a [`DocumentStore`].
//!
//! [`Retriever::retrieve`] is the only entry point. For a query and `k` it:
//!
//! 1. Validates the query (non-blank) and `k` (positive).
//! 2. Returns a cached result for the same normalized query and `k` if it
//!    is younger than the cache TTL.
//! 3. Embeds the query through the [`EmbeddingGateway`].
//! 4. **Fast path**: if the store has a native vector index (or the
//!    configuration forces it), asks the store for the `k` nearest chunks
//!    over `min(10k, 1000)` candidates. An error or empty answer is logged
//!    and falls through.
//! 5. **Slow path**: streams candidates from
//!    [`fetch_candidates`], scores them with
//!    [`cosine_similarity`], and keeps a bounded running ranking (sorted
//!    and cut to `5k` whenever it grows past `10k`).
//! 6. Caches non-empty slow-path results.
//!
//! All sorts are stable and descending by score, so ties keep stream order.
//!
//! Infrastructure failures never escape as `Err`: they come back as an
//! empty [`Retrieval`] with [`RetrievalStatus::Error`] and the cause in
//! [`Retrieval::failure`]. Only argument validation returns `Err`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tracing::{debug, error, info, warn};

use crate::embedding::cosine_similarity;
use crate::error::{RetrievalError, StoreError};
use crate::gateway::EmbeddingGateway;
use crate::models::{DocumentChunk, RetrievalStatus, ScoredChunk};
use crate::store::candidates::{fetch_candidates, CandidateOptions};
use crate::store::DocumentStore;

/// Smallest accepted `k` at the request boundary.
pub const MIN_K: i64 = 1;
/// Largest accepted `k` at the request boundary.
pub const MAX_K: i64 = 20;

/// Upper bound on the candidate count passed to a native vector search.
const MAX_NUM_CANDIDATES: usize = 1000;

/// Validate a caller-supplied `k` against `[MIN_K, max_k]`.
///
/// Out-of-range values are rejected, never clamped.
pub fn validate_k(k: i64, max_k: i64) -> Result<usize, RetrievalError> {
    if k < MIN_K || k > max_k {
        return Err(RetrievalError::InvalidArgument(format!(
            "k must be between {} and {}",
            MIN_K, max_k
        )));
    }
    Ok(k as usize)
}

/// When to try the store's native vector search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VectorIndexMode {
    /// Use it if the store reports the capability.
    #[default]
    Auto,
    /// Always try it first (falls back on failure).
    On,
    /// Never use it.
    Off,
}

/// Retriever tuning, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub candidates: CandidateOptions,
    pub vector_index: VectorIndexMode,
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            candidates: CandidateOptions::default(),
            vector_index: VectorIndexMode::Auto,
            cache_capacity: 20,
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Which path produced a [`Retrieval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalPath {
    Cache,
    VectorIndex,
    BruteForce,
    /// Retrieval failed before any path completed.
    Failed,
}

/// Outcome of one [`Retriever::retrieve`] call.
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// At most `k` chunks, descending by score.
    pub chunks: Vec<ScoredChunk>,
    pub status: RetrievalStatus,
    pub path: RetrievalPath,
    /// Set when `status` is [`RetrievalStatus::Error`].
    pub failure: Option<RetrievalError>,
}

impl Retrieval {
    fn found(chunks: Vec<ScoredChunk>, path: RetrievalPath) -> Self {
        let status = if chunks.is_empty() {
            RetrievalStatus::NoResults
        } else {
            RetrievalStatus::Success
        };
        Self {
            chunks,
            status,
            path,
            failure: None,
        }
    }

    fn failed(failure: RetrievalError) -> Self {
        Self {
            chunks: Vec::new(),
            status: RetrievalStatus::Error,
            path: RetrievalPath::Failed,
            failure: Some(failure),
        }
    }
}

type CacheKey = (String, usize);

/// Bounded, TTL-expiring cache of slow-path results.
///
/// Keys are the trimmed, lowercased query plus `k`. When an insert would
/// exceed capacity, the oldest entry is evicted. Expired entries are
/// dropped when looked up.
pub struct QueryCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, (Vec<ScoredChunk>, Instant)>>,
}

impl QueryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(query: &str, k: usize) -> CacheKey {
        (query.trim().to_lowercase(), k)
    }

    pub fn get(&self, query: &str, k: usize) -> Option<Vec<ScoredChunk>> {
        self.get_at(query, k, Instant::now())
    }

    /// Look up `(query, k)` as of `now`.
    pub fn get_at(&self, query: &str, k: usize, now: Instant) -> Option<Vec<ScoredChunk>> {
        let key = Self::key(query, k);
        let mut entries = self.lock();
        match entries.get(&key) {
            Some((chunks, inserted)) if now.saturating_duration_since(*inserted) < self.ttl => {
                Some(chunks.clone())
            }
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, query: &str, k: usize, chunks: Vec<ScoredChunk>) {
        self.insert_at(query, k, chunks, Instant::now());
    }

    pub fn insert_at(&self, query: &str, k: usize, chunks: Vec<ScoredChunk>, now: Instant) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.lock();
        entries.insert(Self::key(query, k), (chunks, now));
        while entries.len() > self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, (_, inserted))| *inserted)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, (Vec<ScoredChunk>, Instant)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Orchestrates gateway, store and scorer into top-k retrieval.
pub struct Retriever {
    store: Arc<dyn DocumentStore>,
    gateway: Arc<EmbeddingGateway>,
    params: RetrievalParams,
    cache: QueryCache,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        gateway: Arc<EmbeddingGateway>,
        params: RetrievalParams,
    ) -> Self {
        let cache = QueryCache::new(params.cache_capacity, params.cache_ttl);
        Self {
            store,
            gateway,
            params,
            cache,
        }
    }

    pub fn gateway(&self) -> &EmbeddingGateway {
        &self.gateway
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Retrieve the `k` chunks most similar to `query`.
    ///
    /// # Errors
    ///
    /// [`RetrievalError::InvalidArgument`] for a blank query or `k == 0`.
    /// Every other failure is reported through [`Retrieval::status`].
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Retrieval, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidArgument(
                "Query cannot be empty".to_string(),
            ));
        }
        if k == 0 {
            return Err(RetrievalError::InvalidArgument(
                "k must be positive".to_string(),
            ));
        }

        if let Some(cached) = self.cache.get(query, k) {
            info!(k, "returning cached retrieval");
            return Ok(Retrieval::found(cached, RetrievalPath::Cache));
        }

        let query_vec = match self.gateway.embed(query).await {
            Ok(v) => v,
            Err(err) => {
                error!(error = %err, "query embedding failed");
                return Ok(Retrieval::failed(err.into()));
            }
        };

        info!(k, query = %preview(query), "searching for top-k chunks");

        if self.use_vector_index() {
            let num_candidates = (k * 10).min(MAX_NUM_CANDIDATES);
            match self.store.vector_search(&query_vec, num_candidates, k).await {
                Ok(hits) if !hits.is_empty() => {
                    let chunks = rank(hits, k);
                    info!(count = chunks.len(), "vector index search returned results");
                    return Ok(Retrieval::found(chunks, RetrievalPath::VectorIndex));
                }
                Ok(_) => {
                    info!("vector index search returned nothing, falling back to brute force")
                }
                Err(err) => {
                    warn!(error = %err, "vector index search failed, falling back to brute force")
                }
            }
        }

        match self.brute_force(query, &query_vec, k).await {
            Ok(chunks) => {
                if !chunks.is_empty() {
                    self.cache.insert(query, k, chunks.clone());
                }
                Ok(Retrieval::found(chunks, RetrievalPath::BruteForce))
            }
            Err(err) => {
                error!(error = %err, "brute-force retrieval failed");
                Ok(Retrieval::failed(err.into()))
            }
        }
    }

    fn use_vector_index(&self) -> bool {
        match self.params.vector_index {
            VectorIndexMode::Auto => self.store.capabilities().vector_index,
            VectorIndexMode::On => true,
            VectorIndexMode::Off => false,
        }
    }

    async fn brute_force(
        &self,
        query: &str,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let opts = &self.params.candidates;
        let batch_size = opts.batch_size.max(1);
        let mut batches = fetch_candidates(self.store.as_ref(), query, opts).chunks(batch_size);

        let mut ranked: Vec<ScoredChunk> = Vec::new();
        let mut processed = 0usize;
        let mut skipped = 0usize;

        'stream: while let Some(batch) = batches.next().await {
            for item in batch {
                match item {
                    Ok(chunk) => {
                        processed += 1;
                        match score_chunk(query_vec, chunk) {
                            Some(scored) => ranked.push(scored),
                            None => skipped += 1,
                        }
                    }
                    Err(StoreError::Malformed { id, reason }) => {
                        warn!(id = %id, reason = %reason, "skipping malformed document");
                        skipped += 1;
                    }
                    Err(err) => {
                        if processed == 0 {
                            return Err(err);
                        }
                        warn!(error = %err, processed, "candidate stream failed, ranking partial results");
                        break 'stream;
                    }
                }
            }

            if ranked.len() > k * 10 {
                ranked = rank(ranked, k * 5);
            }
            if processed > 0 && processed % 500 < batch_size {
                debug!(processed, "scored candidate documents");
            }
            if processed >= opts.max_docs {
                break;
            }
        }

        let results = rank(ranked, k);
        info!(
            processed,
            skipped,
            returned = results.len(),
            "brute-force search complete"
        );
        Ok(results)
    }
}

/// Score one candidate; dimension mismatches are skipped, not scored.
fn score_chunk(query_vec: &[f32], chunk: DocumentChunk) -> Option<ScoredChunk> {
    if chunk.embedding.len() != query_vec.len() {
        debug!(
            id = %chunk.id,
            expected = query_vec.len(),
            actual = chunk.embedding.len(),
            "skipping chunk with mismatched embedding dimension"
        );
        return None;
    }
    let score = cosine_similarity(query_vec, &chunk.embedding);
    Some(ScoredChunk { chunk, score })
}

/// Stable descending sort by score, truncated to `limit`.
pub fn rank(mut scored: Vec<ScoredChunk>, limit: usize) -> Vec<ScoredChunk> {
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(limit);
    scored
}

/// Short, char-safe query preview for logs.
fn preview(query: &str) -> String {
    query.chars().take(50).collect()
}
