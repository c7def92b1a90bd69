//! Memoizing embedding gateway.
//!
//! [`EmbeddingGateway`] wraps an [`EmbeddingProvider`] with a bounded,
//! exact-text memo. Input is trimmed before both the memo lookup and the
//! provider call, so `"  vote  "` and `"vote"` share one entry. Entries are
//! evicted in insertion order once the capacity is reached.
//!
//! The gateway counts the provider calls it actually makes, which is how
//! tests (and the `/status` endpoint) observe memo and query-cache hits.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::error::GatewayError;

struct EmbeddingMemo {
    capacity: usize,
    vectors: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

impl EmbeddingMemo {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            vectors: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, text: &str) -> Option<Vec<f32>> {
        self.vectors.get(text).cloned()
    }

    fn insert(&mut self, text: String, vector: Vec<f32>) {
        if self.capacity == 0 {
            return;
        }
        if self.vectors.contains_key(&text) {
            self.vectors.insert(text, vector);
            return;
        }
        while self.vectors.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.vectors.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(text.clone());
        self.vectors.insert(text, vector);
    }

    fn clear(&mut self) {
        self.vectors.clear();
        self.order.clear();
    }
}

/// Embeds query text through a provider, memoizing by exact trimmed text.
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    memo: Mutex<EmbeddingMemo>,
    provider_calls: AtomicU64,
}

impl EmbeddingGateway {
    /// Create a gateway holding at most `capacity` memoized vectors.
    /// A capacity of zero disables memoization.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        Self {
            provider,
            memo: Mutex::new(EmbeddingMemo::new(capacity)),
            provider_calls: AtomicU64::new(0),
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed `text`, consulting the memo first.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::EmptyInput`] if `text` is blank after trimming.
    /// - [`GatewayError::Provider`] if the provider call fails. Failures
    ///   are not memoized and are not retried.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        let normalized = text.trim();
        if normalized.is_empty() {
            return Err(GatewayError::EmptyInput);
        }

        let cached = self.lock_memo().get(normalized);
        if let Some(hit) = cached {
            debug!(model = self.model_name(), "embedding memo hit");
            return Ok(hit);
        }

        self.provider_calls.fetch_add(1, Ordering::Relaxed);
        let vector = self.provider.embed(normalized).await?;

        self.lock_memo()
            .insert(normalized.to_string(), vector.clone());
        Ok(vector)
    }

    /// Number of upstream provider calls made so far.
    pub fn provider_calls(&self) -> u64 {
        self.provider_calls.load(Ordering::Relaxed)
    }

    /// Number of vectors currently memoized.
    pub fn memo_len(&self) -> usize {
        self.lock_memo().vectors.len()
    }

    /// Drop every memoized vector.
    pub fn clear(&self) {
        self.lock_memo().clear();
    }

    fn lock_memo(&self) -> std::sync::MutexGuard<'_, EmbeddingMemo> {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
