//! The guarded question-answering pipeline.
//!
//! [`ChatService::ask`] runs one request end to end:
//!
//! ```text
//! validate ─▶ rate limit ─▶ content screen ─▶ political flag
//!     ─▶ retrieve ─▶ build context ─▶ synthesize ─▶ redact sources
//!     ─▶ audit (background) ─▶ analytics
//! ```
//!
//! Validation and safety failures return early as [`RetrievalError`]s and
//! never reach the retriever. A retrieval that failed because the
//! embedding provider or store is down is surfaced as a retryable error
//! (503 over HTTP). A failed synthesis degrades to a canned answer.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use askbot_core::context::build_context;
use askbot_core::error::RetrievalError;
use askbot_core::models::{RetrievalResult, RetrievalStatus, SourceRef};
use askbot_core::retrieval::{validate_k, Retriever};
use askbot_core::safety::{Identity, SafetyGate};

use crate::analytics::Analytics;
use crate::audit::{spawn_record, AuditRecord, AuditSink};
use crate::synthesizer::{user_prompt, AnswerSynthesizer, SYSTEM_PROMPT};

pub const NO_RESULTS_ANSWER: &str = "No relevant information found for your query.";
pub const SYNTHESIS_FAILED_ANSWER: &str =
    "Sorry, I encountered an error while generating the response. Please try again.";
pub const UNAVAILABLE_ANSWER: &str =
    "AI Assistant is temporarily unavailable. Please try again later.";

/// Request-independent knobs for [`ChatService`].
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub default_k: i64,
    pub max_k: i64,
    pub snippet_chars: usize,
    /// Ceiling on retrieval plus synthesis.
    pub pipeline_timeout: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            default_k: 5,
            max_k: 20,
            snippet_chars: 200,
            pipeline_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMeta {
    pub is_political: bool,
    pub response_time_ms: f64,
}

/// Response envelope of `POST /api/chat/query`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub meta: ChatMeta,
    pub redacted_sources: bool,
}

/// An answer plus the infrastructure failure behind an `error` status.
#[derive(Debug, Clone)]
pub struct Answer {
    pub result: RetrievalResult,
    pub failure: Option<RetrievalError>,
}

pub struct ChatService {
    retriever: Arc<Retriever>,
    gate: Arc<SafetyGate>,
    synthesizer: Arc<dyn AnswerSynthesizer>,
    audit: Option<Arc<dyn AuditSink>>,
    analytics: Arc<Analytics>,
    settings: ChatSettings,
}

impl ChatService {
    pub fn new(
        retriever: Arc<Retriever>,
        gate: Arc<SafetyGate>,
        synthesizer: Arc<dyn AnswerSynthesizer>,
        audit: Option<Arc<dyn AuditSink>>,
        analytics: Arc<Analytics>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            retriever,
            gate,
            synthesizer,
            audit,
            analytics,
            settings,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn analytics(&self) -> &Analytics {
        &self.analytics
    }

    /// Run the full gated pipeline for one caller.
    pub async fn ask(
        &self,
        identity: &Identity,
        query: &str,
        k: Option<i64>,
    ) -> Result<ChatResponse, RetrievalError> {
        let start = Instant::now();

        let query = query.trim();
        if query.is_empty() {
            return Err(RetrievalError::InvalidArgument(
                "Query cannot be empty".to_string(),
            ));
        }
        let k = validate_k(k.unwrap_or(self.settings.default_k), self.settings.max_k)?;

        let admission = match self.gate.admit(identity, query) {
            Ok(admission) => admission,
            Err(err) => {
                self.analytics.record_blocked();
                return Err(err);
            }
        };

        let answer = match tokio::time::timeout(self.settings.pipeline_timeout, self.answer(query, k))
            .await
        {
            Ok(answer) => answer?,
            Err(_) => {
                warn!(
                    timeout_secs = self.settings.pipeline_timeout.as_secs(),
                    "retrieval pipeline timed out"
                );
                return Err(RetrievalError::Provider(format!(
                    "retrieval timed out after {}s",
                    self.settings.pipeline_timeout.as_secs()
                )));
            }
        };

        if let Some(failure) = answer.failure {
            if failure.is_retryable() {
                return Err(failure);
            }
        }

        let (sources, redacted_sources) = self.gate.redact(answer.result.sources);
        let response_time_ms = (start.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0;

        if let Some(sink) = &self.audit {
            let (user_id, ip_address) = match identity {
                Identity::User(id) => (Some(id.clone()), None),
                Identity::Anonymous(ip) => (None, Some(ip.clone())),
            };
            spawn_record(
                sink.clone(),
                AuditRecord {
                    user_id,
                    ip_address,
                    query: query.to_string(),
                    answer: answer.result.answer.clone(),
                    sources: sources.clone(),
                    is_political: admission.is_political,
                    response_time_ms,
                    created_at: chrono::Utc::now().timestamp(),
                },
            );
        }

        self.analytics
            .record_answer(query, &sources, response_time_ms);

        info!(
            k,
            sources = sources.len(),
            redacted_sources,
            is_political = admission.is_political,
            response_time_ms,
            "answered query"
        );

        Ok(ChatResponse {
            answer: answer.result.answer,
            sources,
            meta: ChatMeta {
                is_political: admission.is_political,
                response_time_ms,
            },
            redacted_sources,
        })
    }

    /// Retrieve, assemble context and synthesize, without the safety gate.
    ///
    /// Only argument errors are returned as `Err`. Retrieval infrastructure
    /// failures come back as an [`RetrievalStatus::Error`] answer.
    pub async fn answer(&self, query: &str, k: usize) -> Result<Answer, RetrievalError> {
        let retrieval = self.retriever.retrieve(query, k).await?;

        if retrieval.status == RetrievalStatus::Error {
            return Ok(Answer {
                result: RetrievalResult {
                    answer: UNAVAILABLE_ANSWER.to_string(),
                    sources: Vec::new(),
                    status: RetrievalStatus::Error,
                },
                failure: retrieval.failure,
            });
        }

        if retrieval.chunks.is_empty() {
            warn!("no relevant documents found");
            return Ok(Answer {
                result: RetrievalResult {
                    answer: NO_RESULTS_ANSWER.to_string(),
                    sources: Vec::new(),
                    status: RetrievalStatus::NoResults,
                },
                failure: None,
            });
        }

        let context = build_context(&retrieval.chunks);
        info!(
            chunks = retrieval.chunks.len(),
            context_chars = context.len(),
            "built context"
        );

        let answer = match self
            .synthesizer
            .synthesize(SYSTEM_PROMPT, &user_prompt(&context, query))
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, model = self.synthesizer.model_name(), "answer synthesis failed");
                SYNTHESIS_FAILED_ANSWER.to_string()
            }
        };

        let sources = retrieval
            .chunks
            .iter()
            .map(|s| SourceRef::from_scored(s, self.settings.snippet_chars))
            .collect();

        Ok(Answer {
            result: RetrievalResult {
                answer,
                sources,
                status: RetrievalStatus::Success,
            },
            failure: None,
        })
    }
}
