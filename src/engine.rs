//! Process-wide wiring.
//!
//! [`Engine::from_config`] opens the database and builds every shared
//! component exactly once. The HTTP server and the CLI both run on top of
//! the same [`Engine`].

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use askbot_core::gateway::EmbeddingGateway;
use askbot_core::retrieval::Retriever;
use askbot_core::safety::SafetyGate;
use askbot_core::store::DocumentStore;

use crate::analytics::Analytics;
use crate::audit::{AuditSink, SqliteAuditLog};
use crate::chat::{ChatService, ChatSettings};
use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::migrate;
use crate::sqlite_store::SqliteStore;
use crate::synthesizer::{create_synthesizer, AnswerSynthesizer};

/// Everything a request handler needs.
#[derive(Clone)]
pub struct Engine {
    pub store: Arc<dyn DocumentStore>,
    pub chat: Arc<ChatService>,
    pub history: Option<Arc<SqliteAuditLog>>,
    /// Whether `x-user-id` identifies the caller.
    pub trust_user_header: bool,
}

impl Engine {
    /// Connect to SQLite, ensure the schema, and build all components.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool)
            .await
            .context("Failed to apply database migrations")?;

        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::new(pool.clone()));
        let history = Arc::new(SqliteAuditLog::new(pool));
        let provider = create_provider(&config.embedding)?;
        let synthesizer = create_synthesizer(&config.synthesizer)?;

        info!(
            embedding = provider.model_name(),
            synthesizer = synthesizer.model_name(),
            db = %config.db.path.display(),
            "engine initialized"
        );

        let gateway = Arc::new(EmbeddingGateway::new(
            provider,
            config.embedding.cache_capacity,
        ));
        Self::assemble(config, store, gateway, synthesizer, Some(history))
    }

    /// Build an engine around caller-supplied collaborators.
    ///
    /// `history` receives the audit trail and serves the history endpoints.
    /// Without it answers are not persisted and history is unavailable.
    pub fn assemble(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        gateway: Arc<EmbeddingGateway>,
        synthesizer: Arc<dyn AnswerSynthesizer>,
        history: Option<Arc<SqliteAuditLog>>,
    ) -> Result<Self> {
        let retriever = Arc::new(Retriever::new(
            store.clone(),
            gateway,
            config.retrieval.params()?,
        ));
        let gate = Arc::new(
            SafetyGate::new(config.safety.limits()).context("Failed to compile safety patterns")?,
        );
        let settings = ChatSettings {
            default_k: config.retrieval.default_k,
            max_k: config.retrieval.max_k,
            snippet_chars: config.retrieval.snippet_chars,
            pipeline_timeout: Duration::from_secs(config.server.request_timeout_secs),
        };
        let audit = history
            .clone()
            .map(|log| log as Arc<dyn AuditSink>);
        let chat = Arc::new(ChatService::new(
            retriever,
            gate,
            synthesizer,
            audit,
            Arc::new(Analytics::new()),
            settings,
        ));
        Ok(Self {
            store,
            chat,
            history,
            trust_user_header: config.server.trust_user_header,
        })
    }
}
