//! Chat audit trail.
//!
//! Every answered query is written to `chat_history`. Writes are
//! fire-and-forget: [`spawn_record`] hands the record to a background task
//! and a failure is only logged, never surfaced to the caller.
//!
//! [`SqliteAuditLog`] also serves a user's own history back to them:
//! paged or most-recent listing, single-entry delete and clear. Every
//! history query is scoped to one `user_id`.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::warn;

use askbot_core::models::SourceRef;

/// One answered query.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub user_id: Option<String>,
    /// Set only for anonymous callers.
    pub ip_address: Option<String>,
    pub query: String,
    pub answer: String,
    /// Citations after redaction.
    pub sources: Vec<SourceRef>,
    pub is_political: bool,
    pub response_time_ms: f64,
    /// Unix seconds.
    pub created_at: i64,
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<()>;
}

/// Writes audit records to the `chat_history` table.
pub struct SqliteAuditLog {
    pool: SqlitePool,
}

impl SqliteAuditLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// List `user_id`'s history, newest first.
    pub async fn list(&self, user_id: &str, window: HistoryWindow) -> Result<HistoryPage> {
        match window {
            HistoryWindow::Recent(limit) => {
                let rows = sqlx::query(&format!("{} LIMIT ?", HISTORY_SELECT))
                    .bind(user_id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?;
                let history: Vec<HistoryEntry> = rows.iter().map(entry_from_row).collect();
                let len = history.len() as i64;
                Ok(HistoryPage {
                    history,
                    total: len,
                    page: 1,
                    per_page: len,
                    pages: 1,
                })
            }
            HistoryWindow::Page { page, per_page } => {
                let total: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM chat_history WHERE user_id = ?")
                        .bind(user_id)
                        .fetch_one(&self.pool)
                        .await?;
                let rows = sqlx::query(&format!("{} LIMIT ? OFFSET ?", HISTORY_SELECT))
                    .bind(user_id)
                    .bind(per_page)
                    .bind((page - 1) * per_page)
                    .fetch_all(&self.pool)
                    .await?;
                Ok(HistoryPage {
                    history: rows.iter().map(entry_from_row).collect(),
                    total,
                    page,
                    per_page,
                    pages: (total + per_page - 1) / per_page,
                })
            }
        }
    }

    /// Delete one entry. Returns `false` when no entry `id` belongs to
    /// `user_id`, including when it exists under another user.
    pub async fn delete(&self, user_id: &str, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chat_history WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete all of `user_id`'s entries and return how many were removed.
    pub async fn clear(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chat_history WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

const HISTORY_SELECT: &str = "SELECT id, user_id, query, answer, sources_json, is_political, \
     response_time_ms, created_at FROM chat_history WHERE user_id = ? \
     ORDER BY created_at DESC, id DESC";

const DEFAULT_PER_PAGE: i64 = 20;
const MAX_PER_PAGE: i64 = 100;
const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 1000;

/// Which slice of a user's history to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryWindow {
    /// 1-based page of `per_page` entries.
    Page { page: i64, per_page: i64 },
    /// The newest `n` entries as a single page.
    Recent(i64),
}

impl HistoryWindow {
    /// Resolve raw query parameters. Out-of-range values fall back to
    /// defaults instead of failing: page below 1 becomes 1, `per_page`
    /// outside 1..=100 becomes 20 and `limit` outside 1..=1000 becomes 50.
    /// A `limit` of 0 or none selects paging.
    pub fn from_params(page: Option<i64>, per_page: Option<i64>, limit: Option<i64>) -> Self {
        match limit {
            Some(n) if n != 0 => {
                Self::Recent(if (1..=MAX_LIMIT).contains(&n) { n } else { DEFAULT_LIMIT })
            }
            _ => {
                let page = page.unwrap_or(1).max(1);
                let per_page = match per_page {
                    Some(n) if (1..=MAX_PER_PAGE).contains(&n) => n,
                    _ => DEFAULT_PER_PAGE,
                };
                Self::Page { page, per_page }
            }
        }
    }
}

/// One stored answer as returned to its owner.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub user_id: Option<String>,
    pub query: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub is_political: bool,
    pub response_time_ms: f64,
    /// RFC 3339, UTC.
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub history: Vec<HistoryEntry>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub pages: i64,
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> HistoryEntry {
    let sources_json: String = row.get("sources_json");
    let created_at: i64 = row.get("created_at");
    HistoryEntry {
        id: row.get("id"),
        user_id: row.get("user_id"),
        query: row.get("query"),
        answer: row.get("answer"),
        // an unreadable citation list should not hide the answer
        sources: serde_json::from_str(&sources_json).unwrap_or_default(),
        is_political: row.get("is_political"),
        response_time_ms: row.get("response_time_ms"),
        created_at: format_created_at(created_at),
    }
}

fn format_created_at(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

#[async_trait]
impl AuditSink for SqliteAuditLog {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        let sources_json = serde_json::to_string(&record.sources)?;
        sqlx::query(
            r#"
            INSERT INTO chat_history (user_id, ip_address, query, answer, sources_json,
                                      is_political, response_time_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.ip_address)
        .bind(&record.query)
        .bind(&record.answer)
        .bind(&sources_json)
        .bind(record.is_political)
        .bind(record.response_time_ms)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Write `record` in the background. Errors are logged and dropped.
pub fn spawn_record(
    sink: Arc<dyn AuditSink>,
    record: AuditRecord,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = sink.record(&record).await {
            warn!(error = %e, "failed to save chat history");
        }
    })
}
