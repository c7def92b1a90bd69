//! `askbot status`: corpus and audit overview.
//!
//! Prints what the store reports (connectivity, chunk counts, embedding
//! dimension), a per-source breakdown, and the size of the chat audit log.

use anyhow::Result;
use sqlx::Row;

use askbot_core::store::DocumentStore;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

struct SourceCounts {
    source: String,
    chunk_count: i64,
    embedded_count: i64,
}

pub async fn run_status(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = SqliteStore::new(pool.clone());

    let status = store.status().await?;
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    let answered: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_history")
        .fetch_one(&pool)
        .await?;
    let last_answer_ts: Option<i64> = sqlx::query_scalar("SELECT MAX(created_at) FROM chat_history")
        .fetch_one(&pool)
        .await?;

    println!("askbot status");
    println!("=============");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Store:       {}", status.status);
    println!();
    println!("  Chunks:      {}", status.total_documents);
    println!(
        "  Embedded:    {} / {} ({}%)",
        status.documents_with_embeddings,
        status.total_documents,
        if status.total_documents > 0 {
            (status.documents_with_embeddings * 100) / status.total_documents
        } else {
            0
        }
    );
    println!("  Dimension:   {}", status.embedding_dimension);
    println!(
        "  Vector idx:  {}",
        if status.vector_index { "yes" } else { "no (brute force)" }
    );

    let rows = sqlx::query(
        r#"
        SELECT
            source,
            COUNT(*) AS chunk_count,
            SUM(CASE WHEN embedding IS NOT NULL AND length(embedding) > 0 THEN 1 ELSE 0 END)
                AS embedded_count
        FROM chunks
        GROUP BY source
        ORDER BY chunk_count DESC, source
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let sources: Vec<SourceCounts> = rows
        .iter()
        .map(|row| SourceCounts {
            source: row.get("source"),
            chunk_count: row.get("chunk_count"),
            embedded_count: row.get("embedded_count"),
        })
        .collect();

    if !sources.is_empty() {
        println!();
        println!("  By source:");
        println!("  {:<40} {:>8} {:>10}", "SOURCE", "CHUNKS", "EMBEDDED");
        println!("  {}", "-".repeat(60));
        for s in &sources {
            println!(
                "  {:<40} {:>8} {:>10}",
                s.source, s.chunk_count, s.embedded_count
            );
        }
    }

    println!();
    println!(
        "  Answered:    {} (last: {})",
        answered,
        last_answer_ts
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
