//! SQLite-backed [`DocumentStore`] implementation.
//!
//! Scans page through the `chunks` table by primary key (keyset
//! pagination), one `batch_size` query at a time, so a scan never holds
//! more than one page in memory. Lexical filters are pushed down as
//! `instr(lower(text), ?)` predicates.
//!
//! SQLite has no native vector index here, so
//! [`vector_search`](DocumentStore::vector_search) reports
//! [`StoreError::Unsupported`] and the retriever uses brute force.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use askbot_core::embedding::{blob_to_vec, vec_to_blob};
use askbot_core::error::StoreError;
use askbot_core::models::{DocumentChunk, ScoredChunk};
use askbot_core::store::{DocumentStore, ScanFilter, StoreCapabilities, StoreStatus};

/// SQLite implementation of the [`DocumentStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn unavailable(err: sqlx::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

/// Build the page query for `filter`.
///
/// Placeholders, in order: last id (twice), one per filter term, page size.
fn scan_sql(filter: &ScanFilter) -> (String, Vec<String>) {
    let (clause, terms) = match filter {
        ScanFilter::All => (String::new(), Vec::new()),
        ScanFilter::Matching(terms) | ScanFilter::Excluding(terms) => {
            let any = vec!["instr(lower(text), ?) > 0"; terms.len()].join(" OR ");
            let clause = if terms.is_empty() {
                String::new()
            } else if matches!(filter, ScanFilter::Matching(_)) {
                format!(" AND ({})", any)
            } else {
                format!(" AND NOT ({})", any)
            };
            (clause, terms.iter().map(|t| t.to_lowercase()).collect())
        }
    };
    let sql = format!(
        "SELECT id, source, text, embedding, chunk_index, total_chunks FROM chunks \
         WHERE embedding IS NOT NULL AND length(embedding) > 0 \
         AND (? IS NULL OR id > ?){} ORDER BY id LIMIT ?",
        clause
    );
    (sql, terms)
}

fn decode_row(row: &SqliteRow) -> Result<DocumentChunk, StoreError> {
    let id: String = row.try_get("id").map_err(|e| StoreError::Malformed {
        id: "<unknown>".to_string(),
        reason: e.to_string(),
    })?;
    let malformed = |reason: String| StoreError::Malformed {
        id: id.clone(),
        reason,
    };

    let source: String = row.try_get("source").map_err(|e| malformed(e.to_string()))?;
    let text: String = row.try_get("text").map_err(|e| malformed(e.to_string()))?;
    let blob: Vec<u8> = row
        .try_get("embedding")
        .map_err(|e| malformed(e.to_string()))?;
    let embedding = blob_to_vec(&blob)
        .ok_or_else(|| malformed(format!("embedding blob length {}", blob.len())))?;
    let chunk_index: i64 = row
        .try_get("chunk_index")
        .map_err(|e| malformed(e.to_string()))?;
    let total_chunks: i64 = row
        .try_get("total_chunks")
        .map_err(|e| malformed(e.to_string()))?;

    Ok(DocumentChunk {
        id,
        source,
        text,
        embedding,
        chunk_index,
        total_chunks,
    })
}

struct ScanCursor {
    last_id: Option<String>,
    remaining: usize,
    done: bool,
}

#[async_trait]
impl DocumentStore for SqliteStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            vector_index: false,
        }
    }

    async fn vector_search(
        &self,
        _query_vec: &[f32],
        _num_candidates: usize,
        _limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        Err(StoreError::Unsupported)
    }

    fn scan(
        &self,
        filter: ScanFilter,
        limit: usize,
        batch_size: usize,
    ) -> BoxStream<'_, Result<DocumentChunk, StoreError>> {
        let (sql, terms) = scan_sql(&filter);
        let page = batch_size.max(1);
        let pool = self.pool.clone();
        let start = ScanCursor {
            last_id: None,
            remaining: limit,
            done: false,
        };

        stream::unfold(start, move |cursor| {
            let sql = sql.clone();
            let terms = terms.clone();
            let pool = pool.clone();
            async move {
                if cursor.done || cursor.remaining == 0 {
                    return None;
                }
                let take = page.min(cursor.remaining);

                let mut query = sqlx::query(&sql)
                    .bind(cursor.last_id.clone())
                    .bind(cursor.last_id.clone());
                for term in &terms {
                    query = query.bind(term.as_str());
                }
                let rows = match query.bind(take as i64).fetch_all(&pool).await {
                    Ok(rows) => rows,
                    Err(e) => {
                        let failed = ScanCursor {
                            done: true,
                            ..cursor
                        };
                        return Some((vec![Err(unavailable(e))], failed));
                    }
                };

                let fetched = rows.len();
                if fetched == 0 {
                    return None;
                }
                let last_id = rows
                    .last()
                    .and_then(|r| r.try_get::<String, _>("id").ok())
                    .or(cursor.last_id);
                let items: Vec<Result<DocumentChunk, StoreError>> =
                    rows.iter().map(decode_row).collect();
                let next = ScanCursor {
                    // an undecodable id cannot advance the cursor
                    done: fetched < take || last_id.is_none(),
                    last_id,
                    remaining: cursor.remaining - fetched,
                };
                Some((items, next))
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    async fn upsert_chunk(&self, chunk: &DocumentChunk) -> Result<(), StoreError> {
        let blob = if chunk.embedding.is_empty() {
            None
        } else {
            Some(vec_to_blob(&chunk.embedding))
        };

        sqlx::query(
            r#"
            INSERT INTO chunks (id, source, text, embedding, chunk_index, total_chunks)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                text = excluded.text,
                embedding = excluded.embedding,
                chunk_index = excluded.chunk_index,
                total_chunks = excluded.total_chunks
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.source)
        .bind(&chunk.text)
        .bind(blob)
        .bind(chunk.chunk_index)
        .bind(chunk.total_chunks)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn status(&self) -> Result<StoreStatus, StoreError> {
        let total_documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;

        let documents_with_embeddings: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL AND length(embedding) > 0",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        let blob_len: Option<i64> = sqlx::query_scalar(
            "SELECT length(embedding) FROM chunks \
             WHERE embedding IS NOT NULL AND length(embedding) > 0 LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(StoreStatus {
            status: "connected".to_string(),
            total_documents,
            documents_with_embeddings,
            embedding_dimension: blob_len.map(|n| n as usize / 4).unwrap_or(0),
            vector_index: false,
        })
    }
}
