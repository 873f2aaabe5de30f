//! SQLite-backed [`Store`] implementation.
//!
//! Documents, pages and the chunk index live in the tables created by
//! [`migrate`](crate::migrate). An index write runs in one transaction, so
//! a concurrent search sees either none or all of a document's new chunks.
//! Keyword and vector search load candidate rows and score them in process
//! with the same functions as the in-memory store.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use docgate_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use docgate_core::lexical::{self, LexicalFields};
use docgate_core::models::{
    now_millis, Chunk, Document, DocumentStatus, ExtractionResult, GateState, Page,
    QualitySignal, ReviewItem, StatusEvent, Tags, TriggerEvent,
};
use docgate_core::store::{
    validate_index_write, ChunkCandidate, IndexInfo, ReconcilePolicy, ReconcileReport,
    SearchFilter, Store,
};

/// SQLite implementation of the [`Store`] trait.
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

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp in database: {}", s))?
        .with_timezone(&Utc))
}

fn parse_gate_state(s: &str) -> Result<GateState> {
    Ok(match s {
        "pending" => GateState::Pending,
        "accepted" => GateState::Accepted,
        "enhancing" => GateState::Enhancing,
        "review_required" => GateState::ReviewRequired,
        "rejected" => GateState::Rejected,
        other => bail!("unknown gate state in database: {}", other),
    })
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    let route: Option<String> = row.get("route");
    let tags_json: String = row.get("tags_json");
    let size_bytes: i64 = row.get("size_bytes");

    Ok(Document {
        id: row.get("id"),
        source: row.get("source"),
        filename: row.get("filename"),
        declared_mime: row.get("declared_mime"),
        detected_mime: row.get("detected_mime"),
        size_bytes: size_bytes as u64,
        checksum: row.get("checksum"),
        status: status.parse()?,
        route: route.map(|r| r.parse()).transpose()?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let page_start: i64 = row.get("page_start");
    let page_end: i64 = row.get("page_end");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        ordinal: row.get("ordinal"),
        text: row.get("text"),
        hash: row.get("hash"),
        page_start: page_start as u32,
        page_end: page_end as u32,
        language: row.get("language"),
        created_at: row.get("created_at"),
    }
}

fn row_to_candidate(row: &SqliteRow, raw_score: f64) -> ChunkCandidate {
    ChunkCandidate {
        chunk_id: row.get("id"),
        document_id: row.get("document_id"),
        raw_score,
        text: row.get("text"),
        created_at: row.get("created_at"),
    }
}

/// The document columns a search row carries through its LEFT JOIN.
struct JoinedDoc {
    source: Option<String>,
    filename: Option<String>,
    tags: Tags,
}

impl JoinedDoc {
    fn from_row(row: &SqliteRow) -> Self {
        let tags_json: Option<String> = row.get("tags_json");
        Self {
            source: row.get("doc_source"),
            filename: row.get("filename"),
            tags: tags_json
                .and_then(|t| serde_json::from_str(&t).ok())
                .unwrap_or_default(),
        }
    }

    fn matches(&self, filter: &SearchFilter) -> bool {
        if filter.is_empty() {
            return true;
        }
        let Some(source) = &self.source else {
            return false;
        };
        if filter.source.as_ref().is_some_and(|s| s != source) {
            return false;
        }
        filter
            .tags
            .iter()
            .all(|(k, v)| self.tags.get(k).is_some_and(|dv| dv == v))
    }
}

fn sort_and_truncate(candidates: &mut Vec<ChunkCandidate>, limit: usize) {
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.created_at.cmp(&a.created_at))
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(limit);
}

const SEARCH_COLUMNS: &str = r#"
    c.id, c.document_id, c.text, c.created_at,
    d.source AS doc_source, d.filename, d.tags_json
"#;

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        let tags_json = serde_json::to_string(&doc.tags)?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, source, filename, declared_mime, detected_mime,
                                   size_bytes, checksum, status, route, tags_json,
                                   created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                filename = excluded.filename,
                declared_mime = excluded.declared_mime,
                detected_mime = excluded.detected_mime,
                size_bytes = excluded.size_bytes,
                checksum = excluded.checksum,
                status = excluded.status,
                route = excluded.route,
                tags_json = excluded.tags_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.source)
        .bind(&doc.filename)
        .bind(&doc.declared_mime)
        .bind(&doc.detected_mime)
        .bind(doc.size_bytes as i64)
        .bind(&doc.checksum)
        .bind(doc.status.as_str())
        .bind(doc.route.map(|r| r.as_str()))
        .bind(&tags_json)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn list_documents(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>> {
        let rows = match status {
            Some(s) => {
                sqlx::query(
                    "SELECT * FROM documents WHERE status = ? ORDER BY created_at ASC, id ASC",
                )
                .bind(s.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM documents ORDER BY created_at ASC, id ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_document).collect()
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for table in ["pages", "quality_signals", "status_events"] {
            sqlx::query(&format!("DELETE FROM {} WHERE document_id = ?", table))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_status(
        &self,
        id: &str,
        to: DocumentStatus,
        detail: Option<&str>,
    ) -> Result<StatusEvent> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let from: DocumentStatus = match row {
            Some(r) => r.get::<String, _>("status").parse()?,
            None => bail!("document not found: {}", id),
        };

        let at = Utc::now();
        sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ?")
            .bind(to.as_str())
            .bind(now_millis())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO status_events (document_id, from_status, to_status, detail, at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(detail)
        .bind(at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(StatusEvent {
            document_id: id.to_string(),
            from: Some(from),
            to,
            detail: detail.map(str::to_string),
            at,
        })
    }

    async fn status_events(&self, id: &str) -> Result<Vec<StatusEvent>> {
        let rows = sqlx::query(
            "SELECT document_id, from_status, to_status, detail, at FROM status_events WHERE document_id = ? ORDER BY id ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let from: Option<String> = row.get("from_status");
                let to: String = row.get("to_status");
                let at: String = row.get("at");
                Ok(StatusEvent {
                    document_id: row.get("document_id"),
                    from: from.map(|f| f.parse()).transpose()?,
                    to: to.parse()?,
                    detail: row.get("detail"),
                    at: parse_ts(&at)?,
                })
            })
            .collect()
    }

    async fn save_page(&self, page: &Page) -> Result<()> {
        let result_json = page
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO pages (document_id, number, gate_state, result_json)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(document_id, number) DO UPDATE SET
                gate_state = excluded.gate_state,
                result_json = excluded.result_json
            "#,
        )
        .bind(&page.document_id)
        .bind(page.number as i64)
        .bind(page.gate_state.as_str())
        .bind(&result_json)
        .execute(&mut *tx)
        .await?;

        // Signals are immutable: existing versions are never overwritten.
        for signal in &page.signals {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO quality_signals (document_id, page, version, signal_json, measured_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&page.document_id)
            .bind(page.number as i64)
            .bind(signal.version as i64)
            .bind(serde_json::to_string(signal)?)
            .bind(signal.measured_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_pages(&self, document_id: &str) -> Result<Vec<Page>> {
        let page_rows = sqlx::query(
            "SELECT number, gate_state, result_json FROM pages WHERE document_id = ? ORDER BY number ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        let signal_rows = sqlx::query(
            "SELECT page, signal_json FROM quality_signals WHERE document_id = ? ORDER BY page ASC, version ASC",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        let mut pages = Vec::with_capacity(page_rows.len());
        for row in &page_rows {
            let number: i64 = row.get("number");
            let gate_state: String = row.get("gate_state");
            let result_json: Option<String> = row.get("result_json");
            let result: Option<ExtractionResult> = result_json
                .map(|j| serde_json::from_str(&j))
                .transpose()?;

            let mut signals = Vec::new();
            for srow in signal_rows.iter().filter(|s| s.get::<i64, _>("page") == number) {
                let json: String = srow.get("signal_json");
                let signal: QualitySignal = serde_json::from_str(&json)?;
                signals.push(signal);
            }

            pages.push(Page {
                document_id: document_id.to_string(),
                number: number as u32,
                signals,
                result,
                gate_state: parse_gate_state(&gate_state)?,
            });
        }
        Ok(pages)
    }

    async fn index_info(&self) -> Result<Option<IndexInfo>> {
        let row = sqlx::query("SELECT model, dims FROM index_meta WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| {
            let dims: i64 = r.get("dims");
            IndexInfo {
                model: r.get("model"),
                dims: dims as usize,
            }
        }))
    }

    async fn index_chunks(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Claim the index identity first; the write also takes the
        // database write lock for the rest of the transaction.
        if let Some(first) = vectors.first() {
            sqlx::query("INSERT OR IGNORE INTO index_meta (id, model, dims) VALUES (1, ?, ?)")
                .bind(model)
                .bind(first.len() as i64)
                .execute(&mut *tx)
                .await?;
        }
        let current = sqlx::query("SELECT model, dims FROM index_meta WHERE id = 1")
            .fetch_optional(&mut *tx)
            .await?
            .map(|r| {
                let dims: i64 = r.get("dims");
                IndexInfo {
                    model: r.get("model"),
                    dims: dims as usize,
                }
            });
        validate_index_write(current.as_ref(), chunks, vectors, model)?;

        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, ordinal, text, hash, page_start,
                                    page_end, language, created_at, orphaned)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.ordinal)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(chunk.page_start as i64)
            .bind(chunk.page_end as i64)
            .bind(&chunk.language)
            .bind(chunk.created_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, document_id, embedding) VALUES (?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(document_id)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ? ORDER BY ordinal ASC")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn keyword_search(
        &self,
        terms: &[String],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkCandidate>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks c LEFT JOIN documents d ON d.id = c.document_id WHERE c.orphaned = 0",
            SEARCH_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<ChunkCandidate> = rows
            .iter()
            .filter_map(|row| {
                let doc = JoinedDoc::from_row(row);
                if !doc.matches(filter) {
                    return None;
                }
                let text: String = row.get("text");
                let fields = LexicalFields {
                    text: &text,
                    filename: doc.filename.as_deref().unwrap_or(""),
                    tags: &doc.tags,
                };
                let score = lexical::score(terms, &fields);
                (score > 0.0).then(|| row_to_candidate(row, score))
            })
            .collect();

        sort_and_truncate(&mut candidates, limit);
        Ok(candidates)
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkCandidate>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            LEFT JOIN documents d ON d.id = c.document_id
            WHERE c.orphaned = 0
            "#,
            SEARCH_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<ChunkCandidate> = rows
            .iter()
            .filter(|row| JoinedDoc::from_row(row).matches(filter))
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                row_to_candidate(row, similarity)
            })
            .collect();

        sort_and_truncate(&mut candidates, limit);
        Ok(candidates)
    }

    async fn enqueue_review(&self, item: &ReviewItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO review_queue (document_id, reason, detail, lowest_confidence, text_so_far, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                reason = excluded.reason,
                detail = excluded.detail,
                lowest_confidence = excluded.lowest_confidence,
                text_so_far = excluded.text_so_far,
                created_at = excluded.created_at
            "#,
        )
        .bind(&item.document_id)
        .bind(&item.reason)
        .bind(&item.detail)
        .bind(item.lowest_confidence.map(f64::from))
        .bind(&item.text_so_far)
        .bind(item.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_reviews(&self) -> Result<Vec<ReviewItem>> {
        let rows = sqlx::query("SELECT * FROM review_queue ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_review).collect()
    }

    async fn take_review(&self, document_id: &str) -> Result<Option<ReviewItem>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM review_queue WHERE document_id = ?")
            .bind(document_id)
            .fetch_optional(&mut *tx)
            .await?;
        let item = row.as_ref().map(row_to_review).transpose()?;
        if item.is_some() {
            sqlx::query("DELETE FROM review_queue WHERE document_id = ?")
                .bind(document_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(item)
    }

    async fn record_trigger_event(&self, event: &TriggerEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO trigger_events (category, chunk_id, document_id, score, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&event.category)
        .bind(&event.chunk_id)
        .bind(&event.document_id)
        .bind(event.score as f64)
        .bind(event.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_trigger_events(&self, document_id: Option<&str>) -> Result<Vec<TriggerEvent>> {
        let rows = match document_id {
            Some(id) => {
                sqlx::query("SELECT * FROM trigger_events WHERE document_id = ? ORDER BY id ASC")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM trigger_events ORDER BY id ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter()
            .map(|row| {
                let score: f64 = row.get("score");
                let ts: String = row.get("timestamp");
                Ok(TriggerEvent {
                    category: row.get("category"),
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    score: score as f32,
                    timestamp: parse_ts(&ts)?,
                })
            })
            .collect()
    }

    async fn reconcile(
        &self,
        policy: ReconcilePolicy,
        document_id: Option<&str>,
    ) -> Result<ReconcileReport> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT DISTINCT c.document_id
            FROM chunks c
            LEFT JOIN documents d ON d.id = c.document_id
            WHERE (d.id IS NULL OR d.status = 'rejected')
              AND (? IS NULL OR c.document_id = ?)
            ORDER BY c.document_id
            "#,
        )
        .bind(document_id)
        .bind(document_id)
        .fetch_all(&mut *tx)
        .await?;
        let affected: Vec<String> = rows.iter().map(|r| r.get("document_id")).collect();

        let mut report = ReconcileReport {
            policy: Some(policy),
            documents: affected.len(),
            ..Default::default()
        };

        for id in &affected {
            apply_policy(&mut tx, id, policy, &mut report).await?;
        }

        tx.commit().await?;
        Ok(report)
    }

    async fn retire_chunks(
        &self,
        document_id: &str,
        policy: ReconcilePolicy,
    ) -> Result<ReconcileReport> {
        let mut tx = self.pool.begin().await?;
        let mut report = ReconcileReport {
            policy: Some(policy),
            ..Default::default()
        };
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(&mut *tx)
            .await?;
        if count > 0 {
            report.documents = 1;
            apply_policy(&mut tx, document_id, policy, &mut report).await?;
        }
        tx.commit().await?;
        Ok(report)
    }
}

async fn apply_policy(
    tx: &mut Transaction<'_, Sqlite>,
    document_id: &str,
    policy: ReconcilePolicy,
    report: &mut ReconcileReport,
) -> Result<()> {
    match policy {
        ReconcilePolicy::Cascade => {
            sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
                .bind(document_id)
                .execute(&mut **tx)
                .await?;
            let deleted = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
                .bind(document_id)
                .execute(&mut **tx)
                .await?;
            report.chunks_deleted += deleted.rows_affected() as usize;
        }
        ReconcilePolicy::Orphan => {
            let flagged = sqlx::query(
                "UPDATE chunks SET orphaned = 1 WHERE document_id = ? AND orphaned = 0",
            )
            .bind(document_id)
            .execute(&mut **tx)
            .await?;
            report.chunks_orphaned += flagged.rows_affected() as usize;
        }
    }
    Ok(())
}

fn row_to_review(row: &SqliteRow) -> Result<ReviewItem> {
    let lowest: Option<f64> = row.get("lowest_confidence");
    let created_at: String = row.get("created_at");
    Ok(ReviewItem {
        document_id: row.get("document_id"),
        reason: row.get("reason"),
        detail: row.get("detail"),
        lowest_confidence: lowest.map(|c| c as f32),
        text_so_far: row.get("text_so_far"),
        created_at: parse_ts(&created_at)?,
    })
}

/// Open the configured database, apply the schema and wrap it in a store.
pub async fn open(config: &crate::config::Config) -> Result<SqliteStore> {
    let pool = crate::db::connect(config).await?;
    crate::migrate::apply_schema(&pool)
        .await
        .context("Failed to apply schema")?;
    Ok(SqliteStore::new(pool))
}
