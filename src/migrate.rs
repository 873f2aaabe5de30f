use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Documents with their lifecycle status
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            filename TEXT NOT NULL,
            declared_mime TEXT NOT NULL,
            detected_mime TEXT,
            size_bytes INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            status TEXT NOT NULL,
            route TEXT,
            tags_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Pages with gate state and extraction result
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            document_id TEXT NOT NULL,
            number INTEGER NOT NULL,
            gate_state TEXT NOT NULL,
            result_json TEXT,
            PRIMARY KEY (document_id, number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Versioned quality signals (append-only)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quality_signals (
            document_id TEXT NOT NULL,
            page INTEGER NOT NULL,
            version INTEGER NOT NULL,
            signal_json TEXT NOT NULL,
            measured_at INTEGER NOT NULL,
            PRIMARY KEY (document_id, page, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Status transition audit log
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS status_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id TEXT NOT NULL,
            from_status TEXT,
            to_status TEXT NOT NULL,
            detail TEXT,
            at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunks; document_id is a lookup key, not a foreign key
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            page_start INTEGER NOT NULL,
            page_end INTEGER NOT NULL,
            language TEXT,
            created_at INTEGER NOT NULL,
            orphaned INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Single-row model identity of the vector index
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            model TEXT NOT NULL,
            dims INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_queue (
            document_id TEXT PRIMARY KEY,
            reason TEXT NOT NULL,
            detail TEXT NOT NULL,
            lowest_confidence REAL,
            text_so_far TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trigger_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            score REAL NOT NULL,
            timestamp TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_status_events_document ON status_events(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_trigger_events_document ON trigger_events(document_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
