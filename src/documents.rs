//! Document inspection by ID.
//!
//! Gathers a document with its pages, status history, chunks, review item
//! and trigger events. Used by `docgate document` and `GET /documents/{id}`.

use anyhow::{bail, Result};
use serde::Serialize;

use docgate_core::models::{Chunk, Document, Page, ReviewItem, StatusEvent, TriggerEvent};
use docgate_core::store::Store;

use crate::config::Config;
use crate::sqlite_store;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    pub document: Document,
    pub pages: Vec<Page>,
    pub history: Vec<StatusEvent>,
    pub chunks: Vec<Chunk>,
    pub review: Option<ReviewItem>,
    pub triggers: Vec<TriggerEvent>,
}

/// Core lookup returning structured data. `None` when the document is
/// unknown.
pub async fn inspect_document(store: &dyn Store, id: &str) -> Result<Option<DocumentView>> {
    let Some(document) = store.get_document(id).await? else {
        return Ok(None);
    };
    let pages = store.get_pages(id).await?;
    let history = store.status_events(id).await?;
    let chunks = store.list_chunks(id).await?;
    let review = store
        .list_reviews()
        .await?
        .into_iter()
        .find(|r| r.document_id == id);
    let triggers = store.list_trigger_events(Some(id)).await?;

    Ok(Some(DocumentView {
        document,
        pages,
        history,
        chunks,
        review,
        triggers,
    }))
}

pub async fn run_document(config: &Config, id: &str) -> Result<()> {
    let store = sqlite_store::open(config).await?;
    let view = inspect_document(&store, id).await?;
    store.pool().close().await;

    let Some(view) = view else {
        bail!("document not found: {}", id);
    };
    let doc = &view.document;

    println!("--- Document ---");
    println!("id:            {}", doc.id);
    println!("filename:      {}", doc.filename);
    println!("source:        {}", doc.source);
    println!("status:        {}", doc.status);
    println!("declared_mime: {}", doc.declared_mime);
    if let Some(ref mime) = doc.detected_mime {
        println!("detected_mime: {}", mime);
    }
    if let Some(route) = doc.route {
        println!("route:         {}", route);
    }
    println!("size_bytes:    {}", doc.size_bytes);
    println!("checksum:      {}", doc.checksum);
    println!("created_at:    {}", format_ts_iso(doc.created_at));
    println!("updated_at:    {}", format_ts_iso(doc.updated_at));
    if !doc.tags.is_empty() {
        let tags: Vec<String> = doc.tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        println!("tags:          {}", tags.join(", "));
    }
    println!();

    println!("--- History ({}) ---", view.history.len());
    for ev in &view.history {
        let from = ev.from.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
        println!(
            "{}  {} -> {}  {}",
            ev.at.format("%Y-%m-%dT%H:%M:%SZ"),
            from,
            ev.to,
            ev.detail.as_deref().unwrap_or("")
        );
    }
    println!();

    println!("--- Pages ({}) ---", view.pages.len());
    for page in &view.pages {
        let conf = page
            .result
            .as_ref()
            .map(|r| format!("{:.3}", r.confidence))
            .unwrap_or_else(|| "-".into());
        let method = page
            .result
            .as_ref()
            .map(|r| r.method.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "[page {}] gate={} method={} confidence={} signals={}",
            page.number,
            page.gate_state,
            method,
            conf,
            page.signals.len()
        );
    }
    println!();

    if let Some(ref item) = view.review {
        println!("--- Review ---");
        println!("reason:        {}", item.reason);
        println!("detail:        {}", item.detail);
        println!();
    }

    if !view.triggers.is_empty() {
        println!("--- Triggers ({}) ---", view.triggers.len());
        for ev in &view.triggers {
            println!("{}  chunk={}  score={:.3}", ev.category, ev.chunk_id, ev.score);
        }
        println!();
    }

    println!("--- Chunks ({}) ---", view.chunks.len());
    for chunk in &view.chunks {
        println!(
            "[chunk {}] pages {}-{}",
            chunk.ordinal, chunk.page_start, chunk.page_end
        );
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}

fn format_ts_iso(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgate_core::models::{DocumentRecord, DocumentStatus};
    use docgate_core::store::memory::InMemoryStore;

    #[tokio::test]
    async fn test_inspect_collects_history() {
        let store = InMemoryStore::new();
        let doc = Document::from_record(&DocumentRecord {
            id: "d1".into(),
            source: "filesystem".into(),
            declared_mime: "text/plain".into(),
            filename: "d1.txt".into(),
            bytes: b"hello".to_vec(),
            tags: Default::default(),
        });
        store.upsert_document(&doc).await.unwrap();
        store
            .set_status("d1", DocumentStatus::QualityChecked, None)
            .await
            .unwrap();

        let view = inspect_document(&store, "d1").await.unwrap().unwrap();
        assert_eq!(view.document.status, DocumentStatus::QualityChecked);
        assert_eq!(view.history.len(), 1);
        assert_eq!(view.history[0].from, Some(DocumentStatus::Ingested));
        assert!(view.review.is_none());
    }

    #[tokio::test]
    async fn test_unknown_document_is_none() {
        let store = InMemoryStore::new();
        assert!(inspect_document(&store, "nope").await.unwrap().is_none());
    }

    #[test]
    fn test_format_ts_iso() {
        assert_eq!(format_ts_iso(0), "1970-01-01T00:00:00Z");
    }
}
