//! Human review queue: listing and resolving items.
//!
//! `reprocess` moves the document back to `pending` so the next ingest run
//! picks it up again. `reject` finalizes the rejection and applies the
//! configured reconcile policy to any chunks the document still has.

use anyhow::Result;
use serde::Serialize;

use docgate_core::models::{DocumentStatus, ReviewAction, ReviewItem};
use docgate_core::store::{ReconcileReport, Store};

use crate::config::Config;
use crate::sqlite_store;

/// Outcome of resolving one review item.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub document_id: String,
    pub action: ReviewAction,
    pub status: DocumentStatus,
    pub item: ReviewItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileReport>,
}

pub async fn list_reviews(store: &dyn Store) -> Result<Vec<ReviewItem>> {
    store.list_reviews().await
}

/// Resolve the review item of `document_id`. Returns `None` when the
/// document has no open review item.
pub async fn resolve_review(
    config: &Config,
    store: &dyn Store,
    document_id: &str,
    action: ReviewAction,
) -> Result<Option<Resolution>> {
    let Some(item) = store.take_review(document_id).await? else {
        return Ok(None);
    };

    let (status, reconcile) = match action {
        ReviewAction::Reprocess => {
            store
                .set_status(document_id, DocumentStatus::Pending, Some("review: reprocess"))
                .await?;
            (DocumentStatus::Pending, None)
        }
        ReviewAction::Reject => {
            store
                .set_status(document_id, DocumentStatus::Rejected, Some("review: reject"))
                .await?;
            let report = store
                .reconcile(config.pipeline.reconcile_policy, Some(document_id))
                .await?;
            (DocumentStatus::Rejected, Some(report))
        }
    };

    tracing::info!(
        document_id = %document_id,
        action = ?action,
        status = %status,
        "review resolved"
    );

    Ok(Some(Resolution {
        document_id: document_id.to_string(),
        action,
        status,
        item,
        reconcile,
    }))
}

pub async fn run_review_list(config: &Config) -> Result<()> {
    let store = sqlite_store::open(config).await?;
    let items = list_reviews(&store).await?;

    if items.is_empty() {
        println!("Review queue is empty.");
    }
    for item in &items {
        let conf = item
            .lowest_confidence
            .map(|c| format!("{:.3}", c))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  confidence={}  {}",
            item.document_id,
            item.reason,
            conf,
            item.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        if !item.detail.is_empty() {
            println!("    {}", item.detail);
        }
    }

    store.pool().close().await;
    Ok(())
}

pub async fn run_review_resolve(config: &Config, document_id: &str, action: &str) -> Result<()> {
    let action: ReviewAction = action.parse()?;
    let store = sqlite_store::open(config).await?;

    match resolve_review(config, &store, document_id, action).await? {
        Some(res) => {
            println!("{} -> {}", res.document_id, res.status);
            if let Some(report) = res.reconcile {
                println!(
                    "  reconcile ({}): {} chunks deleted, {} orphaned",
                    report.policy.unwrap_or_default(),
                    report.chunks_deleted,
                    report.chunks_orphaned
                );
            }
        }
        None => {
            store.pool().close().await;
            anyhow::bail!("No review item for document: {}", document_id);
        }
    }

    store.pool().close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use chrono::Utc;
    use docgate_core::models::{checksum, Chunk, Document, DocumentRecord};
    use docgate_core::store::memory::InMemoryStore;

    fn config() -> Config {
        parse_config("[db]\npath = \"unused.sqlite\"\n").unwrap()
    }

    async fn queued(store: &InMemoryStore, id: &str) {
        let doc = Document::from_record(&DocumentRecord {
            id: id.to_string(),
            source: "filesystem".into(),
            declared_mime: "image/png".into(),
            filename: format!("{}.png", id),
            bytes: vec![1, 2, 3],
            tags: Default::default(),
        });
        store.upsert_document(&doc).await.unwrap();
        store
            .set_status(id, DocumentStatus::NeedsReview, Some("low_confidence"))
            .await
            .unwrap();
        store
            .enqueue_review(&ReviewItem {
                document_id: id.to_string(),
                reason: "low_confidence".into(),
                detail: "page 1: confidence 0.500".into(),
                lowest_confidence: Some(0.5),
                text_so_far: String::new(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reprocess_returns_to_pending() {
        let store = InMemoryStore::new();
        queued(&store, "d1").await;

        let res = resolve_review(&config(), &store, "d1", ReviewAction::Reprocess)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(res.status, DocumentStatus::Pending);
        assert!(store.list_reviews().await.unwrap().is_empty());
        let doc = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Pending);
    }

    #[tokio::test]
    async fn test_reject_cascades_stale_chunks() {
        let store = InMemoryStore::new();
        queued(&store, "d1").await;
        let chunk = Chunk {
            id: "d1-0".into(),
            document_id: "d1".into(),
            ordinal: 0,
            text: "old text".into(),
            hash: checksum(b"old text"),
            page_start: 1,
            page_end: 1,
            language: None,
            created_at: 0,
        };
        store
            .index_chunks("d1", &[chunk], &[vec![1.0, 0.0]], "hash-v1-2")
            .await
            .unwrap();

        let res = resolve_review(&config(), &store, "d1", ReviewAction::Reject)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(res.status, DocumentStatus::Rejected);
        assert_eq!(res.reconcile.map(|r| r.chunks_deleted), Some(1));
        assert!(store.list_chunks("d1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_item_is_none() {
        let store = InMemoryStore::new();
        let res = resolve_review(&config(), &store, "missing", ReviewAction::Reject)
            .await
            .unwrap();
        assert!(res.is_none());
    }
}
