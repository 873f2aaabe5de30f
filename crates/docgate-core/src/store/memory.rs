//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! All state sits behind one `std::sync::RwLock`, so an index write is a
//! single critical section and readers never see a partial chunk batch.
//! Vector search is brute-force cosine similarity; keyword search scores
//! every chunk with [`lexical::score`](crate::lexical::score).

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::embedding::cosine_similarity;
use crate::lexical::{self, LexicalFields};
use crate::models::{
    now_millis, Chunk, Document, DocumentStatus, Page, ReviewItem, StatusEvent, Tags, TriggerEvent,
};

use super::{
    needs_reconcile, validate_index_write, ChunkCandidate, IndexInfo, ReconcilePolicy,
    ReconcileReport, SearchFilter, Store,
};

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
    orphaned: bool,
}

#[derive(Default)]
struct State {
    documents: HashMap<String, Document>,
    pages: HashMap<String, Vec<Page>>,
    events: Vec<StatusEvent>,
    chunks: Vec<StoredChunk>,
    index: Option<IndexInfo>,
    reviews: Vec<ReviewItem>,
    triggers: Vec<TriggerEvent>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
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

fn candidate(sc: &StoredChunk, raw_score: f64) -> ChunkCandidate {
    ChunkCandidate {
        chunk_id: sc.chunk.id.clone(),
        document_id: sc.chunk.document_id.clone(),
        raw_score,
        text: sc.chunk.text.clone(),
        created_at: sc.chunk.created_at,
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        let mut state = self.write()?;
        state.documents.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.documents.get(id).cloned())
    }

    async fn list_documents(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>> {
        let state = self.read()?;
        let mut docs: Vec<Document> = state
            .documents
            .values()
            .filter(|d| status.map_or(true, |s| d.status == s))
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut state = self.write()?;
        let existed = state.documents.remove(id).is_some();
        state.pages.remove(id);
        state.events.retain(|e| e.document_id != id);
        Ok(existed)
    }

    async fn set_status(
        &self,
        id: &str,
        to: DocumentStatus,
        detail: Option<&str>,
    ) -> Result<StatusEvent> {
        let mut state = self.write()?;
        let doc = match state.documents.get_mut(id) {
            Some(d) => d,
            None => bail!("document not found: {}", id),
        };
        let from = doc.status;
        doc.status = to;
        doc.updated_at = now_millis();

        let event = StatusEvent {
            document_id: id.to_string(),
            from: Some(from),
            to,
            detail: detail.map(str::to_string),
            at: Utc::now(),
        };
        state.events.push(event.clone());
        Ok(event)
    }

    async fn status_events(&self, id: &str) -> Result<Vec<StatusEvent>> {
        Ok(self
            .read()?
            .events
            .iter()
            .filter(|e| e.document_id == id)
            .cloned()
            .collect())
    }

    async fn save_page(&self, page: &Page) -> Result<()> {
        let mut state = self.write()?;
        let pages = state.pages.entry(page.document_id.clone()).or_default();
        match pages.iter_mut().find(|p| p.number == page.number) {
            Some(existing) => *existing = page.clone(),
            None => {
                pages.push(page.clone());
                pages.sort_by_key(|p| p.number);
            }
        }
        Ok(())
    }

    async fn get_pages(&self, document_id: &str) -> Result<Vec<Page>> {
        Ok(self
            .read()?
            .pages
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn index_info(&self) -> Result<Option<IndexInfo>> {
        Ok(self.read()?.index.clone())
    }

    async fn index_chunks(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<()> {
        let mut state = self.write()?;
        let info = validate_index_write(state.index.as_ref(), chunks, vectors, model)?;

        state.chunks.retain(|sc| sc.chunk.document_id != document_id);
        for (chunk, vector) in chunks.iter().zip(vectors) {
            state.chunks.push(StoredChunk {
                chunk: chunk.clone(),
                vector: vector.clone(),
                orphaned: false,
            });
        }
        if state.index.is_none() && !vectors.is_empty() {
            state.index = Some(info);
        }
        Ok(())
    }

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let state = self.read()?;
        let mut chunks: Vec<Chunk> = state
            .chunks
            .iter()
            .filter(|sc| sc.chunk.document_id == document_id)
            .map(|sc| sc.chunk.clone())
            .collect();
        chunks.sort_by_key(|c| c.ordinal);
        Ok(chunks)
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
        let state = self.read()?;
        let no_tags = Tags::new();

        let mut candidates: Vec<ChunkCandidate> = state
            .chunks
            .iter()
            .filter(|sc| !sc.orphaned)
            .filter_map(|sc| {
                let doc = state.documents.get(&sc.chunk.document_id);
                if !filter.matches(doc) {
                    return None;
                }
                let fields = LexicalFields {
                    text: &sc.chunk.text,
                    filename: doc.map(|d| d.filename.as_str()).unwrap_or(""),
                    tags: doc.map(|d| &d.tags).unwrap_or(&no_tags),
                };
                let score = lexical::score(terms, &fields);
                (score > 0.0).then(|| candidate(sc, score))
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
        let state = self.read()?;
        let mut candidates: Vec<ChunkCandidate> = state
            .chunks
            .iter()
            .filter(|sc| !sc.orphaned)
            .filter(|sc| filter.matches(state.documents.get(&sc.chunk.document_id)))
            .map(|sc| candidate(sc, cosine_similarity(query_vec, &sc.vector) as f64))
            .collect();

        sort_and_truncate(&mut candidates, limit);
        Ok(candidates)
    }

    async fn enqueue_review(&self, item: &ReviewItem) -> Result<()> {
        let mut state = self.write()?;
        state.reviews.retain(|r| r.document_id != item.document_id);
        state.reviews.push(item.clone());
        Ok(())
    }

    async fn list_reviews(&self) -> Result<Vec<ReviewItem>> {
        let mut items = self.read()?.reviews.clone();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items)
    }

    async fn take_review(&self, document_id: &str) -> Result<Option<ReviewItem>> {
        let mut state = self.write()?;
        let pos = state
            .reviews
            .iter()
            .position(|r| r.document_id == document_id);
        Ok(pos.map(|i| state.reviews.remove(i)))
    }

    async fn record_trigger_event(&self, event: &TriggerEvent) -> Result<()> {
        self.write()?.triggers.push(event.clone());
        Ok(())
    }

    async fn list_trigger_events(&self, document_id: Option<&str>) -> Result<Vec<TriggerEvent>> {
        Ok(self
            .read()?
            .triggers
            .iter()
            .filter(|e| document_id.map_or(true, |id| e.document_id == id))
            .cloned()
            .collect())
    }

    async fn reconcile(
        &self,
        policy: ReconcilePolicy,
        document_id: Option<&str>,
    ) -> Result<ReconcileReport> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        let mut report = ReconcileReport {
            policy: Some(policy),
            ..Default::default()
        };

        let mut affected: Vec<String> = state
            .chunks
            .iter()
            .filter(|sc| document_id.map_or(true, |id| sc.chunk.document_id == id))
            .filter(|sc| needs_reconcile(state.documents.get(&sc.chunk.document_id)))
            .map(|sc| sc.chunk.document_id.clone())
            .collect();
        affected.sort();
        affected.dedup();
        report.documents = affected.len();

        apply_policy(&mut state.chunks, &affected, policy, &mut report);
        Ok(report)
    }

    async fn retire_chunks(
        &self,
        document_id: &str,
        policy: ReconcilePolicy,
    ) -> Result<ReconcileReport> {
        let mut state = self.write()?;
        let mut report = ReconcileReport {
            policy: Some(policy),
            ..Default::default()
        };
        if state.chunks.iter().any(|sc| sc.chunk.document_id == document_id) {
            report.documents = 1;
            apply_policy(&mut state.chunks, &[document_id.to_string()], policy, &mut report);
        }
        Ok(report)
    }
}

fn apply_policy(
    chunks: &mut Vec<StoredChunk>,
    affected: &[String],
    policy: ReconcilePolicy,
    report: &mut ReconcileReport,
) {
    match policy {
        ReconcilePolicy::Cascade => {
            let before = chunks.len();
            chunks.retain(|sc| !affected.contains(&sc.chunk.document_id));
            report.chunks_deleted += before - chunks.len();
        }
        ReconcilePolicy::Orphan => {
            for sc in chunks.iter_mut() {
                if affected.contains(&sc.chunk.document_id) && !sc.orphaned {
                    sc.orphaned = true;
                    report.chunks_orphaned += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::models::{DocumentRecord, GateState};

    fn doc(id: &str, source: &str) -> Document {
        Document::from_record(&DocumentRecord {
            id: id.into(),
            source: source.into(),
            declared_mime: "text/plain".into(),
            filename: format!("{}.txt", id),
            bytes: id.as_bytes().to_vec(),
            tags: Tags::new(),
        })
    }

    fn chunk(doc_id: &str, ordinal: i64, text: &str) -> Chunk {
        Chunk {
            id: format!("{}-{}", doc_id, ordinal),
            document_id: doc_id.into(),
            ordinal,
            text: text.into(),
            hash: crate::models::checksum(text.as_bytes()),
            page_start: 1,
            page_end: 1,
            language: None,
            created_at: ordinal,
        }
    }

    #[tokio::test]
    async fn test_set_status_records_event() {
        let store = InMemoryStore::new();
        store.upsert_document(&doc("d1", "fs")).await.unwrap();
        let ev = store
            .set_status("d1", DocumentStatus::QualityChecked, Some("ok"))
            .await
            .unwrap();
        assert_eq!(ev.from, Some(DocumentStatus::Ingested));
        assert_eq!(ev.to, DocumentStatus::QualityChecked);

        let events = store.status_events("d1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(store
            .set_status("missing", DocumentStatus::Failed, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_index_chunks_replaces_and_checks_dims() {
        let store = InMemoryStore::new();
        store.upsert_document(&doc("d1", "fs")).await.unwrap();
        store
            .index_chunks(
                "d1",
                &[chunk("d1", 0, "a"), chunk("d1", 1, "b")],
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
                "m",
            )
            .await
            .unwrap();
        store
            .index_chunks("d1", &[chunk("d1", 0, "c")], &[vec![1.0, 1.0]], "m")
            .await
            .unwrap();
        let chunks = store.list_chunks("d1").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "c");

        let err = store
            .index_chunks("d1", &[chunk("d1", 0, "x")], &[vec![1.0, 0.0, 0.0]], "m")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        // Failed write left the previous batch intact.
        assert_eq!(store.list_chunks("d1").await.unwrap()[0].text, "c");

        let err = store
            .index_chunks("d1", &[chunk("d1", 0, "x")], &[vec![1.0, 0.0]], "other")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ModelMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_search_filters_by_source_and_tags() {
        let store = InMemoryStore::new();
        let mut a = doc("a", "sharepoint");
        a.tags.insert("department".into(), "maintenance".into());
        store.upsert_document(&a).await.unwrap();
        store.upsert_document(&doc("b", "email")).await.unwrap();
        store
            .index_chunks("a", &[chunk("a", 0, "pump seal leak")], &[vec![1.0, 0.0]], "m")
            .await
            .unwrap();
        store
            .index_chunks("b", &[chunk("b", 0, "pump seal leak")], &[vec![1.0, 0.0]], "m")
            .await
            .unwrap();

        let terms = lexical::query_terms("pump");
        let all = store
            .keyword_search(&terms, 10, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let mut filter = SearchFilter::default();
        filter.tags.insert("department".into(), "maintenance".into());
        let only_a = store.vector_search(&[1.0, 0.0], 10, &filter).await.unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].document_id, "a");

        let filter = SearchFilter {
            source: Some("email".into()),
            ..Default::default()
        };
        let only_b = store.keyword_search(&terms, 10, &filter).await.unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].document_id, "b");
    }

    #[tokio::test]
    async fn test_reconcile_cascade_and_orphan() {
        let store = InMemoryStore::new();
        for id in ["keep", "gone", "bad"] {
            store.upsert_document(&doc(id, "fs")).await.unwrap();
            store
                .index_chunks(id, &[chunk(id, 0, "text")], &[vec![1.0]], "m")
                .await
                .unwrap();
        }
        store.delete_document("gone").await.unwrap();
        store
            .set_status("bad", DocumentStatus::Rejected, None)
            .await
            .unwrap();

        let report = store.reconcile(ReconcilePolicy::Orphan, None).await.unwrap();
        assert_eq!(report.documents, 2);
        assert_eq!(report.chunks_orphaned, 2);
        let hits = store
            .vector_search(&[1.0], 10, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "keep");
        // Chunks are still stored.
        assert_eq!(store.list_chunks("gone").await.unwrap().len(), 1);

        let report = store
            .reconcile(ReconcilePolicy::Cascade, Some("gone"))
            .await
            .unwrap();
        assert_eq!(report.chunks_deleted, 1);
        assert!(store.list_chunks("gone").await.unwrap().is_empty());
        assert_eq!(store.list_chunks("bad").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retire_chunks_of_live_document() {
        let store = InMemoryStore::new();
        for id in ["old", "other"] {
            store.upsert_document(&doc(id, "fs")).await.unwrap();
            store
                .index_chunks(id, &[chunk(id, 0, "text")], &[vec![1.0]], "m")
                .await
                .unwrap();
        }

        let report = store
            .retire_chunks("old", ReconcilePolicy::Orphan)
            .await
            .unwrap();
        assert_eq!((report.documents, report.chunks_orphaned), (1, 1));
        let hits = store
            .vector_search(&[1.0], 10, &SearchFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "other");

        let report = store
            .retire_chunks("old", ReconcilePolicy::Cascade)
            .await
            .unwrap();
        assert_eq!(report.chunks_deleted, 1);
        assert!(store.list_chunks("old").await.unwrap().is_empty());

        let report = store
            .retire_chunks("old", ReconcilePolicy::Cascade)
            .await
            .unwrap();
        assert_eq!(report.documents, 0);
    }

    #[tokio::test]
    async fn test_review_queue_one_item_per_document() {
        let store = InMemoryStore::new();
        let item = ReviewItem {
            document_id: "d1".into(),
            reason: "low_confidence".into(),
            detail: String::new(),
            lowest_confidence: Some(0.2),
            text_so_far: String::new(),
            created_at: Utc::now(),
        };
        store.enqueue_review(&item).await.unwrap();
        store.enqueue_review(&item).await.unwrap();
        assert_eq!(store.list_reviews().await.unwrap().len(), 1);
        assert!(store.take_review("d1").await.unwrap().is_some());
        assert!(store.take_review("d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_page_replaces_by_number() {
        let store = InMemoryStore::new();
        let mut page = Page {
            document_id: "d1".into(),
            number: 2,
            signals: Vec::new(),
            result: None,
            gate_state: GateState::Pending,
        };
        store.save_page(&page).await.unwrap();
        page.gate_state = GateState::Accepted;
        store.save_page(&page).await.unwrap();
        page.number = 1;
        store.save_page(&page).await.unwrap();

        let pages = store.get_pages("d1").await.unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 1);
        assert_eq!(pages[1].gate_state, GateState::Accepted);
    }
}
