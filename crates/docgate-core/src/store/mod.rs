//! Storage abstraction for docgate.
//!
//! The [`Store`] trait is the storage collaborator of the pipeline:
//! documents and their status audit log, pages with versioned quality
//! signals, the chunk/vector index, the review queue and trigger events.
//! Backends: [`memory::InMemoryStore`] here and `SqliteStore` in the app
//! crate.
//!
//! Implementations must be `Send + Sync` to work with async runtimes, and
//! [`Store::index_chunks`] must be atomic: a concurrent search sees either
//! none or all of a document's new chunks.

pub mod memory;

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::models::{
    Chunk, Document, DocumentStatus, Page, ReviewItem, StatusEvent, Tags, TriggerEvent,
};

/// A candidate chunk returned from keyword or vector search.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk_id: String,
    pub document_id: String,
    /// Raw score from the search backend (fuzzy lexical score or cosine).
    pub raw_score: f64,
    pub text: String,
    /// Chunk creation time (Unix milliseconds), used for tie-breaking.
    pub created_at: i64,
}

/// Model identity recorded with the index on its first write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub model: String,
    pub dims: usize,
}

impl IndexInfo {
    /// Check a provider or query against the index. Dimension is checked
    /// before model name.
    pub fn check(&self, model: &str, dims: usize) -> Result<(), PipelineError> {
        if self.dims != dims {
            return Err(PipelineError::DimensionMismatch {
                expected: self.dims,
                actual: dims,
            });
        }
        if self.model != model {
            return Err(PipelineError::ModelMismatch {
                expected: self.model.clone(),
                actual: model.to_string(),
            });
        }
        Ok(())
    }
}

/// Optional query filters. A chunk passes when its document matches every
/// given constraint; chunks whose document is gone never pass a non-empty
/// filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub tags: Tags,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.tags.is_empty()
    }

    pub fn matches(&self, doc: Option<&Document>) -> bool {
        if self.is_empty() {
            return true;
        }
        let Some(doc) = doc else {
            return false;
        };
        if let Some(src) = &self.source {
            if &doc.source != src {
                return false;
            }
        }
        self.tags
            .iter()
            .all(|(k, v)| doc.tags.get(k).is_some_and(|dv| dv == v))
    }
}

/// What to do with indexed chunks whose document is missing or rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    /// Delete the chunks and their vectors.
    #[default]
    Cascade,
    /// Keep the chunks but flag them and hide them from retrieval.
    Orphan,
}

impl fmt::Display for ReconcilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcilePolicy::Cascade => f.write_str("cascade"),
            ReconcilePolicy::Orphan => f.write_str("orphan"),
        }
    }
}

impl FromStr for ReconcilePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cascade" => Ok(ReconcilePolicy::Cascade),
            "orphan" => Ok(ReconcilePolicy::Orphan),
            other => bail!("unknown reconcile policy: {}. Use cascade or orphan.", other),
        }
    }
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub policy: Option<ReconcilePolicy>,
    /// Documents whose chunks were affected.
    pub documents: usize,
    pub chunks_deleted: usize,
    pub chunks_orphaned: usize,
}

/// Whether chunks of a document with this status (or no document at all)
/// are inconsistent and need reconciliation.
pub fn needs_reconcile(doc: Option<&Document>) -> bool {
    match doc {
        None => true,
        Some(d) => d.status == DocumentStatus::Rejected,
    }
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](Store::upsert_document) | Insert or replace a document |
/// | [`set_status`](Store::set_status) | Transition status and append a [`StatusEvent`] |
/// | [`save_page`](Store::save_page) | Persist a page with its signal history |
/// | [`index_chunks`](Store::index_chunks) | Atomically replace a document's chunks and vectors |
/// | [`keyword_search`](Store::keyword_search) | Fuzzy multi-field lexical search |
/// | [`vector_search`](Store::vector_search) | Cosine similarity search |
/// | [`enqueue_review`](Store::enqueue_review) | Add a document to the review queue |
/// | [`reconcile`](Store::reconcile) | Resolve chunks whose document is gone or rejected |
/// | [`retire_chunks`](Store::retire_chunks) | Resolve the chunks of a document being superseded |
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_document(&self, doc: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn list_documents(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>>;

    /// Remove a document with its pages and status log. Its chunks stay
    /// until [`reconcile`](Store::reconcile) runs.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    /// Move a document to `to` and durably record the transition.
    async fn set_status(
        &self,
        id: &str,
        to: DocumentStatus,
        detail: Option<&str>,
    ) -> Result<StatusEvent>;

    async fn status_events(&self, id: &str) -> Result<Vec<StatusEvent>>;

    async fn save_page(&self, page: &Page) -> Result<()>;

    async fn get_pages(&self, document_id: &str) -> Result<Vec<Page>>;

    /// Model identity of the index, `None` until the first write.
    async fn index_info(&self) -> Result<Option<IndexInfo>>;

    /// Replace all chunks of `document_id` with `chunks` and `vectors` in
    /// one atomic step. The first write records `(model, dims)`; later
    /// writes must match it or fail with a [`PipelineError`].
    async fn index_chunks(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<()>;

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;

    async fn keyword_search(
        &self,
        terms: &[String],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkCandidate>>;

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkCandidate>>;

    /// Add or replace the review item of a document.
    async fn enqueue_review(&self, item: &ReviewItem) -> Result<()>;

    async fn list_reviews(&self) -> Result<Vec<ReviewItem>>;

    /// Remove and return the review item of a document.
    async fn take_review(&self, document_id: &str) -> Result<Option<ReviewItem>>;

    async fn record_trigger_event(&self, event: &TriggerEvent) -> Result<()>;

    async fn list_trigger_events(&self, document_id: Option<&str>) -> Result<Vec<TriggerEvent>>;

    /// Apply `policy` to chunks whose document is missing or rejected.
    /// Limited to one document when `document_id` is given.
    async fn reconcile(
        &self,
        policy: ReconcilePolicy,
        document_id: Option<&str>,
    ) -> Result<ReconcileReport>;

    /// Apply `policy` to every chunk of `document_id`, whatever its status.
    /// Used when a new version of a document replaces the indexed one.
    async fn retire_chunks(
        &self,
        document_id: &str,
        policy: ReconcilePolicy,
    ) -> Result<ReconcileReport>;
}

/// Shared validation for [`Store::index_chunks`] implementations.
pub fn validate_index_write(
    current: Option<&IndexInfo>,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
    model: &str,
) -> Result<IndexInfo> {
    if chunks.len() != vectors.len() {
        bail!(
            "index write has {} chunks but {} vectors",
            chunks.len(),
            vectors.len()
        );
    }
    let dims = match (current, vectors.first()) {
        (Some(info), _) => info.dims,
        (None, Some(v)) => v.len(),
        (None, None) => 0,
    };
    for v in vectors {
        crate::embedding::check_dims(dims, v.len())?;
    }
    if let Some(info) = current {
        if !vectors.is_empty() {
            info.check(model, dims)?;
        }
        return Ok(info.clone());
    }
    Ok(IndexInfo {
        model: model.to_string(),
        dims,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_info_check_order() {
        let info = IndexInfo {
            model: "m1".into(),
            dims: 4,
        };
        assert!(info.check("m1", 4).is_ok());
        assert!(matches!(
            info.check("m2", 8),
            Err(PipelineError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            info.check("m2", 4),
            Err(PipelineError::ModelMismatch { .. })
        ));
    }

    #[test]
    fn test_reconcile_policy_parse() {
        assert_eq!("orphan".parse::<ReconcilePolicy>().unwrap(), ReconcilePolicy::Orphan);
        assert_eq!(ReconcilePolicy::default(), ReconcilePolicy::Cascade);
        assert!("delete".parse::<ReconcilePolicy>().is_err());
    }

    #[test]
    fn test_empty_filter_matches_missing_document() {
        let f = SearchFilter::default();
        assert!(f.matches(None));
        let f = SearchFilter {
            source: Some("filesystem".into()),
            ..Default::default()
        };
        assert!(!f.matches(None));
    }
}
