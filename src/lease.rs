//! Per-document exclusive leases.
//!
//! Only the stage holding a document's lease may mutate it. A [`Lease`]
//! is released when dropped; [`LeaseTable::revoke`] force-releases a lease
//! whose stage timed out, after which the stale guard's drop is a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use docgate_core::error::PipelineError;

#[derive(Debug)]
struct Entry {
    stage: String,
    token: u64,
}

#[derive(Debug, Default, Clone)]
pub struct LeaseTable {
    inner: Arc<Mutex<HashMap<String, Entry>>>,
    next_token: Arc<AtomicU64>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease on `document_id` for `stage`, failing with
    /// [`PipelineError::LeaseHeld`] if another stage holds it.
    pub fn acquire(&self, document_id: &str, stage: &str) -> Result<Lease, PipelineError> {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(held) = map.get(document_id) {
            return Err(PipelineError::LeaseHeld {
                document_id: document_id.to_string(),
                stage: held.stage.clone(),
            });
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        map.insert(
            document_id.to_string(),
            Entry {
                stage: stage.to_string(),
                token,
            },
        );
        tracing::trace!(document_id, stage, "lease acquired");
        Ok(Lease {
            table: self.clone(),
            document_id: document_id.to_string(),
            stage: stage.to_string(),
            token,
        })
    }

    /// Stage currently holding the lease, if any.
    pub fn holder(&self, document_id: &str) -> Option<String> {
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.get(document_id).map(|e| e.stage.clone())
    }

    /// Force-release a lease regardless of who holds it.
    pub fn revoke(&self, document_id: &str) -> bool {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let revoked = map.remove(document_id).is_some();
        if revoked {
            tracing::warn!(document_id, "lease revoked");
        }
        revoked
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, document_id: &str, token: u64) {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if map.get(document_id).is_some_and(|e| e.token == token) {
            map.remove(document_id);
        }
    }
}

/// Guard for one held lease.
#[derive(Debug)]
pub struct Lease {
    table: LeaseTable,
    document_id: String,
    stage: String,
    token: u64,
}

impl Lease {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.table.release(&self.document_id, self.token);
    }
}
