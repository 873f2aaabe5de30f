//! Hybrid retriever with vector, text and hybrid modes.
//!
//! The algorithm works entirely through the [`Store`] trait, with no
//! database or configuration dependencies. The caller embeds the query
//! with the index's model and passes the vector in.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Check the query vector against the index `(model, dims)`; a mismatch
//!    fails fast with [`PipelineError::DimensionMismatch`] or
//!    [`PipelineError::ModelMismatch`].
//! 2. Fetch `candidate_k` vector candidates (cosine) and `candidate_k`
//!    lexical candidates (fuzzy multi-field), concurrently.
//! 3. Min-max normalize each list to `[0, 1]` on its own; a list whose raw
//!    scores are all equal normalizes to `1.0`.
//! 4. Merge: `score = w_v × vector + w_l × lexical` (defaults 0.7 / 0.3).
//!    `vector` and `text` modes use only their own term.
//! 5. Sort by score (desc), chunk `created_at` (desc), chunk id (asc).
//! 6. Truncate to `top_k` and assign 1-based ranks.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::lexical;
use crate::models::RetrievalHit;
use crate::store::{ChunkCandidate, SearchFilter, Store};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Vector,
    #[default]
    Hybrid,
    Text,
}

impl SearchMode {
    fn uses_vector(self) -> bool {
        matches!(self, SearchMode::Vector | SearchMode::Hybrid)
    }

    fn uses_lexical(self) -> bool {
        matches!(self, SearchMode::Text | SearchMode::Hybrid)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SearchMode::Vector => "vector",
            SearchMode::Hybrid => "hybrid",
            SearchMode::Text => "text",
        })
    }
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vector" => Ok(SearchMode::Vector),
            "hybrid" => Ok(SearchMode::Hybrid),
            "text" => Ok(SearchMode::Text),
            other => bail!("Unknown search mode: {}. Use vector, hybrid, or text.", other),
        }
    }
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub vector_weight: f64,
    pub lexical_weight: f64,
    /// Candidates fetched from each path before merging.
    pub candidate_k: usize,
    pub top_k: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            lexical_weight: 0.3,
            candidate_k: 50,
            top_k: 10,
        }
    }
}

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    /// Pre-computed query embedding (required for vector/hybrid modes).
    pub query_vec: Option<&'a [f32]>,
    /// Model that produced `query_vec`.
    pub query_model: Option<&'a str>,
    pub mode: SearchMode,
    pub filter: &'a SearchFilter,
    pub params: SearchParams,
}

/// Run a search against a [`Store`] backend.
///
/// All frontends (CLI, HTTP) delegate here. An empty result is `Ok`;
/// configuration errors come back as a [`PipelineError`] inside the
/// `anyhow::Error`.
pub async fn search<S: Store + ?Sized>(
    store: &S,
    req: &SearchRequest<'_>,
) -> Result<Vec<RetrievalHit>> {
    if req.query.trim().is_empty() || req.params.top_k == 0 {
        return Ok(Vec::new());
    }

    let query_vec = if req.mode.uses_vector() {
        let qv = match req.query_vec {
            Some(qv) => qv,
            None => bail!("query_vec is required for {} mode", req.mode),
        };
        if let Some(info) = store.index_info().await? {
            match req.query_model {
                Some(model) => info.check(model, qv.len())?,
                None => crate::embedding::check_dims(info.dims, qv.len())?,
            }
        }
        Some(qv)
    } else {
        None
    };

    let terms = lexical::query_terms(req.query);
    let k = req.params.candidate_k.max(req.params.top_k);

    let vector_fut = async {
        match query_vec {
            Some(qv) => store.vector_search(qv, k, req.filter).await,
            None => Ok(Vec::new()),
        }
    };
    let lexical_fut = async {
        if req.mode.uses_lexical() {
            store.keyword_search(&terms, k, req.filter).await
        } else {
            Ok(Vec::new())
        }
    };
    let (vector_candidates, lexical_candidates) = futures_util::join!(vector_fut, lexical_fut);
    let vector_candidates = vector_candidates?;
    let lexical_candidates = lexical_candidates?;

    if vector_candidates.is_empty() && lexical_candidates.is_empty() {
        return Ok(Vec::new());
    }

    let (w_v, w_l) = match req.mode {
        SearchMode::Vector => (1.0, 0.0),
        SearchMode::Text => (0.0, 1.0),
        SearchMode::Hybrid => (req.params.vector_weight, req.params.lexical_weight),
    };

    let norm_vector: HashMap<&str, f64> = normalize_scores(&vector_candidates)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.as_str(), s))
        .collect();
    let norm_lexical: HashMap<&str, f64> = normalize_scores(&lexical_candidates)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.as_str(), s))
        .collect();

    struct Merged<'c> {
        cand: &'c ChunkCandidate,
        vector_raw: Option<f64>,
        lexical_raw: Option<f64>,
    }

    let mut merged: HashMap<&str, Merged<'_>> = HashMap::new();
    for c in &vector_candidates {
        merged.insert(
            c.chunk_id.as_str(),
            Merged {
                cand: c,
                vector_raw: Some(c.raw_score),
                lexical_raw: None,
            },
        );
    }
    for c in &lexical_candidates {
        merged
            .entry(c.chunk_id.as_str())
            .or_insert(Merged {
                cand: c,
                vector_raw: None,
                lexical_raw: None,
            })
            .lexical_raw = Some(c.raw_score);
    }

    let mut hits: Vec<RetrievalHit> = merged
        .into_values()
        .map(|m| {
            let id = m.cand.chunk_id.as_str();
            let v = norm_vector.get(id).copied().unwrap_or(0.0);
            let l = norm_lexical.get(id).copied().unwrap_or(0.0);
            RetrievalHit {
                rank: 0,
                score: (w_v * v + w_l * l).clamp(0.0, 1.0),
                chunk_id: m.cand.chunk_id.clone(),
                document_id: m.cand.document_id.clone(),
                text: m.cand.text.clone(),
                vector_score: m.vector_raw,
                lexical_score: m.lexical_raw,
                created_at: m.cand.created_at,
            }
        })
        .collect();

    sort_hits(&mut hits);
    hits.truncate(req.params.top_k);
    for (i, hit) in hits.iter_mut().enumerate() {
        hit.rank = i + 1;
    }
    Ok(hits)
}

/// Score (desc), then newest chunk first, then chunk id.
pub fn sort_hits(hits: &mut [RetrievalHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.created_at.cmp(&a.created_at))
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

/// Convenience for callers that already hold a [`PipelineError`]-aware
/// result and need the typed error back.
pub fn pipeline_error(err: &anyhow::Error) -> Option<&PipelineError> {
    err.downcast_ref::<PipelineError>()
}
