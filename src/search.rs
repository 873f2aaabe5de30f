//! Query frontend shared by `docgate search` and `POST /search`.
//!
//! Embeds the query with the configured provider and delegates ranking to
//! [`docgate_core::search::search`].

use anyhow::{bail, Result};
use serde::Deserialize;

use docgate_core::embedding::{embed_one, EmbeddingProvider};
use docgate_core::models::RetrievalHit;
use docgate_core::search::{search, SearchMode, SearchRequest};
use docgate_core::store::{SearchFilter, Store};

use crate::config::Config;
use crate::embedding;
use crate::sqlite_store;

/// A search as posted to the HTTP API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub mode: Option<SearchMode>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub filter: SearchFilter,
}

pub async fn search_documents(
    config: &Config,
    store: &dyn Store,
    embedder: &dyn EmbeddingProvider,
    q: &SearchQuery,
) -> Result<Vec<RetrievalHit>> {
    let mode = q.mode.unwrap_or(config.retrieval.default_mode);
    let query_vec = if mode != SearchMode::Text && !q.query.trim().is_empty() {
        Some(embed_one(embedder, &q.query).await?)
    } else {
        None
    };

    let req = SearchRequest {
        query: &q.query,
        query_vec: query_vec.as_deref(),
        query_model: Some(embedder.model_name()),
        mode,
        filter: &q.filter,
        params: config.retrieval.params(q.top_k),
    };
    let hits = search(store, &req).await?;
    tracing::debug!(mode = %mode, hits = hits.len(), "search finished");
    Ok(hits)
}

/// Parse `key=value` tag filters.
pub fn parse_tags(tags: &[String]) -> Result<docgate_core::models::Tags> {
    let mut out = docgate_core::models::Tags::new();
    for tag in tags {
        match tag.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => {
                out.insert(k.trim().to_string(), v.trim().to_string());
            }
            _ => bail!("Invalid tag filter '{}'. Use key=value.", tag),
        }
    }
    Ok(out)
}

pub async fn run_search(
    config: &Config,
    query: &str,
    mode: Option<String>,
    top_k: Option<usize>,
    source: Option<String>,
    tags: Vec<String>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let q = SearchQuery {
        query: query.to_string(),
        mode: mode.map(|m| m.parse()).transpose()?,
        top_k,
        filter: SearchFilter {
            source,
            tags: parse_tags(&tags)?,
        },
    };

    let store = sqlite_store::open(config).await?;
    let embedder = embedding::create_provider(&config.embedding)?;
    let hits = search_documents(config, &store, embedder.as_ref(), &q).await?;

    if hits.is_empty() {
        println!("No results.");
    }
    for hit in &hits {
        println!(
            "{}. [{:.3}] {} (document {})",
            hit.rank, hit.score, hit.chunk_id, hit.document_id
        );
        let preview: String = hit.text.chars().take(200).collect();
        println!("   {}", preview.replace('\n', " "));
    }

    store.pool().close().await;
    Ok(())
}
