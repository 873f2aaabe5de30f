//! `docgate ingest`: run the configured connector through the pipeline.
//!
//! Documents a reviewer sent back with `reprocess` sit in `pending` and
//! are picked up again when the connector yields them.

use std::sync::Arc;

use anyhow::{bail, Result};

use docgate_core::models::DocumentStatus;
use docgate_core::store::Store;

use crate::config::Config;
use crate::connector::FilesystemConnector;
use crate::embedding;
use crate::extract::ocr::create_ocr_engine;
use crate::pipeline::Pipeline;
use crate::sqlite_store;

/// Pipeline wired with the configured embedding provider, OCR engine and
/// notification sink.
pub async fn build_pipeline(config: Arc<Config>, store: Arc<dyn Store>) -> Result<Pipeline> {
    let embedder = embedding::create_provider(&config.embedding)?;
    let ocr = create_ocr_engine(&config.ocr);
    Pipeline::new(config, store, embedder, ocr).await
}

pub async fn run_ingest(config: &Config, limit: Option<usize>) -> Result<()> {
    let Some(fs_config) = config.connectors.filesystem.clone() else {
        bail!("No connector configured. Add a [connectors.filesystem] section to the config.");
    };

    let config = Arc::new(config.clone());
    let store = Arc::new(sqlite_store::open(&config).await?);
    let pipeline = Arc::new(build_pipeline(config.clone(), store.clone()).await?);

    let connector = FilesystemConnector::new(fs_config);
    let report = pipeline.ingest_from(&connector, limit).await?;
    let pending = store.list_documents(Some(DocumentStatus::Pending)).await?;

    println!("ingest filesystem");
    println!("  fetched: {}", report.fetched);
    println!("  skipped (unchanged): {}", report.skipped);
    println!("  indexed: {}", report.indexed);
    println!("  needs review: {}", report.needs_review);
    println!("  rejected: {}", report.rejected);
    println!("  failed: {}", report.failed);
    println!("  chunks written: {}", report.chunks);
    println!("  trigger events: {}", report.triggers);
    if !pending.is_empty() {
        println!("  still pending: {}", pending.len());
    }
    println!("ok");

    store.pool().close().await;
    Ok(())
}
