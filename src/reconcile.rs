//! `docgate reconcile`: resolve chunks whose document is gone or rejected.

use anyhow::Result;

use docgate_core::store::{ReconcilePolicy, ReconcileReport, Store};

use crate::config::Config;
use crate::sqlite_store;

/// Apply `policy` (or the configured default) across the whole index.
pub async fn reconcile_index(
    config: &Config,
    store: &dyn Store,
    policy: Option<ReconcilePolicy>,
) -> Result<ReconcileReport> {
    let policy = policy.unwrap_or(config.pipeline.reconcile_policy);
    let report = store.reconcile(policy, None).await?;
    tracing::info!(
        policy = %policy,
        documents = report.documents,
        deleted = report.chunks_deleted,
        orphaned = report.chunks_orphaned,
        "reconcile finished"
    );
    Ok(report)
}

pub async fn run_reconcile(config: &Config, policy: Option<String>) -> Result<()> {
    let policy = policy.map(|p| p.parse()).transpose()?;
    let store = sqlite_store::open(config).await?;
    let report = reconcile_index(config, &store, policy).await?;

    println!("reconcile ({})", report.policy.unwrap_or_default());
    println!("  documents affected: {}", report.documents);
    println!("  chunks deleted: {}", report.chunks_deleted);
    println!("  chunks orphaned: {}", report.chunks_orphaned);
    println!("ok");

    store.pool().close().await;
    Ok(())
}
