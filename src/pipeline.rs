//! Document pipeline orchestration.
//!
//! One document moves through three leased stages:
//!
//! ```text
//! admit:   size check → type routing                     → quality_checked
//! extract: engine → quality signals → gate (→ enhance)   → extracted | needs_review | rejected
//! index:   chunk → embed → atomic index write → triggers → chunked → indexed
//! ```
//!
//! Each stage holds the document's lease and runs under the configured
//! lease timeout. Every status change goes through [`Store::set_status`]
//! so the transition is recorded. Failures that a human can resolve land
//! in the review queue; embedding dimension/model mismatches abort the
//! batch.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use docgate_core::chunk::{chunk_document, detect_strategy, PageText};
use docgate_core::embedding::{check_dims, EmbeddingProvider};
use docgate_core::error::PipelineError;
use docgate_core::gate::{document_status, ContentClass, GateDecision, PageGate};
use docgate_core::models::{
    checksum, Chunk, Document, DocumentRecord, DocumentStatus, ExtractionResult, GateState, Page,
    QualitySignal, ReviewItem, Route,
};
use docgate_core::store::Store;
use docgate_core::trigger::TriggerEngine;

use crate::config::Config;
use crate::connector::Connector;
use crate::enhance::Enhancer;
use crate::extract::ocr::OcrEngine;
use crate::extract::{aggregate_confidence, Engines, ExtractionInput, PageOutput};
use crate::lease::LeaseTable;
use crate::quality::QualityAssessor;
use crate::router;
use crate::sinks::{create_notification_sink, NotificationSink, ReviewSink, StoreReviewSink};

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub document_id: String,
    pub status: DocumentStatus,
    /// Not processed: unchanged since the last run, or leased elsewhere.
    pub skipped: bool,
    pub chunks: usize,
    pub triggers: usize,
}

impl Outcome {
    fn skipped(document_id: &str, status: DocumentStatus) -> Self {
        Self {
            document_id: document_id.to_string(),
            status,
            skipped: true,
            chunks: 0,
            triggers: 0,
        }
    }

    fn finished(doc: &Document) -> Self {
        Self {
            document_id: doc.id.clone(),
            status: doc.status,
            skipped: false,
            chunks: 0,
            triggers: 0,
        }
    }
}

/// Totals for an ingest run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub fetched: usize,
    pub skipped: usize,
    pub indexed: usize,
    pub needs_review: usize,
    pub rejected: usize,
    pub failed: usize,
    pub chunks: usize,
    pub triggers: usize,
}

impl IngestReport {
    pub fn record(&mut self, outcome: &Outcome) {
        self.chunks += outcome.chunks;
        self.triggers += outcome.triggers;
        if outcome.skipped {
            self.skipped += 1;
            return;
        }
        match outcome.status {
            DocumentStatus::Indexed => self.indexed += 1,
            DocumentStatus::NeedsReview => self.needs_review += 1,
            DocumentStatus::Rejected => self.rejected += 1,
            _ => self.failed += 1,
        }
    }
}

/// Result of gating every page of a document.
struct Gated {
    pages: Vec<Page>,
    status: DocumentStatus,
    /// `(page, reason, detail)` for pages that were not accepted.
    issues: Vec<(u32, String, String)>,
    lowest_confidence: Option<f32>,
    /// Document-level confidence over the final page results.
    confidence: f32,
}

impl Gated {
    fn text(&self) -> String {
        self.pages
            .iter()
            .filter_map(|p| p.result.as_ref())
            .map(|r| r.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

pub struct Pipeline {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    engines: Arc<Engines>,
    assessor: Arc<QualityAssessor>,
    enhancer: Arc<Enhancer>,
    triggers: TriggerEngine,
    review: Arc<dyn ReviewSink>,
    notifier: Arc<dyn NotificationSink>,
    leases: LeaseTable,
    lease_timeout: Duration,
}

impl Pipeline {
    /// Build a pipeline. Fails when `embedder` does not match the model
    /// the index was built with, or when a trigger rule cannot be
    /// compiled.
    pub async fn new(
        config: Arc<Config>,
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        ocr: Arc<dyn OcrEngine>,
    ) -> Result<Self> {
        if let Some(info) = store.index_info().await? {
            info.check(embedder.model_name(), embedder.dims())?;
        }

        let rules: Vec<_> = config.triggers.iter().map(|t| t.rule()).collect();
        let triggers = TriggerEngine::compile(&rules, embedder.as_ref())
            .await
            .context("Failed to compile trigger rules")?;

        Ok(Self {
            engines: Arc::new(Engines::new(ocr, config.pipeline.cad_confidence_cap)),
            assessor: Arc::new(QualityAssessor::new(config.quality.policy())),
            enhancer: Arc::new(Enhancer::new(config.enhance.clone())),
            review: Arc::new(StoreReviewSink::new(store.clone())),
            notifier: create_notification_sink(&config.notifications)?,
            leases: LeaseTable::new(),
            lease_timeout: Duration::from_secs(config.pipeline.lease_timeout_secs),
            triggers,
            config,
            store,
            embedder,
        })
    }

    pub fn with_review_sink(mut self, sink: Arc<dyn ReviewSink>) -> Self {
        self.review = sink;
        self
    }

    pub fn with_notifier(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifier = sink;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn leases(&self) -> &LeaseTable {
        &self.leases
    }

    /// Pull batches from `connector` until it is drained or `limit`
    /// documents were fetched.
    pub async fn ingest_from(
        self: &Arc<Self>,
        connector: &dyn Connector,
        limit: Option<usize>,
    ) -> Result<IngestReport> {
        let batch_size = self.config.pipeline.batch_size;
        let mut report = IngestReport::default();
        loop {
            let want = match limit {
                Some(l) => l.saturating_sub(report.fetched).min(batch_size),
                None => batch_size,
            };
            if want == 0 {
                break;
            }
            let batch = connector.fetch_next_batch(want).await?;
            if batch.is_empty() {
                break;
            }
            report.fetched += batch.len();
            for outcome in self.process_batch(batch).await? {
                report.record(&outcome);
            }
        }
        tracing::info!(
            connector = connector.name(),
            fetched = report.fetched,
            indexed = report.indexed,
            needs_review = report.needs_review,
            rejected = report.rejected,
            "ingest finished"
        );
        Ok(report)
    }

    /// Process documents concurrently, bounded by the worker count.
    /// Outcomes come back in input order. A fatal error is returned after
    /// the other documents of the batch have finished.
    pub async fn process_batch(self: &Arc<Self>, records: Vec<DocumentRecord>) -> Result<Vec<Outcome>> {
        let permits = Arc::new(Semaphore::new(self.config.pipeline.worker_count()));
        let mut tasks = JoinSet::new();

        for (i, record) in records.into_iter().enumerate() {
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .context("worker pool closed")?;
            let pipeline = Arc::clone(self);
            tasks.spawn(async move {
                let _permit = permit;
                (i, pipeline.process(record).await)
            });
        }

        let mut outcomes = Vec::new();
        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            let (i, result) = joined.context("pipeline worker panicked")?;
            match result {
                Ok(outcome) => outcomes.push((i, outcome)),
                Err(e) => {
                    tracing::error!(error = %format!("{:#}", e), "document aborted the batch");
                    fatal.get_or_insert(e);
                }
            }
        }
        if let Some(e) = fatal {
            return Err(e);
        }
        outcomes.sort_by_key(|(i, _)| *i);
        Ok(outcomes.into_iter().map(|(_, o)| o).collect())
    }

    /// Run one document through the pipeline.
    ///
    /// A document whose checksum is unchanged is skipped when it is
    /// already indexed, waiting for review, or rejected. Only fatal
    /// configuration errors and storage failures are returned as `Err`.
    pub async fn process(&self, record: DocumentRecord) -> Result<Outcome> {
        let existing = self.store.get_document(&record.id).await?;
        if let Some(prev) = &existing {
            let unchanged = prev.checksum == checksum(&record.bytes);
            let settled = matches!(
                prev.status,
                DocumentStatus::Indexed | DocumentStatus::NeedsReview | DocumentStatus::Rejected
            );
            if unchanged && settled {
                tracing::debug!(document_id = %prev.id, status = %prev.status, "unchanged, skipping");
                return Ok(Outcome::skipped(&prev.id, prev.status));
            }
        }

        let mut doc = Document::from_record(&record);
        match &existing {
            Some(prev) => {
                doc.created_at = prev.created_at;
                doc.status = prev.status;
            }
            None => doc.status = DocumentStatus::Pending,
        }

        match self.run(&mut doc, record.bytes, existing.is_some()).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => self.handle_failure(&mut doc, err).await,
        }
    }

    async fn run(&self, doc: &mut Document, bytes: Vec<u8>, known: bool) -> Result<Outcome> {
        let id = doc.id.clone();

        let route = self
            .staged(&id, "admit", self.admit(doc, &bytes, known))
            .await?;

        let gated = self
            .staged(&id, "extract", self.extract(doc, bytes, route))
            .await?;

        match gated.status {
            DocumentStatus::Extracted => {
                let detail = format!(
                    "{} pages accepted, confidence {:.2}",
                    gated.pages.len(),
                    gated.confidence
                );
                self.transition(doc, DocumentStatus::Extracted, Some(&detail))
                    .await?;
                let (chunks, triggers) = self
                    .staged(&id, "index", self.index(doc, &gated.pages))
                    .await?;
                Ok(Outcome {
                    chunks,
                    triggers,
                    ..Outcome::finished(doc)
                })
            }
            DocumentStatus::Rejected => {
                let detail = gated
                    .issues
                    .first()
                    .map(|(page, _, detail)| format!("page {}: {}", page, detail));
                self.reject(doc, detail.as_deref()).await?;
                Ok(Outcome::finished(doc))
            }
            _ => {
                let (reason, detail) = summarize_issues(&gated.issues);
                let detail = format!("{} (document confidence {:.2})", detail, gated.confidence);
                let item = ReviewItem {
                    document_id: id,
                    reason,
                    detail,
                    lowest_confidence: gated.lowest_confidence,
                    text_so_far: gated.text(),
                    created_at: Utc::now(),
                };
                self.send_to_review(doc, item).await?;
                Ok(Outcome::finished(doc))
            }
        }
    }

    /// Run `work` while holding the document's lease for `stage`.
    async fn staged<T>(
        &self,
        document_id: &str,
        stage: &str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let _lease = self.leases.acquire(document_id, stage)?;
        tracing::debug!(document_id, stage, "stage started");
        match tokio::time::timeout(self.lease_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                self.leases.revoke(document_id);
                Err(PipelineError::LeaseTimeout {
                    stage: stage.to_string(),
                    timeout_secs: self.lease_timeout.as_secs(),
                }
                .into())
            }
        }
    }

    async fn admit(&self, doc: &mut Document, bytes: &[u8], known: bool) -> Result<Route> {
        self.store.upsert_document(doc).await?;
        if known {
            // A new version replaces any open review item and the chunks of
            // the version that was indexed before.
            self.store.take_review(&doc.id).await?;
            let report = self
                .store
                .retire_chunks(&doc.id, self.config.pipeline.reconcile_policy)
                .await?;
            if report.documents > 0 {
                tracing::info!(document_id = %doc.id, ?report, "retired chunks of previous version");
            }
        }
        let received = format!("received from {}", doc.source);
        self.transition(doc, DocumentStatus::Ingested, Some(&received))
            .await?;

        let bucket = self.assessor.policy().check_size(doc.size_bytes)?;

        let decision = router::route(&doc.declared_mime, &doc.filename, bytes);
        doc.detected_mime = Some(decision.detected_mime.clone());
        doc.route = Some(decision.route);
        self.store.upsert_document(doc).await?;
        tracing::info!(
            document_id = %doc.id,
            route = %decision.route,
            detected = %decision.detected_mime,
            size_bucket = ?bucket,
            "document routed"
        );

        if decision.route == Route::Unknown {
            return Err(PipelineError::UnsupportedType {
                detected: decision.detected_mime,
            }
            .into());
        }

        let detail = format!("route {}, size {:?}", decision.route, bucket);
        self.transition(doc, DocumentStatus::QualityChecked, Some(&detail))
            .await?;
        Ok(decision.route)
    }

    async fn extract(&self, doc: &mut Document, bytes: Vec<u8>, route: Route) -> Result<Gated> {
        self.transition(doc, DocumentStatus::Extracting, Some(route.as_str()))
            .await?;

        let engine_name = route.method().map(|m| m.as_str()).unwrap_or("unknown");
        let engines = self.engines.clone();
        let assessor = self.assessor.clone();
        let id = doc.id.clone();
        let filename = doc.filename.clone();
        let mime = doc.detected_mime.clone().unwrap_or_default();
        let size = doc.size_bytes;

        let outputs = tokio::task::spawn_blocking(move || {
            let engine = engines
                .for_route(route)
                .ok_or_else(|| PipelineError::UnsupportedType {
                    detected: mime.clone(),
                })?;
            let pages = engine.extract(&ExtractionInput {
                document_id: &id,
                filename: &filename,
                detected_mime: &mime,
                bytes: &bytes,
            })?;
            Ok::<_, PipelineError>(
                pages
                    .into_iter()
                    .map(|p| {
                        let signal = measure(&assessor, &p, size, 1);
                        (p, signal)
                    })
                    .collect::<Vec<_>>(),
            )
        })
        .await
        .map_err(|e| PipelineError::extraction_failed(engine_name, format!("engine task failed: {}", e)))??;

        if outputs.is_empty() {
            return Err(PipelineError::extraction_failed(engine_name, "no pages extracted").into());
        }

        let class = ContentClass::from(route);
        let mut gated = Gated {
            pages: Vec::with_capacity(outputs.len()),
            status: DocumentStatus::NeedsReview,
            issues: Vec::new(),
            lowest_confidence: None,
            confidence: 0.0,
        };
        let mut enhancing = false;

        for (output, signal) in outputs {
            let mut gate = PageGate::new(self.config.gate.policy(), class);
            let flags = signal.flags;
            let mut page = Page {
                document_id: doc.id.clone(),
                number: output.number,
                signals: vec![signal],
                result: Some(output.result.clone()),
                gate_state: GateState::Pending,
            };

            let can_enhance = output.image.is_some() && self.enhancer.enabled();
            let mut decision = match gate.evaluate(output.result.confidence, can_enhance, flags) {
                Ok(d) => d,
                Err(e) => gate.fail(&e),
            };

            if decision == GateDecision::Enhance {
                if flags.any() {
                    tracing::info!(
                        document_id = %doc.id,
                        page = output.number,
                        ?flags,
                        "page image flagged by quality signal, enhancing"
                    );
                }
                if !enhancing {
                    let detail = format!("page {}", output.number);
                    self.transition(doc, DocumentStatus::Enhancing, Some(&detail))
                        .await?;
                    enhancing = true;
                }
                let version = page.signals.len() as u32 + 1;
                decision = match self.enhance_page(&output, size, version).await {
                    Ok((result, signal)) => {
                        let confidence = result.confidence;
                        let flags = signal.flags;
                        page.signals.push(signal);
                        page.result = Some(result);
                        match gate.evaluate(confidence, false, flags) {
                            Ok(d) => d,
                            Err(e) => gate.fail(&e),
                        }
                    }
                    Err(e) => gate.fail(&e),
                };
            }

            tracing::info!(
                document_id = %doc.id,
                page = page.number,
                confidence = ?page.result.as_ref().map(|r| r.confidence),
                state = %gate.state(),
                "page gated"
            );

            match decision {
                GateDecision::Review { reason, detail } | GateDecision::Reject { reason, detail } => {
                    gated.issues.push((page.number, reason, detail));
                }
                GateDecision::Accept | GateDecision::Enhance => {}
            }
            if let Some(low) = gate.lowest_confidence() {
                gated.lowest_confidence =
                    Some(gated.lowest_confidence.map_or(low, |l| l.min(low)));
            }

            page.gate_state = gate.state();
            self.store.save_page(&page).await?;
            gated.pages.push(page);
        }

        let states: Vec<GateState> = gated.pages.iter().map(|p| p.gate_state).collect();
        gated.status = document_status(&states);
        if let Some(method) = route.method() {
            let confidences: Vec<f32> = gated
                .pages
                .iter()
                .filter_map(|p| p.result.as_ref().map(|r| r.confidence))
                .collect();
            gated.confidence = aggregate_confidence(method, &confidences);
        }
        tracing::info!(
            document_id = %doc.id,
            status = %gated.status,
            confidence = gated.confidence,
            "document gated"
        );
        Ok(gated)
    }

    /// Enhance a page image and re-run OCR on it once.
    async fn enhance_page(
        &self,
        output: &PageOutput,
        size: u64,
        version: u32,
    ) -> Result<(ExtractionResult, QualitySignal), PipelineError> {
        let Some(image) = output.image.clone() else {
            return Err(PipelineError::extraction_failed("enhance", "page has no image"));
        };
        let method = output.result.method;
        let number = output.number;
        let enhancer = self.enhancer.clone();
        let engines = self.engines.clone();
        let assessor = self.assessor.clone();

        tokio::task::spawn_blocking(move || -> Result<_, PipelineError> {
            let enhanced = enhancer.enhance(&image)?;
            let mut result = engines.ocr().recognize(&enhanced.png, method)?;
            result.enhanced = true;
            let signal = assessor.assess_image(number, &enhanced.png, size, version)?;
            tracing::debug!(
                page = number,
                steps = ?enhanced.steps,
                confidence = result.confidence,
                "OCR re-run on enhanced image"
            );
            Ok((result, signal))
        })
        .await
        .map_err(|e| PipelineError::extraction_failed("enhance", format!("enhancement task failed: {}", e)))?
    }

    /// Chunk, embed and index accepted pages, then evaluate triggers.
    /// Returns `(chunks, trigger events)`.
    async fn index(&self, doc: &mut Document, pages: &[Page]) -> Result<(usize, usize)> {
        let texts: Vec<PageText> = pages
            .iter()
            .filter_map(|p| {
                let r = p.result.as_ref()?;
                let text = PageText::new(p.number, r.text.clone());
                Some(match r.languages.first() {
                    Some(lang) => text.with_language(lang.clone()),
                    None => text,
                })
            })
            .collect();
        let full = texts
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let strategy = detect_strategy(&doc.filename, &full, &self.config.chunking.section_keywords);
        let chunks = chunk_document(&doc.id, &texts, &self.config.chunking.params(), strategy);

        let detail = format!("{} chunks, {:?} strategy", chunks.len(), strategy);
        self.transition(doc, DocumentStatus::Chunked, Some(&detail))
            .await?;

        let vectors = if chunks.is_empty() {
            Vec::new()
        } else {
            let inputs: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            self.embedder.embed_batch(&inputs).await?
        };
        for v in &vectors {
            check_dims(self.embedder.dims(), v.len())?;
        }

        self.store
            .index_chunks(&doc.id, &chunks, &vectors, self.embedder.model_name())
            .await?;
        let detail = format!("{} chunks indexed", chunks.len());
        self.transition(doc, DocumentStatus::Indexed, Some(&detail))
            .await?;

        let fired = self.fire_triggers(&chunks, &vectors).await?;
        Ok((chunks.len(), fired))
    }

    async fn fire_triggers(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<usize> {
        if self.triggers.is_empty() {
            return Ok(0);
        }
        let mut fired = 0;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            for event in self.triggers.evaluate(chunk, vector)? {
                self.store.record_trigger_event(&event).await?;
                if let Err(e) = self.notifier.notify(&event).await {
                    tracing::warn!(
                        sink = self.notifier.name(),
                        category = %event.category,
                        error = %format!("{:#}", e),
                        "trigger notification failed"
                    );
                }
                fired += 1;
            }
        }
        Ok(fired)
    }

    async fn handle_failure(&self, doc: &mut Document, err: anyhow::Error) -> Result<Outcome> {
        let Some(perr) = err.downcast_ref::<PipelineError>().cloned() else {
            let detail = format!("{:#}", err);
            tracing::error!(document_id = %doc.id, error = %detail, "pipeline failed");
            self.transition(doc, DocumentStatus::Failed, Some(&detail))
                .await?;
            return Ok(Outcome::finished(doc));
        };

        match &perr {
            PipelineError::LeaseHeld { stage, .. } => {
                tracing::warn!(document_id = %doc.id, stage = %stage, "document is leased, skipping");
                Ok(Outcome::skipped(&doc.id, doc.status))
            }
            e if e.is_fatal() => {
                tracing::error!(document_id = %doc.id, error = %e, "fatal embedding configuration error");
                self.transition(doc, DocumentStatus::Failed, Some(&e.to_string()))
                    .await?;
                Err(err)
            }
            PipelineError::OversizeRejected { .. } => {
                tracing::warn!(document_id = %doc.id, error = %perr, "document rejected");
                self.reject(doc, Some(&perr.to_string())).await?;
                Ok(Outcome::finished(doc))
            }
            e if e.routes_to_review() => {
                let item = ReviewItem {
                    document_id: doc.id.clone(),
                    reason: e.code().to_string(),
                    detail: e.to_string(),
                    lowest_confidence: None,
                    text_so_far: String::new(),
                    created_at: Utc::now(),
                };
                self.send_to_review(doc, item).await?;
                Ok(Outcome::finished(doc))
            }
            e => {
                tracing::error!(document_id = %doc.id, error = %e, "pipeline failed");
                self.transition(doc, DocumentStatus::Failed, Some(&e.to_string()))
                    .await?;
                Ok(Outcome::finished(doc))
            }
        }
    }

    async fn send_to_review(&self, doc: &mut Document, item: ReviewItem) -> Result<()> {
        self.transition(doc, DocumentStatus::NeedsReview, Some(&item.reason))
            .await?;
        self.review.submit(&item).await
    }

    async fn reject(&self, doc: &mut Document, detail: Option<&str>) -> Result<()> {
        self.transition(doc, DocumentStatus::Rejected, detail).await?;
        let report = self
            .store
            .reconcile(self.config.pipeline.reconcile_policy, Some(&doc.id))
            .await?;
        if report.documents > 0 {
            tracing::info!(document_id = %doc.id, ?report, "reconciled chunks of rejected document");
        }
        Ok(())
    }

    async fn transition(
        &self,
        doc: &mut Document,
        to: DocumentStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        let event = self.store.set_status(&doc.id, to, detail).await?;
        tracing::info!(
            document_id = %doc.id,
            from = ?event.from.map(|s| s.as_str()),
            to = %to,
            detail = detail.unwrap_or(""),
            "status changed"
        );
        doc.status = to;
        Ok(())
    }
}

/// Quality signal for one extracted page: pixel measurements when the
/// page has an image, text density otherwise.
fn measure(assessor: &QualityAssessor, output: &PageOutput, size: u64, version: u32) -> QualitySignal {
    if let Some(image) = &output.image {
        match assessor.assess_image(output.number, image, size, version) {
            Ok(signal) => return signal,
            Err(e) => tracing::warn!(page = output.number, error = %e, "page image unreadable, measuring text"),
        }
    }
    assessor.assess_text(output.number, &output.result.text, size, version)
}

fn summarize_issues(issues: &[(u32, String, String)]) -> (String, String) {
    let reason = issues
        .first()
        .map(|(_, reason, _)| reason.clone())
        .unwrap_or_else(|| "review_required".to_string());
    let detail = issues
        .iter()
        .map(|(page, _, detail)| format!("page {}: {}", page, detail))
        .collect::<Vec<_>>()
        .join("; ");
    (reason, detail)
}
