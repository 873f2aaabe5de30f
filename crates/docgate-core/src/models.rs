//! Core data models that flow through the docgate pipeline.
//!
//! A [`DocumentRecord`] arrives from a connector, becomes a [`Document`]
//! with one or more [`Page`]s, each page collects versioned
//! [`QualitySignal`]s and an [`ExtractionResult`], accepted text is split
//! into [`Chunk`]s, and queries produce [`RetrievalHit`]s.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Free-form document tags (e.g. `department = "maintenance"`), used by
/// query filters.
pub type Tags = BTreeMap<String, String>;

/// Current time as Unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// A document as handed over by a connector, already materialized.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: String,
    pub source: String,
    pub declared_mime: String,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub tags: Tags,
}

/// Lifecycle status of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Ingested,
    QualityChecked,
    Extracting,
    Enhancing,
    NeedsReview,
    Extracted,
    Chunked,
    Indexed,
    Rejected,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Ingested => "ingested",
            DocumentStatus::QualityChecked => "quality_checked",
            DocumentStatus::Extracting => "extracting",
            DocumentStatus::Enhancing => "enhancing",
            DocumentStatus::NeedsReview => "needs_review",
            DocumentStatus::Extracted => "extracted",
            DocumentStatus::Chunked => "chunked",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Rejected => "rejected",
            DocumentStatus::Failed => "failed",
        }
    }

    /// Statuses the automated pipeline will not move a document out of.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::NeedsReview
                | DocumentStatus::Indexed
                | DocumentStatus::Rejected
                | DocumentStatus::Failed
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "pending" => DocumentStatus::Pending,
            "ingested" => DocumentStatus::Ingested,
            "quality_checked" => DocumentStatus::QualityChecked,
            "extracting" => DocumentStatus::Extracting,
            "enhancing" => DocumentStatus::Enhancing,
            "needs_review" => DocumentStatus::NeedsReview,
            "extracted" => DocumentStatus::Extracted,
            "chunked" => DocumentStatus::Chunked,
            "indexed" => DocumentStatus::Indexed,
            "rejected" => DocumentStatus::Rejected,
            "failed" => DocumentStatus::Failed,
            other => bail!("unknown document status: {}", other),
        })
    }
}

/// Extraction path selected by the type router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    DirectText,
    Office,
    PdfText,
    PdfHybrid,
    ImageOcr,
    CadMetadata,
    Unknown,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::DirectText => "direct_text",
            Route::Office => "office",
            Route::PdfText => "pdf_text",
            Route::PdfHybrid => "pdf_hybrid",
            Route::ImageOcr => "image_ocr",
            Route::CadMetadata => "cad_metadata",
            Route::Unknown => "unknown",
        }
    }

    /// The engine that serves this route, or `None` for [`Route::Unknown`].
    pub fn method(&self) -> Option<ExtractionMethod> {
        match self {
            Route::DirectText => Some(ExtractionMethod::DirectText),
            Route::Office => Some(ExtractionMethod::Office),
            Route::PdfText => Some(ExtractionMethod::PdfText),
            Route::PdfHybrid => Some(ExtractionMethod::PdfHybrid),
            Route::ImageOcr => Some(ExtractionMethod::ImageOcr),
            Route::CadMetadata => Some(ExtractionMethod::CadMetadata),
            Route::Unknown => None,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Route {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "direct_text" => Route::DirectText,
            "office" => Route::Office,
            "pdf_text" => Route::PdfText,
            "pdf_hybrid" => Route::PdfHybrid,
            "image_ocr" => Route::ImageOcr,
            "cad_metadata" => Route::CadMetadata,
            "unknown" => Route::Unknown,
            other => bail!("unknown route: {}", other),
        })
    }
}

/// Identifier of the engine that produced an [`ExtractionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    DirectText,
    Office,
    PdfText,
    PdfHybrid,
    ImageOcr,
    CadMetadata,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::DirectText => "direct_text",
            ExtractionMethod::Office => "office",
            ExtractionMethod::PdfText => "pdf_text",
            ExtractionMethod::PdfHybrid => "pdf_hybrid",
            ExtractionMethod::ImageOcr => "image_ocr",
            ExtractionMethod::CadMetadata => "cad_metadata",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized document tracked by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source: String,
    pub filename: String,
    pub declared_mime: String,
    pub detected_mime: Option<String>,
    pub size_bytes: u64,
    /// SHA-256 hex of the raw payload.
    pub checksum: String,
    pub status: DocumentStatus,
    pub route: Option<Route>,
    pub tags: Tags,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds.
    pub updated_at: i64,
}

impl Document {
    /// Build a freshly ingested document from a connector record.
    pub fn from_record(record: &DocumentRecord) -> Self {
        let now = now_millis();
        Self {
            id: record.id.clone(),
            source: record.source.clone(),
            filename: record.filename.clone(),
            declared_mime: record.declared_mime.clone(),
            detected_mime: None,
            size_bytes: record.bytes.len() as u64,
            checksum: checksum(&record.bytes),
            status: DocumentStatus::Ingested,
            route: None,
            tags: record.tags.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// File size classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeBucket {
    Good,
    Warning,
    Oversize,
}

/// Text density classification (share of the page covered by text).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DensityBand {
    Poor,
    Warning,
    Good,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityFlags {
    pub low_resolution: bool,
    pub blurry: bool,
    pub low_contrast: bool,
}

impl QualityFlags {
    pub fn any(&self) -> bool {
        self.low_resolution || self.blurry || self.low_contrast
    }
}

/// Immutable quality measurement for one page.
///
/// Re-assessing a page after enhancement produces a new signal with a
/// higher `version`; earlier signals are kept as an audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySignal {
    pub version: u32,
    pub page: u32,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub blur_variance: Option<f32>,
    pub contrast: Option<f32>,
    pub text_density_pct: Option<f32>,
    pub size_bucket: SizeBucket,
    pub density_band: Option<DensityBand>,
    pub flags: QualityFlags,
    /// Unix milliseconds.
    pub measured_at: i64,
}

/// Output of one extraction engine for one page (or a whole
/// non-paginated document).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub text: String,
    pub languages: Vec<String>,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f32,
    pub method: ExtractionMethod,
    pub enhanced: bool,
    /// Word counts per detected script (OCR only).
    #[serde(default)]
    pub words_by_script: BTreeMap<String, usize>,
    /// Optional sub-structures (CAD layers, sheet names, ...).
    #[serde(default)]
    pub structures: Option<serde_json::Value>,
}

impl ExtractionResult {
    pub fn new(method: ExtractionMethod, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            languages: Vec::new(),
            confidence: clamp_confidence(confidence),
            method,
            enhanced: false,
            words_by_script: BTreeMap::new(),
            structures: None,
        }
    }

    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    pub fn with_structures(mut self, structures: serde_json::Value) -> Self {
        self.structures = Some(structures);
        self
    }
}

fn clamp_confidence(c: f32) -> f32 {
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

/// Per-page confidence gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Pending,
    Accepted,
    Enhancing,
    ReviewRequired,
    Rejected,
}

impl GateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateState::Pending => "pending",
            GateState::Accepted => "accepted",
            GateState::Enhancing => "enhancing",
            GateState::ReviewRequired => "review_required",
            GateState::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GateState::Accepted | GateState::ReviewRequired | GateState::Rejected
        )
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page of a document with its quality history and extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub document_id: String,
    /// 1-based page number.
    pub number: u32,
    pub signals: Vec<QualitySignal>,
    pub result: Option<ExtractionResult>,
    pub gate_state: GateState,
}

impl Page {
    pub fn latest_signal(&self) -> Option<&QualitySignal> {
        self.signals.iter().max_by_key(|s| s.version)
    }
}

/// A bounded, overlapping unit of accepted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    /// Weak reference: used for lookup, never ownership.
    pub document_id: String,
    /// Strictly increasing within a document, starting at 0.
    pub ordinal: i64,
    pub text: String,
    /// SHA-256 hex of `text`.
    pub hash: String,
    pub page_start: u32,
    pub page_end: u32,
    pub language: Option<String>,
    /// Unix milliseconds.
    pub created_at: i64,
}

/// A ranked query result.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalHit {
    /// 1-based rank.
    pub rank: usize,
    /// Final normalized score in `[0.0, 1.0]`.
    pub score: f64,
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    /// Raw cosine similarity, if the chunk came from the vector path.
    pub vector_score: Option<f64>,
    /// Raw fuzzy lexical score, if the chunk came from the lexical path.
    pub lexical_score: Option<f64>,
    /// Chunk creation time (Unix milliseconds).
    pub created_at: i64,
}

/// A standing similarity pattern evaluated against new chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub category: String,
    pub reference_text: String,
    pub threshold: f32,
}

/// Emitted when a new chunk matches a [`TriggerRule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub category: String,
    pub chunk_id: String,
    pub document_id: String,
    pub score: f32,
    pub timestamp: DateTime<Utc>,
}

/// Work item for a human reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub document_id: String,
    /// Machine code, e.g. `extraction_failed` or `cad_metadata`.
    pub reason: String,
    pub detail: String,
    pub lowest_confidence: Option<f32>,
    pub text_so_far: String,
    pub created_at: DateTime<Utc>,
}

/// Durable record of a status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub document_id: String,
    pub from: Option<DocumentStatus>,
    pub to: DocumentStatus,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Reviewer decision for a document in the review queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    /// Move the document back to `pending` for another pipeline run.
    Reprocess,
    /// Finalize the rejection.
    Reject,
}

impl FromStr for ReviewAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "reprocess" => Ok(ReviewAction::Reprocess),
            "reject" => Ok(ReviewAction::Reject),
            other => bail!("unknown review action: {}. Use reprocess or reject.", other),
        }
    }
}
