//! Pipeline error taxonomy.
//!
//! Every failure the pipeline can surface to a caller or to human review
//! is one of these variants. Plumbing errors (I/O, SQL, HTTP) stay in
//! `anyhow::Error` at the application layer; a [`PipelineError`] can be
//! recovered from an `anyhow::Error` with `downcast_ref`.
//!
//! | Variant | Routing |
//! |---------|---------|
//! | `OversizeRejected` | rejected, never retried |
//! | `UnsupportedType` | human review |
//! | `ExtractionFailed` | human review |
//! | `LowConfidence` | human review (or rejected below the reject threshold) |
//! | `EnhancementExhausted` | human review |
//! | `DimensionMismatch` / `ModelMismatch` | fatal configuration error |
//! | `LeaseHeld` / `LeaseTimeout` | concurrency; timeout routes to review |

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("file of {size_bytes} bytes exceeds the {limit_bytes} byte limit")]
    OversizeRejected { size_bytes: u64, limit_bytes: u64 },

    #[error("unsupported document type: {detected}")]
    UnsupportedType { detected: String },

    #[error("{engine} extraction failed: {reason}")]
    ExtractionFailed { engine: String, reason: String },

    #[error("confidence {confidence:.3} is below threshold {threshold:.3}")]
    LowConfidence { confidence: f32, threshold: f32 },

    #[error("embedding dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding model mismatch: index was built with '{expected}', got '{actual}'")]
    ModelMismatch { expected: String, actual: String },

    #[error("enhancement retry did not reach the accept threshold (confidence {confidence:.3})")]
    EnhancementExhausted { confidence: f32 },

    #[error("document {document_id} is already leased by stage '{stage}'")]
    LeaseHeld { document_id: String, stage: String },

    #[error("stage '{stage}' exceeded its lease of {timeout_secs}s")]
    LeaseTimeout { stage: String, timeout_secs: u64 },

    #[error("invalid gate transition from {from}: {detail}")]
    InvalidTransition { from: String, detail: String },
}

impl PipelineError {
    /// Stable machine-readable code, used in review items and HTTP errors.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::OversizeRejected { .. } => "oversize_rejected",
            PipelineError::UnsupportedType { .. } => "unsupported_type",
            PipelineError::ExtractionFailed { .. } => "extraction_failed",
            PipelineError::LowConfidence { .. } => "low_confidence",
            PipelineError::DimensionMismatch { .. } => "dimension_mismatch",
            PipelineError::ModelMismatch { .. } => "model_mismatch",
            PipelineError::EnhancementExhausted { .. } => "enhancement_exhausted",
            PipelineError::LeaseHeld { .. } => "lease_held",
            PipelineError::LeaseTimeout { .. } => "lease_timeout",
            PipelineError::InvalidTransition { .. } => "invalid_transition",
        }
    }

    /// True when the document should be handed to a human reviewer
    /// instead of being dropped.
    pub fn routes_to_review(&self) -> bool {
        matches!(
            self,
            PipelineError::UnsupportedType { .. }
                | PipelineError::ExtractionFailed { .. }
                | PipelineError::LowConfidence { .. }
                | PipelineError::EnhancementExhausted { .. }
                | PipelineError::LeaseTimeout { .. }
        )
    }

    /// True for configuration/version errors that must abort the caller
    /// rather than degrade results.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::DimensionMismatch { .. } | PipelineError::ModelMismatch { .. }
        )
    }

    pub fn extraction_failed(engine: &str, reason: impl Into<String>) -> Self {
        PipelineError::ExtractionFailed {
            engine: engine.to_string(),
            reason: reason.into(),
        }
    }
}
