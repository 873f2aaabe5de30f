//! Confidence gate: per-page accept / enhance / review decision.
//!
//! ```text
//!              ≥ accept                      ≥ accept
//!   pending ───────────────▶ accepted ◀─────────────── enhancing
//!      │  [enhance, accept) + image, or flagged image      │
//!      ├──────────────────────────────────▶ enhancing ─────┤ < accept
//!      │  [reject, enhance) or no image                    ▼
//!      ├──────────────────────────────────────────▶ review_required
//!      │  < reject (never for CAD)
//!      └──────────────────────────────────────────▶ rejected
//! ```
//!
//! A page image whose quality signal is flagged (blurry, low contrast or
//! low resolution) takes the enhancement edge whatever its confidence.
//! The enhancement edge is taken at most once per page. `review_required`
//! and `rejected` are terminal for the automated pipeline; only
//! [`PageGate::reopen`], driven by a reviewer, leaves them.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::models::{DocumentStatus, GateState, QualityFlags, Route};

/// Named confidence thresholds, shared by every engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatePolicy {
    pub accept: f32,
    pub enhance: f32,
    pub reject: f32,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            accept: 0.7,
            enhance: 0.3,
            reject: 0.1,
        }
    }
}

/// Content class the gate needs to know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    Standard,
    /// CAD metadata: always goes to review, never auto-rejected.
    Cad,
}

impl From<Route> for ContentClass {
    fn from(route: Route) -> Self {
        match route {
            Route::CadMetadata => ContentClass::Cad,
            _ => ContentClass::Standard,
        }
    }
}

/// Outcome of a gate evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Accept,
    /// Enhance the page image and re-run the engine once.
    Enhance,
    Review { reason: String, detail: String },
    Reject { reason: String, detail: String },
}

impl GateDecision {
    fn review(err: PipelineError) -> Self {
        GateDecision::Review {
            reason: err.code().to_string(),
            detail: err.to_string(),
        }
    }

    fn reject(err: PipelineError) -> Self {
        GateDecision::Reject {
            reason: err.code().to_string(),
            detail: err.to_string(),
        }
    }
}

/// Gate state machine for one (document, page).
#[derive(Debug, Clone)]
pub struct PageGate {
    policy: GatePolicy,
    class: ContentClass,
    state: GateState,
    enhancement_attempted: bool,
    lowest_confidence: Option<f32>,
}

impl PageGate {
    pub fn new(policy: GatePolicy, class: ContentClass) -> Self {
        Self {
            policy,
            class,
            state: GateState::Pending,
            enhancement_attempted: false,
            lowest_confidence: None,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn enhancement_attempted(&self) -> bool {
        self.enhancement_attempted
    }

    /// Lowest confidence seen across all evaluations of this page.
    pub fn lowest_confidence(&self) -> Option<f32> {
        self.lowest_confidence
    }

    /// Feed an extraction confidence and the page's quality flags into
    /// the gate.
    ///
    /// `can_enhance` tells the gate whether a page image exists to
    /// enhance. Evaluating a terminal gate is an error.
    pub fn evaluate(
        &mut self,
        confidence: f32,
        can_enhance: bool,
        flags: QualityFlags,
    ) -> Result<GateDecision, PipelineError> {
        self.lowest_confidence = Some(
            self.lowest_confidence
                .map_or(confidence, |low| low.min(confidence)),
        );

        let decision = match self.state {
            GateState::Pending => self.first_pass(confidence, can_enhance, flags),
            GateState::Enhancing => self.after_enhancement(confidence),
            terminal => {
                return Err(PipelineError::InvalidTransition {
                    from: terminal.to_string(),
                    detail: "gate already reached a terminal state".to_string(),
                })
            }
        };

        self.state = match &decision {
            GateDecision::Accept => GateState::Accepted,
            GateDecision::Enhance => GateState::Enhancing,
            GateDecision::Review { .. } => GateState::ReviewRequired,
            GateDecision::Reject { .. } => GateState::Rejected,
        };
        Ok(decision)
    }

    fn first_pass(&mut self, confidence: f32, can_enhance: bool, flags: QualityFlags) -> GateDecision {
        let p = &self.policy;

        if self.class == ContentClass::Cad {
            return GateDecision::Review {
                reason: "cad_metadata".to_string(),
                detail: format!(
                    "CAD metadata extraction always requires review (confidence {:.2})",
                    confidence
                ),
            };
        }

        if flags.any() && can_enhance && !self.enhancement_attempted {
            self.enhancement_attempted = true;
            return GateDecision::Enhance;
        }

        if confidence >= p.accept {
            return GateDecision::Accept;
        }

        if confidence >= p.enhance {
            if can_enhance && !self.enhancement_attempted {
                self.enhancement_attempted = true;
                return GateDecision::Enhance;
            }
            return GateDecision::review(PipelineError::LowConfidence {
                confidence,
                threshold: p.accept,
            });
        }

        if confidence >= p.reject {
            return GateDecision::review(PipelineError::LowConfidence {
                confidence,
                threshold: p.enhance,
            });
        }

        GateDecision::reject(PipelineError::LowConfidence {
            confidence,
            threshold: p.reject,
        })
    }

    fn after_enhancement(&self, confidence: f32) -> GateDecision {
        if confidence >= self.policy.accept {
            GateDecision::Accept
        } else {
            GateDecision::review(PipelineError::EnhancementExhausted { confidence })
        }
    }

    /// Route an engine or routing failure through the gate.
    pub fn fail(&mut self, err: &PipelineError) -> GateDecision {
        let decision = match err {
            PipelineError::OversizeRejected { .. } => GateDecision::reject(err.clone()),
            _ => GateDecision::review(err.clone()),
        };
        self.state = match decision {
            GateDecision::Reject { .. } => GateState::Rejected,
            _ => GateState::ReviewRequired,
        };
        decision
    }

    /// Reviewer action: send a terminal page back to `pending`.
    pub fn reopen(&mut self) -> Result<(), PipelineError> {
        match self.state {
            GateState::ReviewRequired | GateState::Rejected => {
                self.state = GateState::Pending;
                self.enhancement_attempted = false;
                Ok(())
            }
            other => Err(PipelineError::InvalidTransition {
                from: other.to_string(),
                detail: "only review_required or rejected pages can be reopened".to_string(),
            }),
        }
    }
}

/// Fold per-page gate states into a document status.
///
/// All pages accepted → `extracted`; all rejected → `rejected`;
/// anything else (including no pages) → `needs_review`.
pub fn document_status(states: &[GateState]) -> DocumentStatus {
    if !states.is_empty() && states.iter().all(|s| *s == GateState::Accepted) {
        DocumentStatus::Extracted
    } else if !states.is_empty() && states.iter().all(|s| *s == GateState::Rejected) {
        DocumentStatus::Rejected
    } else {
        DocumentStatus::NeedsReview
    }
}
