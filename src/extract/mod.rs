//! Extraction engines, one per route.
//!
//! Every engine turns raw document bytes into one [`PageOutput`] per
//! page. Engines are synchronous and CPU-bound; the pipeline runs them
//! inside `spawn_blocking`. Failures are always
//! [`PipelineError::ExtractionFailed`] so the document lands in review
//! instead of crashing the batch.
//!
//! | Route | Engine | Base confidence |
//! |-------|--------|-----------------|
//! | `direct_text` | [`text::TextEngine`] | 0.95 |
//! | `office` | [`office::OfficeEngine`] | 0.92 |
//! | `pdf_text`, `pdf_hybrid` | [`pdf::PdfEngine`] | 0.85 per text page, OCR otherwise |
//! | `image_ocr` | [`ocr::ImageOcrEngine`] | area-weighted word confidence |
//! | `cad_metadata` | [`cad::CadEngine`] | capped (default 0.3) |

pub mod cad;
pub mod ocr;
pub mod office;
pub mod pdf;
pub mod text;

use std::sync::Arc;

use docgate_core::error::PipelineError;
use docgate_core::models::{ExtractionMethod, ExtractionResult, Route};

use self::ocr::{ImageOcrEngine, OcrEngine};

/// Borrowed view of a document handed to an engine.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionInput<'a> {
    pub document_id: &'a str,
    pub filename: &'a str,
    pub detected_mime: &'a str,
    pub bytes: &'a [u8],
}

/// Extraction output for one page.
#[derive(Debug, Clone)]
pub struct PageOutput {
    /// 1-based.
    pub number: u32,
    pub result: ExtractionResult,
    /// Encoded page image, present when the page went through OCR. The
    /// pipeline assesses it and hands it to enhancement.
    pub image: Option<Vec<u8>>,
}

pub trait ExtractionEngine: Send + Sync {
    fn method(&self) -> ExtractionMethod;

    fn extract(&self, input: &ExtractionInput<'_>) -> Result<Vec<PageOutput>, PipelineError>;
}

/// All engines, built once per pipeline.
pub struct Engines {
    text: text::TextEngine,
    office: office::OfficeEngine,
    pdf_text: pdf::PdfEngine,
    pdf_hybrid: pdf::PdfEngine,
    image: Arc<ImageOcrEngine>,
    cad: cad::CadEngine,
}

impl Engines {
    pub fn new(ocr: Arc<dyn OcrEngine>, cad_confidence_cap: f32) -> Self {
        let image = Arc::new(ImageOcrEngine::new(ocr));
        Self {
            text: text::TextEngine,
            office: office::OfficeEngine,
            pdf_text: pdf::PdfEngine::new(ExtractionMethod::PdfText, image.clone()),
            pdf_hybrid: pdf::PdfEngine::new(ExtractionMethod::PdfHybrid, image.clone()),
            image,
            cad: cad::CadEngine::new(cad_confidence_cap),
        }
    }

    /// Engine serving `route`; `None` for [`Route::Unknown`].
    pub fn for_route(&self, route: Route) -> Option<&dyn ExtractionEngine> {
        match route {
            Route::DirectText => Some(&self.text),
            Route::Office => Some(&self.office),
            Route::PdfText => Some(&self.pdf_text),
            Route::PdfHybrid => Some(&self.pdf_hybrid),
            Route::ImageOcr => Some(self.image.as_ref()),
            Route::CadMetadata => Some(&self.cad),
            Route::Unknown => None,
        }
    }

    /// OCR engine used for the enhancement retry.
    pub fn ocr(&self) -> &ImageOcrEngine {
        &self.image
    }
}

/// Document-level confidence from page confidences: the minimum for
/// hybrid PDFs (one bad page taints the document), the mean otherwise.
pub fn aggregate_confidence(method: ExtractionMethod, confidences: &[f32]) -> f32 {
    if confidences.is_empty() {
        return 0.0;
    }
    match method {
        ExtractionMethod::PdfHybrid => confidences.iter().copied().fold(f32::INFINITY, f32::min),
        _ => confidences.iter().sum::<f32>() / confidences.len() as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ocr::MockOcrEngine;

    #[test]
    fn test_aggregate_confidence() {
        let c = [0.85, 0.4, 0.9];
        assert!((aggregate_confidence(ExtractionMethod::PdfText, &c) - 0.7166667).abs() < 1e-5);
        assert_eq!(aggregate_confidence(ExtractionMethod::PdfHybrid, &c), 0.4);
        assert_eq!(aggregate_confidence(ExtractionMethod::Office, &[]), 0.0);
    }

    #[test]
    fn test_every_known_route_has_an_engine() {
        let engines = Engines::new(Arc::new(MockOcrEngine::new("x", 0.9)), 0.3);
        for route in [
            Route::DirectText,
            Route::Office,
            Route::PdfText,
            Route::PdfHybrid,
            Route::ImageOcr,
            Route::CadMetadata,
        ] {
            let engine = engines.for_route(route).unwrap();
            assert_eq!(Some(engine.method()), route.method());
        }
        assert!(engines.for_route(Route::Unknown).is_none());
    }
}
