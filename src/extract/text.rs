//! Plain text passthrough.

use docgate_core::error::PipelineError;
use docgate_core::models::{ExtractionMethod, ExtractionResult};

use super::{ExtractionEngine, ExtractionInput, PageOutput};
use crate::language;

/// Confidence of text that needed no recognition.
pub const DIRECT_TEXT_CONFIDENCE: f32 = 0.95;

pub struct TextEngine;

impl ExtractionEngine for TextEngine {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::DirectText
    }

    fn extract(&self, input: &ExtractionInput<'_>) -> Result<Vec<PageOutput>, PipelineError> {
        let text = std::str::from_utf8(input.bytes).map_err(|e| {
            PipelineError::extraction_failed(
                "direct_text",
                format!("invalid UTF-8 at byte {}", e.valid_up_to()),
            )
        })?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let result = ExtractionResult::new(ExtractionMethod::DirectText, text, DIRECT_TEXT_CONFIDENCE)
            .with_languages(language::detect(text));
        Ok(vec![PageOutput {
            number: 1,
            result,
            image: None,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(bytes: &[u8]) -> ExtractionInput<'_> {
        ExtractionInput {
            document_id: "d1",
            filename: "notes.txt",
            detected_mime: "text/plain",
            bytes,
        }
    }

    #[test]
    fn test_utf8_text_single_page() {
        let pages = TextEngine.extract(&input("\u{feff}Valve replaced.".as_bytes())).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].result.text, "Valve replaced.");
        assert_eq!(pages[0].result.confidence, DIRECT_TEXT_CONFIDENCE);
        assert_eq!(pages[0].result.languages, vec!["latin"]);
        assert!(pages[0].image.is_none());
    }

    #[test]
    fn test_invalid_utf8_fails() {
        let err = TextEngine.extract(&input(&[b'o', b'k', 0xFF, 0xFE])).unwrap_err();
        assert!(err.to_string().contains("byte 2"));
    }
}
