//! Optical character recognition.
//!
//! [`OcrEngine`] is the seam between the pipeline and the recognizer.
//! [`TesseractCli`] shells out to the `tesseract` binary and parses its
//! TSV output; [`MockOcrEngine`] returns scripted pages for tests.
//! [`ImageOcrEngine`] wraps any `OcrEngine` as the `image_ocr`
//! extraction engine.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use docgate_core::error::PipelineError;
use docgate_core::models::{ExtractionMethod, ExtractionResult};

use super::{ExtractionEngine, ExtractionInput, PageOutput};
use crate::config::OcrConfig;
use crate::language;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// One recognized word.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    /// `0.0..=1.0`.
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
    /// Sequential line index within the page.
    pub line: u32,
}

/// Raw recognizer output for one image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrPage {
    pub words: Vec<OcrWord>,
}

impl OcrPage {
    /// Build a page from plain text with a uniform confidence. Each input
    /// line becomes an OCR line.
    pub fn from_text(text: &str, confidence: f32) -> Self {
        let words = text
            .lines()
            .enumerate()
            .flat_map(|(line, l)| {
                l.split_whitespace().map(move |w| OcrWord {
                    text: w.to_string(),
                    confidence,
                    bbox: None,
                    line: line as u32,
                })
            })
            .collect();
        Self { words }
    }

    /// Words joined with spaces, lines joined with newlines.
    pub fn text(&self) -> String {
        let mut out = String::new();
        let mut current_line = None;
        for w in &self.words {
            match current_line {
                Some(l) if l == w.line => out.push(' '),
                Some(_) => out.push('\n'),
                None => {}
            }
            out.push_str(&w.text);
            current_line = Some(w.line);
        }
        out
    }

    /// Word confidences weighted by bounding-box area. Falls back to the
    /// plain mean when no word has a usable box; `0.0` for an empty page.
    pub fn weighted_confidence(&self) -> f32 {
        if self.words.is_empty() {
            return 0.0;
        }
        let mut weighted = 0.0f64;
        let mut total_area = 0u64;
        for w in &self.words {
            if let Some(area) = w.bbox.map(|b| b.area()).filter(|a| *a > 0) {
                weighted += w.confidence as f64 * area as f64;
                total_area += area;
            }
        }
        if total_area > 0 {
            return (weighted / total_area as f64) as f32;
        }
        self.words.iter().map(|w| w.confidence).sum::<f32>() / self.words.len() as f32
    }
}

/// Recognizer abstraction. Implementations are blocking; the pipeline
/// calls them from `spawn_blocking`.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    fn recognize(&self, image: &[u8]) -> Result<OcrPage, PipelineError>;
}

/// Build the configured recognizer.
pub fn create_ocr_engine(config: &OcrConfig) -> Arc<dyn OcrEngine> {
    match config.engine.as_str() {
        "disabled" => Arc::new(DisabledOcr),
        _ => Arc::new(TesseractCli::new(config)),
    }
}

/// Recognizer used when `[ocr] engine = "disabled"`; every image goes to
/// review.
pub struct DisabledOcr;

impl OcrEngine for DisabledOcr {
    fn name(&self) -> &str {
        "disabled"
    }

    fn recognize(&self, _image: &[u8]) -> Result<OcrPage, PipelineError> {
        Err(PipelineError::extraction_failed("image_ocr", "OCR is disabled"))
    }
}

/// `tesseract stdin stdout -l <languages> tsv`.
pub struct TesseractCli {
    command: String,
    languages: String,
    timeout: Duration,
}

impl TesseractCli {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command: config.command.clone(),
            languages: config.languages.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn fail(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::extraction_failed("image_ocr", reason)
    }
}

impl OcrEngine for TesseractCli {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &[u8]) -> Result<OcrPage, PipelineError> {
        let mut child = Command::new(&self.command)
            .args(["stdin", "stdout", "-l", &self.languages, "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.fail(format!("failed to start '{}': {}", self.command, e)))?;

        // Drain stdout on a thread so a large TSV cannot fill the pipe
        // while stdin is still being written.
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.fail("stdout not captured"))?;
        let reader = std::thread::spawn(move || {
            let mut out = String::new();
            stdout.read_to_string(&mut out).map(|_| out)
        });

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(image) {
                drop(stdin);
                abort(&mut child, reader);
                return Err(self.fail(format!("failed to write image: {}", e)));
            }
        }

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= self.timeout => {
                    abort(&mut child, reader);
                    return Err(self.fail(format!(
                        "timed out after {}s",
                        self.timeout.as_secs()
                    )));
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(25)),
                Err(e) => {
                    abort(&mut child, reader);
                    return Err(self.fail(e.to_string()));
                }
            }
        };

        let tsv = reader
            .join()
            .map_err(|_| self.fail("stdout reader panicked"))?
            .map_err(|e| self.fail(format!("failed to read output: {}", e)))?;

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut err) = child.stderr.take() {
                let _ = err.read_to_string(&mut stderr);
            }
            return Err(self.fail(format!(
                "exited with {}: {}",
                status,
                stderr.lines().next().unwrap_or("")
            )));
        }

        Ok(parse_tsv(&tsv))
    }
}

/// Kill and reap a recognizer that will not finish normally, then wait
/// for its stdout reader, which ends once the pipe closes.
fn abort(child: &mut Child, reader: JoinHandle<io::Result<String>>) {
    let _ = child.kill();
    let _ = child.wait();
    let _ = reader.join();
}

/// Parse Tesseract TSV output.
///
/// Columns: `level page_num block_num par_num line_num word_num left top
/// width height conf text`. Only level-5 rows (words) are kept. Tesseract
/// reports `-1` for words it could not score; those count as `0.0`.
pub fn parse_tsv(tsv: &str) -> OcrPage {
    let mut words = Vec::new();
    let mut line_key: Option<(&str, &str, &str, &str)> = None;
    let mut line = 0u32;

    for row in tsv.lines().skip(1) {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 || fields[0] != "5" {
            continue;
        }
        let conf: f32 = match fields[10].trim().parse() {
            Ok(c) => c,
            Err(_) => continue,
        };
        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }

        let key = (fields[1], fields[2], fields[3], fields[4]);
        match line_key {
            Some(k) if k != key => line += 1,
            _ => {}
        }
        line_key = Some(key);

        let num = |i: usize| fields[i].trim().parse::<u32>().ok();
        let bbox = match (num(6), num(7), num(8), num(9)) {
            (Some(left), Some(top), Some(width), Some(height)) => Some(BoundingBox {
                left,
                top,
                width,
                height,
            }),
            _ => None,
        };

        words.push(OcrWord {
            text: text.to_string(),
            confidence: if conf < 0.0 { 0.0 } else { (conf / 100.0).min(1.0) },
            bbox,
            line,
        });
    }

    OcrPage { words }
}

/// Scripted recognizer for tests: returns queued pages in order, then
/// repeats the fallback page.
pub struct MockOcrEngine {
    queue: Mutex<VecDeque<OcrPage>>,
    fallback: OcrPage,
    calls: Mutex<usize>,
}

impl MockOcrEngine {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self::scripted(Vec::new(), OcrPage::from_text(text, confidence))
    }

    pub fn scripted(pages: Vec<OcrPage>, fallback: OcrPage) -> Self {
        Self {
            queue: Mutex::new(pages.into()),
            fallback,
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().map(|c| *c).unwrap_or(0)
    }
}

impl OcrEngine for MockOcrEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn recognize(&self, _image: &[u8]) -> Result<OcrPage, PipelineError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        let next = self
            .queue
            .lock()
            .map_err(|_| PipelineError::extraction_failed("image_ocr", "mock queue poisoned"))?
            .pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Turn recognizer output into an extraction result with per-word script
/// tags.
pub fn ocr_result(page: &OcrPage, method: ExtractionMethod) -> ExtractionResult {
    let by_script = language::words_by_script(page.words.iter().map(|w| w.text.as_str()));
    let mut result = ExtractionResult::new(method, page.text(), page.weighted_confidence())
        .with_languages(language::ranked(&by_script));
    result.words_by_script = by_script;
    result
}

/// The `image_ocr` engine: one page per image.
pub struct ImageOcrEngine {
    ocr: Arc<dyn OcrEngine>,
}

impl ImageOcrEngine {
    pub fn new(ocr: Arc<dyn OcrEngine>) -> Self {
        Self { ocr }
    }

    /// Recognize one page image and report it under `method`.
    pub fn recognize(
        &self,
        image: &[u8],
        method: ExtractionMethod,
    ) -> Result<ExtractionResult, PipelineError> {
        let page = self.ocr.recognize(image)?;
        let result = ocr_result(&page, method);
        tracing::debug!(
            engine = self.ocr.name(),
            words = page.words.len(),
            confidence = result.confidence,
            languages = ?result.languages,
            "OCR page recognized"
        );
        Ok(result)
    }
}

impl ExtractionEngine for ImageOcrEngine {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::ImageOcr
    }

    fn extract(&self, input: &ExtractionInput<'_>) -> Result<Vec<PageOutput>, PipelineError> {
        let result = self.recognize(input.bytes, ExtractionMethod::ImageOcr)?;
        Ok(vec![PageOutput {
            number: 1,
            result,
            image: Some(input.bytes.to_vec()),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t
4\t1\t1\t1\t1\t0\t10\t10\t300\t20\t-1\t
5\t1\t1\t1\t1\t1\t10\t10\t100\t20\t96\tPump
5\t1\t1\t1\t1\t2\t120\t10\t10\t20\t40\t#3
5\t1\t1\t1\t2\t1\t10\t40\t100\t20\t-1\tمضخة
5\t1\t1\t1\t2\t2\t120\t40\t50\t20\t90.5\t
";

    #[test]
    fn test_parse_tsv_words_lines_and_confidence() {
        let page = parse_tsv(TSV);
        assert_eq!(page.words.len(), 3);
        assert_eq!(page.words[0].text, "Pump");
        assert!((page.words[0].confidence - 0.96).abs() < 1e-6);
        assert_eq!(page.words[2].confidence, 0.0);
        assert_eq!(page.words[0].line, 0);
        assert_eq!(page.words[2].line, 1);
        assert_eq!(page.text(), "Pump #3\nمضخة");
        assert_eq!(
            page.words[1].bbox,
            Some(BoundingBox {
                left: 120,
                top: 10,
                width: 10,
                height: 20
            })
        );
    }

    #[test]
    fn test_parse_tsv_skips_short_rows() {
        assert!(parse_tsv("header\n5\t1\t2\n").words.is_empty());
        assert!(parse_tsv("").words.is_empty());
    }

    #[test]
    fn test_area_weighted_confidence() {
        let page = parse_tsv(TSV);
        // (0.96*2000 + 0.40*200 + 0.0*2000) / 4200
        let expected = (0.96 * 2000.0 + 0.40 * 200.0) / 4200.0;
        assert!((page.weighted_confidence() - expected).abs() < 1e-4);
        assert_eq!(OcrPage::default().weighted_confidence(), 0.0);
        assert!((OcrPage::from_text("a b", 0.5).weighted_confidence() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ocr_result_tags_scripts() {
        let page = parse_tsv(TSV);
        let result = ocr_result(&page, ExtractionMethod::ImageOcr);
        assert_eq!(result.words_by_script.get("latin"), Some(&1));
        assert_eq!(result.words_by_script.get("arabic"), Some(&1));
        assert_eq!(result.languages.len(), 2);
        assert_eq!(result.method, ExtractionMethod::ImageOcr);
    }

    #[test]
    fn test_mock_engine_scripted_then_fallback() {
        let mock = MockOcrEngine::scripted(
            vec![OcrPage::from_text("faint", 0.4)],
            OcrPage::from_text("clear text", 0.9),
        );
        assert!((mock.recognize(b"x").unwrap().weighted_confidence() - 0.4).abs() < 1e-6);
        assert!((mock.recognize(b"x").unwrap().weighted_confidence() - 0.9).abs() < 1e-6);
        assert!((mock.recognize(b"x").unwrap().weighted_confidence() - 0.9).abs() < 1e-6);
        assert_eq!(mock.calls(), 3);
    }

    #[test]
    fn test_image_engine_keeps_image_for_enhancement() {
        let engine = ImageOcrEngine::new(Arc::new(MockOcrEngine::new("Work order 17", 0.88)));
        let input = ExtractionInput {
            document_id: "d1",
            filename: "scan.png",
            detected_mime: "image/png",
            bytes: b"img",
        };
        let pages = engine.extract(&input).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].result.text, "Work order 17");
        assert_eq!(pages[0].image.as_deref(), Some(&b"img"[..]));
    }

    #[test]
    fn test_missing_binary_is_extraction_failure() {
        let config = OcrConfig {
            command: "/nonexistent/tesseract-binary".to_string(),
            ..OcrConfig::default()
        };
        let err = TesseractCli::new(&config).recognize(b"img").unwrap_err();
        assert_eq!(err.code(), "extraction_failed");
    }

    #[cfg(unix)]
    #[test]
    fn test_recognizer_exiting_early_is_reaped() {
        // `true` exits without reading stdin, so writing a large image
        // hits a closed pipe.
        let config = OcrConfig {
            command: "true".to_string(),
            ..OcrConfig::default()
        };
        let image = vec![0u8; 4 * 1024 * 1024];
        let started = Instant::now();
        let err = TesseractCli::new(&config).recognize(&image).unwrap_err();
        assert_eq!(err.code(), "extraction_failed");
        assert!(err.to_string().contains("failed to write image"), "{}", err);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_disabled_engine_fails() {
        assert!(DisabledOcr.recognize(b"x").is_err());
    }
}
