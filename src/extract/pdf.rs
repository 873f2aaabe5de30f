//! PDF extraction: text layer first, OCR for pages without one.
//!
//! Page text comes from `pdf-extract`. A page with fewer than
//! [`MIN_TEXT_CHARS`] non-space characters is treated as scanned: its
//! largest embedded image XObject is pulled out with `lopdf` and handed to
//! the OCR engine. A short page without any image keeps its text layer;
//! a short page whose image cannot be rasterized fails extraction so the
//! document goes to review instead of being indexed empty.

use std::sync::Arc;

use image::{GrayImage, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId};

use docgate_core::error::PipelineError;
use docgate_core::models::{ExtractionMethod, ExtractionResult};

use super::ocr::ImageOcrEngine;
use super::{ExtractionEngine, ExtractionInput, PageOutput};
use crate::language;
use crate::quality::encode_png;

/// Confidence of a page read from its text layer.
pub const TEXT_LAYER_CONFIDENCE: f32 = 0.85;
/// Pages with fewer non-space characters than this are sent to OCR.
pub const MIN_TEXT_CHARS: usize = 20;

pub struct PdfEngine {
    method: ExtractionMethod,
    ocr: Arc<ImageOcrEngine>,
}

impl PdfEngine {
    pub fn new(method: ExtractionMethod, ocr: Arc<ImageOcrEngine>) -> Self {
        Self { method, ocr }
    }
}

impl ExtractionEngine for PdfEngine {
    fn method(&self) -> ExtractionMethod {
        self.method
    }

    fn extract(&self, input: &ExtractionInput<'_>) -> Result<Vec<PageOutput>, PipelineError> {
        let engine = self.method.as_str();
        let texts = pdf_extract::extract_text_from_mem_by_pages(input.bytes)
            .map_err(|e| PipelineError::extraction_failed(engine, e.to_string()))?;
        if texts.is_empty() {
            return Err(PipelineError::extraction_failed(engine, "document has no pages"));
        }

        // Images are only needed for short pages; a PDF lopdf cannot open
        // simply has none.
        let doc = Document::load_mem(input.bytes).ok();
        let page_ids: Vec<ObjectId> = doc
            .as_ref()
            .map(|d| d.get_pages().into_values().collect())
            .unwrap_or_default();

        let mut pages = Vec::with_capacity(texts.len());
        for (i, text) in texts.into_iter().enumerate() {
            let number = i as u32 + 1;
            let chars = text.chars().filter(|c| !c.is_whitespace()).count();

            let image = if chars < MIN_TEXT_CHARS {
                let found = doc
                    .as_ref()
                    .zip(page_ids.get(i))
                    .map_or(PageImage::Absent, |(d, id)| largest_page_image(d, *id));
                match found {
                    PageImage::Absent => None,
                    PageImage::Encoded(png) => Some(png),
                    PageImage::Unreadable(reason) => {
                        return Err(PipelineError::extraction_failed(
                            engine,
                            format!("page {} is scanned but its image cannot be rasterized: {}", number, reason),
                        ));
                    }
                }
            } else {
                None
            };

            let output = match image {
                Some(png) => {
                    tracing::debug!(
                        document_id = input.document_id,
                        page = number,
                        chars,
                        "page has no usable text layer, running OCR"
                    );
                    PageOutput {
                        number,
                        result: self.ocr.recognize(&png, self.method)?,
                        image: Some(png),
                    }
                }
                None => {
                    let text = text.trim().to_string();
                    let languages = language::detect(&text);
                    PageOutput {
                        number,
                        result: ExtractionResult::new(self.method, text, TEXT_LAYER_CONFIDENCE)
                            .with_languages(languages),
                        image: None,
                    }
                }
            };
            pages.push(output);
        }

        tracing::debug!(
            document_id = input.document_id,
            method = engine,
            pages = pages.len(),
            ocr_pages = pages.iter().filter(|p| p.image.is_some()).count(),
            "PDF extracted"
        );
        Ok(pages)
    }
}

/// Image found on a PDF page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageImage {
    /// The page has no image XObject.
    Absent,
    /// Encoded image the OCR engine and the quality assessor can read.
    Encoded(Vec<u8>),
    /// The largest image uses an encoding that cannot be rasterized.
    Unreadable(String),
}

/// Filters whose output cannot be turned into pixels here.
const OPAQUE_FILTERS: [&[u8]; 3] = [b"CCITTFaxDecode", b"JBIG2Decode", b"JPXDecode"];

/// Largest image XObject on a page. JPEG streams are passed through; raw
/// 8-bit gray or RGB and 1-bit samples are re-encoded as PNG.
pub fn largest_page_image(doc: &Document, page_id: ObjectId) -> PageImage {
    let Some(xobjects) = page_resources(doc, page_id)
        .and_then(|res| res.get(b"XObject").ok())
        .and_then(|x| resolve(doc, x))
        .and_then(|x| x.as_dict().ok())
    else {
        return PageImage::Absent;
    };

    let mut best: Option<(i64, PageImage)> = None;
    for (_, obj) in xobjects.iter() {
        let Some(Ok(stream)) = resolve(doc, obj).map(|o| o.as_stream()) else {
            continue;
        };
        let dict = &stream.dict;
        if dict.get(b"Subtype").and_then(|s| s.as_name()).ok() != Some(b"Image".as_slice()) {
            continue;
        }
        let width = dict.get(b"Width").and_then(|w| w.as_i64()).unwrap_or(0);
        let height = dict.get(b"Height").and_then(|h| h.as_i64()).unwrap_or(0);
        let area = width * height;
        if area <= 0 || best.as_ref().is_some_and(|(a, _)| *a >= area) {
            continue;
        }

        let filters = filter_names(doc, dict);
        let image = if filters.iter().any(|f| f == b"DCTDecode") {
            PageImage::Encoded(stream.content.clone())
        } else if let Some(opaque) = filters
            .iter()
            .find(|f| OPAQUE_FILTERS.iter().any(|o| *o == f.as_slice()))
        {
            PageImage::Unreadable(format!("{} image", String::from_utf8_lossy(opaque)))
        } else {
            let samples = if filters.is_empty() {
                stream.content.clone()
            } else {
                stream
                    .decompressed_content()
                    .unwrap_or_else(|_| stream.content.clone())
            };
            let bits = dict.get(b"BitsPerComponent").and_then(|b| b.as_i64()).unwrap_or(8);
            let mask = dict.get(b"ImageMask").and_then(|m| m.as_bool()).unwrap_or(false);
            let bits = if mask { 1 } else { bits };
            match raw_to_png(&samples, width as u32, height as u32, bits, inverted_decode(dict)) {
                Some(png) => PageImage::Encoded(png),
                None => PageImage::Unreadable(format!(
                    "{} bytes of {}-bit samples for {}x{}",
                    samples.len(),
                    bits,
                    width,
                    height
                )),
            }
        };
        best = Some((area, image));
    }
    best.map_or(PageImage::Absent, |(_, image)| image)
}

/// `/Decode [1 0]` swaps black and white.
fn inverted_decode(dict: &Dictionary) -> bool {
    dict.get(b"Decode")
        .and_then(|d| d.as_array())
        .map(|a| {
            let nums: Vec<f32> = a.iter().filter_map(|o| o.as_float().ok()).collect();
            nums.len() == 2 && nums[0] > nums[1]
        })
        .unwrap_or(false)
}

/// Page resources, inherited from ancestor `Pages` nodes when absent.
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..32 {
        if let Ok(res) = node.get(b"Resources") {
            return resolve(doc, res)?.as_dict().ok();
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn filter_names(doc: &Document, dict: &Dictionary) -> Vec<Vec<u8>> {
    let Some(filter) = dict.get(b"Filter").ok().and_then(|f| resolve(doc, f)) else {
        return Vec::new();
    };
    match filter {
        Object::Name(n) => vec![n.clone()],
        Object::Array(items) => items
            .iter()
            .filter_map(|i| i.as_name().ok().map(|n| n.to_vec()))
            .collect(),
        _ => Vec::new(),
    }
}

fn raw_to_png(samples: &[u8], width: u32, height: u32, bits: i64, invert: bool) -> Option<Vec<u8>> {
    let pixels = width as usize * height as usize;
    let mut gray = match bits {
        1 => unpack_bilevel(samples, width, height)?,
        8 if samples.len() == pixels => GrayImage::from_raw(width, height, samples.to_vec())?,
        8 if samples.len() == pixels * 3 => {
            let rgb = RgbImage::from_raw(width, height, samples.to_vec())?;
            image::DynamicImage::ImageRgb8(rgb).to_luma8()
        }
        _ => return None,
    };
    if invert {
        image::imageops::invert(&mut gray);
    }
    encode_png(&gray).ok()
}

/// Expand 1-bit rows (each padded to a whole byte) into 8-bit gray, 0 as
/// black and 1 as white.
fn unpack_bilevel(samples: &[u8], width: u32, height: u32) -> Option<GrayImage> {
    let stride = (width as usize).div_ceil(8);
    if samples.len() < stride * height as usize {
        return None;
    }
    Some(GrayImage::from_fn(width, height, |x, y| {
        let byte = samples[y as usize * stride + x as usize / 8];
        let bit = (byte >> (7 - (x % 8))) & 1;
        image::Luma([if bit == 1 { 255 } else { 0 }])
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::extract::ocr::MockOcrEngine;
    use lopdf::{dictionary, Stream};

    /// A PDF whose pages are either text (`Some(text)`) or a 64×64 gray
    /// scan with no text layer (`None`).
    pub(crate) fn build_pdf(pages: &[Option<&str>]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let mut kids = Vec::new();
        for page in pages {
            let (content, resources) = match page {
                Some(text) => (
                    format!("BT /F1 12 Tf 72 712 Td ({}) Tj ET", text),
                    dictionary! { "Font" => dictionary! { "F1" => font_id } },
                ),
                None => {
                    let samples: Vec<u8> = (0..64 * 64).map(|i| if i % 7 == 0 { 0 } else { 255 }).collect();
                    let image_id = doc.add_object(Stream::new(
                        dictionary! {
                            "Type" => "XObject",
                            "Subtype" => "Image",
                            "Width" => 64,
                            "Height" => 64,
                            "ColorSpace" => "DeviceGray",
                            "BitsPerComponent" => 8,
                        },
                        samples,
                    ));
                    (
                        "q 64 0 0 64 0 0 cm /Im0 Do Q".to_string(),
                        dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
                    )
                }
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => content_id,
                "Resources" => resources,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    /// One-page PDF with no text layer whose only content is `samples`
    /// drawn as an image described by `image`.
    pub(crate) fn build_scan_pdf(image: Dictionary, samples: Vec<u8>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let image_id = doc.add_object(Stream::new(image, samples));
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            b"q 612 0 0 792 0 0 cm /Im0 Do Q".to_vec(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    /// 64×64 1-bit image: alternating 4-pixel black and white bands.
    pub(crate) fn bilevel_image() -> (Dictionary, Vec<u8>) {
        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 64,
            "Height" => 64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 1,
        };
        (dict, vec![0x0F; 8 * 64])
    }

    fn engine(method: ExtractionMethod, mock: MockOcrEngine) -> PdfEngine {
        PdfEngine::new(method, Arc::new(ImageOcrEngine::new(Arc::new(mock))))
    }

    fn input(bytes: &[u8]) -> ExtractionInput<'_> {
        ExtractionInput {
            document_id: "d1",
            filename: "report.pdf",
            detected_mime: "application/pdf",
            bytes,
        }
    }

    #[test]
    fn test_text_layer_pages() {
        let pdf = build_pdf(&[Some("Monthly maintenance report for pump station")]);
        let pages = engine(ExtractionMethod::PdfText, MockOcrEngine::new("unused", 0.1))
            .extract(&input(&pdf))
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].result.text.contains("maintenance"));
        assert_eq!(pages[0].result.confidence, TEXT_LAYER_CONFIDENCE);
        assert!(pages[0].image.is_none());
    }

    #[test]
    fn test_scanned_page_goes_through_ocr() {
        let pdf = build_pdf(&[Some("Cover page with a proper text layer on it"), None]);
        let pages = engine(
            ExtractionMethod::PdfHybrid,
            MockOcrEngine::new("handwritten inspection note", 0.6),
        )
        .extract(&input(&pdf))
        .unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages[0].image.is_none());
        assert_eq!(pages[1].result.text, "handwritten inspection note");
        assert_eq!(pages[1].result.method, ExtractionMethod::PdfHybrid);
        let png = pages[1].image.as_ref().unwrap();
        assert_eq!(crate::quality::decode_gray(png).unwrap().dimensions(), (64, 64));
    }

    #[test]
    fn test_bilevel_scan_goes_through_ocr() {
        let (dict, samples) = bilevel_image();
        let pdf = build_scan_pdf(dict, samples);
        let pages = engine(
            ExtractionMethod::PdfHybrid,
            MockOcrEngine::new("fax copy of permit", 0.9),
        )
        .extract(&input(&pdf))
        .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].result.text, "fax copy of permit");

        let gray = crate::quality::decode_gray(pages[0].image.as_ref().unwrap()).unwrap();
        assert_eq!(gray.dimensions(), (64, 64));
        assert_eq!(gray.get_pixel(0, 0).0[0], 0);
        assert_eq!(gray.get_pixel(4, 0).0[0], 255);
    }

    #[test]
    fn test_inverted_decode_swaps_black_and_white() {
        let (mut dict, samples) = bilevel_image();
        dict.set("Decode", vec![1.into(), 0.into()]);
        let pdf = build_scan_pdf(dict, samples);
        let doc = Document::load_mem(&pdf).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let PageImage::Encoded(png) = largest_page_image(&doc, page_id) else {
            panic!("expected an encoded image");
        };
        let gray = crate::quality::decode_gray(&png).unwrap();
        assert_eq!(gray.get_pixel(0, 0).0[0], 255);
    }

    #[test]
    fn test_unrasterizable_scan_fails_extraction() {
        let (mut dict, samples) = bilevel_image();
        dict.set("Filter", "CCITTFaxDecode");
        let pdf = build_scan_pdf(dict, samples);
        let err = engine(ExtractionMethod::PdfHybrid, MockOcrEngine::new("never", 0.9))
            .extract(&input(&pdf))
            .unwrap_err();
        assert_eq!(err.code(), "extraction_failed");
        assert!(err.to_string().contains("CCITTFaxDecode"), "{}", err);
    }

    #[test]
    fn test_short_page_without_image_keeps_text_layer() {
        let pdf = build_pdf(&[Some("p. 2")]);
        let pages = engine(ExtractionMethod::PdfText, MockOcrEngine::new("unused", 0.1))
            .extract(&input(&pdf))
            .unwrap();
        assert!(pages[0].image.is_none());
        assert_eq!(pages[0].result.confidence, TEXT_LAYER_CONFIDENCE);
    }

    #[test]
    fn test_invalid_pdf_fails() {
        let err = engine(ExtractionMethod::PdfText, MockOcrEngine::new("", 0.0))
            .extract(&input(b"not a pdf"))
            .unwrap_err();
        assert_eq!(err.code(), "extraction_failed");
    }

    #[test]
    fn test_router_sees_scanned_page() {
        let text_only = build_pdf(&[Some("only text here")]);
        let mixed = build_pdf(&[Some("text"), None]);
        assert_eq!(crate::router::route("application/pdf", "a.pdf", &text_only).route, docgate_core::models::Route::PdfText);
        assert_eq!(crate::router::route("application/pdf", "b.pdf", &mixed).route, docgate_core::models::Route::PdfHybrid);
    }
}
