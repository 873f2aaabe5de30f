//! Type router: byte sniffing and extraction route selection.
//!
//! The sniffed type always wins over the declared MIME type; a
//! disagreement is logged. PDFs are opened with `lopdf` to decide between
//! the pure text-layer route and the hybrid text/OCR route.
//!
//! | Sniffed | Route |
//! |---------|-------|
//! | UTF-8 text, ASCII DXF without binary | `direct_text` (DXF → `cad_metadata`) |
//! | OOXML zip (docx/pptx/xlsx) | `office` |
//! | PDF, every page shows text | `pdf_text` |
//! | PDF, some page without text operators | `pdf_hybrid` |
//! | JPEG, PNG, TIFF | `image_ocr` |
//! | DWG, DXF | `cad_metadata` |
//! | anything else | `unknown` |

use std::io::Cursor;

use docgate_core::models::Route;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_PNG: &str = "image/png";
pub const MIME_TIFF: &str = "image/tiff";
pub const MIME_DWG: &str = "image/vnd.dwg";
pub const MIME_DXF: &str = "image/vnd.dxf";
pub const MIME_OLE: &str = "application/x-ole-storage";
pub const MIME_OCTET: &str = "application/octet-stream";

/// Type derived from the payload's leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sniffed {
    Pdf,
    Jpeg,
    Png,
    Tiff,
    Docx,
    Pptx,
    Xlsx,
    /// A zip archive that is not an OOXML package.
    Zip,
    Dwg,
    Dxf,
    /// Legacy OLE compound file (.doc/.xls/.ppt).
    Ole,
    Text,
    Unknown,
}

impl Sniffed {
    pub fn mime(&self) -> &'static str {
        match self {
            Sniffed::Pdf => MIME_PDF,
            Sniffed::Jpeg => MIME_JPEG,
            Sniffed::Png => MIME_PNG,
            Sniffed::Tiff => MIME_TIFF,
            Sniffed::Docx => MIME_DOCX,
            Sniffed::Pptx => MIME_PPTX,
            Sniffed::Xlsx => MIME_XLSX,
            Sniffed::Zip => "application/zip",
            Sniffed::Dwg => MIME_DWG,
            Sniffed::Dxf => MIME_DXF,
            Sniffed::Ole => MIME_OLE,
            Sniffed::Text => MIME_TEXT,
            Sniffed::Unknown => MIME_OCTET,
        }
    }
}

/// Result of routing one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub route: Route,
    pub detected_mime: String,
    /// True when the declared MIME type disagreed with the sniffed one.
    pub conflict: bool,
}

/// Derive a type from byte signatures.
pub fn sniff(bytes: &[u8]) -> Sniffed {
    if bytes.starts_with(b"%PDF-") {
        return Sniffed::Pdf;
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Sniffed::Jpeg;
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Sniffed::Png;
    }
    if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
        return Sniffed::Tiff;
    }
    if bytes.starts_with(b"PK\x03\x04") {
        return sniff_zip(bytes);
    }
    if bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]) {
        return Sniffed::Ole;
    }
    if bytes.len() >= 6 && bytes.starts_with(b"AC10") && bytes[4..6].iter().all(u8::is_ascii_digit)
    {
        return Sniffed::Dwg;
    }
    if bytes.starts_with(b"AutoCAD Binary DXF") {
        return Sniffed::Dxf;
    }
    if looks_like_text(bytes) {
        if looks_like_ascii_dxf(bytes) {
            return Sniffed::Dxf;
        }
        return Sniffed::Text;
    }
    Sniffed::Unknown
}

fn sniff_zip(bytes: &[u8]) -> Sniffed {
    let Ok(archive) = zip::ZipArchive::new(Cursor::new(bytes)) else {
        return Sniffed::Zip;
    };
    let mut kind = Sniffed::Zip;
    for name in archive.file_names() {
        if name == "word/document.xml" {
            kind = Sniffed::Docx;
        } else if name.starts_with("ppt/slides/") {
            kind = Sniffed::Pptx;
        } else if name.starts_with("xl/worksheets/") {
            kind = Sniffed::Xlsx;
        }
        if kind != Sniffed::Zip {
            break;
        }
    }
    kind
}

fn looks_like_text(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    let sample = &bytes[..bytes.len().min(8192)];
    if sample.contains(&0) {
        return false;
    }
    // A multi-byte character may be cut at the sample boundary.
    let valid = match std::str::from_utf8(sample) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && e.valid_up_to() > 0,
    };
    if !valid {
        return false;
    }
    let control = sample
        .iter()
        .filter(|&&b| b < 0x20 && !matches!(b, b'\n' | b'\r' | b'\t' | 0x0C))
        .count();
    control * 100 < sample.len()
}

fn looks_like_ascii_dxf(bytes: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]);
    let mut lines = head.lines().map(str::trim);
    matches!(
        (lines.next(), lines.next(), lines.next(), lines.next()),
        (Some("0"), Some("SECTION"), Some("2"), Some(_))
    )
}

/// Route a document. Never fails: anything unrecognizable is
/// [`Route::Unknown`].
pub fn route(declared_mime: &str, filename: &str, bytes: &[u8]) -> RouteDecision {
    let sniffed = sniff(bytes);
    let detected = match sniffed {
        // Plain text carries no signature; trust a textual declaration.
        Sniffed::Text => text_mime(declared_mime, filename),
        other => other.mime().to_string(),
    };

    let conflict = is_conflict(declared_mime, &detected);
    if conflict {
        tracing::warn!(
            filename,
            declared = declared_mime,
            detected = %detected,
            "declared type disagrees with content, using detected type"
        );
    }

    let route = match sniffed {
        Sniffed::Text => Route::DirectText,
        Sniffed::Docx | Sniffed::Pptx | Sniffed::Xlsx => Route::Office,
        Sniffed::Pdf => pdf_route(bytes),
        Sniffed::Jpeg | Sniffed::Png | Sniffed::Tiff => Route::ImageOcr,
        Sniffed::Dwg | Sniffed::Dxf => Route::CadMetadata,
        Sniffed::Zip | Sniffed::Ole | Sniffed::Unknown => Route::Unknown,
    };

    RouteDecision {
        route,
        detected_mime: detected,
        conflict,
    }
}

fn text_mime(declared_mime: &str, filename: &str) -> String {
    if declared_mime.starts_with("text/") {
        return declared_mime.to_string();
    }
    let lower = filename.to_lowercase();
    if lower.ends_with(".md") || lower.ends_with(".markdown") {
        return "text/markdown".to_string();
    }
    if lower.ends_with(".csv") {
        return "text/csv".to_string();
    }
    MIME_TEXT.to_string()
}

fn is_conflict(declared: &str, detected: &str) -> bool {
    if declared.is_empty() || declared == MIME_OCTET {
        return false;
    }
    if declared == detected {
        return false;
    }
    !(declared.starts_with("text/") && detected.starts_with("text/"))
}

fn pdf_route(bytes: &[u8]) -> Route {
    match lopdf::Document::load_mem(bytes) {
        Ok(doc) => {
            let pages = doc.get_pages();
            if pages.is_empty() {
                return Route::PdfHybrid;
            }
            let all_text = pages.values().all(|&page_id| {
                doc.get_page_content(page_id)
                    .map(|content| has_text_operator(&content))
                    .unwrap_or(false)
            });
            if all_text {
                Route::PdfText
            } else {
                Route::PdfHybrid
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "lopdf could not open PDF, routing to hybrid");
            Route::PdfHybrid
        }
    }
}

/// True when a content stream contains a text-showing operator
/// (`Tj`, `TJ`, `'` or `"`) inside a `BT`/`ET` block.
pub fn has_text_operator(content: &[u8]) -> bool {
    let Ok(parsed) = lopdf::content::Content::decode(content) else {
        return false;
    };
    let mut in_text = false;
    for op in &parsed.operations {
        match op.operator.as_str() {
            "BT" => in_text = true,
            "ET" => in_text = false,
            "Tj" | "TJ" | "'" | "\"" if in_text => return true,
            _ => {}
        }
    }
    false
}

/// Declared MIME type for a filename extension, as a connector would
/// report it.
pub fn mime_from_extension(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, e)| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => MIME_TEXT,
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        "pptx" => MIME_PPTX,
        "xlsx" => MIME_XLSX,
        "jpg" | "jpeg" => MIME_JPEG,
        "png" => MIME_PNG,
        "tif" | "tiff" => MIME_TIFF,
        "dwg" => MIME_DWG,
        "dxf" => MIME_DXF,
        _ => MIME_OCTET,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                zip.start_file(*name, options).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_sniff_signatures() {
        assert_eq!(sniff(b"%PDF-1.7\n..."), Sniffed::Pdf);
        assert_eq!(sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Sniffed::Jpeg);
        assert_eq!(sniff(b"AC1027\0\0\0"), Sniffed::Dwg);
        assert_eq!(sniff(b"0\nSECTION\n2\nHEADER\n"), Sniffed::Dxf);
        assert_eq!(sniff("plain words, ünïcödé".as_bytes()), Sniffed::Text);
        assert_eq!(sniff(&[0x00, 0x01, 0x02, 0xFE]), Sniffed::Unknown);
        assert_eq!(sniff(b""), Sniffed::Unknown);
    }

    #[test]
    fn test_sniff_ooxml_by_entry_names() {
        assert_eq!(sniff(&zip_with(&[("word/document.xml", "<w/>")])), Sniffed::Docx);
        assert_eq!(sniff(&zip_with(&[("ppt/slides/slide1.xml", "<p/>")])), Sniffed::Pptx);
        assert_eq!(sniff(&zip_with(&[("xl/worksheets/sheet1.xml", "<x/>")])), Sniffed::Xlsx);
        assert_eq!(sniff(&zip_with(&[("readme.txt", "hi")])), Sniffed::Zip);
    }

    #[test]
    fn test_sniffed_type_wins_over_declared() {
        let d = route("application/pdf", "scan.pdf", &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0]);
        assert_eq!(d.route, Route::ImageOcr);
        assert_eq!(d.detected_mime, MIME_PNG);
        assert!(d.conflict);
    }

    #[test]
    fn test_text_declarations_do_not_conflict() {
        let d = route("text/markdown", "notes.md", b"# Title\n\nbody");
        assert_eq!(d.route, Route::DirectText);
        assert_eq!(d.detected_mime, "text/markdown");
        assert!(!d.conflict);
    }

    #[test]
    fn test_dwg_routes_to_cad() {
        let d = route(MIME_DWG, "plan.dwg", b"AC1032\0\0binary");
        assert_eq!(d.route, Route::CadMetadata);
        assert!(!d.conflict);
    }

    #[test]
    fn test_unknown_binary() {
        let d = route(MIME_OCTET, "blob.bin", &[0u8, 159, 146, 150]);
        assert_eq!(d.route, Route::Unknown);
    }

    #[test]
    fn test_routing_is_deterministic() {
        let bytes = b"same content every time";
        assert_eq!(route("text/plain", "a.txt", bytes), route("text/plain", "a.txt", bytes));
    }

    #[test]
    fn test_text_operator_detection() {
        assert!(has_text_operator(b"BT /F1 12 Tf 72 712 Td (Hello) Tj ET"));
        assert!(!has_text_operator(b"q 100 0 0 100 0 0 cm /Im0 Do Q"));
    }

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(mime_from_extension("Report.PDF"), MIME_PDF);
        assert_eq!(mime_from_extension("plan.dwg"), MIME_DWG);
        assert_eq!(mime_from_extension("noext"), MIME_OCTET);
    }
}
