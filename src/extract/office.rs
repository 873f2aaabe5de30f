//! OOXML extraction (docx, pptx, xlsx) via `zip` + `quick-xml`.
//!
//! A docx is one page. Every pptx slide and every xlsx sheet becomes its
//! own page, so review and chunk page ranges point at the slide or sheet.
//! Every archive entry is read through a size bound.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use serde_json::json;

use docgate_core::error::PipelineError;
use docgate_core::models::{ExtractionMethod, ExtractionResult};

use super::{ExtractionEngine, ExtractionInput, PageOutput};
use crate::language;
use crate::router::{MIME_DOCX, MIME_PPTX, MIME_XLSX};

/// Confidence of text read from a structured office package.
pub const OFFICE_CONFIDENCE: f32 = 0.92;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn fail(reason: impl Into<String>) -> PipelineError {
    PipelineError::extraction_failed("office", reason)
}

pub struct OfficeEngine;

impl ExtractionEngine for OfficeEngine {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Office
    }

    fn extract(&self, input: &ExtractionInput<'_>) -> Result<Vec<PageOutput>, PipelineError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(input.bytes))
            .map_err(|e| fail(format!("not a zip archive: {}", e)))?;

        let kind = match input.detected_mime {
            MIME_DOCX | MIME_PPTX | MIME_XLSX => input.detected_mime,
            _ => package_kind(&archive).ok_or_else(|| fail("not an OOXML package"))?,
        };

        let pages = match kind {
            MIME_DOCX => vec![(extract_docx(&mut archive)?, None)],
            MIME_PPTX => extract_pptx(&mut archive)?
                .into_iter()
                .map(|t| (t, None))
                .collect(),
            _ => extract_xlsx(&mut archive)?
                .into_iter()
                .map(|(name, text)| (text, Some(name)))
                .collect::<Vec<_>>(),
        };

        tracing::debug!(
            document_id = input.document_id,
            kind,
            pages = pages.len(),
            "office package extracted"
        );

        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(i, (text, sheet))| {
                let mut result = ExtractionResult::new(ExtractionMethod::Office, text.as_str(), OFFICE_CONFIDENCE)
                    .with_languages(language::detect(&text));
                if let Some(sheet) = sheet {
                    result = result.with_structures(json!({ "sheet": sheet }));
                }
                PageOutput {
                    number: i as u32 + 1,
                    result,
                    image: None,
                }
            })
            .collect())
    }
}

fn package_kind(archive: &Archive<'_>) -> Option<&'static str> {
    let mut names = archive.file_names();
    names.find_map(|n| match n {
        "word/document.xml" => Some(MIME_DOCX),
        "ppt/presentation.xml" => Some(MIME_PPTX),
        "xl/workbook.xml" => Some(MIME_XLSX),
        _ => None,
    })
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, PipelineError> {
    let entry = archive.by_name(name).map_err(|e| fail(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| fail(format!("{}: {}", name, e)))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(fail(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Numbered part names (`ppt/slides/slide3.xml`) sorted by number.
fn numbered_parts(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn extract_docx(archive: &mut Archive<'_>) -> Result<String, PipelineError> {
    let xml = read_zip_entry_bounded(archive, "word/document.xml")?;
    paragraph_text(&xml)
}

fn extract_pptx(archive: &mut Archive<'_>) -> Result<Vec<String>, PipelineError> {
    let slides = numbered_parts(archive, "ppt/slides/slide");
    if slides.is_empty() {
        return Err(fail("presentation has no slides"));
    }
    slides
        .iter()
        .map(|name| {
            let xml = read_zip_entry_bounded(archive, name)?;
            paragraph_text(&xml)
        })
        .collect()
}

/// Text of every `<*:t>` run; a paragraph (`<w:p>`, `<a:p>`) ends a line.
fn paragraph_text(xml: &[u8]) -> Result<String, PipelineError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => {
                if let Ok(Event::Text(te)) = reader.read_event_into(&mut buf) {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push(' ');
                    }
                    out.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"p" => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(fail(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

/// `(sheet name, cell text)` per worksheet.
fn extract_xlsx(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>, PipelineError> {
    let shared_strings = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        read_shared_strings(archive)?
    } else {
        Vec::new()
    };
    let names = if archive.file_names().any(|n| n == "xl/workbook.xml") {
        read_sheet_names(archive)?
    } else {
        Vec::new()
    };
    let sheets = numbered_parts(archive, "xl/worksheets/sheet");
    if sheets.is_empty() {
        return Err(fail("workbook has no worksheets"));
    }

    let mut out = Vec::new();
    for (idx, part) in sheets.into_iter().take(XLSX_MAX_SHEETS).enumerate() {
        let xml = read_zip_entry_bounded(archive, &part)?;
        let text = sheet_cells(&xml, &shared_strings)?;
        let name = names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| format!("Sheet{}", idx + 1));
        out.push((name, text));
    }
    Ok(out)
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, PipelineError> {
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml")?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    current = Some(String::new());
                } else if e.local_name().as_ref() == b"t" {
                    if let (Some(s), Ok(Event::Text(te))) =
                        (current.as_mut(), reader.read_event_into(&mut buf))
                    {
                        s.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"si" => {
                if let Some(s) = current.take() {
                    strings.push(s);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(fail(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn read_sheet_names(archive: &mut Archive<'_>) -> Result<Vec<String>, PipelineError> {
    let xml = read_zip_entry_bounded(archive, "xl/workbook.xml")?;
    let mut names = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let name = e.attributes().flatten().find_map(|a| {
                    (a.key.as_ref() == b"name")
                        .then(|| String::from_utf8_lossy(&a.value).into_owned())
                });
                if let Some(name) = name {
                    names.push(name);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(fail(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(names)
}

/// Cell values of one sheet, one row per line. Shared-string cells are
/// resolved; inline strings and plain values are kept as written.
fn sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, PipelineError> {
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut shared = false;
    let mut cell_count = 0usize;
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if !s.is_empty() {
                    let value = if shared {
                        s.parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                    } else {
                        Some(s.to_string())
                    };
                    if let Some(value) = value {
                        row.push(value);
                        cell_count += 1;
                    }
                }
                in_value = false;
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared = false,
                b"row" if !row.is_empty() => rows.push(std::mem::take(&mut row).join(" ")),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(fail(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join(" "));
    }
    Ok(rows.join("\n"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    pub(crate) fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn run(bytes: &[u8], mime: &str) -> Result<Vec<PageOutput>, PipelineError> {
        OfficeEngine.extract(&ExtractionInput {
            document_id: "d1",
            filename: "f",
            detected_mime: mime,
            bytes,
        })
    }

    #[test]
    fn test_docx_paragraphs() {
        let bytes = build_zip(&[(
            "word/document.xml",
            r#"<w:document xmlns:w="w"><w:body><w:p><w:r><w:t>Pump</w:t></w:r><w:r><w:t>failure</w:t></w:r></w:p><w:p><w:r><w:t>Seal &amp; bearing</w:t></w:r></w:p></w:body></w:document>"#,
        )]);
        let pages = run(&bytes, MIME_DOCX).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].result.text, "Pump failure\nSeal & bearing");
        assert_eq!(pages[0].result.confidence, OFFICE_CONFIDENCE);
    }

    #[test]
    fn test_pptx_slides_become_pages_in_order() {
        let slide = |t: &str| format!(r#"<p:sld xmlns:a="a" xmlns:p="p"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>"#, t);
        let (s1, s2, s10) = (slide("one"), slide("two"), slide("ten"));
        let bytes = build_zip(&[
            ("ppt/presentation.xml", "<p:presentation xmlns:p=\"p\"/>"),
            ("ppt/slides/slide10.xml", &s10),
            ("ppt/slides/slide2.xml", &s2),
            ("ppt/slides/slide1.xml", &s1),
        ]);
        // Detected from entries when the MIME type is generic.
        let pages = run(&bytes, "application/zip").unwrap();
        let texts: Vec<&str> = pages.iter().map(|p| p.result.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "ten"]);
        assert_eq!(pages[2].number, 3);
    }

    #[test]
    fn test_xlsx_sheets_with_names_and_values() {
        let bytes = build_zip(&[
            (
                "xl/workbook.xml",
                r#"<workbook><sheets><sheet name="Pumps" sheetId="1"/><sheet name="Valves" sheetId="2"/></sheets></workbook>"#,
            ),
            (
                "xl/sharedStrings.xml",
                r#"<sst><si><t>P-101</t></si><si><t>leak</t></si></sst>"#,
            ),
            (
                "xl/worksheets/sheet1.xml",
                r#"<worksheet><sheetData><row><c t="s"><v>0</v></c><c t="s"><v>1</v></c><c><v>42</v></c></row></sheetData></worksheet>"#,
            ),
            (
                "xl/worksheets/sheet2.xml",
                r#"<worksheet><sheetData><row><c t="inlineStr"><is><t>V-7</t></is></c></row></sheetData></worksheet>"#,
            ),
        ]);
        let pages = run(&bytes, MIME_XLSX).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].result.text, "P-101 leak 42");
        assert_eq!(pages[1].result.text, "V-7");
        assert_eq!(
            pages[0].result.structures,
            Some(serde_json::json!({ "sheet": "Pumps" }))
        );
    }

    #[test]
    fn test_invalid_zip_fails() {
        let err = run(b"not a zip", MIME_DOCX).unwrap_err();
        assert_eq!(err.code(), "extraction_failed");
    }

    #[test]
    fn test_missing_document_part_fails() {
        let bytes = build_zip(&[("other.xml", "<x/>")]);
        assert!(run(&bytes, MIME_DOCX).is_err());
        assert!(run(&bytes, "application/zip").is_err());
    }
}
