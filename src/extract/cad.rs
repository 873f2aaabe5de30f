//! CAD metadata: what can be read from a drawing without rendering it.
//!
//! ASCII DXF files are walked as group-code/value pairs to collect layer
//! names, TEXT/MTEXT annotations and the `$EXTMIN`/`$EXTMAX` drawing
//! extents. DWG files only expose their format version. Geometry is never
//! interpreted, so confidence is capped and every CAD document goes to
//! review.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use docgate_core::error::PipelineError;
use docgate_core::models::{ExtractionMethod, ExtractionResult};

use super::{ExtractionEngine, ExtractionInput, PageOutput};
use crate::language;

pub struct CadEngine {
    confidence_cap: f32,
}

impl CadEngine {
    pub fn new(confidence_cap: f32) -> Self {
        Self { confidence_cap }
    }
}

impl ExtractionEngine for CadEngine {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::CadMetadata
    }

    fn extract(&self, input: &ExtractionInput<'_>) -> Result<Vec<PageOutput>, PipelineError> {
        let bytes = input.bytes;
        let (text, structures, confidence) = if bytes.starts_with(b"AC10") {
            let version = dwg_version(bytes)
                .ok_or_else(|| PipelineError::extraction_failed("cad_metadata", "truncated DWG header"))?;
            let structures = json!({
                "format": "dwg",
                "version": version,
                "release": dwg_release(version),
            });
            (String::new(), structures, self.confidence_cap)
        } else if bytes.starts_with(b"AutoCAD Binary DXF") {
            (String::new(), json!({ "format": "dxf_binary" }), 0.0)
        } else {
            let content = std::str::from_utf8(bytes).map_err(|_| {
                PipelineError::extraction_failed("cad_metadata", "DXF is not valid UTF-8 text")
            })?;
            let dxf = parse_dxf(content)?;
            let text = dxf
                .annotations
                .iter()
                .map(|a| a.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            (text, dxf.to_json(), self.confidence_cap)
        };

        tracing::debug!(
            document_id = input.document_id,
            filename = input.filename,
            "CAD metadata extracted"
        );
        let languages = language::detect(&text);
        let result = ExtractionResult::new(ExtractionMethod::CadMetadata, text, confidence.min(self.confidence_cap))
            .with_languages(languages)
            .with_structures(structures);
        Ok(vec![PageOutput {
            number: 1,
            result,
            image: None,
        }])
    }
}

/// `AC1032` style version string from a DWG header.
pub fn dwg_version(bytes: &[u8]) -> Option<&str> {
    let head = bytes.get(..6)?;
    let version = std::str::from_utf8(head).ok()?;
    version[4..].chars().all(|c| c.is_ascii_digit()).then_some(version)
}

fn dwg_release(version: &str) -> &'static str {
    match version {
        "AC1009" => "R11/R12",
        "AC1012" => "R13",
        "AC1014" => "R14",
        "AC1015" => "2000",
        "AC1018" => "2004",
        "AC1021" => "2007",
        "AC1024" => "2010",
        "AC1027" => "2013",
        "AC1032" => "2018",
        _ => "unknown",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub kind: String,
    pub layer: Option<String>,
    pub text: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DxfMetadata {
    pub layers: Vec<String>,
    pub annotations: Vec<Annotation>,
    pub extmin: Option<[f64; 3]>,
    pub extmax: Option<[f64; 3]>,
    pub entity_counts: BTreeMap<String, usize>,
}

impl DxfMetadata {
    fn to_json(&self) -> Value {
        let extents = match (self.extmin, self.extmax) {
            (Some(min), Some(max)) => json!({ "min": min, "max": max }),
            _ => Value::Null,
        };
        json!({
            "format": "dxf",
            "layers": self.layers,
            "annotations": self.annotations.iter().map(|a| json!({
                "kind": a.kind,
                "layer": a.layer,
                "text": a.text,
            })).collect::<Vec<_>>(),
            "extents": extents,
            "entity_counts": self.entity_counts,
        })
    }
}

/// Walk an ASCII DXF. Fails when the group codes are not numeric.
pub fn parse_dxf(content: &str) -> Result<DxfMetadata, PipelineError> {
    let lines: Vec<&str> = content.lines().map(str::trim).collect();
    let mut pairs = Vec::with_capacity(lines.len() / 2);
    for chunk in lines.chunks(2) {
        let [code, value] = chunk else { break };
        let code: i32 = code.parse().map_err(|_| {
            PipelineError::extraction_failed("cad_metadata", format!("invalid group code '{}'", code))
        })?;
        pairs.push((code, *value));
    }

    let mut meta = DxfMetadata::default();
    let mut section = "";
    let mut header_var = "";
    let mut entity: Option<Entity> = None;
    let mut in_layer_record = false;

    for (code, value) in pairs {
        if code == 0 {
            if let Some(e) = entity.take() {
                e.finish(&mut meta);
            }
            in_layer_record = false;
            match value {
                "SECTION" | "ENDSEC" | "EOF" => section = "",
                "LAYER" if section == "TABLES" => in_layer_record = true,
                other if section == "ENTITIES" || section == "BLOCKS" => {
                    *meta.entity_counts.entry(other.to_string()).or_insert(0) += 1;
                    if other == "TEXT" || other == "MTEXT" {
                        entity = Some(Entity::new(other));
                    }
                }
                _ => {}
            }
            continue;
        }

        if code == 2 && section.is_empty() {
            section = match value {
                "HEADER" => "HEADER",
                "TABLES" => "TABLES",
                "BLOCKS" => "BLOCKS",
                "ENTITIES" => "ENTITIES",
                _ => "OTHER",
            };
            continue;
        }

        match section {
            "HEADER" => {
                if code == 9 {
                    header_var = value;
                } else if let (10 | 20 | 30, "$EXTMIN" | "$EXTMAX") = (code, header_var) {
                    let axis = (code / 10 - 1) as usize;
                    let v: f64 = value.parse().unwrap_or(0.0);
                    let slot = if header_var == "$EXTMIN" {
                        &mut meta.extmin
                    } else {
                        &mut meta.extmax
                    };
                    slot.get_or_insert([0.0; 3])[axis] = v;
                }
            }
            "TABLES" if in_layer_record && code == 2 => {
                if !meta.layers.iter().any(|l| l == value) {
                    meta.layers.push(value.to_string());
                }
            }
            _ => {
                if let Some(e) = entity.as_mut() {
                    match code {
                        8 => e.layer = Some(value.to_string()),
                        1 | 3 => e.text.push_str(value),
                        _ => {}
                    }
                }
            }
        }
    }
    if let Some(e) = entity.take() {
        e.finish(&mut meta);
    }
    Ok(meta)
}

struct Entity {
    kind: String,
    layer: Option<String>,
    text: String,
}

impl Entity {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            layer: None,
            text: String::new(),
        }
    }

    fn finish(self, meta: &mut DxfMetadata) {
        let text = if self.kind == "MTEXT" {
            strip_mtext_codes(&self.text)
        } else {
            self.text.trim().to_string()
        };
        if !text.is_empty() {
            meta.annotations.push(Annotation {
                kind: self.kind,
                layer: self.layer,
                text,
            });
        }
    }
}

/// Drop MTEXT inline formatting: `\P` becomes a newline, `{`/`}` groups
/// and `\X...;` switches are removed.
fn strip_mtext_codes(raw: &str) -> String {
    let mut out = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' | '}' => {}
            '\\' => match chars.next() {
                Some('P') => out.push('\n'),
                Some('~') => out.push(' '),
                Some('\\') => out.push('\\'),
                Some(_) => {
                    // Switches with an argument end at ';'.
                    while let Some(&n) = chars.peek() {
                        chars.next();
                        if n == ';' {
                            break;
                        }
                    }
                }
                None => {}
            },
            other => out.push(other),
        }
    }
    out.trim().to_string()
}
