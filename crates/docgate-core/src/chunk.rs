//! Overlapping window and section-aware text chunker.
//!
//! Splits the accepted page texts of one document into [`Chunk`]s of
//! roughly `min_tokens..=max_tokens` (4 chars ≈ 1 token). Consecutive
//! chunks share a tail overlap of at most `overlap × previous chunk
//! length`, always snapped to a word boundary.
//!
//! # Algorithm
//!
//! 1. Tokenize every page into words, remembering the page number and
//!    whether a word starts a line, a paragraph or a detected section.
//!    Words longer than a window are hard-split at char boundaries.
//! 2. [`ChunkStrategy::Window`]: grow a window word by word until the next
//!    word would exceed `max_chars`. If a paragraph break lies past
//!    `min_chars` inside the window, cut there instead.
//! 3. [`ChunkStrategy::Sections`]: split at section starts (headings,
//!    timestamped event lines), pack small neighbouring sections together,
//!    and window any section that is still too large. Overlap never
//!    crosses a section boundary.
//! 4. A trailing chunk shorter than `min_chars` is folded into its
//!    predecessor when the result still fits in `max_chars`.
//!
//! Each chunk gets a random UUID, a SHA-256 of its text, the page range
//! it spans and the dominant language of its pages.
//!
//! # Example
//!
//! ```rust
//! use docgate_core::chunk::{chunk_document, ChunkParams, ChunkStrategy, PageText};
//!
//! let pages = vec![PageText::new(1, "Hello world.\n\nSecond paragraph.")];
//! let chunks = chunk_document("doc-123", &pages, &ChunkParams::default(), ChunkStrategy::Window);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].ordinal, 0);
//! ```

use std::collections::HashMap;

use anyhow::bail;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{now_millis, Chunk};

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Window sizing. `overlap` is a fraction of the previous chunk's length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkParams {
    pub max_tokens: usize,
    pub min_tokens: usize,
    pub overlap: f32,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            min_tokens: 200,
            overlap: 0.15,
        }
    }
}

impl ChunkParams {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_tokens == 0 {
            bail!("chunking.max_tokens must be > 0");
        }
        if self.min_tokens > self.max_tokens {
            bail!(
                "chunking.min_tokens ({}) must not exceed max_tokens ({})",
                self.min_tokens,
                self.max_tokens
            );
        }
        if !(0.0..=0.5).contains(&self.overlap) {
            bail!("chunking.overlap must be within [0.0, 0.5], got {}", self.overlap);
        }
        Ok(())
    }

    fn max_chars(&self) -> usize {
        self.max_tokens.max(1) * CHARS_PER_TOKEN
    }

    fn min_chars(&self) -> usize {
        self.min_tokens * CHARS_PER_TOKEN
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    Window,
    Sections,
}

/// Accepted text of one page, in page order.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page: u32,
    pub text: String,
    pub language: Option<String>,
}

impl PageText {
    pub fn new(page: u32, text: impl Into<String>) -> Self {
        Self {
            page,
            text: text.into(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Separator rendered before a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sep {
    None,
    Space,
    Line,
    Paragraph,
}

impl Sep {
    fn as_str(self) -> &'static str {
        match self {
            Sep::None => "",
            Sep::Space => " ",
            Sep::Line => "\n",
            Sep::Paragraph => "\n\n",
        }
    }
}

#[derive(Debug, Clone)]
struct Word<'a> {
    text: &'a str,
    page: u32,
    sep: Sep,
    section_start: bool,
}

/// Choose a strategy for a document.
///
/// Returns [`ChunkStrategy::Sections`] when the filename or the first
/// kilobyte of text mentions one of `keywords` (case-insensitive) and at
/// least two section boundaries are present.
pub fn detect_strategy(filename: &str, text: &str, keywords: &[String]) -> ChunkStrategy {
    let name = filename.to_lowercase();
    let head_end = snap_to_char_boundary(text, 1024);
    let head = text[..head_end].to_lowercase();

    let keyword_hit = keywords.iter().any(|k| {
        let k = k.to_lowercase();
        !k.is_empty() && (name.contains(&k) || head.contains(&k))
    });
    if !keyword_hit {
        return ChunkStrategy::Window;
    }

    let boundaries = text.lines().filter(|l| is_section_boundary(l)).count();
    if boundaries >= 2 {
        ChunkStrategy::Sections
    } else {
        ChunkStrategy::Window
    }
}

/// Whether a line starts a new section or event.
///
/// Recognized: markdown headings, numbered headings (`3.`, `2.1 Scope`),
/// short upper-case lines, and lines starting with a date or time stamp.
pub fn is_section_boundary(line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return false;
    }

    if line.starts_with('#') {
        let hashes = line.chars().take_while(|c| *c == '#').count();
        return hashes <= 6 && line[hashes..].starts_with(' ');
    }

    if starts_with_timestamp(line) {
        return true;
    }

    if line.chars().count() > 80 {
        return false;
    }

    if is_numbered_heading(line) {
        return true;
    }

    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 3 && letters.iter().all(|c| c.is_uppercase())
}

fn is_numbered_heading(line: &str) -> bool {
    let bytes = line.as_bytes();
    let mut i = 0;
    let mut saw_digit = false;
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        saw_digit |= bytes[i].is_ascii_digit();
        i += 1;
    }
    // Needs "<digits>[.digits]* <Word>", not a bare number.
    saw_digit
        && i < bytes.len()
        && bytes[i] == b' '
        && line[i..].trim_start().chars().next().is_some_and(|c| c.is_alphabetic())
}

fn starts_with_timestamp(line: &str) -> bool {
    let s = line.trim_start_matches('[');
    let b = s.as_bytes();
    let digits = |range: std::ops::Range<usize>| {
        range.end <= b.len() && b[range].iter().all(|c| c.is_ascii_digit())
    };

    // 2024-03-01 or 2024/03/01
    let date = digits(0..4)
        && b.len() >= 10
        && (b[4] == b'-' || b[4] == b'/')
        && digits(5..7)
        && b[7] == b[4]
        && digits(8..10);
    // 14:02:33 or 14:02
    let time = digits(0..2) && b.len() >= 5 && b[2] == b':' && digits(3..5);
    date || time
}

/// Split a document's accepted page texts into chunks.
///
/// Pages must be in page order. Returns an empty vector when no page
/// contains any text. Ordinals are contiguous from 0.
pub fn chunk_document(
    document_id: &str,
    pages: &[PageText],
    params: &ChunkParams,
    strategy: ChunkStrategy,
) -> Vec<Chunk> {
    let max_chars = params.max_chars();
    let words = tokenize(pages, max_chars);
    if words.is_empty() {
        return Vec::new();
    }

    let ranges = match strategy {
        ChunkStrategy::Window => window(&words, 0, words.len(), params),
        ChunkStrategy::Sections => sections(&words, params),
    };

    let languages: HashMap<u32, &str> = pages
        .iter()
        .filter_map(|p| p.language.as_deref().map(|l| (p.page, l)))
        .collect();

    ranges
        .iter()
        .enumerate()
        .map(|(ordinal, &(start, end))| {
            let slice = &words[start..end];
            let page_start = slice.iter().map(|w| w.page).min().unwrap_or(1);
            let page_end = slice.iter().map(|w| w.page).max().unwrap_or(page_start);
            make_chunk(
                document_id,
                ordinal as i64,
                &render(slice),
                page_start,
                page_end,
                dominant_language(slice, &languages),
            )
        })
        .collect()
}

fn tokenize(pages: &[PageText], max_chars: usize) -> Vec<Word<'_>> {
    let mut words = Vec::new();
    for page in pages {
        for (pi, para) in page.text.split("\n\n").enumerate() {
            let mut first_in_para = true;
            for line in para.lines() {
                let section_start = is_section_boundary(line);
                let mut first_in_line = true;
                for raw in line.split_whitespace() {
                    for (k, piece) in hard_split(raw, max_chars).into_iter().enumerate() {
                        let sep = if words.is_empty() || k > 0 {
                            Sep::None
                        } else if first_in_para && (pi > 0 || first_in_line) {
                            Sep::Paragraph
                        } else if first_in_line {
                            Sep::Line
                        } else {
                            Sep::Space
                        };
                        words.push(Word {
                            text: piece,
                            page: page.page,
                            sep,
                            section_start: section_start && first_in_line,
                        });
                        first_in_para = false;
                        first_in_line = false;
                    }
                }
            }
        }
    }
    words
}

/// Split a single oversized word at char boundaries.
fn hard_split(word: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut remaining = word;
    while remaining.len() > max_chars {
        let split_at = snap_to_char_boundary(remaining, max_chars);
        let split_at = if split_at == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            split_at
        };
        pieces.push(&remaining[..split_at]);
        remaining = &remaining[split_at..];
    }
    if !remaining.is_empty() {
        pieces.push(remaining);
    }
    pieces
}

fn span_len(words: &[Word<'_>]) -> usize {
    words
        .iter()
        .enumerate()
        .map(|(i, w)| if i == 0 { w.text.len() } else { w.sep.as_str().len() + w.text.len() })
        .sum()
}

fn render(words: &[Word<'_>]) -> String {
    let mut out = String::with_capacity(span_len(words));
    for (i, w) in words.iter().enumerate() {
        if i > 0 {
            out.push_str(w.sep.as_str());
        }
        out.push_str(w.text);
    }
    out
}

/// Overlapping windows over `words[from..to]`, as `(start, end)` ranges.
fn window(words: &[Word<'_>], from: usize, to: usize, params: &ChunkParams) -> Vec<(usize, usize)> {
    let max_chars = params.max_chars();
    let min_chars = params.min_chars();
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    let mut start = from;
    // First word not yet covered by an earlier chunk.
    let mut fresh = from;

    while start < to {
        let mut end = start;
        let mut len = 0usize;
        let mut para_cut = None;

        while end < to {
            let add = if end == start {
                words[end].text.len()
            } else {
                words[end].sep.as_str().len() + words[end].text.len()
            };
            if end > start && len + add > max_chars {
                break;
            }
            len += add;
            end += 1;
            if end < to && end > fresh && words[end].sep == Sep::Paragraph && len >= min_chars {
                para_cut = Some(end);
            }
        }

        if end < to {
            if let Some(cut) = para_cut {
                end = cut;
            }
        }
        ranges.push((start, end));
        if end >= to {
            break;
        }
        fresh = end;

        let budget = (span_len(&words[start..end]) as f32 * params.overlap) as usize;
        let mut tail = end;
        let mut tail_len = 0usize;
        while tail > start + 1 {
            let w = &words[tail - 1];
            let add = w.text.len() + if tail == end { 0 } else { words[tail].sep.as_str().len() };
            if tail_len + add > budget {
                break;
            }
            tail_len += add;
            tail -= 1;
        }
        start = tail;
    }

    fold_short_tail(words, &mut ranges, params);
    ranges
}

/// Merge a too-short final range into its predecessor when it fits.
fn fold_short_tail(words: &[Word<'_>], ranges: &mut Vec<(usize, usize)>, params: &ChunkParams) {
    if ranges.len() < 2 {
        return;
    }
    let (last_start, last_end) = ranges[ranges.len() - 1];
    let (prev_start, _) = ranges[ranges.len() - 2];
    if span_len(&words[last_start..last_end]) >= params.min_chars() {
        return;
    }
    if span_len(&words[prev_start..last_end]) <= params.max_chars() {
        ranges.pop();
        let n = ranges.len();
        ranges[n - 1].1 = last_end;
    }
}

fn sections(words: &[Word<'_>], params: &ChunkParams) -> Vec<(usize, usize)> {
    let max_chars = params.max_chars();
    let min_chars = params.min_chars();

    let mut bounds: Vec<(usize, usize)> = Vec::new();
    let mut start = 0;
    for i in 1..words.len() {
        if words[i].section_start {
            bounds.push((start, i));
            start = i;
        }
    }
    bounds.push((start, words.len()));

    // Pack small sections with their successors.
    let mut packed: Vec<(usize, usize)> = Vec::new();
    for (s, e) in bounds {
        if let Some(last) = packed.last_mut() {
            if span_len(&words[last.0..last.1]) < min_chars && span_len(&words[last.0..e]) <= max_chars {
                last.1 = e;
                continue;
            }
        }
        packed.push((s, e));
    }

    let mut ranges = Vec::new();
    for (s, e) in packed {
        if span_len(&words[s..e]) <= max_chars {
            ranges.push((s, e));
        } else {
            ranges.extend(window(words, s, e, params));
        }
    }
    ranges
}

fn dominant_language(words: &[Word<'_>], languages: &HashMap<u32, &str>) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for w in words {
        if let Some(lang) = languages.get(&w.page) {
            *counts.entry(*lang).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(lang, _)| lang.to_string())
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Create a single [`Chunk`] with a UUID and SHA-256 content hash.
fn make_chunk(
    document_id: &str,
    ordinal: i64,
    text: &str,
    page_start: u32,
    page_end: u32,
    language: Option<String>,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        ordinal,
        text: text.to_string(),
        hash,
        page_start,
        page_end,
        language,
        created_at: now_millis(),
    }
}
