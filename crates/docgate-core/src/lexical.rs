//! Multi-field fuzzy keyword scoring.
//!
//! Every query term is matched against the tokens of three fields (chunk
//! text, document filename, document tag values) and keeps its best match:
//!
//! | Match | Score |
//! |-------|-------|
//! | exact token | 1.0 |
//! | token starts with the term (term ≥ 3 chars) | 0.8 |
//! | edit distance 1 (term ≥ 4 chars) | 0.6 |
//! | edit distance 2 (term ≥ 7 chars) | 0.4 |
//!
//! Filename and tag matches are weighted 0.5. The raw score is the mean
//! of the per-term best scores plus a small bonus for repeated exact hits
//! in the text, so it is comparable within one query but not across
//! queries. Retrieval normalizes it per query.

use std::collections::HashSet;

use crate::models::Tags;

const TEXT_WEIGHT: f64 = 1.0;
const META_WEIGHT: f64 = 0.5;
const REPEAT_BONUS: f64 = 0.05;
const MAX_REPEAT_BONUS: f64 = 0.25;

/// The fields of one chunk that lexical search looks at.
#[derive(Debug, Clone, Copy)]
pub struct LexicalFields<'a> {
    pub text: &'a str,
    pub filename: &'a str,
    pub tags: &'a Tags,
}

/// Lowercased alphanumeric tokens.
pub fn tokenize(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Deduplicated query terms, in order of first appearance.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Score one chunk against the query terms. Returns `0.0` when no term
/// matches any field.
pub fn score(terms: &[String], fields: &LexicalFields<'_>) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }

    let text_tokens = tokenize(fields.text);
    let mut meta_tokens = tokenize(fields.filename);
    for value in fields.tags.values() {
        meta_tokens.extend(tokenize(value));
    }

    let mut total = 0.0;
    let mut bonus = 0.0;
    for term in terms {
        let in_text = best_match(term, &text_tokens) * TEXT_WEIGHT;
        let in_meta = best_match(term, &meta_tokens) * META_WEIGHT;
        total += in_text.max(in_meta);

        let repeats = text_tokens.iter().filter(|t| *t == term).count();
        if repeats > 1 {
            bonus += REPEAT_BONUS * (repeats - 1) as f64;
        }
    }

    let base = total / terms.len() as f64;
    if base == 0.0 {
        return 0.0;
    }
    base + bonus.min(MAX_REPEAT_BONUS)
}

fn best_match(term: &str, tokens: &[String]) -> f64 {
    let term_len = term.chars().count();
    let mut best = 0.0f64;

    for token in tokens {
        let s = term_match(term, term_len, token);
        if s > best {
            best = s;
            if best >= 1.0 {
                break;
            }
        }
    }
    best
}

fn term_match(term: &str, term_len: usize, token: &str) -> f64 {
    if token == term {
        return 1.0;
    }
    if term_len >= 3 && token.starts_with(term) {
        return 0.8;
    }
    if term_len < 4 {
        return 0.0;
    }

    let token_len = token.chars().count();
    if token_len.abs_diff(term_len) > 2 {
        return 0.0;
    }
    match edit_distance(term, token) {
        1 => 0.6,
        2 if term_len >= 7 => 0.4,
        _ => 0.0,
    }
}

/// Levenshtein edit distance.
pub fn edit_distance(a: &str, b: &str) -> u32 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let m = a_chars.len();
    let n = b_chars.len();

    if m == 0 {
        return n as u32;
    }
    if n == 0 {
        return m as u32;
    }

    let mut prev: Vec<u32> = (0..=n as u32).collect();
    let mut curr = vec![0u32; n + 1];

    for (i, &a_ch) in a_chars.iter().enumerate() {
        curr[0] = (i + 1) as u32;
        for (j, &b_ch) in b_chars.iter().enumerate() {
            let cost = if a_ch == b_ch { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}
