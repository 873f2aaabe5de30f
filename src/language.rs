//! Per-word script detection.
//!
//! Mixed-script pages (e.g. English and Arabic on one maintenance form)
//! are tagged word by word: every word gets the script of the majority of
//! its letters, and a page lists the scripts it contains ordered by word
//! count. Words without letters (numbers, punctuation) are not tagged.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Script {
    Latin,
    Arabic,
    Cyrillic,
    Greek,
    Hebrew,
    Devanagari,
    Han,
    Other,
}

impl Script {
    pub fn as_str(&self) -> &'static str {
        match self {
            Script::Latin => "latin",
            Script::Arabic => "arabic",
            Script::Cyrillic => "cyrillic",
            Script::Greek => "greek",
            Script::Hebrew => "hebrew",
            Script::Devanagari => "devanagari",
            Script::Han => "han",
            Script::Other => "other",
        }
    }
}

/// Script of one letter, `None` for non-letters.
pub fn char_script(c: char) -> Option<Script> {
    if !c.is_alphabetic() {
        return None;
    }
    let script = match c as u32 {
        0x0041..=0x024F | 0x1E00..=0x1EFF => Script::Latin,
        0x0370..=0x03FF | 0x1F00..=0x1FFF => Script::Greek,
        0x0400..=0x052F => Script::Cyrillic,
        0x0590..=0x05FF => Script::Hebrew,
        0x0600..=0x06FF | 0x0750..=0x077F | 0x08A0..=0x08FF | 0xFB50..=0xFDFF | 0xFE70..=0xFEFF => {
            Script::Arabic
        }
        0x0900..=0x097F => Script::Devanagari,
        0x3400..=0x4DBF | 0x4E00..=0x9FFF => Script::Han,
        _ => Script::Other,
    };
    Some(script)
}

/// Majority script of a word's letters; ties go to the first script seen.
pub fn word_script(word: &str) -> Option<Script> {
    let mut counts: Vec<(Script, usize)> = Vec::new();
    for s in word.chars().filter_map(char_script) {
        match counts.iter_mut().find(|(k, _)| *k == s) {
            Some((_, n)) => *n += 1,
            None => counts.push((s, 1)),
        }
    }
    let mut best: Option<(Script, usize)> = None;
    for (s, n) in counts {
        if best.map_or(true, |(_, bn)| n > bn) {
            best = Some((s, n));
        }
    }
    best.map(|(s, _)| s)
}

/// Word count per script name.
pub fn words_by_script<'a>(words: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for w in words {
        if let Some(s) = word_script(w) {
            *counts.entry(s.as_str().to_string()).or_insert(0) += 1;
        }
    }
    counts
}

/// Script names ordered by word count (descending), then name.
pub fn ranked(counts: &BTreeMap<String, usize>) -> Vec<String> {
    let mut pairs: Vec<(&String, &usize)> = counts.iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    pairs.into_iter().map(|(k, _)| k.clone()).collect()
}

/// Scripts present in free text, ranked.
pub fn detect(text: &str) -> Vec<String> {
    ranked(&words_by_script(text.split_whitespace()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_scripts() {
        assert_eq!(char_script('a'), Some(Script::Latin));
        assert_eq!(char_script('é'), Some(Script::Latin));
        assert_eq!(char_script('ب'), Some(Script::Arabic));
        assert_eq!(char_script('Ж'), Some(Script::Cyrillic));
        assert_eq!(char_script('7'), None);
    }

    #[test]
    fn test_mixed_page_tags_each_word() {
        let counts = words_by_script("pump مضخة valve صمام صيانة 42".split_whitespace());
        assert_eq!(counts.get("latin"), Some(&2));
        assert_eq!(counts.get("arabic"), Some(&3));
        assert_eq!(counts.len(), 2);
        assert_eq!(ranked(&counts), vec!["arabic", "latin"]);
    }

    #[test]
    fn test_word_majority() {
        assert_eq!(word_script("abcж"), Some(Script::Latin));
        assert_eq!(word_script("2024-01-01"), None);
    }

    #[test]
    fn test_detect_plain_english() {
        assert_eq!(detect("the quick brown fox"), vec!["latin"]);
        assert!(detect("").is_empty());
    }
}
