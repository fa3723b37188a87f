//! Query-time phrase extraction.
//!
//! Quoted substrings, capitalized multi-word names and "word + number"
//! sequences are lifted out of the query before tokenization so they can be
//! matched as a unit. Whatever is left becomes independent terms.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use lifelog_core::text::{fold_case, is_stop_word, tokenize};

static RE_QUOTED: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r#"["“”]([^"“”]+)["“”]"#).ok());
static RE_CAPITALIZED_RUN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][\w'&-]*(?:[ \t]+[A-Z][\w'&-]*)+").ok());
static RE_WORD_NUMBER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\b([A-Za-z]+)[ \t]+(\d+)\b").ok());
static RE_WORD: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[\w'&-]+").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhraseKind {
    Quoted,
    ProperName,
    WordNumber,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phrase {
    /// The phrase as written in the query.
    pub text: String,
    pub folded: String,
    /// Index terms of the phrase, used for candidate lookup.
    pub words: Vec<String>,
    pub kind: PhraseKind,
}

/// A free-standing query term outside any phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub folded: String,
    pub original: String,
    /// Capitalized mid-query or numeric: treated as an entity signal.
    pub is_entity: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedQuery {
    pub phrases: Vec<Phrase>,
    pub terms: Vec<Term>,
}

impl ExtractedQuery {
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty() && self.terms.is_empty()
    }
}

pub fn extract(query: &str) -> ExtractedQuery {
    let mut working = query.to_string();
    let mut phrases = Vec::new();

    if let Some(re) = RE_QUOTED.as_ref() {
        let spans: Vec<(usize, usize, String)> =
            re.captures_iter(query).filter_map(|c| Some((c.get(0)?.start(), c.get(0)?.end(), c.get(1)?.as_str().trim().to_string()))).collect();
        for (start, end, inner) in spans {
            blank(&mut working, start, end);
            push_phrase(&mut phrases, &inner, PhraseKind::Quoted);
        }
    }

    if let Some(re) = RE_CAPITALIZED_RUN.as_ref() {
        let runs: Vec<(usize, usize)> = re.find_iter(&working).map(|m| (m.start(), m.end())).collect();
        for (start, end) in runs {
            if let Some((s, e)) = trim_stop_words(&working[start..end]) {
                let text = working[start + s..start + e].to_string();
                blank(&mut working, start + s, start + e);
                push_phrase(&mut phrases, &text, PhraseKind::ProperName);
            }
        }
    }

    if let Some(re) = RE_WORD_NUMBER.as_ref() {
        let pairs: Vec<(usize, usize, String)> = re
            .captures_iter(&working)
            .filter_map(|c| {
                let word = c.get(1)?.as_str();
                if is_stop_word(&fold_case(word)) {
                    return None;
                }
                let whole = c.get(0)?;
                Some((whole.start(), whole.end(), whole.as_str().to_string()))
            })
            .collect();
        for (start, end, text) in pairs {
            blank(&mut working, start, end);
            push_phrase(&mut phrases, &text, PhraseKind::WordNumber);
        }
    }

    let first_word_start = RE_WORD.as_ref().and_then(|re| re.find(query)).map_or(0, |m| m.start());
    let terms = collect_terms(&working, first_word_start);
    ExtractedQuery { phrases, terms }
}

fn push_phrase(phrases: &mut Vec<Phrase>, text: &str, kind: PhraseKind) {
    let folded = fold_case(text.trim());
    let words = tokenize(&folded);
    if folded.is_empty() || words.is_empty() || phrases.iter().any(|p| p.folded == folded) {
        return;
    }
    phrases.push(Phrase { text: text.trim().to_string(), folded, words, kind });
}

/// Overwrites `[start, end)` with spaces, keeping every other offset valid.
fn blank(text: &mut String, start: usize, end: usize) {
    text.replace_range(start..end, &" ".repeat(end - start));
}

/// Byte span of `run` with leading and trailing stop words ("What", "I")
/// removed, or `None` when fewer than two words remain.
fn trim_stop_words(run: &str) -> Option<(usize, usize)> {
    let re = RE_WORD.as_ref()?;
    let words: Vec<(usize, usize, String)> = re.find_iter(run).map(|m| (m.start(), m.end(), fold_case(m.as_str()))).collect();
    let first = words.iter().position(|(_, _, w)| !is_stop_word(w))?;
    let last = words.iter().rposition(|(_, _, w)| !is_stop_word(w))?;
    if last <= first {
        return None;
    }
    Some((words[first].0, words[last].1))
}

fn collect_terms(remainder: &str, first_word_start: usize) -> Vec<Term> {
    let Some(re) = RE_WORD.as_ref() else { return Vec::new() };
    let mut seen = HashSet::new();
    let mut terms = Vec::new();
    for m in re.find_iter(remainder) {
        for piece in m.as_str().split(|c: char| !c.is_alphanumeric()).filter(|p| !p.is_empty()) {
            let folded = fold_case(piece);
            let keep = tokenize(&folded).first().is_some_and(|t| *t == folded);
            if !keep || !seen.insert(folded.clone()) {
                continue;
            }
            let capitalized = piece.chars().next().is_some_and(char::is_uppercase);
            let is_entity = (capitalized && m.start() > first_word_start) || piece.chars().any(|c| c.is_ascii_digit());
            terms.push(Term { folded, original: piece.to_string(), is_entity });
        }
    }
    terms
}
