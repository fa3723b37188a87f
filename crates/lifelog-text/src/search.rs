use chrono::NaiveDate;
use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::{debug, warn};

use lifelog_core::config::LexicalConfig;
use lifelog_core::error::{Error, Result};
use lifelog_core::text::{fold_case, snippet};
use lifelog_core::types::{sort_by_score, SearchResult, StrategyKind};

use crate::index::{IndexSnapshot, IndexedDocument, PatternIndex};
use crate::phrase::{extract, ExtractedQuery};

static RE_WHERE_QUESTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*where\b|\bwhere\s+(?:did|do|does|was|were|is|are|am)\b").ok());

/// Words that mark the following phrase as a place ("lunch at Smoothie King").
const LOCATION_PREFIXES: &[&str] = &["at", "in", "near", "to", "from", "inside", "outside", "visited", "visit"];
/// Words that mark the preceding phrase as a place ("the Smoothie King store").
const LOCATION_SUFFIXES: &[&str] =
    &["restaurant", "cafe", "café", "store", "shop", "office", "park", "mall", "street", "building", "station"];

/// Positions kept per query unit when computing proximity.
const MAX_POSITIONS: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub max_results: usize,
    /// Results scoring below this are dropped.
    pub score_threshold: f64,
    pub case_sensitive: bool,
    /// Only count matches bounded by non-alphanumeric characters.
    pub whole_word: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { max_results: 20, score_threshold: 0.0, case_sensitive: false, whole_word: true }
    }
}

#[derive(Debug, Default)]
struct Scored {
    raw: f64,
    matched_terms: Vec<String>,
    matched_phrases: Vec<String>,
    spans: Vec<(usize, usize)>,
}

/// Per-query scoring state, applied to each candidate document.
struct Matcher<'a> {
    config: &'a LexicalConfig,
    opts: &'a SearchOptions,
    query: &'a ExtractedQuery,
    where_question: bool,
}

impl Matcher<'_> {
    fn haystack<'d>(&self, doc: &'d IndexedDocument) -> &'d str {
        if self.opts.case_sensitive {
            &doc.text
        } else {
            &doc.folded_text
        }
    }

    fn score(&self, doc: &IndexedDocument) -> Option<Scored> {
        let hay = self.haystack(doc);
        let mut out = Scored::default();
        let mut units: Vec<Vec<usize>> = Vec::new();
        let mut entity_signals = 0usize;
        let cfg = self.config;

        for phrase in &self.query.phrases {
            let needle = if self.opts.case_sensitive { phrase.text.as_str() } else { phrase.folded.as_str() };
            let hits = occurrences(hay, needle, self.opts.whole_word);
            if hits.is_empty() {
                // Partial credit for the phrase's words found on their own.
                for word in &phrase.words {
                    let needle = if self.opts.case_sensitive { original_word(&phrase.text, word) } else { word.clone() };
                    let hits = occurrences(hay, &needle, self.opts.whole_word);
                    if hits.is_empty() {
                        continue;
                    }
                    out.raw += cfg.phrase_word_weight * cfg.token_weight * weighted_count(&hits, doc.title_len, cfg);
                    push_unique(&mut out.matched_terms, word);
                    out.spans.extend(hits.iter().map(|&s| (s, s + needle.len())));
                    units.push(hits);
                }
                continue;
            }
            out.raw += cfg.phrase_weight * cfg.token_weight * weighted_count(&hits, doc.title_len, cfg);
            if self.where_question && hits.iter().any(|&s| near_location_cue(hay, s, s + needle.len())) {
                out.raw += cfg.location_boost;
            }
            push_unique(&mut out.matched_phrases, &phrase.folded);
            entity_signals += 1;
            out.spans.extend(hits.iter().map(|&s| (s, s + needle.len())));
            units.push(hits);
        }

        for term in &self.query.terms {
            let needle = if self.opts.case_sensitive { term.original.as_str() } else { term.folded.as_str() };
            let hits = occurrences(hay, needle, self.opts.whole_word);
            if hits.is_empty() {
                continue;
            }
            out.raw += cfg.token_weight * weighted_count(&hits, doc.title_len, cfg);
            push_unique(&mut out.matched_terms, &term.folded);
            if term.is_entity {
                entity_signals += 1;
            }
            out.spans.extend(hits.iter().map(|&s| (s, s + needle.len())));
            units.push(hits);
        }

        if out.raw <= 0.0 {
            return None;
        }
        out.raw += cfg.proximity_weight * proximity_bonus(&units, cfg.proximity_window);
        if entity_signals >= 2 {
            out.raw *= cfg.cooccurrence_multiplier;
        }
        Some(out)
    }
}

/// Maps a raw lexical score into `[0, 1)`, penalizing long documents.
pub fn normalize_score(raw: f64, char_len: usize, config: &LexicalConfig) -> f64 {
    let length_norm = (char_len as f64 / 1000.0).sqrt().max(config.length_floor);
    let x = config.damping * raw / length_norm;
    x / (1.0 + x)
}

/// Byte offsets of `needle` in `hay`. Overlapping matches are not counted.
fn occurrences(hay: &str, needle: &str, whole_word: bool) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }
    hay.match_indices(needle)
        .map(|(start, _)| start)
        .filter(|&start| !whole_word || is_word_bounded(hay, start, start + needle.len()))
        .collect()
}

fn is_word_bounded(hay: &str, start: usize, end: usize) -> bool {
    let before = hay[..start].chars().next_back().is_none_or(|c| !c.is_alphanumeric());
    let after = hay[end..].chars().next().is_none_or(|c| !c.is_alphanumeric());
    before && after
}

/// Occurrence count with matches inside the title counted `title_weight` times.
fn weighted_count(hits: &[usize], title_len: usize, config: &LexicalConfig) -> f64 {
    let in_title = hits.iter().filter(|&&s| s < title_len).count() as f64;
    hits.len() as f64 + in_title * (config.title_weight - 1.0)
}

/// Sum over pairs of distinct query units of `1 - d / window`, where `d` is
/// the closest distance between the two units inside the window.
fn proximity_bonus(units: &[Vec<usize>], window: usize) -> f64 {
    if window == 0 {
        return 0.0;
    }
    let mut bonus = 0.0;
    for (i, a) in units.iter().enumerate() {
        for b in &units[i + 1..] {
            let closest = a
                .iter()
                .take(MAX_POSITIONS)
                .flat_map(|&x| b.iter().take(MAX_POSITIONS).map(move |&y| x.abs_diff(y)))
                .min();
            if let Some(d) = closest.filter(|&d| d < window) {
                bonus += 1.0 - d as f64 / window as f64;
            }
        }
    }
    bonus
}

fn near_location_cue(hay: &str, start: usize, end: usize) -> bool {
    let before = hay[..start].split(|c: char| !c.is_alphanumeric()).rfind(|w| !w.is_empty());
    let after = hay[end..].split(|c: char| !c.is_alphanumeric()).find(|w| !w.is_empty());
    before.is_some_and(|w| LOCATION_PREFIXES.contains(&fold_case(w).as_str()))
        || after.is_some_and(|w| LOCATION_SUFFIXES.contains(&fold_case(w).as_str()))
}

/// The word of `phrase` whose folded form is `folded`, as written.
fn original_word(phrase: &str, folded: &str) -> String {
    phrase
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| fold_case(w) == folded)
        .map_or_else(|| folded.to_string(), str::to_string)
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

fn highlights(text: &str, spans: &mut [(usize, usize)], config: &LexicalConfig) -> Vec<String> {
    spans.sort_unstable();
    let mut out = Vec::new();
    let mut covered_to = 0usize;
    for &(start, end) in spans.iter() {
        if out.len() >= config.max_highlights {
            break;
        }
        if !out.is_empty() && start < covered_to {
            continue;
        }
        out.push(snippet(text, start, end, config.snippet_radius));
        covered_to = end + config.snippet_radius;
    }
    out
}

fn to_result(doc: &IndexedDocument, mut scored: Scored, config: &LexicalConfig) -> SearchResult {
    let score = normalize_score(scored.raw, doc.length, config);
    let mut result = SearchResult::new(doc.document.id.clone(), score)
        .with_document(doc.document.clone())
        .with_source(StrategyKind::Lexical);
    result.highlights = highlights(&doc.text, &mut scored.spans, config);
    result.metadata.raw_score = Some(scored.raw);
    result.metadata.matched_terms = scored.matched_terms;
    result.metadata.matched_phrases = scored.matched_phrases;
    result
}

fn finish(mut results: Vec<SearchResult>, opts: &SearchOptions) -> Vec<SearchResult> {
    results.retain(|r| r.score >= opts.score_threshold);
    sort_by_score(&mut results);
    results.truncate(opts.max_results);
    results
}

impl PatternIndex {
    /// Phrase-aware keyword search. Only documents sharing at least one term
    /// or phrase word with the query are scored.
    pub fn search(&self, query: &str, opts: &SearchOptions) -> Vec<SearchResult> {
        let snapshot = self.snapshot();
        let extracted = extract(query);
        if extracted.is_empty() || snapshot.docs.is_empty() {
            return Vec::new();
        }
        let slots = query_candidates(&snapshot, &extracted);
        let results = self.score_slots(&snapshot, &extracted, query, slots, opts);
        debug!(query, results = results.len(), "lexical search");
        results
    }

    /// Documents recorded within `[start, end]`. With a non-blank `query`
    /// they are scored like [`PatternIndex::search`] and non-matching ones
    /// dropped; without one every document in range scores `1.0`, oldest first.
    pub fn search_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        query: Option<&str>,
        opts: &SearchOptions,
    ) -> Vec<SearchResult> {
        let snapshot = self.snapshot();
        if start > end {
            return Vec::new();
        }
        let slots: BTreeSet<usize> = snapshot.by_date.range(start..=end).flat_map(|(_, s)| s.iter().copied()).collect();
        match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(q) => {
                let extracted = extract(q);
                if extracted.is_empty() {
                    return self.date_only(&snapshot, start, end, opts);
                }
                self.score_slots(&snapshot, &extracted, q, slots, opts)
            }
            None => self.date_only(&snapshot, start, end, opts),
        }
    }

    /// Full scan with a user-supplied regular expression. A pattern that
    /// fails to compile yields no results.
    pub fn regex_search(&self, pattern: &str, opts: &SearchOptions) -> Vec<SearchResult> {
        self.try_regex_search(pattern, opts).unwrap_or_else(|e| {
            warn!(error = %e, "returning no results");
            Vec::new()
        })
    }

    /// Like [`regex_search`](Self::regex_search), but reports a pattern that
    /// fails to compile as [`Error::InvalidPattern`].
    pub fn try_regex_search(&self, pattern: &str, opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        let re = RegexBuilder::new(pattern)
            .case_insensitive(!opts.case_sensitive)
            .build()
            .map_err(|e| Error::InvalidPattern { pattern: pattern.to_string(), reason: e.to_string() })?;
        let snapshot = self.snapshot();
        let config = &self.config;
        let mut results = Vec::new();
        for doc in &snapshot.docs {
            let spans: Vec<(usize, usize)> =
                re.find_iter(&doc.text).filter(|m| !m.is_empty()).map(|m| (m.start(), m.end())).collect();
            if spans.is_empty() {
                continue;
            }
            let starts: Vec<usize> = spans.iter().map(|s| s.0).collect();
            let mut matched: Vec<String> = Vec::new();
            for &(s, e) in &spans {
                push_unique(&mut matched, &fold_case(&doc.text[s..e]));
            }
            let scored = Scored {
                raw: config.token_weight * weighted_count(&starts, doc.title_len, config),
                matched_terms: matched,
                matched_phrases: Vec::new(),
                spans,
            };
            results.push(to_result(doc, scored, config));
        }
        Ok(finish(results, opts))
    }

    fn score_slots(
        &self,
        snapshot: &IndexSnapshot,
        extracted: &ExtractedQuery,
        query: &str,
        slots: BTreeSet<usize>,
        opts: &SearchOptions,
    ) -> Vec<SearchResult> {
        let where_question = RE_WHERE_QUESTION.as_ref().is_some_and(|re| re.is_match(query));
        let matcher = Matcher { config: &self.config, opts, query: extracted, where_question };
        let results = slots
            .into_iter()
            .filter_map(|slot| {
                let doc = &snapshot.docs[slot];
                matcher.score(doc).map(|scored| to_result(doc, scored, &self.config))
            })
            .collect();
        finish(results, opts)
    }

    fn date_only(&self, snapshot: &IndexSnapshot, start: NaiveDate, end: NaiveDate, opts: &SearchOptions) -> Vec<SearchResult> {
        let mut results = Vec::new();
        for (date, slots) in snapshot.by_date.range(start..=end) {
            for &slot in slots {
                let doc = &snapshot.docs[slot];
                let mut result = SearchResult::new(doc.document.id.clone(), 1.0)
                    .with_document(doc.document.clone())
                    .with_source(StrategyKind::DateRange);
                result.add_highlight(format!("Date match: {date}"));
                results.push(result);
            }
        }
        finish(results, opts)
    }
}

fn query_candidates(snapshot: &IndexSnapshot, extracted: &ExtractedQuery) -> BTreeSet<usize> {
    let words: Vec<String> = extracted
        .terms
        .iter()
        .map(|t| t.folded.clone())
        .chain(extracted.phrases.iter().flat_map(|p| p.words.iter().cloned()))
        .collect();
    snapshot.candidates(&words)
}
