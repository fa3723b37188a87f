//! Domain types shared by every retrieval strategy.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub type DocumentId = String;
pub type Meta = HashMap<String, String>;

/// A timestamped transcript-like record ("lifelog").
///
/// Documents are created by an external store and are read-only to the
/// search core. `id` is unique and stable across rebuilds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: DocumentId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_seconds: u64,
    #[serde(default)]
    pub headings: Vec<String>,
}

impl Document {
    /// Calendar day (UTC) the document was recorded on.
    pub fn date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }

    /// Everything after the title: content followed by headings.
    pub fn body(&self) -> String {
        if self.headings.is_empty() {
            return self.content.clone();
        }
        format!("{} {}", self.content, self.headings.join(" "))
    }

    /// `title + ' ' + content (+ headings)`, the text every index tokenizes.
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.title, self.body())
    }
}

/// One of the strategies the parallel executor can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Lexical,
    DateRange,
    VectorSemantic,
    ContextFilter,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lexical => "lexical",
            Self::DateRange => "date-range",
            Self::VectorSemantic => "vector-semantic",
            Self::ContextFilter => "context-filter",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level execution path chosen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    /// Lexical pattern index (plus date-range lookups when the query is temporal).
    Fast,
    /// Vector index similarity only.
    Vector,
    /// BM25 + vector fused with reciprocal rank fusion.
    Hybrid,
    /// External reasoning collaborator over hybrid candidates.
    Reasoning,
    /// Two-phase parallel strategy executor.
    Parallel,
}

impl SearchStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Vector => "vector",
            Self::Hybrid => "hybrid",
            Self::Reasoning => "reasoning",
            Self::Parallel => "parallel",
        }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SearchStrategy {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "vector" => Ok(Self::Vector),
            "hybrid" => Ok(Self::Hybrid),
            "reasoning" => Ok(Self::Reasoning),
            "parallel" => Ok(Self::Parallel),
            other => Err(crate::error::Error::InvalidConfig(format!("unknown strategy '{other}'"))),
        }
    }
}

/// Per-result metadata. Every producer fills the subset it knows about;
/// absent fields stay `None`/empty rather than being dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    /// Strategies that surfaced this document, in discovery order.
    pub matching_sources: Vec<StrategyKind>,
    pub date: Option<NaiveDate>,
    pub matched_terms: Vec<String>,
    pub matched_phrases: Vec<String>,
    /// Lexical score before length normalization and damping.
    pub raw_score: Option<f64>,
    pub keyword_score: Option<f64>,
    pub vector_score: Option<f64>,
    pub keyword_rank: Option<usize>,
    pub vector_rank: Option<usize>,
    /// Multiplier applied for agreement between strategies.
    pub consensus_boost: Option<f64>,
    /// Whether the document was flagged hot during a parallel search.
    pub hot: bool,
    /// Sub-query id when the result came from a decomposed query.
    pub sub_query: Option<String>,
    /// Query variant that produced the result under query expansion.
    pub expanded_from: Option<String>,
}

/// A single ranked hit. After merging, each id appears at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: DocumentId,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
    pub highlights: Vec<String>,
    pub metadata: ResultMetadata,
}

impl SearchResult {
    pub fn new(id: impl Into<DocumentId>, score: f64) -> Self {
        Self { id: id.into(), score, document: None, highlights: Vec::new(), metadata: ResultMetadata::default() }
    }

    pub fn with_document(mut self, document: Document) -> Self {
        self.metadata.date.get_or_insert(document.date());
        self.document = Some(document);
        self
    }

    pub fn with_source(mut self, source: StrategyKind) -> Self {
        self.add_source(source);
        self
    }

    /// Records `source` once; repeated sources are ignored.
    pub fn add_source(&mut self, source: StrategyKind) {
        if !self.metadata.matching_sources.contains(&source) {
            self.metadata.matching_sources.push(source);
        }
    }

    pub fn add_highlight(&mut self, highlight: impl Into<String>) {
        let highlight = highlight.into();
        if !self.highlights.contains(&highlight) {
            self.highlights.push(highlight);
        }
    }

    /// Best known date: metadata first, then the attached document.
    pub fn date(&self) -> Option<NaiveDate> {
        self.metadata.date.or_else(|| self.document.as_ref().map(Document::date))
    }
}

/// Sort descending by score. The sort is stable, so equal scores keep
/// their incoming order.
pub fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

/// Options forwarded to the vector index collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchOptions {
    pub top_k: usize,
    pub score_threshold: f64,
    pub filter: Option<VectorFilter>,
}

/// Inclusive date window the vector index may use to pre-filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorFilter {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

/// A similarity hit returned by the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRef {
    pub id: DocumentId,
    pub score: f64,
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: Meta,
}

/// A stored document as the vector index sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorDocument {
    pub id: DocumentId,
    pub content: String,
    #[serde(default)]
    pub metadata: Meta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorIndexStats {
    pub document_count: usize,
    pub dimension: Option<usize>,
    pub backend: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningOptions {
    pub max_results: usize,
    pub include_action_items: bool,
    pub include_summary: bool,
}

impl Default for ReasoningOptions {
    fn default() -> Self {
        Self { max_results: 20, include_action_items: true, include_summary: true }
    }
}

/// What the reasoning collaborator hands back for a complex query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningOutcome {
    pub results: Vec<SearchResult>,
    pub insights: Vec<String>,
    pub action_items: Option<Vec<String>>,
    pub summary: Option<String>,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc() -> Document {
        Document {
            id: "d1".into(),
            title: "Standup".into(),
            content: "talked about the release".into(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).single().expect("valid timestamp"),
            duration_seconds: 600,
            headings: vec!["Release".into()],
        }
    }

    #[test]
    fn searchable_text_joins_title_content_and_headings() {
        assert_eq!(doc().searchable_text(), "Standup talked about the release Release");
    }

    #[test]
    fn add_source_is_idempotent() {
        let mut r = SearchResult::new("d1", 1.0);
        r.add_source(StrategyKind::Lexical);
        r.add_source(StrategyKind::Lexical);
        r.add_source(StrategyKind::VectorSemantic);
        assert_eq!(r.metadata.matching_sources, vec![StrategyKind::Lexical, StrategyKind::VectorSemantic]);
    }

    #[test]
    fn with_document_fills_date() {
        let r = SearchResult::new("d1", 1.0).with_document(doc());
        assert_eq!(r.date(), NaiveDate::from_ymd_opt(2024, 3, 15));
    }

    #[test]
    fn document_round_trips_camel_case_json() {
        let json = r#"{"id":"x","title":"t","content":"c","createdAt":"2024-03-15T09:30:00Z","durationSeconds":5}"#;
        let d: Document = serde_json::from_str(json).expect("parse");
        assert_eq!(d.duration_seconds, 5);
        assert!(d.headings.is_empty());
    }

    #[test]
    fn strategy_parses_case_insensitively() {
        assert_eq!("Reasoning".parse::<SearchStrategy>().ok(), Some(SearchStrategy::Reasoning));
        assert!("bogus".parse::<SearchStrategy>().is_err());
    }
}
