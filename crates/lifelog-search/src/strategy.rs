//! Pluggable retrieval strategies run by the parallel executor.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use lifelog_core::config::ExecutorConfig;
use lifelog_core::error::{Error, Result};
use lifelog_core::text::{fold_case, snippet, unique_tokens};
use lifelog_core::traits::VectorIndex;
use lifelog_core::types::{sort_by_score, SearchResult, StrategyKind, VectorFilter, VectorSearchOptions};
use lifelog_query::{PreprocessedQuery, TemporalInfo};
use lifelog_text::{PatternIndex, SearchOptions};

use crate::context::{ContextUpdate, SearchContext};

/// Everything a strategy needs to know about the query, owned so it can
/// cross task boundaries.
#[derive(Debug, Clone)]
pub struct StrategyRequest {
    pub query: String,
    /// Query with temporal expressions removed.
    pub search_text: String,
    pub keywords: Vec<String>,
    pub temporal: TemporalInfo,
    pub limit: usize,
    pub score_threshold: f64,
}

impl StrategyRequest {
    pub fn from_preprocessed(pre: &PreprocessedQuery, limit: usize, score_threshold: f64) -> Self {
        Self {
            query: pre.original.clone(),
            search_text: pre.search_text.clone(),
            keywords: pre.keywords.clone(),
            temporal: pre.temporal.clone(),
            limit,
            score_threshold,
        }
    }

    /// Text for similarity search: the stripped query, or the original when
    /// nothing but dates was asked for.
    pub fn semantic_text(&self) -> &str {
        if self.search_text.trim().is_empty() {
            &self.query
        } else {
            &self.search_text
        }
    }

    fn lexical_options(&self) -> SearchOptions {
        SearchOptions { max_results: self.limit, score_threshold: self.score_threshold, ..SearchOptions::default() }
    }
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn execute(&self, request: &StrategyRequest, ctx: &SearchContext) -> Result<Vec<SearchResult>>;
}

/// Phrase-aware keyword search; flags its strongest hits as hot and feeds
/// the terms it matched back into the context.
pub struct LexicalStrategy {
    index: Arc<PatternIndex>,
    config: ExecutorConfig,
}

impl LexicalStrategy {
    pub fn new(index: Arc<PatternIndex>, config: ExecutorConfig) -> Self {
        Self { index, config }
    }
}

#[async_trait]
impl Strategy for LexicalStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Lexical
    }

    async fn execute(&self, request: &StrategyRequest, ctx: &SearchContext) -> Result<Vec<SearchResult>> {
        if request.search_text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let results = self.index.search(&request.search_text, &request.lexical_options());

        let hot: Vec<&SearchResult> = results
            .iter()
            .filter(|r| r.score >= self.config.hot_score_threshold)
            .take(self.config.max_hot_documents)
            .collect();
        let mut keywords: BTreeSet<String> = BTreeSet::new();
        for r in &results {
            keywords.extend(r.metadata.matched_terms.iter().cloned());
            keywords.extend(r.metadata.matched_phrases.iter().cloned());
        }
        ctx.update(self.kind(), ContextUpdate {
            hot_documents: hot.iter().map(|r| r.id.clone()).collect(),
            dates: hot.iter().filter_map(|r| r.date()).collect(),
            keywords: keywords.into_iter().collect(),
            confidence: results.first().map(|r| r.score),
        });
        Ok(results)
    }
}

/// Documents recorded inside the query's date expressions, scored by the
/// remaining text when there is any.
pub struct DateRangeStrategy {
    index: Arc<PatternIndex>,
    config: ExecutorConfig,
}

impl DateRangeStrategy {
    pub fn new(index: Arc<PatternIndex>, config: ExecutorConfig) -> Self {
        Self { index, config }
    }
}

#[async_trait]
impl Strategy for DateRangeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DateRange
    }

    async fn execute(&self, request: &StrategyRequest, ctx: &SearchContext) -> Result<Vec<SearchResult>> {
        let text = request.search_text.trim();
        let text = (!text.is_empty()).then_some(text);
        let opts = request.lexical_options();

        let mut results: Vec<SearchResult> = Vec::new();
        for expression in &request.temporal.expressions {
            let range = expression.range;
            for hit in self.index.search_by_date_range(range.start, range.end, text, &opts) {
                match results.iter_mut().find(|r| r.id == hit.id) {
                    Some(existing) if hit.score > existing.score => *existing = hit,
                    Some(_) => {}
                    None => results.push(hit),
                }
            }
        }
        sort_by_score(&mut results);
        results.truncate(request.limit);

        let mut dates: Vec<_> =
            request.temporal.expressions.iter().filter(|e| e.range.is_single_day()).map(|e| e.range.start).collect();
        dates.extend(results.iter().filter_map(SearchResult::date));
        ctx.update(self.kind(), ContextUpdate {
            hot_documents: results.iter().take(self.config.max_hot_documents).map(|r| r.id.clone()).collect(),
            dates,
            keywords: Vec::new(),
            confidence: (!results.is_empty()).then_some(1.0),
        });
        Ok(results)
    }
}

/// Similarity search through the vector index, with the query extended by
/// keywords other strategies discovered and restricted to the query's dates.
pub struct VectorStrategy {
    vector: Arc<dyn VectorIndex>,
    index: Arc<PatternIndex>,
    config: ExecutorConfig,
}

impl VectorStrategy {
    pub fn new(vector: Arc<dyn VectorIndex>, index: Arc<PatternIndex>, config: ExecutorConfig) -> Self {
        Self { vector, index, config }
    }

    pub fn enhanced_query(&self, request: &StrategyRequest, ctx: &SearchContext) -> String {
        let base = request.semantic_text();
        let present = unique_tokens(base);
        let extra: Vec<String> = ctx
            .top_keywords(usize::MAX)
            .into_iter()
            .filter(|k| !present.contains(&fold_case(k)))
            .take(self.config.max_context_keywords)
            .collect();
        if extra.is_empty() {
            base.to_string()
        } else {
            format!("{base} {}", extra.join(" "))
        }
    }
}

#[async_trait]
impl Strategy for VectorStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::VectorSemantic
    }

    async fn execute(&self, request: &StrategyRequest, ctx: &SearchContext) -> Result<Vec<SearchResult>> {
        let query = self.enhanced_query(request, ctx);
        let opts = VectorSearchOptions {
            top_k: request.limit,
            score_threshold: request.score_threshold,
            filter: request.temporal.envelope().map(|r| VectorFilter { start: Some(r.start), end: Some(r.end) }),
        };
        debug!(query = %query, "vector strategy");
        let hits = self.vector.search_by_text(&query, &opts).await.map_err(|e| Error::vector(&e))?;

        let mut results: Vec<SearchResult> = Vec::with_capacity(hits.len());
        for (rank, hit) in hits.into_iter().enumerate() {
            if results.iter().any(|r| r.id == hit.id) {
                continue;
            }
            let mut result = SearchResult::new(hit.id.clone(), hit.score).with_source(self.kind());
            if let Some(doc) = self.index.document(&hit.id) {
                result = result.with_document(doc);
            }
            if let Some(content) = hit.content.filter(|c| !c.is_empty()) {
                result.add_highlight(snippet(&content, 0, content.len().min(160), 0));
            }
            result.metadata.vector_score = Some(hit.score);
            result.metadata.vector_rank = Some(rank);
            results.push(result);
        }
        ctx.update(self.kind(), ContextUpdate { confidence: results.first().map(|r| r.score), ..Default::default() });
        Ok(results)
    }
}

/// Re-examines the documents earlier strategies flagged hot against the
/// query's keywords plus the keywords the context accumulated.
pub struct ContextFilterStrategy {
    index: Arc<PatternIndex>,
    config: ExecutorConfig,
}

impl ContextFilterStrategy {
    pub fn new(index: Arc<PatternIndex>, config: ExecutorConfig) -> Self {
        Self { index, config }
    }
}

/// Score given to a hot document that matches no keyword but falls on a
/// discovered date.
const DATE_ONLY_SCORE: f64 = 0.5;

#[async_trait]
impl Strategy for ContextFilterStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ContextFilter
    }

    async fn execute(&self, request: &StrategyRequest, ctx: &SearchContext) -> Result<Vec<SearchResult>> {
        let mut terms: Vec<String> = request.keywords.clone();
        for keyword in ctx.top_keywords(self.config.max_context_keywords) {
            for token in unique_tokens(&keyword) {
                if !terms.contains(&token) {
                    terms.push(token);
                }
            }
        }
        let dates = ctx.dates();

        let mut results: Vec<SearchResult> = Vec::new();
        for id in ctx.hot_documents() {
            let Some(doc) = self.index.document(&id) else { continue };
            let doc_tokens: BTreeSet<String> = unique_tokens(&doc.searchable_text()).into_iter().collect();
            let matched: Vec<&str> = terms.iter().filter(|t| doc_tokens.contains(*t)).map(String::as_str).collect();

            let mut result = if !matched.is_empty() {
                let mut r = SearchResult::new(id, matched.len() as f64 / terms.len() as f64);
                r.add_highlight(format!("Context match: {}", matched.join(", ")));
                r.metadata.matched_terms = matched.iter().map(|t| (*t).to_string()).collect();
                r
            } else if dates.contains(&doc.date()) {
                let mut r = SearchResult::new(id, DATE_ONLY_SCORE);
                r.add_highlight(format!("Context match: {}", doc.date()));
                r
            } else {
                continue;
            };
            if result.score < request.score_threshold {
                continue;
            }
            result.metadata.hot = true;
            results.push(result.with_document(doc).with_source(self.kind()));
        }
        sort_by_score(&mut results);
        results.truncate(request.limit);
        ctx.update(self.kind(), ContextUpdate { confidence: results.first().map(|r| r.score), ..Default::default() });
        Ok(results)
    }
}
