//! Query-type classification and initial strategy routing.
//!
//! Each query type owns a table of patterns; the type matching the most
//! patterns wins. Long queries and explicit boolean operators are always
//! treated as complex analytical queries.

use chrono::NaiveDate;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use lifelog_core::clock::{Clock, SystemClock};
use lifelog_core::config::ClassifierConfig;
use lifelog_core::text::unique_tokens;
use lifelog_core::types::SearchStrategy;

use crate::entities;
use crate::temporal::{self, DateRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    SimpleKeyword,
    DateBased,
    Semantic,
    ComplexAnalytical,
    ActionItem,
    Summary,
}

impl QueryType {
    pub const ALL: [QueryType; 6] = [
        Self::SimpleKeyword,
        Self::DateBased,
        Self::Semantic,
        Self::ComplexAnalytical,
        Self::ActionItem,
        Self::Summary,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SimpleKeyword => "simple_keyword",
            Self::DateBased => "date_based",
            Self::Semantic => "semantic",
            Self::ComplexAnalytical => "complex_analytical",
            Self::ActionItem => "action_item",
            Self::Summary => "summary",
        }
    }

    /// Fixed routing table.
    pub fn default_strategy(self, keyword_count: usize) -> SearchStrategy {
        match self {
            Self::SimpleKeyword if keyword_count > 3 => SearchStrategy::Hybrid,
            Self::SimpleKeyword | Self::DateBased => SearchStrategy::Fast,
            Self::Semantic => SearchStrategy::Vector,
            Self::ActionItem | Self::Summary => SearchStrategy::Hybrid,
            Self::ComplexAnalytical => SearchStrategy::Reasoning,
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedEntities {
    pub keywords: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub date_ranges: Vec<DateRange>,
    pub actions: Vec<String>,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryClassification {
    #[serde(rename = "type")]
    pub query_type: QueryType,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub extracted_entities: ExtractedEntities,
    pub suggested_strategy: SearchStrategy,
    pub estimated_response_time_ms: u64,
}

/// Score ties resolve to the earlier row; simple keyword comes last so it is
/// only chosen when nothing more specific matches.
static PATTERN_TABLE: LazyLock<Vec<(QueryType, Vec<Regex>)>> = LazyLock::new(|| {
    let rows: [(QueryType, &[&str]); 6] = [
        (QueryType::DateBased, &[
            r"\b(?:today|tonight|yesterday|tomorrow|last\s+(?:week|month|year|night)|this\s+(?:week|month|year|morning))\b",
            r"\b\d+\s+(?:day|week|month)s?\s+ago\b|\b(?:last|past)\s+\d+\s+(?:day|week|month)s?\b",
            r"\b(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
            r"\b\d{4}-\d{2}-\d{2}\b|\b(?:january|february|march|april|june|july|august|september|october|november|december)\b",
            r"^\s*when\b|\b(?:schedule|calendar|date)\b",
        ]),
        (QueryType::Semantic, &[
            r"\b(?:about|regarding|concerning|related to|similar to|like)\b",
            r"\b(?:feel|felt|think|thought|opinion|mood|impression)s?\b",
            r"\b(?:discuss(?:ed|ion)?|conversation|talk(?:ed)?)\b",
            r"^\s*(?:what|how)\b.*\b(?:mean|idea|ideas|concept)\b",
        ]),
        (QueryType::ComplexAnalytical, &[
            r"\b(?:analy[sz]e|analysis|compare|comparison|trends?|patterns?|correlat\w*|insights?|breakdown|evaluate|versus|vs\.?)\b",
            r"\b(?:why did|how come|what caused|impact of|relationship between|effect of)\b",
            r"\b(?:over time|across|between .+ and)\b",
        ]),
        (QueryType::ActionItem, &[
            r"\b(?:todos?|to-dos?|action items?|tasks?|follow[- ]?ups?|next steps)\b",
            r"\b(?:need to|have to|must|should|promised|committed|assigned|deadline|remind)\b",
            r"\b(?:what do i need|what should i|what did i (?:promise|commit))\b",
        ]),
        (QueryType::Summary, &[
            r"\b(?:summar\w*|recap|overview|highlights|digest|tl;?dr|key points|main points)\b",
            r"\b(?:what happened|how was|how did .+ go)\b",
        ]),
        (QueryType::SimpleKeyword, &[r#"^\s*[\w'-]+(?:\s+[\w'-]+){0,2}\s*$"#, r#"^\s*"[^"]+"\s*$"#]),
    ];
    rows.into_iter()
        .map(|(ty, patterns)| (ty, patterns.iter().filter_map(|p| Regex::new(&format!("(?i){p}")).ok()).collect()))
        .collect()
});

static RE_BOOLEAN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\b(?:AND|OR|NOT)\b|&&|\|\|").ok());

const OVERRIDE_CONFIDENCE: f64 = 0.8;
const ENTITY_BOOST: f64 = 0.2;
const TIMING_WINDOW: usize = 100;

/// Rolling mean over the most recent samples.
#[derive(Debug, Default)]
struct RollingAverage {
    samples: VecDeque<u64>,
    sum: u64,
}

impl RollingAverage {
    fn push(&mut self, ms: u64) {
        self.samples.push_back(ms);
        self.sum += ms;
        if self.samples.len() > TIMING_WINDOW {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
            }
        }
    }

    fn mean(&self) -> Option<u64> {
        let n = self.samples.len() as u64;
        (n > 0).then(|| self.sum / n)
    }
}

pub struct QueryClassifier {
    clock: Arc<dyn Clock>,
    config: ClassifierConfig,
    cache: Cache<String, QueryClassification>,
    timings: Mutex<HashMap<QueryType, RollingAverage>>,
}

impl QueryClassifier {
    pub fn new(clock: Arc<dyn Clock>, config: ClassifierConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { clock, config, cache, timings: Mutex::new(HashMap::new()) }
    }

    /// Classifies `query`, memoized by its exact (trimmed) text.
    pub fn classify(&self, query: &str) -> QueryClassification {
        let key = query.trim().to_string();
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }
        let classification = self.classify_uncached(&key);
        debug!(query = %key, query_type = %classification.query_type, confidence = classification.confidence, "classified");
        self.cache.insert(key, classification.clone());
        classification
    }

    /// Telemetry only: feeds `estimated_response_time_ms` and nothing else.
    pub fn record_response_time(&self, query_type: QueryType, ms: u64) {
        self.timings.lock().entry(query_type).or_default().push(ms);
    }

    pub fn average_response_time(&self, query_type: QueryType) -> Option<u64> {
        self.timings.lock().get(&query_type).and_then(RollingAverage::mean)
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }

    fn classify_uncached(&self, query: &str) -> QueryClassification {
        let resolved = temporal::resolve(query, self.clock.today());
        let extracted_entities = ExtractedEntities {
            keywords: unique_tokens(&resolved.stripped),
            dates: resolved.info.dates(),
            date_ranges: resolved.info.ranges(),
            actions: entities::actions(query),
            topics: entities::topics(query),
        };

        let scores = pattern_scores(query);
        let total: usize = scores.iter().map(|(_, s)| s).sum();
        let (mut query_type, best) = scores
            .iter()
            .copied()
            .fold((QueryType::SimpleKeyword, 0), |acc, (ty, s)| if s > acc.1 { (ty, s) } else { acc });
        let mut confidence = if total == 0 { 0.5 } else { best as f64 / total as f64 };

        let word_count = query.split_whitespace().count();
        let boolean = RE_BOOLEAN.as_ref().is_some_and(|re| re.is_match(query));
        if word_count > self.config.complex_word_count || boolean {
            query_type = QueryType::ComplexAnalytical;
            confidence = confidence.max(OVERRIDE_CONFIDENCE);
        }
        if has_supporting_entities(query_type, &extracted_entities) {
            confidence = (confidence + ENTITY_BOOST).min(1.0);
        }

        let suggested_strategy = query_type.default_strategy(extracted_entities.keywords.len());
        let estimated_response_time_ms =
            self.average_response_time(query_type).unwrap_or_else(|| default_estimate(suggested_strategy));
        QueryClassification {
            query_type,
            confidence,
            extracted_entities,
            suggested_strategy,
            estimated_response_time_ms,
        }
    }
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), ClassifierConfig::default())
    }
}

/// Number of matching patterns per type, in table order.
pub fn pattern_scores(query: &str) -> Vec<(QueryType, usize)> {
    PATTERN_TABLE.iter().map(|(ty, patterns)| (*ty, patterns.iter().filter(|re| re.is_match(query)).count())).collect()
}

fn has_supporting_entities(query_type: QueryType, e: &ExtractedEntities) -> bool {
    match query_type {
        QueryType::DateBased => !e.dates.is_empty() || !e.date_ranges.is_empty(),
        QueryType::ActionItem => !e.actions.is_empty(),
        QueryType::Semantic | QueryType::Summary | QueryType::ComplexAnalytical => !e.topics.is_empty(),
        QueryType::SimpleKeyword => !e.keywords.is_empty(),
    }
}

fn default_estimate(strategy: SearchStrategy) -> u64 {
    match strategy {
        SearchStrategy::Fast => 50,
        SearchStrategy::Vector => 200,
        SearchStrategy::Hybrid | SearchStrategy::Parallel => 300,
        SearchStrategy::Reasoning => 3_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lifelog_core::clock::FixedClock;

    fn classifier() -> QueryClassifier {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).single().expect("valid");
        QueryClassifier::new(Arc::new(FixedClock::new(now)), ClassifierConfig::default())
    }

    #[test]
    fn classifies_by_pattern_count() {
        let c = classifier();
        assert_eq!(c.classify("what happened yesterday").query_type, QueryType::DateBased);
        assert_eq!(c.classify("how did I feel about the move").query_type, QueryType::Semantic);
        assert_eq!(c.classify("what are my action items").query_type, QueryType::ActionItem);
        assert_eq!(c.classify("recap of the offsite").query_type, QueryType::Summary);
        assert_eq!(c.classify("smoothie king").query_type, QueryType::SimpleKeyword);
    }

    #[test]
    fn date_queries_get_entity_boost_and_fast_route() {
        let c = classifier().classify("yesterday");
        assert_eq!(c.query_type, QueryType::DateBased);
        assert_eq!(c.extracted_entities.dates, vec![NaiveDate::from_ymd_opt(2024, 3, 14).expect("valid")]);
        // Ties with the one-word keyword pattern (0.5), plus the date boost.
        assert!((c.confidence - 0.7).abs() < 1e-9);
        assert_eq!(c.suggested_strategy, SearchStrategy::Fast);
    }

    #[test]
    fn long_or_boolean_queries_are_complex() {
        let c = classifier();
        let long = "tell me everything we said about the new office lease and the moving company and the furniture budget";
        assert_eq!(c.classify(long).query_type, QueryType::ComplexAnalytical);
        let boolean = c.classify("budget AND hiring");
        assert_eq!(boolean.query_type, QueryType::ComplexAnalytical);
        assert_eq!(boolean.suggested_strategy, SearchStrategy::Reasoning);
    }

    #[test]
    fn many_keywords_route_to_hybrid() {
        let c = classifier().classify("smoothie king lunch receipt budget");
        assert_eq!(c.query_type, QueryType::SimpleKeyword);
        assert_eq!(c.suggested_strategy, SearchStrategy::Hybrid);
    }

    #[test]
    fn response_times_only_change_estimates() {
        let c = classifier();
        let before = c.classify("smoothie king");
        c.record_response_time(QueryType::SimpleKeyword, 10);
        c.record_response_time(QueryType::SimpleKeyword, 30);
        assert_eq!(c.average_response_time(QueryType::SimpleKeyword), Some(20));
        c.clear_cache();
        let after = c.classify("smoothie king");
        assert_eq!(after.estimated_response_time_ms, 20);
        assert_eq!(after.query_type, before.query_type);
        assert!((after.confidence - before.confidence).abs() < f64::EPSILON);
    }
}
