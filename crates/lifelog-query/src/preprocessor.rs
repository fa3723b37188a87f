use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, LazyLock};

use lifelog_core::clock::{Clock, SystemClock};
use lifelog_core::text::unique_tokens;

use crate::entities::QueryEntities;
use crate::synonyms;
use crate::temporal::{self, TemporalInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Question,
    Command,
    Temporal,
    Person,
    Analytical,
    Search,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Command => "command",
            Self::Temporal => "temporal",
            Self::Person => "person",
            Self::Analytical => "analytical",
            Self::Search => "search",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessedQuery {
    pub original: String,
    /// Relative dates replaced by ISO dates/ranges.
    pub normalized: String,
    /// The query with temporal expressions removed; what text strategies search for.
    pub search_text: String,
    pub expanded_queries: Vec<String>,
    pub temporal: TemporalInfo,
    pub entities: QueryEntities,
    pub intent: Intent,
    pub keywords: Vec<String>,
}

static RE_QUESTION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:who|what|when|where|why|how|which|did|do|does|is|are|was|were|can|could|should|have|has)\b|\?\s*$").ok()
});
static RE_COMMAND: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:show|find|list|get|give|tell|search|summarize|summarise|display|remind|pull up|look up)\b").ok()
});
static RE_ANALYTICAL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:analy[sz]e|analysis|compare|comparison|trends?|patterns?|correlat\w*|insights?|breakdown|versus)\b").ok()
});
static RE_PERSON_CUE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(?:with|from|by|to)\s+[A-Z][a-z]+").ok());

fn is_match(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

/// Pure function of the query and the clock's current day.
pub struct QueryPreprocessor {
    clock: Arc<dyn Clock>,
}

impl QueryPreprocessor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn preprocess(&self, query: &str) -> PreprocessedQuery {
        let query = query.trim();
        let resolved = temporal::resolve(query, self.clock.today());
        let entities = QueryEntities::extract(query);
        let intent = detect_intent(query, &resolved.info, &entities);
        let keywords = unique_tokens(&resolved.stripped);
        let expanded_queries = synonyms::expand(&resolved.stripped);
        PreprocessedQuery {
            original: query.to_string(),
            normalized: resolved.normalized,
            search_text: resolved.stripped,
            expanded_queries,
            temporal: resolved.info,
            entities,
            intent,
            keywords,
        }
    }
}

impl Default for QueryPreprocessor {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

/// First matching rule wins: question, command, temporal, person, analytical.
pub fn detect_intent(query: &str, temporal: &TemporalInfo, entities: &QueryEntities) -> Intent {
    if is_match(&RE_QUESTION, query) {
        Intent::Question
    } else if is_match(&RE_COMMAND, query) {
        Intent::Command
    } else if temporal.has_temporal() {
        Intent::Temporal
    } else if !entities.people.is_empty() || is_match(&RE_PERSON_CUE, query) {
        Intent::Person
    } else if is_match(&RE_ANALYTICAL, query) {
        Intent::Analytical
    } else {
        Intent::Search
    }
}
