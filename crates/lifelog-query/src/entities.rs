//! Heuristic entity extraction shared by the preprocessor, the classifier and
//! the decomposer.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use lifelog_core::text::{fold_case, raw_tokens};

static RE_CAPITALIZED: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)*\b").ok());

static RE_ACTION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(decided|agreed|discussed|planned|promised|scheduled|assigned|committed|bought|ordered|ate|met|called|emailed|texted|talked|said|mentioned|asked|told|finished|started|completed|reviewed|need(?:s|ed)? to|have to|has to|should|will|going to|follow(?:ed)? up)\b",
    )
    .ok()
});

/// Capitalized words that are never people.
const NOT_PEOPLE: &[&str] = &[
    "i", "i'm", "i've", "me", "my", "we", "you", "he", "she", "they", "it", "what", "when", "where", "who", "why",
    "how", "which", "did", "do", "does", "can", "could", "should", "would", "show", "find", "tell", "list", "give",
    "get", "search", "summarize", "the", "a", "an", "and", "or", "but", "also", "then", "is", "was", "are", "were",
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday", "january", "february", "march",
    "april", "may", "june", "july", "august", "september", "october", "november", "december", "today", "yesterday",
    "tomorrow", "last", "this", "next", "please", "any", "all", "not",
];

/// Fixed topic vocabulary.
pub const TOPICS: &[&str] = &[
    "budget", "finance", "project", "meeting", "hiring", "interview", "design", "product", "marketing", "sales",
    "roadmap", "launch", "release", "deadline", "strategy", "health", "fitness", "workout", "doctor", "travel",
    "trip", "family", "kids", "school", "food", "lunch", "dinner", "restaurant", "coffee", "shopping", "money",
    "investment", "career", "feedback", "performance", "goals", "ideas", "research", "code", "bug", "customer",
    "contract", "team",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryEntities {
    pub people: Vec<String>,
    pub topics: Vec<String>,
    pub actions: Vec<String>,
}

impl QueryEntities {
    pub fn extract(query: &str) -> Self {
        Self { people: people(query), topics: topics(query), actions: actions(query) }
    }

    pub fn is_empty(&self) -> bool {
        self.people.is_empty() && self.topics.is_empty() && self.actions.is_empty()
    }
}

/// Runs of capitalized words with stop-listed words trimmed off. Single
/// words qualify too; the leading word of the query is kept only when it is
/// part of a longer run, since sentence case capitalizes it anyway.
pub fn people(query: &str) -> Vec<String> {
    let Some(re) = RE_CAPITALIZED.as_ref() else { return Vec::new() };
    let offset = query.len() - query.trim_start().len();
    let mut out: Vec<String> = Vec::new();
    for m in re.find_iter(query) {
        let words: Vec<&str> =
            m.as_str().split_whitespace().filter(|w| !NOT_PEOPLE.contains(&fold_case(w).as_str())).collect();
        if words.is_empty() || (m.start() == offset && words.len() == 1 && m.as_str().split_whitespace().count() == 1) {
            continue;
        }
        let name = words.join(" ");
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

pub fn topics(query: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in raw_tokens(query) {
        let singular = token.strip_suffix('s').filter(|s| TOPICS.contains(s)).unwrap_or(token.as_str());
        if TOPICS.contains(&singular) && !out.iter().any(|t| t == singular) {
            out.push(singular.to_string());
        }
    }
    out
}

pub fn actions(query: &str) -> Vec<String> {
    let Some(re) = RE_ACTION.as_ref() else { return Vec::new() };
    let mut out: Vec<String> = Vec::new();
    for m in re.find_iter(query) {
        let action = fold_case(m.as_str()).split_whitespace().collect::<Vec<_>>().join(" ");
        if !out.contains(&action) {
            out.push(action);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn people_skip_sentence_start_and_calendar_words() {
        assert_eq!(people("What did Sarah Chen say on Monday"), vec!["Sarah Chen"]);
        assert_eq!(people("Budget notes from Tom"), vec!["Tom"]);
        assert_eq!(people("Dana mentioned the launch"), Vec::<String>::new());
    }

    #[test]
    fn topics_match_plural_forms() {
        assert_eq!(topics("any meetings about the budget"), vec!["meeting", "budget"]);
    }

    #[test]
    fn actions_are_folded_and_unique() {
        assert_eq!(actions("We Decided to ship; Tom decided later and I need to follow up"), vec![
            "decided",
            "need to",
            "follow up"
        ]);
    }
}
