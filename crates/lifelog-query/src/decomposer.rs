//! Multi-part query decomposition.
//!
//! A complex query is split into sub-queries with typed intent and explicit
//! dependencies; `execution_order` is a topological order of that graph.
//! Inconsistent graphs never fail: whatever cannot be ordered is appended in
//! original order.

use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

use lifelog_core::config::DecomposerConfig;
use lifelog_core::text::{jaccard, tokenize};

use crate::entities;
use crate::temporal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubQueryType {
    Search,
    Filter,
    Summarize,
    Compare,
    Analyze,
    Extract,
}

impl SubQueryType {
    pub fn is_analytical(self) -> bool {
        matches!(self, Self::Compare | Self::Analyze)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Filter => "filter",
            Self::Summarize => "summarize",
            Self::Compare => "compare",
            Self::Analyze => "analyze",
            Self::Extract => "extract",
        }
    }
}

impl fmt::Display for SubQueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQueryContext {
    pub references_previous: bool,
    pub temporal: bool,
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubQuery {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub query_type: SubQueryType,
    pub dependencies: Vec<String>,
    pub context: SubQueryContext,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecomposedQuery {
    pub original: String,
    pub sub_queries: Vec<SubQuery>,
    pub execution_order: Vec<String>,
    pub complexity: f64,
    /// Sub-results must be synthesized rather than concatenated.
    pub requires_contextual_summary: bool,
    pub is_complex: bool,
}

impl DecomposedQuery {
    pub fn sub_query(&self, id: &str) -> Option<&SubQuery> {
        self.sub_queries.iter().find(|q| q.id == id)
    }

    /// Sub-queries in execution order.
    pub fn ordered(&self) -> impl Iterator<Item = &SubQuery> {
        self.execution_order.iter().filter_map(|id| self.sub_query(id))
    }
}

fn ci(pattern: &str) -> Option<Regex> {
    Regex::new(&format!("(?i){pattern}")).ok()
}

static RE_SEQUENCING: LazyLock<Option<Regex>> = LazyLock::new(|| {
    ci(r"\b(?:and also|and then|after that|additionally|as well as|followed by|on top of that|also|then)\b")
});
static RE_CONJUNCTION_SPLIT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    ci(r"\s*,?\s*\b(?:and also|and then|after that|additionally|as well as|followed by|on top of that)\b\s*,?\s*")
});
static RE_SENTENCE_END: LazyLock<Option<Regex>> = LazyLock::new(|| ci(r"[.!;]+\s*"));
static RE_LEADING_FILLER: LazyLock<Option<Regex>> =
    LazyLock::new(|| ci(r"^\s*(?:(?:and|also|then|but|so|plus|or)\b[\s,]*)+"));

/// Relationship-keyword categories; two or more present at once mark a
/// query as multi-part.
static RELATIONSHIPS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b(?:because|why|caused?|due to|led to|result(?:ed)? in|so that)\b",
        r"\b(?:compare[ds]?|versus|vs|than|difference|better|worse|similar)\b",
        r"\b(?:before|after|during|since|until|while)\b",
        r"\b(?:if|unless|otherwise|in case|provided)\b",
    ]
    .into_iter()
    .filter_map(ci)
    .collect()
});

static RE_BACK_REFERENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| ci(r"\b(?:that|those|it|its|they|them|this|these|there|he|she|him|her|his|their)\b"));
static RE_CONDITIONAL: LazyLock<Option<Regex>> =
    LazyLock::new(|| ci(r"\b(?:if so|if that|if not|based on|given that|in that case|otherwise|depending on)\b"));

/// Ordered type heuristics; the first match wins, `Search` otherwise.
static TYPE_RULES: LazyLock<Vec<(SubQueryType, Regex)>> = LazyLock::new(|| {
    [
        (SubQueryType::Compare, r"\b(?:compare[ds]?|comparison|versus|vs\.?|difference|differ)\b"),
        (SubQueryType::Summarize, r"\b(?:summar\w*|recap|overview|key points|main points)\b"),
        (SubQueryType::Analyze, r"\b(?:why|analy[sz]e|analysis|trends?|patterns?|impact|cause[sd]?)\b"),
        (SubQueryType::Extract, r"\b(?:list|extract|action items?|todos?|decisions?|names?|numbers?)\b"),
        (SubQueryType::Filter, r"\b(?:only|filter|exclude|except|excluding|limited to|between)\b"),
    ]
    .into_iter()
    .filter_map(|(ty, p)| ci(p).map(|re| (ty, re)))
    .collect()
});

fn is_match(re: &LazyLock<Option<Regex>>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

pub struct QueryDecomposer {
    config: DecomposerConfig,
}

impl QueryDecomposer {
    pub fn new(config: DecomposerConfig) -> Self {
        Self { config }
    }

    /// Multi-part signals are only looked for in queries of at least
    /// `min_length` characters.
    pub fn is_complex(&self, query: &str) -> bool {
        if query.trim().chars().count() < self.config.min_length {
            return false;
        }
        let questions = query.matches('?').count();
        let categories = RELATIONSHIPS.iter().filter(|re| re.is_match(query)).count();
        is_match(&RE_SEQUENCING, query) || questions >= 2 || categories >= 2
    }

    pub fn decompose(&self, query: &str) -> DecomposedQuery {
        let query = query.trim();
        let is_complex = self.is_complex(query);
        let parts = if is_complex { self.split(query) } else { Vec::new() };
        let parts = if parts.len() > 1 { parts } else { vec![query.to_string()] };

        let mut sub_queries: Vec<SubQuery> = Vec::with_capacity(parts.len());
        for (i, text) in parts.into_iter().enumerate() {
            let references_previous = i > 0 && is_match(&RE_BACK_REFERENCE, &text);
            let conditional = i > 0 && is_match(&RE_CONDITIONAL, &text);
            let dependencies = match sub_queries.last() {
                Some(prev) if references_previous || conditional => vec![prev.id.clone()],
                _ => Vec::new(),
            };
            let mut entity_names = entities::people(&text);
            entity_names.extend(entities::topics(&text));
            sub_queries.push(SubQuery {
                id: format!("sq{}", i + 1),
                query_type: classify_sub_query(&text),
                dependencies,
                context: SubQueryContext { references_previous, temporal: temporal::mentions_time(&text), entities: entity_names },
                text,
            });
        }

        let execution_order = topological_order(&sub_queries);
        let depth = dependency_depth(&sub_queries);
        let analytical = sub_queries.iter().filter(|q| q.query_type.is_analytical()).count();
        let edges: usize = sub_queries.iter().map(|q| q.dependencies.len()).sum();
        let complexity = sub_queries.len() as f64 + 0.5 * edges as f64 + 0.5 * analytical as f64;
        let requires_contextual_summary = analytical >= 2 || depth >= 2 || sub_queries.len() >= 4;
        debug!(parts = sub_queries.len(), complexity, "decomposed query");

        DecomposedQuery {
            original: query.to_string(),
            sub_queries,
            execution_order,
            complexity,
            requires_contextual_summary,
            is_complex,
        }
    }

    /// Tries each splitter in turn until one yields more than one part.
    fn split(&self, query: &str) -> Vec<String> {
        let by_question = keep_meaningful(split_keeping_question_marks(query));
        if by_question.len() > 1 {
            return by_question;
        }
        let by_conjunction = keep_meaningful(split_on(&RE_CONJUNCTION_SPLIT, query));
        if by_conjunction.len() > 1 {
            return by_conjunction;
        }
        let by_sentence = keep_meaningful(split_on(&RE_SENTENCE_END, query));
        if by_sentence.len() > 1 {
            return by_sentence;
        }
        keep_meaningful(self.split_on_topic_change(query))
    }

    /// Comma-separated clauses are grouped while consecutive clauses share
    /// enough vocabulary; a Jaccard similarity below the threshold starts a
    /// new part.
    fn split_on_topic_change(&self, query: &str) -> Vec<String> {
        let clauses: Vec<&str> = query.split(',').map(str::trim).filter(|c| !c.is_empty()).collect();
        let mut groups: Vec<Vec<&str>> = Vec::new();
        let mut previous: Option<Vec<String>> = None;
        for clause in clauses {
            let terms = tokenize(clause);
            let boundary = previous.as_ref().is_some_and(|p| jaccard(p, &terms) < self.config.topic_boundary_jaccard);
            match groups.last_mut() {
                Some(group) if !boundary => group.push(clause),
                _ => groups.push(vec![clause]),
            }
            previous = Some(terms);
        }
        groups.into_iter().map(|g| g.join(", ")).collect()
    }
}

impl Default for QueryDecomposer {
    fn default() -> Self {
        Self::new(DecomposerConfig::default())
    }
}

fn split_keeping_question_marks(query: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = query;
    while let Some(pos) = rest.find('?') {
        parts.push(rest[..=pos].to_string());
        rest = &rest[pos + 1..];
    }
    parts.push(rest.to_string());
    parts
}

fn split_on(re: &LazyLock<Option<Regex>>, query: &str) -> Vec<String> {
    match re.as_ref() {
        Some(re) => re.split(query).map(str::to_string).collect(),
        None => vec![query.to_string()],
    }
}

/// Trims leading connectives and drops parts without a single index term.
fn keep_meaningful(parts: Vec<String>) -> Vec<String> {
    parts
        .into_iter()
        .map(|p| {
            let p = p.trim();
            let stripped = RE_LEADING_FILLER.as_ref().map_or(p, |re| re.find(p).map_or(p, |m| &p[m.end()..]));
            stripped.trim().to_string()
        })
        .filter(|p| !tokenize(p).is_empty())
        .collect()
}

pub fn classify_sub_query(text: &str) -> SubQueryType {
    TYPE_RULES
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map_or_else(|| if temporal::mentions_time(text) { SubQueryType::Filter } else { SubQueryType::Search }, |(ty, _)| *ty)
}

/// Kahn's algorithm, always taking the earliest ready sub-query. Sub-queries
/// stuck behind a cycle or a dangling dependency are appended in original
/// order.
pub fn topological_order(sub_queries: &[SubQuery]) -> Vec<String> {
    let known: HashSet<&str> = sub_queries.iter().map(|q| q.id.as_str()).collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut order: Vec<String> = Vec::with_capacity(sub_queries.len());
    loop {
        let next = sub_queries.iter().find(|q| {
            !placed.contains(q.id.as_str())
                && q.dependencies.iter().all(|d| known.contains(d.as_str()) && placed.contains(d.as_str()))
        });
        let Some(next) = next else { break };
        placed.insert(next.id.as_str());
        order.push(next.id.clone());
    }
    for q in sub_queries {
        if !placed.contains(q.id.as_str()) {
            placed.insert(q.id.as_str());
            order.push(q.id.clone());
        }
    }
    order
}

/// Longest dependency chain, in edges. Cycles are cut where they close.
fn dependency_depth(sub_queries: &[SubQuery]) -> usize {
    let by_id: HashMap<&str, &SubQuery> = sub_queries.iter().map(|q| (q.id.as_str(), q)).collect();
    fn depth<'a>(id: &'a str, by_id: &HashMap<&'a str, &'a SubQuery>, visiting: &mut HashSet<&'a str>) -> usize {
        let Some(q) = by_id.get(id) else { return 0 };
        if !visiting.insert(id) {
            return 0;
        }
        let d = q.dependencies.iter().map(|dep| 1 + depth(dep.as_str(), by_id, visiting)).max().unwrap_or(0);
        visiting.remove(id);
        d
    }
    sub_queries.iter().map(|q| depth(q.id.as_str(), &by_id, &mut HashSet::new())).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sq(id: &str, deps: &[&str]) -> SubQuery {
        SubQuery {
            id: id.into(),
            text: id.into(),
            query_type: SubQueryType::Search,
            dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
            context: SubQueryContext::default(),
        }
    }

    #[test]
    fn short_queries_are_not_decomposed() {
        let d = QueryDecomposer::default().decompose("lunch and also dinner?");
        assert!(!d.is_complex);
        assert_eq!(d.sub_queries.len(), 1);
        assert_eq!(d.execution_order, vec!["sq1"]);
    }

    #[test]
    fn question_marks_split_and_back_references_depend() {
        let d = QueryDecomposer::default()
            .decompose("What did Sarah say about the budget? And also show me what she decided about that?");
        assert!(d.is_complex);
        assert_eq!(d.sub_queries.len(), 2);
        assert_eq!(d.sub_queries[1].text, "show me what she decided about that?");
        assert_eq!(d.sub_queries[1].dependencies, vec!["sq1"]);
        assert!(d.sub_queries[1].context.references_previous);
        assert_eq!(d.execution_order, vec!["sq1", "sq2"]);
    }

    #[test]
    fn conjunctions_split_without_question_marks() {
        let d = QueryDecomposer::default()
            .decompose("find the hiring notes from Monday and then summarize the interview feedback");
        let texts: Vec<&str> = d.sub_queries.iter().map(|q| q.text.as_str()).collect();
        assert_eq!(texts, vec!["find the hiring notes from Monday", "summarize the interview feedback"]);
        assert_eq!(d.sub_queries[0].query_type, SubQueryType::Filter);
        assert!(d.sub_queries[0].context.temporal);
        assert_eq!(d.sub_queries[1].query_type, SubQueryType::Summarize);
    }

    #[test]
    fn deep_chains_need_contextual_summary() {
        let d = QueryDecomposer::default().decompose(
            "What did we decide about the launch? Why did they change it? Compare that with the original plan?",
        );
        assert_eq!(d.sub_queries.len(), 3);
        assert_eq!(d.sub_queries[2].dependencies, vec!["sq2"]);
        assert!(d.requires_contextual_summary);
    }

    #[test]
    fn cycles_and_dangling_dependencies_fall_back_to_original_order() {
        let graph = vec![sq("a", &["b"]), sq("b", &["a"]), sq("c", &[]), sq("d", &["missing"])];
        assert_eq!(topological_order(&graph), vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn dependencies_are_ordered_first() {
        let graph = vec![sq("a", &["c"]), sq("b", &[]), sq("c", &["b"])];
        assert_eq!(topological_order(&graph), vec!["b", "c", "a"]);
        assert_eq!(dependency_depth(&graph), 2);
    }

    const FRAGMENTS: &[&str] = &[
        "what did Sarah say about the budget?",
        "and also show me what she decided about that?",
        "compare it with last month?",
        "list the action items",
        "why did the launch slip?",
        "summarize the hiring plan",
        "and then what happened after that?",
        "if so, who owns it?",
    ];

    proptest! {
        #[test]
        fn execution_order_is_topological(picks in proptest::collection::vec(0..FRAGMENTS.len(), 1..6)) {
            let query = picks.iter().map(|&i| FRAGMENTS[i]).collect::<Vec<_>>().join(" ");
            let d = QueryDecomposer::default().decompose(&query);
            prop_assert_eq!(d.execution_order.len(), d.sub_queries.len());
            let position: HashMap<&str, usize> =
                d.execution_order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
            prop_assert_eq!(position.len(), d.sub_queries.len());
            for q in &d.sub_queries {
                for dep in &q.dependencies {
                    prop_assert!(position[dep.as_str()] < position[q.id.as_str()]);
                }
            }
        }
    }
}
