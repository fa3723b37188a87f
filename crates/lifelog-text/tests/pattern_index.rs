use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use lifelog_core::clock::FixedClock;
use lifelog_core::config::LexicalConfig;
use lifelog_core::store::MemoryStore;
use lifelog_core::traits::DocumentStore;
use lifelog_core::types::{Document, DocumentId, StrategyKind};
use lifelog_core::Error;
use lifelog_text::{PatternIndex, SearchOptions};
use std::sync::Arc;

fn doc(id: &str, day: u32, title: &str, content: &str) -> Document {
    Document {
        id: id.into(),
        title: title.into(),
        content: content.into(),
        created_at: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).single().expect("valid"),
        duration_seconds: 300,
        headings: vec![],
    }
}

fn corpus() -> Vec<Document> {
    vec![
        doc(
            "distant",
            14,
            "Errands",
            "The smoothie blender broke this morning so I ordered a new one online. Later that evening we watched King Lear.",
        ),
        doc("phrase", 15, "Lunch", "Grabbed lunch at Smoothie King with Sam before the meeting."),
        doc("budget", 16, "Planning", "Reviewed the Q3 budget with Dana, room 204 is booked for Friday."),
    ]
}

fn index() -> PatternIndex {
    let index = PatternIndex::default();
    index.build_index(corpus());
    index
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).expect("valid")
}

#[test]
fn literal_phrase_outranks_scattered_words() {
    let results = index().search("Smoothie King lunch", &SearchOptions::default());
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["phrase", "distant"]);

    let top = &results[0];
    assert_eq!(top.metadata.matched_phrases, vec!["smoothie king".to_string()]);
    assert!(top.metadata.raw_score.unwrap_or_default() >= 3.0);
    assert!(top.score > results[1].score);
    assert!(top.score < 1.0);
    assert!(results[1].metadata.matched_phrases.is_empty());
    assert_eq!(top.metadata.matching_sources, vec![StrategyKind::Lexical]);
    assert!(top.highlights.iter().any(|h| h.contains("Smoothie King")));
}

#[test]
fn where_question_adds_location_boost() {
    let index = index();
    let with_where = index.search("Where did I eat at Smoothie King", &SearchOptions::default());
    let without = index.search("eat at Smoothie King", &SearchOptions::default());
    let raw = |rs: &[lifelog_core::types::SearchResult]| {
        rs.iter().find(|r| r.id == "phrase").and_then(|r| r.metadata.raw_score).expect("phrase doc scored")
    };
    let boost = lifelog_core::config::LexicalConfig::default().location_boost;
    assert!((raw(&with_where) - raw(&without) - boost).abs() < 1e-9);
}

#[test]
fn unmatched_queries_return_nothing() {
    let index = index();
    assert!(index.search("volcano", &SearchOptions::default()).is_empty());
    assert!(index.search("the of and", &SearchOptions::default()).is_empty());
    assert!(PatternIndex::default().search("lunch", &SearchOptions::default()).is_empty());
}

#[test]
fn options_limit_and_filter_results() {
    let index = index();
    let opts = SearchOptions { max_results: 1, ..SearchOptions::default() };
    assert_eq!(index.search("Smoothie King lunch", &opts).len(), 1);

    let opts = SearchOptions { score_threshold: 0.99, ..SearchOptions::default() };
    assert!(index.search("Smoothie King lunch", &opts).is_empty());

    let opts = SearchOptions { case_sensitive: true, ..SearchOptions::default() };
    assert!(index.search("grabbed", &opts).is_empty());
    assert_eq!(index.search("Grabbed", &opts).len(), 1);
}

#[test]
fn word_number_phrase_matches() {
    let results = index().search("what happened in room 204", &SearchOptions::default());
    assert_eq!(results[0].id, "budget");
    assert_eq!(results[0].metadata.matched_phrases, vec!["room 204".to_string()]);
}

#[test]
fn date_range_without_query_returns_every_document_in_range() {
    let results = index().search_by_date_range(day(15), day(16), None, &SearchOptions::default());
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["phrase", "budget"]);
    assert_eq!(results[0].highlights, vec!["Date match: 2024-03-15".to_string()]);
    assert_eq!(results[0].metadata.matching_sources, vec![StrategyKind::DateRange]);
    assert!(index().search_by_date_range(day(16), day(15), None, &SearchOptions::default()).is_empty());
}

#[test]
fn date_range_with_query_scores_within_range() {
    let results = index().search_by_date_range(day(14), day(14), Some("smoothie"), &SearchOptions::default());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "distant");
}

#[test]
fn invalid_regex_yields_empty_results() {
    let index = index();
    assert!(index.regex_search("(unclosed", &SearchOptions::default()).is_empty());
    match index.try_regex_search("(unclosed", &SearchOptions::default()) {
        Err(Error::InvalidPattern { pattern, .. }) => assert_eq!(pattern, "(unclosed"),
        other => panic!("expected an invalid pattern error, got {other:?}"),
    }
    let results = index.regex_search(r"room \d+", &SearchOptions::default());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].metadata.matched_terms, vec!["room 204".to_string()]);
}

#[test]
fn rebuild_replaces_and_clear_empties() {
    let index = index();
    assert_eq!(index.stats().documents, 3);
    index.build_index(vec![doc("only", 20, "Fresh", "a brand new corpus")]);
    assert!(index.document("phrase").is_none());
    assert!(index.document("only").is_some());
    index.clear();
    assert!(index.is_empty());
    assert_eq!(index.stats().unique_tokens, 0);
}

#[tokio::test]
async fn builds_from_store() {
    let store = MemoryStore::new(corpus());
    let built = Utc.with_ymd_and_hms(2024, 3, 20, 8, 0, 0).single().expect("valid");
    let clock = Arc::new(FixedClock::new(built));
    let index = PatternIndex::with_clock(LexicalConfig::default(), clock.clone());
    let stats = index.build_from_store(&store).await.expect("build");
    assert_eq!(stats.documents, 3);
    assert_eq!(stats.built_at, Some(built));

    clock.advance(chrono::Duration::hours(1));
    index.build_index(corpus());
    assert_eq!(index.stats().built_at, Some(built + chrono::Duration::hours(1)));
}

struct BrokenStore;

#[async_trait]
impl DocumentStore for BrokenStore {
    async fn load_all(&self) -> anyhow::Result<Vec<Document>> {
        anyhow::bail!("disk unplugged")
    }

    async fn load_by_date_range(&self, _: NaiveDate, _: NaiveDate) -> anyhow::Result<Vec<(DocumentId, NaiveDate)>> {
        Ok(vec![])
    }

    async fn load(&self, _: &str, _: NaiveDate) -> anyhow::Result<Option<Document>> {
        Ok(None)
    }
}

#[tokio::test]
async fn store_failure_propagates() {
    let err = PatternIndex::default().build_from_store(&BrokenStore).await.expect_err("must fail");
    assert!(matches!(err, Error::Store(msg) if msg.contains("disk unplugged")));
}
