use chrono::{NaiveDate, TimeZone, Utc};
use lifelog_core::clock::FixedClock;
use lifelog_core::config::ClassifierConfig;
use lifelog_core::types::SearchStrategy;
use lifelog_query::{Intent, QueryClassifier, QueryDecomposer, QueryPreprocessor, QueryType, SubQueryType};
use std::sync::Arc;

fn clock() -> Arc<FixedClock> {
    let now = Utc.with_ymd_and_hms(2024, 3, 15, 18, 30, 0).single().expect("valid timestamp");
    Arc::new(FixedClock::new(now))
}

fn day(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, d).expect("valid date")
}

#[test]
fn preprocessing_follows_the_clock() {
    let clock = clock();
    let pre = QueryPreprocessor::new(clock.clone());
    let q = pre.preprocess("notes from 3 days ago");
    assert_eq!(q.temporal.dates(), vec![day(3, 12)]);
    assert_eq!(q.search_text, "notes from");

    clock.advance(chrono::Duration::days(1));
    let q = pre.preprocess("notes from 3 days ago");
    assert_eq!(q.temporal.dates(), vec![day(3, 13)]);
}

#[test]
fn preprocessing_is_pure() {
    let pre = QueryPreprocessor::new(clock());
    let a = pre.preprocess("what did Priya say about the budget last week");
    let b = pre.preprocess("what did Priya say about the budget last week");
    assert_eq!(a, b);
    assert_eq!(a.intent, Intent::Question);
    assert_eq!(a.temporal.envelope().map(|r| (r.start, r.end)), Some((day(3, 4), day(3, 10))));
}

#[test]
fn classifier_routes_by_query_type() {
    let classifier = QueryClassifier::new(clock(), ClassifierConfig::default());

    let today = classifier.classify("today");
    assert_eq!(today.query_type, QueryType::DateBased);
    assert_eq!(today.suggested_strategy, SearchStrategy::Fast);
    assert_eq!(today.extracted_entities.dates, vec![day(3, 15)]);

    let todo = classifier.classify("what do I need to follow up on from the design review");
    assert_eq!(todo.query_type, QueryType::ActionItem);
    assert_eq!(todo.suggested_strategy, SearchStrategy::Hybrid);

    let boolean = classifier.classify("budget AND hiring");
    assert_eq!(boolean.query_type, QueryType::ComplexAnalytical);
    assert_eq!(boolean.suggested_strategy, SearchStrategy::Reasoning);
    assert!(boolean.confidence >= 0.8);
}

#[test]
fn long_queries_are_never_simple_keyword() {
    let classifier = QueryClassifier::default();
    let c = classifier.classify(
        "tell me every single thing that anybody on the team ever said to me about the new office move plans",
    );
    assert_eq!(c.query_type, QueryType::ComplexAnalytical);
}

#[test]
fn classification_is_memoized_until_cleared() {
    let classifier = QueryClassifier::new(clock(), ClassifierConfig::default());
    let first = classifier.classify("  standup  ");
    classifier.record_response_time(first.query_type, 42);
    assert_eq!(classifier.classify("standup"), first);

    classifier.clear_cache();
    let fresh = classifier.classify("standup");
    assert_eq!(fresh.estimated_response_time_ms, 42);
}

#[test]
fn decomposition_respects_back_references() {
    let d = QueryDecomposer::default().decompose(
        "What did Sarah say about the budget? And also show me what she decided about that?",
    );
    assert!(d.is_complex);
    assert!(d.sub_queries.len() >= 2);
    let referencing = d.sub_queries.iter().find(|q| q.text.contains("that")).expect("referencing sub-query");
    let pos = |id: &str| d.execution_order.iter().position(|x| x == id).expect("ordered");
    for dep in &referencing.dependencies {
        assert!(pos(dep) < pos(&referencing.id));
    }
    assert!(!referencing.dependencies.is_empty());
}

#[test]
fn analytical_sub_queries_request_synthesis() {
    let d = QueryDecomposer::default()
        .decompose("Compare my sleep in January versus February? Why did my energy drop in March?");
    let types: Vec<SubQueryType> = d.sub_queries.iter().map(|q| q.query_type).collect();
    assert_eq!(types, vec![SubQueryType::Compare, SubQueryType::Analyze]);
    assert!(d.requires_contextual_summary);
    assert_eq!(d.complexity, 2.0 + 0.5 * 2.0);
}
