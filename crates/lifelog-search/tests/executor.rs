use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use lifelog_core::config::ExecutorConfig;
use lifelog_core::types::{SearchResult, StrategyKind};
use lifelog_core::{Error, Result};
use lifelog_query::TemporalInfo;
use lifelog_search::{ExecutionOptions, ParallelExecutor, SearchContext, Strategy, StrategyRequest};

enum Behavior {
    Answer,
    Stall,
    Fail,
    Panic,
}

/// Returns one result named after its kind, or misbehaves as told.
struct Scripted {
    kind: StrategyKind,
    behavior: Behavior,
}

impl Scripted {
    fn new(kind: StrategyKind, behavior: Behavior) -> Arc<dyn Strategy> {
        Arc::new(Self { kind, behavior })
    }
}

#[async_trait]
impl Strategy for Scripted {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn execute(&self, _request: &StrategyRequest, _ctx: &SearchContext) -> Result<Vec<SearchResult>> {
        match self.behavior {
            Behavior::Answer => Ok(vec![SearchResult::new(self.kind.as_str(), 0.8)]),
            Behavior::Stall => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(vec![SearchResult::new(self.kind.as_str(), 0.9)])
            }
            Behavior::Fail => Err(Error::VectorIndex("embedding service offline".into())),
            Behavior::Panic => panic!("context filter blew up"),
        }
    }
}

fn request() -> StrategyRequest {
    StrategyRequest {
        query: "budget review".into(),
        search_text: "budget review".into(),
        keywords: vec!["budget".into(), "review".into()],
        temporal: TemporalInfo::default(),
        limit: 10,
        score_threshold: 0.0,
    }
}

fn config(strategy_timeout_ms: u64) -> ExecutorConfig {
    ExecutorConfig { strategy_timeout_ms, settle_ms: 0, ..ExecutorConfig::default() }
}

fn ids(results: &[SearchResult]) -> Vec<&str> {
    results.iter().map(|r| r.id.as_str()).collect()
}

#[tokio::test]
async fn slow_and_panicking_strategies_are_recorded_as_failed() {
    let executor = ParallelExecutor::new(config(100))
        .with_strategy(Scripted::new(StrategyKind::Lexical, Behavior::Answer))
        .with_strategy(Scripted::new(StrategyKind::VectorSemantic, Behavior::Stall))
        .with_strategy(Scripted::new(StrategyKind::ContextFilter, Behavior::Panic));

    let out = executor.execute(request(), &ExecutionOptions::default()).await;

    assert_eq!(ids(&out.results), vec!["lexical"]);
    assert_eq!(out.performance.failed_strategies, vec![StrategyKind::VectorSemantic, StrategyKind::ContextFilter]);
    assert!(!out.performance.timed_out);
    assert_eq!(out.performance.strategy_timings.len(), 3);
}

#[tokio::test]
async fn failing_strategy_contributes_nothing() {
    let executor = ParallelExecutor::new(config(1_000))
        .with_strategy(Scripted::new(StrategyKind::Lexical, Behavior::Answer))
        .with_strategy(Scripted::new(StrategyKind::VectorSemantic, Behavior::Fail))
        .with_strategy(Scripted::new(StrategyKind::ContextFilter, Behavior::Answer));

    let out = executor.execute(request(), &ExecutionOptions::default()).await;

    assert_eq!(ids(&out.results), vec!["lexical", "context-filter"]);
    assert_eq!(out.performance.failed_strategies, vec![StrategyKind::VectorSemantic]);
    assert!(!out.performance.timed_out);
}

#[tokio::test]
async fn overall_deadline_returns_what_finished() {
    let executor = ParallelExecutor::new(config(5_000))
        .with_strategy(Scripted::new(StrategyKind::Lexical, Behavior::Answer))
        .with_strategy(Scripted::new(StrategyKind::VectorSemantic, Behavior::Stall));
    let opts = ExecutionOptions { overall_timeout: Some(Duration::from_millis(200)), ..ExecutionOptions::default() };

    let out = executor.execute(request(), &opts).await;

    assert_eq!(ids(&out.results), vec!["lexical"]);
    assert_eq!(out.performance.failed_strategies, vec![StrategyKind::VectorSemantic]);
    assert!(out.performance.timed_out);
    assert!(out.performance.total_time_ms < 5_000);

    let json = serde_json::to_value(&out.performance).expect("serializable");
    assert_eq!(json["timedOut"], true);
    assert_eq!(json["failedStrategies"], serde_json::json!(["vector-semantic"]));
}
