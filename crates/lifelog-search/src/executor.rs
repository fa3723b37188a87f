//! Two-phase parallel strategy execution.
//!
//! Discovery strategies (lexical, date-range) run first and populate the
//! shared [`SearchContext`]; after a short settle, enhancement strategies
//! (vector-semantic, context-filter) run against what was discovered. Every
//! strategy is isolated: a failure or timeout is recorded and contributes
//! nothing. Results are merged by document id and adjusted once, in order:
//! consensus boost, hot-document boost, temporal decay.

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use lifelog_core::config::ExecutorConfig;
use lifelog_core::error::Error;
use lifelog_core::types::{sort_by_score, SearchResult, StrategyKind};

use crate::context::{ContextSnapshot, SearchContext};
use crate::strategy::{Strategy, StrategyRequest};

/// How scores of a document found by several strategies combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    #[default]
    Max,
    Additive,
}

#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub merge_mode: MergeMode,
    /// Run the vector strategy when one is registered.
    pub enable_vector: bool,
    /// Caller deadline; on expiry the merged results so far are returned.
    pub overall_timeout: Option<Duration>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self { merge_mode: MergeMode::Max, enable_vector: true, overall_timeout: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPerformance {
    pub total_time_ms: u64,
    pub strategy_timings: BTreeMap<StrategyKind, u64>,
    pub failed_strategies: Vec<StrategyKind>,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelSearchOutcome {
    pub results: Vec<SearchResult>,
    pub performance: ExecutionPerformance,
    pub context_insights: ContextSnapshot,
}

struct StrategyRun {
    order: usize,
    kind: StrategyKind,
    elapsed_ms: u64,
    outcome: lifelog_core::Result<Vec<SearchResult>>,
}

fn is_discovery(kind: StrategyKind) -> bool {
    matches!(kind, StrategyKind::Lexical | StrategyKind::DateRange)
}

pub struct ParallelExecutor {
    strategies: Vec<Arc<dyn Strategy>>,
    config: ExecutorConfig,
}

impl ParallelExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { strategies: Vec::new(), config }
    }

    /// Registers a strategy; a later registration of the same kind replaces
    /// the earlier one.
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        self.strategies.retain(|s| s.kind() != strategy.kind());
        self.strategies.push(strategy);
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.register(strategy);
        self
    }

    fn strategy(&self, kind: StrategyKind) -> Option<&Arc<dyn Strategy>> {
        self.strategies.iter().find(|s| s.kind() == kind)
    }

    /// Lexical always; date-range only for temporal queries; vector when
    /// registered and enabled; context-filter last.
    pub fn select(&self, request: &StrategyRequest, opts: &ExecutionOptions) -> Vec<StrategyKind> {
        let mut kinds = vec![StrategyKind::Lexical];
        if request.temporal.has_temporal() {
            kinds.push(StrategyKind::DateRange);
        }
        if opts.enable_vector {
            kinds.push(StrategyKind::VectorSemantic);
        }
        kinds.push(StrategyKind::ContextFilter);
        kinds.retain(|k| self.strategy(*k).is_some());
        kinds
    }

    pub async fn execute(&self, request: StrategyRequest, opts: &ExecutionOptions) -> ParallelSearchOutcome {
        let started = Instant::now();
        let request = Arc::new(request);
        let ctx = Arc::new(SearchContext::new());
        let runs: Mutex<Vec<StrategyRun>> = Mutex::new(Vec::new());

        let selected = self.select(&request, opts);
        let (discovery, enhancement): (Vec<_>, Vec<_>) =
            selected.iter().copied().enumerate().partition(|(_, kind)| is_discovery(*kind));

        let phases = async {
            self.run_phase(&discovery, &request, &ctx, &runs).await;
            self.settle().await;
            self.run_phase(&enhancement, &request, &ctx, &runs).await;
        };
        let timed_out = match opts.overall_timeout {
            Some(limit) => tokio::time::timeout(limit, phases).await.is_err(),
            None => {
                phases.await;
                false
            }
        };

        let mut runs = runs.into_inner();
        runs.sort_by_key(|r| r.order);
        let mut performance = ExecutionPerformance { timed_out, ..ExecutionPerformance::default() };
        let mut outputs: Vec<(StrategyKind, Vec<SearchResult>)> = Vec::with_capacity(runs.len());
        for run in runs {
            performance.strategy_timings.insert(run.kind, run.elapsed_ms);
            match run.outcome {
                Ok(results) => outputs.push((run.kind, results)),
                Err(_) => performance.failed_strategies.push(run.kind),
            }
        }
        if timed_out {
            for kind in &selected {
                if !performance.strategy_timings.contains_key(kind) {
                    warn!(strategy = %kind, "strategy unfinished at search deadline");
                    performance.failed_strategies.push(*kind);
                }
            }
        }

        let snapshot = ctx.snapshot();
        let mut results = merge_results(outputs, opts.merge_mode);
        apply_adjustments(&mut results, &snapshot, &self.config);
        results.retain(|r| r.score >= request.score_threshold);
        results.truncate(request.limit);

        performance.total_time_ms = elapsed_ms(started);
        debug!(
            results = results.len(),
            failed = performance.failed_strategies.len(),
            elapsed_ms = performance.total_time_ms,
            "parallel search finished"
        );
        ParallelSearchOutcome { results, performance, context_insights: snapshot }
    }

    async fn run_phase(
        &self,
        phase: &[(usize, StrategyKind)],
        request: &Arc<StrategyRequest>,
        ctx: &Arc<SearchContext>,
        runs: &Mutex<Vec<StrategyRun>>,
    ) {
        let timeout = match self.config.strategy_timeout_ms {
            0 => Duration::MAX,
            ms => Duration::from_millis(ms),
        };
        let mut set = JoinSet::new();
        for &(order, kind) in phase {
            let Some(strategy) = self.strategy(kind).cloned() else { continue };
            let (request, ctx) = (Arc::clone(request), Arc::clone(ctx));
            set.spawn(async move {
                let started = Instant::now();
                let work = AssertUnwindSafe(strategy.execute(&request, &ctx)).catch_unwind();
                let outcome = match tokio::time::timeout(timeout, work).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(_)) => Err(Error::Operation(format!("strategy '{kind}' panicked"))),
                    Err(_) => Err(Error::Timeout { strategy: kind.to_string(), elapsed_ms: elapsed_ms(started) }),
                };
                StrategyRun { order, kind, elapsed_ms: elapsed_ms(started), outcome }
            });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(run) => {
                    match &run.outcome {
                        Ok(results) => {
                            debug!(strategy = %run.kind, results = results.len(), elapsed_ms = run.elapsed_ms, "strategy finished");
                        }
                        Err(e) => warn!(strategy = %run.kind, elapsed_ms = run.elapsed_ms, error = %e, "strategy failed"),
                    }
                    runs.lock().push(run);
                }
                Err(e) => warn!(error = %e, "strategy task aborted"),
            }
        }
    }

    async fn settle(&self) {
        if self.config.settle_ms == 0 {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Merges per-strategy result lists keyed by document id, in the order the
/// lists are given. A document keeps its first position; its score becomes
/// the max (or sum) of what each distinct strategy gave it.
pub fn merge_results(
    outputs: impl IntoIterator<Item = (StrategyKind, Vec<SearchResult>)>,
    mode: MergeMode,
) -> Vec<SearchResult> {
    let mut merged: Vec<SearchResult> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();
    for (kind, results) in outputs {
        for result in results {
            match slots.get(&result.id) {
                Some(&slot) => absorb(&mut merged[slot], result, kind, mode),
                None => {
                    slots.insert(result.id.clone(), merged.len());
                    merged.push(result.with_source(kind));
                }
            }
        }
    }
    merged
}

fn absorb(existing: &mut SearchResult, incoming: SearchResult, kind: StrategyKind, mode: MergeMode) {
    let repeat = existing.metadata.matching_sources.contains(&kind);
    existing.score = match mode {
        MergeMode::Additive if !repeat => existing.score + incoming.score,
        _ => existing.score.max(incoming.score),
    };
    existing.add_source(kind);
    for source in &incoming.metadata.matching_sources {
        existing.add_source(*source);
    }
    for highlight in incoming.highlights {
        existing.add_highlight(highlight);
    }
    if existing.document.is_none() {
        existing.document = incoming.document;
    }
    let meta = &mut existing.metadata;
    let other = incoming.metadata;
    for term in other.matched_terms {
        if !meta.matched_terms.contains(&term) {
            meta.matched_terms.push(term);
        }
    }
    for phrase in other.matched_phrases {
        if !meta.matched_phrases.contains(&phrase) {
            meta.matched_phrases.push(phrase);
        }
    }
    meta.date = meta.date.or(other.date);
    meta.raw_score = meta.raw_score.or(other.raw_score);
    meta.keyword_score = meta.keyword_score.or(other.keyword_score);
    meta.vector_score = meta.vector_score.or(other.vector_score);
    meta.keyword_rank = meta.keyword_rank.or(other.keyword_rank);
    meta.vector_rank = meta.vector_rank.or(other.vector_rank);
    meta.hot |= other.hot;
}

/// Consensus boost, then hot boost, then temporal decay; then a stable sort.
pub fn apply_adjustments(results: &mut Vec<SearchResult>, ctx: &ContextSnapshot, config: &ExecutorConfig) {
    for result in results.iter_mut() {
        let sources = result.metadata.matching_sources.len().max(1);
        if sources > 1 {
            let boost = config.consensus_boost.powi(i32::try_from(sources - 1).unwrap_or(i32::MAX));
            result.score *= boost;
            result.metadata.consensus_boost = Some(boost);
        }
        if ctx.is_hot(&result.id) {
            result.score *= config.hot_boost;
            result.metadata.hot = true;
        }
        if let Some(days) = result.date().and_then(|d| ctx.days_to_nearest_date(d)) {
            result.score *= temporal_decay(days, config);
        }
    }
    sort_by_score(results);
}

/// `max(floor, 1 - per_day * days)`.
pub fn temporal_decay(days: i64, config: &ExecutorConfig) -> f64 {
    (1.0 - config.temporal_decay_per_day * days as f64).max(config.temporal_decay_floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hit(id: &str, score: f64) -> SearchResult {
        SearchResult::new(id, score)
    }

    #[test]
    fn shared_document_gets_both_sources_and_one_consensus_boost() {
        let merged = merge_results(
            vec![
                (StrategyKind::Lexical, vec![hit("D123", 0.6), hit("D7", 0.9)]),
                (StrategyKind::VectorSemantic, vec![hit("D123", 0.5)]),
            ],
            MergeMode::Max,
        );
        let mut results = merged;
        apply_adjustments(&mut results, &ContextSnapshot::default(), &ExecutorConfig::default());
        let d123 = results.iter().find(|r| r.id == "D123").expect("merged");
        assert_eq!(d123.metadata.matching_sources, vec![StrategyKind::Lexical, StrategyKind::VectorSemantic]);
        assert!((d123.score - 0.6 * 1.15).abs() < 1e-12);
        assert_eq!(d123.metadata.consensus_boost, Some(1.15));
        assert_eq!(results[0].id, "D7");
    }

    #[test]
    fn additive_merge_sums_distinct_sources() {
        let merged = merge_results(
            vec![(StrategyKind::Lexical, vec![hit("a", 0.4)]), (StrategyKind::DateRange, vec![hit("a", 1.0)])],
            MergeMode::Additive,
        );
        assert!((merged[0].score - 1.4).abs() < 1e-12);
    }

    #[test]
    fn adjustments_apply_hot_then_decay() {
        let config = ExecutorConfig::default();
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 10).expect("valid date");
        let mut far = hit("far", 1.0);
        far.metadata.date = Some(date);
        let mut near = hit("near", 1.0);
        near.metadata.date = Some(date + chrono::Duration::days(9));
        let ctx = ContextSnapshot {
            hot_document_ids: vec!["near".into()],
            discovered_dates: vec![date + chrono::Duration::days(10)],
            ..ContextSnapshot::default()
        };
        let mut results = vec![far, near];
        apply_adjustments(&mut results, &ctx, &config);
        assert_eq!(results[0].id, "near");
        assert!((results[0].score - 1.15 * 0.95).abs() < 1e-12);
        assert!((results[1].score - 0.7).abs() < 1e-12);
    }

    #[test]
    fn decay_is_floored() {
        let config = ExecutorConfig::default();
        assert_eq!(temporal_decay(0, &config), 1.0);
        assert!((temporal_decay(2, &config) - 0.9).abs() < 1e-12);
        assert_eq!(temporal_decay(40, &config), 0.7);
    }

    proptest! {
        #[test]
        fn merging_a_list_with_itself_changes_nothing(scores in proptest::collection::vec(0.0f64..1.0, 1..20)) {
            let list: Vec<SearchResult> =
                scores.iter().enumerate().map(|(i, s)| hit(&format!("d{i}"), *s)).collect();
            let once = merge_results(vec![(StrategyKind::Lexical, list.clone())], MergeMode::Max);
            let twice = merge_results(
                vec![(StrategyKind::Lexical, list.clone()), (StrategyKind::Lexical, list)],
                MergeMode::Max,
            );
            prop_assert_eq!(once, twice);
        }
    }
}
