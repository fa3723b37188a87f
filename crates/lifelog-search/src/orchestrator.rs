//! Search entry point.
//!
//! `search` runs: cache lookup, preprocessing, classification, optional
//! decomposition, strategy choice, execution, optional query-variant
//! expansion, then cache/learning bookkeeping. Strategy choice follows one
//! fixed precedence: explicit option, learned suggestion, parallel (when
//! enabled), classifier suggestion. A choice whose collaborator is missing
//! falls back Reasoning -> Hybrid -> Fast and Vector -> Fast.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use lifelog_core::clock::{Clock, SystemClock};
use lifelog_core::config::EngineConfig;
use lifelog_core::error::{Error, Result};
use lifelog_core::traits::{DocumentStore, ReasoningEngine, VectorIndex};
use lifelog_core::types::{sort_by_score, Document, ReasoningOptions, SearchResult, SearchStrategy, StrategyKind};
use lifelog_hybrid::{HybridRanker, HybridSearchOptions, HybridStats};
use lifelog_query::{
    DecomposedQuery, PreprocessedQuery, QueryClassification, QueryClassifier, QueryDecomposer, QueryPreprocessor,
    TemporalInfo,
};
use lifelog_text::{IndexStats, PatternIndex, SearchOptions as LexicalOptions};

use crate::cache::{CacheStats, ResultCache};
use crate::context::{ContextSnapshot, SearchContext};
use crate::executor::{
    apply_adjustments, merge_results, temporal_decay, ExecutionOptions, MergeMode, ParallelExecutor,
};
use crate::strategy::{
    ContextFilterStrategy, DateRangeStrategy, LexicalStrategy, Strategy, StrategyRequest, VectorStrategy,
};

/// Score multiplier for documents only a synonym variant found.
const VARIANT_DAMPING: f64 = 0.9;
const MAX_VARIANTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub strategy: Option<SearchStrategy>,
    pub limit: usize,
    pub score_threshold: f64,
    pub enable_cache: bool,
    pub enable_parallel: bool,
    pub enable_query_expansion: bool,
    pub enable_decomposition: bool,
    pub merge_mode: MergeMode,
    /// Deadline for the parallel path; partial results are returned on expiry.
    pub timeout: Option<Duration>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            strategy: None,
            limit: 20,
            score_threshold: 0.0,
            enable_cache: true,
            enable_parallel: false,
            enable_query_expansion: false,
            enable_decomposition: true,
            merge_mode: MergeMode::Max,
            timeout: None,
        }
    }
}

impl SearchOptions {
    /// Options that change the answer, folded into the cache key.
    fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{:?}",
            self.strategy.map_or("auto", SearchStrategy::as_str),
            self.limit,
            self.score_threshold,
            self.enable_parallel,
            self.enable_query_expansion,
            self.enable_decomposition,
            self.merge_mode,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    pub total_time_ms: u64,
    pub search_time_ms: u64,
    pub strategy_used: SearchStrategy,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedSearchResult {
    pub query: String,
    pub strategy: SearchStrategy,
    pub results: Vec<SearchResult>,
    pub performance: Performance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_timings: Option<BTreeMap<StrategyKind, u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_strategies: Option<Vec<StrategyKind>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<QueryClassification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decomposition: Option<DecomposedQuery>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub insights: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_items: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_insights: Option<ContextSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitReport {
    pub index: IndexStats,
    pub vector_enabled: bool,
    pub hybrid: Option<HybridStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStats {
    pub index: IndexStats,
    pub hybrid: Option<HybridStats>,
    pub cache: CacheStats,
    pub vector_enabled: bool,
    pub hybrid_enabled: bool,
    pub reasoning_configured: bool,
}

/// What one execution path produced.
#[derive(Debug, Default)]
struct Execution {
    strategy: Option<SearchStrategy>,
    results: Vec<SearchResult>,
    strategy_timings: Option<BTreeMap<StrategyKind, u64>>,
    failed_strategies: Vec<StrategyKind>,
    insights: Vec<String>,
    summary: Option<String>,
    action_items: Option<Vec<String>>,
    context: Option<ContextSnapshot>,
}

impl Execution {
    fn new(strategy: SearchStrategy, results: Vec<SearchResult>) -> Self {
        Self { strategy: Some(strategy), results, ..Self::default() }
    }

    fn strategy(&self) -> SearchStrategy {
        self.strategy.unwrap_or(SearchStrategy::Fast)
    }
}

pub struct SearchOrchestratorBuilder {
    store: Arc<dyn DocumentStore>,
    vector: Option<Arc<dyn VectorIndex>>,
    reasoning: Option<Arc<dyn ReasoningEngine>>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl SearchOrchestratorBuilder {
    pub fn vector_index(mut self, vector: Arc<dyn VectorIndex>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn reasoning_engine(mut self, reasoning: Arc<dyn ReasoningEngine>) -> Self {
        self.reasoning = Some(reasoning);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<SearchOrchestrator> {
        self.config.validate()?;
        let config = self.config;
        let index = Arc::new(PatternIndex::with_clock(config.lexical.clone(), Arc::clone(&self.clock)));

        let lexical = Arc::new(LexicalStrategy::new(Arc::clone(&index), config.executor.clone()));
        let date_range = Arc::new(DateRangeStrategy::new(Arc::clone(&index), config.executor.clone()));
        let vector_strategy = self
            .vector
            .as_ref()
            .map(|v| Arc::new(VectorStrategy::new(Arc::clone(v), Arc::clone(&index), config.executor.clone())));

        let mut executor = ParallelExecutor::new(config.executor.clone())
            .with_strategy(lexical.clone())
            .with_strategy(date_range.clone())
            .with_strategy(Arc::new(ContextFilterStrategy::new(Arc::clone(&index), config.executor.clone())));
        if let Some(v) = &vector_strategy {
            executor.register(v.clone());
        }

        let hybrid = self.vector.as_ref().map(|v| Arc::new(HybridRanker::new(Arc::clone(v), config.hybrid.clone())));
        let cache = ResultCache::new(Arc::clone(&self.clock), config.cache.clone());
        cache.start_cleanup();

        Ok(SearchOrchestrator {
            preprocessor: QueryPreprocessor::new(Arc::clone(&self.clock)),
            classifier: QueryClassifier::new(Arc::clone(&self.clock), config.classifier.clone()),
            decomposer: QueryDecomposer::new(config.decomposer.clone()),
            store: self.store,
            vector: self.vector,
            reasoning: self.reasoning,
            index,
            hybrid,
            lexical,
            date_range,
            vector_strategy,
            executor,
            cache,
            config,
            initialized: AtomicBool::new(false),
            init_guard: tokio::sync::Mutex::new(()),
            vector_ready: AtomicBool::new(false),
            hybrid_ready: AtomicBool::new(false),
        })
    }
}

pub struct SearchOrchestrator {
    store: Arc<dyn DocumentStore>,
    vector: Option<Arc<dyn VectorIndex>>,
    reasoning: Option<Arc<dyn ReasoningEngine>>,
    config: EngineConfig,
    index: Arc<PatternIndex>,
    hybrid: Option<Arc<HybridRanker>>,
    lexical: Arc<LexicalStrategy>,
    date_range: Arc<DateRangeStrategy>,
    vector_strategy: Option<Arc<VectorStrategy>>,
    executor: ParallelExecutor,
    preprocessor: QueryPreprocessor,
    classifier: QueryClassifier,
    decomposer: QueryDecomposer,
    cache: ResultCache,
    initialized: AtomicBool,
    /// Serializes index construction between `initialize` and lazy first searches.
    init_guard: tokio::sync::Mutex<()>,
    vector_ready: AtomicBool,
    hybrid_ready: AtomicBool,
}

impl SearchOrchestrator {
    pub fn builder(store: Arc<dyn DocumentStore>) -> SearchOrchestratorBuilder {
        SearchOrchestratorBuilder {
            store,
            vector: None,
            reasoning: None,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
        }
    }

    /// Builds the lexical index from the store and connects the vector side.
    /// Only a store failure is an error; a failing vector index disables the
    /// vector and hybrid paths.
    pub async fn initialize(&self) -> Result<InitReport> {
        let _guard = self.init_guard.lock().await;
        self.initialize_locked().await
    }

    async fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.init_guard.lock().await;
        if !self.initialized.load(Ordering::SeqCst) {
            self.initialize_locked().await?;
        }
        Ok(())
    }

    async fn initialize_locked(&self) -> Result<InitReport> {
        let documents = self.store.load_all().await.map_err(|e| Error::store(&e))?;
        let index = self.index.build_index(documents.clone());
        self.initialized.store(true, Ordering::SeqCst);

        let mut hybrid_stats = None;
        if let Some(vector) = &self.vector {
            match connect_vector(vector.as_ref(), &documents).await {
                Ok(()) => {
                    self.vector_ready.store(true, Ordering::SeqCst);
                    if let Some(hybrid) = &self.hybrid {
                        match hybrid.initialize().await {
                            Ok(stats) => {
                                self.hybrid_ready.store(true, Ordering::SeqCst);
                                hybrid_stats = Some(stats);
                            }
                            Err(e) => {
                                self.hybrid_ready.store(false, Ordering::SeqCst);
                                warn!(error = %e, "hybrid ranker unavailable; hybrid search disabled");
                            }
                        }
                    }
                }
                Err(e) => {
                    self.vector_ready.store(false, Ordering::SeqCst);
                    self.hybrid_ready.store(false, Ordering::SeqCst);
                    warn!(error = %e, "vector index unavailable; vector strategies disabled");
                }
            }
        }
        let report = InitReport { index, vector_enabled: self.vector_enabled(), hybrid: hybrid_stats };
        info!(
            documents = report.index.documents,
            vector = report.vector_enabled,
            hybrid = report.hybrid.is_some(),
            "search engine initialized"
        );
        Ok(report)
    }

    pub fn vector_enabled(&self) -> bool {
        self.vector_ready.load(Ordering::SeqCst)
    }

    pub fn hybrid_enabled(&self) -> bool {
        self.hybrid_ready.load(Ordering::SeqCst)
    }

    pub fn preprocessor(&self) -> &QueryPreprocessor {
        &self.preprocessor
    }

    pub fn classifier(&self) -> &QueryClassifier {
        &self.classifier
    }

    pub fn decomposer(&self) -> &QueryDecomposer {
        &self.decomposer
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn index(&self) -> &PatternIndex {
        &self.index
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            index: self.index.stats(),
            hybrid: self.hybrid.as_ref().filter(|_| self.hybrid_enabled()).map(|h| h.stats()),
            cache: self.cache.stats(),
            vector_enabled: self.vector_enabled(),
            hybrid_enabled: self.hybrid_enabled(),
            reasoning_configured: self.reasoning.is_some(),
        }
    }

    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<UnifiedSearchResult> {
        let started = Instant::now();
        let query = query.trim();
        self.ensure_initialized().await?;

        let key = format!("{query}\u{1f}{}", opts.fingerprint());
        if opts.enable_cache {
            if let Some(entry) = self.cache.get(&key) {
                debug!(query, strategy = %entry.strategy_used, "cache hit");
                return Ok(UnifiedSearchResult {
                    query: query.to_string(),
                    strategy: entry.strategy_used,
                    results: entry.results,
                    performance: Performance {
                        total_time_ms: elapsed_ms(started),
                        search_time_ms: 0,
                        strategy_used: entry.strategy_used,
                        cache_hit: true,
                    },
                    strategy_timings: None,
                    failed_strategies: None,
                    classification: None,
                    decomposition: None,
                    insights: Vec::new(),
                    summary: None,
                    action_items: None,
                    context_insights: None,
                });
            }
        }

        let pre = self.preprocessor.preprocess(query);
        let classification = self.classifier.classify(&pre.normalized);
        let search_started = Instant::now();
        let decomposition = self.decomposition_for(query, opts);
        let execution = match &decomposition {
            Some(decomposed) => self.search_decomposed(decomposed, opts).await,
            None => self.execute(&pre, &classification, opts).await,
        };
        let search_time_ms = elapsed_ms(search_started);
        let strategy = execution.strategy();

        self.classifier.record_response_time(classification.query_type, search_time_ms);
        if opts.enable_cache {
            self.cache.set(&key, &classification, execution.results.clone(), strategy, search_time_ms);
        } else {
            self.cache.record_outcome(classification.query_type, strategy, execution.results.len(), search_time_ms);
        }

        let failed_strategies = (execution.strategy_timings.is_some() || !execution.failed_strategies.is_empty())
            .then_some(execution.failed_strategies);
        info!(
            query,
            strategy = %strategy,
            results = execution.results.len(),
            elapsed_ms = search_time_ms,
            "search finished"
        );
        Ok(UnifiedSearchResult {
            query: query.to_string(),
            strategy,
            results: execution.results,
            performance: Performance {
                total_time_ms: elapsed_ms(started),
                search_time_ms,
                strategy_used: strategy,
                cache_hit: false,
            },
            strategy_timings: execution.strategy_timings,
            failed_strategies,
            classification: Some(classification),
            decomposition,
            insights: execution.insights,
            summary: execution.summary,
            action_items: execution.action_items,
            context_insights: execution.context,
        })
    }

    /// Stops background work and closes the vector index.
    pub async fn close(&self) {
        self.cache.stop();
        if let Some(vector) = &self.vector {
            if let Err(e) = vector.close().await {
                warn!(error = %e, "closing vector index failed");
            }
        }
    }

    fn choose_strategy(&self, opts: &SearchOptions, classification: &QueryClassification) -> SearchStrategy {
        let requested = opts
            .strategy
            .or_else(|| self.cache.get_suggested_strategy(classification))
            .or_else(|| opts.enable_parallel.then_some(SearchStrategy::Parallel))
            .unwrap_or(classification.suggested_strategy);
        let resolved = self.available(requested);
        if resolved != requested {
            debug!(requested = %requested, resolved = %resolved, "strategy unavailable, falling back");
        }
        resolved
    }

    fn available(&self, strategy: SearchStrategy) -> SearchStrategy {
        match strategy {
            SearchStrategy::Reasoning if self.reasoning.is_none() => self.available(SearchStrategy::Hybrid),
            SearchStrategy::Hybrid if !self.hybrid_enabled() => SearchStrategy::Fast,
            SearchStrategy::Vector if !self.vector_enabled() => SearchStrategy::Fast,
            other => other,
        }
    }

    async fn execute(
        &self,
        pre: &PreprocessedQuery,
        classification: &QueryClassification,
        opts: &SearchOptions,
    ) -> Execution {
        let strategy = self.choose_strategy(opts, classification);
        let variants = if opts.enable_query_expansion { self.spawn_variants(pre, opts) } else { Vec::new() };

        let mut execution = match strategy {
            SearchStrategy::Fast => self.fast_search(pre, opts).await,
            SearchStrategy::Vector => self.vector_search(pre, opts).await,
            SearchStrategy::Hybrid => self.hybrid_search(pre, opts).await,
            SearchStrategy::Reasoning => self.reasoning_search(pre, opts).await,
            SearchStrategy::Parallel => self.parallel_search(pre, opts).await,
        };

        if !variants.is_empty() {
            let mut found: Vec<(String, Vec<SearchResult>)> = Vec::with_capacity(variants.len());
            for (variant, task) in variants {
                match task.await {
                    Ok(results) => found.push((variant, results)),
                    Err(e) => warn!(variant = %variant, error = %e, "query variant search failed"),
                }
            }
            merge_variants(&mut execution.results, found, opts);
        }
        execution
    }

    /// Lexical search on the synonym variants, started before the main path
    /// so both run at once.
    fn spawn_variants(
        &self,
        pre: &PreprocessedQuery,
        opts: &SearchOptions,
    ) -> Vec<(String, tokio::task::JoinHandle<Vec<SearchResult>>)> {
        let lexical_opts = lexical_options(opts);
        pre.expanded_queries
            .iter()
            .take(MAX_VARIANTS)
            .map(|variant| {
                let index = Arc::clone(&self.index);
                let (text, lexical_opts) = (variant.clone(), lexical_opts.clone());
                (variant.clone(), tokio::task::spawn_blocking(move || index.search(&text, &lexical_opts)))
            })
            .collect()
    }

    /// Lexical plus, for temporal queries, the date-range strategy.
    async fn fast_search(&self, pre: &PreprocessedQuery, opts: &SearchOptions) -> Execution {
        let request = StrategyRequest::from_preprocessed(pre, opts.limit, opts.score_threshold);
        let ctx = SearchContext::new();
        let mut execution = Execution::new(SearchStrategy::Fast, Vec::new());
        let mut outputs = Vec::with_capacity(2);

        let mut strategies: Vec<&dyn Strategy> = vec![self.lexical.as_ref()];
        if pre.temporal.has_temporal() {
            strategies.push(self.date_range.as_ref());
        }
        for strategy in strategies {
            match strategy.execute(&request, &ctx).await {
                Ok(results) => outputs.push((strategy.kind(), results)),
                Err(e) => {
                    warn!(strategy = %strategy.kind(), error = %e, "strategy failed");
                    execution.failed_strategies.push(strategy.kind());
                }
            }
        }
        let mut results = merge_results(outputs, opts.merge_mode);
        apply_adjustments(&mut results, &ContextSnapshot::default(), &self.config.executor);
        self.weight_by_query_dates(&mut results, &pre.temporal);
        execution.results = finish(results, opts);
        execution
    }

    async fn vector_search(&self, pre: &PreprocessedQuery, opts: &SearchOptions) -> Execution {
        let Some(vector) = self.vector_strategy.as_ref().filter(|_| self.vector_enabled()) else {
            return self.fast_search(pre, opts).await;
        };
        let request = StrategyRequest::from_preprocessed(pre, opts.limit, opts.score_threshold);
        match vector.execute(&request, &SearchContext::new()).await {
            Ok(mut results) => {
                self.weight_by_query_dates(&mut results, &pre.temporal);
                Execution::new(SearchStrategy::Vector, finish(results, opts))
            }
            Err(e) => {
                warn!(error = %e, "vector search failed; using fast search");
                let mut execution = self.fast_search(pre, opts).await;
                execution.failed_strategies.push(StrategyKind::VectorSemantic);
                execution
            }
        }
    }

    async fn hybrid_search(&self, pre: &PreprocessedQuery, opts: &SearchOptions) -> Execution {
        let Some(hybrid) = self.hybrid.as_ref().filter(|_| self.hybrid_enabled()) else {
            return self.fast_search(pre, opts).await;
        };
        let request = StrategyRequest::from_preprocessed(pre, opts.limit, opts.score_threshold);
        let hybrid_opts = HybridSearchOptions { top_k: opts.limit, hybrid_weight: None };
        let mut results: Vec<SearchResult> = hybrid
            .search(request.semantic_text(), &hybrid_opts)
            .await
            .into_iter()
            .map(|hit| self.hydrate(hit.into_search_result()))
            .collect();
        self.weight_by_query_dates(&mut results, &pre.temporal);
        Execution::new(SearchStrategy::Hybrid, finish(results, opts))
    }

    /// Candidates from the hybrid (or fast) path, handed to the reasoning
    /// collaborator. Unavailability or failure keeps the candidates.
    async fn reasoning_search(&self, pre: &PreprocessedQuery, opts: &SearchOptions) -> Execution {
        let candidate_opts = SearchOptions { limit: opts.limit.saturating_mul(2), ..opts.clone() };
        let candidates = if self.hybrid_enabled() {
            self.hybrid_search(pre, &candidate_opts).await
        } else {
            self.fast_search(pre, &candidate_opts).await
        };
        let fallback = |mut candidates: Execution| {
            candidates.results.truncate(opts.limit);
            candidates
        };

        let Some(engine) = &self.reasoning else { return fallback(candidates) };
        if !engine.is_available().await {
            warn!("reasoning collaborator unavailable; using hybrid results");
            return fallback(candidates);
        }
        let documents: Vec<Document> = candidates.results.iter().filter_map(|r| r.document.clone()).collect();
        let reasoning_opts = ReasoningOptions { max_results: opts.limit, ..ReasoningOptions::default() };
        match engine.execute_complex_search(&pre.original, &documents, &reasoning_opts).await {
            Ok(outcome) => {
                debug!(confidence = outcome.confidence, insights = outcome.insights.len(), "reasoning finished");
                let results = if outcome.results.is_empty() {
                    fallback(candidates).results
                } else {
                    let hydrated = outcome.results.into_iter().map(|r| self.hydrate(r)).collect();
                    finish(hydrated, opts)
                };
                Execution {
                    strategy: Some(SearchStrategy::Reasoning),
                    results,
                    insights: outcome.insights,
                    summary: outcome.summary,
                    action_items: outcome.action_items,
                    ..Execution::default()
                }
            }
            Err(e) => {
                warn!(error = %Error::reasoning(&e), "reasoning failed; using hybrid results");
                fallback(candidates)
            }
        }
    }

    async fn parallel_search(&self, pre: &PreprocessedQuery, opts: &SearchOptions) -> Execution {
        let request = StrategyRequest::from_preprocessed(pre, opts.limit, opts.score_threshold);
        let exec_opts = ExecutionOptions {
            merge_mode: opts.merge_mode,
            enable_vector: self.vector_enabled(),
            overall_timeout: opts.timeout.or(match self.config.executor.overall_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            }),
        };
        let outcome = self.executor.execute(request, &exec_opts).await;
        Execution {
            strategy: Some(SearchStrategy::Parallel),
            results: outcome.results,
            strategy_timings: Some(outcome.performance.strategy_timings),
            failed_strategies: outcome.performance.failed_strategies,
            context: Some(outcome.context_insights),
            ..Execution::default()
        }
    }

    fn decomposition_for(&self, query: &str, opts: &SearchOptions) -> Option<DecomposedQuery> {
        if !opts.enable_decomposition {
            return None;
        }
        let decomposed = self.decomposer.decompose(query);
        (decomposed.is_complex && decomposed.sub_queries.len() > 1).then_some(decomposed)
    }

    /// Runs sub-queries one at a time in execution order. A dependent
    /// sub-query is extended with its predecessors' keywords.
    async fn search_decomposed(&self, decomposed: &DecomposedQuery, opts: &SearchOptions) -> Execution {
        let mut keywords: HashMap<&str, Vec<String>> = HashMap::new();
        let mut combined = Execution::default();
        let mut slots: HashMap<String, usize> = HashMap::new();

        for sub in decomposed.ordered() {
            let mut text = sub.text.clone();
            let own = self.preprocessor.preprocess(&text).keywords;
            for dep in &sub.dependencies {
                for keyword in keywords.get(dep.as_str()).into_iter().flatten() {
                    if !own.contains(keyword) && !text.contains(keyword.as_str()) {
                        text.push(' ');
                        text.push_str(keyword);
                    }
                }
            }
            let pre = self.preprocessor.preprocess(&text);
            let classification = self.classifier.classify(&pre.normalized);
            let execution = self.execute(&pre, &classification, opts).await;
            debug!(sub_query = %sub.id, text = %text, results = execution.results.len(), "sub-query finished");
            keywords.insert(sub.id.as_str(), pre.keywords.clone());

            combined.strategy.get_or_insert(execution.strategy());
            for kind in execution.failed_strategies {
                if !combined.failed_strategies.contains(&kind) {
                    combined.failed_strategies.push(kind);
                }
            }
            combined.insights.extend(execution.insights);
            if combined.summary.is_none() {
                combined.summary = execution.summary;
            }
            for mut result in execution.results {
                match slots.get(&result.id) {
                    Some(&slot) => {
                        let existing = &mut combined.results[slot];
                        existing.score = existing.score.max(result.score);
                        for source in result.metadata.matching_sources {
                            existing.add_source(source);
                        }
                    }
                    None => {
                        result.metadata.sub_query.get_or_insert_with(|| sub.id.clone());
                        slots.insert(result.id.clone(), combined.results.len());
                        combined.results.push(result);
                    }
                }
            }
        }
        sort_by_score(&mut combined.results);
        combined.results.truncate(opts.limit);
        combined
    }

    fn hydrate(&self, mut result: SearchResult) -> SearchResult {
        if result.document.is_none() {
            if let Some(doc) = self.index.document(&result.id) {
                result = result.with_document(doc);
            }
        }
        result
    }

    /// Favors documents close to the dates the query names.
    fn weight_by_query_dates(&self, results: &mut Vec<SearchResult>, temporal: &TemporalInfo) {
        if !temporal.has_temporal() {
            return;
        }
        for result in results.iter_mut() {
            let Some(date) = result.date() else { continue };
            if let Some(days) = temporal.expressions.iter().map(|e| e.range.distance_days(date)).min() {
                result.score *= temporal_decay(days, &self.config.executor);
            }
        }
        sort_by_score(results);
    }
}

async fn connect_vector(vector: &dyn VectorIndex, documents: &[Document]) -> Result<()> {
    vector.initialize().await.map_err(|e| Error::vector(&e))?;
    vector.add_documents(documents).await.map_err(|e| Error::vector(&e))?;
    Ok(())
}

fn lexical_options(opts: &SearchOptions) -> LexicalOptions {
    LexicalOptions { max_results: opts.limit, score_threshold: opts.score_threshold, ..LexicalOptions::default() }
}

fn finish(mut results: Vec<SearchResult>, opts: &SearchOptions) -> Vec<SearchResult> {
    results.retain(|r| r.score >= opts.score_threshold);
    sort_by_score(&mut results);
    results.truncate(opts.limit);
    results
}

/// Adds variant-only hits at a damped score; documents the main path
/// already found keep their own score.
fn merge_variants(results: &mut Vec<SearchResult>, variants: Vec<(String, Vec<SearchResult>)>, opts: &SearchOptions) {
    for (variant, hits) in variants {
        for mut hit in hits {
            if results.iter().any(|r| r.id == hit.id) {
                continue;
            }
            hit.score *= VARIANT_DAMPING;
            hit.metadata.expanded_from = Some(variant.clone());
            results.push(hit);
        }
    }
    let kept = finish(std::mem::take(results), opts);
    *results = kept;
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
