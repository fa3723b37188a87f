//! lifelog-search
//!
//! Retrieval orchestration over the lexical index, the hybrid ranker and the
//! optional vector and reasoning collaborators. [`SearchOrchestrator`] is
//! the entry point; [`ParallelExecutor`] runs the context-sharing strategies
//! and [`ResultCache`] memoizes answers and learns which strategy works for
//! which kind of query.

pub mod cache;
pub mod context;
pub mod executor;
pub mod orchestrator;
pub mod strategy;

pub use cache::{cache_key, CacheEntry, CacheStats, ResultCache};
pub use context::{ContextSnapshot, ContextUpdate, SearchContext};
pub use executor::{
    apply_adjustments, merge_results, temporal_decay, ExecutionOptions, ExecutionPerformance, MergeMode,
    ParallelExecutor, ParallelSearchOutcome,
};
pub use orchestrator::{
    InitReport, OrchestratorStats, Performance, SearchOptions, SearchOrchestrator, SearchOrchestratorBuilder,
    UnifiedSearchResult,
};
pub use strategy::{
    ContextFilterStrategy, DateRangeStrategy, LexicalStrategy, Strategy, StrategyRequest, VectorStrategy,
};
