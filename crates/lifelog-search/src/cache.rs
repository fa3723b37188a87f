//! Result cache with per-query-type strategy learning.
//!
//! Entries are keyed by an xxHash of the query string and expire after
//! `ttl_secs` of clock time. At capacity the least valuable entry goes
//! first: lowest hit count, then oldest, then lexicographically smallest
//! query. Independently of the entries, every fresh (non-cached) outcome
//! is tallied per `(query type, strategy)` so the orchestrator can ask which
//! strategy has worked for queries of the same shape.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;
use twox_hash::XxHash64;

use lifelog_core::clock::Clock;
use lifelog_core::config::CacheConfig;
use lifelog_core::types::{SearchResult, SearchStrategy};
use lifelog_query::{QueryClassification, QueryType};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub results: Vec<SearchResult>,
    pub strategy_used: SearchStrategy,
    pub timestamp_ms: i64,
    pub hit_count: u64,
    pub latency_ms: u64,
    pub query_type: QueryType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub learned_query_types: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct StrategyRecord {
    samples: u32,
    successes: u32,
    total_latency_ms: u64,
}

impl StrategyRecord {
    fn success_rate(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            f64::from(self.successes) / f64::from(self.samples)
        }
    }

    fn mean_latency_ms(&self) -> u64 {
        self.total_latency_ms / u64::from(self.samples.max(1))
    }
}

#[derive(Debug)]
struct Slot {
    query: String,
    entry: CacheEntry,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<u64, Slot>,
    learning: HashMap<QueryType, BTreeMap<SearchStrategy, StrategyRecord>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Inner {
    fn purge_expired(&mut self, now_ms: i64, ttl_ms: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| now_ms - slot.entry.timestamp_ms < ttl_ms);
        before - self.entries.len()
    }

    fn evict_one(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by(|(_, a), (_, b)| {
                a.entry
                    .hit_count
                    .cmp(&b.entry.hit_count)
                    .then_with(|| a.entry.timestamp_ms.cmp(&b.entry.timestamp_ms))
                    .then_with(|| a.query.cmp(&b.query))
            })
            .map(|(key, _)| *key);
        if let Some(key) = victim {
            if let Some(slot) = self.entries.remove(&key) {
                debug!(query = %slot.query, hits = slot.entry.hit_count, "evicted cache entry");
            }
            self.evictions += 1;
        }
    }
}

pub fn cache_key(query: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(query.as_bytes());
    hasher.finish()
}

pub struct ResultCache {
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    inner: Arc<Mutex<Inner>>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl ResultCache {
    pub fn new(clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self { clock, config, inner: Arc::new(Mutex::new(Inner::default())), cleanup: Mutex::new(None) }
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn ttl_ms(&self) -> i64 {
        i64::try_from(self.config.ttl_secs.saturating_mul(1_000)).unwrap_or(i64::MAX)
    }

    /// A fresh entry for exactly `query`. Expired entries are dropped and
    /// reported as misses.
    pub fn get(&self, query: &str) -> Option<CacheEntry> {
        let key = cache_key(query);
        let now = self.now_ms();
        let ttl = self.ttl_ms();
        let mut inner = self.inner.lock();
        let state = match inner.entries.get_mut(&key) {
            Some(slot) if slot.query != query => None,
            Some(slot) if now - slot.entry.timestamp_ms >= ttl => Some(None),
            Some(slot) => {
                slot.entry.hit_count += 1;
                Some(Some(slot.entry.clone()))
            }
            None => None,
        };
        match state {
            Some(Some(entry)) => {
                inner.hits += 1;
                Some(entry)
            }
            Some(None) => {
                inner.entries.remove(&key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Stores a freshly computed result and counts it towards learning.
    pub fn set(
        &self,
        query: &str,
        classification: &QueryClassification,
        results: Vec<SearchResult>,
        strategy: SearchStrategy,
        latency_ms: u64,
    ) {
        self.record_outcome(classification.query_type, strategy, results.len(), latency_ms);
        let key = cache_key(query);
        let entry = CacheEntry {
            results,
            strategy_used: strategy,
            timestamp_ms: self.now_ms(),
            hit_count: 0,
            latency_ms,
            query_type: classification.query_type,
        };
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&key) {
            let now = self.now_ms();
            inner.purge_expired(now, self.ttl_ms());
            while inner.entries.len() >= self.config.max_size.max(1) {
                inner.evict_one();
            }
        }
        inner.entries.insert(key, Slot { query: query.to_string(), entry });
    }

    /// Tallies one outcome. Success means a non-empty result within the
    /// latency budget. Callers must not report cache hits here.
    pub fn record_outcome(&self, query_type: QueryType, strategy: SearchStrategy, result_count: usize, latency_ms: u64) {
        let success = result_count > 0 && latency_ms <= self.config.success_latency_ms;
        let mut inner = self.inner.lock();
        let record = inner.learning.entry(query_type).or_default().entry(strategy).or_default();
        record.samples += 1;
        record.successes += u32::from(success);
        record.total_latency_ms += latency_ms;
    }

    /// Best learned strategy for the classification's query type, once a
    /// strategy has `min_samples` outcomes and at least `min_success_rate`.
    /// Ties go to the lower mean latency.
    pub fn get_suggested_strategy(&self, classification: &QueryClassification) -> Option<SearchStrategy> {
        let inner = self.inner.lock();
        let records = inner.learning.get(&classification.query_type)?;
        records
            .iter()
            .filter(|(_, r)| r.samples >= self.config.min_samples && r.success_rate() >= self.config.min_success_rate)
            .max_by(|(sa, a), (sb, b)| {
                a.success_rate()
                    .total_cmp(&b.success_rate())
                    .then_with(|| b.mean_latency_ms().cmp(&a.mean_latency_ms()))
                    .then_with(|| sb.cmp(sa))
            })
            .map(|(strategy, _)| *strategy)
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.now_ms();
        self.inner.lock().purge_expired(now, self.ttl_ms())
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            size: inner.entries.len(),
            max_size: self.config.max_size,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            hit_rate: if lookups == 0 { 0.0 } else { inner.hits as f64 / lookups as f64 },
            learned_query_types: inner.learning.len(),
        }
    }

    /// Drops every entry, counter and learned outcome.
    pub fn clear(&self) {
        *self.inner.lock() = Inner::default();
    }

    /// Spawns the periodic expiry sweep on the current tokio runtime.
    /// Returns `false` outside a runtime.
    pub fn start_cleanup(&self) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else { return false };
        let inner = Arc::clone(&self.inner);
        let clock = Arc::clone(&self.clock);
        let ttl = self.ttl_ms();
        let every = Duration::from_secs(self.config.cleanup_interval_secs.max(1));
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = inner.lock().purge_expired(clock.now().timestamp_millis(), ttl);
                if purged > 0 {
                    debug!(purged, "expired cache entries removed");
                }
            }
        });
        if let Some(previous) = self.cleanup.lock().replace(task) {
            previous.abort();
        }
        true
    }

    pub fn stop(&self) {
        if let Some(task) = self.cleanup.lock().take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.cleanup.lock().as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for ResultCache {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use lifelog_core::clock::FixedClock;
    use lifelog_query::QueryClassifier;

    fn setup(config: CacheConfig) -> (Arc<FixedClock>, ResultCache) {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).single().expect("valid timestamp");
        let clock = Arc::new(FixedClock::new(now));
        let cache = ResultCache::new(clock.clone(), config);
        (clock, cache)
    }

    fn classification(query: &str) -> QueryClassification {
        QueryClassifier::default().classify(query)
    }

    fn results(ids: &[&str]) -> Vec<SearchResult> {
        ids.iter().map(|id| SearchResult::new(*id, 1.0)).collect()
    }

    #[test]
    fn round_trip_then_expiry() {
        let (clock, cache) = setup(CacheConfig { ttl_secs: 60, ..CacheConfig::default() });
        let c = classification("budget");
        cache.set("budget", &c, results(&["a", "b"]), SearchStrategy::Fast, 12);

        let hit = cache.get("budget").expect("fresh entry");
        assert_eq!(hit.results, results(&["a", "b"]));
        assert_eq!(hit.strategy_used, SearchStrategy::Fast);
        assert_eq!(hit.hit_count, 1);

        clock.advance(chrono::Duration::seconds(60));
        assert!(cache.get("budget").is_none());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.size), (1, 1, 0));
    }

    #[test]
    fn eviction_prefers_unused_then_oldest() {
        let (clock, cache) = setup(CacheConfig { max_size: 2, ..CacheConfig::default() });
        let c = classification("x");
        cache.set("older", &c, results(&["1"]), SearchStrategy::Fast, 1);
        clock.advance(chrono::Duration::seconds(1));
        cache.set("newer", &c, results(&["2"]), SearchStrategy::Fast, 1);
        cache.set("popular", &c, results(&["3"]), SearchStrategy::Fast, 1);
        assert!(cache.get("older").is_none());
        assert!(cache.get("popular").is_some());

        clock.advance(chrono::Duration::seconds(1));
        cache.set("latest", &c, results(&["4"]), SearchStrategy::Fast, 1);
        assert!(cache.get("newer").is_none());
        assert!(cache.get("popular").is_some());
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn learning_needs_enough_successful_samples() {
        let (_, cache) = setup(CacheConfig { min_samples: 2, min_success_rate: 0.5, ..CacheConfig::default() });
        let c = classification("what did we discuss about pricing");
        cache.record_outcome(c.query_type, SearchStrategy::Vector, 3, 100);
        assert_eq!(cache.get_suggested_strategy(&c), None);

        cache.record_outcome(c.query_type, SearchStrategy::Vector, 2, 120);
        cache.record_outcome(c.query_type, SearchStrategy::Hybrid, 0, 50);
        cache.record_outcome(c.query_type, SearchStrategy::Hybrid, 0, 50);
        assert_eq!(cache.get_suggested_strategy(&c), Some(SearchStrategy::Vector));

        let other = classification("today");
        assert_ne!(other.query_type, c.query_type);
        assert_eq!(cache.get_suggested_strategy(&other), None);
    }

    #[test]
    fn slow_results_do_not_count_as_success() {
        let (_, cache) = setup(CacheConfig { min_samples: 1, success_latency_ms: 100, ..CacheConfig::default() });
        let c = classification("budget");
        cache.record_outcome(c.query_type, SearchStrategy::Fast, 5, 500);
        assert_eq!(cache.get_suggested_strategy(&c), None);
    }

    #[test]
    fn clear_resets_everything() {
        let (_, cache) = setup(CacheConfig::default());
        let c = classification("budget");
        cache.set("budget", &c, results(&["a"]), SearchStrategy::Fast, 1);
        cache.clear();
        assert_eq!(cache.stats(), CacheStats { max_size: 500, ..CacheStats::default() });
    }

    #[test]
    fn purge_removes_only_expired() {
        let (clock, cache) = setup(CacheConfig { ttl_secs: 10, ..CacheConfig::default() });
        let c = classification("x");
        cache.set("old", &c, results(&["1"]), SearchStrategy::Fast, 1);
        clock.advance(chrono::Duration::seconds(8));
        cache.set("new", &c, results(&["2"]), SearchStrategy::Fast, 1);
        clock.advance(chrono::Duration::seconds(3));
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.get("new").is_some());
    }

    #[tokio::test]
    async fn cleanup_task_stops() {
        let (_, cache) = setup(CacheConfig::default());
        assert!(cache.start_cleanup());
        assert!(cache.is_running());
        cache.stop();
        assert!(!cache.is_running());
    }
}
