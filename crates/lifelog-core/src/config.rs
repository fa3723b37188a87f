use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_for_env(&env_name)
    }

    pub fn load_for_env(env_name: &str) -> anyhow::Result<Self> {
        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.validate_for_env(env_name)?;
        Ok(config)
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Typed engine tuning under the `engine` key; defaults when absent.
    pub fn engine(&self) -> Result<EngineConfig> {
        if self.figment.find_value("engine").is_err() {
            return Ok(EngineConfig::default());
        }
        let engine: EngineConfig =
            self.figment.extract_inner("engine").map_err(|e| Error::InvalidConfig(e.to_string()))?;
        engine.validate()?;
        Ok(engine)
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        if matches!(env, "prod" | "production") {
            let engine = self.engine()?;
            if engine.executor.strategy_timeout_ms == 0 {
                anyhow::bail!("Prod config must bound strategy execution (engine.executor.strategy_timeout_ms > 0)");
            }
        }
        Ok(())
    }
}

/// Every tunable constant of the search core. All fields default, so a
/// partial `[engine]` table only overrides what it names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub data: DataConfig,
    pub lexical: LexicalConfig,
    pub hybrid: HybridConfig,
    pub executor: ExecutorConfig,
    pub cache: CacheConfig,
    pub classifier: ClassifierConfig,
    pub decomposer: DecomposerConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.hybrid.hybrid_weight) {
            return Err(Error::InvalidConfig(format!("hybrid.hybrid_weight must be in [0,1], got {}", self.hybrid.hybrid_weight)));
        }
        if self.lexical.proximity_window == 0 {
            return Err(Error::InvalidConfig("lexical.proximity_window must be positive".into()));
        }
        if self.hybrid.page_size == 0 {
            return Err(Error::InvalidConfig("hybrid.page_size must be positive".into()));
        }
        if self.cache.max_size == 0 {
            return Err(Error::InvalidConfig("cache.max_size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.executor.temporal_decay_floor) {
            return Err(Error::InvalidConfig("executor.temporal_decay_floor must be in [0,1]".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory of `*.json` lifelog files.
    pub documents_dir: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self { documents_dir: "~/.lifelog/documents".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalConfig {
    pub token_weight: f64,
    /// Multiplier over `token_weight` for an exact phrase occurrence.
    pub phrase_weight: f64,
    /// Weight of a phrase word found on its own when the phrase is absent.
    pub phrase_word_weight: f64,
    pub title_weight: f64,
    /// Characters within which two distinct query units earn a proximity bonus.
    pub proximity_window: usize,
    pub proximity_weight: f64,
    pub cooccurrence_multiplier: f64,
    /// Added per matched phrase when a "where" question meets a location cue.
    pub location_boost: f64,
    pub damping: f64,
    /// Lower bound of `sqrt(len / 1000)` so very short documents do not explode.
    pub length_floor: f64,
    pub snippet_radius: usize,
    pub max_highlights: usize,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            token_weight: 1.0,
            phrase_weight: 3.0,
            phrase_word_weight: 0.5,
            title_weight: 2.0,
            proximity_window: 50,
            proximity_weight: 1.0,
            cooccurrence_multiplier: 1.5,
            location_boost: 2.0,
            damping: 0.5,
            length_floor: 0.25,
            snippet_radius: 40,
            max_highlights: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    pub k1: f64,
    pub b: f64,
    /// Corpus-independent average document length in characters.
    pub avg_doc_length: f64,
    pub rrf_k: f64,
    /// Share of fusion weight given to the keyword list.
    pub hybrid_weight: f64,
    pub page_size: usize,
    pub idf_floor: f64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75, avg_doc_length: 500.0, rrf_k: 60.0, hybrid_weight: 0.5, page_size: 100, idf_floor: 1e-3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub consensus_boost: f64,
    pub hot_boost: f64,
    pub temporal_decay_per_day: f64,
    pub temporal_decay_floor: f64,
    pub strategy_timeout_ms: u64,
    pub overall_timeout_ms: u64,
    /// Pause between the discovery and enhancement phases.
    pub settle_ms: u64,
    pub max_hot_documents: usize,
    /// Minimum lexical score for a document to be flagged hot.
    pub hot_score_threshold: f64,
    pub max_context_keywords: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            consensus_boost: 1.15,
            hot_boost: 1.15,
            temporal_decay_per_day: 0.05,
            temporal_decay_floor: 0.7,
            strategy_timeout_ms: 5_000,
            overall_timeout_ms: 15_000,
            settle_ms: 10,
            max_hot_documents: 10,
            hot_score_threshold: 0.3,
            max_context_keywords: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl_secs: u64,
    /// Samples per (query type, strategy) before a learned suggestion is trusted.
    pub min_samples: u32,
    pub min_success_rate: f64,
    /// A search slower than this does not count as a success.
    pub success_latency_ms: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 500,
            ttl_secs: 300,
            min_samples: 3,
            min_success_rate: 0.5,
            success_latency_ms: 2_000,
            cleanup_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub cache_capacity: u64,
    pub complex_word_count: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self { cache_capacity: 1_000, complex_word_count: 15 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecomposerConfig {
    /// Queries shorter than this (in characters) are never decomposed.
    pub min_length: usize,
    pub topic_boundary_jaccard: f64,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self { min_length: 30, topic_boundary_jaccard: 0.3 }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
