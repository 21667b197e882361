/// Configuration management using figment
///
/// Loads configuration with this precedence (highest wins):
/// 1. Defaults (hardcoded)
/// 2. TOML file: mosaic.toml (in working directory)
/// 3. Environment variables: prefixed MOSAIC_, sections split on "__"
///    (e.g., MOSAIC_LOG_LEVEL=debug, MOSAIC_FUSION__RRF_K=30)
///
/// BM25 parameters and the RRF constant are deployment settings. They are not
/// overridable per query.

use figment::{
    Figment,
    providers::{Env, Format, Toml, Serialized},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::MosaicError;
use crate::index::vector::{HnswParams, SimilarityMetric, VectorIndexKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional file path for JSON log output (in addition to stderr)
    #[serde(default)]
    pub log_file: Option<String>,

    /// Directory holding meta.json + documents.jsonl of the serving index.
    #[serde(default = "default_index_dir")]
    pub index_dir: String,

    #[serde(default)]
    pub bm25: Bm25Config,

    #[serde(default)]
    pub fusion: FusionConfig,

    #[serde(default)]
    pub dense: DenseConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub selector: SelectorConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Config {
    /// Term-frequency saturation
    #[serde(default = "default_k1")]
    pub k1: f64,
    /// Document-length normalization strength, in [0, 1]
    #[serde(default = "default_b")]
    pub b: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// RRF smoothing constant: each list contributes 1 / (rrf_k + rank)
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// How many candidates each retriever returns before fusion/selection
    #[serde(default = "default_candidate_depth")]
    pub candidate_depth: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DenseConfig {
    /// Similarity used by the vector index. Fixed at build time.
    #[serde(default)]
    pub metric: SimilarityMetric,
    /// "exact" (flat scan) or "hnsw" (approximate graph search). Fixed at build time.
    #[serde(default)]
    pub index_kind: VectorIndexKind,
    #[serde(default)]
    pub hnsw: HnswParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Per-retriever deadline. A retriever exceeding it counts as failed for that query.
    #[serde(default = "default_retriever_timeout_ms")]
    pub retriever_timeout_ms: u64,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Path to a serialized router model. None means the NullModel (always RRF).
    #[serde(default)]
    pub model_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "local" (fastembed), "openai", or "none" (queries must carry an embedding)
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_index_dir() -> String {
    "data/index".to_string()
}

fn default_k1() -> f64 {
    1.2
}

fn default_b() -> f64 {
    0.75
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_candidate_depth() -> usize {
    100
}

fn default_retriever_timeout_ms() -> u64 {
    2000
}

fn default_top_k() -> usize {
    10
}

fn default_max_top_k() -> usize {
    100
}

fn default_snippet_chars() -> usize {
    240
}

fn default_embedding_provider() -> String {
    "local".to_string()
}

fn default_cache_dir() -> String {
    dirs::cache_dir()
        .map(|d| d.join("mosaic").join("fastembed"))
        .unwrap_or_else(|| std::path::PathBuf::from(".fastembed_cache"))
        .to_string_lossy()
        .into_owned()
}

fn default_openai_model() -> String {
    "text-embedding-3-small".to_string()
}

impl Default for Bm25Config {
    fn default() -> Self {
        Bm25Config { k1: default_k1(), b: default_b() }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        FusionConfig {
            rrf_k: default_rrf_k(),
            candidate_depth: default_candidate_depth(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            retriever_timeout_ms: default_retriever_timeout_ms(),
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            provider: default_embedding_provider(),
            cache_dir: default_cache_dir(),
            openai_api_key: None,
            openai_model: default_openai_model(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            log_file: None,
            index_dir: default_index_dir(),
            bm25: Bm25Config::default(),
            fusion: FusionConfig::default(),
            dense: DenseConfig::default(),
            search: SearchConfig::default(),
            selector: SelectorConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl SearchConfig {
    pub fn retriever_timeout(&self) -> Duration {
        Duration::from_millis(self.retriever_timeout_ms)
    }
}

impl Config {
    /// Load configuration from defaults, TOML file, and environment variables
    ///
    /// Environment variables override TOML file values.
    /// Example: MOSAIC_BM25__K1=0.9 overrides bm25.k1 in mosaic.toml
    pub fn load() -> Result<Config, MosaicError> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("mosaic.toml"))
            .merge(Env::prefixed("MOSAIC_").split("__"))
            .extract()
            .map_err(|e| MosaicError::Config(format!("Failed to load config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the retrieval pipeline cannot run with.
    pub fn validate(&self) -> Result<(), MosaicError> {
        if !self.bm25.k1.is_finite() || self.bm25.k1 < 0.0 {
            return Err(MosaicError::Config(format!("bm25.k1 must be >= 0, got {}", self.bm25.k1)));
        }
        if !(0.0..=1.0).contains(&self.bm25.b) {
            return Err(MosaicError::Config(format!("bm25.b must be within [0, 1], got {}", self.bm25.b)));
        }
        if !self.fusion.rrf_k.is_finite() || self.fusion.rrf_k < 0.0 {
            return Err(MosaicError::Config(format!("fusion.rrf_k must be >= 0, got {}", self.fusion.rrf_k)));
        }
        if self.fusion.candidate_depth == 0 {
            return Err(MosaicError::Config("fusion.candidate_depth must be at least 1".to_string()));
        }
        if self.search.retriever_timeout_ms == 0 {
            return Err(MosaicError::Config("search.retriever_timeout_ms must be at least 1".to_string()));
        }
        if self.search.default_top_k == 0 || self.search.max_top_k == 0 {
            return Err(MosaicError::Config("search top_k limits must be at least 1".to_string()));
        }
        if self.dense.index_kind == VectorIndexKind::Hnsw
            && (self.dense.hnsw.connectivity == 0 || self.dense.hnsw.expansion_add == 0 || self.dense.hnsw.expansion_search == 0)
        {
            return Err(MosaicError::Config("dense.hnsw parameters must be at least 1".to_string()));
        }
        if self.search.default_top_k > self.search.max_top_k {
            return Err(MosaicError::Config(format!(
                "search.default_top_k ({}) exceeds search.max_top_k ({})",
                self.search.default_top_k, self.search.max_top_k
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_file, None);
        assert_eq!(config.index_dir, "data/index");
        assert_eq!(config.bm25.k1, 1.2);
        assert_eq!(config.bm25.b, 0.75);
        assert_eq!(config.fusion.rrf_k, 60.0);
        assert_eq!(config.dense.metric, SimilarityMetric::Cosine);
        assert_eq!(config.dense.index_kind, VectorIndexKind::Exact);
        assert_eq!(config.dense.hnsw.connectivity, 16);
        assert_eq!(config.embedding.provider, "local");
        assert!(config.selector.model_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_hnsw_connectivity() {
        let mut config = Config::default();
        config.dense.index_kind = VectorIndexKind::Hnsw;
        config.dense.hnsw.connectivity = 0;
        assert!(matches!(config.validate(), Err(MosaicError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_b() {
        let mut config = Config::default();
        config.bm25.b = 1.5;
        assert!(matches!(config.validate(), Err(MosaicError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_negative_rrf_k() {
        let mut config = Config::default();
        config.fusion.rrf_k = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_default_top_k_above_max() {
        let mut config = Config::default();
        config.search.default_top_k = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_sections_override_defaults() {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string("[bm25]\nk1 = 0.9\n[fusion]\nrrf_k = 30.0\n"))
            .extract()
            .unwrap();
        assert_eq!(config.bm25.k1, 0.9);
        assert_eq!(config.bm25.b, 0.75);
        assert_eq!(config.fusion.rrf_k, 30.0);
        assert_eq!(config.fusion.candidate_depth, 100);
    }
}
