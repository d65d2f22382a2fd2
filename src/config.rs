use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Tree configuration file could not be read or parsed.
    #[error("Invalid tree configuration file {path}: {message}")]
    InvalidFile {
        /// Path of the offending file.
        path: String,
        /// Reader or parser diagnostic.
        message: String,
    },
}

/// Runtime configuration for the service surfaces (CLI, worker host).
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores tree nodes.
    pub qdrant_url: Option<String>,
    /// Name of the Qdrant collection holding tree nodes.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Base URL of the Ollama runtime used for completions and embeddings.
    pub ollama_url: Option<String>,
    /// Completion model; summarization and intent detection are disabled when absent.
    pub llm_model: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Algorithm settings for building and querying trees.
    pub raptor: RaptorConfig,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic local hashing embeddings (no network).
    Hashing,
    /// Local Ollama runtime.
    Ollama,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut raptor = match load_env_optional("RAPTOR_CONFIG") {
            Some(path) => RaptorConfig::from_file(&path)?,
            None => RaptorConfig::default(),
        };
        if let Some(value) = load_env_optional("RAPTOR_MAX_CONCURRENT_BUILDS") {
            raptor.worker.max_concurrent_builds = value.parse().map_err(|_| {
                ConfigError::InvalidValue("RAPTOR_MAX_CONCURRENT_BUILDS".to_string())
            })?;
        }
        if let Some(value) = load_env_optional("RAPTOR_JOB_TIMEOUT_SECS") {
            raptor.worker.job_timeout_secs = Some(value.parse().map_err(|_| {
                ConfigError::InvalidValue("RAPTOR_JOB_TIMEOUT_SECS".to_string())
            })?);
        }

        Ok(Self {
            qdrant_url: load_env_optional("QDRANT_URL"),
            qdrant_collection_name: load_env_optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| "raptor-nodes".to_string()),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            ollama_url: load_env_optional("OLLAMA_URL"),
            llm_model: load_env_optional("LLM_MODEL"),
            embedding_provider: load_env_optional("EMBEDDING_PROVIDER")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))
                })
                .transpose()?
                .unwrap_or(EmbeddingProvider::Hashing),
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "nomic-embed-text".to_string()),
            embedding_dimension: load_env_optional("EMBEDDING_DIMENSION")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("EMBEDDING_DIMENSION".to_string()))
                })
                .transpose()?
                .unwrap_or(768),
            raptor,
        })
    }

    /// Read `.env` (when present) and load configuration from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        tracing::debug!(
            qdrant_url = ?config.qdrant_url,
            collection = %config.qdrant_collection_name,
            llm_model = ?config.llm_model,
            embedding_provider = ?config.embedding_provider,
            "Loaded configuration"
        );
        Ok(config)
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hashing" => Ok(Self::Hashing),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

/// All algorithm settings, deserializable from a partial JSON document.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RaptorConfig {
    /// Clustering engine settings.
    pub clustering: ClusteringConfig,
    /// Summarizer settings.
    pub summarizer: SummarizerConfig,
    /// Tree builder settings.
    pub tree: TreeConfig,
    /// Background worker settings.
    pub worker: WorkerConfig,
    /// Query-time retrieval settings.
    pub retrieval: RetrievalConfig,
}

impl RaptorConfig {
    /// Parse a JSON file; absent fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let invalid = |message: String| ConfigError::InvalidFile {
            path: path.display().to_string(),
            message,
        };
        let raw = std::fs::read_to_string(path).map_err(|error| invalid(error.to_string()))?;
        serde_json::from_str(&raw).map_err(|error| invalid(error.to_string()))
    }
}

/// Soft clustering parameters.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Smallest cluster kept; inputs below this size form one cluster.
    pub min_cluster_size: usize,
    /// Largest cluster kept; larger clusters keep their most probable members.
    pub max_cluster_size: usize,
    /// Upper bound for the number of mixture components.
    pub max_clusters: usize,
    /// Target dimensionality of the reduced embeddings.
    pub reduction_dimension: usize,
    /// Neighbourhood size for the reduction graph.
    pub n_neighbors: usize,
    /// Optimisation epochs for the reduction layout.
    pub reduction_epochs: usize,
    /// Minimum membership probability for admitting a node to a cluster.
    pub gmm_probability_threshold: f64,
    /// Maximum EM iterations for the mixture fit.
    pub gmm_max_iter: usize,
    /// Seed shared by the reduction and the mixture fit.
    pub random_seed: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 3,
            max_cluster_size: 10,
            max_clusters: 10,
            reduction_dimension: 10,
            n_neighbors: 15,
            reduction_epochs: 200,
            gmm_probability_threshold: 0.3,
            gmm_max_iter: 100,
            random_seed: 224,
        }
    }
}

/// Summarization prompt budget.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Maximum member texts concatenated into one prompt.
    pub max_chunks_per_summary: usize,
    /// Estimated token budget for the concatenated texts.
    pub max_input_tokens: usize,
    /// Number of texts whose first sentence feeds the fallback summary.
    pub fallback_sentences: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            max_chunks_per_summary: 10,
            max_input_tokens: 6000,
            fallback_sentences: 5,
        }
    }
}

/// Recursion limits for tree construction.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TreeConfig {
    /// Minimum nodes at a level for another round of clustering.
    pub min_nodes_to_cluster: usize,
    /// Maximum number of clustered summary levels.
    pub max_tree_depth: u32,
    /// Cluster summaries requested from the LLM at once.
    pub summary_concurrency: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            min_nodes_to_cluster: 5,
            max_tree_depth: 4,
            summary_concurrency: 4,
        }
    }
}

/// Background worker scheduling.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Builds allowed to run at the same time.
    pub max_concurrent_builds: usize,
    /// Seconds between polls for pending sources.
    pub poll_interval_secs: u64,
    /// Pending sources fetched per poll.
    pub poll_batch_size: usize,
    /// Seconds `stop()` waits for the processing thread.
    pub shutdown_timeout_secs: u64,
    /// Optional per-job build timeout in seconds.
    pub job_timeout_secs: Option<u64>,
}

impl WorkerConfig {
    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Shutdown timeout as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Per-job timeout, when configured.
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_builds: 1,
            poll_interval_secs: 30,
            poll_batch_size: 5,
            shutdown_timeout_secs: 10,
            job_timeout_secs: None,
        }
    }
}

/// Level selection, fusion, and boosting parameters.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Levels searched for summary-style questions.
    pub summary_query_levels: Vec<u32>,
    /// Levels searched for detail-style questions.
    pub detail_query_levels: Vec<u32>,
    /// Number of results returned.
    pub similarity_top_k: usize,
    /// Fuse BM25 with vector similarity.
    pub hybrid_enabled: bool,
    /// Fusion weight of the vector ranking.
    pub vector_weight: f32,
    /// Fusion weight of the keyword ranking.
    pub keyword_weight: f32,
    /// Total queries per search, including the original one.
    pub num_queries: usize,
    /// Boost applied to the highest summary levels for summary questions.
    pub summary_boost_factor: f32,
    /// Boost applied to level-0 chunks for detail questions.
    pub detail_boost: f32,
    /// Node cache time-to-live in seconds.
    pub cache_ttl_secs: u64,
}

impl RetrievalConfig {
    /// Cache TTL as a [`Duration`].
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            summary_query_levels: vec![0, 1, 2, 3],
            detail_query_levels: vec![0, 1],
            similarity_top_k: 10,
            hybrid_enabled: true,
            vector_weight: 0.5,
            keyword_weight: 0.5,
            num_queries: 3,
            summary_boost_factor: 1.5,
            detail_boost: 1.3,
            cache_ttl_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RaptorConfig::default();
        assert_eq!(config.clustering.min_cluster_size, 3);
        assert_eq!(config.clustering.reduction_dimension, 10);
        assert_eq!(config.clustering.n_neighbors, 15);
        assert!((config.clustering.gmm_probability_threshold - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.summarizer.max_chunks_per_summary, 10);
        assert_eq!(config.summarizer.max_input_tokens, 6000);
        assert_eq!(config.tree.min_nodes_to_cluster, 5);
        assert_eq!(config.tree.max_tree_depth, 4);
        assert_eq!(config.worker.max_concurrent_builds, 1);
        assert_eq!(config.worker.poll_batch_size, 5);
        assert_eq!(config.retrieval.detail_query_levels, vec![0, 1]);
        assert_eq!(config.retrieval.cache_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: RaptorConfig =
            serde_json::from_str(r#"{"tree": {"max_tree_depth": 2}, "worker": {"job_timeout_secs": 60}}"#)
                .expect("config");
        assert_eq!(config.tree.max_tree_depth, 2);
        assert_eq!(config.tree.min_nodes_to_cluster, 5);
        assert_eq!(config.worker.job_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.clustering, ClusteringConfig::default());
    }

    #[test]
    fn embedding_provider_parses_case_insensitively() {
        assert_eq!("Ollama".parse::<EmbeddingProvider>(), Ok(EmbeddingProvider::Ollama));
        assert_eq!("hashing".parse::<EmbeddingProvider>(), Ok(EmbeddingProvider::Hashing));
        assert!("openai".parse::<EmbeddingProvider>().is_err());
    }

    #[test]
    fn missing_config_file_is_reported() {
        let error = RaptorConfig::from_file("/definitely/not/here.json").expect_err("missing");
        assert!(matches!(error, ConfigError::InvalidFile { .. }));
    }
}
