//! Configuration management for repointel
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::jobs::JobKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Clone stage configuration
    #[serde(default)]
    pub clone: CloneConfig,

    /// Structuring and chunking configuration
    #[serde(default)]
    pub chunk: ChunkConfig,

    /// Embedding backend configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Language model backend configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Job engine configuration
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Search configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Tutor configuration
    #[serde(default)]
    pub tutor: TutorConfig,

    /// Documentation generator configuration
    #[serde(default)]
    pub docs: DocsConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneConfig {
    /// Reject working trees larger than this (MB, excluding .git)
    #[serde(default = "default_clone_max_repo_size_mb")]
    pub max_repo_size_mb: u64,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum lines per chunk
    #[serde(default = "default_chunk_max_lines")]
    pub max_lines: usize,

    /// Maximum bytes per chunk
    #[serde(default = "default_chunk_max_bytes")]
    pub max_bytes: usize,

    /// Lines shared between consecutive chunks
    #[serde(default = "default_chunk_overlap_lines")]
    pub overlap_lines: usize,

    /// Files with fewer non-whitespace chars are skipped
    #[serde(default = "default_chunk_min_file_chars")]
    pub min_file_chars: usize,

    /// Files larger than this are skipped
    #[serde(default = "default_chunk_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Maximum files considered per repository
    #[serde(default = "default_chunk_max_files")]
    pub max_files: usize,

    /// Maximum chunks per repository
    #[serde(default = "default_chunk_max_chunks")]
    pub max_chunks: usize,

    /// Extra gitignore-style patterns to skip
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "hashing" (local, deterministic) or "http" (OpenAI-compatible)
    #[serde(default = "default_embedding_backend")]
    pub backend: String,

    /// Backend base URL for the http backend
    #[serde(default = "default_embedding_url")]
    pub url: String,

    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Batch size for embedding
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_embedding_requests_per_second")]
    pub requests_per_second: u32,

    /// Retries per failed batch
    #[serde(default = "default_embedding_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Environment variable name for the API key
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,
}

/// Language model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_llm_requests_per_second")]
    pub requests_per_second: u32,

    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,

    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
}

/// Job engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Concurrent workers
    #[serde(default = "default_jobs_workers")]
    pub workers: usize,

    #[serde(default = "default_jobs_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Attempts before a job is failed
    #[serde(default = "default_jobs_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_jobs_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_jobs_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Submit the next stage after a stage succeeds
    #[serde(default = "default_jobs_auto_advance")]
    pub auto_advance: bool,

    #[serde(default = "default_jobs_clone_timeout")]
    pub clone_timeout_secs: u64,

    #[serde(default = "default_jobs_structure_timeout")]
    pub structure_timeout_secs: u64,

    #[serde(default = "default_jobs_index_timeout")]
    pub index_timeout_secs: u64,

    #[serde(default = "default_jobs_docs_timeout")]
    pub docs_timeout_secs: u64,
}

impl JobsConfig {
    /// Wall-clock limit for a single attempt of a stage
    pub fn timeout_for(&self, kind: JobKind) -> Duration {
        let secs = match kind {
            JobKind::Clone => self.clone_timeout_secs,
            JobKind::Structure => self.structure_timeout_secs,
            JobKind::Index => self.index_timeout_secs,
            JobKind::GenerateDocs => self.docs_timeout_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,

    /// Maximum results allowed
    #[serde(default = "default_search_max_results")]
    pub max_results: usize,

    /// Minimum similarity score (0.0 - 1.0)
    #[serde(default = "default_search_min_score")]
    pub min_score: f32,

    /// Lines of chunk content shown as a snippet
    #[serde(default = "default_search_snippet_lines")]
    pub snippet_lines: usize,
}

/// Tutor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorConfig {
    #[serde(default = "default_tutor_top_k")]
    pub top_k: usize,

    #[serde(default = "default_tutor_min_score")]
    pub min_score: f32,

    /// Idle hours before a session expires
    #[serde(default = "default_tutor_session_ttl_hours")]
    pub session_ttl_hours: i64,

    #[serde(default = "default_tutor_max_history_turns")]
    pub max_history_turns: usize,

    /// Approximate token budget for replayed turns
    #[serde(default = "default_tutor_history_token_budget")]
    pub history_token_budget: usize,

    /// Approximate token budget for the summary of older turns
    #[serde(default = "default_tutor_summary_token_budget")]
    pub summary_token_budget: usize,
}

/// Documentation generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocsConfig {
    #[serde(default = "default_docs_max_context_chunks")]
    pub max_context_chunks: usize,

    #[serde(default = "default_docs_max_context_chars")]
    pub max_context_chars: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for repointel data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,

    /// Directory holding cloned working trees
    pub repos_dir: PathBuf,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            max_repo_size_mb: default_clone_max_repo_size_mb(),
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_lines: default_chunk_max_lines(),
            max_bytes: default_chunk_max_bytes(),
            overlap_lines: default_chunk_overlap_lines(),
            min_file_chars: default_chunk_min_file_chars(),
            max_file_bytes: default_chunk_max_file_bytes(),
            max_files: default_chunk_max_files(),
            max_chunks: default_chunk_max_chunks(),
            ignore_patterns: Vec::new(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_embedding_backend(),
            url: default_embedding_url(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
            requests_per_second: default_embedding_requests_per_second(),
            max_retries: default_embedding_max_retries(),
            timeout_secs: default_embedding_timeout(),
            api_key_env: default_embedding_api_key_env(),
        }
    }
}

impl EmbeddingConfig {
    /// Get the embedding API key from the environment
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            model: default_llm_model(),
            api_key_env: default_llm_api_key_env(),
            timeout_secs: default_llm_timeout(),
            requests_per_second: default_llm_requests_per_second(),
            temperature: default_llm_temperature(),
            max_tokens: default_llm_max_tokens(),
            max_retries: default_llm_max_retries(),
        }
    }
}

impl LlmConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: default_jobs_workers(),
            poll_interval_ms: default_jobs_poll_interval_ms(),
            max_attempts: default_jobs_max_attempts(),
            backoff_base_ms: default_jobs_backoff_base_ms(),
            backoff_max_ms: default_jobs_backoff_max_ms(),
            auto_advance: default_jobs_auto_advance(),
            clone_timeout_secs: default_jobs_clone_timeout(),
            structure_timeout_secs: default_jobs_structure_timeout(),
            index_timeout_secs: default_jobs_index_timeout(),
            docs_timeout_secs: default_jobs_docs_timeout(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
            max_results: default_search_max_results(),
            min_score: default_search_min_score(),
            snippet_lines: default_search_snippet_lines(),
        }
    }
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            top_k: default_tutor_top_k(),
            min_score: default_tutor_min_score(),
            session_ttl_hours: default_tutor_session_ttl_hours(),
            max_history_turns: default_tutor_max_history_turns(),
            history_token_budget: default_tutor_history_token_budget(),
            summary_token_budget: default_tutor_summary_token_budget(),
        }
    }
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            max_context_chunks: default_docs_max_context_chunks(),
            max_context_chars: default_docs_max_context_chars(),
        }
    }
}

impl Config {
    /// Get the default base directory (~/.repointel)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".repointel")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    fn paths_for(base: PathBuf, config_file: PathBuf) -> PathsConfig {
        PathsConfig {
            config_file,
            db_file: base.join("repointel.db"),
            repos_dir: base.join("repos"),
            base_dir: base,
        }
    }

    /// Point all internal paths at `base_dir`
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = Self::paths_for(base.clone(), base.join("config.toml"));
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = Self::paths_for(base, config_path.to_path_buf());

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk.max_lines == 0 || self.chunk.max_bytes == 0 {
            return Err(Error::Config(
                "chunk.max_lines and chunk.max_bytes must be positive".to_string(),
            ));
        }

        if self.chunk.overlap_lines >= self.chunk.max_lines {
            return Err(Error::Config(
                "chunk.overlap_lines must be < chunk.max_lines".to_string(),
            ));
        }

        if !matches!(self.embedding.backend.as_str(), "hashing" | "http") {
            return Err(Error::Config(format!(
                "Unsupported embedding backend '{}'; expected 'hashing' or 'http'",
                self.embedding.backend
            )));
        }

        if self.embedding.dimension == 0 || self.embedding.batch_size == 0 {
            return Err(Error::Config(
                "embedding.dimension and embedding.batch_size must be positive".to_string(),
            ));
        }

        if self.embedding.requests_per_second == 0 || self.llm.requests_per_second == 0 {
            return Err(Error::Config(
                "requests_per_second must be positive".to_string(),
            ));
        }

        for (name, score) in [
            ("search.min_score", self.search.min_score),
            ("tutor.min_score", self.tutor.min_score),
        ] {
            if !(0.0..=1.0).contains(&score) {
                return Err(Error::Config(format!(
                    "{} must be between 0.0 and 1.0",
                    name
                )));
            }
        }

        if self.search.default_limit > self.search.max_results {
            return Err(Error::Config(
                "search.default_limit must be <= search.max_results".to_string(),
            ));
        }

        if self.jobs.workers == 0 || self.jobs.max_attempts == 0 {
            return Err(Error::Config(
                "jobs.workers and jobs.max_attempts must be positive".to_string(),
            ));
        }

        if self.jobs.backoff_base_ms > self.jobs.backoff_max_ms {
            return Err(Error::Config(
                "jobs.backoff_base_ms must be <= jobs.backoff_max_ms".to_string(),
            ));
        }

        if self.tutor.top_k == 0 || self.tutor.session_ttl_hours <= 0 {
            return Err(Error::Config(
                "tutor.top_k and tutor.session_ttl_hours must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
