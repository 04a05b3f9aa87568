
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::indexer::chunking::ChunkingConfig;
use crate::tokenizer::ModelFamily;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;

const DEFAULT_DEBOUNCE_MS: u64 = 200;
const DEFAULT_INDEX_WORKERS: usize = 4;
const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;
const DEFAULT_MAX_UNKNOWN_LANGUAGE_BYTES: u64 = 64 * 1024;
const DEFAULT_CANDIDATE_LIMIT: usize = 20;

/// Top-level engine configuration, persisted as `config.toml` under the
/// index base directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub tokenizer_family: ModelFamily,
    #[serde(skip)]
    pub workspace_root: PathBuf,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Connection settings for the Ollama-compatible embedding backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

/// Indexer behavior: change debouncing, worker pool size, inclusion policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexingConfig {
    /// Per-file debounce window for coalescing change events, in milliseconds.
    pub debounce_ms: u64,
    /// Number of concurrent indexing workers.
    pub workers: usize,
    /// Files larger than this are excluded from the index.
    pub max_file_bytes: u64,
    /// Files of unknown language larger than this are excluded.
    pub max_unknown_language_bytes: u64,
    /// Directory names excluded from traversal at any depth.
    pub excluded_dirs: Vec<String>,
    /// Additional glob patterns to exclude (workspace-relative).
    pub exclude_globs: Vec<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            workers: DEFAULT_INDEX_WORKERS,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_unknown_language_bytes: DEFAULT_MAX_UNKNOWN_LANGUAGE_BYTES,
            excluded_dirs: vec![
                ".git".to_string(),
                "node_modules".to_string(),
                "vendor".to_string(),
                "target".to_string(),
                "dist".to_string(),
                "build".to_string(),
                "out".to_string(),
                ".venv".to_string(),
                "__pycache__".to_string(),
            ],
            exclude_globs: Vec::new(),
        }
    }
}

/// Retrieval knobs that are safe to tune without breaking determinism.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Maximum candidates requested from each retriever.
    pub candidate_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid debounce window: {0}ms (must be between 10 and 10000)")]
    InvalidDebounce(u64),
    #[error("Invalid worker count: {0} (must be between 1 and 64)")]
    InvalidWorkerCount(usize),
    #[error("Invalid max file size: {0} bytes (must be at least 1024)")]
    InvalidMaxFileSize(u64),
    #[error("Invalid candidate limit: {0} (must be between 1 and 500)")]
    InvalidCandidateLimit(usize),
    #[error("Invalid chunk span: {0} lines (must be between 10 and 2000)")]
    InvalidMaxSpanLines(usize),
    #[error("Invalid chunk span: {0} bytes (must be between 256 and 65536)")]
    InvalidMaxSpanBytes(usize),
    #[error("Fallback stride ({0}) must be greater than overlap ({1})")]
    StrideNotAboveOverlap(usize, usize),
    #[error("Workspace root does not exist: {}", .0.display())]
    WorkspaceRootMissing(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl EngineConfig {
    /// Load configuration for a workspace, using the default base directory
    /// `<workspace_root>/.context-engine`.
    #[inline]
    pub fn load<P: AsRef<Path>>(workspace_root: P) -> Result<Self> {
        let base_dir = workspace_root.as_ref().join(".context-engine");
        Self::load_from(workspace_root.as_ref(), &base_dir)
    }

    /// Load configuration from an explicit base directory. Falls back to
    /// defaults when `config.toml` does not exist.
    #[inline]
    pub fn load_from(workspace_root: &Path, base_dir: &Path) -> Result<Self> {
        let config_path = base_dir.join("config.toml");

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str::<EngineConfig>(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            EngineConfig {
                embedding: EmbeddingConfig::default(),
                chunking: ChunkingConfig::default(),
                indexing: IndexingConfig::default(),
                retrieval: RetrievalConfig::default(),
                tokenizer_family: ModelFamily::default(),
                workspace_root: PathBuf::new(),
                base_dir: PathBuf::new(),
            }
        };

        config.workspace_root = workspace_root.to_path_buf();
        config.base_dir = base_dir.to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.base_dir.join("config.toml");
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.workspace_root.as_os_str().is_empty() && !self.workspace_root.exists() {
            return Err(ConfigError::WorkspaceRootMissing(
                self.workspace_root.clone(),
            ));
        }

        self.embedding.validate()?;
        self.validate_indexing()?;
        self.validate_chunking()?;

        if self.retrieval.candidate_limit == 0 || self.retrieval.candidate_limit > 500 {
            return Err(ConfigError::InvalidCandidateLimit(
                self.retrieval.candidate_limit,
            ));
        }

        Ok(())
    }

    fn validate_indexing(&self) -> Result<(), ConfigError> {
        let indexing = &self.indexing;

        if !(10..=10_000).contains(&indexing.debounce_ms) {
            return Err(ConfigError::InvalidDebounce(indexing.debounce_ms));
        }

        if indexing.workers == 0 || indexing.workers > 64 {
            return Err(ConfigError::InvalidWorkerCount(indexing.workers));
        }

        if indexing.max_file_bytes < 1024 {
            return Err(ConfigError::InvalidMaxFileSize(indexing.max_file_bytes));
        }

        Ok(())
    }

    fn validate_chunking(&self) -> Result<(), ConfigError> {
        let chunking = &self.chunking;

        if !(10..=2000).contains(&chunking.max_span_lines) {
            return Err(ConfigError::InvalidMaxSpanLines(chunking.max_span_lines));
        }

        if !(256..=65_536).contains(&chunking.max_span_bytes) {
            return Err(ConfigError::InvalidMaxSpanBytes(chunking.max_span_bytes));
        }

        if chunking.fallback_stride_lines <= chunking.fallback_overlap_lines {
            return Err(ConfigError::StrideNotAboveOverlap(
                chunking.fallback_stride_lines,
                chunking.fallback_overlap_lines,
            ));
        }

        Ok(())
    }

    /// Path for the SQLite metadata store.
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.base_dir.join("metadata.db")
    }

    /// Path for the vector store directory.
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.base_dir.join("vectors")
    }

    /// Path for the index header file.
    #[inline]
    pub fn header_path(&self) -> PathBuf {
        self.base_dir.join("index.header")
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        Ok(())
    }

    pub fn endpoint_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}
