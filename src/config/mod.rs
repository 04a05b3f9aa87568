// Configuration management module
// Handles TOML configuration loading, validation, and on-disk layout

pub mod settings;

pub use settings::{ConfigError, EmbeddingConfig, EngineConfig, IndexingConfig, RetrievalConfig};
