//! Configuration management for knowbase
//!
//! Handles loading, environment overrides, and validation of the TOML
//! configuration, plus resolution of the documents and data directories.

use crate::error::{KnowbaseError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod paths;
mod validator;

pub(crate) use paths::has_extension;
pub use paths::StoragePaths;
pub use validator::ConfigValidator;

/// Current configuration schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Fixed name of the document collection
pub const DEFAULT_COLLECTION: &str = "base_conocimientos";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// User-supplied documents to index
    pub documents_dir: PathBuf,
    /// Generated data; the collection lives in `<data_dir>/vector_index`
    pub data_dir: PathBuf,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "fastembed" (local) or "openai"
    pub provider: String,
    pub model: String,
    pub batch_size: usize,
    pub max_concurrent: usize,
    /// Per-call deadline for the provider
    pub timeout_ms: u64,
    /// Environment variable holding the API key for remote providers
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "fastembed".to_string(),
            model: "all-MiniLM-L6-v2".to_string(),
            batch_size: 32,
            max_concurrent: 4,
            timeout_ms: 30_000,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters shared by adjacent chunks
    pub chunk_overlap: usize,
    /// Separator priority list; "" means character-level
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            separators: ["\n\n", "\n", ". ", " ", ""]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results returned after diversification
    pub k: usize,
    /// Nearest-neighbor candidates considered
    pub fetch_k: usize,
    /// Relevance/diversity trade-off (1.0 = pure relevance)
    pub lambda: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 4,
            fetch_k: 10,
            lambda: 0.5,
        }
    }
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Eligible file extensions, without the dot
    pub extensions: Vec<String>,
    /// Placeholder file written on bootstrap and never indexed
    pub readme_file: String,
    pub collection: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["txt".to_string()],
            readme_file: "README.txt".to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KnowbaseError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| KnowbaseError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load an explicit config file, or the default one when present,
    /// falling back to built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = Self::default_path()?;
        if default_path.exists() {
            return Self::load(&default_path);
        }

        tracing::debug!("No config file at {:?}, using defaults", default_path);
        let mut config = Self::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KnowbaseError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| KnowbaseError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: KNOWBASE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("KNOWBASE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DOCUMENTS_DIR" => {
                self.storage.documents_dir = PathBuf::from(value);
            }
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "EMBEDDING__PROVIDER" => {
                self.embedding.provider = value.to_string();
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "RETRIEVAL__LAMBDA" => {
                self.retrieval.lambda =
                    value.parse().map_err(|_| KnowbaseError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as a number", value),
                    })?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            KnowbaseError::Config("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("knowbase").join("config.toml"))
    }

    /// Resolve the storage directories, expanding `~`
    pub fn storage_paths(&self) -> Result<StoragePaths> {
        Ok(StoragePaths::new(
            expand_path(&self.storage.documents_dir)?,
            expand_path(&self.storage.data_dir)?,
            self.ingest.readme_file.clone(),
        ))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                documents_dir: PathBuf::from("documents"),
                data_dir: PathBuf::from("data"),
            },
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| KnowbaseError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| KnowbaseError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
