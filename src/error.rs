use std::path::PathBuf;
use thiserror::Error;

/// Main error type for knowbase
#[derive(Error, Debug)]
pub enum KnowbaseError {
    /// Embedding call failed or timed out
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Persistence layer cannot be created or opened
    #[error("Storage unavailable at {path}: {message}")]
    StorageUnavailable { path: PathBuf, message: String },

    /// Persisted data failed an integrity check
    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    /// Malformed caller input (note title/content, query parameters)
    #[error("Validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    /// Vector dimension does not match the collection
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KnowbaseError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for errors the caller may answer with a fallback (e.g. web search)
    pub fn is_retrieval_failure(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_)
                | Self::StorageUnavailable { .. }
                | Self::IndexCorrupted(_)
                | Self::Database(_)
        )
    }
}

impl From<rusqlite::Error> for KnowbaseError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase) => {
                Self::IndexCorrupted(err.to_string())
            }
            _ => Self::Database(err),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for knowbase operations
pub type Result<T> = std::result::Result<T, KnowbaseError>;
