use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{KnowbaseError, Result, ValidationError};

/// Providers the embedding layer knows how to build
pub const SUPPORTED_PROVIDERS: [&str; 2] = ["fastembed", "openai"];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_ingest(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(KnowbaseError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.documents_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.documents_dir",
                "Documents directory cannot be empty",
            ));
        }

        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.embedding.provider;
        if !SUPPORTED_PROVIDERS.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    SUPPORTED_PROVIDERS, provider
                ),
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.max_concurrent == 0 {
            errors.push(ValidationError::new(
                "embedding.max_concurrent",
                "Concurrency limit must be greater than 0",
            ));
        }

        if config.embedding.timeout_ms == 0 {
            errors.push(ValidationError::new(
                "embedding.timeout_ms",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;

        if chunking.chunk_size == 0 {
            errors.push(ValidationError::new(
                "chunking.chunk_size",
                "Chunk size must be greater than 0",
            ));
        }

        if chunking.chunk_overlap >= chunking.chunk_size {
            errors.push(ValidationError::new(
                "chunking.chunk_overlap",
                format!(
                    "Overlap ({}) must be smaller than chunk size ({})",
                    chunking.chunk_overlap, chunking.chunk_size
                ),
            ));
        }

        if chunking.separators.is_empty() {
            errors.push(ValidationError::new(
                "chunking.separators",
                "At least one separator is required",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.k == 0 {
            errors.push(ValidationError::new(
                "retrieval.k",
                "k must be greater than 0",
            ));
        }

        if retrieval.fetch_k < retrieval.k {
            errors.push(ValidationError::new(
                "retrieval.fetch_k",
                format!(
                    "fetch_k ({}) must be at least k ({})",
                    retrieval.fetch_k, retrieval.k
                ),
            ));
        }

        if !(0.0..=1.0).contains(&retrieval.lambda) {
            errors.push(ValidationError::new(
                "retrieval.lambda",
                format!("Lambda must be between 0.0 and 1.0, got {}", retrieval.lambda),
            ));
        }
    }

    fn validate_ingest(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.ingest.extensions.is_empty() {
            errors.push(ValidationError::new(
                "ingest.extensions",
                "At least one file extension is required",
            ));
        }

        if config.ingest.collection.trim().is_empty() {
            errors.push(ValidationError::new(
                "ingest.collection",
                "Collection name cannot be empty",
            ));
        }
    }
}
