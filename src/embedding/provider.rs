/// Embedding provider trait with local (FastEmbed) and remote (OpenAI) backends
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;

use crate::error::KnowbaseError;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Provider request failed: {0}")]
    RequestError(String),
}

impl From<EmbeddingError> for KnowbaseError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::DimensionMismatch { expected, actual } => {
                KnowbaseError::DimensionMismatch { expected, actual }
            }
            EmbeddingError::InvalidInput(message) => KnowbaseError::validation("text", message),
            other => KnowbaseError::ProviderUnavailable(other.to_string()),
        }
    }
}

/// Trait for embedding providers
///
/// Maps text to a fixed-length vector. Implementations must be
/// deterministic for a fixed model version.
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Generate embeddings for multiple texts, one per input, in input order
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// FastEmbed provider for local embedding generation
///
/// Uses all-MiniLM-L6-v2 model (384 dimensions) by default.
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Create a new FastEmbed provider with the specified model
    ///
    /// Models are downloaded on first use and cached locally:
    /// - all-MiniLM-L6-v2: 90MB (384 dims)
    /// - bge-small-en-v1.5: 130MB (384 dims)
    /// - bge-base-en-v1.5: 440MB (768 dims)
    pub fn new(model_name: &str) -> Result<Self, EmbeddingError> {
        let (embedding_model, dimension) = match model_name {
            "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
            "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
            "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
            _ => {
                return Err(EmbeddingError::InitializationError(format!(
                    "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                    model_name
                )));
            }
        };

        tracing::info!(
            "Initializing embedding model: {} ({}D)",
            model_name,
            dimension
        );

        let init_options = InitOptions::new(embedding_model).with_show_download_progress(true);

        let model = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
            dimension,
        })
    }

    /// Create provider with default model (all-MiniLM-L6-v2)
    pub fn with_default_model() -> Result<Self, EmbeddingError> {
        Self::new("all-MiniLM-L6-v2")
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::GenerationError("No embeddings generated".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.is_empty()) {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        let embeddings = self
            .model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        check_batch(&embeddings, texts.len(), self.dimension)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Remote provider calling the OpenAI embeddings endpoint
///
/// Default model is `text-embedding-3-small` (1536 dims). Each request
/// carries a timeout so a stalled endpoint surfaces as an error.
pub struct OpenAiEmbeddingProvider {
    api_key: String,
    model_name: String,
    dimension: usize,
    endpoint: String,
    timeout: Duration,
    // Created on first request, which always runs on the blocking pool
    client: OnceLock<reqwest::blocking::Client>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingProvider {
    pub fn new(
        api_key: impl Into<String>,
        model_name: &str,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(EmbeddingError::InitializationError(
                "API key must not be empty".to_string(),
            ));
        }

        let dimension = match model_name {
            "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
            "text-embedding-3-large" => 3072,
            _ => {
                return Err(EmbeddingError::InitializationError(format!(
                    "Unsupported model: {}. Supported: text-embedding-3-small, text-embedding-3-large, text-embedding-ada-002",
                    model_name
                )));
            }
        };

        Ok(Self {
            api_key,
            model_name: model_name.to_string(),
            dimension,
            endpoint: OPENAI_EMBEDDINGS_URL.to_string(),
            timeout,
            client: OnceLock::new(),
        })
    }

    /// Read the key from the named environment variable
    pub fn from_env(
        api_key_env: &str,
        model_name: &str,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let api_key = std::env::var(api_key_env).map_err(|_| {
            EmbeddingError::InitializationError(format!(
                "Environment variable {} is not set",
                api_key_env
            ))
        })?;
        Self::new(api_key, model_name, timeout)
    }

    /// Point at a compatible endpoint instead of api.openai.com
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Shared HTTP client, reused across batches
    fn client(&self) -> Result<&reqwest::blocking::Client, EmbeddingError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| EmbeddingError::RequestError(e.to_string()))?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::GenerationError("API returned no data".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.is_empty()) {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        tracing::debug!(
            model = %self.model_name,
            batch_size = texts.len(),
            "requesting embeddings"
        );

        let response = self
            .client()?
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model_name,
                input: texts,
            })
            .send()
            .map_err(|e| EmbeddingError::RequestError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbeddingError::RequestError(format!(
                "API returned {}: {}",
                status, body
            )));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| EmbeddingError::GenerationError(format!("bad response: {}", e)))?;
        parsed.data.sort_by_key(|d| d.index);

        let embeddings: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        check_batch(&embeddings, texts.len(), self.dimension)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// One embedding per input, each of the provider's dimension
fn check_batch(
    embeddings: &[Vec<f32>],
    expected_count: usize,
    dimension: usize,
) -> Result<(), EmbeddingError> {
    if embeddings.len() != expected_count {
        return Err(EmbeddingError::GenerationError(format!(
            "Embedding count mismatch: expected {}, got {}",
            expected_count,
            embeddings.len()
        )));
    }

    for embedding in embeddings {
        if embedding.len() != dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: embedding.len(),
            });
        }
    }

    Ok(())
}
