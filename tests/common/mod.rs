//! Shared fixtures for integration tests
#![allow(dead_code)]

use knowbase::config::Config;
use knowbase::embedding::{EmbeddingError, EmbeddingProvider};
use knowbase::ResearchContext;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DIM: usize = 1024;

/// Deterministic bag-of-words embedding: each lowercase word hashes to a
/// bucket, and the counts are L2-normalized. Texts sharing words are similar.
pub struct HashingProvider;

impl HashingProvider {
    fn vectorize(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = blake3::hash(word.to_lowercase().as_bytes());
            let bytes = hash.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]) as usize
                % DIM;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl EmbeddingProvider for HashingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(Self::vectorize(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| Self::vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "hashing-bow"
    }
}

/// Hashing provider that records how many texts it embedded
#[derive(Default)]
pub struct CountingProvider {
    pub texts: AtomicUsize,
    pub delay: Duration,
}

impl CountingProvider {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            texts: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn count(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

impl EmbeddingProvider for CountingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.texts.fetch_add(1, Ordering::SeqCst);
        Ok(HashingProvider::vectorize(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        std::thread::sleep(self.delay);
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "hashing-bow"
    }
}

/// Hashing provider that stalls on any batch containing `marker`
pub struct StallingProvider {
    pub marker: &'static str,
    pub delay: Duration,
}

impl EmbeddingProvider for StallingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(HashingProvider::vectorize(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.iter().any(|t| t.contains(self.marker)) {
            std::thread::sleep(self.delay);
        }
        Ok(texts.iter().map(|t| HashingProvider::vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "hashing-bow"
    }
}

/// Provider whose endpoint is down
pub struct FailingProvider;

impl EmbeddingProvider for FailingProvider {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::RequestError("connection refused".to_string()))
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::RequestError("connection refused".to_string()))
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "hashing-bow"
    }
}

/// Config rooted in `root`, with small chunks so short test files split
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage.documents_dir = root.join("documents");
    config.storage.data_dir = root.join("data");
    config.chunking.chunk_size = 120;
    config.chunking.chunk_overlap = 20;
    config
}

pub fn open_context(root: &Path, provider: Arc<dyn EmbeddingProvider>) -> ResearchContext {
    ResearchContext::open(test_config(root), provider).unwrap()
}

pub fn write_document(root: &Path, name: &str, text: &str) -> PathBuf {
    let path = root.join("documents").join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, text).unwrap();
    path
}

pub const ML_TEXT: &str = "Machine learning builds models from data. \
Neural networks are layered models trained with gradient descent. \
Deep neural networks power modern speech and vision systems.";

pub const PASTA_TEXT: &str = "Cooking pasta starts with a large pot of salted boiling water. \
Stir the spaghetti, taste it often, and drain it while still al dente.";
