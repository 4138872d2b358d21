/// Async embedding front-end: batching, bounded concurrency, and deadlines
use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{KnowbaseError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Tuning for an [`Embedder`]
#[derive(Debug, Clone)]
pub struct EmbedderOptions {
    /// Number of texts sent to the provider in one call
    pub batch_size: usize,
    /// Maximum provider calls in flight
    pub max_concurrent: usize,
    /// Deadline for a single provider call
    pub timeout: Duration,
}

impl Default for EmbedderOptions {
    fn default() -> Self {
        Self::from(&EmbeddingConfig::default())
    }
}

impl From<&EmbeddingConfig> for EmbedderOptions {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_concurrent: config.max_concurrent.max(1),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

/// Runs a blocking [`EmbeddingProvider`] from async code
///
/// Provider calls execute on the blocking pool. A call that outlives the
/// deadline is reported as `ProviderUnavailable`.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    options: EmbedderOptions,
    semaphore: Arc<Semaphore>,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, options: EmbedderOptions) -> Self {
        let semaphore = Arc::new(Semaphore::new(options.max_concurrent.max(1)));
        Self {
            provider,
            options,
            semaphore,
        }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed a search query
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_texts(vec![text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| KnowbaseError::ProviderUnavailable("no embedding returned".to_string()))
    }

    /// Embed many texts; the output order matches the input order
    pub async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let total = texts.len();
        let batches: Vec<Vec<String>> = texts
            .chunks(self.options.batch_size)
            .map(|batch| batch.to_vec())
            .collect();
        let batch_count = batches.len();

        let mut tasks = JoinSet::new();
        for (position, batch) in batches.into_iter().enumerate() {
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&self.semaphore);
            let timeout = self.options.timeout;

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| KnowbaseError::ProviderUnavailable(e.to_string()))?;
                let embeddings = run_batch(provider, batch, timeout).await?;
                Ok::<_, KnowbaseError>((position, embeddings))
            });
        }

        let mut ordered: Vec<Option<Vec<Vec<f32>>>> = vec![None; batch_count];
        while let Some(joined) = tasks.join_next().await {
            let (position, embeddings) = joined
                .map_err(|e| KnowbaseError::ProviderUnavailable(format!("embedding task failed: {}", e)))??;
            debug!("Embedded batch {} ({} texts)", position, embeddings.len());
            ordered[position] = Some(embeddings);
        }

        let mut result = Vec::with_capacity(total);
        for embeddings in ordered.into_iter().flatten() {
            result.extend(embeddings);
        }

        if result.len() != total {
            return Err(KnowbaseError::ProviderUnavailable(format!(
                "Embedding count mismatch: expected {}, got {}",
                total,
                result.len()
            )));
        }

        let dimension = self.dimension();
        if let Some(bad) = result.iter().find(|e| e.len() != dimension) {
            return Err(KnowbaseError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }

        if let Some(position) = result.iter().position(|e| e.iter().any(|v| !v.is_finite())) {
            return Err(KnowbaseError::ProviderUnavailable(format!(
                "provider returned a non-finite embedding for text {}",
                position
            )));
        }

        if total > 1 {
            info!(
                "Embedded {} texts in {} batches, {}ms",
                total,
                batch_count,
                start.elapsed().as_millis()
            );
        }

        Ok(result)
    }
}

/// One provider call on the blocking pool, bounded by `timeout`
async fn run_batch(
    provider: Arc<dyn EmbeddingProvider>,
    texts: Vec<String>,
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    let task = tokio::task::spawn_blocking(move || provider.embed_batch(&texts));

    match tokio::time::timeout(timeout, task).await {
        Err(_) => Err(KnowbaseError::ProviderUnavailable(format!(
            "embedding call timed out after {}ms",
            timeout.as_millis()
        ))),
        Ok(Err(join_error)) => Err(KnowbaseError::ProviderUnavailable(format!(
            "embedding task failed: {}",
            join_error
        ))),
        Ok(Ok(result)) => result.map_err(KnowbaseError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Encodes the text length so ordering can be checked
    struct LengthProvider {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl LengthProvider {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
            }
        }
    }

    impl EmbeddingProvider for LengthProvider {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Ok(vec![text.len() as f32, 1.0])
        }

        fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "length"
        }
    }

    fn options(batch_size: usize, timeout: Duration) -> EmbedderOptions {
        EmbedderOptions {
            batch_size,
            max_concurrent: 3,
            timeout,
        }
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let provider = Arc::new(LengthProvider::new(Duration::ZERO));
        let embedder = Embedder::new(provider.clone(), options(2, Duration::from_secs(5)));

        let texts: Vec<String> = (1..=7).map(|n| "x".repeat(n)).collect();
        let embeddings = embedder.embed_texts(texts).await.unwrap();

        let lengths: Vec<f32> = embeddings.iter().map(|e| e[0]).collect();
        assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_empty_input_skips_provider() {
        let provider = Arc::new(LengthProvider::new(Duration::ZERO));
        let embedder = Embedder::new(provider.clone(), options(2, Duration::from_secs(5)));

        assert!(embedder.embed_texts(Vec::new()).await.unwrap().is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    struct NanProvider;

    impl EmbeddingProvider for NanProvider {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            if text.contains("broken") {
                Ok(vec![f32::NAN, 1.0])
            } else {
                Ok(vec![1.0, 0.0])
            }
        }

        fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "nan"
        }
    }

    #[tokio::test]
    async fn test_non_finite_embedding_is_rejected() {
        let embedder = Embedder::new(Arc::new(NanProvider), options(2, Duration::from_secs(5)));

        assert!(embedder.embed_query("fine").await.is_ok());

        let texts = vec!["fine".to_string(), "broken".to_string()];
        let result = embedder.embed_texts(texts).await;
        assert!(matches!(result, Err(KnowbaseError::ProviderUnavailable(_))));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let provider = Arc::new(LengthProvider::new(Duration::from_millis(300)));
        let embedder = Embedder::new(provider, options(8, Duration::from_millis(20)));

        let result = embedder.embed_query("slow").await;
        assert!(matches!(result, Err(KnowbaseError::ProviderUnavailable(_))));
    }
}
