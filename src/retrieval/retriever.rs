//! Query embedding, nearest-neighbor search, and MMR diversification

use super::mmr::mmr_select;
use super::results::{deduplicate, RetrievedChunk};
use super::Query;
use crate::config::RetrievalConfig;
use crate::error::{KnowbaseError, Result};
use crate::manager::IndexManager;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Diversified search over the managed collection
///
/// The first search builds the collection if nobody has yet. Searches
/// run in parallel with each other; dropping the future abandons the query.
#[derive(Clone)]
pub struct Retriever {
    manager: Arc<IndexManager>,
    defaults: RetrievalConfig,
}

impl Retriever {
    pub fn new(manager: Arc<IndexManager>, defaults: RetrievalConfig) -> Self {
        Self { manager, defaults }
    }

    pub fn defaults(&self) -> &RetrievalConfig {
        &self.defaults
    }

    /// Search with the configured `k`, `fetch_k`, and lambda
    pub async fn search(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        self.retrieve(query, self.defaults.k, self.defaults.fetch_k)
            .await
    }

    /// Up to `k` chunks chosen by MMR from the `fetch_k` nearest candidates
    ///
    /// An empty collection yields `Ok(vec![])`.
    pub async fn retrieve(&self, query: &str, k: usize, fetch_k: usize) -> Result<Vec<RetrievedChunk>> {
        self.retrieve_query(&Query {
            text: query.to_string(),
            k,
            fetch_k,
            lambda: self.defaults.lambda,
        })
        .await
    }

    pub async fn retrieve_query(&self, query: &Query) -> Result<Vec<RetrievedChunk>> {
        query.validate()?;
        if query.k == 0 || query.fetch_k == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let collection = self.manager.ensure_initialized().await?;
        if collection.is_empty() {
            debug!("Collection is empty, nothing to search");
            return Ok(Vec::new());
        }

        let embedding = self.manager.embedder().embed_query(&query.text).await?;
        let candidates = deduplicate(collection.search(&embedding, query.fetch_k)?);

        let picks = mmr_select(&candidates, query.k, query.lambda);
        let results: Vec<RetrievedChunk> = picks
            .into_iter()
            .map(|i| RetrievedChunk::from(&candidates[i]))
            .collect();

        debug!(
            "Retrieved {} of {} candidates in {}ms",
            results.len(),
            candidates.len(),
            start.elapsed().as_millis()
        );

        Ok(results)
    }
}

impl Query {
    fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(KnowbaseError::validation("query", "must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.lambda) {
            return Err(KnowbaseError::validation(
                "lambda",
                format!("must be between 0 and 1, got {}", self.lambda),
            ));
        }
        Ok(())
    }
}
