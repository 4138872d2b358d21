//! Retrieval over the document collection
//!
//! Candidates come from an exact nearest-neighbor search, are collapsed on
//! identical text, and are re-ranked with Maximal Marginal Relevance.

mod mmr;
mod results;
mod retriever;

pub use mmr::mmr_select;
pub use results::{deduplicate, preview, previews, render_context, RetrievedChunk, PREVIEW_CHARS};
pub use retriever::Retriever;

use serde::{Deserialize, Serialize};

/// A single search request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    /// Results wanted
    pub k: usize,
    /// Candidates considered
    pub fetch_k: usize,
    /// Relevance/diversity trade-off, 1.0 is plain top-k
    pub lambda: f32,
}

impl Query {
    pub fn new(text: impl Into<String>, k: usize, fetch_k: usize, lambda: f32) -> Self {
        Self {
            text: text.into(),
            k,
            fetch_k,
            lambda,
        }
    }
}
