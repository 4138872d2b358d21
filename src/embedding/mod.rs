/// Embedding and vector storage
///
/// - EmbeddingProvider trait with FastEmbed (local) and OpenAI (remote) backends
/// - Embedder runs providers off the async runtime with batching and deadlines
/// - VectorIndex persists embedded chunks and answers exact cosine queries
mod embedder;
mod provider;
mod vector_index;

pub use embedder::{Embedder, EmbedderOptions};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider, OpenAiEmbeddingProvider};
pub use vector_index::{cosine_similarity, IndexEntry, SearchResult, VectorIndex};
