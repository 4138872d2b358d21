//! Retrieval results and their text renderings

use crate::embedding::SearchResult;
use crate::ingest::Chunk;
use serde::Serialize;
use std::collections::HashSet;

/// Characters kept in a result preview
pub const PREVIEW_CHARS: usize = 200;

/// A chunk chosen by the retriever
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub entry_id: i64,
    pub chunk: Chunk,
    /// Raw cosine similarity to the query
    pub score: f32,
}

impl RetrievedChunk {
    pub fn source(&self) -> &str {
        self.chunk.source()
    }

    pub fn preview(&self) -> String {
        preview(&self.chunk.text, PREVIEW_CHARS)
    }
}

impl From<&SearchResult> for RetrievedChunk {
    fn from(result: &SearchResult) -> Self {
        Self {
            entry_id: result.entry.entry_id,
            chunk: result.entry.chunk.clone(),
            score: result.similarity,
        }
    }
}

/// Drop candidates repeating an earlier `(source, text)` pair
///
/// Input order is kept, so the most similar copy survives.
pub fn deduplicate(candidates: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen: HashSet<(String, String)> = HashSet::new();

    candidates
        .into_iter()
        .filter(|c| {
            seen.insert((
                c.entry.chunk.parent_source_id.clone(),
                c.entry.chunk.text.clone(),
            ))
        })
        .collect()
}

/// Text handed to a language model: one `[Source: ...]` block per result
pub fn render_context(results: &[RetrievedChunk]) -> String {
    results
        .iter()
        .map(|r| format!("[Source: {}]\n{}", r.source(), r.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `(source, preview)` pairs for display
pub fn previews(results: &[RetrievedChunk]) -> Vec<(String, String)> {
    results
        .iter()
        .map(|r| (r.source().to_string(), r.preview()))
        .collect()
}

/// First `max_chars` characters, with `...` appended when cut
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
