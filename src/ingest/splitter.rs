//! Recursive character splitter
//!
//! Text is broken into pieces using the first separator in a priority
//! list; pieces that are still too long are broken again with the next
//! separator, down to single characters when `""` is in the list. Pieces
//! are then packed greedily into chunks of at most `chunk_size`
//! characters. Every chunk after the first starts exactly `chunk_overlap`
//! characters before the end of its predecessor, so the overlap may cut
//! through a piece.
//!
//! Pieces are broken down until they fit in `chunk_size - chunk_overlap`
//! characters, not `chunk_size`, so every piece still fits after the
//! overlap prefix. Paragraphs close to `chunk_size` are therefore split at
//! finer separators than their length alone would require.
//!
//! All positions and lengths are counted in characters, not bytes.

use crate::config::ChunkingConfig;
use crate::error::{KnowbaseError, Result};
use crate::ingest::document::{Chunk, Document};
use std::ops::Range;

/// Splits documents into overlapping chunks
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    /// Create a splitter; the overlap must be smaller than the chunk size
    pub fn new(chunk_size: usize, chunk_overlap: usize, separators: Vec<String>) -> Result<Self> {
        if chunk_size == 0 {
            return Err(KnowbaseError::validation(
                "chunk_size",
                "must be greater than 0",
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(KnowbaseError::validation(
                "chunk_overlap",
                format!(
                    "must be smaller than chunk_size ({} >= {})",
                    chunk_overlap, chunk_size
                ),
            ));
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(
            config.chunk_size,
            config.chunk_overlap,
            config.separators.clone(),
        )
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split a document into ordered chunks inheriting its metadata
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = &document.raw_text;
        let index = CharIndex::new(text);

        self.split_spans(text)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, span)| Chunk {
                parent_source_id: document.source_id.clone(),
                chunk_index,
                text: text[index.byte(span.start)..index.byte(span.end)].to_string(),
                offset: span.start,
                length: span.end - span.start,
                metadata: document.metadata.clone(),
            })
            .collect()
    }

    /// Split raw text, returning the chunk texts only
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let index = CharIndex::new(text);
        self.split_spans(text)
            .into_iter()
            .map(|span| text[index.byte(span.start)..index.byte(span.end)].to_string())
            .collect()
    }

    /// Character ranges of each chunk
    pub fn split_spans(&self, text: &str) -> Vec<Range<usize>> {
        let index = CharIndex::new(text);
        let total = index.char_len();

        if total == 0 {
            return Vec::new();
        }
        if total <= self.chunk_size {
            return vec![0..total];
        }

        // Pieces no longer than this always fit after an overlap prefix
        let piece_limit = self.chunk_size - self.chunk_overlap;
        let mut boundaries = Vec::new();
        collect_boundaries(
            text,
            0..text.len(),
            &self.separators,
            piece_limit,
            &index,
            &mut boundaries,
        );

        self.pack(&boundaries, total)
    }

    /// Greedily pack pieces (given by their end positions) into chunks
    fn pack(&self, boundaries: &[usize], total: usize) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        let mut start = 0;

        loop {
            let first_after = boundaries.partition_point(|&b| b <= start);
            let fit = boundaries.partition_point(|&b| b <= start + self.chunk_size);

            let mut end = if fit > first_after {
                boundaries[fit - 1]
            } else {
                // indivisible piece longer than chunk_size
                boundaries[first_after]
            };

            // Without character-level splitting a chunk may not reach past
            // its own overlap prefix; extend it so the next one advances.
            if end < total && end - start <= self.chunk_overlap {
                let past_overlap = boundaries.partition_point(|&b| b <= start + self.chunk_overlap);
                end = boundaries[past_overlap];
            }

            spans.push(start..end);

            if end >= total {
                break;
            }
            start = end - self.chunk_overlap;
        }

        spans
    }
}

/// Chunk a document with explicit parameters
pub fn chunk(
    document: &Document,
    chunk_size: usize,
    chunk_overlap: usize,
    separators: &[&str],
) -> Result<Vec<Chunk>> {
    let separators = separators.iter().map(|s| s.to_string()).collect();
    Ok(TextSplitter::new(chunk_size, chunk_overlap, separators)?.chunk(document))
}

/// Push the end position (in characters) of every piece of `range`
fn collect_boundaries(
    text: &str,
    range: Range<usize>,
    separators: &[String],
    limit: usize,
    index: &CharIndex,
    out: &mut Vec<usize>,
) {
    let start = index.char_pos(range.start);
    let end = index.char_pos(range.end);

    if end - start <= limit {
        out.push(end);
        return;
    }

    let Some((separator, rest)) = separators.split_first() else {
        out.push(end);
        return;
    };

    if separator.is_empty() {
        out.extend(start + 1..=end);
        return;
    }

    let mut piece_start = range.start;
    for (pos, matched) in text[range.clone()].match_indices(separator.as_str()) {
        let piece_end = range.start + pos + matched.len();
        collect_boundaries(text, piece_start..piece_end, rest, limit, index, out);
        piece_start = piece_end;
    }
    if piece_start < range.end {
        collect_boundaries(text, piece_start..range.end, rest, limit, index, out);
    }
}

/// Byte offsets of every character, for char/byte conversion
struct CharIndex {
    starts: Vec<usize>,
    byte_len: usize,
}

impl CharIndex {
    fn new(text: &str) -> Self {
        Self {
            starts: text.char_indices().map(|(i, _)| i).collect(),
            byte_len: text.len(),
        }
    }

    fn char_len(&self) -> usize {
        self.starts.len()
    }

    fn char_pos(&self, byte: usize) -> usize {
        self.starts.partition_point(|&b| b < byte)
    }

    fn byte(&self, char_pos: usize) -> usize {
        self.starts.get(char_pos).copied().unwrap_or(self.byte_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_separators() -> Vec<String> {
        ["\n\n", "\n", ". ", " ", ""]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn splitter(size: usize, overlap: usize) -> TextSplitter {
        TextSplitter::new(size, overlap, default_separators()).unwrap()
    }

    #[test]
    fn test_sentence_example() {
        let doc = Document::new("cats.txt", "Cats are mammals. Cats purr.");
        let chunks = splitter(20, 5).chunk(&doc);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "Cats are mammals. ");
        assert_eq!(chunks[1].text, "als. Cats purr.");
        assert!(chunks.iter().all(|c| c.length <= 20));
        assert_eq!(chunks[0].end() - chunks[1].offset, 5);
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[1].source(), "cats.txt");
    }

    #[test]
    fn test_empty_document() {
        let doc = Document::new("empty.txt", "");
        assert!(splitter(20, 5).chunk(&doc).is_empty());
    }

    #[test]
    fn test_short_document_is_single_chunk() {
        let doc = Document::new("short.txt", "Just a line.");
        let chunks = splitter(1000, 200).chunk(&doc);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Just a line.");
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[0].length, 12);
    }

    #[test]
    fn test_paragraph_boundaries_preferred() {
        let text = format!("{}\n\n{}", "a".repeat(40), "b".repeat(40));
        let chunks = splitter(60, 10).split_text(&text);

        assert_eq!(chunks[0], format!("{}\n\n", "a".repeat(40)));
        assert!(chunks[1].ends_with(&"b".repeat(40)));
    }

    #[test]
    fn test_long_word_split_at_character_level() {
        let text = "x".repeat(50);
        let spans = splitter(20, 5).split_spans(&text);

        assert_eq!(spans.first().unwrap().start, 0);
        assert_eq!(spans.last().unwrap().end, 50);
        for span in &spans {
            assert!(span.end - span.start <= 20);
        }
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end - pair[1].start, 5);
        }
    }

    #[test]
    fn test_multibyte_characters_counted_as_chars() {
        let text = "ñandú come maíz. ".repeat(10);
        let splitter = splitter(30, 6);
        let chunks = splitter.chunk(&Document::new("aves.txt", text.clone()));

        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 30);
            assert_eq!(chunk.text.chars().count(), chunk.length);
        }
        let last = chunks.last().unwrap();
        assert_eq!(last.end(), text.chars().count());
    }

    #[test]
    fn test_indivisible_unit_may_exceed_chunk_size() {
        let separators = vec![" ".to_string()];
        let splitter = TextSplitter::new(10, 2, separators).unwrap();
        let spans = splitter.split_spans("tiny supercalifragilistic end");

        assert_eq!(spans.last().unwrap().end, 29);
        assert!(spans.iter().any(|s| s.end - s.start > 10));
        for pair in spans.windows(2) {
            assert!(pair[1].start > pair[0].start);
            assert!(pair[1].start <= pair[0].end);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Sentence one. Sentence two.\nAnother line here.\n\nNew paragraph. ".repeat(30);
        let splitter = splitter(100, 20);

        assert_eq!(splitter.split_spans(&text), splitter.split_spans(&text));
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        assert!(TextSplitter::new(10, 10, default_separators()).is_err());
        assert!(TextSplitter::new(0, 0, default_separators()).is_err());
    }

    #[test]
    fn test_free_function_contract() {
        let doc = Document::new("cats.txt", "Cats are mammals. Cats purr.");
        let chunks = chunk(&doc, 20, 5, &["\n\n", "\n", ". ", " ", ""]).unwrap();
        assert!(chunks.len() >= 2);
    }
}
