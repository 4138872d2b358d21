//! Documents and the chunks produced from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata carried from a document onto each of its chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Path or identifier of the originating document
    pub source: String,

    /// File name component, when the source is a file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Last modification time of the source file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,

    /// BLAKE3 hex digest of the raw text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl SourceMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            file_name: None,
            modified_at: None,
            content_hash: None,
        }
    }
}

/// A raw document, immutable once loaded
#[derive(Debug, Clone)]
pub struct Document {
    pub source_id: String,
    pub raw_text: String,
    pub metadata: SourceMetadata,
}

impl Document {
    /// Create a document whose metadata only records its source
    pub fn new(source_id: impl Into<String>, raw_text: impl Into<String>) -> Self {
        let source_id = source_id.into();
        let raw_text = raw_text.into();
        let mut metadata = SourceMetadata::new(source_id.clone());
        metadata.content_hash = Some(blake3::hash(raw_text.as_bytes()).to_hex().to_string());

        Self {
            source_id,
            raw_text,
            metadata,
        }
    }

    pub fn with_metadata(mut self, metadata: SourceMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Length in characters
    pub fn char_len(&self) -> usize {
        self.raw_text.chars().count()
    }
}

/// A bounded substring of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub parent_source_id: String,
    /// Position of this chunk within its document
    pub chunk_index: usize,
    pub text: String,
    /// Start position in characters
    pub offset: usize,
    /// Length in characters
    pub length: usize,
    pub metadata: SourceMetadata,
}

impl Chunk {
    /// Source recorded in the chunk metadata
    pub fn source(&self) -> &str {
        &self.metadata.source
    }

    /// Character position one past the end of the chunk
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}
