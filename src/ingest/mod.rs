//! Document ingestion: loading raw files and splitting them into chunks

pub mod document;
mod loader;
mod splitter;

pub use document::{Chunk, Document, SourceMetadata};
pub use loader::{load_document, DocumentLoader, LoadReport};
pub use splitter::{chunk, TextSplitter};
