//! Directory scanning and plain-text document loading

use crate::config::has_extension;
use crate::error::{KnowbaseError, Result};
use crate::ingest::document::{Document, SourceMetadata};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Outcome of loading a set of files
#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<Document>,
    /// Files that could not be read or decoded, with the reason
    pub skipped: Vec<(PathBuf, String)>,
}

/// Finds and loads eligible documents
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    extensions: Vec<String>,
    excluded_file: String,
}

impl DocumentLoader {
    pub fn new(extensions: Vec<String>, excluded_file: impl Into<String>) -> Self {
        Self {
            extensions,
            excluded_file: excluded_file.into(),
        }
    }

    /// Eligible files directly inside `dir`, sorted by path
    pub fn scan(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(dir).map_err(|e| KnowbaseError::Io {
            source: e,
            context: format!("Failed to read documents directory {}", dir.display()),
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && self.is_eligible(path))
            .collect();
        files.sort();

        debug!("Found {} eligible files in {}", files.len(), dir.display());
        Ok(files)
    }

    /// Extension allow-list minus the bootstrap placeholder
    pub fn is_eligible(&self, path: &Path) -> bool {
        let excluded = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.eq_ignore_ascii_case(&self.excluded_file))
            .unwrap_or(false);

        !excluded && has_extension(path, &self.extensions)
    }

    /// Load every file, skipping (and logging) the ones that fail
    pub fn load_all(&self, paths: &[PathBuf]) -> LoadReport {
        let mut report = LoadReport::default();

        for path in paths {
            match load_document(path) {
                Ok(document) => report.documents.push(document),
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    report.skipped.push((path.clone(), e.to_string()));
                }
            }
        }

        report
    }

    /// Scan `dir` and load what it contains
    pub fn load_dir(&self, dir: &Path) -> Result<LoadReport> {
        let paths = self.scan(dir)?;
        Ok(self.load_all(&paths))
    }
}

/// Read a UTF-8 text file into a document
pub fn load_document(path: &Path) -> Result<Document> {
    let bytes = std::fs::read(path).map_err(|e| KnowbaseError::Io {
        source: e,
        context: format!("Failed to read {}", path.display()),
    })?;

    let raw_text = String::from_utf8(bytes).map_err(|e| KnowbaseError::Io {
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        context: format!("{} is not valid UTF-8", path.display()),
    })?;

    let source = path.display().to_string();
    let modified_at = std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from);

    let metadata = SourceMetadata {
        source: source.clone(),
        file_name: path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string),
        modified_at,
        content_hash: Some(blake3::hash(raw_text.as_bytes()).to_hex().to_string()),
    };

    Ok(Document::new(source, raw_text).with_metadata(metadata))
}
