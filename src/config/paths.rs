//! Documents/data directory layout and first-run bootstrap

use crate::error::{KnowbaseError, Result};
use std::path::{Path, PathBuf};

const VECTOR_INDEX_DIR: &str = "vector_index";
const DATABASE_FILE: &str = "knowbase.sqlite";

const README_TEXT: &str = "=== RESEARCH DOCUMENTS ===\n\n\
Place your research documents in this directory as plain text (.txt) files.\n\
They are indexed automatically the next time the assistant starts,\n\
or immediately with `knowbase index --force`.\n\n\
This file is never indexed.\n";

/// Resolved storage locations
#[derive(Debug, Clone)]
pub struct StoragePaths {
    documents_dir: PathBuf,
    data_dir: PathBuf,
    readme_file: String,
}

impl StoragePaths {
    pub fn new(documents_dir: PathBuf, data_dir: PathBuf, readme_file: String) -> Self {
        Self {
            documents_dir,
            data_dir,
            readme_file,
        }
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory holding the persisted collection
    pub fn vector_index_dir(&self) -> PathBuf {
        self.data_dir.join(VECTOR_INDEX_DIR)
    }

    pub fn database_path(&self) -> PathBuf {
        self.vector_index_dir().join(DATABASE_FILE)
    }

    pub fn readme_path(&self) -> PathBuf {
        self.documents_dir.join(&self.readme_file)
    }

    pub fn readme_file(&self) -> &str {
        &self.readme_file
    }

    /// Create missing directories and drop a guide file into an empty
    /// documents directory. Safe to call repeatedly.
    ///
    /// Returns true when the placeholder was written by this call.
    pub fn bootstrap(&self, extensions: &[String]) -> Result<bool> {
        for dir in [
            self.documents_dir.clone(),
            self.data_dir.clone(),
            self.vector_index_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| KnowbaseError::StorageUnavailable {
                path: dir.clone(),
                message: e.to_string(),
            })?;
        }

        let readme = self.readme_path();
        if readme.exists() || self.has_eligible_files(extensions)? {
            return Ok(false);
        }

        std::fs::write(&readme, README_TEXT).map_err(|e| KnowbaseError::Io {
            source: e,
            context: format!("Failed to write placeholder {}", readme.display()),
        })?;
        tracing::info!("Wrote document guide to {}", readme.display());

        Ok(true)
    }

    fn has_eligible_files(&self, extensions: &[String]) -> Result<bool> {
        let entries = std::fs::read_dir(&self.documents_dir).map_err(|e| KnowbaseError::Io {
            source: e,
            context: format!(
                "Failed to read documents directory {}",
                self.documents_dir.display()
            ),
        })?;

        Ok(entries
            .filter_map(|entry| entry.ok())
            .any(|entry| has_extension(&entry.path(), extensions)))
    }
}

/// Case-insensitive extension allow-list check
pub(crate) fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}
