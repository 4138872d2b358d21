//! Index lifecycle: lazy build-or-load, forced reloads, incremental adds
//!
//! The manager owns the `Uninitialized -> Built` transition. An async
//! mutex guards it, so concurrent first callers produce exactly one
//! ingestion pass and all of them observe the finished collection. Once
//! built, searches no longer touch that mutex; writes hold it only while
//! they commit, never while they embed.

use crate::config::{Config, StoragePaths};
use crate::embedding::{Embedder, VectorIndex};
use crate::error::{KnowbaseError, Result};
use crate::ingest::{Chunk, Document, DocumentLoader, TextSplitter};
use crate::storage::Database;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// Lifecycle of the managed collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Uninitialized,
    /// Built, but no documents were indexed
    Empty,
    Populated,
}

impl IndexState {
    pub fn is_built(&self) -> bool {
        !matches!(self, IndexState::Uninitialized)
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IndexState::Uninitialized => "uninitialized",
            IndexState::Empty => "built (empty)",
            IndexState::Populated => "built (populated)",
        };
        f.write_str(label)
    }
}

/// Outcome of an initialize or add call
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub state: IndexState,
    /// Entries in the collection afterwards
    pub entries: usize,
    /// Documents ingested by this call
    pub documents_indexed: usize,
    /// Documents this call could not load
    pub documents_skipped: usize,
}

/// Snapshot of the documents directory and the persisted index
#[derive(Debug, Clone, Serialize)]
pub struct ResearchStats {
    pub documents_dir: PathBuf,
    pub eligible_files: usize,
    pub pdf_files: usize,
    pub total_files: usize,
    pub index_path: PathBuf,
    pub index_exists: bool,
    pub index_size_bytes: u64,
    pub entries: usize,
    pub state: IndexState,
}

/// Owns the document collection and its build-once transition
pub struct IndexManager {
    paths: StoragePaths,
    collection_name: String,
    loader: DocumentLoader,
    splitter: TextSplitter,
    embedder: Embedder,
    database: Arc<Database>,
    collection: OnceCell<Arc<VectorIndex>>,
    phase: RwLock<IndexState>,
    // Held for the first build and while a write commits
    transition: Mutex<()>,
}

impl IndexManager {
    pub fn new(
        config: &Config,
        paths: StoragePaths,
        database: Arc<Database>,
        embedder: Embedder,
    ) -> Result<Self> {
        let loader = DocumentLoader::new(
            config.ingest.extensions.clone(),
            config.ingest.readme_file.clone(),
        );
        let splitter = TextSplitter::from_config(&config.chunking)?;

        Ok(Self {
            paths,
            collection_name: config.ingest.collection.clone(),
            loader,
            splitter,
            embedder,
            database,
            collection: OnceCell::new(),
            phase: RwLock::new(IndexState::Uninitialized),
            transition: Mutex::new(()),
        })
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub async fn state(&self) -> IndexState {
        self.phase()
    }

    /// Build or load the collection
    ///
    /// Without `force_reload` an already built collection is returned
    /// unchanged, and a persisted collection that was built before (even
    /// one left empty by a reset) is adopted as is. With it, the collection
    /// is rebuilt from the documents directory and swapped in atomically.
    /// Files that fail to load are skipped.
    pub async fn initialize(&self, force_reload: bool) -> Result<IndexStatus> {
        if force_reload {
            return self.reload().await;
        }

        let _transition = self.transition.lock().await;
        self.build_or_load().await
    }

    /// Build on first use; returns the collection handle
    pub async fn ensure_initialized(&self) -> Result<Arc<VectorIndex>> {
        if !self.phase().is_built() {
            let _transition = self.transition.lock().await;
            self.build_or_load().await?;
        }
        self.collection().await
    }

    /// Chunk, embed, and append documents to the collection
    ///
    /// Searches keep running against the previous contents until the new
    /// entries commit.
    pub async fn add_documents(&self, documents: Vec<Document>) -> Result<IndexStatus> {
        let collection = self.ensure_initialized().await?;

        let documents_indexed = documents.len();
        let items = self.embed_documents(&documents).await?;
        let added = items.len();

        let _transition = self.transition.lock().await;
        if !items.is_empty() {
            let writer = Arc::clone(&collection);
            run_blocking(move || writer.add(items)).await?;
        }

        let phase = phase_for(&collection);
        self.set_phase(phase);
        info!(
            "Added {} chunks from {} documents to {}",
            added, documents_indexed, self.collection_name
        );

        Ok(IndexStatus {
            state: phase,
            entries: collection.len(),
            documents_indexed,
            documents_skipped: 0,
        })
    }

    /// Load the given files and add them; unreadable or ineligible files are skipped
    pub async fn add_files(&self, paths: &[PathBuf]) -> Result<IndexStatus> {
        let (eligible, ineligible): (Vec<PathBuf>, Vec<PathBuf>) = paths
            .iter()
            .cloned()
            .partition(|path| self.loader.is_eligible(path));

        for path in &ineligible {
            warn!("Skipping {}: not an eligible document", path.display());
        }

        let report = self.loader.load_all(&eligible);
        let skipped = ineligible.len() + report.skipped.len();

        let mut status = self.add_documents(report.documents).await?;
        status.documents_skipped = skipped;
        Ok(status)
    }

    /// Drop every entry; the manager ends up built and empty, also after a restart
    pub async fn reset(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        let collection = self.collection().await?;

        run_blocking(move || collection.reset()).await?;

        self.set_phase(IndexState::Empty);
        info!("Collection {} reset", self.collection_name);
        Ok(())
    }

    /// Directory and index statistics
    pub async fn stats(&self) -> Result<ResearchStats> {
        let collection = self.collection().await?;

        let documents_dir = self.paths.documents_dir();
        let (eligible_files, pdf_files, total_files) = if documents_dir.is_dir() {
            let files = list_files(documents_dir)?;
            let pdf_files = files
                .iter()
                .filter(|path| crate::config::has_extension(path, &["pdf".to_string()]))
                .count();
            let eligible = files.iter().filter(|p| self.loader.is_eligible(p)).count();
            (eligible, pdf_files, files.len())
        } else {
            (0, 0, 0)
        };

        let index_path = self.database.path().to_path_buf();
        Ok(ResearchStats {
            documents_dir: documents_dir.to_path_buf(),
            eligible_files,
            pdf_files,
            total_files,
            index_exists: index_path.exists(),
            index_size_bytes: self.database.size_on_disk(),
            index_path,
            entries: collection.len(),
            state: self.phase(),
        })
    }

    fn phase(&self) -> IndexState {
        *self.phase.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: IndexState) {
        *self.phase.write().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// First build or adoption of the persisted collection; caller holds `transition`
    async fn build_or_load(&self) -> Result<IndexStatus> {
        let collection = self.collection().await?;

        if self.phase().is_built() {
            debug!("Collection {} already built", self.collection_name);
            return Ok(status_of(self.phase(), &collection));
        }

        if collection.is_built() || !collection.is_empty() {
            let phase = phase_for(&collection);
            self.set_phase(phase);
            info!(
                "Loaded existing collection {} ({} entries)",
                self.collection_name,
                collection.len()
            );
            return Ok(status_of(phase, &collection));
        }

        let start = Instant::now();
        let (items, documents_indexed, documents_skipped) = self.ingest_directory().await?;
        let chunk_count = items.len();

        let writer = Arc::clone(&collection);
        run_blocking(move || {
            writer.add(items)?;
            writer.mark_built()
        })
        .await?;

        let phase = phase_for(&collection);
        self.set_phase(phase);
        self.log_build(documents_indexed, documents_skipped, chunk_count, start);

        Ok(IndexStatus {
            state: phase,
            entries: collection.len(),
            documents_indexed,
            documents_skipped,
        })
    }

    /// Rebuild from the documents directory; embedding happens before the swap
    async fn reload(&self) -> Result<IndexStatus> {
        let collection = self.collection().await?;

        let start = Instant::now();
        let (items, documents_indexed, documents_skipped) = self.ingest_directory().await?;
        let chunk_count = items.len();

        let _transition = self.transition.lock().await;
        let writer = Arc::clone(&collection);
        run_blocking(move || writer.replace_all(items)).await?;

        let phase = phase_for(&collection);
        self.set_phase(phase);
        self.log_build(documents_indexed, documents_skipped, chunk_count, start);

        Ok(IndexStatus {
            state: phase,
            entries: collection.len(),
            documents_indexed,
            documents_skipped,
        })
    }

    /// Load and embed every eligible document; returns the items plus indexed/skipped counts
    async fn ingest_directory(&self) -> Result<(Vec<(Chunk, Vec<f32>)>, usize, usize)> {
        let documents_dir = self.paths.documents_dir().to_path_buf();
        info!(
            "Indexing {} into {}",
            documents_dir.display(),
            self.collection_name
        );

        let report = self.loader.load_dir(&documents_dir)?;
        let items = self.embed_documents(&report.documents).await?;
        Ok((items, report.documents.len(), report.skipped.len()))
    }

    fn log_build(&self, indexed: usize, skipped: usize, chunks: usize, start: Instant) {
        if indexed == 0 {
            info!("No documents to index; collection {} is empty", self.collection_name);
        } else {
            info!(
                "Indexed {} chunks from {} documents in {}ms ({} skipped)",
                chunks,
                indexed,
                start.elapsed().as_millis(),
                skipped
            );
        }
    }

    /// Open the persisted collection once per manager
    async fn collection(&self) -> Result<Arc<VectorIndex>> {
        let collection = self
            .collection
            .get_or_try_init(|| async {
                let database = Arc::clone(&self.database);
                let name = self.collection_name.clone();
                let dimension = self.embedder.dimension();
                let model = self.embedder.model_name().to_string();

                run_blocking(move || VectorIndex::open(database, &name, dimension, &model))
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(collection))
    }

    async fn embed_documents(&self, documents: &[Document]) -> Result<Vec<(Chunk, Vec<f32>)>> {
        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|document| {
                let chunks = self.splitter.chunk(document);
                debug!("{}: {} chunks", document.source_id, chunks.len());
                chunks
            })
            .collect();

        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_texts(texts).await?;

        Ok(chunks.into_iter().zip(embeddings).collect())
    }
}

fn phase_for(collection: &VectorIndex) -> IndexState {
    if collection.is_empty() {
        IndexState::Empty
    } else {
        IndexState::Populated
    }
}

fn status_of(phase: IndexState, collection: &VectorIndex) -> IndexStatus {
    IndexStatus {
        state: phase,
        entries: collection.len(),
        documents_indexed: 0,
        documents_skipped: 0,
    }
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| KnowbaseError::Io {
        source: e,
        context: format!("Failed to read documents directory {}", dir.display()),
    })?;

    Ok(entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect())
}

/// Run store work off the async runtime
async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| KnowbaseError::Other(anyhow::anyhow!("storage task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbedderOptions, EmbeddingError, EmbeddingProvider};
    use tempfile::TempDir;

    /// Two-dimensional embedding from letter counts
    struct VowelProvider;

    impl EmbeddingProvider for VowelProvider {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            let vowels = text.chars().filter(|c| "aeiou".contains(*c)).count() as f32;
            Ok(vec![vowels + 1.0, text.len() as f32])
        }

        fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "vowels"
        }
    }

    fn manager(temp: &TempDir) -> IndexManager {
        let config = Config::default();
        let paths = StoragePaths::new(
            temp.path().join("documents"),
            temp.path().join("data"),
            "README.txt".to_string(),
        );
        paths.bootstrap(&config.ingest.extensions).unwrap();

        let database = Arc::new(Database::new(&paths.database_path()).unwrap());
        let embedder = Embedder::new(Arc::new(VowelProvider), EmbedderOptions::default());
        IndexManager::new(&config, paths, database, embedder).unwrap()
    }

    #[tokio::test]
    async fn test_empty_directory_builds_empty() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        assert_eq!(manager.state().await, IndexState::Uninitialized);

        let status = manager.initialize(false).await.unwrap();
        assert_eq!(status.state, IndexState::Empty);
        assert_eq!(status.entries, 0);
        assert_eq!(status.documents_indexed, 0);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        std::fs::write(manager.paths().documents_dir().join("a.txt"), "alpha beta").unwrap();

        let first = manager.initialize(false).await.unwrap();
        let second = manager.initialize(false).await.unwrap();

        assert_eq!(first.state, IndexState::Populated);
        assert_eq!(first.entries, second.entries);
        assert_eq!(second.documents_indexed, 0);
    }

    #[tokio::test]
    async fn test_reset_leaves_built_empty() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        std::fs::write(manager.paths().documents_dir().join("a.txt"), "alpha").unwrap();
        manager.initialize(false).await.unwrap();

        manager.reset().await.unwrap();

        assert_eq!(manager.state().await, IndexState::Empty);
        let collection = manager.ensure_initialized().await.unwrap();
        assert!(collection.is_empty());
    }

    #[tokio::test]
    async fn test_reset_is_adopted_after_restart() {
        let temp = TempDir::new().unwrap();
        {
            let manager = manager(&temp);
            std::fs::write(manager.paths().documents_dir().join("a.txt"), "alpha").unwrap();
            manager.initialize(false).await.unwrap();
            manager.reset().await.unwrap();
        }

        let manager = manager(&temp);
        let status = manager.initialize(false).await.unwrap();

        assert_eq!(status.state, IndexState::Empty);
        assert_eq!(status.entries, 0);
        assert_eq!(status.documents_indexed, 0);
    }

    #[tokio::test]
    async fn test_add_files_skips_ineligible() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        let extra = temp.path().join("extra.txt");
        let binary = temp.path().join("image.png");
        std::fs::write(&extra, "added later").unwrap();
        std::fs::write(&binary, [0u8, 1, 2]).unwrap();

        let status = manager.add_files(&[extra, binary]).await.unwrap();

        assert_eq!(status.documents_indexed, 1);
        assert_eq!(status.documents_skipped, 1);
        assert_eq!(status.state, IndexState::Populated);
        assert_eq!(status.entries, 1);
    }

    #[tokio::test]
    async fn test_stats_counts_files() {
        let temp = TempDir::new().unwrap();
        let manager = manager(&temp);
        let dir = manager.paths().documents_dir().to_path_buf();
        std::fs::write(dir.join("notes.txt"), "text").unwrap();
        std::fs::write(dir.join("paper.pdf"), "%PDF").unwrap();

        let stats = manager.stats().await.unwrap();

        // README.txt from bootstrap counts toward the total only
        assert_eq!(stats.eligible_files, 1);
        assert_eq!(stats.pdf_files, 1);
        assert_eq!(stats.total_files, 3);
        assert!(stats.index_exists);
        assert_eq!(stats.entries, 0);
    }
}
