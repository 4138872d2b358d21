//! Process-wide handles built once at startup
//!
//! One `ResearchContext` owns the database, the index manager, the
//! retriever, and the note store. Callers pass it around instead of
//! relying on global state; tests build a fresh one per temp directory.

use crate::config::{Config, ConfigValidator, EmbeddingConfig, StoragePaths};
use crate::embedding::{
    Embedder, EmbedderOptions, EmbeddingProvider, FastEmbedProvider, OpenAiEmbeddingProvider,
};
use crate::error::{KnowbaseError, Result};
use crate::manager::IndexManager;
use crate::notes::NoteStore;
use crate::retrieval::Retriever;
use crate::storage::Database;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct ResearchContext {
    config: Config,
    paths: StoragePaths,
    database: Arc<Database>,
    manager: Arc<IndexManager>,
    retriever: Retriever,
    notes: NoteStore,
}

impl ResearchContext {
    /// Bootstrap the directories, open the store, and wire the components
    ///
    /// The collection itself is not built here; that happens on first use.
    pub fn open(config: Config, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        ConfigValidator::validate(&config)?;

        let paths = config.storage_paths()?;
        if paths.bootstrap(&config.ingest.extensions)? {
            info!(
                "Created document guide in {}",
                paths.documents_dir().display()
            );
        }

        let database = Arc::new(Database::new(&paths.database_path())?);
        let embedder = Embedder::new(provider, EmbedderOptions::from(&config.embedding));
        let manager = Arc::new(IndexManager::new(
            &config,
            paths.clone(),
            Arc::clone(&database),
            embedder,
        )?);
        let retriever = Retriever::new(Arc::clone(&manager), config.retrieval.clone());
        let notes = NoteStore::new(Arc::clone(&database));

        Ok(Self {
            config,
            paths,
            database,
            manager,
            retriever,
            notes,
        })
    }

    /// Like [`ResearchContext::open`], with the provider named in the config
    pub fn from_config(config: Config) -> Result<Self> {
        let provider = build_provider(&config.embedding)?;
        Self::open(config, provider)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn manager(&self) -> &Arc<IndexManager> {
        &self.manager
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn notes(&self) -> &NoteStore {
        &self.notes
    }
}

/// Instantiate the embedding provider selected by `config.provider`
pub fn build_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "fastembed" => Arc::new(FastEmbedProvider::new(&config.model)?),
        "openai" => Arc::new(OpenAiEmbeddingProvider::from_env(
            &config.api_key_env,
            &config.model,
            Duration::from_millis(config.timeout_ms),
        )?),
        other => {
            return Err(KnowbaseError::InvalidConfigValue {
                path: "embedding.provider".to_string(),
                message: format!("unknown provider '{}'", other),
            })
        }
    };

    info!(
        "Embedding provider {} ({}, {}D)",
        config.provider,
        provider.model_name(),
        provider.dimension()
    );
    Ok(provider)
}
