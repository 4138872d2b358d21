//! Knowbase - local document indexing and retrieval
//!
//! Turns a directory of plain-text documents into overlapping chunks,
//! embeds them, keeps them in a persistent vector collection, and answers
//! queries with a diversity-aware selection (Maximal Marginal Relevance).

pub mod cli;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod manager;
pub mod notes;
pub mod retrieval;
pub mod storage;

pub use context::ResearchContext;
pub use error::{KnowbaseError, Result};
pub use manager::{IndexManager, IndexState, IndexStatus, ResearchStats};
