//! Storage layer for knowbase
//!
//! A single SQLite database holds every persisted collection and the notes

pub mod database;

pub use database::{Database, DbPool, DbStats};
