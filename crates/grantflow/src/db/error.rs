//! Failures of the job and program store.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot create database directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema upgrade to v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A JSON column (detail page data, keyword lists) failed to round-trip.
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored value no longer parses into its domain type.
    #[error("Unreadable value in column '{column}': {reason}")]
    InvalidData { column: &'static str, reason: String },

    #[error("Job '{0}' already exists")]
    DuplicateJob(String),

    #[error("Store lock poisoned by a panicking thread")]
    LockPoisoned,
}
