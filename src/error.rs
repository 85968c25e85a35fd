//! Error types for the tagcabinet engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store schema version {found} is newer than engine version {expected}")]
    SchemaVersion { found: i64, expected: i64 },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
