//! Telemetry store error taxonomy

use thiserror::Error;

/// Errors surfaced by the telemetry store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing SQLite file could not be opened (missing directory,
    /// permissions, disk full, corrupt header).
    #[error("telemetry store unavailable: {0}")]
    Unavailable(String),

    /// A migration failed to apply or left the schema in an unexpected state.
    #[error("schema migration failed: {0}")]
    SchemaMismatch(String),

    /// A foreign-key reference pointed at a row that does not exist.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Any other underlying SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON (de)serialisation of a stored payload failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
