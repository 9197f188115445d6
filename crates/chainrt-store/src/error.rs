//! Store-level error type: a flat enum over not-found / already-exists /
//! db / codec / other, converting into [`chainrt_core::CoreError`] at the
//! crate boundary so callers above the store only ever pattern-match on
//! the core taxonomy.

use chainrt_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("database error: {0}")]
    DbError(String),
    #[error("serialization error: {0}")]
    CodecError(String),
    #[error("not owner: lease held by a different leaser")]
    NotOwner,
    #[error("max rows reached for {0}")]
    MaxRowsReached(String),
    #[error("{0}")]
    Other(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::DbError(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::CodecError(err.to_string())
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => CoreError::NotFound(msg),
            StoreError::AlreadyExists(msg) => CoreError::Constraint(msg),
            StoreError::Constraint(msg) => CoreError::Constraint(msg),
            StoreError::DbError(msg) => CoreError::Concurrency(msg),
            StoreError::CodecError(msg) => CoreError::Validation(msg),
            StoreError::NotOwner => CoreError::Constraint("not owner".to_string()),
            StoreError::MaxRowsReached(table) => CoreError::Capacity(table),
            StoreError::Other(msg) => CoreError::Concurrency(msg),
        }
    }
}
