//! Error types for the martview metadata store.

use thiserror::Error;

use crate::types::{OperationStatus, ViewKind};

/// Result type alias for metadata store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during metadata store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("view {name} is registered as {existing:?}, cannot re-register as {requested:?}")]
    KindMismatch {
        name: String,
        existing: ViewKind,
        requested: ViewKind,
    },

    #[error("invalid transition for log entry {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: u64,
        from: OperationStatus,
        to: OperationStatus,
    },
}
