//! Source database error types.

use std::path::PathBuf;

use thiserror::Error;

pub type SourceResult<T> = Result<T, SourceError>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open source database {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("no definition for view: {0}")]
    UnknownView(String),

    #[error("refusing unsafe identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("rebuild of {0} cancelled before commit")]
    Cancelled(String),

    #[error("source connection lock poisoned")]
    Poisoned,

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
