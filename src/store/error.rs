use polars::error::PolarsError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Timed out after {waited:?} waiting for lock '{path}'")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Failed to create lock file '{0}'")]
    LockIo(PathBuf, #[source] std::io::Error),

    #[error("I/O error on dataset file '{0}'")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to read parquet dataset '{0}'")]
    ParquetRead(PathBuf, #[source] PolarsError),

    #[error("Failed to write parquet dataset '{0}'")]
    ParquetWrite(PathBuf, #[source] PolarsError),

    #[error("Dataset '{path}' has an invalid value in column '{column}': {message}")]
    InvalidColumn {
        path: PathBuf,
        column: &'static str,
        message: String,
    },

    #[error("Failed to decode confirmed-empty ledger '{0}'")]
    LedgerDecode(PathBuf, #[source] Box<bincode::error::DecodeError>),

    #[error("Failed to encode confirmed-empty ledger")]
    LedgerEncode(#[source] Box<bincode::error::EncodeError>),

    #[error("Failed to move temporary file into place at '{0}'")]
    Persist(PathBuf, #[source] std::io::Error),

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}
