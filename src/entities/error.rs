use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EntityListError {
    #[error("Failed to read entity list '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Network request failed for {0}")]
    NetworkRequest(String, #[source] reqwest::Error),

    #[error("HTTP request failed for {url} with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
        #[source]
        source: reqwest::Error,
    },

    #[error("Entity list download or decompression failed")]
    DownloadIo(#[from] std::io::Error),

    #[error("Failed to parse entity list CSV")]
    CsvParse(#[source] PolarsError),

    #[error("Entity list has no column '{column}' (found: {available:?})")]
    MissingColumn {
        column: String,
        available: Vec<String>,
    },

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}
