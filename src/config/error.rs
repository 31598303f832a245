use std::path::PathBuf;
use thiserror::Error;

/// Invalid setup. Fatal to a run and never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Credential pool '{0}' is not configured")]
    UnknownPool(String),

    #[error("Credential pool '{0}' has no credentials")]
    EmptyPool(String),

    #[error("Invalid shard parameters: index {shard_index} with {shard_count} shards")]
    InvalidShard {
        shard_index: usize,
        shard_count: usize,
    },

    #[error("Retry bound must allow at least one attempt per window")]
    ZeroRetryBound,

    #[error("Invalid date range: {start} is after {end}")]
    InvalidRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("Failed to read config file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{0}'")]
    Parse(PathBuf, #[source] serde_json::Error),

    #[error("Failed to determine data directory")]
    DataDirResolution,

    #[error("Failed to create data directory '{0}'")]
    DataDirCreation(PathBuf, #[source] std::io::Error),
}
