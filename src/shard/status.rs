//! Hand-off of shard reports to whoever tracks run status.
//!
//! Sinks are fire-and-forget from the coordinator's point of view: a failing
//! sink is logged and never changes the outcome of a run.

use crate::shard::report::ShardReport;
use async_trait::async_trait;
use log::info;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Failed to write status file '{0}'")]
    Write(PathBuf, #[source] std::io::Error),

    #[error("Failed to serialize shard report")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn report(&self, report: &ShardReport) -> Result<(), StatusError>;
}

/// Logs the report at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStatusSink;

#[async_trait]
impl StatusSink for LogStatusSink {
    async fn report(&self, report: &ShardReport) -> Result<(), StatusError> {
        info!("{}", report);
        Ok(())
    }
}

/// Writes each report as `<dir>/<kind>-shard-<index>.json`, replacing the
/// previous run's file.
#[derive(Debug, Clone)]
pub struct JsonStatusSink {
    dir: PathBuf,
}

impl JsonStatusSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, report: &ShardReport) -> PathBuf {
        self.dir.join(format!(
            "{}-shard-{}.json",
            report.dataset_kind, report.shard_index
        ))
    }
}

#[async_trait]
impl StatusSink for JsonStatusSink {
    async fn report(&self, report: &ShardReport) -> Result<(), StatusError> {
        let json = serde_json::to_vec_pretty(report)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StatusError::Write(self.dir.clone(), e))?;
        let path = self.path_for(report);
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| StatusError::Write(path.clone(), e))?;
        info!("Wrote shard status to {}", path.display());
        Ok(())
    }
}
