use crate::types::dataset_kind::DatasetKind;
use crate::types::window::CollectionWindow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Outcome of one shard run, handed to the status sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShardReport {
    pub dataset_kind: DatasetKind,
    pub shard_index: usize,
    pub shard_count: usize,
    pub pool_name: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub entities_attempted: usize,
    /// Entities with at least one fetched record.
    pub entities_with_records: usize,
    pub records_fetched: usize,
    pub requests_issued: u32,
    pub failed_windows: Vec<CollectionWindow>,
    pub merges_succeeded: usize,
    pub merges_failed: usize,
    /// Records still buffered because their last merge attempt failed.
    pub records_unmerged: usize,
    pub rows_after_last_merge: Option<usize>,
}

impl ShardReport {
    pub fn new(dataset_kind: DatasetKind, shard_index: usize, shard_count: usize, pool_name: &str) -> Self {
        Self {
            dataset_kind,
            shard_index,
            shard_count,
            pool_name: pool_name.to_string(),
            started_at: Utc::now(),
            duration_secs: 0.0,
            entities_attempted: 0,
            entities_with_records: 0,
            records_fetched: 0,
            requests_issued: 0,
            failed_windows: Vec::new(),
            merges_succeeded: 0,
            merges_failed: 0,
            records_unmerged: 0,
            rows_after_last_merge: None,
        }
    }

    /// Process exit status for this shard.
    ///
    /// Partial success exits 0, since later gap-driven runs close what is
    /// left. A shard that had work but never merged anything exits 1.
    pub fn exit_code(&self) -> i32 {
        if self.merges_succeeded > 0 {
            return 0;
        }
        let had_failures = self.merges_failed > 0 || !self.failed_windows.is_empty();
        if self.entities_attempted > 0 && had_failures {
            1
        } else {
            0
        }
    }
}

impl fmt::Display for ShardReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} shard {}/{} ({}): {} entities ({} with data), {} records, {} requests, {} failed windows, {} merges ok, {} failed, {:.1}s",
            self.dataset_kind,
            self.shard_index,
            self.shard_count,
            self.pool_name,
            self.entities_attempted,
            self.entities_with_records,
            self.records_fetched,
            self.requests_issued,
            self.failed_windows.len(),
            self.merges_succeeded,
            self.merges_failed,
            self.duration_secs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::window::DateRange;
    use chrono::NaiveDate;

    #[test]
    fn test_exit_code_policy() {
        let mut report = ShardReport::new(DatasetKind::Forecast, 0, 1, "main");
        assert_eq!(report.exit_code(), 0, "nothing to do");

        report.entities_attempted = 3;
        report.failed_windows.push(CollectionWindow::new(
            "08019",
            DatasetKind::Forecast,
            DateRange::single(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
        ));
        assert_eq!(report.exit_code(), 1, "work but no merge");

        report.merges_succeeded = 1;
        assert_eq!(report.exit_code(), 0, "partial success");
    }
}
