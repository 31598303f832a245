//! Lock-guarded, deduplicating merge of fetched records into a persisted
//! dataset.

use crate::config::settings::LockSettings;
use crate::store::error::StoreError;
use crate::store::frame::{read_records, write_records_atomic};
use crate::store::ledger::{ledger_path, read_ledger, write_ledger, EmptyPeriods};
use crate::store::lock::DatasetLock;
use crate::store::summary::DatasetSummary;
use crate::types::dataset_kind::DatasetKind;
use crate::types::record::{default_precedence, DedupKey, Record};
use chrono::NaiveDate;
use log::{debug, info};
use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Records plus the periods confirmed empty by the same fetches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeBatch {
    pub records: Vec<Record>,
    pub confirmed_empty: Vec<(String, NaiveDate)>,
}

impl MergeBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.confirmed_empty.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn extend(&mut self, records: Vec<Record>, confirmed_empty: Vec<(String, NaiveDate)>) {
        self.records.extend(records);
        self.confirmed_empty.extend(confirmed_empty);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Records whose key was not in the dataset yet.
    pub added: usize,
    /// Stored records that lost to an incoming duplicate.
    pub replaced: usize,
    /// Incoming records that lost to (or equalled) what was stored.
    pub unchanged: usize,
    pub total_rows: usize,
    pub confirmed_empty_added: usize,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.added > 0 || self.replaced > 0 || self.confirmed_empty_added > 0
    }
}

/// Distinct `(entity, day)` periods a dataset already accounts for, either
/// through stored records or through the confirmed-empty ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coverage {
    pub with_data: BTreeSet<(String, NaiveDate)>,
    pub confirmed_empty: BTreeSet<(String, NaiveDate)>,
    /// Periods with data that was only ever fetched while the day was still
    /// running. They stay due until fetched again after the day closed.
    pub still_open: BTreeSet<(String, NaiveDate)>,
}

impl Coverage {
    pub fn from_records(records: &[Record], kind: DatasetKind, ledger: EmptyPeriods) -> Self {
        let mut last_fetched: BTreeMap<(String, NaiveDate), NaiveDate> = BTreeMap::new();
        for record in records {
            let fetched = record.fetched_at.date_naive();
            last_fetched
                .entry((record.entity_id.clone(), record.period(kind)))
                .and_modify(|latest| *latest = (*latest).max(fetched))
                .or_insert(fetched);
        }
        let still_open = if kind.covers_closed_days_only() {
            last_fetched
                .iter()
                .filter(|((_, day), fetched)| *fetched <= day)
                .map(|(period, _)| period.clone())
                .collect()
        } else {
            BTreeSet::new()
        };
        Self {
            with_data: last_fetched.into_keys().collect(),
            confirmed_empty: ledger,
            still_open,
        }
    }

    pub fn is_covered(&self, entity_id: &str, day: NaiveDate) -> bool {
        let key = (entity_id.to_string(), day);
        (self.with_data.contains(&key) && !self.still_open.contains(&key))
            || self.confirmed_empty.contains(&key)
    }

    /// Entity ids with at least one stored record.
    pub fn entities_with_data(&self) -> BTreeSet<&str> {
        self.with_data.iter().map(|(id, _)| id.as_str()).collect()
    }
}

/// The only writer of dataset files.
#[derive(Debug, Clone)]
pub struct MergeStore {
    data_dir: PathBuf,
    lock_timeout: Duration,
    poll_interval: Duration,
    stale_after: Duration,
}

impl MergeStore {
    pub fn new(data_dir: impl Into<PathBuf>, lock: &LockSettings) -> Self {
        Self {
            data_dir: data_dir.into(),
            lock_timeout: lock.timeout(),
            poll_interval: lock.poll_interval(),
            stale_after: lock.stale_after(),
        }
    }

    pub fn with_lock_timing(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.lock_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn dataset_path(&self, kind: DatasetKind) -> PathBuf {
        self.data_dir.join(kind.dataset_file_name())
    }

    /// Merges `batch` into `kind`'s dataset with the natural dedup key and
    /// the default precedence.
    pub async fn merge_kind(
        &self,
        kind: DatasetKind,
        batch: MergeBatch,
    ) -> Result<MergeReport, StoreError> {
        self.merge(
            &self.dataset_path(kind),
            batch,
            DedupKey::natural,
            default_precedence,
        )
        .await
    }

    /// Merges `batch` into the dataset at `dataset_path`.
    ///
    /// Holds the dataset lock for the whole read-merge-write cycle and
    /// replaces the file atomically. Records sharing a key collapse to the
    /// one `precedence` ranks highest (`Ordering::Greater` means the first
    /// argument wins). Replaying the same batch leaves the dataset as is.
    pub async fn merge<K, KF, PF>(
        &self,
        dataset_path: &Path,
        batch: MergeBatch,
        key_fn: KF,
        precedence: PF,
    ) -> Result<MergeReport, StoreError>
    where
        K: Ord + Send + 'static,
        KF: Fn(&Record) -> K + Send + 'static,
        PF: Fn(&Record, &Record) -> Ordering + Send + 'static,
    {
        let lock = DatasetLock::acquire_reclaiming(
            dataset_path,
            self.lock_timeout,
            self.poll_interval,
            self.stale_after,
        )
        .await?;
        let path = dataset_path.to_path_buf();
        let report = tokio::task::spawn_blocking(move || {
            let report = merge_locked(&path, batch, key_fn, precedence);
            drop(lock);
            report
        })
        .await??;
        info!(
            "Merged into {}: {} added, {} replaced, {} unchanged, {} rows, {} empty periods",
            dataset_path.display(),
            report.added,
            report.replaced,
            report.unchanged,
            report.total_rows,
            report.confirmed_empty_added
        );
        Ok(report)
    }

    /// Reads the dataset without locking. The file is only ever replaced
    /// atomically, so this sees a complete pre- or post-merge state.
    pub async fn load(&self, dataset_path: &Path) -> Result<Vec<Record>, StoreError> {
        let path = dataset_path.to_path_buf();
        tokio::task::spawn_blocking(move || read_records(&path)).await?
    }

    pub async fn coverage(
        &self,
        dataset_path: &Path,
        kind: DatasetKind,
    ) -> Result<Coverage, StoreError> {
        let path = dataset_path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let records = read_records(&path)?;
            let ledger = read_ledger(&ledger_path(&path))?;
            Ok(Coverage::from_records(&records, kind, ledger))
        })
        .await?
    }

    pub async fn summary(
        &self,
        kind: DatasetKind,
        today: NaiveDate,
        recent_days: u32,
    ) -> Result<DatasetSummary, StoreError> {
        let records = self.load(&self.dataset_path(kind)).await?;
        Ok(DatasetSummary::from_records(&records, kind, today, recent_days))
    }
}

fn merge_locked<K, KF, PF>(
    path: &Path,
    batch: MergeBatch,
    key_fn: KF,
    precedence: PF,
) -> Result<MergeReport, StoreError>
where
    K: Ord,
    KF: Fn(&Record) -> K,
    PF: Fn(&Record, &Record) -> Ordering,
{
    let existing = read_records(path)?;
    let existing_rows = existing.len();
    let stored = collapse(existing, &key_fn, &precedence);
    let incoming = collapse(batch.records, &key_fn, &precedence);

    let mut report = MergeReport::default();
    let mut merged = stored;
    for (key, record) in incoming {
        match merged.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                report.added += 1;
            }
            Entry::Occupied(mut slot) => {
                if precedence(&record, slot.get()) == Ordering::Greater {
                    slot.insert(record);
                    report.replaced += 1;
                } else {
                    report.unchanged += 1;
                }
            }
        }
    }
    report.total_rows = merged.len();

    if report.added > 0 || report.replaced > 0 || report.total_rows != existing_rows {
        let rows: Vec<Record> = merged.into_values().collect();
        write_records_atomic(path, &rows)?;
    } else {
        debug!("{} unchanged, skipping rewrite", path.display());
    }

    if !batch.confirmed_empty.is_empty() {
        let ledger_file = ledger_path(path);
        let mut ledger = read_ledger(&ledger_file)?;
        let before = ledger.len();
        ledger.extend(batch.confirmed_empty);
        report.confirmed_empty_added = ledger.len() - before;
        if report.confirmed_empty_added > 0 {
            write_ledger(&ledger_file, &ledger)?;
        }
    }
    Ok(report)
}

/// Groups records by key, keeping the highest ranked record of each group.
fn collapse<K, KF, PF>(records: Vec<Record>, key_fn: &KF, precedence: &PF) -> BTreeMap<K, Record>
where
    K: Ord,
    KF: Fn(&Record) -> K,
    PF: Fn(&Record, &Record) -> Ordering,
{
    let mut groups: BTreeMap<K, Record> = BTreeMap::new();
    for record in records {
        match groups.entry(key_fn(&record)) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => {
                if precedence(&record, slot.get()) == Ordering::Greater {
                    slot.insert(record);
                }
            }
        }
    }
    groups
}
