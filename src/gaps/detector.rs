//! Finds the windows a dataset is missing against its expected calendar.

use crate::store::merge::Coverage;
use crate::types::dataset_kind::DatasetKind;
use crate::types::entity::Entity;
use crate::types::window::{contiguous_ranges, CollectionWindow, DateRange};
use chrono::{Days, NaiveDate};
use log::{debug, info};
use serde::Serialize;

/// Whether periods before the deep-history cutoff may be requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillMode {
    #[default]
    Incremental,
    /// Ignores the cutoff. Large backfills are expensive, so this has to be
    /// asked for explicitly.
    Forced,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GapReport {
    pub dataset_kind: Option<DatasetKind>,
    /// The calendar that was checked, after lag and cutoff clamping. `None`
    /// when nothing was left to check.
    pub expected: Option<DateRange>,
    pub windows: Vec<CollectionWindow>,
}

impl GapReport {
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn missing_days(&self) -> u64 {
        self.windows.iter().map(|w| w.range.len_days()).sum()
    }

    pub fn entities(&self) -> usize {
        let mut ids: Vec<&str> = self.windows.iter().map(|w| w.entity_id.as_str()).collect();
        ids.dedup();
        ids.len()
    }

    pub fn windows_for<'a>(
        &'a self,
        entity_id: &'a str,
    ) -> impl Iterator<Item = &'a CollectionWindow> + 'a {
        self.windows.iter().filter(move |w| w.entity_id == entity_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapDetector {
    today: NaiveDate,
    deep_history_cutoff: Option<NaiveDate>,
    mode: BackfillMode,
}

impl GapDetector {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            deep_history_cutoff: None,
            mode: BackfillMode::Incremental,
        }
    }

    pub fn with_cutoff(mut self, cutoff: Option<NaiveDate>) -> Self {
        self.deep_history_cutoff = cutoff;
        self
    }

    pub fn with_mode(mut self, mode: BackfillMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Last day the remote is expected to have complete data for.
    pub fn latest_available(&self, kind: DatasetKind) -> NaiveDate {
        self.today
            .checked_sub_days(Days::new(u64::from(kind.availability_lag_days())))
            .unwrap_or(NaiveDate::MIN)
    }

    /// First day that may be requested at all, given the cutoff, the mode and
    /// how much history the remote serves for `kind`.
    pub fn earliest_allowed(&self, kind: DatasetKind) -> NaiveDate {
        let mut floor = NaiveDate::MIN;
        if self.mode == BackfillMode::Incremental {
            if let Some(cutoff) = self.deep_history_cutoff {
                floor = floor.max(cutoff);
            }
        }
        if let Some(days) = kind.retrievable_history_days() {
            let horizon = self
                .today
                .checked_sub_days(Days::new(u64::from(days)))
                .unwrap_or(NaiveDate::MIN);
            floor = floor.max(horizon);
        }
        floor
    }

    /// Missing `(entity, day)` periods from `earliest` to `latest`, grouped
    /// into per-entity windows no wider than the kind's request limit.
    ///
    /// Confirmed-empty periods count as covered.
    pub fn detect(
        &self,
        coverage: &Coverage,
        entities: &[Entity],
        kind: DatasetKind,
        earliest: NaiveDate,
        latest: NaiveDate,
    ) -> GapReport {
        let clamped = DateRange::new(earliest, latest)
            .and_then(|r| r.intersect(self.earliest_allowed(kind), self.latest_available(kind)));
        let Some(expected) = clamped else {
            debug!(
                "Nothing to check for {} between {} and {}",
                kind, earliest, latest
            );
            return GapReport {
                dataset_kind: Some(kind),
                expected: None,
                windows: Vec::new(),
            };
        };

        let mut windows = Vec::new();
        for entity in entities {
            let missing = expected
                .days()
                .filter(|day| !coverage.is_covered(&entity.entity_id, *day));
            windows.extend(
                contiguous_ranges(missing, kind.max_window_days())
                    .into_iter()
                    .map(|range| CollectionWindow::new(entity.entity_id.clone(), kind, range)),
            );
        }
        let report = GapReport {
            dataset_kind: Some(kind),
            expected: Some(expected),
            windows,
        };
        info!(
            "{} gaps in {}: {} windows, {} entity-days across {} entities",
            kind,
            expected,
            report.windows.len(),
            report.missing_days(),
            report.entities()
        );
        report
    }
}
