//! Date ranges and the per-entity windows that make up a fetch plan.

use crate::types::dataset_kind::DatasetKind;
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Returns `None` when `start` is after `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn len_days(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |day| *day <= self.end)
    }

    /// Splits the range into consecutive, non-overlapping sub-ranges of at
    /// most `max_days` days that together cover the whole range.
    pub fn split(&self, max_days: u32) -> Vec<DateRange> {
        let step = u64::from(max_days.max(1));
        let mut parts = Vec::with_capacity(self.len_days().div_ceil(step) as usize);
        let mut cursor = self.start;
        while cursor <= self.end {
            let last = cursor
                .checked_add_days(Days::new(step - 1))
                .map_or(self.end, |candidate| candidate.min(self.end));
            parts.push(DateRange {
                start: cursor,
                end: last,
            });
            match last.succ_opt() {
                Some(next) => cursor = next,
                None => break,
            }
        }
        parts
    }

    /// The part of the range inside `[floor, ceiling]`, or `None` if nothing is left.
    pub fn intersect(&self, floor: NaiveDate, ceiling: NaiveDate) -> Option<DateRange> {
        DateRange::new(self.start.max(floor), self.end.min(ceiling))
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}..{}", self.start, self.end)
        }
    }
}

/// Groups sorted, de-duplicated days into contiguous ranges of at most
/// `max_days` days each.
pub fn contiguous_ranges<I>(days: I, max_days: u32) -> Vec<DateRange>
where
    I: IntoIterator<Item = NaiveDate>,
{
    let mut runs: Vec<DateRange> = Vec::new();
    for day in days {
        match runs.last_mut() {
            Some(run) if run.end.succ_opt() == Some(day) => run.end = day,
            Some(run) if run.end >= day => {}
            _ => runs.push(DateRange::single(day)),
        }
    }
    runs.iter().flat_map(|run| run.split(max_days)).collect()
}

/// One entity, one dataset kind, one range of days.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionWindow {
    pub entity_id: String,
    pub dataset_kind: DatasetKind,
    pub range: DateRange,
}

impl CollectionWindow {
    pub fn new(entity_id: impl Into<String>, dataset_kind: DatasetKind, range: DateRange) -> Self {
        Self {
            entity_id: entity_id.into(),
            dataset_kind,
            range,
        }
    }
}

impl fmt::Display for CollectionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.dataset_kind, self.entity_id, self.range)
    }
}
