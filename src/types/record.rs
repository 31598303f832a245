//! The unit of harvested data and the rules deciding when two records
//! describe the same fact.

use crate::types::dataset_kind::DatasetKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Provenance of a record.
///
/// The declaration order is also the precedence order used when two records
/// share a dedup key: later variants outrank earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// A forecast value. Always outranked by measured data for the same key.
    Forecast,
    /// A value aggregated locally from station observations.
    StationAggregated,
    /// A direct station observation.
    Observation,
    /// An official daily climatological value.
    Climatology,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Forecast => "forecast",
            SourceTag::StationAggregated => "station_aggregated",
            SourceTag::Observation => "observation",
            SourceTag::Climatology => "climatology",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forecast" => Ok(SourceTag::Forecast),
            "station_aggregated" => Ok(SourceTag::StationAggregated),
            "observation" => Ok(SourceTag::Observation),
            "climatology" => Ok(SourceTag::Climatology),
            other => Err(format!("unknown source tag '{other}'")),
        }
    }
}

/// One retrieved measurement or forecast point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub entity_id: String,
    /// Point in time the value refers to. Daily values sit at midnight.
    pub timestamp: NaiveDateTime,
    /// Canonical variable name, e.g. `temp_mean`.
    pub variable: String,
    /// `None` when the source reported the variable without a usable value.
    pub value: Option<f64>,
    pub fetched_at: DateTime<Utc>,
    pub source_tag: SourceTag,
    /// When the forecast was issued. Only set for forecast records.
    pub issued_at: Option<DateTime<Utc>>,
}

impl Record {
    /// The calendar day this record covers for gap detection purposes.
    ///
    /// Forecast datasets are tracked by the day the forecast was issued, all
    /// others by the day the value refers to.
    pub fn period(&self, kind: DatasetKind) -> NaiveDate {
        match (kind.keys_on_issue_time(), self.issued_at) {
            (true, Some(issued)) => issued.date_naive(),
            _ => self.timestamp.date(),
        }
    }
}

/// Identifies "the same fact" across repeated fetches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DedupKey {
    pub entity_id: String,
    pub timestamp: NaiveDateTime,
    pub variable: String,
    pub issued_at: Option<DateTime<Utc>>,
}

impl DedupKey {
    /// The natural key: entity, timestamp, variable and, for forecasts, the
    /// issue time.
    pub fn natural(record: &Record) -> Self {
        Self {
            entity_id: record.entity_id.clone(),
            timestamp: record.timestamp,
            variable: record.variable.clone(),
            issued_at: record.issued_at,
        }
    }

    /// Ignores the issue time so that forecasts and measured data for the same
    /// entity, timestamp and variable collapse into one row.
    pub fn per_period(record: &Record) -> Self {
        Self {
            entity_id: record.entity_id.clone(),
            timestamp: record.timestamp,
            variable: record.variable.clone(),
            issued_at: None,
        }
    }
}

/// Default precedence between two records sharing a dedup key.
///
/// Returns `Ordering::Greater` when `a` should survive. Source priority is
/// decided first, then non-null over null, then the most recent fetch. The
/// remaining comparisons only make the order total, which keeps the merge
/// result independent of the order records arrive in.
pub fn default_precedence(a: &Record, b: &Record) -> Ordering {
    a.source_tag
        .cmp(&b.source_tag)
        .then_with(|| a.value.is_some().cmp(&b.value.is_some()))
        .then_with(|| a.fetched_at.cmp(&b.fetched_at))
        .then_with(|| match (a.value, b.value) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => Ordering::Equal,
        })
        .then_with(|| a.issued_at.cmp(&b.issued_at))
        .then_with(|| a.timestamp.cmp(&b.timestamp))
        .then_with(|| a.entity_id.cmp(&b.entity_id))
        .then_with(|| a.variable.cmp(&b.variable))
}
