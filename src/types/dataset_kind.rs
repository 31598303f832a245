//! Defines the kinds of datasets the harvester collects and the per-kind
//! constants that drive request sizing, calendars and file naming.

use crate::types::entity::EntityKind;
use crate::types::record::SourceTag;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of dataset being harvested.
///
/// Each kind is persisted to its own Parquet file and has its own calendar
/// semantics (how far back data exists, how far behind "now" the remote lags,
/// and how wide a single request may be).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// Hourly conventional observations reported by weather stations.
    Observation,
    /// Daily climatological values per station (daily means, extremes, totals).
    DailyClimatology,
    /// Daily forecasts issued per municipality.
    Forecast,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 3] = [
        DatasetKind::Observation,
        DatasetKind::DailyClimatology,
        DatasetKind::Forecast,
    ];

    pub(crate) fn path_segment(&self) -> &'static str {
        match self {
            DatasetKind::Observation => "observation",
            DatasetKind::DailyClimatology => "daily_climatology",
            DatasetKind::Forecast => "forecast",
        }
    }

    /// File name of the persisted dataset inside the data directory.
    pub(crate) fn dataset_file_name(&self) -> String {
        format!("{}.parquet", self.path_segment())
    }

    /// Maximum number of days a single remote request may span.
    pub fn max_window_days(&self) -> u32 {
        match self {
            DatasetKind::Observation => 1,
            DatasetKind::DailyClimatology => 30,
            DatasetKind::Forecast => 1,
        }
    }

    /// How many days behind today the remote publishes complete data.
    pub fn availability_lag_days(&self) -> u32 {
        match self {
            DatasetKind::Observation => 0,
            DatasetKind::DailyClimatology => 4,
            DatasetKind::Forecast => 0,
        }
    }

    /// How many days before today the remote still serves, or `None` when the
    /// whole history can be requested.
    ///
    /// Conventional observations only cover the trailing 24 hours and
    /// forecasts can only be collected on the day they are issued.
    pub fn retrievable_history_days(&self) -> Option<u32> {
        match self {
            DatasetKind::Observation => Some(1),
            DatasetKind::DailyClimatology => None,
            DatasetKind::Forecast => Some(0),
        }
    }

    /// Whether a day with data only counts as collected once it was fetched
    /// after the day ended. Hourly observations keep arriving all day.
    pub fn covers_closed_days_only(&self) -> bool {
        matches!(self, DatasetKind::Observation)
    }

    /// Number of entities a shard fetches between two store checkpoints.
    pub fn default_checkpoint_every(&self) -> usize {
        match self {
            DatasetKind::Observation => 25,
            DatasetKind::DailyClimatology => 5,
            DatasetKind::Forecast => 50,
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        match self {
            DatasetKind::Observation | DatasetKind::DailyClimatology => EntityKind::Station,
            DatasetKind::Forecast => EntityKind::Municipality,
        }
    }

    /// Provenance tag stamped on every record decoded for this kind.
    pub fn source_tag(&self) -> SourceTag {
        match self {
            DatasetKind::Observation => SourceTag::Observation,
            DatasetKind::DailyClimatology => SourceTag::Climatology,
            DatasetKind::Forecast => SourceTag::Forecast,
        }
    }

    /// Whether the issue time is part of the natural dedup key.
    pub fn keys_on_issue_time(&self) -> bool {
        matches!(self, DatasetKind::Forecast)
    }
}

/// Allows formatting a `DatasetKind` using its path segment.
///
/// # Examples
///
/// ```
/// use aemet_harvest::DatasetKind;
///
/// assert_eq!(DatasetKind::DailyClimatology.to_string(), "daily_climatology");
/// ```
impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path_segment())
    }
}

impl FromStr for DatasetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "observation" | "hourly" => Ok(DatasetKind::Observation),
            "daily_climatology" | "daily" | "climatology" => Ok(DatasetKind::DailyClimatology),
            "forecast" => Ok(DatasetKind::Forecast),
            other => Err(format!("unknown dataset kind '{other}'")),
        }
    }
}
