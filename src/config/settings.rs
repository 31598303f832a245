//! Harvester configuration: a JSON file with defaults for every field, plus an
//! environment overlay for credential pools.

use crate::config::error::ConfigError;
use crate::credentials::pool::normalize_pool_name;
use crate::types::dataset_kind::DatasetKind;
use crate::utils::get_data_dir;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables with this prefix define credential pools, e.g.
/// `AEMET_HARVEST_POOL_SHARD1=key-a,key-b`.
pub const POOL_ENV_PREFIX: &str = "AEMET_HARVEST_POOL_";

pub const DEFAULT_BASE_URL: &str = "https://opendata.aemet.es/opendata";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts per sub-window, including the first one.
    pub max_retries: u32,
    pub backoff_secs: u64,
    pub exponential: bool,
    pub max_backoff_secs: u64,
    pub jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_secs: 5,
            exponential: true,
            max_backoff_secs: 120,
            jitter_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// A lock file older than this is treated as left behind by a killed
    /// process and reclaimed.
    pub stale_after_secs: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            poll_interval_ms: 1000,
            stale_after_secs: 3600,
        }
    }
}

impl LockSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Where datasets, ledgers and status files live. Defaults to the
    /// platform data directory.
    pub data_dir: Option<PathBuf>,
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Credential pools by name.
    pub pools: BTreeMap<String, Vec<String>>,
    pub retry: RetrySettings,
    pub lock: LockSettings,
    /// Entities fetched between two checkpoints. Falls back to the dataset
    /// kind's default when unset.
    pub checkpoint_every: Option<usize>,
    /// Entities fetched concurrently inside one shard.
    pub entity_concurrency: usize,
    /// Days before this date are only re-requested with a forced backfill.
    pub deep_history_cutoff: Option<NaiveDate>,
    /// First day of each dataset's expected calendar.
    pub start_dates: BTreeMap<DatasetKind, NaiveDate>,
    /// Entities in the reference list that the remote is known not to serve.
    pub expected_absent: BTreeSet<String>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 60,
            pools: BTreeMap::new(),
            retry: RetrySettings::default(),
            lock: LockSettings::default(),
            checkpoint_every: None,
            entity_concurrency: 1,
            deep_history_cutoff: None,
            start_dates: BTreeMap::new(),
            expected_absent: BTreeSet::new(),
        }
    }
}

impl HarvestConfig {
    /// Reads a JSON config file and applies the environment overlay.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        let config: HarvestConfig =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        Ok(config.with_env_pools(std::env::vars()))
    }

    /// Defaults plus the environment overlay, for runs without a config file.
    pub fn from_env() -> Self {
        HarvestConfig::default().with_env_pools(std::env::vars())
    }

    /// Adds or replaces pools from `AEMET_HARVEST_POOL_<NAME>` variables.
    /// Pool names are normalized like every other pool lookup.
    pub fn with_env_pools<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(POOL_ENV_PREFIX) else {
                continue;
            };
            let keys: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
            self.pools.insert(normalize_pool_name(name), keys);
        }
        self
    }

    pub fn resolve_data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => get_data_dir(),
        }
    }

    pub fn start_date(&self, kind: DatasetKind) -> NaiveDate {
        if let Some(date) = self.start_dates.get(&kind) {
            return *date;
        }
        match kind {
            DatasetKind::DailyClimatology => NaiveDate::from_ymd_opt(2013, 1, 1),
            DatasetKind::Observation | DatasetKind::Forecast => NaiveDate::from_ymd_opt(2024, 1, 1),
        }
        .unwrap_or_default()
    }

    pub fn checkpoint_every(&self, kind: DatasetKind) -> usize {
        self.checkpoint_every
            .unwrap_or_else(|| kind.default_checkpoint_every())
            .max(1)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
