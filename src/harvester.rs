//! Main entry point: wires configuration, credential pools, the HTTP client
//! and the dataset store together, and exposes runs, gap reports, coverage
//! audits and dataset summaries as builder-style methods.

use crate::client::endpoint::ApiLayout;
use crate::client::rate_limited::RateLimitedClient;
use crate::client::transport::{ApiTransport, HttpTransport};
use crate::config::error::ConfigError;
use crate::config::settings::HarvestConfig;
use crate::credentials::pool::CredentialPool;
use crate::entities::reference_list::{load_entities, EntitySource};
use crate::error::HarvestError;
use crate::fetch::policy::FetchPolicy;
use crate::fetch::windowed::WindowedFetcher;
use crate::gaps::audit::{audit_coverage, CoverageAudit};
use crate::gaps::detector::{BackfillMode, GapDetector, GapReport};
use crate::shard::coordinator::ShardCoordinator;
use crate::shard::partition::ShardSpec;
use crate::shard::report::ShardReport;
use crate::shard::status::JsonStatusSink;
use crate::store::merge::MergeStore;
use crate::store::summary::DatasetSummary;
use crate::types::dataset_kind::DatasetKind;
use crate::types::entity::Entity;
use crate::types::window::DateRange;
use crate::utils::ensure_dir_exists;
use bon::bon;
use chrono::{NaiveDate, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const STATUS_DIR_NAME: &str = "status";
const DEFAULT_SUMMARY_DAYS: u32 = 7;

/// Harvests AEMET datasets into deduplicated Parquet files.
///
/// Create one with [`Harvester::new()`] to use the default data directory and
/// credential pools from the environment, or [`Harvester::with_config()`] for
/// an explicit [`HarvestConfig`].
///
/// # Examples
///
/// ```no_run
/// # use aemet_harvest::{DatasetKind, Entity, Harvester, HarvestError};
/// # async fn run() -> Result<(), HarvestError> {
/// let harvester = Harvester::new().await?;
/// let stations = vec![Entity::station("0076"), Entity::station("3195")];
///
/// // Fetch whatever daily values are missing for this shard's stations.
/// let report = harvester
///     .run_shard()
///     .dataset(DatasetKind::DailyClimatology)
///     .entities(&stations)
///     .pool("shard0")
///     .shard_index(0)
///     .shard_count(4)
///     .call()
///     .await?;
/// println!("{report}");
/// # Ok(())
/// # }
/// ```
pub struct Harvester<T: ApiTransport = HttpTransport> {
    config: HarvestConfig,
    data_dir: PathBuf,
    pools: Arc<CredentialPool>,
    transport: Arc<T>,
    store: MergeStore,
}

impl Harvester<HttpTransport> {
    /// Uses defaults plus `AEMET_HARVEST_POOL_<NAME>` environment pools.
    pub async fn new() -> Result<Self, HarvestError> {
        Self::with_config(HarvestConfig::from_env()).await
    }

    /// Uses `config` and a `reqwest` transport with the configured timeout.
    /// The data directory is created if needed.
    pub async fn with_config(config: HarvestConfig) -> Result<Self, HarvestError> {
        let transport = HttpTransport::new(config.request_timeout())?;
        Self::with_transport(config, transport).await
    }
}

#[bon]
impl<T: ApiTransport + 'static> Harvester<T> {
    pub async fn with_transport(config: HarvestConfig, transport: T) -> Result<Self, HarvestError> {
        let data_dir = config.resolve_data_dir()?;
        ensure_dir_exists(&data_dir).await?;
        let pools = Arc::new(CredentialPool::from_keys(
            config.pools.iter().map(|(name, keys)| (name, keys.iter())),
        ));
        let store = MergeStore::new(&data_dir, &config.lock);
        Ok(Self {
            config,
            data_dir,
            pools,
            transport: Arc::new(transport),
            store,
        })
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn store(&self) -> &MergeStore {
        &self.store
    }

    pub fn dataset_path(&self, kind: DatasetKind) -> PathBuf {
        self.store.dataset_path(kind)
    }

    /// Loads a reference list of entities for `dataset` from a local path or
    /// URL. `id_column` defaults to the entity kind's usual column.
    #[builder]
    pub async fn entities(
        &self,
        dataset: DatasetKind,
        source: &str,
        id_column: Option<&str>,
    ) -> Result<Vec<Entity>, HarvestError> {
        let entities =
            load_entities(&EntitySource::parse(source), dataset.entity_kind(), id_column).await?;
        Ok(entities)
    }

    /// Runs one shard.
    ///
    /// # Arguments
    ///
    /// * `.dataset(DatasetKind)`: **Required.**
    /// * `.entities(&[Entity])`: **Required.** The full reference list. The
    ///   shard picks its own share.
    /// * `.pool(&str)`: **Required.** Credential pool reserved for this shard.
    /// * `.shard_index(usize)` / `.shard_count(usize)`: Default to a single
    ///   shard.
    /// * `.start(NaiveDate)` / `.end(NaiveDate)`: Default to the dataset's
    ///   configured start date and today. The range is clamped to what the
    ///   remote can serve.
    /// * `.gaps_only(bool)`: Only fetch missing periods. Defaults to `true`.
    /// * `.force_backfill(bool)`: Ignore the deep-history cutoff.
    /// * `.today(NaiveDate)`: Overrides the current date.
    #[builder]
    #[allow(clippy::too_many_arguments)]
    pub async fn run_shard(
        &self,
        dataset: DatasetKind,
        entities: &[Entity],
        pool: &str,
        shard_index: Option<usize>,
        shard_count: Option<usize>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        gaps_only: Option<bool>,
        force_backfill: Option<bool>,
        today: Option<NaiveDate>,
    ) -> Result<ShardReport, HarvestError> {
        let spec = ShardSpec::new(shard_index.unwrap_or(0), shard_count.unwrap_or(1), pool);
        let detector = self.detector(today, force_backfill);
        let range = self.effective_range(dataset, &detector, start, end)?;
        let coordinator = self.coordinator(dataset, detector, gaps_only.unwrap_or(true));
        coordinator.run(entities, dataset, range, &spec).await
    }

    /// Runs one shard per pool in this process.
    ///
    /// This process is shard `shard_index` of `shard_count` (default 0 of 1).
    /// Its share is split again per pool, so pool `i` runs sub-shard
    /// `shard_index * pools.len() + i` of `shard_count * pools.len()`.
    #[builder]
    #[allow(clippy::too_many_arguments)]
    pub async fn run_shards(
        &self,
        dataset: DatasetKind,
        entities: Vec<Entity>,
        pools: Vec<String>,
        shard_index: Option<usize>,
        shard_count: Option<usize>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        gaps_only: Option<bool>,
        force_backfill: Option<bool>,
        today: Option<NaiveDate>,
    ) -> Result<Vec<Result<ShardReport, HarvestError>>, HarvestError> {
        let detector = self.detector(today, force_backfill);
        let range = self.effective_range(dataset, &detector, start, end)?;
        let specs =
            ShardSpec::per_pool(shard_index.unwrap_or(0), shard_count.unwrap_or(1), &pools)?;
        for spec in &specs {
            spec.validate()?;
            self.pools.validate(&spec.pool_name)?;
        }
        let coordinator = Arc::new(self.coordinator(dataset, detector, gaps_only.unwrap_or(true)));
        Ok(coordinator
            .run_all(entities.into(), dataset, range, specs)
            .await)
    }

    /// Reports the windows `dataset` is missing for `entities`.
    #[builder]
    pub async fn gaps(
        &self,
        dataset: DatasetKind,
        entities: &[Entity],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        force_backfill: Option<bool>,
        today: Option<NaiveDate>,
    ) -> Result<GapReport, HarvestError> {
        let detector = self.detector(today, force_backfill);
        let start = start.unwrap_or_else(|| self.config.start_date(dataset));
        let end = end.unwrap_or(detector.latest_available(dataset));
        let coverage = self
            .store
            .coverage(&self.dataset_path(dataset), dataset)
            .await?;
        Ok(detector.detect(&coverage, entities, dataset, start, end))
    }

    /// Compares the reference list with the entities `dataset` holds data
    /// for, ignoring the configured expected-absent ids.
    #[builder]
    pub async fn audit(
        &self,
        dataset: DatasetKind,
        reference: &[Entity],
    ) -> Result<CoverageAudit, HarvestError> {
        let coverage = self
            .store
            .coverage(&self.dataset_path(dataset), dataset)
            .await?;
        Ok(audit_coverage(
            reference.iter().map(|e| e.entity_id.as_str()),
            coverage.entities_with_data(),
            &self.config.expected_absent,
        ))
    }

    #[builder]
    pub async fn summary(
        &self,
        dataset: DatasetKind,
        recent_days: Option<u32>,
        today: Option<NaiveDate>,
    ) -> Result<DatasetSummary, HarvestError> {
        let today = today.unwrap_or_else(|| Utc::now().date_naive());
        Ok(self
            .store
            .summary(dataset, today, recent_days.unwrap_or(DEFAULT_SUMMARY_DAYS))
            .await?)
    }

    fn detector(&self, today: Option<NaiveDate>, force_backfill: Option<bool>) -> GapDetector {
        let mode = if force_backfill.unwrap_or(false) {
            BackfillMode::Forced
        } else {
            BackfillMode::Incremental
        };
        GapDetector::new(today.unwrap_or_else(|| Utc::now().date_naive()))
            .with_cutoff(self.config.deep_history_cutoff)
            .with_mode(mode)
    }

    fn effective_range(
        &self,
        dataset: DatasetKind,
        detector: &GapDetector,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<DateRange, ConfigError> {
        let start = start.unwrap_or_else(|| self.config.start_date(dataset));
        let end = end.unwrap_or(detector.latest_available(dataset));
        DateRange::new(start, end)
            .and_then(|r| {
                r.intersect(
                    detector.earliest_allowed(dataset),
                    detector.latest_available(dataset),
                )
            })
            .ok_or(ConfigError::InvalidRange { start, end })
    }

    fn coordinator(
        &self,
        dataset: DatasetKind,
        detector: GapDetector,
        gaps_only: bool,
    ) -> ShardCoordinator<Arc<T>> {
        let client = RateLimitedClient::new(
            Arc::clone(&self.transport),
            ApiLayout::new(&self.config.base_url),
            Arc::clone(&self.pools),
        );
        let mut coordinator = ShardCoordinator::new(
            WindowedFetcher::new(client),
            self.store.clone(),
            FetchPolicy::from(&self.config.retry),
        )
        .with_checkpoint_every(self.config.checkpoint_every(dataset))
        .with_concurrency(self.config.entity_concurrency)
        .with_today(detector.today())
        .with_status_sink(Arc::new(JsonStatusSink::new(
            self.data_dir.join(STATUS_DIR_NAME),
        )));
        if gaps_only {
            coordinator = coordinator.with_gap_detection(detector);
        }
        coordinator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{json_response, ScriptedTransport};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn config(dir: &Path) -> HarvestConfig {
        let mut config = HarvestConfig {
            data_dir: Some(dir.to_path_buf()),
            base_url: "https://api.test".to_string(),
            pools: BTreeMap::from([("main".to_string(), vec!["k0".to_string()])]),
            ..HarvestConfig::default()
        };
        config.retry.max_retries = 1;
        config.retry.backoff_secs = 0;
        config.retry.jitter_ms = 0;
        config
    }

    fn transport() -> ScriptedTransport {
        ScriptedTransport::new(|url, _| {
            let station = url.rsplit('/').next().unwrap_or_default().to_string();
            if station == "GONE" {
                return Ok(json_response(404, json!({})));
            }
            Ok(json_response(
                200,
                json!([{"indicativo": station, "fecha": "2024-01-02", "prec": "Ip", "tmax": "12,4"}]),
            ))
        })
    }

    #[tokio::test]
    async fn test_run_then_gaps_audit_and_summary() -> Result<(), HarvestError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let harvester = Harvester::with_transport(config(dir.path()), transport()).await?;
        let stations = vec![Entity::station("0076"), Entity::station("GONE"), Entity::station("3195")];
        let kind = DatasetKind::DailyClimatology;

        let report = harvester
            .run_shard()
            .dataset(kind)
            .entities(&stations)
            .pool("main")
            .start(day(1))
            .end(day(3))
            .today(day(31))
            .call()
            .await?;
        assert_eq!(report.entities_attempted, 3);
        assert_eq!(report.records_fetched, 4);
        assert_eq!(report.exit_code(), 0);
        assert!(dir.path().join("status/daily_climatology-shard-0.json").exists());

        let gaps = harvester
            .gaps()
            .dataset(kind)
            .entities(&stations)
            .start(day(1))
            .end(day(3))
            .today(day(31))
            .call()
            .await?;
        assert!(gaps.is_empty(), "{:?}", gaps.windows);

        let audit = harvester.audit().dataset(kind).reference(&stations).call().await?;
        assert_eq!(audit.missing.into_iter().collect::<Vec<_>>(), vec!["GONE"]);

        let summary = harvester
            .summary()
            .dataset(kind)
            .today(day(3))
            .recent_days(3)
            .call()
            .await?;
        assert_eq!(summary.rows, 4);
        assert_eq!(summary.entities, 2);
        assert_eq!(summary.entities_per_day.get(&day(2)), Some(&2));
        Ok(())
    }

    #[tokio::test]
    async fn test_trace_precipitation_reaches_the_dataset() -> Result<(), HarvestError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let harvester = Harvester::with_transport(config(dir.path()), transport()).await?;
        harvester
            .run_shard()
            .dataset(DatasetKind::DailyClimatology)
            .entities(&[Entity::station("0076")])
            .pool("main")
            .start(day(2))
            .end(day(2))
            .today(day(31))
            .call()
            .await?;
        let rows = harvester
            .store()
            .load(&harvester.dataset_path(DatasetKind::DailyClimatology))
            .await?;
        let precipitation = rows
            .iter()
            .find(|r| r.variable == "precipitation")
            .and_then(|r| r.value);
        assert_eq!(precipitation, Some(0.1));
        Ok(())
    }

    #[tokio::test]
    async fn test_inverted_range_is_config_error() -> Result<(), HarvestError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let harvester = Harvester::with_transport(config(dir.path()), transport()).await?;
        let outcome = harvester
            .run_shard()
            .dataset(DatasetKind::DailyClimatology)
            .entities(&[])
            .pool("main")
            .start(day(5))
            .end(day(1))
            .today(day(31))
            .call()
            .await;
        assert!(matches!(
            outcome,
            Err(HarvestError::Config(ConfigError::InvalidRange { .. }))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_run_shards_in_process() -> Result<(), HarvestError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config(dir.path());
        config.pools.insert("second".to_string(), vec!["k1".to_string()]);
        let harvester = Harvester::with_transport(config, transport()).await?;
        let reports = harvester
            .run_shards()
            .dataset(DatasetKind::DailyClimatology)
            .entities(vec![Entity::station("A"), Entity::station("B"), Entity::station("C")])
            .pools(vec!["main".to_string(), "second".to_string()])
            .start(day(2))
            .end(day(2))
            .today(day(31))
            .call()
            .await?;
        let attempted: Vec<usize> = reports
            .into_iter()
            .map(|r| r.map(|r| r.entities_attempted))
            .collect::<Result<_, _>>()?;
        assert_eq!(attempted, vec![2, 1]);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_shards_splits_this_process_share() -> Result<(), HarvestError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config(dir.path());
        config.pools.insert("second".to_string(), vec!["k1".to_string()]);
        let harvester = Harvester::with_transport(config, transport()).await?;
        let entities: Vec<Entity> = ["A", "B", "C", "D", "E", "F", "G", "H"]
            .into_iter()
            .map(Entity::station)
            .collect();
        let reports = harvester
            .run_shards()
            .dataset(DatasetKind::DailyClimatology)
            .entities(entities)
            .pools(vec!["MAIN".to_string(), "second".to_string()])
            .shard_index(1)
            .shard_count(2)
            .start(day(2))
            .end(day(2))
            .today(day(31))
            .call()
            .await?;
        let shards: Vec<(usize, usize, usize)> = reports
            .into_iter()
            .map(|r| r.map(|r| (r.shard_index, r.shard_count, r.entities_attempted)))
            .collect::<Result<_, _>>()?;
        // Sub-shards 2 and 3 of 4: entities C, G and D, H.
        assert_eq!(shards, vec![(2, 4, 2), (3, 4, 2)]);
        Ok(())
    }
}
