//! Runs one shard of a harvest: picks this shard's entities, fetches them
//! with bounded concurrency, and checkpoints into the store as it goes.

use crate::client::transport::ApiTransport;
use crate::error::HarvestError;
use crate::fetch::policy::FetchPolicy;
use crate::fetch::windowed::{FetchResult, WindowedFetcher};
use crate::gaps::detector::GapDetector;
use crate::shard::partition::{partition, ShardSpec};
use crate::shard::report::ShardReport;
use crate::shard::status::{LogStatusSink, StatusSink};
use crate::store::error::StoreError;
use crate::store::merge::{MergeBatch, MergeStore};
use crate::types::dataset_kind::DatasetKind;
use crate::types::entity::Entity;
use crate::types::window::DateRange;
use chrono::{NaiveDate, Utc};
use futures_util::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

pub struct ShardCoordinator<T: ApiTransport> {
    fetcher: WindowedFetcher<T>,
    store: MergeStore,
    policy: FetchPolicy,
    checkpoint_every: Option<usize>,
    concurrency: usize,
    gap_detector: Option<GapDetector>,
    today: Option<NaiveDate>,
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl<T: ApiTransport> ShardCoordinator<T> {
    pub fn new(fetcher: WindowedFetcher<T>, store: MergeStore, policy: FetchPolicy) -> Self {
        Self {
            fetcher,
            store,
            policy,
            checkpoint_every: None,
            concurrency: 1,
            gap_detector: None,
            today: None,
            sinks: vec![Arc::new(LogStatusSink)],
        }
    }

    /// Entities between two merges. Defaults to the dataset kind's value.
    pub fn with_checkpoint_every(mut self, every: usize) -> Self {
        self.checkpoint_every = Some(every.max(1));
        self
    }

    /// Entities fetched at once inside the shard. Results are still handled
    /// in partition order.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Only fetch what `detector` reports missing instead of the whole range.
    pub fn with_gap_detection(mut self, detector: GapDetector) -> Self {
        self.today.get_or_insert(detector.today());
        self.gap_detector = Some(detector);
        self
    }

    /// The date that decides which fetched days are final. Defaults to the
    /// gap detector's date, then to the current UTC date.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn store(&self) -> &MergeStore {
        &self.store
    }

    /// Harvests this shard's share of `entities` over `range`.
    ///
    /// Per-entity and per-window failures end up in the report. Only
    /// configuration errors and store failures other than a lock timeout
    /// abort the run.
    pub async fn run(
        &self,
        entities: &[Entity],
        kind: DatasetKind,
        range: DateRange,
        spec: &ShardSpec,
    ) -> Result<ShardReport, HarvestError> {
        spec.validate()?;
        self.policy.validate()?;
        self.fetcher.client().pools().validate(&spec.pool_name)?;

        let started = Instant::now();
        let mut report = ShardReport::new(kind, spec.shard_index, spec.shard_count, &spec.pool_name);
        let mine: Vec<Entity> = partition(entities, spec.shard_count, spec.shard_index)?
            .into_iter()
            .cloned()
            .collect();
        let plan = self.plan(mine, kind, range).await?;
        info!(
            "{} shard {}/{} starting: {} entities to fetch over {} with pool '{}'",
            kind,
            spec.shard_index,
            spec.shard_count,
            plan.len(),
            range,
            spec.pool_name
        );

        let checkpoint_every = self
            .checkpoint_every
            .unwrap_or_else(|| kind.default_checkpoint_every());
        let pool = spec.pool_name.as_str();
        let today = self.today.unwrap_or_else(|| Utc::now().date_naive());
        let mut batch = MergeBatch::default();
        let mut since_checkpoint = 0;
        let mut results = stream::iter(plan)
            .map(|(entity, ranges)| self.fetch_entity(entity, kind, ranges, pool))
            .buffered(self.concurrency);

        while let Some(outcome) = results.next().await {
            let (entity, result) = outcome?;
            report.entities_attempted += 1;
            report.requests_issued += result.attempts;
            report.records_fetched += result.records.len();
            if result.has_records() {
                report.entities_with_records += 1;
            }
            debug!(
                "{}: {} records, {} failed windows",
                entity,
                result.records.len(),
                result.failed_windows.len()
            );
            let confirmed_empty = result.confirmed_empty(today);
            report.failed_windows.extend(result.failed_windows);
            batch.extend(result.records, confirmed_empty);

            since_checkpoint += 1;
            if since_checkpoint >= checkpoint_every {
                self.checkpoint(kind, &mut batch, &mut report).await?;
                since_checkpoint = 0;
            }
        }
        drop(results);
        self.checkpoint(kind, &mut batch, &mut report).await?;

        report.records_unmerged = batch.len();
        report.duration_secs = started.elapsed().as_secs_f64();
        self.publish(&report).await;
        Ok(report)
    }

    /// The ranges to fetch per entity, in partition order. Entities without
    /// gaps are left out.
    async fn plan(
        &self,
        entities: Vec<Entity>,
        kind: DatasetKind,
        range: DateRange,
    ) -> Result<Vec<(Entity, Vec<DateRange>)>, HarvestError> {
        let Some(detector) = &self.gap_detector else {
            return Ok(entities.into_iter().map(|e| (e, vec![range])).collect());
        };
        let coverage = self
            .store
            .coverage(&self.store.dataset_path(kind), kind)
            .await?;
        let gaps = detector.detect(&coverage, &entities, kind, range.start, range.end);
        let mut by_entity: BTreeMap<&str, Vec<DateRange>> = BTreeMap::new();
        for window in &gaps.windows {
            by_entity
                .entry(window.entity_id.as_str())
                .or_default()
                .push(window.range);
        }
        let plan = entities
            .iter()
            .filter_map(|e| {
                by_entity
                    .remove(e.entity_id.as_str())
                    .map(|ranges| (e.clone(), ranges))
            })
            .collect();
        Ok(plan)
    }

    async fn fetch_entity(
        &self,
        entity: Entity,
        kind: DatasetKind,
        ranges: Vec<DateRange>,
        pool: &str,
    ) -> Result<(Entity, FetchResult), HarvestError> {
        if entity.entity_kind != kind.entity_kind() {
            warn!("{} is not a {:?}, fetching it anyway", entity, kind.entity_kind());
        }
        let mut total = FetchResult::default();
        for range in ranges {
            let result = self
                .fetcher
                .fetch(&entity.entity_id, kind, range, pool, &self.policy)
                .await?;
            total.absorb(result);
        }
        Ok((entity, total))
    }

    /// Merges the buffered batch. On lock timeout the batch stays buffered
    /// for the next checkpoint.
    async fn checkpoint(
        &self,
        kind: DatasetKind,
        batch: &mut MergeBatch,
        report: &mut ShardReport,
    ) -> Result<(), HarvestError> {
        if batch.is_empty() {
            return Ok(());
        }
        match self.store.merge_kind(kind, batch.clone()).await {
            Ok(merged) => {
                report.merges_succeeded += 1;
                report.rows_after_last_merge = Some(merged.total_rows);
                *batch = MergeBatch::default();
                Ok(())
            }
            Err(StoreError::LockTimeout { path, waited }) => {
                warn!(
                    "Checkpoint skipped, lock {} still held after {:?}; keeping {} records buffered",
                    path.display(),
                    waited,
                    batch.len()
                );
                report.merges_failed += 1;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn publish(&self, report: &ShardReport) {
        for sink in &self.sinks {
            if let Err(e) = sink.report(report).await {
                warn!("Status hand-off failed: {}", e);
            }
        }
    }
}

impl<T: ApiTransport + 'static> ShardCoordinator<T> {
    /// Runs several shards of one process as separate tasks. Each shard must
    /// name its own credential pool.
    pub async fn run_all(
        self: Arc<Self>,
        entities: Arc<[Entity]>,
        kind: DatasetKind,
        range: DateRange,
        specs: Vec<ShardSpec>,
    ) -> Vec<Result<ShardReport, HarvestError>> {
        let handles: Vec<_> = specs
            .into_iter()
            .map(|spec| {
                let coordinator = Arc::clone(&self);
                let entities = Arc::clone(&entities);
                tokio::spawn(async move { coordinator.run(&entities, kind, range, &spec).await })
            })
            .collect();
        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            reports.push(handle.await.map_err(HarvestError::from).and_then(|r| r));
        }
        reports
    }
}
