mod client;
mod config;
mod credentials;
mod entities;
mod error;
mod fetch;
mod gaps;
mod harvester;
mod shard;
mod store;
mod types;
mod utils;

pub use error::HarvestError;
pub use harvester::*;

pub use client::endpoint::ApiLayout;
pub use client::error::{ClientError, TransportError};
pub use client::rate_limited::{Outcome, RateLimitedClient};
pub use client::transport::{ApiTransport, HttpTransport, TransportResponse};

pub use config::error::ConfigError;
pub use config::settings::{HarvestConfig, LockSettings, RetrySettings, POOL_ENV_PREFIX};

pub use credentials::pool::{Credential, CredentialPool};

pub use entities::error::EntityListError;
pub use entities::reference_list::{load_entities, parse_entities, EntitySource};

pub use fetch::decode::{decode_payload, parse_measurement, TRACE_PRECIPITATION};
pub use fetch::error::DecodeError;
pub use fetch::policy::{BackoffMode, FetchPolicy};
pub use fetch::windowed::{FetchResult, WindowState, WindowedFetcher};

pub use gaps::audit::{audit_coverage, CoverageAudit};
pub use gaps::detector::{BackfillMode, GapDetector, GapReport};

pub use shard::coordinator::ShardCoordinator;
pub use shard::partition::{partition, ShardSpec};
pub use shard::report::ShardReport;
pub use shard::status::{JsonStatusSink, LogStatusSink, StatusError, StatusSink};

pub use store::error::StoreError;
pub use store::merge::{Coverage, MergeBatch, MergeReport, MergeStore};
pub use store::summary::DatasetSummary;

pub use types::dataset_kind::DatasetKind;
pub use types::entity::{Entity, EntityKind};
pub use types::record::{default_precedence, DedupKey, Record, SourceTag};
pub use types::window::{CollectionWindow, DateRange};
