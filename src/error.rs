use crate::client::error::ClientError;
use crate::config::error::ConfigError;
use crate::entities::error::EntityListError;
use crate::store::error::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    EntityList(#[from] EntityListError),

    #[error("Shard task failed to complete")]
    ShardJoin(#[from] tokio::task::JoinError),
}

impl HarvestError {
    /// Setup problems are fatal and must not be retried.
    pub fn is_config(&self) -> bool {
        matches!(self, HarvestError::Config(_))
    }
}
