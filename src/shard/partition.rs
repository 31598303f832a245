use crate::config::error::ConfigError;

/// Shard assignment of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSpec {
    pub shard_index: usize,
    pub shard_count: usize,
    /// Credential pool reserved for this shard.
    pub pool_name: String,
}

impl ShardSpec {
    pub fn new(shard_index: usize, shard_count: usize, pool_name: impl Into<String>) -> Self {
        Self {
            shard_index,
            shard_count,
            pool_name: pool_name.into(),
        }
    }

    pub fn single(pool_name: impl Into<String>) -> Self {
        Self::new(0, 1, pool_name)
    }

    /// Splits shard `shard_index` of `shard_count` into one sub-shard per
    /// pool, numbered `shard_index * pools + i` out of `shard_count * pools`.
    ///
    /// Processes that each host several pools then still split the entities
    /// disjointly between them.
    pub fn per_pool(
        shard_index: usize,
        shard_count: usize,
        pools: &[String],
    ) -> Result<Vec<ShardSpec>, ConfigError> {
        ShardSpec::new(shard_index, shard_count, "").validate()?;
        let invalid = ConfigError::InvalidShard {
            shard_index,
            shard_count,
        };
        if pools.is_empty() {
            return Err(invalid);
        }
        let total = shard_count.checked_mul(pools.len()).ok_or(invalid)?;
        Ok(pools
            .iter()
            .enumerate()
            .map(|(i, pool)| ShardSpec::new(shard_index * pools.len() + i, total, pool.as_str()))
            .collect())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_count == 0 || self.shard_index >= self.shard_count {
            return Err(ConfigError::InvalidShard {
                shard_index: self.shard_index,
                shard_count: self.shard_count,
            });
        }
        Ok(())
    }
}

/// Round-robin share of `items` for `shard_index`: every `shard_count`-th
/// item starting at `shard_index`, in input order.
///
/// Depends only on its arguments, so re-running a shard picks the same
/// items and no two shards ever share one.
pub fn partition<T>(items: &[T], shard_count: usize, shard_index: usize) -> Result<Vec<&T>, ConfigError> {
    ShardSpec::new(shard_index, shard_count, "").validate()?;
    Ok(items.iter().skip(shard_index).step_by(shard_count).collect())
}
