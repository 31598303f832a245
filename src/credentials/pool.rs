//! Named pools of rotating API credentials.
//!
//! A pool hands out its active credential until asked to rotate, at which
//! point it advances round-robin. Pools are process local: every shard gets
//! its own pool so one shard's rotation never eats into another's budget.

use crate::config::error::ConfigError;
use log::warn;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One API key plus a loggable alias.
///
/// `Debug` and `Display` only ever show the alias.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    alias: String,
    secret: Arc<str>,
}

impl Credential {
    pub fn new(alias: impl Into<String>, secret: impl AsRef<str>) -> Self {
        Self {
            alias: alias.into(),
            secret: Arc::from(secret.as_ref()),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("alias", &self.alias)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.alias)
    }
}

/// Canonical form of a pool name. Lookups and inserts both go through it, so
/// `SHARD0`, `shard0` and ` Shard0 ` name the same pool.
pub fn normalize_pool_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

#[derive(Debug)]
struct Pool {
    credentials: Vec<Credential>,
    active_index: AtomicUsize,
}

/// Registry of credential pools, keyed by pool name.
#[derive(Debug, Default)]
pub struct CredentialPool {
    pools: BTreeMap<String, Pool>,
}

impl CredentialPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from raw keys per pool name. Credentials are
    /// aliased as `<pool>#<index>`.
    pub fn from_keys<'a, I, K>(pools: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, K)>,
        K: IntoIterator,
        K::Item: AsRef<str>,
    {
        let mut registry = Self::new();
        for (name, keys) in pools {
            let name = normalize_pool_name(name);
            let credentials = keys
                .into_iter()
                .enumerate()
                .map(|(i, key)| Credential::new(format!("{name}#{i}"), key))
                .collect();
            registry.insert(name, credentials);
        }
        registry
    }

    /// Adds or replaces a pool. The active index starts at 0.
    pub fn insert(&mut self, pool_name: impl AsRef<str>, credentials: Vec<Credential>) {
        self.pools.insert(
            normalize_pool_name(pool_name.as_ref()),
            Pool {
                credentials,
                active_index: AtomicUsize::new(0),
            },
        );
    }

    pub fn pool_names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    pub fn len(&self, pool_name: &str) -> Result<usize, ConfigError> {
        Ok(self.pool(pool_name)?.credentials.len())
    }

    /// Fails when the pool is unknown or has no credentials.
    pub fn validate(&self, pool_name: &str) -> Result<(), ConfigError> {
        self.current(pool_name).map(|_| ())
    }

    /// The active credential of `pool_name`.
    pub fn current(&self, pool_name: &str) -> Result<Credential, ConfigError> {
        let pool = self.pool(pool_name)?;
        let index = pool.active_index.load(Ordering::Acquire) % pool.credentials.len();
        Ok(pool.credentials[index].clone())
    }

    /// Advances `pool_name` to its next credential and returns it.
    ///
    /// Plain round-robin: rate limited credentials are not tracked, so fast
    /// repeated rotation just cycles through the pool.
    pub fn rotate(&self, pool_name: &str) -> Result<Credential, ConfigError> {
        let pool = self.pool(pool_name)?;
        let size = pool.credentials.len();
        let previous = pool
            .active_index
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % size))
            .unwrap_or_else(|i| i);
        let next = &pool.credentials[(previous + 1) % size];
        warn!(
            "Rotating credential in pool '{}': {} -> {}",
            pool_name,
            pool.credentials[previous % size],
            next
        );
        Ok(next.clone())
    }

    fn pool(&self, pool_name: &str) -> Result<&Pool, ConfigError> {
        let pool = self
            .pools
            .get(&normalize_pool_name(pool_name))
            .ok_or_else(|| ConfigError::UnknownPool(pool_name.to_string()))?;
        if pool.credentials.is_empty() {
            return Err(ConfigError::EmptyPool(pool_name.to_string()));
        }
        Ok(pool)
    }
}
