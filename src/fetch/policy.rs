use crate::config::error::ConfigError;
use crate::config::settings::RetrySettings;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffMode {
    Constant,
    /// Doubles after every failed attempt, up to `cap`.
    Exponential { cap: Duration },
}

/// Retry bound and backoff for one sub-window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Attempts per sub-window, including the first one.
    pub max_retries: u32,
    pub backoff: Duration,
    pub mode: BackoffMode,
    /// Upper bound of the random delay added to every backoff.
    pub jitter: Duration,
}

impl FetchPolicy {
    pub fn constant(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
            mode: BackoffMode::Constant,
            jitter: Duration::ZERO,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetryBound);
        }
        Ok(())
    }

    /// Delay before the attempt following failed attempt number `attempt`
    /// (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = match self.mode {
            BackoffMode::Constant => self.backoff,
            BackoffMode::Exponential { cap } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.backoff.saturating_mul(factor).min(cap)
            }
        };
        base + self.random_jitter()
    }

    fn random_jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

impl From<&RetrySettings> for FetchPolicy {
    fn from(settings: &RetrySettings) -> Self {
        let backoff = Duration::from_secs(settings.backoff_secs);
        Self {
            max_retries: settings.max_retries,
            backoff,
            mode: if settings.exponential {
                BackoffMode::Exponential {
                    cap: Duration::from_secs(settings.max_backoff_secs).max(backoff),
                }
            } else {
                BackoffMode::Constant
            },
            jitter: Duration::from_millis(settings.jitter_ms),
        }
    }
}
