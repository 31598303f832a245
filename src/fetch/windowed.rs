//! Reliable retrieval of one entity over a date range.
//!
//! The range is cut into sub-windows no wider than the dataset kind allows.
//! Each sub-window moves through [`WindowState`] until it either succeeds
//! (possibly confirmed empty) or exhausts its attempts. A failed sub-window
//! never aborts the rest of the range.

use crate::client::rate_limited::{Outcome, RateLimitedClient};
use crate::client::transport::ApiTransport;
use crate::config::error::ConfigError;
use crate::fetch::decode::decode_payload;
use crate::fetch::policy::FetchPolicy;
use crate::types::dataset_kind::DatasetKind;
use crate::types::record::Record;
use crate::types::window::{CollectionWindow, DateRange};
use chrono::{NaiveDate, Utc};
use log::{debug, trace, warn};
use std::collections::BTreeSet;

/// Lifecycle of one sub-window.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowState {
    Pending,
    Requested { attempt: u32 },
    RateLimited { attempt: u32 },
    TransientError { attempt: u32, cause: String },
    Malformed { attempt: u32, cause: String },
    NotFoundConfirmed,
    Succeeded { records: usize },
    Failed { attempts: u32, cause: String },
}

impl WindowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WindowState::Succeeded { .. } | WindowState::Failed { .. }
        )
    }
}

/// Everything retrieved for one entity and range.
///
/// Partial success is normal: `records` holds what succeeded and
/// `failed_windows` what should be re-queued.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    pub records: Vec<Record>,
    pub failed_windows: Vec<CollectionWindow>,
    /// Sub-windows that reached `Succeeded`, including confirmed-empty ones.
    pub completed_windows: Vec<CollectionWindow>,
    /// Completed sub-windows the remote answered with "no data".
    pub not_found_windows: Vec<CollectionWindow>,
    /// Requests issued across all sub-windows.
    pub attempts: u32,
}

impl FetchResult {
    /// `(entity, day)` pairs that were fetched successfully, hold no record
    /// and can no longer change, so they are not re-requested later.
    ///
    /// Only days before `today` qualify. Forecast days count only when the
    /// remote reported no data, since their records are keyed by issue day
    /// rather than by the day requested.
    pub fn confirmed_empty(&self, today: NaiveDate) -> Vec<(String, NaiveDate)> {
        let kinds: BTreeSet<DatasetKind> =
            self.completed_windows.iter().map(|w| w.dataset_kind).collect();
        let mut seen: BTreeSet<(&str, NaiveDate)> = BTreeSet::new();
        for record in &self.records {
            for kind in &kinds {
                seen.insert((record.entity_id.as_str(), record.period(*kind)));
            }
        }
        let mut empty = BTreeSet::new();
        for window in &self.completed_windows {
            if window.dataset_kind.keys_on_issue_time() && !self.not_found_windows.contains(window) {
                continue;
            }
            for day in window.range.days().take_while(|day| *day < today) {
                if !seen.contains(&(window.entity_id.as_str(), day)) {
                    empty.insert((window.entity_id.clone(), day));
                }
            }
        }
        empty.into_iter().collect()
    }

    pub fn has_records(&self) -> bool {
        !self.records.is_empty()
    }

    pub fn absorb(&mut self, other: FetchResult) {
        self.records.extend(other.records);
        self.failed_windows.extend(other.failed_windows);
        self.completed_windows.extend(other.completed_windows);
        self.not_found_windows.extend(other.not_found_windows);
        self.attempts += other.attempts;
    }
}

pub struct WindowedFetcher<T: ApiTransport> {
    client: RateLimitedClient<T>,
}

impl<T: ApiTransport> WindowedFetcher<T> {
    pub fn new(client: RateLimitedClient<T>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &RateLimitedClient<T> {
        &self.client
    }

    /// Fetches every sub-window of `range` for `entity_id`.
    ///
    /// Only configuration problems are errors. Remote failures end up in
    /// [`FetchResult::failed_windows`].
    pub async fn fetch(
        &self,
        entity_id: &str,
        kind: DatasetKind,
        range: DateRange,
        pool_name: &str,
        policy: &FetchPolicy,
    ) -> Result<FetchResult, ConfigError> {
        policy.validate()?;
        let mut result = FetchResult::default();
        for sub_range in range.split(kind.max_window_days()) {
            let window = CollectionWindow::new(entity_id, kind, sub_range);
            self.fetch_window(window, pool_name, policy, &mut result)
                .await?;
        }
        Ok(result)
    }

    async fn fetch_window(
        &self,
        window: CollectionWindow,
        pool_name: &str,
        policy: &FetchPolicy,
        result: &mut FetchResult,
    ) -> Result<(), ConfigError> {
        let mut state = WindowState::Pending;
        let mut attempt = 0;
        let mut not_found = false;
        while !state.is_terminal() {
            attempt += 1;
            state = WindowState::Requested { attempt };
            trace!("{} -> {:?}", window, state);
            result.attempts += 1;

            state = match self.client.request(pool_name, &window).await? {
                Outcome::Success(payload) => {
                    match decode_payload(window.dataset_kind, &window.entity_id, &payload, Utc::now())
                    {
                        Ok(records) => {
                            let records = keep_inside(&window, records);
                            let count = records.len();
                            result.records.extend(records);
                            WindowState::Succeeded { records: count }
                        }
                        Err(e) => WindowState::Malformed {
                            attempt,
                            cause: e.to_string(),
                        },
                    }
                }
                Outcome::NotFound => WindowState::NotFoundConfirmed,
                Outcome::RateLimited => WindowState::RateLimited { attempt },
                Outcome::TransientError(cause) => WindowState::TransientError { attempt, cause },
                Outcome::MalformedResponse(cause) => WindowState::Malformed { attempt, cause },
            };
            trace!("{} -> {:?}", window, state);

            state = match state {
                WindowState::NotFoundConfirmed => {
                    debug!("No data for {}", window);
                    not_found = true;
                    WindowState::Succeeded { records: 0 }
                }
                WindowState::RateLimited { .. } | WindowState::TransientError { .. } => {
                    warn!("{} attempt {} failed: {:?}", window, attempt, state);
                    self.client.pools().rotate(pool_name)?;
                    self.retry_or_fail(state, attempt, policy).await
                }
                WindowState::Malformed { .. } => {
                    warn!("{} attempt {} failed: {:?}", window, attempt, state);
                    self.retry_or_fail(state, attempt, policy).await
                }
                other => other,
            };
        }

        match state {
            WindowState::Failed { attempts, cause } => {
                warn!(
                    "Giving up on {} after {} attempts: {}",
                    window, attempts, cause
                );
                result.failed_windows.push(window);
            }
            _ => {
                if not_found {
                    result.not_found_windows.push(window.clone());
                }
                result.completed_windows.push(window);
            }
        }
        Ok(())
    }

    /// Fails the window once the retry bound is spent, otherwise backs off
    /// and leaves it ready for another request.
    async fn retry_or_fail(&self, state: WindowState, attempt: u32, policy: &FetchPolicy) -> WindowState {
        if attempt >= policy.max_retries {
            let cause = match state {
                WindowState::RateLimited { .. } => "rate limited".to_string(),
                WindowState::TransientError { cause, .. } | WindowState::Malformed { cause, .. } => {
                    cause
                }
                other => format!("{other:?}"),
            };
            return WindowState::Failed {
                attempts: attempt,
                cause,
            };
        }
        tokio::time::sleep(policy.delay_after(attempt)).await;
        WindowState::Pending
    }
}

/// Drops rows outside the requested days. Forecasts are kept whole since
/// their period is the day they were issued, not the day requested.
fn keep_inside(window: &CollectionWindow, records: Vec<Record>) -> Vec<Record> {
    if window.dataset_kind == DatasetKind::Forecast {
        return records;
    }
    records
        .into_iter()
        .filter(|r| window.range.contains(r.timestamp.date()))
        .collect()
}
