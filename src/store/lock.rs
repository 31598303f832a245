//! Sentinel-file lock guarding one dataset path.
//!
//! The lock is a sibling `<dataset>.lock` file created with `create_new`, so
//! it excludes other tasks as well as other processes on the same
//! filesystem. It is removed when the guard is dropped. A process killed
//! while holding it leaves the file behind; waiters reclaim such a lock once
//! its owner is known to be gone or the file is older than `stale_after`.

use crate::store::error::StoreError;
use crate::utils::sibling_with_suffix;
use log::{debug, warn};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const LOCK_SUFFIX: &str = ".lock";

/// Age after which a lock is considered abandoned when its owner cannot be
/// checked.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3600);

#[derive(Debug)]
pub struct DatasetLock {
    path: PathBuf,
}

/// Who wrote a lock file: `<pid> <host>`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LockOwner {
    pid: u32,
    host: Option<String>,
}

impl LockOwner {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            host: host_name(),
        }
    }

    fn parse(contents: &str) -> Option<Self> {
        let mut parts = contents.split_whitespace();
        let pid = parts.next()?.parse().ok()?;
        Some(Self {
            pid,
            host: parts.next().map(str::to_string),
        })
    }

    /// True only when the owner ran on this host and its pid no longer
    /// exists. Owners on other hosts are never declared dead.
    fn is_gone(&self) -> bool {
        let me = LockOwner::current();
        if self.host.is_none() || self.host != me.host || self.pid == me.pid {
            return false;
        }
        let proc = Path::new("/proc");
        proc.join("self").exists() && !proc.join(self.pid.to_string()).exists()
    }
}

fn host_name() -> Option<String> {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty() && !name.contains(char::is_whitespace))
}

impl DatasetLock {
    pub fn lock_path(dataset_path: &Path) -> PathBuf {
        sibling_with_suffix(dataset_path, LOCK_SUFFIX)
    }

    /// Waits up to `timeout` for the lock on `dataset_path`, polling every
    /// `poll_interval`. Abandoned locks older than [`DEFAULT_STALE_AFTER`]
    /// are reclaimed.
    pub async fn acquire(
        dataset_path: &Path,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, StoreError> {
        Self::acquire_reclaiming(dataset_path, timeout, poll_interval, DEFAULT_STALE_AFTER).await
    }

    /// Like [`DatasetLock::acquire`], reclaiming a lock whose owner process
    /// is gone or whose file is older than `stale_after`.
    pub async fn acquire_reclaiming(
        dataset_path: &Path,
        timeout: Duration,
        poll_interval: Duration,
        stale_after: Duration,
    ) -> Result<Self, StoreError> {
        let path = Self::lock_path(dataset_path);
        let started = Instant::now();
        let mut warned = false;
        loop {
            match Self::try_create(&path) {
                Ok(()) => {
                    debug!("Acquired lock {}", path.display());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if reclaim_if_stale(&path, stale_after)
                        .map_err(|e| StoreError::LockIo(path.clone(), e))?
                    {
                        continue;
                    }
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(StoreError::LockTimeout { path, waited });
                    }
                    if !warned {
                        warn!("Lock {} is held, waiting up to {:?}", path.display(), timeout);
                        warned = true;
                    }
                    tokio::time::sleep(poll_interval.min(timeout - waited)).await;
                }
                Err(e) => return Err(StoreError::LockIo(path, e)),
            }
        }
    }

    fn try_create(path: &Path) -> io::Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let owner = LockOwner::current();
        match owner.host {
            Some(host) => writeln!(file, "{} {}", owner.pid, host),
            None => writeln!(file, "{}", owner.pid),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Removes the lock at `path` if it is abandoned. Returns true when the
/// caller should try to create the lock again.
///
/// The file is first renamed aside so that only one waiter reclaims it. If
/// the renamed file turns out to be a fresh lock taken in the meantime, it
/// is linked back into place.
fn reclaim_if_stale(path: &Path, stale_after: Duration) -> io::Result<bool> {
    let inspected = match std::fs::metadata(path) {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };
    let contents = std::fs::read_to_string(path).unwrap_or_default();
    let age = inspected.elapsed().unwrap_or_default();
    let owner_gone = LockOwner::parse(&contents).is_some_and(|owner| owner.is_gone());
    if !owner_gone && age < stale_after {
        return Ok(false);
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let aside = sibling_with_suffix(path, &format!(".stale-{}-{}", std::process::id(), nanos));
    match std::fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    }
    let moved_mtime = std::fs::metadata(&aside)?.modified()?;
    let moved_contents = std::fs::read_to_string(&aside).unwrap_or_default();
    if moved_mtime != inspected || moved_contents != contents {
        debug!("Lock {} was retaken while reclaiming, restoring it", path.display());
        if let Err(e) = std::fs::hard_link(&aside, path) {
            warn!("Could not restore lock {}: {}", path.display(), e);
        }
    } else if owner_gone {
        warn!(
            "Reclaimed lock {} left by exited process ({})",
            path.display(),
            contents.trim()
        );
    } else {
        warn!("Reclaimed lock {} unchanged for {:?}", path.display(), age);
    }
    std::fs::remove_file(&aside)?;
    Ok(true)
}

impl Drop for DatasetLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Released lock {}", self.path.display()),
            Err(e) => warn!("Failed to remove lock {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_is_exclusive_and_released_on_drop() -> Result<(), StoreError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let dataset = dir.path().join("observation.parquet");
        let poll = Duration::from_millis(10);

        let held = DatasetLock::acquire(&dataset, Duration::from_secs(1), poll).await?;
        assert!(held.path().exists());

        let second = DatasetLock::acquire(&dataset, Duration::from_millis(50), poll).await;
        assert!(matches!(second, Err(StoreError::LockTimeout { .. })));

        drop(held);
        assert!(!DatasetLock::lock_path(&dataset).exists());
        let _again = DatasetLock::acquire(&dataset, Duration::from_millis(50), poll).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() -> Result<(), StoreError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let dataset = dir.path().join("forecast.parquet");
        let poll = Duration::from_millis(5);

        let held = DatasetLock::acquire(&dataset, Duration::from_secs(1), poll).await?;
        let waiter = {
            let dataset = dataset.clone();
            tokio::spawn(async move {
                DatasetLock::acquire(&dataset, Duration::from_secs(5), poll)
                    .await
                    .map(|_| ())
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);
        waiter.await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_old_lock_is_reclaimed() -> Result<(), StoreError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let dataset = dir.path().join("observation.parquet");
        let lock_path = DatasetLock::lock_path(&dataset);
        let file = std::fs::File::create(&lock_path).expect("create sentinel");
        file.set_modified(SystemTime::now() - Duration::from_secs(7200))
            .expect("backdate sentinel");
        drop(file);

        let held = DatasetLock::acquire(&dataset, Duration::from_millis(50), Duration::from_millis(5)).await?;
        assert!(held.path().exists());
        let owner = std::fs::read_to_string(held.path()).expect("read lock");
        assert_eq!(LockOwner::parse(&owner).map(|o| o.pid), Some(std::process::id()));
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_after_bounds_how_long_a_held_lock_is_honoured() -> Result<(), StoreError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let dataset = dir.path().join("observation.parquet");
        let _held = DatasetLock::acquire(&dataset, Duration::from_secs(1), Duration::from_millis(5)).await?;

        let outcome = DatasetLock::acquire_reclaiming(
            &dataset,
            Duration::from_millis(40),
            Duration::from_millis(5),
            Duration::from_millis(10),
        )
        .await;
        // Old enough to be stale, so the waiter takes it over.
        assert!(outcome.is_ok());

        let other = dir.path().join("forecast.parquet");
        let _held = DatasetLock::acquire(&other, Duration::from_secs(1), Duration::from_millis(5)).await?;
        let outcome = DatasetLock::acquire(&other, Duration::from_millis(40), Duration::from_millis(5)).await;
        assert!(matches!(outcome, Err(StoreError::LockTimeout { .. })));
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_lock_of_exited_process_is_reclaimed() -> Result<(), StoreError> {
        let Some(host) = host_name() else {
            return Ok(());
        };
        let mut child = std::process::Command::new("true").spawn().expect("spawn");
        let dead_pid = child.id();
        child.wait().expect("wait");

        let dir = tempfile::tempdir().expect("tempdir");
        let dataset = dir.path().join("observation.parquet");
        std::fs::write(DatasetLock::lock_path(&dataset), format!("{dead_pid} {host}\n"))
            .expect("write sentinel");

        let held = DatasetLock::acquire(&dataset, Duration::from_millis(50), Duration::from_millis(5)).await?;
        assert!(held.path().exists());
        Ok(())
    }

    #[test]
    fn test_owner_from_other_host_is_never_gone() {
        let owner = LockOwner {
            pid: u32::MAX,
            host: Some("elsewhere.invalid".to_string()),
        };
        assert!(!owner.is_gone());
        assert!(!LockOwner { pid: u32::MAX, host: None }.is_gone());
    }
}
