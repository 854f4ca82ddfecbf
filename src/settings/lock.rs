//! Cross-process lock around settings file I/O
//!
//! The lock is a sibling file created with `create_new`; whoever creates it
//! owns it until the guard is dropped.

use crate::constants::{LOCK_ACQUIRE_TIMEOUT_SECS, LOCK_RETRY_MS, STALE_LOCK_SECS};
use crate::error::SettingsError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, Instant};

/// Held lock file, removed on drop
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    released: bool,
}

impl FileLock {
    /// Acquires the lock with the default timeout
    pub async fn acquire(path: &Path) -> Result<Self, SettingsError> {
        Self::acquire_with_timeout(path, Duration::from_secs(LOCK_ACQUIRE_TIMEOUT_SECS)).await
    }

    /// Acquires the lock, retrying until `timeout` elapses
    ///
    /// A lock file older than the stale threshold is taken over.
    pub async fn acquire_with_timeout(
        path: &Path,
        timeout: Duration,
    ) -> Result<Self, SettingsError> {
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .await
            {
                Ok(mut file) => {
                    let owner = format!("{}\n", std::process::id());
                    if let Err(e) = file.write_all(owner.as_bytes()).await {
                        tracing::debug!(error = %e, "Could not record lock owner");
                    }
                    return Ok(Self {
                        path: path.to_path_buf(),
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if take_over_stale(path).await {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(SettingsError::LockTimeout(path.to_path_buf()));
                    }
                    sleep(Duration::from_millis(LOCK_RETRY_MS)).await;
                }
                Err(e) => return Err(SettingsError::persistence(path, e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the lock file without blocking the runtime
    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::warn!(lock = %self.path.display(), error = %e, "Failed to release settings lock");
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "Failed to release settings lock");
        }
    }
}

/// Moves a stale lock file out of the way, returning whether it was removed
///
/// The file is renamed aside before its age is checked again, so a waiter
/// that lost the race cannot unlink a lock another waiter just created. A
/// lock found fresh after the rename is linked back in place.
async fn take_over_stale(path: &Path) -> bool {
    if !is_stale(path).await {
        return false;
    }

    let aside = aside_path(path);
    if tokio::fs::rename(path, &aside).await.is_err() {
        // another waiter moved it first
        return false;
    }

    if is_stale(&aside).await {
        tracing::warn!(lock = %path.display(), "Removing stale settings lock");
        let _ = tokio::fs::remove_file(&aside).await;
        return true;
    }

    if let Err(e) = tokio::fs::hard_link(&aside, path).await {
        tracing::warn!(lock = %path.display(), error = %e, "Could not restore settings lock");
    }
    let _ = tokio::fs::remove_file(&aside).await;
    false
}

fn aside_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    path.with_file_name(format!("{}.stale.{}.{}", file_name, std::process::id(), nanos))
}

async fn is_stale(path: &Path) -> bool {
    let modified = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return false,
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > Duration::from_secs(STALE_LOCK_SECS))
        .unwrap_or(false)
}
