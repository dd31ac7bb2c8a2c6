use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::StoreError;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// How long to keep retrying before giving up with [`StoreError::Busy`].
    pub timeout: Duration,
    /// Lock files older than this are treated as left behind by a crashed
    /// process and removed. `None` never reclaims.
    pub stale_after: Option<Duration>,
    pub backoff: BackoffPolicy,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            stale_after: Some(Duration::from_secs(300)),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Advisory cross-process lock backed by a create-new lock file.
///
/// The file is removed when the guard drops, but only while it still carries
/// this guard's token.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
    token: Uuid,
}

impl StoreLock {
    pub fn acquire(path: impl Into<PathBuf>, options: &LockOptions) -> Result<Self, StoreError> {
        let path = path.into();
        let token = Uuid::new_v4();
        let started = Instant::now();
        let mut attempt = 0usize;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let stamp = format!(
                        "pid={} token={} acquired_at={}\n",
                        std::process::id(),
                        token,
                        Utc::now().to_rfc3339()
                    );
                    if let Err(source) = file.write_all(stamp.as_bytes()) {
                        drop(file);
                        let _ = fs::remove_file(&path);
                        return Err(StoreError::io(&path, source));
                    }
                    debug!(lock = %path.display(), attempts = attempt + 1, "store lock acquired");
                    return Ok(Self { path, token });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if reclaim_if_stale(&path, options.stale_after)? {
                        continue;
                    }
                    let waited = started.elapsed();
                    if waited >= options.timeout {
                        return Err(StoreError::Busy {
                            path,
                            waited_ms: waited.as_millis(),
                        });
                    }
                    let delay = options
                        .backoff
                        .delay_for_attempt(attempt)
                        .min(options.timeout - waited);
                    attempt += 1;
                    thread::sleep(delay);
                }
                Err(source) => return Err(StoreError::io(&path, source)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let ours = fs::read_to_string(&self.path)
            .map(|content| content.contains(&self.token.to_string()))
            .unwrap_or(false);
        if ours {
            if let Err(err) = fs::remove_file(&self.path) {
                warn!(lock = %self.path.display(), error = %err, "failed to release store lock");
            } else {
                debug!(lock = %self.path.display(), "store lock released");
            }
        }
    }
}

/// Returns true when the lock vanished or was reclaimed and acquisition
/// should be retried right away.
fn reclaim_if_stale(path: &Path, stale_after: Option<Duration>) -> Result<bool, StoreError> {
    let Some(stale_after) = stale_after else {
        return match fs::metadata(path) {
            Ok(_) => Ok(false),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(true),
            Err(source) => Err(StoreError::io(path, source)),
        };
    };
    // Read before stat: a lock swapped in after this read shows a fresh mtime.
    let observed = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
        Err(source) => return Err(StoreError::io(path, source)),
    };
    let modified = match fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
        Err(source) => return Err(StoreError::io(path, source)),
    };
    let age = match modified.elapsed() {
        Ok(age) => age,
        Err(_) => return Ok(false),
    };
    if age < stale_after {
        return Ok(false);
    }

    warn!(
        lock = %path.display(),
        age_secs = age.as_secs(),
        "removing stale store lock left by a previous process"
    );
    remove_if_unchanged(path, &observed)
}

/// Moves the lock aside and deletes it only if it still holds `observed`.
/// A lock that another process took in the meantime is linked back in place.
fn remove_if_unchanged(path: &Path, observed: &str) -> Result<bool, StoreError> {
    let mut aside = path.as_os_str().to_owned();
    aside.push(format!(".stale-{}", Uuid::new_v4()));
    let aside = PathBuf::from(aside);

    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(true),
        Err(source) => return Err(StoreError::io(path, source)),
    }

    let moved = fs::read_to_string(&aside).map_err(|source| StoreError::io(&aside, source))?;
    let unchanged = moved == observed;
    if !unchanged {
        debug!(lock = %path.display(), "stale lock was replaced before removal; restoring");
        if let Err(err) = fs::hard_link(&aside, path) {
            warn!(lock = %path.display(), error = %err, "could not restore a live store lock");
        }
    }
    match fs::remove_file(&aside) {
        Ok(()) => Ok(unchanged),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(unchanged),
        Err(source) => Err(StoreError::io(&aside, source)),
    }
}
