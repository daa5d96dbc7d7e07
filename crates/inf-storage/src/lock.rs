//! Directory lock with expiry.
//!
//! A lock is the file `<dir>/lock` created with create-new semantics. It
//! holds a JSON stamp naming the owner and the time the stamp was last
//! refreshed. A stamp older than the TTL belongs to an abandoned owner and
//! is reclaimed by the next contender.
//!
//! Reclaiming happens under an OS file lock on `<dir>/lock.guard`, and the
//! stamp is checked again once the guard is held. Contenders that saw the
//! same stale stamp therefore can't delete a lock a faster contender has
//! just created. The OS drops the guard when its holder dies.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use ulid::Ulid;

use inf_types::LockSettings;

use crate::error::StorageError;

const LOCK_FILE: &str = "lock";
const GUARD_FILE: &str = "lock.guard";

/// Timing of lock acquisition and expiry.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Stamps older than this are reclaimed
    pub ttl: Duration,
    /// Give up waiting for a contended lock after this long
    pub wait: Duration,
    /// Poll interval while waiting
    pub poll: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self::from(&LockSettings::default())
    }
}

impl From<&LockSettings> for LockOptions {
    fn from(settings: &LockSettings) -> Self {
        Self {
            ttl: Duration::from_secs(settings.ttl_secs),
            wait: Duration::from_millis(settings.wait_ms),
            poll: Duration::from_millis(settings.poll_ms),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Stamp {
    owner: String,
    acquired_ms: i64,
}

/// Exclusive ownership of one directory, released on drop.
#[derive(Debug)]
pub struct Lock {
    dir: PathBuf,
    owner: String,
    options: LockOptions,
    touched: Mutex<Instant>,
    expired: AtomicBool,
}

impl Lock {
    /// Acquire the lock on `dir`, creating the directory if needed.
    ///
    /// Blocks up to `options.wait` while the lock is held by a live owner,
    /// then fails with `LockBusy`.
    pub fn acquire(dir: &Path, options: &LockOptions) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);
        let owner = Ulid::new().to_string();
        let started = Instant::now();

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let stamp = Stamp {
                        owner: owner.clone(),
                        acquired_ms: Utc::now().timestamp_millis(),
                    };
                    file.write_all(&serde_json::to_vec(&stamp)?)?;
                    file.sync_all()?;
                    debug!(dir = %dir.display(), owner = %owner, "Lock acquired");
                    return Ok(Self {
                        dir: dir.to_path_buf(),
                        owner,
                        options: *options,
                        touched: Mutex::new(Instant::now()),
                        expired: AtomicBool::new(false),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Self::abandoned(&path, options.ttl)? {
                        Self::reclaim(dir, options.ttl)?;
                        continue;
                    }
                    if started.elapsed() >= options.wait {
                        return Err(StorageError::LockBusy(format!(
                            "{} is locked by another owner",
                            dir.display()
                        )));
                    }
                    std::thread::sleep(options.poll);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Remove an abandoned stamp while holding the reclaim guard.
    ///
    /// Returns whether this caller removed it. The stamp may have been
    /// reclaimed and replaced by someone else while we waited for the guard.
    fn reclaim(dir: &Path, ttl: Duration) -> Result<bool, StorageError> {
        let guard = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(GUARD_FILE))?;
        guard.lock_exclusive()?;

        let path = dir.join(LOCK_FILE);
        let removed = if Self::abandoned(&path, ttl)? {
            match fs::remove_file(&path) {
                Ok(()) => {
                    warn!(dir = %dir.display(), "Reclaimed expired lock");
                    true
                }
                Err(e) if e.kind() == ErrorKind::NotFound => false,
                Err(e) => return Err(e.into()),
            }
        } else {
            false
        };
        FileExt::unlock(&guard)?;
        Ok(removed)
    }

    /// Whether the stamp at `path` is older than `ttl`.
    ///
    /// An unreadable stamp (owner crashed mid-write) is judged by the file's
    /// modification time instead.
    fn abandoned(path: &Path, ttl: Duration) -> Result<bool, StorageError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        match serde_json::from_slice::<Stamp>(&bytes) {
            Ok(stamp) => Ok(Utc::now().timestamp_millis() - stamp.acquired_ms > ttl_ms),
            Err(_) => {
                let age = fs::metadata(path)?
                    .modified()?
                    .elapsed()
                    .unwrap_or_default();
                Ok(age > ttl)
            }
        }
    }

    /// The locked directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fail with `LockExpired` if the stamp no longer names this owner.
    pub fn ensure(&self) -> Result<(), StorageError> {
        let path = self.dir.join(LOCK_FILE);
        let current = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<Stamp>(&bytes).ok(),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        match current {
            Some(stamp) if stamp.owner == self.owner => Ok(()),
            _ => Err(StorageError::LockExpired(format!(
                "{} is no longer locked by {}",
                self.dir.display(),
                self.owner
            ))),
        }
    }

    /// Refresh the stamp so the lock doesn't expire.
    pub fn touch(&self) -> Result<(), StorageError> {
        self.ensure()?;
        let stamp = Stamp {
            owner: self.owner.clone(),
            acquired_ms: Utc::now().timestamp_millis(),
        };
        let path = self.dir.join(LOCK_FILE);
        let tmp = self.dir.join(format!("{}.{}", LOCK_FILE, self.owner));
        fs::write(&tmp, serde_json::to_vec(&stamp)?)?;
        fs::rename(&tmp, &path)?;
        if let Ok(mut touched) = self.touched.lock() {
            *touched = Instant::now();
        }
        Ok(())
    }

    /// Touch the stamp if a quarter of the TTL has passed since the last touch.
    pub fn refresh(&self) -> Result<(), StorageError> {
        let due = self
            .touched
            .lock()
            .map(|touched| touched.elapsed() >= self.options.ttl / 4)
            .unwrap_or(true);
        if due {
            self.touch()?;
        }
        Ok(())
    }

    /// Remove the whole directory when the lock is released.
    pub fn expire(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if self.expired.load(Ordering::SeqCst) {
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                warn!(dir = %self.dir.display(), error = %e, "Failed to remove expired directory");
            } else {
                debug!(dir = %self.dir.display(), "Expired directory removed");
            }
            return;
        }
        if self.ensure().is_ok() {
            if let Err(e) = fs::remove_file(self.dir.join(LOCK_FILE)) {
                warn!(dir = %self.dir.display(), error = %e, "Failed to release lock");
            } else {
                debug!(dir = %self.dir.display(), "Lock released");
            }
        }
    }
}
