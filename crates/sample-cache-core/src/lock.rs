//! Cross-process lock over the store file.
//!
//! The marker `<store>.lock` is created atomically (a symlink to the store on
//! unix, an exclusively created file elsewhere). Whoever creates it holds the
//! lock until the marker is removed. Waiters back off for
//! `uniform(0, 2^n - 1)` units, growing `n` up to `max_count`; past that they
//! keep polling and remove a marker older than `max_age`, assuming its holder died.

use rand::Rng;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{debug, error};

pub const LOCK_SUFFIX: &str = ".lock";

#[derive(Debug, Clone)]
pub struct LockOptions {
    pub enabled: bool,
    /// Backoff exponent cap.
    pub max_count: u32,
    /// Age after which a marker counts as abandoned.
    pub max_age: Duration,
    /// Length of one backoff unit.
    pub backoff_unit: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_count: 6,
            max_age: Duration::from_secs(300),
            backoff_unit: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreLock {
    target: PathBuf,
    marker: PathBuf,
    options: LockOptions,
}

/// Held lock; the marker is removed on drop.
#[derive(Debug)]
pub struct LockGuard {
    marker: PathBuf,
}

impl StoreLock {
    pub fn for_store(store_path: &Path, options: LockOptions) -> Self {
        Self {
            target: store_path.to_path_buf(),
            marker: marker_path(store_path),
            options,
        }
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Single attempt. `Ok(None)` when someone else holds the lock.
    pub fn try_acquire(&self) -> io::Result<Option<LockGuard>> {
        match create_marker(&self.target, &self.marker) {
            Ok(()) => Ok(Some(LockGuard {
                marker: self.marker.clone(),
            })),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Block until the lock is held.
    pub fn acquire(&self) -> io::Result<LockGuard> {
        debug!("Creating lockfile {}", self.marker.display());
        let mut count: u32 = 1;
        loop {
            if let Some(guard) = self.try_acquire()? {
                return Ok(guard);
            }

            let wait = self.backoff(count);
            debug!(
                "Waiting {:.1} seconds for lockfile {}...",
                wait.as_secs_f64(),
                self.marker.display()
            );
            thread::sleep(wait);

            if count < self.options.max_count {
                count += 1;
            } else {
                self.remove_if_stale();
            }
        }
    }

    fn backoff(&self, count: u32) -> Duration {
        let upper = 2f64.powi(count.min(62) as i32) - 1.0;
        let units = rand::rng().random_range(0.0..=upper);
        self.options.backoff_unit.mul_f64(units)
    }

    fn remove_if_stale(&self) {
        let age = match marker_age(&self.marker) {
            Ok(age) => age,
            // gone already, or unreadable; the next attempt will tell
            Err(_) => return,
        };
        if age > self.options.max_age {
            error!(
                "Lockfile age is {:.0}s, older than {}s. Removing it.",
                age.as_secs_f64(),
                self.options.max_age.as_secs()
            );
            if let Err(err) = fs::remove_file(&self.marker) {
                error!("Error removing lockfile {}: {}", self.marker.display(), err);
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        debug!("Deleting lockfile {}", self.marker.display());
        if let Err(err) = fs::remove_file(&self.marker) {
            error!("Error deleting lockfile {}: {}", self.marker.display(), err);
        }
    }
}

/// `<store>.lock`, appended to the full file name so the marker never
/// coincides with the store itself.
pub fn marker_path(store_path: &Path) -> PathBuf {
    let mut name = store_path.as_os_str().to_owned();
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

fn marker_age(marker: &Path) -> io::Result<Duration> {
    let modified = fs::symlink_metadata(marker)?.modified()?;
    Ok(SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO))
}

#[cfg(unix)]
fn create_marker(target: &Path, marker: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, marker)
}

#[cfg(not(unix))]
fn create_marker(_target: &Path, marker: &Path) -> io::Result<()> {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(marker)
        .map(|_| ())
}
