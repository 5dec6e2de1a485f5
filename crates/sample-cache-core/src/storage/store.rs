use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::sqlite::Database;
use crate::error::Error;
use crate::lock::{LockGuard, LockOptions, StoreLock};

enum Backend {
    File {
        path: PathBuf,
        lock: Option<StoreLock>,
    },
    Memory(Database),
}

/// The shared sample store.
///
/// File-backed stores are opened per session, after the lock is held, so no
/// process touches the file without holding the lock.
pub struct SampleStore {
    backend: Backend,
}

/// One locked unit of work against the store.
pub struct StoreSession<'a> {
    // declared before the guard: the connection closes before the lock is released
    db: SessionDb<'a>,
    _guard: Option<LockGuard>,
}

enum SessionDb<'a> {
    Owned(Database),
    Borrowed(&'a Database),
}

impl SampleStore {
    /// Store at `path`, or an in-memory store when `path` is `None`.
    pub fn open(path: Option<&Path>, lock_options: LockOptions) -> Result<Self, Error> {
        match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)?;
                    }
                }
                debug!("Sample store at {}", path.display());
                let lock = lock_options
                    .enabled
                    .then(|| StoreLock::for_store(path, lock_options));
                Ok(Self {
                    backend: Backend::File {
                        path: path.to_path_buf(),
                        lock,
                    },
                })
            }
            None => Self::in_memory(),
        }
    }

    pub fn in_memory() -> Result<Self, Error> {
        debug!("Sample store in memory");
        Ok(Self {
            backend: Backend::Memory(Database::open_in_memory()?),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::File { path, .. } => Some(path),
            Backend::Memory(_) => None,
        }
    }

    /// Acquire the lock (when enabled) and open the store.
    pub fn session(&self) -> Result<StoreSession<'_>, Error> {
        match &self.backend {
            Backend::File { path, lock } => {
                let guard = match lock {
                    Some(lock) => Some(lock.acquire().map_err(|err| {
                        Error::Lock(format!(
                            "cannot create lockfile {}: {}",
                            lock.marker().display(),
                            err
                        ))
                    })?),
                    None => None,
                };
                let db = Database::open(&path.to_string_lossy())?;
                Ok(StoreSession {
                    db: SessionDb::Owned(db),
                    _guard: guard,
                })
            }
            Backend::Memory(db) => Ok(StoreSession {
                db: SessionDb::Borrowed(db),
                _guard: None,
            }),
        }
    }
}

impl Deref for StoreSession<'_> {
    type Target = Database;

    fn deref(&self) -> &Database {
        match &self.db {
            SessionDb::Owned(db) => db,
            SessionDb::Borrowed(db) => db,
        }
    }
}
