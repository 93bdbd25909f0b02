//! Named advisory locks shared by every worker touching one store.
//!
//! The hierarchy protocol serializes find-or-create and deletion through
//! short-lived locks keyed by arbitrary strings. The key space is owned by
//! the callers (`tree::resolve` and `tree::maintain` document theirs); the
//! managers here only promise mutual exclusion per key among cooperating
//! workers. The locks are advisory: a writer that mutates the store without
//! going through them gets no protection and can corrupt sibling uniqueness.
//!
//! Two implementations:
//! - [`FsLockManager`]: one `fs2` advisory file lock per key under a lock
//!   directory. Visible across processes on the same host.
//! - [`MemoryLockManager`]: a named mutex table. Single process only, used
//!   by tests and embedded callers.

use crate::config::StoreOptions;
use crate::error::ErrorCode;
use fs2::FileExt;
use std::{
    collections::HashSet,
    fmt::Write as _,
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};

/// Advisory lock errors.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The lock stayed held by another worker for the whole wait budget.
    #[error("lock '{key}' timed out after {waited:?}")]
    Timeout { key: String, waited: Duration },
    /// The lock backend failed (lock file creation, flock syscall).
    #[error("lock backend i/o: {0}")]
    Io(#[from] io::Error),
}

impl LockError {
    /// Machine-readable code associated with this lock error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Io(_) => ErrorCode::StoreFailure,
        }
    }

    /// Optional remediation hint for operators and agents.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// A held named lock. Released when dropped.
pub trait LockGuard: Send + std::fmt::Debug {
    /// The key this guard holds.
    fn key(&self) -> &str;
}

/// Provider of named mutual exclusion across workers.
///
/// Injected into the resolver and maintainer so the same protocol runs
/// against a file-lock directory, a database lock, or an in-memory table.
pub trait LockManager: Send + Sync {
    /// Acquire the lock for `key`, blocking (with backoff) until granted.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if the manager's wait budget runs out,
    /// or [`LockError::Io`] if the backend fails.
    fn acquire(&self, key: &str) -> Result<Box<dyn LockGuard>, LockError>;

    /// Acquire the lock for `key` without waiting.
    ///
    /// Returns `Ok(None)` when another worker holds the lock.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Io`] if the backend fails.
    fn try_acquire(&self, key: &str) -> Result<Option<Box<dyn LockGuard>>, LockError>;
}

// ---------------------------------------------------------------------------
// File-backed manager
// ---------------------------------------------------------------------------

const RETRY_SLEEP: Duration = Duration::from_millis(10);

/// Default wait budget for a single lock acquisition.
///
/// Locks in this protocol are held for one small transaction, so a multi-
/// second wait means real contention, not a stuck holder.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Cross-process lock manager backed by advisory file locks.
///
/// Each key maps to one lock file under `dir`; the file is created on first
/// use and never removed (empty lock files are cheap and removal races with
/// concurrent acquirers).
#[derive(Debug, Clone)]
pub struct FsLockManager {
    dir: PathBuf,
    timeout: Duration,
}

impl FsLockManager {
    /// Create a manager rooted at `dir` with the default wait budget.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_timeout(dir, DEFAULT_LOCK_TIMEOUT)
    }

    /// Create a manager rooted at `dir` with an explicit wait budget.
    #[must_use]
    pub fn with_timeout(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
        }
    }

    /// Create a manager from [`StoreOptions`] for the store at `store_path`.
    ///
    /// Uses `lock_dir` when set, otherwise a `<store>.locks` sibling of the
    /// store file, and the configured lock wait budget.
    #[must_use]
    pub fn from_options(options: &StoreOptions, store_path: &Path) -> Self {
        let dir = options
            .lock_dir
            .clone()
            .unwrap_or_else(|| store_path.with_extension("locks"));
        Self::with_timeout(dir, options.lock_timeout())
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", encode_key(key)))
    }

    fn open_and_lock(
        &self,
        key: &str,
        wait: Option<Duration>,
    ) -> Result<Option<FsGuard>, LockError> {
        let path = self.lock_path(key);
        fs::create_dir_all(&self.dir)?;

        let start = Instant::now();
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)?;

            if file.try_lock_exclusive().is_ok() {
                tracing::trace!(key, "file lock acquired");
                return Ok(Some(FsGuard {
                    file,
                    key: key.to_string(),
                }));
            }

            let Some(budget) = wait else {
                return Ok(None);
            };
            if start.elapsed() >= budget {
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited: start.elapsed(),
                });
            }

            thread::sleep(RETRY_SLEEP);
        }
    }
}

impl LockManager for FsLockManager {
    fn acquire(&self, key: &str) -> Result<Box<dyn LockGuard>, LockError> {
        let guard = self.open_and_lock(key, Some(self.timeout))?;
        // open_and_lock only returns None when wait is None.
        guard.map_or_else(
            || {
                Err(LockError::Io(io::Error::other(
                    "blocking acquire returned no guard",
                )))
            },
            |g| Ok(Box::new(g) as Box<dyn LockGuard>),
        )
    }

    fn try_acquire(&self, key: &str) -> Result<Option<Box<dyn LockGuard>>, LockError> {
        Ok(self
            .open_and_lock(key, None)?
            .map(|g| Box::new(g) as Box<dyn LockGuard>))
    }
}

#[derive(Debug)]
struct FsGuard {
    file: std::fs::File,
    key: String,
}

impl LockGuard for FsGuard {
    fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for FsGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        tracing::trace!(key = %self.key, "file lock released");
    }
}

/// Encode a lock key into a safe file name.
///
/// Alphanumerics plus `.`, `_`, `-` pass through; every other byte becomes
/// `%XX`. Distinct keys always map to distinct file names.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

// ---------------------------------------------------------------------------
// In-memory manager
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryTable {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Single-process lock manager backed by a named mutex table.
///
/// Clones share the same table, so one manager can be handed to many
/// threads either via `clone()` or behind an `Arc`.
#[derive(Debug, Clone)]
pub struct MemoryLockManager {
    table: Arc<MemoryTable>,
    timeout: Duration,
}

impl MemoryLockManager {
    /// Create a manager with the default wait budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Create a manager with an explicit wait budget.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            table: Arc::new(MemoryTable::default()),
            timeout,
        }
    }
}

impl Default for MemoryLockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager for MemoryLockManager {
    fn acquire(&self, key: &str) -> Result<Box<dyn LockGuard>, LockError> {
        let start = Instant::now();
        let mut held = self
            .table
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while held.contains(key) {
            let remaining = self.timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited: start.elapsed(),
                });
            }
            let (guard, result) = self
                .table
                .released
                .wait_timeout(held, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            held = guard;
            if result.timed_out() && held.contains(key) {
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited: start.elapsed(),
                });
            }
        }

        held.insert(key.to_string());
        tracing::trace!(key, "memory lock acquired");
        Ok(Box::new(MemoryGuard {
            table: Arc::clone(&self.table),
            key: key.to_string(),
        }))
    }

    fn try_acquire(&self, key: &str) -> Result<Option<Box<dyn LockGuard>>, LockError> {
        let mut held = self
            .table
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if held.contains(key) {
            return Ok(None);
        }
        held.insert(key.to_string());
        Ok(Some(Box::new(MemoryGuard {
            table: Arc::clone(&self.table),
            key: key.to_string(),
        })))
    }
}

#[derive(Debug)]
struct MemoryGuard {
    table: Arc<MemoryTable>,
    key: String,
}

impl LockGuard for MemoryGuard {
    fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for MemoryGuard {
    fn drop(&mut self) {
        let mut held = self.table.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.key);
        drop(held);
        self.table.released.notify_all();
        tracing::trace!(key = %self.key, "memory lock released");
    }
}
