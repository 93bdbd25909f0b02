//! Runtime options for the store and lock manager.
//!
//! Serde-enabled so host applications can embed a `[canopy]` table in their
//! own config files; every field has a conservative default.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreOptions {
    /// SQLite busy timeout, milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Wait budget for one advisory lock acquisition, milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Directory for lock files, consumed by
    /// [`FsLockManager::from_options`](crate::lock::FsLockManager::from_options).
    /// Defaults to a `<store>.locks` sibling of the store file when unset.
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_dir: None,
        }
    }
}

impl StoreOptions {
    /// Busy timeout as a [`Duration`].
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Lock wait budget as a [`Duration`].
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn default_busy_timeout_ms() -> u64 {
    u64::try_from(crate::db::DEFAULT_BUSY_TIMEOUT.as_millis()).unwrap_or(u64::MAX)
}

fn default_lock_timeout_ms() -> u64 {
    u64::try_from(crate::lock::DEFAULT_LOCK_TIMEOUT.as_millis()).unwrap_or(u64::MAX)
}
