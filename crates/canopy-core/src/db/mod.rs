//! SQLite closure store utilities.
//!
//! Runtime defaults are intentionally conservative:
//! - `journal_mode = WAL` so independent worker connections interleave
//! - `busy_timeout = 5s` to absorb transient write contention
//! - `foreign_keys = ON` so no committed edge can reference a missing node

pub mod migrations;
pub mod query;
pub mod schema;

use crate::config::StoreOptions;
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::{path::Path, time::Duration};

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the closure store with default options, apply runtime
/// pragmas, and migrate schema to the latest version.
///
/// Every worker opens its own connection; connections are never shared
/// across threads.
///
/// # Errors
///
/// Returns an error if opening/configuring/migrating the database fails.
pub fn open_store(path: &Path) -> Result<Connection> {
    open_store_with(path, &StoreOptions::default())
}

/// Open the closure store with explicit [`StoreOptions`].
///
/// # Errors
///
/// Returns an error if opening/configuring/migrating the database fails.
pub fn open_store_with(path: &Path, options: &StoreOptions) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create store directory {}", parent.display()))?;
    }

    let mut conn = Connection::open(path)
        .with_context(|| format!("open closure store {}", path.display()))?;

    configure_connection(&conn, options.busy_timeout()).context("configure sqlite pragmas")?;
    migrations::migrate(&mut conn).context("apply store migrations")?;

    Ok(conn)
}

fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}
