//! canopy-core: concurrency-safe closure-table hierarchies over SQLite.
//!
//! Many independent workers — threads, processes, machines sharing one
//! store — resolve or create chains of named nodes without ever producing
//! duplicate siblings, and mutate the structure without deadlocking. The
//! store keeps a materialized transitive closure (the `hierarchy` table)
//! so ancestor/descendant queries are index lookups, not graph walks.
//!
//! # Conventions
//!
//! - **Errors**: typed enums per concern ([`TreeError`], [`lock::LockError`])
//!   with stable [`error::ErrorCode`]s; `anyhow` at the query layer.
//! - **Logging**: `tracing` macros (`debug!` on structural transactions,
//!   `trace!` on lock traffic, `warn!` on closure-check failures).
//!
//! # Example
//!
//! ```no_run
//! use canopy_core::{db, lock::FsLockManager, tree::resolve};
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut conn = db::open_store(Path::new("data/canopy.sqlite3"))?;
//! let locks = FsLockManager::new("data/locks");
//!
//! let leaf = resolve::find_or_create_by_path(&mut conn, &locks, None, &["2026", "a", "b"])?;
//! println!("resolved node {}", leaf.node_id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod lock;
pub mod tree;

pub use config::StoreOptions;
pub use db::query::{Edge, Node, NodeId};
pub use error::ErrorCode;
pub use lock::{FsLockManager, LockError, LockGuard, LockManager, MemoryLockManager};
pub use tree::TreeError;
