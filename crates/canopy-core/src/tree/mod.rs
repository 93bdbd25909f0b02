//! The hierarchy protocol: path resolution, structural mutation, and
//! closure-index verification.
//!
//! Everything in this module tree works through two collaborators that the
//! caller supplies: a `rusqlite::Connection` onto the closure store (one
//! per worker, see [`crate::db`]) and a [`LockManager`](crate::lock::LockManager)
//! shared by every worker. The lock discipline:
//!
//! - **Resolution** locks one `(parent, name)` key per level, top-down,
//!   releasing before descending. Two resolvers either touch disjoint keys
//!   or contend on the first differing level in the same order, so no
//!   cyclic wait can form.
//! - **Deletion** locks node-scoped keys for the whole victim set in
//!   ascending node-id order before mutating. Overlapping deleters acquire
//!   their common keys in the same relative order.
//!
//! No lock is ever held across a wait on another lock at a deeper level,
//! and every lock is released at the end of one small transaction, so
//! liveness only needs every holder to finish its transaction.

pub mod maintain;
pub mod resolve;
pub mod verify;

use crate::db::query::NodeId;
use crate::error::ErrorCode;
use crate::lock::LockError;

/// Errors from the resolver and maintainer.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// The referenced node no longer exists. Safe to treat as a no-op when
    /// racing another deletion.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),
    /// Deletion rejected: the node still has children. Delete them first or
    /// use [`maintain::delete_subtree`].
    #[error("node {node_id} still has {child_count} children")]
    HasChildren { node_id: NodeId, child_count: usize },
    /// The closure index would have been left inconsistent; the transaction
    /// was rolled back. Indicates a locking-discipline bug upstream.
    #[error("closure index violation on node {node_id}: {detail}")]
    ClosureViolation { node_id: NodeId, detail: String },
    /// An empty path with no starting scope resolves to nothing.
    #[error("empty path with no starting scope")]
    EmptyPath,
    /// Advisory lock acquisition failed.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// An underlying storage error.
    #[error("store error: {0}")]
    Db(#[from] anyhow::Error),
}

impl TreeError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NodeNotFound(_) => ErrorCode::NodeNotFound,
            Self::HasChildren { .. } => ErrorCode::ChildrenRemain,
            Self::ClosureViolation { .. } => ErrorCode::ClosureViolation,
            Self::EmptyPath => ErrorCode::EmptyPath,
            Self::Lock(err) => err.code(),
            Self::Db(_) => ErrorCode::StoreFailure,
        }
    }

    /// Optional remediation hint for operators and agents.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// Lock key for a `(parent, name)` resolution slot.
///
/// `None` parents (top-level roots) share the `root` scope, so two workers
/// creating the same root name contend on the same key.
#[must_use]
pub fn resolve_lock_key(parent: Option<NodeId>, name: &str) -> String {
    match parent {
        Some(id) => format!("canopy:tree:{id}:{name}"),
        None => format!("canopy:tree:root:{name}"),
    }
}

/// Lock key scoped to a single node, used by deletion.
#[must_use]
pub fn node_lock_key(id: NodeId) -> String {
    format!("canopy:node:{id}")
}
