//! Path resolution: advisory-locked find-or-create, one segment at a time.
//!
//! The protocol walks the path top-down. At each level it takes the lock
//! keyed by the current `(parent, name)` slot, looks for the child, creates
//! it when absent, releases the lock, and descends. The lock total-orders
//! racing find/insert attempts on a slot, so exactly one insert wins and
//! every loser observes the winner's row; callers in disjoint subtrees
//! never touch the same key and proceed in parallel.

use rusqlite::Connection;

use super::{TreeError, maintain, resolve_lock_key};
use crate::db::query::{self, Node, NodeId};
use crate::lock::LockManager;

/// Resolve `path` under `root`, creating missing segments.
///
/// A `root` of `None` means the first segment names (or creates) a
/// top-level root. Idempotent: resolving the same path twice returns the
/// same node chain. A pre-existing top-level node already named like the
/// first segment is shared, not duplicated — uniqueness is per
/// `(parent, name)`, never per name alone.
///
/// An empty path returns the scope node itself when one is given.
///
/// # Errors
///
/// Returns [`TreeError::EmptyPath`] for an empty path with no scope,
/// [`TreeError::NodeNotFound`] if `root` no longer exists,
/// [`TreeError::Lock`] on lock failure, or [`TreeError::Db`] for storage
/// failures.
pub fn find_or_create_by_path<S: AsRef<str>>(
    conn: &mut Connection,
    locks: &dyn LockManager,
    root: Option<NodeId>,
    path: &[S],
) -> Result<Node, TreeError> {
    let mut current: Option<Node> = match root {
        Some(id) => Some(query::get_node(conn, id)?.ok_or(TreeError::NodeNotFound(id))?),
        None => None,
    };
    if path.is_empty() {
        return current.ok_or(TreeError::EmptyPath);
    }

    for segment in path {
        let name = segment.as_ref();
        let parent_id = current.as_ref().map(|node| node.node_id);

        // One lock per level, released before descending. Never hold a
        // child-level lock while waiting at an ancestor level.
        let guard = locks.acquire(&resolve_lock_key(parent_id, name))?;
        let child = match query::find_child(conn, parent_id, name)? {
            Some(existing) => existing,
            None => maintain::insert_child(conn, parent_id, name)?,
        };
        drop(guard);

        tracing::trace!(parent = ?parent_id, name, node_id = child.node_id, "segment resolved");
        current = Some(child);
    }

    current.ok_or(TreeError::EmptyPath)
}

/// Resolve `path` without creating anything.
///
/// Returns `Ok(None)` as soon as a segment is missing. Takes no locks —
/// a pure read.
///
/// # Errors
///
/// Returns [`TreeError::NodeNotFound`] if `root` no longer exists, or
/// [`TreeError::Db`] for storage failures.
pub fn find_by_path<S: AsRef<str>>(
    conn: &Connection,
    root: Option<NodeId>,
    path: &[S],
) -> Result<Option<Node>, TreeError> {
    let mut current: Option<Node> = match root {
        Some(id) => Some(query::get_node(conn, id)?.ok_or(TreeError::NodeNotFound(id))?),
        None => None,
    };

    for segment in path {
        let parent_id = current.as_ref().map(|node| node.node_id);
        match query::find_child(conn, parent_id, segment.as_ref())? {
            Some(child) => current = Some(child),
            None => return Ok(None),
        }
    }
    Ok(current)
}
