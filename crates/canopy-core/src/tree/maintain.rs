//! Hierarchy maintenance: structural transactions that keep the closure
//! index exact.
//!
//! Every operation here is one atomic unit: node rows and closure rows
//! change together or not at all. A transaction that cannot re-establish
//! the closure property rolls back with [`TreeError::ClosureViolation`]
//! instead of committing a corrupt index.
//!
//! Locking: [`insert_child`] takes no lock itself — the resolver already
//! holds the `(parent, name)` key, and direct callers that skip the
//! resolver accept duplicate siblings. Deletion acquires node-scoped keys
//! here, in ascending node-id order when more than one node is involved.

use rusqlite::{Connection, TransactionBehavior};

use super::{TreeError, node_lock_key};
use crate::db::query::{self, Edge, Node, NodeId};
use crate::lock::{LockGuard, LockManager};

/// Create one node under `parent` (or as a root), writing its self edge,
/// one edge per ancestor of the parent, and the direct parent edge, all in
/// one transaction.
///
/// # Errors
///
/// Returns [`TreeError::NodeNotFound`] if `parent` is given but no longer
/// exists, [`TreeError::ClosureViolation`] if the defensive closure check
/// fails (transaction rolled back), or [`TreeError::Db`] for storage
/// failures.
pub fn insert_child(
    conn: &mut Connection,
    parent: Option<NodeId>,
    name: &str,
) -> Result<Node, TreeError> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(anyhow::Error::from)?;

    let parent_edges = match parent {
        Some(pid) => {
            if query::get_node(&tx, pid)?.is_none() {
                return Err(TreeError::NodeNotFound(pid));
            }
            query::edges_to_node(&tx, pid)?
        }
        None => Vec::new(),
    };

    let node = query::insert_node(&tx, parent, name)?;

    // Self edge, then the parent's whole ancestor chain shifted one
    // generation down. The parent's own self edge becomes the direct
    // (parent, child, 1) row.
    let mut edges = Vec::with_capacity(parent_edges.len() + 1);
    edges.push(Edge {
        ancestor_id: node.node_id,
        descendant_id: node.node_id,
        generations: 0,
    });
    for parent_edge in &parent_edges {
        edges.push(Edge {
            ancestor_id: parent_edge.ancestor_id,
            descendant_id: node.node_id,
            generations: parent_edge.generations + 1,
        });
    }
    query::insert_edges(&tx, &edges)?;

    let written = query::edges_to_node(&tx, node.node_id)?.len();
    if written != parent_edges.len() + 1 {
        tracing::warn!(
            node_id = node.node_id,
            expected = parent_edges.len() + 1,
            written,
            "closure check failed on insert, rolling back"
        );
        return Err(TreeError::ClosureViolation {
            node_id: node.node_id,
            detail: format!(
                "expected {} closure rows after insert, found {written}",
                parent_edges.len() + 1
            ),
        });
    }

    tx.commit().map_err(anyhow::Error::from)?;
    tracing::debug!(node_id = node.node_id, name, parent = ?parent, "node inserted");
    Ok(node)
}

/// Delete one childless node: every closure row naming it, then its row.
///
/// Deletion of a node with remaining children is rejected — cascading
/// removal must be explicit via [`delete_subtree`], so no committed state
/// ever contains a dangling parent link.
///
/// # Errors
///
/// Returns [`TreeError::NodeNotFound`] if the node is already gone (safe to
/// treat as a no-op when racing another deletion),
/// [`TreeError::HasChildren`] when children remain, [`TreeError::Lock`] on
/// lock failure, or [`TreeError::Db`] for storage failures.
pub fn delete(conn: &mut Connection, locks: &dyn LockManager, id: NodeId) -> Result<(), TreeError> {
    let _guard = locks.acquire(&node_lock_key(id))?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(anyhow::Error::from)?;

    if query::get_node(&tx, id)?.is_none() {
        return Err(TreeError::NodeNotFound(id));
    }
    let child_count = query::count_children(&tx, id)?;
    if child_count > 0 {
        return Err(TreeError::HasChildren {
            node_id: id,
            child_count,
        });
    }

    query::delete_edges_for_node(&tx, id)?;
    query::delete_node_row(&tx, id)?;
    tx.commit().map_err(anyhow::Error::from)?;
    tracing::debug!(node_id = id, "node deleted");
    Ok(())
}

/// Delete a node and its entire subtree.
///
/// Locks the whole victim set in ascending node-id order — the canonical
/// total order every deleter agrees on — then re-reads the subtree under
/// the locks and deletes leaf-upward in one transaction. If a resolver
/// grew the subtree between the read and the locks, the locks are dropped
/// and the collection restarts with the larger set.
///
/// Returns the number of node rows removed.
///
/// # Errors
///
/// Returns [`TreeError::NodeNotFound`] if the target is already gone,
/// [`TreeError::Lock`] on lock failure, or [`TreeError::Db`] for storage
/// failures.
pub fn delete_subtree(
    conn: &mut Connection,
    locks: &dyn LockManager,
    id: NodeId,
) -> Result<usize, TreeError> {
    loop {
        if query::get_node(conn, id)?.is_none() {
            return Err(TreeError::NodeNotFound(id));
        }
        let mut victim_ids: Vec<NodeId> = query::self_and_descendants_of(conn, id)?
            .iter()
            .map(|node| node.node_id)
            .collect();
        victim_ids.sort_unstable();

        let mut guards: Vec<Box<dyn LockGuard>> = Vec::with_capacity(victim_ids.len());
        for victim in &victim_ids {
            guards.push(locks.acquire(&node_lock_key(*victim))?);
        }

        // Under the locks, the subtree can only have shrunk (concurrent
        // deleters we raced) or grown (a resolver inserted below us). A
        // grown subtree needs locks we don't hold, so start over.
        if query::get_node(conn, id)?.is_none() {
            return Err(TreeError::NodeNotFound(id));
        }
        let current = query::self_and_descendants_of(conn, id)?;
        if !current
            .iter()
            .all(|node| victim_ids.binary_search(&node.node_id).is_ok())
        {
            tracing::debug!(node_id = id, "subtree grew during lock acquisition, retrying");
            drop(guards);
            continue;
        }

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(anyhow::Error::from)?;
        // Leaf-upward: nearest-generation ordering reversed, so every child
        // row is gone before its parent's.
        let ordered = query::self_and_descendants_of(&tx, id)?;
        let mut removed = 0usize;
        for node in ordered.iter().rev() {
            query::delete_edges_for_node(&tx, node.node_id)?;
            if query::delete_node_row(&tx, node.node_id)? {
                removed += 1;
            }
        }
        tx.commit().map_err(anyhow::Error::from)?;
        tracing::debug!(node_id = id, removed, "subtree deleted");
        return Ok(removed);
    }
}
