//! SQLite query helpers for the closure store.
//!
//! Free functions over a shared `&Connection` returning typed structs
//! (never raw rows). These are the primitive reads and writes the
//! maintainer and resolver compose inside their own transactions; nothing
//! here opens a transaction or takes a lock, and nothing here enforces the
//! closure invariants. See `tree::maintain` for the operations that do.

#![allow(clippy::module_name_repetitions)]

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};

/// Node identifier: the SQLite rowid of the `nodes` row.
pub type NodeId = i64;

/// One hierarchy member.
///
/// `name` is only unique among siblings of the same parent; root nodes
/// (`parent_id` = None) may share names with non-roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub node_id: NodeId,
    pub name: String,
    pub parent_id: Option<NodeId>,
}

/// One closure-table row: `descendant_id` is reachable from `ancestor_id`
/// in `generations` parent-link steps. `generations == 0` is the self edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Edge {
    pub ancestor_id: NodeId,
    pub descendant_id: NodeId,
    pub generations: i64,
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<Node> {
    Ok(Node {
        node_id: row.get(0)?,
        name: row.get(1)?,
        parent_id: row.get(2)?,
    })
}

const NODE_COLUMNS: &str = "node_id, name, parent_id";

// ---------------------------------------------------------------------------
// Node reads
// ---------------------------------------------------------------------------

/// Fetch a node by id.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_node(conn: &Connection, id: NodeId) -> Result<Option<Node>> {
    conn.query_row(
        &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE node_id = ?1"),
        [id],
        node_from_row,
    )
    .optional()
    .with_context(|| format!("get node {id}"))
}

/// Find the child of `parent` named `name`, or the root named `name` when
/// `parent` is `None`.
///
/// If the lock protocol was bypassed and duplicates exist, the row with the
/// smallest id wins, deterministically.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn find_child(conn: &Connection, parent: Option<NodeId>, name: &str) -> Result<Option<Node>> {
    conn.query_row(
        &format!(
            "SELECT {NODE_COLUMNS} FROM nodes
             WHERE parent_id IS ?1 AND name = ?2
             ORDER BY node_id
             LIMIT 1"
        ),
        params![parent, name],
        node_from_row,
    )
    .optional()
    .with_context(|| format!("find child '{name}' of {parent:?}"))
}

/// All root nodes (no parent), ordered by id.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn roots(conn: &Connection) -> Result<Vec<Node>> {
    collect_nodes(
        conn,
        &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE parent_id IS NULL ORDER BY node_id"),
        params![],
    )
    .context("list roots")
}

/// Direct children of `parent`, ordered by id.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn children_of(conn: &Connection, parent: NodeId) -> Result<Vec<Node>> {
    collect_nodes(
        conn,
        &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE parent_id = ?1 ORDER BY node_id"),
        params![parent],
    )
    .with_context(|| format!("children of {parent}"))
}

/// Number of direct children of `parent`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_children(conn: &Connection, parent: NodeId) -> Result<usize> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM nodes WHERE parent_id = ?1",
            [parent],
            |row| row.get(0),
        )
        .with_context(|| format!("count children of {parent}"))?;
    usize::try_from(count).context("child count out of range")
}

// ---------------------------------------------------------------------------
// Closure reads
// ---------------------------------------------------------------------------

/// Strict ancestors of `id`, in root-to-parent order (descending
/// generations). Excludes the node itself.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn ancestors_of(conn: &Connection, id: NodeId) -> Result<Vec<Node>> {
    collect_nodes(
        conn,
        &format!(
            "SELECT n.{NODE_COLUMNS_QUALIFIED} FROM nodes n
             JOIN hierarchy h ON h.ancestor_id = n.node_id
             WHERE h.descendant_id = ?1 AND h.generations > 0
             ORDER BY h.generations DESC"
        ),
        params![id],
    )
    .with_context(|| format!("ancestors of {id}"))
}

/// Ancestor chain of `id` including the node itself, root first, self last.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn self_and_ancestors_of(conn: &Connection, id: NodeId) -> Result<Vec<Node>> {
    collect_nodes(
        conn,
        &format!(
            "SELECT n.{NODE_COLUMNS_QUALIFIED} FROM nodes n
             JOIN hierarchy h ON h.ancestor_id = n.node_id
             WHERE h.descendant_id = ?1
             ORDER BY h.generations DESC"
        ),
        params![id],
    )
    .with_context(|| format!("self and ancestors of {id}"))
}

/// Strict descendants of `id` (excluding self), nearest generations first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn descendants_of(conn: &Connection, id: NodeId) -> Result<Vec<Node>> {
    collect_nodes(
        conn,
        &format!(
            "SELECT n.{NODE_COLUMNS_QUALIFIED} FROM nodes n
             JOIN hierarchy h ON h.descendant_id = n.node_id
             WHERE h.ancestor_id = ?1 AND h.generations > 0
             ORDER BY h.generations, n.node_id"
        ),
        params![id],
    )
    .with_context(|| format!("descendants of {id}"))
}

/// Subtree of `id` including the node itself, nearest generations first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn self_and_descendants_of(conn: &Connection, id: NodeId) -> Result<Vec<Node>> {
    collect_nodes(
        conn,
        &format!(
            "SELECT n.{NODE_COLUMNS_QUALIFIED} FROM nodes n
             JOIN hierarchy h ON h.descendant_id = n.node_id
             WHERE h.ancestor_id = ?1
             ORDER BY h.generations, n.node_id"
        ),
        params![id],
    )
    .with_context(|| format!("self and descendants of {id}"))
}

/// All closure rows whose descendant is `id`, including the self edge.
///
/// For a node at depth d this is exactly d + 1 rows; the maintainer derives
/// a new child's edges from its parent's rows by adding one generation.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn edges_to_node(conn: &Connection, id: NodeId) -> Result<Vec<Edge>> {
    let mut stmt = conn
        .prepare(
            "SELECT ancestor_id, descendant_id, generations FROM hierarchy
             WHERE descendant_id = ?1
             ORDER BY generations",
        )
        .context("prepare edges_to_node")?;
    let rows = stmt
        .query_map([id], |row| {
            Ok(Edge {
                ancestor_id: row.get(0)?,
                descendant_id: row.get(1)?,
                generations: row.get(2)?,
            })
        })
        .with_context(|| format!("edges to node {id}"))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("collect edges to node {id}"))
}

/// Depth of `id`: parent-link steps from its root (0 for a root).
///
/// # Errors
///
/// Returns an error if the query fails or the node has no self edge.
pub fn depth_of(conn: &Connection, id: NodeId) -> Result<i64> {
    let depth: Option<i64> = conn
        .query_row(
            "SELECT MAX(generations) FROM hierarchy WHERE descendant_id = ?1",
            [id],
            |row| row.get(0),
        )
        .with_context(|| format!("depth of {id}"))?;
    depth.with_context(|| format!("node {id} has no closure rows"))
}

/// Total node rows.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn node_count(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))
        .context("count nodes")
}

/// Total closure rows (self edges included).
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn edge_count(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM hierarchy", [], |row| row.get(0))
        .context("count edges")
}

// ---------------------------------------------------------------------------
// Writes (callers own the transaction boundary)
// ---------------------------------------------------------------------------

/// Insert one node row. Does **not** write closure rows; the maintainer
/// does that in the same transaction.
///
/// # Errors
///
/// Returns an error if the insert fails (e.g. the parent row is missing).
pub fn insert_node(conn: &Connection, parent: Option<NodeId>, name: &str) -> Result<Node> {
    conn.execute(
        "INSERT INTO nodes (name, parent_id) VALUES (?1, ?2)",
        params![name, parent],
    )
    .with_context(|| format!("insert node '{name}' under {parent:?}"))?;
    Ok(Node {
        node_id: conn.last_insert_rowid(),
        name: name.to_string(),
        parent_id: parent,
    })
}

/// Batch-insert closure rows.
///
/// # Errors
///
/// Returns an error if any insert fails (e.g. a duplicate pair).
pub fn insert_edges(conn: &Connection, edges: &[Edge]) -> Result<()> {
    let mut stmt = conn
        .prepare("INSERT INTO hierarchy (ancestor_id, descendant_id, generations) VALUES (?1, ?2, ?3)")
        .context("prepare insert_edges")?;
    for edge in edges {
        stmt.execute(params![edge.ancestor_id, edge.descendant_id, edge.generations])
            .with_context(|| {
                format!(
                    "insert edge ({}, {}, {})",
                    edge.ancestor_id, edge.descendant_id, edge.generations
                )
            })?;
    }
    Ok(())
}

/// Delete every closure row where `id` appears as ancestor or descendant
/// (the self edge matches both). Returns the number of rows removed.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn delete_edges_for_node(conn: &Connection, id: NodeId) -> Result<usize> {
    conn.execute(
        "DELETE FROM hierarchy WHERE ancestor_id = ?1 OR descendant_id = ?1",
        [id],
    )
    .with_context(|| format!("delete edges for node {id}"))
}

/// Delete one node row. Returns true if a row was removed.
///
/// # Errors
///
/// Returns an error if the delete fails (e.g. a remaining edge or child
/// row still references the node).
pub fn delete_node_row(conn: &Connection, id: NodeId) -> Result<bool> {
    let affected = conn
        .execute("DELETE FROM nodes WHERE node_id = ?1", [id])
        .with_context(|| format!("delete node row {id}"))?;
    Ok(affected > 0)
}

const NODE_COLUMNS_QUALIFIED: &str = "node_id, n.name, n.parent_id";

fn collect_nodes(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Node>> {
    let mut stmt = conn.prepare(sql).context("prepare node query")?;
    let rows = stmt.query_map(params, node_from_row).context("run node query")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("collect node rows")
}
