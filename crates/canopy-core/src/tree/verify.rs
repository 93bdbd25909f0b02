//! Closure-index verification.
//!
//! Recomputes the transitive closure from the committed parent links and
//! diffs it against the `hierarchy` table. The maintainer keeps the index
//! exact under the lock protocol; this module is the independent check —
//! used by tests after churn, and available to operators who suspect a
//! writer bypassed the locks.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};

use crate::db::query::{Edge, NodeId};

/// Differences between the stored closure index and the one implied by the
/// parent links. Empty on a healthy store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClosureReport {
    /// Edges the parent links imply but the index lacks.
    pub missing: Vec<Edge>,
    /// Edges the index holds that no parent chain implies.
    pub extra: Vec<Edge>,
    /// Nodes whose `parent_id` references a nonexistent node.
    pub dangling_parents: Vec<NodeId>,
}

impl ClosureReport {
    /// True when the index exactly matches the parent links.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.dangling_parents.is_empty()
    }
}

/// Diff the stored closure index against the parent-link graph.
///
/// Walks every node's parent chain (with a cycle guard) to derive the
/// expected (ancestor, descendant, generations) set, including self edges,
/// and compares it with the `hierarchy` rows.
///
/// # Errors
///
/// Returns an error if reading nodes or edges fails.
pub fn check_closure(conn: &Connection) -> Result<ClosureReport> {
    let mut parents: HashMap<NodeId, Option<NodeId>> = HashMap::new();
    {
        let mut stmt = conn
            .prepare("SELECT node_id, parent_id FROM nodes")
            .context("prepare node scan")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .context("scan nodes")?;
        for row in rows {
            let (id, parent) = row.context("read node row")?;
            parents.insert(id, parent);
        }
    }

    let mut report = ClosureReport::default();
    let mut expected: HashSet<Edge> = HashSet::new();
    for (&id, &parent) in &parents {
        expected.insert(Edge {
            ancestor_id: id,
            descendant_id: id,
            generations: 0,
        });

        let mut seen: HashSet<NodeId> = HashSet::from([id]);
        let mut generations = 0i64;
        let mut cursor = parent;
        while let Some(ancestor) = cursor {
            if !parents.contains_key(&ancestor) {
                report.dangling_parents.push(id);
                break;
            }
            if !seen.insert(ancestor) {
                // Parent cycle; the chain walk would never terminate.
                break;
            }
            generations += 1;
            expected.insert(Edge {
                ancestor_id: ancestor,
                descendant_id: id,
                generations,
            });
            cursor = parents[&ancestor];
        }
    }

    let mut actual: HashSet<Edge> = HashSet::new();
    {
        let mut stmt = conn
            .prepare("SELECT ancestor_id, descendant_id, generations FROM hierarchy")
            .context("prepare edge scan")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Edge {
                    ancestor_id: row.get(0)?,
                    descendant_id: row.get(1)?,
                    generations: row.get(2)?,
                })
            })
            .context("scan edges")?;
        for row in rows {
            actual.insert(row.context("read edge row")?);
        }
    }

    report.missing = expected.difference(&actual).copied().collect();
    report.extra = actual.difference(&expected).copied().collect();
    report.missing.sort_unstable();
    report.extra.sort_unstable();
    report.dangling_parents.sort_unstable();
    Ok(report)
}
