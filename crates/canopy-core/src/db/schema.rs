//! Canonical SQLite schema for the closure store.
//!
//! Two entity tables prove the whole model:
//! - `nodes` holds one row per hierarchy member with a nullable parent link
//! - `hierarchy` is the materialized transitive closure: one
//!   (ancestor, descendant, generations) row per reachability pair, with
//!   `generations = 0` for every node's self edge
//!
//! `nodes` deliberately has **no** `UNIQUE(parent_id, name)` constraint.
//! Sibling-name uniqueness is a property of the advisory-lock protocol, not
//! of the schema; a writer that bypasses the locks is allowed to create
//! duplicate siblings, which is the documented out-of-contract failure mode.

/// Migration v1: entity tables plus store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS nodes (
    node_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL CHECK (length(name) > 0),
    parent_id INTEGER REFERENCES nodes(node_id)
);

CREATE TABLE IF NOT EXISTS hierarchy (
    ancestor_id INTEGER NOT NULL REFERENCES nodes(node_id),
    descendant_id INTEGER NOT NULL REFERENCES nodes(node_id),
    generations INTEGER NOT NULL CHECK (generations >= 0),
    PRIMARY KEY (ancestor_id, descendant_id)
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 1);
";

/// Migration v2: read-path indexes for child lookup and closure queries.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_nodes_parent_name
    ON nodes(parent_id, name);

CREATE INDEX IF NOT EXISTS idx_hierarchy_descendant
    ON hierarchy(descendant_id, generations);
";

/// Indexes that must exist after migration, used by sanity checks in tests.
pub const REQUIRED_INDEXES: &[&str] = &["idx_nodes_parent_name", "idx_hierarchy_descendant"];
