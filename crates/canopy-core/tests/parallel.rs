//! Parallel resolution and deletion properties.
//!
//! Every test runs real worker threads, each with its own SQLite
//! connection onto one shared store file, coordinating only through the
//! shared lock manager — the same shape as independent processes.
//!
//! Covered properties:
//! - concurrent find-or-create never duplicates a (parent, name) slot
//! - bypassing the lock step is allowed to duplicate one (negative control)
//! - sibling churn (concurrent create + delete under one deep parent)
//!   terminates with creates and deletes accounting for every name
//! - adversarial-order deletion of a deep chain terminates and leaves the
//!   store empty of those nodes and edges

use canopy_core::{
    FsLockManager, MemoryLockManager, NodeId,
    db,
    tree::{TreeError, maintain, resolve, verify},
};
use rusqlite::Connection;
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Barrier, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};
use tempfile::TempDir;

const WORKERS: usize = 6;
const ITERATIONS: i64 = 5;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Route library tracing to the test writer. `CANOPY_LOG=canopy_core=trace`
/// shows the lock acquire/release interleaving on failures.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("CANOPY_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("canopy_core=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn store_in(dir: &TempDir) -> PathBuf {
    init_tracing();
    dir.path().join("canopy.sqlite3")
}

fn open(path: &Path) -> Connection {
    db::open_store(path).expect("open store")
}

fn count_named(conn: &Connection, name: &str) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM nodes WHERE name = ?1", [name], |row| {
        row.get(0)
    })
    .expect("count by name")
}

/// Run `WORKERS` threads that each resolve every one of the `names` paths
/// (`[name, a, b, c]`) under `root`, all released by one barrier.
fn run_resolvers(path: &Path, locks: &MemoryLockManager, root: Option<NodeId>, names: &[String]) {
    let start = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let start = Arc::clone(&start);
            let locks = locks.clone();
            let path = path.to_path_buf();
            let names = names.to_vec();
            thread::spawn(move || {
                let mut conn = open(&path);
                start.wait();
                for name in &names {
                    let segments = [name.as_str(), "a", "b", "c"];
                    resolve::find_or_create_by_path(&mut conn, &locks, root, &segments)
                        .expect("resolve");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("resolver thread");
    }
}

fn iteration_names() -> Vec<String> {
    (0..ITERATIONS).map(|i| format!("t{i}")).collect()
}

// ---------------------------------------------------------------------------
// No-duplicate properties
// ---------------------------------------------------------------------------

#[test]
fn concurrent_resolution_creates_no_duplicate_roots() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = store_in(&dir);
    let locks = MemoryLockManager::new();
    let names = iteration_names();

    run_resolvers(&path, &locks, None, &names);

    let conn = open(&path);
    for name in &names {
        assert_eq!(count_named(&conn, name), 1, "duplicate root '{name}'");
    }
    // One a/b/c chain exists under each of the ITERATIONS roots.
    for name in ["a", "b", "c"] {
        assert_eq!(count_named(&conn, name), ITERATIONS, "dupes of '{name}'");
    }
    assert!(verify::check_closure(&conn).expect("verify").is_clean());
}

#[test]
fn concurrent_resolution_under_shared_parent_creates_no_dupes() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = store_in(&dir);
    let locks = MemoryLockManager::new();
    let names = iteration_names();

    let mut conn = open(&path);
    let parent =
        resolve::find_or_create_by_path(&mut conn, &locks, None, &["root"]).expect("parent");
    drop(conn);

    run_resolvers(&path, &locks, Some(parent.node_id), &names);

    let conn = open(&path);
    let children = canopy_core::db::query::children_of(&conn, parent.node_id).expect("children");
    let mut child_names: Vec<_> = children.iter().map(|n| n.name.clone()).collect();
    child_names.sort();
    assert_eq!(child_names, names);
    for name in ["a", "b", "c"] {
        assert_eq!(count_named(&conn, name), ITERATIONS, "dupes of '{name}'");
    }
}

#[test]
fn file_locks_serialize_resolvers_across_managers() {
    // Each worker gets its own FsLockManager over one directory, the way
    // separate processes would.
    let dir = tempfile::tempdir().expect("temp dir");
    let path = store_in(&dir);
    let lock_dir = dir.path().join("locks");

    let start = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let start = Arc::clone(&start);
            let path = path.clone();
            let lock_dir = lock_dir.clone();
            thread::spawn(move || {
                let mut conn = open(&path);
                let locks = FsLockManager::new(lock_dir);
                start.wait();
                resolve::find_or_create_by_path(&mut conn, &locks, None, &["shared", "leaf"])
                    .expect("resolve");
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("resolver thread");
    }

    let conn = open(&path);
    assert_eq!(count_named(&conn, "shared"), 1);
    assert_eq!(count_named(&conn, "leaf"), 1);
}

// ---------------------------------------------------------------------------
// Negative control: the schema permits duplicates without the locks
// ---------------------------------------------------------------------------

#[test]
fn bypassing_the_lock_step_can_create_duplicates() {
    // Two workers interleaved at the worst point: both observe the slot
    // empty, then both insert. With the lock step skipped nothing orders
    // the find against the insert, and the schema (deliberately) does not
    // enforce sibling uniqueness.
    let dir = tempfile::tempdir().expect("temp dir");
    let path = store_in(&dir);
    let mut worker_a = open(&path);
    let mut worker_b = open(&path);

    let seen_a = canopy_core::db::query::find_child(&worker_a, None, "dupe").expect("find a");
    let seen_b = canopy_core::db::query::find_child(&worker_b, None, "dupe").expect("find b");
    assert!(seen_a.is_none() && seen_b.is_none());

    maintain::insert_child(&mut worker_a, None, "dupe").expect("insert a");
    maintain::insert_child(&mut worker_b, None, "dupe").expect("insert b");

    assert!(count_named(&worker_a, "dupe") > 1, "duplicates must be possible");
}

// ---------------------------------------------------------------------------
// Deadlock freedom
// ---------------------------------------------------------------------------

#[test]
fn sibling_churn_does_not_deadlock() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = store_in(&dir);
    let locks = MemoryLockManager::new();

    // A non-trivially deep parent maximizes time spent in hierarchy
    // maintenance per insert.
    let deep_path: Vec<String> = ('a'..='z').chain('A'..='Z').map(String::from).collect();
    let mut conn = open(&path);
    let target =
        resolve::find_or_create_by_path(&mut conn, &locks, None, &deep_path).expect("target");
    drop(conn);

    let expected: Vec<String> = (1..=100).map(|i| format!("root #{i}")).collect();
    let to_add = Arc::new(Mutex::new(expected.clone()));
    let added = Arc::new(Mutex::new(Vec::<String>::new()));
    let to_delete = Arc::new(Mutex::new(Vec::<(String, NodeId)>::new()));
    let deleted = Arc::new(Mutex::new(Vec::<String>::new()));
    let run_destruction = Arc::new(AtomicBool::new(true));

    let creators: Vec<_> = (0..WORKERS)
        .map(|_| {
            let path = path.clone();
            let locks = locks.clone();
            let to_add = Arc::clone(&to_add);
            let added = Arc::clone(&added);
            let to_delete = Arc::clone(&to_delete);
            let target_id = target.node_id;
            thread::spawn(move || {
                let mut conn = open(&path);
                loop {
                    let name = { to_add.lock().expect("to_add").pop() };
                    let Some(name) = name else { break };
                    let node = resolve::find_or_create_by_path(
                        &mut conn,
                        &locks,
                        Some(target_id),
                        &[name.as_str()],
                    )
                    .expect("create child");
                    to_delete
                        .lock()
                        .expect("to_delete")
                        .push((name.clone(), node.node_id));
                    added.lock().expect("added").push(name);
                }
            })
        })
        .collect();

    let destroyers: Vec<_> = (0..WORKERS)
        .map(|_| {
            let path = path.clone();
            let locks = locks.clone();
            let to_delete = Arc::clone(&to_delete);
            let deleted = Arc::clone(&deleted);
            let run = Arc::clone(&run_destruction);
            thread::spawn(move || {
                let mut conn = open(&path);
                loop {
                    let victim = { to_delete.lock().expect("to_delete").pop() };
                    match victim {
                        Some((name, id)) => {
                            maintain::delete(&mut conn, &locks, id).expect("delete child");
                            deleted.lock().expect("deleted").push(name);
                        }
                        None => {
                            if !run.load(Ordering::SeqCst) {
                                break;
                            }
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                }
            })
        })
        .collect();

    for handle in creators {
        handle.join().expect("creator thread");
    }
    run_destruction.store(false, Ordering::SeqCst);
    for handle in destroyers {
        handle.join().expect("destroyer thread");
    }

    let mut added = Arc::try_unwrap(added)
        .expect("added refs")
        .into_inner()
        .expect("added lock");
    let mut deleted = Arc::try_unwrap(deleted)
        .expect("deleted refs")
        .into_inner()
        .expect("deleted lock");
    let mut expected = expected;
    added.sort();
    deleted.sort();
    expected.sort();
    assert_eq!(added, expected);
    assert_eq!(deleted, expected);

    let conn = open(&path);
    let children = canopy_core::db::query::children_of(&conn, target.node_id).expect("children");
    assert!(children.is_empty(), "all churned children deleted");
    assert!(verify::check_closure(&conn).expect("verify").is_clean());
}

/// Swap a handful of index pairs so deletion order is adversarial (non-
/// monotonic) but deterministic across runs.
fn bad_shuffle<T>(items: &mut [T]) {
    let len = items.len();
    if len < 2 {
        return;
    }
    for i in 0..len / 10 {
        let from = (i * 7 + 13) % len;
        let to = (i * 31 + 5) % len;
        items.swap(from, to);
    }
}

#[test]
fn chain_deletion_in_adversarial_order_terminates_and_empties_the_store() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = store_in(&dir);
    let locks = MemoryLockManager::new();

    let depth = 200;
    let segments: Vec<String> = (1..=depth).map(|i| i.to_string()).collect();
    let mut conn = open(&path);
    let leaf =
        resolve::find_or_create_by_path(&mut conn, &locks, None, &segments).expect("chain");

    let mut victims: Vec<NodeId> = canopy_core::db::query::self_and_ancestors_of(&conn, leaf.node_id)
        .expect("chain nodes")
        .iter()
        .map(|node| node.node_id)
        .collect();
    assert_eq!(victims.len(), depth);
    drop(conn);
    bad_shuffle(&mut victims);

    let queue = Arc::new(Mutex::new(victims));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let path = path.clone();
            let locks = locks.clone();
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut conn = open(&path);
                loop {
                    let victim = { queue.lock().expect("queue").pop() };
                    let Some(victim) = victim else { break };
                    match maintain::delete_subtree(&mut conn, &locks, victim) {
                        // Someone else already removed this part of the chain.
                        Ok(_) | Err(TreeError::NodeNotFound(_)) => {}
                        Err(other) => panic!("unexpected delete error: {other}"),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("deleter thread");
    }

    let conn = open(&path);
    assert_eq!(
        canopy_core::db::query::node_count(&conn).expect("nodes"),
        0,
        "chain fully deleted"
    );
    assert_eq!(
        canopy_core::db::query::edge_count(&conn).expect("edges"),
        0,
        "no residual closure rows"
    );
}
