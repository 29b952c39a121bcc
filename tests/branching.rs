//! Branch Isolation Tests
//!
//! A branch sees its parent's state as of the branching timestamp and
//! nothing the parent commits afterwards. Commits on a branch are never
//! visible to the parent or to sibling branches.

use chronodb::temporal::ClockKind;
use chronodb::{ChronoConfig, ChronoDb, ChronoError, MASTER_BRANCH};
use serde_json::{json, Value};

// =============================================================================
// Test Utilities
// =============================================================================

fn open_db() -> ChronoDb {
    ChronoDb::open(ChronoConfig::in_memory().with_clock(ClockKind::Logical))
        .expect("Failed to open in-memory database")
}

fn commit_on(db: &ChronoDb, branch: &str, key: &str, value: Value) -> u64 {
    let mut tx = db.tx_on(branch).unwrap();
    tx.put("default", key, value).unwrap();
    tx.commit(None).unwrap()
}

fn read(db: &ChronoDb, branch: &str, ts: u64, key: &str) -> Option<Value> {
    db.tx_at(branch, ts).unwrap().get("default", key).unwrap()
}

// =============================================================================
// Visibility
// =============================================================================

#[test]
fn test_parent_commit_after_branching_is_invisible() {
    let db = open_db();
    commit_on(&db, MASTER_BRANCH, "k", json!("before"));
    let branch = db.create_branch("X", MASTER_BRANCH).unwrap();
    let b = branch.branching_timestamp();

    let after = commit_on(&db, MASTER_BRANCH, "k", json!("after"));
    commit_on(&db, MASTER_BRANCH, "new", json!(1));
    assert!(after > b);

    for ts in 0..=b {
        assert_eq!(
            read(&db, "X", ts, "k"),
            read(&db, MASTER_BRANCH, ts, "k"),
            "branch and master must agree up to the branching timestamp (ts {})",
            ts
        );
    }
    assert_eq!(read(&db, "X", b, "k"), Some(json!("before")));
    assert_eq!(read(&db, MASTER_BRANCH, after, "k"), Some(json!("after")));

    let head = db.tx_on("X").unwrap();
    assert_eq!(head.get("default", "k").unwrap(), Some(json!("before")));
    assert_eq!(head.get("default", "new").unwrap(), None);
    assert!(!head.keys("default").unwrap().contains("new"));
}

#[test]
fn test_branch_commits_do_not_leak_to_parent() {
    let db = open_db();
    commit_on(&db, MASTER_BRANCH, "shared", json!("master"));
    db.create_branch("feature", MASTER_BRANCH).unwrap();

    let ts = commit_on(&db, "feature", "shared", json!("feature"));
    commit_on(&db, "feature", "only-here", json!(true));

    let master = db.tx().unwrap();
    assert_eq!(master.get("default", "shared").unwrap(), Some(json!("master")));
    assert_eq!(master.get("default", "only-here").unwrap(), None);

    let feature = db.tx_at("feature", ts).unwrap();
    assert_eq!(feature.get("default", "shared").unwrap(), Some(json!("feature")));
}

#[test]
fn test_siblings_are_isolated() {
    let db = open_db();
    commit_on(&db, MASTER_BRANCH, "k", json!(0));
    db.create_branch("left", MASTER_BRANCH).unwrap();
    db.create_branch("right", MASTER_BRANCH).unwrap();

    commit_on(&db, "left", "k", json!("left"));
    commit_on(&db, "right", "k", json!("right"));

    assert_eq!(db.tx_on("left").unwrap().get("default", "k").unwrap(), Some(json!("left")));
    assert_eq!(db.tx_on("right").unwrap().get("default", "k").unwrap(), Some(json!("right")));
    assert_eq!(db.tx().unwrap().get("default", "k").unwrap(), Some(json!(0)));
}

#[test]
fn test_nested_branches_inherit_through_the_chain() {
    let db = open_db();
    commit_on(&db, MASTER_BRANCH, "a", json!("master"));
    db.create_branch("child", MASTER_BRANCH).unwrap();
    commit_on(&db, "child", "b", json!("child"));
    let grandchild = db.create_branch("grandchild", "child").unwrap();
    commit_on(&db, "child", "c", json!("too late"));

    let tx = db.tx_on("grandchild").unwrap();
    assert_eq!(tx.get("default", "a").unwrap(), Some(json!("master")));
    assert_eq!(tx.get("default", "b").unwrap(), Some(json!("child")));
    assert_eq!(tx.get("default", "c").unwrap(), None);

    let origins: Vec<String> = grandchild
        .origins_recursive()
        .iter()
        .map(|b| b.name().to_string())
        .collect();
    assert_eq!(origins, vec![MASTER_BRANCH.to_string(), "child".to_string()]);
}

#[test]
fn test_removal_on_branch_hides_inherited_value() {
    let db = open_db();
    commit_on(&db, MASTER_BRANCH, "k", json!("inherited"));
    db.create_branch("pruned", MASTER_BRANCH).unwrap();

    let mut tx = db.tx_on("pruned").unwrap();
    tx.remove("default", "k").unwrap();
    tx.commit(None).unwrap();

    assert_eq!(db.tx_on("pruned").unwrap().get("default", "k").unwrap(), None);
    assert_eq!(db.tx().unwrap().get("default", "k").unwrap(), Some(json!("inherited")));
}

#[test]
fn test_history_spans_branch_and_parent() {
    let db = open_db();
    let first = commit_on(&db, MASTER_BRANCH, "k", json!(1));
    db.create_branch("X", MASTER_BRANCH).unwrap();
    commit_on(&db, MASTER_BRANCH, "k", json!(2));
    let local = commit_on(&db, "X", "k", json!(3));

    let tx = db.tx_on("X").unwrap();
    let history: Vec<u64> = tx.history("default", "k").unwrap().map(Result::unwrap).collect();
    assert_eq!(history, vec![local, first]);
}

#[test]
fn test_branch_at_past_timestamp() {
    let db = open_db();
    let first = commit_on(&db, MASTER_BRANCH, "k", json!("v1"));
    commit_on(&db, MASTER_BRANCH, "k", json!("v2"));

    let branch = db.create_branch_at("past", MASTER_BRANCH, first).unwrap();
    assert_eq!(branch.branching_timestamp(), first);
    assert_eq!(branch.now(), first);
    assert_eq!(db.tx_on("past").unwrap().get("default", "k").unwrap(), Some(json!("v1")));
}

// =============================================================================
// Creation Errors
// =============================================================================

#[test]
fn test_duplicate_branch_is_rejected() {
    let db = open_db();
    db.create_branch("X", MASTER_BRANCH).unwrap();
    assert!(matches!(
        db.create_branch("X", MASTER_BRANCH),
        Err(ChronoError::BranchExists(name)) if name == "X"
    ));
}

#[test]
fn test_unknown_parent_is_rejected() {
    let db = open_db();
    assert!(matches!(
        db.create_branch("X", "nope"),
        Err(ChronoError::UnknownParent { .. })
    ));
    assert!(!db.branch_names().contains(&"X".to_string()));
}

#[test]
fn test_branching_in_the_future_is_rejected() {
    let db = open_db();
    let now = commit_on(&db, MASTER_BRANCH, "k", json!(1));
    assert!(matches!(
        db.create_branch_at("X", MASTER_BRANCH, now + 5),
        Err(ChronoError::TemporalRange { .. })
    ));
}

#[test]
fn test_unknown_branch_transaction() {
    let db = open_db();
    assert!(matches!(db.tx_on("ghost"), Err(ChronoError::UnknownBranch(_))));
}
