//! Point-in-Time Read Tests
//!
//! Reads at a timestamp T observe exactly the state committed at or before
//! T, no matter how many commits happened since. Removals are versions
//! too: a removed key reads as absent from the removal onwards while its
//! older values stay readable.

use std::collections::BTreeMap;

use chronodb::temporal::ClockKind;
use chronodb::{ChronoConfig, ChronoDb, ChronoError, MAX_TIMESTAMP};
use proptest::prelude::*;
use serde_json::{json, Value};

// =============================================================================
// Test Utilities
// =============================================================================

fn open_db() -> ChronoDb {
    ChronoDb::open(ChronoConfig::in_memory().with_clock(ClockKind::Logical))
        .expect("Failed to open in-memory database")
}

fn commit_one(db: &ChronoDb, key: &str, value: Value) -> u64 {
    let mut tx = db.tx().unwrap();
    tx.put("default", key, value).unwrap();
    tx.commit(None).unwrap()
}

// =============================================================================
// Commit Timeline
// =============================================================================

#[test]
fn test_hello_foo_timeline() {
    let db = open_db();

    let mut tx = db.tx().unwrap();
    tx.put("default", "Hello", json!("World")).unwrap();
    let commit_a = tx.commit(None).unwrap();

    let mut tx = db.tx().unwrap();
    tx.put("default", "Foo", json!("Bar")).unwrap();
    let commit_b = tx.commit(None).unwrap();

    let mut tx = db.tx().unwrap();
    tx.put("default", "Hello", json!("Test")).unwrap();
    let commit_c = tx.commit(None).unwrap();

    assert!(commit_a < commit_b && commit_b < commit_c);

    let tx = db.tx().unwrap();
    assert_eq!(tx.count_commit_timestamps_between(commit_b, commit_c).unwrap(), 2);

    let at_a = db.tx_at("master", commit_a).unwrap();
    assert_eq!(at_a.get("default", "Hello").unwrap(), Some(json!("World")));
    assert_eq!(at_a.get("default", "Foo").unwrap(), None);

    let at_c = db.tx_at("master", commit_c).unwrap();
    assert_eq!(at_c.get("default", "Hello").unwrap(), Some(json!("Test")));
    assert_eq!(at_c.get("default", "Foo").unwrap(), Some(json!("Bar")));
}

#[test]
fn test_reads_between_commits_see_previous_commit() {
    let db = open_db();
    let first = commit_one(&db, "k", json!(1));
    let second = commit_one(&db, "k", json!(2));
    assert!(second > first);

    for ts in first..second {
        let tx = db.tx_at("master", ts).unwrap();
        assert_eq!(tx.get("default", "k").unwrap(), Some(json!(1)), "at {}", ts);
    }
    let tx = db.tx_at("master", second).unwrap();
    assert_eq!(tx.get("default", "k").unwrap(), Some(json!(2)));
}

#[test]
fn test_read_before_first_commit_is_absent() {
    let db = open_db();
    let ts = commit_one(&db, "k", json!("v"));
    let tx = db.tx_at("master", ts - 1).unwrap();
    assert_eq!(tx.get("default", "k").unwrap(), None);
    assert!(!tx.exists("default", "k").unwrap());
}

#[test]
fn test_validity_period_of_a_version() {
    let db = open_db();
    let first = commit_one(&db, "k", json!("old"));
    let second = commit_one(&db, "k", json!("new"));

    let tx = db.tx_at("master", first).unwrap();
    let result = tx.get_result("default", "k").unwrap();
    assert_eq!(result.period().lower_bound(), first);
    assert_eq!(result.period().upper_bound(), second);

    let tx = db.tx().unwrap();
    let result = tx.get_result("default", "k").unwrap();
    assert_eq!(result.period().lower_bound(), second);
    assert_eq!(result.period().upper_bound(), MAX_TIMESTAMP);
}

#[test]
fn test_future_timestamp_is_rejected() {
    let db = open_db();
    let ts = commit_one(&db, "k", json!(1));
    match db.tx_at("master", ts + 10) {
        Err(ChronoError::TemporalRange { requested, now, .. }) => {
            assert_eq!(requested, ts + 10);
            assert_eq!(now, ts);
        }
        other => panic!("expected TemporalRange, got {:?}", other.map(|tx| tx.timestamp())),
    }
}

// =============================================================================
// Tombstones
// =============================================================================

#[test]
fn test_removed_key_is_absent_afterwards() {
    let db = open_db();
    let written = commit_one(&db, "k", json!("v"));

    let mut tx = db.tx().unwrap();
    tx.remove("default", "k").unwrap();
    let removed = tx.commit(None).unwrap();

    let tx = db.tx().unwrap();
    assert_eq!(tx.get("default", "k").unwrap(), None);
    assert!(!tx.keys("default").unwrap().contains("k"));

    let tx = db.tx_at("master", written).unwrap();
    assert_eq!(tx.get("default", "k").unwrap(), Some(json!("v")));
    assert!(tx.keys("default").unwrap().contains("k"));

    // The tombstone is part of the history.
    let tx = db.tx().unwrap();
    let history: Vec<u64> = tx.history("default", "k").unwrap().map(Result::unwrap).collect();
    assert_eq!(history, vec![removed, written]);
}

#[test]
fn test_removing_absent_key_creates_no_commit() {
    let db = open_db();
    let ts = commit_one(&db, "a", json!(1));

    let mut tx = db.tx().unwrap();
    tx.remove("default", "never-written").unwrap();
    let returned = tx.commit(None).unwrap();

    assert_eq!(returned, ts);
    assert_eq!(db.get_branch("master").unwrap().now(), ts);
}

#[test]
fn test_rewrite_after_removal() {
    let db = open_db();
    commit_one(&db, "k", json!("first"));
    let mut tx = db.tx().unwrap();
    tx.remove("default", "k").unwrap();
    let removed = tx.commit(None).unwrap();
    commit_one(&db, "k", json!("second"));

    let tx = db.tx().unwrap();
    assert_eq!(tx.get("default", "k").unwrap(), Some(json!("second")));
    let tx = db.tx_at("master", removed).unwrap();
    assert_eq!(tx.get("default", "k").unwrap(), None);
}

// =============================================================================
// Keyspaces
// =============================================================================

#[test]
fn test_keyspaces_are_isolated() {
    let db = open_db();
    let mut tx = db.tx().unwrap();
    tx.put("people", "ada", json!({"born": 1815})).unwrap();
    tx.put("places", "ada", json!({"country": "US"})).unwrap();
    tx.commit(None).unwrap();

    let tx = db.tx().unwrap();
    assert_eq!(tx.get("people", "ada").unwrap(), Some(json!({"born": 1815})));
    assert_eq!(tx.get("places", "ada").unwrap(), Some(json!({"country": "US"})));
    assert_eq!(tx.get("default", "ada").unwrap(), None);

    let keyspaces = tx.keyspaces().unwrap();
    assert!(keyspaces.contains("people"));
    assert!(keyspaces.contains("places"));
}

// =============================================================================
// Model Check
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Put(u8, i64),
    Remove(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4, any::<i64>()).prop_map(|(k, v)| Op::Put(k, v)),
        (0u8..4).prop_map(Op::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every historical read matches a map replayed up to that commit.
    #[test]
    fn prop_reads_match_replayed_model(batches in prop::collection::vec(prop::collection::vec(op_strategy(), 1..5), 1..8)) {
        let db = open_db();
        let mut model: BTreeMap<String, Value> = BTreeMap::new();
        let mut snapshots: Vec<(u64, BTreeMap<String, Value>)> = Vec::new();

        for batch in batches {
            let mut tx = db.tx().unwrap();
            for op in batch {
                match op {
                    Op::Put(k, v) => {
                        tx.put("default", &format!("key{}", k), json!(v)).unwrap();
                        model.insert(format!("key{}", k), json!(v));
                    }
                    Op::Remove(k) => {
                        tx.remove("default", &format!("key{}", k)).unwrap();
                        model.remove(&format!("key{}", k));
                    }
                }
            }
            let ts = tx.commit(None).unwrap();
            snapshots.push((ts, model.clone()));
        }

        for (ts, expected) in snapshots {
            let tx = db.tx_at("master", ts).unwrap();
            for k in 0u8..4 {
                let key = format!("key{}", k);
                prop_assert_eq!(tx.get("default", &key).unwrap(), expected.get(&key).cloned());
            }
            let keys: Vec<String> = tx.keys("default").unwrap().into_iter().collect();
            let expected_keys: Vec<String> = expected.keys().cloned().collect();
            prop_assert_eq!(keys, expected_keys);
        }
    }
}
