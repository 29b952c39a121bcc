//! Commit crash scenarios
//!
//! Every commit crash point lies after the WAL token is durable, so a
//! commit interrupted at any of them must be rolled forward on the next
//! open: the value, its commit metadata and its index documents all
//! present, exactly once.

use chronodb::crash_point::points;
use chronodb::index::SearchSpec;
use chronodb::MASTER_BRANCH;
use serde_json::json;

use crate::crash::harness::{journal_exists, report_failure, CrashHarness};

fn seed(harness: &CrashHarness) {
    let result = harness.run_cli(
        &["put", "--key", "p0", "--value", r#"{"name":"Grace"}"#, "--metadata", r#""seed""#],
        None,
    );
    if result.crashed || result.exit_status.map_or(true, |s| !s.success()) {
        report_failure("none", "seed", &result);
        panic!("seeding the database failed");
    }
}

fn put_ada(harness: &CrashHarness, crash_point: Option<&str>) -> crate::crash::CrashTestResult {
    harness.run_cli(
        &["put", "--key", "p1", "--value", r#"{"name":"Ada"}"#, "--metadata", r#""crash""#],
        crash_point,
    )
}

#[test]
fn test_commit_is_rolled_forward_at_every_crash_point() {
    for point in points::all() {
        let harness = CrashHarness::new();
        seed(&harness);

        let result = put_ada(&harness, Some(point));
        if !result.crashed {
            report_failure(point, "put p1", &result);
            panic!("process did not crash at {}", point);
        }
        assert!(journal_exists(&harness.data_dir()));

        let db = harness.open();
        let state = db.recovery_state().clone();
        assert!(!state.was_clean_shutdown, "crash at {}", point);
        assert_eq!(state.rolled_forward, vec![MASTER_BRANCH.to_string()], "crash at {}", point);
        assert!(!db.indexes().is_dirty("name").unwrap(), "crash at {}", point);

        let tx = db.tx().unwrap();
        assert_eq!(tx.get("default", "p1").unwrap(), Some(json!({"name": "Ada"})), "crash at {}", point);
        assert_eq!(tx.get("default", "p0").unwrap(), Some(json!({"name": "Grace"})), "crash at {}", point);
        assert_eq!(tx.history("default", "p1").unwrap().count(), 1, "crash at {}", point);
        assert_eq!(tx.count_commit_timestamps_between(0, tx.timestamp()).unwrap(), 2, "crash at {}", point);
        assert_eq!(tx.commit_metadata(tx.timestamp()).unwrap(), Some(json!("crash")), "crash at {}", point);

        let ada = tx.find("default", "name", &SearchSpec::string_equals("Ada")).unwrap();
        assert_eq!(ada.len(), 1, "crash at {}", point);
        assert_eq!(ada[0].valid_from, tx.timestamp(), "crash at {}", point);

        // The branch accepts commits again.
        drop(tx);
        let mut tx = db.tx().unwrap();
        tx.put("default", "p2", json!({"name": "Alan"})).unwrap();
        assert!(tx.commit(None).is_ok(), "crash at {}", point);
        db.close().unwrap();
    }
}

#[test]
fn test_uninterrupted_cli_commit_is_clean() {
    let harness = CrashHarness::new();
    seed(&harness);
    let result = put_ada(&harness, None);
    assert!(!result.crashed);
    assert!(result.stdout.contains("\"status\":\"ok\""));

    let db = harness.open();
    assert!(db.recovery_state().was_clean_shutdown);
    assert!(!db.recovery_state().recovered_any());
    assert_eq!(db.tx().unwrap().get("default", "p1").unwrap(), Some(json!({"name": "Ada"})));
}

#[test]
fn test_unarmed_crash_point_does_not_fire() {
    let harness = CrashHarness::new();
    seed(&harness);
    let result = put_ada(&harness, Some("no_such_point"));
    assert!(!result.crashed);
    assert!(result.exit_status.unwrap().success());
}
