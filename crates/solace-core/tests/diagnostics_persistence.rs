//! Failure diagnostics survive a restart.
//!
//! Boundary fault records and other diagnostics are written through the
//! safe store so the next load can show what went wrong. These tests
//! exercise the full write → rename → reopen path against a real
//! directory.

use std::fs;
use std::sync::Arc;

use solace_core::boundary::{BoundaryScope, Fault, FaultBoundary, FaultRecord};
use solace_core::store::SafeStore;
use tempfile::TempDir;

/// The state file is human-readable, versioned JSON.
#[test]
fn state_file_is_human_readable_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("diagnostics.json");

    let store = SafeStore::open(&path);
    store.put_value("last_error", serde_json::json!({"message": "boom"}));

    let contents = fs::read_to_string(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&contents).unwrap();

    assert_eq!(json["version"], 1);
    assert_eq!(json["entries"]["last_error"]["message"], "boom");
    assert!(contents.contains('\n'), "state file should be pretty-printed");
}

/// Entries written before a restart are visible after reopening.
#[test]
fn entries_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("diagnostics.json");

    {
        let store = SafeStore::open(&path);
        store.put_value("bootstrap::last_failure", serde_json::json!({"stage": "dependencies"}));
        store.put_value("note", serde_json::json!("kept"));
    }

    let reopened = SafeStore::open(&path);
    assert_eq!(reopened.len(), 2);
    assert_eq!(
        reopened.get("bootstrap::last_failure"),
        Some(serde_json::json!({"stage": "dependencies"}))
    );
}

/// Removals persist too; a reopened store does not resurrect entries.
#[test]
fn removals_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("diagnostics.json");

    {
        let store = SafeStore::open(&path);
        store.put_value("a", serde_json::json!(1));
        store.put_value("b", serde_json::json!(2));
        store.remove("a");
    }

    let reopened = SafeStore::open(&path);
    assert_eq!(reopened.get("a"), None);
    assert_eq!(reopened.get("b"), Some(serde_json::json!(2)));
}

/// No partially-written temp file is left behind after a write.
#[test]
fn atomic_write_leaves_no_temp_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("diagnostics.json");

    let store = SafeStore::open(&path);
    store.put_value("k", serde_json::json!("v"));

    let names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["diagnostics.json".to_string()]);
}

/// A boundary capture before a crash is readable on the next load.
#[test]
fn boundary_fault_record_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("diagnostics.json");

    {
        let store = Arc::new(SafeStore::open(&path));
        let mut boundary =
            FaultBoundary::new("routes", BoundaryScope::Routing, 2).with_store(store);
        let _ = boundary.capture(Fault::new("route table failed to load").with_context("startup"));
    }

    let reopened = SafeStore::open(&path);
    let record: FaultRecord = reopened.get_as("boundary::routes").unwrap();
    assert_eq!(record.boundary, "routes");
    assert_eq!(record.scope, BoundaryScope::Routing);
    assert_eq!(record.message, "route table failed to load");
    assert_eq!(record.context.as_deref(), Some("startup"));
}
