use chrono::Utc;
use scannerv2::core::{knowledge_base, ProbeError, ResultStore, ScanReport, StoreError, Target};
use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn report_for(url: &str) -> ScanReport {
    let target = Target::parse(url).unwrap();
    let mut assembly = ScanReport::assemble(target, Utc::now());
    assembly.record_success(
        "headers",
        vec![
            knowledge_base::finding("headers", "HEADERS_CSP_MISSING"),
            knowledge_base::finding_with_detail("headers", "COOKIE_MISSING_HTTPONLY", "session"),
        ],
    );
    assembly.record_failure("tls", &ProbeError::Timeout { after: Duration::from_secs(10) });
    assembly.finish(false)
}

fn open_store() -> (TempDir, ResultStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::open(dir.path().join("scans")).unwrap();
    (dir, store)
}

#[test]
fn saved_report_reads_back_identical() {
    let (_dir, store) = open_store();
    let report = report_for("https://example.com/login");

    let id = store.save(&report).unwrap();
    let loaded = store.get(id.as_str()).unwrap();

    assert_eq!(loaded, report);
}

#[test]
fn rapid_saves_get_distinct_increasing_ids() {
    let (_dir, store) = open_store();
    let report = report_for("https://example.com");

    let ids: Vec<_> = (0..20).map(|_| store.save(&report).unwrap()).collect();

    for pair in ids.windows(2) {
        assert!(pair[1] > pair[0], "{} !> {}", pair[1], pair[0]);
    }
}

#[test]
fn list_returns_most_recent_first() {
    let (_dir, store) = open_store();
    let mut ids = Vec::new();
    for n in 0..8 {
        let report = report_for(&format!("https://site{n}.example.com"));
        ids.push(store.save(&report).unwrap());
    }

    let summaries = store.list(5).unwrap();

    assert_eq!(summaries.len(), 5);
    let listed: Vec<&str> = summaries.iter().map(|s| s.id.as_str()).collect();
    let expected: Vec<&str> = ids.iter().rev().take(5).map(|id| id.as_str()).collect();
    assert_eq!(listed, expected);
    assert_eq!(summaries[0].target, "https://site7.example.com/");
    assert_eq!(summaries[0].finding_count, 2);
    assert_eq!(summaries[0].error_count, 1);
}

#[test]
fn unknown_and_malformed_ids_are_not_found() {
    let (_dir, store) = open_store();

    assert!(matches!(store.get("scan_20000101_000000_000000_000000"), Err(StoreError::NotFound(_))));
    assert!(matches!(store.get("../../etc/passwd"), Err(StoreError::NotFound(_))));
}

#[test]
fn saving_leaves_only_the_report_file() {
    let (_dir, store) = open_store();
    let id = store.save(&report_for("https://example.com")).unwrap();

    let names: Vec<String> = fs::read_dir(store.dir())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();

    assert_eq!(names, vec![format!("{id}.json")]);
}

#[test]
fn files_carry_a_schema_version() {
    let (_dir, store) = open_store();
    let id = store.save(&report_for("https://example.com")).unwrap();

    let raw = fs::read_to_string(store.dir().join(format!("{id}.json"))).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();

    assert_eq!(json["schema_version"], 1);
    assert_eq!(json["target"], "https://example.com/");
    assert_eq!(json["findings"][0]["type"], "CSP Header Missing");
}

#[test]
fn unknown_fields_are_ignored_and_newer_schemas_rejected() {
    let (_dir, store) = open_store();
    let id = store.save(&report_for("https://example.com")).unwrap();
    let path = store.dir().join(format!("{id}.json"));

    let mut json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    json["added_later"] = serde_json::json!({ "nested": true });
    fs::write(&path, serde_json::to_string(&json).unwrap()).unwrap();
    assert!(store.get(id.as_str()).is_ok());

    json["schema_version"] = serde_json::json!(99);
    fs::write(&path, serde_json::to_string(&json).unwrap()).unwrap();
    assert!(matches!(store.get(id.as_str()), Err(StoreError::Corrupt { .. })));
}

#[test]
fn list_skips_corrupt_files() {
    let (_dir, store) = open_store();
    let good = store.save(&report_for("https://example.com")).unwrap();
    fs::write(store.dir().join("scan_29991231_235959_999999_000000.json"), "{ not json").unwrap();
    fs::write(store.dir().join("notes.txt"), "ignored").unwrap();

    let summaries = store.list(10).unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, good.as_str());
}

#[test]
fn reopened_store_continues_after_existing_ids() {
    let dir = tempfile::tempdir().unwrap();
    let first = ResultStore::open(dir.path()).unwrap().save(&report_for("https://example.com")).unwrap();
    fs::write(dir.path().join("scan_29991231_235959_999999_000003.json"), "{}").unwrap();

    let second = ResultStore::open(dir.path()).unwrap().save(&report_for("https://example.com")).unwrap();

    assert!(second > first);
    assert_eq!(second.as_str(), "scan_29991231_235959_999999_000004");
}

#[test]
fn stray_scan_files_do_not_hijack_id_generation() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("scan_manual_1.json"), "{}").unwrap();
    fs::write(dir.path().join("scan_zzz.json"), "{}").unwrap();

    let store = ResultStore::open(dir.path()).unwrap();
    let id = store.save(&report_for("https://example.com")).unwrap();

    assert!(id.as_str().starts_with("scan_2"), "unexpected id {id}");
    assert_eq!(store.list(10).unwrap().len(), 1);
}

#[test]
fn concurrent_saves_get_distinct_ids() {
    let (_dir, store) = open_store();
    let store = Arc::new(store);

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let report = report_for(&format!("https://thread{n}.example.com"));
                (0..10).map(|_| store.save(&report).unwrap()).collect::<Vec<_>>()
            })
        })
        .collect();
    let ids: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();

    let distinct: BTreeSet<_> = ids.iter().collect();
    assert_eq!(distinct.len(), 80);
    assert_eq!(store.list(100).unwrap().len(), 80);
}
