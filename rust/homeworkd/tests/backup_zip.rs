#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("homeworkd-backup-src");
    let workspace2 = temp_dir("homeworkd-backup-dst");
    let out_dir = temp_dir("homeworkd-backup-out");

    let bytes = b"sqlite-test-payload";
    std::fs::write(workspace.join("homework.sqlite3"), bytes).expect("write source db");
    std::fs::create_dir_all(workspace.join("cache")).expect("create cache dir");
    let snapshot = br#"{"revision":4,"savedAt":"2025-11-05T08:00:00Z","data":{}}"#;
    std::fs::write(workspace.join("cache").join("snapshot.json"), snapshot).expect("write snapshot");

    let bundle_path = out_dir.join("nested").join("workspace.hwbackup.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 3);
    assert!(export.includes_snapshot);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    assert_eq!(manifest["format"], backup::BUNDLE_FORMAT_V1);
    assert_eq!(manifest["entries"].as_array().expect("entries").len(), 2);
    archive
        .by_name("db/homework.sqlite3")
        .expect("database entry in bundle");

    // A snapshot already in the destination is replaced, not merged.
    std::fs::create_dir_all(workspace2.join("cache")).expect("create cache dir");
    std::fs::write(workspace2.join("cache").join("snapshot.json"), b"{}").expect("write old snapshot");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);
    assert!(import.restored_snapshot);

    let restored = std::fs::read(workspace2.join("homework.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);
    let restored_snapshot =
        std::fs::read(workspace2.join("cache").join("snapshot.json")).expect("read restored snapshot");
    assert_eq!(restored_snapshot, snapshot);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn bundle_without_snapshot_drops_the_stale_one() {
    let workspace = temp_dir("homeworkd-backup-nosnap-src");
    let workspace2 = temp_dir("homeworkd-backup-nosnap-dst");
    let out_dir = temp_dir("homeworkd-backup-nosnap-out");

    std::fs::write(workspace.join("homework.sqlite3"), b"db-only").expect("write source db");
    let bundle_path = out_dir.join("db-only.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.entry_count, 2);
    assert!(!export.includes_snapshot);

    std::fs::create_dir_all(workspace2.join("cache")).expect("create cache dir");
    let stale = workspace2.join("cache").join("snapshot.json");
    std::fs::write(&stale, b"{}").expect("write stale snapshot");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert!(!import.restored_snapshot);
    assert!(!stale.exists());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn export_requires_a_database() {
    let workspace = temp_dir("homeworkd-backup-empty");
    let out = workspace.join("out.zip");
    let err = backup::export_workspace_bundle(&workspace, &out).expect_err("no database");
    assert!(err.to_string().contains("workspace database not found"));
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn legacy_sqlite_import_is_supported() {
    let out_dir = temp_dir("homeworkd-backup-legacy");
    let workspace = temp_dir("homeworkd-backup-legacy-dst");

    let legacy_file = out_dir.join("legacy.sqlite3");
    let bytes = b"legacy-sqlite-copy";
    std::fs::write(&legacy_file, bytes).expect("write legacy sqlite file");

    let import =
        backup::import_workspace_bundle(&legacy_file, &workspace).expect("import legacy sqlite");
    assert_eq!(import.bundle_format_detected, backup::LEGACY_SQLITE_FORMAT);
    assert!(!import.restored_snapshot);

    let restored = std::fs::read(workspace.join("homework.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}
