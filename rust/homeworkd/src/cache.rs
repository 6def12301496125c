//! The offline snapshot kept next to the database.
//!
//! Every write bumps `revision`, which other windows poll to notice that
//! their view is stale.

use anyhow::Context;
use serde_json::{json, Value};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_DIR: &str = "cache";
pub const SNAPSHOT_FILE: &str = "snapshot.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub revision: i64,
    pub saved_at: String,
}

pub fn snapshot_path(workspace: &Path) -> PathBuf {
    workspace.join(SNAPSHOT_DIR).join(SNAPSHOT_FILE)
}

pub fn read_snapshot(workspace: &Path) -> anyhow::Result<Option<Value>> {
    let path = snapshot_path(workspace);
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let v: Value = serde_json::from_str(&text).context("snapshot is invalid JSON")?;
    Ok(Some(v))
}

pub fn read_meta(workspace: &Path) -> anyhow::Result<Option<SnapshotMeta>> {
    Ok(read_snapshot(workspace)?.map(|v| SnapshotMeta {
        revision: v.get("revision").and_then(|r| r.as_i64()).unwrap_or(0),
        saved_at: v
            .get("savedAt")
            .and_then(|s| s.as_str())
            .unwrap_or("")
            .to_string(),
    }))
}

pub fn write_snapshot(workspace: &Path, data: Value, saved_at: &str) -> anyhow::Result<SnapshotMeta> {
    // An unreadable old snapshot restarts the revision count rather than blocking writes.
    let previous = read_meta(workspace).ok().flatten().map(|m| m.revision).unwrap_or(0);
    let meta = SnapshotMeta {
        revision: previous + 1,
        saved_at: saved_at.to_string(),
    };

    let dir = workspace.join(SNAPSHOT_DIR);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.to_string_lossy()))?;
    let doc = json!({
        "revision": meta.revision,
        "savedAt": meta.saved_at,
        "data": data,
    });

    let dst = snapshot_path(workspace);
    let tmp = dir.join(format!("{}.writing", SNAPSHOT_FILE));
    {
        let mut f = File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.to_string_lossy()))?;
        f.write_all(serde_json::to_string(&doc).context("failed to serialize snapshot")?.as_bytes())
            .context("failed to write snapshot")?;
        f.flush().context("failed to flush snapshot")?;
    }
    std::fs::rename(&tmp, &dst)
        .with_context(|| format!("failed to move snapshot to {}", dst.to_string_lossy()))?;
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn revisions_increase_with_each_write() {
        let ws = temp_dir("homeworkd-cache");
        assert_eq!(read_meta(&ws).expect("meta"), None);

        let a = write_snapshot(&ws, json!({ "tasks": [] }), "2025-11-05T10:00:00Z").expect("write");
        let b = write_snapshot(&ws, json!({ "tasks": [1] }), "2025-11-05T11:00:00Z").expect("write");
        assert_eq!(a.revision, 1);
        assert_eq!(b.revision, 2);

        let snap = read_snapshot(&ws).expect("read").expect("present");
        assert_eq!(snap["data"]["tasks"][0], 1);
        assert_eq!(
            read_meta(&ws).expect("meta"),
            Some(SnapshotMeta {
                revision: 2,
                saved_at: "2025-11-05T11:00:00Z".to_string()
            })
        );
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn corrupt_snapshot_restarts_revisions() {
        let ws = temp_dir("homeworkd-cache-corrupt");
        std::fs::create_dir_all(ws.join(SNAPSHOT_DIR)).expect("mkdir");
        std::fs::write(snapshot_path(&ws), "{not json").expect("write junk");
        assert!(read_snapshot(&ws).is_err());
        let m = write_snapshot(&ws, json!({}), "2025-11-05T10:00:00Z").expect("write");
        assert_eq!(m.revision, 1);
        let _ = std::fs::remove_dir_all(ws);
    }
}
