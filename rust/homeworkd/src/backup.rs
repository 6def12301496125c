use anyhow::{anyhow, bail, Context};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const BUNDLE_FORMAT_V1: &str = "homeworkd-workspace-v1";
pub const LEGACY_SQLITE_FORMAT: &str = "legacy-sqlite3";

const MANIFEST_ENTRY: &str = "manifest.json";
const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";

/// A workspace file and the archive name it travels under.
struct Member {
    entry: &'static str,
    file: &'static str,
}

const DATABASE: Member = Member {
    entry: "db/homework.sqlite3",
    file: "homework.sqlite3",
};

const SNAPSHOT: Member = Member {
    entry: "cache/snapshot.json",
    file: "cache/snapshot.json",
};

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub includes_snapshot: bool,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub restored_snapshot: bool,
}

fn display(p: &Path) -> String {
    p.to_string_lossy().to_string()
}

fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create directory {}", display(dir)))?;
    }
    Ok(())
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DATABASE.file);
    if !db_path.is_file() {
        bail!("workspace database not found: {}", display(&db_path));
    }
    let mut members = vec![DATABASE];
    if workspace_path.join(SNAPSHOT.file).is_file() {
        members.push(SNAPSHOT);
    }
    let includes_snapshot = members.len() > 1;

    ensure_parent(out_path)?;
    let out_file = File::create(out_path)
        .with_context(|| format!("cannot create bundle {}", display(out_path)))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        "entries": members.iter().map(|m| m.entry).collect::<Vec<_>>(),
    });
    let manifest_bytes = serde_json::to_vec_pretty(&manifest).context("cannot encode manifest")?;
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("cannot add manifest to bundle")?;
    zip.write_all(&manifest_bytes)
        .context("cannot write manifest to bundle")?;

    for member in &members {
        let src = workspace_path.join(member.file);
        let mut input =
            File::open(&src).with_context(|| format!("cannot open {}", display(&src)))?;
        zip.start_file(member.entry, opts)
            .with_context(|| format!("cannot add {} to bundle", member.entry))?;
        std::io::copy(&mut input, &mut zip)
            .with_context(|| format!("cannot write {} to bundle", member.entry))?;
    }
    zip.finish().context("cannot finish bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: members.len() + 1,
        includes_snapshot,
    })
}

/// Streams `reader` into a sibling temp file, then renames it over `dst`.
fn replace_file(reader: &mut impl Read, dst: &Path) -> anyhow::Result<()> {
    ensure_parent(dst)?;
    let mut tmp = dst.as_os_str().to_owned();
    tmp.push(".importing");
    let tmp = PathBuf::from(tmp);
    let _ = std::fs::remove_file(&tmp);

    let mut out = File::create(&tmp).with_context(|| format!("cannot create {}", display(&tmp)))?;
    std::io::copy(reader, &mut out).with_context(|| format!("cannot extract {}", display(dst)))?;
    out.flush()
        .with_context(|| format!("cannot flush {}", display(&tmp)))?;
    drop(out);

    if dst.exists() {
        std::fs::remove_file(dst).with_context(|| format!("cannot replace {}", display(dst)))?;
    }
    std::fs::rename(&tmp, dst).with_context(|| format!("cannot move into {}", display(dst)))
}

fn remove_if_present(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow!(e).context(format!("cannot remove {}", display(path)))),
    }
}

fn looks_like_zip(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path).with_context(|| format!("cannot open {}", display(path)))?;
    let mut sig = [0u8; 4];
    match f.read_exact(&mut sig) {
        Ok(()) => Ok(sig == ZIP_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(anyhow!(e).context(format!("cannot read {}", display(path)))),
    }
}

fn read_manifest<R: Read + std::io::Seek>(archive: &mut ZipArchive<R>) -> anyhow::Result<Value> {
    let mut text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle has no manifest.json")?
        .read_to_string(&mut text)
        .context("cannot read manifest.json")?;
    serde_json::from_str(&text).context("manifest.json is not valid JSON")
}

/// Restores a bundle (or a bare SQLite file) into `workspace_path`.
/// A snapshot left over from the replaced database never survives.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path)
        .with_context(|| format!("cannot create workspace {}", display(workspace_path)))?;
    let db_dst = workspace_path.join(DATABASE.file);
    let snap_dst = workspace_path.join(SNAPSHOT.file);

    if !looks_like_zip(in_path)? {
        let mut src =
            File::open(in_path).with_context(|| format!("cannot open {}", display(in_path)))?;
        replace_file(&mut src, &db_dst)?;
        remove_if_present(&snap_dst)?;
        return Ok(ImportSummary {
            bundle_format_detected: LEGACY_SQLITE_FORMAT.to_string(),
            restored_snapshot: false,
        });
    }

    let file = File::open(in_path).with_context(|| format!("cannot open {}", display(in_path)))?;
    let mut archive = ZipArchive::new(file).context("not a readable zip archive")?;
    let manifest = read_manifest(&mut archive)?;
    let format = manifest.get("format").and_then(Value::as_str).unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        bail!("unsupported bundle format: {}", format);
    }

    {
        let mut entry = archive
            .by_name(DATABASE.entry)
            .with_context(|| format!("bundle has no {}", DATABASE.entry))?;
        replace_file(&mut entry, &db_dst)?;
    }

    let restored_snapshot = match archive.by_name(SNAPSHOT.entry) {
        Ok(mut entry) => {
            replace_file(&mut entry, &snap_dst)?;
            true
        }
        Err(ZipError::FileNotFound) => {
            remove_if_present(&snap_dst)?;
            false
        }
        Err(e) => return Err(anyhow!(e).context("cannot read snapshot from bundle")),
    };

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        restored_snapshot,
    })
}
