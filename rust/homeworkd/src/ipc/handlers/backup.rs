use super::core::open_workspace;
use crate::backup;
use crate::ipc::helpers::{optional_nonempty, require_parent, required_str, respond, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request, Session};
use serde_json::{json, Value};
use std::path::PathBuf;

fn target_workspace(state: &AppState, params: &Value) -> Result<PathBuf, HandlerErr> {
    optional_nonempty(params, "workspacePath")
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn io_failed(e: anyhow::Error, path: &str) -> HandlerErr {
    HandlerErr::new("io_failed", format!("{e:#}")).with_details(json!({ "path": path }))
}

/// A failed restore leaves the database untouched, so the workspace and
/// session that were open go back in place.
fn reopen_after_failure(state: &mut AppState, previous: Option<PathBuf>, session: Option<Session>) {
    let Some(path) = previous else {
        return;
    };
    match open_workspace(state, path) {
        Ok(()) => state.session = session,
        Err(e) => tracing::warn!(error = %format!("{e:#}"), "workspace could not be reopened"),
    }
}

fn backup_export(state: &AppState, params: &Value) -> HandlerResult {
    let out_path = required_str(params, "outPath")?;
    let workspace_path = target_workspace(state, params)?;

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let export = backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path))
        .map_err(|e| io_failed(e, &out_path))?;
    tracing::info!(path = %out_path, entries = export.entry_count, "workspace exported");
    Ok(json!({
        "ok": true,
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "includesSnapshot": export.includes_snapshot,
    }))
}

fn backup_import(state: &mut AppState, params: &Value) -> HandlerResult {
    let in_path = required_str(params, "inPath")?;
    // Restoring over an open workspace replaces everyone's data.
    if state.db.is_some() {
        require_parent(state)?;
    }
    let workspace_path = target_workspace(state, params)?;

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::new("not_found", "bundle file not found")
            .with_details(json!({ "path": in_path })));
    }

    // The open handle must be dropped before the file is replaced.
    let previous = state.workspace.clone();
    let session = state.session.take();
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(import) => import,
        Err(e) => {
            reopen_after_failure(state, previous, session);
            return Err(io_failed(e, &in_path));
        }
    };
    open_workspace(state, workspace_path.clone())
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;
    tracing::info!(
        path = %in_path,
        format = %import.bundle_format_detected,
        "workspace restored"
    );
    Ok(json!({
        "ok": true,
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected,
        "restoredSnapshot": import.restored_snapshot,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "backup.export" => backup_export(state, &req.params),
        "backup.import" => backup_import(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
