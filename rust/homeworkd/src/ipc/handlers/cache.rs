use super::{setup, timetable};
use crate::cache;
use crate::ipc::helpers::{
    db_conn, db_insert, db_query, optional_bool, require_session, required_str, respond,
    visible_owner, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request, Session};
use crate::legacy::normalize_priority;
use crate::merge::{local_id_of, merge_records};
use crate::store::{self, NewHomework, NewTask};
use crate::week::{parse_date, week_start};
use crate::workflow::{admit_homework_status, admit_task_status, HomeworkStatus, TaskStatus};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::Path;

fn workspace_path(state: &AppState) -> Result<&Path, HandlerErr> {
    state
        .workspace
        .as_deref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn io_failed(path: &Path, e: anyhow::Error) -> HandlerErr {
    HandlerErr::new("io_failed", format!("{e:#}"))
        .with_details(json!({ "path": path.to_string_lossy() }))
}

fn cache_snapshot(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let ws = workspace_path(state)?;
    let session = require_session(state)?;
    let hw_setup = setup::homework_setup(conn).map_err(db_query)?;
    let today = state.today();
    let owner = visible_owner(session);

    let mut tasks = store::load_tasks(conn, owner).map_err(db_query)?;
    store::sort_tasks(&mut tasks);
    let mut homework = store::load_homework_list(conn, owner).map_err(db_query)?;
    store::sort_homework(&mut homework);
    let data = json!({
        "profileId": session.profile_id,
        "subjects": store::subjects_with_themes(conn).map_err(db_query)?,
        "tasks": tasks.iter().map(|t| t.to_json()).collect::<Vec<_>>(),
        "homework": homework
            .iter()
            .map(|h| h.to_json(session.role, today, hw_setup.overdue_includes_submitted))
            .collect::<Vec<_>>(),
        "timetable": timetable::grid_for_week(conn, week_start(today))?,
    });

    let meta = cache::write_snapshot(ws, data, &state.now_iso()).map_err(|e| io_failed(ws, e))?;
    tracing::info!(revision = meta.revision, "cache snapshot written");
    Ok(json!({ "ok": true, "revision": meta.revision, "savedAt": meta.saved_at }))
}

fn cache_load(state: &AppState) -> HandlerResult {
    let ws = workspace_path(state)?;
    let snapshot = cache::read_snapshot(ws).map_err(|e| io_failed(ws, e))?;
    Ok(json!({ "snapshot": snapshot }))
}

fn cache_revision(state: &AppState) -> HandlerResult {
    let ws = workspace_path(state)?;
    let meta = cache::read_meta(ws).map_err(|e| io_failed(ws, e))?;
    Ok(match meta {
        Some(m) => json!({ "revision": m.revision, "savedAt": m.saved_at }),
        None => json!({ "revision": 0, "savedAt": null }),
    })
}

fn text_field(record: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| record.get(*k).and_then(|v| v.as_str()))
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn date_field(record: &Value) -> Option<String> {
    record
        .get("dueDate")
        .and_then(|v| v.as_str())
        .and_then(parse_date)
        .map(|d| d.to_string())
}

fn push_task(state: &AppState, conn: &Connection, session: &Session, local_id: &str, r: &Value) -> rusqlite::Result<bool> {
    let title = text_field(r, &["title", "text"]);
    if title.is_empty() {
        return Ok(false);
    }
    let raw_status = r.get("status").and_then(|v| v.as_str());
    let status = match raw_status.and_then(TaskStatus::parse) {
        Some(s) => s,
        None if r.get("completed").and_then(|v| v.as_bool()) == Some(true) => TaskStatus::Completed,
        None => TaskStatus::Pending,
    };
    let required = session.role.is_privileged()
        && r.get("required").and_then(|v| v.as_bool()).unwrap_or(false);
    let description = text_field(r, &["description"]);
    let tag = text_field(r, &["tag"]);
    let due = date_field(r);
    let new = NewTask {
        local_id: Some(local_id),
        owner_id: &session.profile_id,
        title: &title,
        description: &description,
        tag: &tag,
        priority: normalize_priority(r.get("priority").and_then(|v| v.as_str())),
        due_date: due.as_deref(),
        required,
        assigned_by: required.then_some(session.profile_id.as_str()),
        status: admit_task_status(session.role, status),
    };
    store::upsert_task(conn, &new, &state.now_iso())?;
    Ok(true)
}

fn push_homework(
    state: &AppState,
    conn: &Connection,
    session: &Session,
    max_photos: usize,
    local_id: &str,
    r: &Value,
) -> rusqlite::Result<bool> {
    let title = text_field(r, &["title", "text"]);
    if title.is_empty()
        || store::homework_local_id_locked(conn, &session.profile_id, Some(local_id), session.role)?
    {
        return Ok(false);
    }
    let now = state.now_iso();
    let subject_id = match r.get("subjectId").and_then(|v| v.as_str()) {
        Some(id) if store::load_subject(conn, id)?.is_some() => Some(id.to_string()),
        _ => {
            let name = text_field(r, &["subjectName", "subject"]);
            if name.is_empty() {
                None
            } else {
                Some(store::resolve_subject(conn, &name, &now)?.0)
            }
        }
    };
    let photos: Vec<&str> = r
        .get("photos")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|p| p.as_str()).filter(|p| !p.trim().is_empty()).collect())
        .unwrap_or_default();
    let status = HomeworkStatus::normalize(r.get("status").and_then(|v| v.as_str()));
    let notes = text_field(r, &["notes"]);
    let due = date_field(r);
    let new = NewHomework {
        local_id: Some(local_id),
        owner_id: &session.profile_id,
        subject_id: subject_id.as_deref(),
        title: &title,
        notes: &notes,
        due_date: due.as_deref(),
        status: admit_homework_status(session.role, status, photos.len()),
    };
    let id = store::upsert_homework(conn, &new, &now)?;
    store::attach_photos_capped(conn, &id, photos.into_iter().map(str::trim), max_photos, &now)?;
    Ok(true)
}

fn sync_merge(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let kind = required_str(params, "kind")?;
    let Some(local) = params.get("local").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("local must be an array"));
    };
    let push = optional_bool(params, "push")?.unwrap_or(false);
    let owner = visible_owner(session);

    let stored: Vec<Value> = match kind.as_str() {
        "tasks" => {
            let mut rows = store::load_tasks(conn, owner).map_err(db_query)?;
            store::sort_tasks(&mut rows);
            rows.iter().map(|t| t.to_json()).collect()
        }
        "homework" => {
            let hw_setup = setup::homework_setup(conn).map_err(db_query)?;
            let mut rows = store::load_homework_list(conn, owner).map_err(db_query)?;
            store::sort_homework(&mut rows);
            rows.iter()
                .map(|h| h.to_json(session.role, state.today(), hw_setup.overdue_includes_submitted))
                .collect()
        }
        _ => return Err(HandlerErr::bad_params("kind must be tasks or homework")),
    };
    let outcome = merge_records(stored, local);

    let mut pushed = 0usize;
    if push && !outcome.local_only.is_empty() {
        let max_photos = setup::homework_setup(conn).map_err(db_query)?.max_photos;
        let tx = conn.unchecked_transaction().map_err(db_insert)?;
        for record in local {
            let Some(local_id) = local_id_of(record) else {
                continue;
            };
            if !outcome.local_only.iter().any(|l| l == local_id) {
                continue;
            }
            let inserted = match kind.as_str() {
                "tasks" => push_task(state, &tx, session, local_id, record),
                _ => push_homework(state, &tx, session, max_photos, local_id, record),
            }
            .map_err(db_insert)?;
            if inserted {
                pushed += 1;
            }
        }
        tx.commit().map_err(db_insert)?;
        tracing::info!(kind = %kind, pushed, "local records pushed");
    }

    Ok(json!({
        "merged": outcome.merged,
        "localOnly": outcome.local_only,
        "pushed": pushed,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "cache.snapshot" => cache_snapshot(state),
        "cache.load" => cache_load(state),
        "cache.revision" => cache_revision(state),
        "sync.merge" => sync_merge(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
