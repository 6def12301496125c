use super::setup;
use crate::ipc::helpers::{
    db_conn, db_delete, db_insert, db_query, db_update, optional_date, optional_nonempty,
    optional_str, patch_object, require_session, required_str, respond, visible_owner, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request, Session};
use crate::store::{self, HomeworkRow, NewHomework};
use crate::workflow::{
    approve_homework, ensure_homework_editable, request_changes, submit_homework,
    unapprove_homework, HomeworkChange, HomeworkFacts, HomeworkStatus, WorkflowError,
};
use rusqlite::{params, Connection};
use serde_json::{json, Value};

fn load_or_404(conn: &Connection, id: &str) -> Result<HomeworkRow, HandlerErr> {
    store::load_homework(conn, id)
        .map_err(db_query)?
        .ok_or_else(|| HandlerErr::not_found("homework"))
}

/// Students may only reach their own homework.
fn load_visible(conn: &Connection, session: &Session, id: &str) -> Result<HomeworkRow, HandlerErr> {
    let row = load_or_404(conn, id)?;
    if !session.role.is_privileged() && row.owner_id != session.profile_id {
        return Err(WorkflowError::Forbidden(
            "students can only see their own homework".to_string(),
        )
        .into());
    }
    Ok(row)
}

fn render(state: &AppState, conn: &Connection, session: &Session, row: &HomeworkRow) -> Result<Value, HandlerErr> {
    let hs = setup::homework_setup(conn).map_err(db_query)?;
    Ok(row.to_json(session.role, state.today(), hs.overdue_includes_submitted))
}

/// Accepts a subject id, or a name that is resolved case-insensitively.
fn resolve_subject_param(state: &AppState, conn: &Connection, params: &Value) -> Result<Option<String>, HandlerErr> {
    if let Some(id) = optional_nonempty(params, "subjectId") {
        if store::load_subject(conn, &id).map_err(db_query)?.is_none() {
            return Err(HandlerErr::not_found("subject"));
        }
        return Ok(Some(id));
    }
    if let Some(name) = optional_nonempty(params, "subjectName") {
        let (id, _) = store::resolve_subject(conn, &name, &state.now_iso()).map_err(db_insert)?;
        return Ok(Some(id));
    }
    Ok(None)
}

fn matches_filter(filter: &Value, row: &HomeworkRow) -> Result<bool, HandlerErr> {
    match optional_nonempty(filter, "status").as_deref() {
        None | Some("all") => {}
        Some("open") if row.status.is_done() => return Ok(false),
        Some("done") if !row.status.is_done() => return Ok(false),
        Some("open") | Some("done") => {}
        Some(_) => return Err(HandlerErr::bad_params("filter.status must be all, open or done")),
    }
    if let Some(subject) = optional_nonempty(filter, "subject") {
        let by_id = row.subject_id.as_deref() == Some(subject.as_str());
        let by_name = row
            .subject_name
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case(&subject));
        if !by_id && !by_name {
            return Ok(false);
        }
    }
    if let Some(due) = optional_date(filter, "dueDate")? {
        if row.due_date.as_deref() != Some(due.as_str()) {
            return Ok(false);
        }
    }
    if let Some(q) = optional_nonempty(filter, "search").map(|s| s.to_lowercase()) {
        if !row.title.to_lowercase().contains(&q) && !row.notes.to_lowercase().contains(&q) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn homework_list(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let hs = setup::homework_setup(conn).map_err(db_query)?;
    let filter = params.get("filter").cloned().unwrap_or(Value::Null);
    let mut items = Vec::new();
    for row in store::load_homework_list(conn, visible_owner(session)).map_err(db_query)? {
        if matches_filter(&filter, &row)? {
            items.push(row);
        }
    }
    store::sort_homework(&mut items);
    let today = state.today();
    Ok(json!({
        "homework": items
            .iter()
            .map(|h| h.to_json(session.role, today, hs.overdue_includes_submitted))
            .collect::<Vec<_>>()
    }))
}

fn homework_create(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let title = required_str(params, "title")?;
    let owner_id = match optional_nonempty(params, "ownerId") {
        Some(o) if session.role.is_privileged() => {
            if store::load_profile(conn, &o).map_err(db_query)?.is_none() {
                return Err(HandlerErr::not_found("profile"));
            }
            o
        }
        _ => session.profile_id.clone(),
    };
    let subject_id = resolve_subject_param(state, conn, params)?;
    let due_date = optional_date(params, "dueDate")?;
    let notes = optional_str(params, "notes").unwrap_or_default();
    let local_id = optional_nonempty(params, "localId");
    if let Some(local) = local_id.as_deref() {
        if let Some(existing) = store::find_homework_by_local_id(conn, &owner_id, local).map_err(db_query)? {
            let row = load_or_404(conn, &existing)?;
            ensure_homework_editable(session.role, row.status, row.owner_id == session.profile_id)?;
        }
    }
    let new = NewHomework {
        local_id: local_id.as_deref(),
        owner_id: &owner_id,
        subject_id: subject_id.as_deref(),
        title: &title,
        notes: &notes,
        due_date: due_date.as_deref(),
        status: HomeworkStatus::Pending,
    };
    let id = store::upsert_homework(conn, &new, &state.now_iso()).map_err(db_insert)?;
    tracing::info!(homework_id = %id, owner_id = %owner_id, "homework saved");
    let row = load_or_404(conn, &id)?;
    Ok(json!({ "homework": render(state, conn, session, &row)? }))
}

fn homework_update(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let homework_id = required_str(params, "homeworkId")?;
    let patch = patch_object(params)?;
    let mut row = load_visible(conn, session, &homework_id)?;
    ensure_homework_editable(session.role, row.status, row.owner_id == session.profile_id)?;

    for (k, v) in patch {
        match k.as_str() {
            "title" => {
                let t = v.as_str().map(str::trim).unwrap_or("");
                if t.is_empty() {
                    return Err(HandlerErr::bad_params("title must be a non-empty string"));
                }
                row.title = t.to_string();
            }
            "notes" => row.notes = v.as_str().unwrap_or("").trim().to_string(),
            "dueDate" => row.due_date = optional_date(&json!({ "dueDate": v }), "dueDate")?,
            "subjectId" | "subjectName" => {
                row.subject_id = if v.is_null() {
                    None
                } else {
                    let mut one = serde_json::Map::new();
                    one.insert(k.clone(), v.clone());
                    resolve_subject_param(state, conn, &Value::Object(one))?
                };
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown homework field: {}", k))),
        }
    }

    conn.execute(
        "UPDATE homework SET title = ?, notes = ?, due_date = ?, subject_id = ?, updated_at = ? WHERE id = ?",
        params![row.title, row.notes, row.due_date, row.subject_id, state.now_iso(), row.id],
    )
    .map_err(db_update)?;
    let row = load_or_404(conn, &homework_id)?;
    Ok(json!({ "homework": render(state, conn, session, &row)? }))
}

fn homework_delete(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let homework_id = required_str(params, "homeworkId")?;
    let row = load_visible(conn, session, &homework_id)?;
    ensure_homework_editable(session.role, row.status, row.owner_id == session.profile_id)?;
    store::delete_homework(conn, &row.id).map_err(db_delete)?;
    tracing::info!(homework_id = %row.id, "homework deleted");
    Ok(json!({ "ok": true }))
}

fn homework_photos_add(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let homework_id = required_str(params, "homeworkId")?;
    let storage_path = required_str(params, "storagePath")?;
    let row = load_visible(conn, session, &homework_id)?;
    ensure_homework_editable(session.role, row.status, row.owner_id == session.profile_id)?;
    let hs = setup::homework_setup(conn).map_err(db_query)?;
    if !row.photos.contains(&storage_path) && row.photos.len() >= hs.max_photos {
        return Err(WorkflowError::Validation(format!(
            "at most {} photos per homework",
            hs.max_photos
        ))
        .into());
    }
    let added = store::add_homework_photo(conn, &row.id, &storage_path, &state.now_iso())
        .map_err(db_insert)?;
    let row = load_or_404(conn, &homework_id)?;
    Ok(json!({ "added": added, "homework": render(state, conn, session, &row)? }))
}

fn homework_photos_remove(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let homework_id = required_str(params, "homeworkId")?;
    let storage_path = required_str(params, "storagePath")?;
    let row = load_visible(conn, session, &homework_id)?;
    ensure_homework_editable(session.role, row.status, row.owner_id == session.profile_id)?;
    if row.status == HomeworkStatus::Submitted
        && row.photos.len() == 1
        && row.photos.contains(&storage_path)
    {
        return Err(WorkflowError::Validation(
            "submitted homework must keep at least one photo".to_string(),
        )
        .into());
    }
    let n = conn
        .execute(
            "DELETE FROM homework_photos WHERE homework_id = ? AND storage_path = ?",
            params![row.id, storage_path],
        )
        .map_err(db_delete)?;
    if n == 0 {
        return Err(HandlerErr::not_found("photo"));
    }
    let row = load_or_404(conn, &homework_id)?;
    Ok(json!({ "homework": render(state, conn, session, &row)? }))
}

fn apply(state: &AppState, conn: &Connection, session: &Session, row: &HomeworkRow, change: HomeworkChange) -> HandlerResult {
    store::write_homework_change(conn, row, &change, &state.now_iso()).map_err(db_update)?;
    tracing::info!(
        homework_id = %row.id,
        role = session.role.as_str(),
        from = change.from.as_str(),
        to = change.to.as_str(),
        "homework status changed"
    );
    let row = load_or_404(conn, &row.id)?;
    Ok(json!({
        "homework": render(state, conn, session, &row)?,
        "from": change.from.as_str(),
        "to": change.to.as_str(),
    }))
}

fn homework_submit(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let row = load_visible(conn, session, &required_str(params, "homeworkId")?)?;
    let change = submit_homework(
        session.role,
        HomeworkFacts {
            status: row.status,
            owned_by_actor: row.owner_id == session.profile_id,
            photo_count: row.photos.len(),
        },
    )?;
    apply(state, conn, session, &row, change)
}

fn homework_approve(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let row = load_visible(conn, session, &required_str(params, "homeworkId")?)?;
    let change = approve_homework(session.role, row.status)?;
    apply(state, conn, session, &row, change)
}

fn homework_request_changes(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let row = load_visible(conn, session, &required_str(params, "homeworkId")?)?;
    let comment = optional_str(params, "comment").unwrap_or_default();
    let change = request_changes(session.role, row.status, &comment)?;
    apply(state, conn, session, &row, change)
}

fn homework_unapprove(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let row = load_visible(conn, session, &required_str(params, "homeworkId")?)?;
    let change = unapprove_homework(session.role, row.status)?;
    apply(state, conn, session, &row, change)
}

fn homework_clear_done(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let doomed: Vec<String> = store::load_homework_list(conn, visible_owner(session))
        .map_err(db_query)?
        .into_iter()
        .filter(|h| {
            h.status.is_done()
                && ensure_homework_editable(session.role, h.status, h.owner_id == session.profile_id).is_ok()
        })
        .map(|h| h.id)
        .collect();
    let tx = conn.unchecked_transaction().map_err(db_delete)?;
    for id in &doomed {
        store::delete_homework(&tx, id).map_err(db_delete)?;
    }
    tx.commit().map_err(db_delete)?;
    Ok(json!({ "removed": doomed.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "homework.list" => homework_list(state, &req.params),
        "homework.create" => homework_create(state, &req.params),
        "homework.update" => homework_update(state, &req.params),
        "homework.delete" => homework_delete(state, &req.params),
        "homework.photos.add" => homework_photos_add(state, &req.params),
        "homework.photos.remove" => homework_photos_remove(state, &req.params),
        "homework.submit" => homework_submit(state, &req.params),
        "homework.approve" => homework_approve(state, &req.params),
        "homework.requestChanges" => homework_request_changes(state, &req.params),
        "homework.unapprove" => homework_unapprove(state, &req.params),
        "homework.clearDone" => homework_clear_done(state),
        _ => return None,
    };
    Some(respond(req, result))
}
