use crate::ipc::helpers::{
    db_conn, db_delete, db_insert, db_query, db_update, new_id, optional_nonempty, optional_str,
    require_parent, require_session, required_str, respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::rating::{percent_to_rating, rating_from_json, DEFAULT_RATING, MIN_RATING};
use crate::store::{self, DEFAULT_SUBJECT_COLOR};
use rusqlite::{params, Connection};
use serde_json::{json, Value};

fn is_color(s: &str) -> bool {
    let hex = s.strip_prefix('#').unwrap_or("");
    matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
}

fn subjects_list(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let subjects = store::subjects_with_themes(conn).map_err(db_query)?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    require_session(state)?;
    let name = required_str(params, "name")?;
    let color = optional_nonempty(params, "color").unwrap_or_else(|| DEFAULT_SUBJECT_COLOR.to_string());
    if !is_color(&color) {
        return Err(HandlerErr::bad_params("color must be #rgb or #rrggbb"));
    }
    if store::find_subject_by_name(conn, &name).map_err(db_query)?.is_some() {
        return Err(HandlerErr::new("conflict", "a subject with this name already exists")
            .with_details(json!({ "name": name })));
    }
    let id = store::insert_subject(conn, &name, &color, &state.now_iso()).map_err(db_insert)?;
    tracing::info!(subject_id = %id, "subject created");
    Ok(json!({ "subjectId": id, "name": name, "color": color }))
}

fn subjects_resolve(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    require_session(state)?;
    let name = required_str(params, "name")?;
    let (id, created) = store::resolve_subject(conn, &name, &state.now_iso()).map_err(db_insert)?;
    Ok(json!({ "subjectId": id, "created": created }))
}

fn subjects_rename(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    require_parent(state)?;
    let subject_id = required_str(params, "subjectId")?;
    let name = required_str(params, "name")?;
    if store::load_subject(conn, &subject_id).map_err(db_query)?.is_none() {
        return Err(HandlerErr::not_found("subject"));
    }
    if let Some(other) = store::find_subject_by_name(conn, &name).map_err(db_query)? {
        if other.id != subject_id {
            return Err(HandlerErr::new("conflict", "a subject with this name already exists"));
        }
    }
    conn.execute(
        "UPDATE subjects SET name = ?, name_key = ? WHERE id = ?",
        params![name, store::subject_key(&name), subject_id],
    )
    .map_err(db_update)?;
    Ok(json!({ "ok": true }))
}

fn delete_subject_cascade(conn: &Connection, subject_id: &str) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM theme_photos WHERE theme_id IN (SELECT id FROM themes WHERE subject_id = ?)",
        [subject_id],
    )?;
    tx.execute("DELETE FROM theme_updates WHERE subject_id = ?", [subject_id])?;
    tx.execute("DELETE FROM themes WHERE subject_id = ?", [subject_id])?;
    tx.execute("DELETE FROM timetable_entries WHERE subject_id = ?", [subject_id])?;
    tx.execute(
        "UPDATE homework SET subject_id = NULL WHERE subject_id = ?",
        [subject_id],
    )?;
    let n = tx.execute("DELETE FROM subjects WHERE id = ?", [subject_id])?;
    tx.commit()?;
    Ok(n)
}

fn subjects_delete(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    require_parent(state)?;
    let subject_id = required_str(params, "subjectId")?;
    let n = delete_subject_cascade(conn, &subject_id).map_err(db_delete)?;
    if n == 0 {
        return Err(HandlerErr::not_found("subject"));
    }
    tracing::info!(subject_id = %subject_id, "subject deleted");
    Ok(json!({ "ok": true }))
}

fn load_theme_or_404(conn: &Connection, theme_id: &str) -> Result<store::ThemeRow, HandlerErr> {
    store::load_theme(conn, theme_id)
        .map_err(db_query)?
        .ok_or_else(|| HandlerErr::not_found("theme"))
}

fn themes_create(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    require_session(state)?;
    let subject_id = required_str(params, "subjectId")?;
    let title = required_str(params, "title")?;
    if store::load_subject(conn, &subject_id).map_err(db_query)?.is_none() {
        return Err(HandlerErr::not_found("subject"));
    }
    let rating = match params.get("rating") {
        None | Some(Value::Null) => DEFAULT_RATING,
        v => rating_from_json(v),
    };
    let description = optional_str(params, "description").unwrap_or_default();
    let id = store::insert_theme(conn, &subject_id, &title, &description, rating, &state.now_iso())
        .map_err(db_insert)?;
    let theme = load_theme_or_404(conn, &id)?;
    Ok(json!({ "theme": theme.to_json() }))
}

fn set_theme_rating(state: &AppState, theme_id: &str, rating: i64) -> HandlerResult {
    let conn = db_conn(state)?;
    let theme = load_theme_or_404(conn, theme_id)?;
    let now = state.now_iso();
    let tx = conn.unchecked_transaction().map_err(db_update)?;
    tx.execute(
        "UPDATE themes SET rating = ?, updated_at = ? WHERE id = ?",
        params![rating, now, theme.id],
    )
    .map_err(db_update)?;
    tx.execute(
        "INSERT INTO theme_updates(id, theme_id, subject_id, calendar_date, rating, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        params![new_id(), theme.id, theme.subject_id, state.today().to_string(), rating, now],
    )
    .map_err(db_insert)?;
    tx.commit().map_err(db_update)?;
    tracing::debug!(theme_id = %theme.id, rating, "theme rating updated");
    let theme = load_theme_or_404(conn, theme_id)?;
    Ok(json!({ "theme": theme.to_json() }))
}

fn themes_update_rating(state: &AppState, params: &Value) -> HandlerResult {
    require_session(state)?;
    let theme_id = required_str(params, "themeId")?;
    let rating = rating_from_json(params.get("rating"));
    set_theme_rating(state, &theme_id, rating)
}

fn themes_update_progress(state: &AppState, params: &Value) -> HandlerResult {
    require_session(state)?;
    let theme_id = required_str(params, "themeId")?;
    let percent = match params.get("percent") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => return Err(HandlerErr::bad_params("missing percent")),
    };
    set_theme_rating(state, &theme_id, percent_to_rating(percent.clamp(0.0, 100.0)))
}

fn themes_update_description(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    require_session(state)?;
    let theme_id = required_str(params, "themeId")?;
    let description = optional_str(params, "description").unwrap_or_default();
    let theme = load_theme_or_404(conn, &theme_id)?;
    conn.execute(
        "UPDATE themes SET description = ?, updated_at = ? WHERE id = ?",
        params![description, state.now_iso(), theme.id],
    )
    .map_err(db_update)?;
    let theme = load_theme_or_404(conn, &theme_id)?;
    Ok(json!({ "theme": theme.to_json() }))
}

fn themes_delete(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    require_parent(state)?;
    let theme_id = required_str(params, "themeId")?;
    let theme = load_theme_or_404(conn, &theme_id)?;
    let tx = conn.unchecked_transaction().map_err(db_delete)?;
    tx.execute("DELETE FROM theme_photos WHERE theme_id = ?", [&theme.id])
        .map_err(db_delete)?;
    tx.execute("DELETE FROM theme_updates WHERE theme_id = ?", [&theme.id])
        .map_err(db_delete)?;
    tx.execute("DELETE FROM themes WHERE id = ?", [&theme.id])
        .map_err(db_delete)?;
    tx.commit().map_err(db_delete)?;
    Ok(json!({ "ok": true }))
}

/// Puts every theme (or one subject's themes) back to the lowest rating.
/// The update log is history and stays.
fn themes_reset_all(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    require_parent(state)?;
    let now = state.now_iso();
    let reset = match optional_nonempty(params, "subjectId") {
        Some(subject_id) => {
            if store::load_subject(conn, &subject_id).map_err(db_query)?.is_none() {
                return Err(HandlerErr::not_found("subject"));
            }
            conn.execute(
                "UPDATE themes SET rating = ?, updated_at = ? WHERE subject_id = ?",
                params![MIN_RATING, now, subject_id],
            )
        }
        None => conn.execute(
            "UPDATE themes SET rating = ?, updated_at = ?",
            params![MIN_RATING, now],
        ),
    }
    .map_err(db_update)?;
    tracing::info!(reset, "theme ratings reset");
    Ok(json!({ "reset": reset }))
}

fn theme_photos(conn: &Connection, theme_id: &str) -> rusqlite::Result<Vec<Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, storage_path, created_by, created_at FROM theme_photos
         WHERE theme_id = ? ORDER BY created_at, id",
    )?;
    let rows = stmt.query_map([theme_id], |r| {
        let id: String = r.get(0)?;
        let storage_path: String = r.get(1)?;
        let created_by: Option<String> = r.get(2)?;
        let created_at: String = r.get(3)?;
        Ok(json!({
            "id": id,
            "storagePath": storage_path,
            "createdBy": created_by,
            "createdAt": created_at,
        }))
    })?;
    rows.collect()
}

fn themes_photos_list(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let theme_id = required_str(params, "themeId")?;
    let theme = load_theme_or_404(conn, &theme_id)?;
    let photos = theme_photos(conn, &theme.id).map_err(db_query)?;
    Ok(json!({ "photos": photos }))
}

fn themes_photos_add(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let theme_id = required_str(params, "themeId")?;
    let storage_path = required_str(params, "storagePath")?;
    let theme = load_theme_or_404(conn, &theme_id)?;
    let id = new_id();
    conn.execute(
        "INSERT INTO theme_photos(id, theme_id, storage_path, created_by, created_at)
         VALUES(?, ?, ?, ?, ?)",
        params![id, theme.id, storage_path, session.profile_id, state.now_iso()],
    )
    .map_err(db_insert)?;
    Ok(json!({ "photoId": id }))
}

fn themes_photos_delete(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    require_parent(state)?;
    let photo_id = required_str(params, "photoId")?;
    let n = conn
        .execute("DELETE FROM theme_photos WHERE id = ?", [&photo_id])
        .map_err(db_delete)?;
    if n == 0 {
        return Err(HandlerErr::not_found("photo"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "subjects.list" => subjects_list(state),
        "subjects.create" => subjects_create(state, &req.params),
        "subjects.resolve" => subjects_resolve(state, &req.params),
        "subjects.rename" => subjects_rename(state, &req.params),
        "subjects.delete" => subjects_delete(state, &req.params),
        "themes.create" => themes_create(state, &req.params),
        "themes.updateRating" => themes_update_rating(state, &req.params),
        "themes.updateProgress" => themes_update_progress(state, &req.params),
        "themes.updateDescription" => themes_update_description(state, &req.params),
        "themes.delete" => themes_delete(state, &req.params),
        "themes.resetAll" => themes_reset_all(state, &req.params),
        "themes.photos.list" => themes_photos_list(state, &req.params),
        "themes.photos.add" => themes_photos_add(state, &req.params),
        "themes.photos.delete" => themes_photos_delete(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
