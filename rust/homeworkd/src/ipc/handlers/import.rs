use super::setup::{self, HomeworkSetup, TimetableSetup};
use crate::ipc::helpers::{
    db_conn, db_insert, db_query, require_session, required_str, respond, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request, Session};
use crate::legacy::{read_legacy_cache, LegacyData};
use crate::store::{self, CellWrite, NewHomework, NewTask, DEFAULT_SUBJECT_COLOR};
use crate::week::parse_date;
use crate::workflow::{admit_homework_status, admit_task_status};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportCounts {
    subjects_created: usize,
    themes: usize,
    homework: usize,
    photos: usize,
    tasks: usize,
    timetable_cells: usize,
    skipped: usize,
}

fn valid_color(raw: Option<&str>) -> &str {
    match raw {
        Some(c) if c.len() == 7 && c.starts_with('#') && c[1..].chars().all(|ch| ch.is_ascii_hexdigit()) => c,
        _ => DEFAULT_SUBJECT_COLOR,
    }
}

fn iso_date(raw: Option<&str>) -> Option<String> {
    raw.and_then(parse_date).map(|d| d.to_string())
}

fn subject_id_for(conn: &Connection, name: &str, color: Option<&str>, now: &str, counts: &mut ImportCounts) -> rusqlite::Result<String> {
    if let Some(s) = store::find_subject_by_name(conn, name)? {
        return Ok(s.id);
    }
    counts.subjects_created += 1;
    store::insert_subject(conn, name, valid_color(color), now)
}

/// Same title in the same subject updates the existing theme.
fn upsert_theme(conn: &Connection, subject_id: &str, title: &str, description: &str, rating: i64, now: &str) -> rusqlite::Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM themes WHERE subject_id = ? AND lower(title) = lower(?)",
            [subject_id, title],
            |r| r.get(0),
        )
        .optional()?;
    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE themes SET rating = ?, description = CASE WHEN ? = '' THEN description ELSE ? END,
                     updated_at = ?
                 WHERE id = ?",
                params![rating, description, description, now, id],
            )?;
        }
        None => {
            store::insert_theme(conn, subject_id, title, description, rating, now)?;
        }
    }
    Ok(())
}

fn import_data(
    state: &AppState,
    conn: &Connection,
    session: &Session,
    tt: &TimetableSetup,
    hs: &HomeworkSetup,
    data: &LegacyData,
) -> rusqlite::Result<ImportCounts> {
    let now = state.now_iso();
    let mut counts = ImportCounts::default();

    for s in &data.subjects {
        let subject_id = subject_id_for(conn, &s.name, s.color.as_deref(), &now, &mut counts)?;
        for t in &s.themes {
            upsert_theme(conn, &subject_id, &t.title, &t.description, t.rating, &now)?;
            counts.themes += 1;
        }
    }

    for h in &data.homework {
        if store::homework_local_id_locked(conn, &session.profile_id, h.local_id.as_deref(), session.role)? {
            counts.skipped += 1;
            continue;
        }
        let subject_id = match h.subject.as_deref() {
            Some(name) => Some(subject_id_for(conn, name, None, &now, &mut counts)?),
            None => None,
        };
        let due = iso_date(h.due_date.as_deref());
        let new = NewHomework {
            local_id: h.local_id.as_deref(),
            owner_id: &session.profile_id,
            subject_id: subject_id.as_deref(),
            title: &h.title,
            notes: &h.notes,
            due_date: due.as_deref(),
            status: admit_homework_status(session.role, h.status, h.photos.len()),
        };
        let id = store::upsert_homework(conn, &new, &now)?;
        counts.homework += 1;
        counts.photos +=
            store::attach_photos_capped(conn, &id, h.photos.iter().map(String::as_str), hs.max_photos, &now)?;
    }

    for t in &data.tasks {
        if let Some(local) = t.local_id.as_deref() {
            if let Some(existing) = store::find_task_by_local_id(conn, &session.profile_id, local)? {
                let locked = store::load_task(conn, &existing)?
                    .is_some_and(|row| row.required && !session.role.is_privileged());
                if locked {
                    counts.skipped += 1;
                    continue;
                }
            }
        }
        let required = t.required && session.role.is_privileged();
        let due = iso_date(t.due_date.as_deref());
        let new = NewTask {
            local_id: t.local_id.as_deref(),
            owner_id: &session.profile_id,
            title: &t.title,
            description: "",
            tag: &t.tag,
            priority: &t.priority,
            due_date: due.as_deref(),
            required,
            assigned_by: required.then_some(session.profile_id.as_str()),
            status: admit_task_status(session.role, t.status),
        };
        store::upsert_task(conn, &new, &now)?;
        counts.tasks += 1;
    }

    if !data.timetable.is_empty() {
        if !session.role.is_privileged() {
            counts.skipped += data.timetable.len();
        } else {
            for c in &data.timetable {
                if c.weekday >= tt.days || c.slot >= tt.slots_per_day {
                    counts.skipped += 1;
                    continue;
                }
                let subject_id = subject_id_for(conn, &c.subject, None, &now, &mut counts)?;
                let cell = CellWrite {
                    week_key: "",
                    weekday: c.weekday,
                    slot: c.slot,
                    subject_id: &subject_id,
                    room: &c.room,
                    teacher: &c.teacher,
                    is_double: c.is_double,
                };
                store::upsert_cell(conn, &cell, &now)?;
                counts.timetable_cells += 1;
            }
        }
    }
    Ok(counts)
}

fn import_legacy_cache(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let path = PathBuf::from(required_str(params, "path")?);
    let data = read_legacy_cache(&path).map_err(|e| {
        HandlerErr::new("io_failed", format!("{e:#}"))
            .with_details(json!({ "path": path.to_string_lossy() }))
    })?;

    let tt = setup::timetable_setup(conn).map_err(db_query)?;
    let hs = setup::homework_setup(conn).map_err(db_query)?;

    let tx = conn.unchecked_transaction().map_err(db_insert)?;
    let counts = import_data(state, &tx, session, &tt, &hs, &data).map_err(db_insert)?;
    tx.commit().map_err(db_insert)?;
    tracing::info!(
        path = %path.display(),
        owner_id = %session.profile_id,
        homework = counts.homework,
        tasks = counts.tasks,
        cells = counts.timetable_cells,
        skipped = counts.skipped,
        "legacy cache imported"
    );
    Ok(json!({ "ok": true, "counts": counts }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "import.legacyCache" => import_legacy_cache(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
