use super::setup::{self, TimetableSetup};
use crate::ipc::helpers::{
    db_conn, db_delete, db_insert, db_query, db_update, optional_bool, optional_nonempty,
    optional_str, require_parent, required_str, required_u32, respond, week_from_params,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, CellWrite};
use crate::week::{parse_week_key, week_key, WeekInfo};
use rusqlite::Connection;
use serde_json::{json, Value};

fn week_info(state: &AppState, params: &Value) -> HandlerResult {
    let start = week_from_params(state, params)?;
    Ok(json!(WeekInfo::for_date(start)))
}

/// `""` is the standing schedule; anything else must be a valid week key and
/// is returned in canonical form.
fn target_week_key(params: &Value) -> Result<String, HandlerErr> {
    match optional_nonempty(params, "weekKey") {
        None => Ok(String::new()),
        Some(raw) => parse_week_key(&raw)
            .map(week_key)
            .ok_or_else(|| HandlerErr::bad_params("weekKey must look like YYYY-Www")),
    }
}

fn cell_position(params: &Value, tt: &TimetableSetup) -> Result<(u32, u32), HandlerErr> {
    let weekday = required_u32(params, "weekday")?;
    let slot = required_u32(params, "slot")?;
    if weekday >= tt.days {
        return Err(HandlerErr::bad_params(format!("weekday must be in 0..{}", tt.days)));
    }
    if slot >= tt.slots_per_day {
        return Err(HandlerErr::bad_params(format!("slot must be in 0..{}", tt.slots_per_day)));
    }
    Ok((weekday, slot))
}

pub fn grid_for_week(conn: &Connection, week_start: chrono::NaiveDate) -> Result<Value, HandlerErr> {
    let tt = setup::timetable_setup(conn).map_err(db_query)?;
    let info = WeekInfo::for_date(week_start);
    let cells: Vec<Value> = store::load_timetable_week(conn, &info.week_key)
        .map_err(db_query)?
        .into_iter()
        .filter(|c| c.weekday < tt.days && c.slot < tt.slots_per_day)
        .map(|c| c.to_json())
        .collect();
    Ok(json!({
        "week": info,
        "days": tt.days,
        "slotsPerDay": tt.slots_per_day,
        "slotTimes": tt.slot_times,
        "cells": cells,
    }))
}

fn timetable_get(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let start = week_from_params(state, params)?;
    grid_for_week(conn, start)
}

fn clear_cell(conn: &Connection, week_key: &str, weekday: u32, slot: u32) -> rusqlite::Result<usize> {
    let was_double = store::cell_is_double(conn, week_key, weekday, slot)?.unwrap_or(false);
    let mut removed = store::delete_cell(conn, week_key, weekday, slot)?;
    if was_double && store::cell_is_double(conn, week_key, weekday, slot + 1)? == Some(true) {
        removed += store::delete_cell(conn, week_key, weekday, slot + 1)?;
    }
    Ok(removed)
}

fn timetable_set_cell(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    require_parent(state)?;
    let tt = setup::timetable_setup(conn).map_err(db_query)?;
    let week_key = target_week_key(params)?;
    let (weekday, slot) = cell_position(params, &tt)?;
    let subject_name = optional_str(params, "subjectName").unwrap_or_default();

    if subject_name.is_empty() {
        let removed = clear_cell(conn, &week_key, weekday, slot).map_err(db_delete)?;
        return Ok(json!({ "ok": true, "removed": removed }));
    }

    let now = state.now_iso();
    let room = optional_str(params, "room").unwrap_or_default();
    let teacher = optional_str(params, "teacher").unwrap_or_default();
    let is_double = optional_bool(params, "isDouble")?.unwrap_or(false);

    let tx = conn.unchecked_transaction().map_err(db_update)?;
    let (subject_id, created) = store::resolve_subject(&tx, &subject_name, &now).map_err(db_insert)?;
    let mut cell = CellWrite {
        week_key: &week_key,
        weekday,
        slot,
        subject_id: &subject_id,
        room: &room,
        teacher: &teacher,
        is_double,
    };
    store::upsert_cell(&tx, &cell, &now).map_err(db_update)?;

    let next = slot + 1;
    let mirrored = is_double && next < tt.slots_per_day;
    if mirrored {
        cell.slot = next;
        store::upsert_cell(&tx, &cell, &now).map_err(db_update)?;
    } else if store::cell_is_double(&tx, &week_key, weekday, next).map_err(db_query)? == Some(true) {
        // The second half of a former double lesson.
        store::delete_cell(&tx, &week_key, weekday, next).map_err(db_delete)?;
    }
    tx.commit().map_err(db_update)?;

    tracing::info!(
        week_key = %week_key,
        weekday,
        slot,
        subject_id = %subject_id,
        is_double,
        "timetable cell set"
    );
    Ok(json!({
        "ok": true,
        "subjectId": subject_id,
        "subjectCreated": created,
        "mirrored": mirrored,
    }))
}

fn timetable_clear_cell(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    require_parent(state)?;
    let tt = setup::timetable_setup(conn).map_err(db_query)?;
    let week_key = target_week_key(params)?;
    let (weekday, slot) = cell_position(params, &tt)?;
    let removed = clear_cell(conn, &week_key, weekday, slot).map_err(db_delete)?;
    Ok(json!({ "ok": true, "removed": removed }))
}

fn timetable_clear_week(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    require_parent(state)?;
    let raw = required_str(params, "weekKey")?;
    let Some(monday) = parse_week_key(&raw) else {
        return Err(HandlerErr::bad_params("weekKey must look like YYYY-Www"));
    };
    let key = week_key(monday);
    let removed = conn
        .execute("DELETE FROM timetable_entries WHERE week_key = ?", [&key])
        .map_err(db_delete)?;
    tracing::info!(week_key = %key, removed, "timetable week cleared");
    Ok(json!({ "ok": true, "removed": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "week.info" => week_info(state, &req.params),
        "timetable.get" => timetable_get(state, &req.params),
        "timetable.setCell" => timetable_set_cell(state, &req.params),
        "timetable.clearCell" => timetable_clear_cell(state, &req.params),
        "timetable.clearWeek" => timetable_clear_week(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
