use super::setup;
use crate::cache;
use crate::ipc::helpers::{
    db_conn, db_query, optional_date, require_session, respond, visible_owner, week_from_params,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::stats::{
    approved_homework_in_week, completed_tasks_in_week, daily_achievement, run_diagnostics,
    summarize_homework, summarize_ratings, summarize_study_time, summarize_tasks,
    week_achievement, DiagnosticsInput, HomeworkStat, SubjectRatings, TaskStat,
};
use crate::store;
use crate::week::{parse_date, week_start, WeekInfo};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeMap;
use rusqlite::Connection;
use serde_json::{json, Value};

fn count(conn: &Connection, sql: &str) -> rusqlite::Result<usize> {
    conn.query_row(sql, [], |r| r.get::<_, i64>(0))
        .map(|n| n.max(0) as usize)
}

fn subject_ratings(conn: &Connection) -> rusqlite::Result<Vec<SubjectRatings>> {
    let subjects = store::subjects_with_themes(conn)?;
    Ok(subjects
        .iter()
        .map(|s| SubjectRatings {
            name: s["name"].as_str().unwrap_or_default().to_string(),
            ratings: s["themes"]
                .as_array()
                .map(|ts| ts.iter().filter_map(|t| t["rating"].as_i64()).collect())
                .unwrap_or_default(),
        })
        .collect())
}

fn stats_weekly(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let start = week_from_params(state, params)?;
    let info = WeekInfo::for_date(start);
    let hw_setup = setup::homework_setup(conn).map_err(db_query)?;
    let tt = setup::timetable_setup(conn).map_err(db_query)?;

    let owner = visible_owner(session);
    let tasks: Vec<TaskStat> = store::load_tasks(conn, owner)
        .map_err(db_query)?
        .iter()
        .map(|t| t.stat())
        .collect();
    let homework: Vec<HomeworkStat> = store::load_homework_list(conn, owner)
        .map_err(db_query)?
        .iter()
        .map(|h| h.stat())
        .collect();
    let cells: Vec<Option<String>> = store::load_timetable_week(conn, &info.week_key)
        .map_err(db_query)?
        .into_iter()
        .filter(|c| c.weekday < tt.days && c.slot < tt.slots_per_day)
        .map(|c| c.subject_name)
        .collect();
    let ratings = subject_ratings(conn).map_err(db_query)?;

    Ok(json!({
        "week": info,
        "tasks": summarize_tasks(&tasks),
        "homework": summarize_homework(&homework, start, state.today(), hw_setup.overdue_includes_submitted),
        "studyTime": summarize_study_time(&cells, tt.lesson_minutes),
        "ratings": summarize_ratings(&ratings),
        "completedTasksWeek": completed_tasks_in_week(&tasks, start),
        "approvedHomeworkWeek": approved_homework_in_week(&homework, start),
    }))
}

fn stats_daily(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let date = optional_date(params, "date")?
        .as_deref()
        .and_then(parse_date)
        .unwrap_or_else(|| state.today());
    let day = date.to_string();

    let owner = visible_owner(session);
    let homework: Vec<_> = store::load_homework_list(conn, owner)
        .map_err(db_query)?
        .into_iter()
        .filter(|h| h.due_date.as_deref() == Some(day.as_str()))
        .map(|h| h.status)
        .collect();
    let tasks: Vec<_> = store::load_tasks(conn, owner)
        .map_err(db_query)?
        .into_iter()
        .filter(|t| t.due_date.as_deref() == Some(day.as_str()))
        .map(|t| t.status)
        .collect();
    let updates: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM theme_updates WHERE calendar_date = ?",
            [&day],
            |r| r.get(0),
        )
        .map_err(db_query)?;

    Ok(json!(daily_achievement(date, &homework, &tasks, updates.max(0) as usize)))
}

const MAX_HISTORY_WEEKS: u64 = 52;

fn theme_updates_by_day(conn: &Connection, from: NaiveDate) -> rusqlite::Result<BTreeMap<NaiveDate, usize>> {
    let mut stmt = conn.prepare(
        "SELECT calendar_date, COUNT(*) FROM theme_updates WHERE calendar_date >= ? GROUP BY calendar_date",
    )?;
    let rows = stmt.query_map([from.to_string()], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
    })?;
    let mut out = BTreeMap::new();
    for row in rows {
        let (day, n) = row?;
        if let Some(day) = parse_date(&day) {
            out.insert(day, n.max(0) as usize);
        }
    }
    Ok(out)
}

/// Recent weeks, newest first, ending with the current one.
fn stats_weeks(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let limit = match params.get("limit") {
        None | Some(Value::Null) => 4,
        Some(v) => match v.as_u64() {
            Some(n) if (1..=MAX_HISTORY_WEEKS).contains(&n) => n,
            _ => {
                return Err(HandlerErr::bad_params(format!(
                    "limit must be between 1 and {}",
                    MAX_HISTORY_WEEKS
                )))
            }
        },
    };
    let today = state.today();
    let current = week_start(today);
    let oldest = current - Duration::weeks(limit as i64 - 1);

    let owner = visible_owner(session);
    let tasks: Vec<TaskStat> = store::load_tasks(conn, owner)
        .map_err(db_query)?
        .iter()
        .map(|t| t.stat())
        .collect();
    let homework: Vec<HomeworkStat> = store::load_homework_list(conn, owner)
        .map_err(db_query)?
        .iter()
        .map(|h| h.stat())
        .collect();
    let updates = theme_updates_by_day(conn, oldest).map_err(db_query)?;

    let weeks: Vec<Value> = (0..limit as i64)
        .map(|i| {
            let start = current - Duration::weeks(i);
            let mut entry = json!(week_achievement(start, today, &tasks, &homework, &updates));
            entry["week"] = json!(WeekInfo::for_date(start));
            entry
        })
        .collect();
    Ok(json!({ "weeks": weeks }))
}

fn stats_today(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let today = state.today();
    let day = today.to_string();
    let hw_setup = setup::homework_setup(conn).map_err(db_query)?;

    let owner = visible_owner(session);
    let mut homework = store::load_homework_list(conn, owner).map_err(db_query)?;
    homework.retain(|h| h.due_date.as_deref() == Some(day.as_str()) && !h.status.is_done());
    store::sort_homework(&mut homework);
    let mut tasks = store::load_tasks(conn, owner).map_err(db_query)?;
    tasks.retain(|t| t.due_date.as_deref() == Some(day.as_str()) && !t.completed());
    store::sort_tasks(&mut tasks);

    Ok(json!({
        "date": day,
        "homework": homework
            .iter()
            .map(|h| h.to_json(session.role, today, hw_setup.overdue_includes_submitted))
            .collect::<Vec<_>>(),
        "tasks": tasks.iter().map(|t| t.to_json()).collect::<Vec<_>>(),
    }))
}

/// Age of the last snapshot in hours, and whether the file was unreadable.
fn snapshot_status(state: &AppState) -> (Option<i64>, bool) {
    let Some(ws) = state.workspace.as_ref() else {
        return (None, false);
    };
    let meta = match cache::read_meta(ws) {
        Ok(Some(m)) => m,
        Ok(None) => return (None, false),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "snapshot unreadable");
            return (None, true);
        }
    };
    let age = DateTime::parse_from_rfc3339(&meta.saved_at)
        .ok()
        .map(|saved| (state.now() - saved.with_timezone(&Utc)).num_hours());
    (age, false)
}

fn diagnostics_run(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let sync = setup::sync_setup(conn).map_err(db_query)?;
    let (snapshot_age_hours, snapshot_unreadable) = snapshot_status(state);
    let input = DiagnosticsInput {
        has_session: state.session.is_some(),
        subject_count: count(conn, "SELECT COUNT(*) FROM subjects").map_err(db_query)?,
        homework_count: count(conn, "SELECT COUNT(*) FROM homework").map_err(db_query)?,
        task_count: count(conn, "SELECT COUNT(*) FROM tasks").map_err(db_query)?,
        timetable_count: count(conn, "SELECT COUNT(*) FROM timetable_entries").map_err(db_query)?,
        orphan_homework: count(
            conn,
            "SELECT COUNT(*) FROM homework
             WHERE subject_id IS NOT NULL AND subject_id NOT IN (SELECT id FROM subjects)",
        )
        .map_err(db_query)?,
        unknown_timetable_subjects: count(
            conn,
            "SELECT COUNT(*) FROM timetable_entries WHERE subject_id NOT IN (SELECT id FROM subjects)",
        )
        .map_err(db_query)?,
        snapshot_age_hours,
        snapshot_unreadable,
        stale_after_hours: sync.stale_after_hours,
    };
    Ok(json!({ "diagnostics": run_diagnostics(&input) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "stats.weekly" => stats_weekly(state, &req.params),
        "stats.daily" => stats_daily(state, &req.params),
        "stats.today" => stats_today(state),
        "stats.weeks" => stats_weeks(state, &req.params),
        "diagnostics.run" => diagnostics_run(state),
        _ => return None,
    };
    Some(respond(req, result))
}
