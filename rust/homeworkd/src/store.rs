//! Row types and the SQL shared by several handler families.

use crate::rating::rating_to_percent;
use crate::stats::{homework_overdue, HomeworkStat, TaskStat};
use crate::week::parse_date;
use crate::workflow::{
    homework_locked, CommentChange, HomeworkChange, HomeworkStatus, Role, TaskStatus,
    TaskTransition,
};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

pub const DEFAULT_SUBJECT_COLOR: &str = "#667eea";

pub fn subject_key(name: &str) -> String {
    name.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProfileRow {
    pub id: String,
    pub display_name: String,
    pub role: Role,
}

impl ProfileRow {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "displayName": self.display_name,
            "role": self.role.as_str(),
        })
    }
}

pub fn load_profile(conn: &Connection, id: &str) -> rusqlite::Result<Option<ProfileRow>> {
    conn.query_row(
        "SELECT id, display_name, role FROM profiles WHERE id = ?",
        [id],
        |r| {
            let role: Option<String> = r.get(2)?;
            Ok(ProfileRow {
                id: r.get(0)?,
                display_name: r.get(1)?,
                role: Role::normalize(role.as_deref()),
            })
        },
    )
    .optional()
}

pub fn load_profiles(conn: &Connection) -> rusqlite::Result<Vec<ProfileRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, display_name, role FROM profiles ORDER BY created_at, display_name",
    )?;
    let rows = stmt.query_map([], |r| {
        let role: Option<String> = r.get(2)?;
        Ok(ProfileRow {
            id: r.get(0)?,
            display_name: r.get(1)?,
            role: Role::normalize(role.as_deref()),
        })
    })?;
    rows.collect()
}

// ---------------------------------------------------------------------------
// Subjects & themes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SubjectRow {
    pub id: String,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone)]
pub struct ThemeRow {
    pub id: String,
    pub subject_id: String,
    pub title: String,
    pub description: String,
    pub rating: i64,
    pub updated_at: String,
}

impl ThemeRow {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "subjectId": self.subject_id,
            "title": self.title,
            "description": self.description,
            "rating": self.rating,
            "ratingPercent": rating_to_percent(self.rating),
            "updatedAt": self.updated_at,
        })
    }
}

fn subject_from_row(r: &Row<'_>) -> rusqlite::Result<SubjectRow> {
    Ok(SubjectRow {
        id: r.get(0)?,
        name: r.get(1)?,
        color: r.get(2)?,
    })
}

fn theme_from_row(r: &Row<'_>) -> rusqlite::Result<ThemeRow> {
    Ok(ThemeRow {
        id: r.get(0)?,
        subject_id: r.get(1)?,
        title: r.get(2)?,
        description: r.get(3)?,
        rating: r.get(4)?,
        updated_at: r.get(5)?,
    })
}

pub fn load_subjects(conn: &Connection) -> rusqlite::Result<Vec<SubjectRow>> {
    let mut stmt =
        conn.prepare("SELECT id, name, color FROM subjects ORDER BY name COLLATE NOCASE")?;
    let rows = stmt.query_map([], subject_from_row)?;
    rows.collect()
}

pub fn load_subject(conn: &Connection, id: &str) -> rusqlite::Result<Option<SubjectRow>> {
    conn.query_row(
        "SELECT id, name, color FROM subjects WHERE id = ?",
        [id],
        subject_from_row,
    )
    .optional()
}

pub fn find_subject_by_name(conn: &Connection, name: &str) -> rusqlite::Result<Option<SubjectRow>> {
    conn.query_row(
        "SELECT id, name, color FROM subjects WHERE name_key = ?",
        [subject_key(name)],
        subject_from_row,
    )
    .optional()
}

pub fn insert_subject(
    conn: &Connection,
    name: &str,
    color: &str,
    now: &str,
) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, name_key, color, created_at) VALUES(?, ?, ?, ?, ?)",
        params![id, name.trim(), subject_key(name), color, now],
    )?;
    Ok(id)
}

/// Find by case-insensitive name or create. Returns `(id, created)`.
pub fn resolve_subject(conn: &Connection, name: &str, now: &str) -> rusqlite::Result<(String, bool)> {
    if let Some(s) = find_subject_by_name(conn, name)? {
        return Ok((s.id, false));
    }
    Ok((insert_subject(conn, name, DEFAULT_SUBJECT_COLOR, now)?, true))
}

const THEME_COLS: &str = "id, subject_id, title, description, rating, updated_at";

pub fn load_themes(conn: &Connection) -> rusqlite::Result<Vec<ThemeRow>> {
    let sql = format!(
        "SELECT {} FROM themes ORDER BY subject_id, created_at, title",
        THEME_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], theme_from_row)?;
    rows.collect()
}

pub fn load_theme(conn: &Connection, id: &str) -> rusqlite::Result<Option<ThemeRow>> {
    let sql = format!("SELECT {} FROM themes WHERE id = ?", THEME_COLS);
    conn.query_row(&sql, [id], theme_from_row).optional()
}

pub fn insert_theme(
    conn: &Connection,
    subject_id: &str,
    title: &str,
    description: &str,
    rating: i64,
    now: &str,
) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO themes(id, subject_id, title, description, rating, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        params![id, subject_id, title, description, rating, now, now],
    )?;
    Ok(id)
}

/// Subjects in name order with their themes nested.
pub fn subjects_with_themes(conn: &Connection) -> rusqlite::Result<Vec<Value>> {
    let subjects = load_subjects(conn)?;
    let mut by_subject: HashMap<String, Vec<Value>> = HashMap::new();
    for t in load_themes(conn)? {
        by_subject
            .entry(t.subject_id.clone())
            .or_default()
            .push(t.to_json());
    }
    Ok(subjects
        .into_iter()
        .map(|s| {
            let themes = by_subject.remove(&s.id).unwrap_or_default();
            json!({
                "id": s.id,
                "name": s.name,
                "color": s.color,
                "themes": themes,
            })
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: String,
    pub local_id: Option<String>,
    pub owner_id: String,
    pub title: String,
    pub description: String,
    pub tag: String,
    pub priority: String,
    pub due_date: Option<String>,
    pub required: bool,
    pub assigned_by: Option<String>,
    pub status: TaskStatus,
    pub approved_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

const TASK_COLS: &str = "id, local_id, owner_id, title, description, tag, priority, due_date, \
     required, assigned_by, status, approved_at, created_at, updated_at";

fn task_from_row(r: &Row<'_>) -> rusqlite::Result<TaskRow> {
    let status: Option<String> = r.get(10)?;
    Ok(TaskRow {
        id: r.get(0)?,
        local_id: r.get(1)?,
        owner_id: r.get(2)?,
        title: r.get(3)?,
        description: r.get(4)?,
        tag: r.get(5)?,
        priority: r.get(6)?,
        due_date: r.get(7)?,
        required: r.get::<_, i64>(8)? != 0,
        assigned_by: r.get(9)?,
        status: TaskStatus::normalize(status.as_deref()),
        approved_at: r.get(11)?,
        created_at: r.get(12)?,
        updated_at: r.get(13)?,
    })
}

impl TaskRow {
    pub fn completed(&self) -> bool {
        self.status.is_done()
    }

    pub fn priority_rank(&self) -> u8 {
        match self.priority.as_str() {
            "H" => 0,
            "M" => 1,
            _ => 2,
        }
    }

    pub fn stat(&self) -> TaskStat {
        TaskStat {
            status: self.status,
            due_date: self.due_date.as_deref().and_then(parse_date),
            updated_on: parse_date(&self.updated_at),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "localId": self.local_id,
            "ownerId": self.owner_id,
            "title": self.title,
            "description": self.description,
            "tag": self.tag,
            "priority": self.priority,
            "dueDate": self.due_date,
            "required": self.required,
            "assignedBy": self.assigned_by,
            "status": self.status.as_str(),
            "completed": self.completed(),
            "approvedAt": self.approved_at,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

pub fn load_task(conn: &Connection, id: &str) -> rusqlite::Result<Option<TaskRow>> {
    let sql = format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLS);
    conn.query_row(&sql, [id], task_from_row).optional()
}

/// `owner = None` loads every profile's tasks.
pub fn load_tasks(conn: &Connection, owner: Option<&str>) -> rusqlite::Result<Vec<TaskRow>> {
    match owner {
        Some(o) => {
            let sql = format!("SELECT {} FROM tasks WHERE owner_id = ?", TASK_COLS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([o], task_from_row)?;
            rows.collect()
        }
        None => {
            let sql = format!("SELECT {} FROM tasks", TASK_COLS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], task_from_row)?;
            rows.collect()
        }
    }
}

pub fn find_task_by_local_id(
    conn: &Connection,
    owner: &str,
    local_id: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM tasks WHERE owner_id = ? AND local_id = ?",
        [owner, local_id],
        |r| r.get(0),
    )
    .optional()
}

/// Open tasks first, then priority H>M>L, due date (undated last), title.
pub fn sort_tasks(tasks: &mut [TaskRow]) {
    tasks.sort_by(|a, b| {
        a.completed()
            .cmp(&b.completed())
            .then(a.priority_rank().cmp(&b.priority_rank()))
            .then(cmp_due(a.due_date.as_deref(), b.due_date.as_deref()))
            .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
    });
}

fn cmp_due(a: Option<&str>, b: Option<&str>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub struct NewTask<'a> {
    pub local_id: Option<&'a str>,
    pub owner_id: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub tag: &'a str,
    pub priority: &'a str,
    pub due_date: Option<&'a str>,
    pub required: bool,
    pub assigned_by: Option<&'a str>,
    pub status: TaskStatus,
}

/// Upserts on `(owner_id, local_id)` when a local id is given.
pub fn upsert_task(conn: &Connection, t: &NewTask<'_>, now: &str) -> rusqlite::Result<String> {
    if let Some(local) = t.local_id {
        if let Some(id) = find_task_by_local_id(conn, t.owner_id, local)? {
            conn.execute(
                "UPDATE tasks SET title = ?, description = ?, tag = ?, priority = ?, due_date = ?,
                     updated_at = ?
                 WHERE id = ?",
                params![t.title, t.description, t.tag, t.priority, t.due_date, now, id],
            )?;
            return Ok(id);
        }
    }
    let id = Uuid::new_v4().to_string();
    let approved_at = (t.status == TaskStatus::Approved).then_some(now);
    conn.execute(
        "INSERT INTO tasks(id, local_id, owner_id, title, description, tag, priority, due_date,
             required, assigned_by, status, completed, approved_at, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            t.local_id,
            t.owner_id,
            t.title,
            t.description,
            t.tag,
            t.priority,
            t.due_date,
            t.required as i64,
            t.assigned_by,
            t.status.as_str(),
            t.status.is_done() as i64,
            approved_at,
            now,
            now
        ],
    )?;
    Ok(id)
}

pub fn write_task_transition(
    conn: &Connection,
    id: &str,
    t: &TaskTransition,
    now: &str,
) -> rusqlite::Result<()> {
    let approved_at = t.sets_approval().then_some(now);
    conn.execute(
        "UPDATE tasks SET status = ?, completed = ?, approved_at = ?, updated_at = ? WHERE id = ?",
        params![t.to.as_str(), t.completed() as i64, approved_at, now, id],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Homework
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HomeworkRow {
    pub id: String,
    pub local_id: Option<String>,
    pub owner_id: String,
    pub subject_id: Option<String>,
    pub subject_name: Option<String>,
    pub title: String,
    pub notes: String,
    pub due_date: Option<String>,
    pub status: HomeworkStatus,
    pub comment: Option<String>,
    pub submitted_at: Option<String>,
    pub approved_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub photos: Vec<String>,
}

const HOMEWORK_SELECT: &str = "SELECT h.id, h.local_id, h.owner_id, h.subject_id, s.name, h.title,
        h.notes, h.due_date, h.status, h.comment, h.submitted_at, h.approved_at, h.created_at,
        h.updated_at
     FROM homework h
     LEFT JOIN subjects s ON s.id = h.subject_id";

fn homework_from_row(r: &Row<'_>) -> rusqlite::Result<HomeworkRow> {
    let status: Option<String> = r.get(8)?;
    Ok(HomeworkRow {
        id: r.get(0)?,
        local_id: r.get(1)?,
        owner_id: r.get(2)?,
        subject_id: r.get(3)?,
        subject_name: r.get(4)?,
        title: r.get(5)?,
        notes: r.get(6)?,
        due_date: r.get(7)?,
        status: HomeworkStatus::normalize(status.as_deref()),
        comment: r.get(9)?,
        submitted_at: r.get(10)?,
        approved_at: r.get(11)?,
        created_at: r.get(12)?,
        updated_at: r.get(13)?,
        photos: Vec::new(),
    })
}

impl HomeworkRow {
    pub fn due(&self) -> Option<NaiveDate> {
        self.due_date.as_deref().and_then(parse_date)
    }

    pub fn stat(&self) -> HomeworkStat {
        HomeworkStat {
            status: self.status,
            due_date: self.due(),
            approved_on: self.approved_at.as_deref().and_then(parse_date),
        }
    }

    pub fn to_json(&self, role: Role, today: NaiveDate, overdue_includes_submitted: bool) -> Value {
        json!({
            "id": self.id,
            "localId": self.local_id,
            "ownerId": self.owner_id,
            "subjectId": self.subject_id,
            "subjectName": self.subject_name,
            "title": self.title,
            "notes": self.notes,
            "dueDate": self.due_date,
            "status": self.status.as_str(),
            "completed": self.status.is_done(),
            "photos": self.photos,
            "comment": self.comment,
            "submittedAt": self.submitted_at,
            "approvedAt": self.approved_at,
            "overdue": homework_overdue(self.status, self.due(), today, overdue_includes_submitted),
            "locked": homework_locked(role, self.status),
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

pub fn homework_photos(conn: &Connection, homework_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT storage_path FROM homework_photos WHERE homework_id = ? ORDER BY sort_order, created_at",
    )?;
    let rows = stmt.query_map([homework_id], |r| r.get(0))?;
    rows.collect()
}

pub fn load_homework(conn: &Connection, id: &str) -> rusqlite::Result<Option<HomeworkRow>> {
    let sql = format!("{} WHERE h.id = ?", HOMEWORK_SELECT);
    let Some(mut row) = conn.query_row(&sql, [id], homework_from_row).optional()? else {
        return Ok(None);
    };
    row.photos = homework_photos(conn, &row.id)?;
    Ok(Some(row))
}

pub fn load_homework_list(conn: &Connection, owner: Option<&str>) -> rusqlite::Result<Vec<HomeworkRow>> {
    let mut rows: Vec<HomeworkRow> = match owner {
        Some(o) => {
            let sql = format!("{} WHERE h.owner_id = ?", HOMEWORK_SELECT);
            let mut stmt = conn.prepare(&sql)?;
            let it = stmt.query_map([o], homework_from_row)?;
            it.collect::<Result<_, _>>()?
        }
        None => {
            let mut stmt = conn.prepare(HOMEWORK_SELECT)?;
            let it = stmt.query_map([], homework_from_row)?;
            it.collect::<Result<_, _>>()?
        }
    };
    for r in rows.iter_mut() {
        r.photos = homework_photos(conn, &r.id)?;
    }
    Ok(rows)
}

/// Open first, then due date (undated last), then title.
pub fn sort_homework(items: &mut [HomeworkRow]) {
    items.sort_by(|a, b| {
        a.status
            .is_done()
            .cmp(&b.status.is_done())
            .then(cmp_due(a.due_date.as_deref(), b.due_date.as_deref()))
            .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
    });
}

pub fn find_homework_by_local_id(
    conn: &Connection,
    owner: &str,
    local_id: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT id FROM homework WHERE owner_id = ? AND local_id = ?",
        [owner, local_id],
        |r| r.get(0),
    )
    .optional()
}

pub struct NewHomework<'a> {
    pub local_id: Option<&'a str>,
    pub owner_id: &'a str,
    pub subject_id: Option<&'a str>,
    pub title: &'a str,
    pub notes: &'a str,
    pub due_date: Option<&'a str>,
    pub status: HomeworkStatus,
}

pub fn upsert_homework(conn: &Connection, h: &NewHomework<'_>, now: &str) -> rusqlite::Result<String> {
    if let Some(local) = h.local_id {
        if let Some(id) = find_homework_by_local_id(conn, h.owner_id, local)? {
            conn.execute(
                "UPDATE homework SET subject_id = ?, title = ?, notes = ?, due_date = ?, updated_at = ?
                 WHERE id = ?",
                params![h.subject_id, h.title, h.notes, h.due_date, now, id],
            )?;
            return Ok(id);
        }
    }
    let id = Uuid::new_v4().to_string();
    let submitted_at = (h.status == HomeworkStatus::Submitted).then_some(now);
    let approved_at = (h.status == HomeworkStatus::Approved).then_some(now);
    conn.execute(
        "INSERT INTO homework(id, local_id, owner_id, subject_id, title, notes, due_date, status,
             completed, comment, submitted_at, approved_at, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?, ?)",
        params![
            id,
            h.local_id,
            h.owner_id,
            h.subject_id,
            h.title,
            h.notes,
            h.due_date,
            h.status.as_str(),
            h.status.is_done() as i64,
            submitted_at,
            approved_at,
            now,
            now
        ],
    )?;
    Ok(id)
}

/// Returns false when the photo was already attached.
pub fn add_homework_photo(
    conn: &Connection,
    homework_id: &str,
    storage_path: &str,
    now: &str,
) -> rusqlite::Result<bool> {
    let next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM homework_photos WHERE homework_id = ?",
        [homework_id],
        |r| r.get(0),
    )?;
    let n = conn.execute(
        "INSERT OR IGNORE INTO homework_photos(id, homework_id, storage_path, sort_order, created_at)
         VALUES(?, ?, ?, ?, ?)",
        params![Uuid::new_v4().to_string(), homework_id, storage_path, next, now],
    )?;
    Ok(n > 0)
}

/// Attaches `photos` in order while the row holds fewer than `max`.
/// Returns how many were newly attached.
pub fn attach_photos_capped<'a>(
    conn: &Connection,
    homework_id: &str,
    photos: impl IntoIterator<Item = &'a str>,
    max: usize,
    now: &str,
) -> rusqlite::Result<usize> {
    let mut held: i64 = conn.query_row(
        "SELECT COUNT(*) FROM homework_photos WHERE homework_id = ?",
        [homework_id],
        |r| r.get(0),
    )?;
    let mut added = 0;
    for p in photos {
        if held as usize >= max {
            break;
        }
        if add_homework_photo(conn, homework_id, p, now)? {
            held += 1;
            added += 1;
        }
    }
    Ok(added)
}

/// Whether an incoming record keyed by `local_id` would overwrite homework
/// that `role` may not edit.
pub fn homework_local_id_locked(
    conn: &Connection,
    owner_id: &str,
    local_id: Option<&str>,
    role: Role,
) -> rusqlite::Result<bool> {
    let Some(local) = local_id else {
        return Ok(false);
    };
    let Some(id) = find_homework_by_local_id(conn, owner_id, local)? else {
        return Ok(false);
    };
    Ok(load_homework(conn, &id)?.is_some_and(|row| homework_locked(role, row.status)))
}

pub fn write_homework_change(
    conn: &Connection,
    row: &HomeworkRow,
    change: &HomeworkChange,
    now: &str,
) -> rusqlite::Result<()> {
    let submitted_at = change.submitted_at.apply(row.submitted_at.clone(), now);
    let approved_at = change.approved_at.apply(row.approved_at.clone(), now);
    let comment = match &change.comment {
        CommentChange::Keep => row.comment.clone(),
        CommentChange::Set(c) => Some(c.clone()),
        CommentChange::Clear => None,
    };
    conn.execute(
        "UPDATE homework SET status = ?, completed = ?, submitted_at = ?, approved_at = ?,
             comment = ?, updated_at = ?
         WHERE id = ?",
        params![
            change.to.as_str(),
            change.completed as i64,
            submitted_at,
            approved_at,
            comment,
            now,
            row.id
        ],
    )?;
    Ok(())
}

pub fn delete_homework(conn: &Connection, id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM homework_photos WHERE homework_id = ?", [id])?;
    conn.execute("DELETE FROM homework WHERE id = ?", [id])
}

// ---------------------------------------------------------------------------
// Timetable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimetableRow {
    pub week_key: String,
    pub weekday: u32,
    /// 0-based; stored 1-based.
    pub slot: u32,
    pub subject_id: String,
    pub subject_name: Option<String>,
    pub room: String,
    pub teacher: String,
    pub is_double: bool,
}

impl TimetableRow {
    pub fn to_json(&self) -> Value {
        json!({
            "weekday": self.weekday,
            "slot": self.slot,
            "subjectId": self.subject_id,
            "subjectName": self.subject_name,
            "room": self.room,
            "teacher": self.teacher,
            "isDouble": self.is_double,
            "source": if self.week_key.is_empty() { "standing" } else { "week" },
        })
    }
}

/// Standing cells overlaid with the week's own cells.
pub fn load_timetable_week(conn: &Connection, week_key: &str) -> rusqlite::Result<Vec<TimetableRow>> {
    let mut stmt = conn.prepare(
        "SELECT t.week_key, t.weekday, t.time_slot, t.subject_id, s.name, t.room, t.teacher, t.is_double
         FROM timetable_entries t
         LEFT JOIN subjects s ON s.id = t.subject_id
         WHERE t.week_key = '' OR t.week_key = ?
         ORDER BY t.weekday, t.time_slot, t.week_key",
    )?;
    let rows = stmt.query_map([week_key], |r| {
        let slot: i64 = r.get(2)?;
        Ok(TimetableRow {
            week_key: r.get(0)?,
            weekday: r.get::<_, i64>(1)?.max(0) as u32,
            slot: (slot - 1).max(0) as u32,
            subject_id: r.get(3)?,
            subject_name: r.get(4)?,
            room: r.get(5)?,
            teacher: r.get(6)?,
            is_double: r.get::<_, i64>(7)? != 0,
        })
    })?;
    let mut merged: Vec<TimetableRow> = Vec::new();
    for row in rows {
        let row = row?;
        // Ordered by week_key, so a week row follows the standing row it overrides.
        match merged.last_mut() {
            Some(prev) if prev.weekday == row.weekday && prev.slot == row.slot => *prev = row,
            _ => merged.push(row),
        }
    }
    Ok(merged)
}

pub fn cell_is_double(conn: &Connection, week_key: &str, weekday: u32, slot: u32) -> rusqlite::Result<Option<bool>> {
    conn.query_row(
        "SELECT is_double FROM timetable_entries WHERE week_key = ? AND weekday = ? AND time_slot = ?",
        params![week_key, weekday, slot + 1],
        |r| Ok(r.get::<_, i64>(0)? != 0),
    )
    .optional()
}

pub struct CellWrite<'a> {
    pub week_key: &'a str,
    pub weekday: u32,
    pub slot: u32,
    pub subject_id: &'a str,
    pub room: &'a str,
    pub teacher: &'a str,
    pub is_double: bool,
}

pub fn upsert_cell(conn: &Connection, c: &CellWrite<'_>, now: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO timetable_entries(week_key, weekday, time_slot, subject_id, room, teacher, is_double, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(week_key, weekday, time_slot) DO UPDATE SET
             subject_id = excluded.subject_id,
             room = excluded.room,
             teacher = excluded.teacher,
             is_double = excluded.is_double,
             updated_at = excluded.updated_at",
        params![
            c.week_key,
            c.weekday,
            c.slot + 1,
            c.subject_id,
            c.room,
            c.teacher,
            c.is_double as i64,
            now
        ],
    )?;
    Ok(())
}

pub fn delete_cell(conn: &Connection, week_key: &str, weekday: u32, slot: u32) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM timetable_entries WHERE week_key = ? AND weekday = ? AND time_slot = ?",
        params![week_key, weekday, slot + 1],
    )
}
