use crate::db;
use crate::ipc::helpers::{
    db_conn, db_query, db_update, patch_object, require_parent, respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Timetable,
    Homework,
    Tasks,
    Sync,
}

const ALL_SECTIONS: [SetupSection; 4] = [
    SetupSection::Timetable,
    SetupSection::Homework,
    SetupSection::Tasks,
    SetupSection::Sync,
];

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "timetable" => Some(Self::Timetable),
            "homework" => Some(Self::Homework),
            "tasks" => Some(Self::Tasks),
            "sync" => Some(Self::Sync),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Timetable => "timetable",
            Self::Homework => "homework",
            Self::Tasks => "tasks",
            Self::Sync => "sync",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Timetable => "setup.timetable",
            Self::Homework => "setup.homework",
            Self::Tasks => "setup.tasks",
            Self::Sync => "setup.sync",
        }
    }
}

const DEFAULT_SLOT_TIMES: [&str; 9] = [
    "08:00-08:40",
    "08:45-09:30",
    "09:50-10:35",
    "10:35-11:20",
    "11:40-12:25",
    "12:25-13:10",
    "13:10-14:00",
    "14:00-14:45",
    "14:45-15:30",
];

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Timetable => json!({
            "days": 5,
            "slotsPerDay": 9,
            "lessonMinutes": 45,
            "slotTimes": DEFAULT_SLOT_TIMES
        }),
        SetupSection::Homework => json!({
            "maxPhotos": 10,
            "overdueIncludesSubmitted": true
        }),
        SetupSection::Tasks => json!({
            "defaultPriority": "M",
            "defaultDueToday": true
        }),
        SetupSection::Sync => json!({
            "staleAfterHours": 72
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v.as_i64().ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn is_clock(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 5
        && b[2] == b':'
        && b[..2].iter().chain(&b[3..]).all(|c| c.is_ascii_digit())
        && s[..2].parse::<u32>().map(|h| h < 24).unwrap_or(false)
        && s[3..].parse::<u32>().map(|m| m < 60).unwrap_or(false)
}

fn parse_slot_times(v: &Value, key: &str) -> Result<Vec<String>, String> {
    let arr = v.as_array().ok_or_else(|| format!("{} must be an array", key))?;
    if arr.is_empty() || arr.len() > 12 {
        return Err(format!("{} must have 1..=12 entries", key));
    }
    arr.iter()
        .map(|item| {
            let s = parse_string_max(item, key, 11)?;
            match s.split_once('-') {
                Some((a, b)) if is_clock(a) && is_clock(b) && a < b => Ok(s),
                _ => Err(format!("{} entries must look like HH:MM-HH:MM", key)),
            }
        })
        .collect()
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Timetable => match k.as_str() {
                "days" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 7)?));
                }
                "slotsPerDay" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 12)?));
                }
                "lessonMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 5, 240)?));
                }
                "slotTimes" => {
                    obj.insert(k.clone(), json!(parse_slot_times(v, k)?));
                }
                _ => return Err(format!("unknown timetable field: {}", k)),
            },
            SetupSection::Homework => match k.as_str() {
                "maxPhotos" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 50)?));
                }
                "overdueIncludesSubmitted" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown homework field: {}", k)),
            },
            SetupSection::Tasks => match k.as_str() {
                "defaultPriority" => {
                    let s = parse_string_max(v, k, 1)?.to_ascii_uppercase();
                    if s != "H" && s != "M" && s != "L" {
                        return Err("defaultPriority must be one of: H, M, L".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "defaultDueToday" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown tasks field: {}", k)),
            },
            SetupSection::Sync => match k.as_str() {
                "staleAfterHours" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 720)?));
                }
                _ => return Err(format!("unknown sync field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block the app.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), error = %e, "ignoring invalid stored setup");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

// Typed views used by the other handler families.

pub struct TimetableSetup {
    pub days: u32,
    pub slots_per_day: u32,
    pub lesson_minutes: i64,
    pub slot_times: Vec<String>,
}

pub struct HomeworkSetup {
    pub max_photos: usize,
    pub overdue_includes_submitted: bool,
}

pub struct TasksSetup {
    pub default_priority: String,
    pub default_due_today: bool,
}

pub struct SyncSetup {
    pub stale_after_hours: i64,
}

fn int_of(v: &Value, key: &str, default: i64) -> i64 {
    v.get(key).and_then(|x| x.as_i64()).unwrap_or(default)
}

fn bool_of(v: &Value, key: &str, default: bool) -> bool {
    v.get(key).and_then(|x| x.as_bool()).unwrap_or(default)
}

pub fn timetable_setup(conn: &Connection) -> anyhow::Result<TimetableSetup> {
    let v = load_section(conn, SetupSection::Timetable)?;
    Ok(TimetableSetup {
        days: int_of(&v, "days", 5) as u32,
        slots_per_day: int_of(&v, "slotsPerDay", 9) as u32,
        lesson_minutes: int_of(&v, "lessonMinutes", 45),
        slot_times: v
            .get("slotTimes")
            .and_then(|x| x.as_array())
            .map(|a| a.iter().filter_map(|s| s.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
    })
}

pub fn homework_setup(conn: &Connection) -> anyhow::Result<HomeworkSetup> {
    let v = load_section(conn, SetupSection::Homework)?;
    Ok(HomeworkSetup {
        max_photos: int_of(&v, "maxPhotos", 10) as usize,
        overdue_includes_submitted: bool_of(&v, "overdueIncludesSubmitted", true),
    })
}

pub fn tasks_setup(conn: &Connection) -> anyhow::Result<TasksSetup> {
    let v = load_section(conn, SetupSection::Tasks)?;
    Ok(TasksSetup {
        default_priority: v
            .get("defaultPriority")
            .and_then(|x| x.as_str())
            .unwrap_or("M")
            .to_string(),
        default_due_today: bool_of(&v, "defaultDueToday", true),
    })
}

pub fn sync_setup(conn: &Connection) -> anyhow::Result<SyncSetup> {
    let v = load_section(conn, SetupSection::Sync)?;
    Ok(SyncSetup {
        stale_after_hours: int_of(&v, "staleAfterHours", 72),
    })
}

fn setup_get(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let mut out = Map::new();
    for section in ALL_SECTIONS {
        let v = load_section(conn, section).map_err(db_query)?;
        out.insert(section.name().to_string(), v);
    }
    Ok(Value::Object(out))
}

fn setup_update(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    require_parent(state)?;
    let Some(section_raw) = params.get("section").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::bad_params("missing section"));
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return Err(HandlerErr::bad_params("unknown section"));
    };
    let patch = patch_object(params)?;

    let mut current = load_section(conn, section).map_err(db_query)?;
    merge_section_patch(section, &mut current, patch).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, section.key(), &current).map_err(db_update)?;
    tracing::info!(section = section.name(), "setup updated");
    Ok(json!({ "ok": true, "section": section.name(), "value": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "setup.get" => setup_get(state),
        "setup.update" => setup_update(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
