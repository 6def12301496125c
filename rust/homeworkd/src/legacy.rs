use crate::rating::{clamp_rating, percent_to_rating, DEFAULT_RATING};
use crate::workflow::{HomeworkStatus, TaskStatus};
use anyhow::{anyhow, Context};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct LegacyData {
    pub subjects: Vec<LegacySubject>,
    pub homework: Vec<LegacyHomework>,
    pub tasks: Vec<LegacyTask>,
    pub timetable: Vec<LegacyCell>,
}

#[derive(Debug, Clone)]
pub struct LegacySubject {
    pub name: String,
    pub color: Option<String>,
    pub themes: Vec<LegacyTheme>,
}

#[derive(Debug, Clone)]
pub struct LegacyTheme {
    pub title: String,
    pub description: String,
    pub rating: i64,
}

#[derive(Debug, Clone)]
pub struct LegacyHomework {
    pub local_id: Option<String>,
    pub subject: Option<String>,
    pub title: String,
    pub notes: String,
    pub due_date: Option<String>,
    pub status: HomeworkStatus,
    pub photos: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LegacyTask {
    pub local_id: Option<String>,
    pub title: String,
    pub tag: String,
    pub priority: String,
    pub due_date: Option<String>,
    pub status: TaskStatus,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub struct LegacyCell {
    /// 0 = Monday.
    pub weekday: u32,
    /// 0-based.
    pub slot: u32,
    pub subject: String,
    pub room: String,
    pub teacher: String,
    pub is_double: bool,
}

pub fn read_legacy_cache(path: &Path) -> anyhow::Result<LegacyData> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    parse_legacy_cache(&text)
}

pub fn parse_legacy_cache(text: &str) -> anyhow::Result<LegacyData> {
    let root: Value = serde_json::from_str(text.trim_start_matches('\u{feff}'))
        .context("legacy cache is not valid JSON")?;
    // Exports are either the bare data object or wrapped under its storage key.
    let data = root.get("schoolSystemData").unwrap_or(&root);
    if !data.is_object() {
        return Err(anyhow!("legacy cache must be a JSON object"));
    }

    Ok(LegacyData {
        subjects: array(data, "subjects").iter().filter_map(parse_subject).collect(),
        homework: array(data, "homework").iter().filter_map(parse_homework).collect(),
        tasks: parse_tasks(data),
        timetable: parse_timetable(data.get("timetable")),
    })
}

fn array<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    v.get(key)
        .and_then(|x| x.as_array())
        .map(|a| a.as_slice())
        .unwrap_or(&[])
}

fn text_of(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| v.get(*k))
        .filter_map(|x| match x {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .find(|s| !s.is_empty())
}

fn bool_of(v: &Value, key: &str) -> bool {
    match v.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        Some(Value::String(s)) => matches!(s.trim(), "true" | "1"),
        _ => false,
    }
}

fn theme_rating(t: &Value) -> i64 {
    if let Some(n) = t.get("rating").and_then(|v| v.as_f64()) {
        return clamp_rating(n);
    }
    if let Some(p) = t.get("progress").and_then(|v| v.as_f64()) {
        return percent_to_rating(p);
    }
    if let Some(n) = t.get("self_assessment").and_then(|v| v.as_f64()) {
        return clamp_rating(n);
    }
    DEFAULT_RATING
}

fn parse_subject(v: &Value) -> Option<LegacySubject> {
    let name = match v {
        Value::String(s) => s.trim().to_string(),
        _ => text_of(v, &["name", "title"])?,
    };
    if name.is_empty() {
        return None;
    }
    let themes = array(v, "themes")
        .iter()
        .filter_map(|t| {
            let title = text_of(t, &["name", "title"])?;
            Some(LegacyTheme {
                title,
                description: text_of(t, &["description"]).unwrap_or_default(),
                rating: theme_rating(t),
            })
        })
        .collect();
    Some(LegacySubject {
        name,
        color: text_of(v, &["color"]),
        themes,
    })
}

fn photo_path(p: &Value) -> Option<String> {
    match p {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(_) => text_of(p, &["storagePath", "storage_path", "path", "url"]),
        _ => None,
    }
}

fn parse_homework(v: &Value) -> Option<LegacyHomework> {
    let title = text_of(v, &["title", "text", "task"])?;
    let status = match v.get("status").and_then(|s| s.as_str()).and_then(HomeworkStatus::parse) {
        Some(s) => s,
        None if bool_of(v, "completed") => HomeworkStatus::Approved,
        None => HomeworkStatus::Pending,
    };
    let mut seen = HashSet::new();
    let photos = array(v, "photos")
        .iter()
        .filter_map(photo_path)
        .filter(|p| seen.insert(p.clone()))
        .collect();
    Some(LegacyHomework {
        local_id: text_of(v, &["id", "localId"]),
        subject: text_of(v, &["subject"]),
        title,
        notes: text_of(v, &["notes", "description"]).unwrap_or_default(),
        due_date: text_of(v, &["dueDate", "due"]),
        status,
        photos,
    })
}

fn parse_task(v: &Value) -> Option<LegacyTask> {
    let title = text_of(v, &["text", "title"])?;
    let status = match v.get("status").and_then(|s| s.as_str()).and_then(TaskStatus::parse) {
        Some(s) => s,
        None if bool_of(v, "completed") => TaskStatus::Completed,
        None => TaskStatus::Pending,
    };
    Some(LegacyTask {
        local_id: text_of(v, &["id", "localId"]),
        title,
        tag: text_of(v, &["tag"]).unwrap_or_default(),
        priority: normalize_priority(text_of(v, &["priority"]).as_deref()).to_string(),
        due_date: text_of(v, &["dueDate", "due"]),
        status,
        required: bool_of(v, "adminTask") || bool_of(v, "required"),
    })
}

/// `allTasks` supersedes `todayTasks`; older exports only have the latter.
fn parse_tasks(data: &Value) -> Vec<LegacyTask> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for t in array(data, "allTasks").iter().chain(array(data, "todayTasks")) {
        let Some(task) = parse_task(t) else {
            continue;
        };
        let key = task
            .local_id
            .clone()
            .unwrap_or_else(|| format!("{}|{}", task.title, task.due_date.as_deref().unwrap_or("")));
        if seen.insert(key) {
            out.push(task);
        }
    }
    out
}

pub fn normalize_priority(raw: Option<&str>) -> &'static str {
    match raw.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
        Some("H") | Some("HIGH") => "H",
        Some("L") | Some("LOW") => "L",
        _ => "M",
    }
}

const WEEKDAY_NAMES: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

pub fn parse_weekday(raw: &str) -> Option<u32> {
    let t = raw.trim().to_ascii_lowercase();
    if let Ok(n) = t.parse::<u32>() {
        return (n < 7).then_some(n);
    }
    WEEKDAY_NAMES
        .iter()
        .position(|d| *d == t || (t.len() >= 3 && d.starts_with(t.as_str())))
        .map(|i| i as u32)
}

fn parse_timetable(v: Option<&Value>) -> Vec<LegacyCell> {
    let Some(obj) = v.and_then(|x| x.as_object()) else {
        return Vec::new();
    };
    let mut out: Vec<LegacyCell> = obj
        .iter()
        .filter_map(|(key, entry)| {
            let (day, slot) = key.rsplit_once('_')?;
            let weekday = parse_weekday(day)?;
            let slot: u32 = slot.trim().parse().ok()?;
            let subject = text_of(entry, &["subject"])?;
            Some(LegacyCell {
                weekday,
                slot,
                subject,
                room: text_of(entry, &["room"]).unwrap_or_default(),
                teacher: text_of(entry, &["teacher"]).unwrap_or_default(),
                is_double: bool_of(entry, "isDouble"),
            })
        })
        .collect();
    out.sort_by_key(|c| (c.weekday, c.slot));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "subjects": [
            { "name": "Math", "themes": [ { "name": "Fractions", "progress": 80 }, { "title": "Angles", "rating": 9 } ] },
            { "name": "  " },
            "Biology"
        ],
        "homework": [
            { "id": "h1", "subject": "Math", "title": "p. 42", "dueDate": "2025-11-04", "completed": true, "photos": ["a.jpg", "a.jpg", {"path": "b.jpg"}] },
            { "subject": "Biology", "text": "Cells", "status": "submitted" },
            { "subject": "Biology" }
        ],
        "todayTasks": [
            { "id": 7, "text": "Pack bag", "completed": true },
            { "id": 8, "text": "Read", "adminTask": true, "status": "awaiting_approval" }
        ],
        "allTasks": [
            { "id": 7, "text": "Pack bag", "completed": true, "priority": "high" },
            { "text": "Weird", "status": "archived" }
        ],
        "timetable": {
            "Monday_0": { "subject": "Math", "room": "101", "isDouble": true },
            "Monday_1": { "subject": "Math", "room": "101", "isDouble": true },
            "Friday_3": { "subject": "Biology" },
            "Funday_2": { "subject": "Nope" },
            "Tuesday_x": { "subject": "Nope" }
        }
    }"#;

    #[test]
    fn parses_subjects_and_theme_ratings() {
        let data = parse_legacy_cache(SAMPLE).expect("parse");
        let names: Vec<&str> = data.subjects.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Math", "Biology"]);
        assert_eq!(data.subjects[0].themes[0].rating, 4);
        assert_eq!(data.subjects[0].themes[1].rating, 5);
    }

    #[test]
    fn homework_status_falls_back_to_completed_flag() {
        let data = parse_legacy_cache(SAMPLE).expect("parse");
        assert_eq!(data.homework.len(), 2);
        assert_eq!(data.homework[0].status, HomeworkStatus::Approved);
        assert_eq!(data.homework[0].photos, vec!["a.jpg", "b.jpg"]);
        assert_eq!(data.homework[1].status, HomeworkStatus::Submitted);
        assert_eq!(data.homework[1].title, "Cells");
    }

    #[test]
    fn tasks_are_deduplicated_and_normalized() {
        let data = parse_legacy_cache(SAMPLE).expect("parse");
        let titles: Vec<&str> = data.tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Pack bag", "Weird", "Read"]);
        assert_eq!(data.tasks[0].status, TaskStatus::Completed);
        assert_eq!(data.tasks[0].priority, "H");
        assert_eq!(data.tasks[1].status, TaskStatus::Pending);
        assert!(data.tasks[2].required);
        assert_eq!(data.tasks[2].status, TaskStatus::AwaitingApproval);
    }

    #[test]
    fn timetable_keys_are_weekday_and_slot() {
        let data = parse_legacy_cache(SAMPLE).expect("parse");
        let cells: Vec<(u32, u32)> = data.timetable.iter().map(|c| (c.weekday, c.slot)).collect();
        assert_eq!(cells, vec![(0, 0), (0, 1), (4, 3)]);
        assert!(data.timetable[0].is_double);
        assert_eq!(data.timetable[2].room, "");
    }

    #[test]
    fn wrapped_exports_and_bad_input() {
        let wrapped = r#"{ "schoolSystemData": { "subjects": ["Art"] } }"#;
        assert_eq!(parse_legacy_cache(wrapped).expect("parse").subjects.len(), 1);
        assert!(parse_legacy_cache("[1,2]").is_err());
        assert!(parse_legacy_cache("not json").is_err());
    }

    #[test]
    fn weekday_names_and_numbers() {
        assert_eq!(parse_weekday("Monday"), Some(0));
        assert_eq!(parse_weekday("fri"), Some(4));
        assert_eq!(parse_weekday("6"), Some(6));
        assert_eq!(parse_weekday("7"), None);
        assert_eq!(parse_weekday("Wed"), Some(2));
    }
}
