use crate::workflow::{HomeworkStatus, TaskStatus};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct TaskStat {
    pub status: TaskStatus,
    pub due_date: Option<NaiveDate>,
    pub updated_on: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct HomeworkStat {
    pub status: HomeworkStatus,
    pub due_date: Option<NaiveDate>,
    pub approved_on: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct SubjectRatings {
    pub name: String,
    pub ratings: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub total: usize,
    pub open: usize,
    pub awaiting_approval: usize,
    pub done: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeworkSummary {
    pub due_this_week: usize,
    pub overdue: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyTime {
    pub total_minutes: i64,
    pub by_subject: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingSummary {
    pub by_subject: BTreeMap<String, f64>,
    pub overall_average: Option<f64>,
}

pub fn summarize_tasks(tasks: &[TaskStat]) -> TaskSummary {
    let mut s = TaskSummary {
        total: tasks.len(),
        ..TaskSummary::default()
    };
    for t in tasks {
        match t.status {
            TaskStatus::Completed | TaskStatus::Approved => s.done += 1,
            TaskStatus::AwaitingApproval => s.awaiting_approval += 1,
            TaskStatus::Pending => s.open += 1,
        }
    }
    s
}

pub fn homework_overdue(
    status: HomeworkStatus,
    due_date: Option<NaiveDate>,
    today: NaiveDate,
    include_submitted: bool,
) -> bool {
    if status.is_done() {
        return false;
    }
    if status == HomeworkStatus::Submitted && !include_submitted {
        return false;
    }
    due_date.map(|d| d < today).unwrap_or(false)
}

/// `week_start..week_start+7` is half-open.
pub fn summarize_homework(
    items: &[HomeworkStat],
    week_start: NaiveDate,
    today: NaiveDate,
    include_submitted: bool,
) -> HomeworkSummary {
    let week_end = week_start + Duration::days(7);
    let mut s = HomeworkSummary::default();
    for h in items {
        if h.status.is_done() {
            s.completed += 1;
            continue;
        }
        let Some(due) = h.due_date else {
            continue;
        };
        if due >= week_start && due < week_end {
            s.due_this_week += 1;
        }
        if homework_overdue(h.status, Some(due), today, include_submitted) {
            s.overdue += 1;
        }
    }
    s
}

pub fn completed_tasks_in_week(tasks: &[TaskStat], week_start: NaiveDate) -> usize {
    let week_end = week_start + Duration::days(7);
    tasks
        .iter()
        .filter(|t| t.status.is_done())
        .filter(|t| matches!(t.updated_on, Some(d) if d >= week_start && d < week_end))
        .count()
}

pub fn approved_homework_in_week(items: &[HomeworkStat], week_start: NaiveDate) -> usize {
    let week_end = week_start + Duration::days(7);
    items
        .iter()
        .filter(|h| h.status.is_done())
        .filter(|h| matches!(h.approved_on, Some(d) if d >= week_start && d < week_end))
        .count()
}

/// One timetable cell is one lesson. Cells without a subject count as "Other".
pub fn summarize_study_time(cells: &[Option<String>], lesson_minutes: i64) -> StudyTime {
    let mut s = StudyTime::default();
    for c in cells {
        let name = c
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("Other");
        *s.by_subject.entry(name.to_string()).or_insert(0) += lesson_minutes;
        s.total_minutes += lesson_minutes;
    }
    s
}

pub fn summarize_ratings(subjects: &[SubjectRatings]) -> RatingSummary {
    let mut s = RatingSummary::default();
    let mut total = 0.0;
    let mut count = 0usize;
    for subj in subjects {
        if subj.ratings.is_empty() {
            continue;
        }
        let avg = subj.ratings.iter().sum::<i64>() as f64 / subj.ratings.len() as f64;
        s.by_subject.insert(subj.name.clone(), avg);
        total += avg;
        count += 1;
    }
    if count > 0 {
        s.overall_average = Some(total / count as f64);
    }
    s
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyAchievement {
    pub date: String,
    pub daily_achievement: bool,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub all_homework_approved: bool,
    pub all_tasks_completed: bool,
    pub theme_updated: bool,
    pub homework_count: usize,
    pub tasks_count: usize,
    pub theme_updates_count: usize,
}

pub fn is_school_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// A school day counts when everything due that day is signed off and at
/// least one theme was worked on.
pub fn daily_achievement(
    date: NaiveDate,
    homework_due: &[HomeworkStatus],
    tasks_due: &[TaskStatus],
    theme_updates: usize,
) -> DailyAchievement {
    let all_homework_approved = homework_due.iter().all(|s| s.is_done());
    let all_tasks_completed = tasks_due.iter().all(|s| s.is_done());
    let theme_updated = theme_updates > 0;
    let school_day = is_school_day(date);
    DailyAchievement {
        date: date.to_string(),
        daily_achievement: school_day && all_homework_approved && all_tasks_completed && theme_updated,
        skipped: !school_day,
        reason: if school_day { None } else { Some("weekend") },
        all_homework_approved,
        all_tasks_completed,
        theme_updated,
        homework_count: homework_due.len(),
        tasks_count: tasks_due.len(),
        theme_updates_count: theme_updates,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekAchievement {
    pub tasks_completed: usize,
    pub homework_approved: usize,
    pub theme_updates_count: usize,
    pub school_days: usize,
    pub achieved_days: usize,
}

/// Rolls one week up from the per-day rules of [`daily_achievement`].
/// Days after `today` are not judged yet.
pub fn week_achievement(
    week_start: NaiveDate,
    today: NaiveDate,
    tasks: &[TaskStat],
    homework: &[HomeworkStat],
    theme_updates: &BTreeMap<NaiveDate, usize>,
) -> WeekAchievement {
    let week_end = week_start + Duration::days(7);
    let mut w = WeekAchievement {
        tasks_completed: completed_tasks_in_week(tasks, week_start),
        homework_approved: approved_homework_in_week(homework, week_start),
        theme_updates_count: theme_updates.range(week_start..week_end).map(|(_, n)| n).sum(),
        ..WeekAchievement::default()
    };
    for day in week_start.iter_days().take(7) {
        if day > today || !is_school_day(day) {
            continue;
        }
        w.school_days += 1;
        let hw: Vec<HomeworkStatus> = homework
            .iter()
            .filter(|h| h.due_date == Some(day))
            .map(|h| h.status)
            .collect();
        let ts: Vec<TaskStatus> = tasks
            .iter()
            .filter(|t| t.due_date == Some(day))
            .map(|t| t.status)
            .collect();
        let updates = theme_updates.get(&day).copied().unwrap_or(0);
        if daily_achievement(day, &hw, &ts, updates).daily_achievement {
            w.achieved_days += 1;
        }
    }
    w
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Diagnostic {
    fn new(level: Level, message: impl Into<String>, hint: Option<&str>) -> Self {
        Self {
            level,
            message: message.into(),
            hint: hint.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticsInput {
    pub has_session: bool,
    pub subject_count: usize,
    pub homework_count: usize,
    pub task_count: usize,
    pub timetable_count: usize,
    pub orphan_homework: usize,
    pub unknown_timetable_subjects: usize,
    pub snapshot_age_hours: Option<i64>,
    pub snapshot_unreadable: bool,
    pub stale_after_hours: i64,
}

pub fn run_diagnostics(input: &DiagnosticsInput) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    if !input.has_session {
        out.push(Diagnostic::new(
            Level::Info,
            "No open session; changes are disabled.",
            Some("Open a session for a profile to enable editing."),
        ));
    }
    let any_data = input.subject_count
        + input.homework_count
        + input.task_count
        + input.timetable_count
        > 0;
    if !any_data {
        out.push(Diagnostic::new(
            Level::Info,
            "No data found yet.",
            Some("Create at least one task, homework item, timetable entry, or subject."),
        ));
    }
    if input.orphan_homework > 0 {
        out.push(Diagnostic::new(
            Level::Warning,
            format!(
                "Found {} homework item(s) linked to missing subjects.",
                input.orphan_homework
            ),
            Some("Reassign those homework items to an existing subject."),
        ));
    }
    if input.unknown_timetable_subjects > 0 {
        out.push(Diagnostic::new(
            Level::Warning,
            format!(
                "Found {} timetable entr(ies) with unknown subject.",
                input.unknown_timetable_subjects
            ),
            Some("Either create the subject or clear those timetable cells."),
        ));
    }
    if input.snapshot_unreadable {
        out.push(Diagnostic::new(
            Level::Error,
            "The cache snapshot could not be read.",
            Some("Take a new snapshot to replace it."),
        ));
    }
    if let Some(age) = input.snapshot_age_hours {
        if age > input.stale_after_hours {
            out.push(Diagnostic::new(
                Level::Info,
                format!("Last cache snapshot was {} hour(s) ago.", age),
                Some("Take a fresh snapshot so offline windows see current data."),
            ));
        }
    }
    if out.is_empty() {
        out.push(Diagnostic::new(Level::Success, "All basic checks passed.", None));
    }
    out
}
