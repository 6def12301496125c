use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;

/// Weeks start on Monday.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// ISO year/week of the week's Monday, e.g. `2025-W45`.
pub fn week_key(date: NaiveDate) -> String {
    let iso = week_start(date).iso_week();
    format!("{}-W{:02}", iso.year(), iso.week())
}

/// Monday of a `YYYY-Www` key.
pub fn parse_week_key(raw: &str) -> Option<NaiveDate> {
    let upper = raw.trim().to_ascii_uppercase();
    let (year, week) = upper.split_once("-W")?;
    if year.len() != 4 || week.len() != 2 {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    let week: u32 = week.parse().ok()?;
    NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
}

/// Accepts a week key or a calendar date; returns the Monday of that week.
pub fn parse_week_input(raw: &str) -> Option<NaiveDate> {
    if let Some(d) = parse_week_key(raw) {
        return Some(d);
    }
    parse_date(raw).map(week_start)
}

/// `YYYY-MM-DD`, optionally followed by a time part.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let t = raw.trim();
    let head = t.get(..10).unwrap_or(t);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

pub fn week_label(start: NaiveDate) -> String {
    let start = week_start(start);
    let end = start + Duration::days(6);
    if start.year() == end.year() {
        format!("{} – {}", start.format("%d %b"), end.format("%d %b %Y"))
    } else {
        format!("{} – {}", start.format("%d %b %Y"), end.format("%d %b %Y"))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekInfo {
    pub week_key: String,
    pub start: String,
    pub end: String,
    pub label: String,
}

impl WeekInfo {
    pub fn for_date(date: NaiveDate) -> Self {
        let start = week_start(date);
        Self {
            week_key: week_key(start),
            start: start.to_string(),
            end: (start + Duration::days(6)).to_string(),
            label: week_label(start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    #[test]
    fn week_starts_on_monday() {
        assert_eq!(week_start(d(2025, 11, 5)), d(2025, 11, 3));
        assert_eq!(week_start(d(2025, 11, 3)), d(2025, 11, 3));
        assert_eq!(week_start(d(2025, 11, 9)), d(2025, 11, 3));
    }

    #[test]
    fn week_keys_follow_iso_years() {
        assert_eq!(week_key(d(2025, 11, 5)), "2025-W45");
        assert_eq!(week_key(d(2024, 12, 31)), "2025-W01");
        assert_eq!(week_key(d(2021, 1, 3)), "2020-W53");
    }

    #[test]
    fn parse_inputs() {
        assert_eq!(parse_week_key("2025-W45"), Some(d(2025, 11, 3)));
        assert_eq!(parse_week_key("2025-45"), None);
        assert_eq!(parse_week_key("2025-W60"), None);
        assert_eq!(parse_week_input("2025-11-07"), Some(d(2025, 11, 3)));
        assert_eq!(parse_week_input("2025-11-07T10:00:00Z"), Some(d(2025, 11, 3)));
        assert_eq!(parse_week_input("next week"), None);
    }

    #[test]
    fn labels() {
        assert_eq!(week_label(d(2025, 11, 5)), "03 Nov – 09 Nov 2025");
        assert_eq!(week_label(d(2025, 12, 31)), "29 Dec 2025 – 04 Jan 2026");
    }

    #[test]
    fn key_roundtrip_through_monday() {
        let info = WeekInfo::for_date(d(2024, 12, 31));
        assert_eq!(info.week_key, "2025-W01");
        assert_eq!(info.start, "2024-12-30");
        assert_eq!(info.end, "2025-01-05");
        assert_eq!(parse_week_key(&info.week_key), parse_date(&info.start));
    }
}
