use std::path::PathBuf;

use crate::workflow::Role;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The acting profile. Lives only in process memory.
#[derive(Debug, Clone)]
pub struct Session {
    pub profile_id: String,
    pub display_name: String,
    pub role: Role,
    pub elevated: bool,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: Option<Session>,
    pub today_override: Option<NaiveDate>,
}

impl AppState {
    pub fn new(today_override: Option<NaiveDate>) -> Self {
        Self {
            workspace: None,
            db: None,
            session: None,
            today_override,
        }
    }

    /// Calendar day in UTC, the zone every stored timestamp is written in.
    pub fn today(&self) -> NaiveDate {
        self.today_override
            .unwrap_or_else(|| self.now().date_naive())
    }

    /// Wall-clock time, moved onto the pinned day when one is configured so
    /// stored timestamps agree with `today()`.
    pub fn now(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.today_override {
            Some(day) => day.and_time(now.time()).and_utc(),
            None => now,
        }
    }

    pub fn now_iso(&self) -> String {
        self.now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}
