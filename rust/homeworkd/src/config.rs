use chrono::NaiveDate;
use std::env;
use std::path::PathBuf;

/// Process-level settings read once at start-up. Workspace settings live in
/// the `settings` table instead.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub log_filter: Option<String>,
    pub log_json: bool,
    pub workspace: Option<PathBuf>,
    pub today: Option<NaiveDate>,
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            log_filter: env_nonempty("HOMEWORKD_LOG").or_else(|| env_nonempty("RUST_LOG")),
            log_json: env_bool("HOMEWORKD_LOG_JSON", false),
            workspace: env_nonempty("HOMEWORKD_WORKSPACE").map(PathBuf::from),
            today: env_nonempty("HOMEWORKD_TODAY")
                .and_then(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok()),
        }
    }
}
