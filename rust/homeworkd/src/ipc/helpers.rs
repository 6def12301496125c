pub use crate::ipc::error::{
    db_delete, db_insert, db_query, db_update, respond, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Session};
use crate::workflow::{Role, WorkflowError};
use rusqlite::Connection;
use serde_json::Value;
use uuid::Uuid;

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_session(state: &AppState) -> Result<&Session, HandlerErr> {
    state
        .session
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_session", "open a session first"))
}

pub fn require_parent(state: &AppState) -> Result<&Session, HandlerErr> {
    let s = require_session(state)?;
    if s.role != Role::Parent {
        return Err(WorkflowError::Forbidden("parent role required".to_string()).into());
    }
    Ok(s)
}

/// Students see their own records; parents see everyone's.
pub fn visible_owner(session: &Session) -> Option<&str> {
    if session.role.is_privileged() {
        None
    } else {
        Some(session.profile_id.as_str())
    }
}

/// Trimmed and non-empty.
pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
}

pub fn optional_nonempty(params: &Value, key: &str) -> Option<String> {
    optional_str(params, key).filter(|s| !s.is_empty())
}

pub fn optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn required_u32(params: &Value, key: &str) -> Result<u32, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a non-negative integer", key)))
}

/// Accepts `YYYY-MM-DD`; empty or null means no date.
pub fn optional_date(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => crate::week::parse_date(s)
            .map(|d| Some(d.to_string()))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key))),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a date string", key))),
    }
}

pub fn patch_object(params: &Value) -> Result<&serde_json::Map<String, Value>, HandlerErr> {
    params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Monday of the week named by `weekKey`, `date` or `offset` (weeks from the
/// current one), in that order. Defaults to the current week.
pub fn week_from_params(state: &AppState, params: &Value) -> Result<chrono::NaiveDate, HandlerErr> {
    use crate::week;
    if let Some(raw) = optional_nonempty(params, "weekKey") {
        return week::parse_week_key(&raw)
            .ok_or_else(|| HandlerErr::bad_params("weekKey must look like YYYY-Www"));
    }
    for key in ["date", "weekStart"] {
        if let Some(raw) = optional_nonempty(params, key) {
            return week::parse_week_input(&raw)
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD or YYYY-Www", key)));
        }
    }
    let offset = match params.get("offset") {
        None | Some(Value::Null) => 0,
        Some(v) => v
            .as_i64()
            .filter(|n| n.abs() <= 520)
            .ok_or_else(|| HandlerErr::bad_params("offset must be an integer"))?,
    };
    Ok(week::week_start(state.today()) + chrono::Duration::weeks(offset))
}
