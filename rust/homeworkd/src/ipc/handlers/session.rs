use crate::db;
use crate::ipc::helpers::{
    db_conn, db_insert, db_query, db_update, new_id, require_session, required_str, respond,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request, Session};
use crate::store;
use crate::workflow::{Role, WorkflowError};
use rusqlite::params;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

const PARENT_PASSWORD_KEY: &str = "security.parentPasswordSha256";

fn password_digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn session_json(s: &Session) -> Value {
    json!({
        "profileId": s.profile_id,
        "displayName": s.display_name,
        "role": s.role.as_str(),
        "elevated": s.elevated,
    })
}

fn profiles_list(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let profiles = store::load_profiles(conn).map_err(db_query)?;
    Ok(json!({
        "profiles": profiles.iter().map(|p| p.to_json()).collect::<Vec<_>>()
    }))
}

fn profiles_create(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let display_name = required_str(params, "displayName")?;
    let role_raw = required_str(params, "role")?;
    let Some(role) = Role::parse(&role_raw) else {
        return Err(HandlerErr::bad_params("role must be student or parent"));
    };

    let existing: i64 = conn
        .query_row("SELECT COUNT(*) FROM profiles", [], |r| r.get(0))
        .map_err(db_query)?;
    // The first profile bootstraps the household; after that only parents add people.
    if existing > 0 {
        let is_parent = state.session.as_ref().map(|s| s.role.is_privileged()).unwrap_or(false);
        if !is_parent {
            return Err(WorkflowError::Forbidden("only a parent can add profiles".to_string()).into());
        }
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO profiles(id, display_name, role, created_at) VALUES(?, ?, ?, ?)",
        params![id, display_name, role.as_str(), state.now_iso()],
    )
    .map_err(db_insert)?;
    tracing::info!(profile_id = %id, role = role.as_str(), "profile created");
    Ok(json!({ "profileId": id }))
}

fn session_open(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let profile_id = required_str(params, "profileId")?;
    let Some(profile) = store::load_profile(conn, &profile_id).map_err(db_query)? else {
        return Err(HandlerErr::not_found("profile"));
    };
    let session = Session {
        profile_id: profile.id,
        display_name: profile.display_name,
        role: profile.role,
        elevated: false,
    };
    let out = session_json(&session);
    tracing::info!(profile_id = %session.profile_id, role = session.role.as_str(), "session opened");
    state.session = Some(session);
    Ok(out)
}

fn session_get(state: &AppState) -> HandlerResult {
    Ok(json!({
        "session": state.session.as_ref().map(session_json)
    }))
}

fn session_close(state: &mut AppState) -> HandlerResult {
    if let Some(s) = state.session.take() {
        tracing::info!(profile_id = %s.profile_id, "session closed");
    }
    Ok(json!({ "ok": true }))
}

fn session_set_parent_password(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let password = required_str(params, "password")?;
    if password.chars().count() < 4 {
        return Err(WorkflowError::Validation("password must have at least 4 characters".to_string()).into());
    }
    let existing = db::settings_get_json(conn, PARENT_PASSWORD_KEY).map_err(db_query)?;
    if existing.is_some() && !session.role.is_privileged() {
        return Err(WorkflowError::Forbidden("only a parent can change the parent password".to_string()).into());
    }
    db::settings_set_json(conn, PARENT_PASSWORD_KEY, &json!(password_digest(&password)))
        .map_err(db_update)?;
    tracing::info!(profile_id = %session.profile_id, "parent password set");
    Ok(json!({ "ok": true }))
}

fn session_elevate(state: &mut AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    require_session(state)?;
    let password = required_str(params, "password")?;
    let stored = db::settings_get_json(conn, PARENT_PASSWORD_KEY).map_err(db_query)?;
    let matches = stored
        .as_ref()
        .and_then(|v| v.as_str())
        .map(|d| d == password_digest(&password))
        .unwrap_or(false);
    if !matches {
        tracing::warn!("parent password rejected");
        return Err(WorkflowError::Forbidden("wrong parent password".to_string()).into());
    }
    let Some(session) = state.session.as_mut() else {
        return Err(HandlerErr::new("no_session", "open a session first"));
    };
    session.role = Role::Parent;
    session.elevated = true;
    tracing::info!(profile_id = %session.profile_id, "session elevated to parent");
    Ok(session_json(session))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "profiles.list" => profiles_list(state),
        "profiles.create" => profiles_create(state, &req.params),
        "session.open" => session_open(state, &req.params),
        "session.get" => session_get(state),
        "session.close" => session_close(state),
        "session.setParentPassword" => session_set_parent_password(state, &req.params),
        "session.elevate" => session_elevate(state, &req.params),
        _ => return None,
    };
    Some(respond(req, result))
}
