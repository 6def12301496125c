use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::session::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::setup::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::subjects::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::tasks::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::homework::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::timetable::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::stats::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::cache::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::import::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::backup::try_handle(state, req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(id = %req.id, method = %req.method, "request");
    let resp = dispatch(state, &req);
    if resp.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = resp
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|c| c.as_str())
            .unwrap_or("unknown");
        tracing::warn!(id = %req.id, method = %req.method, code, "request failed");
    }
    resp
}
