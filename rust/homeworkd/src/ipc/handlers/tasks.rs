use super::setup;
use crate::ipc::helpers::{
    db_conn, db_delete, db_insert, db_query, db_update, optional_bool, optional_date,
    optional_nonempty, optional_str, patch_object, require_session, required_str, respond,
    visible_owner, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::legacy::normalize_priority;
use crate::store::{self, NewTask, TaskRow};
use crate::workflow::{
    approve_task, ensure_can_create_required, ensure_task_mutable, toggle_task, TaskFacts,
    TaskStatus,
};
use rusqlite::{params, Connection};
use serde_json::{json, Value};

fn load_task_or_404(conn: &Connection, id: &str) -> Result<TaskRow, HandlerErr> {
    store::load_task(conn, id)
        .map_err(db_query)?
        .ok_or_else(|| HandlerErr::not_found("task"))
}

#[derive(Default)]
struct TaskFilter {
    status: Option<String>,
    priority: Option<String>,
    tag: Option<String>,
    search: Option<String>,
    due_date: Option<String>,
    owner_id: Option<String>,
}

impl TaskFilter {
    fn from_params(params: &Value) -> Result<Self, HandlerErr> {
        let Some(f) = params.get("filter").filter(|v| !v.is_null()) else {
            return Ok(Self::default());
        };
        if !f.is_object() {
            return Err(HandlerErr::bad_params("filter must be an object"));
        }
        let status = optional_nonempty(f, "status").map(|s| s.to_ascii_lowercase());
        if let Some(s) = status.as_deref() {
            if !matches!(s, "all" | "open" | "done") {
                return Err(HandlerErr::bad_params("filter.status must be all, open or done"));
            }
        }
        Ok(Self {
            status,
            priority: optional_nonempty(f, "priority").map(|p| normalize_priority(Some(&p)).to_string()),
            tag: optional_nonempty(f, "tag").map(|t| t.to_lowercase()),
            search: optional_nonempty(f, "search").map(|t| t.to_lowercase()),
            due_date: optional_date(f, "dueDate")?,
            owner_id: optional_nonempty(f, "ownerId"),
        })
    }

    fn matches(&self, t: &TaskRow) -> bool {
        match self.status.as_deref() {
            Some("open") if t.completed() => return false,
            Some("done") if !t.completed() => return false,
            _ => {}
        }
        if self.priority.as_deref().is_some_and(|p| p != t.priority) {
            return false;
        }
        if self.tag.as_deref().is_some_and(|tag| t.tag.to_lowercase() != tag) {
            return false;
        }
        if self.due_date.is_some() && self.due_date != t.due_date {
            return false;
        }
        if self.owner_id.as_deref().is_some_and(|o| o != t.owner_id) {
            return false;
        }
        if let Some(q) = self.search.as_deref() {
            let hit = t.title.to_lowercase().contains(q) || t.description.to_lowercase().contains(q);
            if !hit {
                return false;
            }
        }
        true
    }
}

fn tasks_list(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let filter = TaskFilter::from_params(params)?;
    let mut tasks: Vec<TaskRow> = store::load_tasks(conn, visible_owner(session))
        .map_err(db_query)?
        .into_iter()
        .filter(|t| filter.matches(t))
        .collect();
    store::sort_tasks(&mut tasks);
    Ok(json!({
        "tasks": tasks.iter().map(|t| t.to_json()).collect::<Vec<_>>()
    }))
}

fn tasks_create(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let title = required_str(params, "title")?;
    let required = optional_bool(params, "required")?.unwrap_or(false);
    if required {
        ensure_can_create_required(session.role)?;
    }

    let owner_id = match optional_nonempty(params, "ownerId") {
        Some(o) if session.role.is_privileged() => {
            if store::load_profile(conn, &o).map_err(db_query)?.is_none() {
                return Err(HandlerErr::not_found("profile"));
            }
            o
        }
        _ => session.profile_id.clone(),
    };

    let defaults = setup::tasks_setup(conn).map_err(db_query)?;
    let priority = match optional_nonempty(params, "priority") {
        Some(p) => normalize_priority(Some(&p)),
        None => normalize_priority(Some(&defaults.default_priority)),
    };
    let due_date = match optional_date(params, "dueDate")? {
        Some(d) => Some(d),
        None if defaults.default_due_today => Some(state.today().to_string()),
        None => None,
    };
    let local_id = optional_nonempty(params, "localId");
    if let Some(local) = local_id.as_deref() {
        if let Some(existing) = store::find_task_by_local_id(conn, &owner_id, local).map_err(db_query)? {
            let t = load_task_or_404(conn, &existing)?;
            ensure_task_mutable(session.role, t.required, t.owner_id == session.profile_id)?;
        }
    }

    let description = optional_str(params, "description").unwrap_or_default();
    let tag = optional_str(params, "tag").unwrap_or_default();
    let assigned_by = required.then_some(session.profile_id.as_str());
    let new = NewTask {
        local_id: local_id.as_deref(),
        owner_id: &owner_id,
        title: &title,
        description: &description,
        tag: &tag,
        priority,
        due_date: due_date.as_deref(),
        required,
        assigned_by,
        status: TaskStatus::Pending,
    };
    let id = store::upsert_task(conn, &new, &state.now_iso()).map_err(db_insert)?;
    tracing::info!(task_id = %id, owner_id = %owner_id, required, "task saved");
    let task = load_task_or_404(conn, &id)?;
    Ok(json!({ "task": task.to_json() }))
}

fn tasks_update(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let task_id = required_str(params, "taskId")?;
    let patch = patch_object(params)?;
    let mut task = load_task_or_404(conn, &task_id)?;
    ensure_task_mutable(session.role, task.required, task.owner_id == session.profile_id)?;

    for (k, v) in patch {
        match k.as_str() {
            "title" => {
                let t = v.as_str().map(str::trim).unwrap_or("");
                if t.is_empty() {
                    return Err(HandlerErr::bad_params("title must be a non-empty string"));
                }
                task.title = t.to_string();
            }
            "description" => task.description = v.as_str().unwrap_or("").trim().to_string(),
            "tag" => task.tag = v.as_str().unwrap_or("").trim().to_string(),
            "priority" => task.priority = normalize_priority(v.as_str()).to_string(),
            "dueDate" => {
                task.due_date = optional_date(&json!({ "dueDate": v }), "dueDate")?;
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown task field: {}", k))),
        }
    }

    conn.execute(
        "UPDATE tasks SET title = ?, description = ?, tag = ?, priority = ?, due_date = ?, updated_at = ?
         WHERE id = ?",
        params![
            task.title,
            task.description,
            task.tag,
            task.priority,
            task.due_date,
            state.now_iso(),
            task.id
        ],
    )
    .map_err(db_update)?;
    let task = load_task_or_404(conn, &task_id)?;
    Ok(json!({ "task": task.to_json() }))
}

fn tasks_delete(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let task_id = required_str(params, "taskId")?;
    let task = load_task_or_404(conn, &task_id)?;
    ensure_task_mutable(session.role, task.required, task.owner_id == session.profile_id)?;
    conn.execute("DELETE FROM tasks WHERE id = ?", [&task.id])
        .map_err(db_delete)?;
    tracing::info!(task_id = %task.id, "task deleted");
    Ok(json!({ "ok": true }))
}

fn tasks_toggle(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let task_id = required_str(params, "taskId")?;
    let task = load_task_or_404(conn, &task_id)?;
    let transition = toggle_task(
        session.role,
        TaskFacts {
            status: task.status,
            required: task.required,
            owned_by_actor: task.owner_id == session.profile_id,
        },
    )?;
    store::write_task_transition(conn, &task.id, &transition, &state.now_iso()).map_err(db_update)?;
    tracing::info!(
        task_id = %task.id,
        role = session.role.as_str(),
        from = transition.from.as_str(),
        to = transition.to.as_str(),
        "task toggled"
    );
    let task = load_task_or_404(conn, &task_id)?;
    Ok(json!({
        "task": task.to_json(),
        "from": transition.from.as_str(),
        "to": transition.to.as_str(),
    }))
}

fn tasks_approve(state: &AppState, params: &Value) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let task_id = required_str(params, "taskId")?;
    let task = load_task_or_404(conn, &task_id)?;
    let changed = match approve_task(session.role, task.status)? {
        Some(t) => {
            store::write_task_transition(conn, &task.id, &t, &state.now_iso()).map_err(db_update)?;
            tracing::info!(task_id = %task.id, from = t.from.as_str(), "task approved");
            true
        }
        None => false,
    };
    let task = load_task_or_404(conn, &task_id)?;
    Ok(json!({ "task": task.to_json(), "changed": changed }))
}

fn tasks_clear_done(state: &AppState) -> HandlerResult {
    let conn = db_conn(state)?;
    let session = require_session(state)?;
    let doomed: Vec<String> = store::load_tasks(conn, visible_owner(session))
        .map_err(db_query)?
        .into_iter()
        .filter(|t| t.completed())
        .filter(|t| ensure_task_mutable(session.role, t.required, t.owner_id == session.profile_id).is_ok())
        .map(|t| t.id)
        .collect();
    let tx = conn.unchecked_transaction().map_err(db_delete)?;
    for id in &doomed {
        tx.execute("DELETE FROM tasks WHERE id = ?", [id])
            .map_err(db_delete)?;
    }
    tx.commit().map_err(db_delete)?;
    Ok(json!({ "removed": doomed.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "tasks.list" => tasks_list(state, &req.params),
        "tasks.create" => tasks_create(state, &req.params),
        "tasks.update" => tasks_update(state, &req.params),
        "tasks.delete" => tasks_delete(state, &req.params),
        "tasks.toggle" => tasks_toggle(state, &req.params),
        "tasks.approve" => tasks_approve(state, &req.params),
        "tasks.clearDone" => tasks_clear_done(state),
        _ => return None,
    };
    Some(respond(req, result))
}
