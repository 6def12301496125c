//! Response envelopes and the error type every handler family returns.

use crate::ipc::types::Request;
use crate::workflow::WorkflowError;
use serde_json::{json, Map, Value};

pub fn ok(id: &str, result: Value) -> Value {
    json!({ "id": id, "ok": true, "result": result })
}

pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    let mut error = Map::new();
    error.insert("code".into(), Value::from(code));
    error.insert("message".into(), Value::String(message.into()));
    if let Some(d) = details {
        error.insert("details".into(), d);
    }
    json!({ "id": id, "ok": false, "error": error })
}

/// A failed request: a stable wire code, a message, and optional details.
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

pub type HandlerResult = Result<Value, HandlerErr>;

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(what: &str) -> Self {
        Self::new("not_found", format!("{} not found", what))
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<WorkflowError> for HandlerErr {
    fn from(e: WorkflowError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

pub fn respond(req: &Request, result: HandlerResult) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

// Storage failures keep the underlying message; the code names the operation.

pub fn db_query(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

pub fn db_insert(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new("db_insert_failed", e.to_string())
}

pub fn db_update(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new("db_update_failed", e.to_string())
}

pub fn db_delete(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new("db_delete_failed", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_are_only_present_when_given() {
        let plain = err("7", "not_found", "task not found", None);
        assert_eq!(plain["ok"], false);
        assert!(plain["error"].get("details").is_none());

        let detailed = HandlerErr::new("io_failed", "disk full")
            .with_details(json!({ "path": "/tmp/x" }))
            .response("8");
        assert_eq!(detailed["id"], "8");
        assert_eq!(detailed["error"]["code"], "io_failed");
        assert_eq!(detailed["error"]["details"]["path"], "/tmp/x");
    }

    #[test]
    fn workflow_errors_keep_their_code() {
        let e: HandlerErr = WorkflowError::Forbidden("nope".to_string()).into();
        assert_eq!(e.code, "forbidden");
    }
}
