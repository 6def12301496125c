//! Merge of client-cached records with stored ones.
//!
//! Stored rows win: they come first, keyed by `localId`. Client records
//! whose local id the store has never seen are appended in client order.
//! Client records carry their local id as `localId`, or as `id` in caches
//! written before records had a server id.

use serde_json::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub merged: Vec<Value>,
    pub local_only: Vec<String>,
}

pub fn local_id_of(record: &Value) -> Option<&str> {
    record
        .get("localId")
        .and_then(|v| v.as_str())
        .or_else(|| record.get("id").and_then(|v| v.as_str()))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn merge_records(stored: Vec<Value>, local: &[Value]) -> MergeOutcome {
    let mut seen: HashSet<String> = HashSet::new();
    for r in &stored {
        if let Some(id) = r.get("localId").and_then(|v| v.as_str()) {
            seen.insert(id.to_string());
        }
        // Clients that already hold server ids must not duplicate those rows.
        if let Some(id) = r.get("id").and_then(|v| v.as_str()) {
            seen.insert(id.to_string());
        }
    }

    let mut out = MergeOutcome {
        merged: stored,
        local_only: Vec::new(),
    };
    for l in local {
        let Some(id) = local_id_of(l) else {
            continue;
        };
        if !seen.insert(id.to_string()) {
            continue;
        }
        out.local_only.push(id.to_string());
        out.merged.push(l.clone());
    }
    out
}
