//! Shared builders for integration tests

#![allow(dead_code)]

use serde_json::{json, Value};
use workgraph::{validate, WorkGraph};

pub const WORKGRAPH_ID: &str = "wg-20250314-0badc0de";

/// A task whose single definition-of-done check runs `cmd`
pub fn task(id: &str, cmd: &str, safe: bool) -> Value {
    json!({
        "id": id,
        "title": format!("Task {id}"),
        "definition_of_done": [{ "kind": "command", "cmd": cmd }],
        "safe_to_execute": safe,
    })
}

/// Attach explicit scoring dimensions to a task
pub fn scored(mut task: Value, impact: u8, effort: u8, risk: u8, purpose: u8) -> Value {
    task["impact"] = json!(impact);
    task["effort"] = json!(effort);
    task["risk_score"] = json!(risk);
    task["purpose"] = json!(purpose);
    task
}

/// Declare produced and consumed artifacts on a task
pub fn wired(mut task: Value, inputs: &[&str], outputs: &[&str]) -> Value {
    task["inputs"] = json!(inputs);
    task["outputs"] = json!(outputs);
    task
}

pub fn document(tasks: Vec<Value>) -> Value {
    json!({
        "schema_version": "v1",
        "id": WORKGRAPH_ID,
        "domain": "software",
        "goal": "Keep the build green",
        "track": { "id": "TRK", "name": "Build health", "goal": "green" },
        "phases": [{ "id": "P1", "name": "Everything", "tasks": tasks }],
    })
}

pub fn workgraph(tasks: Vec<Value>) -> WorkGraph {
    validate::parse(&document(tasks), "test WorkGraph").expect("valid test document")
}
