//! WorkGraph validation gate
//!
//! Runs over the raw JSON document rather than the typed model so that a
//! malformed document still yields a complete, field-addressed report. The
//! report is shown to operators and fed back to the generator for its single
//! repair attempt.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, WorkGraphError};
use crate::schema::{WorkGraph, SCHEMA_VERSION};

static WORKGRAPH_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^wg-\d{8}-[0-9a-f]{8}$").expect("valid regex"));

const PROFILES: [&str; 3] = ["investor", "purpose", "default"];
const RISK_LEVELS: [&str; 3] = ["low", "medium", "high"];

/// One rule broken by a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// JSON path of the offending field, e.g. `phases[0].tasks[1].definition_of_done`
    pub path: String,
    /// Id of the enclosing task, when the field belongs to one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.task_id {
            Some(task_id) => write!(f, "{} (task {}): {}", self.path, task_id, self.message),
            None => write!(f, "{}: {}", self.path, self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    /// One violation per line, suitable for terminals and repair prompts
    pub fn render(&self) -> String {
        self.violations
            .iter()
            .map(|v| format!("- {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push(&mut self, path: impl Into<String>, task_id: Option<&str>, message: impl Into<String>) {
        self.violations.push(Violation {
            path: path.into(),
            task_id: task_id.map(str::to_string),
            message: message.into(),
        });
    }
}

/// Check a candidate document. Pure; performs no I/O.
pub fn validate(doc: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();

    let Some(root) = doc.as_object() else {
        report.push("$", None, "document must be a JSON object");
        return report;
    };

    match root.get("schema_version") {
        Some(Value::String(v)) if v == SCHEMA_VERSION => {}
        Some(Value::String(v)) => report.push(
            "schema_version",
            None,
            format!("unsupported schema version '{v}' (expected '{SCHEMA_VERSION}')"),
        ),
        Some(_) => report.push("schema_version", None, "must be a string"),
        None => report.push("schema_version", None, "is required"),
    }

    match root.get("id") {
        None | Some(Value::Null) => {}
        Some(Value::String(id)) if id.is_empty() || WORKGRAPH_ID_RE.is_match(id) => {}
        Some(Value::String(id)) => report.push(
            "id",
            None,
            format!("'{id}' does not match wg-<YYYYMMDD>-<8 hex>"),
        ),
        Some(_) => report.push("id", None, "must be a string"),
    }

    require_non_empty_string(root, "domain", "domain", None, &mut report);
    require_non_empty_string(root, "goal", "goal", None, &mut report);

    match root.get("profile") {
        None | Some(Value::Null) => {}
        Some(Value::String(p)) if PROFILES.contains(&p.as_str()) => {}
        Some(other) => report.push(
            "profile",
            None,
            format!("{other} is not one of investor, purpose, default"),
        ),
    }

    if let Some(discovery) = root.get("repo_discovery") {
        validate_discovery(discovery, &mut report);
    }

    if let Some(track) = root.get("track") {
        match track.as_object() {
            Some(track) => {
                for key in ["id", "name", "goal"] {
                    if let Some(v) = track.get(key) {
                        if !v.is_string() {
                            report.push(format!("track.{key}"), None, "must be a string");
                        }
                    }
                }
            }
            None => report.push("track", None, "must be an object"),
        }
    }

    if let Some(stops) = root.get("stop_conditions") {
        string_array(stops, "stop_conditions", None, &mut report);
    }

    let phases = match root.get("phases") {
        Some(Value::Array(phases)) if !phases.is_empty() => phases,
        Some(Value::Array(_)) => {
            report.push("phases", None, "must contain at least one phase");
            return report;
        }
        Some(_) => {
            report.push("phases", None, "must be an array");
            return report;
        }
        None => {
            report.push("phases", None, "is required");
            return report;
        }
    };

    let mut phase_ids = HashSet::new();
    let mut task_ids = HashSet::new();
    let mut task_total = 0usize;

    for (pi, phase) in phases.iter().enumerate() {
        let path = format!("phases[{pi}]");
        let Some(phase) = phase.as_object() else {
            report.push(path, None, "must be an object");
            continue;
        };

        if let Some(id) = require_non_empty_string(phase, "id", &format!("{path}.id"), None, &mut report) {
            if !phase_ids.insert(id.to_string()) {
                report.push(format!("{path}.id"), None, format!("duplicate phase id '{id}'"));
            }
        }
        require_non_empty_string(phase, "name", &format!("{path}.name"), None, &mut report);

        let tasks = match phase.get("tasks") {
            Some(Value::Array(tasks)) => tasks,
            Some(_) => {
                report.push(format!("{path}.tasks"), None, "must be an array");
                continue;
            }
            None => {
                report.push(format!("{path}.tasks"), None, "is required");
                continue;
            }
        };

        for (ti, task) in tasks.iter().enumerate() {
            task_total += 1;
            let task_path = format!("{path}.tasks[{ti}]");
            validate_task(task, &task_path, &mut task_ids, &mut report);
        }
    }

    if task_total == 0 {
        report.push("phases", None, "must contain at least one task");
    }

    report
}

/// Validate and convert into the typed model.
///
/// `subject` names the document in the resulting error (a file path, an id,
/// or "generated WorkGraph").
pub fn parse(doc: &Value, subject: &str) -> Result<WorkGraph> {
    let report = validate(doc);
    if !report.is_ok() {
        tracing::warn!(
            subject = subject,
            violations = report.violations.len(),
            "WorkGraph rejected by validation gate"
        );
        return Err(WorkGraphError::validation(subject, report.violations));
    }

    serde_json::from_value(doc.clone()).map_err(|e| {
        WorkGraphError::validation(
            subject,
            vec![Violation {
                path: "$".to_string(),
                task_id: None,
                message: e.to_string(),
            }],
        )
    })
}

/// Re-run the gate on an already typed document
pub fn validate_workgraph(wg: &WorkGraph) -> ValidationReport {
    match serde_json::to_value(wg) {
        Ok(doc) => validate(&doc),
        Err(e) => {
            let mut report = ValidationReport::default();
            report.push("$", None, e.to_string());
            report
        }
    }
}

fn validate_task(
    task: &Value,
    path: &str,
    seen: &mut HashSet<String>,
    report: &mut ValidationReport,
) {
    let Some(task) = task.as_object() else {
        report.push(path, None, "must be an object");
        return;
    };

    let id = require_non_empty_string(task, "id", &format!("{path}.id"), None, report)
        .map(str::to_string);
    let tid = id.as_deref();
    if let Some(id) = tid {
        if !seen.insert(id.to_string()) {
            report.push(format!("{path}.id"), tid, format!("duplicate task id '{id}'"));
        }
    }

    require_non_empty_string(task, "title", &format!("{path}.title"), tid, report);
    if let Some(intent) = task.get("intent") {
        if !intent.is_string() {
            report.push(format!("{path}.intent"), tid, "must be a string");
        }
    }

    let dod_path = format!("{path}.definition_of_done");
    match task.get("definition_of_done") {
        Some(Value::Array(entries)) if entries.is_empty() => {
            report.push(dod_path, tid, "must contain at least one entry");
        }
        Some(Value::Array(entries)) => {
            for (i, entry) in entries.iter().enumerate() {
                validate_check(entry, &format!("{dod_path}[{i}]"), tid, report);
            }
        }
        Some(_) => report.push(dod_path, tid, "must be an array"),
        None => report.push(dod_path, tid, "is required"),
    }

    if let Some(verification) = task.get("verification") {
        let vpath = format!("{path}.verification");
        match verification.as_array() {
            Some(entries) => {
                for (i, entry) in entries.iter().enumerate() {
                    validate_check(entry, &format!("{vpath}[{i}]"), tid, report);
                }
            }
            None => report.push(vpath, tid, "must be an array"),
        }
    }

    for key in ["inputs", "outputs", "tags"] {
        if let Some(v) = task.get(key) {
            string_array(v, &format!("{path}.{key}"), tid, report);
        }
    }

    if let Some(risk) = task.get("risk") {
        let rpath = format!("{path}.risk");
        match risk.as_object() {
            Some(risk) => {
                match risk.get("level") {
                    None => {}
                    Some(Value::String(level))
                        if level.is_empty()
                            || RISK_LEVELS.contains(&level.to_lowercase().as_str()) => {}
                    Some(other) => report.push(
                        format!("{rpath}.level"),
                        tid,
                        format!("{other} is not one of low, medium, high"),
                    ),
                }
                if let Some(notes) = risk.get("notes") {
                    if !notes.is_string() {
                        report.push(format!("{rpath}.notes"), tid, "must be a string");
                    }
                }
            }
            None => report.push(rpath, tid, "must be an object"),
        }
    }

    if let Some(effort) = task.get("effort") {
        validate_effort(effort, &format!("{path}.effort"), tid, report);
    }

    for key in ["impact", "risk_score", "purpose"] {
        if let Some(v) = task.get(key) {
            if !v.is_null() {
                scale_value(v, &format!("{path}.{key}"), tid, report);
            }
        }
    }

    if let Some(safe) = task.get("safe_to_execute") {
        if !safe.is_boolean() {
            report.push(format!("{path}.safe_to_execute"), tid, "must be a boolean");
        }
    }
}

fn validate_check(entry: &Value, path: &str, tid: Option<&str>, report: &mut ValidationReport) {
    let Some(entry) = entry.as_object() else {
        report.push(path, tid, "must be an object with a 'kind'");
        return;
    };

    match entry.get("kind").and_then(Value::as_str) {
        Some("command") => {
            require_non_empty_string(entry, "cmd", &format!("{path}.cmd"), tid, report);
        }
        Some("file") => {
            require_non_empty_string(entry, "path", &format!("{path}.path"), tid, report);
        }
        Some(other) => report.push(
            format!("{path}.kind"),
            tid,
            format!("'{other}' is not one of command, file"),
        ),
        None => report.push(format!("{path}.kind"), tid, "is required (command or file)"),
    }

    if let Some(expect) = entry.get("expect") {
        if !expect.is_string() {
            report.push(format!("{path}.expect"), tid, "must be a string");
        }
    }
}

fn validate_effort(effort: &Value, path: &str, tid: Option<&str>, report: &mut ValidationReport) {
    match effort {
        Value::Null => {}
        Value::Number(_) => scale_value(effort, path, tid, report),
        Value::Object(range) => {
            let min = range.get("min").and_then(Value::as_u64);
            let max = range.get("max").and_then(Value::as_u64);
            match (min, max) {
                (Some(min), Some(max)) if min <= max => {}
                (Some(min), Some(max)) => report.push(
                    path,
                    tid,
                    format!("min ({min}) must not exceed max ({max})"),
                ),
                _ => report.push(
                    path,
                    tid,
                    "minute range needs non-negative integer 'min' and 'max'",
                ),
            }
        }
        _ => report.push(
            path,
            tid,
            "must be an integer 0-5 or an object {min, max} in minutes",
        ),
    }
}

fn scale_value(v: &Value, path: &str, tid: Option<&str>, report: &mut ValidationReport) {
    match v.as_u64() {
        Some(n) if n <= 5 => {}
        _ => report.push(path, tid, format!("{v} is not an integer in 0-5")),
    }
}

fn string_array(v: &Value, path: &str, tid: Option<&str>, report: &mut ValidationReport) {
    match v.as_array() {
        Some(items) => {
            for (i, item) in items.iter().enumerate() {
                if !item.is_string() {
                    report.push(format!("{path}[{i}]"), tid, "must be a string");
                }
            }
        }
        None => report.push(path, tid, "must be an array of strings"),
    }
}

fn validate_discovery(v: &Value, report: &mut ValidationReport) {
    let Some(discovery) = v.as_object() else {
        report.push("repo_discovery", None, "must be an object");
        return;
    };
    for key in ["evidence", "warnings"] {
        if let Some(items) = discovery.get(key) {
            string_array(items, &format!("repo_discovery.{key}"), None, report);
        }
    }
    if let Some(budget) = discovery.get("budget") {
        if budget.as_u64().is_none() {
            report.push(
                "repo_discovery.budget",
                None,
                "must be a non-negative integer",
            );
        }
    }
}

fn require_non_empty_string<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    path: &str,
    tid: Option<&str>,
    report: &mut ValidationReport,
) -> Option<&'a str> {
    match obj.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
        Some(Value::String(_)) => {
            report.push(path, tid, "must not be empty");
            None
        }
        Some(_) => {
            report.push(path, tid, "must be a string");
            None
        }
        None => {
            report.push(path, tid, "is required");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "schema_version": "v1",
            "domain": "software",
            "goal": "Ship the parser",
            "phases": [{
                "id": "P1",
                "name": "Build",
                "tasks": [{
                    "id": "T-1",
                    "title": "Compile",
                    "definition_of_done": [{"kind": "command", "cmd": "true"}],
                }]
            }]
        })
    }

    fn paths(report: &ValidationReport) -> Vec<&str> {
        report.violations.iter().map(|v| v.path.as_str()).collect()
    }

    #[test]
    fn test_minimal_document_passes() {
        let report = validate(&minimal());
        assert!(report.is_ok(), "{}", report.render());
        let wg = parse(&minimal(), "doc").unwrap();
        assert_eq!(wg.task_count(), 1);
        assert!(!wg.phases[0].tasks[0].safe_to_execute);
    }

    #[test]
    fn test_empty_definition_of_done_rejected() {
        let mut doc = minimal();
        doc["phases"][0]["tasks"][0]["definition_of_done"] = json!([]);
        let report = validate(&doc);
        assert_eq!(report.violations.len(), 1);
        let v = &report.violations[0];
        assert_eq!(v.path, "phases[0].tasks[0].definition_of_done");
        assert_eq!(v.task_id.as_deref(), Some("T-1"));

        let err = parse(&doc, "doc").unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_GATE_FAILURE);
    }

    #[test]
    fn test_missing_definition_of_done_rejected() {
        let mut doc = minimal();
        doc["phases"][0]["tasks"][0]
            .as_object_mut()
            .unwrap()
            .remove("definition_of_done");
        assert_eq!(
            paths(&validate(&doc)),
            vec!["phases[0].tasks[0].definition_of_done"]
        );
    }

    #[test]
    fn test_check_kind_requirements() {
        let mut doc = minimal();
        doc["phases"][0]["tasks"][0]["definition_of_done"] = json!([
            {"kind": "command"},
            {"kind": "file", "path": ""},
            {"kind": "http", "url": "x"},
            "cargo test"
        ]);
        let report = validate(&doc);
        assert_eq!(
            paths(&report),
            vec![
                "phases[0].tasks[0].definition_of_done[0].cmd",
                "phases[0].tasks[0].definition_of_done[1].path",
                "phases[0].tasks[0].definition_of_done[2].kind",
                "phases[0].tasks[0].definition_of_done[3]",
            ]
        );
    }

    #[test]
    fn test_optional_dimensions_range_checked() {
        let mut doc = minimal();
        let task = &mut doc["phases"][0]["tasks"][0];
        task["impact"] = json!(7);
        task["purpose"] = json!(-1);
        task["risk_score"] = json!(5);
        task["effort"] = json!({"min": 30, "max": 10});
        let report = validate(&doc);
        assert_eq!(
            paths(&report),
            vec![
                "phases[0].tasks[0].effort",
                "phases[0].tasks[0].impact",
                "phases[0].tasks[0].purpose",
            ]
        );
    }

    #[test]
    fn test_duplicate_ids_and_bad_schema_version() {
        let mut doc = minimal();
        doc["schema_version"] = json!("v2");
        let task = doc["phases"][0]["tasks"][0].clone();
        doc["phases"][0]["tasks"].as_array_mut().unwrap().push(task);
        let report = validate(&doc);
        assert_eq!(
            paths(&report),
            vec!["schema_version", "phases[0].tasks[1].id"]
        );
    }

    #[test]
    fn test_id_format_enforced_when_present() {
        let mut doc = minimal();
        doc["id"] = json!("wg-20250101-deadbeef");
        assert!(validate(&doc).is_ok());
        doc["id"] = json!("workgraph-1");
        assert_eq!(paths(&validate(&doc)), vec!["id"]);
    }

    #[test]
    fn test_non_object_and_empty_phases() {
        assert_eq!(paths(&validate(&json!([1, 2]))), vec!["$"]);
        let mut doc = minimal();
        doc["phases"] = json!([]);
        assert_eq!(paths(&validate(&doc)), vec!["phases"]);
        doc["phases"] = json!([{"id": "P1", "name": "Empty", "tasks": []}]);
        assert_eq!(paths(&validate(&doc)), vec!["phases"]);
    }

    #[test]
    fn test_render_lists_task_ids() {
        let mut doc = minimal();
        doc["phases"][0]["tasks"][0]["definition_of_done"] = json!([]);
        let rendered = validate(&doc).render();
        assert_eq!(
            rendered,
            "- phases[0].tasks[0].definition_of_done (task T-1): must contain at least one entry"
        );
    }
}
