//! Identifier derivation
//!
//! WorkGraph ids are content-derived (`wg-<YYYYMMDD>-<8 hex>`), run ids are
//! unique per invocation (`run-<YYYYMMDD>-<8 hex>`), scan ids are derived from
//! the scanned text so rescanning identical input yields the same id.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::schema::WorkGraph;

static RUN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^run-\d{8}-[0-9a-f]{8}$").expect("valid regex"));

fn short_hash(bytes: &[u8], len: usize) -> String {
    let hex = blake3::hash(bytes).to_hex();
    hex.as_str()[..len].to_string()
}

/// Hash of the full document, used to detect edits between run and resume
pub fn content_hash(wg: &WorkGraph) -> String {
    let bytes = serde_json::to_vec(wg).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

/// Derive the id for a WorkGraph from its content, ignoring any id it
/// already carries.
pub fn workgraph_id(wg: &WorkGraph, date: NaiveDate) -> String {
    let mut unassigned = wg.clone();
    unassigned.id.clear();
    let bytes = serde_json::to_vec(&unassigned).unwrap_or_default();
    format!("wg-{}-{}", date.format("%Y%m%d"), short_hash(&bytes, 8))
}

/// Fresh run id for a run of `workgraph_id` starting at `started_at`
pub fn run_id(workgraph_id: &str, started_at: DateTime<Utc>) -> String {
    let seed = format!(
        "{workgraph_id}|{}|{}|{}",
        started_at.to_rfc3339(),
        std::process::id(),
        uuid::Uuid::new_v4()
    );
    format!(
        "run-{}-{}",
        started_at.format("%Y%m%d"),
        short_hash(seed.as_bytes(), 8)
    )
}

pub fn is_run_id(candidate: &str) -> bool {
    RUN_ID_RE.is_match(candidate)
}

/// Deterministic id for a scan of `text`
pub fn scan_id(text: &str) -> String {
    format!("scan-{}", short_hash(text.as_bytes(), 12))
}

/// Filesystem-safe form of `id`.
///
/// Everything but ASCII alphanumerics, `-` and `_` becomes `_`. When that
/// changed anything, `+` and a hash of the raw id are appended, so distinct
/// ids never share a file name (`build.1` and `build_1` stay apart).
pub fn file_safe(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized == id {
        sanitized
    } else {
        format!("{sanitized}+{}", short_hash(id.as_bytes(), 8))
    }
}

/// Stable, filesystem-safe key for a materialized entity.
///
/// Local ids (`T-1`, `P1`) are only unique within one WorkGraph, so keys are
/// namespaced by the WorkGraph id.
pub fn entity_key(workgraph_id: &str, local_id: &str) -> String {
    format!("{}.{}", file_safe(workgraph_id), file_safe(local_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Check, Phase, Profile, Task};

    fn graph(goal: &str) -> WorkGraph {
        WorkGraph {
            schema_version: "v1".to_string(),
            id: String::new(),
            domain: "software".to_string(),
            profile: Profile::Default,
            goal: goal.to_string(),
            repo_discovery: Default::default(),
            track: Default::default(),
            phases: vec![Phase {
                id: "P1".to_string(),
                name: "Only".to_string(),
                tasks: vec![Task {
                    id: "T-1".to_string(),
                    title: "t".to_string(),
                    intent: String::new(),
                    definition_of_done: vec![Check::command("true")],
                    verification: vec![],
                    inputs: vec![],
                    outputs: vec![],
                    risk: Default::default(),
                    effort: None,
                    impact: None,
                    risk_score: None,
                    purpose: None,
                    tags: vec![],
                    safe_to_execute: true,
                }],
            }],
            stop_conditions: vec![],
        }
    }

    #[test]
    fn test_workgraph_id_is_content_derived() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let a = workgraph_id(&graph("ship it"), date);
        let b = workgraph_id(&graph("ship it"), date);
        let c = workgraph_id(&graph("ship something else"), date);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("wg-20250314-"));
        assert_eq!(a.len(), "wg-20250314-".len() + 8);

        let mut assigned = graph("ship it");
        assigned.id = a.clone();
        assert_eq!(workgraph_id(&assigned, date), a);
    }

    #[test]
    fn test_run_ids_are_unique_and_well_formed() {
        let now = Utc::now();
        let a = run_id("wg-20250314-00000000", now);
        let b = run_id("wg-20250314-00000000", now);
        assert_ne!(a, b);
        assert!(is_run_id(&a), "{a}");
        assert!(!is_run_id("run-1"));
    }

    #[test]
    fn test_entity_key_sanitizes() {
        assert_eq!(
            entity_key("wg-20250314-abcdef01", "T-1"),
            "wg-20250314-abcdef01.T-1"
        );
        let key = entity_key("wg-20250314-abcdef01", "T 1/a");
        assert!(key.starts_with("wg-20250314-abcdef01.T_1_a+"), "{key}");
        assert!(!key.contains('/'));
        assert_eq!(key, entity_key("wg-20250314-abcdef01", "T 1/a"));
    }

    #[test]
    fn test_file_safe_keeps_distinct_ids_apart() {
        assert_eq!(file_safe("build_1"), "build_1");
        assert_ne!(file_safe("build.1"), file_safe("build_1"));
        assert_ne!(file_safe("build.1"), file_safe("build/1"));
        assert_ne!(
            entity_key("wg-20250314-abcdef01", "build.1"),
            entity_key("wg-20250314-abcdef01", "build_1")
        );
    }

    #[test]
    fn test_scan_id_is_deterministic() {
        assert_eq!(scan_id("abc"), scan_id("abc"));
        assert_ne!(scan_id("abc"), scan_id("abd"));
        assert!(scan_id("abc").starts_with("scan-"));
    }
}
