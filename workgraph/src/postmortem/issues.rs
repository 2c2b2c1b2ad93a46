//! File-backed issue tracker
//!
//! Issues live in `<root>/issues/index.json`, keyed by finding fingerprint.
//! Ingesting a scan opens one issue per new fingerprint and bumps the
//! occurrence count of issues that already exist, so re-ingesting never
//! duplicates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use super::collaborators::{Finding, FindingKind, IngestReport, IssueTracker, Severity};
use super::scanner::load_scan;
use crate::error::Result;
use crate::storage::{read_json_opt, update_json};

const TITLE_MAX_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub fingerprint: String,
    pub title: String,
    pub kind: FindingKind,
    pub severity: Severity,
    pub status: IssueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub task_ids: Vec<String>,
    pub occurrences: u32,
    /// Scans the fingerprint was seen in, one entry per ingestion
    pub scan_ids: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueIndex {
    #[serde(default)]
    pub next_seq: u32,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl IssueIndex {
    pub fn by_fingerprint(&self, fingerprint: &str) -> Option<&Issue> {
        self.issues.iter().find(|i| i.fingerprint == fingerprint)
    }

    fn allocate_id(&mut self) -> String {
        self.next_seq += 1;
        format!("ISS-{:04}", self.next_seq)
    }
}

fn title_of(message: &str) -> String {
    if message.chars().count() <= TITLE_MAX_CHARS {
        return message.to_string();
    }
    let cut: String = message.chars().take(TITLE_MAX_CHARS - 3).collect();
    format!("{cut}...")
}

#[derive(Debug, Clone)]
pub struct LocalIssueTracker {
    root: PathBuf,
}

impl LocalIssueTracker {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join("issues").join("index.json")
    }

    pub fn list(&self) -> Result<Vec<Issue>> {
        Ok(read_json_opt::<IssueIndex>(&self.index_path())?
            .unwrap_or_default()
            .issues)
    }
}

impl IssueTracker for LocalIssueTracker {
    fn ingest_scan(&self, scan_id: &str) -> Result<IngestReport> {
        let scan = load_scan(&self.root, scan_id)?;

        // One occurrence per fingerprint per ingestion
        let mut grouped: BTreeMap<&str, Vec<&Finding>> = BTreeMap::new();
        for finding in &scan.findings {
            grouped.entry(&finding.fingerprint).or_default().push(finding);
        }

        let now = Utc::now();
        let mut report = IngestReport {
            scan_id: scan_id.to_string(),
            ..IngestReport::default()
        };

        update_json(&self.index_path(), |index: &mut IssueIndex| {
            for (fingerprint, findings) in &grouped {
                let mut task_ids: Vec<String> =
                    findings.iter().filter_map(|f| f.task_id.clone()).collect();
                task_ids.sort();
                task_ids.dedup();
                let severity = findings
                    .iter()
                    .map(|f| f.severity)
                    .max()
                    .unwrap_or(Severity::Info);

                if let Some(issue) = index.issues.iter_mut().find(|i| i.fingerprint == *fingerprint) {
                    issue.occurrences += 1;
                    issue.scan_ids.push(scan_id.to_string());
                    issue.last_seen = now;
                    issue.severity = issue.severity.max(severity);
                    for task_id in task_ids {
                        if !issue.task_ids.contains(&task_id) {
                            issue.task_ids.push(task_id);
                        }
                    }
                    report.updated.push(issue.id.clone());
                    continue;
                }

                let first = findings[0];
                let id = index.allocate_id();
                index.issues.push(Issue {
                    id: id.clone(),
                    fingerprint: fingerprint.to_string(),
                    title: title_of(&first.message),
                    kind: first.kind,
                    severity,
                    status: IssueStatus::Open,
                    tool: first.tool.clone(),
                    file: first.file.clone(),
                    task_ids,
                    occurrences: 1,
                    scan_ids: vec![scan_id.to_string()],
                    first_seen: now,
                    last_seen: now,
                });
                report.created.push(id);
            }
        })?;

        info!(
            scan_id,
            created = report.created.len(),
            updated = report.updated.len(),
            "Scan ingested into issues"
        );
        Ok(report)
    }
}
