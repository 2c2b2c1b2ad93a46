//! Seams to the systems postmortem talks to
//!
//! The pipeline only sees these traits. Local implementations live in
//! [`super::scanner`], [`super::issues`] and [`super::generator`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Blocker,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Blocker => "blocker",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Error,
    Warning,
    Info,
    Crash,
    Timeout,
}

/// One fingerprinted line of interest in a scanned log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub message: String,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Task whose section of the synthetic log contained the line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    pub scan_id: String,
    pub findings: Vec<Finding>,
}

/// Outcome of ingesting one scan into the issue tracker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub scan_id: String,
    pub created: Vec<String>,
    /// Existing issues whose occurrence count was incremented
    pub updated: Vec<String>,
}

impl IngestReport {
    pub fn issue_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.created.iter().chain(&self.updated).cloned().collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Turns log text into fingerprinted findings
#[cfg_attr(test, mockall::automock)]
pub trait LogScanner: Send + Sync {
    fn scan(&self, text: &str) -> Result<ScanResult>;
}

/// Files findings of a stored scan as issues, deduplicated by fingerprint
#[cfg_attr(test, mockall::automock)]
pub trait IssueTracker: Send + Sync {
    fn ingest_scan(&self, scan_id: &str) -> Result<IngestReport>;
}

/// Text completion backend used to author WorkGraphs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlanEngine: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_ids_merge_sorted() {
        let report = IngestReport {
            scan_id: "scan-1".to_string(),
            created: vec!["ISS-0003".to_string()],
            updated: vec!["ISS-0001".to_string(), "ISS-0003".to_string()],
        };
        assert_eq!(report.issue_ids(), vec!["ISS-0001", "ISS-0003"]);
    }

    #[test]
    fn test_severity_orders_by_impact() {
        assert!(Severity::Critical > Severity::Blocker);
        assert!(Severity::Warning > Severity::Info);
        assert_eq!(Severity::Blocker.to_string(), "blocker");
    }
}
