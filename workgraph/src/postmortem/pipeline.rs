//! Postmortem orchestration
//!
//! Reads a finished run, never writes to it. Everything postmortem produces
//! goes to the sibling `postmortem-<run_id>/` directory, the scan archive,
//! the issue index and the WorkGraph store. A failing step is recorded and
//! the remaining steps still run.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::collaborators::{IngestReport, IssueTracker, LogScanner, ScanResult};
use super::generator::{DecomposeRequest, Decomposer};
use super::scanner::TASK_HEADER_PREFIX;
use crate::error::{Result, WorkGraphError, EXIT_OK};
use crate::run::record::{FailureArtifact, RunSummary};
use crate::run::store::locate;
use crate::schema::{Profile, RepoDiscovery, ISSUES_DOMAIN};
use crate::storage::{atomic_write_bytes, atomic_write_json, WorkGraphStore};
use crate::validate::Violation;

/// Evidence lines handed to the generator, at most
const MAX_FINDING_EVIDENCE: usize = 20;

#[derive(Debug, Clone)]
pub struct PostmortemOptions {
    /// Without this only a preview is produced and nothing is written
    pub execute: bool,
    pub create_issues: bool,
    pub decompose: bool,
    pub profile: Profile,
    pub max_artifacts: usize,
    pub max_stream_bytes: usize,
}

impl Default for PostmortemOptions {
    fn default() -> Self {
        Self {
            execute: false,
            create_issues: true,
            decompose: false,
            profile: Profile::Default,
            max_artifacts: 20,
            max_stream_bytes: 200 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostmortemStep {
    Scan,
    Issues,
    Decompose,
}

impl fmt::Display for PostmortemStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scan => "scan",
            Self::Issues => "issues",
            Self::Decompose => "decompose",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: PostmortemStep,
    pub message: String,
    pub exit_code: i32,
}

impl StepFailure {
    fn from_error(step: PostmortemStep, err: &WorkGraphError) -> Self {
        Self {
            step,
            message: err.with_suggestion(),
            exit_code: err.exit_code(),
        }
    }
}

/// Persisted as `postmortem-<run_id>/result.json` when executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostmortemResult {
    pub run_id: String,
    pub workgraph_id: String,
    pub executed: bool,
    pub failed_tasks: Vec<String>,
    /// Task ids whose failure artifact fed the synthetic log
    pub artifacts: Vec<String>,
    /// Steps that would run, or ran
    pub steps: Vec<PostmortemStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthetic_log: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<String>,
    pub finding_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues: Option<IngestReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_workgraph_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_failures: Vec<StepFailure>,
    /// Suggested follow-up commands
    pub next: Vec<String>,
}

impl PostmortemResult {
    /// 0 when every step succeeded, else the most severe step exit code
    pub fn exit_code(&self) -> i32 {
        self.step_failures
            .iter()
            .map(|f| f.exit_code)
            .max()
            .unwrap_or(EXIT_OK)
    }
}

/// Render failed tasks and their artifacts as one log.
///
/// Output depends only on the summary and artifacts: sections are ordered by
/// task id and carry no timestamps, so the same run always yields the same
/// bytes.
pub fn synthetic_log(summary: &RunSummary, artifacts: &[FailureArtifact]) -> String {
    let mut out = String::new();
    let failed = summary.failed_task_ids();
    let _ = writeln!(out, "=== POSTMORTEM LOG ===");
    let _ = writeln!(out, "run: {}", summary.run_id);
    let _ = writeln!(out, "workgraph: {}", summary.workgraph_id);
    let _ = writeln!(out, "failed tasks: {}", failed.len());
    let _ = writeln!(out, "artifacts: {}", artifacts.len());

    for task_id in &failed {
        let _ = writeln!(out);
        let _ = writeln!(out, "{TASK_HEADER_PREFIX}{task_id} ===");
        let outcome = summary.outcome(task_id);
        if let Some(outcome) = outcome {
            let _ = writeln!(out, "status: {}", outcome.status);
        }

        match artifacts.iter().find(|a| &a.task_id == task_id) {
            Some(artifact) => {
                let _ = writeln!(out, "check: {}", artifact.check);
                match artifact.exit_code {
                    Some(code) => {
                        let _ = writeln!(out, "exit code: {code}");
                    }
                    None => {
                        let _ = writeln!(out, "exit code: none");
                    }
                }
                write_stream(&mut out, "stdout", &artifact.stdout, artifact.stdout_truncated);
                write_stream(&mut out, "stderr", &artifact.stderr, artifact.stderr_truncated);
                if artifact.timed_out {
                    let _ = writeln!(out, "error: task {task_id} timed out: {}", artifact.check);
                } else {
                    let _ = writeln!(out, "error: task {task_id} failed: {}", artifact.check);
                }
            }
            None => {
                let dropped = summary
                    .dropped_artifacts
                    .iter()
                    .find(|d| &d.task_id == task_id)
                    .map(|d| d.reason.as_str())
                    .unwrap_or("no artifact stored");
                let _ = writeln!(out, "artifact: unavailable ({dropped})");
                let reason = outcome
                    .and_then(|o| o.reason.as_deref())
                    .unwrap_or("no details");
                let _ = writeln!(out, "error: task {task_id} failed: {reason}");
            }
        }
    }
    out
}

fn write_stream(out: &mut String, name: &str, content: &str, truncated: bool) {
    if content.is_empty() {
        return;
    }
    let marker = if truncated { " (truncated)" } else { "" };
    let _ = writeln!(out, "--- {name}{marker} ---");
    out.push_str(content);
    if !content.ends_with('\n') {
        out.push('\n');
    }
    let _ = writeln!(out, "--- end {name} ---");
}

/// Runs the postmortem steps against the collaborators it was built with
pub struct Postmortem {
    root: PathBuf,
    scanner: Box<dyn LogScanner>,
    tracker: Box<dyn IssueTracker>,
    decomposer: Option<Decomposer>,
}

impl Postmortem {
    pub fn new(
        root: impl AsRef<Path>,
        scanner: Box<dyn LogScanner>,
        tracker: Box<dyn IssueTracker>,
        decomposer: Option<Decomposer>,
    ) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            scanner,
            tracker,
            decomposer,
        }
    }

    pub async fn run(&self, run_id: &str, opts: &PostmortemOptions) -> Result<PostmortemResult> {
        let (workgraph_id, handle) = locate(&self.root, run_id)?;
        let summary = handle.summary()?.ok_or_else(|| {
            WorkGraphError::validation(
                run_id,
                vec![Violation {
                    path: "summary.json".to_string(),
                    task_id: None,
                    message: "run has not finished; resume it before a postmortem".to_string(),
                }],
            )
        })?;

        let failed_tasks = summary.failed_task_ids();
        let artifacts: Vec<FailureArtifact> = handle
            .artifacts(opts.max_artifacts)?
            .into_iter()
            .filter(|a| failed_tasks.contains(&a.task_id))
            .map(|a| a.bounded(opts.max_stream_bytes))
            .collect();

        let mut steps = Vec::new();
        if !failed_tasks.is_empty() {
            steps.push(PostmortemStep::Scan);
            if opts.create_issues {
                steps.push(PostmortemStep::Issues);
            }
            if opts.decompose {
                steps.push(PostmortemStep::Decompose);
            }
        }

        let mut result = PostmortemResult {
            run_id: run_id.to_string(),
            workgraph_id: workgraph_id.clone(),
            executed: opts.execute,
            failed_tasks: failed_tasks.clone(),
            artifacts: artifacts.iter().map(|a| a.task_id.clone()).collect(),
            steps: steps.clone(),
            synthetic_log: None,
            scan_id: None,
            finding_count: 0,
            issues: None,
            new_workgraph_id: None,
            step_failures: Vec::new(),
            next: Vec::new(),
        };

        if failed_tasks.is_empty() {
            info!(run_id, "Run has no failed tasks, nothing to analyse");
            return Ok(result);
        }
        if !opts.execute {
            info!(run_id, failed = failed_tasks.len(), "Postmortem preview");
            result.next.push(format!("wgplan postmortem {run_id} --execute"));
            return Ok(result);
        }

        let out_dir = handle.postmortem_dir();
        let log = synthetic_log(&summary, &artifacts);
        let log_path = out_dir.join("synthetic.log");
        atomic_write_bytes(&log_path, log.as_bytes())?;
        result.synthetic_log = Some(log_path);

        let scan: Option<ScanResult> = match self.scanner.scan(&log) {
            Ok(scan) => {
                info!(run_id, scan_id = %scan.scan_id, findings = scan.findings.len(), "Synthetic log scanned");
                result.scan_id = Some(scan.scan_id.clone());
                result.finding_count = scan.findings.len();
                Some(scan)
            }
            Err(e) => {
                warn!(run_id, error = %e, "Log scan failed");
                result.step_failures.push(StepFailure::from_error(PostmortemStep::Scan, &e));
                None
            }
        };

        if opts.create_issues {
            match &scan {
                Some(scan) => match self.tracker.ingest_scan(&scan.scan_id) {
                    Ok(report) => result.issues = Some(report),
                    Err(e) => {
                        warn!(run_id, error = %e, "Issue ingestion failed");
                        result
                            .step_failures
                            .push(StepFailure::from_error(PostmortemStep::Issues, &e));
                    }
                },
                None => result.step_failures.push(StepFailure {
                    step: PostmortemStep::Issues,
                    message: "skipped: no scan to ingest".to_string(),
                    exit_code: crate::error::EXIT_INTERNAL,
                }),
            }
        }

        if opts.decompose {
            match self.decompose(&summary, scan.as_ref(), opts.profile).await {
                Ok(id) => {
                    result.next.push(format!(
                        "wgplan sprint {id} --profile {} --top 5",
                        opts.profile
                    ));
                    result.new_workgraph_id = Some(id);
                }
                Err(e) => {
                    warn!(run_id, error = %e, "Decomposition failed");
                    result
                        .step_failures
                        .push(StepFailure::from_error(PostmortemStep::Decompose, &e));
                }
            }
        }

        if let Some(report) = &result.issues {
            if result.new_workgraph_id.is_none() && !report.issue_ids().is_empty() {
                result
                    .next
                    .push(format!("wgplan postmortem {run_id} --execute --decompose"));
            }
        }

        atomic_write_json(&out_dir.join("result.json"), &result)?;
        info!(
            run_id,
            failures = result.step_failures.len(),
            "Postmortem finished"
        );
        Ok(result)
    }

    async fn decompose(
        &self,
        summary: &RunSummary,
        scan: Option<&ScanResult>,
        profile: Profile,
    ) -> Result<String> {
        let decomposer = self.decomposer.as_ref().ok_or_else(|| {
            WorkGraphError::config("no plan engine configured; set WORKGRAPH_ENGINE_CMD or engine.command")
        })?;

        let failed = summary.failed_task_ids();
        let goal = format!(
            "Fix the failures of run {} (WorkGraph {}): {}",
            summary.run_id,
            summary.workgraph_id,
            failed.join(", ")
        );
        let mut evidence: Vec<String> = failed
            .iter()
            .filter_map(|id| summary.outcome(id))
            .map(|o| {
                format!(
                    "task {} {}: {}",
                    o.task_id,
                    o.status,
                    o.reason.as_deref().unwrap_or("no details")
                )
            })
            .collect();
        if let Some(scan) = scan {
            evidence.extend(
                scan.findings
                    .iter()
                    .take(MAX_FINDING_EVIDENCE)
                    .map(|f| format!("{} [{}]: {}", f.severity, f.fingerprint, f.message)),
            );
        }

        let request = DecomposeRequest {
            goal,
            domain: ISSUES_DOMAIN.to_string(),
            profile,
            discovery: RepoDiscovery {
                budget: evidence.len() as u32,
                evidence,
                warnings: Vec::new(),
            },
        };
        let wg = decomposer.decompose(&request).await?;
        WorkGraphStore::new(&self.root).save(&wg)?;
        Ok(wg.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postmortem::collaborators::{MockIssueTracker, MockLogScanner, MockPlanEngine};
    use crate::run::record::{DroppedArtifact, RunStatus, StatusCounts, TaskOutcome, TaskStatus};
    use chrono::Utc;

    fn outcome(id: &str, status: TaskStatus, reason: Option<&str>) -> TaskOutcome {
        TaskOutcome {
            task_id: id.to_string(),
            status,
            exit_code: None,
            duration_ms: 5,
            reason: reason.map(str::to_string),
        }
    }

    fn artifact(id: &str, stdout: &str, timed_out: bool) -> FailureArtifact {
        FailureArtifact {
            task_id: id.to_string(),
            check: "run `make` (expect: exit 0)".to_string(),
            exit_code: if timed_out { None } else { Some(2) },
            timed_out,
            duration_ms: 10,
            cwd: "/tmp/somewhere".to_string(),
            stdout: stdout.to_string(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            stdout_bytes: stdout.len(),
            stderr_bytes: 0,
            created_at: Utc::now(),
        }
    }

    fn summary() -> RunSummary {
        let tasks = vec![
            outcome("b", TaskStatus::Timeout, Some("timed out")),
            outcome("a", TaskStatus::Failed, Some("run `make` failed")),
            outcome("c", TaskStatus::Completed, None),
            outcome("d", TaskStatus::Failed, Some("run `lint` failed")),
        ];
        RunSummary {
            run_id: "run-20250101-00000001".to_string(),
            workgraph_id: "wg-20250101-00000000".to_string(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            dry_run: false,
            status: RunStatus::Failed,
            total_duration_ms: 30,
            counts: StatusCounts::tally(&tasks),
            tasks,
            artifacts: vec!["a".to_string(), "b".to_string()],
            dropped_artifacts: vec![DroppedArtifact {
                task_id: "d".to_string(),
                reason: "per-run artifact budget of 2 exceeded".to_string(),
            }],
            exit_code: 1,
        }
    }

    #[test]
    fn test_synthetic_log_is_ordered_and_stable() {
        let artifacts = vec![
            artifact("b", "", true),
            artifact("a", "src/main.c:3: error: boom", false),
        ];
        let first = synthetic_log(&summary(), &artifacts);
        let mut reversed = artifacts.clone();
        reversed.reverse();
        assert_eq!(first, synthetic_log(&summary(), &reversed));

        let a = first.find("=== TASK: a ===").unwrap();
        let b = first.find("=== TASK: b ===").unwrap();
        let d = first.find("=== TASK: d ===").unwrap();
        assert!(a < b && b < d);
        assert!(!first.contains("=== TASK: c ==="));
        assert!(first.contains("error: task b timed out"));
        assert!(first.contains("artifact: unavailable (per-run artifact budget of 2 exceeded)"));
        assert!(!first.contains("/tmp/somewhere"));
    }

    #[test]
    fn test_step_failure_exit_code_is_most_severe() {
        let mut result = PostmortemResult {
            run_id: "r".to_string(),
            workgraph_id: "w".to_string(),
            executed: true,
            failed_tasks: vec![],
            artifacts: vec![],
            steps: vec![],
            synthetic_log: None,
            scan_id: None,
            finding_count: 0,
            issues: None,
            new_workgraph_id: None,
            step_failures: vec![],
            next: vec![],
        };
        assert_eq!(result.exit_code(), 0);
        result.step_failures.push(StepFailure {
            step: PostmortemStep::Decompose,
            message: "bad".to_string(),
            exit_code: 2,
        });
        result.step_failures.push(StepFailure {
            step: PostmortemStep::Issues,
            message: "worse".to_string(),
            exit_code: 3,
        });
        assert_eq!(result.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let pm = Postmortem::new(
            dir.path(),
            Box::new(MockLogScanner::new()),
            Box::new(MockIssueTracker::new()),
            Some(Decomposer::new(Box::new(MockPlanEngine::new()))),
        );
        let err = pm
            .run("run-20250101-00000001", &PostmortemOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkGraphError::RunNotFound { .. }));
    }
}
