//! Run record types
//!
//! A run directory holds `meta.json`, the append-only `events.jsonl`, the
//! write-once `summary.json`, and one artifact per retained task failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::selection::SelectionRole;

/// Terminal and transient states of a task within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Skipped
        )
    }

    /// Failed or timed out
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Timeout)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Skipped => "skipped",
        };
        f.pad(s)
    }
}

/// Resolved state of one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    /// Why the task was skipped, or which check failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TaskOutcome {
    pub fn skipped(task_id: &str, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::Skipped,
            exit_code: None,
            duration_ms: 0,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Every executed task passed
    Completed,
    /// At least one task failed or timed out
    Failed,
    /// The step budget ran out before every task was scheduled
    Stopped,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.pad(s)
    }
}

/// Options a run was started with, recorded for audit and resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    pub only_top: bool,
    pub skip_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,
    pub cmd_timeout_secs: u64,
    pub max_artifacts: usize,
    pub max_stream_bytes: usize,
}

/// `meta.json`: written when the run starts and replaced once at the end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub workgraph_id: String,
    /// Content hash of the WorkGraph the run executes
    pub workgraph_hash: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub dry_run: bool,
    pub settings: RunSettings,
    /// Task ids the run was planned with, in execution order
    pub planned_task_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resumed_at: Vec<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub completed: usize,
    pub failed: usize,
    pub timeout: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn tally(outcomes: &[TaskOutcome]) -> Self {
        let mut counts = Self::default();
        for outcome in outcomes {
            match outcome.status {
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Timeout => counts.timeout += 1,
                TaskStatus::Skipped => counts.skipped += 1,
                TaskStatus::Pending | TaskStatus::Running => {}
            }
        }
        counts
    }

    pub fn failures(&self) -> usize {
        self.failed + self.timeout
    }
}

/// A failure artifact the per-run budget did not retain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedArtifact {
    pub task_id: String,
    pub reason: String,
}

/// `summary.json`: written exactly once after the last task resolves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub workgraph_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub dry_run: bool,
    pub status: RunStatus,
    pub total_duration_ms: u64,
    pub counts: StatusCounts,
    pub tasks: Vec<TaskOutcome>,
    /// Task ids with a stored failure artifact
    pub artifacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped_artifacts: Vec<DroppedArtifact>,
    pub exit_code: i32,
}

impl RunSummary {
    pub fn failed_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tasks
            .iter()
            .filter(|t| t.status.is_failure())
            .map(|t| t.task_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn outcome(&self, task_id: &str) -> Option<&TaskOutcome> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }
}

/// One line of `events.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLine {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: RunEvent,
}

impl EventLine {
    pub fn now(event: RunEvent) -> Self {
        Self {
            ts: Utc::now(),
            event,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        workgraph_id: String,
        dry_run: bool,
        task_count: usize,
    },
    RunResumed {
        run_id: String,
        already_resolved: usize,
    },
    TaskStarted {
        task_id: String,
        role: SelectionRole,
    },
    /// A check that would run, shown instead of running it
    CheckPreview {
        task_id: String,
        check: String,
    },
    CheckFinished {
        task_id: String,
        check: String,
        passed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        timed_out: bool,
        duration_ms: u64,
    },
    TaskResult {
        #[serde(flatten)]
        outcome: TaskOutcome,
    },
    TaskSkipped {
        task_id: String,
        reason: String,
    },
    ArtifactDropped {
        task_id: String,
        reason: String,
    },
    RunSummary {
        status: RunStatus,
        counts: StatusCounts,
        total_duration_ms: u64,
        exit_code: i32,
    },
}

/// Captured output of a failed check, bounded per stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureArtifact {
    pub task_id: String,
    /// The check that failed
    pub check: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub cwd: String,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    /// Stream sizes before truncation
    pub stdout_bytes: usize,
    pub stderr_bytes: usize,
    pub created_at: DateTime<Utc>,
}

impl FailureArtifact {
    /// Enforce the per-stream byte budget on an already captured artifact
    pub fn bounded(mut self, max_stream_bytes: usize) -> Self {
        let (stdout, cut_out) = bound_text(&self.stdout, max_stream_bytes);
        let (stderr, cut_err) = bound_text(&self.stderr, max_stream_bytes);
        self.stdout = stdout;
        self.stderr = stderr;
        self.stdout_truncated |= cut_out;
        self.stderr_truncated |= cut_err;
        self
    }
}

/// Decode `bytes` and keep at most `max` bytes of text.
///
/// Returns the text and whether anything was cut. The cut lands on a UTF-8
/// character boundary, so the result is exactly `max` bytes for ASCII and at
/// most `max` bytes otherwise.
pub fn bound_stream(bytes: &[u8], max: usize) -> (String, bool) {
    bound_text(&String::from_utf8_lossy(bytes), max)
}

fn bound_text(text: &str, max: usize) -> (String, bool) {
    if text.len() <= max {
        return (text.to_string(), false);
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_stream_exact_budget() {
        let big = vec![b'x'; 300 * 1024];
        let (text, truncated) = bound_stream(&big, 200 * 1024);
        assert!(truncated);
        assert_eq!(text.len(), 200 * 1024);

        let (text, truncated) = bound_stream(b"short", 200 * 1024);
        assert!(!truncated);
        assert_eq!(text, "short");
    }

    #[test]
    fn test_bound_stream_respects_char_boundaries() {
        let text = "é".repeat(10);
        let (cut, truncated) = bound_stream(text.as_bytes(), 5);
        assert!(truncated);
        assert_eq!(cut, "éé");
    }

    #[test]
    fn test_event_line_shape() {
        let line = EventLine::now(RunEvent::TaskResult {
            outcome: TaskOutcome {
                task_id: "T-1".to_string(),
                status: TaskStatus::Timeout,
                exit_code: None,
                duration_ms: 1200,
                reason: Some("run `sleep 5` timed out after 1s".to_string()),
            },
        });
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["event"], "TASK_RESULT");
        assert_eq!(json["task_id"], "T-1");
        assert_eq!(json["status"], "timeout");

        let back: EventLine = serde_json::from_value(json).unwrap();
        assert_eq!(back, line);
    }

    #[test]
    fn test_counts_and_failed_ids() {
        let outcome = |id: &str, status| TaskOutcome {
            task_id: id.to_string(),
            status,
            exit_code: None,
            duration_ms: 0,
            reason: None,
        };
        let tasks = vec![
            outcome("b", TaskStatus::Failed),
            outcome("a", TaskStatus::Timeout),
            outcome("c", TaskStatus::Completed),
            outcome("d", TaskStatus::Skipped),
        ];
        let counts = StatusCounts::tally(&tasks);
        assert_eq!(counts.failures(), 2);
        assert_eq!(counts.skipped, 1);

        let summary = RunSummary {
            run_id: "run-20250101-00000000".to_string(),
            workgraph_id: "wg-20250101-00000000".to_string(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            dry_run: false,
            status: RunStatus::Failed,
            total_duration_ms: 0,
            counts,
            tasks,
            artifacts: vec![],
            dropped_artifacts: vec![],
            exit_code: 1,
        };
        assert_eq!(summary.failed_task_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_artifact_bounded_sets_flags() {
        let artifact = FailureArtifact {
            task_id: "T".to_string(),
            check: "run `x`".to_string(),
            exit_code: Some(1),
            timed_out: false,
            duration_ms: 3,
            cwd: ".".to_string(),
            stdout: "abcdef".to_string(),
            stderr: "ab".to_string(),
            stdout_truncated: false,
            stderr_truncated: false,
            stdout_bytes: 6,
            stderr_bytes: 2,
            created_at: Utc::now(),
        }
        .bounded(4);
        assert_eq!(artifact.stdout, "abcd");
        assert!(artifact.stdout_truncated);
        assert!(!artifact.stderr_truncated);
    }
}
