//! Sequential task runner
//!
//! Tasks execute strictly in plan order, one at a time. Each task moves
//! `pending -> running -> completed | failed | timeout`, or straight to
//! `skipped`. A failing task never aborts the run. Every transition is
//! appended to `events.jsonl` before the next task starts; the summary is
//! written once, after the last task resolves.
//!
//! Unsafe tasks (`safe_to_execute = false`) are skipped here, in one place,
//! whenever commands would really run.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use super::record::{
    bound_stream, DroppedArtifact, FailureArtifact, RunEvent, RunMeta, RunSettings, RunStatus,
    RunSummary, StatusCounts, TaskOutcome, TaskStatus,
};
use super::store::{RunHandle, RunStore};
use crate::config::PlanConfig;
use crate::error::{Result, WorkGraphError, EXIT_OK, EXIT_TASK_FAILURES};
use crate::ids;
use crate::schema::{Check, Profile, Task, WorkGraph};
use crate::selection::{select, Selection, SelectionRole};

/// A task scheduled for execution
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTask {
    pub task: Task,
    pub role: SelectionRole,
}

/// Ordered tasks of one WorkGraph, ready to run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub workgraph_id: String,
    pub workgraph_hash: String,
    pub tasks: Vec<PlannedTask>,
}

impl ExecutionPlan {
    /// Plan the tasks of `selection` in its topological order
    pub fn from_selection(wg: &WorkGraph, selection: &Selection) -> Result<Self> {
        let mut tasks = Vec::with_capacity(selection.len());
        for id in &selection.ordered_ids {
            let task = wg.task(id).ok_or_else(|| WorkGraphError::TaskNotFound {
                workgraph_id: wg.id.clone(),
                task_id: id.clone(),
            })?;
            let role = selection.role_of(id).unwrap_or(SelectionRole::Closure);
            tasks.push(PlannedTask {
                task: task.clone(),
                role,
            });
        }
        Ok(Self {
            workgraph_id: wg.id.clone(),
            workgraph_hash: ids::content_hash(wg),
            tasks,
        })
    }

    /// Plan every task of `wg`, dependencies first
    pub fn full(wg: &WorkGraph, profile: Profile) -> Result<Self> {
        Self::from_selection(wg, &select(wg, profile, wg.task_count()))
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.task.id.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Preview checks instead of running them
    pub dry_run: bool,
    /// Skip closure-only tasks
    pub only_top: bool,
    pub skip_ids: BTreeSet<String>,
    pub cmd_timeout: Duration,
    pub max_steps: Option<usize>,
    /// Working directory for commands and relative file checks
    pub working_dir: PathBuf,
    pub max_artifacts: usize,
    pub max_stream_bytes: usize,
    /// Continue an interrupted run instead of starting a new one
    pub resume: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            only_top: false,
            skip_ids: BTreeSet::new(),
            cmd_timeout: Duration::from_secs(60),
            max_steps: None,
            working_dir: PathBuf::from("."),
            max_artifacts: 20,
            max_stream_bytes: 200 * 1024,
            resume: None,
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &PlanConfig) -> Self {
        Self {
            cmd_timeout: config.cmd_timeout(),
            max_steps: config.runner.max_steps,
            working_dir: config
                .runner
                .working_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(".")),
            max_artifacts: config.artifacts.max_artifacts,
            max_stream_bytes: config.artifacts.max_stream_bytes,
            ..Self::default()
        }
    }

    fn settings(&self) -> RunSettings {
        RunSettings {
            only_top: self.only_top,
            skip_ids: self.skip_ids.clone(),
            max_steps: self.max_steps,
            cmd_timeout_secs: self.cmd_timeout.as_secs(),
            max_artifacts: self.max_artifacts,
            max_stream_bytes: self.max_stream_bytes,
        }
    }
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.summary.exit_code
    }
}

/// Executes plans and records them under `<root>/workgraphs/<id>/runs`
pub struct Runner {
    root: PathBuf,
}

struct CheckRun {
    passed: bool,
    exit_code: Option<i32>,
    timed_out: bool,
    duration_ms: u64,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    stdout_bytes: usize,
    stderr_bytes: usize,
}

/// What one run resolved to so far, used when resuming
struct Prior {
    outcomes: HashMap<String, TaskOutcome>,
    steps: usize,
}

impl Runner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub async fn run(&self, plan: &ExecutionPlan, opts: &RunOptions) -> Result<RunReport> {
        let store = RunStore::for_workgraph(&self.root, &plan.workgraph_id);
        let started = Instant::now();

        let (handle, mut meta, mut prior) = match &opts.resume {
            Some(run_id) => self.reopen(&store, plan, run_id)?,
            None => {
                let started_at = Utc::now();
                let meta = RunMeta {
                    run_id: ids::run_id(&plan.workgraph_id, started_at),
                    workgraph_id: plan.workgraph_id.clone(),
                    workgraph_hash: plan.workgraph_hash.clone(),
                    started_at,
                    completed_at: None,
                    status: RunStatus::Running,
                    dry_run: opts.dry_run,
                    settings: opts.settings(),
                    planned_task_ids: plan.task_ids(),
                    exit_code: None,
                    resumed_at: Vec::new(),
                };
                let handle = store.create(&meta)?;
                handle.append(RunEvent::RunStarted {
                    run_id: meta.run_id.clone(),
                    workgraph_id: meta.workgraph_id.clone(),
                    dry_run: meta.dry_run,
                    task_count: plan.tasks.len(),
                })?;
                let prior = Prior {
                    outcomes: HashMap::new(),
                    steps: 0,
                };
                (handle, meta, prior)
            }
        };

        // A resumed run keeps the settings it was started with
        let settings = meta.settings.clone();
        let dry_run = meta.dry_run;
        let cmd_timeout = Duration::from_secs(settings.cmd_timeout_secs);

        info!(
            run_id = %meta.run_id,
            workgraph_id = %meta.workgraph_id,
            tasks = plan.tasks.len(),
            dry_run,
            "Run started"
        );

        let mut outcomes = Vec::with_capacity(plan.tasks.len());
        let mut artifacts: BTreeMap<String, FailureArtifact> = BTreeMap::new();
        let mut dropped = Vec::new();
        let mut steps = prior.steps;
        let mut budget_hit = false;

        for planned in &plan.tasks {
            let task = &planned.task;

            if let Some(previous) = prior.outcomes.remove(&task.id) {
                if previous.status.is_failure() {
                    dropped.push(DroppedArtifact {
                        task_id: task.id.clone(),
                        reason: "output not retained across resume".to_string(),
                    });
                }
                outcomes.push(previous);
                continue;
            }

            let skip_reason = if settings.skip_ids.contains(&task.id) {
                Some("in skip list".to_string())
            } else if settings.only_top && planned.role == SelectionRole::Closure {
                Some("closure dependency in an only-top run".to_string())
            } else if settings.max_steps.is_some_and(|max| steps >= max) {
                budget_hit = true;
                Some("step budget exhausted".to_string())
            } else if !dry_run && !task.safe_to_execute {
                Some("unsafe: safe_to_execute is false".to_string())
            } else {
                None
            };

            if let Some(reason) = skip_reason {
                debug!(run_id = %meta.run_id, task_id = %task.id, reason = %reason, "Task skipped");
                handle.append(RunEvent::TaskSkipped {
                    task_id: task.id.clone(),
                    reason: reason.clone(),
                })?;
                outcomes.push(TaskOutcome::skipped(&task.id, reason));
                continue;
            }

            steps += 1;
            handle.append(RunEvent::TaskStarted {
                task_id: task.id.clone(),
                role: planned.role,
            })?;

            let outcome = if dry_run {
                for check in task.checks() {
                    info!(run_id = %meta.run_id, task_id = %task.id, "[dry-run] {check}");
                    handle.append(RunEvent::CheckPreview {
                        task_id: task.id.clone(),
                        check: check.describe(),
                    })?;
                }
                TaskOutcome {
                    task_id: task.id.clone(),
                    status: TaskStatus::Completed,
                    exit_code: None,
                    duration_ms: 0,
                    reason: Some(format!(
                        "dry run: {} check(s) previewed",
                        task.checks().count()
                    )),
                }
            } else {
                let (outcome, artifact) = self
                    .execute(&handle, task, &opts.working_dir, cmd_timeout, settings.max_stream_bytes)
                    .await?;
                if let Some(artifact) = artifact {
                    artifacts.insert(task.id.clone(), artifact);
                }
                outcome
            };

            info!(
                run_id = %meta.run_id,
                task_id = %task.id,
                status = %outcome.status,
                duration_ms = outcome.duration_ms,
                "Task resolved"
            );
            handle.append(RunEvent::TaskResult {
                outcome: outcome.clone(),
            })?;
            outcomes.push(outcome);
        }

        // Retain the first `max_artifacts` failures by task id
        let mut retained = Vec::new();
        for (position, (task_id, artifact)) in artifacts.into_iter().enumerate() {
            if position < settings.max_artifacts {
                retained.push(artifact);
            } else {
                dropped.push(DroppedArtifact {
                    task_id,
                    reason: format!(
                        "per-run artifact budget of {} exceeded",
                        settings.max_artifacts
                    ),
                });
            }
        }
        dropped.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        for artifact in &retained {
            handle.write_artifact(artifact)?;
        }
        for drop in &dropped {
            warn!(run_id = %meta.run_id, task_id = %drop.task_id, reason = %drop.reason, "Failure artifact dropped");
            handle.append(RunEvent::ArtifactDropped {
                task_id: drop.task_id.clone(),
                reason: drop.reason.clone(),
            })?;
        }

        let counts = StatusCounts::tally(&outcomes);
        let status = if counts.failures() > 0 {
            RunStatus::Failed
        } else if budget_hit {
            RunStatus::Stopped
        } else {
            RunStatus::Completed
        };
        let exit_code = if counts.failures() > 0 {
            EXIT_TASK_FAILURES
        } else {
            EXIT_OK
        };
        let completed_at = Utc::now();
        let total_duration_ms = (completed_at - meta.started_at)
            .num_milliseconds()
            .max(started.elapsed().as_millis() as i64) as u64;

        handle.append(RunEvent::RunSummary {
            status,
            counts,
            total_duration_ms,
            exit_code,
        })?;

        let summary = RunSummary {
            run_id: meta.run_id.clone(),
            workgraph_id: meta.workgraph_id.clone(),
            started_at: meta.started_at,
            completed_at,
            dry_run,
            status,
            total_duration_ms,
            counts,
            tasks: outcomes,
            artifacts: retained.iter().map(|a| a.task_id.clone()).collect(),
            dropped_artifacts: dropped,
            exit_code,
        };

        meta.completed_at = Some(completed_at);
        meta.status = status;
        meta.exit_code = Some(exit_code);
        handle.finalize(&summary, &meta)?;
        store.record(&meta)?;

        info!(
            run_id = %meta.run_id,
            status = %status,
            completed = counts.completed,
            failed = counts.failed,
            timeout = counts.timeout,
            skipped = counts.skipped,
            "Run finished"
        );

        Ok(RunReport {
            run_id: meta.run_id.clone(),
            run_dir: handle.dir().to_path_buf(),
            summary,
        })
    }

    /// Reopen an interrupted run, refusing when it already finished or the
    /// WorkGraph content changed underneath it.
    fn reopen(
        &self,
        store: &RunStore,
        plan: &ExecutionPlan,
        run_id: &str,
    ) -> Result<(RunHandle, RunMeta, Prior)> {
        let handle = store.open(run_id)?;
        if handle.is_finalized() {
            return Err(WorkGraphError::RunFinalized {
                run_id: run_id.to_string(),
            });
        }
        let mut meta = handle.meta()?;
        if meta.workgraph_hash != plan.workgraph_hash {
            return Err(WorkGraphError::ResumeMismatch {
                run_id: run_id.to_string(),
                expected: meta.workgraph_hash,
                actual: plan.workgraph_hash.clone(),
            });
        }

        let mut outcomes = HashMap::new();
        let mut steps = 0;
        for line in handle.events()? {
            match line.event {
                RunEvent::TaskResult { outcome } => {
                    steps += 1;
                    outcomes.insert(outcome.task_id.clone(), outcome);
                }
                RunEvent::TaskSkipped { task_id, reason } => {
                    outcomes.insert(task_id.clone(), TaskOutcome::skipped(&task_id, reason));
                }
                _ => {}
            }
        }

        meta.resumed_at.push(Utc::now());
        handle.write_meta(&meta)?;
        handle.append(RunEvent::RunResumed {
            run_id: run_id.to_string(),
            already_resolved: outcomes.len(),
        })?;
        info!(run_id, already_resolved = outcomes.len(), "Resuming run");

        Ok((handle, meta, Prior { outcomes, steps }))
    }

    /// Run a task's checks in order, stopping at the first failure
    async fn execute(
        &self,
        handle: &RunHandle,
        task: &Task,
        working_dir: &Path,
        timeout: Duration,
        max_stream_bytes: usize,
    ) -> Result<(TaskOutcome, Option<FailureArtifact>)> {
        let started = Instant::now();
        let mut last_exit = None;

        for check in task.checks() {
            let run = run_check(check, working_dir, timeout, max_stream_bytes).await;
            handle.append(RunEvent::CheckFinished {
                task_id: task.id.clone(),
                check: check.describe(),
                passed: run.passed,
                exit_code: run.exit_code,
                timed_out: run.timed_out,
                duration_ms: run.duration_ms,
            })?;
            last_exit = run.exit_code;

            if run.passed {
                continue;
            }

            let (stdout, stdout_cut) = bound_stream(&run.stdout, max_stream_bytes);
            let (stderr, stderr_cut) = bound_stream(&run.stderr, max_stream_bytes);
            let artifact = FailureArtifact {
                task_id: task.id.clone(),
                check: check.describe(),
                exit_code: run.exit_code,
                timed_out: run.timed_out,
                duration_ms: run.duration_ms,
                cwd: working_dir.display().to_string(),
                stdout,
                stderr,
                stdout_truncated: stdout_cut || run.stdout_bytes > run.stdout.len(),
                stderr_truncated: stderr_cut || run.stderr_bytes > run.stderr.len(),
                stdout_bytes: run.stdout_bytes,
                stderr_bytes: run.stderr_bytes,
                created_at: Utc::now(),
            };
            let (status, reason) = if run.timed_out {
                (
                    TaskStatus::Timeout,
                    format!("{check} timed out after {}s", timeout.as_secs_f64()),
                )
            } else {
                (TaskStatus::Failed, format!("{check} failed"))
            };
            let outcome = TaskOutcome {
                task_id: task.id.clone(),
                status,
                exit_code: run.exit_code,
                duration_ms: started.elapsed().as_millis() as u64,
                reason: Some(reason),
            };
            return Ok((outcome, Some(artifact)));
        }

        Ok((
            TaskOutcome {
                task_id: task.id.clone(),
                status: TaskStatus::Completed,
                exit_code: last_exit,
                duration_ms: started.elapsed().as_millis() as u64,
                reason: None,
            },
            None,
        ))
    }
}

async fn run_check(
    check: &Check,
    working_dir: &Path,
    timeout: Duration,
    max_stream_bytes: usize,
) -> CheckRun {
    match check {
        Check::Command { cmd, expect } => {
            let expected = expected_exit(expect);
            let mut run = run_command(cmd, working_dir, timeout, max_stream_bytes).await;
            run.passed = !run.timed_out && run.exit_code == Some(expected);
            run
        }
        Check::File { path, expect } => {
            let started = Instant::now();
            let (passed, detail) = check_file(&working_dir.join(path), expect);
            let stderr = if passed { Vec::new() } else { detail.into_bytes() };
            CheckRun {
                passed,
                exit_code: None,
                timed_out: false,
                duration_ms: started.elapsed().as_millis() as u64,
                stdout: Vec::new(),
                stdout_bytes: 0,
                stderr_bytes: stderr.len(),
                stderr,
            }
        }
    }
}

/// Exit code demanded by an `expect` string: `"exit N"`, otherwise 0
pub fn expected_exit(expect: &str) -> i32 {
    let expect = expect.trim().to_ascii_lowercase();
    expect
        .strip_prefix("exit")
        .and_then(|rest| rest.trim().parse().ok())
        .unwrap_or(0)
}

/// Evaluate a file check. Returns whether it passed and a failure detail.
pub fn check_file(path: &Path, expect: &str) -> (bool, String) {
    let expect = expect.trim();
    let lowered = expect.to_ascii_lowercase();
    if lowered == "absent" || lowered == "missing" {
        return (
            !path.exists(),
            format!("expected {} to be absent", path.display()),
        );
    }
    if lowered.starts_with("contains ") {
        let needle = &expect["contains ".len()..];
        return match std::fs::read_to_string(path) {
            Ok(content) if content.contains(needle) => (true, String::new()),
            Ok(_) => (
                false,
                format!("{} does not contain '{needle}'", path.display()),
            ),
            Err(e) => (false, format!("cannot read {}: {e}", path.display())),
        };
    }
    (
        path.exists(),
        format!("expected {} to exist", path.display()),
    )
}

fn shell_command(cmd: &str) -> tokio::process::Command {
    #[cfg(windows)]
    {
        let mut command = tokio::process::Command::new("cmd");
        command.args(["/C", cmd]);
        command
    }
    #[cfg(not(windows))]
    {
        let mut command = tokio::process::Command::new("sh");
        command.args(["-c", cmd]);
        command
    }
}

/// Head of one output stream plus the total number of bytes it produced
#[derive(Default)]
struct Capture {
    head: Vec<u8>,
    total: usize,
}

impl Capture {
    /// Keep the first `limit` bytes of `pipe` and count the rest while
    /// draining it, so a chatty child never blocks on a full pipe.
    async fn fill<R: AsyncRead + Unpin>(&mut self, pipe: Option<&mut R>, limit: usize) {
        let Some(pipe) = pipe else { return };
        let mut chunk = vec![0u8; 8 * 1024];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => return,
                Ok(n) => {
                    let room = limit.saturating_sub(self.head.len());
                    self.head.extend_from_slice(&chunk[..n.min(room)]);
                    self.total += n;
                }
                Err(e) => {
                    debug!(error = %e, "Output pipe closed early");
                    return;
                }
            }
        }
    }
}

/// Run a shell command under `timeout`, keeping at most `max_stream_bytes`
/// of each stream in memory.
///
/// On Unix the child leads its own process group; on timeout the whole
/// group is killed so grandchildren do not outlive the task. Output read
/// before the deadline is kept.
async fn run_command(
    cmd: &str,
    working_dir: &Path,
    timeout: Duration,
    max_stream_bytes: usize,
) -> CheckRun {
    let started = Instant::now();
    let mut command = shell_command(cmd);
    command
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            let stderr = format!("failed to spawn `{cmd}`: {e}").into_bytes();
            return CheckRun {
                passed: false,
                exit_code: None,
                timed_out: false,
                duration_ms: started.elapsed().as_millis() as u64,
                stdout_bytes: 0,
                stderr_bytes: stderr.len(),
                stdout: Vec::new(),
                stderr,
            };
        }
    };
    let pid = child.id();
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let mut stdout = Capture::default();
    let mut stderr = Capture::default();

    let waited = {
        let exchange = async {
            let (_, _, status) = tokio::join!(
                stdout.fill(stdout_pipe.as_mut(), max_stream_bytes),
                stderr.fill(stderr_pipe.as_mut(), max_stream_bytes),
                child.wait(),
            );
            status
        };
        tokio::time::timeout(timeout, exchange).await
    };

    let (exit_code, timed_out) = match waited {
        Ok(Ok(status)) => (status.code(), false),
        Ok(Err(e)) => {
            let note = format!("failed to wait for `{cmd}`: {e}");
            stderr.total += note.len();
            stderr.head.extend_from_slice(note.as_bytes());
            (None, false)
        }
        Err(_) => {
            kill_group(pid).await;
            let _ = child.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
            (None, true)
        }
    };

    CheckRun {
        passed: false,
        exit_code,
        timed_out,
        duration_ms: started.elapsed().as_millis() as u64,
        stdout: stdout.head,
        stderr: stderr.head,
        stdout_bytes: stdout.total,
        stderr_bytes: stderr.total,
    }
}

/// Signal the whole process group led by `pid`.
///
/// `kill_on_drop` only reaches the shell itself; commands it started (the
/// `sleep` in `sh -c "make; sleep 60"`) sit in the same group and keep the
/// pipes open until they get the signal too. Tokio has no group kill, so
/// this goes through `kill(1)`.
#[cfg(unix)]
async fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    let status = tokio::process::Command::new("kill")
        .args(["-KILL", "--", &format!("-{pid}")])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(pid, %status, "Process group kill did not succeed"),
        Err(e) => warn!(pid, error = %e, "Failed to signal process group"),
    }
}

#[cfg(not(unix))]
async fn kill_group(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_exit_parsing() {
        assert_eq!(expected_exit("exit 0"), 0);
        assert_eq!(expected_exit("Exit 3"), 3);
        assert_eq!(expected_exit("exit  2 "), 2);
        assert_eq!(expected_exit("succeeds"), 0);
        assert_eq!(expected_exit(""), 0);
    }

    #[test]
    fn test_file_check_expectations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        assert!(!check_file(&path, "exists").0);
        assert!(check_file(&path, "absent").0);

        std::fs::write(&path, "## Usage\nrun it").unwrap();
        assert!(check_file(&path, "exists").0);
        assert!(check_file(&path, "contains ## Usage").0);
        let (passed, detail) = check_file(&path, "contains Install");
        assert!(!passed);
        assert!(detail.contains("Install"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_exit_expectation() {
        let dir = tempfile::tempdir().unwrap();
        let check = Check::Command {
            cmd: "exit 3".to_string(),
            expect: "exit 3".to_string(),
        };
        let run = run_check(&check, dir.path(), Duration::from_secs(5), 1024).await;
        assert!(run.passed);
        assert_eq!(run.exit_code, Some(3));

        let run = run_check(
            &Check::command("echo out; echo err >&2; exit 1"),
            dir.path(),
            Duration::from_secs(5),
            1024,
        )
        .await;
        assert!(!run.passed);
        assert_eq!(run.stdout, b"out\n");
        assert_eq!(run.stderr, b"err\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_timeout_kills() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let run = run_command("sleep 5", dir.path(), Duration::from_millis(200), 1024).await;
        assert!(run.timed_out);
        assert!(!run.passed);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_timeout_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let run = run_command(
            "echo started; echo halfway >&2; sleep 5",
            dir.path(),
            Duration::from_millis(500),
            1024,
        )
        .await;
        assert!(run.timed_out);
        assert_eq!(run.stdout, b"started\n");
        assert_eq!(run.stderr, b"halfway\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_output_is_capped_while_read() {
        let dir = tempfile::tempdir().unwrap();
        let run = run_command(
            "yes x | head -c 3000000; exit 1",
            dir.path(),
            Duration::from_secs(20),
            1024,
        )
        .await;
        assert!(!run.timed_out);
        assert_eq!(run.exit_code, Some(1));
        assert_eq!(run.stdout.len(), 1024);
        assert_eq!(run.stdout_bytes, 3_000_000);
        assert!(run.stderr.is_empty());
    }
}
