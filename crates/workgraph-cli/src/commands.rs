//! Command handlers
//!
//! Each handler writes its human or JSON output to `out` and returns the
//! process exit code. Errors bubble up as `anyhow::Error` wrapping a
//! `WorkGraphError` so `main` can map them to exit codes 2 and 3.

use anyhow::{Context as _, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use workgraph::error::{EXIT_GATE_FAILURE, EXIT_INTERNAL, EXIT_OK};
use workgraph::ids;
use workgraph::materialize::{EnactOptions, EnactmentResult, Enactor, EntityStore};
use workgraph::postmortem::{
    discover_repo, CommandEngine, DecomposeRequest, Decomposer, LocalIssueTracker,
    LocalLogScanner, Postmortem, PostmortemOptions, PostmortemResult,
};
use workgraph::run::{ExecutionPlan, RunOptions, RunReport, RunStore, Runner, TaskStatus};
use workgraph::scoring::{rank, summarize};
use workgraph::selection::{format_summary, select, Selection};
use workgraph::storage::WorkGraphStore;
use workgraph::validate::{self, Violation};
use workgraph::{PlanConfig, Profile, WorkGraph, WorkGraphError};

use crate::cli::{Cli, Command, ExecArgs};

/// Ids shown per list in selection summaries
const SUMMARY_MAX_IDS: usize = 10;

/// Resolved configuration for one invocation
pub struct Context {
    pub config: PlanConfig,
    pub json: bool,
    pub cwd: PathBuf,
}

impl Context {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("cannot determine the current directory")?;
        let mut config = PlanConfig::load(cli.config.as_deref())?;
        if let Some(root) = &cli.root {
            config.storage.root = root.clone();
        }
        config.resolve_paths(&cwd);
        Ok(Self {
            config,
            json: cli.json,
            cwd,
        })
    }

    pub fn root(&self) -> &Path {
        self.config.root()
    }

    fn store(&self) -> WorkGraphStore {
        WorkGraphStore::new(self.root())
    }

    fn profile(&self, requested: Option<Profile>) -> Profile {
        requested.unwrap_or(self.config.scoring.default_profile)
    }

    fn top(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.config.scoring.default_top)
    }

    /// Load a WorkGraph by id or file path. Files are imported into the
    /// store (deriving an id when missing) so their runs have a home.
    fn load_workgraph(&self, reference: &str) -> Result<WorkGraph> {
        let store = self.store();
        let mut wg = store.resolve(reference)?;
        if Path::new(reference).is_file() {
            if wg.id.is_empty() {
                wg.id = ids::workgraph_id(&wg, Utc::now().date_naive());
            }
            store.save(&wg)?;
        }
        Ok(wg)
    }

    fn run_options(&self, exec: &ExecArgs, resume: Option<String>) -> RunOptions {
        let mut opts = RunOptions::from_config(&self.config);
        opts.dry_run = !exec.execute;
        opts.only_top = exec.only_top;
        opts.skip_ids = exec.skip.iter().map(|s| s.trim().to_string()).collect();
        if let Some(secs) = exec.timeout {
            opts.cmd_timeout = Duration::from_secs(secs);
        }
        if exec.max_steps.is_some() {
            opts.max_steps = exec.max_steps;
        }
        opts.working_dir = match (&exec.cwd, &self.config.runner.working_dir) {
            (Some(dir), _) => dir.clone(),
            (None, Some(dir)) => dir.clone(),
            (None, None) => self.cwd.clone(),
        };
        opts.resume = resume;
        opts
    }
}

fn print_json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Run the parsed command. Returns the exit code.
pub async fn execute(cli: Cli, out: &mut dyn Write) -> Result<i32> {
    let ctx = Context::from_cli(&cli)?;
    match cli.command {
        Command::Decompose {
            goal,
            domain,
            profile,
            repo,
            evidence_budget,
        } => decompose(&ctx, out, goal, domain, profile, repo, evidence_budget).await,
        Command::Validate { file, save } => validate_file(&ctx, out, &file, save),
        Command::Score { workgraph, profile } => score(&ctx, out, &workgraph, profile),
        Command::Recommend {
            workgraph,
            profile,
            top,
        } => recommend(&ctx, out, &workgraph, profile, top),
        Command::Enact {
            workgraph,
            profile,
            top,
            out: dir,
            name,
            dry_run,
        } => enact(&ctx, out, &workgraph, profile, top, dir, name, dry_run),
        Command::Sprint {
            workgraph,
            profile,
            top,
            out: dir,
            exec,
        } => sprint(&ctx, out, &workgraph, profile, top, dir, &exec).await,
        Command::Run {
            workgraph,
            profile,
            top,
            resume,
            exec,
        } => run(&ctx, out, &workgraph, profile, top, resume, &exec).await,
        Command::Postmortem {
            run_id,
            execute,
            no_issues,
            decompose,
            profile,
        } => postmortem(&ctx, out, &run_id, execute, !no_issues, decompose, profile).await,
        Command::Runs { workgraph } => runs(&ctx, out, &workgraph),
    }
}

async fn decompose(
    ctx: &Context,
    out: &mut dyn Write,
    goal: String,
    domain: String,
    profile: Option<Profile>,
    repo: Option<PathBuf>,
    evidence_budget: Option<u32>,
) -> Result<i32> {
    let engine = CommandEngine::from_config(&ctx.config)?;
    let repo = repo.unwrap_or_else(|| ctx.cwd.clone());
    let budget = evidence_budget.unwrap_or(ctx.config.discovery.evidence_budget);
    let discovery = discover_repo(&repo, budget);
    for warning in &discovery.warnings {
        warn!(repo = %repo.display(), "{warning}");
    }

    let request = DecomposeRequest {
        goal,
        domain,
        profile: ctx.profile(profile),
        discovery,
    };
    let wg = Decomposer::new(Box::new(engine)).decompose(&request).await?;
    let path = ctx.store().save(&wg)?;

    if ctx.json {
        print_json(out, &json!({ "workgraph_id": wg.id, "path": path, "workgraph": wg }))?;
    } else {
        writeln!(
            out,
            "Saved WorkGraph {} ({} tasks in {} phases) to {}",
            wg.id,
            wg.task_count(),
            wg.phases.len(),
            path.display()
        )?;
        writeln!(out, "WORKGRAPH_ID={}", wg.id)?;
        writeln!(out, "Next: wgplan recommend {} --top {}", wg.id, ctx.top(None))?;
    }
    Ok(EXIT_OK)
}

fn validate_file(ctx: &Context, out: &mut dyn Write, file: &Path, save: bool) -> Result<i32> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let subject = file.display().to_string();
    let doc: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        WorkGraphError::validation(
            subject.clone(),
            vec![Violation {
                path: "$".to_string(),
                task_id: None,
                message: format!("invalid JSON: {e}"),
            }],
        )
    })?;

    let report = validate::validate(&doc);
    if !report.is_ok() {
        if ctx.json {
            print_json(out, &json!({ "valid": false, "violations": report.violations }))?;
        } else {
            writeln!(out, "{subject}: {} problem(s)", report.violations.len())?;
            writeln!(out, "{}", report.render())?;
        }
        return Ok(EXIT_GATE_FAILURE);
    }

    let mut wg = validate::parse(&doc, &subject)?;
    let mut saved = None;
    if save {
        if wg.id.is_empty() {
            wg.id = ids::workgraph_id(&wg, Utc::now().date_naive());
        }
        saved = Some(ctx.store().save(&wg)?);
    }

    if ctx.json {
        print_json(
            out,
            &json!({
                "valid": true,
                "workgraph_id": wg.id,
                "tasks": wg.task_count(),
                "phases": wg.phases.len(),
                "saved_to": saved,
            }),
        )?;
    } else {
        writeln!(
            out,
            "{subject}: valid ({} tasks in {} phases)",
            wg.task_count(),
            wg.phases.len()
        )?;
        if let Some(path) = saved {
            writeln!(out, "Saved as {} at {}", wg.id, path.display())?;
        }
    }
    Ok(EXIT_OK)
}

fn score(ctx: &Context, out: &mut dyn Write, reference: &str, profile: Option<Profile>) -> Result<i32> {
    let wg = ctx.load_workgraph(reference)?;
    let profile = ctx.profile(profile);
    let ranked = rank(&wg, profile);
    let summary = summarize(profile, &ranked);

    if ctx.json {
        print_json(
            out,
            &json!({ "workgraph_id": wg.id, "profile": profile, "tasks": ranked, "summary": summary }),
        )?;
        return Ok(EXIT_OK);
    }

    writeln!(out, "WorkGraph {} scored with the {profile} profile", wg.id)?;
    for (i, scored) in ranked.iter().enumerate() {
        let title = wg.task(&scored.task_id).map(|t| t.title.as_str()).unwrap_or("");
        writeln!(out, "{:>3}. {:<12} {:>6.1}  {title}", i + 1, scored.task_id, scored.score)?;
        writeln!(out, "       {}", scored.rationale)?;
    }
    let list = |ids: &[String]| if ids.is_empty() { "(none)".to_string() } else { ids.join(", ") };
    writeln!(out)?;
    writeln!(out, "Quick wins:   {}", list(&summary.quick_wins))?;
    writeln!(out, "Risky bets:   {}", list(&summary.risky_bets))?;
    writeln!(out, "Purpose wins: {}", list(&summary.purpose_wins))?;
    if let (Some(top), Some(avg)) = (summary.top_score, summary.avg_score) {
        writeln!(out, "Top score {top:.1}, average {avg:.1}")?;
    }
    Ok(EXIT_OK)
}

fn print_selection(out: &mut dyn Write, selection: &Selection) -> Result<()> {
    writeln!(out, "{}", format_summary(selection, SUMMARY_MAX_IDS))?;
    writeln!(out, "Order: {}", selection.ordered_ids.join(" -> "))?;
    Ok(())
}

fn recommend(
    ctx: &Context,
    out: &mut dyn Write,
    reference: &str,
    profile: Option<Profile>,
    top: Option<usize>,
) -> Result<i32> {
    let wg = ctx.load_workgraph(reference)?;
    let selection = select(&wg, ctx.profile(profile), ctx.top(top));
    if ctx.json {
        print_json(out, &selection)?;
    } else {
        print_selection(out, &selection)?;
        writeln!(
            out,
            "Next: wgplan sprint {} --top {} --profile {}",
            wg.id, selection.top_n, selection.profile
        )?;
    }
    Ok(EXIT_OK)
}

/// Selection for `top`, or every task when no limit was asked for
fn selection_for(wg: &WorkGraph, profile: Profile, top: Option<usize>) -> Selection {
    select(wg, profile, top.unwrap_or_else(|| wg.task_count()))
}

fn enact_selection(
    ctx: &Context,
    wg: &WorkGraph,
    selection: &Selection,
    dir: Option<PathBuf>,
    name: Option<String>,
    dry_run: bool,
) -> EnactmentResult {
    let dir = dir.unwrap_or_else(|| ctx.config.tracks_dir());
    let opts = EnactOptions {
        dry_run,
        profile: Some(selection.profile),
        track_name: name,
    };
    Enactor::new(EntityStore::new(dir)).enact(wg, Some(selection), &opts)
}

fn print_enactment(out: &mut dyn Write, result: &EnactmentResult) -> Result<()> {
    writeln!(out, "Enacted track {}: {}", result.track_key, result.summary_line())?;
    for failure in &result.failures {
        writeln!(out, "  failed: {}", failure.to_error().with_suggestion())?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn enact(
    ctx: &Context,
    out: &mut dyn Write,
    reference: &str,
    profile: Option<Profile>,
    top: Option<usize>,
    dir: Option<PathBuf>,
    name: Option<String>,
    dry_run: bool,
) -> Result<i32> {
    let wg = ctx.load_workgraph(reference)?;
    let selection = selection_for(&wg, ctx.profile(profile), top);
    let result = enact_selection(ctx, &wg, &selection, dir, name, dry_run);
    if ctx.json {
        print_json(out, &result)?;
    } else {
        print_enactment(out, &result)?;
    }
    Ok(if result.is_clean() { EXIT_OK } else { EXIT_INTERNAL })
}

fn print_run(out: &mut dyn Write, report: &RunReport) -> Result<()> {
    let summary = &report.summary;
    let mode = if summary.dry_run { "dry run" } else { "executed" };
    writeln!(out, "Run {} ({mode}): {}", report.run_id, summary.status)?;
    for task in &summary.tasks {
        let detail = match (&task.status, &task.reason) {
            (TaskStatus::Completed, None) => String::new(),
            (_, Some(reason)) => format!("  {reason}"),
            (_, None) => String::new(),
        };
        writeln!(
            out,
            "  {:<12} {:<9} {:>6}ms{detail}",
            task.task_id, task.status, task.duration_ms
        )?;
    }
    let c = summary.counts;
    writeln!(
        out,
        "{} completed, {} failed, {} timeout, {} skipped in {}ms",
        c.completed, c.failed, c.timeout, c.skipped, summary.total_duration_ms
    )?;
    for dropped in &summary.dropped_artifacts {
        writeln!(out, "  artifact dropped for {}: {}", dropped.task_id, dropped.reason)?;
    }
    writeln!(out, "Record: {}", report.run_dir.display())?;
    Ok(())
}

fn run_hints(wg: &WorkGraph, report: &RunReport, rerun: &str) -> Vec<String> {
    let mut next = Vec::new();
    if report.summary.dry_run {
        next.push(format!("{rerun} --execute"));
    }
    if report.summary.counts.failures() > 0 {
        next.push(format!("wgplan postmortem {} --execute", report.run_id));
    }
    if next.is_empty() {
        next.push(format!("wgplan runs {}", wg.id));
    }
    next
}

async fn sprint(
    ctx: &Context,
    out: &mut dyn Write,
    reference: &str,
    profile: Option<Profile>,
    top: Option<usize>,
    dir: Option<PathBuf>,
    exec: &ExecArgs,
) -> Result<i32> {
    let wg = ctx.load_workgraph(reference)?;
    let profile = ctx.profile(profile);
    let top = ctx.top(top);
    let selection = select(&wg, profile, top);
    let enactment = enact_selection(ctx, &wg, &selection, dir, None, false);
    if !enactment.is_clean() {
        warn!(workgraph_id = %wg.id, failures = enactment.failures.len(), "Enactment incomplete, running anyway");
    }

    let plan = ExecutionPlan::from_selection(&wg, &selection)?;
    let opts = ctx.run_options(exec, None);
    info!(workgraph_id = %wg.id, tasks = plan.tasks.len(), dry_run = opts.dry_run, "Sprint starting");
    let report = Runner::new(ctx.root()).run(&plan, &opts).await?;
    let next = run_hints(
        &wg,
        &report,
        &format!("wgplan sprint {} --top {top} --profile {profile}", wg.id),
    );

    if ctx.json {
        print_json(
            out,
            &json!({
                "selection": selection,
                "enactment": enactment,
                "run_id": report.run_id,
                "run": report.summary,
                "next": next,
            }),
        )?;
    } else {
        print_selection(out, &selection)?;
        print_enactment(out, &enactment)?;
        print_run(out, &report)?;
        writeln!(out, "WORKGRAPH_SPRINT_RUN_ID={}", report.run_id)?;
        for hint in &next {
            writeln!(out, "Next: {hint}")?;
        }
    }

    let code = report.exit_code();
    Ok(if code == EXIT_OK && !enactment.is_clean() {
        EXIT_INTERNAL
    } else {
        code
    })
}

#[allow(clippy::too_many_arguments)]
async fn run(
    ctx: &Context,
    out: &mut dyn Write,
    reference: &str,
    profile: Option<Profile>,
    top: Option<usize>,
    resume: Option<String>,
    exec: &ExecArgs,
) -> Result<i32> {
    let wg = ctx.load_workgraph(reference)?;
    let selection = selection_for(&wg, ctx.profile(profile), top);
    let plan = ExecutionPlan::from_selection(&wg, &selection)?;
    let opts = ctx.run_options(exec, resume);
    let report = Runner::new(ctx.root()).run(&plan, &opts).await?;

    let rerun = match top {
        Some(n) => format!("wgplan run {} --top {n}", wg.id),
        None => format!("wgplan run {}", wg.id),
    };
    let next = run_hints(&wg, &report, &rerun);
    if ctx.json {
        print_json(
            out,
            &json!({ "run_id": report.run_id, "run": report.summary, "next": next }),
        )?;
    } else {
        print_run(out, &report)?;
        writeln!(out, "WORKGRAPH_RUN_ID={}", report.run_id)?;
        for hint in &next {
            writeln!(out, "Next: {hint}")?;
        }
    }
    Ok(report.exit_code())
}

fn print_postmortem(out: &mut dyn Write, result: &PostmortemResult) -> Result<()> {
    writeln!(
        out,
        "Postmortem for {} (WorkGraph {})",
        result.run_id, result.workgraph_id
    )?;
    if result.failed_tasks.is_empty() {
        writeln!(out, "No failed tasks.")?;
        return Ok(());
    }
    writeln!(
        out,
        "Failed tasks ({}): {}",
        result.failed_tasks.len(),
        result.failed_tasks.join(", ")
    )?;
    writeln!(out, "Artifacts used: {}", result.artifacts.len())?;

    let steps: Vec<String> = result.steps.iter().map(|s| s.to_string()).collect();
    if !result.executed {
        writeln!(out, "Would run: {}", steps.join(", "))?;
        writeln!(out, "Preview only; nothing was written.")?;
    } else {
        if let Some(path) = &result.synthetic_log {
            writeln!(out, "Synthetic log: {}", path.display())?;
        }
        if let Some(scan_id) = &result.scan_id {
            writeln!(out, "Scan {scan_id}: {} finding(s)", result.finding_count)?;
            writeln!(out, "WORKGRAPH_POSTMORTEM_SCAN_ID={scan_id}")?;
        }
        if let Some(issues) = &result.issues {
            writeln!(
                out,
                "Issues: {} created, {} updated",
                issues.created.len(),
                issues.updated.len()
            )?;
        }
        if let Some(id) = &result.new_workgraph_id {
            writeln!(out, "Fix WorkGraph: {id}")?;
            writeln!(out, "WORKGRAPH_POSTMORTEM_WORKGRAPH_ID={id}")?;
        }
        for failure in &result.step_failures {
            writeln!(out, "Step {} failed", failure.step)?;
            writeln!(out, "  {}", failure.message)?;
        }
    }
    for hint in &result.next {
        writeln!(out, "Next: {hint}")?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn postmortem(
    ctx: &Context,
    out: &mut dyn Write,
    run_id: &str,
    execute: bool,
    create_issues: bool,
    decompose: bool,
    profile: Option<Profile>,
) -> Result<i32> {
    let root = ctx.root();
    let decomposer = if decompose && execute {
        match CommandEngine::from_config(&ctx.config) {
            Ok(engine) => Some(Decomposer::new(Box::new(engine))),
            Err(e) => {
                warn!(error = %e, "Decomposition requested without a plan engine");
                None
            }
        }
    } else {
        None
    };

    let pm = Postmortem::new(
        root,
        Box::new(LocalLogScanner::new(root)),
        Box::new(LocalIssueTracker::new(root)),
        decomposer,
    );
    let opts = PostmortemOptions {
        execute,
        create_issues,
        decompose,
        profile: ctx.profile(profile),
        max_artifacts: ctx.config.artifacts.max_artifacts,
        max_stream_bytes: ctx.config.artifacts.max_stream_bytes,
    };
    let result = pm.run(run_id, &opts).await?;

    if ctx.json {
        print_json(out, &result)?;
    } else {
        print_postmortem(out, &result)?;
    }
    Ok(result.exit_code())
}

fn runs(ctx: &Context, out: &mut dyn Write, reference: &str) -> Result<i32> {
    let workgraph_id = if Path::new(reference).is_file() {
        ctx.load_workgraph(reference)?.id
    } else {
        reference.to_string()
    };
    let runs = RunStore::for_workgraph(ctx.root(), &workgraph_id).list()?;

    if ctx.json {
        print_json(out, &json!({ "workgraph_id": workgraph_id, "runs": runs }))?;
        return Ok(EXIT_OK);
    }
    if runs.is_empty() {
        writeln!(out, "No runs recorded for {workgraph_id}")?;
        return Ok(EXIT_OK);
    }
    for entry in &runs {
        let exit = entry
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        let mode = if entry.dry_run { "dry-run" } else { "execute" };
        writeln!(
            out,
            "{}  {:<9} {:<8} exit {exit}  started {}",
            entry.run_id,
            entry.status,
            mode,
            entry.started_at.to_rfc3339()
        )?;
    }
    Ok(EXIT_OK)
}

/// Print `err` for the operator and return the exit code it maps to
pub fn report_error(err: &anyhow::Error, json: bool, out: &mut dyn Write, stderr: &mut dyn Write) -> i32 {
    match err.downcast_ref::<WorkGraphError>() {
        Some(wg_err) => {
            if json {
                if let Ok(body) = serde_json::to_string_pretty(&wg_err.to_structured()) {
                    let _ = writeln!(out, "{body}");
                }
            }
            let _ = writeln!(stderr, "error: {}", wg_err.with_suggestion());
            wg_err.exit_code()
        }
        None => {
            let _ = writeln!(stderr, "error: {err:#}");
            EXIT_INTERNAL
        }
    }
}
