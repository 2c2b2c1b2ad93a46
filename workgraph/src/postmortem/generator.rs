//! WorkGraph authoring through a plan engine
//!
//! The engine only ever produces text. Everything it returns goes through the
//! same validation gate as hand-written documents, with exactly one repair
//! round trip when the gate rejects the first answer.

use async_trait::async_trait;
use chrono::Utc;
use ignore::WalkBuilder;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::collaborators::PlanEngine;
use crate::config::PlanConfig;
use crate::error::{Result, WorkGraphError};
use crate::ids;
use crate::schema::{Profile, RepoDiscovery, WorkGraph, SCHEMA_VERSION};
use crate::validate::{self, Violation};

static JSON_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)```").expect("valid regex"));

static ANY_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[a-zA-Z]*\s*(.*?)```").expect("valid regex"));

const SKIPPED_DIRS: [&str; 4] = ["target", "node_modules", "__pycache__", "dist"];

const MANIFESTS: [(&str, &str); 7] = [
    ("Cargo.toml", "cargo"),
    ("package.json", "npm"),
    ("pyproject.toml", "python"),
    ("setup.py", "python"),
    ("CMakeLists.txt", "cmake"),
    ("Makefile", "make"),
    ("go.mod", "go"),
];

/// What to plan for
#[derive(Debug, Clone, PartialEq)]
pub struct DecomposeRequest {
    pub goal: String,
    pub domain: String,
    pub profile: Profile,
    pub discovery: RepoDiscovery,
}

/// Pull the JSON object out of an engine response.
///
/// Tries a ```` ```json ```` fence, then any fence, then the span from the
/// first `{` to the last `}`.
pub fn extract_json(response: &str) -> Option<&str> {
    for re in [&*JSON_FENCE_RE, &*ANY_FENCE_RE] {
        if let Some(body) = re.captures(response).and_then(|c| c.get(1)) {
            let body = body.as_str().trim();
            if body.starts_with('{') {
                return Some(body);
            }
        }
    }
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (start < end).then(|| &response[start..=end])
}

fn build_prompt(request: &DecomposeRequest) -> String {
    let evidence = if request.discovery.evidence.is_empty() {
        "(none)".to_string()
    } else {
        request
            .discovery
            .evidence
            .iter()
            .map(|e| format!("- {e}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "You plan software work as a WorkGraph: phases of small tasks, each with \
         machine-checkable definition_of_done entries.\n\
         Respond with a single JSON object matching this schema and nothing else.\n\n\
         ## Schema\n{schema}\n\n\
         ## Rules\n\
         - schema_version must be \"{version}\"\n\
         - every task needs at least one definition_of_done check (kind \"command\" with cmd, or kind \"file\" with path)\n\
         - connect tasks by listing produced artifacts in outputs and consumed ones in inputs, using identical strings\n\
         - set safe_to_execute to true only for read-only or sandboxed commands\n\n\
         ## Request\n\
         domain: {domain}\n\
         profile: {profile}\n\
         goal: {goal}\n\n\
         ## Evidence\n{evidence}\n",
        schema = WorkGraph::json_schema(),
        version = SCHEMA_VERSION,
        domain = request.domain,
        profile = request.profile,
        goal = request.goal,
    )
}

fn build_repair_prompt(request: &DecomposeRequest, previous: &str, violations: &[Violation]) -> String {
    let problems = violations
        .iter()
        .map(|v| format!("- {v}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{base}\n## Previous answer\n{previous}\n\n\
         ## Problems\nThe previous answer was rejected:\n{problems}\n\n\
         Return the corrected JSON object only.\n",
        base = build_prompt(request),
    )
}

/// Authors WorkGraphs through a [`PlanEngine`]
pub struct Decomposer {
    engine: Box<dyn PlanEngine>,
}

impl Decomposer {
    pub fn new(engine: Box<dyn PlanEngine>) -> Self {
        Self { engine }
    }

    /// Ask the engine for a WorkGraph, retrying once with the violations when
    /// the first answer does not pass the gate. The result carries a fresh
    /// content-derived id.
    pub async fn decompose(&self, request: &DecomposeRequest) -> Result<WorkGraph> {
        info!(domain = %request.domain, profile = %request.profile, "Decomposing goal");
        let response = self.engine.complete(&build_prompt(request)).await?;
        match accept(&response, request) {
            Ok(wg) => Ok(wg),
            Err(violations) => {
                warn!(
                    violations = violations.len(),
                    "Generated WorkGraph rejected, requesting one repair"
                );
                let repair = build_repair_prompt(request, &response, &violations);
                let response = self.engine.complete(&repair).await?;
                accept(&response, request)
                    .map_err(|v| WorkGraphError::validation("generated WorkGraph", v))
            }
        }
    }
}

fn violation(message: impl Into<String>) -> Vec<Violation> {
    vec![Violation {
        path: "$".to_string(),
        task_id: None,
        message: message.into(),
    }]
}

fn accept(response: &str, request: &DecomposeRequest) -> std::result::Result<WorkGraph, Vec<Violation>> {
    let body = extract_json(response).ok_or_else(|| violation("response contains no JSON object"))?;
    let mut doc: Value =
        serde_json::from_str(body).map_err(|e| violation(format!("invalid JSON: {e}")))?;

    if let Some(obj) = doc.as_object_mut() {
        obj.entry("schema_version")
            .or_insert_with(|| Value::String(SCHEMA_VERSION.to_string()));
        obj.insert("domain".to_string(), Value::String(request.domain.clone()));
        obj.entry("profile")
            .or_insert_with(|| Value::String(request.profile.to_string()));
        obj.insert("id".to_string(), Value::String(String::new()));
        if !obj.contains_key("repo_discovery") {
            if let Ok(discovery) = serde_json::to_value(&request.discovery) {
                obj.insert("repo_discovery".to_string(), discovery);
            }
        }
    }

    let report = validate::validate(&doc);
    if !report.is_ok() {
        return Err(report.violations);
    }
    let mut wg: WorkGraph =
        serde_json::from_value(doc).map_err(|e| violation(e.to_string()))?;
    wg.id = ids::workgraph_id(&wg, Utc::now().date_naive());
    debug!(workgraph_id = %wg.id, tasks = wg.task_count(), "Generated WorkGraph accepted");
    Ok(wg)
}

/// Plan engine backed by an external command reading the prompt on stdin
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandEngine {
    pub fn from_command_line(line: &str, timeout: Duration) -> Result<Self> {
        let mut parts = shlex::split(line)
            .ok_or_else(|| WorkGraphError::config(format!("cannot parse engine command '{line}'")))?
            .into_iter();
        let program = parts
            .next()
            .ok_or_else(|| WorkGraphError::config("engine command is empty"))?;
        Ok(Self {
            program,
            args: parts.collect(),
            timeout,
        })
    }

    pub fn from_config(config: &PlanConfig) -> Result<Self> {
        let line = config.engine.command.as_deref().ok_or_else(|| {
            WorkGraphError::config("no plan engine configured; set WORKGRAPH_ENGINE_CMD or engine.command")
        })?;
        Self::from_command_line(line, config.engine_timeout())
    }
}

#[async_trait]
impl PlanEngine for CommandEngine {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| WorkGraphError::engine(format!("failed to start {}: {e}", self.program)))?;
        // Feed the prompt while draining output; both sit under the timeout
        let stdin = child.stdin.take();
        let feed = async move {
            match stdin {
                Some(mut stdin) => stdin.write_all(prompt.as_bytes()).await,
                None => Ok(()),
            }
        };
        let exchange = async { tokio::join!(feed, child.wait_with_output()) };

        let (fed, output) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                WorkGraphError::engine(format!(
                    "{} timed out after {}s",
                    self.program,
                    self.timeout.as_secs_f64()
                ))
            })?;
        let output =
            output.map_err(|e| WorkGraphError::engine(format!("{} failed: {e}", self.program)))?;
        if let Err(e) = fed {
            // The engine may answer without reading the whole prompt
            warn!(program = %self.program, error = %e, "Prompt not fully delivered");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.chars().rev().take(500).collect::<Vec<_>>().into_iter().rev().collect();
            return Err(WorkGraphError::engine(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                tail.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Bounded listing of a repository root (two levels deep) used as
/// generator evidence. Hidden and `.gitignore`d entries are left out.
pub fn discover_repo(root: &Path, budget: u32) -> RepoDiscovery {
    let mut evidence = Vec::new();
    let mut warnings = Vec::new();
    let mut total = 0usize;

    let walker = WalkBuilder::new(root)
        .max_depth(Some(2))
        .hidden(true)
        .git_ignore(true)
        .require_git(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(is_dir && SKIPPED_DIRS.iter().any(|d| entry.file_name() == *d))
        })
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warnings.push(format!("cannot read entry: {e}"));
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let name = entry.file_name().to_string_lossy();
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());

        total += 1;
        if evidence.len() < budget as usize {
            match (is_dir, MANIFESTS.iter().find(|(file, _)| *file == name)) {
                (true, _) => evidence.push(format!("dir: {rel}/")),
                (false, Some((_, system))) => evidence.push(format!("build: {system} ({rel})")),
                (false, None) => evidence.push(format!("file: {rel}")),
            }
        }
    }

    if total > evidence.len() {
        warnings.push(format!(
            "evidence truncated: kept {} of {total} entries",
            evidence.len()
        ));
    }
    RepoDiscovery {
        evidence,
        warnings,
        budget,
    }
}
