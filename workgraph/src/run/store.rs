//! Run directories
//!
//! ```text
//! <root>/workgraphs/<wg_id>/runs/index.json
//! <root>/workgraphs/<wg_id>/runs/<run_id>/meta.json
//! <root>/workgraphs/<wg_id>/runs/<run_id>/events.jsonl
//! <root>/workgraphs/<wg_id>/runs/<run_id>/summary.json
//! <root>/workgraphs/<wg_id>/runs/<run_id>/artifacts/<task_id>.json
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use super::record::{EventLine, FailureArtifact, RunEvent, RunMeta, RunStatus, RunSummary};
use crate::error::{Result, WorkGraphError};
use crate::ids;
use crate::storage::{atomic_write_json, read_json, read_json_opt, update_json, write_once_json};

/// Entry in a WorkGraph's run index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIndexEntry {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl From<&RunMeta> for RunIndexEntry {
    fn from(meta: &RunMeta) -> Self {
        Self {
            run_id: meta.run_id.clone(),
            started_at: meta.started_at,
            completed_at: meta.completed_at,
            status: meta.status,
            dry_run: meta.dry_run,
            exit_code: meta.exit_code,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIndex {
    #[serde(default)]
    pub runs: Vec<RunIndexEntry>,
}

/// The runs of one WorkGraph
#[derive(Debug, Clone)]
pub struct RunStore {
    runs_dir: PathBuf,
}

impl RunStore {
    pub fn new(runs_dir: impl AsRef<Path>) -> Self {
        Self {
            runs_dir: runs_dir.as_ref().to_path_buf(),
        }
    }

    /// Run store of `workgraph_id` under the state root
    pub fn for_workgraph(root: &Path, workgraph_id: &str) -> Self {
        Self::new(root.join("workgraphs").join(workgraph_id).join("runs"))
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    fn index_path(&self) -> PathBuf {
        self.runs_dir.join("index.json")
    }

    /// Create the directory for a new run and write its initial metadata
    pub fn create(&self, meta: &RunMeta) -> Result<RunHandle> {
        let dir = self.runs_dir.join(&meta.run_id);
        std::fs::create_dir_all(&self.runs_dir)
            .map_err(|e| WorkGraphError::storage(&self.runs_dir, e))?;
        std::fs::create_dir(&dir).map_err(|e| WorkGraphError::storage(&dir, e))?;
        let handle = RunHandle {
            run_id: meta.run_id.clone(),
            dir,
        };
        handle.write_meta(meta)?;
        self.record(meta)?;
        Ok(handle)
    }

    /// Open an existing run of this WorkGraph
    pub fn open(&self, run_id: &str) -> Result<RunHandle> {
        let dir = self.runs_dir.join(run_id);
        if !dir.join("meta.json").exists() {
            return Err(WorkGraphError::run_not_found(run_id));
        }
        Ok(RunHandle {
            run_id: run_id.to_string(),
            dir,
        })
    }

    /// Upsert the index entry for `meta`
    pub fn record(&self, meta: &RunMeta) -> Result<()> {
        let entry = RunIndexEntry::from(meta);
        update_json(&self.index_path(), |index: &mut RunIndex| {
            match index.runs.iter_mut().find(|r| r.run_id == entry.run_id) {
                Some(existing) => *existing = entry,
                None => index.runs.push(entry),
            }
        })?;
        Ok(())
    }

    /// Runs in start order
    pub fn list(&self) -> Result<Vec<RunIndexEntry>> {
        let mut runs = read_json_opt::<RunIndex>(&self.index_path())?
            .unwrap_or_default()
            .runs;
        runs.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(runs)
    }

    pub fn latest(&self) -> Result<Option<RunIndexEntry>> {
        Ok(self.list()?.pop())
    }
}

/// Find a run by id across every WorkGraph under `root`.
///
/// Returns the WorkGraph id together with the handle.
pub fn locate(root: &Path, run_id: &str) -> Result<(String, RunHandle)> {
    if !ids::is_run_id(run_id) {
        return Err(WorkGraphError::run_not_found(run_id));
    }
    let workgraphs = root.join("workgraphs");
    let entries = match std::fs::read_dir(&workgraphs) {
        Ok(entries) => entries,
        Err(_) => return Err(WorkGraphError::run_not_found(run_id)),
    };
    let mut matches: Vec<(String, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .map(|e| {
            (
                e.file_name().to_string_lossy().to_string(),
                e.path().join("runs").join(run_id),
            )
        })
        .filter(|(_, dir)| dir.join("meta.json").exists())
        .collect();
    matches.sort();
    match matches.len() {
        0 => Err(WorkGraphError::run_not_found(run_id)),
        1 => {
            let (wg_id, dir) = matches.remove(0);
            Ok((
                wg_id,
                RunHandle {
                    run_id: run_id.to_string(),
                    dir,
                },
            ))
        }
        n => Err(WorkGraphError::internal(format!(
            "run id {run_id} exists under {n} WorkGraphs"
        ))),
    }
}

/// One run directory
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: String,
    dir: PathBuf,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join("meta.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.dir.join("events.jsonl")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join("summary.json")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir.join("artifacts")
    }

    /// Sibling directory owned by postmortem
    pub fn postmortem_dir(&self) -> PathBuf {
        let parent = self.dir.parent().unwrap_or(&self.dir);
        parent.join(format!("postmortem-{}", self.run_id))
    }

    pub fn is_finalized(&self) -> bool {
        self.summary_path().exists()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_finalized() {
            return Err(WorkGraphError::RunFinalized {
                run_id: self.run_id.clone(),
            });
        }
        Ok(())
    }

    /// Append one event line
    pub fn append(&self, event: RunEvent) -> Result<()> {
        self.ensure_open()?;
        let line = serde_json::to_string(&EventLine::now(event))?;
        let path = self.events_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| WorkGraphError::storage(&path, e))?;
        writeln!(file, "{line}").map_err(|e| WorkGraphError::storage(&path, e))?;
        Ok(())
    }

    /// All readable events. A torn final line (interrupted write) is skipped.
    pub fn events(&self) -> Result<Vec<EventLine>> {
        let path = self.events_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path).map_err(|e| WorkGraphError::storage(&path, e))?;
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<std::io::Result<_>>()
            .map_err(|e| WorkGraphError::storage(&path, e))?;

        let last = lines.len().saturating_sub(1);
        let mut events = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(event) => events.push(event),
                Err(e) if i == last => {
                    warn!(run_id = %self.run_id, error = %e, "Ignoring torn trailing event line");
                }
                Err(e) => {
                    return Err(WorkGraphError::internal(format!(
                        "corrupt event at {}:{}: {e}",
                        path.display(),
                        i + 1
                    )))
                }
            }
        }
        Ok(events)
    }

    pub fn meta(&self) -> Result<RunMeta> {
        read_json(&self.meta_path())
    }

    pub fn write_meta(&self, meta: &RunMeta) -> Result<()> {
        self.ensure_open()?;
        atomic_write_json(&self.meta_path(), meta)
    }

    pub fn summary(&self) -> Result<Option<RunSummary>> {
        read_json_opt(&self.summary_path())
    }

    pub fn write_artifact(&self, artifact: &FailureArtifact) -> Result<()> {
        self.ensure_open()?;
        let file = format!("{}.json", ids::file_safe(&artifact.task_id));
        atomic_write_json(&self.artifacts_dir().join(file), artifact)
    }

    /// Stored artifacts ordered by task id, at most `max`
    pub fn artifacts(&self, max: usize) -> Result<Vec<FailureArtifact>> {
        let dir = self.artifacts_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WorkGraphError::storage(&dir, e)),
        };
        let mut artifacts = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                artifacts.push(read_json::<FailureArtifact>(&path)?);
            }
        }
        artifacts.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        artifacts.truncate(max);
        Ok(artifacts)
    }

    /// Write the summary and final metadata. Fails if the run was already
    /// finalized; nothing in the run directory changes afterwards.
    pub fn finalize(&self, summary: &RunSummary, meta: &RunMeta) -> Result<()> {
        self.ensure_open()?;
        atomic_write_json(&self.meta_path(), meta)?;
        if !write_once_json(&self.summary_path(), summary)? {
            return Err(WorkGraphError::RunFinalized {
                run_id: self.run_id.clone(),
            });
        }
        Ok(())
    }
}
