//! Enact: materialize a WorkGraph into Track/Phase/Task records
//!
//! Entity keys come from [`ids::entity_key`], so enacting the same WorkGraph
//! again finds the same records. Mutable fields are compared before writing
//! and only records whose content actually changes are rewritten; a repeated
//! enact of an unchanged WorkGraph touches nothing. Operator-owned fields
//! (`status`, `created_at`) are never overwritten.
//!
//! Records are written bottom-up (tasks, then phases, then the track) so a
//! parent never references a child that failed to persist.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, WorkGraphError};
use crate::ids;
use crate::schema::{Check, Profile, Task, WorkGraph};
use crate::scoring::score_task;
use crate::selection::{Selection, SelectionRole};
use crate::storage::{atomic_write_json, read_json_opt, update_json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Track,
    Phase,
    Task,
}

impl EntityKind {
    fn dir_name(&self) -> &'static str {
        match self {
            Self::Track => "tracks",
            Self::Phase => "phases",
            Self::Task => "tasks",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Track => f.write_str("track"),
            Self::Phase => f.write_str("phase"),
            Self::Task => f.write_str("task"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub key: String,
    pub workgraph_id: String,
    pub name: String,
    pub goal: String,
    pub status: String,
    /// Phase keys in enactment order
    pub phases: Vec<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub key: String,
    pub workgraph_id: String,
    pub phase_id: String,
    pub track_key: String,
    pub name: String,
    pub status: String,
    /// Task keys in enactment order
    pub tasks: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Score attached to a materialized task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreAnnotation {
    pub profile: Profile,
    pub score: f64,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<SelectionRole>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub key: String,
    pub workgraph_id: String,
    pub task_id: String,
    pub phase_key: String,
    pub title: String,
    pub description: String,
    pub score: ScoreAnnotation,
    pub safe_to_execute: bool,
    /// Operator-owned; set to `todo` on creation only
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityIndex {
    #[serde(default)]
    pub tracks: Vec<String>,
}

/// Track/Phase/Task records on disk: `<dir>/{tracks,phases,tasks}/<key>.json`
#[derive(Debug, Clone)]
pub struct EntityStore {
    dir: PathBuf,
}

impl EntityStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: EntityKind, key: &str) -> PathBuf {
        self.dir.join(kind.dir_name()).join(format!("{key}.json"))
    }

    pub fn load<T: DeserializeOwned>(&self, kind: EntityKind, key: &str) -> Result<Option<T>> {
        read_json_opt(&self.path_for(kind, key))
    }

    fn write<T: Serialize>(&self, kind: EntityKind, key: &str, record: &T) -> Result<()> {
        atomic_write_json(&self.path_for(kind, key), record)
    }

    pub fn track(&self, key: &str) -> Result<Option<TrackRecord>> {
        self.load(EntityKind::Track, key)
    }

    pub fn phase(&self, key: &str) -> Result<Option<PhaseRecord>> {
        self.load(EntityKind::Phase, key)
    }

    pub fn task(&self, key: &str) -> Result<Option<TaskRecord>> {
        self.load(EntityKind::Task, key)
    }

    /// Number of persisted records of `kind`
    pub fn count(&self, kind: EntityKind) -> usize {
        std::fs::read_dir(self.dir.join(kind.dir_name()))
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn index(&self) -> Result<EntityIndex> {
        Ok(read_json_opt(&self.dir.join("index.json"))?.unwrap_or_default())
    }

    fn register_track(&self, key: &str) -> Result<()> {
        let current = self.index()?;
        if current.tracks.iter().any(|k| k == key) {
            return Ok(());
        }
        update_json(&self.dir.join("index.json"), |index: &mut EntityIndex| {
            if !index.tracks.iter().any(|k| k == key) {
                index.tracks.push(key.to_string());
            }
        })?;
        Ok(())
    }
}

/// A record created or updated by an enactment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub key: String,
    /// Track, phase or task id inside the WorkGraph
    pub source_id: String,
}

/// A record that could not be written; the rest of the enactment continues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFailure {
    pub kind: EntityKind,
    pub key: String,
    pub source_id: String,
    pub message: String,
}

impl EntityFailure {
    pub fn to_error(&self) -> WorkGraphError {
        WorkGraphError::materialization(
            format!("{} {} ({})", self.kind, self.source_id, self.key),
            self.message.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnactmentResult {
    pub workgraph_id: String,
    pub track_key: String,
    pub dry_run: bool,
    pub created: Vec<EntityRef>,
    pub updated: Vec<EntityRef>,
    pub unchanged: Vec<EntityRef>,
    pub failures: Vec<EntityFailure>,
}

impl EnactmentResult {
    pub fn count(refs: &[EntityRef], kind: EntityKind) -> usize {
        refs.iter().filter(|r| r.kind == kind).count()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// `"3 created, 1 updated, 5 unchanged"`
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "{} created, {} updated, {} unchanged",
            self.created.len(),
            self.updated.len(),
            self.unchanged.len()
        );
        if !self.failures.is_empty() {
            line.push_str(&format!(", {} failed", self.failures.len()));
        }
        if self.dry_run {
            line.push_str(" (dry run)");
        }
        line
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnactOptions {
    pub dry_run: bool,
    /// Profile used for score annotations when no selection is given
    pub profile: Option<Profile>,
    /// Track name override
    pub track_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Created,
    Updated,
    Unchanged,
}

/// Materializes WorkGraphs into an [`EntityStore`]
pub struct Enactor {
    store: EntityStore,
}

impl Enactor {
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Materialize the selected tasks of `wg` (every task when `selection`
    /// is `None`), creating or updating the owning phases and track.
    pub fn enact(
        &self,
        wg: &WorkGraph,
        selection: Option<&Selection>,
        opts: &EnactOptions,
    ) -> EnactmentResult {
        let now = Utc::now();
        let track_local = if wg.track.id.is_empty() {
            "track"
        } else {
            wg.track.id.as_str()
        };
        let track_key = ids::entity_key(&wg.id, track_local);

        let mut result = EnactmentResult {
            workgraph_id: wg.id.clone(),
            track_key: track_key.clone(),
            dry_run: opts.dry_run,
            created: Vec::new(),
            updated: Vec::new(),
            unchanged: Vec::new(),
            failures: Vec::new(),
        };

        let profile = selection
            .map(|s| s.profile)
            .or(opts.profile)
            .unwrap_or(wg.profile);
        let wanted: Vec<&Task> = match selection {
            Some(sel) => sel.ordered_ids.iter().filter_map(|id| wg.task(id)).collect(),
            None => wg.tasks().map(|(_, t)| t).collect(),
        };

        let mut phase_keys = Vec::new();
        for phase in &wg.phases {
            let tasks: Vec<&Task> = wanted
                .iter()
                .copied()
                .filter(|t| phase.tasks.iter().any(|pt| pt.id == t.id))
                .collect();
            if tasks.is_empty() {
                continue;
            }
            let phase_key = ids::entity_key(&wg.id, &phase.id);

            let mut task_keys = Vec::new();
            for task in tasks {
                let key = ids::entity_key(&wg.id, &task.id);
                let scored = score_task(task, &wg.domain, profile);
                let desired = TaskRecord {
                    key: key.clone(),
                    workgraph_id: wg.id.clone(),
                    task_id: task.id.clone(),
                    phase_key: phase_key.clone(),
                    title: task.title.clone(),
                    description: describe_task(task),
                    score: ScoreAnnotation {
                        profile,
                        score: scored.score,
                        rationale: scored.rationale,
                        role: selection.and_then(|s| s.role_of(&task.id)),
                    },
                    safe_to_execute: task.safe_to_execute,
                    status: "todo".to_string(),
                    created_at: now,
                    updated_at: now,
                };
                let outcome = self.upsert(EntityKind::Task, &key, desired, opts.dry_run, |existing, desired| {
                    let mut merged = desired.clone();
                    merged.status = existing.status.clone();
                    merged.created_at = existing.created_at;
                    merged.updated_at = existing.updated_at;
                    merged
                });
                if record(&mut result, EntityKind::Task, &key, &task.id, outcome) {
                    task_keys.push(key);
                }
            }

            if task_keys.is_empty() {
                continue;
            }

            let desired = PhaseRecord {
                key: phase_key.clone(),
                workgraph_id: wg.id.clone(),
                phase_id: phase.id.clone(),
                track_key: track_key.clone(),
                name: phase.name.clone(),
                status: "planned".to_string(),
                tasks: task_keys,
                created_at: now,
                updated_at: now,
            };
            let outcome = self.upsert(EntityKind::Phase, &phase_key, desired, opts.dry_run, |existing, desired| {
                let mut merged = desired.clone();
                merged.tasks = union(&existing.tasks, &desired.tasks);
                merged.status = existing.status.clone();
                merged.created_at = existing.created_at;
                merged.updated_at = existing.updated_at;
                merged
            });
            if record(&mut result, EntityKind::Phase, &phase_key, &phase.id, outcome) {
                phase_keys.push(phase_key);
            }
        }

        if phase_keys.is_empty() {
            warn!(workgraph_id = %wg.id, "Nothing to enact");
            return result;
        }

        let name = opts
            .track_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| (!wg.track.name.is_empty()).then(|| wg.track.name.clone()))
            .unwrap_or_else(|| wg.goal.clone());
        let desired = TrackRecord {
            key: track_key.clone(),
            workgraph_id: wg.id.clone(),
            name,
            goal: wg.goal.clone(),
            status: "planned".to_string(),
            phases: phase_keys,
            tags: vec![wg.domain.clone(), profile.to_string()],
            created_at: now,
            updated_at: now,
        };
        let outcome = self.upsert(EntityKind::Track, &track_key, desired, opts.dry_run, |existing, desired| {
            let mut merged = desired.clone();
            merged.phases = union(&existing.phases, &desired.phases);
            merged.tags = union(&existing.tags, &desired.tags);
            merged.status = existing.status.clone();
            merged.created_at = existing.created_at;
            merged.updated_at = existing.updated_at;
            merged
        });
        let track_ok = record(&mut result, EntityKind::Track, &track_key, track_local, outcome);

        if track_ok && !opts.dry_run {
            if let Err(e) = self.store.register_track(&track_key) {
                warn!(track = %track_key, error = %e, "Failed to update entity index");
                result.failures.push(EntityFailure {
                    kind: EntityKind::Track,
                    key: track_key.clone(),
                    source_id: "index.json".to_string(),
                    message: e.to_string(),
                });
            }
        }

        info!(
            workgraph_id = %wg.id,
            track = %track_key,
            dry_run = opts.dry_run,
            created = result.created.len(),
            updated = result.updated.len(),
            unchanged = result.unchanged.len(),
            failed = result.failures.len(),
            "Enactment finished"
        );
        result
    }

    /// Create or update one record. `merge` carries operator-owned fields of
    /// the existing record into the desired one; the record is rewritten only
    /// when the merged content differs.
    fn upsert<T, F>(
        &self,
        kind: EntityKind,
        key: &str,
        desired: T,
        dry_run: bool,
        merge: F,
    ) -> Result<Change>
    where
        T: Serialize + DeserializeOwned + PartialEq + Clone + Stamped,
        F: Fn(&T, &T) -> T,
    {
        let existing: Option<T> = self.store.load(kind, key)?;
        let (record, change) = match existing {
            None => (desired, Change::Created),
            Some(existing) => {
                let merged = merge(&existing, &desired);
                if merged == existing {
                    return Ok(Change::Unchanged);
                }
                let mut merged = merged;
                merged.touch(desired.stamp());
                (merged, Change::Updated)
            }
        };
        if !dry_run {
            self.store.write(kind, key, &record)?;
            debug!(kind = %kind, key = key, change = ?change, "Entity written");
        }
        Ok(change)
    }
}

/// Records carrying an `updated_at` timestamp
trait Stamped {
    fn stamp(&self) -> DateTime<Utc>;
    fn touch(&mut self, at: DateTime<Utc>);
}

macro_rules! stamped {
    ($($ty:ty),*) => {$(
        impl Stamped for $ty {
            fn stamp(&self) -> DateTime<Utc> {
                self.updated_at
            }
            fn touch(&mut self, at: DateTime<Utc>) {
                self.updated_at = at;
            }
        }
    )*};
}

stamped!(TrackRecord, PhaseRecord, TaskRecord);

/// Record an upsert outcome; returns whether the entity now exists (or would)
fn record(
    result: &mut EnactmentResult,
    kind: EntityKind,
    key: &str,
    source_id: &str,
    outcome: Result<Change>,
) -> bool {
    let entity = EntityRef {
        kind,
        key: key.to_string(),
        source_id: source_id.to_string(),
    };
    match outcome {
        Ok(Change::Created) => result.created.push(entity),
        Ok(Change::Updated) => result.updated.push(entity),
        Ok(Change::Unchanged) => result.unchanged.push(entity),
        Err(e) => {
            warn!(kind = %kind, key = key, error = %e, "Failed to materialize entity");
            result.failures.push(EntityFailure {
                kind,
                key: key.to_string(),
                source_id: source_id.to_string(),
                message: e.to_string(),
            });
            return false;
        }
    }
    true
}

/// `existing` followed by the entries of `extra` it lacks
fn union(existing: &[String], extra: &[String]) -> Vec<String> {
    let mut merged = existing.to_vec();
    for item in extra {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

fn describe_check(check: &Check) -> String {
    match check {
        Check::Command { cmd, expect } => format!("- Run: `{cmd}` (expect: {expect})"),
        Check::File { path, expect } => format!("- File: `{path}` (expect: {expect})"),
    }
}

/// Markdown description of a task for the materialized record
pub fn describe_task(task: &Task) -> String {
    let mut lines = Vec::new();
    if !task.intent.is_empty() {
        lines.push(format!("**Intent**: {}", task.intent));
        lines.push(String::new());
    }
    lines.push("**Definition of Done**:".to_string());
    lines.extend(task.definition_of_done.iter().map(describe_check));
    if !task.verification.is_empty() {
        lines.push(String::new());
        lines.push("**Verification**:".to_string());
        lines.extend(task.verification.iter().map(describe_check));
    }
    if !task.inputs.is_empty() {
        lines.push(String::new());
        lines.push(format!("**Inputs**: {}", task.inputs.join(", ")));
    }
    if !task.outputs.is_empty() {
        lines.push(String::new());
        lines.push(format!("**Outputs**: {}", task.outputs.join(", ")));
    }
    if !task.risk.level.is_empty() || !task.risk.notes.is_empty() {
        lines.push(String::new());
        let level = if task.risk.level.is_empty() {
            "unspecified"
        } else {
            task.risk.level.as_str()
        };
        if task.risk.notes.is_empty() {
            lines.push(format!("**Risk**: {level}"));
        } else {
            lines.push(format!("**Risk**: {level}; {}", task.risk.notes));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{graph_with_phases, scored_task, task};
    use crate::selection::select;

    fn sample() -> WorkGraph {
        graph_with_phases(vec![
            (
                "P1",
                vec![
                    scored_task("A", 1, &[], &["a.out"]),
                    scored_task("B", 4, &["a.out"], &[]),
                ],
            ),
            ("P2", vec![scored_task("C", 5, &[], &[]), task("D")]),
        ])
    }

    fn files_under(dir: &Path) -> Vec<(PathBuf, String)> {
        let mut out = Vec::new();
        for kind in ["tracks", "phases", "tasks"] {
            let Ok(entries) = std::fs::read_dir(dir.join(kind)) else {
                continue;
            };
            for entry in entries.filter_map(|e| e.ok()) {
                out.push((entry.path(), std::fs::read_to_string(entry.path()).unwrap()));
            }
        }
        out.sort();
        out
    }

    #[test]
    fn test_enact_all_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let enactor = Enactor::new(EntityStore::new(dir.path()));
        let wg = sample();

        let result = enactor.enact(&wg, None, &EnactOptions::default());
        assert!(result.is_clean());
        assert_eq!(EnactmentResult::count(&result.created, EntityKind::Task), 4);
        assert_eq!(EnactmentResult::count(&result.created, EntityKind::Phase), 2);
        assert_eq!(EnactmentResult::count(&result.created, EntityKind::Track), 1);

        let track = enactor.store().track(&result.track_key).unwrap().unwrap();
        assert_eq!(track.name, wg.goal);
        assert_eq!(track.phases.len(), 2);
        assert_eq!(
            enactor.store().index().unwrap().tracks,
            vec![result.track_key.clone()]
        );

        let task = enactor
            .store()
            .task(&ids::entity_key(&wg.id, "B"))
            .unwrap()
            .unwrap();
        assert_eq!(task.status, "todo");
        assert!(task.description.contains("- Run: `true` (expect: exit 0)"));
        assert!(task.description.contains("**Inputs**: a.out"));
        assert_eq!(task.score.role, None);
    }

    #[test]
    fn test_second_enact_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let enactor = Enactor::new(EntityStore::new(dir.path()));
        let wg = sample();

        enactor.enact(&wg, None, &EnactOptions::default());
        let before = files_under(dir.path());

        let again = enactor.enact(&wg, None, &EnactOptions::default());
        assert!(again.created.is_empty());
        assert!(again.updated.is_empty());
        assert_eq!(again.unchanged.len(), 7);
        assert_eq!(files_under(dir.path()), before);
    }

    #[test]
    fn test_update_preserves_operator_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = EntityStore::new(dir.path());
        let enactor = Enactor::new(store.clone());
        let mut wg = sample();
        enactor.enact(&wg, None, &EnactOptions::default());

        let key = ids::entity_key(&wg.id, "C");
        let mut record = store.task(&key).unwrap().unwrap();
        record.status = "in_progress".to_string();
        atomic_write_json(&store.path_for(EntityKind::Task, &key), &record).unwrap();

        wg.phases[1].tasks[0].title = "Renamed".to_string();
        wg.phases[1].tasks[0].safe_to_execute = true;
        let result = enactor.enact(&wg, None, &EnactOptions::default());
        assert_eq!(result.updated.len(), 1);
        assert_eq!(result.updated[0].source_id, "C");

        let updated = store.task(&key).unwrap().unwrap();
        assert_eq!(updated.title, "Renamed");
        assert!(updated.safe_to_execute);
        assert_eq!(updated.status, "in_progress");
        assert_eq!(updated.created_at, record.created_at);
    }

    #[test]
    fn test_enact_selection_only() {
        let dir = tempfile::tempdir().unwrap();
        let enactor = Enactor::new(EntityStore::new(dir.path()));
        let wg = sample();
        let selection = select(&wg, Profile::Investor, 1);
        assert_eq!(selection.top_task_ids, vec!["C"]);

        let result = enactor.enact(&wg, Some(&selection), &EnactOptions::default());
        assert_eq!(EnactmentResult::count(&result.created, EntityKind::Task), 1);
        assert_eq!(EnactmentResult::count(&result.created, EntityKind::Phase), 1);
        let task = enactor
            .store()
            .task(&ids::entity_key(&wg.id, "C"))
            .unwrap()
            .unwrap();
        assert_eq!(task.score.role, Some(SelectionRole::Top));
        assert_eq!(task.score.profile, Profile::Investor);

        let wider = select(&wg, Profile::Investor, 2);
        let result = enactor.enact(&wg, Some(&wider), &EnactOptions::default());
        let created: Vec<&str> = result
            .created
            .iter()
            .map(|r| r.source_id.as_str())
            .collect();
        assert_eq!(created, vec!["A", "B", "P1"]);
        let track = enactor.store().track(&result.track_key).unwrap().unwrap();
        assert_eq!(
            track.phases,
            vec![ids::entity_key(&wg.id, "P2"), ids::entity_key(&wg.id, "P1")]
        );
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let enactor = Enactor::new(EntityStore::new(dir.path()));
        let result = enactor.enact(
            &sample(),
            None,
            &EnactOptions {
                dry_run: true,
                ..Default::default()
            },
        );
        assert_eq!(result.created.len(), 7);
        assert!(result.summary_line().ends_with("(dry run)"));
        assert!(files_under(dir.path()).is_empty());
        assert!(!dir.path().join("index.json").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_failure_is_per_entity() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = EntityStore::new(dir.path());
        let tasks_dir = dir.path().join("tasks");
        std::fs::create_dir_all(&tasks_dir).unwrap();
        std::fs::set_permissions(&tasks_dir, std::fs::Permissions::from_mode(0o555)).unwrap();

        // Root ignores directory permissions
        if std::fs::write(tasks_dir.join("probe"), b"x").is_ok() {
            return;
        }

        let result = Enactor::new(store).enact(&sample(), None, &EnactOptions::default());
        assert_eq!(result.failures.len(), 4);
        assert!(result
            .failures
            .iter()
            .all(|f| f.kind == EntityKind::Task));
        assert!(result.created.is_empty());
        std::fs::set_permissions(&tasks_dir, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_describe_task_sections() {
        let mut t = task("X");
        t.intent = "Make it fast".to_string();
        t.verification = vec![Check::file("bench.txt")];
        t.risk.level = "high".to_string();
        t.risk.notes = "touches the allocator".to_string();
        let text = describe_task(&t);
        assert_eq!(
            text,
            "**Intent**: Make it fast\n\n**Definition of Done**:\n- Run: `true` (expect: exit 0)\n\n**Verification**:\n- File: `bench.txt` (expect: exists)\n\n**Risk**: high; touches the allocator"
        );
    }
}
