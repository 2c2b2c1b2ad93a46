//! Durable JSON storage
//!
//! Every shared document is replaced atomically: write a uniquely named temp
//! file beside the target, fsync it, rename it over the target, fsync the
//! directory. Concurrent writers never produce a torn file; the last rename
//! wins.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Result, WorkGraphError};
use crate::schema::{Profile, WorkGraph};
use crate::validate;

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

fn write_temp(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| WorkGraphError::storage(parent, e))?;
    }
    let tmp = temp_sibling(path);
    let mut file = fs::File::create(&tmp).map_err(|e| WorkGraphError::storage(&tmp, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| WorkGraphError::storage(&tmp, e))?;
    Ok(tmp)
}

/// Atomically replace `path` with `bytes`
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = write_temp(path, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(WorkGraphError::storage(path, e));
    }
    sync_parent(path);
    Ok(())
}

/// Atomically replace `path` with pretty-printed JSON
pub fn atomic_write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    atomic_write_bytes(path, &bytes)
}

/// Create `path` with JSON content, failing if it already exists.
///
/// The content is fully written to a temp file and then hard-linked into
/// place, so readers see either nothing or the complete document.
pub fn write_once_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<bool> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    let tmp = write_temp(path, &bytes)?;
    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);
    match linked {
        Ok(()) => {
            sync_parent(path);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(WorkGraphError::storage(path, e)),
    }
}

/// Read a JSON document. Unparseable content is corrupt state.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| WorkGraphError::storage(path, e))?;
    serde_json::from_str(&content).map_err(|e| {
        WorkGraphError::internal(format!("corrupt document {}: {e}", path.display()))
    })
}

/// Read a JSON document if it exists
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

/// Read-modify-replace a shared document, starting from `T::default()` when
/// it does not exist yet.
pub fn update_json<T, F>(path: &Path, mutate: F) -> Result<T>
where
    T: DeserializeOwned + Serialize + Default,
    F: FnOnce(&mut T),
{
    let mut doc: T = read_json_opt(path)?.unwrap_or_default();
    mutate(&mut doc);
    atomic_write_json(path, &doc)?;
    Ok(doc)
}

// ============================================================================
// WorkGraph store
// ============================================================================

/// One line of the WorkGraph index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkGraphIndexEntry {
    pub id: String,
    pub goal: String,
    pub domain: String,
    pub profile: Profile,
    pub task_count: usize,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkGraphIndex {
    #[serde(default)]
    pub workgraphs: Vec<WorkGraphIndexEntry>,
}

/// Saved WorkGraphs under `<root>/workgraphs`.
///
/// Documents are validated on the way in and on the way out; a stored
/// document that no longer passes the gate is reported, not silently used.
#[derive(Debug, Clone)]
pub struct WorkGraphStore {
    dir: PathBuf,
}

impl WorkGraphStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            dir: root.as_ref().join("workgraphs"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Directory holding the runs of one WorkGraph
    pub fn runs_dir(&self, id: &str) -> PathBuf {
        self.dir.join(id).join("runs")
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.json")
    }

    /// Persist `wg` (which must carry its id) and record it in the index
    pub fn save(&self, wg: &WorkGraph) -> Result<PathBuf> {
        if wg.id.is_empty() {
            return Err(WorkGraphError::internal(
                "refusing to save a WorkGraph without an id",
            ));
        }
        let report = validate::validate_workgraph(wg);
        if !report.is_ok() {
            return Err(WorkGraphError::validation(
                format!("WorkGraph {}", wg.id),
                report.violations,
            ));
        }

        let path = self.path_for(&wg.id);
        atomic_write_json(&path, wg)?;

        let entry = WorkGraphIndexEntry {
            id: wg.id.clone(),
            goal: wg.goal.clone(),
            domain: wg.domain.clone(),
            profile: wg.profile,
            task_count: wg.task_count(),
            saved_at: Utc::now(),
        };
        update_json(&self.index_path(), |index: &mut WorkGraphIndex| {
            match index.workgraphs.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry,
                None => index.workgraphs.push(entry),
            }
        })?;

        info!(workgraph_id = %wg.id, path = %path.display(), "WorkGraph saved");
        Ok(path)
    }

    pub fn load(&self, id: &str) -> Result<WorkGraph> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(WorkGraphError::workgraph_not_found(id));
        }
        load_file(&path)
    }

    /// Resolve a WorkGraph reference: an existing file path, or a stored id
    pub fn resolve(&self, reference: &str) -> Result<WorkGraph> {
        let candidate = Path::new(reference);
        if candidate.is_file() {
            debug!(path = %candidate.display(), "Loading WorkGraph from file");
            return load_file(candidate);
        }
        self.load(reference)
    }

    pub fn list(&self) -> Result<Vec<WorkGraphIndexEntry>> {
        Ok(read_json_opt::<WorkGraphIndex>(&self.index_path())?
            .unwrap_or_default()
            .workgraphs)
    }
}

/// Load and gate-check a WorkGraph document from disk
pub fn load_file(path: &Path) -> Result<WorkGraph> {
    let content = fs::read_to_string(path).map_err(|e| WorkGraphError::storage(path, e))?;
    let doc: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        WorkGraphError::validation(
            path.display().to_string(),
            vec![validate::Violation {
                path: "$".to_string(),
                task_id: None,
                message: format!("invalid JSON: {e}"),
            }],
        )
    })?;
    validate::parse(&doc, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{graph_with, task};

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        atomic_write_json(&path, &serde_json::json!({"v": 1})).unwrap();
        atomic_write_json(&path, &serde_json::json!({"v": 2})).unwrap();

        let value: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(value["v"], 2);
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_once_refuses_second_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        assert!(write_once_json(&path, &serde_json::json!({"n": 1})).unwrap());
        assert!(!write_once_json(&path, &serde_json::json!({"n": 2})).unwrap());
        let value: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn test_corrupt_document_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        fs::write(&path, "{not json").unwrap();
        let err = read_json::<WorkGraphIndex>(&path).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_INTERNAL);
    }

    #[test]
    fn test_update_json_upserts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.json");
        for _ in 0..3 {
            update_json(&path, |v: &mut Vec<u32>| v.push(v.len() as u32)).unwrap();
        }
        let v: Vec<u32> = read_json(&path).unwrap();
        assert_eq!(v, vec![0, 1, 2]);
    }

    #[test]
    fn test_store_save_load_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkGraphStore::new(dir.path());
        let mut t = task("T-1");
        t.safe_to_execute = true;
        let wg = graph_with(vec![t]);

        let path = store.save(&wg).unwrap();
        assert!(path.ends_with("workgraphs/wg-20250314-0badc0de.json"));
        store.save(&wg).unwrap();

        let loaded = store.load(&wg.id).unwrap();
        assert_eq!(loaded, wg);
        assert_eq!(store.resolve(path.to_str().unwrap()).unwrap(), wg);

        let index = store.list().unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].task_count, 1);

        let err = store.load("wg-20250314-ffffffff").unwrap_err();
        assert!(matches!(err, WorkGraphError::WorkGraphNotFound { .. }));
    }

    #[test]
    fn test_store_rejects_invalid_graph() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkGraphStore::new(dir.path());
        let mut t = task("T-1");
        t.definition_of_done.clear();
        let err = store.save(&graph_with(vec![t])).unwrap_err();
        assert!(matches!(err, WorkGraphError::Validation { .. }));
        assert!(!store.path_for("wg-20250314-0badc0de").exists());
    }
}
