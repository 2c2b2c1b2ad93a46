//! Error types for the WorkGraph lifecycle
//!
//! Every failure names the offending task, field, run or entity and, where
//! one exists, the next command an operator should run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::validate::Violation;

/// Result type alias for lifecycle operations
pub type Result<T> = std::result::Result<T, WorkGraphError>;

/// Process exit code for a clean run
pub const EXIT_OK: i32 = 0;
/// Process exit code when one or more tasks failed or timed out
pub const EXIT_TASK_FAILURES: i32 = 1;
/// Process exit code for validation and gate failures
pub const EXIT_GATE_FAILURE: i32 = 2;
/// Process exit code for internal errors and corrupt state
pub const EXIT_INTERNAL: i32 = 3;

// ============================================================================
// Structured Error Response
// ============================================================================

/// Machine-readable error report, emitted by the CLI under `--json`.
///
/// ```json
/// {
///   "code": "RUN_NOT_FOUND",
///   "message": "Run not found: run-20250101-0a1b2c3d",
///   "recovery_action": "List known runs with `wgplan runs <workgraph-id>`",
///   "context": { "run_id": "run-20250101-0a1b2c3d" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Machine-readable error code (e.g. "VALIDATION_FAILED")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// The next thing to do, usually a concrete command
    pub recovery_action: String,

    /// Identifiers of the offending run, task or field
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Whether retrying the same command may succeed
    #[serde(default)]
    pub retryable: bool,

    /// Exit code the CLI terminates with
    pub exit_code: i32,
}

impl StructuredError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        recovery_action: impl Into<String>,
        exit_code: i32,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recovery_action: recovery_action.into(),
            context: HashMap::new(),
            retryable: false,
            exit_code,
        }
    }

    /// Add context key-value pair
    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for StructuredError {}

/// Errors raised across validation, selection, enactment, execution and
/// postmortem.
#[derive(Error, Debug)]
pub enum WorkGraphError {
    /// Document rejected by the validation gate
    #[error("{subject} failed validation with {} violation(s)", violations.len())]
    Validation {
        subject: String,
        violations: Vec<Violation>,
    },

    #[error("WorkGraph not found: {reference}")]
    WorkGraphNotFound { reference: String },

    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Task not found in WorkGraph {workgraph_id}: {task_id}")]
    TaskNotFound {
        workgraph_id: String,
        task_id: String,
    },

    /// The run already has a final summary and can no longer be written to
    #[error("Run {run_id} is already finalized")]
    RunFinalized { run_id: String },

    /// Resume refused because the WorkGraph content changed since the run started
    #[error(
        "Run {run_id} was started against WorkGraph hash {expected}, current content hashes to {actual}"
    )]
    ResumeMismatch {
        run_id: String,
        expected: String,
        actual: String,
    },

    /// A single Track/Phase/Task entity could not be written
    #[error("Failed to materialize {entity}: {message}")]
    Materialization { entity: String, message: String },

    /// The plan engine (AI generator) failed or produced nothing usable
    #[error("Plan engine error: {message}")]
    Engine { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Persisted state is corrupt or inconsistent
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkGraphError {
    pub fn validation(subject: impl Into<String>, violations: Vec<Violation>) -> Self {
        Self::Validation {
            subject: subject.into(),
            violations,
        }
    }

    pub fn workgraph_not_found(reference: impl Into<String>) -> Self {
        Self::WorkGraphNotFound {
            reference: reference.into(),
        }
    }

    pub fn run_not_found(run_id: impl Into<String>) -> Self {
        Self::RunNotFound {
            run_id: run_id.into(),
        }
    }

    pub fn materialization(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Materialization {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap an IO error with the path it happened on
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Exit code the command surface terminates with for this error.
    ///
    /// Inputs rejected before any work happens (invalid documents, unknown
    /// ids, bad configuration, refused resumes) are gate failures. Everything
    /// else is internal.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. }
            | Self::WorkGraphNotFound { .. }
            | Self::RunNotFound { .. }
            | Self::TaskNotFound { .. }
            | Self::RunFinalized { .. }
            | Self::ResumeMismatch { .. }
            | Self::Config { .. } => EXIT_GATE_FAILURE,
            Self::Materialization { .. }
            | Self::Engine { .. }
            | Self::Internal { .. }
            | Self::Storage { .. }
            | Self::Io(_)
            | Self::Json(_) => EXIT_INTERNAL,
        }
    }

    /// Check if this error is transient
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Engine { message } => {
                let lower = message.to_lowercase();
                lower.contains("timed out") || lower.contains("connection")
            }
            Self::Io(e) | Self::Storage { source: e, .. } => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Next step for the operator, naming the exact command where one applies
    pub fn recovery_suggestion(&self) -> String {
        match self {
            Self::Validation { violations, .. } => match violations.first() {
                Some(first) => format!(
                    "Fix `{}` (and any other listed fields), then re-check with `wgplan validate <file>`",
                    first.path
                ),
                None => "Re-check the document with `wgplan validate <file>`".to_string(),
            },
            Self::WorkGraphNotFound { reference } => format!(
                "No WorkGraph matches '{reference}'. Pass a file path or create one with `wgplan decompose \"<goal>\"`"
            ),
            Self::RunNotFound { .. } => {
                "List known runs with `wgplan runs <workgraph-id>`".to_string()
            }
            Self::TaskNotFound { workgraph_id, .. } => {
                format!("List task ids with `wgplan score {workgraph_id}`")
            }
            Self::RunFinalized { run_id } => format!(
                "Start a new run, or inspect this one with `wgplan postmortem {run_id}`"
            ),
            Self::ResumeMismatch { .. } => {
                "The WorkGraph changed; start a fresh run with `wgplan run <workgraph-id> --execute`"
                    .to_string()
            }
            Self::Materialization { .. } => {
                "Check permissions on the tracks directory, then re-run `wgplan enact`; existing entities are updated in place"
                    .to_string()
            }
            Self::Engine { .. } => {
                "Check `engine.command` in the config (or WORKGRAPH_ENGINE_CMD) and retry `wgplan decompose`"
                    .to_string()
            }
            Self::Config { .. } => {
                "Check the config file and WORKGRAPH_* environment variables".to_string()
            }
            Self::Internal { .. } => {
                "State on disk is inconsistent. Inspect the named file; nothing further was written"
                    .to_string()
            }
            Self::Storage { source, .. } | Self::Io(source) => match source.kind() {
                std::io::ErrorKind::NotFound => {
                    "File or directory not found. Check the path exists.".to_string()
                }
                std::io::ErrorKind::PermissionDenied => {
                    "Permission denied. Check file permissions: ls -la <path>".to_string()
                }
                _ => "IO error occurred. Check disk space and file permissions.".to_string(),
            },
            Self::Json(_) => "JSON parsing failed. Validate the document syntax.".to_string(),
        }
    }

    /// Error rendered with its recovery line
    pub fn with_suggestion(&self) -> String {
        format!("{}\n\nNext: {}", self, self.recovery_suggestion())
    }

    /// Convert to the structured, machine-readable form
    pub fn to_structured(&self) -> StructuredError {
        let code = match self {
            Self::Validation { .. } => "VALIDATION_FAILED",
            Self::WorkGraphNotFound { .. } => "WORKGRAPH_NOT_FOUND",
            Self::RunNotFound { .. } => "RUN_NOT_FOUND",
            Self::TaskNotFound { .. } => "TASK_NOT_FOUND",
            Self::RunFinalized { .. } => "RUN_FINALIZED",
            Self::ResumeMismatch { .. } => "RESUME_MISMATCH",
            Self::Materialization { .. } => "MATERIALIZATION_FAILED",
            Self::Engine { .. } => "ENGINE_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
            Self::Storage { .. } | Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_PARSE_ERROR",
        };

        let mut structured = StructuredError::new(
            code,
            self.to_string(),
            self.recovery_suggestion(),
            self.exit_code(),
        );

        match self {
            Self::Validation { violations, .. } => {
                let rendered: Vec<serde_json::Value> = violations
                    .iter()
                    .map(|v| serde_json::json!({"path": v.path, "task_id": v.task_id, "message": v.message}))
                    .collect();
                structured = structured.with_context("violations", rendered);
            }
            Self::RunNotFound { run_id }
            | Self::RunFinalized { run_id }
            | Self::ResumeMismatch { run_id, .. } => {
                structured = structured.with_context("run_id", run_id.clone());
            }
            Self::TaskNotFound {
                workgraph_id,
                task_id,
            } => {
                structured = structured
                    .with_context("workgraph_id", workgraph_id.clone())
                    .with_context("task_id", task_id.clone());
            }
            Self::Materialization { entity, .. } => {
                structured = structured.with_context("entity", entity.clone());
            }
            Self::Storage { path, .. } => {
                structured = structured.with_context("path", path.display().to_string());
            }
            _ => {}
        }

        if self.is_retryable() {
            structured = structured.retryable();
        }

        structured
    }
}
