//! WorkGraph lifecycle engine
//!
//! Turns a goal into a graph of verifiable tasks and carries it through:
//! - validation gate for candidate documents
//! - deterministic scoring under three profiles
//! - top-N selection with dependency closure and topological order
//! - idempotent materialization into Track/Phase/Task records
//! - sequential execution into an append-only run record
//! - postmortem: bounded failure capture, log scan, deduplicated issues,
//!   and re-decomposition of the failures into a new WorkGraph
//!
//! # Usage
//!
//! ```ignore
//! use workgraph::{select, ExecutionPlan, Profile, RunOptions, Runner, WorkGraphStore};
//!
//! let wg = WorkGraphStore::new(".workgraph").resolve("plan.json")?;
//! let selection = select(&wg, Profile::Investor, 5);
//! let plan = ExecutionPlan::from_selection(&wg, &selection)?;
//! let report = Runner::new(".workgraph").run(&plan, &RunOptions::default()).await?;
//! std::process::exit(report.exit_code());
//! ```

pub mod config;
pub mod error;
pub mod ids;
pub mod materialize;
pub mod postmortem;
pub mod run;
pub mod schema;
pub mod scoring;
pub mod selection;
pub mod storage;
pub mod validate;

#[cfg(test)]
mod fixtures;

pub use config::PlanConfig;
pub use error::{Result, StructuredError, WorkGraphError};
pub use materialize::{EnactOptions, EnactmentResult, Enactor, EntityStore};
pub use postmortem::{
    CommandEngine, Decomposer, LocalIssueTracker, LocalLogScanner, Postmortem,
    PostmortemOptions, PostmortemResult,
};
pub use run::{ExecutionPlan, RunOptions, RunReport, Runner};
pub use schema::{Check, Phase, Profile, Task, WorkGraph};
pub use scoring::{rank, score_task, ScoredTask};
pub use selection::{select, Selection};
pub use storage::WorkGraphStore;
pub use validate::{validate, ValidationReport, Violation};
