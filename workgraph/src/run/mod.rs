//! Execution and the run record
//!
//! [`runner`] drives a plan; [`store`] owns the on-disk run directory;
//! [`record`] holds the types written there.

pub mod record;
pub mod runner;
pub mod store;

pub use record::{FailureArtifact, RunEvent, RunMeta, RunStatus, RunSummary, TaskOutcome, TaskStatus};
pub use runner::{ExecutionPlan, PlannedTask, RunOptions, RunReport, Runner};
pub use store::{locate, RunHandle, RunStore};
