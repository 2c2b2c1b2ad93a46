//! Postmortem: failed run → synthetic log → scan → issues → new WorkGraph

pub mod collaborators;
pub mod generator;
pub mod issues;
pub mod pipeline;
pub mod scanner;

pub use collaborators::{Finding, IngestReport, IssueTracker, LogScanner, PlanEngine, ScanResult};
pub use generator::{discover_repo, CommandEngine, DecomposeRequest, Decomposer};
pub use issues::{Issue, LocalIssueTracker};
pub use pipeline::{Postmortem, PostmortemOptions, PostmortemResult};
pub use scanner::LocalLogScanner;
