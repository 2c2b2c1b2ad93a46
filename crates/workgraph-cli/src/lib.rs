//! `wgplan`: operator commands for the WorkGraph lifecycle engine
//!
//! ```bash
//! wgplan decompose "Add offline mode" --profile purpose
//! wgplan recommend wg-20250314-1a2b3c4d --top 5 --profile investor
//! wgplan sprint wg-20250314-1a2b3c4d --top 5 --execute
//! wgplan postmortem run-20250314-5e6f7a8b --execute --decompose
//! ```
//!
//! Exit codes: 0 success, 1 task failures, 2 validation or gate failure,
//! 3 internal error.

pub mod cli;
pub mod commands;
pub mod telemetry;

pub use cli::Cli;
pub use commands::{execute, report_error};
