//! Command-line surface of `wgplan`

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use workgraph::Profile;

#[derive(Parser, Debug)]
#[command(name = "wgplan", author, version, about = "Plan, prioritize, run and learn from WorkGraphs", long_about = None)]
pub struct Cli {
    /// State directory (overrides storage.root and WORKGRAPH_ROOT)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Config file (defaults to .workgraph/config.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    /// Increase log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Turn a goal into a WorkGraph through the configured plan engine
    Decompose {
        goal: String,
        #[arg(long, default_value = "software")]
        domain: String,
        #[arg(long)]
        profile: Option<Profile>,
        /// Repository to collect evidence from (defaults to the current directory)
        #[arg(long)]
        repo: Option<PathBuf>,
        #[arg(long)]
        evidence_budget: Option<u32>,
    },

    /// Check a WorkGraph document against the validation gate
    Validate {
        file: PathBuf,
        /// Import the document into the WorkGraph store
        #[arg(long, default_value_t = false)]
        save: bool,
    },

    /// Score and rank every task
    Score {
        /// WorkGraph id or path to a WorkGraph file
        workgraph: String,
        #[arg(long)]
        profile: Option<Profile>,
    },

    /// Show the top-N selection with its dependency closure
    Recommend {
        workgraph: String,
        #[arg(long)]
        profile: Option<Profile>,
        #[arg(long)]
        top: Option<usize>,
    },

    /// Materialize a WorkGraph into Track/Phase/Task records
    Enact {
        workgraph: String,
        #[arg(long)]
        profile: Option<Profile>,
        /// Only the top-N selection and its dependencies (default: every task)
        #[arg(long)]
        top: Option<usize>,
        /// Output directory for records (defaults to <root>/tracks)
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Select, enact and run in one step
    Sprint {
        workgraph: String,
        #[arg(long)]
        profile: Option<Profile>,
        #[arg(long)]
        top: Option<usize>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Execute (or preview) the tasks of a WorkGraph
    Run {
        workgraph: String,
        #[arg(long)]
        profile: Option<Profile>,
        /// Only the top-N selection and its dependencies (default: every task)
        #[arg(long)]
        top: Option<usize>,
        /// Continue an interrupted run
        #[arg(long)]
        resume: Option<String>,
        #[command(flatten)]
        exec: ExecArgs,
    },

    /// Analyse a finished run: scan failures, file issues, plan fixes
    Postmortem {
        run_id: String,
        /// Perform the steps; without this only a preview is shown
        #[arg(long, default_value_t = false)]
        execute: bool,
        /// Skip issue creation
        #[arg(long, default_value_t = false)]
        no_issues: bool,
        /// Generate a fix WorkGraph from the failures
        #[arg(long, default_value_t = false)]
        decompose: bool,
        #[arg(long)]
        profile: Option<Profile>,
    },

    /// List the runs of a WorkGraph
    Runs { workgraph: String },
}

/// Execution flags shared by `run` and `sprint`
#[derive(Args, Debug, Clone, Default)]
pub struct ExecArgs {
    /// Really run commands (the default is a dry run)
    #[arg(long, default_value_t = false, conflicts_with = "dry_run")]
    pub execute: bool,
    /// Preview checks without running them
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
    /// Skip dependencies pulled in by the closure
    #[arg(long, default_value_t = false)]
    pub only_top: bool,
    /// Task ids to skip
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,
    /// Per-command timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Stop scheduling after this many executed tasks
    #[arg(long)]
    pub max_steps: Option<usize>,
    /// Working directory for task commands
    #[arg(long)]
    pub cwd: Option<PathBuf>,
}
