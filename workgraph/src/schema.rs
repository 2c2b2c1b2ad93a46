//! WorkGraph data model
//!
//! Field names are part of the on-disk and generator contract and must not be
//! renamed. Optional scoring dimensions stay `None` when absent so the scoring
//! engine can tell declared values from inferred ones.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The only schema version this crate reads and writes
pub const SCHEMA_VERSION: &str = "v1";

/// Domain value that marks a WorkGraph as issue-fixing work
pub const ISSUES_DOMAIN: &str = "issues";

/// Scoring profile: which dimensions a ranking rewards.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Rewards impact, penalises effort and risk twice over
    Investor,
    /// Rewards purpose (user value, documentation, accessibility)
    Purpose,
    #[default]
    Default,
}

impl Profile {
    pub const ALL: [Profile; 3] = [Profile::Investor, Profile::Purpose, Profile::Default];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Investor => "investor",
            Self::Purpose => "purpose",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown profile name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown profile '{0}' (expected investor, purpose or default)")]
pub struct ParseProfileError(pub String);

impl FromStr for Profile {
    type Err = ParseProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "investor" => Ok(Self::Investor),
            "purpose" => Ok(Self::Purpose),
            "default" => Ok(Self::Default),
            other => Err(ParseProfileError(other.to_string())),
        }
    }
}

/// A persisted plan: goal, evidence, and phased tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkGraph {
    pub schema_version: String,
    /// `wg-<YYYYMMDD>-<8 hex>`; empty until assigned
    #[serde(default)]
    pub id: String,
    pub domain: String,
    #[serde(default)]
    pub profile: Profile,
    pub goal: String,
    #[serde(default)]
    pub repo_discovery: RepoDiscovery,
    #[serde(default)]
    pub track: TrackSpec,
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub stop_conditions: Vec<String>,
}

/// Bounded evidence gathered before decomposition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RepoDiscovery {
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Maximum number of evidence entries collected
    #[serde(default)]
    pub budget: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TrackSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub goal: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Phase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// A unit of verifiable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub intent: String,
    /// Completion checks; at least one is required
    pub definition_of_done: Vec<Check>,
    #[serde(default)]
    pub verification: Vec<Check>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub risk: RiskNote,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<Effort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<u8>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Unsafe tasks are never executed, only previewed
    #[serde(default)]
    pub safe_to_execute: bool,
}

impl Task {
    /// Definition-of-done checks followed by verification checks
    pub fn checks(&self) -> impl Iterator<Item = &Check> {
        self.definition_of_done.iter().chain(self.verification.iter())
    }

    /// Lowercased tags
    pub fn tag_set(&self) -> std::collections::BTreeSet<String> {
        self.tags.iter().map(|t| t.trim().to_lowercase()).collect()
    }
}

/// A single completion or verification check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Check {
    /// Shell command; `expect` is `exit <code>`
    Command {
        cmd: String,
        #[serde(default = "default_command_expect")]
        expect: String,
    },
    /// File on disk; `expect` is `exists`, `absent` or `contains <text>`
    File {
        path: String,
        #[serde(default = "default_file_expect")]
        expect: String,
    },
}

fn default_command_expect() -> String {
    "exit 0".to_string()
}

fn default_file_expect() -> String {
    "exists".to_string()
}

impl Check {
    pub fn command(cmd: impl Into<String>) -> Self {
        Self::Command {
            cmd: cmd.into(),
            expect: default_command_expect(),
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::File {
            path: path.into(),
            expect: default_file_expect(),
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(self, Self::Command { .. })
    }

    pub fn expect(&self) -> &str {
        match self {
            Self::Command { expect, .. } | Self::File { expect, .. } => expect,
        }
    }

    /// One-line description used in events, artifacts and logs
    pub fn describe(&self) -> String {
        match self {
            Self::Command { cmd, expect } => format!("run `{cmd}` (expect: {expect})"),
            Self::File { path, expect } => format!("file `{path}` (expect: {expect})"),
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RiskNote {
    /// `low`, `medium` or `high`
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub notes: String,
}

/// Effort: a 0–5 bucket, or an estimate in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Effort {
    Bucket(u8),
    Minutes { min: u32, max: u32 },
}

impl Effort {
    /// Effort on the 0–5 scale. Minute ranges bucket by their midpoint.
    pub fn bucket(&self) -> u8 {
        match *self {
            Self::Bucket(b) => b.min(5),
            Self::Minutes { min, max } => {
                let avg = (u64::from(min) + u64::from(max)) / 2;
                match avg {
                    0..=5 => 1,
                    6..=15 => 2,
                    16..=60 => 3,
                    61..=240 => 4,
                    _ => 5,
                }
            }
        }
    }
}

impl WorkGraph {
    /// All tasks with their owning phase, in declaration order
    pub fn tasks(&self) -> impl Iterator<Item = (&Phase, &Task)> {
        self.phases
            .iter()
            .flat_map(|phase| phase.tasks.iter().map(move |task| (phase, task)))
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks().map(|(_, t)| t).find(|t| t.id == task_id)
    }

    pub fn phase_of(&self, task_id: &str) -> Option<&Phase> {
        self.tasks().find(|(_, t)| t.id == task_id).map(|(p, _)| p)
    }

    pub fn task_count(&self) -> usize {
        self.phases.iter().map(|p| p.tasks.len()).sum()
    }

    /// Task ids in declaration order (phase order, then task order)
    pub fn declaration_order(&self) -> Vec<String> {
        self.tasks().map(|(_, t)| t.id.clone()).collect()
    }

    /// JSON Schema for the document, embedded in generator prompts
    pub fn json_schema() -> String {
        let schema = schemars::schema_for!(WorkGraph);
        serde_json::to_string_pretty(&schema).unwrap_or_default()
    }
}
