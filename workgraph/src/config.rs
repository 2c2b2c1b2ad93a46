//! Configuration
//!
//! Precedence, lowest first: built-in defaults, `config.toml` (the path given
//! with `--config`, otherwise `<root>/config.toml`), `WORKGRAPH_*` environment
//! variables, then command-line flags applied by the caller.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, WorkGraphError};
use crate::schema::Profile;

/// Default state directory, relative to the working directory
pub const DEFAULT_ROOT: &str = ".workgraph";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    pub storage: StorageConfig,
    pub runner: RunnerConfig,
    pub artifacts: ArtifactConfig,
    pub engine: EngineConfig,
    pub scoring: ScoringConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// State directory holding WorkGraphs, runs, scans and issues
    pub root: PathBuf,
    /// Where enacted Track/Phase/Task entities go; `<root>/tracks` when unset
    pub tracks_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Per-command timeout
    pub cmd_timeout_secs: u64,
    /// Stop scheduling after this many executed tasks
    pub max_steps: Option<usize>,
    /// Working directory for task commands; the current directory when unset
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Failure artifacts retained per run
    pub max_artifacts: usize,
    /// Bytes kept per captured stream
    pub max_stream_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Command line of the plan engine; receives the prompt on stdin
    pub command: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub default_profile: Profile,
    pub default_top: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Maximum evidence entries collected before decomposition
    pub evidence_budget: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            tracks_dir: None,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            cmd_timeout_secs: 60,
            max_steps: None,
            working_dir: None,
        }
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            max_artifacts: 20,
            max_stream_bytes: 200 * 1024,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: 600,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            default_profile: Profile::Default,
            default_top: 5,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            evidence_budget: 40,
        }
    }
}

impl PlanConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| WorkGraphError::config(format!("invalid config TOML: {e}")))
    }

    /// Load configuration from `path` (or `<default root>/config.toml` when
    /// present), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    WorkGraphError::config(format!("failed to read {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&content)?
            }
            None => {
                let implicit = Path::new(DEFAULT_ROOT).join("config.toml");
                match std::fs::read_to_string(&implicit) {
                    Ok(content) => Self::from_toml_str(&content)?,
                    Err(_) => Self::default(),
                }
            }
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `WORKGRAPH_*` overrides read through `lookup`
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn number<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim().parse().map_err(|_| {
                WorkGraphError::config(format!("{key} must be a non-negative integer, got '{raw}'"))
            })
        }

        if let Some(root) = lookup("WORKGRAPH_ROOT") {
            self.storage.root = PathBuf::from(root);
        }
        if let Some(dir) = lookup("WORKGRAPH_TRACKS_DIR") {
            self.storage.tracks_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup("WORKGRAPH_CMD_TIMEOUT") {
            self.runner.cmd_timeout_secs = number("WORKGRAPH_CMD_TIMEOUT", raw)?;
        }
        if let Some(raw) = lookup("WORKGRAPH_MAX_ARTIFACTS") {
            self.artifacts.max_artifacts = number("WORKGRAPH_MAX_ARTIFACTS", raw)?;
        }
        if let Some(raw) = lookup("WORKGRAPH_ARTIFACT_MAX_BYTES") {
            self.artifacts.max_stream_bytes = number("WORKGRAPH_ARTIFACT_MAX_BYTES", raw)?;
        }
        if let Some(cmd) = lookup("WORKGRAPH_ENGINE_CMD") {
            if !cmd.trim().is_empty() {
                self.engine.command = Some(cmd);
            }
        }
        if let Some(raw) = lookup("WORKGRAPH_PROFILE") {
            self.scoring.default_profile = raw
                .parse()
                .map_err(|e| WorkGraphError::config(format!("WORKGRAPH_PROFILE: {e}")))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.storage.root
    }

    pub fn tracks_dir(&self) -> PathBuf {
        self.storage
            .tracks_dir
            .clone()
            .unwrap_or_else(|| self.storage.root.join("tracks"))
    }

    pub fn cmd_timeout(&self) -> Duration {
        Duration::from_secs(self.runner.cmd_timeout_secs)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.timeout_secs)
    }

    /// Resolve relative paths against `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.storage.root.is_relative() {
            self.storage.root = base.join(&self.storage.root);
        }
        if let Some(dir) = self.storage.tracks_dir.as_mut() {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
        if let Some(dir) = self.runner.working_dir.as_mut() {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = PlanConfig::default();
        assert_eq!(config.runner.cmd_timeout_secs, 60);
        assert_eq!(config.artifacts.max_artifacts, 20);
        assert_eq!(config.artifacts.max_stream_bytes, 204_800);
        assert_eq!(config.tracks_dir(), PathBuf::from(".workgraph/tracks"));
        assert!(config.engine.command.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PlanConfig::from_toml_str(
            r#"
[runner]
cmd_timeout_secs = 5

[engine]
command = "plan-engine --json"

[scoring]
default_profile = "investor"
"#,
        )
        .unwrap();
        assert_eq!(config.runner.cmd_timeout_secs, 5);
        assert_eq!(config.engine.command.as_deref(), Some("plan-engine --json"));
        assert_eq!(config.engine.timeout_secs, 600);
        assert_eq!(config.scoring.default_profile, Profile::Investor);
        assert_eq!(config.artifacts.max_artifacts, 20);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = PlanConfig::from_toml_str("[runner\n").unwrap_err();
        assert!(matches!(err, WorkGraphError::Config { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("WORKGRAPH_ROOT", "/tmp/wg-state"),
            ("WORKGRAPH_CMD_TIMEOUT", "7"),
            ("WORKGRAPH_MAX_ARTIFACTS", "3"),
            ("WORKGRAPH_PROFILE", "purpose"),
        ]);
        let mut config = PlanConfig::default();
        config
            .apply_env_with(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.root(), Path::new("/tmp/wg-state"));
        assert_eq!(config.cmd_timeout(), Duration::from_secs(7));
        assert_eq!(config.artifacts.max_artifacts, 3);
        assert_eq!(config.scoring.default_profile, Profile::Purpose);
    }

    #[test]
    fn test_bad_env_number_rejected() {
        let mut config = PlanConfig::default();
        let err = config
            .apply_env_with(|k| (k == "WORKGRAPH_CMD_TIMEOUT").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("WORKGRAPH_CMD_TIMEOUT"));
    }

    #[test]
    fn test_resolve_paths() {
        let mut config = PlanConfig::default();
        config.resolve_paths(Path::new("/work"));
        assert_eq!(config.root(), Path::new("/work/.workgraph"));
        assert_eq!(config.tracks_dir(), PathBuf::from("/work/.workgraph/tracks"));
    }
}
