//! Scenario definitions and suite layout.
//!
//! A suite is a directory of scenarios. Each scenario directory holds a
//! `scenario.yaml` config plus conventional assets:
//!
//! ```text
//! suites/<suite>/<scenario>/
//!   scenario.yaml          # optional; all fields have defaults
//!   prompts/<tier>.md      # one task prompt per difficulty tier
//!   repo/                  # workspace fixture (preferred name)
//!   repo-fixture/          # workspace fixture (legacy name)
//!   oracle/answer.md       # reference answer exposed via the oracle tool
//!   warmup/                # working directory recreated by warmup
//! ```
//!
//! Configuration is deliberately sparse: every stage of a run is gated on
//! the presence of its config (no warmup block means no warmup, no fixture
//! directory means no workspace, and so on).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ScenarioError;

/// Run timeout applied when a scenario does not set `timeout_minutes`.
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 60;

/// Conventional oracle answer location relative to the scenario directory.
const DEFAULT_ORACLE_FILE: &str = "oracle/answer.md";

/// Parsed `scenario.yaml`. Immutable once loaded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Human-readable task summary; never shown to the agent.
    #[serde(default)]
    pub description: Option<String>,
    /// Environment preparation executed once before runs of this scenario.
    #[serde(default)]
    pub warmup: Option<WarmupSpec>,
    /// Shell commands run in the workspace after the agent turn.
    #[serde(default)]
    pub validation: Vec<String>,
    /// Per-command timeout for validation commands, in seconds.
    #[serde(default)]
    pub validation_timeout_secs: Option<u64>,
    /// Artifact descriptor for scenarios judged on a produced document
    /// rather than a workspace diff. Artifact scenarios skip the workspace
    /// and validation stages.
    #[serde(default)]
    pub artifact: Option<String>,
    /// Wall-clock budget for the whole run, in minutes.
    #[serde(default)]
    pub timeout_minutes: Option<u64>,
    /// Per-evaluator weight overrides. A weight of zero (or below) disables
    /// that metric for this scenario.
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    /// Explicit LLM-judge toggle; defaults to enabled.
    #[serde(default)]
    pub llm_judge: Option<bool>,
    /// Oracle answer file relative to the scenario directory; when unset,
    /// the conventional `oracle/answer.md` is used if present.
    #[serde(default)]
    pub oracle_file: Option<String>,
    /// Substrings that must appear in the workspace dependency manifest
    /// for the dependency-targets evaluator to pass.
    #[serde(default)]
    pub dependency_targets: Vec<String>,
}

impl ScenarioConfig {
    /// Whether this scenario is judged on an artifact instead of a workspace.
    pub fn is_artifact_based(&self) -> bool {
        self.artifact.is_some()
    }

    /// Whether the LLM judge runs for this scenario.
    pub fn llm_judge_enabled(&self) -> bool {
        self.llm_judge.unwrap_or(true)
    }

    /// Wall-clock budget for the run.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.unwrap_or(DEFAULT_TIMEOUT_MINUTES) * 60)
    }

    /// Structural validation. Field presence is always optional; this only
    /// rejects configs that are present but unusable.
    pub fn validate(&self, scenario: &str) -> Result<(), ScenarioError> {
        match &self.warmup {
            Some(WarmupSpec::Scripted { commands }) if commands.is_empty() => {
                return Err(ScenarioError::Validation {
                    scenario: scenario.to_string(),
                    reason: "scripted warmup has no commands".to_string(),
                });
            }
            Some(WarmupSpec::Agent { prompt, .. }) if prompt.trim().is_empty() => {
                return Err(ScenarioError::Validation {
                    scenario: scenario.to_string(),
                    reason: "agent warmup has an empty prompt".to_string(),
                });
            }
            _ => {}
        }
        if self.validation.iter().any(|cmd| cmd.trim().is_empty()) {
            return Err(ScenarioError::Validation {
                scenario: scenario.to_string(),
                reason: "validation contains an empty command".to_string(),
            });
        }
        if let Some(minutes) = self.timeout_minutes {
            if minutes == 0 {
                return Err(ScenarioError::Validation {
                    scenario: scenario.to_string(),
                    reason: "timeout_minutes must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// How a scenario's environment gets prepared before the first run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WarmupSpec {
    /// Run a fixed command sequence in the warmup directory.
    Scripted { commands: Vec<String> },
    /// Let a setup agent do the preparation from a prompt.
    Agent {
        prompt: String,
        #[serde(default)]
        model: Option<String>,
    },
}

/// One (suite, scenario) pair resolved on disk.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub suite: String,
    pub name: String,
    dir: PathBuf,
    pub config: ScenarioConfig,
}

impl Scenario {
    /// Loads a scenario from `<suites_root>/<suite>/<scenario>`.
    ///
    /// A missing `scenario.yaml` yields the default config (every optional
    /// stage off); a missing directory is an error.
    pub fn load(
        suites_root: impl AsRef<Path>,
        suite: &str,
        name: &str,
    ) -> Result<Self, ScenarioError> {
        let dir = suites_root.as_ref().join(suite).join(name);
        if !dir.is_dir() {
            return Err(ScenarioError::NotFound(dir.display().to_string()));
        }

        let config_path = dir.join("scenario.yaml");
        let config = if config_path.is_file() {
            let content = fs::read_to_string(&config_path)?;
            serde_yaml::from_str::<ScenarioConfig>(&content).map_err(|e| {
                ScenarioError::ParseError {
                    path: config_path.display().to_string(),
                    message: e.to_string(),
                }
            })?
        } else {
            ScenarioConfig::default()
        };
        config.validate(name)?;

        Ok(Self {
            suite: suite.to_string(),
            name: name.to_string(),
            dir,
            config,
        })
    }

    /// Scenario directory on disk.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads the task prompt for a difficulty tier (`prompts/<tier>.md`).
    pub fn tier_prompt(&self, tier: &str) -> Result<String, ScenarioError> {
        let path = self.dir.join("prompts").join(format!("{}.md", tier));
        if !path.is_file() {
            return Err(ScenarioError::TierPromptNotFound(path.display().to_string()));
        }
        Ok(fs::read_to_string(path)?)
    }

    /// Workspace fixture directory, checked in priority order: `repo`,
    /// then `repo-fixture`. `None` means the scenario runs without a
    /// workspace.
    pub fn fixture_dir(&self) -> Option<PathBuf> {
        for candidate in ["repo", "repo-fixture"] {
            let path = self.dir.join(candidate);
            if path.is_dir() {
                return Some(path);
            }
        }
        None
    }

    /// Oracle answer file, when one exists. Config override first, then the
    /// conventional location.
    pub fn oracle_path(&self) -> Option<PathBuf> {
        let relative = self
            .config
            .oracle_file
            .as_deref()
            .unwrap_or(DEFAULT_ORACLE_FILE);
        let path = self.dir.join(relative);
        path.is_file().then_some(path)
    }

    /// Working directory warmup recreates and scripted commands run in.
    pub fn warmup_dir(&self) -> PathBuf {
        self.dir.join("warmup")
    }

    /// Difficulty tiers available for this scenario, from `prompts/*.md`
    /// file stems, sorted.
    pub fn tiers(&self) -> Vec<String> {
        let prompts_dir = self.dir.join("prompts");
        let Ok(entries) = fs::read_dir(prompts_dir) else {
            return Vec::new();
        };
        let mut tiers: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                let is_md = path.extension().map(|ext| ext == "md").unwrap_or(false);
                if path.is_file() && is_md {
                    path.file_stem()
                        .and_then(|stem| stem.to_str())
                        .map(str::to_string)
                } else {
                    None
                }
            })
            .collect();
        tiers.sort();
        tiers
    }
}

/// Lists scenario names in a suite (subdirectories, sorted).
pub fn list_scenarios(
    suites_root: impl AsRef<Path>,
    suite: &str,
) -> Result<Vec<String>, ScenarioError> {
    let suite_dir = suites_root.as_ref().join(suite);
    if !suite_dir.is_dir() {
        return Err(ScenarioError::NotFound(suite_dir.display().to_string()));
    }

    let mut scenarios = Vec::new();
    for entry in fs::read_dir(&suite_dir)? {
        let entry = entry?;
        if entry.path().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                scenarios.push(name.to_string());
            }
        }
    }
    scenarios.sort();
    Ok(scenarios)
}
