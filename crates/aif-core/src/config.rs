//! Project configuration (`.ai-framework.json`).
//!
//! Loaded from the git root, merged over defaults. Unknown keys at every
//! level are captured in flattened maps so a read-modify-write cycle
//! preserves them verbatim.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// File name resolved against the git root.
pub const CONFIG_FILE: &str = ".ai-framework.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Learning sensitivity tier; maps to a minimum proposal confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

impl Sensitivity {
    pub fn min_confidence(&self) -> f64 {
        match self {
            Self::Conservative => 0.7,
            Self::Moderate => 0.5,
            Self::Aggressive => 0.3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Moderate => "moderate",
            Self::Aggressive => "aggressive",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningSection {
    pub global_enabled: bool,
    pub sensitivity: Sensitivity,
    pub max_proposals_per_session: u32,
    pub cooldown_days: u32,
    pub warmup_hours: u32,
    pub commits_per_trigger: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for LearningSection {
    fn default() -> Self {
        Self {
            global_enabled: false,
            sensitivity: Sensitivity::Moderate,
            max_proposals_per_session: 3,
            cooldown_days: 7,
            warmup_hours: 24,
            commits_per_trigger: 5,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub code_enabled: bool,
    pub governance_enabled: bool,
    pub code_binary: PathBuf,
    /// Deadline for one code-search invocation, seconds.
    pub code_timeout_sec: u64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            code_enabled: true,
            governance_enabled: true,
            code_binary: PathBuf::from("semsearch"),
            code_timeout_sec: 30,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationSection {
    pub max_review_iterations: u32,
    pub stale_busy_hours: u32,
    /// Branch worktrees fork from; `main` unless overridden.
    pub base_branch: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for OrchestrationSection {
    fn default() -> Self {
        Self {
            max_review_iterations: 3,
            stale_busy_hours: 4,
            base_branch: "main".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

/// Opaque to the core beyond the `enabled` flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentTeamsSection {
    pub enabled: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Root of `.ai-framework.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectSection,
    pub learning: LearningSection,
    pub retrieval: RetrievalSection,
    pub orchestration: OrchestrationSection,
    pub agent_teams: AgentTeamsSection,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Config {
    /// Load config from `<git_root>/.ai-framework.json`.
    /// A missing file yields defaults.
    pub fn load(git_root: &Path) -> Result<Self, ConfigError> {
        let path = git_root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the config back, preserving unknown keys captured at load.
    pub fn save(&self, git_root: &Path) -> Result<(), ConfigError> {
        let path = git_root.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Minimum confidence a candidate needs before a proposal is generated.
    pub fn min_confidence(&self) -> f64 {
        self.learning.sensitivity.min_confidence()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_contract() {
        let config = Config::default();
        assert!(!config.learning.global_enabled);
        assert_eq!(config.learning.sensitivity, Sensitivity::Moderate);
        assert_eq!(config.learning.max_proposals_per_session, 3);
        assert_eq!(config.learning.cooldown_days, 7);
        assert_eq!(config.learning.warmup_hours, 24);
        assert_eq!(config.learning.commits_per_trigger, 5);
        assert_eq!(config.orchestration.max_review_iterations, 3);
        assert_eq!(config.orchestration.stale_busy_hours, 4);
        assert_eq!(config.orchestration.base_branch, "main");
        assert!(!config.agent_teams.enabled);
    }

    #[test]
    fn sensitivity_maps_to_min_confidence() {
        assert!((Sensitivity::Conservative.min_confidence() - 0.7).abs() < 1e-9);
        assert!((Sensitivity::Moderate.min_confidence() - 0.5).abs() < 1e-9);
        assert!((Sensitivity::Aggressive.min_confidence() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.learning.max_proposals_per_session, 3);
    }

    #[test]
    fn unknown_keys_survive_round_trip() {
        let dir = TempDir::new().unwrap();
        let raw = r#"{
            "project": { "name": "demo", "color": "teal" },
            "learning": { "global_enabled": true, "beta_mode": 2 },
            "dashboard": { "port": 9000 }
        }"#;
        std::fs::write(dir.path().join(CONFIG_FILE), raw).unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert!(config.learning.global_enabled);
        assert_eq!(config.project.name.as_deref(), Some("demo"));
        assert_eq!(
            config.project.extra.get("color"),
            Some(&Value::String("teal".to_string()))
        );

        config.save(dir.path()).unwrap();
        let reloaded: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap())
                .unwrap();
        assert_eq!(reloaded["project"]["color"], Value::String("teal".into()));
        assert_eq!(reloaded["learning"]["beta_mode"], Value::from(2));
        assert_eq!(reloaded["dashboard"]["port"], Value::from(9000));
    }

    #[test]
    fn parse_sensitivity_values() {
        let raw = r#"{ "learning": { "sensitivity": "aggressive" } }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.learning.sensitivity, Sensitivity::Aggressive);
        assert!((config.min_confidence() - 0.3).abs() < 1e-9);
    }
}
