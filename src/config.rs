//! Configuration for the mentor orchestrator.
//!
//! Layered: defaults → `mentor.toml` in the project directory →
//! environment overrides. The resulting `MentorConfig` is immutable and
//! handed to the root router at construction; nothing reads ambient
//! global state after load.
//!
//! # Configuration File Format
//!
//! ```toml
//! worker_cmd = "mentor-worker"
//! worker_args = ["--json"]
//! worker_model = "gemini-2.5-flash"
//! critic_model = "gemini-2.5-pro"
//! max_fix_iterations = 3
//! stage_timeout_secs = 120
//! style_pass_threshold = 80
//! style_weight = 0.3
//! test_weight = 0.5
//! structure_weight = 0.2
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "mentor.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentorConfig {
    /// External worker command, invoked per task with JSON over stdio.
    #[serde(default = "default_worker_cmd")]
    pub worker_cmd: String,
    #[serde(default)]
    pub worker_args: Vec<String>,
    /// Model for analysis, style, test and fix tasks.
    #[serde(default = "default_worker_model")]
    pub worker_model: String,
    /// Model for feedback and report synthesis.
    #[serde(default = "default_critic_model")]
    pub critic_model: String,

    /// Upper bound on fix-loop iterations.
    #[serde(default = "default_max_fix_iterations")]
    pub max_fix_iterations: u32,
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,

    /// Style score below this marks a submission fix-worthy.
    #[serde(default = "default_style_pass_threshold")]
    pub style_pass_threshold: u64,
    #[serde(default = "default_max_style_issues_shown")]
    pub max_style_issues_shown: usize,
    #[serde(default = "default_max_code_length")]
    pub max_code_length: usize,

    // Grading weights, passed through to the synthesis worker.
    #[serde(default = "default_style_weight")]
    pub style_weight: f64,
    #[serde(default = "default_test_weight")]
    pub test_weight: f64,
    #[serde(default = "default_structure_weight")]
    pub structure_weight: f64,

    /// Artifact store root, relative to the project directory.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Persisted user records, relative to the project directory.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

fn default_worker_cmd() -> String {
    "mentor-worker".to_string()
}
fn default_worker_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_critic_model() -> String {
    "gemini-2.5-pro".to_string()
}
fn default_max_fix_iterations() -> u32 {
    3
}
fn default_stage_timeout_secs() -> u64 {
    120
}
fn default_tool_timeout_secs() -> u64 {
    10
}
fn default_worker_timeout_secs() -> u64 {
    90
}
fn default_style_pass_threshold() -> u64 {
    80
}
fn default_max_style_issues_shown() -> usize {
    10
}
fn default_max_code_length() -> usize {
    10_000
}
fn default_style_weight() -> f64 {
    0.3
}
fn default_test_weight() -> f64 {
    0.5
}
fn default_structure_weight() -> f64 {
    0.2
}
fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".mentor/artifacts")
}
fn default_state_file() -> PathBuf {
    PathBuf::from(".mentor/state/users.json")
}

impl Default for MentorConfig {
    fn default() -> Self {
        Self {
            worker_cmd: default_worker_cmd(),
            worker_args: Vec::new(),
            worker_model: default_worker_model(),
            critic_model: default_critic_model(),
            max_fix_iterations: default_max_fix_iterations(),
            stage_timeout_secs: default_stage_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            worker_timeout_secs: default_worker_timeout_secs(),
            style_pass_threshold: default_style_pass_threshold(),
            max_style_issues_shown: default_max_style_issues_shown(),
            max_code_length: default_max_code_length(),
            style_weight: default_style_weight(),
            test_weight: default_test_weight(),
            structure_weight: default_structure_weight(),
            artifact_dir: default_artifact_dir(),
            state_file: default_state_file(),
        }
    }
}

impl MentorConfig {
    /// Load configuration for a project directory: `mentor.toml` if
    /// present, then environment overrides, then validation.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(CONFIG_FILE);
        let mut config: Self = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(cmd) = std::env::var("MENTOR_WORKER_CMD") {
            self.worker_cmd = cmd;
        }
        if let Ok(model) = std::env::var("MENTOR_WORKER_MODEL") {
            self.worker_model = model;
        }
        if let Ok(model) = std::env::var("MENTOR_CRITIC_MODEL") {
            self.critic_model = model;
        }
        if let Ok(value) = std::env::var("MENTOR_MAX_FIX_ITERATIONS")
            && let Ok(parsed) = value.parse()
        {
            self.max_fix_iterations = parsed;
        }
        if let Ok(value) = std::env::var("MENTOR_STAGE_TIMEOUT_SECS")
            && let Ok(parsed) = value.parse()
        {
            self.stage_timeout_secs = parsed;
        }
    }

    /// Reject configurations the pipelines cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_fix_iterations == 0 {
            bail!("max_fix_iterations must be at least 1");
        }
        if self.stage_timeout_secs == 0 || self.tool_timeout_secs == 0 {
            bail!("timeouts must be non-zero");
        }
        if self.style_pass_threshold > 100 {
            bail!(
                "style_pass_threshold must be within 0-100, got {}",
                self.style_pass_threshold
            );
        }
        let total = self.style_weight + self.test_weight + self.structure_weight;
        if (total - 1.0).abs() > 0.001 {
            bail!(
                "grading weights must sum to 1.0, got {:.3} (style={}, test={}, structure={})",
                total,
                self.style_weight,
                self.test_weight,
                self.structure_weight
            );
        }
        Ok(())
    }

    pub fn weights(&self) -> (f64, f64, f64) {
        (self.style_weight, self.test_weight, self.structure_weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = MentorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_fix_iterations, 3);
        assert_eq!(config.style_pass_threshold, 80);
        assert_eq!(config.worker_cmd, "mentor-worker");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = MentorConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_fix_iterations, 3);
    }

    #[test]
    fn test_load_reads_toml_overrides() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "max_fix_iterations = 5\nstyle_pass_threshold = 70\n",
        )
        .unwrap();
        let config = MentorConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_fix_iterations, 5);
        assert_eq!(config.style_pass_threshold, 70);
        // Untouched fields keep defaults.
        assert_eq!(config.stage_timeout_secs, 120);
    }

    #[test]
    fn test_unbalanced_weights_rejected() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "style_weight = 0.5\ntest_weight = 0.5\nstructure_weight = 0.5\n",
        )
        .unwrap();
        let err = MentorConfig::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "max_fix_iterations = 0\n").unwrap();
        assert!(MentorConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_threshold_bounds() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "style_pass_threshold = 130\n").unwrap();
        assert!(MentorConfig::load(dir.path()).is_err());
    }
}
