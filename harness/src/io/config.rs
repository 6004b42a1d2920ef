//! Bench configuration stored in `bench.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "bench.toml";

/// Bench configuration (TOML).
///
/// Every field is optional in the file; CLI flags override what is loaded here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BenchConfig {
    /// Folder holding one sub-folder per task.
    pub tasks_dir: PathBuf,

    /// Root of `{timestamp}/{task}-{agent}/` result folders.
    pub results_dir: PathBuf,

    /// Root of ephemeral workspaces.
    pub workspace_dir: PathBuf,

    /// Agents to run when `--agents` is not given.
    pub agents: Vec<String>,

    /// Number of run-phase lanes.
    pub concurrency: usize,

    /// Remote base that repository references are cloned from.
    pub git_base_url: String,

    pub agent: AgentConfig,
    pub capture: CaptureConfig,
    pub install: InstallConfig,
    pub judge: JudgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Wall-clock limit for one agent invocation.
    pub timeout_secs: u64,

    /// Truncate agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Explicit lint command; overrides `package.json` detection.
    pub lint_command: Option<Vec<String>>,

    /// Explicit test command; overrides `package.json` detection.
    pub test_command: Option<Vec<String>>,

    pub timeout_secs: u64,

    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InstallConfig {
    /// First rule whose manifest exists at the workspace root wins.
    pub rules: Vec<InstallRule>,

    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallRule {
    pub manifest: String,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JudgeConfig {
    /// OpenAI-compatible API root, e.g. `https://openrouter.ai/api/v1`.
    pub base_url: String,

    pub model: String,

    /// Name of the environment variable holding the API key.
    pub api_key_env: String,

    /// Judge-phase lanes when `--parallel` is not given.
    pub parallel: usize,

    /// Per-artifact budget when assembling the judge prompt.
    pub max_section_bytes: usize,

    pub timeout_secs: u64,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            tasks_dir: PathBuf::from("tasks"),
            results_dir: PathBuf::from("results"),
            workspace_dir: std::env::temp_dir().join("bench-workspaces"),
            agents: vec![
                "claude".to_string(),
                "cursor".to_string(),
                "codex".to_string(),
            ],
            concurrency: 3,
            git_base_url: "https://github.com".to_string(),
            agent: AgentConfig::default(),
            capture: CaptureConfig::default(),
            install: InstallConfig::default(),
            judge: JudgeConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60 * 60,
            output_limit_bytes: 10_000_000,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            lint_command: None,
            test_command: None,
            timeout_secs: 10 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                InstallRule {
                    manifest: "package-lock.json".to_string(),
                    command: vec!["npm".to_string(), "ci".to_string()],
                },
                InstallRule {
                    manifest: "package.json".to_string(),
                    command: vec!["npm".to_string(), "install".to_string()],
                },
            ],
            timeout_secs: 15 * 60,
        }
    }
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "anthropic/claude-sonnet-4".to_string(),
            api_key_env: "JUDGE_API_KEY".to_string(),
            parallel: 2,
            max_section_bytes: 40_000,
            timeout_secs: 5 * 60,
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CaptureConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl InstallConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl BenchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be > 0");
        }
        if self.git_base_url.trim().is_empty() {
            bail!("git_base_url must not be empty");
        }
        if self.agent.timeout_secs == 0 {
            bail!("agent.timeout_secs must be > 0");
        }
        if self.agent.output_limit_bytes == 0 {
            bail!("agent.output_limit_bytes must be > 0");
        }
        if self.capture.timeout_secs == 0 {
            bail!("capture.timeout_secs must be > 0");
        }
        if self.capture.output_limit_bytes == 0 {
            bail!("capture.output_limit_bytes must be > 0");
        }
        for (key, command) in [
            ("capture.lint_command", &self.capture.lint_command),
            ("capture.test_command", &self.capture.test_command),
        ] {
            if let Some(command) = command
                && (command.is_empty() || command[0].trim().is_empty())
            {
                bail!("{key} must be a non-empty array");
            }
        }
        for rule in &self.install.rules {
            if rule.manifest.trim().is_empty() {
                bail!("install.rules manifest must not be empty");
            }
            if rule.command.is_empty() || rule.command[0].trim().is_empty() {
                bail!("install.rules command for {} must be a non-empty array", rule.manifest);
            }
        }
        if self.judge.parallel == 0 {
            bail!("judge.parallel must be > 0");
        }
        if self.judge.max_section_bytes == 0 {
            bail!("judge.max_section_bytes must be > 0");
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BenchConfig::default()`.
pub fn load_config(path: &Path) -> Result<BenchConfig> {
    if !path.exists() {
        let cfg = BenchConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BenchConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, BenchConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bench.toml");
        fs::write(
            &path,
            "concurrency = 5\n\n[capture]\nlint_command = [\"just\", \"lint\"]\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.concurrency, 5);
        assert_eq!(
            cfg.capture.lint_command,
            Some(vec!["just".to_string(), "lint".to_string()])
        );
        assert_eq!(cfg.capture.timeout_secs, CaptureConfig::default().timeout_secs);
        assert_eq!(cfg.agents, vec!["claude", "cursor", "codex"]);
        assert_eq!(cfg.install.rules.len(), 2);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bench.toml");
        fs::write(&path, "concurrency = 0\n").expect("write");

        let err = load_config(&path).expect_err("zero concurrency");
        assert!(format!("{err:#}").contains("concurrency must be > 0"));
    }

    #[test]
    fn rejects_empty_install_command() {
        let mut cfg = BenchConfig::default();
        cfg.install.rules = vec![InstallRule {
            manifest: "Cargo.toml".to_string(),
            command: Vec::new(),
        }];
        let err = cfg.validate().expect_err("empty command");
        assert!(err.to_string().contains("Cargo.toml"));
    }
}
