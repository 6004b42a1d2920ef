//! Agent invocation: a closed registry of coding-agent CLIs behind one trait.
//!
//! Tests register scripted agents instead of spawning real binaries.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::core::sanitize::sanitize_agent;
use crate::core::types::RunRecord;
use crate::error::ConfigError;
use crate::io::config::AgentConfig;
use crate::io::process::run_command;

pub const TRANSCRIPT_FILE: &str = "output.jsonl";
pub const AGENT_STDERR_FILE: &str = "agent-stderr.log";

/// What an agent process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOutput {
    /// `None` when the process was killed by a signal or timed out.
    pub exit_code: Option<i32>,
    /// Structured transcript (JSON lines for every built-in agent).
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl AgentOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// A coding agent that can work on a prompt inside a directory.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, prompt: &str, cwd: &Path) -> Result<AgentOutput>;
}

/// How the prompt reaches the agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDelivery {
    Stdin,
    /// Appended as the last argument.
    Argv,
}

/// An agent backed by a CLI binary.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    name: String,
    program: String,
    args: Vec<String>,
    delivery: PromptDelivery,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandAgent {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        args: &[&str],
        delivery: PromptDelivery,
        config: &AgentConfig,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            delivery,
            timeout: config.timeout(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    pub fn claude(config: &AgentConfig) -> Self {
        Self::new(
            "claude",
            "claude",
            &[
                "-p",
                "--output-format",
                "stream-json",
                "--verbose",
                "--dangerously-skip-permissions",
            ],
            PromptDelivery::Stdin,
            config,
        )
    }

    pub fn cursor(config: &AgentConfig) -> Self {
        Self::new(
            "cursor",
            "cursor-agent",
            &["-p", "--output-format", "stream-json", "--force"],
            PromptDelivery::Argv,
            config,
        )
    }

    pub fn codex(config: &AgentConfig) -> Self {
        Self::new(
            "codex",
            "codex",
            &[
                "exec",
                "--json",
                "--skip-git-repo-check",
                "--sandbox",
                "danger-full-access",
                "-",
            ],
            PromptDelivery::Stdin,
            config,
        )
    }
}

#[async_trait]
impl Agent for CommandAgent {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(agent = %self.name, program = %self.program))]
    async fn invoke(&self, prompt: &str, cwd: &Path) -> Result<AgentOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(cwd);
        let stdin = match self.delivery {
            PromptDelivery::Stdin => Some(prompt.as_bytes()),
            PromptDelivery::Argv => {
                cmd.arg(prompt);
                None
            }
        };

        info!(cwd = %cwd.display(), "starting agent");
        let output = run_command(cmd, stdin, Some(self.timeout), self.output_limit_bytes)
            .await
            .with_context(|| format!("run agent {}", self.name))?;
        debug!(exit_code = ?output.status.code(), timed_out = output.timed_out, "agent exited");

        Ok(AgentOutput {
            exit_code: if output.timed_out {
                None
            } else {
                output.status.code()
            },
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
            timed_out: output.timed_out,
        })
    }
}

/// Static mapping from agent identifiers to implementations.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, Arc<dyn Agent>>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AgentRegistry {
    /// `claude`, `cursor` and `codex`.
    pub fn builtin(config: &AgentConfig) -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(CommandAgent::claude(config)));
        registry.register(Arc::new(CommandAgent::cursor(config)));
        registry.register(Arc::new(CommandAgent::codex(config)));
        registry
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(sanitize_agent(agent.name()), agent);
    }

    pub fn names(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    /// Look up an agent. Names match after sanitization, so `Claude` finds `claude`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Agent>, ConfigError> {
        self.agents
            .get(&sanitize_agent(name))
            .cloned()
            .ok_or_else(|| ConfigError::UnknownAgent {
                name: name.to_string(),
                known: self.names().join(", "),
            })
    }

    /// Fail on the first unknown name, before any work starts.
    pub fn resolve(&self, names: &[String]) -> Result<(), ConfigError> {
        for name in names {
            self.get(name)?;
        }
        Ok(())
    }
}

/// Run the record's agent in its workspace and persist the transcript.
///
/// The transcript is written before success is judged, so failed runs keep
/// whatever the agent produced.
#[instrument(skip_all, fields(task = %record.task.name, agent = %record.agent))]
pub async fn invoke_agent(agent: &dyn Agent, record: &RunRecord) -> Result<AgentOutput> {
    let output = agent
        .invoke(&record.task.prompt, &record.workspace_dir)
        .await?;

    let transcript = record.result_dir.join(TRANSCRIPT_FILE);
    tokio::fs::write(&transcript, &output.stdout)
        .await
        .with_context(|| format!("write {}", transcript.display()))?;
    if !output.stderr.trim().is_empty() {
        let stderr_path = record.result_dir.join(AGENT_STDERR_FILE);
        tokio::fs::write(&stderr_path, &output.stderr)
            .await
            .with_context(|| format!("write {}", stderr_path.display()))?;
    }

    if output.timed_out {
        warn!("agent timed out");
        bail!("agent {} timed out", agent.name());
    }
    if !output.success() {
        warn!(exit_code = ?output.exit_code, "agent failed");
        bail!("agent {} exited with status {:?}", agent.name(), output.exit_code);
    }
    Ok(output)
}
