//! Result capture: lint, tests, diff and commits since the augmentation commit.
//!
//! Every sub-operation degrades instead of failing. Only writing into the
//! result directory can fail a capture.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::core::types::{CheckOutcome, CommitInfo, RunRecord};
use crate::io::artifacts::{
    COMMITS_FILE, DIFF_FILE, LINT_RESULTS_FILE, TEST_RESULTS_FILE, write_json, write_text,
};
use crate::io::config::CaptureConfig;
use crate::io::git::Git;
use crate::io::process::run_command;
use crate::io::provision::AUGMENTATION_COMMIT_MESSAGE;

const PACKAGE_MANIFEST: &str = "package.json";

/// Collects objective signals from a workspace after the agent ran.
#[derive(Debug, Clone)]
pub struct Capturer {
    lint_command: Option<Vec<String>>,
    test_command: Option<Vec<String>>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl Capturer {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            lint_command: config.lint_command.clone(),
            test_command: config.test_command.clone(),
            timeout: config.timeout(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    /// Write `lint-results.json`, `changes.diff`, and when applicable
    /// `test-results.json` and `commits.json`.
    #[instrument(skip_all, fields(task = %record.task.name, agent = %record.agent))]
    pub async fn capture(&self, record: &RunRecord) -> Result<()> {
        let workspace = &record.workspace_dir;
        let results = &record.result_dir;

        let lint = self.lint(workspace).await;
        write_json(&results.join(LINT_RESULTS_FILE), &lint).await?;

        if let Some(tests) = self.tests(workspace).await {
            write_json(&results.join(TEST_RESULTS_FILE), &tests).await?;
        }

        let git = Git::new(workspace);
        let diff = capture_diff(&git).await;
        write_text(&results.join(DIFF_FILE), &diff).await?;

        let commits = capture_commits(&git).await;
        if !commits.is_empty() {
            write_json(&results.join(COMMITS_FILE), &commits).await?;
        }
        debug!(diff_bytes = diff.len(), commits = commits.len(), "captured results");
        Ok(())
    }

    /// Run the lint command, or record why it was skipped.
    pub async fn lint(&self, workspace: &Path) -> CheckOutcome {
        let command = match &self.lint_command {
            Some(command) => command.clone(),
            None => match package_script(workspace, "lint").await {
                Some(_) => npm_script("lint"),
                None => return CheckOutcome::skipped("no lint script defined"),
            },
        };
        self.run_check(workspace, &command).await
    }

    /// Run the test command. `None` when the workspace declares no tests.
    pub async fn tests(&self, workspace: &Path) -> Option<CheckOutcome> {
        let command = match &self.test_command {
            Some(command) => command.clone(),
            None => {
                package_script(workspace, "test").await?;
                npm_script("test")
            }
        };
        Some(self.run_check(workspace, &command).await)
    }

    async fn run_check(&self, workspace: &Path, command: &[String]) -> CheckOutcome {
        let Some((program, args)) = command.split_first() else {
            return CheckOutcome::skipped("empty command");
        };
        let mut cmd = Command::new(program);
        // Keeps test runners out of watch mode.
        cmd.args(args).current_dir(workspace).env("CI", "1");
        match run_command(cmd, None, Some(self.timeout), self.output_limit_bytes).await {
            Ok(output) => {
                let mut stderr = output.stderr_lossy();
                if output.timed_out {
                    stderr.push_str(&format!("\n[timed out after {:?}]\n", self.timeout));
                }
                CheckOutcome::Ran {
                    success: output.success(),
                    exit_code: output.status.code(),
                    stdout: output.stdout_lossy(),
                    stderr,
                }
            }
            Err(err) => {
                warn!(command = %command.join(" "), err = %format!("{err:#}"), "check command failed to run");
                CheckOutcome::Ran {
                    success: false,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("{err:#}"),
                }
            }
        }
    }
}

/// Everything that changed since the augmentation commit, untracked files included.
///
/// Without an augmentation commit the working tree is diffed against HEAD.
pub async fn capture_diff(git: &Git) -> String {
    let mut diff = String::new();
    match git.find_commit_by_message(AUGMENTATION_COMMIT_MESSAGE).await {
        Ok(Some(base)) => {
            let range = format!("{base}..HEAD");
            append(&mut diff, git.diff(&[&range]).await, "committed diff");
            append(&mut diff, git.diff(&["HEAD"]).await, "working tree diff");
        }
        Ok(None) => append(&mut diff, git.diff(&["HEAD"]).await, "working tree diff"),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "augmentation commit lookup failed");
            append(&mut diff, git.diff(&["HEAD"]).await, "working tree diff");
        }
    }

    match git.untracked_files().await {
        Ok(paths) => {
            for path in paths {
                append(&mut diff, git.diff_untracked(&path).await, "untracked file diff");
            }
        }
        Err(err) => warn!(err = %format!("{err:#}"), "listing untracked files failed"),
    }
    diff
}

/// Commits after the augmentation commit, oldest first. Empty when there is none.
pub async fn capture_commits(git: &Git) -> Vec<CommitInfo> {
    let base = match git.find_commit_by_message(AUGMENTATION_COMMIT_MESSAGE).await {
        Ok(Some(base)) => base,
        Ok(None) => return Vec::new(),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "augmentation commit lookup failed");
            return Vec::new();
        }
    };
    git.commits_since(&base).await.unwrap_or_else(|err| {
        warn!(err = %format!("{err:#}"), "listing commits failed");
        Vec::new()
    })
}

fn append(diff: &mut String, part: Result<String>, what: &str) {
    match part {
        Ok(text) => diff.push_str(&text),
        Err(err) => warn!(err = %format!("{err:#}"), "{what} failed"),
    }
}

fn npm_script(name: &str) -> Vec<String> {
    vec!["npm".to_string(), "run".to_string(), name.to_string()]
}

/// The named script from `package.json`, if the manifest declares one.
async fn package_script(workspace: &Path, name: &str) -> Option<String> {
    let path = workspace.join(PACKAGE_MANIFEST);
    let raw = tokio::fs::read_to_string(&path).await.ok()?;
    let manifest = match serde_json::from_str::<serde_json::Value>(&raw)
        .with_context(|| format!("parse {}", path.display()))
    {
        Ok(value) => value,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "ignoring unreadable manifest");
            return None;
        }
    };
    manifest
        .get("scripts")?
        .get(name)?
        .as_str()
        .map(str::to_string)
}
