//! Workspace provisioning: clone, augment, commit, branch, install.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::core::repo_ref::RepoRef;
use crate::core::types::RunRecord;
use crate::io::augment::Augmenter;
use crate::io::clone::clone_into;
use crate::io::config::{BenchConfig, InstallConfig};
use crate::io::process::run_command;

/// Message of the commit that records applied augmentations.
///
/// Capture finds the diff and commit-log baseline by searching for this exact
/// text, so it must stay stable.
pub const AUGMENTATION_COMMIT_MESSAGE: &str = "chore(bench): apply task augmentations";

const IDENTITY_NAME: &str = "Bench Harness";
const IDENTITY_EMAIL: &str = "bench@localhost";
const INSTALL_OUTPUT_LIMIT_BYTES: usize = 100_000;

/// Turns a RunRecord into a ready-to-use workspace.
#[derive(Debug, Clone)]
pub struct Provisioner {
    git_base_url: String,
    augmenter: Augmenter,
    install: InstallConfig,
}

impl Provisioner {
    pub fn new(git_base_url: impl Into<String>, http: reqwest::Client, install: InstallConfig) -> Self {
        let git_base_url = git_base_url.into();
        Self {
            augmenter: Augmenter::new(http, git_base_url.clone()),
            git_base_url,
            install,
        }
    }

    pub fn from_config(config: &BenchConfig, http: reqwest::Client) -> Self {
        Self::new(config.git_base_url.clone(), http, config.install.clone())
    }

    /// Provision the record's workspace.
    ///
    /// On error the workspace directory is removed: a failed provision never
    /// leaves something that looks usable.
    #[instrument(skip_all, fields(task = %record.task.name, agent = %record.agent))]
    pub async fn provision(&self, record: &RunRecord) -> Result<()> {
        match self.provision_steps(record).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Err(remove_err) = tokio::fs::remove_dir_all(&record.workspace_dir).await
                    && remove_err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(err = %remove_err, "failed to remove partial workspace");
                }
                Err(err)
            }
        }
    }

    async fn provision_steps(&self, record: &RunRecord) -> Result<()> {
        let workspace = &record.workspace_dir;
        tokio::fs::create_dir_all(workspace)
            .await
            .with_context(|| format!("create workspace {}", workspace.display()))?;

        let repo = RepoRef::parse_start_from(&record.task.name, &record.task.start_from)?;
        info!(repo = %repo, "cloning start point");
        let git = clone_into(&repo, &self.git_base_url, workspace).await?;
        git.set_identity(IDENTITY_NAME, IDENTITY_EMAIL).await?;

        let augmentations = &record.task.augmentations;
        for (index, spec) in augmentations.iter().enumerate() {
            self.augmenter.apply(workspace, spec).await.with_context(|| {
                format!(
                    "augmentation {} ({} -> {})",
                    index + 1,
                    spec.source,
                    spec.target
                )
            })?;
        }
        if !augmentations.is_empty() {
            git.add_all().await?;
            let committed = git.commit_staged(AUGMENTATION_COMMIT_MESSAGE).await?;
            debug!(committed, count = augmentations.len(), "applied augmentations");
        }

        git.checkout_new_branch(&record.branch()).await?;
        self.install_dependencies(workspace).await;
        Ok(())
    }

    /// Run the first install rule whose manifest exists. Failures only warn.
    async fn install_dependencies(&self, workspace: &Path) {
        let Some(rule) = self
            .install
            .rules
            .iter()
            .find(|rule| workspace.join(&rule.manifest).is_file())
        else {
            return;
        };
        let Some((program, args)) = rule.command.split_first() else {
            return;
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(workspace);
        debug!(manifest = %rule.manifest, command = %rule.command.join(" "), "installing dependencies");

        match run_command(
            cmd,
            None,
            Some(self.install.timeout()),
            INSTALL_OUTPUT_LIMIT_BYTES,
        )
        .await
        {
            Ok(output) if output.success() => {}
            Ok(output) => warn!(
                command = %rule.command.join(" "),
                exit_code = ?output.status.code(),
                timed_out = output.timed_out,
                stderr = %output.stderr_lossy().trim(),
                "dependency install failed"
            ),
            Err(err) => warn!(
                command = %rule.command.join(" "),
                err = %format!("{err:#}"),
                "dependency install failed"
            ),
        }
    }
}

