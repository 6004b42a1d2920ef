//! Git adapter for workspace provisioning and result capture.
//!
//! Every workspace is a clone we own exclusively, so we keep a small,
//! explicit wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::Output;

use anyhow::{Context, Result, anyhow};
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::core::types::CommitInfo;

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Clone `remote` into `dest`. Branch refs get a shallow single-branch
    /// clone; commit hashes need full history, so they get a full clone
    /// followed by a detached checkout.
    #[instrument(skip_all, fields(remote, git_ref))]
    pub async fn clone_at(remote: &str, git_ref: Option<&str>, commit: bool, dest: &Path) -> Result<Git> {
        let dest_arg = dest.display().to_string();
        let mut args = vec!["clone", "--quiet"];
        match git_ref {
            Some(_) if commit => {}
            Some(branch) => args.extend(["--depth", "1", "--branch", branch]),
            None => args.extend(["--depth", "1"]),
        }
        args.extend(["--", remote, dest_arg.as_str()]);

        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        debug!(remote, git_ref = ?git_ref, commit, "cloning");
        run_checked_in(parent, &args).await?;

        let git = Git::new(dest);
        if let (Some(hash), true) = (git_ref, commit) {
            git.run_checked(&["checkout", "--quiet", hash]).await?;
        }
        Ok(git)
    }

    /// Set a repo-local author identity so harness commits never depend on global config.
    pub async fn set_identity(&self, name: &str, email: &str) -> Result<()> {
        self.run_checked(&["config", "user.name", name]).await?;
        self.run_checked(&["config", "user.email", email]).await?;
        Ok(())
    }

    /// Return the current branch name (`HEAD` when detached).
    pub async fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    /// Untracked, non-ignored files relative to the workdir.
    ///
    /// NUL-separated output keeps names verbatim (no quoting of spaces,
    /// non-ASCII bytes or `->`).
    pub async fn untracked_files(&self) -> Result<Vec<String>> {
        let out = self
            .run_capture(&["ls-files", "--others", "--exclude-standard", "-z"])
            .await?;
        Ok(split_nul(&out))
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub async fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "--quiet", "-b", branch]).await?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub async fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"]).await?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub async fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"]).await?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub async fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes().await? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "--quiet", "-m", message]).await?;
        Ok(true)
    }

    /// Most recent commit whose message contains `needle` (fixed string).
    pub async fn find_commit_by_message(&self, needle: &str) -> Result<Option<String>> {
        let grep = format!("--grep={needle}");
        let out = self
            .run_capture(&["log", "--fixed-strings", &grep, "--format=%H", "-n", "1"])
            .await?;
        let hash = out.trim();
        Ok((!hash.is_empty()).then(|| hash.to_string()))
    }

    /// `git diff` with the given revision arguments.
    pub async fn diff(&self, revisions: &[&str]) -> Result<String> {
        let mut args = vec!["diff", "--no-color"];
        args.extend_from_slice(revisions);
        self.run_capture(&args).await
    }

    /// Render an untracked file as a diff against an empty file.
    pub async fn diff_untracked(&self, path: &str) -> Result<String> {
        let args = ["diff", "--no-color", "--no-index", "--", "/dev/null", path];
        let output = self.run(&args).await?;
        // --no-index exits 1 when the inputs differ, which is the expected case.
        match output.status.code() {
            Some(0) | Some(1) => Ok(String::from_utf8_lossy(&output.stdout).to_string()),
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()))
            }
        }
    }

    /// Commits in `base..HEAD`, oldest first.
    pub async fn commits_since(&self, base: &str) -> Result<Vec<CommitInfo>> {
        let range = format!("{base}..HEAD");
        let format = format!("--format=%H{FIELD_SEP}%an{FIELD_SEP}%ae{FIELD_SEP}%aI{FIELD_SEP}%B{RECORD_SEP}");
        let out = self
            .run_capture(&["log", "--reverse", &format, &range])
            .await?;
        parse_log(&out)
    }

    async fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        run_checked_in(&self.workdir, args).await
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        run_in(&self.workdir, args).await
    }
}

async fn run_checked_in(dir: &Path, args: &[&str]) -> Result<Output> {
    let output = run_in(dir, args).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
    }
    Ok(output)
}

async fn run_in(dir: &Path, args: &[&str]) -> Result<Output> {
    Command::new("git")
        .args(["-c", "core.quotePath=false"])
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .await
        .with_context(|| format!("spawn git {}", args.join(" ")))
}

fn split_nul(out: &str) -> Vec<String> {
    out.split('\0')
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_log(out: &str) -> Result<Vec<CommitInfo>> {
    let mut commits = Vec::new();
    for record in out.split(RECORD_SEP) {
        let record = record.trim_start_matches('\n');
        if record.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = record.splitn(5, FIELD_SEP).collect();
        if fields.len() != 5 {
            return Err(anyhow!("unexpected git log record: '{record}'"));
        }
        commits.push(CommitInfo {
            hash: fields[0].to_string(),
            author: fields[1].to_string(),
            email: fields[2].to_string(),
            date: fields[3].to_string(),
            message: fields[4].trim_end().to_string(),
        });
    }
    Ok(commits)
}
