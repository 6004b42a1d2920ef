//! Cloning repository references into scratch locations.

use std::path::Path;

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::{debug, instrument};

use crate::core::repo_ref::RepoRef;
use crate::io::git::Git;

/// A clone living in a scratch directory that is removed on drop.
#[derive(Debug)]
pub struct ScratchClone {
    // Held for its Drop.
    _scratch: TempDir,
    pub git: Git,
}

impl ScratchClone {
    pub fn root(&self) -> &Path {
        self.git.workdir()
    }
}

/// Clone `repo` into a fresh scratch directory under `parent`.
///
/// Commit refs get a full clone plus checkout, branch refs a shallow clone,
/// and no ref the remote's default branch.
#[instrument(skip_all, fields(repo = %repo))]
pub async fn clone_to_scratch(repo: &RepoRef, base_url: &str, parent: &Path) -> Result<ScratchClone> {
    tokio::fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create scratch parent {}", parent.display()))?;
    let scratch = tempfile::Builder::new()
        .prefix(".clone-")
        .tempdir_in(parent)
        .with_context(|| format!("create scratch dir in {}", parent.display()))?;
    let dest = scratch.path().join("repo");
    let remote = repo.clone_url(base_url);
    debug!(remote = %remote, "cloning to scratch");

    let git = Git::clone_at(&remote, repo.git_ref.as_deref(), repo.is_commit(), &dest)
        .await
        .with_context(|| format!("clone {repo} from {remote}"))?;
    Ok(ScratchClone {
        _scratch: scratch,
        git,
    })
}

/// Clone `repo` next to `workspace_dir`, then move the checkout's entries into it.
///
/// `workspace_dir` is never the clone target, so a failed clone leaves it
/// untouched.
pub async fn clone_into(repo: &RepoRef, base_url: &str, workspace_dir: &Path) -> Result<Git> {
    let parent = workspace_dir
        .parent()
        .with_context(|| format!("workspace {} has no parent", workspace_dir.display()))?;
    let clone = clone_to_scratch(repo, base_url, parent).await?;
    move_entries(clone.root(), workspace_dir).await?;
    Ok(Git::new(workspace_dir))
}

async fn move_entries(from: &Path, to: &Path) -> Result<()> {
    tokio::fs::create_dir_all(to)
        .await
        .with_context(|| format!("create {}", to.display()))?;
    let mut entries = tokio::fs::read_dir(from)
        .await
        .with_context(|| format!("read {}", from.display()))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("read {}", from.display()))?
    {
        let dest = to.join(entry.file_name());
        tokio::fs::rename(entry.path(), &dest)
            .await
            .with_context(|| format!("move {} to {}", entry.path().display(), dest.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestOrigin;

    #[tokio::test]
    async fn clone_into_moves_checkout_and_drops_scratch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let origin = TestOrigin::new(temp.path().join("origin"));
        origin.create_repo("acme", "app", &[("README.md", "hello\n")]);

        let workspace = temp.path().join("ws").join("run");
        let repo = RepoRef {
            org: "acme".to_string(),
            repo: "app".to_string(),
            git_ref: None,
        };
        let git = clone_into(&repo, &origin.base_url(), &workspace)
            .await
            .expect("clone");

        assert_eq!(git.current_branch().await.expect("branch"), "main");
        assert!(workspace.join("README.md").is_file());
        assert!(workspace.join(".git").is_dir());
        let leftovers: Vec<_> = std::fs::read_dir(temp.path().join("ws"))
            .expect("read ws")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(leftovers, vec!["run".to_string()]);
    }

    #[tokio::test]
    async fn clone_failure_names_the_ref() {
        let temp = tempfile::tempdir().expect("tempdir");
        let origin = TestOrigin::new(temp.path().join("origin"));
        origin.create_repo("acme", "app", &[("README.md", "hello\n")]);

        let repo = RepoRef {
            org: "acme".to_string(),
            repo: "app".to_string(),
            git_ref: Some("no-such-branch".to_string()),
        };
        let workspace = temp.path().join("ws").join("run");
        let err = clone_into(&repo, &origin.base_url(), &workspace)
            .await
            .expect_err("missing branch");
        let message = format!("{err:#}");
        assert!(message.contains("acme/app@no-such-branch"), "{message}");
        assert!(!workspace.exists());
    }
}
