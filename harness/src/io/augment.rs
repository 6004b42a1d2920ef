//! Applying augmentation overlays to a cloned workspace.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::core::source::{AugmentationSource, RepoPath, parse_source, validate_target};
use crate::core::types::{AugmentMode, AugmentationSpec};
use crate::io::clone::clone_to_scratch;

/// Resolves augmentation sources and lays them over a workspace.
#[derive(Debug, Clone)]
pub struct Augmenter {
    http: reqwest::Client,
    git_base_url: String,
}

impl Augmenter {
    pub fn new(http: reqwest::Client, git_base_url: impl Into<String>) -> Self {
        Self {
            http,
            git_base_url: git_base_url.into(),
        }
    }

    /// Apply one augmentation to `workspace`.
    ///
    /// `replace` only deletes the target first when the source is a folder.
    #[instrument(skip_all, fields(source = %spec.source, target = %spec.target))]
    pub async fn apply(&self, workspace: &Path, spec: &AugmentationSpec) -> Result<()> {
        let relative = validate_target(&spec.target)?;
        let target = workspace.join(&relative);

        match parse_source(&spec.source) {
            AugmentationSource::Local(path) => {
                let source = match &spec.base_dir {
                    Some(base) if path.is_relative() => base.join(&path),
                    _ => path,
                };
                if !source.exists() {
                    bail!("augmentation source {} does not exist", source.display());
                }
                overlay(source, workspace.to_path_buf(), target, spec.mode).await
            }
            AugmentationSource::Http(url) => {
                let body = self.fetch(&url).await?;
                let name = url_file_name(&url);
                let dest = file_destination(&target, name.as_deref().map(OsStr::new), &url)?;
                write_file(&dest, &body).await
            }
            AugmentationSource::Repo(repo_path) => {
                self.apply_repo_path(workspace, &repo_path, target, spec.mode)
                    .await
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "fetching augmentation");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("fetch {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("fetch {url} failed with status {status}");
        }
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("read body of {url}"))?;
        Ok(bytes.to_vec())
    }

    async fn apply_repo_path(
        &self,
        workspace: &Path,
        repo_path: &RepoPath,
        target: PathBuf,
        mode: AugmentMode,
    ) -> Result<()> {
        // Scratch clones sit beside the workspace, never inside it.
        let scratch_root = workspace
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let clone = clone_to_scratch(&repo_path.repo, &self.git_base_url, &scratch_root).await?;
        let located = clone.root().join(&repo_path.path);
        if !located.exists() {
            let repo = &repo_path.repo;
            bail!(
                "path {} not found in {}/{} at {}",
                repo_path.path,
                repo.org,
                repo.repo,
                repo.git_ref.as_deref().unwrap_or("default branch")
            );
        }
        overlay(located, workspace.to_path_buf(), target, mode).await
    }
}

/// Last non-empty path segment of `url`.
fn url_file_name(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

/// Where a single-file source lands: inside `target` when it is an existing
/// folder, otherwise at `target` itself.
fn file_destination(target: &Path, name: Option<&OsStr>, source: &str) -> Result<PathBuf> {
    if !target.is_dir() {
        return Ok(target.to_path_buf());
    }
    match name {
        Some(name) => Ok(target.join(name)),
        None => bail!(
            "source {source} has no file name to place inside {}",
            target.display()
        ),
    }
}

async fn write_file(target: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create {}", parent.display()))?;
    }
    tokio::fs::write(target, body)
        .await
        .with_context(|| format!("write {}", target.display()))
}

async fn overlay(source: PathBuf, workspace: PathBuf, target: PathBuf, mode: AugmentMode) -> Result<()> {
    tokio::task::spawn_blocking(move || overlay_blocking(&source, &workspace, &target, mode))
        .await
        .context("join overlay task")?
}

fn overlay_blocking(source: &Path, workspace: &Path, target: &Path, mode: AugmentMode) -> Result<()> {
    if source.is_dir() {
        if mode == AugmentMode::Replace {
            clear_target(workspace, target)?;
        }
        copy_tree(source, target)
    } else {
        let dest = file_destination(target, source.file_name(), &source.display().to_string())?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::copy(source, &dest)
            .with_context(|| format!("copy {} to {}", source.display(), dest.display()))?;
        Ok(())
    }
}

/// Delete the target subtree. At the workspace root `.git` survives.
fn clear_target(workspace: &Path, target: &Path) -> Result<()> {
    if !target.exists() {
        return Ok(());
    }
    if target != workspace {
        return if target.is_dir() {
            fs::remove_dir_all(target).with_context(|| format!("remove {}", target.display()))
        } else {
            fs::remove_file(target).with_context(|| format!("remove {}", target.display()))
        };
    }
    for entry in fs::read_dir(target).with_context(|| format!("read {}", target.display()))? {
        let entry = entry.with_context(|| format!("read {}", target.display()))?;
        if entry.file_name() == ".git" {
            continue;
        }
        let path = entry.path();
        if entry.file_type().is_ok_and(|ty| ty.is_dir()) {
            fs::remove_dir_all(&path).with_context(|| format!("remove {}", path.display()))?;
        } else {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        }
    }
    Ok(())
}

/// Recursively copy `source` into `target`, skipping `.git`.
fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    let walker = WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", source.display()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .with_context(|| format!("strip prefix {}", source.display()))?;
        let dest = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).with_context(|| format!("create {}", dest.display()))?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            fs::copy(entry.path(), &dest).with_context(|| {
                format!("copy {} to {}", entry.path().display(), dest.display())
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::test_support::OneShotHttp;

    fn spec(source: &Path, target: &str, mode: AugmentMode) -> AugmentationSpec {
        AugmentationSpec {
            source: source.display().to_string(),
            target: target.to_string(),
            mode,
            base_dir: None,
        }
    }

    fn augmenter() -> Augmenter {
        Augmenter::new(reqwest::Client::new(), "file:///nonexistent")
    }

    fn fixture(temp: &Path) -> (PathBuf, PathBuf) {
        let workspace = temp.join("ws");
        fs::create_dir_all(workspace.join("config")).expect("mkdir");
        fs::write(workspace.join("config/keep.txt"), "keep").expect("write");
        fs::write(workspace.join("config/shared.txt"), "old").expect("write");

        let source = temp.join("src-config");
        fs::create_dir_all(source.join("nested")).expect("mkdir");
        fs::write(source.join("shared.txt"), "new").expect("write");
        fs::write(source.join("nested/extra.txt"), "extra").expect("write");
        (workspace, source)
    }

    #[tokio::test]
    async fn merge_preserves_existing_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (workspace, source) = fixture(temp.path());

        augmenter()
            .apply(&workspace, &spec(&source, "config", AugmentMode::Merge))
            .await
            .expect("apply");

        assert_eq!(fs::read_to_string(workspace.join("config/keep.txt")).expect("read"), "keep");
        assert_eq!(fs::read_to_string(workspace.join("config/shared.txt")).expect("read"), "new");
        assert!(workspace.join("config/nested/extra.txt").is_file());
    }

    #[tokio::test]
    async fn replace_deletes_target_subtree_first() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (workspace, source) = fixture(temp.path());

        augmenter()
            .apply(&workspace, &spec(&source, "config", AugmentMode::Replace))
            .await
            .expect("apply");

        assert!(!workspace.join("config/keep.txt").exists());
        assert_eq!(fs::read_to_string(workspace.join("config/shared.txt")).expect("read"), "new");
    }

    #[tokio::test]
    async fn replace_on_root_keeps_git_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (workspace, source) = fixture(temp.path());
        fs::create_dir_all(workspace.join(".git")).expect("mkdir");
        fs::write(workspace.join(".git/HEAD"), "ref: refs/heads/main\n").expect("write");

        augmenter()
            .apply(&workspace, &spec(&source, ".", AugmentMode::Replace))
            .await
            .expect("apply");

        assert!(workspace.join(".git/HEAD").is_file());
        assert!(!workspace.join("config").exists());
        assert!(workspace.join("shared.txt").is_file());
    }

    #[tokio::test]
    async fn replace_with_file_source_overwrites_only_that_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (workspace, source) = fixture(temp.path());

        augmenter()
            .apply(
                &workspace,
                &spec(&source.join("shared.txt"), "config/shared.txt", AugmentMode::Replace),
            )
            .await
            .expect("apply");

        assert!(workspace.join("config/keep.txt").is_file());
        assert_eq!(fs::read_to_string(workspace.join("config/shared.txt")).expect("read"), "new");
    }

    #[tokio::test]
    async fn relative_local_sources_resolve_against_base_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (workspace, _) = fixture(temp.path());
        let task_dir = temp.path().join("tasks/t");
        fs::create_dir_all(&task_dir).expect("mkdir");
        fs::write(task_dir.join("AGENTS.md"), "rules").expect("write");

        let spec = AugmentationSpec {
            source: "AGENTS.md".to_string(),
            target: "docs/AGENTS.md".to_string(),
            mode: AugmentMode::Merge,
            base_dir: Some(task_dir),
        };
        augmenter().apply(&workspace, &spec).await.expect("apply");

        assert_eq!(fs::read_to_string(workspace.join("docs/AGENTS.md")).expect("read"), "rules");
    }

    #[tokio::test]
    async fn missing_local_source_and_escaping_target_fail() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (workspace, source) = fixture(temp.path());
        let augmenter = augmenter();

        let err = augmenter
            .apply(&workspace, &spec(&temp.path().join("nope"), "x", AugmentMode::Merge))
            .await
            .expect_err("missing source");
        assert!(err.to_string().contains("does not exist"));

        let err = augmenter
            .apply(&workspace, &spec(&source, "../escape", AugmentMode::Merge))
            .await
            .expect_err("escaping target");
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidTarget { .. })
        ));
    }

    #[tokio::test]
    async fn http_source_is_downloaded_to_target() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (workspace, _) = fixture(temp.path());
        let server = OneShotHttp::start("200 OK", "# guide\n").await;

        let spec = AugmentationSpec {
            source: format!("{}/files/guide.md", server.url),
            target: "docs/GUIDE.md".to_string(),
            mode: AugmentMode::Merge,
            base_dir: None,
        };
        augmenter().apply(&workspace, &spec).await.expect("apply");

        assert_eq!(
            fs::read_to_string(workspace.join("docs/GUIDE.md")).expect("read"),
            "# guide\n"
        );
        assert!(server.request().await.starts_with("GET /files/guide.md"));
    }

    #[tokio::test]
    async fn http_source_into_existing_folder_keeps_its_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (workspace, _) = fixture(temp.path());
        let server = OneShotHttp::start("200 OK", "{\"strict\":true}").await;

        let spec = AugmentationSpec {
            source: format!("{}/presets/lint.json", server.url),
            target: "config".to_string(),
            mode: AugmentMode::Merge,
            base_dir: None,
        };
        augmenter().apply(&workspace, &spec).await.expect("apply");

        assert_eq!(
            fs::read_to_string(workspace.join("config/lint.json")).expect("read"),
            "{\"strict\":true}"
        );
        assert!(workspace.join("config/keep.txt").is_file());
    }

    #[tokio::test]
    async fn http_error_status_fails_the_augmentation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (workspace, _) = fixture(temp.path());
        let server = OneShotHttp::start("404 Not Found", "missing").await;

        let spec = AugmentationSpec {
            source: format!("{}/gone.md", server.url),
            target: "gone.md".to_string(),
            mode: AugmentMode::Merge,
            base_dir: None,
        };
        let err = augmenter().apply(&workspace, &spec).await.expect_err("404");

        assert!(err.to_string().contains("404"), "{err:#}");
        assert!(!workspace.join("gone.md").exists());
    }
}
