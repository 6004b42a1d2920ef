//! Augmentation source grammar.
//!
//! - `https://github.com/{org}/{repo}/blob/{ref}/{path}`: one file
//! - `https://github.com/{org}/{repo}/tree/{ref}/{path}`: a folder
//! - `https://raw.githubusercontent.com/{org}/{repo}/{ref}/{path}`: one file
//! - any other `http(s)://` URL: fetched directly
//! - anything else: a local path

use std::path::{Component, Path, PathBuf};

use reqwest::Url;

use crate::core::repo_ref::{RepoRef, is_hosting_host, path_segments, trim_git_suffix};
use crate::error::ConfigError;

const RAW_HOST: &str = "raw.githubusercontent.com";

/// Where an augmentation's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AugmentationSource {
    Local(PathBuf),
    Http(String),
    Repo(RepoPath),
}

/// A path inside a repository at a given ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPath {
    pub repo: RepoRef,
    /// Path inside the repository; empty means the repository root.
    pub path: String,
    pub kind: RepoPathKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoPathKind {
    File,
    Folder,
}

/// Classify a source string. Never fails: unparseable URLs are fetched as-is
/// and surface their error at fetch time.
pub fn parse_source(source: &str) -> AugmentationSource {
    let trimmed = source.trim();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return AugmentationSource::Local(PathBuf::from(trimmed));
    }
    let Ok(url) = Url::parse(trimmed) else {
        return AugmentationSource::Http(trimmed.to_string());
    };
    let host = url.host_str().unwrap_or_default();
    let segments = path_segments(&url);

    if is_hosting_host(host) && segments.len() >= 4 {
        let kind = match segments[2].as_str() {
            "blob" => Some(RepoPathKind::File),
            "tree" => Some(RepoPathKind::Folder),
            _ => None,
        };
        if let Some(kind) = kind {
            return AugmentationSource::Repo(RepoPath {
                repo: repo_ref(&segments[0], &segments[1], &segments[3]),
                path: segments[4..].join("/"),
                kind,
            });
        }
    }

    if host == RAW_HOST && segments.len() >= 4 {
        return AugmentationSource::Repo(RepoPath {
            repo: repo_ref(&segments[0], &segments[1], &segments[2]),
            path: segments[3..].join("/"),
            kind: RepoPathKind::File,
        });
    }

    AugmentationSource::Http(trimmed.to_string())
}

fn repo_ref(org: &str, repo: &str, git_ref: &str) -> RepoRef {
    RepoRef {
        org: org.to_string(),
        repo: trim_git_suffix(repo),
        git_ref: Some(git_ref.to_string()),
    }
}

/// Normalize an augmentation target to a workspace-relative path.
///
/// Absolute paths and `..` are rejected. `""` and `"."` name the workspace root.
pub fn validate_target(target: &str) -> Result<PathBuf, ConfigError> {
    let invalid = || ConfigError::InvalidTarget {
        target: target.to_string(),
    };
    let mut normalized = PathBuf::new();
    for component in Path::new(target.trim()).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(invalid());
            }
        }
    }
    Ok(normalized)
}
