//! Repository references: `startFrom` URLs and commit-hash detection.

use std::fmt;

use reqwest::Url;

use crate::error::ConfigError;

const HOSTING_HOSTS: [&str; 2] = ["github.com", "www.github.com"];

/// An organization/repository pair with an optional branch or commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub org: String,
    pub repo: String,
    /// `None` means the remote's default branch.
    pub git_ref: Option<String>,
}

impl RepoRef {
    /// Parse a task's `startFrom`, e.g. `https://github.com/org/repo/tree/v2`.
    ///
    /// Everything after `tree/` is the ref, so branch names may contain `/`.
    pub fn parse_start_from(task: &str, value: &str) -> Result<Self, ConfigError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ConfigError::MissingStartFrom {
                task: task.to_string(),
            });
        }
        let url = Url::parse(value).map_err(|_| ConfigError::StartFromNotUrl {
            value: value.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::StartFromNotUrl {
                value: value.to_string(),
            });
        }
        if !url.host_str().is_some_and(is_hosting_host) {
            return Err(ConfigError::StartFromWrongHost {
                value: value.to_string(),
            });
        }
        let segments = path_segments(&url);
        if segments.len() < 2 {
            return Err(ConfigError::StartFromMissingSegments {
                value: value.to_string(),
            });
        }
        let git_ref = match segments.get(2).map(String::as_str) {
            Some("tree") if segments.len() > 3 => Some(segments[3..].join("/")),
            _ => None,
        };
        Ok(Self {
            org: segments[0].clone(),
            repo: trim_git_suffix(&segments[1]),
            git_ref,
        })
    }

    /// Remote to clone from, given a base such as `https://github.com`.
    pub fn clone_url(&self, base_url: &str) -> String {
        format!("{}/{}/{}", base_url.trim_end_matches('/'), self.org, self.repo)
    }

    /// True when the ref is a full 40-character commit hash.
    pub fn is_commit(&self) -> bool {
        self.git_ref.as_deref().is_some_and(is_commit_hash)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.git_ref {
            Some(git_ref) => write!(f, "{}/{}@{}", self.org, self.repo, git_ref),
            None => write!(f, "{}/{}@<default branch>", self.org, self.repo),
        }
    }
}

/// A 40-hex-character commit hash (needs a full clone plus checkout).
pub fn is_commit_hash(value: &str) -> bool {
    value.len() == 40 && value.chars().all(|ch| ch.is_ascii_hexdigit())
}

pub(crate) fn is_hosting_host(host: &str) -> bool {
    HOSTING_HOSTS.contains(&host)
}

pub(crate) fn path_segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|segments| {
            segments
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn trim_git_suffix(repo: &str) -> String {
    repo.strip_suffix(".git").unwrap_or(repo).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_repository_url() {
        let parsed = RepoRef::parse_start_from("t", "https://github.com/acme/widgets").expect("ok");
        assert_eq!(parsed.org, "acme");
        assert_eq!(parsed.repo, "widgets");
        assert_eq!(parsed.git_ref, None);
    }

    #[test]
    fn tree_segment_selects_branch_including_slashes() {
        let parsed =
            RepoRef::parse_start_from("t", "https://github.com/acme/widgets.git/tree/feature/x")
                .expect("ok");
        assert_eq!(parsed.repo, "widgets");
        assert_eq!(parsed.git_ref.as_deref(), Some("feature/x"));
        assert!(!parsed.is_commit());
    }

    #[test]
    fn tree_segment_with_commit_hash_is_commit() {
        let hash = "0123456789abcdef0123456789abcdef01234567";
        let url = format!("https://github.com/acme/widgets/tree/{hash}");
        let parsed = RepoRef::parse_start_from("t", &url).expect("ok");
        assert!(parsed.is_commit());
    }

    #[test]
    fn missing_and_empty_start_from_fail() {
        let err = RepoRef::parse_start_from("fix-login", "  ").unwrap_err();
        assert_eq!(err.to_string(), "task fix-login: startFrom is missing");
    }

    #[test]
    fn non_url_fails() {
        let err = RepoRef::parse_start_from("t", "acme/widgets").unwrap_err();
        assert_eq!(err.to_string(), "startFrom is not a valid URL: acme/widgets");
        let err = RepoRef::parse_start_from("t", "ftp://github.com/acme/widgets").unwrap_err();
        assert!(matches!(err, ConfigError::StartFromNotUrl { .. }));
    }

    #[test]
    fn other_hosts_fail() {
        let err = RepoRef::parse_start_from("t", "https://gitlab.com/acme/widgets").unwrap_err();
        assert_eq!(
            err.to_string(),
            "startFrom must be a github.com repository URL: https://gitlab.com/acme/widgets"
        );
    }

    #[test]
    fn missing_repository_segment_fails() {
        let err = RepoRef::parse_start_from("t", "https://github.com/acme").unwrap_err();
        assert!(matches!(err, ConfigError::StartFromMissingSegments { .. }));
    }

    #[test]
    fn clone_url_joins_base() {
        let parsed = RepoRef::parse_start_from("t", "https://github.com/acme/widgets").expect("ok");
        assert_eq!(
            parsed.clone_url("file:///srv/mirror/"),
            "file:///srv/mirror/acme/widgets"
        );
    }

    #[test]
    fn commit_hash_detection() {
        assert!(is_commit_hash("0123456789abcdef0123456789ABCDEF01234567"));
        assert!(!is_commit_hash("main"));
        assert!(!is_commit_hash("0123456789abcdef0123456789abcdef0123456"));
        assert!(!is_commit_hash("g123456789abcdef0123456789abcdef01234567"));
    }
}
