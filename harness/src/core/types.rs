//! Domain types shared by discovery, enrichment, provisioning and capture.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A task loaded from `tasks/{name}/`. Read-only once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    /// Unique identifier (also used in result and workspace folder names).
    pub name: String,
    pub description: String,
    pub tags: BTreeSet<String>,
    /// Repository URL the workspace is cloned from, e.g.
    /// `https://github.com/org/repo/tree/main`.
    pub start_from: String,
    /// Applied in order; later entries may overwrite earlier targets.
    pub augmentations: Vec<AugmentationSpec>,
    /// Text handed to the agent.
    pub prompt: String,
    /// Text handed to the judge.
    pub criteria: String,
    /// Folder the task was loaded from (relative augmentation sources resolve here).
    pub dir: PathBuf,
}

/// A file or folder overlay applied to a freshly cloned workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AugmentationSpec {
    /// Local path, direct HTTP(S) URL, or repository blob/tree/raw URL.
    pub source: String,
    /// Path relative to the workspace root.
    pub target: String,
    #[serde(default)]
    pub mode: AugmentMode,
    /// Directory relative local sources resolve against. Set at load time.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

/// How a folder source is laid over its target.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AugmentMode {
    /// Overlay: files in the source overwrite, other target files survive.
    #[default]
    Merge,
    /// Delete the target subtree first (folder sources only).
    Replace,
}

/// One (task, agent) execution unit of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub task: TaskDefinition,
    /// Agent identifier as given by the caller.
    pub agent: String,
    /// Batch identifier shared by every record of one enrichment call.
    pub timestamp: String,
    pub workspace_dir: PathBuf,
    pub result_dir: PathBuf,
}

impl RunRecord {
    /// Folder-style identifier, `{task}-{sanitized agent}`, unique within a batch.
    pub fn id(&self) -> String {
        run_folder_name(&self.task.name, &self.agent)
    }

    /// Human-readable `{task}/{agent}` for status output.
    pub fn label(&self) -> String {
        format!("{}/{}", self.task.name, self.agent)
    }

    /// Branch the agent works on inside the cloned workspace.
    pub fn branch(&self) -> String {
        format!(
            "bench/{}-{}",
            crate::core::sanitize::sanitize_agent(&self.agent),
            self.timestamp
        )
    }
}

/// Name of the per-run folder under a batch directory.
pub fn run_folder_name(task: &str, agent: &str) -> String {
    format!("{task}-{}", crate::core::sanitize::sanitize_agent(agent))
}

/// `task.json` snapshot written into every result directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub start_from: String,
    pub augmentations: Vec<AugmentationSpec>,
    pub agent: String,
    pub timestamp: String,
    pub workspace_dir: String,
}

impl From<&RunRecord> for RunSnapshot {
    fn from(record: &RunRecord) -> Self {
        Self {
            name: record.task.name.clone(),
            description: record.task.description.clone(),
            tags: record.task.tags.iter().cloned().collect(),
            start_from: record.task.start_from.clone(),
            augmentations: record.task.augmentations.clone(),
            agent: record.agent.clone(),
            timestamp: record.timestamp.clone(),
            workspace_dir: record.workspace_dir.display().to_string(),
        }
    }
}

/// Outcome of a lint or test command, as persisted in `*-results.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CheckOutcome {
    #[serde(rename_all = "camelCase")]
    Ran {
        success: bool,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    Skipped { skipped: bool, reason: String },
}

impl CheckOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        CheckOutcome::Skipped {
            skipped: true,
            reason: reason.into(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, CheckOutcome::Skipped { .. })
    }

    /// `Some(success)` when the command ran, `None` when skipped.
    pub fn passed(&self) -> Option<bool> {
        match self {
            CheckOutcome::Ran { success, .. } => Some(*success),
            CheckOutcome::Skipped { .. } => None,
        }
    }
}

/// Metadata for a commit the agent made after the augmentation commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub email: String,
    pub date: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_defaults_to_merge() {
        let spec: AugmentationSpec =
            serde_json::from_str(r#"{"source":"a","target":"b"}"#).expect("parse");
        assert_eq!(spec.mode, AugmentMode::Merge);
        let spec: AugmentationSpec =
            serde_json::from_str(r#"{"source":"a","target":"b","mode":"replace"}"#)
                .expect("parse");
        assert_eq!(spec.mode, AugmentMode::Replace);
    }

    #[test]
    fn check_outcome_serializes_both_shapes() {
        let ran = CheckOutcome::Ran {
            success: false,
            exit_code: Some(2),
            stdout: "out".to_string(),
            stderr: "err".to_string(),
        };
        let json = serde_json::to_value(&ran).expect("json");
        assert_eq!(json["success"], false);
        assert_eq!(json["exitCode"], 2);

        let skipped = CheckOutcome::skipped("no lint script");
        let json = serde_json::to_value(&skipped).expect("json");
        assert_eq!(json["skipped"], true);
        assert_eq!(json["reason"], "no lint script");

        let back: CheckOutcome = serde_json::from_value(json).expect("back");
        assert!(back.is_skipped());
    }
}
