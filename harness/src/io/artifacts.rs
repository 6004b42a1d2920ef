//! Result-directory files: the run snapshot and JSON artifacts.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{RunRecord, RunSnapshot};
use crate::io::tasks::{CRITERIA_FILE, PROMPT_FILE, TASK_FILE};

pub const LINT_RESULTS_FILE: &str = "lint-results.json";
pub const TEST_RESULTS_FILE: &str = "test-results.json";
pub const COMMITS_FILE: &str = "commits.json";
pub const DIFF_FILE: &str = "changes.diff";
pub const EVAL_PROMPT_FILE: &str = "eval-prompt.txt";
pub const VERDICT_FILE: &str = "final-result.md";

/// Create `result_dir` and write `task.json`, `prompt.txt` and `criteria.txt`.
///
/// Runs before provisioning so even a failed run leaves a record.
pub async fn prepare_result_dir(record: &RunRecord) -> Result<()> {
    let dir = &record.result_dir;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("create result dir {}", dir.display()))?;
    write_json(&dir.join(TASK_FILE), &RunSnapshot::from(record)).await?;
    write_text(&dir.join(PROMPT_FILE), &record.task.prompt).await?;
    write_text(&dir.join(CRITERIA_FILE), &record.task.criteria).await?;
    Ok(())
}

/// Pretty JSON with a trailing newline.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_text(path, &buf).await
}

pub async fn write_text(path: &Path, contents: &str) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("write {}", path.display()))
}
