//! Batch report: one line per run plus totals.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use harness::core::types::{CheckOutcome, CommitInfo, RunSnapshot};
use harness::io::artifacts::{
    COMMITS_FILE, DIFF_FILE, LINT_RESULTS_FILE, TEST_RESULTS_FILE, VERDICT_FILE,
};
use harness::io::tasks::TASK_FILE;

use crate::judge::run_dirs;

/// State of a lint or test check as recorded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    Failed,
    Skipped,
    /// No artifact (tests not declared, or the run never reached capture).
    Missing,
}

impl CheckStatus {
    pub fn passed(self) -> Option<bool> {
        match self {
            CheckStatus::Passed => Some(true),
            CheckStatus::Failed => Some(false),
            CheckStatus::Skipped | CheckStatus::Missing => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            CheckStatus::Passed => "pass",
            CheckStatus::Failed => "fail",
            CheckStatus::Skipped => "skipped",
            CheckStatus::Missing => "-",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub id: String,
    pub task: String,
    pub agent: String,
    pub lint: CheckStatus,
    pub tests: CheckStatus,
    pub commits: usize,
    /// `None` when `changes.diff` is absent.
    pub diff_lines: Option<usize>,
    pub judged: bool,
}

impl RunReport {
    pub fn line(&self) -> String {
        let diff = self
            .diff_lines
            .map(|lines| lines.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "run: {} task={} agent={} lint={} tests={} commits={} diff_lines={} judged={}",
            self.id,
            self.task,
            self.agent,
            self.lint.label(),
            self.tests.label(),
            self.commits,
            diff,
            if self.judged { "yes" } else { "no" }
        )
    }
}

/// Read every run of a batch. Unreadable runs become warnings.
pub fn aggregate(batch_dir: &Path) -> Result<(Vec<RunReport>, Vec<String>)> {
    let mut runs = Vec::new();
    let mut warnings = Vec::new();
    for dir in run_dirs(batch_dir)? {
        match load_run(&dir) {
            Ok(run) => runs.push(run),
            Err(err) => warnings.push(format!("skip {}: {err:#}", dir.display())),
        }
    }
    Ok((runs, warnings))
}

fn load_run(dir: &Path) -> Result<RunReport> {
    let snapshot_path = dir.join(TASK_FILE);
    let snapshot: RunSnapshot = read_json(&snapshot_path)?;
    let commits = if dir.join(COMMITS_FILE).exists() {
        read_json::<Vec<CommitInfo>>(&dir.join(COMMITS_FILE))?.len()
    } else {
        0
    };
    let diff_lines = if dir.join(DIFF_FILE).exists() {
        let diff = fs::read_to_string(dir.join(DIFF_FILE))
            .with_context(|| format!("read {}", dir.join(DIFF_FILE).display()))?;
        Some(diff.lines().count())
    } else {
        None
    };
    Ok(RunReport {
        id: dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
        task: snapshot.name,
        agent: snapshot.agent,
        lint: check_status(&dir.join(LINT_RESULTS_FILE))?,
        tests: check_status(&dir.join(TEST_RESULTS_FILE))?,
        commits,
        diff_lines,
        judged: dir.join(VERDICT_FILE).is_file(),
    })
}

fn check_status(path: &Path) -> Result<CheckStatus> {
    if !path.exists() {
        return Ok(CheckStatus::Missing);
    }
    let outcome: CheckOutcome = read_json(path)?;
    Ok(match outcome.passed() {
        Some(true) => CheckStatus::Passed,
        Some(false) => CheckStatus::Failed,
        None => CheckStatus::Skipped,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness::io::artifacts::prepare_result_dir;
    use harness::test_support::{TEST_TIMESTAMP, run_record, task};

    #[tokio::test]
    async fn aggregates_runs_and_warns_on_broken_ones() {
        let temp = tempfile::tempdir().expect("tempdir");
        let good = run_record(&task("good"), "claude", temp.path());
        prepare_result_dir(&good).await.expect("prepare");
        let dir = &good.result_dir;
        fs::write(
            dir.join(LINT_RESULTS_FILE),
            r#"{"success":true,"exitCode":0,"stdout":"","stderr":""}"#,
        )
        .expect("lint");
        fs::write(dir.join(TEST_RESULTS_FILE), r#"{"skipped":true,"reason":"none"}"#)
            .expect("tests");
        fs::write(
            dir.join(COMMITS_FILE),
            r#"[{"hash":"a","author":"x","email":"x@y","date":"d","message":"m"}]"#,
        )
        .expect("commits");
        fs::write(dir.join(DIFF_FILE), "+a\n+b\n").expect("diff");
        fs::write(dir.join(VERDICT_FILE), "PASS\n").expect("verdict");

        let broken = run_record(&task("broken"), "codex", temp.path());
        prepare_result_dir(&broken).await.expect("prepare");
        fs::write(broken.result_dir.join(LINT_RESULTS_FILE), "not json").expect("lint");

        let batch_dir = temp.path().join("results").join(TEST_TIMESTAMP);
        let (runs, warnings) = aggregate(&batch_dir).expect("aggregate");

        assert_eq!(runs.len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("broken-codex"));
        let run = &runs[0];
        assert_eq!(run.lint, CheckStatus::Passed);
        assert_eq!(run.tests, CheckStatus::Skipped);
        assert_eq!(run.commits, 1);
        assert_eq!(run.diff_lines, Some(2));
        assert!(run.judged);
        assert_eq!(
            run.line(),
            "run: good-claude task=good agent=claude lint=pass tests=skipped commits=1 diff_lines=2 judged=yes"
        );
    }
}
