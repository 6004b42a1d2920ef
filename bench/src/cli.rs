//! CLI command implementations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use harness::core::enrich::{BatchRoots, enrich, unique_agents};
use harness::core::filter::TaskFilter;
use harness::core::repo_ref::RepoRef;
use harness::core::source::validate_target;
use harness::core::types::TaskDefinition;
use harness::exit_codes;
use harness::io::config::BenchConfig;
use harness::io::tasks::{discover_tasks, load_global_augmentations};
use harness::pipeline::{HarnessStages, run_records};
use harness::scheduler::ParallelOptions;
use tracing::{debug, info};

use crate::judge::{HttpJudge, JudgeOptions, judge_runs};
use crate::report::aggregate;
use crate::{JudgeArgs, RunArgs};

const HTTP_TIMEOUT_SECS: u64 = 120;

/// Run every selected task × agent pair and print the batch summary.
pub async fn run_batch(config: &BenchConfig, args: &RunArgs) -> Result<i32> {
    let filter = TaskFilter::from_options(&args.task, &args.tag)?;
    let global = match &args.augmentations {
        Some(path) => load_global_augmentations(path)?,
        None => Vec::new(),
    };
    let tasks = filter.apply(discover_tasks(&config.tasks_dir, &global)?)?;
    if tasks.is_empty() {
        bail!("no tasks match under {}", config.tasks_dir.display());
    }
    let agents = unique_agents(if args.agents.is_empty() {
        &config.agents
    } else {
        &args.agents
    })?;

    let http = http_client()?;
    let stages = HarnessStages::from_config(config, http);
    stages.agents().resolve(&agents)?;
    preflight(&tasks)?;

    let workspace_root = args.workspace.as_ref().unwrap_or(&config.workspace_dir);
    let roots = BatchRoots {
        workspace_root: absolute(workspace_root)?,
        results_root: absolute(&config.results_dir)?,
    };
    let records = enrich(&tasks, &agents, &roots);
    let Some(timestamp) = records.first().map(|record| record.timestamp.clone()) else {
        bail!("no agents selected");
    };
    let concurrency = args.concurrency.unwrap_or(config.concurrency);
    println!(
        "batch {timestamp}: {} runs ({} tasks x {} agents), concurrency {concurrency}",
        records.len(),
        tasks.len(),
        agents.len()
    );
    info!(timestamp = %timestamp, runs = records.len(), "starting batch");

    let summary = run_records(
        &stages,
        records,
        ParallelOptions {
            concurrency,
            show_status: true,
        },
    )
    .await;

    println!(
        "done: {} succeeded, {} failed, {} total",
        summary.completed, summary.failed, summary.total
    );
    for error in &summary.errors {
        eprintln!("  {}: {}", error.id, error.message);
    }
    println!("results: {}", roots.results_root.join(&timestamp).display());
    Ok(if summary.has_failures() {
        exit_codes::FAILED
    } else {
        exit_codes::OK
    })
}

/// Judge every run of a batch.
pub async fn judge_batch(config: &BenchConfig, args: &JudgeArgs) -> Result<i32> {
    let batch_dir = batch_dir(&config.results_dir, &args.timestamp)?;
    let judge = HttpJudge::from_config(&config.judge, http_client()?)?;
    let options = JudgeOptions {
        parallel: args.parallel.unwrap_or(config.judge.parallel),
        force: args.force,
        max_section_bytes: config.judge.max_section_bytes,
    };

    let outcome = judge_runs(&judge, &batch_dir, options).await?;
    println!(
        "judged: {} succeeded, {} failed, {} skipped (already judged)",
        outcome.summary.completed, outcome.summary.failed, outcome.skipped
    );
    for error in &outcome.summary.errors {
        eprintln!("  {}: {}", error.id, error.message);
    }
    Ok(if outcome.summary.has_failures() {
        exit_codes::FAILED
    } else {
        exit_codes::OK
    })
}

/// Print discovered tasks with their tags.
pub fn list_tasks(config: &BenchConfig, tags: &[String]) -> Result<i32> {
    let filter = TaskFilter::from_options(&[], tags)?;
    let tasks = filter.apply(discover_tasks(&config.tasks_dir, &[])?)?;
    for task in tasks {
        let tags: Vec<&str> = task.tags.iter().map(String::as_str).collect();
        println!("{}\t{}", task.name, tags.join(","));
    }
    Ok(exit_codes::OK)
}

/// Print per-run lines and totals for a batch.
pub fn report_batch(config: &BenchConfig, timestamp: &str) -> Result<i32> {
    let batch_dir = batch_dir(&config.results_dir, timestamp)?;
    let (runs, warnings) = aggregate(&batch_dir)?;
    for run in &runs {
        println!("{}", run.line());
    }
    let judged = runs.iter().filter(|run| run.judged).count();
    let lint_passed = runs
        .iter()
        .filter(|run| run.lint.passed() == Some(true))
        .count();
    let tests_passed = runs
        .iter()
        .filter(|run| run.tests.passed() == Some(true))
        .count();
    println!(
        "report: batch={timestamp} runs={} lint_passed={lint_passed} tests_passed={tests_passed} judged={judged}",
        runs.len()
    );
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
    Ok(exit_codes::OK)
}

/// Remove the workspaces a batch left behind (e.g. after a crash).
pub async fn clean_batch(
    config: &BenchConfig,
    timestamp: &str,
    workspace: Option<&Path>,
) -> Result<i32> {
    validate_timestamp(timestamp)?;
    let root = workspace.unwrap_or(&config.workspace_dir);
    let dir = root.join(timestamp);
    if !dir.exists() {
        println!("clean: nothing to remove at {}", dir.display());
        return Ok(exit_codes::OK);
    }
    tokio::fs::remove_dir_all(&dir)
        .await
        .with_context(|| format!("remove {}", dir.display()))?;
    println!("clean: removed {}", dir.display());
    Ok(exit_codes::OK)
}

/// Reject bad references and targets before any workspace exists.
fn preflight(tasks: &[TaskDefinition]) -> Result<()> {
    for task in tasks {
        RepoRef::parse_start_from(&task.name, &task.start_from)?;
        for spec in &task.augmentations {
            validate_target(&spec.target)?;
        }
    }
    debug!(tasks = tasks.len(), "preflight passed");
    Ok(())
}

fn batch_dir(results_dir: &Path, timestamp: &str) -> Result<PathBuf> {
    validate_timestamp(timestamp)?;
    let dir = results_dir.join(timestamp);
    if !dir.is_dir() {
        bail!("batch {} not found at {}", timestamp, dir.display());
    }
    Ok(dir)
}

fn validate_timestamp(timestamp: &str) -> Result<()> {
    let valid = !timestamp.is_empty()
        && timestamp
            .chars()
            .all(|ch| ch.is_ascii_digit() || ch == '_');
    if !valid {
        bail!("invalid batch timestamp {timestamp:?} (expected e.g. 20260101_120000)");
    }
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("resolve {}", path.display()))
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .context("build http client")
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness::error::ConfigError;
    use harness::test_support::task;

    #[test]
    fn preflight_rejects_bad_start_from_and_targets() {
        let mut bad_ref = task("a");
        bad_ref.start_from = "https://gitlab.com/acme/app".to_string();
        let err = preflight(&[bad_ref]).expect_err("bad host");
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::StartFromWrongHost { .. })
        ));

        let mut bad_target = task("b");
        bad_target
            .augmentations
            .push(harness::core::types::AugmentationSpec {
                source: "x".to_string(),
                target: "../x".to_string(),
                mode: Default::default(),
                base_dir: None,
            });
        assert!(preflight(&[bad_target]).is_err());
        preflight(&[task("c")]).expect("valid");
    }

    #[test]
    fn timestamps_must_look_like_batches() {
        validate_timestamp("20260101_120000").expect("valid");
        assert!(validate_timestamp("../etc").is_err());
        assert!(validate_timestamp("").is_err());
    }

    #[tokio::test]
    async fn clean_removes_only_the_batch_folder() {
        let temp = tempfile::tempdir().expect("tempdir");
        let keep = temp.path().join("20260101_000000/t-claude");
        let gone = temp.path().join("20260102_000000/t-claude");
        std::fs::create_dir_all(&keep).expect("mkdir");
        std::fs::create_dir_all(&gone).expect("mkdir");

        let code = clean_batch(&BenchConfig::default(), "20260102_000000", Some(temp.path()))
            .await
            .expect("clean");

        assert_eq!(code, exit_codes::OK);
        assert!(keep.exists());
        assert!(!temp.path().join("20260102_000000").exists());
    }
}
