//! Expansion of (tasks × agents) into run records sharing one batch timestamp.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::Utc;

use crate::core::sanitize::sanitize_agent;
use crate::core::types::{RunRecord, TaskDefinition, run_folder_name};
use crate::error::ConfigError;

/// Base directories a batch is laid out under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRoots {
    /// Ephemeral clones live under `{workspace_root}/{timestamp}/`.
    pub workspace_root: PathBuf,
    /// Captured artifacts live under `{results_root}/{timestamp}/`.
    pub results_root: PathBuf,
}

/// Mint a batch timestamp (`YYYYmmdd_HHMMSS`, UTC).
pub fn batch_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Agents with distinct folder names, in first-seen order.
///
/// `claude` and `Claude` share a folder, so only the first spelling is kept.
/// A name with nothing folder-safe in it is rejected.
pub fn unique_agents(agents: &[String]) -> Result<Vec<String>, ConfigError> {
    let mut seen = BTreeSet::new();
    let mut unique = Vec::with_capacity(agents.len());
    for agent in agents {
        let key = sanitize_agent(agent);
        if key.is_empty() {
            return Err(ConfigError::InvalidAgentName {
                name: agent.clone(),
            });
        }
        if seen.insert(key) {
            unique.push(agent.clone());
        }
    }
    Ok(unique)
}

/// Build one [`RunRecord`] per task × agent pair, task-major, all sharing a
/// single freshly minted timestamp. Agents that fold to an already used
/// folder name are skipped, so every record owns its paths.
pub fn enrich(tasks: &[TaskDefinition], agents: &[String], roots: &BatchRoots) -> Vec<RunRecord> {
    enrich_at(tasks, agents, roots, &batch_timestamp())
}

/// [`enrich`] with an explicit timestamp.
pub fn enrich_at(
    tasks: &[TaskDefinition],
    agents: &[String],
    roots: &BatchRoots,
    timestamp: &str,
) -> Vec<RunRecord> {
    let mut seen = BTreeSet::new();
    let agents: Vec<&String> = agents
        .iter()
        .filter(|agent| seen.insert(sanitize_agent(agent)))
        .collect();
    let mut records = Vec::with_capacity(tasks.len() * agents.len());
    for task in tasks {
        for &agent in &agents {
            let folder = run_folder_name(&task.name, agent);
            records.push(RunRecord {
                task: task.clone(),
                agent: agent.clone(),
                timestamp: timestamp.to_string(),
                workspace_dir: roots.workspace_root.join(timestamp).join(&folder),
                result_dir: roots.results_root.join(timestamp).join(&folder),
            });
        }
    }
    records
}
