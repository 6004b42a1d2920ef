//! Task selection by explicit names or by tags (never both).

use std::collections::BTreeSet;

use crate::core::types::TaskDefinition;
use crate::error::ConfigError;

/// Which discovered tasks a batch runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFilter {
    All,
    /// Exactly these task names; unknown names are an error.
    Names(BTreeSet<String>),
    /// Any task carrying at least one of these tags.
    Tags(BTreeSet<String>),
}

impl TaskFilter {
    /// Build a filter from `--task` / `--tag` values. Supplying both is a usage error.
    pub fn from_options(names: &[String], tags: &[String]) -> Result<Self, ConfigError> {
        let names = clean(names);
        let tags = clean(tags);
        match (names.is_empty(), tags.is_empty()) {
            (false, false) => Err(ConfigError::ConflictingFilters),
            (false, true) => Ok(TaskFilter::Names(names)),
            (true, false) => Ok(TaskFilter::Tags(tags)),
            (true, true) => Ok(TaskFilter::All),
        }
    }

    pub fn matches(&self, task: &TaskDefinition) -> bool {
        match self {
            TaskFilter::All => true,
            TaskFilter::Names(names) => names.contains(&task.name),
            TaskFilter::Tags(tags) => task.tags.iter().any(|tag| tags.contains(tag)),
        }
    }

    /// Keep matching tasks, preserving discovery order.
    pub fn apply(&self, tasks: Vec<TaskDefinition>) -> Result<Vec<TaskDefinition>, ConfigError> {
        if let TaskFilter::Names(names) = self {
            let known: BTreeSet<&str> = tasks.iter().map(|task| task.name.as_str()).collect();
            let missing: Vec<&str> = names
                .iter()
                .map(String::as_str)
                .filter(|name| !known.contains(name))
                .collect();
            if !missing.is_empty() {
                return Err(ConfigError::UnknownTasks {
                    names: missing.join(", "),
                });
            }
        }
        Ok(tasks.into_iter().filter(|task| self.matches(task)).collect())
    }
}

fn clean(values: &[String]) -> BTreeSet<String> {
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}
