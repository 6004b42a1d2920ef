//! Task discovery: `tasks/{name}/{task.json,prompt.txt,criteria.txt}`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::core::types::{AugmentationSpec, TaskDefinition};
use crate::error::ConfigError;

pub const TASK_FILE: &str = "task.json";
pub const PROMPT_FILE: &str = "prompt.txt";
pub const CRITERIA_FILE: &str = "criteria.txt";

/// On-disk `task.json`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct TaskFile {
    /// Defaults to the folder name.
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    start_from: String,
    #[serde(default)]
    augmentations: Vec<AugmentationSpec>,
}

/// Load every complete task under `root`, sorted by name.
///
/// Folders missing any of the three required files are skipped. `global`
/// augmentations are prepended to each task's own list.
pub fn discover_tasks(root: &Path, global: &[AugmentationSpec]) -> Result<Vec<TaskDefinition>> {
    let entries =
        fs::read_dir(root).with_context(|| format!("read tasks dir {}", root.display()))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read tasks dir {}", root.display()))?;
        if entry.file_type().is_ok_and(|ty| ty.is_dir()) {
            dirs.push(entry.path());
        }
    }
    dirs.sort();

    let mut tasks = Vec::new();
    let mut seen = BTreeSet::new();
    for dir in dirs {
        let Some(task) = load_task(&dir, global)? else {
            debug!(dir = %dir.display(), "skipping incomplete task folder");
            continue;
        };
        if !seen.insert(task.name.clone()) {
            return Err(ConfigError::DuplicateTask { name: task.name }.into());
        }
        tasks.push(task);
    }
    tasks.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(tasks)
}

/// Load one task folder. `Ok(None)` when a required file is missing.
pub fn load_task(dir: &Path, global: &[AugmentationSpec]) -> Result<Option<TaskDefinition>> {
    let task_path = dir.join(TASK_FILE);
    let prompt_path = dir.join(PROMPT_FILE);
    let criteria_path = dir.join(CRITERIA_FILE);
    if !(task_path.is_file() && prompt_path.is_file() && criteria_path.is_file()) {
        return Ok(None);
    }

    let raw = fs::read_to_string(&task_path)
        .with_context(|| format!("read {}", task_path.display()))?;
    let file: TaskFile =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", task_path.display()))?;
    let prompt = fs::read_to_string(&prompt_path)
        .with_context(|| format!("read {}", prompt_path.display()))?;
    let criteria = fs::read_to_string(&criteria_path)
        .with_context(|| format!("read {}", criteria_path.display()))?;

    let folder_name = dir
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = file
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(folder_name);

    let mut augmentations = global.to_vec();
    augmentations.extend(file.augmentations.into_iter().map(|mut spec| {
        spec.base_dir = Some(dir.to_path_buf());
        spec
    }));

    Ok(Some(TaskDefinition {
        name,
        description: file.description,
        tags: file.tags,
        start_from: file.start_from,
        augmentations,
        prompt,
        criteria,
        dir: dir.to_path_buf(),
    }))
}

/// Load a global augmentation list (YAML or JSON).
///
/// The document must be a sequence. Relative local sources resolve against
/// the file's own folder.
pub fn load_global_augmentations(path: &Path) -> Result<Vec<AugmentationSpec>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let doc: serde_yaml::Value =
        serde_yaml::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    if !doc.is_sequence() {
        return Err(ConfigError::AugmentationsNotSequence {
            path: path.display().to_string(),
        }
        .into());
    }
    let specs: Vec<AugmentationSpec> =
        serde_yaml::from_value(doc).with_context(|| format!("parse {}", path.display()))?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok(specs
        .into_iter()
        .map(|mut spec| {
            spec.base_dir = Some(base_dir.clone());
            spec
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AugmentMode;

    fn write_task(root: &Path, folder: &str, task_json: &str) {
        let dir = root.join(folder);
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(TASK_FILE), task_json).expect("task.json");
        fs::write(dir.join(PROMPT_FILE), "do the thing").expect("prompt");
        fs::write(dir.join(CRITERIA_FILE), "thing is done").expect("criteria");
    }

    #[test]
    fn loads_complete_tasks_and_skips_partial_folders() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_task(
            temp.path(),
            "b-task",
            r#"{"name":"b-task","tags":["ui","auth"],"startFrom":"https://github.com/o/r"}"#,
        );
        write_task(temp.path(), "a-task", r#"{"startFrom":"https://github.com/o/r"}"#);
        let partial = temp.path().join("wip");
        fs::create_dir_all(&partial).expect("mkdir");
        fs::write(partial.join(TASK_FILE), "{}").expect("task.json");

        let tasks = discover_tasks(temp.path(), &[]).expect("discover");
        let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a-task", "b-task"]);
        assert_eq!(tasks[1].tags.len(), 2);
        assert_eq!(tasks[0].prompt, "do the thing");
        assert_eq!(tasks[0].criteria, "thing is done");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_task(temp.path(), "one", r#"{"name":"same"}"#);
        write_task(temp.path(), "two", r#"{"name":"same"}"#);

        let err = discover_tasks(temp.path(), &[]).expect_err("duplicate");
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::DuplicateTask {
                name: "same".to_string()
            })
        );
    }

    #[test]
    fn global_augmentations_are_prepended() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_task(
            temp.path(),
            "t",
            r#"{"augmentations":[{"source":"local.md","target":"AGENTS.md","mode":"replace"}]}"#,
        );
        let global_path = temp.path().join("global.yaml");
        fs::write(
            &global_path,
            "- source: rules/\n  target: .rules\n- source: https://example.com/a.md\n  target: a.md\n",
        )
        .expect("write");

        let global = load_global_augmentations(&global_path).expect("global");
        let tasks = discover_tasks(temp.path(), &global).expect("discover");
        let augs = &tasks[0].augmentations;
        assert_eq!(augs.len(), 3);
        assert_eq!(augs[0].target, ".rules");
        assert_eq!(augs[0].base_dir.as_deref(), Some(temp.path()));
        assert_eq!(augs[2].target, "AGENTS.md");
        assert_eq!(augs[2].mode, AugmentMode::Replace);
        assert_eq!(augs[2].base_dir.as_deref(), Some(temp.path().join("t").as_path()));
    }

    #[test]
    fn global_augmentations_must_be_a_sequence() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("global.yaml");
        fs::write(&path, "source: a\ntarget: b\n").expect("write");

        let err = load_global_augmentations(&path).expect_err("mapping");
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::AugmentationsNotSequence { .. })
        ));
    }
}
