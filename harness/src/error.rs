//! Configuration errors that abort an invocation before any workspace work.

use thiserror::Error;

/// Invalid input detected while loading tasks, parsing references, or
/// resolving CLI options. Every variant means "nothing was run".
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("task {task}: startFrom is missing")]
    MissingStartFrom { task: String },
    #[error("startFrom is not a valid URL: {value}")]
    StartFromNotUrl { value: String },
    #[error("startFrom must be a github.com repository URL: {value}")]
    StartFromWrongHost { value: String },
    #[error("startFrom must name an organization and a repository: {value}")]
    StartFromMissingSegments { value: String },
    #[error("--task and --tag are mutually exclusive")]
    ConflictingFilters,
    #[error("augmentations file {path} must contain a sequence")]
    AugmentationsNotSequence { path: String },
    #[error("augmentation target {target} must be a relative path inside the workspace")]
    InvalidTarget { target: String },
    #[error("unknown agent {name} (known agents: {known})")]
    UnknownAgent { name: String, known: String },
    #[error("agent name {name:?} has no letters or digits to name folders with")]
    InvalidAgentName { name: String },
    #[error("unknown task(s): {names}")]
    UnknownTasks { names: String },
    #[error("duplicate task name {name}")]
    DuplicateTask { name: String },
}
