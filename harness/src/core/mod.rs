//! Pure, deterministic logic. No filesystem, git, or network access.

pub mod enrich;
pub mod filter;
pub mod progress;
pub mod repo_ref;
pub mod sanitize;
pub mod source;
pub mod types;
