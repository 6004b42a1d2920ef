//! Reproducible coding-agent trials.
//!
//! A batch expands tasks × agents into run records, then drives every record
//! through provision → invoke → capture → cleanup with bounded concurrency.
//! The layout keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (data model, enrichment, URL
//!   grammar, filters, progress). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, processes, HTTP).
//!
//! [`pipeline`] sequences the stages of one record and [`scheduler`] runs many
//! records at once without letting one failure stop the rest.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod scheduler;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
