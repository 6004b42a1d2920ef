//! Stable exit codes for the `bench` CLI.

/// Every item in the batch succeeded (or the command had nothing to fail).
pub const OK: i32 = 0;
/// Invalid configuration or usage; nothing was run.
pub const INVALID: i32 = 1;
/// The scheduler reported at least one failed item.
pub const FAILED: i32 = 2;
