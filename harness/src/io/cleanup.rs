//! Best-effort workspace removal.

use std::io::ErrorKind;

use tracing::{debug, warn};

use crate::core::types::RunRecord;

/// Remove the record's workspace. Failures are logged, never returned.
pub async fn cleanup(record: &RunRecord) {
    let dir = &record.workspace_dir;
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "removed workspace"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(dir = %dir.display(), err = %err, "failed to remove workspace"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{run_record, task};

    #[tokio::test]
    async fn removes_workspace_and_tolerates_repeats() {
        let temp = tempfile::tempdir().expect("tempdir");
        let record = run_record(&task("t"), "codex", temp.path());
        std::fs::create_dir_all(record.workspace_dir.join("src")).expect("mkdir");
        std::fs::write(record.workspace_dir.join("src/lib.rs"), "").expect("write");

        cleanup(&record).await;
        assert!(!record.workspace_dir.exists());
        cleanup(&record).await;
    }
}
