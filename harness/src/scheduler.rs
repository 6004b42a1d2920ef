//! Bounded-concurrency batch runner.
//!
//! One FIFO queue feeds up to `concurrency` lanes. A lane pops the next item
//! when it becomes free and ends when the queue is empty. Lanes are futures
//! joined on the caller's task, so there is no spawning and no `'static`
//! bound on the items or the processing closure.

use std::collections::VecDeque;
use std::future::Future;
use std::io::{IsTerminal, Write};
use std::sync::Mutex;

use anyhow::Result;
use futures::future::join_all;
use tracing::{debug, instrument, warn};

use crate::core::progress::{BatchProgress, ItemError};

/// Scheduler knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelOptions {
    /// Maximum lanes. `0` is treated as `1`.
    pub concurrency: usize,
    /// Redraw a single status line on stderr (only when stderr is a terminal).
    pub show_status: bool,
}

impl ParallelOptions {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            show_status: false,
        }
    }
}

/// Final counts of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// In the order failures happened.
    pub errors: Vec<ItemError>,
}

impl BatchSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Run every item through `process`, at most `options.concurrency` at a time.
///
/// An item's error is recorded and never stops other items. The batch always
/// runs to completion. `id_of` names items in the error log, `label_of` in the
/// status line.
#[instrument(skip_all, fields(total = items.len(), concurrency = options.concurrency))]
pub async fn run_batch<T, F, Fut>(
    items: Vec<T>,
    options: ParallelOptions,
    id_of: impl Fn(&T) -> String,
    label_of: impl Fn(&T) -> String,
    process: F,
) -> BatchSummary
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let total = items.len();
    let lanes = options.concurrency.max(1).min(total);
    let status = StatusLine::new(options.show_status);
    let queue = Mutex::new(VecDeque::from(items));
    let progress = Mutex::new(BatchProgress::new(total));
    debug!(lanes, "starting batch");

    let lane = |index: usize| {
        let queue = &queue;
        let progress = &progress;
        let process = &process;
        let id_of = &id_of;
        let label_of = &label_of;
        let status = &status;
        async move {
            loop {
                let Some(item) = pop(queue) else {
                    debug!(lane = index, "queue empty, lane done");
                    break;
                };
                let id = id_of(&item);
                let label = label_of(&item);
                update(progress, status, |p| p.start(&id, &label));
                match process(item).await {
                    Ok(()) => update(progress, status, |p| p.complete(&id)),
                    Err(err) => {
                        let message = format!("{err:#}");
                        warn!(id = %id, err = %message, "item failed");
                        update(progress, status, |p| p.fail(&id, message));
                    }
                }
            }
        }
    };
    join_all((0..lanes).map(lane)).await;
    status.finish();

    let progress = progress
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    BatchSummary {
        total: progress.total(),
        completed: progress.completed(),
        failed: progress.failed(),
        errors: progress.errors().to_vec(),
    }
}

/// Like [`run_batch`] with items labelled by their id, returning only whether
/// any item failed.
pub async fn run_in_parallel<T, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    id_of: impl Fn(&T) -> String,
    process: F,
) -> bool
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    run_batch(items, ParallelOptions::new(concurrency), &id_of, &id_of, process)
        .await
        .has_failures()
}

fn pop<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .pop_front()
}

// The lock is never held across an await, so transitions are atomic with
// respect to each other.
fn update(progress: &Mutex<BatchProgress>, status: &StatusLine, f: impl FnOnce(&mut BatchProgress)) {
    let mut guard = progress
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard);
    status.draw(&guard);
}

/// Single redrawn line on stderr.
struct StatusLine {
    enabled: bool,
}

impl StatusLine {
    fn new(requested: bool) -> Self {
        Self {
            enabled: requested && std::io::stderr().is_terminal(),
        }
    }

    fn draw(&self, progress: &BatchProgress) {
        if !self.enabled {
            return;
        }
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r\x1b[2K{}", progress.status_line());
        let _ = stderr.flush();
    }

    fn finish(&self) {
        if self.enabled {
            eprintln!();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::bail;

    #[tokio::test]
    async fn concurrency_one_preserves_input_order() {
        let seen = Mutex::new(Vec::new());
        let items: Vec<usize> = (0..6).collect();

        let failed = run_in_parallel(items, 1, |i| i.to_string(), |i| {
            let seen = &seen;
            async move {
                // Later items finish faster; order must still follow the queue.
                tokio::time::sleep(Duration::from_millis(6 - i as u64)).await;
                seen.lock().expect("lock").push(i);
                anyhow::Ok(())
            }
        })
        .await;

        assert!(!failed);
        assert_eq!(seen.into_inner().expect("lock"), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn failure_does_not_stop_queued_items() {
        let attempted = AtomicUsize::new(0);
        let items = vec!["a", "b", "c", "d"];

        let summary = run_batch(items, ParallelOptions::new(2), |s| s.to_string(), |s| format!("item {s}"), |s| {
            let attempted = &attempted;
            async move {
                attempted.fetch_add(1, Ordering::SeqCst);
                if s == "b" {
                    bail!("boom");
                }
                Ok(())
            }
        })
        .await;

        assert_eq!(attempted.load(Ordering::SeqCst), 4);
        assert!(summary.has_failures());
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.errors,
            vec![ItemError {
                id: "b".to_string(),
                message: "boom".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn never_exceeds_concurrency_and_uses_all_lanes() {
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let items: Vec<u32> = (0..10).collect();
        let summary = run_batch(items, ParallelOptions::new(3), |i| i.to_string(), |i| format!("item {i}"), |_| {
            let running = &running;
            let peak = &peak;
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        })
        .await;

        assert_eq!(summary.completed, 10);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn wide_concurrency_starts_everything_together() {
        let started = AtomicUsize::new(0);
        let all_started = tokio::sync::Notify::new();

        let summary = run_batch(vec![1, 2, 3], ParallelOptions::new(8), |i| i.to_string(), |i| format!("item {i}"), |_| {
            let started = &started;
            let all_started = &all_started;
            async move {
                if started.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                    all_started.notify_waiters();
                } else {
                    // Would deadlock unless the other items are already running.
                    tokio::time::timeout(Duration::from_secs(5), all_started.notified())
                        .await
                        .map_err(|_| anyhow::anyhow!("peers never started"))?;
                }
                Ok(())
            }
        })
        .await;

        assert_eq!(summary.completed, 3);
        assert!(!summary.has_failures());
    }

    #[tokio::test]
    async fn empty_batch_and_zero_concurrency() {
        let summary = run_batch(
            Vec::<u8>::new(),
            ParallelOptions::new(4),
            |i| i.to_string(),
            |i| format!("item {i}"),
            |_| async { anyhow::Ok(()) },
        )
        .await;
        assert_eq!(summary.total, 0);
        assert!(!summary.has_failures());

        let failed =
            run_in_parallel(vec![1u8, 2], 0, |i| i.to_string(), |_| async { anyhow::Ok(()) })
                .await;
        assert!(!failed);
    }
}
