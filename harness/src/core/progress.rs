//! Progress bookkeeping for one scheduler invocation.
//!
//! A fresh [`BatchProgress`] is created per batch and mutated only through
//! [`BatchProgress::start`], [`BatchProgress::complete`] and
//! [`BatchProgress::fail`].

use std::collections::BTreeMap;

/// A failed item and the rendered error chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    pub id: String,
    pub message: String,
}

/// Live counters and error log for a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    total: usize,
    in_flight: BTreeMap<String, String>,
    completed: usize,
    failed: usize,
    errors: Vec<ItemError>,
}

impl BatchProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            in_flight: BTreeMap::new(),
            completed: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }

    pub fn start(&mut self, id: &str, label: &str) {
        self.in_flight.insert(id.to_string(), label.to_string());
    }

    pub fn complete(&mut self, id: &str) {
        self.in_flight.remove(id);
        self.completed += 1;
    }

    pub fn fail(&mut self, id: &str, message: impl Into<String>) {
        self.in_flight.remove(id);
        self.failed += 1;
        self.errors.push(ItemError {
            id: id.to_string(),
            message: message.into(),
        });
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn running(&self) -> usize {
        self.in_flight.len()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Errors in the order items failed.
    pub fn errors(&self) -> &[ItemError] {
        &self.errors
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// One-line status, e.g. `running 2 | done 1 | failed 0 | total 5 | a-claude, b-claude`.
    pub fn status_line(&self) -> String {
        let mut line = format!(
            "running {} | done {} | failed {} | total {}",
            self.running(),
            self.completed,
            self.failed,
            self.total
        );
        if !self.in_flight.is_empty() {
            let labels: Vec<&str> = self.in_flight.values().map(String::as_str).collect();
            line.push_str(" | ");
            line.push_str(&labels.join(", "));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_update_counters() {
        let mut progress = BatchProgress::new(3);
        progress.start("a", "a");
        progress.start("b", "b");
        assert_eq!(progress.running(), 2);

        progress.complete("a");
        progress.fail("b", "boom");
        assert_eq!(progress.running(), 0);
        assert_eq!(progress.completed(), 1);
        assert_eq!(progress.failed(), 1);
        assert!(progress.has_failures());
        assert_eq!(
            progress.errors(),
            &[ItemError {
                id: "b".to_string(),
                message: "boom".to_string()
            }]
        );
    }

    #[test]
    fn status_line_lists_in_flight_labels() {
        let mut progress = BatchProgress::new(4);
        progress.start("x", "task-x/claude");
        progress.start("y", "task-y/cursor");
        progress.complete("x");
        assert_eq!(
            progress.status_line(),
            "running 1 | done 1 | failed 0 | total 4 | task-y/cursor"
        );
    }
}
