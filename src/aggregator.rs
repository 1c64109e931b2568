//! Collects finalized per-host outcomes in arrival order.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::report::Report;
use crate::task::Outcome;

/// Aggregate success count over finalized hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,
}

impl Summary {
    pub fn of(results: &[Outcome]) -> Self {
        Self {
            total: results.len(),
            succeeded: results.iter().filter(|o| o.succeeded).count(),
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "completed: {}/{} ok", self.succeeded, self.total)
    }
}

/// Finalized outcomes, one per host, in the order hosts were finalized.
#[derive(Debug)]
pub struct ResultAggregator {
    command: String,
    started_at: DateTime<Utc>,
    results: Vec<Outcome>,
    /// Host → position in `results`.
    index: HashMap<String, usize>,
}

impl ResultAggregator {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            started_at: Utc::now(),
            results: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Record the terminal outcome for a host. A second outcome for the same
    /// host replaces the first in place.
    pub fn finalize(&mut self, outcome: Outcome) {
        match self.index.get(&outcome.host) {
            Some(&pos) => self.results[pos] = outcome,
            None => {
                self.index.insert(outcome.host.clone(), self.results.len());
                self.results.push(outcome);
            }
        }
    }

    pub fn is_finalized(&self, host: &str) -> bool {
        self.index.contains_key(host)
    }

    pub fn summary(&self) -> Summary {
        Summary::of(&self.results)
    }

    pub fn export(self, interrupted: bool) -> Report {
        Report {
            command: self.command,
            started_at: self.started_at.to_rfc3339(),
            completed_at: Utc::now().to_rfc3339(),
            interrupted,
            results: self.results,
        }
    }
}
