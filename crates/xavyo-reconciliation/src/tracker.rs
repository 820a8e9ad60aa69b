//! Propagation tracker.
//!
//! Holds, for one execution, the outcome of every (item, resource) pair.
//! Each pair is written exactly once; a second write is a programming error
//! and surfaces as a fatal [`ReconciliationError::InvariantViolation`].

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ReconciliationError, ReconciliationResult};
use crate::report::ExecutionStatus;

/// Outcome of propagating one item to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropagationOutcome {
    Success,
    Failure,
    /// Registered but never attempted, e.g. after a fatal error.
    NotAttempted,
}

impl PropagationOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PropagationOutcome::Success => "SUCCESS",
            PropagationOutcome::Failure => "FAILURE",
            PropagationOutcome::NotAttempted => "NOT_ATTEMPTED",
        }
    }
}

impl fmt::Display for PropagationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a tracked propagation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropagationKey {
    pub item: String,
    pub resource: String,
}

impl PropagationKey {
    pub fn new(item: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            resource: resource.into(),
        }
    }
}

/// Status of one (item, resource) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationStatus {
    pub outcome: PropagationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip)]
    finalized: bool,
}

/// Counts by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationSummary {
    pub success: usize,
    pub failure: usize,
    pub not_attempted: usize,
}

impl PropagationSummary {
    pub fn total(&self) -> usize {
        self.success + self.failure + self.not_attempted
    }
}

/// Per-execution map of propagation statuses.
#[derive(Debug, Default)]
pub struct PropagationTracker {
    entries: DashMap<PropagationKey, PropagationStatus>,
}

impl PropagationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pair as pending so that it shows up as `NOT_ATTEMPTED` if
    /// the execution stops before recording it.
    pub fn begin(&self, item: &str, resource: &str) {
        self.entries
            .entry(PropagationKey::new(item, resource))
            .or_insert(PropagationStatus {
                outcome: PropagationOutcome::NotAttempted,
                message: None,
                finalized: false,
            });
    }

    /// Record the final outcome for a pair. First write wins.
    pub fn record(
        &self,
        item: &str,
        resource: &str,
        outcome: PropagationOutcome,
        message: Option<String>,
    ) -> ReconciliationResult<()> {
        let status = PropagationStatus {
            outcome,
            message,
            finalized: true,
        };
        match self.entries.entry(PropagationKey::new(item, resource)) {
            Entry::Occupied(entry) if entry.get().finalized => {
                Err(ReconciliationError::invariant(format!(
                    "propagation status for item '{item}' on resource '{resource}' recorded twice"
                )))
            }
            Entry::Occupied(mut entry) => {
                entry.insert(status);
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(status);
                Ok(())
            }
        }
    }

    pub fn get(&self, item: &str, resource: &str) -> Option<PropagationStatus> {
        self.entries
            .get(&PropagationKey::new(item, resource))
            .map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summary(&self) -> PropagationSummary {
        let mut summary = PropagationSummary::default();
        for entry in self.entries.iter() {
            match entry.outcome {
                PropagationOutcome::Success => summary.success += 1,
                PropagationOutcome::Failure => summary.failure += 1,
                PropagationOutcome::NotAttempted => summary.not_attempted += 1,
            }
        }
        summary
    }

    /// All entries, sorted by key.
    pub fn entries(&self) -> Vec<(PropagationKey, PropagationStatus)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// `SUCCESS` only if every tracked pair succeeded.
    pub fn execution_status(&self) -> ExecutionStatus {
        let summary = self.summary();
        if summary.failure == 0 && summary.not_attempted == 0 {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::SuccessWithErrors
        }
    }
}
