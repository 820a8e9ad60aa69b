//! Execution reports.
//!
//! One [`ExecutionReport`] is produced per pull or push execution and handed
//! to reporting and remediation collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::ids::{ExecutionId, TenantId};
use crate::model::TaskDirection;
use crate::policy::DecisionKind;
use crate::tracker::{
    PropagationKey, PropagationOutcome, PropagationStatus, PropagationSummary, PropagationTracker,
};

/// Overall status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Every item succeeded.
    Success,
    /// The execution ran to the end but some items failed.
    SuccessWithErrors,
    /// A fatal error stopped the execution.
    Failed,
    /// The execution was cancelled.
    Cancelled,
}

impl ExecutionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::SuccessWithErrors => "SUCCESS_WITH_ERRORS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Created,
    Updated,
    Deleted,
    Ignored,
    Remediated,
    Failed,
}

impl ItemOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemOutcome::Created => "created",
            ItemOutcome::Updated => "updated",
            ItemOutcome::Deleted => "deleted",
            ItemOutcome::Ignored => "ignored",
            ItemOutcome::Remediated => "remediated",
            ItemOutcome::Failed => "failed",
        }
    }

    /// Propagation status recorded for this outcome. Remediation counts as
    /// a failure since nothing was applied.
    pub fn propagation(&self) -> PropagationOutcome {
        match self {
            ItemOutcome::Created
            | ItemOutcome::Updated
            | ItemOutcome::Deleted
            | ItemOutcome::Ignored => PropagationOutcome::Success,
            ItemOutcome::Remediated | ItemOutcome::Failed => PropagationOutcome::Failure,
        }
    }

    /// Outcome of a successfully applied decision.
    pub fn applied(kind: DecisionKind) -> Self {
        match kind {
            DecisionKind::Create => ItemOutcome::Created,
            DecisionKind::Update => ItemOutcome::Updated,
            DecisionKind::Delete => ItemOutcome::Deleted,
            DecisionKind::Remediate => ItemOutcome::Remediated,
            DecisionKind::Conflict => ItemOutcome::Failed,
            DecisionKind::NoOp => ItemOutcome::Ignored,
        }
    }
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of processing one item against one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningReport {
    /// Connector object key (pull) or internal key (push).
    pub key: String,
    /// Resource the item was synchronized with.
    pub resource: String,
    /// Decision taken by the conflict policy; absent when processing
    /// failed before a decision was reached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<DecisionKind>,
    /// Final outcome.
    pub outcome: ItemOutcome,
    /// Reason or error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Remediation record filed for this item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_id: Option<Uuid>,
}

impl ProvisioningReport {
    pub fn new(key: impl Into<String>, resource: impl Into<String>, outcome: ItemOutcome) -> Self {
        Self {
            key: key.into(),
            resource: resource.into(),
            operation: None,
            outcome,
            message: None,
            remediation_id: None,
        }
    }

    #[must_use]
    pub fn with_operation(mut self, operation: DecisionKind) -> Self {
        self.operation = Some(operation);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_remediation(mut self, id: Uuid) -> Self {
        self.remediation_id = Some(id);
        self
    }
}

/// Item counts by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCounts {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub ignored: usize,
    pub remediated: usize,
    pub failed: usize,
}

impl ExecutionCounts {
    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Created => self.created += 1,
            ItemOutcome::Updated => self.updated += 1,
            ItemOutcome::Deleted => self.deleted += 1,
            ItemOutcome::Ignored => self.ignored += 1,
            ItemOutcome::Remediated => self.remediated += 1,
            ItemOutcome::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted + self.ignored + self.remediated + self.failed
    }

    /// Number of store or connector mutations performed.
    pub fn mutations(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Propagation entry as exposed in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationEntry {
    pub item: String,
    pub resource: String,
    pub outcome: PropagationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<(PropagationKey, PropagationStatus)> for PropagationEntry {
    fn from((key, status): (PropagationKey, PropagationStatus)) -> Self {
        Self {
            item: key.item,
            resource: key.resource,
            outcome: status.outcome,
            message: status.message,
        }
    }
}

/// Summary of one task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Execution ID.
    pub execution_id: ExecutionId,
    /// Task that was executed.
    pub task_key: String,
    /// Tenant the execution ran for.
    pub tenant_id: TenantId,
    /// Pull or push.
    pub direction: TaskDirection,
    /// Started at.
    pub start_time: DateTime<Utc>,
    /// Finished at.
    pub end_time: DateTime<Utc>,
    /// Overall status.
    pub status: ExecutionStatus,
    /// Counts by item outcome.
    pub counts: ExecutionCounts,
    /// Remediation records filed during this execution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remediation_refs: Vec<Uuid>,
    /// Whether mutations were suppressed.
    pub dry_run: bool,
    /// Per-item results, in processing order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ProvisioningReport>,
    /// Counts by propagation outcome.
    pub propagation: PropagationSummary,
    /// Per (item, resource) propagation statuses, sorted by key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub propagation_entries: Vec<PropagationEntry>,
    /// Fatal error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionReport {
    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Accumulates item results while an execution runs.
#[derive(Debug)]
pub(crate) struct ReportBuilder {
    execution_id: ExecutionId,
    task_key: String,
    tenant_id: TenantId,
    direction: TaskDirection,
    start_time: DateTime<Utc>,
    dry_run: bool,
    counts: ExecutionCounts,
    items: Vec<ProvisioningReport>,
}

impl ReportBuilder {
    pub(crate) fn new(
        execution_id: ExecutionId,
        task_key: &str,
        tenant_id: TenantId,
        direction: TaskDirection,
        dry_run: bool,
    ) -> Self {
        Self {
            execution_id,
            task_key: task_key.to_string(),
            tenant_id,
            direction,
            start_time: Utc::now(),
            dry_run,
            counts: ExecutionCounts::default(),
            items: Vec::new(),
        }
    }

    pub(crate) fn item(&mut self, report: ProvisioningReport) {
        self.counts.record(report.outcome);
        self.items.push(report);
    }

    pub(crate) fn counts(&self) -> &ExecutionCounts {
        &self.counts
    }

    pub(crate) fn finish(
        self,
        status: ExecutionStatus,
        tracker: &PropagationTracker,
        error: Option<String>,
    ) -> ExecutionReport {
        let remediation_refs = self.items.iter().filter_map(|i| i.remediation_id).collect();
        ExecutionReport {
            execution_id: self.execution_id,
            task_key: self.task_key,
            tenant_id: self.tenant_id,
            direction: self.direction,
            start_time: self.start_time,
            end_time: Utc::now(),
            status,
            counts: self.counts,
            remediation_refs,
            dry_run: self.dry_run,
            items: self.items,
            propagation: tracker.summary(),
            propagation_entries: tracker.entries().into_iter().map(PropagationEntry::from).collect(),
            error,
        }
    }
}
