//! Conflict resolution policy.
//!
//! A pure function from a correlation result and the task's policy to the
//! single mutation (or no-op) to perform:
//!
//! | Match       | Ignore | FirstMatch   | Add     | Update  | AddOrUpdate | Delete  |
//! |-------------|--------|--------------|---------|---------|-------------|---------|
//! | Unmatched   | no-op  | no-op        | create  | no-op   | create      | no-op   |
//! | Matched     | no-op  | update       | no-op * | update  | update      | delete  |
//! | Ambiguous   | no-op  | update first | remediate | remediate | remediate | remediate |
//!
//! `*` A strict `Add` policy turns an existing match into an item failure.
//! Ambiguous candidates arrive sorted by key, so "first" is stable.
//!
//! Records the resource reports as deleted go through [`resolve_deletion`]
//! instead: a match is deleted under every action but `Ignore`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

use crate::correlation::MatchResult;
use crate::model::{ConflictAction, ConflictPolicy, TaskDirection};

/// The mutation chosen for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<T> {
    /// Nothing to do.
    NoOp { reason: String },
    /// Create a new counterpart.
    Create,
    /// Update the given counterpart.
    Update(T),
    /// Delete the given counterpart.
    Delete(T),
    /// Hand the record over for manual handling.
    Remediate(Vec<T>),
    /// The counterpart exists although the policy only allows creation.
    Conflict(T),
}

/// Variant of a [`Decision`], used by hooks and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    NoOp,
    Create,
    Update,
    Delete,
    Remediate,
    Conflict,
}

impl DecisionKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::NoOp => "no_op",
            DecisionKind::Create => "create",
            DecisionKind::Update => "update",
            DecisionKind::Delete => "delete",
            DecisionKind::Remediate => "remediate",
            DecisionKind::Conflict => "conflict",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<T> Decision<T> {
    fn no_op(reason: impl Into<String>) -> Self {
        Decision::NoOp {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> DecisionKind {
        match self {
            Decision::NoOp { .. } => DecisionKind::NoOp,
            Decision::Create => DecisionKind::Create,
            Decision::Update(_) => DecisionKind::Update,
            Decision::Delete(_) => DecisionKind::Delete,
            Decision::Remediate(_) => DecisionKind::Remediate,
            Decision::Conflict(_) => DecisionKind::Conflict,
        }
    }
}

/// A decision that changes the other side, split out of [`Decision`] once
/// the non-mutating variants have been handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mutation<T> {
    Create,
    Update(T),
    Delete(T),
}

impl<T> Mutation<T> {
    pub(crate) fn kind(&self) -> DecisionKind {
        match self {
            Mutation::Create => DecisionKind::Create,
            Mutation::Update(_) => DecisionKind::Update,
            Mutation::Delete(_) => DecisionKind::Delete,
        }
    }
}

/// Resolve a match result under a conflict policy.
///
/// The table is the same in both directions; `direction` only labels the
/// trace output.
pub fn resolve<T>(
    matched: MatchResult<T>,
    policy: &ConflictPolicy,
    direction: TaskDirection,
) -> Decision<T> {
    let action = policy.action;
    let kind = matched.kind();

    let decision = match (matched, action) {
        (_, ConflictAction::Ignore) => Decision::no_op("policy is ignore"),

        (MatchResult::Unmatched, ConflictAction::Add | ConflictAction::AddOrUpdate) => {
            Decision::Create
        }
        (MatchResult::Unmatched, _) => Decision::no_op(format!("no match and policy is {action}")),

        (MatchResult::Matched(found), ConflictAction::Add) if policy.strict => {
            Decision::Conflict(found)
        }
        (MatchResult::Matched(_), ConflictAction::Add) => Decision::no_op("already exists"),
        (
            MatchResult::Matched(found),
            ConflictAction::FirstMatch | ConflictAction::Update | ConflictAction::AddOrUpdate,
        ) => Decision::Update(found),
        (MatchResult::Matched(found), ConflictAction::Delete) => Decision::Delete(found),

        (MatchResult::Ambiguous(candidates), ConflictAction::FirstMatch) => {
            match candidates.into_iter().next() {
                Some(first) => Decision::Update(first),
                None => Decision::no_op("no candidates"),
            }
        }
        (MatchResult::Ambiguous(candidates), _) => Decision::Remediate(candidates),
    };

    trace!(
        direction = %direction,
        policy = %action,
        match_result = ?kind,
        decision = %decision.kind(),
        "Resolved conflict policy"
    );
    decision
}

/// Resolve the match for a record the resource reports as deleted.
pub fn resolve_deletion<T>(matched: MatchResult<T>, policy: &ConflictPolicy) -> Decision<T> {
    let kind = matched.kind();
    let decision = match (matched, policy.action) {
        (_, ConflictAction::Ignore) => Decision::no_op("policy is ignore"),
        (MatchResult::Unmatched, _) => Decision::no_op("no identity to delete"),
        (MatchResult::Matched(found), _) => Decision::Delete(found),
        (MatchResult::Ambiguous(candidates), _) => Decision::Remediate(candidates),
    };

    trace!(
        policy = %policy.action,
        match_result = ?kind,
        decision = %decision.kind(),
        "Resolved deletion"
    );
    decision
}
