//! Pull and push task definitions.
//!
//! Tasks are long-lived configuration supplied by the administration layer;
//! the engine only reads them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use xavyo_connector::operation::{Filter, SyncToken};

use crate::correlation::CorrelationRule;
use crate::hooks::{PullActions, PushActions};
use crate::model::any::AnyType;
use crate::policy::DecisionKind;

/// Direction of a synchronization task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskDirection {
    /// External resource into the identity store.
    Pull,
    /// Identity store out to external resources.
    Push,
}

impl TaskDirection {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskDirection::Pull => "pull",
            TaskDirection::Push => "push",
        }
    }
}

impl fmt::Display for TaskDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do once correlation has produced a match result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictAction {
    Ignore,
    FirstMatch,
    Add,
    Update,
    AddOrUpdate,
    Delete,
}

impl ConflictAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictAction::Ignore => "ignore",
            ConflictAction::FirstMatch => "first_match",
            ConflictAction::Add => "add",
            ConflictAction::Update => "update",
            ConflictAction::AddOrUpdate => "add_or_update",
            ConflictAction::Delete => "delete",
        }
    }
}

impl fmt::Display for ConflictAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a conflict action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseConflictActionError(String);

impl fmt::Display for ParseConflictActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid conflict action: {}", self.0)
    }
}

impl std::error::Error for ParseConflictActionError {}

impl FromStr for ConflictAction {
    type Err = ParseConflictActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ignore" => Ok(ConflictAction::Ignore),
            "first_match" | "firstmatch" => Ok(ConflictAction::FirstMatch),
            "add" => Ok(ConflictAction::Add),
            "update" => Ok(ConflictAction::Update),
            "add_or_update" | "addorupdate" => Ok(ConflictAction::AddOrUpdate),
            "delete" => Ok(ConflictAction::Delete),
            _ => Err(ParseConflictActionError(s.to_string())),
        }
    }
}

/// Conflict-resolution policy of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPolicy {
    pub action: ConflictAction,

    /// With `Add`, treat an existing match as an item failure instead of a
    /// no-op.
    #[serde(default)]
    pub strict: bool,
}

impl ConflictPolicy {
    pub fn new(action: ConflictAction) -> Self {
        Self {
            action,
            strict: false,
        }
    }

    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

/// Whether a pull reads everything or only changes since the stored token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullMode {
    FullReconciliation,
    #[default]
    Incremental,
}

/// Switches shared by pull and push tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFlags {
    #[serde(default = "default_true")]
    pub perform_create: bool,
    #[serde(default = "default_true")]
    pub perform_update: bool,
    #[serde(default = "default_true")]
    pub perform_delete: bool,
    /// Resolve and report, but mutate nothing and never advance the token.
    #[serde(default)]
    pub dry_run: bool,
    /// Also file a remediation record when a mutation fails.
    #[serde(default)]
    pub remediation: bool,
}

fn default_true() -> bool {
    true
}

impl TaskFlags {
    /// Whether the task allows performing `kind`.
    pub fn permits(&self, kind: DecisionKind) -> bool {
        match kind {
            DecisionKind::Create => self.perform_create,
            DecisionKind::Update => self.perform_update,
            DecisionKind::Delete => self.perform_delete,
            _ => true,
        }
    }
}

impl Default for TaskFlags {
    fn default() -> Self {
        Self {
            perform_create: true,
            perform_update: true,
            perform_delete: true,
            dry_run: false,
            remediation: false,
        }
    }
}

/// Ordered action hooks attached to a task.
pub struct ActionChain<T: ?Sized>(Vec<Arc<T>>);

impl<T: ?Sized> ActionChain<T> {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.0.iter()
    }

    pub fn push(&mut self, action: Arc<T>) {
        self.0.push(action);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: ?Sized> Default for ActionChain<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T: ?Sized> Clone for ActionChain<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: ?Sized> fmt::Debug for ActionChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionChain({} hooks)", self.0.len())
    }
}

/// Inbound synchronization from one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullTask {
    pub key: String,
    pub resource: String,
    pub any_type: AnyType,
    pub correlation_rule: CorrelationRule,
    pub policy: ConflictPolicy,

    /// Connector-side filter applied to every search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,

    #[serde(default)]
    pub mode: PullMode,

    /// Starting point used when no token has been persisted yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<SyncToken>,

    #[serde(flatten)]
    pub flags: TaskFlags,

    #[serde(skip)]
    pub actions: ActionChain<dyn PullActions>,
}

impl PullTask {
    pub fn new(
        key: impl Into<String>,
        resource: impl Into<String>,
        any_type: AnyType,
        correlation_rule: CorrelationRule,
        policy: ConflictPolicy,
    ) -> Self {
        Self {
            key: key.into(),
            resource: resource.into(),
            any_type,
            correlation_rule,
            policy,
            filter: None,
            mode: PullMode::default(),
            sync_token: None,
            flags: TaskFlags::default(),
            actions: ActionChain::default(),
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: PullMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: TaskFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: Arc<dyn PullActions>) -> Self {
        self.actions.push(action);
        self
    }
}

/// Outbound synchronization to one or more resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushTask {
    pub key: String,
    pub resources: Vec<String>,
    pub any_type: AnyType,
    pub correlation_rule: CorrelationRule,
    pub policy: ConflictPolicy,

    /// Selection of identities to push; all of the any-type when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,

    #[serde(flatten)]
    pub flags: TaskFlags,

    #[serde(skip)]
    pub actions: ActionChain<dyn PushActions>,
}

impl PushTask {
    pub fn new(
        key: impl Into<String>,
        resources: Vec<String>,
        any_type: AnyType,
        correlation_rule: CorrelationRule,
        policy: ConflictPolicy,
    ) -> Self {
        Self {
            key: key.into(),
            resources,
            any_type,
            correlation_rule,
            policy,
            filter: None,
            flags: TaskFlags::default(),
            actions: ActionChain::default(),
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: TaskFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: Arc<dyn PushActions>) -> Self {
        self.actions.push(action);
        self
    }
}
