//! Pull and push action hooks.
//!
//! Hooks run around every item in the order they were attached to the task:
//!
//! - `preprocess` may rewrite the record before mapping (pull) or after
//!   outbound mapping (push).
//! - `before` sees the chosen decision and may veto it.
//! - `after` sees the final per-item report.
//! - `on_error` sees an item failure and may downgrade it to an ignore.
//!
//! A hook error is an item-level failure, never fatal to the execution.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use xavyo_connector::object::ConnObject;

use crate::error::{ReconciliationError, ReconciliationResult};
use crate::ids::{ExecutionId, TenantId};
use crate::model::{ActionChain, Any, AnyDraft, AnyType};
use crate::policy::DecisionKind;
use crate::report::ProvisioningReport;

/// Hook execution errors.
#[derive(Debug, Error)]
pub enum HookError {
    /// Hook execution failed.
    #[error("hook execution failed: {message}")]
    ExecutionFailed { message: String },

    /// Hook rejected the record.
    #[error("hook rejected the record: {message}")]
    Rejected { message: String },
}

impl HookError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
        }
    }
}

/// Result type for hook operations.
pub type HookResult<T> = Result<T, HookError>;

/// Context passed to hooks during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookContext {
    pub tenant_id: TenantId,
    pub task_key: String,
    pub execution_id: ExecutionId,
    pub resource: String,
    pub any_type: AnyType,
    pub dry_run: bool,
}

/// Answer of a `before` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookVerdict {
    Proceed,
    /// Skip the mutation; the item is recorded as ignored with this reason.
    Ignore { reason: String },
}

/// Answer of an `on_error` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorVerdict {
    /// Keep the failure.
    Fail,
    /// Record the item as ignored instead.
    Ignore { reason: String },
}

/// Hooks attached to a pull task.
#[async_trait]
pub trait PullActions: Send + Sync {
    /// Name used in logs and error reports.
    fn name(&self) -> &str;

    async fn preprocess(&self, _ctx: &HookContext, object: ConnObject) -> HookResult<ConnObject> {
        Ok(object)
    }

    async fn before(
        &self,
        _ctx: &HookContext,
        _object: &ConnObject,
        _draft: &AnyDraft,
        _decision: DecisionKind,
    ) -> HookResult<HookVerdict> {
        Ok(HookVerdict::Proceed)
    }

    async fn after(
        &self,
        _ctx: &HookContext,
        _object: &ConnObject,
        _report: &ProvisioningReport,
    ) -> HookResult<()> {
        Ok(())
    }

    async fn on_error(
        &self,
        _ctx: &HookContext,
        _object: &ConnObject,
        _error: &ReconciliationError,
    ) -> HookResult<ErrorVerdict> {
        Ok(ErrorVerdict::Fail)
    }
}

/// Hooks attached to a push task.
#[async_trait]
pub trait PushActions: Send + Sync {
    fn name(&self) -> &str;

    /// Called with the outbound object produced by mapping.
    async fn preprocess(
        &self,
        _ctx: &HookContext,
        _any: &Any,
        object: ConnObject,
    ) -> HookResult<ConnObject> {
        Ok(object)
    }

    async fn before(
        &self,
        _ctx: &HookContext,
        _any: &Any,
        _object: &ConnObject,
        _decision: DecisionKind,
    ) -> HookResult<HookVerdict> {
        Ok(HookVerdict::Proceed)
    }

    async fn after(
        &self,
        _ctx: &HookContext,
        _any: &Any,
        _report: &ProvisioningReport,
    ) -> HookResult<()> {
        Ok(())
    }

    async fn on_error(
        &self,
        _ctx: &HookContext,
        _any: &Any,
        _error: &ReconciliationError,
    ) -> HookResult<ErrorVerdict> {
        Ok(ErrorVerdict::Fail)
    }
}

fn hook_failed(hook: &str, err: HookError) -> ReconciliationError {
    ReconciliationError::Hook {
        hook: hook.to_string(),
        message: err.to_string(),
    }
}

impl ActionChain<dyn PullActions> {
    pub(crate) async fn preprocess(
        &self,
        ctx: &HookContext,
        mut object: ConnObject,
    ) -> ReconciliationResult<ConnObject> {
        for action in self.iter() {
            object = action
                .preprocess(ctx, object)
                .await
                .map_err(|e| hook_failed(action.name(), e))?;
        }
        Ok(object)
    }

    /// First veto wins.
    pub(crate) async fn before(
        &self,
        ctx: &HookContext,
        object: &ConnObject,
        draft: &AnyDraft,
        decision: DecisionKind,
    ) -> ReconciliationResult<HookVerdict> {
        for action in self.iter() {
            let verdict = action
                .before(ctx, object, draft, decision)
                .await
                .map_err(|e| hook_failed(action.name(), e))?;
            if let HookVerdict::Ignore { .. } = verdict {
                debug!(hook = action.name(), decision = %decision, "Hook vetoed decision");
                return Ok(verdict);
            }
        }
        Ok(HookVerdict::Proceed)
    }

    pub(crate) async fn after(
        &self,
        ctx: &HookContext,
        object: &ConnObject,
        report: &ProvisioningReport,
    ) -> ReconciliationResult<()> {
        for action in self.iter() {
            action
                .after(ctx, object, report)
                .await
                .map_err(|e| hook_failed(action.name(), e))?;
        }
        Ok(())
    }

    /// Hook errors here are logged and otherwise treated as `Fail`.
    pub(crate) async fn on_error(
        &self,
        ctx: &HookContext,
        object: &ConnObject,
        error: &ReconciliationError,
    ) -> ErrorVerdict {
        for action in self.iter() {
            match action.on_error(ctx, object, error).await {
                Ok(ErrorVerdict::Fail) => {}
                Ok(verdict) => return verdict,
                Err(e) => debug!(hook = action.name(), error = %e, "on_error hook failed"),
            }
        }
        ErrorVerdict::Fail
    }
}

impl ActionChain<dyn PushActions> {
    pub(crate) async fn preprocess(
        &self,
        ctx: &HookContext,
        any: &Any,
        mut object: ConnObject,
    ) -> ReconciliationResult<ConnObject> {
        for action in self.iter() {
            object = action
                .preprocess(ctx, any, object)
                .await
                .map_err(|e| hook_failed(action.name(), e))?;
        }
        Ok(object)
    }

    pub(crate) async fn before(
        &self,
        ctx: &HookContext,
        any: &Any,
        object: &ConnObject,
        decision: DecisionKind,
    ) -> ReconciliationResult<HookVerdict> {
        for action in self.iter() {
            let verdict = action
                .before(ctx, any, object, decision)
                .await
                .map_err(|e| hook_failed(action.name(), e))?;
            if let HookVerdict::Ignore { .. } = verdict {
                debug!(hook = action.name(), decision = %decision, "Hook vetoed decision");
                return Ok(verdict);
            }
        }
        Ok(HookVerdict::Proceed)
    }

    pub(crate) async fn after(
        &self,
        ctx: &HookContext,
        any: &Any,
        report: &ProvisioningReport,
    ) -> ReconciliationResult<()> {
        for action in self.iter() {
            action
                .after(ctx, any, report)
                .await
                .map_err(|e| hook_failed(action.name(), e))?;
        }
        Ok(())
    }

    pub(crate) async fn on_error(
        &self,
        ctx: &HookContext,
        any: &Any,
        error: &ReconciliationError,
    ) -> ErrorVerdict {
        for action in self.iter() {
            match action.on_error(ctx, any, error).await {
                Ok(ErrorVerdict::Fail) => {}
                Ok(verdict) => return verdict,
                Err(e) => debug!(hook = action.name(), error = %e, "on_error hook failed"),
            }
        }
        ErrorVerdict::Fail
    }
}
