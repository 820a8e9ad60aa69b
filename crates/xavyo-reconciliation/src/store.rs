//! Internal identity store collaborator.
//!
//! The engine never persists identities itself. It asks an [`IdentityStore`]
//! to find, create, update or delete records, one item per transaction, and
//! passes a [`CommitListener`] that the store must call after each successful
//! commit. Rolled back mutations never reach the listener.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use xavyo_connector::operation::Filter;

use crate::correlation::Criterion;
use crate::error::StoreError;
use crate::ids::{AnyKey, TenantId};
use crate::model::{Any, AnyDraft, AnyType};

/// Kind of committed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKind {
    Created,
    Updated,
    Deleted,
}

/// Notification sent by the store after a mutation has committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEvent {
    pub key: AnyKey,
    pub any_type: AnyType,
    pub kind: CommitKind,
}

/// Post-commit callback invoked by the store.
pub trait CommitListener: Send + Sync {
    fn committed(&self, tenant: TenantId, event: &CommitEvent);
}

/// Listener that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl CommitListener for NoopListener {
    fn committed(&self, _tenant: TenantId, _event: &CommitEvent) {}
}

/// Access to internal identities, scoped by tenant on every call.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Identities matching every criterion.
    async fn find(
        &self,
        tenant: TenantId,
        any_type: &AnyType,
        criteria: &[Criterion],
    ) -> Result<Vec<Any>, StoreError>;

    /// Identities selected for push, all of the any-type when `filter` is
    /// absent.
    async fn select(
        &self,
        tenant: TenantId,
        any_type: &AnyType,
        filter: Option<&Filter>,
    ) -> Result<Vec<Any>, StoreError>;

    async fn get(&self, tenant: TenantId, key: AnyKey) -> Result<Option<Any>, StoreError>;

    async fn create(
        &self,
        tenant: TenantId,
        draft: &AnyDraft,
        listener: &dyn CommitListener,
    ) -> Result<AnyKey, StoreError>;

    /// Replace the attributes present in `draft`; others are left untouched.
    async fn update(
        &self,
        tenant: TenantId,
        key: AnyKey,
        draft: &AnyDraft,
        listener: &dyn CommitListener,
    ) -> Result<(), StoreError>;

    async fn delete(
        &self,
        tenant: TenantId,
        key: AnyKey,
        listener: &dyn CommitListener,
    ) -> Result<(), StoreError>;
}
