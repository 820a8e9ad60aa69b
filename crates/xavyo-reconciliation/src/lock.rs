//! Exclusive execution locks.
//!
//! Only one execution per (tenant, resource, any-type, direction) may run at
//! a time. Acquiring a held lock fails immediately with
//! [`ReconciliationError::AlreadyRunning`]; the lock is released when the
//! returned guard is dropped.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ReconciliationError, ReconciliationResult};
use crate::ids::{ExecutionId, TenantId};
use crate::model::{AnyType, TaskDirection};

/// Identity of a lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub tenant_id: TenantId,
    pub resource: String,
    pub any_type: AnyType,
    pub direction: TaskDirection,
}

/// Registry of running executions.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLocks {
    held: Arc<DashMap<LockKey, ExecutionId>>,
}

impl ExecutionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `key` on behalf of `execution_id`.
    pub fn acquire(
        &self,
        key: LockKey,
        execution_id: ExecutionId,
    ) -> ReconciliationResult<ExecutionGuard> {
        match self.held.entry(key.clone()) {
            Entry::Occupied(entry) => Err(ReconciliationError::AlreadyRunning {
                resource: key.resource,
                any_type: key.any_type,
                direction: key.direction,
                running: *entry.get(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(execution_id);
                debug!(
                    tenant_id = %key.tenant_id,
                    resource = %key.resource,
                    any_type = %key.any_type,
                    direction = %key.direction,
                    execution_id = %execution_id,
                    "Execution lock acquired"
                );
                Ok(ExecutionGuard {
                    held: Arc::clone(&self.held),
                    key,
                    execution_id,
                })
            }
        }
    }

    pub fn is_held(&self, key: &LockKey) -> bool {
        self.held.contains_key(key)
    }
}

/// Releases its lock on drop.
#[derive(Debug)]
pub struct ExecutionGuard {
    held: Arc<DashMap<LockKey, ExecutionId>>,
    key: LockKey,
    execution_id: ExecutionId,
}

impl ExecutionGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.held
            .remove_if(&self.key, |_, holder| *holder == self.execution_id);
        debug!(resource = %self.key.resource, execution_id = %self.execution_id, "Execution lock released");
    }
}
