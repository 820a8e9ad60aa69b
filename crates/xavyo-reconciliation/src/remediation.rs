//! Remediation records.
//!
//! Records the engine could not resolve automatically (ambiguous matches,
//! and failed items when the task asks for it) are filed with a
//! [`RemediationSink`] for deferred, manual handling. The payload is the
//! record as seen by the engine, serialized without its password.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::ids::{ExecutionId, TenantId};
use crate::model::{AnyType, TaskDirection};

/// Why a record needs manual handling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemediationReason {
    /// Correlation found several counterparts, listed by key.
    Ambiguous { candidates: Vec<String> },
    /// Processing failed for this item.
    ItemFailed { error_code: String },
}

/// A record routed to remediation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationRecord {
    /// Record ID.
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub task_key: String,
    pub execution_id: ExecutionId,
    pub direction: TaskDirection,
    pub resource: String,
    pub any_type: AnyType,
    /// Connector object key (pull) or internal key (push).
    pub key: String,
    pub reason: RemediationReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Destination of remediation records.
#[async_trait]
pub trait RemediationSink: Send + Sync {
    async fn submit(&self, record: RemediationRecord) -> Result<Uuid, StoreError>;
}

/// In-process sink, keeping records in submission order.
#[derive(Debug, Default)]
pub struct MemoryRemediationSink {
    records: Mutex<Vec<RemediationRecord>>,
}

impl MemoryRemediationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<RemediationRecord> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl RemediationSink for MemoryRemediationSink {
    async fn submit(&self, record: RemediationRecord) -> Result<Uuid, StoreError> {
        let id = record.id;
        self.records.lock().await.push(record);
        Ok(id)
    }
}
