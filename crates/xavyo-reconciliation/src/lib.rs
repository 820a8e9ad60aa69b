//! # Reconciliation Engine
//!
//! Keeps the internal identity store and external resources consistent.
//!
//! - **Pull** reads changes (or the full content) from one resource, maps each
//!   connector object to an internal identity, correlates it against the
//!   store and applies the task's conflict policy.
//! - **Push** selects internal identities, maps them outbound, correlates each
//!   against every target resource and creates, updates or deletes the remote
//!   object.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   page    ┌────────────┐  draft   ┌─────────────┐
//! │  Connector   │──────────►│  Mapping   │─────────►│ Correlation │
//! │ (resilient)  │           │  Engine    │          │             │
//! └──────────────┘           └────────────┘          └──────┬──────┘
//!        ▲                                                  │ match result
//!        │ create/update/delete                             ▼
//! ┌──────┴───────┐                                   ┌─────────────┐
//! │    Push      │◄──────── decision ────────────────│  Conflict   │
//! │ Orchestrator │                                   │   Policy    │
//! └──────────────┘                                   └──────┬──────┘
//!                                                           │
//!         ┌──────────────────┬──────────────────────────────┤
//!         ▼                  ▼                              ▼
//!  ┌─────────────┐   ┌───────────────┐             ┌────────────────┐
//!  │ Propagation │   │  Remediation  │             │ Identity Store │
//!  │   Tracker   │   │     Sink      │             │  (pull only)   │
//!  └─────────────┘   └───────────────┘             └────────────────┘
//! ```
//!
//! Executions are exclusive per (tenant, resource, any-type, direction), bound
//! their item concurrency with a worker pool, and produce an
//! [`ExecutionReport`](report::ExecutionReport) with per-item results and
//! propagation statuses.
//!
//! ## Example
//!
//! ```ignore
//! use xavyo_reconciliation::prelude::*;
//!
//! let engine = ReconciliationEngine::builder(store)
//!     .with_config(EngineConfig::from_env()?)
//!     .with_schemas(schemas)
//!     .with_resource(ldap_resource, ldap_connector)
//!     .build()?;
//!
//! let task = PullTask::new(
//!     "ldap-users",
//!     "ldap",
//!     AnyType::User,
//!     CorrelationRule::new(vec![CorrelationItem::equals_ignore_case("email")]),
//!     ConflictPolicy::new(ConflictAction::AddOrUpdate),
//! );
//! let report = engine.pull(tenant_id, &task, CancellationToken::new()).await?;
//! tracing::info!(status = %report.status, "Pull finished");
//! ```

pub mod cache;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod ids;
pub mod lock;
pub mod logging;
pub mod mapping;
pub mod model;
pub mod policy;
mod pull;
mod push;
pub mod registry;
pub mod remediation;
pub mod report;
pub mod schema_registry;
pub mod store;
pub mod token;
pub mod tracker;
pub mod worker;

pub use engine::{ReconciliationEngine, ReconciliationEngineBuilder};
pub use error::{MappingError, ReconciliationError, ReconciliationResult, StoreError};

// Re-export async_trait for hook and store implementors
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cache::VirtualAttributeCache;
    pub use crate::config::{ConfigError, EngineConfig};
    pub use crate::correlation::{Comparison, CorrelationItem, CorrelationRule, Criterion, MatchResult};
    pub use crate::engine::{ReconciliationEngine, ReconciliationEngineBuilder};
    pub use crate::error::{MappingError, ReconciliationError, ReconciliationResult, StoreError};
    pub use crate::hooks::{
        ErrorVerdict, HookContext, HookError, HookResult, HookVerdict, PullActions, PushActions,
    };
    pub use crate::ids::{AnyKey, ExecutionId, TenantId};
    pub use crate::lock::LockKey;
    pub use crate::mapping::transformer::Transformer;
    pub use crate::mapping::MappingEngine;
    pub use crate::model::{
        Any, AnyDraft, AnyKind, AnyType, Attributes, ConflictAction, ConflictPolicy,
        ExternalResource, Item, ItemPurpose, MandatoryCondition, Plain, Provision, PullMode,
        PullTask, PushTask, SchemaType, TaskDirection, TaskFlags, Virtual,
    };
    pub use crate::policy::{Decision, DecisionKind};
    pub use crate::remediation::{
        MemoryRemediationSink, RemediationReason, RemediationRecord, RemediationSink,
    };
    pub use crate::report::{
        ExecutionCounts, ExecutionReport, ExecutionStatus, ItemOutcome, PropagationEntry,
        ProvisioningReport,
    };
    pub use crate::schema_registry::SchemaRegistry;
    pub use crate::store::{CommitEvent, CommitKind, CommitListener, IdentityStore, NoopListener};
    pub use crate::token::{MemorySyncTokenStore, StoredToken, SyncTokenStore};
    pub use crate::tracker::{PropagationOutcome, PropagationTracker};
    pub use tokio_util::sync::CancellationToken;
}
