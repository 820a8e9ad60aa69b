//! Reconciliation engine facade.
//!
//! Owns the collaborators shared by every execution (schema registry,
//! resources, identity store, token store, remediation sink, execution locks
//! and the virtual attribute cache) and hands them to the pull and push
//! orchestrators.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use xavyo_connector::traits::{BoxedConnector, Connector};

use crate::cache::VirtualAttributeCache;
use crate::config::{ConfigError, EngineConfig};
use crate::error::ReconciliationResult;
use crate::ids::TenantId;
use crate::lock::{ExecutionLocks, LockKey};
use crate::mapping::MappingEngine;
use crate::model::{ExternalResource, PullTask, PushTask};
use crate::registry::ResourceRegistry;
use crate::remediation::{MemoryRemediationSink, RemediationSink};
use crate::report::ExecutionReport;
use crate::schema_registry::SchemaRegistry;
use crate::store::IdentityStore;
use crate::token::{MemorySyncTokenStore, SyncTokenStore};
use crate::{pull, push};

/// Collaborators shared by all executions of one engine.
pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) mapping: MappingEngine,
    pub(crate) resources: ResourceRegistry,
    pub(crate) store: Arc<dyn IdentityStore>,
    pub(crate) tokens: Arc<dyn SyncTokenStore>,
    pub(crate) remediation: Arc<dyn RemediationSink>,
    pub(crate) locks: ExecutionLocks,
    pub(crate) cache: VirtualAttributeCache,
}

/// Entry point for running pull and push tasks.
///
/// Cheap to clone; clones share locks, caches and collaborators.
#[derive(Clone)]
pub struct ReconciliationEngine {
    inner: Arc<EngineInner>,
}

impl ReconciliationEngine {
    pub fn builder(store: Arc<dyn IdentityStore>) -> ReconciliationEngineBuilder {
        ReconciliationEngineBuilder::new(store)
    }

    /// Run a pull task to completion.
    ///
    /// Returns `Err` only when the execution could not start: the task is
    /// invalid or another execution holds the lock. Fatal errors during the
    /// run are reported through a `FAILED` report.
    #[instrument(
        skip(self, task, cancel),
        fields(tenant_id = %tenant, task_key = %task.key, resource = %task.resource, any_type = %task.any_type)
    )]
    pub async fn pull(
        &self,
        tenant: TenantId,
        task: &PullTask,
        cancel: CancellationToken,
    ) -> ReconciliationResult<ExecutionReport> {
        pull::run(Arc::clone(&self.inner), tenant, task.clone(), cancel).await
    }

    /// Run a push task to completion, with the same error contract as
    /// [`pull`](Self::pull).
    #[instrument(
        skip(self, task, cancel),
        fields(tenant_id = %tenant, task_key = %task.key, any_type = %task.any_type)
    )]
    pub async fn push(
        &self,
        tenant: TenantId,
        task: &PushTask,
        cancel: CancellationToken,
    ) -> ReconciliationResult<ExecutionReport> {
        push::run(Arc::clone(&self.inner), tenant, task.clone(), cancel).await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn virtual_attributes(&self) -> &VirtualAttributeCache {
        &self.inner.cache
    }

    /// Whether an execution currently holds `key`.
    pub fn is_running(&self, key: &LockKey) -> bool {
        self.inner.locks.is_held(key)
    }
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("config", &self.inner.config)
            .field("resources", &self.inner.resources)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ReconciliationEngine`].
pub struct ReconciliationEngineBuilder {
    config: EngineConfig,
    schemas: SchemaRegistry,
    resources: Vec<(ExternalResource, BoxedConnector)>,
    store: Arc<dyn IdentityStore>,
    tokens: Option<Arc<dyn SyncTokenStore>>,
    remediation: Option<Arc<dyn RemediationSink>>,
}

impl ReconciliationEngineBuilder {
    fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self {
            config: EngineConfig::default(),
            schemas: SchemaRegistry::default(),
            resources: Vec::new(),
            store,
            tokens: None,
            remediation: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    /// Register a resource. The connector is wrapped with the configured
    /// timeout and retry policy when the engine is built.
    #[must_use]
    pub fn with_resource<C>(mut self, resource: ExternalResource, connector: C) -> Self
    where
        C: Connector + 'static,
    {
        self.resources.push((resource, Arc::new(connector)));
        self
    }

    #[must_use]
    pub fn with_token_store(mut self, tokens: Arc<dyn SyncTokenStore>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    #[must_use]
    pub fn with_remediation_sink(mut self, sink: Arc<dyn RemediationSink>) -> Self {
        self.remediation = Some(sink);
        self
    }

    pub fn build(self) -> Result<ReconciliationEngine, ConfigError> {
        self.config.validate()?;

        let mut resources = ResourceRegistry::new();
        for (resource, connector) in self.resources {
            resources.register(resource, connector, &self.config);
        }

        info!(
            resources = resources.len(),
            page_size = self.config.page_size,
            worker_pool_size = self.config.worker_pool_size,
            "Reconciliation engine built"
        );

        let inner = EngineInner {
            mapping: MappingEngine::new(Arc::new(self.schemas)),
            resources,
            store: self.store,
            tokens: self
                .tokens
                .unwrap_or_else(|| Arc::new(MemorySyncTokenStore::new())),
            remediation: self
                .remediation
                .unwrap_or_else(|| Arc::new(MemoryRemediationSink::new())),
            locks: ExecutionLocks::new(),
            cache: VirtualAttributeCache::new(self.config.virattr_cache_ttl()),
            config: self.config,
        };

        Ok(ReconciliationEngine {
            inner: Arc::new(inner),
        })
    }
}
