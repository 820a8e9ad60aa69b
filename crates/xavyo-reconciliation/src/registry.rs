//! External resources and their connectors.
//!
//! Each registered connector is wrapped in a [`ResilientConnector`] so that
//! every call made by the orchestrators carries the configured timeout and
//! retry policy.

use std::collections::HashMap;
use std::sync::Arc;

use xavyo_connector::resilience::ResilientConnector;
use xavyo_connector::traits::{BoxedConnector, Connector};

use crate::config::EngineConfig;
use crate::model::{AnyType, ExternalResource, Provision};

/// A resource together with the connector that reaches it.
pub struct ResourceBinding {
    pub resource: ExternalResource,
    pub connector: BoxedConnector,
}

impl ResourceBinding {
    pub fn key(&self) -> &str {
        &self.resource.key
    }

    pub fn provision(&self, any_type: &AnyType) -> Option<&Provision> {
        self.resource.provision(any_type)
    }

    /// Item concurrency for this resource.
    pub fn pool_size(&self, default: usize) -> usize {
        self.resource.pool_size.unwrap_or(default).max(1)
    }
}

impl std::fmt::Debug for ResourceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceBinding")
            .field("resource", &self.resource.key)
            .field("connector", &self.connector.display_name())
            .finish()
    }
}

/// Registry of resources, keyed by resource key.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: HashMap<String, Arc<ResourceBinding>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource; a resource with the same key is replaced.
    pub fn register<C>(&mut self, resource: ExternalResource, connector: C, config: &EngineConfig)
    where
        C: Connector + 'static,
    {
        let connector = ResilientConnector::new(
            connector,
            config.connector_timeout(),
            config.retry_config(),
        );
        self.resources.insert(
            resource.key.clone(),
            Arc::new(ResourceBinding {
                resource,
                connector: Arc::new(connector),
            }),
        );
    }

    pub fn get(&self, key: &str) -> Option<Arc<ResourceBinding>> {
        self.resources.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
