//! Virtual attribute cache.
//!
//! Virtual attributes are read through from external resources and never
//! stored. Pull refreshes the cached values from the connector object it
//! just processed; every committed store mutation invalidates the entry for
//! that identity through the [`CommitListener`] callback.

use moka::sync::Cache;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::ids::{AnyKey, TenantId};
use crate::model::{Attributes, Virtual};
use crate::store::{CommitEvent, CommitListener};

/// Cache key: (tenant, identity).
type CacheKey = (TenantId, AnyKey);

/// Cached virtual values of one identity, by schema name.
pub type VirtualValues = Arc<BTreeMap<String, Vec<String>>>;

/// TTL cache of virtual attribute values.
#[derive(Clone)]
pub struct VirtualAttributeCache {
    cache: Cache<CacheKey, VirtualValues>,
}

impl VirtualAttributeCache {
    /// Create a cache whose entries expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    pub fn get(&self, tenant: TenantId, key: AnyKey) -> Option<VirtualValues> {
        self.cache.get(&(tenant, key))
    }

    /// Replace the cached values for an identity. Empty input drops the
    /// entry.
    pub fn refresh(&self, tenant: TenantId, key: AnyKey, values: &Attributes<Virtual>) {
        if values.is_empty() {
            self.cache.invalidate(&(tenant, key));
            return;
        }
        let values: BTreeMap<String, Vec<String>> = values
            .iter()
            .map(|(schema, v)| (schema.clone(), v.clone()))
            .collect();
        self.cache.insert((tenant, key), Arc::new(values));
    }

    pub fn invalidate(&self, tenant: TenantId, key: AnyKey) {
        self.cache.invalidate(&(tenant, key));
    }
}

impl std::fmt::Debug for VirtualAttributeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualAttributeCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl CommitListener for VirtualAttributeCache {
    fn committed(&self, tenant: TenantId, event: &CommitEvent) {
        trace!(tenant_id = %tenant, any_key = %event.key, kind = ?event.kind, "Invalidating virtual attributes");
        self.invalidate(tenant, event.key);
    }
}
