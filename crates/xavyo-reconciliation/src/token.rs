//! Sync token persistence for resumable incremental pulls.
//!
//! The token is opaque: the engine passes what it loaded to the next search
//! and saves what the connector returned, nothing more.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use xavyo_connector::operation::SyncToken;

use crate::error::StoreError;
use crate::ids::TenantId;
use crate::model::AnyType;

/// A persisted token and when it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: SyncToken,
    pub updated_at: DateTime<Utc>,
}

/// Storage of the last committed sync token per (tenant, resource, any-type).
#[async_trait]
pub trait SyncTokenStore: Send + Sync {
    async fn load(
        &self,
        tenant: TenantId,
        resource: &str,
        any_type: &AnyType,
    ) -> Result<Option<StoredToken>, StoreError>;

    async fn save(
        &self,
        tenant: TenantId,
        resource: &str,
        any_type: &AnyType,
        token: SyncToken,
    ) -> Result<(), StoreError>;
}

type TokenKey = (TenantId, String, AnyType);

/// In-process token store.
#[derive(Debug, Default)]
pub struct MemorySyncTokenStore {
    tokens: DashMap<TokenKey, StoredToken>,
}

impl MemorySyncTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current token, bypassing the async interface.
    pub fn current(&self, tenant: TenantId, resource: &str, any_type: &AnyType) -> Option<SyncToken> {
        self.tokens
            .get(&(tenant, resource.to_string(), any_type.clone()))
            .map(|t| t.token.clone())
    }
}

#[async_trait]
impl SyncTokenStore for MemorySyncTokenStore {
    async fn load(
        &self,
        tenant: TenantId,
        resource: &str,
        any_type: &AnyType,
    ) -> Result<Option<StoredToken>, StoreError> {
        Ok(self
            .tokens
            .get(&(tenant, resource.to_string(), any_type.clone()))
            .map(|t| t.value().clone()))
    }

    async fn save(
        &self,
        tenant: TenantId,
        resource: &str,
        any_type: &AnyType,
        token: SyncToken,
    ) -> Result<(), StoreError> {
        self.tokens.insert(
            (tenant, resource.to_string(), any_type.clone()),
            StoredToken {
                token,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}
