//! Connector trait
//!
//! The uniform interface to a remote identity store. Capabilities a connector
//! lacks keep their default body, which fails with
//! [`ConnectorError::UnsupportedOperation`].

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{ConnectorError, ConnectorResult};
use crate::object::ConnObject;
use crate::operation::{AttributeDelta, Filter, PageRequest, SearchResult};
use crate::schema::ObjectSchema;

/// A connection to one external system.
///
/// Implementations hold no local state beyond their connection handle, so a
/// single instance may be shared by every worker of an execution.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Get the display name for this connector instance.
    fn display_name(&self) -> &str;

    /// Search one page of objects.
    ///
    /// # Arguments
    /// * `object_class` - The type of objects to search for
    /// * `filter` - Optional filter to apply
    /// * `page` - Page size, cursor and optional sync token lower bound
    ///
    /// Each page is finite. Passing the returned `next_cursor` resumes the
    /// sweep; within one sweep an object key appears at most once.
    async fn search(
        &self,
        object_class: &str,
        filter: Option<&Filter>,
        page: &PageRequest,
    ) -> ConnectorResult<SearchResult>;

    /// Create a new object, returning its key in the target system.
    async fn create(&self, object_class: &str, object: &ConnObject) -> ConnectorResult<String> {
        let _ = (object_class, object);
        Err(ConnectorError::unsupported("create"))
    }

    /// Apply changes to an existing object.
    async fn update(
        &self,
        object_class: &str,
        key: &str,
        delta: &AttributeDelta,
    ) -> ConnectorResult<()> {
        let _ = (object_class, key, delta);
        Err(ConnectorError::unsupported("update"))
    }

    /// Delete an object.
    async fn delete(&self, object_class: &str, key: &str) -> ConnectorResult<()> {
        let _ = (object_class, key);
        Err(ConnectorError::unsupported("delete"))
    }

    /// Describe the attributes of an object class.
    async fn describe_schema(&self, object_class: &str) -> ConnectorResult<ObjectSchema> {
        let _ = object_class;
        Err(ConnectorError::unsupported("describe_schema"))
    }
}

/// Shared, type-erased connector handle.
pub type BoxedConnector = Arc<dyn Connector>;

#[async_trait]
impl<C: Connector + ?Sized> Connector for Arc<C> {
    fn display_name(&self) -> &str {
        (**self).display_name()
    }

    async fn search(
        &self,
        object_class: &str,
        filter: Option<&Filter>,
        page: &PageRequest,
    ) -> ConnectorResult<SearchResult> {
        (**self).search(object_class, filter, page).await
    }

    async fn create(&self, object_class: &str, object: &ConnObject) -> ConnectorResult<String> {
        (**self).create(object_class, object).await
    }

    async fn update(
        &self,
        object_class: &str,
        key: &str,
        delta: &AttributeDelta,
    ) -> ConnectorResult<()> {
        (**self).update(object_class, key, delta).await
    }

    async fn delete(&self, object_class: &str, key: &str) -> ConnectorResult<()> {
        (**self).delete(object_class, key).await
    }

    async fn describe_schema(&self, object_class: &str) -> ConnectorResult<ObjectSchema> {
        (**self).describe_schema(object_class).await
    }
}
