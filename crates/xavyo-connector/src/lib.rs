//! # Connector Framework
//!
//! Uniform interface to the external identity stores that reconciliation
//! pulls from and pushes to.
//!
//! ## Architecture
//!
//! - [`Connector`](traits::Connector) - search, create, update, delete and
//!   schema description for one external system
//! - [`ConnObject`](object::ConnObject) - the immutable external-side record
//! - [`ResilientConnector`](resilience::ResilientConnector) - per-call timeout
//!   and exponential backoff, classifying exhausted retries as unreachable
//!
//! Wire protocols (LDAP, SCIM, JDBC, ...) live in connector implementations
//! outside this crate.
//!
//! ## Example
//!
//! ```ignore
//! use xavyo_connector::prelude::*;
//!
//! let connector = ResilientConnector::new(ldap, Duration::from_secs(30), RetryConfig::default());
//! let page = connector
//!     .search("inetOrgPerson", Some(&Filter::present("mail")), &PageRequest::new(100))
//!     .await?;
//! for object in &page.objects {
//!     println!("{} -> {:?}", object.key(), object.first("mail"));
//! }
//! ```

pub mod error;
pub mod object;
pub mod operation;
pub mod resilience;
pub mod schema;
pub mod traits;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{ConnectorError, ConnectorResult};
    pub use crate::object::{AttributeSource, ConnObject, Password, SyncDeltaKind};
    pub use crate::operation::{AttributeDelta, Filter, PageRequest, SearchResult, SyncToken};
    pub use crate::resilience::{ResilientConnector, RetryConfig, RetryExecutor};
    pub use crate::schema::{AttributeDataType, Multiplicity, ObjectSchema, SchemaAttribute};
    pub use crate::traits::{BoxedConnector, Connector};
}

// Re-export async_trait for connector implementors
pub use async_trait::async_trait;
