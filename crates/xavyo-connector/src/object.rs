//! Connector objects
//!
//! The external-side record exchanged with a connector: a key value plus an
//! ordered map of attribute name to value list.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Read access to named, multi-valued attributes.
///
/// Implemented by both external records and internal identities so that
/// filters can be evaluated against either side.
pub trait AttributeSource {
    /// Values for the attribute, empty when absent.
    fn attribute_values(&self, name: &str) -> &[String];
}

/// A clear-text password travelling to a connector.
///
/// Never printed: `Debug` and `Display` are redacted and it is never
/// serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the clear-text value to the remote call that needs it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

impl fmt::Display for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// What a sync page entry reports about its object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDeltaKind {
    /// The object exists with the attributes carried.
    #[default]
    CreateOrUpdate,
    /// The object was removed; only its key is meaningful.
    Delete,
}

/// External record as returned by, or sent to, a connector.
///
/// Immutable once built: connectors construct it with the builder methods and
/// the engine only reads it. The password, if any, is kept out of the
/// attribute map and out of every serialized or debug view.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnObject {
    key: String,
    #[serde(default)]
    attributes: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    password: Option<Password>,
    #[serde(default)]
    delta: SyncDeltaKind,
}

impl ConnObject {
    /// Create an object with the given key and no attributes.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            attributes: BTreeMap::new(),
            password: None,
            delta: SyncDeltaKind::CreateOrUpdate,
        }
    }

    /// Deletion notice for the object with the given key.
    pub fn tombstone(key: impl Into<String>) -> Self {
        Self {
            delta: SyncDeltaKind::Delete,
            ..Self::new(key)
        }
    }

    /// Add a single-valued attribute.
    #[must_use]
    pub fn with(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_values(name, vec![value.into()])
    }

    /// Add a multi-valued attribute, replacing any previous values.
    #[must_use]
    pub fn with_values(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.attributes.insert(name.into(), values);
        self
    }

    /// Attach a clear-text password.
    #[must_use]
    pub fn with_password(mut self, password: Password) -> Self {
        self.password = Some(password);
        self
    }

    /// Copy of this object with the password removed.
    #[must_use]
    pub fn without_password(&self) -> Self {
        Self {
            key: self.key.clone(),
            attributes: self.attributes.clone(),
            password: None,
            delta: self.delta,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn delta(&self) -> SyncDeltaKind {
        self.delta
    }

    pub fn password(&self) -> Option<&Password> {
        self.password.as_ref()
    }

    /// Attributes in name order.
    pub fn attributes(&self) -> &BTreeMap<String, Vec<String>> {
        &self.attributes
    }

    /// First value of an attribute.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.attribute_values(name).first().map(String::as_str)
    }

    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }
}

impl AttributeSource for ConnObject {
    fn attribute_values(&self, name: &str) -> &[String] {
        self.attributes.get(name).map_or(&[][..], Vec::as_slice)
    }
}

impl fmt::Debug for ConnObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnObject")
            .field("key", &self.key)
            .field("attributes", &self.attributes)
            .field("has_password", &self.password.is_some())
            .field("delta", &self.delta)
            .finish()
    }
}
