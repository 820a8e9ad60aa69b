//! Internal identity records.
//!
//! An [`Any`] is a user, group or any object. Kind-specific fields live in
//! the [`AnyKind`] tagged union; schema-driven attributes share one generic
//! container, [`Attributes`], parameterized by schema kind.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use xavyo_connector::object::{AttributeSource, Password};

use crate::ids::AnyKey;

/// The type of identity a task or provision works on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnyType {
    User,
    Group,
    /// Any other identity type, e.g. `PRINTER`.
    AnyObject(String),
}

impl AnyType {
    /// Name of the kind-specific naming field (`username` or `name`).
    #[must_use]
    pub fn name_attribute(&self) -> &'static str {
        match self {
            AnyType::User => "username",
            AnyType::Group | AnyType::AnyObject(_) => "name",
        }
    }
}

impl fmt::Display for AnyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnyType::User => f.write_str("USER"),
            AnyType::Group => f.write_str("GROUP"),
            AnyType::AnyObject(name) => f.write_str(name),
        }
    }
}

/// Kind of attribute schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaType {
    /// Stored values.
    Plain,
    /// Computed by the store from other attributes; read-only.
    Derived,
    /// Read through from an external resource; cached, never stored.
    Virtual,
}

/// Marker trait tying an [`Attributes`] container to a [`SchemaType`].
pub trait SchemaKind: Send + Sync + 'static {
    const TYPE: SchemaType;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Plain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Derived;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Virtual;

impl SchemaKind for Plain {
    const TYPE: SchemaType = SchemaType::Plain;
}

impl SchemaKind for Derived {
    const TYPE: SchemaType = SchemaType::Derived;
}

impl SchemaKind for Virtual {
    const TYPE: SchemaType = SchemaType::Virtual;
}

/// Multi-valued attributes keyed by schema name, all of one schema kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct Attributes<K> {
    values: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    _kind: PhantomData<K>,
}

impl<K: SchemaKind> Attributes<K> {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            _kind: PhantomData,
        }
    }

    /// The schema kind held by this container.
    pub fn schema_type(&self) -> SchemaType {
        K::TYPE
    }

    #[must_use]
    pub fn with(mut self, schema: impl Into<String>, values: Vec<String>) -> Self {
        self.set(schema, values);
        self
    }

    pub fn set(&mut self, schema: impl Into<String>, values: Vec<String>) {
        self.values.insert(schema.into(), values);
    }

    pub fn get(&self, schema: &str) -> Option<&[String]> {
        self.values.get(schema).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

impl<K: SchemaKind> Default for Attributes<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Kind-specific part of an identity.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnyKind {
    User {
        username: String,
        /// Clear-text password when the store can provide one for propagation.
        #[serde(skip)]
        password: Option<Password>,
    },
    Group {
        name: String,
    },
    AnyObject {
        type_name: String,
        name: String,
    },
}

impl fmt::Debug for AnyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnyKind::User { username, password } => f
                .debug_struct("User")
                .field("username", username)
                .field("has_password", &password.is_some())
                .finish(),
            AnyKind::Group { name } => f.debug_struct("Group").field("name", name).finish(),
            AnyKind::AnyObject { type_name, name } => f
                .debug_struct("AnyObject")
                .field("type_name", type_name)
                .field("name", name)
                .finish(),
        }
    }
}

/// Internal identity record, owned by the identity store.
///
/// The engine reads these but never creates or destroys one directly; it
/// sends [`AnyDraft`] requests to the store instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Any {
    pub key: AnyKey,
    #[serde(flatten)]
    pub kind: AnyKind,
    #[serde(default)]
    pub plain: Attributes<Plain>,
    #[serde(default)]
    pub derived: Attributes<Derived>,
    #[serde(default)]
    pub virtual_attrs: Attributes<Virtual>,
}

impl Any {
    /// Create a user with no attributes.
    pub fn user(key: AnyKey, username: impl Into<String>) -> Self {
        Self::new(
            key,
            AnyKind::User {
                username: username.into(),
                password: None,
            },
        )
    }

    /// Create a group with no attributes.
    pub fn group(key: AnyKey, name: impl Into<String>) -> Self {
        Self::new(key, AnyKind::Group { name: name.into() })
    }

    pub fn new(key: AnyKey, kind: AnyKind) -> Self {
        Self {
            key,
            kind,
            plain: Attributes::new(),
            derived: Attributes::new(),
            virtual_attrs: Attributes::new(),
        }
    }

    #[must_use]
    pub fn with_plain(mut self, schema: impl Into<String>, values: Vec<String>) -> Self {
        self.plain.set(schema, values);
        self
    }

    #[must_use]
    pub fn with_password(mut self, clear_text: Password) -> Self {
        if let AnyKind::User { password, .. } = &mut self.kind {
            *password = Some(clear_text);
        }
        self
    }

    pub fn any_type(&self) -> AnyType {
        match &self.kind {
            AnyKind::User { .. } => AnyType::User,
            AnyKind::Group { .. } => AnyType::Group,
            AnyKind::AnyObject { type_name, .. } => AnyType::AnyObject(type_name.clone()),
        }
    }

    /// Value of the kind-specific naming field.
    pub fn name(&self) -> &str {
        match &self.kind {
            AnyKind::User { username, .. } => username,
            AnyKind::Group { name } | AnyKind::AnyObject { name, .. } => name,
        }
    }

    pub fn password(&self) -> Option<&Password> {
        match &self.kind {
            AnyKind::User { password, .. } => password.as_ref(),
            _ => None,
        }
    }
}

impl AttributeSource for Any {
    fn attribute_values(&self, name: &str) -> &[String] {
        if name == self.any_type().name_attribute() {
            return match &self.kind {
                AnyKind::User { username, .. } => std::slice::from_ref(username),
                AnyKind::Group { name } | AnyKind::AnyObject { name, .. } => {
                    std::slice::from_ref(name)
                }
            };
        }
        self.plain
            .get(name)
            .or_else(|| self.derived.get(name))
            .or_else(|| self.virtual_attrs.get(name))
            .unwrap_or(&[])
    }
}

/// Create or update request for the identity store, produced by inbound
/// mapping.
///
/// On update only the attributes present are replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyDraft {
    pub any_type: AnyType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub plain: Attributes<Plain>,
    #[serde(default)]
    pub virtual_attrs: Attributes<Virtual>,
}

impl AnyDraft {
    pub fn new(any_type: AnyType) -> Self {
        Self {
            any_type,
            name: None,
            plain: Attributes::new(),
            virtual_attrs: Attributes::new(),
        }
    }

    /// Whether applying this draft to `existing` would change stored state.
    ///
    /// Virtual attributes are not stored and never count as a change.
    pub fn changes(&self, existing: &Any) -> bool {
        if let Some(name) = &self.name {
            if name != existing.name() {
                return true;
            }
        }
        self.plain
            .iter()
            .any(|(schema, values)| existing.plain.get(schema) != Some(values.as_slice()))
    }
}

impl AttributeSource for AnyDraft {
    fn attribute_values(&self, name: &str) -> &[String] {
        if name == self.any_type.name_attribute() {
            return match &self.name {
                Some(name) => std::slice::from_ref(name),
                None => &[],
            };
        }
        self.plain
            .get(name)
            .or_else(|| self.virtual_attrs.get(name))
            .unwrap_or(&[])
    }
}
