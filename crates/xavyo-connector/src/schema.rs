//! Connector schema types
//!
//! Attribute descriptors returned by schema discovery. Used when validating
//! mapping configuration, never on the synchronization hot path.

use serde::{Deserialize, Serialize};

/// Data type for schema attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeDataType {
    /// String/text value.
    String,
    /// Integer value.
    Integer,
    /// Boolean value.
    Boolean,
    /// Binary data (bytes).
    Binary,
    /// Date/time value.
    DateTime,
    /// Guarded (write-only) value such as a password.
    Guarded,
}

impl AttributeDataType {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeDataType::String => "string",
            AttributeDataType::Integer => "integer",
            AttributeDataType::Boolean => "boolean",
            AttributeDataType::Binary => "binary",
            AttributeDataType::DateTime => "datetime",
            AttributeDataType::Guarded => "guarded",
        }
    }
}

/// How many values an attribute may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    #[default]
    Single,
    Multi,
}

/// A single attribute exposed by a connector for an object class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaAttribute {
    /// Native attribute name in the target system.
    pub name: String,

    /// Data type of this attribute.
    pub data_type: AttributeDataType,

    /// Whether this attribute can have multiple values.
    #[serde(default)]
    pub multiplicity: Multiplicity,
}

impl SchemaAttribute {
    /// Create a single-valued attribute descriptor.
    pub fn new(name: impl Into<String>, data_type: AttributeDataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            multiplicity: Multiplicity::Single,
        }
    }

    /// Mark the attribute as multi-valued.
    #[must_use]
    pub fn multi_valued(mut self) -> Self {
        self.multiplicity = Multiplicity::Multi;
        self
    }

    pub fn is_multi_valued(&self) -> bool {
        self.multiplicity == Multiplicity::Multi
    }
}

/// Ordered set of attributes for one object class.
///
/// Order is the connector's declaration order; names are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSchema {
    pub object_class: String,
    attributes: Vec<SchemaAttribute>,
}

impl ObjectSchema {
    pub fn new(object_class: impl Into<String>) -> Self {
        Self {
            object_class: object_class.into(),
            attributes: Vec::new(),
        }
    }

    /// Add an attribute. A later declaration with the same name replaces the
    /// earlier one in place.
    #[must_use]
    pub fn with_attribute(mut self, attribute: SchemaAttribute) -> Self {
        match self.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
        self
    }

    pub fn attributes(&self) -> &[SchemaAttribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&SchemaAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}
