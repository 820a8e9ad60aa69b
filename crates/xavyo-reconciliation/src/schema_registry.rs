//! Statically declared attribute schemas per any-type.
//!
//! Populated once when configuration is loaded, then shared read-only.
//! Mapping and correlation resolve internal attribute names here instead of
//! inspecting identity records at runtime.

use std::collections::{BTreeMap, HashMap};

use crate::correlation::CorrelationRule;
use crate::error::MappingError;
use crate::model::{AnyType, Provision, SchemaType, TaskDirection};

/// What an internal attribute name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalAttribute {
    /// The kind-specific naming field (`username` or `name`).
    Name,
    /// The internal password; never read inbound.
    Password,
    /// A declared schema.
    Schema(SchemaType),
}

/// Read-only registry of declared schemas.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<AnyType, BTreeMap<String, SchemaType>>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// Resolve an internal attribute name for an any-type.
    pub fn resolve(&self, any_type: &AnyType, name: &str) -> Option<InternalAttribute> {
        if name == any_type.name_attribute() {
            return Some(InternalAttribute::Name);
        }
        if name == "password" && *any_type == AnyType::User {
            return Some(InternalAttribute::Password);
        }
        self.schemas
            .get(any_type)
            .and_then(|s| s.get(name))
            .map(|t| InternalAttribute::Schema(*t))
    }

    /// Attributes the identity store can be queried on, in name order,
    /// naming field first.
    pub fn searchable(&self, any_type: &AnyType) -> Vec<&str> {
        let mut fields = vec![any_type.name_attribute()];
        if let Some(schemas) = self.schemas.get(any_type) {
            fields.extend(
                schemas
                    .iter()
                    .filter(|(_, t)| **t != SchemaType::Virtual)
                    .map(|(name, _)| name.as_str()),
            );
        }
        fields
    }

    /// Check that every item of a provision refers to a known attribute and
    /// that no inbound item writes a derived schema.
    pub fn validate_provision(&self, provision: &Provision) -> Result<(), MappingError> {
        provision.validate()?;

        for item in &provision.items {
            let resolved = self.resolve(&provision.any_type, &item.int_attr_name);
            match resolved {
                None => {
                    return Err(MappingError::InvalidProvision {
                        message: format!(
                            "unknown internal attribute '{}' for {}",
                            item.int_attr_name, provision.any_type
                        ),
                    })
                }
                Some(InternalAttribute::Schema(SchemaType::Derived))
                    if item.purpose.applies_to(TaskDirection::Pull) =>
                {
                    return Err(MappingError::InvalidProvision {
                        message: format!(
                            "derived attribute '{}' cannot be pulled",
                            item.int_attr_name
                        ),
                    })
                }
                Some(InternalAttribute::Password) if !item.password => {
                    return Err(MappingError::InvalidProvision {
                        message: "only the password item may map 'password'".to_string(),
                    })
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Check that a correlation rule only uses searchable attributes.
    pub fn validate_rule(&self, any_type: &AnyType, rule: &CorrelationRule) -> Result<(), String> {
        if rule.items.is_empty() {
            return Err("correlation rule has no attributes".to_string());
        }
        let searchable = self.searchable(any_type);
        for item in &rule.items {
            if !searchable.contains(&item.attribute.as_str()) {
                return Err(format!(
                    "'{}' is not a searchable attribute of {any_type}",
                    item.attribute
                ));
            }
        }
        Ok(())
    }
}

/// Builder collecting schema declarations at configuration load time.
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    schemas: HashMap<AnyType, BTreeMap<String, SchemaType>>,
}

impl SchemaRegistryBuilder {
    /// Declare a schema for an any-type. Redeclaring a name replaces it.
    #[must_use]
    pub fn declare(mut self, any_type: AnyType, name: impl Into<String>, kind: SchemaType) -> Self {
        self.schemas
            .entry(any_type)
            .or_default()
            .insert(name.into(), kind);
        self
    }

    pub fn plain(self, any_type: AnyType, name: impl Into<String>) -> Self {
        self.declare(any_type, name, SchemaType::Plain)
    }

    pub fn build(self) -> SchemaRegistry {
        SchemaRegistry {
            schemas: self.schemas,
        }
    }
}
