//! External resources, provisions and mapping items.

use serde::{Deserialize, Serialize};

use xavyo_connector::object::AttributeSource;

use crate::error::MappingError;
use crate::mapping::transformer::Transformer;
use crate::model::any::AnyType;
use crate::model::task::TaskDirection;

/// Which direction(s) an item participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemPurpose {
    /// Inbound only.
    Pull,
    /// Outbound only.
    Propagation,
    #[default]
    Both,
    /// Kept in configuration, never mapped.
    None,
}

impl ItemPurpose {
    /// Whether the item is mapped when synchronizing in `direction`.
    #[must_use]
    pub fn applies_to(&self, direction: TaskDirection) -> bool {
        matches!(
            (self, direction),
            (ItemPurpose::Both, _)
                | (ItemPurpose::Pull, TaskDirection::Pull)
                | (ItemPurpose::Propagation, TaskDirection::Push)
        )
    }
}

/// When an item must produce at least one value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MandatoryCondition {
    #[default]
    Never,
    Always,
    /// Mandatory only when the source record has a value for `attribute`.
    IfPresent { attribute: String },
}

impl MandatoryCondition {
    /// Evaluate the condition against the record being mapped.
    pub fn is_mandatory<S: AttributeSource + ?Sized>(&self, source: &S) -> bool {
        match self {
            MandatoryCondition::Never => false,
            MandatoryCondition::Always => true,
            MandatoryCondition::IfPresent { attribute } => {
                !source.attribute_values(attribute).is_empty()
            }
        }
    }
}

/// A single attribute mapping inside a provision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Internal attribute name (schema name or the naming field).
    pub int_attr_name: String,

    /// External attribute name on the connector object.
    pub ext_attr_name: String,

    #[serde(default)]
    pub purpose: ItemPurpose,

    #[serde(default)]
    pub mandatory_condition: MandatoryCondition,

    /// Whether more than one value is kept.
    #[serde(default)]
    pub multivalued: bool,

    /// Whether this item carries the connector object key.
    #[serde(default)]
    pub conn_object_key: bool,

    /// Whether this item carries the password.
    #[serde(default)]
    pub password: bool,

    /// Applied in order, in both directions.
    #[serde(default)]
    pub transformers: Vec<Transformer>,
}

impl Item {
    /// Create a bidirectional, optional, single-valued item.
    pub fn new(int_attr_name: impl Into<String>, ext_attr_name: impl Into<String>) -> Self {
        Self {
            int_attr_name: int_attr_name.into(),
            ext_attr_name: ext_attr_name.into(),
            purpose: ItemPurpose::Both,
            mandatory_condition: MandatoryCondition::Never,
            multivalued: false,
            conn_object_key: false,
            password: false,
            transformers: Vec::new(),
        }
    }

    /// Create the connector-object-key item.
    pub fn key(int_attr_name: impl Into<String>, ext_attr_name: impl Into<String>) -> Self {
        let mut item = Self::new(int_attr_name, ext_attr_name);
        item.conn_object_key = true;
        item.mandatory_condition = MandatoryCondition::Always;
        item
    }

    /// Create the password item. Passwords only ever travel outbound.
    pub fn password(ext_attr_name: impl Into<String>) -> Self {
        let mut item = Self::new("password", ext_attr_name);
        item.password = true;
        item.purpose = ItemPurpose::Propagation;
        item.mandatory_condition = MandatoryCondition::Always;
        item
    }

    #[must_use]
    pub fn with_purpose(mut self, purpose: ItemPurpose) -> Self {
        self.purpose = purpose;
        self
    }

    #[must_use]
    pub fn mandatory(mut self, condition: MandatoryCondition) -> Self {
        self.mandatory_condition = condition;
        self
    }

    #[must_use]
    pub fn multivalued(mut self) -> Self {
        self.multivalued = true;
        self
    }

    #[must_use]
    pub fn with_transformer(mut self, transformer: Transformer) -> Self {
        self.transformers.push(transformer);
        self
    }
}

/// Binds an any-type to a resource: the object class and the ordered items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provision {
    pub any_type: AnyType,
    pub object_class: String,
    pub items: Vec<Item>,
}

impl Provision {
    pub fn new(any_type: AnyType, object_class: impl Into<String>) -> Self {
        Self {
            any_type,
            object_class: object_class.into(),
            items: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_item(mut self, item: Item) -> Self {
        self.items.push(item);
        self
    }

    /// Check the item invariants: exactly one connector-object-key item and
    /// at most one password item.
    pub fn validate(&self) -> Result<(), MappingError> {
        let keys = self.items.iter().filter(|i| i.conn_object_key).count();
        if keys != 1 {
            return Err(MappingError::InvalidProvision {
                message: format!(
                    "provision for {} must have exactly one connector object key item, found {keys}",
                    self.any_type
                ),
            });
        }

        let passwords = self.items.iter().filter(|i| i.password).count();
        if passwords > 1 {
            return Err(MappingError::InvalidProvision {
                message: format!(
                    "provision for {} has {passwords} password items, at most one allowed",
                    self.any_type
                ),
            });
        }

        if self.items.iter().any(|i| i.password && i.conn_object_key) {
            return Err(MappingError::InvalidProvision {
                message: "the password item cannot be the connector object key".to_string(),
            });
        }

        Ok(())
    }

    /// The connector-object-key item, if the provision is valid.
    pub fn conn_object_key_item(&self) -> Option<&Item> {
        self.items.iter().find(|i| i.conn_object_key)
    }

    pub fn password_item(&self) -> Option<&Item> {
        self.items.iter().find(|i| i.password)
    }

    /// Items mapped in `direction`, in declaration order.
    pub fn items_for(&self, direction: TaskDirection) -> impl Iterator<Item = &Item> {
        self.items
            .iter()
            .filter(move |i| i.purpose.applies_to(direction))
    }

    /// Whether a non-password item maps `int_attr_name` in `direction`.
    pub fn maps(&self, direction: TaskDirection, int_attr_name: &str) -> bool {
        self.items_for(direction)
            .any(|i| i.int_attr_name == int_attr_name && !i.password)
    }
}

/// One external system and the any-types it provisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalResource {
    pub key: String,

    /// Connector bundle or configuration reference, interpreted by whoever
    /// instantiates the connector.
    #[serde(default)]
    pub connector_config: serde_json::Value,

    pub provisions: Vec<Provision>,

    /// Concurrent item mutations this resource tolerates; falls back to the
    /// engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<usize>,
}

impl ExternalResource {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            connector_config: serde_json::Value::Null,
            provisions: Vec::new(),
            pool_size: None,
        }
    }

    #[must_use]
    pub fn with_provision(mut self, provision: Provision) -> Self {
        self.provisions.push(provision);
        self
    }

    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = Some(pool_size);
        self
    }

    pub fn provision(&self, any_type: &AnyType) -> Option<&Provision> {
        self.provisions.iter().find(|p| &p.any_type == any_type)
    }
}
