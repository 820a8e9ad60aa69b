//! Mapping engine.
//!
//! Translates between external connector objects and internal identities
//! using a provision's ordered items. Every item whose purpose matches the
//! direction reads its source values, runs its transformer chain and writes
//! the destination attribute.
//!
//! Passwords only travel outbound: inbound mapping skips password items, and
//! outbound mapping carries the clear text on the connector object's redacted
//! password slot rather than in its attribute map.

pub mod transformer;

use std::sync::Arc;
use tracing::{trace, warn};

use xavyo_connector::object::{AttributeSource, ConnObject};

use crate::error::MappingError;
use crate::model::{Any, AnyDraft, Item, Provision, SchemaType, TaskDirection};
use crate::schema_registry::{InternalAttribute, SchemaRegistry};

use self::transformer::apply_chain;

/// Bidirectional attribute mapper.
#[derive(Debug, Clone)]
pub struct MappingEngine {
    registry: Arc<SchemaRegistry>,
}

impl MappingEngine {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Map an external object to a create/update request for the store.
    pub fn to_internal(
        &self,
        object: &ConnObject,
        provision: &Provision,
    ) -> Result<AnyDraft, MappingError> {
        let any_type = &provision.any_type;
        let mut draft = AnyDraft::new(any_type.clone());

        for item in provision.items_for(TaskDirection::Pull) {
            if item.password {
                continue;
            }

            let raw = if item.conn_object_key && !object.has(&item.ext_attr_name) {
                vec![object.key().to_string()]
            } else {
                object.attribute_values(&item.ext_attr_name).to_vec()
            };
            let values = finalize(item, raw)?;
            if values.is_empty() {
                if item.mandatory_condition.is_mandatory(object) {
                    return Err(MappingError::MandatoryMissing {
                        attribute: item.int_attr_name.clone(),
                    });
                }
                continue;
            }

            match self.registry.resolve(any_type, &item.int_attr_name) {
                Some(InternalAttribute::Name) => draft.name = values.into_iter().next(),
                Some(InternalAttribute::Schema(SchemaType::Plain)) => {
                    draft.plain.set(item.int_attr_name.clone(), values);
                }
                Some(InternalAttribute::Schema(SchemaType::Virtual)) => {
                    draft.virtual_attrs.set(item.int_attr_name.clone(), values);
                }
                Some(InternalAttribute::Schema(SchemaType::Derived))
                | Some(InternalAttribute::Password) => {
                    trace!(attribute = %item.int_attr_name, "Skipping read-only attribute");
                }
                None => {
                    return Err(MappingError::InvalidProvision {
                        message: format!(
                            "unknown internal attribute '{}' for {any_type}",
                            item.int_attr_name
                        ),
                    })
                }
            }
        }

        Ok(draft)
    }

    /// Internal name and value of an external object's key, for records
    /// such as deletion notices that carry nothing else.
    pub fn key_to_internal(
        &self,
        object: &ConnObject,
        provision: &Provision,
    ) -> Result<(String, String), MappingError> {
        let item = provision
            .conn_object_key_item()
            .ok_or_else(|| MappingError::InvalidProvision {
                message: format!("provision for {} has no key item", provision.any_type),
            })?;
        let raw = if object.has(&item.ext_attr_name) {
            object.attribute_values(&item.ext_attr_name).to_vec()
        } else {
            vec![object.key().to_string()]
        };
        let value = finalize(item, raw)?
            .into_iter()
            .next()
            .ok_or_else(|| MappingError::MandatoryMissing {
                attribute: item.int_attr_name.clone(),
            })?;
        Ok((item.int_attr_name.clone(), value))
    }

    /// Map an internal identity to the object a connector should hold.
    pub fn to_external(&self, any: &Any, provision: &Provision) -> Result<ConnObject, MappingError> {
        let key_item = provision
            .conn_object_key_item()
            .ok_or_else(|| MappingError::InvalidProvision {
                message: format!("provision for {} has no key item", provision.any_type),
            })?;

        let mut key = None;
        let mut password = None;
        let mut attributes = Vec::new();

        for item in provision.items_for(TaskDirection::Push) {
            if item.password {
                match any.password() {
                    Some(clear_text) => password = Some(clear_text.clone()),
                    None if item.mandatory_condition.is_mandatory(any) => {
                        return Err(MappingError::PasswordMissing {
                            attribute: item.ext_attr_name.clone(),
                        })
                    }
                    None => {}
                }
                continue;
            }

            let values = finalize(item, any.attribute_values(&item.int_attr_name).to_vec())?;
            if values.is_empty() {
                if item.mandatory_condition.is_mandatory(any) {
                    return Err(MappingError::MandatoryMissing {
                        attribute: item.int_attr_name.clone(),
                    });
                }
                continue;
            }
            if item.conn_object_key {
                key = values.first().cloned();
            }
            attributes.push((item.ext_attr_name.clone(), values));
        }

        let key = key.ok_or_else(|| MappingError::MandatoryMissing {
            attribute: key_item.int_attr_name.clone(),
        })?;

        let mut object = attributes
            .into_iter()
            .fold(ConnObject::new(key), |obj, (name, values)| obj.with_values(name, values));
        if let Some(password) = password {
            object = object.with_password(password);
        }
        Ok(object)
    }
}

/// Run the item's transformers and enforce its multiplicity.
fn finalize(item: &Item, values: Vec<String>) -> Result<Vec<String>, MappingError> {
    let mut values = apply_chain(&item.int_attr_name, &item.transformers, values)?;
    if !item.multivalued && values.len() > 1 {
        warn!(
            attribute = %item.int_attr_name,
            external = %item.ext_attr_name,
            dropped = values.len() - 1,
            "Single-valued item received several values, keeping the first"
        );
        values.truncate(1);
    }
    Ok(values)
}
