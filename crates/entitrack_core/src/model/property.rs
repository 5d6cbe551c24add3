//! Scalar property metadata and uniform storage access.

use super::ForeignKeyId;
use crate::comparer::ValueComparer;
use crate::object::EntityObject;
use crate::value::{Value, ValueType};
use std::sync::Arc;

/// Where a property value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyStorage {
    /// A member of the entity instance.
    ClrProperty,
    /// A backing field of the entity instance.
    ClrField,
    /// Shadow state held by the tracking entry only.
    ShadowSlot,
    /// A named slot in the instance's indexer bag.
    IndexerSlot,
}

impl PropertyStorage {
    /// Returns true if the value lives on the entity instance.
    pub fn is_instance_backed(self) -> bool {
        !matches!(self, PropertyStorage::ShadowSlot)
    }
}

/// A scalar property of an entity type.
///
/// Properties of complex types are flattened into their owning entity type
/// with a dotted path as name, e.g. `Culture.License.Title`.
#[derive(Debug, Clone)]
pub struct Property {
    pub(crate) index: usize,
    pub(crate) name: String,
    pub(crate) value_type: ValueType,
    pub(crate) nullable: bool,
    pub(crate) storage: PropertyStorage,
    pub(crate) slot: usize,
    pub(crate) value_generated_on_add: bool,
    pub(crate) comparer: Arc<dyn ValueComparer>,
    pub(crate) key_comparer: Arc<dyn ValueComparer>,
    pub(crate) complex_parent: Option<usize>,
    pub(crate) keys: Vec<usize>,
    pub(crate) foreign_keys: Vec<ForeignKeyId>,
}

impl Property {
    /// Position of the property within its entity type.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Property name (dotted path for complex members).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type.
    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    /// Whether the property accepts null.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Storage location.
    pub fn storage(&self) -> PropertyStorage {
        self.storage
    }

    /// Returns true for shadow properties.
    pub fn is_shadow(&self) -> bool {
        self.storage == PropertyStorage::ShadowSlot
    }

    /// Whether a value is generated when the entity is added with the sentinel value.
    pub fn value_generated_on_add(&self) -> bool {
        self.value_generated_on_add
    }

    /// Comparer used for change detection.
    pub fn comparer(&self) -> &Arc<dyn ValueComparer> {
        &self.comparer
    }

    /// Comparer used for key lookups.
    pub fn key_comparer(&self) -> &Arc<dyn ValueComparer> {
        &self.key_comparer
    }

    /// Complex property that declares this property, if any.
    pub fn complex_parent(&self) -> Option<usize> {
        self.complex_parent
    }

    /// Returns true if the property is part of the primary or an alternate key.
    pub fn is_key(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Returns true if the property is part of the primary key.
    pub fn is_primary_key(&self) -> bool {
        self.keys.contains(&0)
    }

    /// Returns true if the property is part of a foreign key.
    pub fn is_foreign_key(&self) -> bool {
        !self.foreign_keys.is_empty()
    }

    /// Keys containing this property.
    pub fn containing_keys(&self) -> &[usize] {
        &self.keys
    }

    /// Foreign keys containing this property.
    pub fn containing_foreign_keys(&self) -> &[ForeignKeyId] {
        &self.foreign_keys
    }

    /// Returns the storage accessor for this property.
    pub fn accessor(&self) -> PropertyAccessor<'_> {
        PropertyAccessor { property: self }
    }
}

/// Reads and writes a property regardless of where it is stored.
#[derive(Debug, Clone, Copy)]
pub struct PropertyAccessor<'a> {
    property: &'a Property,
}

impl PropertyAccessor<'_> {
    /// Reads the value from the instance or the entry's shadow slots.
    pub fn read(&self, object: &EntityObject, shadow: &[Value]) -> Value {
        let p = self.property;
        match p.storage {
            PropertyStorage::ClrProperty | PropertyStorage::ClrField => {
                object.values.get(p.slot).cloned().unwrap_or(Value::Null)
            }
            PropertyStorage::ShadowSlot => shadow.get(p.slot).cloned().unwrap_or(Value::Null),
            PropertyStorage::IndexerSlot => object
                .indexer
                .get(&p.name)
                .cloned()
                .unwrap_or_else(|| p.value_type.default_value(p.nullable)),
        }
    }

    /// Writes the value to the instance or the entry's shadow slots.
    pub fn write(&self, object: &mut EntityObject, shadow: &mut [Value], value: Value) {
        let p = self.property;
        match p.storage {
            PropertyStorage::ClrProperty | PropertyStorage::ClrField => {
                if let Some(slot) = object.values.get_mut(p.slot) {
                    *slot = value;
                }
            }
            PropertyStorage::ShadowSlot => {
                if let Some(slot) = shadow.get_mut(p.slot) {
                    *slot = value;
                }
            }
            PropertyStorage::IndexerSlot => {
                object.indexer.insert(p.name.clone(), value);
            }
        }
    }
}
