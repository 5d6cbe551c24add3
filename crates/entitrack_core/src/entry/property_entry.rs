use super::entity_entry::read_as;
use super::EntityEntry;
use crate::error::TrackResult;
use crate::model::{EntityType, EntityTypeId, Model, Property};
use crate::object::EntityHandle;
use crate::tracking::StateManager;
use crate::value::{ScalarType, Value};
use std::fmt;
use std::sync::Arc;

/// Change tracking information for one scalar property of an entity.
pub struct PropertyEntry<'a> {
    sm: &'a mut StateManager,
    model: Arc<Model>,
    handle: EntityHandle,
    entity_type: EntityTypeId,
    property: usize,
}

impl<'a> PropertyEntry<'a> {
    pub(crate) fn new(sm: &'a mut StateManager, handle: EntityHandle, entity_type: EntityTypeId, property: usize) -> Self {
        let model = Arc::clone(&sm.model);
        Self {
            sm,
            model,
            handle,
            entity_type,
            property,
        }
    }

    fn declaring_type(&self) -> &EntityType {
        self.model.entity_type(self.entity_type)
    }

    /// Property metadata.
    #[must_use]
    pub fn metadata(&self) -> &Property {
        self.declaring_type().property(self.property)
    }

    /// Current value.
    pub fn current_value(&self) -> TrackResult<Value> {
        self.sm.read(self.handle, self.property)
    }

    /// Current value as a Rust type.
    ///
    /// Fails with `WrongGenericPropertyType` if `T` does not match the
    /// declared property type.
    pub fn current_value_as<T: ScalarType>(&self) -> TrackResult<T> {
        read_as(self.declaring_type(), self.metadata(), &self.current_value()?)
    }

    /// Writes the value through the tracker, updating the modified flag,
    /// the entity state and any keys or relationships that depend on it.
    pub fn set_current_value(&mut self, value: impl Into<Value>) -> TrackResult<()> {
        self.sm.set_property_value(self.handle, self.property, value.into())
    }

    /// Original value; the current value for an untracked entity.
    pub fn original_value(&self) -> TrackResult<Value> {
        self.sm.original_value(self.handle, self.property)
    }

    /// Original value as a Rust type.
    pub fn original_value_as<T: ScalarType>(&self) -> TrackResult<T> {
        read_as(self.declaring_type(), self.metadata(), &self.original_value()?)
    }

    /// Overwrites the original value.
    pub fn set_original_value(&mut self, value: impl Into<Value>) -> TrackResult<()> {
        self.sm.set_original_value(self.handle, self.property, value.into())
    }

    /// Returns true if the property is flagged as modified. Only a
    /// `Modified` entity has modified properties.
    pub fn is_modified(&self) -> TrackResult<bool> {
        self.sm.is_property_modified(self.handle, self.property)
    }

    /// Flags the property as modified, or clears the flag and restores the
    /// original value.
    pub fn set_is_modified(&mut self, modified: bool) -> TrackResult<()> {
        self.sm.set_property_modified(self.handle, self.property, modified)
    }

    /// Returns true if the current value is a temporary placeholder.
    pub fn is_temporary(&self) -> TrackResult<bool> {
        self.sm.is_temporary(self.handle, self.property)
    }

    /// Marks the value as temporary. Fails for an `Unchanged` or
    /// `Modified` entity.
    pub fn set_is_temporary(&mut self, temporary: bool) -> TrackResult<()> {
        self.sm.set_temporary(self.handle, self.property, temporary)
    }

    /// Entry of the entity that owns this property.
    pub fn entity_entry(&mut self) -> EntityEntry<'_> {
        EntityEntry::new(self.sm, self.handle, self.entity_type)
    }
}

impl fmt::Debug for PropertyEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyEntry")
            .field("handle", &self.handle)
            .field("property", &self.metadata().name())
            .finish_non_exhaustive()
    }
}
