use super::{EntityEntry, PropertyEntry};
use crate::error::{MemberKind, TrackError, TrackResult};
use crate::model::{ComplexProperty, EntityTypeId, Model};
use crate::object::EntityHandle;
use crate::tracking::StateManager;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Change tracking information for a complex property.
///
/// A complex property has no identity of its own. Its scalar members are
/// stored on the owning entity under dotted names, so modification is
/// tracked per member.
pub struct ComplexPropertyEntry<'a> {
    sm: &'a mut StateManager,
    model: Arc<Model>,
    handle: EntityHandle,
    entity_type: EntityTypeId,
    complex: usize,
}

impl<'a> ComplexPropertyEntry<'a> {
    pub(crate) fn new(sm: &'a mut StateManager, handle: EntityHandle, entity_type: EntityTypeId, complex: usize) -> Self {
        let model = Arc::clone(&sm.model);
        Self {
            sm,
            model,
            handle,
            entity_type,
            complex,
        }
    }

    /// Complex property metadata.
    #[must_use]
    pub fn metadata(&self) -> &ComplexProperty {
        self.model.entity_type(self.entity_type).complex_property(self.complex)
    }

    /// Entry for a scalar member, by its name relative to this property.
    pub fn property(&mut self, name: &str) -> TrackResult<PropertyEntry<'_>> {
        let entity_type = self.model.entity_type(self.entity_type);
        let complex = entity_type.complex_property(self.complex);
        let index = entity_type
            .find_property(&format!("{}.{}", complex.path(), name))
            .filter(|p| p.complex_parent() == Some(self.complex))
            .map(|p| p.index())
            .ok_or_else(|| TrackError::unknown_member(MemberKind::Property, name, complex.type_name()))?;
        Ok(PropertyEntry::new(self.sm, self.handle, self.entity_type, index))
    }

    /// Entry for a nested complex property.
    pub fn complex_property(&mut self, name: &str) -> TrackResult<ComplexPropertyEntry<'_>> {
        let entity_type = self.model.entity_type(self.entity_type);
        let complex = entity_type.complex_property(self.complex);
        let index = complex
            .children()
            .iter()
            .copied()
            .find(|&c| entity_type.complex_property(c).name() == name)
            .ok_or_else(|| TrackError::unknown_member(MemberKind::ComplexProperty, name, complex.type_name()))?;
        Ok(ComplexPropertyEntry::new(self.sm, self.handle, self.entity_type, index))
    }

    /// Current values of every scalar member, nested members included.
    pub fn current_values(&self) -> TrackResult<Vec<Value>> {
        self.sm.read_all(self.handle, self.metadata().properties())
    }

    /// Writes every scalar member, in the order of `current_values`. Each
    /// write goes through the tracker, so modified flags and the entity
    /// state follow as they would for single properties.
    pub fn set_current_values(&mut self, values: &[Value]) -> TrackResult<()> {
        let properties = self.model.entity_type(self.entity_type).complex_property(self.complex).properties();
        if properties.len() != values.len() {
            return Err(TrackError::count_mismatch(properties.len(), values.len()));
        }
        for (&property, value) in properties.iter().zip(values) {
            self.sm.set_property_value(self.handle, property, value.clone())?;
        }
        Ok(())
    }

    /// Returns true if any scalar member is modified.
    pub fn is_modified(&self) -> TrackResult<bool> {
        for &property in self.metadata().properties() {
            if self.sm.is_property_modified(self.handle, property)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Marks every non-key scalar member as modified or not.
    pub fn set_is_modified(&mut self, modified: bool) -> TrackResult<()> {
        let entity_type = self.model.entity_type(self.entity_type);
        for &property in entity_type.complex_property(self.complex).properties() {
            if !entity_type.property(property).is_key() {
                self.sm.set_property_modified(self.handle, property, modified)?;
            }
        }
        Ok(())
    }

    /// Entry of the entity that owns this complex property.
    pub fn entity_entry(&mut self) -> EntityEntry<'_> {
        EntityEntry::new(self.sm, self.handle, self.entity_type)
    }
}

impl fmt::Debug for ComplexPropertyEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComplexPropertyEntry")
            .field("handle", &self.handle)
            .field("path", &self.metadata().path())
            .finish_non_exhaustive()
    }
}
