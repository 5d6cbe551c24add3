use super::{CollectionEntry, ComplexPropertyEntry, NavigationEntry, PropertyEntry, ReferenceEntry};
use crate::error::{MemberKind, TrackError, TrackResult};
use crate::model::{EntityType, EntityTypeId, Model, Property};
use crate::object::{EntityHandle, ObjectView};
use crate::tracking::{EntityState, StateManager};
use crate::value::{ScalarType, Value};
use std::fmt;
use std::sync::Arc;

/// Change tracking information and operations for one entity.
///
/// Obtained from [`Context::entry`](crate::Context::entry) or from a
/// graph traversal node. An entry can be created for an entity that is not
/// tracked; it then reports `Detached` until its state is set.
pub struct EntityEntry<'a> {
    sm: &'a mut StateManager,
    model: Arc<Model>,
    handle: EntityHandle,
    entity_type: EntityTypeId,
}

impl<'a> EntityEntry<'a> {
    pub(crate) fn new(sm: &'a mut StateManager, handle: EntityHandle, entity_type: EntityTypeId) -> Self {
        let model = Arc::clone(&sm.model);
        Self {
            sm,
            model,
            handle,
            entity_type,
        }
    }

    /// Handle of the entity.
    #[must_use]
    pub fn handle(&self) -> EntityHandle {
        self.handle
    }

    /// Entity type metadata.
    #[must_use]
    pub fn entity_type(&self) -> &EntityType {
        self.model.entity_type(self.entity_type)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> EntityState {
        self.sm.state(self.handle)
    }

    /// Moves the entity to another state, starting or stopping tracking as
    /// needed.
    pub fn set_state(&mut self, state: EntityState) -> TrackResult<()> {
        self.sm.set_state(self.handle, state)
    }

    /// Returns true if every primary key property holds a non-sentinel value.
    #[must_use]
    pub fn is_key_set(&self) -> bool {
        self.sm.is_key_set(self.handle).unwrap_or(false)
    }

    /// The instance as user code sees it.
    pub fn object(&self) -> TrackResult<ObjectView<'_>> {
        Ok(ObjectView::new(
            self.model.entity_type(self.entity_type),
            self.sm.objects.get(self.handle)?,
        ))
    }

    /// Current value of a property.
    pub fn current_value(&self, name: &str) -> TrackResult<Value> {
        let property = self.entity_type().property_by_name(name)?;
        self.sm.read(self.handle, property.index())
    }

    /// Current value of a property as a Rust type.
    pub fn current_value_as<T: ScalarType>(&self, name: &str) -> TrackResult<T> {
        let entity_type = self.entity_type();
        let property = entity_type.property_by_name(name)?;
        read_as(entity_type, property, &self.sm.read(self.handle, property.index())?)
    }

    /// Writes a property through the tracker.
    pub fn set_current_value(&mut self, name: &str, value: impl Into<Value>) -> TrackResult<()> {
        let index = self.entity_type().property_by_name(name)?.index();
        self.sm.set_property_value(self.handle, index, value.into())
    }

    /// Original value of a property.
    pub fn original_value(&self, name: &str) -> TrackResult<Value> {
        let property = self.entity_type().property_by_name(name)?;
        self.sm.original_value(self.handle, property.index())
    }

    /// Current values of all properties, in declaration order.
    pub fn current_values(&self) -> TrackResult<Vec<Value>> {
        self.sm.current_values(self.handle)
    }

    /// Properties flagged as modified.
    pub fn modified_properties(&self) -> TrackResult<Vec<&Property>> {
        let mut modified = Vec::new();
        for property in self.entity_type().properties() {
            if self.sm.is_property_modified(self.handle, property.index())? {
                modified.push(property);
            }
        }
        Ok(modified)
    }

    /// Entry for a scalar property.
    pub fn property(&mut self, name: &str) -> TrackResult<PropertyEntry<'_>> {
        let index = self.entity_type().property_by_name(name)?.index();
        Ok(PropertyEntry::new(self.sm, self.handle, self.entity_type, index))
    }

    /// Entry for a reference navigation.
    pub fn reference(&mut self, name: &str) -> TrackResult<ReferenceEntry<'_>> {
        let navigation = self.entity_type().navigation_by_name(name)?;
        if navigation.is_collection() {
            return Err(TrackError::invalid_operation(format!(
                "the navigation '{}.{}' is a collection; use collection() to access it",
                self.entity_type().name(),
                name
            )));
        }
        let index = navigation.index();
        Ok(ReferenceEntry::new(self.sm, self.handle, self.entity_type, index))
    }

    /// Entry for a collection or skip navigation.
    pub fn collection(&mut self, name: &str) -> TrackResult<CollectionEntry<'_>> {
        let navigation = self.entity_type().navigation_by_name(name)?;
        if !navigation.is_collection() {
            return Err(TrackError::invalid_operation(format!(
                "the navigation '{}.{}' is a reference; use reference() to access it",
                self.entity_type().name(),
                name
            )));
        }
        let index = navigation.index();
        Ok(CollectionEntry::new(self.sm, self.handle, self.entity_type, index))
    }

    /// Entry for any navigation.
    pub fn navigation(&mut self, name: &str) -> TrackResult<NavigationEntry<'_>> {
        let navigation = self.entity_type().navigation_by_name(name)?;
        let (index, is_collection) = (navigation.index(), navigation.is_collection());
        Ok(NavigationEntry::new(self.sm, self.handle, self.entity_type, index, is_collection))
    }

    /// Entry for a complex property, by dotted path.
    pub fn complex_property(&mut self, path: &str) -> TrackResult<ComplexPropertyEntry<'_>> {
        let index = self.entity_type().complex_property_by_name(path)?.index();
        Ok(ComplexPropertyEntry::new(self.sm, self.handle, self.entity_type, index))
    }

    /// Entry for a property, navigation or complex property.
    pub fn member(&mut self, name: &str) -> TrackResult<MemberEntry<'_>> {
        let entity_type = self.model.entity_type(self.entity_type);
        if let Some(property) = entity_type.find_property(name) {
            let index = property.index();
            return Ok(MemberEntry::Property(PropertyEntry::new(
                self.sm,
                self.handle,
                self.entity_type,
                index,
            )));
        }
        if let Some(navigation) = entity_type.find_navigation(name) {
            let (index, is_collection) = (navigation.index(), navigation.is_collection());
            return Ok(MemberEntry::Navigation(NavigationEntry::new(
                self.sm,
                self.handle,
                self.entity_type,
                index,
                is_collection,
            )));
        }
        if let Some(complex) = entity_type.find_complex_property(name) {
            let index = complex.index();
            return Ok(MemberEntry::ComplexProperty(ComplexPropertyEntry::new(
                self.sm,
                self.handle,
                self.entity_type,
                index,
            )));
        }
        Err(TrackError::unknown_member(MemberKind::Member, name, entity_type.name()))
    }

    /// Compares this entity against its snapshot. Does nothing for an
    /// untracked entity.
    pub fn detect_changes(&mut self) -> TrackResult<()> {
        if self.sm.is_tracked(self.handle) {
            self.sm.detect_entry_changes(self.handle)?;
        }
        Ok(())
    }

    /// Restores original values and returns the entry to `Unchanged`.
    pub fn reload_original_values(&mut self) -> TrackResult<()> {
        self.sm.reload_original_values(self.handle)
    }
}

impl fmt::Debug for EntityEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityEntry")
            .field("handle", &self.handle)
            .field("entity_type", &self.entity_type().name())
            .field("state", &self.state())
            .finish()
    }
}

/// Entry for any member of an entity.
#[derive(Debug)]
pub enum MemberEntry<'a> {
    /// A scalar property.
    Property(PropertyEntry<'a>),
    /// A reference, collection or skip navigation.
    Navigation(NavigationEntry<'a>),
    /// A complex property.
    ComplexProperty(ComplexPropertyEntry<'a>),
}

impl MemberEntry<'_> {
    /// Name of the member.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            MemberEntry::Property(p) => p.metadata().name(),
            MemberEntry::Navigation(n) => n.metadata().name(),
            MemberEntry::ComplexProperty(c) => c.metadata().path(),
        }
    }

    /// Returns true if the member is considered modified.
    pub fn is_modified(&self) -> TrackResult<bool> {
        match self {
            MemberEntry::Property(p) => p.is_modified(),
            MemberEntry::Navigation(n) => n.is_modified(),
            MemberEntry::ComplexProperty(c) => c.is_modified(),
        }
    }

    /// Marks the member as modified or not.
    pub fn set_is_modified(&mut self, modified: bool) -> TrackResult<()> {
        match self {
            MemberEntry::Property(p) => p.set_is_modified(modified),
            MemberEntry::Navigation(n) => n.set_is_modified(modified),
            MemberEntry::ComplexProperty(c) => c.set_is_modified(modified),
        }
    }
}

/// Reads a property value as a Rust type.
pub(crate) fn read_as<T: ScalarType>(entity_type: &EntityType, property: &Property, value: &Value) -> TrackResult<T> {
    if property.value_type().name() != T::type_name() {
        return Err(TrackError::WrongGenericPropertyType {
            property: property.name().to_string(),
            declaring_type: entity_type.name().to_string(),
            expected: property.value_type().name().to_string(),
            actual: T::type_name().to_string(),
        });
    }
    if value.is_null() && !T::accepts_null() {
        return Err(TrackError::invalid_operation(format!(
            "the property '{}.{}' is null; read it as an Option",
            entity_type.name(),
            property.name()
        )));
    }
    T::from_value(value).ok_or_else(|| TrackError::WrongGenericPropertyType {
        property: property.name().to_string(),
        declaring_type: entity_type.name().to_string(),
        expected: property.value_type().name().to_string(),
        actual: value.type_name().to_string(),
    })
}
