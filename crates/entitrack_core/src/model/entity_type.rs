//! Entity type metadata.

use super::{EntityTypeId, ForeignKeyId, Key, Navigation, Property};
use crate::error::{MemberKind, TrackError, TrackResult};

/// A structured, non-entity value nested inside an entity type.
///
/// Its scalar members are flattened into the owning entity type's
/// properties; this record groups them for modification tracking.
#[derive(Debug, Clone)]
pub struct ComplexProperty {
    pub(crate) index: usize,
    pub(crate) name: String,
    pub(crate) path: String,
    pub(crate) type_name: String,
    pub(crate) parent: Option<usize>,
    pub(crate) children: Vec<usize>,
    pub(crate) properties: Vec<usize>,
}

impl ComplexProperty {
    /// Position within the owning entity type.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Member name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dotted path from the entity type.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Name of the complex type.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Enclosing complex property, if nested.
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Directly nested complex properties.
    pub fn children(&self) -> &[usize] {
        &self.children
    }

    /// All scalar properties at any depth below this complex property.
    pub fn properties(&self) -> &[usize] {
        &self.properties
    }
}

/// Metadata for one entity type (or one shared-type mapping).
#[derive(Debug, Clone)]
pub struct EntityType {
    pub(crate) id: EntityTypeId,
    pub(crate) name: String,
    pub(crate) clr_name: String,
    pub(crate) owned: bool,
    pub(crate) properties: Vec<Property>,
    pub(crate) keys: Vec<Key>,
    pub(crate) navigations: Vec<Navigation>,
    pub(crate) complex_properties: Vec<ComplexProperty>,
    pub(crate) declared_foreign_keys: Vec<ForeignKeyId>,
    pub(crate) referencing_foreign_keys: Vec<ForeignKeyId>,
    pub(crate) instance_slots: usize,
    pub(crate) shadow_slots: usize,
}

impl EntityType {
    /// Identifier within the model.
    pub fn id(&self) -> EntityTypeId {
        self.id
    }

    /// Display name, unique within the model.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the instance shape. Shared-type entities share it.
    pub fn clr_name(&self) -> &str {
        &self.clr_name
    }

    /// Returns true if this type shares its instance shape with other mappings.
    pub fn is_shared_type(&self) -> bool {
        self.name != self.clr_name
    }

    /// Returns true if the type is owned by another type.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// All scalar properties, including flattened complex members.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Property by index.
    pub fn property(&self, index: usize) -> &Property {
        &self.properties[index]
    }

    /// Finds a property by name.
    pub fn find_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Looks up a property by name.
    pub fn property_by_name(&self, name: &str) -> TrackResult<&Property> {
        self.find_property(name)
            .ok_or_else(|| TrackError::unknown_member(MemberKind::Property, name, &self.name))
    }

    /// The primary key.
    pub fn primary_key(&self) -> &Key {
        &self.keys[0]
    }

    /// Primary key followed by alternate keys.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Finds the key declared over exactly these properties, in order.
    pub fn find_key(&self, properties: &[usize]) -> Option<&Key> {
        self.keys.iter().find(|k| k.properties == properties)
    }

    /// Navigations in declaration order.
    pub fn navigations(&self) -> &[Navigation] {
        &self.navigations
    }

    /// Navigation by index.
    pub fn navigation(&self, index: usize) -> &Navigation {
        &self.navigations[index]
    }

    /// Finds a navigation by name.
    pub fn find_navigation(&self, name: &str) -> Option<&Navigation> {
        self.navigations.iter().find(|n| n.name == name)
    }

    /// Looks up a navigation by name.
    pub fn navigation_by_name(&self, name: &str) -> TrackResult<&Navigation> {
        self.find_navigation(name)
            .ok_or_else(|| TrackError::unknown_member(MemberKind::Navigation, name, &self.name))
    }

    /// Complex properties, outermost first.
    pub fn complex_properties(&self) -> &[ComplexProperty] {
        &self.complex_properties
    }

    /// Complex property by index.
    pub fn complex_property(&self, index: usize) -> &ComplexProperty {
        &self.complex_properties[index]
    }

    /// Finds a complex property by dotted path.
    pub fn find_complex_property(&self, path: &str) -> Option<&ComplexProperty> {
        self.complex_properties.iter().find(|c| c.path == path)
    }

    /// Looks up a complex property by dotted path.
    pub fn complex_property_by_name(&self, path: &str) -> TrackResult<&ComplexProperty> {
        self.find_complex_property(path).ok_or_else(|| {
            TrackError::unknown_member(MemberKind::ComplexProperty, path, &self.name)
        })
    }

    /// Foreign keys declared on this type (this type is the dependent).
    pub fn declared_foreign_keys(&self) -> &[ForeignKeyId] {
        &self.declared_foreign_keys
    }

    /// Foreign keys referencing this type (this type is the principal).
    pub fn referencing_foreign_keys(&self) -> &[ForeignKeyId] {
        &self.referencing_foreign_keys
    }

    /// Number of instance-backed value slots.
    pub fn instance_slots(&self) -> usize {
        self.instance_slots
    }

    /// Number of shadow value slots.
    pub fn shadow_slots(&self) -> usize {
        self.shadow_slots
    }
}
