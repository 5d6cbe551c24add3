//! Finalized, immutable metadata.
//!
//! A [`Model`] is produced by [`ModelBuilder::build`] and shared by every
//! context created over it. Entity types, properties, keys and navigations
//! are addressed by index; foreign keys are model-wide.

mod builder;
mod entity_type;
mod key;
mod navigation;
mod property;

pub use builder::{
    ComplexTypeBuilder, EntityTypeBuilder, ManyToManyBuilder, ModelBuilder, PropertyBuilder,
    RelationshipBuilder,
};
pub use entity_type::{ComplexProperty, EntityType};
pub use key::{DeleteBehavior, ForeignKey, Key};
pub use navigation::{JoinInfo, Navigation, NavigationKind};
pub use property::{Property, PropertyAccessor, PropertyStorage};

use crate::error::{MemberKind, TrackError, TrackResult};
use std::collections::HashMap;
use std::fmt;

/// Identifier of an entity type within a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityTypeId(pub(crate) usize);

impl EntityTypeId {
    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

/// Identifier of a foreign key within a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ForeignKeyId(pub(crate) usize);

impl ForeignKeyId {
    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for ForeignKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FK#{}", self.0)
    }
}

/// The finalized metadata model.
#[derive(Debug)]
pub struct Model {
    pub(crate) entity_types: Vec<EntityType>,
    pub(crate) foreign_keys: Vec<ForeignKey>,
    pub(crate) names: HashMap<String, EntityTypeId>,
}

impl Model {
    /// Starts building a model.
    pub fn builder() -> ModelBuilder {
        ModelBuilder::new()
    }

    /// Entity type by id.
    pub fn entity_type(&self, id: EntityTypeId) -> &EntityType {
        &self.entity_types[id.0]
    }

    /// Finds an entity type by name.
    pub fn find_entity_type(&self, name: &str) -> Option<&EntityType> {
        self.names.get(name).map(|id| &self.entity_types[id.0])
    }

    /// Looks up an entity type by name.
    pub fn entity_type_by_name(&self, name: &str) -> TrackResult<&EntityType> {
        self.find_entity_type(name)
            .ok_or_else(|| TrackError::unknown_member(MemberKind::EntityType, name, "<model>"))
    }

    /// All entity types in declaration order.
    pub fn entity_types(&self) -> &[EntityType] {
        &self.entity_types
    }

    /// Foreign key by id.
    pub fn foreign_key(&self, id: ForeignKeyId) -> &ForeignKey {
        &self.foreign_keys[id.0]
    }

    /// All foreign keys.
    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// Navigation by declaring type and index.
    pub fn navigation(&self, entity_type: EntityTypeId, index: usize) -> &Navigation {
        &self.entity_types[entity_type.0].navigations[index]
    }
}
