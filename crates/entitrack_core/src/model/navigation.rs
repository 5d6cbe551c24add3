//! Navigation metadata.

use super::{EntityTypeId, ForeignKeyId};

/// Shape of a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    /// Points at zero or one entity.
    Reference,
    /// Holds a set of dependents.
    Collection,
    /// Many-to-many set backed by a join entity type.
    Skip,
}

/// A reference, collection or skip navigation.
#[derive(Debug, Clone)]
pub struct Navigation {
    pub(crate) index: usize,
    pub(crate) name: String,
    pub(crate) declaring_type: EntityTypeId,
    pub(crate) target_type: EntityTypeId,
    pub(crate) kind: NavigationKind,
    pub(crate) foreign_key: ForeignKeyId,
    pub(crate) on_dependent: bool,
    pub(crate) inverse: Option<usize>,
    pub(crate) join: Option<JoinInfo>,
}

/// Join details of a skip navigation.
#[derive(Debug, Clone, Copy)]
pub struct JoinInfo {
    /// Join entity type.
    pub join_type: EntityTypeId,
    /// Foreign key from the join type to the navigation's declaring type.
    pub to_declaring: ForeignKeyId,
    /// Foreign key from the join type to the navigation's target type.
    pub to_target: ForeignKeyId,
}

impl Navigation {
    /// Declaration ordinal within the declaring type.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Navigation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entity type declaring the navigation.
    pub fn declaring_type(&self) -> EntityTypeId {
        self.declaring_type
    }

    /// Entity type the navigation points at.
    pub fn target_type(&self) -> EntityTypeId {
        self.target_type
    }

    /// Navigation kind.
    pub fn kind(&self) -> NavigationKind {
        self.kind
    }

    /// Returns true for collection and skip navigations.
    pub fn is_collection(&self) -> bool {
        self.kind != NavigationKind::Reference
    }

    /// Returns true for skip navigations.
    pub fn is_skip(&self) -> bool {
        self.kind == NavigationKind::Skip
    }

    /// Foreign key backing the navigation.
    ///
    /// For skip navigations this is the join type's foreign key to the
    /// declaring type.
    pub fn foreign_key(&self) -> ForeignKeyId {
        self.foreign_key
    }

    /// Returns true if the declaring type is the dependent of the foreign key.
    pub fn is_on_dependent(&self) -> bool {
        self.on_dependent
    }

    /// Inverse navigation on the target type.
    pub fn inverse(&self) -> Option<usize> {
        self.inverse
    }

    /// Join details for skip navigations.
    pub fn join(&self) -> Option<JoinInfo> {
        self.join
    }
}
