//! Keys and foreign keys.

use super::{EntityTypeId, ForeignKeyId};
use crate::comparer::KeyComparer;

/// A primary or alternate key.
#[derive(Debug, Clone)]
pub struct Key {
    pub(crate) index: usize,
    pub(crate) properties: Vec<usize>,
    pub(crate) comparer: KeyComparer,
}

impl Key {
    /// Position of the key within its entity type; 0 is the primary key.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns true for the primary key.
    pub fn is_primary(&self) -> bool {
        self.index == 0
    }

    /// Ordered key properties.
    pub fn properties(&self) -> &[usize] {
        &self.properties
    }

    /// Composite comparer over the key properties.
    pub fn comparer(&self) -> &KeyComparer {
        &self.comparer
    }
}

/// What happens to dependents when their principal is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteBehavior {
    /// Dependents are deleted.
    Cascade,
    /// Tracked dependents have their foreign key nulled.
    ClientSetNull,
    /// Dependents have their foreign key nulled.
    SetNull,
    /// Dependents are left untouched.
    Restrict,
}

/// A relationship between a dependent and a principal entity type.
#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub(crate) id: ForeignKeyId,
    pub(crate) dependent_type: EntityTypeId,
    pub(crate) principal_type: EntityTypeId,
    pub(crate) properties: Vec<usize>,
    pub(crate) principal_key: usize,
    pub(crate) dependent_to_principal: Option<usize>,
    pub(crate) principal_to_dependent: Option<usize>,
    pub(crate) unique: bool,
    pub(crate) required: bool,
    pub(crate) delete_behavior: DeleteBehavior,
    pub(crate) ownership: bool,
    pub(crate) comparer: KeyComparer,
}

impl ForeignKey {
    /// Identifier within the model.
    pub fn id(&self) -> ForeignKeyId {
        self.id
    }

    /// Entity type holding the foreign key properties.
    pub fn dependent_type(&self) -> EntityTypeId {
        self.dependent_type
    }

    /// Entity type referenced by the foreign key.
    pub fn principal_type(&self) -> EntityTypeId {
        self.principal_type
    }

    /// Foreign key properties on the dependent type.
    pub fn properties(&self) -> &[usize] {
        &self.properties
    }

    /// Referenced key on the principal type.
    pub fn principal_key(&self) -> usize {
        self.principal_key
    }

    /// Navigation on the dependent pointing at the principal.
    pub fn dependent_to_principal(&self) -> Option<usize> {
        self.dependent_to_principal
    }

    /// Navigation on the principal pointing at the dependent(s).
    pub fn principal_to_dependent(&self) -> Option<usize> {
        self.principal_to_dependent
    }

    /// One-to-one relationship.
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// A dependent cannot exist without a principal.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Delete behavior.
    pub fn delete_behavior(&self) -> DeleteBehavior {
        self.delete_behavior
    }

    /// The dependent is owned by the principal.
    pub fn is_ownership(&self) -> bool {
        self.ownership
    }

    /// Returns true if deleting the principal deletes the dependent.
    pub fn cascades(&self) -> bool {
        self.ownership || self.delete_behavior == DeleteBehavior::Cascade
    }

    /// Composite comparer over the foreign key properties.
    pub fn comparer(&self) -> &KeyComparer {
        &self.comparer
    }
}
