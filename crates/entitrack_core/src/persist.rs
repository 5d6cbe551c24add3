//! Persistence sink contract.
//!
//! Saving hands a [`ChangeBatch`] to a [`PersistenceSink`]. The sink writes
//! it wherever it likes and reports back permanent values for properties
//! that held temporary placeholders.

use crate::error::TrackResult;
use crate::object::EntityHandle;
use crate::tracking::EntityState;
use crate::value::Value;

/// Snapshot of one entry with pending changes.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    /// Instance the change belongs to.
    pub handle: EntityHandle,
    /// Entity type display name.
    pub entity_type: String,
    /// `Added`, `Modified` or `Deleted`.
    pub state: EntityState,
    /// Primary key as `(property, value)` pairs.
    pub key: Vec<(String, Value)>,
    /// Current value of every property.
    pub current: Vec<(String, Value)>,
    /// Original value of every property.
    pub original: Vec<(String, Value)>,
    /// Names of modified properties (empty unless `Modified`).
    pub modified: Vec<String>,
    /// Names of properties holding temporary values.
    pub temporary: Vec<String>,
}

impl PendingChange {
    /// Current value of a property.
    #[must_use]
    pub fn current_value(&self, property: &str) -> Option<&Value> {
        self.current
            .iter()
            .find(|(name, _)| name == property)
            .map(|(_, value)| value)
    }

    /// Returns true if the property holds a temporary value.
    #[must_use]
    pub fn is_temporary(&self, property: &str) -> bool {
        self.temporary.iter().any(|name| name == property)
    }
}

/// Every pending change of one save, ordered by handle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    /// Changes in deterministic order.
    pub changes: Vec<PendingChange>,
}

impl ChangeBatch {
    /// Number of changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Returns true if there is nothing to save.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Changes in the given state.
    pub fn in_state(&self, state: EntityState) -> impl Iterator<Item = &PendingChange> {
        self.changes.iter().filter(move |c| c.state == state)
    }
}

/// Permanent values reported by a sink for one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedValues {
    /// Instance receiving the values.
    pub handle: EntityHandle,
    /// `(property, value)` pairs.
    pub values: Vec<(String, Value)>,
}

/// Writes change batches.
pub trait PersistenceSink {
    /// Persists a batch and returns permanent values for temporary ones.
    ///
    /// An error aborts the save; the tracker's state is left as it was.
    fn persist(&mut self, batch: &ChangeBatch) -> TrackResult<Vec<GeneratedValues>>;
}
