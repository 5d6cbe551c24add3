//! Entry bookkeeping.
//!
//! The [`StateManager`] owns everything a tracking scope knows: the object
//! space, one internal entry per instance, and one identity map per entity
//! type. Its behavior is split across files by concern:
//!
//! - `state_manager.rs`: entry state machine, property writes, change
//!   detection, cascades and saving
//! - `fixup.rs`: navigation and foreign key consistency
//! - `graph.rs`: graph traversal and attach

mod entry;
mod fixup;
mod graph;
mod identity_map;
mod state_manager;

pub use graph::GraphNode;

pub(crate) use graph::AttachMode;
pub(crate) use state_manager::StateManager;

use std::fmt;

/// The state of an entity with respect to the tracking scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EntityState {
    /// Not tracked.
    #[default]
    Detached,
    /// Tracked and unmodified since it was attached or saved.
    Unchanged,
    /// Tracked and pending insertion.
    Added,
    /// Tracked with at least one modified property.
    Modified,
    /// Tracked and pending deletion.
    Deleted,
}

impl EntityState {
    /// Returns true for every state except [`EntityState::Detached`].
    #[inline]
    #[must_use]
    pub const fn is_tracked(self) -> bool {
        !matches!(self, EntityState::Detached)
    }

    /// Returns true for states that will be written by a save.
    #[inline]
    #[must_use]
    pub const fn has_pending_changes(self) -> bool {
        matches!(
            self,
            EntityState::Added | EntityState::Modified | EntityState::Deleted
        )
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityState::Detached => "Detached",
            EntityState::Unchanged => "Unchanged",
            EntityState::Added => "Added",
            EntityState::Modified => "Modified",
            EntityState::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_predicates() {
        assert!(!EntityState::Detached.is_tracked());
        assert!(EntityState::Unchanged.is_tracked());
        assert!(!EntityState::Unchanged.has_pending_changes());
        assert!(EntityState::Deleted.has_pending_changes());
        assert_eq!(EntityState::default(), EntityState::Detached);
    }

    #[test]
    fn state_display() {
        assert_eq!(EntityState::Modified.to_string(), "Modified");
        assert_eq!(EntityState::Added.to_string(), "Added");
    }
}
