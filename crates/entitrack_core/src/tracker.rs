//! State decisions for graph traversal and discovery.

use crate::entry::EntityEntry;
use crate::error::TrackResult;
use crate::model::{EntityType, Navigation};
use crate::tracking::{EntityState, GraphNode};
use std::fmt;

/// Built-in traversal callback keyed on whether an entity's key is set.
///
/// Entities with a key set become `Unchanged`, or `Modified` when
/// `update_existing_entities` is enabled; entities without one become
/// `Added`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueEntityTracker {
    update_existing_entities: bool,
}

impl KeyValueEntityTracker {
    /// Creates a tracker.
    #[must_use]
    pub const fn new(update_existing_entities: bool) -> Self {
        Self {
            update_existing_entities,
        }
    }

    /// Assigns the state of one traversal node.
    pub fn track_node(&self, node: &mut GraphNode<'_, ()>) -> TrackResult<()> {
        let mut entry = node.entry();
        let state = self.determine_state(&entry);
        entry.set_state(state)
    }

    /// The state an entry should enter.
    #[must_use]
    pub fn determine_state(&self, entry: &EntityEntry<'_>) -> EntityState {
        if !entry.is_key_set() {
            EntityState::Added
        } else if self.update_existing_entities {
            EntityState::Modified
        } else {
            EntityState::Unchanged
        }
    }
}

/// An untracked entity found behind a navigation of a tracked one.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveredEntity<'a> {
    /// Entity type of the discovered entity.
    pub entity_type: &'a EntityType,
    /// Whether its primary key is set.
    pub key_set: bool,
    /// Whether its primary key is generated on add.
    pub key_generated: bool,
    /// State of the entity it was reached from.
    pub referrer_state: EntityState,
    /// Navigation it was reached through.
    pub navigation: &'a Navigation,
}

/// Decides the state of entities discovered outside an explicit traversal,
/// for example when user code adds a new instance to a tracked collection.
///
/// Returning `Detached` leaves the entity (and everything behind it)
/// untracked.
pub trait DiscoveryPolicy: fmt::Debug + Send + Sync {
    /// State for a discovered entity.
    fn discovered_state(&self, entity: &DiscoveredEntity<'_>) -> EntityState;
}

/// Discovered entities with a set, store-generated key are assumed to exist
/// and become `Modified`; all others become `Added`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDiscoveryPolicy;

impl DiscoveryPolicy for DefaultDiscoveryPolicy {
    fn discovered_state(&self, entity: &DiscoveredEntity<'_>) -> EntityState {
        if entity.key_set && entity.key_generated {
            EntityState::Modified
        } else {
            EntityState::Added
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelBuilder;
    use crate::value::ValueType;

    #[test]
    fn default_policy_assumes_generated_keys_exist() {
        let mut builder = ModelBuilder::new();
        builder
            .entity("Blog", |e| {
                e.property("Id", ValueType::Int);
            })
            .entity("Post", |e| {
                e.property("Id", ValueType::Int);
            });
        builder.has_many("Blog", Some("Posts"), "Post", Some("Blog"));
        let model = builder.build().unwrap();
        let blog = model.find_entity_type("Blog").unwrap();
        let post = model.find_entity_type("Post").unwrap();
        let navigation = blog.navigation_by_name("Posts").unwrap();

        let mut discovered = DiscoveredEntity {
            entity_type: post,
            key_set: true,
            key_generated: true,
            referrer_state: EntityState::Unchanged,
            navigation,
        };
        assert_eq!(
            DefaultDiscoveryPolicy.discovered_state(&discovered),
            EntityState::Modified
        );
        discovered.key_generated = false;
        assert_eq!(
            DefaultDiscoveryPolicy.discovered_state(&discovered),
            EntityState::Added
        );
        discovered.key_set = false;
        assert_eq!(
            DefaultDiscoveryPolicy.discovered_state(&discovered),
            EntityState::Added
        );
    }
}
