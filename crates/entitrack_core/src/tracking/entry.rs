//! Per-instance tracking record.

use super::EntityState;
use crate::model::{EntityType, EntityTypeId};
use crate::object::EntityHandle;
use crate::value::Value;
use entitrack_observable::SetChange;
use std::sync::mpsc::Receiver;

/// Collection notification queued for the next change detection pass.
pub(crate) type QueuedChange = (usize, SetChange<EntityHandle>);

/// Tracking record of one entity instance.
///
/// Every instance created in a context has exactly one record; a record in
/// the `Detached` state is not registered in any identity map. All
/// per-property vectors are indexed by property index.
#[derive(Debug)]
pub(crate) struct InternalEntry {
    pub(crate) handle: EntityHandle,
    pub(crate) entity_type: EntityTypeId,
    pub(crate) state: EntityState,
    /// Shadow value slots.
    pub(crate) shadow: Vec<Value>,
    /// Original values.
    pub(crate) original: Vec<Value>,
    /// Modified flags.
    pub(crate) modified: Vec<bool>,
    /// Temporary value markers.
    pub(crate) temporary: Vec<bool>,
    /// Last observed current values, compared by change detection.
    pub(crate) snapshot: Vec<Value>,
    /// Last observed reference navigation targets, per navigation.
    pub(crate) references: Vec<Option<EntityHandle>>,
    /// Subscriptions to collection navigations, per navigation.
    pub(crate) receivers: Vec<Option<Receiver<SetChange<EntityHandle>>>>,
    /// User notifications drained while the tracker mutated a collection.
    pub(crate) pending: Vec<QueuedChange>,
}

impl InternalEntry {
    pub(crate) fn new(handle: EntityHandle, entity_type: &EntityType) -> Self {
        let properties = entity_type.properties();
        let mut shadow = vec![Value::Null; entity_type.shadow_slots()];
        for property in properties.iter().filter(|p| p.is_shadow()) {
            if let Some(slot) = shadow.get_mut(property.slot) {
                *slot = property.value_type().default_value(property.is_nullable());
            }
        }
        let navigations = entity_type.navigations().len();
        Self {
            handle,
            entity_type: entity_type.id(),
            state: EntityState::Detached,
            shadow,
            original: vec![Value::Null; properties.len()],
            modified: vec![false; properties.len()],
            temporary: vec![false; properties.len()],
            snapshot: vec![Value::Null; properties.len()],
            references: vec![None; navigations],
            receivers: (0..navigations).map(|_| None).collect(),
            pending: Vec::new(),
        }
    }

    pub(crate) fn any_modified(&self) -> bool {
        self.modified.iter().any(|&m| m)
    }

    pub(crate) fn clear_modified(&mut self) {
        self.modified.iter_mut().for_each(|m| *m = false);
    }

    pub(crate) fn clear_temporary(&mut self) {
        self.temporary.iter_mut().for_each(|t| *t = false);
    }

    /// Drops collection subscriptions and queued notifications.
    pub(crate) fn unsubscribe(&mut self) {
        self.receivers.iter_mut().for_each(|r| *r = None);
        self.pending.clear();
    }

    /// Moves every notification received so far into the pending queue.
    pub(crate) fn stash_notifications(&mut self) {
        for (navigation, receiver) in self.receivers.iter().enumerate() {
            if let Some(receiver) = receiver {
                self.pending
                    .extend(receiver.try_iter().map(|change| (navigation, change)));
            }
        }
    }

    /// Discards notifications received for one navigation.
    pub(crate) fn discard_notifications(&mut self, navigation: usize) {
        if let Some(Some(receiver)) = self.receivers.get(navigation) {
            receiver.try_iter().for_each(drop);
        }
    }

    /// Takes every queued and received notification, in arrival order.
    pub(crate) fn take_notifications(&mut self) -> Vec<QueuedChange> {
        self.stash_notifications();
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelBuilder;
    use crate::value::ValueType;
    use entitrack_observable::ObservableHashSet;

    #[test]
    fn new_entry_is_detached_with_shadow_defaults() {
        let mut builder = ModelBuilder::new();
        builder
            .entity("Blog", |e| {
                e.property("Id", ValueType::Int);
            })
            .entity("Post", |e| {
                e.property("Id", ValueType::Int);
                e.shadow_property("Rank", ValueType::Int);
            });
        builder.has_many("Blog", Some("Posts"), "Post", None);
        let model = builder.build().unwrap();
        let post = model.find_entity_type("Post").unwrap();

        let entry = InternalEntry::new(EntityHandle(1), post);
        assert_eq!(entry.state, EntityState::Detached);
        assert_eq!(entry.shadow.len(), 2);
        assert_eq!(entry.shadow[0], Value::Int(0));
        assert_eq!(entry.shadow[1], Value::Null);
        assert!(!entry.any_modified());
    }

    #[test]
    fn notifications_are_stashed_in_arrival_order() {
        let mut builder = ModelBuilder::new();
        builder.entity("Blog", |e| {
            e.property("Id", ValueType::Int);
        });
        let model = builder.build().unwrap();
        let blog = model.find_entity_type("Blog").unwrap();

        let mut set: ObservableHashSet<EntityHandle> = ObservableHashSet::new();
        let mut entry = InternalEntry::new(EntityHandle(1), blog);
        entry.receivers.push(Some(set.subscribe()));

        set.insert(EntityHandle(2));
        entry.stash_notifications();
        set.insert(EntityHandle(3));

        let changes = entry.take_notifications();
        let added: Vec<_> = changes
            .iter()
            .flat_map(|(_, change)| change.added().to_vec())
            .collect();
        assert_eq!(added, vec![EntityHandle(2), EntityHandle(3)]);
        assert!(entry.take_notifications().is_empty());
    }
}
