//! Graph traversal.
//!
//! Traversal is depth first over every reference, collection and skip
//! navigation, in navigation declaration order and then collection
//! insertion order. It uses an explicit stack so deep graphs cannot
//! overflow.

use super::{EntityState, StateManager};
use crate::entry::EntityEntry;
use crate::error::{TrackError, TrackResult};
use crate::model::{EntityTypeId, Navigation};
use crate::object::EntityHandle;
use crate::tracker::DiscoveredEntity;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// How an attach operation decides the state of untracked entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttachMode {
    /// Everything becomes `Added`.
    Add,
    /// Entities with a key set become `Unchanged`, others `Added`.
    Attach,
    /// Entities with a key set become `Modified`, others `Added`.
    Update,
    /// The discovery policy decides.
    Discover,
}

/// Edge a node was reached through: source entity and navigation index on
/// the source's type.
type Inbound = Option<(EntityHandle, usize)>;

impl StateManager {
    /// Tracks the graph reachable from `root`.
    ///
    /// A root that is already tracked only changes state; its graph is not
    /// traversed. Traversal stops at tracked entities and at entities that
    /// stay detached.
    pub(crate) fn attach_graph(&mut self, root: EntityHandle, mode: AttachMode, source: Inbound) -> TrackResult<()> {
        if self.entry(root)?.state.is_tracked() {
            let state = match mode {
                AttachMode::Add => EntityState::Added,
                AttachMode::Attach => EntityState::Unchanged,
                AttachMode::Update => EntityState::Modified,
                AttachMode::Discover => return Ok(()),
            };
            return self.set_state(root, state);
        }

        let mut visited = HashSet::new();
        let mut stack = vec![(root, source)];
        while let Some((handle, inbound)) = stack.pop() {
            if !visited.insert(handle) || self.is_tracked(handle) {
                continue;
            }
            if let Some((source, navigation)) = inbound {
                self.propagate_key(source, navigation, handle)?;
            }
            let state = self.attach_state(handle, mode, inbound)?;
            if state == EntityState::Detached {
                trace!("Left {} detached", self.describe(handle));
                continue;
            }
            self.set_state(handle, state)?;
            if !self.is_tracked(handle) {
                continue;
            }
            for (child, navigation) in self.children(handle)?.into_iter().rev() {
                if !visited.contains(&child) {
                    stack.push((child, Some((handle, navigation))));
                }
            }
        }
        Ok(())
    }

    fn attach_state(&self, handle: EntityHandle, mode: AttachMode, inbound: Inbound) -> TrackResult<EntityState> {
        let key_set = self.is_key_set(handle)?;
        Ok(match mode {
            AttachMode::Add => EntityState::Added,
            AttachMode::Attach if key_set => EntityState::Unchanged,
            AttachMode::Update if key_set => EntityState::Modified,
            AttachMode::Attach | AttachMode::Update => EntityState::Added,
            AttachMode::Discover => match inbound {
                Some((source, navigation)) => {
                    let discovered = DiscoveredEntity {
                        entity_type: self.model.entity_type(self.type_id(handle)?),
                        key_set,
                        key_generated: self.is_key_generated(handle)?,
                        referrer_state: self.state(source),
                        navigation: self.model.navigation(self.type_id(source)?, navigation),
                    };
                    self.discovery.discovered_state(&discovered)
                }
                None => EntityState::Added,
            },
        })
    }

    /// Copies a principal's key into sentinel foreign key values that are
    /// part of the dependent's primary key, so identifying dependents reached
    /// from their principal have a key before their state is decided.
    fn propagate_key(&mut self, source: EntityHandle, navigation: usize, target: EntityHandle) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let nav = model.navigation(self.type_id(source)?, navigation);
        if nav.is_on_dependent() || nav.is_skip() {
            return Ok(());
        }
        let fk = model.foreign_key(nav.foreign_key());
        let dependent_type = model.entity_type(fk.dependent_type());
        let principal_type = model.entity_type(fk.principal_type());
        let key = principal_type.keys()[fk.principal_key()].properties();
        for (&property, &key_property) in fk.properties().iter().zip(key) {
            if !dependent_type.property(property).is_primary_key() || !self.read(target, property)?.is_sentinel() {
                continue;
            }
            let value = self.read(source, key_property)?;
            let temporary = self.entry(source)?.temporary[key_property];
            self.write_raw(target, property, value)?;
            self.entry_mut(target)?.temporary[property] = temporary;
        }
        Ok(())
    }

    /// Entities directly reachable from `handle`, with the navigation used.
    fn children(&self, handle: EntityHandle) -> TrackResult<Vec<(EntityHandle, usize)>> {
        let entity_type = self.model.entity_type(self.type_id(handle)?);
        let mut children = Vec::new();
        for navigation in entity_type.navigations() {
            let targets = if navigation.is_collection() {
                self.collection_members(handle, navigation.index())?
            } else {
                self.reference_slot(handle, navigation.index())?.into_iter().collect()
            };
            for target in targets {
                if self.type_id(target)? != navigation.target_type() {
                    return Err(TrackError::invalid_operation(format!(
                        "the navigation '{}.{}' holds {}, which is not a '{}'",
                        entity_type.name(),
                        navigation.name(),
                        self.describe(target),
                        self.model.entity_type(navigation.target_type()).name()
                    )));
                }
                children.push((target, navigation.index()));
            }
        }
        Ok(children)
    }

    fn node_parts(&self, handle: EntityHandle, inbound: Inbound) -> TrackResult<(EntityTypeId, Option<Edge>)> {
        let edge = match inbound {
            Some((source, navigation)) => Some(Edge {
                source,
                source_type: self.type_id(source)?,
                navigation,
            }),
            None => None,
        };
        Ok((self.type_id(handle)?, edge))
    }

    /// Visits every untracked entity reachable from `root` once, calling
    /// `callback` for each. Traversal continues past a node only if the
    /// callback left it tracked. A tracked root is not visited.
    pub(crate) fn track_graph<F>(&mut self, root: EntityHandle, mut callback: F) -> TrackResult<()>
    where
        F: FnMut(&mut GraphNode<'_, ()>) -> TrackResult<()>,
    {
        self.entry(root)?;
        let mut visited = HashSet::new();
        let mut stack: Vec<(EntityHandle, Inbound)> = vec![(root, None)];
        while let Some((handle, inbound)) = stack.pop() {
            if !visited.insert(handle) || self.is_tracked(handle) {
                continue;
            }
            let (entity_type, edge) = self.node_parts(handle, inbound)?;
            let mut unit = ();
            let mut node = GraphNode {
                sm: &mut *self,
                handle,
                entity_type,
                edge,
                state: &mut unit,
            };
            callback(&mut node)?;
            if !self.is_tracked(handle) {
                continue;
            }
            for (child, navigation) in self.children(handle)?.into_iter().rev() {
                if !visited.contains(&child) {
                    stack.push((child, Some((handle, navigation))));
                }
            }
        }
        Ok(())
    }

    /// Visits entities reachable from `root`, threading user state through
    /// the walk. Children are visited only when the callback returns true;
    /// there is no visited set, so the callback must stop at cycles.
    pub(crate) fn track_graph_with_state<S, F>(&mut self, root: EntityHandle, state: S, mut callback: F) -> TrackResult<S>
    where
        F: FnMut(&mut GraphNode<'_, S>) -> TrackResult<bool>,
    {
        self.entry(root)?;
        let mut state = state;
        let mut stack: Vec<(EntityHandle, Inbound)> = vec![(root, None)];
        while let Some((handle, inbound)) = stack.pop() {
            let (entity_type, edge) = self.node_parts(handle, inbound)?;
            let mut node = GraphNode {
                sm: &mut *self,
                handle,
                entity_type,
                edge,
                state: &mut state,
            };
            if !callback(&mut node)? {
                continue;
            }
            for (child, navigation) in self.children(handle)?.into_iter().rev() {
                stack.push((child, Some((handle, navigation))));
            }
        }
        Ok(state)
    }
}

/// How a traversal node was reached.
#[derive(Debug, Clone, Copy)]
struct Edge {
    source: EntityHandle,
    source_type: EntityTypeId,
    navigation: usize,
}

/// One node of a graph traversal.
///
/// Gives the callback the node's entry, the entry it was reached from and
/// the navigation it was reached through.
pub struct GraphNode<'a, S> {
    sm: &'a mut StateManager,
    handle: EntityHandle,
    entity_type: EntityTypeId,
    edge: Option<Edge>,
    state: &'a mut S,
}

impl<S> GraphNode<'_, S> {
    /// Handle of the entity being visited.
    #[must_use]
    pub fn handle(&self) -> EntityHandle {
        self.handle
    }

    /// Handle of the entity this node was reached from; `None` at the root.
    #[must_use]
    pub fn source(&self) -> Option<EntityHandle> {
        self.edge.map(|e| e.source)
    }

    /// Entry of the entity being visited.
    pub fn entry(&mut self) -> EntityEntry<'_> {
        EntityEntry::new(self.sm, self.handle, self.entity_type)
    }

    /// Entry of the entity this node was reached from.
    pub fn source_entry(&mut self) -> Option<EntityEntry<'_>> {
        let edge = self.edge?;
        Some(EntityEntry::new(self.sm, edge.source, edge.source_type))
    }

    /// Navigation this node was reached through; `None` at the root.
    #[must_use]
    pub fn inbound_navigation(&self) -> Option<&Navigation> {
        self.edge
            .map(|e| self.sm.model.navigation(e.source_type, e.navigation))
    }

    /// State threaded through the traversal.
    #[must_use]
    pub fn node_state(&self) -> &S {
        self.state
    }

    /// State threaded through the traversal, mutably.
    pub fn node_state_mut(&mut self) -> &mut S {
        self.state
    }
}

impl<S> fmt::Debug for GraphNode<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphNode")
            .field("handle", &self.handle)
            .field("source", &self.source())
            .finish_non_exhaustive()
    }
}
