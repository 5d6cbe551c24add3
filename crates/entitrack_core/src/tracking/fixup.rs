//! Navigation fixup.
//!
//! Keeps foreign key values, reference navigations, collection navigations
//! and skip navigations of tracked entities consistent with each other.
//! Every change made here goes through the same bookkeeping as a user
//! write, except that collection notifications raised by the tracker's own
//! collection edits are discarded so change detection does not see them a
//! second time.

use super::identity_map::has_null;
use super::{AttachMode, EntityState, StateManager};
use crate::error::TrackResult;
use crate::model::{EntityTypeId, ForeignKeyId, JoinInfo};
use crate::object::EntityHandle;
use crate::value::Value;
use entitrack_observable::ObservableHashSet;
use std::sync::Arc;
use tracing::{debug, trace};

impl StateManager {
    pub(crate) fn reference_slot(&self, handle: EntityHandle, navigation: usize) -> TrackResult<Option<EntityHandle>> {
        Ok(self.objects.get(handle)?.reference(navigation))
    }

    /// Writes a reference navigation and records it as observed.
    pub(crate) fn set_reference_slot(
        &mut self,
        handle: EntityHandle,
        navigation: usize,
        target: Option<EntityHandle>,
    ) -> TrackResult<()> {
        if let Some(slot) = self.objects.get_mut(handle)?.references.get_mut(navigation) {
            *slot = target;
        }
        if let Some(slot) = self
            .entries
            .get_mut(&handle)
            .and_then(|e| e.references.get_mut(navigation))
        {
            *slot = target;
        }
        Ok(())
    }

    pub(crate) fn collection_members(&self, handle: EntityHandle, navigation: usize) -> TrackResult<Vec<EntityHandle>> {
        Ok(self
            .objects
            .get(handle)?
            .collection(navigation)
            .map(ObservableHashSet::to_vec)
            .unwrap_or_default())
    }

    pub(crate) fn collection_contains(
        &self,
        handle: EntityHandle,
        navigation: usize,
        member: EntityHandle,
    ) -> TrackResult<bool> {
        Ok(self
            .objects
            .get(handle)?
            .collection(navigation)
            .is_some_and(|c| c.contains(&member)))
    }

    pub(crate) fn collection_add(&mut self, handle: EntityHandle, navigation: usize, member: EntityHandle) -> TrackResult<bool> {
        self.mutate_collection(handle, navigation, |c| c.insert(member))
    }

    pub(crate) fn collection_remove(
        &mut self,
        handle: EntityHandle,
        navigation: usize,
        member: EntityHandle,
    ) -> TrackResult<bool> {
        self.mutate_collection(handle, navigation, |c| c.remove(&member))
    }

    fn mutate_collection<F>(&mut self, handle: EntityHandle, navigation: usize, mutate: F) -> TrackResult<bool>
    where
        F: FnOnce(&mut ObservableHashSet<EntityHandle>) -> bool,
    {
        if let Some(entry) = self.entries.get_mut(&handle) {
            entry.stash_notifications();
        }
        let changed = match self.objects.get_mut(handle)?.collection_mut(navigation) {
            Some(collection) => mutate(collection),
            None => false,
        };
        if let Some(entry) = self.entries.get_mut(&handle) {
            entry.discard_notifications(navigation);
        }
        Ok(changed)
    }

    pub(crate) fn foreign_key_values(&self, dependent: EntityHandle, fk: ForeignKeyId) -> TrackResult<Vec<Value>> {
        self.read_all(dependent, self.model.foreign_key(fk).properties())
    }

    pub(crate) fn principal_key_values(&self, principal: EntityHandle, fk: ForeignKeyId) -> TrackResult<Vec<Value>> {
        let fk = self.model.foreign_key(fk);
        let principal_type = self.model.entity_type(fk.principal_type());
        self.read_all(principal, principal_type.keys()[fk.principal_key()].properties())
    }

    /// Tracked principal whose key matches the dependent's foreign key.
    pub(crate) fn find_principal(&self, dependent: EntityHandle, fk_id: ForeignKeyId) -> TrackResult<Option<EntityHandle>> {
        let values = self.foreign_key_values(dependent, fk_id)?;
        if has_null(&values) {
            return Ok(None);
        }
        let fk = self.model.foreign_key(fk_id);
        Ok(self
            .identity(fk.principal_type())
            .find_by_key(fk.principal_key(), &values))
    }

    /// Tracked dependents whose foreign key matches the principal's key.
    pub(crate) fn find_dependents(&self, principal: EntityHandle, fk_id: ForeignKeyId) -> TrackResult<Vec<EntityHandle>> {
        let values = self.principal_key_values(principal, fk_id)?;
        if has_null(&values) {
            return Ok(Vec::new());
        }
        let fk = self.model.foreign_key(fk_id);
        Ok(self
            .identity(fk.dependent_type())
            .find_by_foreign_key(fk_id, &values))
    }

    /// Copies the principal key into the dependent's foreign key, or nulls
    /// it when `principal` is `None`.
    ///
    /// With `accept` set, the copied values also become the original values
    /// of an `Unchanged` or `Modified` dependent.
    pub(crate) fn set_foreign_key(
        &mut self,
        dependent: EntityHandle,
        fk_id: ForeignKeyId,
        principal: Option<EntityHandle>,
        accept: bool,
    ) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let fk = model.foreign_key(fk_id);
        let dependent_type = model.entity_type(fk.dependent_type());
        let (values, temporary): (Vec<Value>, Vec<bool>) = match principal {
            Some(principal) => {
                let principal_type = model.entity_type(fk.principal_type());
                let key = principal_type.keys()[fk.principal_key()].properties();
                let entry = self.entry(principal)?;
                let temporary = key.iter().map(|&k| entry.temporary[k]).collect();
                (self.read_all(principal, key)?, temporary)
            }
            None => (
                vec![Value::Null; fk.properties().len()],
                vec![false; fk.properties().len()],
            ),
        };

        let mut changed = false;
        for ((&property, value), temporary) in fk.properties().iter().zip(values).zip(temporary) {
            let prop = dependent_type.property(property);
            if value.is_null() && !prop.is_nullable() {
                continue;
            }
            if prop.key_comparer().equals(&self.read(dependent, property)?, &value) {
                self.entry_mut(dependent)?.temporary[property] = temporary;
                continue;
            }
            self.write_raw(dependent, property, value.clone())?;
            let state = self.state(dependent);
            let entry = self.entry_mut(dependent)?;
            entry.temporary[property] = temporary;
            if accept && matches!(state, EntityState::Unchanged | EntityState::Modified) {
                entry.original[property] = value;
            }
            self.after_write(dependent, property)?;
            changed = true;
        }
        if changed {
            trace!("Set foreign key of {}", self.describe(dependent));
            self.refresh_keys(dependent, false)?;
        }
        Ok(())
    }

    /// Re-registers an entry under its current key values and propagates
    /// the moves. Foreign key moves are propagated only with `fire_fk` set.
    pub(crate) fn refresh_keys(&mut self, handle: EntityHandle, fire_fk: bool) -> TrackResult<()> {
        if !self.is_tracked(handle) {
            return Ok(());
        }
        let type_id = self.type_id(handle)?;
        let projection = self.project_keys(handle)?;
        let rekeyed = match self.identity[type_id.as_usize()].rekey(handle, projection) {
            Ok(rekeyed) => rekeyed,
            Err(key) => return Err(self.conflict_error(handle, key)),
        };
        for (key, old, new) in rekeyed.keys {
            debug!("Key {} of {} changed", key, self.describe(handle));
            self.principal_key_changed(handle, key, old, new)?;
        }
        if fire_fk {
            for (fk, old, new) in rekeyed.foreign_keys {
                self.foreign_key_changed(handle, fk, &old, &new)?;
            }
        }
        Ok(())
    }

    /// Moves dependents of the old key to the new one and connects
    /// dependents that were waiting for the new key.
    fn principal_key_changed(
        &mut self,
        principal: EntityHandle,
        key: usize,
        old: Option<Vec<Value>>,
        new: Vec<Value>,
    ) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type(self.type_id(principal)?);
        for &fk_id in entity_type.referencing_foreign_keys() {
            let fk = model.foreign_key(fk_id);
            if fk.principal_key() != key {
                continue;
            }
            let dependent_type = fk.dependent_type();
            if let Some(old) = old.as_ref().filter(|old| !has_null(old)) {
                for dependent in self.identity(dependent_type).find_by_foreign_key(fk_id, old) {
                    self.set_foreign_key(dependent, fk_id, Some(principal), false)?;
                }
            }
            if has_null(&new) {
                continue;
            }
            for dependent in self.identity(dependent_type).find_by_foreign_key(fk_id, &new) {
                let bound = match fk.dependent_to_principal() {
                    Some(navigation) => self.reference_slot(dependent, navigation)?,
                    None => None,
                };
                if bound.map_or(true, |p| p == principal || !self.is_tracked(p)) {
                    self.connect(principal, fk_id, dependent, false)?;
                }
            }
        }
        Ok(())
    }

    /// Connects a dependent to a principal: navigations on both sides and
    /// the foreign key.
    pub(crate) fn connect(
        &mut self,
        principal: EntityHandle,
        fk_id: ForeignKeyId,
        dependent: EntityHandle,
        accept: bool,
    ) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let fk = model.foreign_key(fk_id);

        let previous = match fk.dependent_to_principal() {
            Some(navigation) => self.reference_slot(dependent, navigation)?,
            None if self.is_tracked(dependent) => self.find_principal(dependent, fk_id)?,
            None => None,
        };
        if let Some(previous) = previous.filter(|&p| p != principal) {
            self.remove_from_principal(previous, fk_id, dependent)?;
        }
        if let Some(navigation) = fk.dependent_to_principal() {
            self.set_reference_slot(dependent, navigation, Some(principal))?;
        }
        self.set_foreign_key(dependent, fk_id, Some(principal), accept)?;

        let mut replaced = Vec::new();
        if let Some(navigation) = fk.principal_to_dependent() {
            if model.navigation(fk.principal_type(), navigation).is_collection() {
                self.collection_add(principal, navigation, dependent)?;
            } else {
                let existing = self.reference_slot(principal, navigation)?;
                self.set_reference_slot(principal, navigation, Some(dependent))?;
                replaced.extend(existing.filter(|&e| e != dependent));
            }
        }
        if fk.is_unique() {
            for other in self.find_dependents(principal, fk_id)? {
                if other != dependent && !replaced.contains(&other) {
                    replaced.push(other);
                }
            }
        }
        for other in replaced {
            self.sever(other, fk_id, principal)?;
        }
        self.orphans.remove(&dependent);
        Ok(())
    }

    /// Removes a dependent from the principal-side navigation.
    pub(crate) fn remove_from_principal(
        &mut self,
        principal: EntityHandle,
        fk_id: ForeignKeyId,
        dependent: EntityHandle,
    ) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let fk = model.foreign_key(fk_id);
        if let Some(navigation) = fk.principal_to_dependent() {
            if model.navigation(fk.principal_type(), navigation).is_collection() {
                self.collection_remove(principal, navigation, dependent)?;
            } else if self.reference_slot(principal, navigation)? == Some(dependent) {
                self.set_reference_slot(principal, navigation, None)?;
            }
        }
        Ok(())
    }

    /// Breaks the link from a dependent to a principal that no longer
    /// refers to it.
    fn sever(&mut self, dependent: EntityHandle, fk_id: ForeignKeyId, principal: EntityHandle) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        if let Some(navigation) = model.foreign_key(fk_id).dependent_to_principal() {
            if self.reference_slot(dependent, navigation)? == Some(principal) {
                self.set_reference_slot(dependent, navigation, None)?;
            }
        }
        if self.is_tracked(dependent) && self.find_principal(dependent, fk_id)? == Some(principal) {
            self.null_or_orphan(dependent, fk_id)?;
        }
        Ok(())
    }

    /// Records a tracked entity's reference to an untracked one, so the
    /// link can be fixed up if the target is tracked later.
    pub(crate) fn record_untracked(&mut self, target: EntityHandle, referrer: EntityHandle, navigation: usize) {
        let referrers = self.referenced_untracked.entry(target).or_default();
        if !referrers.contains(&(referrer, navigation)) {
            referrers.push((referrer, navigation));
        }
    }

    /// Reacts to a reference navigation that now points somewhere else.
    pub(crate) fn reference_changed(
        &mut self,
        handle: EntityHandle,
        navigation: usize,
        old: Option<EntityHandle>,
        new: Option<EntityHandle>,
    ) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let nav = model.navigation(self.type_id(handle)?, navigation);
        let fk_id = nav.foreign_key();
        trace!("Reference {} of {} changed", nav.name(), self.describe(handle));

        if let Some(target) = new {
            self.track_discovered(handle, navigation, target)?;
            if !self.is_tracked(target) {
                self.record_untracked(target, handle, navigation);
            }
        }

        if nav.is_on_dependent() {
            if let Some(old) = old.filter(|&o| Some(o) != new && self.is_tracked(o)) {
                self.remove_from_principal(old, fk_id, handle)?;
            }
            match new {
                Some(principal) if self.is_tracked(principal) => {
                    self.connect(principal, fk_id, handle, false)?;
                }
                Some(_) => {}
                None => {
                    if old.is_some() || self.find_principal(handle, fk_id)?.is_some() {
                        self.null_or_orphan(handle, fk_id)?;
                    }
                }
            }
        } else {
            if let Some(old) = old.filter(|&o| Some(o) != new && self.is_tracked(o)) {
                self.sever(old, fk_id, handle)?;
            }
            if let Some(dependent) = new.filter(|&d| self.is_tracked(d)) {
                self.connect(handle, fk_id, dependent, false)?;
            }
        }
        Ok(())
    }

    /// Reacts to membership changes of a principal-side collection.
    pub(crate) fn collection_changed(
        &mut self,
        principal: EntityHandle,
        navigation: usize,
        added: &[EntityHandle],
        removed: &[EntityHandle],
    ) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let fk_id = model.navigation(self.type_id(principal)?, navigation).foreign_key();
        let fk = model.foreign_key(fk_id);

        for &dependent in removed.iter().filter(|d| !added.contains(d)) {
            if !self.is_tracked(dependent) {
                if let Some(referrers) = self.referenced_untracked.get_mut(&dependent) {
                    referrers.retain(|&r| r != (principal, navigation));
                }
                continue;
            }
            let by_navigation = match fk.dependent_to_principal() {
                Some(d2p) => self.reference_slot(dependent, d2p)? == Some(principal),
                None => false,
            };
            if by_navigation || self.find_principal(dependent, fk_id)? == Some(principal) {
                debug!(
                    "{} was removed from {}",
                    self.describe(dependent),
                    self.describe(principal)
                );
                self.sever(dependent, fk_id, principal)?;
            }
        }

        for &dependent in added {
            self.track_discovered(principal, navigation, dependent)?;
            if self.is_tracked(dependent) {
                self.connect(principal, fk_id, dependent, false)?;
            } else {
                self.record_untracked(dependent, principal, navigation);
            }
        }
        Ok(())
    }

    /// Reacts to membership changes of a skip navigation by maintaining the
    /// inverse collection and the join entries.
    pub(crate) fn skip_collection_changed(
        &mut self,
        handle: EntityHandle,
        navigation: usize,
        added: &[EntityHandle],
        removed: &[EntityHandle],
    ) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let inverse = model.navigation(self.type_id(handle)?, navigation).inverse();

        for &target in removed.iter().filter(|t| !added.contains(t)) {
            if let Some(inverse) = inverse.filter(|_| self.is_tracked(target)) {
                self.collection_remove(target, inverse, handle)?;
            }
            self.remove_join_entry(handle, navigation, target)?;
        }
        for &target in added {
            self.track_discovered(handle, navigation, target)?;
            if !self.is_tracked(target) {
                self.record_untracked(target, handle, navigation);
                continue;
            }
            if let Some(inverse) = inverse {
                self.collection_add(target, inverse, handle)?;
            }
            self.ensure_join_entry(handle, navigation, target, true)?;
        }
        Ok(())
    }

    fn join_info(&self, handle: EntityHandle, navigation: usize) -> TrackResult<Option<JoinInfo>> {
        Ok(self.model.navigation(self.type_id(handle)?, navigation).join())
    }

    /// The join entry linking two entities through a skip navigation.
    pub(crate) fn find_join_entry(
        &self,
        left: EntityHandle,
        navigation: usize,
        right: EntityHandle,
    ) -> TrackResult<Option<EntityHandle>> {
        let Some(join) = self.join_info(left, navigation)? else {
            return Ok(None);
        };
        let right_key = self.principal_key_values(right, join.to_target)?;
        if has_null(&right_key) {
            return Ok(None);
        }
        let comparer = self.model.foreign_key(join.to_target).comparer();
        for candidate in self.find_dependents(left, join.to_declaring)? {
            if comparer.equals(&self.foreign_key_values(candidate, join.to_target)?, &right_key) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Makes sure a live join entry links two entities.
    ///
    /// A deleted join entry is revived. A new one is `Added` when the link
    /// was made at runtime or either side is new, `Unchanged` otherwise.
    pub(crate) fn ensure_join_entry(
        &mut self,
        left: EntityHandle,
        navigation: usize,
        right: EntityHandle,
        runtime: bool,
    ) -> TrackResult<()> {
        let Some(join) = self.join_info(left, navigation)? else {
            return Ok(());
        };
        if let Some(existing) = self.find_join_entry(left, navigation, right)? {
            if self.state(existing) == EntityState::Deleted {
                self.set_state(existing, EntityState::Unchanged)?;
            }
            return Ok(());
        }

        let entry = self.create_instance(join.join_type);
        self.set_foreign_key(entry, join.to_declaring, Some(left), false)?;
        self.set_foreign_key(entry, join.to_target, Some(right), false)?;
        let state = if runtime
            || self.state(left) == EntityState::Added
            || self.state(right) == EntityState::Added
            || !self.is_key_set(entry)?
        {
            EntityState::Added
        } else {
            EntityState::Unchanged
        };
        debug!(
            "Created join entry {} linking {} and {}",
            entry,
            self.describe(left),
            self.describe(right)
        );
        self.set_state(entry, state)
    }

    /// Removes the join entry linking two entities, if any.
    pub(crate) fn remove_join_entry(&mut self, left: EntityHandle, navigation: usize, right: EntityHandle) -> TrackResult<()> {
        if let Some(entry) = self.find_join_entry(left, navigation, right)? {
            match self.state(entry) {
                EntityState::Added => self.set_state(entry, EntityState::Detached)?,
                EntityState::Unchanged | EntityState::Modified => {
                    self.set_state(entry, EntityState::Deleted)?;
                }
                EntityState::Deleted | EntityState::Detached => {}
            }
        }
        Ok(())
    }

    /// Skip navigations that go through a join entity type, with their
    /// declaring types.
    fn skip_navigations_through(&self, join_type: EntityTypeId) -> Vec<(EntityTypeId, usize, JoinInfo)> {
        self.model
            .entity_types()
            .iter()
            .flat_map(|et| et.navigations())
            .filter_map(|n| {
                n.join()
                    .filter(|j| j.join_type == join_type)
                    .map(|j| (n.declaring_type(), n.index(), j))
            })
            .collect()
    }

    /// Reacts to a foreign key whose value changed.
    pub(crate) fn foreign_key_changed(
        &mut self,
        dependent: EntityHandle,
        fk_id: ForeignKeyId,
        old: &[Value],
        new: &[Value],
    ) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let fk = model.foreign_key(fk_id);
        let principals = self.identity(fk.principal_type());
        let old_principal = principals.find_by_key(fk.principal_key(), old);
        let new_principal = principals.find_by_key(fk.principal_key(), new);

        if let Some(old_principal) = old_principal.filter(|&p| Some(p) != new_principal) {
            self.remove_from_principal(old_principal, fk_id, dependent)?;
            if let Some(navigation) = fk.dependent_to_principal() {
                if self.reference_slot(dependent, navigation)? == Some(old_principal) {
                    self.set_reference_slot(dependent, navigation, None)?;
                }
            }
        }
        match new_principal {
            Some(principal) => self.connect(principal, fk_id, dependent, false)?,
            None => {
                if let Some(navigation) = fk.dependent_to_principal() {
                    let current = self.reference_slot(dependent, navigation)?;
                    if current.is_some_and(|p| self.is_tracked(p)) {
                        self.set_reference_slot(dependent, navigation, None)?;
                    }
                }
            }
        }
        self.join_foreign_key_changed(dependent, fk_id, old_principal, new_principal)
    }

    /// Moves skip navigation membership when a join entry's foreign key
    /// points at a different entity.
    fn join_foreign_key_changed(
        &mut self,
        join_entry: EntityHandle,
        fk_id: ForeignKeyId,
        old: Option<EntityHandle>,
        new: Option<EntityHandle>,
    ) -> TrackResult<()> {
        if old == new {
            return Ok(());
        }
        let model = Arc::clone(&self.model);
        let join_type = self.type_id(join_entry)?;
        for (declaring, navigation, join) in self.skip_navigations_through(join_type) {
            if join.to_declaring != fk_id {
                continue;
            }
            let Some(other) = self.find_principal(join_entry, join.to_target)? else {
                continue;
            };
            let inverse = model.navigation(declaring, navigation).inverse();
            if let Some(old) = old.filter(|&o| self.is_tracked(o)) {
                self.collection_remove(old, navigation, other)?;
                if let Some(inverse) = inverse {
                    self.collection_remove(other, inverse, old)?;
                }
            }
            if let Some(new) = new.filter(|&n| self.is_tracked(n)) {
                self.collection_add(new, navigation, other)?;
                if let Some(inverse) = inverse {
                    self.collection_add(other, inverse, new)?;
                }
            }
        }
        Ok(())
    }

    /// Connects a newly tracked entry to everything already tracked.
    pub(crate) fn initial_fixup(&mut self, handle: EntityHandle) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type(self.type_id(handle)?);

        // As a dependent: the navigation wins over the foreign key value.
        for &fk_id in entity_type.declared_foreign_keys() {
            let fk = model.foreign_key(fk_id);
            let by_navigation = match fk.dependent_to_principal() {
                Some(navigation) => self.reference_slot(handle, navigation)?,
                None => None,
            };
            let accept = self.state(handle) == EntityState::Unchanged;
            match by_navigation {
                Some(principal) if self.is_tracked(principal) => {
                    self.connect(principal, fk_id, handle, accept)?;
                }
                Some(principal) => {
                    if let Some(navigation) = fk.dependent_to_principal() {
                        self.record_untracked(principal, handle, navigation);
                    }
                }
                None => {
                    if let Some(principal) = self.find_principal(handle, fk_id)? {
                        self.connect(principal, fk_id, handle, accept)?;
                    }
                }
            }
        }

        // As a principal.
        for &fk_id in entity_type.referencing_foreign_keys() {
            let fk = model.foreign_key(fk_id);
            let mut seen = Vec::new();
            if let Some(navigation) = fk.principal_to_dependent() {
                let members = if entity_type.navigation(navigation).is_collection() {
                    self.collection_members(handle, navigation)?
                } else {
                    self.reference_slot(handle, navigation)?.into_iter().collect()
                };
                for dependent in members {
                    seen.push(dependent);
                    if self.is_tracked(dependent) {
                        let accept = self.state(dependent) == EntityState::Unchanged;
                        self.connect(handle, fk_id, dependent, accept)?;
                    } else {
                        self.record_untracked(dependent, handle, navigation);
                    }
                }
            }
            for dependent in self.find_dependents(handle, fk_id)? {
                if seen.contains(&dependent) {
                    continue;
                }
                let bound_elsewhere = match fk.dependent_to_principal() {
                    Some(navigation) => self
                        .reference_slot(dependent, navigation)?
                        .is_some_and(|p| p != handle && self.is_tracked(p)),
                    None => false,
                };
                if !bound_elsewhere {
                    let accept = self.state(dependent) == EntityState::Unchanged;
                    self.connect(handle, fk_id, dependent, accept)?;
                }
            }
        }

        // Skip navigations, from both the collection contents and existing
        // join entries.
        for navigation in entity_type.navigations().iter().filter(|n| n.is_skip()) {
            let Some(join) = navigation.join() else {
                continue;
            };
            for target in self.collection_members(handle, navigation.index())? {
                if !self.is_tracked(target) {
                    self.record_untracked(target, handle, navigation.index());
                    continue;
                }
                if let Some(inverse) = navigation.inverse() {
                    self.collection_add(target, inverse, handle)?;
                }
                self.ensure_join_entry(handle, navigation.index(), target, false)?;
            }
            for join_entry in self.find_dependents(handle, join.to_declaring)? {
                if self.state(join_entry) == EntityState::Deleted {
                    continue;
                }
                if let Some(target) = self.find_principal(join_entry, join.to_target)? {
                    self.collection_add(handle, navigation.index(), target)?;
                    if let Some(inverse) = navigation.inverse() {
                        self.collection_add(target, inverse, handle)?;
                    }
                }
            }
        }

        // Tracked entities that referenced this one while it was untracked.
        if let Some(referrers) = self.referenced_untracked.remove(&handle) {
            for (referrer, navigation) in referrers {
                if !self.is_tracked(referrer) || !self.is_tracked(handle) {
                    continue;
                }
                let nav = model.navigation(self.type_id(referrer)?, navigation);
                let still_referenced = if nav.is_collection() {
                    self.collection_contains(referrer, navigation, handle)?
                } else {
                    self.reference_slot(referrer, navigation)? == Some(handle)
                };
                if !still_referenced {
                    continue;
                }
                if nav.is_skip() {
                    if let Some(inverse) = nav.inverse() {
                        self.collection_add(handle, inverse, referrer)?;
                    }
                    self.ensure_join_entry(referrer, navigation, handle, false)?;
                } else if nav.is_on_dependent() {
                    let accept = self.state(referrer) == EntityState::Unchanged;
                    self.connect(handle, nav.foreign_key(), referrer, accept)?;
                } else {
                    let accept = self.state(handle) == EntityState::Unchanged;
                    self.connect(referrer, nav.foreign_key(), handle, accept)?;
                }
            }
        }

        // As a join entry: link the two endpoints.
        if self.state(handle) != EntityState::Deleted {
            for (_, navigation, join) in self.skip_navigations_through(entity_type.id()) {
                let left = self.find_principal(handle, join.to_declaring)?;
                let right = self.find_principal(handle, join.to_target)?;
                if let (Some(left), Some(right)) = (left, right) {
                    self.collection_add(left, navigation, right)?;
                }
            }
        }
        Ok(())
    }

    /// Unlinks an entry that is leaving the tracker after deletion.
    pub(crate) fn delete_fixup(&mut self, handle: EntityHandle) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type(self.type_id(handle)?);

        for &fk_id in entity_type.declared_foreign_keys() {
            let fk = model.foreign_key(fk_id);
            let by_navigation = match fk.dependent_to_principal() {
                Some(navigation) => self.reference_slot(handle, navigation)?,
                None => None,
            };
            let principal = match by_navigation {
                Some(principal) => Some(principal),
                None => self.find_principal(handle, fk_id)?,
            };
            if let Some(principal) = principal.filter(|&p| self.is_tracked(p)) {
                self.remove_from_principal(principal, fk_id, handle)?;
            }
        }

        for &fk_id in entity_type.referencing_foreign_keys() {
            let fk = model.foreign_key(fk_id);
            let Some(d2p) = fk.dependent_to_principal() else {
                continue;
            };
            let mut dependents = self.find_dependents(handle, fk_id)?;
            if let Some(navigation) = fk.principal_to_dependent() {
                if entity_type.navigation(navigation).is_collection() {
                    dependents.extend(self.collection_members(handle, navigation)?);
                } else {
                    dependents.extend(self.reference_slot(handle, navigation)?);
                }
            }
            for dependent in dependents {
                if self.reference_slot(dependent, d2p)? == Some(handle) {
                    self.set_reference_slot(dependent, d2p, None)?;
                }
            }
        }

        for navigation in entity_type.navigations().iter().filter(|n| n.is_skip()) {
            let Some(inverse) = navigation.inverse() else {
                continue;
            };
            for target in self.collection_members(handle, navigation.index())? {
                if self.is_tracked(target) {
                    self.collection_remove(target, inverse, handle)?;
                }
            }
        }

        for (_, navigation, join) in self.skip_navigations_through(entity_type.id()) {
            let left = self.find_principal(handle, join.to_declaring)?;
            let right = self.find_principal(handle, join.to_target)?;
            if let (Some(left), Some(right)) = (left, right) {
                self.collection_remove(left, navigation, right)?;
            }
        }
        Ok(())
    }

    /// Brings an untracked entity found behind a tracked one's navigation
    /// into the tracker, as the discovery policy decides.
    pub(crate) fn track_discovered(&mut self, referrer: EntityHandle, navigation: usize, target: EntityHandle) -> TrackResult<()> {
        self.entry(target)?;
        if self.is_tracked(target) || !self.is_tracked(referrer) {
            return Ok(());
        }
        self.attach_graph(target, AttachMode::Discover, Some((referrer, navigation)))
    }
}

impl StateManager {
    /// Entries on the other side of a navigation whose state or foreign key
    /// reflects a change to it, with the foreign key they hold.
    fn navigation_related(&self, handle: EntityHandle, navigation: usize) -> TrackResult<Vec<(EntityHandle, ForeignKeyId)>> {
        let nav = self.model.navigation(self.type_id(handle)?, navigation);
        if let Some(join) = nav.join() {
            return Ok(self
                .find_dependents(handle, join.to_declaring)?
                .into_iter()
                .map(|j| (j, join.to_declaring))
                .collect());
        }
        if nav.is_on_dependent() {
            return Ok(vec![(handle, nav.foreign_key())]);
        }
        let members = if nav.is_collection() {
            self.collection_members(handle, navigation)?
        } else {
            self.reference_slot(handle, navigation)?.into_iter().collect()
        };
        Ok(members
            .into_iter()
            .filter(|&m| self.is_tracked(m))
            .map(|m| (m, nav.foreign_key()))
            .collect())
    }

    pub(crate) fn is_navigation_modified(&self, handle: EntityHandle, navigation: usize) -> TrackResult<bool> {
        let on_dependent = self
            .model
            .navigation(self.type_id(handle)?, navigation)
            .is_on_dependent();
        for (related, fk_id) in self.navigation_related(handle, navigation)? {
            if !on_dependent && matches!(self.state(related), EntityState::Added | EntityState::Deleted) {
                return Ok(true);
            }
            for &property in self.model.foreign_key(fk_id).properties() {
                if self.is_property_modified(related, property)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Marks the foreign key properties behind a navigation as modified or
    /// not. Key properties and entries that are not `Unchanged` or
    /// `Modified` are left alone.
    pub(crate) fn set_navigation_modified(&mut self, handle: EntityHandle, navigation: usize, modified: bool) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        for (related, fk_id) in self.navigation_related(handle, navigation)? {
            if !matches!(self.state(related), EntityState::Unchanged | EntityState::Modified) {
                continue;
            }
            let fk = model.foreign_key(fk_id);
            let dependent_type = model.entity_type(fk.dependent_type());
            for &property in fk.properties() {
                if !dependent_type.property(property).is_key() {
                    self.set_property_modified(related, property, modified)?;
                }
            }
        }
        Ok(())
    }
}
