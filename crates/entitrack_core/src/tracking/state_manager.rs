//! Entry state machine, property writes, change detection and saving.

use super::entry::InternalEntry;
use super::identity_map::{IdentityMap, KeyProjection};
use super::EntityState;
use crate::config::{CascadeTiming, TrackingConfig};
use crate::error::{TrackError, TrackResult};
use crate::model::{DeleteBehavior, EntityType, EntityTypeId, ForeignKeyId, Model, Property};
use crate::object::{check_assignable, EntityHandle, ObjectSpace};
use crate::persist::{ChangeBatch, GeneratedValues, PendingChange, PersistenceSink};
use crate::tracker::{DefaultDiscoveryPolicy, DiscoveryPolicy};
use crate::value::Value;
use crate::valuegen::ValueGeneratorSelector;
use entitrack_observable::SetChange;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Everything one tracking scope knows about its entities.
#[derive(Debug)]
pub(crate) struct StateManager {
    pub(crate) model: Arc<Model>,
    pub(crate) config: TrackingConfig,
    pub(crate) objects: ObjectSpace,
    pub(crate) entries: BTreeMap<EntityHandle, InternalEntry>,
    /// One map per entity type, indexed by type id.
    pub(crate) identity: Vec<IdentityMap>,
    /// Untracked entities referenced from tracked ones, with the referring
    /// entry and navigation.
    pub(crate) referenced_untracked: HashMap<EntityHandle, Vec<(EntityHandle, usize)>>,
    /// Dependents severed from a required principal, awaiting deletion.
    pub(crate) orphans: BTreeSet<EntityHandle>,
    pub(crate) generators: ValueGeneratorSelector,
    pub(crate) discovery: Box<dyn DiscoveryPolicy>,
}

impl StateManager {
    pub(crate) fn new(model: Arc<Model>, config: TrackingConfig) -> Self {
        let identity = model
            .entity_types()
            .iter()
            .map(|et| IdentityMap::new(&model, et))
            .collect();
        Self {
            model,
            config,
            objects: ObjectSpace::new(),
            entries: BTreeMap::new(),
            identity,
            referenced_untracked: HashMap::new(),
            orphans: BTreeSet::new(),
            generators: ValueGeneratorSelector::new(),
            discovery: Box::new(DefaultDiscoveryPolicy),
        }
    }

    pub(crate) fn create(&mut self, entity_type: &str) -> TrackResult<EntityHandle> {
        let id = self.model.entity_type_by_name(entity_type)?.id();
        Ok(self.create_instance(id))
    }

    pub(crate) fn create_instance(&mut self, entity_type: EntityTypeId) -> EntityHandle {
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type(entity_type);
        let handle = self.objects.create(entity_type);
        self.entries
            .insert(handle, InternalEntry::new(handle, entity_type));
        trace!("Created {} instance {}", entity_type.name(), handle);
        handle
    }

    pub(crate) fn entry(&self, handle: EntityHandle) -> TrackResult<&InternalEntry> {
        self.entries
            .get(&handle)
            .ok_or(TrackError::UnknownEntity { handle })
    }

    pub(crate) fn entry_mut(&mut self, handle: EntityHandle) -> TrackResult<&mut InternalEntry> {
        self.entries
            .get_mut(&handle)
            .ok_or(TrackError::UnknownEntity { handle })
    }

    pub(crate) fn type_id(&self, handle: EntityHandle) -> TrackResult<EntityTypeId> {
        Ok(self.entry(handle)?.entity_type)
    }

    /// State of an instance; unknown handles read as `Detached`.
    pub(crate) fn state(&self, handle: EntityHandle) -> EntityState {
        self.entries
            .get(&handle)
            .map_or(EntityState::Detached, |e| e.state)
    }

    pub(crate) fn is_tracked(&self, handle: EntityHandle) -> bool {
        self.state(handle).is_tracked()
    }

    pub(crate) fn identity(&self, entity_type: EntityTypeId) -> &IdentityMap {
        &self.identity[entity_type.as_usize()]
    }

    /// Tracked handles in handle order.
    pub(crate) fn tracked_handles(&self) -> Vec<EntityHandle> {
        self.entries
            .values()
            .filter(|e| e.state.is_tracked())
            .map(|e| e.handle)
            .collect()
    }

    pub(crate) fn read(&self, handle: EntityHandle, property: usize) -> TrackResult<Value> {
        let entry = self.entry(handle)?;
        let object = self.objects.get(handle)?;
        let property = self.model.entity_type(entry.entity_type).property(property);
        Ok(property.accessor().read(object, &entry.shadow))
    }

    pub(crate) fn read_all(&self, handle: EntityHandle, properties: &[usize]) -> TrackResult<Vec<Value>> {
        properties.iter().map(|&p| self.read(handle, p)).collect()
    }

    pub(crate) fn current_values(&self, handle: EntityHandle) -> TrackResult<Vec<Value>> {
        let count = self.model.entity_type(self.type_id(handle)?).properties().len();
        (0..count).map(|p| self.read(handle, p)).collect()
    }

    /// Stores a value without any bookkeeping.
    pub(crate) fn write_raw(&mut self, handle: EntityHandle, property: usize, value: Value) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let entry = self
            .entries
            .get_mut(&handle)
            .ok_or(TrackError::UnknownEntity { handle })?;
        let object = self.objects.get_mut(handle)?;
        model
            .entity_type(entry.entity_type)
            .property(property)
            .accessor()
            .write(object, &mut entry.shadow, value);
        Ok(())
    }

    /// Stores a value and updates the snapshot and modified flag.
    pub(crate) fn write_internal(&mut self, handle: EntityHandle, property: usize, value: Value) -> TrackResult<()> {
        self.write_raw(handle, property, value)?;
        self.after_write(handle, property)
    }

    /// Brings the snapshot and modified flag in line with the current value.
    pub(crate) fn after_write(&mut self, handle: EntityHandle, property: usize) -> TrackResult<()> {
        let value = self.read(handle, property)?;
        let model = Arc::clone(&self.model);
        let entry = self.entry_mut(handle)?;
        let prop = model.entity_type(entry.entity_type).property(property);
        entry.snapshot[property] = value.clone();
        if !matches!(entry.state, EntityState::Unchanged | EntityState::Modified) || prop.is_key() {
            return Ok(());
        }
        entry.modified[property] = !prop.comparer().equals(&entry.original[property], &value);
        entry.state = match (entry.state, entry.any_modified()) {
            (EntityState::Unchanged, true) => EntityState::Modified,
            (EntityState::Modified, false) => EntityState::Unchanged,
            (state, _) => state,
        };
        Ok(())
    }

    /// Returns true unless a primary key value is missing or temporary.
    pub(crate) fn is_key_set(&self, handle: EntityHandle) -> TrackResult<bool> {
        let entry = self.entry(handle)?;
        let entity_type = self.model.entity_type(entry.entity_type);
        for &p in entity_type.primary_key().properties() {
            let property = entity_type.property(p);
            let value = self.read(handle, p)?;
            let generated = property.value_generated_on_add() || property.is_foreign_key();
            if entry.temporary[p] || value.is_null() || (value.is_sentinel() && generated) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(crate) fn is_key_generated(&self, handle: EntityHandle) -> TrackResult<bool> {
        let entity_type = self.model.entity_type(self.type_id(handle)?);
        Ok(entity_type
            .primary_key()
            .properties()
            .iter()
            .any(|&p| entity_type.property(p).value_generated_on_add()))
    }

    /// Entity type and handle, plus the primary key when sensitive data
    /// logging is enabled.
    pub(crate) fn describe(&self, handle: EntityHandle) -> String {
        let Some(entry) = self.entries.get(&handle) else {
            return handle.to_string();
        };
        let entity_type = self.model.entity_type(entry.entity_type);
        if !self.config.sensitive_data_logging {
            return format!("{} {}", entity_type.name(), handle);
        }
        let key: Vec<String> = entity_type
            .primary_key()
            .properties()
            .iter()
            .map(|&p| {
                let value = self.read(handle, p).unwrap_or(Value::Null);
                format!("{}: {}", entity_type.property(p).name(), value)
            })
            .collect();
        format!("{} {} {{{}}}", entity_type.name(), handle, key.join(", "))
    }

    pub(crate) fn project_keys(&self, handle: EntityHandle) -> TrackResult<KeyProjection> {
        let entity_type = self.model.entity_type(self.type_id(handle)?);
        let keys = entity_type
            .keys()
            .iter()
            .map(|k| self.read_all(handle, k.properties()))
            .collect::<TrackResult<_>>()?;
        let foreign_keys = entity_type
            .declared_foreign_keys()
            .iter()
            .map(|&fk| self.read_all(handle, self.model.foreign_key(fk).properties()))
            .collect::<TrackResult<_>>()?;
        Ok(KeyProjection { keys, foreign_keys })
    }

    pub(crate) fn conflict_error(&self, handle: EntityHandle, key: usize) -> TrackError {
        let Some(entry) = self.entries.get(&handle) else {
            return TrackError::UnknownEntity { handle };
        };
        let entity_type = self.model.entity_type(entry.entity_type);
        let properties = entity_type.keys()[key].properties();
        let key_values = self.config.sensitive_data_logging.then(|| {
            properties
                .iter()
                .map(|&p| self.read(handle, p).map(|v| v.to_string()).unwrap_or_default())
                .collect()
        });
        TrackError::IdentityConflict {
            entity_type: entity_type.name().to_string(),
            key_properties: properties
                .iter()
                .map(|&p| entity_type.property(p).name().to_string())
                .collect(),
            key_values,
        }
    }

    /// Moves an entry to a new state, running the fixup and cascades the
    /// transition implies.
    pub(crate) fn set_state(&mut self, handle: EntityHandle, new_state: EntityState) -> TrackResult<()> {
        let old_state = self.entry(handle)?.state;
        if old_state == new_state {
            return Ok(());
        }
        debug!(
            "{} changed state from {} to {}",
            self.describe(handle),
            old_state,
            new_state
        );

        match (old_state, new_state) {
            (EntityState::Detached, _) => self.start_tracking(handle, new_state),
            (_, EntityState::Detached) => {
                if old_state != EntityState::Deleted
                    && self.config.cascade_delete_timing == CascadeTiming::Immediate
                {
                    self.cascade_delete(handle, true)?;
                }
                if old_state == EntityState::Deleted {
                    self.delete_fixup(handle)?;
                }
                self.stop_tracking(handle)
            }
            (EntityState::Added, EntityState::Deleted) => {
                self.entry_mut(handle)?.state = EntityState::Deleted;
                if self.config.cascade_delete_timing == CascadeTiming::Immediate {
                    self.cascade_delete(handle, false)?;
                }
                self.delete_fixup(handle)?;
                self.stop_tracking(handle)
            }
            (_, EntityState::Added) => {
                self.entry_mut(handle)?.state = EntityState::Added;
                self.generate_values(handle)?;
                self.entry_mut(handle)?.clear_modified();
                self.refresh_keys(handle, false)
            }
            (_, EntityState::Unchanged) => {
                self.check_temporary(handle, new_state)?;
                self.accept_values(handle)?;
                self.entry_mut(handle)?.state = EntityState::Unchanged;
                Ok(())
            }
            (_, EntityState::Modified) => {
                if old_state == EntityState::Added {
                    self.check_temporary(handle, new_state)?;
                    self.accept_values(handle)?;
                }
                self.entry_mut(handle)?.state = EntityState::Modified;
                self.mark_all_modified(handle)
            }
            (_, EntityState::Deleted) => {
                self.entry_mut(handle)?.state = EntityState::Deleted;
                if self.config.cascade_delete_timing == CascadeTiming::Immediate {
                    self.cascade_delete(handle, false)?;
                }
                Ok(())
            }
        }
    }

    fn start_tracking(&mut self, handle: EntityHandle, state: EntityState) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type(self.type_id(handle)?);

        if state == EntityState::Added {
            self.generate_values(handle)?;
        }
        for &p in entity_type.primary_key().properties() {
            if self.read(handle, p)?.is_null() {
                return Err(TrackError::NullKeyValue {
                    entity_type: entity_type.name().to_string(),
                    property: entity_type.property(p).name().to_string(),
                });
            }
        }
        if state != EntityState::Added {
            self.check_temporary(handle, state)?;
        }

        let projection = self.project_keys(handle)?;
        if let Err(key) = self.identity[entity_type.id().as_usize()].add(handle, projection) {
            return Err(self.conflict_error(handle, key));
        }

        let current = self.current_values(handle)?;
        let object = self.objects.get_mut(handle)?;
        let references = object.references.clone();
        let receivers: Vec<_> = object
            .collections
            .iter_mut()
            .map(|c| c.as_mut().map(|set| set.subscribe()))
            .collect();
        let entry = self.entry_mut(handle)?;
        entry.state = state;
        entry.original = current.clone();
        entry.snapshot = current;
        entry.references = references;
        entry.receivers = receivers;
        entry.pending.clear();
        entry.clear_modified();
        if state == EntityState::Modified {
            self.mark_all_modified(handle)?;
        }
        trace!("Started tracking {}", self.describe(handle));

        self.initial_fixup(handle)?;
        if state == EntityState::Deleted
            && self.is_tracked(handle)
            && self.config.cascade_delete_timing == CascadeTiming::Immediate
        {
            self.cascade_delete(handle, false)?;
        }
        Ok(())
    }

    fn stop_tracking(&mut self, handle: EntityHandle) -> TrackResult<()> {
        let type_id = self.type_id(handle)?;
        self.identity[type_id.as_usize()].remove(handle);
        let entry = self.entry_mut(handle)?;
        entry.state = EntityState::Detached;
        entry.unsubscribe();
        entry.clear_modified();
        entry.clear_temporary();
        self.orphans.remove(&handle);
        self.referenced_untracked.retain(|_, referrers| {
            referrers.retain(|(referrer, _)| *referrer != handle);
            !referrers.is_empty()
        });
        trace!("Stopped tracking {}", handle);
        Ok(())
    }

    /// Fills sentinel properties that are generated on add.
    fn generate_values(&mut self, handle: EntityHandle) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type(self.type_id(handle)?);
        for property in entity_type.properties() {
            if !property.value_generated_on_add() || !self.read(handle, property.index())?.is_sentinel() {
                continue;
            }
            let Some((value, temporary)) = self.generators.generate(entity_type, property, handle) else {
                continue;
            };
            trace!(
                "Generated {} value for {}.{}",
                if temporary { "temporary" } else { "permanent" },
                entity_type.name(),
                property.name()
            );
            self.write_raw(handle, property.index(), value)?;
            let stored = self.read(handle, property.index())?;
            let entry = self.entry_mut(handle)?;
            entry.temporary[property.index()] = temporary;
            entry.snapshot[property.index()] = stored;
        }
        Ok(())
    }

    fn check_temporary(&self, handle: EntityHandle, target: EntityState) -> TrackResult<()> {
        let entry = self.entry(handle)?;
        match entry.temporary.iter().position(|&t| t) {
            Some(p) => {
                let entity_type = self.model.entity_type(entry.entity_type);
                Err(TrackError::TemporaryValuePersists {
                    entity_type: entity_type.name().to_string(),
                    property: entity_type.property(p).name().to_string(),
                    state: target.to_string(),
                })
            }
            None => Ok(()),
        }
    }

    /// Makes the current values the original values.
    fn accept_values(&mut self, handle: EntityHandle) -> TrackResult<()> {
        let current = self.current_values(handle)?;
        let entry = self.entry_mut(handle)?;
        entry.original = current.clone();
        entry.snapshot = current;
        entry.clear_modified();
        Ok(())
    }

    fn mark_all_modified(&mut self, handle: EntityHandle) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let entry = self.entry_mut(handle)?;
        let entity_type = model.entity_type(entry.entity_type);
        for property in entity_type.properties() {
            entry.modified[property.index()] = !property.is_key();
        }
        Ok(())
    }

    pub(crate) fn set_property_value(&mut self, handle: EntityHandle, property: usize, value: Value) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type(self.type_id(handle)?);
        let prop = entity_type.property(property);
        check_assignable(entity_type, prop, &value)?;

        let state = self.state(handle);
        let previous = self.read(handle, property)?;
        if prop.is_key()
            && matches!(
                state,
                EntityState::Unchanged | EntityState::Modified | EntityState::Deleted
            )
        {
            if prop.key_comparer().equals(&previous, &value) {
                return Ok(());
            }
            return Err(key_modified_error(entity_type, prop));
        }

        self.write_raw(handle, property, value)?;
        self.entry_mut(handle)?.temporary[property] = false;
        if !state.is_tracked() {
            return Ok(());
        }
        self.after_write(handle, property)?;
        if prop.is_key() || prop.is_foreign_key() {
            if let Err(err) = self.refresh_keys(handle, true) {
                if err.is_identity_conflict() {
                    self.write_internal(handle, property, previous)?;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    pub(crate) fn original_value(&self, handle: EntityHandle, property: usize) -> TrackResult<Value> {
        let entry = self.entry(handle)?;
        if entry.state.is_tracked() {
            Ok(entry.original[property].clone())
        } else {
            self.read(handle, property)
        }
    }

    pub(crate) fn set_original_value(&mut self, handle: EntityHandle, property: usize, value: Value) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type(self.type_id(handle)?);
        check_assignable(entity_type, entity_type.property(property), &value)?;
        self.entry_mut(handle)?.original[property] = value;
        if self.is_tracked(handle) {
            self.after_write(handle, property)?;
        }
        Ok(())
    }

    pub(crate) fn is_property_modified(&self, handle: EntityHandle, property: usize) -> TrackResult<bool> {
        let entry = self.entry(handle)?;
        Ok(entry.state == EntityState::Modified && entry.modified[property])
    }

    /// Sets or clears a modified flag. Clearing it restores the original value.
    pub(crate) fn set_property_modified(&mut self, handle: EntityHandle, property: usize, modified: bool) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type(self.type_id(handle)?);
        let prop = entity_type.property(property);
        let state = self.state(handle);

        if prop.is_key() {
            if modified && matches!(state, EntityState::Unchanged | EntityState::Modified | EntityState::Deleted) {
                return Err(key_modified_error(entity_type, prop));
            }
            return Ok(());
        }

        match state {
            EntityState::Unchanged | EntityState::Modified if modified => {
                let entry = self.entry_mut(handle)?;
                entry.modified[property] = true;
                entry.state = EntityState::Modified;
            }
            EntityState::Unchanged | EntityState::Modified => {
                let original = self.entry(handle)?.original[property].clone();
                let reverted = !prop.comparer().equals(&original, &self.read(handle, property)?);
                if reverted {
                    self.write_raw(handle, property, original.clone())?;
                }
                let entry = self.entry_mut(handle)?;
                entry.snapshot[property] = original;
                entry.modified[property] = false;
                if !entry.any_modified() {
                    entry.state = EntityState::Unchanged;
                }
                if reverted && prop.is_foreign_key() {
                    self.refresh_keys(handle, true)?;
                }
            }
            _ => self.entry_mut(handle)?.modified[property] = modified,
        }
        Ok(())
    }

    pub(crate) fn is_temporary(&self, handle: EntityHandle, property: usize) -> TrackResult<bool> {
        Ok(self.entry(handle)?.temporary[property])
    }

    pub(crate) fn set_temporary(&mut self, handle: EntityHandle, property: usize, temporary: bool) -> TrackResult<()> {
        let state = self.state(handle);
        if temporary && matches!(state, EntityState::Unchanged | EntityState::Modified) {
            let model = Arc::clone(&self.model);
            let entity_type = model.entity_type(self.type_id(handle)?);
            return Err(TrackError::TemporaryValuePersists {
                entity_type: entity_type.name().to_string(),
                property: entity_type.property(property).name().to_string(),
                state: state.to_string(),
            });
        }
        self.entry_mut(handle)?.temporary[property] = temporary;
        Ok(())
    }

    /// Applies delete behavior to the tracked dependents of a principal.
    ///
    /// With `principal_detached` set, cascading dependents are detached
    /// rather than deleted and nothing is nulled.
    pub(crate) fn cascade_delete(&mut self, principal: EntityHandle, principal_detached: bool) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type(self.type_id(principal)?);
        for &fk_id in entity_type.referencing_foreign_keys() {
            let fk = model.foreign_key(fk_id);
            for dependent in self.find_dependents(principal, fk_id)? {
                let state = self.state(dependent);
                if dependent == principal || matches!(state, EntityState::Detached | EntityState::Deleted) {
                    continue;
                }
                if fk.cascades() {
                    let target = if principal_detached {
                        EntityState::Detached
                    } else {
                        EntityState::Deleted
                    };
                    debug!(
                        "Cascading {} of {} to {}",
                        target,
                        self.describe(principal),
                        self.describe(dependent)
                    );
                    self.set_state(dependent, target)?;
                    continue;
                }
                if principal_detached {
                    continue;
                }
                match fk.delete_behavior() {
                    DeleteBehavior::ClientSetNull | DeleteBehavior::SetNull => {
                        let dependent_type = model.entity_type(fk.dependent_type());
                        let nullable = fk
                            .properties()
                            .iter()
                            .all(|&p| dependent_type.property(p).is_nullable());
                        if nullable {
                            self.set_foreign_key(dependent, fk_id, None, false)?;
                        } else {
                            warn!(
                                "Foreign key of {} cannot be nulled after deleting {}",
                                self.describe(dependent),
                                self.describe(principal)
                            );
                        }
                    }
                    DeleteBehavior::Restrict | DeleteBehavior::Cascade => {}
                }
            }
        }
        Ok(())
    }

    /// Handles a dependent that lost its principal: nulls an optional
    /// foreign key or treats the dependent as an orphan.
    pub(crate) fn null_or_orphan(&mut self, dependent: EntityHandle, fk_id: ForeignKeyId) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let fk = model.foreign_key(fk_id);
        let dependent_type = model.entity_type(fk.dependent_type());
        let nullable = fk
            .properties()
            .iter()
            .all(|&p| dependent_type.property(p).is_nullable());
        if !fk.is_required() && nullable {
            return self.set_foreign_key(dependent, fk_id, None, false);
        }
        if !fk.cascades() {
            warn!(
                "{} was severed from a required relationship that does not cascade",
                self.describe(dependent)
            );
            return Ok(());
        }
        match self.config.delete_orphans_timing {
            CascadeTiming::Immediate => {
                debug!("Deleting orphan {}", self.describe(dependent));
                self.set_state(dependent, EntityState::Deleted)
            }
            CascadeTiming::OnSaveChanges => {
                self.orphans.insert(dependent);
                Ok(())
            }
            CascadeTiming::Never => {
                warn!(
                    "{} was orphaned and orphan deletion is disabled",
                    self.describe(dependent)
                );
                Ok(())
            }
        }
    }

    /// Applies deferred orphan deletion and cascade deletes until nothing
    /// changes.
    pub(crate) fn cascade_changes(&mut self) -> TrackResult<()> {
        loop {
            let mut changed = false;
            for orphan in std::mem::take(&mut self.orphans) {
                if self.is_tracked(orphan) && self.state(orphan) != EntityState::Deleted && self.is_orphaned(orphan)? {
                    self.set_state(orphan, EntityState::Deleted)?;
                    changed = true;
                }
            }
            let deleted: Vec<EntityHandle> = self
                .entries
                .values()
                .filter(|e| e.state == EntityState::Deleted)
                .map(|e| e.handle)
                .collect();
            for principal in deleted {
                let before = self.deleted_count();
                self.cascade_delete(principal, false)?;
                changed |= self.deleted_count() != before;
            }
            if !changed {
                return Ok(());
            }
        }
    }

    fn deleted_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state == EntityState::Deleted)
            .count()
    }

    /// Returns true if a required, cascading relationship of the dependent
    /// has no tracked principal.
    fn is_orphaned(&self, dependent: EntityHandle) -> TrackResult<bool> {
        let entity_type = self.model.entity_type(self.type_id(dependent)?);
        for &fk_id in entity_type.declared_foreign_keys() {
            let fk = self.model.foreign_key(fk_id);
            if !fk.is_required() || !fk.cascades() {
                continue;
            }
            let principal = self.find_principal(dependent, fk_id)?;
            if principal.map_or(true, |p| self.state(p) == EntityState::Deleted) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub(crate) fn detect_changes(&mut self) -> TrackResult<()> {
        trace!("Detecting changes for {} entries", self.entries.len());
        for handle in self.tracked_handles() {
            if self.is_tracked(handle) {
                self.detect_entry_changes(handle)?;
            }
        }
        Ok(())
    }

    pub(crate) fn detect_entry_changes(&mut self, handle: EntityHandle) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type(self.type_id(handle)?);

        for prop in entity_type.properties() {
            if prop.is_shadow() || !self.is_tracked(handle) {
                continue;
            }
            let p = prop.index();
            let current = self.read(handle, p)?;
            let comparer = if prop.is_key() || prop.is_foreign_key() {
                prop.key_comparer()
            } else {
                prop.comparer()
            };
            if comparer.equals(&self.entry(handle)?.snapshot[p], &current) {
                continue;
            }
            trace!("Detected change to {}.{}", entity_type.name(), prop.name());
            if prop.is_key() && self.state(handle) != EntityState::Added {
                return Err(key_modified_error(entity_type, prop));
            }
            self.entry_mut(handle)?.temporary[p] = false;
            self.after_write(handle, p)?;
            if prop.is_key() || prop.is_foreign_key() {
                self.refresh_keys(handle, true)?;
            }
        }

        for navigation in entity_type.navigations() {
            if !self.is_tracked(handle) {
                return Ok(());
            }
            if navigation.is_collection() {
                continue;
            }
            let current = self.reference_slot(handle, navigation.index())?;
            let previous = self.entry(handle)?.references[navigation.index()];
            if current != previous {
                self.entry_mut(handle)?.references[navigation.index()] = current;
                self.reference_changed(handle, navigation.index(), previous, current)?;
            }
        }

        if !self.is_tracked(handle) {
            return Ok(());
        }
        let changes = self.entry_mut(handle)?.take_notifications();
        for (navigation, change) in changes {
            if !self.is_tracked(handle) {
                break;
            }
            if let SetChange::Collection { added, removed, .. } = change {
                if entity_type.navigation(navigation).is_skip() {
                    self.skip_collection_changed(handle, navigation, &added, &removed)?;
                } else {
                    self.collection_changed(handle, navigation, &added, &removed)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn has_changes(&self) -> bool {
        self.entries.values().any(|e| e.state.has_pending_changes())
    }

    pub(crate) fn accept_all_changes(&mut self) -> TrackResult<()> {
        for handle in self.tracked_handles() {
            match self.state(handle) {
                EntityState::Added | EntityState::Modified => {
                    self.entry_mut(handle)?.clear_temporary();
                    self.accept_values(handle)?;
                    self.entry_mut(handle)?.state = EntityState::Unchanged;
                }
                EntityState::Deleted => self.set_state(handle, EntityState::Detached)?,
                EntityState::Unchanged | EntityState::Detached => {}
            }
        }
        self.orphans.clear();
        Ok(())
    }

    pub(crate) fn change_batch(&self) -> TrackResult<ChangeBatch> {
        let mut changes = Vec::new();
        for entry in self.entries.values().filter(|e| e.state.has_pending_changes()) {
            let entity_type = self.model.entity_type(entry.entity_type);
            let names: Vec<&str> = entity_type.properties().iter().map(Property::name).collect();
            let current = self.current_values(entry.handle)?;
            let pairs = |values: &[Value]| -> Vec<(String, Value)> {
                names
                    .iter()
                    .zip(values)
                    .map(|(n, v)| ((*n).to_string(), v.clone()))
                    .collect()
            };
            let flagged = |flags: &[bool]| -> Vec<String> {
                names
                    .iter()
                    .zip(flags)
                    .filter(|(_, flag)| **flag)
                    .map(|(n, _)| (*n).to_string())
                    .collect()
            };
            changes.push(PendingChange {
                handle: entry.handle,
                entity_type: entity_type.name().to_string(),
                state: entry.state,
                key: entity_type
                    .primary_key()
                    .properties()
                    .iter()
                    .map(|&p| (names[p].to_string(), current[p].clone()))
                    .collect(),
                current: pairs(&current),
                original: pairs(&entry.original),
                modified: if entry.state == EntityState::Modified {
                    flagged(&entry.modified)
                } else {
                    Vec::new()
                },
                temporary: flagged(&entry.temporary),
            });
        }
        Ok(ChangeBatch { changes })
    }

    /// Saves pending changes through a sink and accepts them.
    ///
    /// Change detection is the caller's concern.
    pub(crate) fn save_changes(&mut self, sink: &mut dyn PersistenceSink) -> TrackResult<usize> {
        if self.config.cascade_delete_timing == CascadeTiming::OnSaveChanges || !self.orphans.is_empty() {
            self.cascade_changes()?;
        }
        let batch = self.change_batch()?;
        if batch.is_empty() {
            debug!("No changes to save");
            return Ok(0);
        }
        debug!("Saving {} changes", batch.len());
        let generated = sink.persist(&batch)?;
        for values in generated {
            self.apply_generated(values)?;
        }
        self.accept_all_changes()?;
        Ok(batch.len())
    }

    fn apply_generated(&mut self, generated: GeneratedValues) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let handle = generated.handle;
        let entity_type = model.entity_type(self.type_id(handle)?);
        let mut keys_changed = false;
        for (name, value) in generated.values {
            let property = entity_type.property_by_name(&name)?;
            check_assignable(entity_type, property, &value)?;
            trace!("Applying store value for {}.{}", entity_type.name(), name);
            self.write_raw(handle, property.index(), value)?;
            self.entry_mut(handle)?.temporary[property.index()] = false;
            self.after_write(handle, property.index())?;
            keys_changed |= property.is_key() || property.is_foreign_key();
        }
        if keys_changed {
            self.refresh_keys(handle, false)?;
        }
        Ok(())
    }

    /// Restores original values and returns the entry to `Unchanged`.
    pub(crate) fn reload_original_values(&mut self, handle: EntityHandle) -> TrackResult<()> {
        let model = Arc::clone(&self.model);
        let entity_type = model.entity_type(self.type_id(handle)?);
        let state = self.state(handle);
        if !matches!(
            state,
            EntityState::Unchanged | EntityState::Modified | EntityState::Deleted
        ) {
            return Ok(());
        }
        let mut foreign_keys_changed = false;
        for prop in entity_type.properties().iter().filter(|p| !p.is_key()) {
            let original = self.entry(handle)?.original[prop.index()].clone();
            if !prop.comparer().equals(&original, &self.read(handle, prop.index())?) {
                self.write_raw(handle, prop.index(), original.clone())?;
                foreign_keys_changed |= prop.is_foreign_key();
            }
            self.entry_mut(handle)?.snapshot[prop.index()] = original;
        }
        let entry = self.entry_mut(handle)?;
        entry.clear_modified();
        entry.state = EntityState::Unchanged;
        if foreign_keys_changed {
            self.refresh_keys(handle, true)?;
        }
        Ok(())
    }

    /// Stops tracking everything without cascading.
    pub(crate) fn clear(&mut self) {
        for entry in self.entries.values_mut() {
            entry.state = EntityState::Detached;
            entry.unsubscribe();
            entry.clear_modified();
            entry.clear_temporary();
        }
        for map in &mut self.identity {
            map.clear();
        }
        self.referenced_untracked.clear();
        self.orphans.clear();
        debug!("Cleared all tracked entries");
    }
}

fn key_modified_error(entity_type: &EntityType, property: &Property) -> TrackError {
    TrackError::invalid_operation(format!(
        "the property '{}.{}' is part of a key and so cannot be modified or marked as modified",
        entity_type.name(),
        property.name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelBuilder;
    use crate::value::ValueType;

    fn model() -> Arc<Model> {
        let mut builder = ModelBuilder::new();
        builder
            .entity("Blog", |e| {
                e.property("Id", ValueType::Int);
                e.property("Title", ValueType::Text).nullable();
            })
            .entity("Post", |e| {
                e.property("Id", ValueType::Int);
                e.property("BlogId", ValueType::Int);
                e.property("Body", ValueType::Text).nullable();
            });
        builder.has_many("Blog", Some("Posts"), "Post", Some("Blog"));
        builder.build().unwrap()
    }

    fn manager() -> StateManager {
        StateManager::new(model(), TrackingConfig::default())
    }

    fn blog(sm: &mut StateManager, id: i32) -> EntityHandle {
        let h = sm.create("Blog").unwrap();
        sm.write_raw(h, 0, Value::Int(id)).unwrap();
        h
    }

    #[test]
    fn added_entries_get_temporary_keys() {
        let mut sm = manager();
        let h = sm.create("Blog").unwrap();
        sm.set_state(h, EntityState::Added).unwrap();

        assert_eq!(sm.read(h, 0).unwrap(), Value::Int(-1));
        assert!(sm.is_temporary(h, 0).unwrap());
        assert!(!sm.is_key_set(h).unwrap());
        assert_eq!(
            sm.set_state(h, EntityState::Unchanged).unwrap_err().to_string(),
            "the property 'Blog.Id' has a temporary value while attempting to change the entity's state to 'Unchanged'"
        );
    }

    #[test]
    fn duplicate_keys_conflict() {
        let mut sm = manager();
        let first = blog(&mut sm, 1);
        let second = blog(&mut sm, 1);
        sm.set_state(first, EntityState::Unchanged).unwrap();

        let err = sm.set_state(second, EntityState::Unchanged).unwrap_err();
        assert!(err.is_identity_conflict());
        assert!(err.to_string().contains("{'Id'}"));
        assert_eq!(sm.state(second), EntityState::Detached);
    }

    #[test]
    fn writes_toggle_modified() {
        let mut sm = manager();
        let h = blog(&mut sm, 1);
        sm.write_raw(h, 1, Value::from("a")).unwrap();
        sm.set_state(h, EntityState::Unchanged).unwrap();

        sm.set_property_value(h, 1, Value::from("b")).unwrap();
        assert_eq!(sm.state(h), EntityState::Modified);
        assert!(sm.is_property_modified(h, 1).unwrap());

        sm.set_property_value(h, 1, Value::from("a")).unwrap();
        assert_eq!(sm.state(h), EntityState::Unchanged);
        assert!(!sm.is_property_modified(h, 1).unwrap());
    }

    #[test]
    fn clearing_modified_reverts_value() {
        let mut sm = manager();
        let h = blog(&mut sm, 1);
        sm.write_raw(h, 1, Value::from("a")).unwrap();
        sm.set_state(h, EntityState::Unchanged).unwrap();
        sm.set_property_value(h, 1, Value::from("b")).unwrap();

        sm.set_property_modified(h, 1, false).unwrap();
        assert_eq!(sm.read(h, 1).unwrap(), Value::from("a"));
        assert_eq!(sm.state(h), EntityState::Unchanged);
    }

    #[test]
    fn key_of_unchanged_entry_is_read_only() {
        let mut sm = manager();
        let h = blog(&mut sm, 1);
        sm.set_state(h, EntityState::Unchanged).unwrap();

        assert!(sm.set_property_value(h, 0, Value::Int(2)).is_err());
        sm.set_property_value(h, 0, Value::Int(1)).unwrap();
        assert!(sm.set_property_modified(h, 0, true).is_err());
    }

    #[test]
    fn detect_changes_picks_up_raw_writes() {
        let mut sm = manager();
        let h = blog(&mut sm, 1);
        sm.set_state(h, EntityState::Unchanged).unwrap();
        sm.write_raw(h, 1, Value::from("changed")).unwrap();
        assert_eq!(sm.state(h), EntityState::Unchanged);

        sm.detect_changes().unwrap();
        assert_eq!(sm.state(h), EntityState::Modified);
        assert!(sm.is_property_modified(h, 1).unwrap());
    }

    #[test]
    fn deleting_a_principal_cascades() {
        let mut sm = manager();
        let b = blog(&mut sm, 1);
        let p = sm.create("Post").unwrap();
        sm.write_raw(p, 0, Value::Int(10)).unwrap();
        sm.write_raw(p, 1, Value::Int(1)).unwrap();
        sm.set_state(b, EntityState::Unchanged).unwrap();
        sm.set_state(p, EntityState::Unchanged).unwrap();

        sm.set_state(b, EntityState::Deleted).unwrap();
        assert_eq!(sm.state(p), EntityState::Deleted);
    }

    #[test]
    fn modified_state_flags_every_non_key_property() {
        let mut sm = manager();
        let h = blog(&mut sm, 1);
        sm.set_state(h, EntityState::Modified).unwrap();
        assert!(!sm.is_property_modified(h, 0).unwrap());
        assert!(sm.is_property_modified(h, 1).unwrap());

        sm.reload_original_values(h).unwrap();
        assert_eq!(sm.state(h), EntityState::Unchanged);
    }

    #[test]
    fn change_batch_is_ordered_and_accepted() {
        struct Sink(Vec<EntityHandle>);
        impl PersistenceSink for Sink {
            fn persist(&mut self, batch: &ChangeBatch) -> TrackResult<Vec<GeneratedValues>> {
                self.0 = batch.changes.iter().map(|c| c.handle).collect();
                Ok(batch
                    .changes
                    .iter()
                    .filter(|c| c.is_temporary("Id"))
                    .map(|c| GeneratedValues {
                        handle: c.handle,
                        values: vec![("Id".into(), Value::Int(40))],
                    })
                    .collect())
            }
        }

        let mut sm = manager();
        let existing = blog(&mut sm, 1);
        let added = sm.create("Blog").unwrap();
        sm.set_state(existing, EntityState::Modified).unwrap();
        sm.set_state(added, EntityState::Added).unwrap();

        let mut sink = Sink(Vec::new());
        assert_eq!(sm.save_changes(&mut sink).unwrap(), 2);
        assert_eq!(sink.0, vec![existing, added]);
        assert_eq!(sm.read(added, 0).unwrap(), Value::Int(40));
        assert_eq!(sm.state(added), EntityState::Unchanged);
        assert!(!sm.has_changes());
    }
}
