//! Lookups over the tracked entries of one entity type.
//!
//! Full key lookups and foreign key lookups go through the identity map;
//! anything else scans the tracked entries of the type. Results are
//! ordered by handle.

use crate::entry::EntityEntry;
use crate::error::{TrackError, TrackResult};
use crate::model::{EntityType, EntityTypeId, Model};
use crate::object::EntityHandle;
use crate::tracking::StateManager;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Tracked entries of one entity type.
pub struct LocalView<'a> {
    sm: &'a mut StateManager,
    model: Arc<Model>,
    entity_type: EntityTypeId,
}

impl<'a> LocalView<'a> {
    pub(crate) fn new(sm: &'a mut StateManager, entity_type: EntityTypeId) -> Self {
        let model = Arc::clone(&sm.model);
        Self {
            sm,
            model,
            entity_type,
        }
    }

    /// Entity type metadata.
    #[must_use]
    pub fn entity_type(&self) -> &EntityType {
        self.model.entity_type(self.entity_type)
    }

    /// Handles of every tracked entity of this type.
    #[must_use]
    pub fn entries(&self) -> Vec<EntityHandle> {
        self.sm
            .tracked_handles()
            .into_iter()
            .filter(|&h| self.sm.type_id(h).ok() == Some(self.entity_type))
            .collect()
    }

    /// Entry whose single-property primary key equals `value`.
    pub fn find_entry(&mut self, value: impl Into<Value>) -> TrackResult<Option<EntityEntry<'_>>> {
        self.find_entry_by_key(&[value.into()])
    }

    /// Entry whose primary key equals `key`.
    pub fn find_entry_by_key(&mut self, key: &[Value]) -> TrackResult<Option<EntityEntry<'_>>> {
        let entity_type = self.model.entity_type(self.entity_type);
        let primary_key = entity_type.primary_key();
        if primary_key.properties().len() != key.len() {
            return Err(TrackError::KeyValueCountMismatch {
                entity_type: Some(entity_type.name().to_string()),
                expected: primary_key.properties().len(),
                actual: key.len(),
            });
        }
        check_types(entity_type, primary_key.properties(), key)?;
        let found = self.sm.identity(self.entity_type).find_by_key(primary_key.index(), key);
        Ok(self.entry_for(found))
    }

    /// First entry whose property `name` equals `value`.
    pub fn find_entry_by(&mut self, name: &str, value: impl Into<Value>) -> TrackResult<Option<EntityEntry<'_>>> {
        self.find_entry_by_properties(&[name], &[value.into()])
    }

    /// First entry whose properties equal `values`.
    pub fn find_entry_by_properties(&mut self, names: &[&str], values: &[Value]) -> TrackResult<Option<EntityEntry<'_>>> {
        let found = self.get_entries_by_properties(names, values)?.into_iter().next();
        Ok(self.entry_for(found))
    }

    /// Handles of every entry whose property `name` equals `value`.
    pub fn get_entries_by(&self, name: &str, value: impl Into<Value>) -> TrackResult<Vec<EntityHandle>> {
        self.get_entries_by_properties(&[name], &[value.into()])
    }

    /// Handles of every entry whose properties equal `values`.
    ///
    /// A null in a full key lookup matches nothing. Foreign key and other
    /// properties compare null equal to null.
    pub fn get_entries_by_properties(&self, names: &[&str], values: &[Value]) -> TrackResult<Vec<EntityHandle>> {
        let entity_type = self.model.entity_type(self.entity_type);
        let properties = names
            .iter()
            .map(|name| entity_type.property_by_name(name).map(|p| p.index()))
            .collect::<TrackResult<Vec<_>>>()?;
        if properties.len() != values.len() {
            return Err(TrackError::count_mismatch(properties.len(), values.len()));
        }
        check_types(entity_type, &properties, values)?;
        if properties.is_empty() {
            return Ok(Vec::new());
        }

        let identity = self.sm.identity(self.entity_type);
        if let Some(key) = entity_type.find_key(&properties) {
            trace!("Looking up {} by key {}", entity_type.name(), key.index());
            return Ok(identity.find_by_key(key.index(), values).into_iter().collect());
        }
        if let Some(&fk) = entity_type
            .declared_foreign_keys()
            .iter()
            .find(|&&fk| self.model.foreign_key(fk).properties() == properties.as_slice())
        {
            trace!("Looking up {} by foreign key {}", entity_type.name(), fk);
            return Ok(identity.find_by_foreign_key(fk, values));
        }

        let mut matches = Vec::new();
        for handle in self.entries() {
            let mut matched = true;
            for (&property, value) in properties.iter().zip(values) {
                let comparer = entity_type.property(property).comparer();
                if !comparer.equals(&self.sm.read(handle, property)?, value) {
                    matched = false;
                    break;
                }
            }
            if matched {
                matches.push(handle);
            }
        }
        Ok(matches)
    }

    fn entry_for(&mut self, handle: Option<EntityHandle>) -> Option<EntityEntry<'_>> {
        match handle {
            Some(handle) => Some(EntityEntry::new(self.sm, handle, self.entity_type)),
            None => None,
        }
    }
}

impl fmt::Debug for LocalView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalView")
            .field("entity_type", &self.entity_type().name())
            .finish_non_exhaustive()
    }
}

pub(crate) fn check_types(entity_type: &EntityType, properties: &[usize], values: &[Value]) -> TrackResult<()> {
    for (&property, value) in properties.iter().zip(values) {
        let property = entity_type.property(property);
        if !value.is_compatible_with(property.value_type()) {
            return Err(TrackError::KeyTypeMismatch {
                property: property.name().to_string(),
                declaring_type: entity_type.name().to_string(),
                expected: property.value_type().name().to_string(),
                actual: value.type_name().to_string(),
            });
        }
    }
    Ok(())
}

