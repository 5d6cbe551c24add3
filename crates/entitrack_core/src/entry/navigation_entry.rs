use super::EntityEntry;
use crate::error::{TrackError, TrackResult};
use crate::local::check_types;
use crate::model::{EntityTypeId, Model, Navigation};
use crate::object::EntityHandle;
use crate::tracking::StateManager;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Borrowed state shared by reference and collection entries.
struct NavigationTarget<'a> {
    sm: &'a mut StateManager,
    model: Arc<Model>,
    handle: EntityHandle,
    entity_type: EntityTypeId,
    navigation: usize,
}

impl<'a> NavigationTarget<'a> {
    fn new(sm: &'a mut StateManager, handle: EntityHandle, entity_type: EntityTypeId, navigation: usize) -> Self {
        let model = Arc::clone(&sm.model);
        Self {
            sm,
            model,
            handle,
            entity_type,
            navigation,
        }
    }

    fn metadata(&self) -> &Navigation {
        self.model.navigation(self.entity_type, self.navigation)
    }

    fn check_target(&self, target: EntityHandle) -> TrackResult<()> {
        let nav = self.metadata();
        if self.sm.type_id(target)? != nav.target_type() {
            return Err(TrackError::invalid_operation(format!(
                "{} cannot be assigned to the navigation '{}.{}', which targets '{}'",
                self.sm.describe(target),
                self.model.entity_type(self.entity_type).name(),
                nav.name(),
                self.model.entity_type(nav.target_type()).name()
            )));
        }
        Ok(())
    }

    fn is_modified(&self) -> TrackResult<bool> {
        self.sm.is_navigation_modified(self.handle, self.navigation)
    }

    fn set_is_modified(&mut self, modified: bool) -> TrackResult<()> {
        self.sm.set_navigation_modified(self.handle, self.navigation, modified)
    }
}

/// Change tracking information for a reference navigation.
pub struct ReferenceEntry<'a> {
    inner: NavigationTarget<'a>,
}

impl<'a> ReferenceEntry<'a> {
    pub(crate) fn new(sm: &'a mut StateManager, handle: EntityHandle, entity_type: EntityTypeId, navigation: usize) -> Self {
        Self {
            inner: NavigationTarget::new(sm, handle, entity_type, navigation),
        }
    }

    /// Navigation metadata.
    #[must_use]
    pub fn metadata(&self) -> &Navigation {
        self.inner.metadata()
    }

    /// Entity the navigation points to.
    pub fn current_value(&self) -> TrackResult<Option<EntityHandle>> {
        self.inner.sm.reference_slot(self.inner.handle, self.inner.navigation)
    }

    /// Points the navigation at another entity and fixes up foreign keys
    /// and inverse navigations.
    pub fn set_current_value(&mut self, target: Option<EntityHandle>) -> TrackResult<()> {
        if let Some(target) = target {
            self.inner.check_target(target)?;
        }
        let NavigationTarget {
            sm,
            handle,
            navigation,
            ..
        } = &mut self.inner;
        let old = sm.reference_slot(*handle, *navigation)?;
        if old == target {
            return Ok(());
        }
        sm.set_reference_slot(*handle, *navigation, target)?;
        if sm.is_tracked(*handle) {
            sm.reference_changed(*handle, *navigation, old, target)?;
        }
        Ok(())
    }

    /// Entry of the referenced entity.
    pub fn target_entry(&mut self) -> TrackResult<Option<EntityEntry<'_>>> {
        let Some(target) = self.current_value()? else {
            return Ok(None);
        };
        let entity_type = self.inner.sm.type_id(target)?;
        Ok(Some(EntityEntry::new(self.inner.sm, target, entity_type)))
    }

    /// Returns true if the relationship behind the navigation has changed.
    pub fn is_modified(&self) -> TrackResult<bool> {
        self.inner.is_modified()
    }

    /// Marks the foreign key behind the navigation as modified or not.
    pub fn set_is_modified(&mut self, modified: bool) -> TrackResult<()> {
        self.inner.set_is_modified(modified)
    }

    /// Entry of the entity that declares this navigation.
    pub fn entity_entry(&mut self) -> EntityEntry<'_> {
        EntityEntry::new(self.inner.sm, self.inner.handle, self.inner.entity_type)
    }
}

impl fmt::Debug for ReferenceEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceEntry")
            .field("handle", &self.inner.handle)
            .field("navigation", &self.metadata().name())
            .finish_non_exhaustive()
    }
}

/// Change tracking information for a collection or skip navigation.
pub struct CollectionEntry<'a> {
    inner: NavigationTarget<'a>,
}

impl<'a> CollectionEntry<'a> {
    pub(crate) fn new(sm: &'a mut StateManager, handle: EntityHandle, entity_type: EntityTypeId, navigation: usize) -> Self {
        Self {
            inner: NavigationTarget::new(sm, handle, entity_type, navigation),
        }
    }

    /// Navigation metadata.
    #[must_use]
    pub fn metadata(&self) -> &Navigation {
        self.inner.metadata()
    }

    /// Members of the collection.
    pub fn current_value(&self) -> TrackResult<Vec<EntityHandle>> {
        self.inner.sm.collection_members(self.inner.handle, self.inner.navigation)
    }

    /// Returns true if `member` is in the collection.
    pub fn contains(&self, member: EntityHandle) -> TrackResult<bool> {
        self.inner
            .sm
            .collection_contains(self.inner.handle, self.inner.navigation, member)
    }

    /// Adds a member and fixes up the relationship. Returns false if it was
    /// already present.
    pub fn add(&mut self, member: EntityHandle) -> TrackResult<bool> {
        self.inner.check_target(member)?;
        let added = self
            .inner
            .sm
            .collection_add(self.inner.handle, self.inner.navigation, member)?;
        if added {
            self.changed(&[member], &[])?;
        }
        Ok(added)
    }

    /// Removes a member and fixes up the relationship. Returns false if it
    /// was not present.
    pub fn remove(&mut self, member: EntityHandle) -> TrackResult<bool> {
        let removed = self
            .inner
            .sm
            .collection_remove(self.inner.handle, self.inner.navigation, member)?;
        if removed {
            self.changed(&[], &[member])?;
        }
        Ok(removed)
    }

    /// Replaces the members of the collection.
    pub fn set_current_value(&mut self, members: &[EntityHandle]) -> TrackResult<()> {
        for &member in members {
            self.inner.check_target(member)?;
        }
        let current = self.current_value()?;
        let removed: Vec<EntityHandle> = current.iter().copied().filter(|m| !members.contains(m)).collect();
        let mut added = Vec::new();
        for &member in members {
            if !current.contains(&member) && !added.contains(&member) {
                added.push(member);
            }
        }
        for &member in &removed {
            self.inner
                .sm
                .collection_remove(self.inner.handle, self.inner.navigation, member)?;
        }
        for &member in &added {
            self.inner
                .sm
                .collection_add(self.inner.handle, self.inner.navigation, member)?;
        }
        self.changed(&added, &removed)
    }

    fn changed(&mut self, added: &[EntityHandle], removed: &[EntityHandle]) -> TrackResult<()> {
        let NavigationTarget {
            sm,
            model,
            handle,
            entity_type,
            navigation,
        } = &mut self.inner;
        if !sm.is_tracked(*handle) {
            return Ok(());
        }
        if model.navigation(*entity_type, *navigation).is_skip() {
            sm.skip_collection_changed(*handle, *navigation, added, removed)
        } else {
            sm.collection_changed(*handle, *navigation, added, removed)
        }
    }

    /// Entry of the member whose primary key equals `key`.
    pub fn find_entry(&mut self, key: &[Value]) -> TrackResult<Option<EntityEntry<'_>>> {
        let target_type = self.inner.model.entity_type(self.metadata().target_type());
        let primary_key = target_type.primary_key();
        if primary_key.properties().len() != key.len() {
            return Err(TrackError::KeyValueCountMismatch {
                entity_type: Some(target_type.name().to_string()),
                expected: primary_key.properties().len(),
                actual: key.len(),
            });
        }
        check_types(target_type, primary_key.properties(), key)?;
        let target_id = target_type.id();
        let mut found = None;
        for member in self.current_value()? {
            let values = self.inner.sm.read_all(member, primary_key.properties())?;
            if primary_key.comparer().equals(&values, key) {
                found = Some(member);
                break;
            }
        }
        Ok(match found {
            Some(member) => Some(EntityEntry::new(self.inner.sm, member, target_id)),
            None => None,
        })
    }

    /// Members whose properties `names` equal `values`, in collection order.
    pub fn get_entries(&self, names: &[&str], values: &[Value]) -> TrackResult<Vec<EntityHandle>> {
        let target_type = self.inner.model.entity_type(self.metadata().target_type());
        let properties = names
            .iter()
            .map(|name| target_type.property_by_name(name))
            .collect::<TrackResult<Vec<_>>>()?;
        if properties.len() != values.len() {
            return Err(TrackError::count_mismatch(properties.len(), values.len()));
        }
        let mut matches = Vec::new();
        for member in self.current_value()? {
            let mut matched = true;
            for (property, value) in properties.iter().zip(values) {
                if !property.comparer().equals(&self.inner.sm.read(member, property.index())?, value) {
                    matched = false;
                    break;
                }
            }
            if matched {
                matches.push(member);
            }
        }
        Ok(matches)
    }

    /// Returns true if any relationship behind the collection has changed.
    pub fn is_modified(&self) -> TrackResult<bool> {
        self.inner.is_modified()
    }

    /// Marks the foreign keys behind the collection as modified or not.
    pub fn set_is_modified(&mut self, modified: bool) -> TrackResult<()> {
        self.inner.set_is_modified(modified)
    }

    /// Entry of the entity that owns the collection.
    pub fn entity_entry(&mut self) -> EntityEntry<'_> {
        EntityEntry::new(self.inner.sm, self.inner.handle, self.inner.entity_type)
    }
}

impl fmt::Debug for CollectionEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionEntry")
            .field("handle", &self.inner.handle)
            .field("navigation", &self.metadata().name())
            .finish_non_exhaustive()
    }
}

/// Entry for a navigation of either kind.
#[derive(Debug)]
pub enum NavigationEntry<'a> {
    /// A reference navigation.
    Reference(ReferenceEntry<'a>),
    /// A collection or skip navigation.
    Collection(CollectionEntry<'a>),
}

impl<'a> NavigationEntry<'a> {
    pub(crate) fn new(
        sm: &'a mut StateManager,
        handle: EntityHandle,
        entity_type: EntityTypeId,
        navigation: usize,
        is_collection: bool,
    ) -> Self {
        if is_collection {
            NavigationEntry::Collection(CollectionEntry::new(sm, handle, entity_type, navigation))
        } else {
            NavigationEntry::Reference(ReferenceEntry::new(sm, handle, entity_type, navigation))
        }
    }

    /// Navigation metadata.
    #[must_use]
    pub fn metadata(&self) -> &Navigation {
        match self {
            NavigationEntry::Reference(r) => r.metadata(),
            NavigationEntry::Collection(c) => c.metadata(),
        }
    }

    /// Returns true if the relationship behind the navigation has changed.
    pub fn is_modified(&self) -> TrackResult<bool> {
        match self {
            NavigationEntry::Reference(r) => r.is_modified(),
            NavigationEntry::Collection(c) => c.is_modified(),
        }
    }

    /// Marks the foreign keys behind the navigation as modified or not.
    pub fn set_is_modified(&mut self, modified: bool) -> TrackResult<()> {
        match self {
            NavigationEntry::Reference(r) => r.set_is_modified(modified),
            NavigationEntry::Collection(c) => c.set_is_modified(modified),
        }
    }
}
