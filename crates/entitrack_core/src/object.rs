//! Entity instances.
//!
//! Entities live in an [`ObjectSpace`] owned by their context and are
//! addressed by [`EntityHandle`]. Two handles are the same entity exactly
//! when they are equal; key values play no part in instance identity.
//!
//! An instance stores what user code would see on a plain object: the
//! instance-backed scalar values, an indexer bag, reference navigation slots
//! and one [`ObservableHashSet`] per collection or skip navigation. Shadow
//! values are not part of the instance; they live in the tracking entry.
//!
//! Writes made through [`ObjectViewMut`] bypass the tracker. They are picked
//! up by the next change detection pass.

use crate::error::{MemberKind, TrackError, TrackResult};
use crate::model::{EntityType, EntityTypeId, Navigation, Property};
use crate::value::Value;
use entitrack_observable::ObservableHashSet;
use std::collections::BTreeMap;
use std::fmt;

/// Identity of an entity instance within one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityHandle(pub(crate) u64);

impl EntityHandle {
    /// Returns the raw handle value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One entity instance.
#[derive(Debug)]
pub struct EntityObject {
    handle: EntityHandle,
    entity_type: EntityTypeId,
    /// Instance-backed scalar slots.
    pub(crate) values: Vec<Value>,
    /// Indexer bag, keyed by property name.
    pub(crate) indexer: BTreeMap<String, Value>,
    /// One slot per navigation; only reference navigations use it.
    pub(crate) references: Vec<Option<EntityHandle>>,
    /// One set per navigation; present for collection and skip navigations.
    pub(crate) collections: Vec<Option<ObservableHashSet<EntityHandle>>>,
}

impl EntityObject {
    fn new(handle: EntityHandle, entity_type: &EntityType) -> Self {
        let mut values = vec![Value::Null; entity_type.instance_slots()];
        for property in entity_type.properties() {
            if property.storage().is_instance_backed() {
                if let Some(slot) = values.get_mut(property.slot) {
                    *slot = property.value_type().default_value(property.is_nullable());
                }
            }
        }
        let navigations = entity_type.navigations();
        Self {
            handle,
            entity_type: entity_type.id(),
            values,
            indexer: BTreeMap::new(),
            references: vec![None; navigations.len()],
            collections: navigations
                .iter()
                .map(|n| n.is_collection().then(ObservableHashSet::new))
                .collect(),
        }
    }

    /// Handle of this instance.
    #[must_use]
    pub fn handle(&self) -> EntityHandle {
        self.handle
    }

    /// Entity type the instance was created for.
    #[must_use]
    pub fn entity_type(&self) -> EntityTypeId {
        self.entity_type
    }

    pub(crate) fn reference(&self, navigation: usize) -> Option<EntityHandle> {
        self.references.get(navigation).copied().flatten()
    }

    pub(crate) fn collection(&self, navigation: usize) -> Option<&ObservableHashSet<EntityHandle>> {
        self.collections.get(navigation).and_then(Option::as_ref)
    }

    pub(crate) fn collection_mut(
        &mut self,
        navigation: usize,
    ) -> Option<&mut ObservableHashSet<EntityHandle>> {
        self.collections.get_mut(navigation).and_then(Option::as_mut)
    }
}

/// Arena of entity instances.
#[derive(Debug, Default)]
pub struct ObjectSpace {
    objects: BTreeMap<EntityHandle, EntityObject>,
    next: u64,
}

impl ObjectSpace {
    /// Creates an empty object space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new instance with default values.
    pub fn create(&mut self, entity_type: &EntityType) -> EntityHandle {
        self.next += 1;
        let handle = EntityHandle(self.next);
        self.objects
            .insert(handle, EntityObject::new(handle, entity_type));
        handle
    }

    /// Returns the instance for a handle.
    pub fn get(&self, handle: EntityHandle) -> TrackResult<&EntityObject> {
        self.objects
            .get(&handle)
            .ok_or(TrackError::UnknownEntity { handle })
    }

    /// Returns the instance for a handle, mutably.
    pub fn get_mut(&mut self, handle: EntityHandle) -> TrackResult<&mut EntityObject> {
        self.objects
            .get_mut(&handle)
            .ok_or(TrackError::UnknownEntity { handle })
    }

    /// Returns true if the handle belongs to this space.
    #[must_use]
    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.objects.contains_key(&handle)
    }

    /// Number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if no instance has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

fn instance_property<'a>(entity_type: &'a EntityType, name: &str) -> TrackResult<&'a Property> {
    let property = entity_type.property_by_name(name)?;
    if property.is_shadow() {
        return Err(TrackError::invalid_operation(format!(
            "the property '{}.{}' is a shadow property and can only be accessed through its entry",
            entity_type.name(),
            name
        )));
    }
    Ok(property)
}

fn navigation_of<'a>(
    entity_type: &'a EntityType,
    name: &str,
    collection: bool,
) -> TrackResult<&'a Navigation> {
    let navigation = entity_type.navigation_by_name(name)?;
    if navigation.is_collection() != collection {
        let expected = if collection { "collection" } else { "reference" };
        return Err(TrackError::invalid_operation(format!(
            "the navigation '{}.{}' is not a {expected} navigation",
            entity_type.name(),
            name
        )));
    }
    Ok(navigation)
}

/// Read access to an instance, as user code would see it.
#[derive(Debug, Clone, Copy)]
pub struct ObjectView<'a> {
    entity_type: &'a EntityType,
    object: &'a EntityObject,
}

impl<'a> ObjectView<'a> {
    pub(crate) fn new(entity_type: &'a EntityType, object: &'a EntityObject) -> Self {
        Self {
            entity_type,
            object,
        }
    }

    /// Handle of the instance.
    #[must_use]
    pub fn handle(&self) -> EntityHandle {
        self.object.handle
    }

    /// Entity type metadata.
    #[must_use]
    pub fn entity_type(&self) -> &'a EntityType {
        self.entity_type
    }

    /// Reads an instance-backed property.
    pub fn get(&self, name: &str) -> TrackResult<Value> {
        let property = instance_property(self.entity_type, name)?;
        Ok(property.accessor().read(self.object, &[]))
    }

    /// Reads a reference navigation.
    pub fn reference(&self, name: &str) -> TrackResult<Option<EntityHandle>> {
        let navigation = navigation_of(self.entity_type, name, false)?;
        Ok(self.object.reference(navigation.index()))
    }

    /// Reads a collection or skip navigation.
    pub fn collection(&self, name: &str) -> TrackResult<&'a ObservableHashSet<EntityHandle>> {
        let navigation = navigation_of(self.entity_type, name, true)?;
        self.object.collection(navigation.index()).ok_or_else(|| {
            TrackError::unknown_member(MemberKind::Navigation, name, self.entity_type.name())
        })
    }
}

/// Write access to an instance that bypasses the tracker.
#[derive(Debug)]
pub struct ObjectViewMut<'a> {
    entity_type: &'a EntityType,
    object: &'a mut EntityObject,
}

impl<'a> ObjectViewMut<'a> {
    pub(crate) fn new(entity_type: &'a EntityType, object: &'a mut EntityObject) -> Self {
        Self {
            entity_type,
            object,
        }
    }

    /// Handle of the instance.
    #[must_use]
    pub fn handle(&self) -> EntityHandle {
        self.object.handle
    }

    /// Reads an instance-backed property.
    pub fn get(&self, name: &str) -> TrackResult<Value> {
        let property = instance_property(self.entity_type, name)?;
        Ok(property.accessor().read(self.object, &[]))
    }

    /// Writes an instance-backed property.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> TrackResult<&mut Self> {
        let value = value.into();
        let property = instance_property(self.entity_type, name)?;
        check_assignable(self.entity_type, property, &value)?;
        property.accessor().write(self.object, &mut [], value);
        Ok(self)
    }

    /// Reads a reference navigation.
    pub fn reference(&self, name: &str) -> TrackResult<Option<EntityHandle>> {
        let navigation = navigation_of(self.entity_type, name, false)?;
        Ok(self.object.reference(navigation.index()))
    }

    /// Writes a reference navigation.
    pub fn set_reference(
        &mut self,
        name: &str,
        target: Option<EntityHandle>,
    ) -> TrackResult<&mut Self> {
        let navigation = navigation_of(self.entity_type, name, false)?;
        self.object.references[navigation.index()] = target;
        Ok(self)
    }

    /// Returns a collection or skip navigation for mutation.
    ///
    /// Membership changes raise notifications that the tracker consumes on
    /// the next change detection pass.
    pub fn collection_mut(&mut self, name: &str) -> TrackResult<&mut ObservableHashSet<EntityHandle>> {
        let entity_type = self.entity_type;
        let index = navigation_of(entity_type, name, true)?.index();
        self.object.collection_mut(index).ok_or_else(|| {
            TrackError::unknown_member(MemberKind::Navigation, name, entity_type.name())
        })
    }
}

/// Checks that a value can be stored in a property.
pub(crate) fn check_assignable(
    entity_type: &EntityType,
    property: &Property,
    value: &Value,
) -> TrackResult<()> {
    if !value.is_compatible_with(property.value_type()) {
        return Err(TrackError::WrongGenericPropertyType {
            property: property.name().to_string(),
            declaring_type: entity_type.name().to_string(),
            expected: property.value_type().name().to_string(),
            actual: value.type_name().to_string(),
        });
    }
    if value.is_null() && !property.is_nullable() {
        return Err(TrackError::invalid_operation(format!(
            "the property '{}.{}' does not accept null",
            entity_type.name(),
            property.name()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelBuilder;
    use crate::value::ValueType;

    fn model() -> std::sync::Arc<crate::model::Model> {
        let mut builder = ModelBuilder::new();
        builder
            .entity("Blog", |e| {
                e.property("Id", ValueType::Int);
                e.property("Title", ValueType::Text).nullable();
                e.indexer_property("Rating", ValueType::Int);
            })
            .entity("Post", |e| {
                e.property("Id", ValueType::Int);
            });
        builder.has_many("Blog", Some("Posts"), "Post", Some("Blog"));
        builder.build().unwrap()
    }

    #[test]
    fn new_instances_hold_default_values() {
        let model = model();
        let blog_type = model.find_entity_type("Blog").unwrap();
        let mut space = ObjectSpace::new();
        let blog = space.create(blog_type);

        let view = ObjectView::new(blog_type, space.get(blog).unwrap());
        assert_eq!(view.get("Id").unwrap(), Value::Int(0));
        assert_eq!(view.get("Title").unwrap(), Value::Null);
        assert_eq!(view.get("Rating").unwrap(), Value::Int(0));
        assert!(view.collection("Posts").unwrap().is_empty());
    }

    #[test]
    fn shadow_properties_are_not_visible_on_the_instance() {
        let model = model();
        let post_type = model.find_entity_type("Post").unwrap();
        let mut space = ObjectSpace::new();
        let post = space.create(post_type);

        let view = ObjectView::new(post_type, space.get(post).unwrap());
        assert!(matches!(
            view.get("BlogId").unwrap_err(),
            TrackError::InvalidOperation { .. }
        ));
    }

    #[test]
    fn writes_are_type_checked() {
        let model = model();
        let blog_type = model.find_entity_type("Blog").unwrap();
        let mut space = ObjectSpace::new();
        let blog = space.create(blog_type);

        let mut view = ObjectViewMut::new(blog_type, space.get_mut(blog).unwrap());
        view.set("Id", 7).unwrap().set("Title", "Rust").unwrap();
        assert_eq!(view.get("Title").unwrap(), Value::from("Rust"));

        let err = view.set("Id", "seven").unwrap_err();
        assert!(matches!(err, TrackError::WrongGenericPropertyType { .. }));
        assert!(view.set("Id", Value::Null).is_err());
    }

    #[test]
    fn navigation_kinds_are_enforced() {
        let model = model();
        let post_type = model.find_entity_type("Post").unwrap();
        let blog_type = model.find_entity_type("Blog").unwrap();
        let mut space = ObjectSpace::new();
        let blog = space.create(blog_type);
        let post = space.create(post_type);

        let mut view = ObjectViewMut::new(post_type, space.get_mut(post).unwrap());
        view.set_reference("Blog", Some(blog)).unwrap();
        assert_eq!(view.reference("Blog").unwrap(), Some(blog));
        assert!(view.collection_mut("Blog").is_err());
    }

    #[test]
    fn unknown_handles_are_reported() {
        let space = ObjectSpace::new();
        let err = space.get(EntityHandle(42)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "no entity instance with handle #42 exists in this context"
        );
    }
}
