//! Fluent model construction.
//!
//! Conventions applied by [`ModelBuilder::build`]:
//! - the primary key is the declared key, else a property named `Id`, else
//!   `<TypeName>Id`; owned types without a declared key use the foreign key
//!   to their owner;
//! - foreign key properties default to `<DependentNavigation><KeyProperty>`
//!   (or `<PrincipalType><KeyProperty>` without a dependent navigation) and
//!   are created as shadow properties when absent;
//! - a relationship is required when all its foreign key properties are
//!   non-nullable, and required relationships cascade deletes;
//! - a single-column primary key of type `int`, `long` or `Guid` that is not
//!   also a foreign key is value-generated on add;
//! - many-to-many relationships without a declared join type get a shared
//!   property-bag join type keyed by both foreign keys.

use super::{
    ComplexProperty, DeleteBehavior, EntityType, EntityTypeId, ForeignKey, ForeignKeyId, JoinInfo,
    Key, Model, Navigation, NavigationKind, Property, PropertyStorage,
};
use crate::comparer::{check_comparer, DefaultValueComparer, KeyComparer, ValueComparer};
use crate::error::{MemberKind, TrackError, TrackResult};
use crate::value::ValueType;
use std::collections::HashMap;
use std::sync::Arc;

/// Instance shape name given to implicit many-to-many join types.
pub(crate) const PROPERTY_BAG: &str = "PropertyBag";

/// Builds a [`Model`].
///
/// # Example
///
/// ```
/// use entitrack_core::{ModelBuilder, ValueType};
///
/// let mut builder = ModelBuilder::new();
/// builder
///     .entity("Category", |e| {
///         e.property("Id", ValueType::Int);
///     })
///     .entity("Product", |e| {
///         e.property("Id", ValueType::Int);
///         e.property("CategoryId", ValueType::Int).nullable();
///     });
/// builder.has_many("Category", Some("Products"), "Product", Some("Category"));
///
/// let model = builder.build().unwrap();
/// let product = model.find_entity_type("Product").unwrap();
/// assert_eq!(product.declared_foreign_keys().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ModelBuilder {
    entities: Vec<EntityTypeBuilder>,
    relationships: Vec<RelationshipBuilder>,
    many_to_many: Vec<ManyToManyBuilder>,
}

impl ModelBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an entity type whose instance shape has the same name.
    pub fn entity(
        &mut self,
        name: &str,
        configure: impl FnOnce(&mut EntityTypeBuilder),
    ) -> &mut Self {
        self.shared_type_entity(name, name, configure)
    }

    /// Declares an entity type mapping an instance shape under its own name.
    ///
    /// Several mappings may share one `clr_name`; each has an independent
    /// key space.
    pub fn shared_type_entity(
        &mut self,
        name: &str,
        clr_name: &str,
        configure: impl FnOnce(&mut EntityTypeBuilder),
    ) -> &mut Self {
        let mut builder = EntityTypeBuilder::new(name, clr_name);
        configure(&mut builder);
        self.entities.push(builder);
        self
    }

    /// Declares a one-to-many relationship.
    pub fn has_many(
        &mut self,
        principal: &str,
        collection: Option<&str>,
        dependent: &str,
        reference: Option<&str>,
    ) -> &mut RelationshipBuilder {
        self.relationship(principal, collection, dependent, reference, false, false)
    }

    /// Declares a one-to-one relationship.
    pub fn has_one(
        &mut self,
        principal: &str,
        reference: Option<&str>,
        dependent: &str,
        inverse: Option<&str>,
    ) -> &mut RelationshipBuilder {
        self.relationship(principal, reference, dependent, inverse, true, false)
    }

    /// Declares an owned one-to-one dependent.
    pub fn owns_one(
        &mut self,
        owner: &str,
        navigation: &str,
        owned: &str,
        inverse: Option<&str>,
    ) -> &mut RelationshipBuilder {
        self.relationship(owner, Some(navigation), owned, inverse, true, true)
    }

    /// Declares an owned collection of dependents.
    pub fn owns_many(
        &mut self,
        owner: &str,
        navigation: &str,
        owned: &str,
        inverse: Option<&str>,
    ) -> &mut RelationshipBuilder {
        self.relationship(owner, Some(navigation), owned, inverse, false, true)
    }

    /// Declares a many-to-many relationship through `join`.
    ///
    /// If no entity type named `join` is declared, a property-bag join type
    /// is created.
    pub fn many_to_many(
        &mut self,
        left: &str,
        left_navigation: &str,
        right: &str,
        right_navigation: &str,
        join: &str,
    ) -> &mut ManyToManyBuilder {
        self.many_to_many.push(ManyToManyBuilder {
            left: left.to_string(),
            left_navigation: left_navigation.to_string(),
            right: right.to_string(),
            right_navigation: right_navigation.to_string(),
            join: join.to_string(),
            left_foreign_key: None,
            right_foreign_key: None,
        });
        let last = self.many_to_many.len() - 1;
        &mut self.many_to_many[last]
    }

    fn relationship(
        &mut self,
        principal: &str,
        principal_navigation: Option<&str>,
        dependent: &str,
        dependent_navigation: Option<&str>,
        unique: bool,
        ownership: bool,
    ) -> &mut RelationshipBuilder {
        self.relationships.push(RelationshipBuilder {
            principal: principal.to_string(),
            dependent: dependent.to_string(),
            principal_navigation: principal_navigation.map(str::to_string),
            dependent_navigation: dependent_navigation.map(str::to_string),
            unique,
            ownership,
            foreign_key: None,
            principal_key: None,
            required: None,
            delete_behavior: None,
        });
        let last = self.relationships.len() - 1;
        &mut self.relationships[last]
    }

    /// Validates the configuration and freezes it into a [`Model`].
    pub fn build(self) -> TrackResult<Arc<Model>> {
        let mut drafts: Vec<TypeDraft> = Vec::with_capacity(self.entities.len());
        let mut names = HashMap::new();

        for builder in self.entities {
            if names.contains_key(&builder.name) {
                return Err(TrackError::invalid_model(format!(
                    "entity type '{}' is declared more than once",
                    builder.name
                )));
            }
            let id = EntityTypeId(drafts.len());
            names.insert(builder.name.clone(), id);
            drafts.push(TypeDraft::from_builder(builder)?);
        }

        for relationship in &self.relationships {
            if let Some(&id) = names.get(&relationship.dependent) {
                if relationship.ownership {
                    drafts[id.0].owned = true;
                }
            }
        }

        for draft in &mut drafts {
            draft.apply_key_convention()?;
        }

        let mut foreign_keys: Vec<ForeignKeyDraft> = Vec::new();

        for relationship in &self.relationships {
            let principal = lookup(&names, &relationship.principal)?;
            let dependent = lookup(&names, &relationship.dependent)?;
            let fk = ForeignKeyId(foreign_keys.len());

            let principal_key = match &relationship.principal_key {
                Some(names) => {
                    let properties = drafts[principal.0].resolve(names)?;
                    drafts[principal.0].key_ref(properties)
                }
                None => KeyRef::Primary,
            };
            let principal_properties = drafts[principal.0].key_properties(principal_key)?;
            let principal_columns: Vec<(String, ValueType)> = principal_properties
                .iter()
                .map(|&p| {
                    let prop = &drafts[principal.0].properties[p];
                    (prop.name.clone(), prop.value_type.clone())
                })
                .collect();

            let fk_names: Vec<String> = match &relationship.foreign_key {
                Some(names) => names.clone(),
                None => {
                    let prefix = relationship
                        .dependent_navigation
                        .clone()
                        .unwrap_or_else(|| drafts[principal.0].clr_name.clone());
                    principal_columns
                        .iter()
                        .map(|(name, _)| format!("{prefix}{name}"))
                        .collect()
                }
            };
            if fk_names.len() != principal_columns.len() {
                return Err(TrackError::invalid_model(format!(
                    "the relationship from '{}' to '{}' has {} foreign key properties but the \
                     principal key has {}",
                    relationship.dependent,
                    relationship.principal,
                    fk_names.len(),
                    principal_columns.len()
                )));
            }

            let shadow_nullable = !(relationship.ownership || relationship.required == Some(true));
            let mut fk_properties = Vec::with_capacity(fk_names.len());
            for (name, (principal_name, value_type)) in fk_names.iter().zip(&principal_columns) {
                let draft = &mut drafts[dependent.0];
                let index = match draft.find(name) {
                    Some(index) => index,
                    None => draft.add_shadow(name, value_type.clone(), shadow_nullable),
                };
                let property = &draft.properties[index];
                if property.value_type.name() != value_type.name() {
                    return Err(TrackError::invalid_model(format!(
                        "foreign key property '{}.{}' of type '{}' does not match principal key \
                         property '{}.{}' of type '{}'",
                        draft.name,
                        name,
                        property.value_type,
                        relationship.principal,
                        principal_name,
                        value_type
                    )));
                }
                fk_properties.push(index);
            }

            let required = relationship.required.unwrap_or_else(|| {
                relationship.ownership
                    || fk_properties
                        .iter()
                        .all(|&p| !drafts[dependent.0].properties[p].nullable)
            });
            let delete_behavior = relationship.delete_behavior.unwrap_or(if required {
                DeleteBehavior::Cascade
            } else {
                DeleteBehavior::ClientSetNull
            });

            if relationship.ownership && drafts[dependent.0].primary_key.is_none() {
                drafts[dependent.0].primary_key = Some(fk_properties.clone());
            }

            let dependent_to_principal = match &relationship.dependent_navigation {
                Some(name) => Some(drafts[dependent.0].add_navigation(Navigation {
                    index: 0,
                    name: name.clone(),
                    declaring_type: dependent,
                    target_type: principal,
                    kind: NavigationKind::Reference,
                    foreign_key: fk,
                    on_dependent: true,
                    inverse: None,
                    join: None,
                })?),
                None => None,
            };
            let principal_to_dependent = match &relationship.principal_navigation {
                Some(name) => Some(drafts[principal.0].add_navigation(Navigation {
                    index: 0,
                    name: name.clone(),
                    declaring_type: principal,
                    target_type: dependent,
                    kind: if relationship.unique {
                        NavigationKind::Reference
                    } else {
                        NavigationKind::Collection
                    },
                    foreign_key: fk,
                    on_dependent: false,
                    inverse: None,
                    join: None,
                })?),
                None => None,
            };
            if let (Some(d), Some(p)) = (dependent_to_principal, principal_to_dependent) {
                drafts[dependent.0].navigations[d].inverse = Some(p);
                drafts[principal.0].navigations[p].inverse = Some(d);
            }

            foreign_keys.push(ForeignKeyDraft {
                dependent_type: dependent,
                principal_type: principal,
                properties: fk_properties,
                principal_key,
                dependent_to_principal,
                principal_to_dependent,
                unique: relationship.unique,
                required,
                delete_behavior,
                ownership: relationship.ownership,
            });
        }

        for many in &self.many_to_many {
            let left = lookup(&names, &many.left)?;
            let right = lookup(&names, &many.right)?;
            let join = match names.get(&many.join) {
                Some(&id) => id,
                None => {
                    let id = EntityTypeId(drafts.len());
                    names.insert(many.join.clone(), id);
                    drafts.push(TypeDraft::empty(&many.join, PROPERTY_BAG));
                    id
                }
            };

            let mut join_columns = Vec::new();
            let mut fk_ids = Vec::with_capacity(2);
            for (target, explicit, navigation_prefix) in [
                (left, &many.left_foreign_key, &many.right_navigation),
                (right, &many.right_foreign_key, &many.left_navigation),
            ] {
                let key_properties = drafts[target.0].key_properties(KeyRef::Primary)?;
                let columns: Vec<(String, ValueType)> = key_properties
                    .iter()
                    .map(|&p| {
                        let prop = &drafts[target.0].properties[p];
                        (prop.name.clone(), prop.value_type.clone())
                    })
                    .collect();
                let fk_names: Vec<String> = match explicit {
                    Some(names) => names.clone(),
                    None => columns
                        .iter()
                        .map(|(name, _)| format!("{navigation_prefix}{name}"))
                        .collect(),
                };
                if fk_names.len() != columns.len() {
                    return Err(TrackError::invalid_model(format!(
                        "join type '{}' has {} foreign key properties to '{}' but its key has {}",
                        many.join,
                        fk_names.len(),
                        drafts[target.0].name,
                        columns.len()
                    )));
                }
                let mut properties = Vec::with_capacity(fk_names.len());
                for (name, (_, value_type)) in fk_names.iter().zip(&columns) {
                    let draft = &mut drafts[join.0];
                    let index = match draft.find(name) {
                        Some(index) => index,
                        None => draft.add_shadow(name, value_type.clone(), false),
                    };
                    if draft.properties[index].value_type.name() != value_type.name() {
                        return Err(TrackError::invalid_model(format!(
                            "join property '{}.{}' does not match the key type '{}'",
                            many.join, name, value_type
                        )));
                    }
                    properties.push(index);
                }
                join_columns.extend(properties.iter().copied());
                fk_ids.push(ForeignKeyId(foreign_keys.len()));
                foreign_keys.push(ForeignKeyDraft {
                    dependent_type: join,
                    principal_type: target,
                    properties,
                    principal_key: KeyRef::Primary,
                    dependent_to_principal: None,
                    principal_to_dependent: None,
                    unique: false,
                    required: true,
                    delete_behavior: DeleteBehavior::Cascade,
                    ownership: false,
                });
            }
            if drafts[join.0].primary_key.is_none() {
                drafts[join.0].primary_key = Some(join_columns);
            }

            let (to_left, to_right) = (fk_ids[0], fk_ids[1]);
            let left_nav = drafts[left.0].add_navigation(Navigation {
                index: 0,
                name: many.left_navigation.clone(),
                declaring_type: left,
                target_type: right,
                kind: NavigationKind::Skip,
                foreign_key: to_left,
                on_dependent: false,
                inverse: None,
                join: Some(JoinInfo {
                    join_type: join,
                    to_declaring: to_left,
                    to_target: to_right,
                }),
            })?;
            let right_nav = drafts[right.0].add_navigation(Navigation {
                index: 0,
                name: many.right_navigation.clone(),
                declaring_type: right,
                target_type: left,
                kind: NavigationKind::Skip,
                foreign_key: to_right,
                on_dependent: false,
                inverse: None,
                join: Some(JoinInfo {
                    join_type: join,
                    to_declaring: to_right,
                    to_target: to_left,
                }),
            })?;
            drafts[left.0].navigations[left_nav].inverse = Some(right_nav);
            drafts[right.0].navigations[right_nav].inverse = Some(left_nav);
        }

        finish(drafts, foreign_keys, names)
    }
}

/// Configures one entity type.
#[derive(Debug)]
pub struct EntityTypeBuilder {
    name: String,
    clr_name: String,
    owned: bool,
    properties: Vec<PropertyBuilder>,
    complex: Vec<ComplexDraft>,
    primary_key: Option<Vec<String>>,
    alternate_keys: Vec<Vec<String>>,
}

impl EntityTypeBuilder {
    fn new(name: &str, clr_name: &str) -> Self {
        Self {
            name: name.to_string(),
            clr_name: clr_name.to_string(),
            owned: false,
            properties: Vec::new(),
            complex: Vec::new(),
            primary_key: None,
            alternate_keys: Vec::new(),
        }
    }

    /// Adds an instance-backed property.
    pub fn property(&mut self, name: &str, value_type: ValueType) -> &mut PropertyBuilder {
        self.push_property(name.to_string(), value_type, PropertyStorage::ClrProperty, None)
    }

    /// Adds a property backed by a field of the instance.
    pub fn field_property(&mut self, name: &str, value_type: ValueType) -> &mut PropertyBuilder {
        self.push_property(name.to_string(), value_type, PropertyStorage::ClrField, None)
    }

    /// Adds a shadow property, stored only by the tracking entry.
    pub fn shadow_property(&mut self, name: &str, value_type: ValueType) -> &mut PropertyBuilder {
        self.push_property(name.to_string(), value_type, PropertyStorage::ShadowSlot, None)
    }

    /// Adds a property stored in the instance's indexer bag.
    pub fn indexer_property(&mut self, name: &str, value_type: ValueType) -> &mut PropertyBuilder {
        self.push_property(name.to_string(), value_type, PropertyStorage::IndexerSlot, None)
    }

    /// Declares the primary key.
    pub fn has_key(&mut self, properties: &[&str]) -> &mut Self {
        self.primary_key = Some(properties.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Declares an alternate key.
    pub fn has_alternate_key(&mut self, properties: &[&str]) -> &mut Self {
        self.alternate_keys
            .push(properties.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Marks the type as owned.
    pub fn owned(&mut self) -> &mut Self {
        self.owned = true;
        self
    }

    /// Adds a complex property whose members are configured by `configure`.
    pub fn complex_property(
        &mut self,
        name: &str,
        type_name: &str,
        configure: impl FnOnce(&mut ComplexTypeBuilder<'_>),
    ) -> &mut Self {
        let index = self.complex.len();
        self.complex.push(ComplexDraft {
            name: name.to_string(),
            path: name.to_string(),
            type_name: type_name.to_string(),
            parent: None,
        });
        let mut builder = ComplexTypeBuilder {
            entity: &mut *self,
            index,
            path: name.to_string(),
        };
        configure(&mut builder);
        self
    }

    fn push_property(
        &mut self,
        name: String,
        value_type: ValueType,
        storage: PropertyStorage,
        complex_parent: Option<usize>,
    ) -> &mut PropertyBuilder {
        self.properties.push(PropertyBuilder {
            name,
            value_type,
            nullable: false,
            storage,
            generated: None,
            comparer: None,
            key_comparer: None,
            complex_parent,
        });
        let last = self.properties.len() - 1;
        &mut self.properties[last]
    }
}

/// Configures the members of a complex property.
#[derive(Debug)]
pub struct ComplexTypeBuilder<'a> {
    entity: &'a mut EntityTypeBuilder,
    index: usize,
    path: String,
}

impl ComplexTypeBuilder<'_> {
    /// Adds a scalar member.
    pub fn property(&mut self, name: &str, value_type: ValueType) -> &mut PropertyBuilder {
        let full = format!("{}.{}", self.path, name);
        self.entity
            .push_property(full, value_type, PropertyStorage::ClrProperty, Some(self.index))
    }

    /// Adds a nested complex member.
    pub fn complex_property(
        &mut self,
        name: &str,
        type_name: &str,
        configure: impl FnOnce(&mut ComplexTypeBuilder<'_>),
    ) -> &mut Self {
        let index = self.entity.complex.len();
        let path = format!("{}.{}", self.path, name);
        self.entity.complex.push(ComplexDraft {
            name: name.to_string(),
            path: path.clone(),
            type_name: type_name.to_string(),
            parent: Some(self.index),
        });
        let mut nested = ComplexTypeBuilder {
            entity: &mut *self.entity,
            index,
            path,
        };
        configure(&mut nested);
        self
    }
}

/// Configures one property.
#[derive(Debug)]
pub struct PropertyBuilder {
    name: String,
    value_type: ValueType,
    nullable: bool,
    storage: PropertyStorage,
    generated: Option<bool>,
    comparer: Option<Arc<dyn ValueComparer>>,
    key_comparer: Option<Arc<dyn ValueComparer>>,
    complex_parent: Option<usize>,
}

impl PropertyBuilder {
    /// Allows null values.
    pub fn nullable(&mut self) -> &mut Self {
        self.nullable = true;
        self
    }

    /// Generates a value when the entity is added with the sentinel value.
    pub fn value_generated_on_add(&mut self) -> &mut Self {
        self.generated = Some(true);
        self
    }

    /// Never generates a value.
    pub fn value_generated_never(&mut self) -> &mut Self {
        self.generated = Some(false);
        self
    }

    /// Uses a custom comparer for change detection (and for keys unless
    /// [`key_comparer`](Self::key_comparer) is also set).
    pub fn comparer(&mut self, comparer: Arc<dyn ValueComparer>) -> &mut Self {
        self.comparer = Some(comparer);
        self
    }

    /// Uses a custom comparer for key lookups.
    pub fn key_comparer(&mut self, comparer: Arc<dyn ValueComparer>) -> &mut Self {
        self.key_comparer = Some(comparer);
        self
    }
}

/// Configures a one-to-one or one-to-many relationship.
#[derive(Debug)]
pub struct RelationshipBuilder {
    principal: String,
    dependent: String,
    principal_navigation: Option<String>,
    dependent_navigation: Option<String>,
    unique: bool,
    ownership: bool,
    foreign_key: Option<Vec<String>>,
    principal_key: Option<Vec<String>>,
    required: Option<bool>,
    delete_behavior: Option<DeleteBehavior>,
}

impl RelationshipBuilder {
    /// Names the foreign key properties on the dependent.
    pub fn foreign_key(&mut self, properties: &[&str]) -> &mut Self {
        self.foreign_key = Some(properties.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Names the referenced principal properties (an alternate key when
    /// they are not the primary key).
    pub fn principal_key(&mut self, properties: &[&str]) -> &mut Self {
        self.principal_key = Some(properties.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Sets whether the relationship is required.
    pub fn required(&mut self, required: bool) -> &mut Self {
        self.required = Some(required);
        self
    }

    /// Sets the delete behavior.
    pub fn on_delete(&mut self, behavior: DeleteBehavior) -> &mut Self {
        self.delete_behavior = Some(behavior);
        self
    }
}

/// Configures a many-to-many relationship.
#[derive(Debug)]
pub struct ManyToManyBuilder {
    left: String,
    left_navigation: String,
    right: String,
    right_navigation: String,
    join: String,
    left_foreign_key: Option<Vec<String>>,
    right_foreign_key: Option<Vec<String>>,
}

impl ManyToManyBuilder {
    /// Names the join properties referencing the left type's key.
    pub fn left_foreign_key(&mut self, properties: &[&str]) -> &mut Self {
        self.left_foreign_key = Some(properties.iter().map(|p| p.to_string()).collect());
        self
    }

    /// Names the join properties referencing the right type's key.
    pub fn right_foreign_key(&mut self, properties: &[&str]) -> &mut Self {
        self.right_foreign_key = Some(properties.iter().map(|p| p.to_string()).collect());
        self
    }
}

#[derive(Debug)]
struct ComplexDraft {
    name: String,
    path: String,
    type_name: String,
    parent: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyRef {
    Primary,
    Alternate(usize),
}

impl KeyRef {
    fn index(self) -> usize {
        match self {
            KeyRef::Primary => 0,
            KeyRef::Alternate(i) => i + 1,
        }
    }
}

struct ForeignKeyDraft {
    dependent_type: EntityTypeId,
    principal_type: EntityTypeId,
    properties: Vec<usize>,
    principal_key: KeyRef,
    dependent_to_principal: Option<usize>,
    principal_to_dependent: Option<usize>,
    unique: bool,
    required: bool,
    delete_behavior: DeleteBehavior,
    ownership: bool,
}

struct TypeDraft {
    name: String,
    clr_name: String,
    owned: bool,
    properties: Vec<Property>,
    generated: Vec<Option<bool>>,
    complex: Vec<ComplexProperty>,
    declared_primary_key: Option<Vec<String>>,
    primary_key: Option<Vec<usize>>,
    alternate_keys: Vec<Vec<usize>>,
    navigations: Vec<Navigation>,
    instance_slots: usize,
    shadow_slots: usize,
}

impl TypeDraft {
    fn empty(name: &str, clr_name: &str) -> Self {
        Self {
            name: name.to_string(),
            clr_name: clr_name.to_string(),
            owned: false,
            properties: Vec::new(),
            generated: Vec::new(),
            complex: Vec::new(),
            declared_primary_key: None,
            primary_key: None,
            alternate_keys: Vec::new(),
            navigations: Vec::new(),
            instance_slots: 0,
            shadow_slots: 0,
        }
    }

    fn from_builder(builder: EntityTypeBuilder) -> TrackResult<Self> {
        let mut draft = Self::empty(&builder.name, &builder.clr_name);
        draft.owned = builder.owned;
        draft.declared_primary_key = builder.primary_key;

        for property in builder.properties {
            if draft.find(&property.name).is_some() {
                return Err(TrackError::invalid_model(format!(
                    "property '{}.{}' is declared more than once",
                    draft.name, property.name
                )));
            }
            for configured in property.comparer.iter().chain(&property.key_comparer) {
                check_comparer(&**configured, &draft.name, &property.name, &property.value_type)?;
            }
            let key_comparer: Arc<dyn ValueComparer> =
                match (&property.key_comparer, &property.comparer) {
                    (Some(comparer), _) | (None, Some(comparer)) => comparer.clone(),
                    (None, None) => Arc::new(DefaultValueComparer::key(property.value_type.clone())),
                };
            let comparer: Arc<dyn ValueComparer> = match property.comparer {
                Some(comparer) => comparer,
                None => Arc::new(DefaultValueComparer::general(property.value_type.clone())),
            };
            let index = draft.push(
                property.name,
                property.value_type,
                property.nullable,
                property.storage,
                comparer,
                key_comparer,
                property.complex_parent,
            );
            draft.generated[index] = property.generated;
        }

        for (index, complex) in builder.complex.iter().enumerate() {
            let children = builder
                .complex
                .iter()
                .enumerate()
                .filter(|(_, c)| c.parent == Some(index))
                .map(|(i, _)| i)
                .collect();
            let properties = draft
                .properties
                .iter()
                .filter(|p| {
                    let mut current = p.complex_parent;
                    while let Some(c) = current {
                        if c == index {
                            return true;
                        }
                        current = builder.complex[c].parent;
                    }
                    false
                })
                .map(|p| p.index)
                .collect();
            draft.complex.push(ComplexProperty {
                index,
                name: complex.name.clone(),
                path: complex.path.clone(),
                type_name: complex.type_name.clone(),
                parent: complex.parent,
                children,
                properties,
            });
        }

        for key in builder.alternate_keys {
            let properties = draft.resolve(&key)?;
            draft.key_ref(properties);
        }
        Ok(draft)
    }

    fn push(
        &mut self,
        name: String,
        value_type: ValueType,
        nullable: bool,
        storage: PropertyStorage,
        comparer: Arc<dyn ValueComparer>,
        key_comparer: Arc<dyn ValueComparer>,
        complex_parent: Option<usize>,
    ) -> usize {
        let slot = match storage {
            PropertyStorage::ClrProperty | PropertyStorage::ClrField => {
                self.instance_slots += 1;
                self.instance_slots - 1
            }
            PropertyStorage::ShadowSlot => {
                self.shadow_slots += 1;
                self.shadow_slots - 1
            }
            PropertyStorage::IndexerSlot => 0,
        };
        let index = self.properties.len();
        self.properties.push(Property {
            index,
            name,
            value_type,
            nullable,
            storage,
            slot,
            value_generated_on_add: false,
            comparer,
            key_comparer,
            complex_parent,
            keys: Vec::new(),
            foreign_keys: Vec::new(),
        });
        self.generated.push(None);
        index
    }

    fn add_shadow(&mut self, name: &str, value_type: ValueType, nullable: bool) -> usize {
        let comparer: Arc<dyn ValueComparer> =
            Arc::new(DefaultValueComparer::general(value_type.clone()));
        let key_comparer: Arc<dyn ValueComparer> =
            Arc::new(DefaultValueComparer::key(value_type.clone()));
        self.push(
            name.to_string(),
            value_type,
            nullable,
            PropertyStorage::ShadowSlot,
            comparer,
            key_comparer,
            None,
        )
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    fn resolve(&self, names: &[String]) -> TrackResult<Vec<usize>> {
        names
            .iter()
            .map(|name| {
                self.find(name).ok_or_else(|| {
                    TrackError::unknown_member(MemberKind::Property, name, &self.name)
                })
            })
            .collect()
    }

    fn apply_key_convention(&mut self) -> TrackResult<()> {
        if let Some(names) = self.declared_primary_key.take() {
            self.primary_key = Some(self.resolve(&names)?);
            return Ok(());
        }
        let by_convention = self
            .find("Id")
            .or_else(|| self.find(&format!("{}Id", self.clr_name)));
        if let Some(index) = by_convention {
            self.primary_key = Some(vec![index]);
        }
        Ok(())
    }

    fn key_ref(&mut self, properties: Vec<usize>) -> KeyRef {
        if self.primary_key.as_ref() == Some(&properties) {
            return KeyRef::Primary;
        }
        match self.alternate_keys.iter().position(|k| *k == properties) {
            Some(i) => KeyRef::Alternate(i),
            None => {
                self.alternate_keys.push(properties);
                KeyRef::Alternate(self.alternate_keys.len() - 1)
            }
        }
    }

    fn key_properties(&self, key: KeyRef) -> TrackResult<Vec<usize>> {
        match key {
            KeyRef::Primary => self.primary_key.clone().ok_or_else(|| {
                TrackError::invalid_model(format!(
                    "entity type '{}' has no primary key at the point it is referenced",
                    self.name
                ))
            }),
            KeyRef::Alternate(i) => Ok(self.alternate_keys[i].clone()),
        }
    }

    fn add_navigation(&mut self, mut navigation: Navigation) -> TrackResult<usize> {
        if self.find(&navigation.name).is_some()
            || self.navigations.iter().any(|n| n.name == navigation.name)
        {
            return Err(TrackError::invalid_model(format!(
                "member '{}.{}' is declared more than once",
                self.name, navigation.name
            )));
        }
        navigation.index = self.navigations.len();
        self.navigations.push(navigation);
        Ok(self.navigations.len() - 1)
    }
}

fn lookup(names: &HashMap<String, EntityTypeId>, name: &str) -> TrackResult<EntityTypeId> {
    names
        .get(name)
        .copied()
        .ok_or_else(|| TrackError::unknown_member(MemberKind::EntityType, name, "<model>"))
}

fn key_comparer(properties: &[Property], columns: &[usize]) -> KeyComparer {
    KeyComparer::new(
        columns
            .iter()
            .map(|&p| properties[p].key_comparer.clone())
            .collect(),
    )
}

fn finish(
    drafts: Vec<TypeDraft>,
    foreign_keys: Vec<ForeignKeyDraft>,
    names: HashMap<String, EntityTypeId>,
) -> TrackResult<Arc<Model>> {
    let mut entity_types = Vec::with_capacity(drafts.len());
    let mut generated = Vec::with_capacity(drafts.len());

    for (i, draft) in drafts.into_iter().enumerate() {
        let Some(primary_key) = draft.primary_key else {
            return Err(TrackError::invalid_model(format!(
                "entity type '{}' requires a primary key",
                draft.name
            )));
        };
        let mut properties = draft.properties;
        let mut keys = Vec::with_capacity(1 + draft.alternate_keys.len());
        for (index, columns) in std::iter::once(primary_key)
            .chain(draft.alternate_keys)
            .enumerate()
        {
            for &p in &columns {
                properties[p].keys.push(index);
            }
            keys.push(Key {
                index,
                comparer: key_comparer(&properties, &columns),
                properties: columns,
            });
        }

        entity_types.push(EntityType {
            id: EntityTypeId(i),
            name: draft.name,
            clr_name: draft.clr_name,
            owned: draft.owned,
            properties,
            keys,
            navigations: draft.navigations,
            complex_properties: draft.complex,
            declared_foreign_keys: Vec::new(),
            referencing_foreign_keys: Vec::new(),
            instance_slots: draft.instance_slots,
            shadow_slots: draft.shadow_slots,
        });
        generated.push(draft.generated);
    }

    let mut finished = Vec::with_capacity(foreign_keys.len());
    for (i, fk) in foreign_keys.into_iter().enumerate() {
        let id = ForeignKeyId(i);
        let dependent = &mut entity_types[fk.dependent_type.0];
        for &p in &fk.properties {
            dependent.properties[p].foreign_keys.push(id);
        }
        dependent.declared_foreign_keys.push(id);
        let comparer = key_comparer(&dependent.properties, &fk.properties);
        entity_types[fk.principal_type.0]
            .referencing_foreign_keys
            .push(id);
        finished.push(ForeignKey {
            id,
            dependent_type: fk.dependent_type,
            principal_type: fk.principal_type,
            properties: fk.properties,
            principal_key: fk.principal_key.index(),
            dependent_to_principal: fk.dependent_to_principal,
            principal_to_dependent: fk.principal_to_dependent,
            unique: fk.unique,
            required: fk.required,
            delete_behavior: fk.delete_behavior,
            ownership: fk.ownership,
            comparer,
        });
    }

    // Explicit configuration wins over the generated-key convention, which
    // needs foreign key membership to be known.
    for (entity_type, flags) in entity_types.iter_mut().zip(generated) {
        let single = match entity_type.keys[0].properties[..] {
            [single] => Some(single),
            _ => None,
        };
        for (p, flag) in flags.into_iter().enumerate() {
            let property = &mut entity_type.properties[p];
            property.value_generated_on_add = flag.unwrap_or_else(|| {
                single == Some(p)
                    && property.foreign_keys.is_empty()
                    && matches!(
                        property.value_type,
                        ValueType::Int | ValueType::Long | ValueType::Guid
                    )
            });
        }
    }

    Ok(Arc::new(Model {
        entity_types,
        foreign_keys: finished,
        names,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparer::CustomValueComparer;

    fn shop() -> ModelBuilder {
        let mut builder = ModelBuilder::new();
        builder
            .entity("Category", |e| {
                e.property("Id", ValueType::Int);
                e.property("Name", ValueType::Text).nullable();
            })
            .entity("Product", |e| {
                e.property("Id", ValueType::Int);
                e.property("CategoryId", ValueType::Int).nullable();
            })
            .entity("ProductDetails", |e| {
                e.property("Id", ValueType::Int);
            });
        builder.has_many("Category", Some("Products"), "Product", Some("Category"));
        builder
            .has_one("Product", Some("Details"), "ProductDetails", Some("Product"))
            .foreign_key(&["Id"]);
        builder
    }

    #[test]
    fn conventions_resolve_keys_and_foreign_keys() {
        let model = shop().build().unwrap();
        let product = model.find_entity_type("Product").unwrap();

        assert_eq!(product.primary_key().properties(), &[0]);
        let fk = model.foreign_key(product.declared_foreign_keys()[0]);
        assert_eq!(fk.properties(), &[1]);
        assert!(!fk.is_required());
        assert_eq!(fk.delete_behavior(), DeleteBehavior::ClientSetNull);
        assert!(product.property(0).value_generated_on_add());

        let category = product.navigation_by_name("Category").unwrap();
        assert_eq!(category.kind(), NavigationKind::Reference);
        assert!(category.is_on_dependent());
        let products = model.navigation(category.target_type(), category.inverse().unwrap());
        assert_eq!(products.name(), "Products");
        assert_eq!(products.kind(), NavigationKind::Collection);
    }

    #[test]
    fn shared_primary_key_is_not_generated() {
        let model = shop().build().unwrap();
        let details = model.find_entity_type("ProductDetails").unwrap();
        let fk = model.foreign_key(details.declared_foreign_keys()[0]);

        assert!(fk.is_unique());
        assert!(fk.is_required());
        assert_eq!(fk.delete_behavior(), DeleteBehavior::Cascade);
        assert!(!details.property(0).value_generated_on_add());
    }

    #[test]
    fn missing_foreign_key_becomes_shadow_property() {
        let mut builder = ModelBuilder::new();
        builder
            .entity("Blog", |e| {
                e.property("Id", ValueType::Int);
            })
            .entity("Post", |e| {
                e.property("Id", ValueType::Int);
            });
        builder.has_many("Blog", Some("Posts"), "Post", None);
        let model = builder.build().unwrap();

        let post = model.find_entity_type("Post").unwrap();
        let fk = post.property_by_name("BlogId").unwrap();
        assert!(fk.is_shadow());
        assert!(fk.is_nullable());
        assert!(fk.is_foreign_key());
    }

    #[test]
    fn owned_types_use_foreign_key_as_primary_key() {
        let mut builder = ModelBuilder::new();
        builder
            .entity("Sweet", |e| {
                e.property("Id", ValueType::Int);
            })
            .entity("Dreams", |_| {})
            .shared_type_entity("Dreams.Are#AreMade", "AreMade", |_| {});
        builder.owns_one("Sweet", "Dreams", "Dreams", Some("Sweet"));
        builder.owns_one("Dreams", "Are", "Dreams.Are#AreMade", None);
        let model = builder.build().unwrap();

        let dreams = model.find_entity_type("Dreams").unwrap();
        assert!(dreams.is_owned());
        let pk = dreams.property(dreams.primary_key().properties()[0]);
        assert_eq!(pk.name(), "SweetId");
        assert!(pk.is_shadow());

        let are = model.find_entity_type("Dreams.Are#AreMade").unwrap();
        assert!(are.is_shared_type());
        assert_eq!(are.property(are.primary_key().properties()[0]).name(), "DreamsSweetId");
    }

    #[test]
    fn implicit_join_type_is_created() {
        let mut builder = ModelBuilder::new();
        builder
            .entity("Post", |e| {
                e.property("Id", ValueType::Int);
            })
            .entity("Tag", |e| {
                e.property("Id", ValueType::Int);
            });
        builder.many_to_many("Post", "Tags", "Tag", "Posts", "PostTag");
        let model = builder.build().unwrap();

        let join = model.find_entity_type("PostTag").unwrap();
        assert_eq!(join.clr_name(), PROPERTY_BAG);
        let names: Vec<_> = join
            .primary_key()
            .properties()
            .iter()
            .map(|&p| join.property(p).name().to_string())
            .collect();
        assert_eq!(names, ["PostsId", "TagsId"]);

        let post = model.find_entity_type("Post").unwrap();
        let tags = post.navigation_by_name("Tags").unwrap();
        assert!(tags.is_skip());
        assert_eq!(tags.join().unwrap().join_type, join.id());
    }

    #[test]
    fn complex_members_are_flattened() {
        let mut builder = ModelBuilder::new();
        builder.entity("School", |e| {
            e.property("Id", ValueType::Int);
            e.complex_property("Culture", "Culture", |c| {
                c.property("Rating", ValueType::Int);
                c.complex_property("License", "License", |l| {
                    l.property("Title", ValueType::Text).nullable();
                });
            });
        });
        let model = builder.build().unwrap();
        let school = model.find_entity_type("School").unwrap();

        let culture = school.complex_property_by_name("Culture").unwrap();
        assert_eq!(culture.properties().len(), 2);
        let license = school.complex_property_by_name("Culture.License").unwrap();
        assert_eq!(license.parent(), Some(culture.index()));
        assert!(school.find_property("Culture.License.Title").is_some());
    }

    #[test]
    fn comparer_type_mismatch_fails_build() {
        let mut builder = ModelBuilder::new();
        builder.entity("Blog", |e| {
            e.property("Id", ValueType::Int);
            e.property("Title", ValueType::Text)
                .comparer(Arc::new(CustomValueComparer::new(ValueType::Int, |a, b| a == b, |_| 0)));
        });
        let err = builder.build().unwrap_err();
        assert!(matches!(err, TrackError::ComparerTypeMismatch { .. }));
    }

    #[test]
    fn missing_primary_key_fails_build() {
        let mut builder = ModelBuilder::new();
        builder.entity("Keyless", |e| {
            e.property("Name", ValueType::Text);
        });
        assert!(matches!(
            builder.build().unwrap_err(),
            TrackError::InvalidModel { .. }
        ));
    }

    #[test]
    fn unknown_key_property_fails_build() {
        let mut builder = ModelBuilder::new();
        builder.entity("Thing", |e| {
            e.property("Id", ValueType::Int);
            e.has_alternate_key(&["Missing"]);
        });
        assert!(matches!(
            builder.build().unwrap_err(),
            TrackError::UnknownMember {
                member_kind: MemberKind::Property,
                ..
            }
        ));
    }

    #[test]
    fn alternate_principal_key_is_registered() {
        let mut builder = ModelBuilder::new();
        builder
            .entity("Account", |e| {
                e.property("Id", ValueType::Int);
                e.property("Code", ValueType::Text);
            })
            .entity("Invoice", |e| {
                e.property("Id", ValueType::Int);
                e.property("AccountCode", ValueType::Text).nullable();
            });
        builder
            .has_many("Account", Some("Invoices"), "Invoice", Some("Account"))
            .principal_key(&["Code"])
            .foreign_key(&["AccountCode"]);
        let model = builder.build().unwrap();

        let account = model.find_entity_type("Account").unwrap();
        assert_eq!(account.keys().len(), 2);
        let fk = model.foreign_key(account.referencing_foreign_keys()[0]);
        assert_eq!(fk.principal_key(), 1);
    }
}
