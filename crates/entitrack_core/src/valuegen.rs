//! Value generation for properties left at their sentinel on add.
//!
//! A generator either produces permanent values (a new GUID is as good as
//! anything the store would assign) or temporary placeholders that the
//! persistence sink replaces on save.

use crate::model::{EntityType, EntityTypeId, Property};
use crate::object::EntityHandle;
use crate::value::{Value, ValueType};
use std::collections::hash_map::{Entry, HashMap};
use std::fmt;
use uuid::Uuid;

/// What a generator knows about the value it is asked for.
#[derive(Debug, Clone, Copy)]
pub struct GenerationContext<'a> {
    /// Entity type of the entry being added.
    pub entity_type: &'a EntityType,
    /// Property receiving the value.
    pub property: &'a Property,
    /// Instance receiving the value.
    pub handle: EntityHandle,
}

/// Produces values for one property.
pub trait ValueGenerator: fmt::Debug + Send {
    /// Returns the next value.
    fn next(&mut self, context: &GenerationContext<'_>) -> Value;

    /// Returns true if generated values are placeholders.
    fn generates_temporary_values(&self) -> bool;
}

/// Generates random (v4) GUIDs. Values are permanent.
#[derive(Debug, Default, Clone, Copy)]
pub struct GuidValueGenerator;

impl ValueGenerator for GuidValueGenerator {
    fn next(&mut self, _context: &GenerationContext<'_>) -> Value {
        Value::Guid(Uuid::new_v4())
    }

    fn generates_temporary_values(&self) -> bool {
        false
    }
}

/// Generates decreasing negative `int` placeholders.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemporaryIntValueGenerator {
    current: i32,
}

impl ValueGenerator for TemporaryIntValueGenerator {
    fn next(&mut self, _context: &GenerationContext<'_>) -> Value {
        self.current = self.current.wrapping_sub(1);
        Value::Int(self.current)
    }

    fn generates_temporary_values(&self) -> bool {
        true
    }
}

/// Generates decreasing negative `long` placeholders.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemporaryLongValueGenerator {
    current: i64,
}

impl ValueGenerator for TemporaryLongValueGenerator {
    fn next(&mut self, _context: &GenerationContext<'_>) -> Value {
        self.current = self.current.wrapping_sub(1);
        Value::Long(self.current)
    }

    fn generates_temporary_values(&self) -> bool {
        true
    }
}

/// Chooses the generator for a property.
///
/// Registered overrides win; otherwise `int` and `long` properties get a
/// temporary generator and `Guid` properties a [`GuidValueGenerator`]. One
/// generator instance is kept per property, so placeholders never repeat
/// within a key space.
#[derive(Debug, Default)]
pub struct ValueGeneratorSelector {
    overrides: HashMap<(String, String), Box<dyn ValueGenerator>>,
    defaults: HashMap<(EntityTypeId, usize), Box<dyn ValueGenerator>>,
}

impl ValueGeneratorSelector {
    /// Creates a selector with no overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the generator for one property of one entity type.
    pub fn register(
        &mut self,
        entity_type: &str,
        property: &str,
        generator: impl ValueGenerator + 'static,
    ) -> &mut Self {
        self.overrides.insert(
            (entity_type.to_string(), property.to_string()),
            Box::new(generator),
        );
        self
    }

    /// Generates a value, returning it with its temporary flag.
    ///
    /// Returns `None` when no generator applies to the property's type.
    pub(crate) fn generate(
        &mut self,
        entity_type: &EntityType,
        property: &Property,
        handle: EntityHandle,
    ) -> Option<(Value, bool)> {
        let context = GenerationContext {
            entity_type,
            property,
            handle,
        };
        let key = (entity_type.name().to_string(), property.name().to_string());
        let generator = match self.overrides.get_mut(&key) {
            Some(generator) => generator,
            None => match self.defaults.entry((entity_type.id(), property.index())) {
                Entry::Occupied(slot) => slot.into_mut(),
                Entry::Vacant(slot) => {
                    slot.insert(default_generator(property.value_type())?)
                }
            },
        };
        let value = generator.next(&context);
        Some((value, generator.generates_temporary_values()))
    }
}

fn default_generator(value_type: &ValueType) -> Option<Box<dyn ValueGenerator>> {
    match value_type {
        ValueType::Int => Some(Box::new(TemporaryIntValueGenerator::default())),
        ValueType::Long => Some(Box::new(TemporaryLongValueGenerator::default())),
        ValueType::Guid => Some(Box::new(GuidValueGenerator)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelBuilder;

    #[derive(Debug, Default)]
    struct Sequential(i32);

    impl ValueGenerator for Sequential {
        fn next(&mut self, _context: &GenerationContext<'_>) -> Value {
            self.0 += 1;
            Value::Int(self.0 * 100)
        }

        fn generates_temporary_values(&self) -> bool {
            false
        }
    }

    fn model() -> std::sync::Arc<crate::model::Model> {
        let mut builder = ModelBuilder::new();
        builder
            .entity("Blog", |e| {
                e.property("Id", ValueType::Int);
                e.property("Token", ValueType::Guid);
                e.property("Title", ValueType::Text).nullable();
            })
            .entity("Post", |e| {
                e.property("Id", ValueType::Long);
            });
        builder.build().unwrap()
    }

    #[test]
    fn temporary_values_decrease_per_property() {
        let model = model();
        let blog = model.find_entity_type("Blog").unwrap();
        let post = model.find_entity_type("Post").unwrap();
        let mut selector = ValueGeneratorSelector::new();

        let first = selector.generate(blog, blog.property(0), EntityHandle(1));
        let second = selector.generate(blog, blog.property(0), EntityHandle(2));
        assert_eq!(first, Some((Value::Int(-1), true)));
        assert_eq!(second, Some((Value::Int(-2), true)));

        let long = selector.generate(post, post.property(0), EntityHandle(3));
        assert_eq!(long, Some((Value::Long(-1), true)));
    }

    #[test]
    fn guids_are_permanent_and_text_has_no_default() {
        let model = model();
        let blog = model.find_entity_type("Blog").unwrap();
        let mut selector = ValueGeneratorSelector::new();

        let (value, temporary) = selector
            .generate(blog, blog.property(1), EntityHandle(1))
            .unwrap();
        assert!(!temporary);
        assert!(value.as_guid().is_some_and(|g| !g.is_nil()));
        assert!(selector
            .generate(blog, blog.property(2), EntityHandle(1))
            .is_none());
    }

    #[test]
    fn overrides_win() {
        let model = model();
        let blog = model.find_entity_type("Blog").unwrap();
        let mut selector = ValueGeneratorSelector::new();
        selector.register("Blog", "Id", Sequential::default());

        assert_eq!(
            selector.generate(blog, blog.property(0), EntityHandle(1)),
            Some((Value::Int(100), false))
        );
    }
}
