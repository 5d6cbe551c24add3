//! Fixture models and graph helpers.
//!
//! Every fixture returns a finalized model; the helpers below build and
//! link untracked instances the way user code would, bypassing the tracker.

use entitrack_core::{Context, EntityHandle, Model, ModelBuilder, Value, ValueType};
use std::sync::Arc;

/// Categories, products and product details.
///
/// - `Category` 1-* `Product` through the nullable `Product.CategoryId`
/// - `Product` 1-1 `ProductDetails`, where `ProductDetails.Id` is both the
///   primary key and the foreign key to its product
pub fn category_model() -> Arc<Model> {
    let mut builder = ModelBuilder::new();
    builder
        .entity("Category", |e| {
            e.property("Id", ValueType::Int);
            e.property("Name", ValueType::Text).nullable();
        })
        .entity("Product", |e| {
            e.property("Id", ValueType::Int);
            e.property("CategoryId", ValueType::Int).nullable();
            e.property("Name", ValueType::Text).nullable();
        })
        .entity("ProductDetails", |e| {
            e.property("Id", ValueType::Int);
            e.property("Tag", ValueType::Text).nullable();
        });
    builder.has_many("Category", Some("Products"), "Product", Some("Category"));
    builder
        .has_one("Product", Some("Details"), "ProductDetails", Some("Product"))
        .foreign_key(&["Id"]);
    builder.build().expect("category model")
}

/// Key shapes for lookup tests.
///
/// - `IntKey`: `int` primary key
/// - `StringKey`: `string` primary key
/// - `CompositeKey`: `(Id1: int, Id2: string, Id3: Guid)` primary key
/// - `AltKey`: `int` primary key plus alternate key `AlternateId`
/// - `Dependent`: optional dependent of `IntKey` through `IntKeyId`
pub fn find_model() -> Arc<Model> {
    let mut builder = ModelBuilder::new();
    builder
        .entity("IntKey", |e| {
            e.property("Id", ValueType::Int);
            e.property("Foo", ValueType::Text).nullable();
        })
        .entity("StringKey", |e| {
            e.property("Id", ValueType::Text);
            e.property("Foo", ValueType::Text).nullable();
        })
        .entity("CompositeKey", |e| {
            e.property("Id1", ValueType::Int);
            e.property("Id2", ValueType::Text);
            e.property("Id3", ValueType::Guid);
            e.property("Foo", ValueType::Text).nullable();
            e.has_key(&["Id1", "Id2", "Id3"]);
        })
        .entity("AltKey", |e| {
            e.property("Id", ValueType::Int);
            e.property("AlternateId", ValueType::Int);
            e.property("Foo", ValueType::Text).nullable();
            e.has_alternate_key(&["AlternateId"]);
        })
        .entity("Dependent", |e| {
            e.property("Id", ValueType::Int);
            e.property("IntKeyId", ValueType::Int).nullable();
            e.property("Foo", ValueType::Text).nullable();
        });
    builder.has_many("IntKey", Some("Dependents"), "Dependent", Some("IntKey"));
    builder.build().expect("find model")
}

/// `Garcia` 1-* `Kid` through the nullable `Kid.GarciaId`.
pub fn garcia_model() -> Arc<Model> {
    let mut builder = ModelBuilder::new();
    builder
        .entity("Garcia", |e| {
            e.property("Id", ValueType::Int);
            e.property("Name", ValueType::Text).nullable();
        })
        .entity("Kid", |e| {
            e.property("Id", ValueType::Int);
            e.property("GarciaId", ValueType::Int).nullable();
        });
    builder.has_many("Garcia", Some("Kids"), "Kid", Some("Garcia"));
    builder.build().expect("garcia model")
}

/// `Cherry` *-* `Chunky` through the explicit join type `CherryChunky`,
/// which has its own `Id` key and the foreign keys `CherryId` and
/// `ChunkyId`.
pub fn cherry_model() -> Arc<Model> {
    let mut builder = ModelBuilder::new();
    builder
        .entity("Cherry", |e| {
            e.property("Id", ValueType::Int);
        })
        .entity("Chunky", |e| {
            e.property("Id", ValueType::Int);
        })
        .entity("CherryChunky", |e| {
            e.property("Id", ValueType::Int);
            e.property("CherryId", ValueType::Int);
            e.property("ChunkyId", ValueType::Int);
        });
    builder
        .many_to_many("Cherry", "Chunkies", "Chunky", "Cherries", "CherryChunky")
        .left_foreign_key(&["CherryId"])
        .right_foreign_key(&["ChunkyId"]);
    builder.build().expect("cherry model")
}

/// `Student` *-* `Course` through an implicit property-bag join type.
pub fn enrollment_model() -> Arc<Model> {
    let mut builder = ModelBuilder::new();
    builder
        .entity("Student", |e| {
            e.property("Id", ValueType::Int);
        })
        .entity("Course", |e| {
            e.property("Id", ValueType::Int);
        });
    builder.many_to_many("Student", "Courses", "Course", "Students", "Enrollment");
    builder.build().expect("enrollment model")
}

/// `Customer` with a nested complex property:
/// `Address { Street, City, Country { Code } }`.
pub fn complex_model() -> Arc<Model> {
    let mut builder = ModelBuilder::new();
    builder.entity("Customer", |e| {
        e.property("Id", ValueType::Int);
        e.property("Name", ValueType::Text).nullable();
        e.complex_property("Address", "Address", |c| {
            c.property("Street", ValueType::Text).nullable();
            c.property("City", ValueType::Text).nullable();
            c.complex_property("Country", "Country", |n| {
                n.property("Code", ValueType::Text).nullable();
            });
        });
    });
    builder.build().expect("complex model")
}

/// `Order` owning one `StreetAddress` (keyed by its owner) and many
/// `OrderLine`s.
pub fn owned_model() -> Arc<Model> {
    let mut builder = ModelBuilder::new();
    builder
        .entity("Order", |e| {
            e.property("Id", ValueType::Int);
        })
        .entity("StreetAddress", |e| {
            e.property("City", ValueType::Text).nullable();
        })
        .entity("OrderLine", |e| {
            e.property("Id", ValueType::Int);
            e.property("Sku", ValueType::Text).nullable();
        });
    builder.owns_one("Order", "ShippingAddress", "StreetAddress", None);
    builder.owns_many("Order", "Lines", "OrderLine", None);
    builder.build().expect("owned model")
}

/// Two mappings of one `Tag` shape: `Tags#Post` and `Tags#Blog`, each
/// keyed by `int` `Id`.
pub fn shared_type_model() -> Arc<Model> {
    let mut builder = ModelBuilder::new();
    for name in ["Tags#Post", "Tags#Blog"] {
        builder.shared_type_entity(name, "Tag", |e| {
            e.property("Id", ValueType::Int);
            e.property("Label", ValueType::Text).nullable();
        });
    }
    builder.build().expect("shared type model")
}

/// Creates an untracked instance and writes instance-backed properties.
pub fn new_entity(ctx: &mut Context, entity_type: &str, values: &[(&str, Value)]) -> EntityHandle {
    let handle = ctx.create(entity_type).expect("known entity type");
    let mut object = ctx.object_mut(handle).expect("fresh instance");
    for (name, value) in values {
        object.set(name, value.clone()).expect("assignable value");
    }
    handle
}

/// Adds `member` to a collection navigation without the tracker's knowledge.
pub fn push(ctx: &mut Context, owner: EntityHandle, navigation: &str, member: EntityHandle) {
    ctx.object_mut(owner)
        .expect("known instance")
        .collection_mut(navigation)
        .expect("collection navigation")
        .insert(member);
}

/// Points a reference navigation without the tracker's knowledge.
pub fn point(ctx: &mut Context, owner: EntityHandle, navigation: &str, target: Option<EntityHandle>) {
    ctx.object_mut(owner)
        .expect("known instance")
        .set_reference(navigation, target)
        .expect("reference navigation");
}

/// An untracked category with `products` products, ids starting at 1.
///
/// Returns the category followed by the products.
pub fn category_with_products(ctx: &mut Context, category_id: i32, products: i32) -> (EntityHandle, Vec<EntityHandle>) {
    let category = new_entity(ctx, "Category", &[("Id", Value::Int(category_id))]);
    let mut handles = Vec::new();
    for id in 1..=products {
        let product = new_entity(ctx, "Product", &[("Id", Value::Int(id))]);
        push(ctx, category, "Products", product);
        handles.push(product);
    }
    (category, handles)
}
