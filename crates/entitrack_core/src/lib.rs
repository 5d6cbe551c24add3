//! # entitrack Core
//!
//! Change tracking for entity graphs.
//!
//! This crate provides:
//! - A metadata model ([`Model`], built with [`ModelBuilder`]) describing
//!   entity types, keys, relationships and complex properties
//! - Value comparers used for change detection and key lookups
//! - An identity map per entity type, indexed by primary, alternate and
//!   foreign keys
//! - The entry state machine (`Detached`, `Unchanged`, `Added`, `Modified`,
//!   `Deleted`) with per-property modified and temporary flags
//! - Navigation fixup keeping foreign keys, references, collections and
//!   many-to-many join entries consistent
//! - Graph traversal for attaching whole object graphs
//! - A save pipeline that hands pending changes to a [`PersistenceSink`]
//!
//! ## Threading
//!
//! A [`Context`] is single-writer and fully synchronous. The model it is
//! built over is immutable and can be shared between contexts.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod comparer;
mod config;
mod context;
mod entry;
mod error;
mod local;
mod model;
mod object;
mod persist;
mod tracker;
mod tracking;
mod value;
mod valuegen;

pub use comparer::{ComparerRole, CustomValueComparer, DefaultValueComparer, KeyComparer, ValueComparer};
pub use config::{CascadeTiming, TrackingConfig};
pub use context::Context;
pub use entry::{
    CollectionEntry, ComplexPropertyEntry, EntityEntry, MemberEntry, NavigationEntry, PropertyEntry,
    ReferenceEntry,
};
pub use error::{MemberKind, TrackError, TrackResult};
pub use local::LocalView;
pub use model::{
    ComplexProperty, ComplexTypeBuilder, DeleteBehavior, EntityType, EntityTypeBuilder, EntityTypeId,
    ForeignKey, ForeignKeyId, JoinInfo, Key, ManyToManyBuilder, Model, ModelBuilder, Navigation,
    NavigationKind, Property, PropertyAccessor, PropertyBuilder, PropertyStorage, RelationshipBuilder,
};
pub use object::{EntityHandle, EntityObject, ObjectSpace, ObjectView, ObjectViewMut};
pub use persist::{ChangeBatch, GeneratedValues, PendingChange, PersistenceSink};
pub use tracker::{DefaultDiscoveryPolicy, DiscoveredEntity, DiscoveryPolicy, KeyValueEntityTracker};
pub use tracking::{EntityState, GraphNode};
pub use value::{EqualitySemantics, ScalarType, StructuredValue, Value, ValueType};
pub use valuegen::{
    GenerationContext, GuidValueGenerator, TemporaryIntValueGenerator, TemporaryLongValueGenerator,
    ValueGenerator, ValueGeneratorSelector,
};
