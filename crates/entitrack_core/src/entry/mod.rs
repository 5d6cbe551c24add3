//! Public views over tracking entries.
//!
//! An [`EntityEntry`] borrows its context mutably for as long as it lives.
//! Member entries ([`PropertyEntry`], [`ReferenceEntry`],
//! [`CollectionEntry`], [`ComplexPropertyEntry`]) borrow the entity entry
//! they came from in turn.

mod complex_entry;
mod entity_entry;
mod navigation_entry;
mod property_entry;

pub use complex_entry::ComplexPropertyEntry;
pub use entity_entry::{EntityEntry, MemberEntry};
pub use navigation_entry::{CollectionEntry, NavigationEntry, ReferenceEntry};
pub use property_entry::PropertyEntry;
