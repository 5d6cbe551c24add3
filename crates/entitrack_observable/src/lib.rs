//! # entitrack Observable
//!
//! An insertion-ordered hash set that reports every membership change.
//!
//! This crate provides:
//! - [`ObservableHashSet`], a unique-membership collection with the usual
//!   set algebra (union, intersect, except, symmetric except, subset tests)
//! - [`SetChange`] notifications delivered to any number of subscribers:
//!   "count changing", "count changed", and a structured Add/Remove/Replace
//!   record with the exact items involved
//! - [`SetComparer`], the pluggable equality/hash strategy of a set
//!
//! ## Hash stability
//!
//! Point operations ([`ObservableHashSet::contains`],
//! [`ObservableHashSet::remove`], [`ObservableHashSet::insert`]) locate
//! members through the hash computed when the member was inserted. If a
//! member's hash changes afterwards, point operations may no longer find it.
//! Bulk operations ([`ObservableHashSet::remove_where`],
//! [`ObservableHashSet::except_with`], [`ObservableHashSet::intersect_with`],
//! [`ObservableHashSet::symmetric_except_with`]) scan every member with the
//! comparer's equality and therefore still find it.
//!
//! ## Usage
//!
//! ```
//! use entitrack_observable::{ObservableHashSet, SetChange};
//!
//! let mut set = ObservableHashSet::new();
//! let changes = set.subscribe();
//!
//! set.insert(1);
//! set.insert(1); // already present: no notification
//!
//! let events: Vec<SetChange<i32>> = changes.try_iter().collect();
//! assert_eq!(events.len(), 3);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod comparer;
mod event;
mod set;

pub use comparer::{DefaultSetComparer, SetComparer};
pub use event::{SetChange, SetChangeAction, SetChangeFeed};
pub use set::{Iter, ObservableHashSet};
