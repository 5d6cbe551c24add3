//! Set equality strategies.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Equality and hashing strategy used by an [`ObservableHashSet`].
///
/// Implementations must keep `equals(a, b) => hash(a) == hash(b)` for
/// values whose state has not changed since they were hashed.
///
/// [`ObservableHashSet`]: crate::ObservableHashSet
pub trait SetComparer<T> {
    /// Returns true if both values are the same member.
    fn equals(&self, a: &T, b: &T) -> bool;

    /// Returns the hash of a value.
    fn hash(&self, value: &T) -> u64;
}

/// Comparer delegating to the value's own `Eq` and `Hash`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultSetComparer;

impl<T: Eq + Hash> SetComparer<T> for DefaultSetComparer {
    fn equals(&self, a: &T, b: &T) -> bool {
        a == b
    }

    fn hash(&self, value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }
}

impl<T, F, H> SetComparer<T> for (F, H)
where
    F: Fn(&T, &T) -> bool,
    H: Fn(&T) -> u64,
{
    fn equals(&self, a: &T, b: &T) -> bool {
        (self.0)(a, b)
    }

    fn hash(&self, value: &T) -> u64 {
        (self.1)(value)
    }
}
