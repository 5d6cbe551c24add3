//! Observable hash set implementation.

use crate::comparer::{DefaultSetComparer, SetComparer};
use crate::event::{SetChange, SetChangeAction, SetChangeFeed};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::mpsc::Receiver;

/// A member together with the hash it was bucketed under.
#[derive(Debug, Clone)]
struct Slot<T> {
    value: T,
    hash: u64,
}

/// An insertion-ordered set that notifies subscribers of membership changes.
///
/// Members are stored in insertion order and bucketed by the hash computed
/// when they were inserted. Enumeration follows insertion order, which keeps
/// graph traversals over navigation collections deterministic.
///
/// # Example
///
/// ```
/// use entitrack_observable::ObservableHashSet;
///
/// let mut set: ObservableHashSet<&str> = ["a", "b", "c"].into_iter().collect();
/// set.except_with(["b"]);
/// assert_eq!(set.to_vec(), vec!["a", "c"]);
/// ```
pub struct ObservableHashSet<T, C = DefaultSetComparer> {
    /// Members in insertion order; `None` marks a removed member.
    slots: Vec<Option<Slot<T>>>,
    /// Insertion-time hash to slot positions.
    buckets: HashMap<u64, Vec<usize>>,
    /// Number of live members.
    len: usize,
    comparer: C,
    feed: SetChangeFeed<T>,
}

impl<T: Clone + Eq + Hash> ObservableHashSet<T, DefaultSetComparer> {
    /// Creates an empty set using the value's own equality.
    pub fn new() -> Self {
        Self::with_comparer(DefaultSetComparer)
    }
}

impl<T: Clone, C: SetComparer<T>> ObservableHashSet<T, C> {
    /// Creates an empty set using the given comparer.
    pub fn with_comparer(comparer: C) -> Self {
        Self {
            slots: Vec::new(),
            buckets: HashMap::new(),
            len: 0,
            comparer,
            feed: SetChangeFeed::new(),
        }
    }

    /// Returns the comparer of this set.
    pub fn comparer(&self) -> &C {
        &self.comparer
    }

    /// Subscribes to membership change notifications.
    pub fn subscribe(&self) -> Receiver<SetChange<T>> {
        self.feed.subscribe()
    }

    /// Returns the notification feed.
    pub fn feed(&self) -> &SetChangeFeed<T> {
        &self.feed
    }

    /// Returns the number of members.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates members in insertion order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            inner: self.slots.iter(),
        }
    }

    /// Returns the members in insertion order.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    /// Returns true if the value is a member.
    ///
    /// Uses the value's current hash; a member whose hash changed after
    /// insertion may not be found.
    pub fn contains(&self, value: &T) -> bool {
        self.find_hashed(value).is_some()
    }

    /// Adds a value. Returns false if it was already a member.
    pub fn insert(&mut self, value: T) -> bool {
        if self.find_hashed(&value).is_some() {
            return false;
        }
        self.feed.emit_count_changing(self.len);
        self.push(value.clone());
        self.feed
            .emit_changed(self.len, SetChangeAction::Add, vec![value], Vec::new());
        true
    }

    /// Removes a value. Returns false if it was not a member.
    ///
    /// Uses the value's current hash; a member whose hash changed after
    /// insertion may not be found.
    pub fn remove(&mut self, value: &T) -> bool {
        let Some(index) = self.find_hashed(value) else {
            return false;
        };
        self.feed.emit_count_changing(self.len);
        let removed: Vec<T> = self.take(index).into_iter().collect();
        self.feed
            .emit_changed(self.len, SetChangeAction::Remove, Vec::new(), removed);
        self.compact_if_sparse();
        true
    }

    /// Removes every member.
    pub fn clear(&mut self) {
        if self.len == 0 {
            return;
        }
        let removed = self.to_vec();
        self.feed.emit_count_changing(self.len);
        self.slots.clear();
        self.buckets.clear();
        self.len = 0;
        self.feed
            .emit_changed(0, SetChangeAction::Replace, Vec::new(), removed);
    }

    /// Removes every member matching the predicate. Returns the count removed.
    pub fn remove_where<P>(&mut self, mut predicate: P) -> usize
    where
        P: FnMut(&T) -> bool,
    {
        let matches: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Some(slot) if predicate(&slot.value) => Some(i),
                _ => None,
            })
            .collect();
        self.remove_indices(matches)
    }

    /// Adds every value not already present.
    pub fn union_with<I>(&mut self, other: I)
    where
        I: IntoIterator<Item = T>,
    {
        let mut added: Vec<T> = Vec::new();
        for value in other {
            if self.find_hashed(&value).is_none()
                && !added.iter().any(|a| self.comparer.equals(a, &value))
            {
                added.push(value);
            }
        }
        if added.is_empty() {
            return;
        }
        self.feed.emit_count_changing(self.len);
        for value in &added {
            self.push(value.clone());
        }
        self.feed
            .emit_changed(self.len, SetChangeAction::Replace, added, Vec::new());
    }

    /// Keeps only members also present in `other`.
    pub fn intersect_with<I>(&mut self, other: I)
    where
        I: IntoIterator<Item = T>,
    {
        let other: Vec<T> = other.into_iter().collect();
        let doomed: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Some(slot) if !other.iter().any(|o| self.comparer.equals(&slot.value, o)) => {
                    Some(i)
                }
                _ => None,
            })
            .collect();
        self.remove_indices(doomed);
    }

    /// Removes every member present in `other`.
    pub fn except_with<I>(&mut self, other: I)
    where
        I: IntoIterator<Item = T>,
    {
        let mut doomed = Vec::new();
        for value in other {
            if let Some(index) = self.find_scanning(&value) {
                if !doomed.contains(&index) {
                    doomed.push(index);
                }
            }
        }
        doomed.sort_unstable();
        self.remove_indices(doomed);
    }

    /// Keeps members present in exactly one of the two sets.
    pub fn symmetric_except_with<I>(&mut self, other: I)
    where
        I: IntoIterator<Item = T>,
    {
        let mut distinct: Vec<T> = Vec::new();
        for value in other {
            if !distinct.iter().any(|d| self.comparer.equals(d, &value)) {
                distinct.push(value);
            }
        }

        let mut doomed = Vec::new();
        let mut fresh = Vec::new();
        for value in distinct {
            match self.find_scanning(&value) {
                Some(index) => doomed.push(index),
                None => fresh.push(value),
            }
        }
        if doomed.is_empty() && fresh.is_empty() {
            return;
        }

        doomed.sort_unstable();
        self.feed.emit_count_changing(self.len);
        let removed: Vec<T> = doomed.into_iter().filter_map(|i| self.take(i)).collect();
        for value in &fresh {
            self.push(value.clone());
        }
        self.feed
            .emit_changed(self.len, SetChangeAction::Replace, fresh, removed);
        self.compact_if_sparse();
    }

    /// Returns true if every member is also in `other`.
    pub fn is_subset_of<I>(&self, other: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        let other = self.distinct(other);
        self.iter()
            .all(|m| other.iter().any(|o| self.comparer.equals(m, o)))
    }

    /// Returns true if this set is a subset of `other` and `other` has more members.
    pub fn is_proper_subset_of<I>(&self, other: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        let other = self.distinct(other);
        other.len() > self.len
            && self
                .iter()
                .all(|m| other.iter().any(|o| self.comparer.equals(m, o)))
    }

    /// Returns true if every value of `other` is a member.
    pub fn is_superset_of<I>(&self, other: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        other.into_iter().all(|o| self.contains(&o))
    }

    /// Returns true if this set is a superset of `other` and has more members.
    pub fn is_proper_superset_of<I>(&self, other: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        let other = self.distinct(other);
        other.len() < self.len && other.iter().all(|o| self.contains(o))
    }

    /// Returns true if at least one value of `other` is a member.
    pub fn overlaps<I>(&self, other: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        other.into_iter().any(|o| self.contains(&o))
    }

    /// Returns true if both sets have exactly the same members.
    pub fn set_equals<I>(&self, other: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        let other = self.distinct(other);
        other.len() == self.len && other.iter().all(|o| self.contains(o))
    }

    /// Drops removed-member tombstones and rebuilds buckets.
    ///
    /// Members keep the hash they were inserted with.
    pub fn trim_excess(&mut self) {
        let slots = std::mem::take(&mut self.slots);
        self.buckets.clear();
        for slot in slots.into_iter().flatten() {
            let index = self.slots.len();
            self.buckets.entry(slot.hash).or_default().push(index);
            self.slots.push(Some(slot));
        }
    }

    fn distinct<I>(&self, other: I) -> Vec<T>
    where
        I: IntoIterator<Item = T>,
    {
        let mut distinct: Vec<T> = Vec::new();
        for value in other {
            if !distinct.iter().any(|d| self.comparer.equals(d, &value)) {
                distinct.push(value);
            }
        }
        distinct
    }

    /// Finds a member through the bucket of the value's current hash.
    fn find_hashed(&self, value: &T) -> Option<usize> {
        let hash = self.comparer.hash(value);
        self.buckets.get(&hash)?.iter().copied().find(|&i| {
            self.slots[i]
                .as_ref()
                .is_some_and(|slot| self.comparer.equals(&slot.value, value))
        })
    }

    /// Finds a member by scanning every slot with the comparer's equality.
    fn find_scanning(&self, value: &T) -> Option<usize> {
        self.find_hashed(value).or_else(|| {
            self.slots.iter().position(|slot| {
                slot.as_ref()
                    .is_some_and(|slot| self.comparer.equals(&slot.value, value))
            })
        })
    }

    fn push(&mut self, value: T) {
        let hash = self.comparer.hash(&value);
        let index = self.slots.len();
        self.slots.push(Some(Slot { value, hash }));
        self.buckets.entry(hash).or_default().push(index);
        self.len += 1;
    }

    /// Removes the member at a slot position, using its stored hash.
    fn take(&mut self, index: usize) -> Option<T> {
        let slot = self.slots.get_mut(index)?.take()?;
        if let Some(bucket) = self.buckets.get_mut(&slot.hash) {
            bucket.retain(|&i| i != index);
            if bucket.is_empty() {
                self.buckets.remove(&slot.hash);
            }
        }
        self.len -= 1;
        Some(slot.value)
    }

    fn remove_indices(&mut self, indices: Vec<usize>) -> usize {
        if indices.is_empty() {
            return 0;
        }
        self.feed.emit_count_changing(self.len);
        let removed: Vec<T> = indices.into_iter().filter_map(|i| self.take(i)).collect();
        let count = removed.len();
        self.feed
            .emit_changed(self.len, SetChangeAction::Replace, Vec::new(), removed);
        self.compact_if_sparse();
        count
    }

    fn compact_if_sparse(&mut self) {
        if self.slots.len() > 16 && self.len * 2 < self.slots.len() {
            self.trim_excess();
        }
    }
}

impl<T: Clone + Eq + Hash> Default for ObservableHashSet<T, DefaultSetComparer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone, C: SetComparer<T> + Default> FromIterator<T> for ObservableHashSet<T, C> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::with_comparer(C::default());
        for value in iter {
            if set.find_hashed(&value).is_none() {
                set.push(value);
            }
        }
        set
    }
}

impl<T: Clone, C: SetComparer<T>> Extend<T> for ObservableHashSet<T, C> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.union_with(iter);
    }
}

impl<'a, T: Clone, C: SetComparer<T>> IntoIterator for &'a ObservableHashSet<T, C> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: std::fmt::Debug, C> std::fmt::Debug for ObservableHashSet<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries(self.slots.iter().flatten().map(|slot| &slot.value))
            .finish()
    }
}

/// Iterator over set members in insertion order.
#[derive(Debug)]
pub struct Iter<'a, T> {
    inner: std::slice::Iter<'a, Option<Slot<T>>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.by_ref().flatten().next().map(|slot| &slot.value)
    }
}
