//! Identity maps.
//!
//! Each entity type has one [`IdentityMap`] holding a [`KeyIndex`] per key
//! (primary first, then alternate keys) and one per foreign key declared on
//! the type. Key indexes are unique and never hold a tuple containing null;
//! foreign key indexes are multi-valued and do hold null tuples so that
//! dependents with a null foreign key can be found.
//!
//! Shared-type mappings get their own maps, so key spaces never overlap.

use crate::comparer::KeyComparer;
use crate::model::{EntityType, ForeignKeyId, Model};
use crate::object::EntityHandle;
use crate::value::Value;
use std::collections::HashMap;

/// Key and foreign key values of one entry, in model order.
#[derive(Debug, Clone, Default)]
pub(crate) struct KeyProjection {
    /// One tuple per key of the entity type.
    pub(crate) keys: Vec<Vec<Value>>,
    /// One tuple per foreign key declared on the entity type.
    pub(crate) foreign_keys: Vec<Vec<Value>>,
}

/// Registrations that moved during a re-key.
#[derive(Debug, Default)]
pub(crate) struct Rekeyed {
    /// `(key index, old tuple, new tuple)`; the old tuple is absent when the
    /// entry was not registered under that key.
    pub(crate) keys: Vec<(usize, Option<Vec<Value>>, Vec<Value>)>,
    /// `(foreign key, old tuple, new tuple)`.
    pub(crate) foreign_keys: Vec<(ForeignKeyId, Vec<Value>, Vec<Value>)>,
}

/// Hash index from value tuples to entries.
#[derive(Debug)]
pub(crate) struct KeyIndex {
    comparer: KeyComparer,
    /// Tuple hash to the entries registered under it.
    buckets: HashMap<u64, Vec<(Vec<Value>, EntityHandle)>>,
    /// Tuple each entry is registered under.
    registered: HashMap<EntityHandle, Vec<Value>>,
}

impl KeyIndex {
    pub(crate) fn new(comparer: KeyComparer) -> Self {
        Self {
            comparer,
            buckets: HashMap::new(),
            registered: HashMap::new(),
        }
    }

    /// First entry, by handle, registered under an equal tuple.
    pub(crate) fn find(&self, values: &[Value]) -> Option<EntityHandle> {
        self.matches(values).min()
    }

    /// Every entry registered under an equal tuple, ordered by handle.
    pub(crate) fn find_all(&self, values: &[Value]) -> Vec<EntityHandle> {
        let mut found: Vec<EntityHandle> = self.matches(values).collect();
        found.sort_unstable();
        found
    }

    /// Another entry registered under an equal tuple.
    pub(crate) fn conflict(&self, values: &[Value], handle: EntityHandle) -> Option<EntityHandle> {
        self.matches(values).find(|&h| h != handle)
    }

    pub(crate) fn registered(&self, handle: EntityHandle) -> Option<&[Value]> {
        self.registered.get(&handle).map(Vec::as_slice)
    }

    pub(crate) fn insert(&mut self, handle: EntityHandle, values: Vec<Value>) {
        self.remove(handle);
        let hash = self.comparer.hash(&values);
        self.buckets
            .entry(hash)
            .or_default()
            .push((values.clone(), handle));
        self.registered.insert(handle, values);
    }

    pub(crate) fn remove(&mut self, handle: EntityHandle) -> Option<Vec<Value>> {
        let values = self.registered.remove(&handle)?;
        let hash = self.comparer.hash(&values);
        if let Some(bucket) = self.buckets.get_mut(&hash) {
            bucket.retain(|(_, h)| *h != handle);
            if bucket.is_empty() {
                self.buckets.remove(&hash);
            }
        }
        Some(values)
    }

    pub(crate) fn clear(&mut self) {
        self.buckets.clear();
        self.registered.clear();
    }

    fn matches<'a>(&'a self, values: &'a [Value]) -> impl Iterator<Item = EntityHandle> + 'a {
        let hash = self.comparer.hash(values);
        self.buckets
            .get(&hash)
            .into_iter()
            .flatten()
            .filter(move |(stored, _)| self.comparer.equals(stored, values))
            .map(|(_, h)| *h)
    }
}

/// All indexes of one entity type.
#[derive(Debug)]
pub(crate) struct IdentityMap {
    keys: Vec<KeyIndex>,
    foreign_keys: Vec<(ForeignKeyId, KeyIndex)>,
}

impl IdentityMap {
    pub(crate) fn new(model: &Model, entity_type: &EntityType) -> Self {
        Self {
            keys: entity_type
                .keys()
                .iter()
                .map(|k| KeyIndex::new(k.comparer().clone()))
                .collect(),
            foreign_keys: entity_type
                .declared_foreign_keys()
                .iter()
                .map(|&fk| (fk, KeyIndex::new(model.foreign_key(fk).comparer().clone())))
                .collect(),
        }
    }

    /// Registers an entry under every key and foreign key.
    ///
    /// Fails with the index of the first key whose tuple is already taken by
    /// another entry; nothing is registered in that case.
    pub(crate) fn add(
        &mut self,
        handle: EntityHandle,
        projection: KeyProjection,
    ) -> Result<(), usize> {
        for (index, values) in projection.keys.iter().enumerate() {
            if !has_null(values) && self.keys[index].conflict(values, handle).is_some() {
                return Err(index);
            }
        }
        for (index, values) in projection.keys.into_iter().enumerate() {
            if has_null(&values) {
                self.keys[index].remove(handle);
            } else {
                self.keys[index].insert(handle, values);
            }
        }
        for ((_, index), values) in self.foreign_keys.iter_mut().zip(projection.foreign_keys) {
            index.insert(handle, values);
        }
        Ok(())
    }

    /// Removes an entry from every index.
    pub(crate) fn remove(&mut self, handle: EntityHandle) {
        for index in &mut self.keys {
            index.remove(handle);
        }
        for (_, index) in &mut self.foreign_keys {
            index.remove(handle);
        }
    }

    /// Moves an entry to its current tuples.
    ///
    /// Conflicts are checked for every changed key before anything moves, so
    /// a failed re-key leaves the map untouched.
    pub(crate) fn rekey(
        &mut self,
        handle: EntityHandle,
        projection: KeyProjection,
    ) -> Result<Rekeyed, usize> {
        let mut moved_keys = Vec::new();
        for (index, values) in projection.keys.into_iter().enumerate() {
            let key_index = &self.keys[index];
            let old = key_index.registered(handle).map(<[Value]>::to_vec);
            let unchanged = match &old {
                Some(old) => key_index.comparer.equals(old, &values),
                None => has_null(&values),
            };
            if unchanged {
                continue;
            }
            if !has_null(&values) && key_index.conflict(&values, handle).is_some() {
                return Err(index);
            }
            moved_keys.push((index, old, values));
        }

        let mut rekeyed = Rekeyed::default();
        for (index, old, values) in moved_keys {
            if has_null(&values) {
                self.keys[index].remove(handle);
            } else {
                self.keys[index].insert(handle, values.clone());
            }
            rekeyed.keys.push((index, old, values));
        }
        for ((fk, index), values) in self.foreign_keys.iter_mut().zip(projection.foreign_keys) {
            let old = index.registered(handle).map(<[Value]>::to_vec);
            match old {
                Some(old) if index.comparer.equals(&old, &values) => {}
                Some(old) => {
                    index.insert(handle, values.clone());
                    rekeyed.foreign_keys.push((*fk, old, values));
                }
                None => index.insert(handle, values),
            }
        }
        Ok(rekeyed)
    }

    /// Entry registered under a full key; `None` for tuples containing null.
    pub(crate) fn find_by_key(&self, key: usize, values: &[Value]) -> Option<EntityHandle> {
        if has_null(values) {
            return None;
        }
        self.keys.get(key)?.find(values)
    }

    /// Entries registered under a foreign key tuple, ordered by handle.
    pub(crate) fn find_by_foreign_key(&self, fk: ForeignKeyId, values: &[Value]) -> Vec<EntityHandle> {
        self.foreign_key_index(fk)
            .map(|index| index.find_all(values))
            .unwrap_or_default()
    }

    pub(crate) fn clear(&mut self) {
        for index in &mut self.keys {
            index.clear();
        }
        for (_, index) in &mut self.foreign_keys {
            index.clear();
        }
    }

    fn foreign_key_index(&self, fk: ForeignKeyId) -> Option<&KeyIndex> {
        self.foreign_keys
            .iter()
            .find(|(id, _)| *id == fk)
            .map(|(_, index)| index)
    }
}

pub(crate) fn has_null(values: &[Value]) -> bool {
    values.iter().any(Value::is_null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparer::{DefaultValueComparer, ValueComparer};
    use crate::value::ValueType;
    use std::sync::Arc;

    fn comparer(types: &[ValueType]) -> KeyComparer {
        KeyComparer::new(
            types
                .iter()
                .map(|t| Arc::new(DefaultValueComparer::key(t.clone())) as Arc<dyn ValueComparer>)
                .collect(),
        )
    }

    fn index(types: &[ValueType]) -> KeyIndex {
        KeyIndex::new(comparer(types))
    }

    fn composite() -> KeyIndex {
        index(&[ValueType::Int, ValueType::Text, ValueType::Text])
    }

    fn tuple(a: i32, b: &str, c: &str) -> Vec<Value> {
        vec![Value::Int(a), Value::from(b), Value::from(c)]
    }

    #[test]
    fn composite_lookup_requires_every_column() {
        let mut index = composite();
        index.insert(EntityHandle(1), tuple(1, "88", "foo"));
        index.insert(EntityHandle(2), tuple(2, "99", "bar"));

        assert_eq!(index.find(&tuple(1, "88", "foo")), Some(EntityHandle(1)));
        assert_eq!(index.find(&tuple(1, "99", "foo")), None);
        assert_eq!(index.find(&tuple(1, "88", "bar")), None);
    }

    #[test]
    fn reinserting_moves_the_registration() {
        let mut index = composite();
        index.insert(EntityHandle(1), tuple(1, "a", "b"));
        index.insert(EntityHandle(1), tuple(2, "a", "b"));

        assert_eq!(index.registered(EntityHandle(1)), Some(&tuple(2, "a", "b")[..]));
        assert_eq!(index.find(&tuple(1, "a", "b")), None);
        assert_eq!(index.find(&tuple(2, "a", "b")), Some(EntityHandle(1)));
        assert_eq!(index.remove(EntityHandle(1)), Some(tuple(2, "a", "b")));
        assert_eq!(index.remove(EntityHandle(1)), None);
    }

    #[test]
    fn multi_valued_lookup_is_ordered_by_handle() {
        let mut index = index(&[ValueType::Int]);
        index.insert(EntityHandle(9), vec![Value::Null]);
        index.insert(EntityHandle(3), vec![Value::Null]);
        index.insert(EntityHandle(5), vec![Value::Int(1)]);

        assert_eq!(
            index.find_all(&[Value::Null]),
            vec![EntityHandle(3), EntityHandle(9)]
        );
        assert_eq!(index.conflict(&[Value::Int(1)], EntityHandle(5)), None);
        assert_eq!(
            index.conflict(&[Value::Int(1)], EntityHandle(6)),
            Some(EntityHandle(5))
        );
    }

    #[test]
    fn null_tuples_are_never_found_by_key() {
        let index = composite();
        let map = IdentityMap {
            keys: vec![index],
            foreign_keys: Vec::new(),
        };
        assert_eq!(
            map.find_by_key(0, &[Value::Int(1), Value::Null, Value::from("x")]),
            None
        );
    }

    #[test]
    fn failed_add_registers_nothing() {
        let mut map = IdentityMap {
            keys: vec![
                index(&[ValueType::Int]),
                index(&[ValueType::Text]),
            ],
            foreign_keys: Vec::new(),
        };
        let first = KeyProjection {
            keys: vec![vec![Value::Int(1)], vec![Value::from("a")]],
            foreign_keys: Vec::new(),
        };
        map.add(EntityHandle(1), first).unwrap();

        let clash = KeyProjection {
            keys: vec![vec![Value::Int(2)], vec![Value::from("a")]],
            foreign_keys: Vec::new(),
        };
        assert_eq!(map.add(EntityHandle(2), clash), Err(1));
        assert_eq!(map.find_by_key(0, &[Value::Int(2)]), None);
        assert_eq!(map.keys[0].registered(EntityHandle(2)), None);
        assert_eq!(map.find_by_key(1, &[Value::from("a")]), Some(EntityHandle(1)));
    }

    #[test]
    fn rekey_reports_moved_tuples() {
        let fk = ForeignKeyId(0);
        let mut map = IdentityMap {
            keys: vec![index(&[ValueType::Int])],
            foreign_keys: vec![(fk, index(&[ValueType::Int]))],
        };
        map.add(
            EntityHandle(1),
            KeyProjection {
                keys: vec![vec![Value::Int(-1)]],
                foreign_keys: vec![vec![Value::Null]],
            },
        )
        .unwrap();

        let rekeyed = map
            .rekey(
                EntityHandle(1),
                KeyProjection {
                    keys: vec![vec![Value::Int(10)]],
                    foreign_keys: vec![vec![Value::Int(5)]],
                },
            )
            .unwrap();
        assert_eq!(
            rekeyed.keys,
            vec![(0, Some(vec![Value::Int(-1)]), vec![Value::Int(10)])]
        );
        assert_eq!(
            rekeyed.foreign_keys,
            vec![(fk, vec![Value::Null], vec![Value::Int(5)])]
        );
        assert_eq!(map.find_by_foreign_key(fk, &[Value::Int(5)]), vec![EntityHandle(1)]);
        assert_eq!(map.find_by_key(0, &[Value::Int(10)]), Some(EntityHandle(1)));
    }

    #[test]
    fn rekey_conflict_leaves_map_untouched() {
        let mut map = IdentityMap {
            keys: vec![index(&[ValueType::Int])],
            foreign_keys: Vec::new(),
        };
        for (h, id) in [(1, 1), (2, 2)] {
            map.add(
                EntityHandle(h),
                KeyProjection {
                    keys: vec![vec![Value::Int(id)]],
                    foreign_keys: Vec::new(),
                },
            )
            .unwrap();
        }
        let result = map.rekey(
            EntityHandle(2),
            KeyProjection {
                keys: vec![vec![Value::Int(1)]],
                foreign_keys: Vec::new(),
            },
        );
        assert!(result.is_err());
        assert_eq!(map.find_by_key(0, &[Value::Int(2)]), Some(EntityHandle(2)));
    }
}
