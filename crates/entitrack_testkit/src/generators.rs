//! Property-based test generators using proptest.
//!
//! Strategies stay inside the ranges the fixture models accept: positive
//! `int` keys (zero is the sentinel), non-empty strings and non-nil GUIDs.

use entitrack_core::{EntityState, Value};
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy for states an entry can be moved to while tracked.
pub fn tracked_state_strategy() -> impl Strategy<Value = EntityState> {
    prop_oneof![
        Just(EntityState::Unchanged),
        Just(EntityState::Added),
        Just(EntityState::Modified),
        Just(EntityState::Deleted),
    ]
}

/// Strategy for every state, `Detached` included.
pub fn entity_state_strategy() -> impl Strategy<Value = EntityState> {
    prop_oneof![Just(EntityState::Detached), tracked_state_strategy()]
}

/// Strategy for set `int` key values.
pub fn int_key_strategy() -> impl Strategy<Value = i32> {
    1..i32::MAX
}

/// Strategy for distinct set `int` key values.
pub fn distinct_int_keys_strategy(max: usize) -> impl Strategy<Value = Vec<i32>> {
    prop::collection::hash_set(1..10_000i32, 1..=max).prop_map(|keys| {
        let mut keys: Vec<i32> = keys.into_iter().collect();
        keys.sort_unstable();
        keys
    })
}

/// Strategy for set `string` key values.
pub fn text_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9]{1,12}").expect("Invalid regex")
}

/// Strategy for set `Guid` key values.
pub fn guid_key_strategy() -> impl Strategy<Value = Uuid> {
    any::<u128>()
        .prop_filter("nil is the sentinel", |v| *v != 0)
        .prop_map(Uuid::from_u128)
}

/// Strategy for `(int, string, Guid)` composite key tuples.
pub fn composite_key_strategy() -> impl Strategy<Value = Vec<Value>> {
    (int_key_strategy(), text_key_strategy(), guid_key_strategy())
        .prop_map(|(a, b, c)| vec![Value::Int(a), Value::from(b), Value::Guid(c)])
}

/// One row of the relationship `IsModified` matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipCase {
    /// State the principal is moved to.
    pub principal: EntityState,
    /// State the dependent is moved to.
    pub dependent: EntityState,
    /// Value written to the navigation's `IsModified`.
    pub modified: bool,
}

/// Strategy for every combination of principal state, dependent state and
/// requested `IsModified` value.
pub fn relationship_case_strategy() -> impl Strategy<Value = RelationshipCase> {
    (tracked_state_strategy(), tracked_state_strategy(), any::<bool>()).prop_map(
        |(principal, dependent, modified)| RelationshipCase {
            principal,
            dependent,
            modified,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn keys_are_never_sentinels(id in int_key_strategy(), guid in guid_key_strategy()) {
            prop_assert!(!Value::Int(id).is_sentinel());
            prop_assert!(!Value::Guid(guid).is_sentinel());
        }

        #[test]
        fn distinct_keys_are_sorted_and_unique(keys in distinct_int_keys_strategy(8)) {
            prop_assert!(keys.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn tracked_states_exclude_detached(state in tracked_state_strategy()) {
            prop_assert!(state.is_tracked());
        }
    }
}
