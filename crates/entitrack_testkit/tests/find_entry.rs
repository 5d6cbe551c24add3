//! Local lookups by key, foreign key and arbitrary properties.

use entitrack_core::{Context, EntityState, TrackError, Value};
use entitrack_testkit::prelude::*;
use proptest::prelude::*;
use uuid::Uuid;

fn int_keys(ctx: &mut Context, ids: &[i32]) -> Vec<EntityHandle> {
    let handles: Vec<EntityHandle> = ids
        .iter()
        .map(|&id| {
            new_entity(
                ctx,
                "IntKey",
                &[("Id", Value::Int(id)), ("Foo", Value::from(format!("foo{id}")))],
            )
        })
        .collect();
    ctx.attach_range(&handles).unwrap();
    handles
}

fn composite(ctx: &mut Context, id1: i32, id2: &str, id3: Uuid) -> EntityHandle {
    let handle = new_entity(
        ctx,
        "CompositeKey",
        &[
            ("Id1", Value::Int(id1)),
            ("Id2", Value::from(id2)),
            ("Id3", Value::Guid(id3)),
        ],
    );
    ctx.attach(handle).unwrap();
    handle
}

#[test]
fn find_entry_by_primary_key() {
    init_test_tracing();
    let mut ctx = Context::new(find_model());
    let handles = int_keys(&mut ctx, &[11, 12, 13]);

    let mut local = ctx.local("IntKey").unwrap();
    let entry = local.find_entry(12).unwrap().unwrap();
    assert_eq!(entry.handle(), handles[1]);
    assert_eq!(entry.state(), EntityState::Unchanged);
    assert!(local.find_entry(99).unwrap().is_none());
}

#[test]
fn find_entry_by_string_key() {
    let mut ctx = Context::new(find_model());
    let handle = new_entity(&mut ctx, "StringKey", &[("Id", Value::from("Ringo"))]);
    ctx.attach(handle).unwrap();

    let mut local = ctx.local("StringKey").unwrap();
    assert_eq!(local.find_entry("Ringo").unwrap().unwrap().handle(), handle);
    assert!(local.find_entry("ringo").unwrap().is_none());
}

#[test]
fn find_entry_by_composite_key_needs_every_column() {
    let mut ctx = Context::new(find_model());
    let guid = Uuid::from_u128(0x7d);
    let handle = composite(&mut ctx, 1, "88", guid);
    composite(&mut ctx, 2, "99", Uuid::from_u128(0x8e));

    let mut local = ctx.local("CompositeKey").unwrap();
    let key = [Value::Int(1), Value::from("88"), Value::Guid(guid)];
    assert_eq!(local.find_entry_by_key(&key).unwrap().unwrap().handle(), handle);

    let wrong = [Value::Int(1), Value::from("99"), Value::Guid(guid)];
    assert!(local.find_entry_by_key(&wrong).unwrap().is_none());
}

#[test]
fn composite_key_lookup_with_too_few_values_fails() {
    let mut ctx = Context::new(find_model());
    let mut local = ctx.local("CompositeKey").unwrap();

    let err = local.find_entry_by_key(&[Value::Int(1)]).unwrap_err();
    match err {
        TrackError::KeyValueCountMismatch {
            entity_type,
            expected,
            actual,
        } => {
            assert_eq!(entity_type.as_deref(), Some("CompositeKey"));
            assert_eq!(expected, 3);
            assert_eq!(actual, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn simple_key_lookup_with_too_many_values_fails() {
    let mut ctx = Context::new(find_model());
    let mut local = ctx.local("IntKey").unwrap();

    let err = local.find_entry_by_key(&[Value::Int(1), Value::Int(2)]).unwrap_err();
    assert!(matches!(
        err,
        TrackError::KeyValueCountMismatch {
            expected: 1,
            actual: 2,
            ..
        }
    ));
}

#[test]
fn property_lookup_with_mismatched_value_count_fails() {
    let mut ctx = Context::new(find_model());
    let local = ctx.local("IntKey").unwrap();

    let err = local
        .get_entries_by_properties(&["Id", "Foo"], &[Value::Int(1)])
        .unwrap_err();
    assert!(matches!(
        err,
        TrackError::KeyValueCountMismatch {
            entity_type: None,
            expected: 2,
            actual: 1,
        }
    ));
}

#[test]
fn key_lookup_with_the_wrong_type_fails() {
    let mut ctx = Context::new(find_model());
    let mut local = ctx.local("IntKey").unwrap();

    let err = local.find_entry("77").unwrap_err();
    match err {
        TrackError::KeyTypeMismatch {
            property,
            declaring_type,
            expected,
            actual,
        } => {
            assert_eq!(property, "Id");
            assert_eq!(declaring_type, "IntKey");
            assert_eq!(expected, "int");
            assert_eq!(actual, "string");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn null_key_lookup_finds_nothing() {
    let mut ctx = Context::new(find_model());
    int_keys(&mut ctx, &[1]);

    let mut local = ctx.local("IntKey").unwrap();
    assert!(local.find_entry(Value::Null).unwrap().is_none());
    assert!(local.get_entries_by("Id", Value::Null).unwrap().is_empty());
}

#[test]
fn null_foreign_key_lookup_matches_dependents_without_a_principal() {
    let mut ctx = Context::new(find_model());
    let orphan = new_entity(&mut ctx, "Dependent", &[("Id", Value::Int(1))]);
    let owned = new_entity(&mut ctx, "Dependent", &[("Id", Value::Int(2)), ("IntKeyId", Value::Int(7))]);
    ctx.attach_range(&[orphan, owned]).unwrap();

    let local = ctx.local("Dependent").unwrap();
    assert_eq!(local.get_entries_by("IntKeyId", Value::Null).unwrap(), vec![orphan]);
    assert_eq!(local.get_entries_by("IntKeyId", 7).unwrap(), vec![owned]);
}

#[test]
fn alternate_key_lookup() {
    let mut ctx = Context::new(find_model());
    let handle = new_entity(
        &mut ctx,
        "AltKey",
        &[("Id", Value::Int(1)), ("AlternateId", Value::Int(42))],
    );
    ctx.attach(handle).unwrap();

    let mut local = ctx.local("AltKey").unwrap();
    assert_eq!(local.find_entry_by("AlternateId", 42).unwrap().unwrap().handle(), handle);
    assert!(local.find_entry_by("AlternateId", 1).unwrap().is_none());
}

#[test]
fn non_key_lookup_scans_tracked_entries() {
    let mut ctx = Context::new(find_model());
    let handles = int_keys(&mut ctx, &[1, 2, 3]);

    let local = ctx.local("IntKey").unwrap();
    assert_eq!(local.get_entries_by("Foo", "foo2").unwrap(), vec![handles[1]]);
    assert!(local.get_entries_by("Foo", "nope").unwrap().is_empty());
    assert!(local.get_entries_by_properties(&[], &[]).unwrap().is_empty());
}

#[test]
fn unknown_property_is_reported() {
    let mut ctx = Context::new(find_model());
    let local = ctx.local("IntKey").unwrap();
    assert!(matches!(
        local.get_entries_by("Bar", 1),
        Err(TrackError::UnknownMember { .. })
    ));
}

#[test]
fn deleted_entries_are_still_found() {
    let mut ctx = Context::new(find_model());
    let handles = int_keys(&mut ctx, &[5]);
    ctx.remove(handles[0]).unwrap();

    let mut local = ctx.local("IntKey").unwrap();
    let entry = local.find_entry(5).unwrap().unwrap();
    assert_eq!(entry.state(), EntityState::Deleted);
}

#[test]
fn collection_lookups_only_see_members() {
    let mut ctx = Context::new(find_model());
    let principal = new_entity(&mut ctx, "IntKey", &[("Id", Value::Int(7))]);
    let member = new_entity(&mut ctx, "Dependent", &[("Id", Value::Int(1)), ("Foo", Value::from("a"))]);
    let stranger = new_entity(&mut ctx, "Dependent", &[("Id", Value::Int(2)), ("Foo", Value::from("a"))]);
    push(&mut ctx, principal, "Dependents", member);
    ctx.attach(principal).unwrap();
    ctx.attach(stranger).unwrap();

    let mut entry = ctx.entry(principal).unwrap();
    let mut dependents = entry.collection("Dependents").unwrap();
    assert_eq!(dependents.get_entries(&["Foo"], &[Value::from("a")]).unwrap(), vec![member]);
    assert!(matches!(
        dependents.get_entries(&["Foo"], &[]),
        Err(TrackError::KeyValueCountMismatch { .. })
    ));
    assert_eq!(
        dependents.find_entry(&[Value::Int(1)]).unwrap().map(|e| e.handle()),
        Some(member)
    );
    assert!(dependents.find_entry(&[Value::Int(2)]).unwrap().is_none());
}

#[test]
fn collection_key_lookup_with_the_wrong_type_fails() {
    let mut ctx = Context::new(find_model());
    let principal = new_entity(&mut ctx, "IntKey", &[("Id", Value::Int(7))]);
    let member = new_entity(&mut ctx, "Dependent", &[("Id", Value::Int(1))]);
    push(&mut ctx, principal, "Dependents", member);
    ctx.attach(principal).unwrap();

    let mut entry = ctx.entry(principal).unwrap();
    let mut dependents = entry.collection("Dependents").unwrap();
    match dependents.find_entry(&[Value::from("1")]).unwrap_err() {
        TrackError::KeyTypeMismatch {
            property,
            declaring_type,
            expected,
            actual,
        } => {
            assert_eq!(property, "Id");
            assert_eq!(declaring_type, "Dependent");
            assert_eq!(expected, "int");
            assert_eq!(actual, "string");
        }
        other => panic!("unexpected error: {other}"),
    }
}

proptest! {
    #[test]
    fn every_tracked_key_is_found(keys in distinct_int_keys_strategy(16)) {
        let mut ctx = Context::new(find_model());
        let handles = int_keys(&mut ctx, &keys);
        let mut local = ctx.local("IntKey").unwrap();
        for (key, handle) in keys.iter().zip(handles) {
            let found = local.find_entry(*key).unwrap().map(|e| e.handle());
            prop_assert_eq!(found, Some(handle));
        }
    }

    #[test]
    fn composite_keys_round_trip_through_lookup(key in composite_key_strategy()) {
        let mut ctx = Context::new(find_model());
        let handle = new_entity(
            &mut ctx,
            "CompositeKey",
            &[("Id1", key[0].clone()), ("Id2", key[1].clone()), ("Id3", key[2].clone())],
        );
        ctx.attach(handle).unwrap();
        let mut local = ctx.local("CompositeKey").unwrap();
        let found = local.find_entry_by_key(&key).unwrap().map(|e| e.handle());
        prop_assert_eq!(found, Some(handle));
    }
}
