//! Navigation fixup between foreign keys, references and collections.

use entitrack_core::{CascadeTiming, Context, EntityState, TrackingConfig, Value};
use entitrack_testkit::prelude::*;

fn tracked_garcia_and_kid(ctx: &mut Context) -> (EntityHandle, EntityHandle) {
    let garcia = new_entity(ctx, "Garcia", &[("Id", Value::Int(5))]);
    let kid = new_entity(ctx, "Kid", &[("Id", Value::Int(1))]);
    ctx.attach(garcia).unwrap();
    ctx.attach(kid).unwrap();
    (garcia, kid)
}

fn kids_of(ctx: &Context, garcia: EntityHandle) -> Vec<EntityHandle> {
    ctx.object(garcia).unwrap().collection("Kids").unwrap().to_vec()
}

#[test]
fn setting_a_reference_sets_the_foreign_key_and_inverse_collection() {
    init_test_tracing();
    let mut ctx = Context::new(garcia_model());
    let (garcia, kid) = tracked_garcia_and_kid(&mut ctx);

    ctx.entry(kid)
        .unwrap()
        .reference("Garcia")
        .unwrap()
        .set_current_value(Some(garcia))
        .unwrap();

    let entry = ctx.entry(kid).unwrap();
    assert_eq!(entry.current_value_as::<Option<i32>>("GarciaId").unwrap(), Some(5));
    assert_eq!(entry.state(), EntityState::Modified);
    assert_eq!(kids_of(&ctx, garcia), vec![kid]);

    ctx.entry(kid)
        .unwrap()
        .reference("Garcia")
        .unwrap()
        .set_current_value(None)
        .unwrap();

    let entry = ctx.entry(kid).unwrap();
    assert_eq!(entry.current_value_as::<Option<i32>>("GarciaId").unwrap(), None);
    assert_eq!(entry.state(), EntityState::Unchanged);
    assert!(kids_of(&ctx, garcia).is_empty());
}

#[test]
fn navigation_entries_lead_back_to_their_declaring_entity() {
    let mut ctx = Context::new(garcia_model());
    let (garcia, kid) = tracked_garcia_and_kid(&mut ctx);

    let mut entry = ctx.entry(kid).unwrap();
    let mut reference = entry.reference("Garcia").unwrap();
    reference.set_current_value(Some(garcia)).unwrap();
    let owner = reference.entity_entry();
    assert_eq!(owner.handle(), kid);
    assert_eq!(owner.state(), EntityState::Modified);

    let mut entry = ctx.entry(garcia).unwrap();
    let mut kids = entry.collection("Kids").unwrap();
    assert_eq!(kids.current_value().unwrap(), vec![kid]);
    let owner = kids.entity_entry();
    assert_eq!(owner.handle(), garcia);
    assert_eq!(owner.state(), EntityState::Unchanged);
}

#[test]
fn raw_reference_writes_are_fixed_up_by_detect_changes() {
    let mut ctx = Context::new(garcia_model());
    let (garcia, kid) = tracked_garcia_and_kid(&mut ctx);

    point(&mut ctx, kid, "Garcia", Some(garcia));
    assert!(kids_of(&ctx, garcia).is_empty());
    ctx.detect_changes().unwrap();

    assert_eq!(kids_of(&ctx, garcia), vec![kid]);
    assert_eq!(
        ctx.entry(kid).unwrap().current_value_as::<Option<i32>>("GarciaId").unwrap(),
        Some(5)
    );
}

#[test]
fn collection_add_and_remove_fix_up_the_dependent() {
    let mut ctx = Context::new(garcia_model());
    let (garcia, kid) = tracked_garcia_and_kid(&mut ctx);

    assert!(ctx.entry(garcia).unwrap().collection("Kids").unwrap().add(kid).unwrap());
    assert_eq!(ctx.object(kid).unwrap().reference("Garcia").unwrap(), Some(garcia));
    assert_eq!(
        ctx.entry(kid).unwrap().current_value_as::<Option<i32>>("GarciaId").unwrap(),
        Some(5)
    );

    assert!(ctx.entry(garcia).unwrap().collection("Kids").unwrap().remove(kid).unwrap());
    assert_eq!(ctx.object(kid).unwrap().reference("Garcia").unwrap(), None);
    assert_eq!(
        ctx.entry(kid).unwrap().current_value_as::<Option<i32>>("GarciaId").unwrap(),
        None
    );
}

#[test]
fn raw_collection_edits_are_fixed_up_by_detect_changes() {
    let mut ctx = Context::new(garcia_model());
    let (garcia, kid) = tracked_garcia_and_kid(&mut ctx);

    push(&mut ctx, garcia, "Kids", kid);
    assert!(ctx.has_changes().unwrap());

    assert_eq!(ctx.object(kid).unwrap().reference("Garcia").unwrap(), Some(garcia));
    assert_eq!(ctx.entry(kid).unwrap().state(), EntityState::Modified);
}

#[test]
fn writing_the_foreign_key_moves_the_dependent() {
    let mut ctx = Context::new(garcia_model());
    let (first, kid) = tracked_garcia_and_kid(&mut ctx);
    let second = new_entity(&mut ctx, "Garcia", &[("Id", Value::Int(6))]);
    ctx.attach(second).unwrap();

    ctx.entry(kid).unwrap().set_current_value("GarciaId", 5).unwrap();
    assert_eq!(kids_of(&ctx, first), vec![kid]);

    ctx.entry(kid).unwrap().set_current_value("GarciaId", 6).unwrap();
    assert!(kids_of(&ctx, first).is_empty());
    assert_eq!(kids_of(&ctx, second), vec![kid]);
    assert_eq!(ctx.object(kid).unwrap().reference("Garcia").unwrap(), Some(second));
}

#[test]
fn a_principal_tracked_later_picks_up_waiting_dependents() {
    let mut ctx = Context::new(garcia_model());
    let kid = new_entity(&mut ctx, "Kid", &[("Id", Value::Int(1)), ("GarciaId", Value::Int(5))]);
    ctx.attach(kid).unwrap();
    assert_eq!(ctx.object(kid).unwrap().reference("Garcia").unwrap(), None);

    let garcia = new_entity(&mut ctx, "Garcia", &[("Id", Value::Int(5))]);
    ctx.attach(garcia).unwrap();

    assert_eq!(ctx.object(kid).unwrap().reference("Garcia").unwrap(), Some(garcia));
    assert_eq!(kids_of(&ctx, garcia), vec![kid]);
    assert_eq!(ctx.entry(kid).unwrap().state(), EntityState::Unchanged);
}

#[test]
fn deleting_an_optional_principal_nulls_dependents() {
    let mut ctx = Context::new(garcia_model());
    let garcia = new_entity(&mut ctx, "Garcia", &[("Id", Value::Int(5))]);
    let kid = new_entity(&mut ctx, "Kid", &[("Id", Value::Int(1)), ("GarciaId", Value::Int(5))]);
    ctx.attach_range(&[garcia, kid]).unwrap();
    assert_eq!(ctx.entry(kid).unwrap().state(), EntityState::Unchanged);

    ctx.remove(garcia).unwrap();

    assert_eq!(ctx.entry(garcia).unwrap().state(), EntityState::Deleted);
    let entry = ctx.entry(kid).unwrap();
    assert_eq!(entry.state(), EntityState::Modified);
    assert_eq!(entry.current_value_as::<Option<i32>>("GarciaId").unwrap(), None);
}

#[test]
fn deleting_a_required_principal_cascades() {
    let mut ctx = Context::new(owned_model());
    let order = new_entity(&mut ctx, "Order", &[("Id", Value::Int(1))]);
    let line = new_entity(&mut ctx, "OrderLine", &[("Id", Value::Int(10))]);
    push(&mut ctx, order, "Lines", line);
    ctx.attach(order).unwrap();

    ctx.remove(order).unwrap();

    assert_eq!(ctx.entry(line).unwrap().state(), EntityState::Deleted);
}

#[test]
fn deferred_cascade_waits_for_cascade_changes() {
    let config = TrackingConfig::new().cascade_delete_timing(CascadeTiming::OnSaveChanges);
    let mut ctx = Context::with_config(owned_model(), config);
    let order = new_entity(&mut ctx, "Order", &[("Id", Value::Int(1))]);
    let line = new_entity(&mut ctx, "OrderLine", &[("Id", Value::Int(10))]);
    push(&mut ctx, order, "Lines", line);
    ctx.attach(order).unwrap();

    ctx.remove(order).unwrap();
    assert_eq!(ctx.entry(line).unwrap().state(), EntityState::Unchanged);

    ctx.cascade_changes().unwrap();
    assert_eq!(ctx.entry(line).unwrap().state(), EntityState::Deleted);
}

#[test]
fn removing_from_a_required_collection_deletes_the_orphan() {
    let mut ctx = Context::new(owned_model());
    let order = new_entity(&mut ctx, "Order", &[("Id", Value::Int(1))]);
    let line = new_entity(&mut ctx, "OrderLine", &[("Id", Value::Int(10))]);
    push(&mut ctx, order, "Lines", line);
    ctx.attach(order).unwrap();

    ctx.entry(order).unwrap().collection("Lines").unwrap().remove(line).unwrap();

    assert_eq!(ctx.entry(line).unwrap().state(), EntityState::Deleted);
}
