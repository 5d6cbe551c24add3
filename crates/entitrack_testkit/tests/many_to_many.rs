//! Skip navigations and join entries.

use entitrack_core::{Context, EntityState, Value};
use entitrack_testkit::prelude::*;

struct Cherries {
    ctx: Context,
    cherry1: EntityHandle,
    cherry2: EntityHandle,
    chunky: EntityHandle,
    join: EntityHandle,
}

fn linked_cherries() -> Cherries {
    let mut ctx = Context::new(cherry_model());
    let cherry1 = new_entity(&mut ctx, "Cherry", &[("Id", Value::Int(1))]);
    let cherry2 = new_entity(&mut ctx, "Cherry", &[("Id", Value::Int(2))]);
    let chunky = new_entity(&mut ctx, "Chunky", &[("Id", Value::Int(1))]);
    let join = new_entity(
        &mut ctx,
        "CherryChunky",
        &[
            ("Id", Value::Int(1)),
            ("CherryId", Value::Int(1)),
            ("ChunkyId", Value::Int(1)),
        ],
    );
    ctx.attach_range(&[cherry1, cherry2, chunky, join]).unwrap();
    Cherries {
        ctx,
        cherry1,
        cherry2,
        chunky,
        join,
    }
}

fn members(ctx: &Context, owner: EntityHandle, navigation: &str) -> Vec<EntityHandle> {
    ctx.object(owner).unwrap().collection(navigation).unwrap().to_vec()
}

fn skip_modified(ctx: &mut Context, owner: EntityHandle, navigation: &str) -> bool {
    ctx.entry(owner)
        .unwrap()
        .collection(navigation)
        .unwrap()
        .is_modified()
        .unwrap()
}

#[test]
fn tracked_join_entries_populate_both_skip_navigations() {
    init_test_tracing();
    let Cherries {
        ctx,
        cherry1,
        cherry2,
        chunky,
        ..
    } = linked_cherries();

    assert_eq!(members(&ctx, cherry1, "Chunkies"), vec![chunky]);
    assert!(members(&ctx, cherry2, "Chunkies").is_empty());
    assert_eq!(members(&ctx, chunky, "Cherries"), vec![cherry1]);
}

#[test]
fn moving_a_join_entry_moves_is_modified_to_the_new_endpoint() {
    let Cherries {
        mut ctx,
        cherry1,
        cherry2,
        chunky,
        join,
    } = linked_cherries();

    ctx.entry(join).unwrap().set_current_value("CherryId", 2).unwrap();

    assert_eq!(ctx.entry(join).unwrap().state(), EntityState::Modified);
    assert!(skip_modified(&mut ctx, cherry2, "Chunkies"));
    assert!(!skip_modified(&mut ctx, cherry1, "Chunkies"));
    assert!(!skip_modified(&mut ctx, chunky, "Cherries"));

    for endpoint in [cherry1, cherry2, chunky] {
        assert_eq!(ctx.entry(endpoint).unwrap().state(), EntityState::Unchanged);
    }
    assert_eq!(members(&ctx, cherry2, "Chunkies"), vec![chunky]);
    assert!(members(&ctx, cherry1, "Chunkies").is_empty());
    assert_eq!(members(&ctx, chunky, "Cherries"), vec![cherry2]);
}

#[test]
fn adding_to_a_skip_navigation_creates_an_added_join_entry() {
    let Cherries {
        mut ctx,
        cherry1,
        chunky,
        ..
    } = linked_cherries();
    let other = new_entity(&mut ctx, "Chunky", &[("Id", Value::Int(2))]);
    ctx.attach(other).unwrap();

    ctx.entry(cherry1)
        .unwrap()
        .collection("Chunkies")
        .unwrap()
        .add(other)
        .unwrap();

    assert_eq!(members(&ctx, other, "Cherries"), vec![cherry1]);
    let joins = ctx
        .local("CherryChunky")
        .unwrap()
        .get_entries_by_properties(&["CherryId", "ChunkyId"], &[Value::Int(1), Value::Int(2)])
        .unwrap();
    assert_eq!(joins.len(), 1);
    assert_eq!(ctx.entry(joins[0]).unwrap().state(), EntityState::Added);
    assert!(skip_modified(&mut ctx, cherry1, "Chunkies"));
    assert!(!skip_modified(&mut ctx, chunky, "Cherries"));
}

#[test]
fn removing_from_a_skip_navigation_deletes_the_join_entry() {
    let Cherries {
        mut ctx,
        cherry1,
        chunky,
        join,
        ..
    } = linked_cherries();

    let removed = ctx
        .entry(cherry1)
        .unwrap()
        .collection("Chunkies")
        .unwrap()
        .remove(chunky)
        .unwrap();

    assert!(removed);
    assert_eq!(ctx.entry(join).unwrap().state(), EntityState::Deleted);
    assert!(members(&ctx, chunky, "Cherries").is_empty());
}

#[test]
fn implicit_join_entries_are_created_for_attached_graphs() {
    let mut ctx = Context::new(enrollment_model());
    let student = new_entity(&mut ctx, "Student", &[("Id", Value::Int(1))]);
    let first = new_entity(&mut ctx, "Course", &[("Id", Value::Int(1))]);
    let second = new_entity(&mut ctx, "Course", &[("Id", Value::Int(2))]);
    push(&mut ctx, student, "Courses", first);
    push(&mut ctx, student, "Courses", second);

    ctx.attach(student).unwrap();

    let joins = ctx.local("Enrollment").unwrap().entries();
    assert_eq!(joins.len(), 2);
    for join in joins {
        assert_eq!(ctx.entry(join).unwrap().state(), EntityState::Unchanged);
    }
    assert_eq!(members(&ctx, first, "Students"), vec![student]);
    assert_eq!(members(&ctx, second, "Students"), vec![student]);
    assert!(!ctx.has_changes().unwrap());
}
