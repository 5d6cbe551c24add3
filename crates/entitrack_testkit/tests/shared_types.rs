//! Several entity types mapping one instance shape.

use entitrack_core::{Context, EntityState, Value};
use entitrack_testkit::prelude::*;

fn tag(ctx: &mut Context, entity_type: &str, id: i32) -> EntityHandle {
    new_entity(ctx, entity_type, &[("Id", Value::Int(id)), ("Label", Value::from(entity_type))])
}

#[test]
fn shared_types_keep_separate_key_spaces() {
    init_test_tracing();
    let mut ctx = Context::new(shared_type_model());
    let post_tag = tag(&mut ctx, "Tags#Post", 1);
    let blog_tag = tag(&mut ctx, "Tags#Blog", 1);

    ctx.attach(post_tag).unwrap();
    ctx.attach(blog_tag).unwrap();
    assert_eq!(ctx.entry(post_tag).unwrap().state(), EntityState::Unchanged);
    assert_eq!(ctx.entry(blog_tag).unwrap().state(), EntityState::Unchanged);

    let found = ctx.local("Tags#Post").unwrap().find_entry(1).unwrap().map(|e| e.handle());
    assert_eq!(found, Some(post_tag));
    let found = ctx.local("Tags#Blog").unwrap().find_entry(1).unwrap().map(|e| e.handle());
    assert_eq!(found, Some(blog_tag));
}

#[test]
fn key_conflicts_are_still_detected_within_one_shared_type() {
    let mut ctx = Context::new(shared_type_model());
    let first = tag(&mut ctx, "Tags#Post", 1);
    let second = tag(&mut ctx, "Tags#Post", 1);

    ctx.attach(first).unwrap();
    let err = ctx.attach(second).unwrap_err();
    assert!(err.is_identity_conflict());
    assert_eq!(ctx.entry(second).unwrap().state(), EntityState::Detached);
}

#[test]
fn shared_type_entries_report_their_own_mapping() {
    let mut ctx = Context::new(shared_type_model());
    let blog_tag = tag(&mut ctx, "Tags#Blog", 3);
    ctx.add(blog_tag).unwrap();

    let entry = ctx.entry(blog_tag).unwrap();
    assert_eq!(entry.entity_type().name(), "Tags#Blog");
    assert_eq!(entry.entity_type().clr_name(), "Tag");
    assert!(ctx.local("Tags#Post").unwrap().find_entry(3).unwrap().is_none());
}
