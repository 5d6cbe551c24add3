//! Complex properties.

use entitrack_core::{Context, EntityState, MemberEntry, TrackError, Value};
use entitrack_testkit::prelude::*;

fn tracked_customer(ctx: &mut Context) -> EntityHandle {
    let customer = new_entity(
        ctx,
        "Customer",
        &[
            ("Id", Value::Int(1)),
            ("Address.Street", Value::from("Main")),
            ("Address.City", Value::from("Lisbon")),
            ("Address.Country.Code", Value::from("PT")),
        ],
    );
    ctx.attach(customer).unwrap();
    customer
}

#[test]
fn complex_members_are_flattened_onto_the_owner() {
    let model = complex_model();
    let customer = model.find_entity_type("Customer").unwrap();
    assert!(customer.find_property("Address.Street").is_some());
    assert!(customer.find_property("Address.Country.Code").is_some());

    let address = customer.complex_property_by_name("Address").unwrap();
    assert_eq!(address.properties().len(), 3);
    let country = customer.complex_property_by_name("Address.Country").unwrap();
    assert_eq!(country.parent(), Some(address.index()));
}

#[test]
fn writing_a_member_modifies_the_complex_property() {
    init_test_tracing();
    let mut ctx = Context::new(complex_model());
    let customer = tracked_customer(&mut ctx);

    let mut entry = ctx.entry(customer).unwrap();
    let mut address = entry.complex_property("Address").unwrap();
    assert!(!address.is_modified().unwrap());

    address.property("City").unwrap().set_current_value("Porto").unwrap();
    assert!(address.is_modified().unwrap());
    assert!(!address.complex_property("Country").unwrap().is_modified().unwrap());
    assert_eq!(entry.state(), EntityState::Modified);
}

#[test]
fn nested_member_changes_bubble_up() {
    let mut ctx = Context::new(complex_model());
    let customer = tracked_customer(&mut ctx);

    ctx.object_mut(customer)
        .unwrap()
        .set("Address.Country.Code", "ES")
        .unwrap();
    ctx.detect_changes().unwrap();

    let mut entry = ctx.entry(customer).unwrap();
    assert!(entry.complex_property("Address.Country").unwrap().is_modified().unwrap());
    assert!(entry.complex_property("Address").unwrap().is_modified().unwrap());
    assert!(!entry.property("Name").unwrap().is_modified().unwrap());
}

#[test]
fn set_is_modified_applies_to_every_member() {
    let mut ctx = Context::new(complex_model());
    let customer = tracked_customer(&mut ctx);

    let mut entry = ctx.entry(customer).unwrap();
    entry.complex_property("Address").unwrap().set_is_modified(true).unwrap();
    for name in ["Address.Street", "Address.City", "Address.Country.Code"] {
        assert!(entry.property(name).unwrap().is_modified().unwrap(), "{name}");
    }
    assert!(!entry.property("Name").unwrap().is_modified().unwrap());

    entry.complex_property("Address").unwrap().set_is_modified(false).unwrap();
    assert_eq!(entry.state(), EntityState::Unchanged);
}

#[test]
fn complex_current_values_follow_member_order() {
    let mut ctx = Context::new(complex_model());
    let customer = tracked_customer(&mut ctx);

    let mut entry = ctx.entry(customer).unwrap();
    let values = entry.complex_property("Address").unwrap().current_values().unwrap();
    assert_eq!(
        values,
        vec![Value::from("Main"), Value::from("Lisbon"), Value::from("PT")]
    );
}

#[test]
fn complex_members_are_scoped_to_their_property() {
    let mut ctx = Context::new(complex_model());
    let customer = tracked_customer(&mut ctx);

    let mut entry = ctx.entry(customer).unwrap();
    let mut address = entry.complex_property("Address").unwrap();
    assert!(matches!(
        address.property("Code"),
        Err(TrackError::UnknownMember { .. })
    ));
    assert!(matches!(
        address.complex_property("Street"),
        Err(TrackError::UnknownMember { .. })
    ));
    assert!(matches!(
        entry.member("Address").unwrap(),
        MemberEntry::ComplexProperty(_)
    ));
}

#[test]
fn set_current_values_writes_each_member_through_the_tracker() {
    let mut ctx = Context::new(complex_model());
    let customer = tracked_customer(&mut ctx);

    let mut entry = ctx.entry(customer).unwrap();
    let mut address = entry.complex_property("Address").unwrap();
    address
        .set_current_values(&[Value::from("Main"), Value::from("Porto"), Value::from("PT")])
        .unwrap();
    assert!(address.is_modified().unwrap());
    assert!(!address.complex_property("Country").unwrap().is_modified().unwrap());
    assert_eq!(address.entity_entry().state(), EntityState::Modified);

    assert!(entry.property("Address.City").unwrap().is_modified().unwrap());
    assert!(!entry.property("Address.Street").unwrap().is_modified().unwrap());

    let mut address = entry.complex_property("Address").unwrap();
    address
        .set_current_values(&[Value::from("Main"), Value::from("Lisbon"), Value::from("PT")])
        .unwrap();
    assert!(!address.is_modified().unwrap());
    assert_eq!(entry.state(), EntityState::Unchanged);
}

#[test]
fn set_current_values_needs_one_value_per_member() {
    let mut ctx = Context::new(complex_model());
    let customer = tracked_customer(&mut ctx);

    let mut entry = ctx.entry(customer).unwrap();
    let err = entry
        .complex_property("Address")
        .unwrap()
        .set_current_values(&[Value::from("Main")])
        .unwrap_err();
    assert!(matches!(
        err,
        TrackError::KeyValueCountMismatch {
            expected: 3,
            actual: 1,
            ..
        }
    ));
    assert_eq!(entry.state(), EntityState::Unchanged);
}

#[test]
fn complex_entry_leads_back_to_its_owner() {
    let mut ctx = Context::new(complex_model());
    let customer = tracked_customer(&mut ctx);

    let mut entry = ctx.entry(customer).unwrap();
    let mut country = entry.complex_property("Address.Country").unwrap();
    assert_eq!(country.entity_entry().handle(), customer);
}
