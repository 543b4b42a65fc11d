mod common;

use std::collections::HashMap;

use common::{access_const_perm_pos, const_class, link_const, rw_context, var_node};
use semnet::content::ContentFormat;
use semnet::error::EngineError;
use semnet::iter::Constraint;
use semnet::template::{Position, Template};

#[test]
fn invariant_1_address_liveness_survives_only_until_erase() {
    let ctx = rw_context();
    let n = ctx.create_node(const_class()).unwrap();
    assert!(ctx.is_element(n));
    ctx.erase(n).unwrap();
    assert!(!ctx.is_element(n));
}

#[test]
fn invariant_2_connector_appears_in_both_adjacency_directions() {
    let ctx = rw_context();
    let a = ctx.create_node(const_class()).unwrap();
    let b = ctx.create_node(const_class()).unwrap();
    let e = ctx.create_connector(access_const_perm_pos(), a, b).unwrap();

    let mut out = ctx
        .iter3(Constraint::Addr(a), Constraint::Type(access_const_perm_pos()), Constraint::Type(const_class()))
        .unwrap();
    assert!(out.next());
    assert_eq!(out.get(1), Some(e));
    assert!(!out.next());
}

#[test]
fn invariant_3_erase_removes_all_references() {
    let ctx = rw_context();
    let a = ctx.create_node(const_class()).unwrap();
    let b = ctx.create_node(const_class()).unwrap();
    let e = ctx.create_connector(access_const_perm_pos(), a, b).unwrap();

    ctx.erase(a).unwrap();

    assert!(!ctx.is_element(e));
    assert_eq!(ctx.connector_endpoints(e), Err(EngineError::NotFound));
}

#[test]
fn invariant_4_dictionary_is_injective_across_unrelated_mutations() {
    let ctx = rw_context();
    let bound = ctx.dict_resolve("stable-name", const_class()).unwrap();

    // Unrelated mutation elsewhere in the graph must not disturb the binding.
    let other = ctx.create_node(const_class()).unwrap();
    let _ = ctx.create_connector(access_const_perm_pos(), bound, other).unwrap();

    assert_eq!(ctx.dict_find("stable-name"), Some(bound));
}

#[test]
fn invariant_6_failed_apply_leaves_store_unchanged() {
    let ctx = rw_context();
    let a = ctx.create_node(const_class()).unwrap();

    let mut txn = ctx.begin_next().unwrap();
    txn.modify_type(a, const_class()).unwrap();

    // Invalidate the captured version out from under the transaction by
    // committing an unrelated change to the same element first.
    ctx.create_connector(access_const_perm_pos(), a, a).unwrap();
    let mut other_txn = ctx.begin_next().unwrap();
    other_txn.modify_type(a, const_class()).unwrap();
    other_txn.apply().unwrap();

    let before = ctx.element_type(a).unwrap();
    let result = txn.apply();
    assert_eq!(result.err(), Some(EngineError::InvalidState));
    assert_eq!(ctx.element_type(a).unwrap(), before);
}

#[test]
fn invariant_6_overlapping_staged_erases_do_not_fail_on_the_second_cascade() {
    let ctx = rw_context();
    let n1 = ctx.create_node(const_class()).unwrap();
    let n2 = ctx.create_node(const_class()).unwrap();
    let e1 = ctx.create_connector(access_const_perm_pos(), n1, n2).unwrap();

    let mut txn = ctx.begin_next().unwrap();
    txn.erase(n1).unwrap();
    // e1 is already part of n1's reachable cascade; staging it again must not
    // make `apply()` fail once n1's cascade has already removed it.
    txn.erase(e1).unwrap();
    txn.apply().unwrap();

    assert!(!ctx.is_element(n1));
    assert!(!ctx.is_element(e1));
    assert!(ctx.is_element(n2));
}

#[test]
fn invariant_5_template_round_trip_search_extends_generate_bindings() {
    let ctx = rw_context();
    let k = ctx.create_node(const_class()).unwrap();

    let template = Template::new().with_triple(
        Position::Replacement("x".into(), var_node()),
        Position::Type(access_const_perm_pos()),
        Position::Addr(k),
    );

    let params = HashMap::new();
    let generated = ctx.generate(&template, &params).unwrap();
    let x = *generated.bindings.get("x").unwrap();

    let found = ctx.search(&template, &params).unwrap();
    assert!(found
        .items
        .iter()
        .any(|item| item.bindings.get("x") == Some(&x)));
}

#[test]
fn invariant_7_events_for_a_subject_arrive_in_commit_order() {
    let ctx = rw_context();
    let l = ctx.create_link(link_const()).unwrap();

    ctx.set_link_content(l, b"first".to_vec(), ContentFormat::String).unwrap();
    let first = ctx
        .wait_for_event(semnet::events::EventKind::ChangeContent, l, std::time::Duration::from_secs(1))
        .unwrap();

    ctx.set_link_content(l, b"second".to_vec(), ContentFormat::String).unwrap();
    let second = ctx
        .wait_for_event(semnet::events::EventKind::ChangeContent, l, std::time::Duration::from_secs(1))
        .unwrap();

    assert_eq!(first.kind, semnet::events::EventKind::ChangeContent);
    assert_eq!(second.kind, semnet::events::EventKind::ChangeContent);
}
