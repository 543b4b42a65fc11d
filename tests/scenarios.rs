mod common;

use std::collections::HashMap;

use common::{access_const_perm_pos, const_class, link_const, rw_context};
use semnet::content::ContentFormat;
use semnet::error::EngineError;
use semnet::iter::Constraint;
use semnet::template::{Position, Template};

#[test]
fn s1_create_triple_is_iterable() {
    let ctx = rw_context();
    let n1 = ctx.create_node(const_class()).unwrap();
    let n2 = ctx.create_node(const_class()).unwrap();
    let e = ctx.create_connector(access_const_perm_pos(), n1, n2).unwrap();

    let mut it = ctx
        .iter3(Constraint::Addr(n1), Constraint::Type(access_const_perm_pos()), Constraint::Type(const_class()))
        .unwrap();
    assert!(it.next());
    assert_eq!(it.get(1), Some(e));
    assert_eq!(it.get(2), Some(n2));
    assert!(!it.next());
}

#[test]
fn s2_erase_cascades() {
    let ctx = rw_context();
    let n1 = ctx.create_node(const_class()).unwrap();
    let n2 = ctx.create_node(const_class()).unwrap();
    let e = ctx.create_connector(access_const_perm_pos(), n1, n2).unwrap();

    ctx.erase(n1).unwrap();

    assert!(!ctx.is_element(n1));
    assert!(!ctx.is_element(e));
    assert!(ctx.is_element(n2));
}

#[test]
fn s3_template_search_finds_every_arc_into_k() {
    let ctx = rw_context();
    let k = ctx.create_node(const_class()).unwrap();
    let a = ctx.create_node(const_class()).unwrap();
    let b = ctx.create_node(const_class()).unwrap();
    ctx.create_connector(access_const_perm_pos(), a, k).unwrap();
    ctx.create_connector(access_const_perm_pos(), b, k).unwrap();

    let template = Template::new().with_triple(
        Position::Replacement("x".to_string(), const_class()),
        Position::Type(access_const_perm_pos()),
        Position::Addr(k),
    );
    let result = ctx.search(&template, &HashMap::new()).unwrap();

    assert_eq!(result.items.len(), 2);
    let xs: Vec<_> = result.items.iter().map(|i| i.bindings["x"]).collect();
    assert!(xs.contains(&a) && xs.contains(&b));
}

#[test]
fn s4_dictionary_resolve_is_idempotent_and_rejects_rebind() {
    let ctx = rw_context();
    let a = ctx.dict_resolve("foo", const_class()).unwrap();
    let b = ctx.dict_resolve("foo", const_class()).unwrap();
    assert_eq!(a, b);

    let other = ctx.create_node(const_class()).unwrap();
    assert_eq!(ctx.dict_set("foo", other), Err(EngineError::InvalidState));
}

#[test]
fn s5_transaction_rollback_discards_staged_creates_and_emits_no_events() {
    let ctx = rw_context();
    let a = ctx.create_node(const_class()).unwrap();

    let mut txn = ctx.begin_next().unwrap();
    let _pending = txn.create_connector(access_const_perm_pos(), a, a).unwrap();
    txn.rollback();

    let arrived = ctx.wait_for_event(
        semnet::events::EventKind::AddOutgoingArc,
        a,
        std::time::Duration::from_millis(200),
    );
    assert!(arrived.is_none());
}

#[test]
fn s6_link_content_round_trip() {
    let ctx = rw_context();
    let l = ctx.create_link(link_const()).unwrap();
    ctx.set_link_content(l, 43.567_f32.to_le_bytes().to_vec(), ContentFormat::Float)
        .unwrap();
    let content = ctx.get_link_content(l).unwrap();
    assert!((content.as_float().unwrap() - 43.567_f64).abs() < 1e-4);
    assert_eq!(content.as_int(), Err(EngineError::InvalidType));
}
