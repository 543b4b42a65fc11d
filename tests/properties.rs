mod common;

use common::{const_class, rw_context};
use proptest::prelude::*;
use semnet::address::Address;

proptest! {
    #[test]
    fn address_u64_round_trips(segment in 0u32..0x00FF_FFFF, offset in 0u32..0x00FF_FFFF, generation in 0u32..0xFFFF) {
        let bits = (u64::from(segment) << 40) | (u64::from(offset) << 16) | u64::from(generation);
        let addr = Address::from_u64(bits);
        prop_assert_eq!(Address::from_u64(addr.as_u64()), addr);
    }

    #[test]
    fn dictionary_resolve_is_stable_under_repeated_calls(name in "[A-Za-z][A-Za-z0-9_]{0,31}") {
        let ctx = rw_context();
        let first = ctx.dict_resolve(&name, const_class()).unwrap();
        for _ in 0..5 {
            let again = ctx.dict_resolve(&name, const_class()).unwrap();
            prop_assert_eq!(again, first);
        }
    }

    #[test]
    fn distinct_names_never_collide(a in "[A-Za-z][A-Za-z0-9_]{0,15}", b in "[A-Za-z][A-Za-z0-9_]{0,15}") {
        prop_assume!(a != b);
        let ctx = rw_context();
        let addr_a = ctx.dict_resolve(&a, const_class()).unwrap();
        let addr_b = ctx.dict_resolve(&b, const_class()).unwrap();
        prop_assert_ne!(addr_a, addr_b);
    }
}
