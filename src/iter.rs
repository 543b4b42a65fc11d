//! Iteration kernel: 3- and 5-position constraint iterators.
//!
//! Iterators are single-pass and hold no locks between `next()` calls; each
//! advance revalidates the elements it touches via [`ElementStore::is_element`]
//! generation checks rather than holding a lock across the whole walk.

use crate::address::Address;
use crate::error::{EngineError, EngineResult};
use crate::store::ElementStore;
use crate::types::ElementType;

/// One position in a 3- or 5-position constraint: a fixed address or a type filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Addr(Address),
    Type(ElementType),
}

impl Constraint {
    fn fixed(self) -> Option<Address> {
        match self {
            Self::Addr(addr) => Some(addr),
            Self::Type(_) => None,
        }
    }

    fn matches(self, addr: Address, store: &ElementStore) -> bool {
        match self {
            Self::Addr(fixed) => fixed == addr,
            Self::Type(ty) => store.element_type(addr) == Ok(ty),
        }
    }
}

enum Anchor {
    /// Walk `p1`'s outgoing list, filtering the target against `p3`.
    Source,
    /// Walk `p3`'s incoming list, filtering the source against `p1`.
    Target,
}

/// Constraint iterator over `(p1, p2, p3)` where `p2` names a connector.
pub struct Iter3<'a> {
    store: &'a ElementStore,
    p1: Constraint,
    p2: Constraint,
    p3: Constraint,
    cursor: crate::store::AdjacencyIter<'a>,
    current: Option<(Address, Address, Address)>,
}

impl<'a> Iter3<'a> {
    /// Builds an iterator, choosing the smaller of the two fixed adjacency
    /// lists as the walk's starting point.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidParams`] if neither `p1` nor `p3` is a
    /// fixed address — there would be no adjacency list to walk.
    pub fn new(
        store: &'a ElementStore,
        p1: Constraint,
        p2: Constraint,
        p3: Constraint,
    ) -> EngineResult<Self> {
        let anchor = match (p1.fixed(), p3.fixed()) {
            (Some(a), Some(b)) => {
                let out_len = store.adjacency_len_estimate(a, false);
                let in_len = store.adjacency_len_estimate(b, true);
                if out_len <= in_len {
                    Anchor::Source
                } else {
                    Anchor::Target
                }
            }
            (Some(_), None) => Anchor::Source,
            (None, Some(_)) => Anchor::Target,
            (None, None) => return Err(EngineError::InvalidParams),
        };

        let cursor = match anchor {
            Anchor::Source => store.adjacency_iter(p1.fixed().expect("checked above"), false),
            Anchor::Target => store.adjacency_iter(p3.fixed().expect("checked above"), true),
        };

        Ok(Self {
            store,
            p1,
            p2,
            p3,
            cursor,
            current: None,
        })
    }

    /// Advances to the next matching tuple, returning `true` if one was found.
    pub fn next(&mut self) -> bool {
        for connector in self.cursor.by_ref() {
            if !self.p2.matches(connector, self.store) {
                continue;
            }
            let Ok(Some((source, target))) = self.store.connector_endpoints(connector) else {
                continue;
            };
            if self.p1.matches(source, self.store) && self.p3.matches(target, self.store) {
                self.current = Some((source, connector, target));
                return true;
            }
        }
        self.current = None;
        false
    }

    /// Reads position `index` (0=source, 1=connector, 2=target) of the current tuple.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Address> {
        let (source, connector, target) = self.current?;
        match index {
            0 => Some(source),
            1 => Some(connector),
            2 => Some(target),
            _ => None,
        }
    }
}

/// Constraint iterator over `(p1, p2, p3, p4, p5)`: a 3-iterator over
/// `(p1, p2, p3)` plus a second connector `p4` from relation node `p5` to
/// the primary connector found for `p2`.
pub struct Iter5<'a> {
    store: &'a ElementStore,
    outer: Iter3<'a>,
    p4: Constraint,
    p5: Constraint,
    inner: Option<crate::store::AdjacencyIter<'a>>,
    current: Option<(Address, Address, Address, Address, Address)>,
}

impl<'a> Iter5<'a> {
    /// # Errors
    /// Propagates [`Iter3::new`]'s error when the primary triple has no fixed endpoint.
    pub fn new(
        store: &'a ElementStore,
        p1: Constraint,
        p2: Constraint,
        p3: Constraint,
        p4: Constraint,
        p5: Constraint,
    ) -> EngineResult<Self> {
        let outer = Iter3::new(store, p1, p2, p3)?;
        Ok(Self {
            store,
            outer,
            p4,
            p5,
            inner: None,
            current: None,
        })
    }

    /// Advances to the next matching quintuple.
    pub fn next(&mut self) -> bool {
        loop {
            if let Some(inner) = self.inner.as_mut() {
                for attribute in inner.by_ref() {
                    if !self.p4.matches(attribute, self.store) {
                        continue;
                    }
                    let Ok(Some((attr_source, _attr_target))) =
                        self.store.connector_endpoints(attribute)
                    else {
                        continue;
                    };
                    if self.p5.matches(attr_source, self.store) {
                        let (p1, p2, p3) = (
                            self.outer.get(0).expect("outer advanced"),
                            self.outer.get(1).expect("outer advanced"),
                            self.outer.get(2).expect("outer advanced"),
                        );
                        self.current = Some((p1, p2, p3, attribute, attr_source));
                        return true;
                    }
                }
            }
            if !self.outer.next() {
                self.current = None;
                return false;
            }
            let primary = self.outer.get(1).expect("outer.next() returned true");
            self.inner = Some(self.store.adjacency_iter(primary, true));
        }
    }

    /// Reads position `index` (0..=4, matching `p1..p5`) of the current quintuple.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Address> {
        let (p1, p2, p3, p4, p5) = self.current?;
        match index {
            0 => Some(p1),
            1 => Some(p2),
            2 => Some(p3),
            3 => Some(p4),
            4 => Some(p5),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::{Constancy, Direction, Permanence, RoleTag, Sign};

    fn class_ty() -> ElementType {
        ElementType::node(Constancy::Const, RoleTag::Class)
    }

    fn arc_ty() -> ElementType {
        ElementType::connector(Constancy::Const, Direction::Access, Permanence::Perm, Sign::Positive)
    }

    #[test]
    fn iter3_finds_triple_from_fixed_source() {
        let store = ElementStore::new(EngineConfig::default().segment_capacity);
        let n1 = store.create_node(class_ty()).unwrap();
        let n2 = store.create_node(class_ty()).unwrap();
        let e = store.create_connector(arc_ty(), n1, n2).unwrap();

        let mut it = Iter3::new(
            &store,
            Constraint::Addr(n1),
            Constraint::Type(arc_ty()),
            Constraint::Type(class_ty()),
        )
        .unwrap();
        assert!(it.next());
        assert_eq!(it.get(1), Some(e));
        assert_eq!(it.get(2), Some(n2));
        assert!(!it.next());
    }

    #[test]
    fn iter3_requires_one_fixed_endpoint() {
        let store = ElementStore::new(EngineConfig::default().segment_capacity);
        let result = Iter3::new(
            &store,
            Constraint::Type(class_ty()),
            Constraint::Type(arc_ty()),
            Constraint::Type(class_ty()),
        );
        assert_eq!(result.err(), Some(EngineError::InvalidParams));
    }

    #[test]
    fn iter3_both_fixed_picks_smaller_side() {
        let store = ElementStore::new(EngineConfig::default().segment_capacity);
        let n1 = store.create_node(class_ty()).unwrap();
        let n2 = store.create_node(class_ty()).unwrap();
        let other = store.create_node(class_ty()).unwrap();
        store.create_connector(arc_ty(), n1, other).unwrap();
        let e = store.create_connector(arc_ty(), n1, n2).unwrap();

        let mut it = Iter3::new(
            &store,
            Constraint::Addr(n1),
            Constraint::Type(arc_ty()),
            Constraint::Addr(n2),
        )
        .unwrap();
        assert!(it.next());
        assert_eq!(it.get(1), Some(e));
        assert!(!it.next());
    }

    #[test]
    fn iter5_finds_quintuple_via_attribute_arc() {
        let store = ElementStore::new(EngineConfig::default().segment_capacity);
        let n1 = store.create_node(class_ty()).unwrap();
        let n2 = store.create_node(class_ty()).unwrap();
        let relation = store.create_node(class_ty()).unwrap();
        let primary = store.create_connector(arc_ty(), n1, n2).unwrap();
        let attribute = store.create_connector(arc_ty(), relation, primary).unwrap();

        let mut it = Iter5::new(
            &store,
            Constraint::Addr(n1),
            Constraint::Type(arc_ty()),
            Constraint::Type(class_ty()),
            Constraint::Type(arc_ty()),
            Constraint::Addr(relation),
        )
        .unwrap();
        assert!(it.next());
        assert_eq!(it.get(1), Some(primary));
        assert_eq!(it.get(3), Some(attribute));
        assert_eq!(it.get(4), Some(relation));
        assert!(!it.next());
    }
}
