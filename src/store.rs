//! The element store: a segmented arena with intrusive adjacency lists.
//!
//! Locking follows two tiers: a global [`parking_lot::RwLock`]
//! guards segment *allocation* (pushing a new segment), while every element
//! slot carries its own [`parking_lot::Mutex`] — the "per-element monitor".
//! Operations that must touch two elements atomically (linking a freshly
//! created connector into its source's and target's adjacency lists) acquire
//! both monitors in ascending address order via [`ElementStore::with_ordered_pair`].

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::address::Address;
use crate::element::Element;
use crate::error::{EngineError, EngineResult};
use crate::types::ElementType;

/// Mutable per-slot state: the element itself (if occupied), its current
/// generation, and a commit-version counter consulted by [`crate::txbuf`]'s
/// `validate()`.
#[derive(Debug, Default)]
pub(crate) struct SlotState {
    pub element: Option<Element>,
    pub generation: u32,
    pub version: u64,
}

struct Segment {
    slots: Vec<Arc<Mutex<SlotState>>>,
    freelist: Mutex<Vec<u32>>,
}

impl Segment {
    fn new(capacity: u32) -> Self {
        let slots = (0..capacity)
            .map(|_| Arc::new(Mutex::new(SlotState::default())))
            .collect();
        // Reverse so `pop()` yields ascending offsets, purely cosmetic.
        let freelist = (0..capacity).rev().collect();
        Self {
            slots,
            freelist: Mutex::new(freelist),
        }
    }
}

/// Slotted arena of [`Element`]s with CRUD primitives and the intrusive
/// adjacency graph linking connectors to the nodes and links they touch.
pub struct ElementStore {
    segment_capacity: u32,
    segments: RwLock<Vec<Segment>>,
}

impl ElementStore {
    /// Creates an empty store whose segments hold `segment_capacity` slots each.
    #[must_use]
    pub fn new(segment_capacity: u32) -> Self {
        Self {
            segment_capacity: segment_capacity.max(1),
            segments: RwLock::new(Vec::new()),
        }
    }

    fn slot_arc(&self, addr: Address) -> Option<Arc<Mutex<SlotState>>> {
        if addr.is_empty() {
            return None;
        }
        let segments = self.segments.read();
        segments
            .get(addr.segment() as usize)
            .and_then(|seg| seg.slots.get(addr.offset() as usize))
            .cloned()
    }

    fn try_allocate_in_existing(&self) -> Option<(u32, u32, Arc<Mutex<SlotState>>)> {
        let segments = self.segments.read();
        for (idx, seg) in segments.iter().enumerate() {
            let mut freelist = seg.freelist.lock();
            if let Some(offset) = freelist.pop() {
                let arc = seg.slots[offset as usize].clone();
                return Some((u32::try_from(idx).unwrap_or(u32::MAX), offset, arc));
            }
        }
        None
    }

    fn allocate(&self, make: impl FnOnce() -> Element) -> Address {
        loop {
            if let Some((seg_idx, offset, arc)) = self.try_allocate_in_existing() {
                let mut slot = arc.lock();
                slot.element = Some(make());
                return Address::new(seg_idx, offset, slot.generation);
            }
            let mut segments = self.segments.write();
            segments.push(Segment::new(self.segment_capacity));
        }
    }

    fn get_element(&self, addr: Address) -> Option<Element> {
        let arc = self.slot_arc(addr)?;
        let slot = arc.lock();
        if slot.generation == addr.generation() {
            slot.element.clone()
        } else {
            None
        }
    }

    /// Locks two distinct slots in ascending address order and runs `f` with
    /// mutable access to both. Returns `None` if either address is invalid.
    ///
    /// Callers must special-case `a == b` themselves; this helper assumes the
    /// two addresses name distinct slots (it would otherwise need to hand out
    /// two aliasing `&mut` references to the same data).
    fn with_ordered_pair<R>(
        &self,
        a: Address,
        b: Address,
        f: impl FnOnce(&mut SlotState, &mut SlotState) -> R,
    ) -> Option<R> {
        debug_assert_ne!(a, b, "with_ordered_pair requires distinct addresses");
        let arc_a = self.slot_arc(a)?;
        let arc_b = self.slot_arc(b)?;
        let (first, second) = if a < b {
            (&arc_a, &arc_b)
        } else {
            (&arc_b, &arc_a)
        };
        let mut guard_first = first.lock();
        let mut guard_second = second.lock();
        Some(if a < b {
            f(&mut guard_first, &mut guard_second)
        } else {
            f(&mut guard_second, &mut guard_first)
        })
    }

    fn push_freelist(&self, addr: Address) {
        let segments = self.segments.read();
        if let Some(seg) = segments.get(addr.segment() as usize) {
            seg.freelist.lock().push(addr.offset());
        }
    }

    /// Creates a node element and returns its address.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidParams`] if `ty` does not describe a node.
    pub fn create_node(&self, ty: ElementType) -> EngineResult<Address> {
        if !ty.is_node() {
            return Err(EngineError::InvalidParams);
        }
        Ok(self.allocate(|| Element::new_node_or_link(ty)))
    }

    /// Creates a link element and returns its address.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidParams`] if `ty` does not describe a link.
    pub fn create_link(&self, ty: ElementType) -> EngineResult<Address> {
        if !ty.is_link() {
            return Err(EngineError::InvalidParams);
        }
        Ok(self.allocate(|| Element::new_node_or_link(ty)))
    }

    /// Creates a connector between `source` and `target`, linking it into
    /// both elements' adjacency lists, and returns its address.
    ///
    /// # Errors
    /// - [`EngineError::InvalidParams`] if `ty` is not a connector type, or is
    ///   `var`/`unknown` constancy — only materialized elements may be linked.
    /// - [`EngineError::NotFound`] if `source` or `target` do not currently exist.
    pub fn create_connector(
        &self,
        ty: ElementType,
        source: Address,
        target: Address,
    ) -> EngineResult<Address> {
        if !ty.is_connector() {
            return Err(EngineError::InvalidParams);
        }
        if ty.is_var() || ty.is_unknown_constancy() {
            return Err(EngineError::InvalidParams);
        }
        if !self.is_element(source) || !self.is_element(target) {
            return Err(EngineError::NotFound);
        }

        let addr = self.allocate(|| Element::new_connector(ty, source, target));
        self.splice_into_adjacency(addr, source, target)?;
        Ok(addr)
    }

    /// Prepends `conn` onto `source`'s outgoing list and `target`'s incoming
    /// list, pointing `conn`'s own `next_outgoing`/`next_incoming` at the
    /// previous heads. `conn`'s own slot is locked separately and briefly,
    /// after `source`/`target` are released, since nothing else can be
    /// racing to read `conn`'s stale next-pointers in that window — either
    /// it was just allocated (create path) or it was just unlinked from its
    /// previous lists (retarget path).
    fn splice_into_adjacency(
        &self,
        conn: Address,
        source: Address,
        target: Address,
    ) -> EngineResult<()> {
        let (old_source_out, old_target_in) = if source == target {
            let arc = self.slot_arc(source).ok_or(EngineError::NotFound)?;
            let mut slot = arc.lock();
            let el = slot.element.as_mut().ok_or(EngineError::NotFound)?;
            let old_out = el.first_outgoing;
            let old_in = el.first_incoming;
            el.first_outgoing = conn;
            el.first_incoming = conn;
            (old_out, old_in)
        } else {
            self.with_ordered_pair(source, target, |source_slot, target_slot| {
                let old_out = source_slot.element.as_mut().map_or(Address::EMPTY, |el| {
                    let old = el.first_outgoing;
                    el.first_outgoing = conn;
                    old
                });
                let old_in = target_slot.element.as_mut().map_or(Address::EMPTY, |el| {
                    let old = el.first_incoming;
                    el.first_incoming = conn;
                    old
                });
                (old_out, old_in)
            })
            .ok_or(EngineError::NotFound)?
        };

        if let Some(arc) = self.slot_arc(conn) {
            let mut slot = arc.lock();
            if let Some(el) = slot.element.as_mut() {
                el.next_outgoing = old_source_out;
                el.next_incoming = old_target_in;
            }
        }

        Ok(())
    }

    /// Overwrites the type of a live element in place, keeping its
    /// adjacency/endpoints untouched. Used by [`crate::txbuf`]'s `modify` to
    /// realize a `Type`-bit field-mask change (e.g. constancy specialization).
    ///
    /// # Errors
    /// - [`EngineError::NotFound`] if `addr` is not currently live.
    /// - [`EngineError::InvalidParams`] if `new_ty`'s [`crate::types::Kind`]
    ///   differs from the element's current kind.
    pub(crate) fn set_element_type(&self, addr: Address, new_ty: ElementType) -> EngineResult<()> {
        let arc = self.slot_arc(addr).ok_or(EngineError::NotFound)?;
        let mut slot = arc.lock();
        if slot.generation != addr.generation() {
            return Err(EngineError::NotFound);
        }
        let el = slot.element.as_mut().ok_or(EngineError::NotFound)?;
        if el.ty.kind() != new_ty.kind() {
            return Err(EngineError::InvalidParams);
        }
        el.ty = new_ty;
        Ok(())
    }

    /// Unlinks a live connector from its current endpoints and relinks it to
    /// `new_source`/`new_target`. Used by [`crate::txbuf`]'s `modify` to
    /// realize `Source`/`Target` field-mask changes.
    ///
    /// # Errors
    /// - [`EngineError::NotFound`] if `addr`, `new_source`, or `new_target`
    ///   are not currently live, or `addr` is not a connector.
    pub(crate) fn retarget_connector(
        &self,
        addr: Address,
        new_source: Address,
        new_target: Address,
    ) -> EngineResult<()> {
        let el = self.get_element(addr).ok_or(EngineError::NotFound)?;
        let Some((old_source, old_target)) = el.endpoints else {
            return Err(EngineError::NotFound);
        };
        if !self.is_element(new_source) || !self.is_element(new_target) {
            return Err(EngineError::NotFound);
        }

        self.unlink_from_list(old_source, addr, false);
        self.unlink_from_list(old_target, addr, true);

        if let Some(arc) = self.slot_arc(addr) {
            let mut slot = arc.lock();
            if let Some(el) = slot.element.as_mut() {
                el.endpoints = Some((new_source, new_target));
                el.next_outgoing = Address::EMPTY;
                el.next_incoming = Address::EMPTY;
            }
        }

        self.splice_into_adjacency(addr, new_source, new_target)
    }

    /// Returns `true` if `addr` currently refers to a live element.
    #[must_use]
    pub fn is_element(&self, addr: Address) -> bool {
        let Some(arc) = self.slot_arc(addr) else {
            return false;
        };
        let slot = arc.lock();
        slot.generation == addr.generation() && slot.element.is_some()
    }

    /// Returns the type of the element at `addr`.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] if `addr` is not currently live.
    pub fn element_type(&self, addr: Address) -> EngineResult<ElementType> {
        self.get_element(addr)
            .map(|el| el.ty)
            .ok_or(EngineError::NotFound)
    }

    /// Returns the `(source, target)` pair of a connector, or `Ok(None)` if
    /// `addr` is live but not a connector.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] if `addr` is not currently live.
    pub fn connector_endpoints(&self, addr: Address) -> EngineResult<Option<(Address, Address)>> {
        self.get_element(addr)
            .map(|el| el.endpoints)
            .ok_or(EngineError::NotFound)
    }

    /// Erases `addr` and the transitive closure of connectors incident to it.
    /// The sweep is depth-unbounded: cascades follow connectors however far
    /// they reach.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidState`] if `addr` does not currently exist.
    pub fn erase(&self, addr: Address) -> EngineResult<()> {
        let visited = self.reachable_cascade(addr)?;

        for &victim in &visited {
            if let Some(el) = self.get_element(victim) {
                if let Some((source, target)) = el.endpoints {
                    self.unlink_from_list(source, victim, false);
                    self.unlink_from_list(target, victim, true);
                }
            }
        }

        for &victim in &visited {
            self.free_slot(victim);
        }

        Ok(())
    }

    /// Computes the transitive closure of "is an endpoint of" starting from
    /// `addr`, without mutating anything. [`crate::txbuf`] uses this to
    /// capture pre-images for every cascade victim before staging an erase.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidState`] if `addr` does not currently exist.
    pub(crate) fn reachable_cascade(&self, addr: Address) -> EngineResult<BTreeSet<Address>> {
        if !self.is_element(addr) {
            return Err(EngineError::InvalidState);
        }

        let mut visited: BTreeSet<Address> = BTreeSet::new();
        let mut queue: VecDeque<Address> = VecDeque::new();
        queue.push_back(addr);
        visited.insert(addr);

        while let Some(cur) = queue.pop_front() {
            for incident in self.collect_incident(cur) {
                if visited.insert(incident) {
                    queue.push_back(incident);
                }
            }
        }

        Ok(visited)
    }

    /// Returns every connector incident to `addr` as an endpoint (both
    /// incoming and outgoing), by walking its two intrusive lists.
    fn collect_incident(&self, addr: Address) -> Vec<Address> {
        let mut out = Vec::new();
        let Some(el) = self.get_element(addr) else {
            return out;
        };

        let mut cur = el.first_incoming;
        while !cur.is_empty() {
            out.push(cur);
            let Some(connector) = self.get_element(cur) else {
                break;
            };
            cur = connector.next_incoming;
        }

        let mut cur = el.first_outgoing;
        while !cur.is_empty() {
            out.push(cur);
            let Some(connector) = self.get_element(cur) else {
                break;
            };
            cur = connector.next_outgoing;
        }

        out
    }

    /// Removes `victim` from `owner`'s incoming/outgoing adjacency list.
    ///
    /// Each node visited (`owner`, then each `cur` while walking past it) is
    /// locked once and patched in place under that single guard, the same
    /// discipline [`ElementStore::splice_into_adjacency`] uses — never a
    /// read under one lock followed by a write under a second, which would
    /// let a concurrent splice into the same list get silently overwritten.
    fn unlink_from_list(&self, owner: Address, victim: Address, is_incoming: bool) {
        let victim_next = self.get_element(victim).map_or(Address::EMPTY, |el| {
            if is_incoming {
                el.next_incoming
            } else {
                el.next_outgoing
            }
        });

        let Some(arc) = self.slot_arc(owner) else {
            return;
        };
        let head = {
            let mut slot = arc.lock();
            if slot.generation != owner.generation() {
                return;
            }
            let Some(el) = slot.element.as_mut() else {
                return;
            };
            let head = if is_incoming { el.first_incoming } else { el.first_outgoing };
            if head == victim {
                if is_incoming {
                    el.first_incoming = victim_next;
                } else {
                    el.first_outgoing = victim_next;
                }
                return;
            }
            head
        };

        let mut cur = head;
        while !cur.is_empty() {
            let Some(cur_arc) = self.slot_arc(cur) else {
                break;
            };
            let mut cur_slot = cur_arc.lock();
            if cur_slot.generation != cur.generation() {
                break;
            }
            let Some(cur_el) = cur_slot.element.as_mut() else {
                break;
            };
            let next = if is_incoming { cur_el.next_incoming } else { cur_el.next_outgoing };
            if next == victim {
                if is_incoming {
                    cur_el.next_incoming = victim_next;
                } else {
                    cur_el.next_outgoing = victim_next;
                }
                return;
            }
            drop(cur_slot);
            cur = next;
        }
    }

    fn free_slot(&self, addr: Address) {
        if let Some(arc) = self.slot_arc(addr) {
            let mut slot = arc.lock();
            if slot.generation == addr.generation() {
                slot.element = None;
                slot.generation = slot.generation.saturating_add(1);
                slot.version = slot.version.saturating_add(1);
            } else {
                return;
            }
        }
        self.push_freelist(addr);
    }

    /// Bumps the commit-version counter of `addr`, called by [`crate::txbuf`]
    /// whenever a transaction applies a change touching this element.
    pub(crate) fn bump_version(&self, addr: Address) {
        if let Some(arc) = self.slot_arc(addr) {
            let mut slot = arc.lock();
            if slot.generation == addr.generation() {
                slot.version = slot.version.saturating_add(1);
            }
        }
    }

    /// Returns the commit-version counter of `addr`, or `None` if not live.
    pub(crate) fn version_of(&self, addr: Address) -> Option<u64> {
        let arc = self.slot_arc(addr)?;
        let slot = arc.lock();
        (slot.generation == addr.generation()).then_some(slot.version)
    }

    /// Returns a cloned snapshot of the element at `addr`, for internal
    /// consumers that need to inspect type/endpoints together.
    pub(crate) fn snapshot(&self, addr: Address) -> Option<Element> {
        self.get_element(addr)
    }

    /// Streams the connectors for which `addr` is the source (outgoing) or
    /// target (incoming), one at a time, without materializing a `Vec`.
    pub(crate) fn adjacency_iter(&self, addr: Address, incoming: bool) -> AdjacencyIter<'_> {
        let head = self
            .get_element(addr)
            .map_or(Address::EMPTY, |el| if incoming { el.first_incoming } else { el.first_outgoing });
        AdjacencyIter {
            store: self,
            cur: head,
            incoming,
        }
    }

    /// Cheap, uncached estimate of adjacency-list length, used by the
    /// template engine's fan-in heuristic . O(n) in the list length.
    pub(crate) fn adjacency_len_estimate(&self, addr: Address, incoming: bool) -> usize {
        self.adjacency_iter(addr, incoming).count()
    }
}

/// Single-pass iterator over one element's intrusive adjacency list.
pub(crate) struct AdjacencyIter<'a> {
    store: &'a ElementStore,
    cur: Address,
    incoming: bool,
}

impl Iterator for AdjacencyIter<'_> {
    type Item = Address;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur.is_empty() {
            return None;
        }
        let current = self.cur;
        let el = self.store.get_element(current)?;
        self.cur = if self.incoming {
            el.next_incoming
        } else {
            el.next_outgoing
        };
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Constancy, Direction, Permanence, RoleTag, Sign};

    fn class_node_type() -> ElementType {
        ElementType::node(Constancy::Const, RoleTag::Class)
    }

    fn pos_connector_type() -> ElementType {
        ElementType::connector(
            Constancy::Const,
            Direction::Access,
            Permanence::Perm,
            Sign::Positive,
        )
    }

    #[test]
    fn create_triple_is_iterable_via_adjacency() {
        let store = ElementStore::new(8);
        let n1 = store.create_node(class_node_type()).unwrap();
        let n2 = store.create_node(class_node_type()).unwrap();
        let e = store
            .create_connector(pos_connector_type(), n1, n2)
            .unwrap();

        assert!(store.is_element(e));
        assert_eq!(store.connector_endpoints(e).unwrap(), Some((n1, n2)));
        let outgoing: Vec<_> = store.adjacency_iter(n1, false).collect();
        assert_eq!(outgoing, vec![e]);
        let incoming: Vec<_> = store.adjacency_iter(n2, true).collect();
        assert_eq!(incoming, vec![e]);
    }

    #[test]
    fn erase_cascades_to_incident_connectors_only() {
        let store = ElementStore::new(8);
        let n1 = store.create_node(class_node_type()).unwrap();
        let n2 = store.create_node(class_node_type()).unwrap();
        let e = store
            .create_connector(pos_connector_type(), n1, n2)
            .unwrap();

        store.erase(n1).unwrap();

        assert!(!store.is_element(n1));
        assert!(!store.is_element(e));
        assert!(store.is_element(n2));
        assert!(store.adjacency_iter(n2, true).next().is_none());
    }

    #[test]
    fn erase_unknown_address_is_invalid_state() {
        let store = ElementStore::new(8);
        let n1 = store.create_node(class_node_type()).unwrap();
        store.erase(n1).unwrap();
        assert_eq!(store.erase(n1), Err(EngineError::InvalidState));
    }

    #[test]
    fn reused_slot_gets_new_generation() {
        let store = ElementStore::new(1);
        let n1 = store.create_node(class_node_type()).unwrap();
        store.erase(n1).unwrap();
        let n2 = store.create_node(class_node_type()).unwrap();
        assert_eq!(n1.segment(), n2.segment());
        assert_eq!(n1.offset(), n2.offset());
        assert_ne!(n1, n2);
        assert!(!store.is_element(n1));
        assert!(store.is_element(n2));
    }

    #[test]
    fn create_connector_rejects_var_type() {
        let store = ElementStore::new(8);
        let n1 = store.create_node(class_node_type()).unwrap();
        let n2 = store.create_node(class_node_type()).unwrap();
        let var_ty = ElementType::connector(
            Constancy::Var,
            Direction::Access,
            Permanence::Perm,
            Sign::Positive,
        );
        assert_eq!(
            store.create_connector(var_ty, n1, n2),
            Err(EngineError::InvalidParams)
        );
    }

    #[test]
    fn create_connector_requires_existing_endpoints() {
        let store = ElementStore::new(8);
        let n1 = store.create_node(class_node_type()).unwrap();
        assert_eq!(
            store.create_connector(pos_connector_type(), n1, Address::EMPTY),
            Err(EngineError::NotFound)
        );
    }

    #[test]
    fn self_loop_connector_links_both_directions() {
        let store = ElementStore::new(8);
        let n1 = store.create_node(class_node_type()).unwrap();
        let e = store
            .create_connector(pos_connector_type(), n1, n1)
            .unwrap();
        let outgoing: Vec<_> = store.adjacency_iter(n1, false).collect();
        let incoming: Vec<_> = store.adjacency_iter(n1, true).collect();
        assert_eq!(outgoing, vec![e]);
        assert_eq!(incoming, vec![e]);
    }

    #[test]
    fn set_element_type_rejects_kind_change() {
        let store = ElementStore::new(8);
        let n1 = store.create_node(class_node_type()).unwrap();
        let link_ty = ElementType::link(Constancy::Const);
        assert_eq!(
            store.set_element_type(n1, link_ty),
            Err(EngineError::InvalidParams)
        );
        let specialized = class_node_type();
        assert!(store.set_element_type(n1, specialized).is_ok());
    }

    #[test]
    fn retarget_connector_moves_between_adjacency_lists() {
        let store = ElementStore::new(8);
        let n1 = store.create_node(class_node_type()).unwrap();
        let n2 = store.create_node(class_node_type()).unwrap();
        let n3 = store.create_node(class_node_type()).unwrap();
        let e = store
            .create_connector(pos_connector_type(), n1, n2)
            .unwrap();

        store.retarget_connector(e, n3, n2).unwrap();

        assert!(store.adjacency_iter(n1, false).next().is_none());
        assert_eq!(
            store.adjacency_iter(n3, false).collect::<Vec<_>>(),
            vec![e]
        );
        assert_eq!(store.connector_endpoints(e).unwrap(), Some((n3, n2)));
    }
}
