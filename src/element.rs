//! The element record: type, connector endpoints, and intrusive adjacency lists.
use crate::address::Address;
use crate::types::ElementType;

/// A single slot in the [`crate::store::ElementStore`] arena.
///
/// Adjacency is represented entirely by addresses: `first_incoming` and
/// `first_outgoing` are the heads of two intrusive singly-linked lists (one
/// per direction) threaded through every connector's `next_incoming`/
/// `next_outgoing` fields. There is no separate edge list.
#[derive(Debug, Clone)]
pub(crate) struct Element {
    pub ty: ElementType,
    /// `(source, target)` when `ty.is_connector()`; `None` otherwise.
    pub endpoints: Option<(Address, Address)>,
    /// Head of the list of connectors incident to this element as a target.
    pub first_incoming: Address,
    /// Head of the list of connectors incident to this element as a source.
    pub first_outgoing: Address,
    /// Next connector in `target`'s incoming list (meaningful for connectors only).
    pub next_incoming: Address,
    /// Next connector in `source`'s outgoing list (meaningful for connectors only).
    pub next_outgoing: Address,
}

impl Element {
    pub(crate) fn new_node_or_link(ty: ElementType) -> Self {
        Self {
            ty,
            endpoints: None,
            first_incoming: Address::EMPTY,
            first_outgoing: Address::EMPTY,
            next_incoming: Address::EMPTY,
            next_outgoing: Address::EMPTY,
        }
    }

    pub(crate) fn new_connector(ty: ElementType, source: Address, target: Address) -> Self {
        Self {
            ty,
            endpoints: Some((source, target)),
            first_incoming: Address::EMPTY,
            first_outgoing: Address::EMPTY,
            next_incoming: Address::EMPTY,
            next_outgoing: Address::EMPTY,
        }
    }
}
