//! System-identifier dictionary: a byte-keyed trie mapping names to addresses.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::address::Address;
use crate::store::ElementStore;
use crate::types::ElementType;

#[derive(Default)]
struct TrieNode {
    children: HashMap<u8, Box<TrieNode>>,
    binding: Option<(Address, u32)>,
}

/// Bidirectional name ↔ address index.
///
/// Nodes use a sparse `HashMap<u8, Box<TrieNode>>` rather than a fixed
/// 256-entry array since identifiers in practice are short
/// and ASCII-sparse. A leaf's stored generation lets a stale binding be
/// detected without a second lookup against the element store.
#[derive(Default)]
pub struct Dictionary {
    root: RwLock<TrieNode>,
    by_address: RwLock<HashMap<Address, String>>,
}

impl Dictionary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up `name`, validating the binding's generation against `store`.
    /// A stale binding (element since erased and possibly reused) is treated
    /// as absent.
    #[must_use]
    pub fn find(&self, name: &str, store: &ElementStore) -> Option<Address> {
        let root = self.root.read();
        let mut node = &*root;
        for byte in name.as_bytes() {
            node = node.children.get(byte)?;
        }
        let (addr, bound_generation) = node.binding?;
        (addr.generation() == bound_generation && store.is_element(addr)).then_some(addr)
    }

    /// Binds `name` to `addr`. Fails if `name` is already bound to a
    /// different address that is still live.
    #[must_use]
    pub fn set(&self, name: &str, addr: Address, store: &ElementStore) -> bool {
        let mut root = self.root.write();
        let mut node = &mut *root;
        for byte in name.as_bytes() {
            node = node.children.entry(*byte).or_default();
        }
        if let Some((existing, bound_generation)) = node.binding {
            if existing != addr && existing.generation() == bound_generation && store.is_element(existing) {
                return false;
            }
        }
        node.binding = Some((addr, addr.generation()));
        drop(root);
        self.by_address.write().insert(addr, name.to_string());
        true
    }

    /// Returns the address bound to `name`, creating a node of `hint_type`
    /// if no live binding exists.
    ///
    /// # Errors
    /// Propagates [`crate::error::EngineError`] from [`ElementStore::create_node`].
    pub fn resolve(
        &self,
        name: &str,
        hint_type: ElementType,
        store: &ElementStore,
    ) -> crate::error::EngineResult<Address> {
        if let Some(addr) = self.find(name, store) {
            return Ok(addr);
        }
        let addr = store.create_node(hint_type)?;
        self.set(name, addr, store);
        Ok(addr)
    }

    /// Returns the system identifier bound to `addr`, if any is currently tracked.
    #[must_use]
    pub fn name_of(&self, addr: Address) -> Option<String> {
        self.by_address.read().get(&addr).cloned()
    }

    /// Removes the reverse-lookup entry for `addr`. The forward trie entry is
    /// intentionally left in place: identifiers are not removed on element
    /// erase unless explicitly unset. A later `find` on the same name will
    /// see the stale generation and report absent.
    pub(crate) fn forget_address(&self, addr: Address) {
        self.by_address.write().remove(&addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::{Constancy, RoleTag};

    fn class_type() -> ElementType {
        ElementType::node(Constancy::Const, RoleTag::Class)
    }

    #[test]
    fn resolve_is_idempotent() {
        let store = ElementStore::new(EngineConfig::default().segment_capacity);
        let dict = Dictionary::new();
        let a = dict.resolve("foo", class_type(), &store).unwrap();
        let b = dict.resolve("foo", class_type(), &store).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn set_rejects_rebinding_live_name() {
        let store = ElementStore::new(EngineConfig::default().segment_capacity);
        let dict = Dictionary::new();
        let a = store.create_node(class_type()).unwrap();
        let b = store.create_node(class_type()).unwrap();
        assert!(dict.set("foo", a, &store));
        assert!(!dict.set("foo", b, &store));
        assert_eq!(dict.find("foo", &store), Some(a));
    }

    #[test]
    fn erased_binding_is_treated_as_absent() {
        let store = ElementStore::new(EngineConfig::default().segment_capacity);
        let dict = Dictionary::new();
        let a = store.create_node(class_type()).unwrap();
        assert!(dict.set("foo", a, &store));
        store.erase(a).unwrap();
        assert_eq!(dict.find("foo", &store), None);
        let b = store.create_node(class_type()).unwrap();
        assert!(dict.set("foo", b, &store));
        assert_eq!(dict.find("foo", &store), Some(b));
    }
}
