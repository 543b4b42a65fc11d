//! Template engine: parameterized multi-triple patterns with named
//! replacements, plus `generate`, `search`, and `build_from_graph`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::address::Address;
use crate::dictionary::Dictionary;
use crate::error::{EngineError, EngineResult};
use crate::iter::{Constraint, Iter3, Iter5};
use crate::store::ElementStore;
use crate::types::{Direction, ElementType, RoleTag};

/// One position of a triple/quintuple: a fixed address, a type filter, or a
/// named replacement bound at generation/search time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    Addr(Address),
    Type(ElementType),
    /// A placeholder name plus the type hint used to create it during `generate`.
    Replacement(String, ElementType),
}

impl Position {
    fn type_hint(&self) -> Option<ElementType> {
        match self {
            Self::Type(ty) | Self::Replacement(_, ty) => Some(*ty),
            Self::Addr(_) => None,
        }
    }

    fn replacement_name(&self) -> Option<&str> {
        match self {
            Self::Replacement(name, _) => Some(name),
            Self::Addr(_) | Self::Type(_) => None,
        }
    }
}

/// One item of a [`Template`]: a triple or a quintuple (triple plus an
/// attribute arc from a relation node to the primary connector).
#[derive(Debug, Clone)]
pub enum TemplateItem {
    Triple([Position; 3]),
    Quintuple([Position; 5]),
}

impl TemplateItem {
    fn positions(&self) -> &[Position] {
        match self {
            Self::Triple(p) => p,
            Self::Quintuple(p) => p,
        }
    }
}

/// An ordered list of triples/quintuples forming a pattern.
#[derive(Debug, Clone, Default)]
pub struct Template {
    items: Vec<TemplateItem>,
}

impl Template {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_triple(mut self, p1: Position, p2: Position, p3: Position) -> Self {
        self.items.push(TemplateItem::Triple([p1, p2, p3]));
        self
    }

    #[must_use]
    pub fn with_quintuple(
        mut self,
        p1: Position,
        p2: Position,
        p3: Position,
        p4: Position,
        p5: Position,
    ) -> Self {
        self.items.push(TemplateItem::Quintuple([p1, p2, p3, p4, p5]));
        self
    }

    /// Reads a structure node's member triples via the iteration kernel and
    /// synthesizes an equivalent template, inferring replacement names from the system
    /// identifiers of its `var`-typed member nodes.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidParams`] if `structure` is not a
    /// `Structure`-tagged node.
    pub fn build_from_graph(
        structure: Address,
        store: &ElementStore,
        dictionary: &Dictionary,
    ) -> EngineResult<Self> {
        let structure_ty = store.element_type(structure)?;
        if structure_ty.role_tag() != Some(RoleTag::Structure) {
            return Err(EngineError::InvalidParams);
        }

        let mut items = Vec::new();
        for member_link in store.adjacency_iter(structure, false) {
            let Ok(member_link_ty) = store.element_type(member_link) else {
                continue;
            };
            if member_link_ty.direction() != Some(Direction::Access) {
                continue;
            }
            let Ok(Some((_, member))) = store.connector_endpoints(member_link) else {
                continue;
            };
            let Ok(member_ty) = store.element_type(member) else {
                continue;
            };
            if !member_ty.is_connector() {
                continue;
            }
            let Ok(Some((source, target))) = store.connector_endpoints(member) else {
                continue;
            };
            let p1 = position_for(source, store, dictionary);
            let p2 = position_for(member, store, dictionary);
            let p3 = position_for(target, store, dictionary);
            items.push(TemplateItem::Triple([p1, p2, p3]));
        }
        Ok(Self { items })
    }
}

fn position_for(addr: Address, store: &ElementStore, dictionary: &Dictionary) -> Position {
    match store.element_type(addr) {
        Ok(ty) if ty.is_var() => dictionary
            .name_of(addr)
            .map_or(Position::Addr(addr), |name| Position::Replacement(name, ty)),
        _ => Position::Addr(addr),
    }
}

/// Result of [`generate`]: the map from replacement names to the addresses
/// created (or reused, for names already bound in the input parameter map).
#[derive(Debug, Clone, Default)]
pub struct GenerationResult {
    pub bindings: HashMap<String, Address>,
}

fn resolve_or_create(
    position: &Position,
    bindings: &mut HashMap<String, Address>,
    created: &mut Vec<Address>,
    store: &ElementStore,
) -> EngineResult<Address> {
    match position {
        Position::Addr(addr) => Ok(*addr),
        Position::Type(_) => Err(EngineError::InvalidParams),
        Position::Replacement(name, hint) => {
            if let Some(addr) = bindings.get(name) {
                return Ok(*addr);
            }
            let addr = if hint.is_link() {
                store.create_link(*hint)?
            } else {
                store.create_node(*hint)?
            };
            created.push(addr);
            bindings.insert(name.clone(), addr);
            Ok(addr)
        }
    }
}

fn bind_connector(position: &Position, addr: Address, bindings: &mut HashMap<String, Address>) {
    if let Some(name) = position.replacement_name() {
        bindings.entry(name.to_string()).or_insert(addr);
    }
}

/// Creates one element per unbound replacement name (respecting its type
/// hint) plus one connector per triple, rolling back every creation made by
/// this call if any step fails.
///
/// # Errors
/// Propagates the first [`EngineError`] hit while resolving or creating an
/// element or connector; in that case every address created during this call
/// is erased before the error is returned.
pub fn generate(
    template: &Template,
    params: &HashMap<String, Address>,
    store: &ElementStore,
) -> EngineResult<GenerationResult> {
    let mut bindings = params.clone();
    let mut created = Vec::new();

    let result = (|| {
        for item in &template.items {
            match item {
                TemplateItem::Triple([p1, p2, p3]) => {
                    let source = resolve_or_create(p1, &mut bindings, &mut created, store)?;
                    let target = resolve_or_create(p3, &mut bindings, &mut created, store)?;
                    let conn_ty = p2.type_hint().ok_or(EngineError::InvalidParams)?;
                    let conn = store.create_connector(conn_ty, source, target)?;
                    created.push(conn);
                    bind_connector(p2, conn, &mut bindings);
                }
                TemplateItem::Quintuple([p1, p2, p3, p4, p5]) => {
                    let source = resolve_or_create(p1, &mut bindings, &mut created, store)?;
                    let target = resolve_or_create(p3, &mut bindings, &mut created, store)?;
                    let primary_ty = p2.type_hint().ok_or(EngineError::InvalidParams)?;
                    let primary = store.create_connector(primary_ty, source, target)?;
                    created.push(primary);
                    bind_connector(p2, primary, &mut bindings);

                    let relation = resolve_or_create(p5, &mut bindings, &mut created, store)?;
                    let attr_ty = p4.type_hint().ok_or(EngineError::InvalidParams)?;
                    let attribute = store.create_connector(attr_ty, relation, primary)?;
                    created.push(attribute);
                    bind_connector(p4, attribute, &mut bindings);
                }
            }
        }
        Ok(())
    })();

    if let Err(err) = result {
        for addr in created.into_iter().rev() {
            let _ = store.erase(addr);
        }
        return Err(err);
    }

    Ok(GenerationResult { bindings })
}

/// Cooperative cancellation token for long-running searches.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One complete assignment produced by [`search`].
#[derive(Debug, Clone, Default)]
pub struct SearchItem {
    /// Bindings keyed by replacement name.
    pub bindings: HashMap<String, Address>,
    /// Resolved tuple per template item, in template order (triples have 3
    /// entries, quintuples 5), for callers that index positionally.
    pub positions: Vec<Vec<Address>>,
}

/// The materialized result of [`search`]: one [`SearchItem`] per distinct
/// assignment, duplicates suppressed by a hash of the binding map.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub items: Vec<SearchItem>,
}

fn fan_in_score(
    item: &TemplateItem,
    params: &HashMap<String, Address>,
    store: &ElementStore,
) -> (i32, usize) {
    let bound_count = item
        .positions()
        .iter()
        .filter(|p| match p {
            Position::Addr(_) | Position::Type(_) => true,
            Position::Replacement(name, _) => params.contains_key(name),
        })
        .count();
    let smallest_adjacency = item
        .positions()
        .iter()
        .filter_map(|p| match p {
            Position::Addr(addr) => Some(*addr),
            Position::Replacement(name, _) => params.get(name).copied(),
            Position::Type(_) => None,
        })
        .map(|addr| {
            store
                .adjacency_len_estimate(addr, true)
                .min(store.adjacency_len_estimate(addr, false))
        })
        .min()
        .unwrap_or(usize::MAX);
    (-(bound_count as i32), smallest_adjacency)
}

fn position_to_constraint(
    position: &Position,
    bindings: &HashMap<String, Address>,
) -> Constraint {
    match position {
        Position::Addr(addr) => Constraint::Addr(*addr),
        Position::Type(ty) => Constraint::Type(*ty),
        Position::Replacement(name, ty) => bindings
            .get(name)
            .map_or(Constraint::Type(*ty), |addr| Constraint::Addr(*addr)),
    }
}

fn bind_name(
    position: &Position,
    value: Address,
    bindings: &mut HashMap<String, Address>,
) -> bool {
    if let Position::Replacement(name, _) = position {
        match bindings.get(name) {
            Some(existing) if *existing != value => return false,
            Some(_) => {}
            None => {
                bindings.insert(name.clone(), value);
            }
        }
    }
    true
}

fn unbind_name(position: &Position, bindings: &mut HashMap<String, Address>, was_new: bool) {
    if was_new {
        if let Position::Replacement(name, _) = position {
            bindings.remove(name);
        }
    }
}

fn binding_hash(bindings: &HashMap<String, Address>) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut entries: Vec<_> = bindings.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    let mut hasher = rustc_hash::FxHasher::default();
    for (name, addr) in entries {
        name.hash(&mut hasher);
        addr.hash(&mut hasher);
    }
    hasher.finish()
}

fn search_rec(
    order: &[&TemplateItem],
    index: usize,
    bindings: &mut HashMap<String, Address>,
    positions: &mut Vec<Vec<Address>>,
    store: &ElementStore,
    token: &CancellationToken,
    seen: &mut std::collections::HashSet<u64>,
    items: &mut Vec<SearchItem>,
) -> EngineResult<()> {
    if token.is_cancelled() {
        return Ok(());
    }
    let Some(item) = order.get(index) else {
        let hash = binding_hash(bindings);
        if seen.insert(hash) {
            items.push(SearchItem {
                bindings: bindings.clone(),
                positions: positions.clone(),
            });
        }
        return Ok(());
    };

    match item {
        TemplateItem::Triple([p1, p2, p3]) => {
            let mut iter = Iter3::new(
                store,
                position_to_constraint(p1, bindings),
                position_to_constraint(p2, bindings),
                position_to_constraint(p3, bindings),
            )?;
            while iter.next() {
                if token.is_cancelled() {
                    return Ok(());
                }
                let (source, conn, target) = (
                    iter.get(0).expect("advanced"),
                    iter.get(1).expect("advanced"),
                    iter.get(2).expect("advanced"),
                );
                let new1 = bind_name(p1, source, bindings);
                let new2 = new1 && bind_name(p2, conn, bindings);
                let new3 = new2 && bind_name(p3, target, bindings);
                if new3 {
                    positions.push(vec![source, conn, target]);
                    search_rec(order, index + 1, bindings, positions, store, token, seen, items)?;
                    positions.pop();
                }
                unbind_name(p3, bindings, new2 && new3);
                unbind_name(p2, bindings, new1 && new2);
                unbind_name(p1, bindings, new1);
            }
        }
        TemplateItem::Quintuple([p1, p2, p3, p4, p5]) => {
            let mut iter = Iter5::new(
                store,
                position_to_constraint(p1, bindings),
                position_to_constraint(p2, bindings),
                position_to_constraint(p3, bindings),
                position_to_constraint(p4, bindings),
                position_to_constraint(p5, bindings),
            )?;
            while iter.next() {
                if token.is_cancelled() {
                    return Ok(());
                }
                let values: Vec<Address> = (0..5).map(|i| iter.get(i).expect("advanced")).collect();
                let positions_spec = [p1, p2, p3, p4, p5];
                let mut bound_flags = [false; 5];
                let mut ok = true;
                for i in 0..5 {
                    if !ok {
                        bound_flags[i] = false;
                        continue;
                    }
                    ok = bind_name(positions_spec[i], values[i], bindings);
                    bound_flags[i] = ok;
                }
                if ok {
                    positions.push(values.clone());
                    search_rec(order, index + 1, bindings, positions, store, token, seen, items)?;
                    positions.pop();
                }
                for i in (0..5).rev() {
                    unbind_name(positions_spec[i], bindings, bound_flags[i]);
                }
            }
        }
    }
    Ok(())
}

/// Multi-triple constraint-satisfaction search : orders items by
/// fan-in, then backtracks through [`Iter3`]/[`Iter5`] candidates.
///
/// # Errors
/// Propagates the first [`EngineError::InvalidParams`] raised while
/// constructing an iterator for the most-constrained ordering (no fixed
/// endpoint reachable for some item given the current bindings).
pub fn search(
    template: &Template,
    params: &HashMap<String, Address>,
    store: &ElementStore,
) -> EngineResult<SearchResult> {
    search_with_cancellation(template, params, store, &CancellationToken::new())
}

/// As [`search`], but checked against `token` between backtracks so a caller
/// can abandon a long-running search cooperatively.
///
/// # Errors
/// Same as [`search`].
pub fn search_with_cancellation(
    template: &Template,
    params: &HashMap<String, Address>,
    store: &ElementStore,
    token: &CancellationToken,
) -> EngineResult<SearchResult> {
    let mut order: Vec<&TemplateItem> = template.items.iter().collect();
    order.sort_by_key(|item| fan_in_score(item, params, store));

    let mut bindings = params.clone();
    let mut positions = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut items = Vec::new();

    search_rec(
        &order,
        0,
        &mut bindings,
        &mut positions,
        store,
        token,
        &mut seen,
        &mut items,
    )?;

    Ok(SearchResult { items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::{Constancy, Permanence, Sign};

    fn class_ty() -> ElementType {
        ElementType::node(Constancy::Const, RoleTag::Class)
    }

    fn var_ty() -> ElementType {
        ElementType::node(Constancy::Var, RoleTag::Plain)
    }

    fn arc_ty() -> ElementType {
        ElementType::connector(Constancy::Const, Direction::Access, Permanence::Perm, Sign::Positive)
    }

    #[test]
    fn generate_creates_unbound_replacements_and_connector() {
        let store = ElementStore::new(EngineConfig::default().segment_capacity);
        let k = store.create_node(class_ty()).unwrap();
        let template = Template::new().with_triple(
            Position::Replacement("x".into(), var_ty()),
            Position::Type(arc_ty()),
            Position::Addr(k),
        );
        let result = generate(&template, &HashMap::new(), &store).unwrap();
        let x = *result.bindings.get("x").unwrap();
        assert!(store.is_element(x));
        assert_eq!(store.adjacency_len_estimate(x, false), 1);
    }

    #[test]
    fn generate_rolls_back_on_failure() {
        let store = ElementStore::new(EngineConfig::default().segment_capacity);
        let var_connector_ty = ElementType::connector(
            Constancy::Var,
            Direction::Access,
            Permanence::Perm,
            Sign::Positive,
        );
        let template = Template::new().with_triple(
            Position::Replacement("x".into(), var_ty()),
            Position::Type(var_connector_ty),
            Position::Replacement("y".into(), var_ty()),
        );
        let before = store.create_node(class_ty()).unwrap();
        let result = generate(&template, &HashMap::new(), &store);
        assert!(result.is_err());
        assert!(store.is_element(before));
    }

    #[test]
    fn search_finds_both_incoming_arcs() {
        let store = ElementStore::new(EngineConfig::default().segment_capacity);
        let k = store.create_node(class_ty()).unwrap();
        let a = store.create_node(class_ty()).unwrap();
        let b = store.create_node(class_ty()).unwrap();
        store.create_connector(arc_ty(), a, k).unwrap();
        store.create_connector(arc_ty(), b, k).unwrap();

        let template = Template::new().with_triple(
            Position::Replacement("x".into(), class_ty()),
            Position::Type(arc_ty()),
            Position::Addr(k),
        );
        let result = search(&template, &HashMap::new(), &store).unwrap();
        assert_eq!(result.items.len(), 2);
        let mut xs: Vec<Address> = result
            .items
            .iter()
            .map(|item| *item.bindings.get("x").unwrap())
            .collect();
        xs.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(xs, expected);
    }
}
