//! Transactional mutation layer: staged creations, modifications,
//! deletions and content changes with validate / merge / apply / rollback
//! semantics.
//!
//! A transaction stages its creations, modifications, deletions and content
//! changes into ordered lists, then validates, merges, and applies them as a
//! single atomic batch. `validate()` compares per-element version counters
//! captured at `begin` against the live store — the optimistic-concurrency
//! design recorded as a resolved Open Question in `DESIGN.md`.

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;

use crate::address::Address;
use crate::content::ContentFormat;
use crate::error::{EngineError, EngineResult};
use crate::events::{Event, EventKind};
use crate::tx::TxId;
use crate::types::ElementType;
use crate::Context;

/// A handle to a not-yet-materialized element created within a transaction.
/// Valid only as a source/target argument to later `create_connector` calls
/// in the *same* transaction — it never escapes to another transaction or
/// the committed store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingAddress(usize);

/// Either an already-live [`Address`] or a same-transaction [`PendingAddress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAddr {
    /// An element that already exists in the store.
    Existing(Address),
    /// An element staged for creation earlier in this transaction.
    Pending(PendingAddress),
}

impl From<Address> for TxAddr {
    fn from(addr: Address) -> Self {
        Self::Existing(addr)
    }
}

impl From<PendingAddress> for TxAddr {
    fn from(addr: PendingAddress) -> Self {
        Self::Pending(addr)
    }
}

/// Bitmask of element attributes a staged `modify` changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMask(u8);

impl FieldMask {
    /// The element's [`ElementType`] changed.
    pub const TYPE: Self = Self(0b0001);
    /// A connector's source changed.
    pub const SOURCE: Self = Self(0b0010);
    /// A connector's target changed.
    pub const TARGET: Self = Self(0b0100);
    /// A link's content changed.
    pub const CONTENT: Self = Self(0b1000);

    #[must_use]
    const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

enum CreateOp {
    Node(ElementType),
    Link(ElementType),
    Connector(ElementType, TxAddr, TxAddr),
}

struct StagedModify {
    addr: Address,
    mask: FieldMask,
    captured_version: u64,
    new_type: Option<ElementType>,
    new_endpoints: Option<(Address, Address)>,
}

struct StagedErase {
    addr: Address,
    cascade: BTreeSet<Address>,
    captured_versions: HashMap<Address, u64>,
}

struct StagedContentSet {
    addr: Address,
    bytes: Bytes,
    format: ContentFormat,
}

/// Result of a successful [`Transaction::apply`]: the real addresses bound
/// to every [`PendingAddress`] created in the transaction.
#[derive(Debug, Clone, Default)]
pub struct TxApplyResult {
    /// Pending-handle → materialized-address bindings, in creation order.
    pub created: HashMap<PendingAddress, Address>,
}

/// A staged batch of mutations . Construct via [`Context::begin`].
pub struct Transaction {
    id: TxId,
    ctx: Context,
    user: Address,
    creates: Vec<CreateOp>,
    modifies: Vec<StagedModify>,
    erases: Vec<StagedErase>,
    content_sets: Vec<StagedContentSet>,
    committed: bool,
}

impl Transaction {
    pub(crate) fn new(id: TxId, ctx: Context, user: Address) -> Self {
        Self {
            id,
            ctx,
            user,
            creates: Vec::new(),
            modifies: Vec::new(),
            erases: Vec::new(),
            content_sets: Vec::new(),
            committed: false,
        }
    }

    /// Returns this transaction's id.
    #[must_use]
    pub const fn id(&self) -> TxId {
        self.id
    }

    /// Returns `true` once [`Transaction::apply`] has succeeded.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        self.committed
    }

    /// Stages a node creation; observable only within this transaction until [`Transaction::apply`].
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidParams`] if `ty` is not a node type.
    pub fn create_node(&mut self, ty: ElementType) -> EngineResult<PendingAddress> {
        if !ty.is_node() {
            return Err(EngineError::InvalidParams);
        }
        Ok(self.push_create(CreateOp::Node(ty)))
    }

    /// Stages a link creation; observable only within this transaction until [`Transaction::apply`].
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidParams`] if `ty` is not a link type.
    pub fn create_link(&mut self, ty: ElementType) -> EngineResult<PendingAddress> {
        if !ty.is_link() {
            return Err(EngineError::InvalidParams);
        }
        Ok(self.push_create(CreateOp::Link(ty)))
    }

    /// Stages a connector creation between `source` and `target`, either of
    /// which may be an already-live [`Address`] or a same-transaction
    /// [`PendingAddress`].
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidParams`] if `ty` is not a connector type.
    pub fn create_connector(
        &mut self,
        ty: ElementType,
        source: impl Into<TxAddr>,
        target: impl Into<TxAddr>,
    ) -> EngineResult<PendingAddress> {
        if !ty.is_connector() {
            return Err(EngineError::InvalidParams);
        }
        Ok(self.push_create(CreateOp::Connector(ty, source.into(), target.into())))
    }

    fn push_create(&mut self, op: CreateOp) -> PendingAddress {
        let idx = self.creates.len();
        self.creates.push(op);
        PendingAddress(idx)
    }

    /// Stages a type specialization of an already-live element, capturing its
    /// current version for [`Transaction::validate`].
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] if `addr` is not currently live.
    pub fn modify_type(&mut self, addr: Address, new_type: ElementType) -> EngineResult<()> {
        let version = self.capture_version(addr)?;
        self.push_modify(addr, FieldMask::TYPE, version, Some(new_type), None);
        Ok(())
    }

    /// Stages a connector retarget of an already-live connector, capturing its
    /// current version for [`Transaction::validate`].
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] if `addr` is not currently live.
    pub fn retarget(&mut self, addr: Address, new_source: Address, new_target: Address) -> EngineResult<()> {
        let version = self.capture_version(addr)?;
        let mask = FieldMask::SOURCE.union(FieldMask::TARGET);
        self.push_modify(addr, mask, version, None, Some((new_source, new_target)));
        Ok(())
    }

    fn push_modify(
        &mut self,
        addr: Address,
        mask: FieldMask,
        captured_version: u64,
        new_type: Option<ElementType>,
        new_endpoints: Option<(Address, Address)>,
    ) {
        if let Some(existing) = self.modifies.iter_mut().find(|m| m.addr == addr) {
            existing.mask = existing.mask.union(mask);
            if new_type.is_some() {
                existing.new_type = new_type;
            }
            if new_endpoints.is_some() {
                existing.new_endpoints = new_endpoints;
            }
            return;
        }
        self.modifies.push(StagedModify {
            addr,
            mask,
            captured_version,
            new_type,
            new_endpoints,
        });
    }

    fn capture_version(&self, addr: Address) -> EngineResult<u64> {
        self.ctx
            .store()
            .version_of(addr)
            .ok_or(EngineError::NotFound)
    }

    /// Stages an erase of `addr` and its reachable cascade , capturing
    /// every victim's current version for [`Transaction::validate`].
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidState`] if `addr` does not currently exist.
    pub fn erase(&mut self, addr: Address) -> EngineResult<()> {
        let cascade = self.ctx.store().reachable_cascade(addr)?;
        let mut captured_versions = HashMap::new();
        for &victim in &cascade {
            if let Some(v) = self.ctx.store().version_of(victim) {
                captured_versions.insert(victim, v);
            }
        }
        self.erases.push(StagedErase {
            addr,
            cascade,
            captured_versions,
        });
        Ok(())
    }

    /// Stages a link content override.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidType`] if `addr` is not currently a link.
    pub fn set_content(&mut self, addr: Address, bytes: impl Into<Bytes>, format: ContentFormat) -> EngineResult<()> {
        if !self.ctx.store().element_type(addr)?.is_link() {
            return Err(EngineError::InvalidType);
        }
        self.content_sets.push(StagedContentSet {
            addr,
            bytes: bytes.into(),
            format,
        });
        Ok(())
    }

    /// Rechecks that every captured pre-image still matches the live store
    /// : no other transaction has touched the same element's staged
    /// fields since it was captured.
    #[must_use]
    pub fn validate(&self) -> bool {
        for modify in &self.modifies {
            match self.ctx.store().version_of(modify.addr) {
                Some(v) if v == modify.captured_version => {}
                _ => return false,
            }
        }
        for erase in &self.erases {
            for (&victim, &version) in &erase.captured_versions {
                match self.ctx.store().version_of(victim) {
                    Some(v) if v == version => {}
                    _ => return false,
                }
            }
        }
        true
    }

    /// Condenses the staged lists: a modify targeting an address also
    /// staged for erase is dropped (the erase subsumes it), repeated modifies
    /// on the same address keep only their merged field mask and latest
    /// values (already enforced incrementally by [`Transaction::push_modify`]),
    /// and an erase whose root is already covered by an earlier erase's
    /// cascade is dropped in turn — its victims are removed as part of the
    /// earlier one, and `apply_erase` must never target a root that some
    /// other staged erase already swept.
    ///
    /// Create-then-erase / create-then-modify folding from the source spec
    /// does not arise under this API: `create_*` returns a [`PendingAddress`]
    /// consumable only by later `create_connector` calls, never by `modify`
    /// or `erase`, which require an already-live [`Address`] (see `DESIGN.md`).
    pub fn merge(&mut self) {
        let erased: BTreeSet<Address> = self.erases.iter().map(|e| e.addr).collect();
        self.modifies.retain(|m| !erased.contains(&m.addr));

        let mut covered: BTreeSet<Address> = BTreeSet::new();
        self.erases.retain(|erase| {
            if covered.contains(&erase.addr) {
                return false;
            }
            covered.extend(erase.cascade.iter().copied());
            true
        });
    }

    /// Applies the merged staged lists in order — creates, modifies, erases,
    /// content sets — pushing each through the element/content store and
    /// enqueuing the matching events . Atomic: any error reverts every
    /// change already applied by this call and returns it, leaving the
    /// transaction uncommitted.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidState`] if [`Transaction::validate`] fails, or
    /// propagates the first [`EngineError`] raised while applying a staged op.
    #[tracing::instrument(level = "debug", skip(self), fields(tx = %self.id))]
    pub fn apply(mut self) -> EngineResult<TxApplyResult> {
        if !self.validate() {
            return Err(EngineError::InvalidState);
        }
        self.merge();

        match self.apply_inner() {
            Ok(result) => {
                self.committed = true;
                self.ctx.append_wal(self.id, wal_record(&result));
                Ok(result)
            }
            Err((err, undo)) => {
                undo.revert(&self.ctx);
                Err(err)
            }
        }
    }

    fn apply_inner(&mut self) -> Result<TxApplyResult, (EngineError, Undo)> {
        let mut undo = Undo::default();
        let mut resolved: Vec<Option<Address>> = vec![None; self.creates.len()];

        for (idx, op) in self.creates.iter().enumerate() {
            match self.apply_create(op, &resolved) {
                Ok(addr) => {
                    resolved[idx] = Some(addr);
                    undo.created.push(addr);
                }
                Err(err) => return Err((err, undo)),
            }
        }

        for modify in &self.modifies {
            if let Err(err) = self.apply_modify(modify, &mut undo) {
                return Err((err, undo));
            }
        }

        for erase in &self.erases {
            if let Err(err) = self.apply_erase(erase) {
                return Err((err, undo));
            }
        }

        for set in &self.content_sets {
            self.apply_content_set(set);
        }

        let created = resolved
            .into_iter()
            .enumerate()
            .filter_map(|(idx, addr)| addr.map(|addr| (PendingAddress(idx), addr)))
            .collect();
        Ok(TxApplyResult { created })
    }

    fn resolve(&self, addr: TxAddr, resolved: &[Option<Address>]) -> EngineResult<Address> {
        match addr {
            TxAddr::Existing(addr) => Ok(addr),
            TxAddr::Pending(PendingAddress(idx)) => {
                resolved.get(idx).copied().flatten().ok_or(EngineError::InvalidState)
            }
        }
    }

    fn apply_create(&self, op: &CreateOp, resolved: &[Option<Address>]) -> EngineResult<Address> {
        match op {
            CreateOp::Node(ty) => self.ctx.store().create_node(*ty),
            CreateOp::Link(ty) => self.ctx.store().create_link(*ty),
            CreateOp::Connector(ty, source, target) => {
                let source = self.resolve(*source, resolved)?;
                let target = self.resolve(*target, resolved)?;
                let conn = self.ctx.store().create_connector(*ty, source, target)?;
                self.ctx.emit_event(Event {
                    kind: EventKind::AddOutgoingArc,
                    subject: source,
                    connector: conn,
                    other: target,
                    user: self.user,
                });
                self.ctx.emit_event(Event {
                    kind: EventKind::AddIncomingArc,
                    subject: target,
                    connector: conn,
                    other: source,
                    user: self.user,
                });
                Ok(conn)
            }
        }
    }

    fn apply_modify(&self, modify: &StagedModify, undo: &mut Undo) -> EngineResult<()> {
        if let Some(new_type) = modify.new_type {
            let pre = self.ctx.store().element_type(modify.addr)?;
            self.ctx.store().set_element_type(modify.addr, new_type)?;
            undo.type_changes.push((modify.addr, pre));
        }
        if let Some((new_source, new_target)) = modify.new_endpoints {
            let pre = self
                .ctx
                .store()
                .connector_endpoints(modify.addr)?
                .ok_or(EngineError::InvalidParams)?;
            self.ctx.store().retarget_connector(modify.addr, new_source, new_target)?;
            self.emit_retarget_events(modify.addr, pre, (new_source, new_target));
            undo.retargets.push((modify.addr, pre));
        }
        self.ctx.store().bump_version(modify.addr);
        Ok(())
    }

    fn emit_retarget_events(&self, conn: Address, old: (Address, Address), new: (Address, Address)) {
        let (old_source, old_target) = old;
        let (new_source, new_target) = new;
        self.ctx.emit_event(Event {
            kind: EventKind::RemoveOutgoingArc,
            subject: old_source,
            connector: conn,
            other: old_target,
            user: self.user,
        });
        self.ctx.emit_event(Event {
            kind: EventKind::RemoveIncomingArc,
            subject: old_target,
            connector: conn,
            other: old_source,
            user: self.user,
        });
        self.ctx.emit_event(Event {
            kind: EventKind::AddOutgoingArc,
            subject: new_source,
            connector: conn,
            other: new_target,
            user: self.user,
        });
        self.ctx.emit_event(Event {
            kind: EventKind::AddIncomingArc,
            subject: new_target,
            connector: conn,
            other: new_source,
            user: self.user,
        });
    }

    fn apply_erase(&self, erase: &StagedErase) -> EngineResult<()> {
        self.ctx.store().erase(erase.addr)?;
        for &victim in &erase.cascade {
            self.ctx.dictionary().forget_address(victim);
            self.ctx.content().remove(victim);
            self.ctx.emit_event(Event {
                kind: EventKind::RemoveElement,
                subject: victim,
                connector: Address::EMPTY,
                other: Address::EMPTY,
                user: self.user,
            });
        }
        Ok(())
    }

    fn apply_content_set(&self, set: &StagedContentSet) {
        self.ctx
            .content()
            .set_link_content(set.addr, set.bytes.clone(), set.format);
        self.ctx.emit_event(Event {
            kind: EventKind::ChangeContent,
            subject: set.addr,
            connector: Address::EMPTY,
            other: Address::EMPTY,
            user: self.user,
        });
    }

    /// Discards every staged change; pending creates are never materialized
    /// and no event is emitted.
    pub fn rollback(mut self) {
        self.clear();
    }

    /// Empties the staging buffer without commit or rollback notifications.
    pub fn clear(&mut self) {
        self.creates.clear();
        self.modifies.clear();
        self.erases.clear();
        self.content_sets.clear();
    }
}

/// Opaque WAL payload for a committed transaction: the materialized
/// addresses bound to each pending create, in creation order. Adapters are
/// free to ignore this encoding and derive their own from `TxApplyResult`;
/// the core only needs *something* to hand `PersistentStore::append_wal`.
fn wal_record(result: &TxApplyResult) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(result.created.len() * 8);
    let mut addrs: Vec<_> = result.created.values().collect();
    addrs.sort_by_key(|a| a.as_u64());
    for addr in addrs {
        bytes.extend_from_slice(&addr.as_u64().to_le_bytes());
    }
    bytes
}

#[derive(Default)]
struct Undo {
    created: Vec<Address>,
    type_changes: Vec<(Address, ElementType)>,
    retargets: Vec<(Address, (Address, Address))>,
}

impl Undo {
    fn revert(&self, ctx: &Context) {
        for &(addr, (source, target)) in self.retargets.iter().rev() {
            let _ = ctx.store().retarget_connector(addr, source, target);
        }
        for &(addr, ty) in self.type_changes.iter().rev() {
            let _ = ctx.store().set_element_type(addr, ty);
        }
        for &addr in self.created.iter().rev() {
            let _ = ctx.store().erase(addr);
        }
    }
}
