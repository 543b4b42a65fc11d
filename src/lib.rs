// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

//! semnet: an in-process typed semantic-network memory engine.
//!
//! A [`Context`] owns a typed directed hypergraph store (nodes, links,
//! connectors), a link content store, a system-identifier dictionary, the
//! iteration/template engines built on top of them, a transactional mutation
//! buffer, and an event dispatch fabric that notifies subscribed agents of
//! structural changes. Every operation is a method on `Context`; there is no
//! hidden process-wide state outside `#[cfg(test)]`.

pub mod address;
pub mod config;
pub mod content;
pub mod dictionary;
pub mod element;
pub mod error;
pub mod events;
pub mod iter;
pub mod persistent;
pub mod store;
pub mod template;
pub mod tx;
pub mod txbuf;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use address::Address;
use config::EngineConfig;
use content::{ContentFormat, ContentStore, LinkContent};
use dictionary::Dictionary;
use error::{EngineError, EngineResult};
use events::{Agent, Event, EventBus, EventKind, SubscriptionId};
use iter::{Constraint, Iter3, Iter5};
use persistent::{PersistentStore, SnapshotBlob, TransactionRecord};
use store::ElementStore;
use template::{GenerationResult, SearchResult, Template};
use tx::TxId;
use txbuf::Transaction;
use types::{Constancy, ElementType, RoleTag};

/// Privilege tier a [`Context`] was created with.
///
/// Gates the mutating surface of `Context`: a `ReadOnly` context still serves
/// every read/query operation (iteration, search, dictionary lookup, content
/// reads) but rejects `create_*`/`erase`/`set_content`/`begin`/dictionary
/// `set` with [`EngineError::InvalidState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessLevel {
    /// Read/query operations only.
    ReadOnly,
    /// Full read/write access.
    ReadWrite,
}

impl AccessLevel {
    const fn permits_mutation(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

struct BootstrapClasses {
    finished_successfully: Address,
    finished_unsuccessfully: Address,
    finished_with_error: Address,
}

fn class_node_type() -> ElementType {
    ElementType::node(Constancy::Const, RoleTag::Class)
}

fn resolve_class(store: &ElementStore, dictionary: &Dictionary, name: &str) -> Address {
    dictionary
        .resolve(name, class_node_type(), store)
        .unwrap_or(Address::EMPTY)
}

/// Connector type used for the "finished-*" outcome bookkeeping arcs :
/// a constant, permanent, positive access arc from a class to an action.
fn outcome_arc_type() -> ElementType {
    ElementType::connector(
        Constancy::Const,
        types::Direction::Access,
        types::Permanence::Perm,
        types::Sign::Positive,
    )
}

pub(crate) struct ContextInner {
    store: ElementStore,
    content: ContentStore,
    dictionary: Dictionary,
    events: Arc<EventBus>,
    config: EngineConfig,
    access_level: AccessLevel,
    user: Address,
    next_tx_id: AtomicU64,
    classes: BootstrapClasses,
    persistent: Mutex<Option<Arc<dyn PersistentStore>>>,
}

/// The single owning value that wires the element store, content store,
/// dictionary, iteration kernel, template engine, transaction buffer, and
/// event dispatcher together. Cheap to clone — a `Context` is a thin handle
/// around an `Arc<ContextInner>` — and `Send + Sync`, so the embedder can
/// hand it to its own worker threads by value.
#[derive(Clone)]
pub struct Context(pub(crate) Arc<ContextInner>);

/// Creates a new context under `access_level`, resolving `name` as this
/// context's user identity in the system-identifier dictionary (created if
/// absent) and bootstrapping the three well-known outcome-class nodes used
/// by the event dispatcher.
#[must_use]
#[tracing::instrument(level = "debug", skip(config))]
pub fn create_context(access_level: AccessLevel, name: &str, config: EngineConfig) -> Context {
    let store = ElementStore::new(config.segment_capacity);
    let content = ContentStore::new();
    let dictionary = Dictionary::new();

    let user_type = ElementType::node(Constancy::Const, RoleTag::Plain);
    let user = dictionary.resolve(name, user_type, &store).unwrap_or(Address::EMPTY);

    let classes = BootstrapClasses {
        finished_successfully: resolve_class(&store, &dictionary, "finished-successfully"),
        finished_unsuccessfully: resolve_class(&store, &dictionary, "finished-unsuccessfully"),
        finished_with_error: resolve_class(&store, &dictionary, "finished-with-error"),
    };

    let event_queue_capacity = config.event_queue_capacity;
    let inner = Arc::new_cyclic(|weak| {
        let events = EventBus::new(event_queue_capacity, weak.clone());
        ContextInner {
            store,
            content,
            dictionary,
            events,
            config,
            access_level,
            user,
            next_tx_id: AtomicU64::new(1),
            classes,
            persistent: Mutex::new(None),
        }
    });

    tracing::debug!(%name, ?access_level, "context created");
    Context(inner)
}

impl Context {
    pub(crate) fn store(&self) -> &ElementStore {
        &self.0.store
    }

    pub(crate) fn content(&self) -> &ContentStore {
        &self.0.content
    }

    pub(crate) fn dictionary(&self) -> &Dictionary {
        &self.0.dictionary
    }

    pub(crate) fn emit_event(&self, event: Event) {
        self.0.events.emit(event);
    }

    /// Returns the configuration this context was created with.
    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.0.config
    }

    /// Returns the privilege tier this context was created with.
    #[must_use]
    pub fn access_level(&self) -> AccessLevel {
        self.0.access_level
    }

    /// Returns the address of this context's resolved user identity.
    #[must_use]
    pub fn user(&self) -> Address {
        self.0.user
    }

    fn require_mutable(&self) -> EngineResult<()> {
        if self.0.access_level.permits_mutation() {
            Ok(())
        } else {
            Err(EngineError::InvalidState)
        }
    }

    pub(crate) fn finished_successfully_class(&self) -> Address {
        self.0.classes.finished_successfully
    }

    pub(crate) fn finished_unsuccessfully_class(&self) -> Address {
        self.0.classes.finished_unsuccessfully
    }

    pub(crate) fn finished_with_error_class(&self) -> Address {
        self.0.classes.finished_with_error
    }

    /// Records an agent callback outcome by creating an access arc
    /// from `class` to `action`; `class` is one of the three bootstrap class
    /// addresses above. Never aborts the dispatcher — a failure here is
    /// logged and swallowed by the caller (`events::record_outcome`).
    pub(crate) fn link_outcome(&self, class: Address, action: Address) -> EngineResult<Address> {
        self.0.store.create_connector(outcome_arc_type(), class, action)
    }

    // ---- element store ----------------------------------------------------

    /// Creates a node element.
    ///
    /// # Errors
    /// See [`ElementStore::create_node`]; also fails with
    /// [`EngineError::InvalidState`] if this context is `ReadOnly`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn create_node(&self, ty: ElementType) -> EngineResult<Address> {
        self.require_mutable()?;
        let addr = self.0.store.create_node(ty)?;
        tracing::debug!(?addr, "node created");
        Ok(addr)
    }

    /// Creates a link element.
    ///
    /// # Errors
    /// See [`ElementStore::create_link`]; also fails with
    /// [`EngineError::InvalidState`] if this context is `ReadOnly`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn create_link(&self, ty: ElementType) -> EngineResult<Address> {
        self.require_mutable()?;
        let addr = self.0.store.create_link(ty)?;
        tracing::debug!(?addr, "link created");
        Ok(addr)
    }

    /// Creates a connector between `source` and `target`, immediately (not
    /// staged) emitting the matching `add-*-arc` events. For staged creation
    /// within a transaction use [`Context::begin`] instead.
    ///
    /// # Errors
    /// See [`ElementStore::create_connector`]; also fails with
    /// [`EngineError::InvalidState`] if this context is `ReadOnly`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn create_connector(&self, ty: ElementType, source: Address, target: Address) -> EngineResult<Address> {
        self.require_mutable()?;
        let conn = self.0.store.create_connector(ty, source, target)?;
        self.emit_event(Event {
            kind: EventKind::AddOutgoingArc,
            subject: source,
            connector: conn,
            other: target,
            user: self.0.user,
        });
        self.emit_event(Event {
            kind: EventKind::AddIncomingArc,
            subject: target,
            connector: conn,
            other: source,
            user: self.0.user,
        });
        Ok(conn)
    }

    /// Erases `addr` and every connector transitively incident to it,
    /// emitting a `remove-element` event for each victim.
    ///
    /// # Errors
    /// See [`ElementStore::erase`]; also fails with
    /// [`EngineError::InvalidState`] if this context is `ReadOnly`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn erase(&self, addr: Address) -> EngineResult<()> {
        self.require_mutable()?;
        let cascade = self.0.store.reachable_cascade(addr)?;
        self.0.store.erase(addr)?;
        for victim in cascade {
            self.0.dictionary.forget_address(victim);
            self.0.content.remove(victim);
            self.emit_event(Event {
                kind: EventKind::RemoveElement,
                subject: victim,
                connector: Address::EMPTY,
                other: Address::EMPTY,
                user: self.0.user,
            });
        }
        Ok(())
    }

    /// Returns `true` if `addr` currently refers to a live element.
    #[must_use]
    pub fn is_element(&self, addr: Address) -> bool {
        self.0.store.is_element(addr)
    }

    /// Returns the type of the element at `addr`.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] if `addr` is not currently live.
    pub fn element_type(&self, addr: Address) -> EngineResult<ElementType> {
        self.0.store.element_type(addr)
    }

    /// Returns the `(source, target)` pair of a connector, or `Ok(None)` if
    /// `addr` is live but not a connector.
    ///
    /// # Errors
    /// Returns [`EngineError::NotFound`] if `addr` is not currently live.
    pub fn connector_endpoints(&self, addr: Address) -> EngineResult<Option<(Address, Address)>> {
        self.0.store.connector_endpoints(addr)
    }

    // ---- link content -------------------------------------------------------

    /// Replaces the content of `addr`, immediately emitting `change-content`.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidType`] if `addr` is not currently a
    /// link, or [`EngineError::InvalidState`] if this context is `ReadOnly`.
    pub fn set_link_content(&self, addr: Address, bytes: impl Into<Bytes>, format: ContentFormat) -> EngineResult<()> {
        self.require_mutable()?;
        if !self.0.store.element_type(addr)?.is_link() {
            return Err(EngineError::InvalidType);
        }
        self.0.content.set_link_content(addr, bytes, format);
        self.emit_event(Event {
            kind: EventKind::ChangeContent,
            subject: addr,
            connector: Address::EMPTY,
            other: Address::EMPTY,
            user: self.0.user,
        });
        Ok(())
    }

    /// Returns the content stored for `addr`.
    ///
    /// # Errors
    /// Returns [`EngineError::No`] if no content has been set for `addr`.
    pub fn get_link_content(&self, addr: Address) -> EngineResult<LinkContent> {
        self.0.content.get_link_content(addr)
    }

    /// Returns every address whose stored bytes exactly match `bytes`.
    #[must_use]
    pub fn find_links_by_content(&self, bytes: &[u8]) -> HashSet<Address> {
        self.0.content.find_links_by_content(bytes)
    }

    // ---- system-identifier dictionary ----------------------------------------

    /// Looks up a system identifier.
    #[must_use]
    pub fn dict_find(&self, name: &str) -> Option<Address> {
        self.0.dictionary.find(name, &self.0.store)
    }

    /// Binds `name` to `addr`.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidState`] if `name` is already bound to a
    /// different live address, or if this context is `ReadOnly`.
    pub fn dict_set(&self, name: &str, addr: Address) -> EngineResult<()> {
        self.require_mutable()?;
        if self.0.dictionary.set(name, addr, &self.0.store) {
            Ok(())
        } else {
            Err(EngineError::InvalidState)
        }
    }

    /// Returns the address bound to `name`, creating a node of `hint_type`
    /// if no live binding exists.
    ///
    /// # Errors
    /// Propagates [`EngineError`] from element creation, or returns
    /// [`EngineError::InvalidState`] if a new binding is required and this
    /// context is `ReadOnly`.
    pub fn dict_resolve(&self, name: &str, hint_type: ElementType) -> EngineResult<Address> {
        if let Some(addr) = self.0.dictionary.find(name, &self.0.store) {
            return Ok(addr);
        }
        self.require_mutable()?;
        self.0.dictionary.resolve(name, hint_type, &self.0.store)
    }

    /// Returns the system identifier bound to `addr`, if any is currently tracked.
    #[must_use]
    pub fn dict_name_of(&self, addr: Address) -> Option<String> {
        self.0.dictionary.name_of(addr)
    }

    // ---- iteration kernel -----------------------------------------------------

    /// Builds a 3-position constraint iterator.
    ///
    /// # Errors
    /// See [`Iter3::new`].
    pub fn iter3(&self, p1: Constraint, p2: Constraint, p3: Constraint) -> EngineResult<Iter3<'_>> {
        Iter3::new(&self.0.store, p1, p2, p3)
    }

    /// Builds a 5-position constraint iterator.
    ///
    /// # Errors
    /// See [`Iter5::new`].
    pub fn iter5(
        &self,
        p1: Constraint,
        p2: Constraint,
        p3: Constraint,
        p4: Constraint,
        p5: Constraint,
    ) -> EngineResult<Iter5<'_>> {
        Iter5::new(&self.0.store, p1, p2, p3, p4, p5)
    }

    // ---- template engine ------------------------------------------------------

    /// Runs [`template::generate`] against this context's element store.
    ///
    /// # Errors
    /// See [`template::generate`]; also fails with
    /// [`EngineError::InvalidState`] if this context is `ReadOnly`.
    pub fn generate(&self, tmpl: &Template, params: &HashMap<String, Address>) -> EngineResult<GenerationResult> {
        self.require_mutable()?;
        template::generate(tmpl, params, &self.0.store)
    }

    /// Runs [`template::search`] against this context's element store.
    ///
    /// # Errors
    /// See [`template::search`].
    pub fn search(&self, tmpl: &Template, params: &HashMap<String, Address>) -> EngineResult<SearchResult> {
        template::search(tmpl, params, &self.0.store)
    }

    /// Runs [`Template::build_from_graph`] against this context's store and dictionary.
    ///
    /// # Errors
    /// See [`Template::build_from_graph`].
    pub fn build_template_from_graph(&self, structure: Address) -> EngineResult<Template> {
        Template::build_from_graph(structure, &self.0.store, &self.0.dictionary)
    }

    // ---- transactional mutation -----------------------------------------------

    /// Begins a transaction under the caller-supplied `id`.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidState`] if this context is `ReadOnly`.
    pub fn begin(&self, id: TxId) -> EngineResult<Transaction> {
        self.require_mutable()?;
        Ok(Transaction::new(id, self.clone(), self.0.user))
    }

    /// Begins a transaction under a freshly issued, monotonically increasing id.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidState`] if this context is `ReadOnly`.
    pub fn begin_next(&self) -> EngineResult<Transaction> {
        let id = TxId::from_raw(self.0.next_tx_id.fetch_add(1, Ordering::Relaxed));
        self.begin(id)
    }

    // ---- event dispatch -------------------------------------------------------

    /// Registers `agent` to be invoked for events of `kind` touching `subject`.
    #[must_use]
    pub fn subscribe(&self, kind: EventKind, subject: Address, agent: Arc<dyn Agent>) -> SubscriptionId {
        self.0.events.subscribe(kind, subject, agent)
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.0.events.unsubscribe(id);
    }

    /// Blocks up to `timeout` for the next event of `kind` touching `subject`.
    #[must_use]
    pub fn wait_for_event(&self, kind: EventKind, subject: Address, timeout: Duration) -> Option<Event> {
        self.0.events.wait_for_event(kind, subject, timeout)
    }

    // ---- External interfaces: persistent store ------------------------------

    /// Attaches a durability collaborator. The core never ships an
    /// implementation of its own; this only registers the hook.
    pub fn attach_persistent_store(&self, store: Arc<dyn PersistentStore>) {
        *self.0.persistent.lock() = Some(store);
    }

    /// Opens the attached persistent store at `path`, if one is attached.
    ///
    /// # Errors
    /// Propagates the attached store's [`PersistentStore::open`] error.
    pub fn open_persistent(&self, path: &Path) -> EngineResult<()> {
        match self.0.persistent.lock().as_ref() {
            Some(store) => store.open(path),
            None => Ok(()),
        }
    }

    /// Saves `segments` through the attached persistent store, if any.
    ///
    /// # Errors
    /// Propagates the attached store's [`PersistentStore::save_snapshot`] error.
    pub fn save_snapshot(&self, segments: &SnapshotBlob) -> EngineResult<()> {
        match self.0.persistent.lock().as_ref() {
            Some(store) => store.save_snapshot(segments),
            None => Ok(()),
        }
    }

    /// Loads the most recently saved snapshot through the attached persistent
    /// store, if any is attached.
    ///
    /// # Errors
    /// Propagates the attached store's [`PersistentStore::load_snapshot`] error.
    pub fn load_snapshot(&self) -> EngineResult<Option<SnapshotBlob>> {
        match self.0.persistent.lock().as_ref() {
            Some(store) => store.load_snapshot(),
            None => Ok(None),
        }
    }

    /// Appends a write-ahead-log record for a committed transaction through
    /// the attached persistent store, if any. Called by
    /// [`txbuf::Transaction::apply`] on successful commit.
    pub(crate) fn append_wal(&self, tx_id: TxId, bytes: Vec<u8>) {
        let Some(store) = self.0.persistent.lock().clone() else {
            return;
        };
        if let Err(err) = store.append_wal(&TransactionRecord { tx_id, bytes }) {
            tracing::warn!(%tx_id, ?err, "failed to append write-ahead-log record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, Permanence, Sign};

    fn test_context() -> Context {
        create_context(AccessLevel::ReadWrite, "test-user", EngineConfig::default())
    }

    fn class_ty() -> ElementType {
        ElementType::node(Constancy::Const, RoleTag::Class)
    }

    fn arc_ty() -> ElementType {
        ElementType::connector(Constancy::Const, Direction::Access, Permanence::Perm, Sign::Positive)
    }

    #[test]
    fn create_context_resolves_user_and_bootstrap_classes() {
        let ctx = test_context();
        assert!(ctx.is_element(ctx.user()));
        assert!(ctx.is_element(ctx.finished_successfully_class()));
        assert!(ctx.is_element(ctx.finished_unsuccessfully_class()));
        assert!(ctx.is_element(ctx.finished_with_error_class()));
    }

    #[test]
    fn read_only_context_rejects_create() {
        let ctx = create_context(AccessLevel::ReadOnly, "viewer", EngineConfig::default());
        assert_eq!(ctx.create_node(class_ty()), Err(EngineError::InvalidState));
    }

    #[test]
    fn scenario_s1_create_triple_is_iterable() {
        let ctx = test_context();
        let n1 = ctx.create_node(class_ty()).unwrap();
        let n2 = ctx.create_node(class_ty()).unwrap();
        let e = ctx.create_connector(arc_ty(), n1, n2).unwrap();

        let mut it = ctx
            .iter3(Constraint::Addr(n1), Constraint::Type(arc_ty()), Constraint::Type(class_ty()))
            .unwrap();
        assert!(it.next());
        assert_eq!(it.get(1), Some(e));
        assert_eq!(it.get(2), Some(n2));
        assert!(!it.next());
    }

    #[test]
    fn scenario_s2_erase_cascades() {
        let ctx = test_context();
        let n1 = ctx.create_node(class_ty()).unwrap();
        let n2 = ctx.create_node(class_ty()).unwrap();
        let e = ctx.create_connector(arc_ty(), n1, n2).unwrap();

        ctx.erase(n1).unwrap();

        assert!(!ctx.is_element(n1));
        assert!(!ctx.is_element(e));
        assert!(ctx.is_element(n2));
    }

    #[test]
    fn scenario_s4_dictionary_resolve_is_idempotent_and_rejects_rebind() {
        let ctx = test_context();
        let a = ctx.dict_resolve("foo", class_ty()).unwrap();
        let b = ctx.dict_resolve("foo", class_ty()).unwrap();
        assert_eq!(a, b);

        let other = ctx.create_node(class_ty()).unwrap();
        assert_eq!(ctx.dict_set("foo", other), Err(EngineError::InvalidState));
    }

    #[test]
    fn scenario_s6_link_content_round_trip() {
        let ctx = test_context();
        let l = ctx.create_link(ElementType::link(Constancy::Const)).unwrap();
        ctx.set_link_content(l, 43.567_f32.to_le_bytes().to_vec(), ContentFormat::Float)
            .unwrap();
        let content = ctx.get_link_content(l).unwrap();
        assert!((content.as_float().unwrap() - 43.567_f64).abs() < 1e-4);
        assert_eq!(content.as_int(), Err(EngineError::InvalidType));
    }
}
