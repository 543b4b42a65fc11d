//! Event dispatch fabric: subscription registry, ordered delivery, and the
//! agent lifecycle.
//!
//! The dispatcher is a dedicated OS thread draining a bounded
//! [`crossbeam_channel`]. `apply()` in [`crate::txbuf`] is the only
//! producer; callbacks run serially in enqueue order on the dispatcher
//! thread and never reenter the transaction that triggered them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::address::Address;
use crate::error::EngineError;
use crate::Context;

/// The structural-change kinds an agent may subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `subject` gained an outgoing connector.
    AddOutgoingArc,
    /// `subject` gained an incoming connector.
    AddIncomingArc,
    /// `subject` lost an outgoing connector.
    RemoveOutgoingArc,
    /// `subject` lost an incoming connector.
    RemoveIncomingArc,
    /// `subject` itself was erased.
    RemoveElement,
    /// `subject`'s link content changed.
    ChangeContent,
}

/// A single structural-change notification.
///
/// `connector` and `other` carry the arc and far endpoint for arc-shaped
/// kinds; both are [`Address::EMPTY`] for `RemoveElement`/`ChangeContent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// The subscribed-to element.
    pub subject: Address,
    /// The connector involved, if any.
    pub connector: Address,
    /// The far endpoint of `connector`, if any.
    pub other: Address,
    /// The address of the user on whose behalf the mutation ran.
    pub user: Address,
}

#[cfg(feature = "telemetry")]
impl serde::Serialize for Event {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Event", 5)?;
        s.serialize_field("kind", &format!("{:?}", self.kind))?;
        s.serialize_field("subject", &hex::encode(self.subject.as_u64().to_be_bytes()))?;
        s.serialize_field("connector", &hex::encode(self.connector.as_u64().to_be_bytes()))?;
        s.serialize_field("other", &hex::encode(self.other.as_u64().to_be_bytes()))?;
        s.serialize_field("user", &hex::encode(self.user.as_u64().to_be_bytes()))?;
        s.end()
    }
}

/// Result of an agent callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The callback succeeded.
    Ok,
    /// The callback declined to act (not a failure).
    No,
    /// The callback failed with a structured error.
    Error(EngineError),
}

/// A structural-event callback: given the firing [`Context`] and [`Event`],
/// produce an [`Outcome`]. Implemented for any matching closure, so agent
/// "classes" in the source collapse to values or closures.
pub trait Agent: Send + Sync {
    /// Handles one event, optionally driving further mutations through `ctx`.
    fn handle(&self, ctx: &Context, event: &Event) -> Outcome;
}

impl<F> Agent for F
where
    F: Fn(&Context, &Event) -> Outcome + Send + Sync,
{
    fn handle(&self, ctx: &Context, event: &Event) -> Outcome {
        self(ctx, event)
    }
}

/// Opaque handle returned by [`EventBus::subscribe`], consumed by [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    agent: Arc<dyn Agent>,
}

#[derive(Default)]
struct Registry {
    by_subject: HashMap<Address, Vec<Subscription>>,
    subject_of: HashMap<SubscriptionId, Address>,
}

/// Subscription registry, event queue, and dispatcher thread handle.
pub struct EventBus {
    sender: Sender<Event>,
    registry: Arc<Mutex<Registry>>,
    next_id: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize, context: Weak<crate::ContextInner>) -> Arc<Self> {
        let (sender, receiver) = bounded(capacity.max(1));
        let registry = Arc::new(Mutex::new(Registry::default()));
        let bus = Arc::new(Self {
            sender,
            registry: Arc::clone(&registry),
            next_id: AtomicU64::new(1),
            worker: Mutex::new(None),
        });
        let worker_registry = registry;
        let handle = std::thread::spawn(move || dispatch_loop(receiver, worker_registry, context));
        *bus.worker.lock() = Some(handle);
        bus
    }

    /// Registers `agent` to be invoked for events of `kind` touching `subject`.
    #[must_use]
    pub fn subscribe(&self, kind: EventKind, subject: Address, agent: Arc<dyn Agent>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.registry.lock();
        registry
            .by_subject
            .entry(subject)
            .or_default()
            .push(Subscription { id, kind, agent });
        registry.subject_of.insert(id, subject);
        id
    }

    /// Removes a subscription. In-flight invocations already dispatched still
    /// complete.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut registry = self.registry.lock();
        if let Some(subject) = registry.subject_of.remove(&id) {
            if let Some(list) = registry.by_subject.get_mut(&subject) {
                list.retain(|s| s.id != id);
            }
        }
    }

    /// Enqueues `event` for serial, in-order delivery. Called only from
    /// [`crate::txbuf::Transaction::apply`].
    #[tracing::instrument(level = "debug", skip(self))]
    pub(crate) fn emit(&self, event: Event) {
        if self.sender.try_send(event).is_err() {
            tracing::warn!(?event.kind, "event queue full or dispatcher gone, event dropped");
        }
    }

    /// Blocks up to `timeout` for the next event of `kind` touching `subject`,
    /// without disturbing any other subscription. Returns `None` ("not
    /// arrived") on timeout.
    #[must_use]
    pub fn wait_for_event(&self, kind: EventKind, subject: Address, timeout: Duration) -> Option<Event> {
        let (tx, rx) = bounded::<Event>(1);
        struct Relay(Mutex<Option<Sender<Event>>>);
        impl Agent for Relay {
            fn handle(&self, _ctx: &Context, event: &Event) -> Outcome {
                if let Some(sender) = self.0.lock().take() {
                    let _ = sender.send(*event);
                }
                Outcome::Ok
            }
        }
        let relay = Arc::new(Relay(Mutex::new(Some(tx))));
        let id = self.subscribe(kind, subject, relay);
        let result = rx.recv_timeout(timeout).ok();
        self.unsubscribe(id);
        result
    }
}

fn dispatch_loop(receiver: Receiver<Event>, registry: Arc<Mutex<Registry>>, context: Weak<crate::ContextInner>) {
    while let Ok(event) = receiver.recv() {
        let Some(inner) = context.upgrade() else {
            break;
        };
        let ctx = Context(inner);
        let agents: Vec<Arc<dyn Agent>> = {
            let registry = registry.lock();
            registry
                .by_subject
                .get(&event.subject)
                .into_iter()
                .flatten()
                .filter(|s| s.kind == event.kind)
                .map(|s| Arc::clone(&s.agent))
                .collect()
        };
        for agent in agents {
            let outcome = agent.handle(&ctx, &event);
            record_outcome(&ctx, event.subject, outcome);
        }
    }
}

fn record_outcome(ctx: &Context, action: Address, outcome: Outcome) {
    let class = match outcome {
        Outcome::Ok => ctx.finished_successfully_class(),
        Outcome::No => ctx.finished_unsuccessfully_class(),
        Outcome::Error(code) => {
            tracing::debug!(?code, "agent callback returned an error outcome");
            ctx.finished_with_error_class()
        }
    };
    let _ = ctx.link_outcome(class, action);
}
