use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender};
use futures::Stream;
use hashbrown::HashMap;

use crate::event::{DocumentEvent, EventKind};

/// Unique identifier for a listener.
pub type ListenerId = u64;

/// Monotonic id generator for listeners.
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> ListenerId {
    NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handle returned when you register a listener, hook or suppressor.
/// Use it to remove the registration immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventListenerHandle {
    pub kind: EventKind,
    pub id: ListenerId,
}

type HookFn = Box<dyn FnMut(&DocumentEvent) + Send>;

/// Synchronous callback run inline while an event is being dispatched.
struct Hook {
    id: ListenerId,
    once: bool,
    callback: HookFn,
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("id", &self.id)
            .field("once", &self.once)
            .finish()
    }
}

/// Hooks drained for one dispatch, handed back with [`EventListeners::restore_hooks`].
#[derive(Debug, Default)]
pub struct PendingHooks {
    kind: Option<EventKind>,
    hooks: Vec<Hook>,
}

impl PendingHooks {
    pub fn run(&mut self, event: &DocumentEvent) {
        for hook in self.hooks.iter_mut() {
            (hook.callback)(event);
        }
    }
}

/// Represents a single streaming listener.
#[derive(Debug)]
struct EventListener {
    id: ListenerId,
    listener: UnboundedSender<Arc<DocumentEvent>>,
}

/// All the currently registered hooks, suppressors and listeners of a document.
#[derive(Debug, Default)]
pub struct EventListeners {
    hooks: HashMap<EventKind, Vec<Hook>>,
    /// One-shot suppressors for trusted events, in registration order.
    suppressors: HashMap<EventKind, Vec<ListenerId>>,
    listeners: HashMap<EventKind, Vec<EventListener>>,
}

impl EventListeners {
    /// Register a synchronous hook. `once` hooks are dropped after their first run.
    pub fn add_hook(
        &mut self,
        kind: EventKind,
        once: bool,
        callback: impl FnMut(&DocumentEvent) + Send + 'static,
    ) -> EventListenerHandle {
        let id = next_id();
        self.hooks.entry(kind).or_default().push(Hook {
            id,
            once,
            callback: Box::new(callback),
        });
        EventListenerHandle { kind, id }
    }

    /// Swallow the next trusted occurrence of `kind`; synthetic ones pass through.
    pub fn add_suppressor(&mut self, kind: EventKind) -> EventListenerHandle {
        let id = next_id();
        self.suppressors.entry(kind).or_default().push(id);
        EventListenerHandle { kind, id }
    }

    /// Register a streaming subscription for a kind, returning a handle to remove it.
    pub fn add_listener(
        &mut self,
        kind: EventKind,
        listener: UnboundedSender<Arc<DocumentEvent>>,
    ) -> EventListenerHandle {
        let id = next_id();
        self.listeners
            .entry(kind)
            .or_default()
            .push(EventListener { id, listener });
        EventListenerHandle { kind, id }
    }

    /// Remove a hook, suppressor or listener immediately.
    /// Returns true if something was removed.
    pub fn remove(&mut self, handle: &EventListenerHandle) -> bool {
        let mut removed = false;

        if let Some(hooks) = self.hooks.get_mut(&handle.kind) {
            let before = hooks.len();
            hooks.retain(|h| h.id != handle.id);
            removed |= hooks.len() != before;
        }
        if let Some(ids) = self.suppressors.get_mut(&handle.kind) {
            let before = ids.len();
            ids.retain(|id| *id != handle.id);
            removed |= ids.len() != before;
        }
        if let Some(subs) = self.listeners.get_mut(&handle.kind) {
            let before = subs.len();
            subs.retain(|s| s.id != handle.id);
            removed |= subs.len() != before;
        }

        self.housekeeping();
        removed
    }

    /// Take the hooks registered for `kind` so they can run without the registry borrowed.
    pub fn take_hooks(&mut self, kind: EventKind) -> PendingHooks {
        PendingHooks {
            kind: Some(kind),
            hooks: self.hooks.remove(&kind).unwrap_or_default(),
        }
    }

    /// Put back the persistent hooks after a dispatch. Hooks registered while
    /// the pending ones were running are kept after them.
    pub fn restore_hooks(&mut self, pending: PendingHooks) {
        let Some(kind) = pending.kind else {
            return;
        };
        let mut kept: Vec<Hook> = pending.hooks.into_iter().filter(|h| !h.once).collect();
        if let Some(added) = self.hooks.remove(&kind) {
            kept.extend(added);
        }
        if !kept.is_empty() {
            self.hooks.insert(kind, kept);
        }
    }

    /// Consume a suppressor for a trusted event. Returns true if the event must be swallowed.
    pub fn take_suppressor(&mut self, event: &DocumentEvent) -> bool {
        if !event.trusted {
            return false;
        }
        let consumed = match self.suppressors.get_mut(&event.kind) {
            Some(ids) if !ids.is_empty() => {
                ids.remove(0);
                true
            }
            _ => false,
        };
        self.housekeeping();
        consumed
    }

    /// Send an event to every streaming listener of its kind, dropping
    /// listeners whose receiver is gone.
    pub fn start_send(&mut self, event: DocumentEvent) {
        if let Some(subscriptions) = self.listeners.get_mut(&event.kind) {
            let event = Arc::new(event);
            subscriptions.retain(|sub| sub.listener.unbounded_send(Arc::clone(&event)).is_ok());
        }
        self.housekeeping();
    }

    pub fn has_suppressor(&self, kind: EventKind) -> bool {
        self.suppressors.get(&kind).is_some_and(|ids| !ids.is_empty())
    }

    fn housekeeping(&mut self) {
        self.hooks.retain(|_, v| !v.is_empty());
        self.suppressors.retain(|_, v| !v.is_empty());
        self.listeners.retain(|_, v| !v.is_empty());
    }
}

/// The receiver part of an event subscription.
pub struct EventStream {
    events: UnboundedReceiver<Arc<DocumentEvent>>,
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream").finish()
    }
}

impl EventStream {
    pub fn new(events: UnboundedReceiver<Arc<DocumentEvent>>) -> Self {
        Self { events }
    }
}

impl Stream for EventStream {
    type Item = Arc<DocumentEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Stream::poll_next(Pin::new(&mut self.get_mut().events), cx)
    }
}
