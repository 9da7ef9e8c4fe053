//! Per-document lifecycle object shared by every component of the guard.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures::Stream;

use crate::document::DocumentHost;
use crate::event::{Dispatch, DocumentEvent, EventKind};
use crate::freezer::DocumentFreezer;
use crate::gate::CapabilityGate;
use crate::listeners::{EventListenerHandle, EventListeners, EventStream};

struct ContextInner {
    host: Arc<dyn DocumentHost>,
    freezer: DocumentFreezer,
    gate: CapabilityGate,
    listeners: Mutex<EventListeners>,
}

/// Everything scoped to one document: the host, its freezer, its capability
/// gate and the listeners attached to its lifecycle signals.
///
/// Created when the document context is created; the host feeds it every
/// natural signal through [`DocumentContext::dispatch`].
#[derive(Clone)]
pub struct DocumentContext {
    inner: Arc<ContextInner>,
}

/// Non-owning handle to a [`DocumentContext`], for callbacks stored in the
/// context's own listener registry.
#[derive(Clone)]
pub struct WeakDocumentContext {
    inner: Weak<ContextInner>,
}

impl WeakDocumentContext {
    pub fn upgrade(&self) -> Option<DocumentContext> {
        self.inner.upgrade().map(|inner| DocumentContext { inner })
    }
}

impl fmt::Debug for WeakDocumentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDocumentContext").finish()
    }
}

impl fmt::Debug for DocumentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentContext")
            .field("url", &self.inner.host.url())
            .field("freezer", &self.inner.freezer)
            .field("gate", &self.inner.gate)
            .finish()
    }
}

impl DocumentContext {
    pub fn new(host: Arc<dyn DocumentHost>) -> Self {
        let freezer = DocumentFreezer::new(Arc::clone(&host));

        let mut listeners = EventListeners::default();
        let observer = freezer.clone();
        listeners.add_hook(EventKind::DomContentLoaded, false, move |event| {
            observer.observe(event)
        });

        Self {
            inner: Arc::new(ContextInner {
                host,
                freezer,
                gate: CapabilityGate::new(),
                listeners: Mutex::new(listeners),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakDocumentContext {
        WeakDocumentContext {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn host(&self) -> &Arc<dyn DocumentHost> {
        &self.inner.host
    }

    pub fn freezer(&self) -> &DocumentFreezer {
        &self.inner.freezer
    }

    pub fn gate(&self) -> &CapabilityGate {
        &self.inner.gate
    }

    fn listeners(&self) -> MutexGuard<'_, EventListeners> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a document signal: hooks run inline, then a pending suppressor
    /// may swallow a trusted occurrence, then streaming listeners get it.
    ///
    /// Hosts must keep the event from the page when this returns
    /// [`Dispatch::Suppressed`].
    pub fn dispatch(&self, event: DocumentEvent) -> Dispatch {
        let mut pending = self.listeners().take_hooks(event.kind);
        // hooks may register or dispatch, nothing is locked while they run
        pending.run(&event);

        let mut listeners = self.listeners();
        listeners.restore_hooks(pending);

        if listeners.take_suppressor(&event) {
            tracing::debug!("Suppressing natural {}", event.kind.name());
            return Dispatch::Suppressed;
        }

        listeners.start_send(event);
        Dispatch::Delivered
    }

    pub fn add_hook(
        &self,
        kind: EventKind,
        once: bool,
        callback: impl FnMut(&DocumentEvent) + Send + 'static,
    ) -> EventListenerHandle {
        self.listeners().add_hook(kind, once, callback)
    }

    pub fn suppress_next(&self, kind: EventKind) -> EventListenerHandle {
        self.listeners().add_suppressor(kind)
    }

    pub fn remove(&self, handle: &EventListenerHandle) -> bool {
        self.listeners().remove(handle)
    }

    /// Stream the given kinds until the returned subscription is dropped.
    pub fn listen(&self, kinds: &[EventKind]) -> Subscription {
        let (tx, rx) = futures::channel::mpsc::unbounded();
        let mut listeners = self.listeners();
        let handles = kinds
            .iter()
            .map(|kind| listeners.add_listener(*kind, tx.clone()))
            .collect();

        Subscription {
            context: self.clone(),
            handles,
            events: EventStream::new(rx),
        }
    }
}

/// Streaming listener registration, removed on drop.
pub struct Subscription {
    context: DocumentContext,
    handles: Vec<EventListenerHandle>,
    events: EventStream,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handles", &self.handles)
            .finish()
    }
}

impl Stream for Subscription {
    type Item = Arc<DocumentEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().events).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut listeners = self.context.listeners();
        for handle in &self.handles {
            listeners.remove(handle);
        }
    }
}
