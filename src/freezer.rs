//! Reversible script suppression for a single document.
//!
//! While frozen, every script the host is about to execute is turned into a
//! [`SuppressedScript`] record instead; parsing and rendering carry on.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::document::{DocumentHost, ReadyState, RootKind, ScriptElement, ScriptInterceptor, ScriptVerdict};
use crate::error::{PolicyError, Result};
use crate::event::{DocumentEvent, EventKind};

/// Observable freezer state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FreezeState {
    pub suppressed_scripts: usize,
    /// Whether `DOMContentLoaded` has fired.
    pub fired_milestone: bool,
    pub frozen: bool,
}

/// A script intercepted while the document was frozen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressedScript {
    pub element: ScriptElement,
    /// Interception order.
    pub position: usize,
    pub deferred: bool,
}

/// Order in which suppressed scripts are replayed: non-deferred scripts first,
/// then deferred ones, each group keeping interception order.
pub fn replay_order(mut scripts: Vec<SuppressedScript>) -> Vec<SuppressedScript> {
    scripts.sort_by_key(|s| s.position);
    let (mut ordered, deferred): (Vec<_>, Vec<_>) = scripts.into_iter().partition(|s| !s.deferred);
    ordered.extend(deferred);
    ordered
}

#[derive(Debug, Default)]
struct FreezerState {
    state: FreezeState,
    suppressed: Vec<SuppressedScript>,
    unfreezes: usize,
    /// A released document is never frozen again.
    released: bool,
}

struct FreezerInner {
    host: Arc<dyn DocumentHost>,
    state: Mutex<FreezerState>,
}

impl FreezerInner {
    fn lock(&self) -> MutexGuard<'_, FreezerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ScriptInterceptor for FreezerInner {
    fn before_script_execute(&self, script: &ScriptElement) -> ScriptVerdict {
        let mut inner = self.lock();
        if !inner.state.frozen {
            return ScriptVerdict::Allow;
        }

        let position = inner.suppressed.len();
        inner.suppressed.push(SuppressedScript {
            element: script.clone(),
            position,
            deferred: script.is_deferred(),
        });
        inner.state.suppressed_scripts += 1;
        tracing::debug!(
            "Suppressed script {:?} ({} so far)",
            script.node,
            inner.state.suppressed_scripts
        );

        ScriptVerdict::Suppress
    }
}

/// Handle to a document's freezer. Cheap to clone.
#[derive(Clone)]
pub struct DocumentFreezer {
    inner: Arc<FreezerInner>,
}

impl std::fmt::Debug for DocumentFreezer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentFreezer")
            .field("state", &self.state())
            .finish()
    }
}

impl DocumentFreezer {
    pub fn new(host: Arc<dyn DocumentHost>) -> Self {
        Self {
            inner: Arc::new(FreezerInner {
                host,
                state: Mutex::new(FreezerState::default()),
            }),
        }
    }

    /// Start intercepting script execution.
    ///
    /// Fails when interception cannot be put in place: the document is a
    /// bare media resource, has already finished loading, or the host refused
    /// the interceptor, or it was already released once. Freezing an already
    /// frozen document is a no-op.
    pub fn freeze(&self) -> Result<()> {
        {
            let inner = self.inner.lock();
            if inner.state.frozen {
                return Ok(());
            }
            if inner.released {
                return Err(PolicyError::FreezeInstallation("already released".into()));
            }
        }

        let host = &self.inner.host;
        if host.root_kind() == RootKind::Media {
            return Err(PolicyError::FreezeInstallation(format!(
                "unsupported content type {}",
                host.content_type()
            )));
        }
        if host.ready_state() == ReadyState::Complete {
            return Err(PolicyError::FreezeInstallation(
                "document already loaded".into(),
            ));
        }

        // the natural milestone already went by, nothing will report it later
        let parsed = host.ready_state().past_loading();

        // frozen before installing: the host may run a script as soon as the
        // interceptor is in place
        {
            let mut inner = self.inner.lock();
            inner.state.frozen = true;
            inner.state.fired_milestone |= parsed;
        }

        let interceptor: Arc<dyn ScriptInterceptor> = self.inner.clone();
        if let Err(e) = host.install_script_interceptor(interceptor) {
            self.inner.lock().state.frozen = false;
            return Err(match e {
                PolicyError::FreezeInstallation(_) => e,
                other => PolicyError::FreezeInstallation(other.to_string()),
            });
        }

        tracing::debug!("Froze {}", host.url());
        Ok(())
    }

    /// Stop intercepting. Suppressed scripts are not run. Returns whether
    /// this call actually released the freeze.
    pub fn unfreeze(&self) -> bool {
        {
            let mut inner = self.inner.lock();
            if !inner.state.frozen {
                return false;
            }
            inner.state.frozen = false;
            inner.released = true;
            inner.unfreezes += 1;
        }
        // drops the host's reference to us
        self.inner.host.remove_script_interceptor();
        tracing::debug!("Unfroze {}", self.inner.host.url());
        true
    }

    /// Record the natural content-parsed milestone.
    pub(crate) fn observe(&self, event: &DocumentEvent) {
        if event.kind == EventKind::DomContentLoaded && event.trusted {
            self.inner.lock().state.fired_milestone = true;
        }
    }

    pub fn state(&self) -> FreezeState {
        self.inner.lock().state
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.lock().state.frozen
    }

    pub fn suppressed_scripts(&self) -> usize {
        self.inner.lock().state.suppressed_scripts
    }

    pub fn fired_milestone(&self) -> bool {
        self.inner.lock().state.fired_milestone
    }

    /// How many times a freeze was actually released.
    pub fn unfreeze_count(&self) -> usize {
        self.inner.lock().unfreezes
    }

    /// Drain the suppressed scripts in replay order.
    pub fn take_suppressed(&self) -> Vec<SuppressedScript> {
        replay_order(std::mem::take(&mut self.inner.lock().suppressed))
    }

    /// Forget suppressed scripts, e.g. once the document was rewritten.
    pub(crate) fn discard_suppressed(&self) {
        self.inner.lock().suppressed.clear();
    }
}
