use std::sync::{Mutex, PoisonError};

use futures::channel::oneshot;
use serde::{Deserialize, Serialize};

use crate::channel::Policy;
use crate::error::Result;

/// What the document context may do once its policy has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub can_script: bool,
    /// Scripts suppressed by the freezer when the decision was announced.
    pub suppressed_scripts: usize,
}

/// Applies a fetched policy to the document context and reports whether
/// scripting is permitted.
pub trait CapabilityEvaluator: Send + Sync {
    fn setup(&self, policy: &Policy) -> Result<bool>;
}

impl<F> CapabilityEvaluator for F
where
    F: Fn(&Policy) -> Result<bool> + Send + Sync,
{
    fn setup(&self, policy: &Policy) -> Result<bool> {
        self(policy)
    }
}

#[derive(Debug, Default)]
struct GateState {
    fired: Option<Capabilities>,
    subscribers: Vec<oneshot::Sender<Capabilities>>,
}

/// One-shot announcement of a document's capabilities.
#[derive(Debug, Default)]
pub struct CapabilityGate {
    state: Mutex<GateState>,
}

impl CapabilityGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the announcement. Late subscribers get the recorded value.
    pub fn subscribe(&self) -> oneshot::Receiver<Capabilities> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.fired {
            Some(caps) => {
                let _ = tx.send(caps);
            }
            None => state.subscribers.push(tx),
        }
        rx
    }

    /// Announce `caps` to every subscriber. Only the first call has an
    /// effect; returns false for any later one.
    pub fn fire(&self, caps: Capabilities) -> bool {
        let subscribers = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = state.fired {
                tracing::warn!(
                    "Capabilities already announced ({:?}), ignoring {:?}",
                    previous,
                    caps
                );
                return false;
            }
            state.fired = Some(caps);
            std::mem::take(&mut state.subscribers)
        };

        tracing::debug!("Announcing {:?} to {} subscriber(s)", caps, subscribers.len());
        for tx in subscribers {
            // dropped subscribers are gone for good
            let _ = tx.send(caps);
        }
        true
    }

    pub fn fired(&self) -> Option<Capabilities> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).fired
    }
}
