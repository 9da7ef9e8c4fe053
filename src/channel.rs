//! Synchronous request/response plumbing towards the privileged policy provider.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PolicyError, Result};

/// Message id the policy provider answers to.
pub const FETCH_POLICY: &str = "fetchPolicy";

/// Wire shape of a policy request: `{"id": "fetchPolicy", "url": .., "contextUrl": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRequest {
    pub id: String,
    pub url: String,
    pub context_url: String,
}

impl PolicyRequest {
    /// A top level document is its own context.
    pub fn fetch_policy(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: FETCH_POLICY.into(),
            context_url: url.clone(),
            url,
        }
    }
}

/// Opaque policy object, consumed by the capability evaluator.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Policy(pub Value);

impl From<Value> for Policy {
    fn from(value: Value) -> Self {
        Policy(value)
    }
}

/// Blocking round trip to the policy provider.
///
/// Implementations must not yield to the page: the whole point is that the
/// document's parser and script pipeline stay suspended until this returns.
pub trait PolicyChannel: Send + Sync {
    /// Fails with [`PolicyError::EndpointMissing`] while the provider has not
    /// registered yet, any other error is a transport or processing fault.
    fn fetch(&self, request: &PolicyRequest) -> Result<Policy>;
}

impl<T: PolicyChannel + ?Sized> PolicyChannel for Arc<T> {
    fn fetch(&self, request: &PolicyRequest) -> Result<Policy> {
        (**self).fetch(request)
    }
}

type Handler = Arc<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;

/// In-process synchronous messenger between a document context and the
/// privileged side, which registers one handler per message id.
#[derive(Clone, Default)]
pub struct RuntimeMessenger {
    endpoints: Arc<RwLock<HashMap<String, Handler>>>,
}

impl fmt::Debug for RuntimeMessenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endpoints = self.endpoints.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("RuntimeMessenger")
            .field("endpoints", &endpoints.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RuntimeMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler answering messages with `id`.
    pub fn register<F>(&self, id: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), Arc::new(handler));
    }

    pub fn unregister(&self, id: &str) -> bool {
        self.endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Send a message and block until its handler answers.
    pub fn send_sync<T: Serialize>(&self, message: &T) -> Result<Value> {
        let message = serde_json::to_value(message)?;
        let id = message
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| PolicyError::msg("message has no string id"))?;

        // the lock is released before the handler runs
        let handler = self
            .endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or(PolicyError::EndpointMissing)?;

        handler(message).map_err(PolicyError::Transport)
    }
}

impl PolicyChannel for RuntimeMessenger {
    fn fetch(&self, request: &PolicyRequest) -> Result<Policy> {
        let response = self.send_sync(request)?;
        Ok(serde_json::from_value(response)?)
    }
}
