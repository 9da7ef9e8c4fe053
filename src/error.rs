use futures::channel::oneshot::Canceled;
use thiserror::Error;

pub type Result<T, E = PolicyError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum PolicyError {
    /// The privileged endpoint has not registered its message handler yet.
    #[error("Policy endpoint is not registered yet")]
    EndpointMissing,

    /// The round trip to the policy provider failed.
    #[error("Policy transport failed: {0}")]
    Transport(#[source] anyhow::Error),

    #[error("{0}")]
    Processing(String),

    /// Script interception could not be installed; the document runs unprotected.
    #[error("Could not freeze document: {0}")]
    FreezeInstallation(String),

    #[error("Document reconstruction failed: {0}")]
    Replay(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    /// A completion or capability signal was dropped before firing.
    #[error("Signal sender dropped before firing")]
    Canceled(#[from] Canceled),
}

impl PolicyError {
    pub fn msg(msg: impl Into<String>) -> Self {
        PolicyError::Processing(msg.into())
    }

    /// Whether the failure is the transient "background not ready" case.
    pub fn is_endpoint_missing(&self) -> bool {
        matches!(self, PolicyError::EndpointMissing)
    }
}
