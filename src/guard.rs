use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::channel::{Policy, PolicyChannel, PolicyRequest};
use crate::config::GuardConfig;
use crate::context::DocumentContext;
use crate::error::{PolicyError, Result};
use crate::gate::{Capabilities, CapabilityEvaluator};
use crate::reconcile::{ReconcileOutcome, ReconciliationEngine};
use crate::retry::RetryController;

/// Result of a successful [`SyncPolicyGuard::run`].
#[derive(Debug)]
pub struct GuardRun {
    pub policy: Policy,
    pub capabilities: Capabilities,
    /// Policy channel round trips it took.
    pub attempts: usize,
    /// Set when the document could not be frozen and ran unprotected.
    pub freeze_error: Option<PolicyError>,
    /// The reconciliation task, when the document was frozen.
    pub reconciliation: Option<JoinHandle<Result<ReconcileOutcome>>>,
}

impl GuardRun {
    /// Wait for the document to be reconciled, if it was frozen at all.
    pub async fn reconciled(self) -> Result<Option<ReconcileOutcome>> {
        match self.reconciliation {
            Some(handle) => match handle.await {
                Ok(outcome) => outcome.map(Some),
                Err(e) => Err(PolicyError::Replay(format!("reconciliation task failed: {e}"))),
            },
            None => Ok(None),
        }
    }
}

/// Obtains a document's policy before any of its scripts can run.
///
/// For documents that arrive without an HTTP response there is no header to
/// carry the policy, so the guard freezes the document, fetches the policy
/// synchronously, applies it and lets the reconciliation engine restore the
/// document according to the resulting capabilities.
pub struct SyncPolicyGuard {
    context: DocumentContext,
    channel: Arc<dyn PolicyChannel>,
    evaluator: Arc<dyn CapabilityEvaluator>,
    config: GuardConfig,
}

impl std::fmt::Debug for SyncPolicyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPolicyGuard")
            .field("context", &self.context)
            .field("config", &self.config)
            .finish()
    }
}

impl SyncPolicyGuard {
    pub fn new(
        context: DocumentContext,
        channel: Arc<dyn PolicyChannel>,
        evaluator: Arc<dyn CapabilityEvaluator>,
        config: GuardConfig,
    ) -> Self {
        Self {
            context,
            channel,
            evaluator,
            config,
        }
    }

    pub fn context(&self) -> &DocumentContext {
        &self.context
    }

    /// Freeze, fetch, apply and announce. Must be called from within a Tokio
    /// runtime, which drives the reconciliation task.
    ///
    /// A fetch or policy application failure lifts the freeze before it is
    /// returned: the page then loads unprotected rather than broken. A
    /// context runs the guard once, later calls fail.
    pub fn run(&self) -> Result<GuardRun> {
        let host = self.context.host();
        let url = host.url();
        if self.context.gate().fired().is_some() {
            return Err(PolicyError::msg(format!(
                "policy of {url} was already applied"
            )));
        }
        tracing::debug!(
            "No CSP yet for non-HTTP document load: fetching policy synchronously for {} (readyState {})",
            url,
            host.ready_state()
        );

        let mut freeze_error = None;
        let mut reconciliation = None;

        if self.config.must_freeze(&**host) {
            match self.context.freezer().freeze() {
                Ok(()) => {
                    let engine = ReconciliationEngine::new(self.context.clone(), &self.config);
                    reconciliation = Some(engine.spawn());
                }
                Err(e) => {
                    tracing::error!("{} runs without script suppression: {}", url, e);
                    freeze_error = Some(e);
                }
            }
        }

        let retry = RetryController::new(self.config.max_attempts());
        let request = PolicyRequest::fetch_policy(url);

        let applied = retry
            .fetch(&*self.channel, &request, &**host)
            .and_then(|fetched| {
                let can_script = self.evaluator.setup(&fetched.policy)?;
                Ok((fetched, can_script))
            });

        let (fetched, can_script) = match applied {
            Ok(applied) => applied,
            Err(e) => {
                if let Some(handle) = reconciliation.take() {
                    handle.abort();
                }
                if self.context.freezer().unfreeze() {
                    tracing::error!("Released {} without a policy: {}", request.url, e);
                }
                return Err(e);
            }
        };

        let capabilities = Capabilities {
            can_script,
            suppressed_scripts: self.context.freezer().suppressed_scripts(),
        };
        self.context.gate().fire(capabilities);

        Ok(GuardRun {
            policy: fetched.policy,
            capabilities,
            attempts: fetched.attempts,
            freeze_error,
            reconciliation,
        })
    }
}
