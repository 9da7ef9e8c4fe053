//! Bringing a frozen document back once its capabilities are known.
//!
//! | capabilities                                   | action                          |
//! |------------------------------------------------|---------------------------------|
//! | scripting denied                               | unfreeze next tick, normalize   |
//! | scripting allowed, nothing suppressed, loading | unfreeze                        |
//! | scripting allowed otherwise                    | soft reload (rewrite or replay) |

use std::sync::Arc;

use futures::channel::oneshot;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::GuardConfig;
use crate::context::DocumentContext;
use crate::document::{ReadyState, ScrollOffset};
use crate::error::{PolicyError, Result};
use crate::event::EventKind;
use crate::gate::Capabilities;

pub mod directory;
mod soft_reload;

use self::directory::{canonical_directory_url, DirectoryListingPredicate};
use self::soft_reload::SoftReload;

/// What happened to the directory address of a denied document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalization {
    /// Already canonical, or not a directory.
    Unchanged,
    /// Replaced with its canonical address.
    Navigated(Url),
    /// Checked again when the content-parsed milestone fires.
    Deferred,
}

/// Which branch the engine took.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Denied { normalization: Normalization },
    /// Nothing was suppressed, the freeze was simply lifted.
    Released,
    /// The document was re-parsed from its own serialization.
    Rewritten { scroll: ScrollOffset },
    /// Suppressed scripts were re-inserted one by one.
    Replayed { scripts: usize },
}

/// Consumes the capability announcement and restores the document.
#[derive(Clone)]
pub struct ReconciliationEngine {
    context: DocumentContext,
    directory_listing: Arc<dyn DirectoryListingPredicate>,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("context", &self.context)
            .finish()
    }
}

impl ReconciliationEngine {
    pub fn new(context: DocumentContext, config: &GuardConfig) -> Self {
        Self {
            context,
            directory_listing: Arc::clone(config.directory_listing()),
        }
    }

    /// Subscribe to the capability gate and reconcile once it fires.
    pub fn spawn(self) -> JoinHandle<Result<ReconcileOutcome>> {
        let announcement = self.context.gate().subscribe();
        tokio::spawn(async move {
            let caps = announcement.await?;
            self.reconcile(caps).await
        })
    }

    pub async fn reconcile(&self, caps: Capabilities) -> Result<ReconcileOutcome> {
        let host = self.context.host();
        let freezer = self.context.freezer();
        let ready_state = host.ready_state();
        let state = freezer.state();

        tracing::debug!(
            "Readystate: {}, suppressedScripts = {}, canScript = {}",
            ready_state,
            state.suppressed_scripts,
            caps.can_script
        );

        if !caps.can_script {
            let normalization = self.normalize_directory(state.fired_milestone);
            // lifting interception in the turn that granted capabilities re-enters it
            tokio::task::yield_now().await;
            freezer.unfreeze();
            return Ok(ReconcileOutcome::Denied { normalization });
        }

        if state.suppressed_scripts == 0 && ready_state == ReadyState::Loading {
            freezer.unfreeze();
            return Ok(ReconcileOutcome::Released);
        }

        let result = if state.fired_milestone {
            match self.soft_reload() {
                Ok(reload) => self.finish(reload).await,
                Err(e) => Err(e),
            }
        } else {
            tracing::debug!("Deferring soft reload to DOMContentLoaded...");
            let (tx, rx) = oneshot::channel();
            let mut tx = Some(tx);
            let context = self.context.downgrade();
            let directory_listing = Arc::clone(&self.directory_listing);
            // runs inside the natural dispatch so the replay suppressor catches it
            self.context
                .add_hook(EventKind::DomContentLoaded, true, move |_| {
                    let (Some(tx), Some(context)) = (tx.take(), context.upgrade()) else {
                        return;
                    };
                    let engine = ReconciliationEngine {
                        context,
                        directory_listing: Arc::clone(&directory_listing),
                    };
                    let _ = tx.send(engine.soft_reload());
                });
            match rx.await {
                Ok(Ok(reload)) => self.finish(reload).await,
                Ok(Err(e)) => Err(e),
                Err(canceled) => Err(canceled.into()),
            }
        };

        if freezer.unfreeze() {
            tracing::debug!("Released freeze of {} after an aborted soft reload", host.url());
        }
        if let Err(e) = &result {
            tracing::error!("Soft reload of {} failed: {}", host.url(), e);
        }
        result
    }

    async fn finish(&self, reload: SoftReload) -> Result<ReconcileOutcome> {
        match reload {
            SoftReload::Rewritten(scroll) => Ok(ReconcileOutcome::Rewritten { scroll }),
            SoftReload::Replay(plan) => {
                let scripts = self.replay(plan).await?;
                Ok(ReconcileOutcome::Replayed { scripts })
            }
        }
    }

    /// Move a slash-less directory address to its canonical form so the
    /// policy of the directory itself applies.
    fn normalize_directory(&self, fired_milestone: bool) -> Normalization {
        if fired_milestone {
            return match navigate_to_canonical(&self.context) {
                Ok(Some(url)) => Normalization::Navigated(url),
                Ok(None) => Normalization::Unchanged,
                Err(e) => {
                    tracing::error!("Directory normalization failed: {}", e);
                    Normalization::Unchanged
                }
            };
        }

        let context = self.context.downgrade();
        self.context
            .add_hook(EventKind::ReadyStateChange, true, move |_| {
                let Some(context) = context.upgrade() else {
                    return;
                };
                if let Err(e) = navigate_to_canonical(&context) {
                    tracing::error!("Directory normalization failed: {}", e);
                }
            });
        Normalization::Deferred
    }
}

fn navigate_to_canonical(context: &DocumentContext) -> Result<Option<Url>> {
    let host = context.host();
    let Some(url) = canonical_directory_url(&host.url(), &host.base_uri())? else {
        return Ok(None);
    };
    tracing::debug!("Normalizing directory address to {}", url);
    host.navigate_replace(&url)
        .map_err(|e| PolicyError::msg(format!("can't navigate to {url}: {e}")))?;
    Ok(Some(url))
}
