use futures::StreamExt;

use super::ReconciliationEngine;
use crate::context::Subscription;
use crate::document::{NodeId, ReadyState, RootKind, ScrollOffset};
use crate::error::{PolicyError, Result};
use crate::event::{EventKind, SyntheticEvent};
use crate::freezer::SuppressedScript;

/// Only plain HTML can be re-parsed from its own serialization.
const REWRITABLE_CONTENT_TYPE: &str = "text/html";

/// Synchronous part of a soft reload.
#[derive(Debug)]
pub enum SoftReload {
    /// Document re-parsed in place; scroll offset restored.
    Rewritten(ScrollOffset),
    /// Freeze lifted and milestones suppressed; scripts still to replay.
    Replay(ReplayPlan),
}

/// Scripts to re-insert, with the subscription collecting their completion signals.
#[derive(Debug)]
pub struct ReplayPlan {
    root: RootKind,
    scripts: Vec<SuppressedScript>,
    signals: Subscription,
}

impl ReconciliationEngine {
    /// Rewrite the document when that is safe, otherwise prepare a replay.
    pub(crate) fn soft_reload(&self) -> Result<SoftReload> {
        let host = self.context.host();
        tracing::debug!("Soft reload of {}", host.url());

        let content_type = host.content_type();
        if self.directory_listing.is_directory_listing(&**host) {
            tracing::debug!("Can't rewrite directory listings, replaying scripts");
        } else if content_type != REWRITABLE_CONTENT_TYPE {
            tracing::debug!("Can't rewrite {}, replaying scripts", content_type);
        } else {
            match self.rewrite() {
                Ok(scroll) => return Ok(SoftReload::Rewritten(scroll)),
                Err(e) => tracing::debug!("Can't rewrite, XML document? {}", e),
            }
        }

        Ok(SoftReload::Replay(self.prepare_replay()))
    }

    /// Re-parse the whole document from its current markup now that scripts may run.
    fn rewrite(&self) -> Result<ScrollOffset> {
        let host = self.context.host();
        let freezer = self.context.freezer();

        freezer.unfreeze();

        let markup = host.serialize()?;
        let scroll = host.scroll_offset();
        host.rewrite(&markup)?;
        freezer.discard_suppressed();
        tracing::debug!("Rewrote {} bytes, scrolling back to {:?}", markup.len(), scroll);

        // re-parsing resets the viewport
        host.scroll_to(scroll);
        Ok(scroll)
    }

    fn prepare_replay(&self) -> ReplayPlan {
        let context = &self.context;
        let root = context.host().root_kind();

        if let Some(signal) = root.load_signal() {
            context.suppress_next(signal.kind());
        }
        context.suppress_next(EventKind::DomContentLoaded);

        context.freezer().unfreeze();

        ReplayPlan {
            root,
            scripts: context.freezer().take_suppressed(),
            signals: context.listen(&EventKind::SCRIPT_DONE),
        }
    }

    /// Re-insert every suppressed script, one at a time, then re-fire the
    /// milestones the page missed.
    pub(crate) async fn replay(&self, plan: ReplayPlan) -> Result<usize> {
        let host = self.context.host();
        let ReplayPlan {
            root,
            scripts,
            mut signals,
        } = plan;

        for script in &scripts {
            let clone = script.element.clone_detached();
            let node = host
                .replace_script(script.element.node, &clone)
                .map_err(|e| PolicyError::Replay(format!("can't replace {:?}: {e}", script.element.node)))?;
            tracing::debug!("Replaced {:?} with {:?}", script.element.node, node);

            let done = wait_for_completion(&mut signals, node).await?;
            tracing::debug!("Resolving on {} for {:?}", done.name(), node);
        }
        drop(signals);

        tracing::debug!("All scripts done, firing completion events.");
        let mut events = vec![SyntheticEvent::ReadyStateChange];
        events.extend(root.load_signal());
        events.push(SyntheticEvent::DomContentLoaded);
        if host.ready_state() == ReadyState::Complete {
            events.push(SyntheticEvent::Load);
        }
        for event in events {
            host.dispatch_synthetic(event)
                .map_err(|e| PolicyError::Replay(format!("can't fire {}: {e}", event.kind().name())))?;
        }

        Ok(scripts.len())
    }
}

/// Wait until `node` reports it finished executing, loading or failing.
async fn wait_for_completion(signals: &mut Subscription, node: NodeId) -> Result<EventKind> {
    while let Some(event) = signals.next().await {
        if event.target == Some(node) {
            return Ok(event.kind);
        }
    }
    Err(PolicyError::Replay(format!(
        "completion signals closed before {node:?} finished"
    )))
}
