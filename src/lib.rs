//! Synchronous policy acquisition for documents loaded without an HTTP
//! response (`file:`, `ftp:` and friends), where no header can carry the
//! content policy.
//!
//! The [`SyncPolicyGuard`] freezes script execution, fetches the policy over a
//! blocking [`PolicyChannel`], applies it and announces the resulting
//! [`Capabilities`]. The [`ReconciliationEngine`] then brings the document
//! back: it lifts the freeze, rewrites the document in place, or replays the
//! suppressed scripts in order.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use syncpolicy::*;
//! # async fn demo(host: Arc<dyn DocumentHost>, messenger: RuntimeMessenger) -> Result<()> {
//! let context = DocumentContext::new(host);
//! let evaluator = |policy: &Policy| -> Result<bool> {
//!     Ok(policy.0["permissions"]["script"].as_bool().unwrap_or(false))
//! };
//! let guard = SyncPolicyGuard::new(
//!     context,
//!     Arc::new(messenger),
//!     Arc::new(evaluator),
//!     GuardConfig::default(),
//! );
//! let outcome = guard.run()?.reconciled().await?;
//! # Ok(())
//! # }
//! ```

pub use self::channel::{Policy, PolicyChannel, PolicyRequest, RuntimeMessenger, FETCH_POLICY};
pub use self::config::{FreezeMode, GuardConfig, GuardConfigBuilder, MAX_FETCH_ATTEMPTS};
pub use self::context::{DocumentContext, Subscription, WeakDocumentContext};
pub use self::document::{
    Attribute, DocumentHost, NodeId, ReadyState, RootKind, ScriptElement, ScriptInterceptor,
    ScriptVerdict, ScrollOffset,
};
pub use self::error::{PolicyError, Result};
pub use self::event::{Dispatch, DocumentEvent, EventKind, SyntheticEvent};
pub use self::freezer::{replay_order, DocumentFreezer, FreezeState, SuppressedScript};
pub use self::gate::{Capabilities, CapabilityEvaluator, CapabilityGate};
pub use self::guard::{GuardRun, SyncPolicyGuard};
pub use self::reconcile::directory::{
    canonical_directory_url, scan_directory_listing, DirectoryListingPredicate,
    HostStylesheetListing,
};
pub use self::reconcile::{Normalization, ReconcileOutcome, ReconciliationEngine};
pub use self::retry::{FetchedPolicy, RetryController};

pub mod channel;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod event;
pub mod freezer;
pub mod gate;
mod guard;
pub mod listeners;
pub mod reconcile;
mod retry;
