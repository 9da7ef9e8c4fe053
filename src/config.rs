use std::fmt;
use std::sync::Arc;

use crate::document::DocumentHost;
use crate::reconcile::directory::{DirectoryListingPredicate, HostStylesheetListing};

/// Ceiling on policy fetch attempts per page load.
pub const MAX_FETCH_ATTEMPTS: usize = 3;

/// When the document gets frozen ahead of the policy fetch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FreezeMode {
    /// Freeze when the engine parses ahead of the guard and the document can run scripts.
    #[default]
    Auto,
    Always,
    Never,
}

/// Options for a [`SyncPolicyGuard`](crate::SyncPolicyGuard).
#[derive(Clone)]
pub struct GuardConfig {
    /// Policy fetch attempts, between 1 and [`MAX_FETCH_ATTEMPTS`].
    ///
    /// defaults to [`MAX_FETCH_ATTEMPTS`]
    pub(crate) max_attempts: usize,

    /// defaults to [`FreezeMode::Auto`]
    pub(crate) freeze_mode: FreezeMode,

    /// Whether the engine has already parsed part of the document by the time
    /// the guard is injected.
    ///
    /// defaults to true
    pub(crate) parses_ahead: bool,

    /// Heuristic recognising host-generated directory listings.
    ///
    /// defaults to [`HostStylesheetListing`]
    pub(crate) directory_listing: Arc<dyn DirectoryListingPredicate>,
}

impl fmt::Debug for GuardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardConfig")
            .field("max_attempts", &self.max_attempts)
            .field("freeze_mode", &self.freeze_mode)
            .field("parses_ahead", &self.parses_ahead)
            .finish()
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl GuardConfig {
    pub fn builder() -> GuardConfigBuilder {
        GuardConfigBuilder::default()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn directory_listing(&self) -> &Arc<dyn DirectoryListingPredicate> {
        &self.directory_listing
    }

    /// Decide whether `host` must be frozen before the policy arrives.
    ///
    /// Bare media documents cannot run page scripts, except when they are
    /// XML documents (SVG images).
    pub fn must_freeze(&self, host: &dyn DocumentHost) -> bool {
        match self.freeze_mode {
            FreezeMode::Always => true,
            FreezeMode::Never => false,
            FreezeMode::Auto => {
                if !self.parses_ahead {
                    return false;
                }
                !is_media_type(&host.content_type()) || host.root_kind().is_xml()
            }
        }
    }
}

fn is_media_type(content_type: &str) -> bool {
    ["image", "video", "audio"]
        .iter()
        .any(|prefix| content_type.starts_with(prefix))
}

#[derive(Default)]
pub struct GuardConfigBuilder {
    max_attempts: Option<usize>,
    freeze_mode: Option<FreezeMode>,
    parses_ahead: Option<bool>,
    directory_listing: Option<Arc<dyn DirectoryListingPredicate>>,
}

impl GuardConfigBuilder {
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_freeze_mode(mut self, mode: FreezeMode) -> Self {
        self.freeze_mode = Some(mode);
        self
    }

    pub fn with_parses_ahead(mut self, parses_ahead: bool) -> Self {
        self.parses_ahead = Some(parses_ahead);
        self
    }

    pub fn with_directory_listing<T: DirectoryListingPredicate + 'static>(mut self, predicate: T) -> Self {
        self.directory_listing = Some(Arc::new(predicate));
        self
    }

    pub fn build(self) -> GuardConfig {
        GuardConfig {
            max_attempts: self
                .max_attempts
                .unwrap_or(MAX_FETCH_ATTEMPTS)
                .clamp(1, MAX_FETCH_ATTEMPTS),
            freeze_mode: self.freeze_mode.unwrap_or_default(),
            parses_ahead: self.parses_ahead.unwrap_or(true),
            directory_listing: self
                .directory_listing
                .unwrap_or_else(|| Arc::new(HostStylesheetListing)),
        }
    }
}
