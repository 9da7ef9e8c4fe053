//! The document host seam.
//!
//! Everything the protocol needs from the browser (script interception,
//! serialization, rewriting, synthetic events, navigation) goes through
//! [`DocumentHost`]. A CDP page, an embedded engine or an in-memory fake can
//! all drive the same freeze/reconcile machinery.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;
use crate::event::SyntheticEvent;

/// Document readiness as exposed by `document.readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

impl ReadyState {
    /// Whether the document has advanced past the initial parse.
    pub fn past_loading(self) -> bool {
        self != ReadyState::Loading
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReadyState::Loading => "loading",
            ReadyState::Interactive => "interactive",
            ReadyState::Complete => "complete",
        })
    }
}

/// The kind of root element the document was parsed into.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RootKind {
    #[default]
    Html,
    /// `<svg>` root, HTML or XML parsed.
    Svg,
    /// Any other XML document.
    Xml,
    /// Synthetic wrapper around a bare image/video/audio resource.
    Media,
}

impl RootKind {
    /// The root-specific load signal that must be re-fired after a replay.
    pub fn load_signal(self) -> Option<SyntheticEvent> {
        match self {
            RootKind::Svg => Some(SyntheticEvent::SvgLoad),
            _ => None,
        }
    }

    pub fn is_xml(self) -> bool {
        matches!(self, RootKind::Svg | RootKind::Xml)
    }
}

/// Identity of a node inside the host document.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        NodeId(id)
    }
}

/// A single namespaced attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub namespace: Option<String>,
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A `<script>` element as seen at interception time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptElement {
    pub node: NodeId,
    /// Element namespace (XHTML or SVG).
    pub namespace: Option<String>,
    pub attributes: Vec<Attribute>,
    /// Inline source.
    pub text: String,
}

impl ScriptElement {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.value.as_str())
    }

    /// `defer` only applies to external scripts; inline text ignores it.
    pub fn is_deferred(&self) -> bool {
        self.attribute("defer").is_some() && self.text.is_empty()
    }

    /// A detached copy with identical attributes and inline content.
    pub fn clone_detached(&self) -> Self {
        Self {
            node: NodeId::default(),
            namespace: self.namespace.clone(),
            attributes: self.attributes.clone(),
            text: self.text.clone(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ScrollOffset {
    pub x: f64,
    pub y: f64,
}

impl ScrollOffset {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// What an interceptor wants done with a script about to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptVerdict {
    Allow,
    Suppress,
}

/// Hook the host consults before executing any script element.
pub trait ScriptInterceptor: Send + Sync {
    fn before_script_execute(&self, script: &ScriptElement) -> ScriptVerdict;
}

/// The browser-side document a guard operates on.
pub trait DocumentHost: Send + Sync {
    /// `document.URL`
    fn url(&self) -> String;

    /// `document.baseURI`
    fn base_uri(&self) -> String;

    fn content_type(&self) -> String;

    fn root_kind(&self) -> RootKind;

    fn ready_state(&self) -> ReadyState;

    /// Start routing every script execution through `interceptor`.
    fn install_script_interceptor(&self, interceptor: Arc<dyn ScriptInterceptor>) -> Result<()>;

    fn remove_script_interceptor(&self);

    /// Outer markup of the root element.
    fn serialize(&self) -> Result<String>;

    fn scroll_offset(&self) -> ScrollOffset;

    fn scroll_to(&self, offset: ScrollOffset);

    /// Open a fresh document stream, write `markup` and close it.
    fn rewrite(&self, markup: &str) -> Result<()>;

    /// Replace `original` in place with `clone`, returning the clone's node.
    fn replace_script(&self, original: NodeId, clone: &ScriptElement) -> Result<NodeId>;

    /// Fire an untrusted event into the page.
    fn dispatch_synthetic(&self, event: SyntheticEvent) -> Result<()>;

    /// `location.replace(url)`
    fn navigate_replace(&self, url: &Url) -> Result<()>;
}
