use serde::{Deserialize, Serialize};

use crate::document::NodeId;

/// Lifecycle and script signals the guard cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ReadyStateChange,
    DomContentLoaded,
    SvgLoad,
    Load,
    AfterScriptExecute,
    ScriptLoad,
    ScriptError,
}

impl EventKind {
    /// DOM event type name.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::ReadyStateChange => "readystatechange",
            EventKind::DomContentLoaded => "DOMContentLoaded",
            EventKind::SvgLoad => "SVGLoad",
            EventKind::Load => "load",
            EventKind::AfterScriptExecute => "afterscriptexecute",
            EventKind::ScriptLoad => "load",
            EventKind::ScriptError => "error",
        }
    }

    /// Signals that end a script element's execution one way or the other.
    pub const SCRIPT_DONE: [EventKind; 3] = [
        EventKind::AfterScriptExecute,
        EventKind::ScriptLoad,
        EventKind::ScriptError,
    ];
}

/// An event observed on the document, either browser originated or synthetic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEvent {
    pub kind: EventKind,
    /// Element the event targets, `None` for document/window events.
    pub target: Option<NodeId>,
    /// `Event.isTrusted`
    pub trusted: bool,
}

impl DocumentEvent {
    pub fn natural(kind: EventKind) -> Self {
        Self {
            kind,
            target: None,
            trusted: true,
        }
    }

    pub fn synthetic(kind: EventKind) -> Self {
        Self {
            kind,
            target: None,
            trusted: false,
        }
    }

    pub fn script(kind: EventKind, node: NodeId) -> Self {
        Self {
            kind,
            target: Some(node),
            trusted: true,
        }
    }
}

/// Untrusted events the guard re-emits after a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyntheticEvent {
    ReadyStateChange,
    SvgLoad,
    DomContentLoaded,
    /// Window `load`.
    Load,
}

impl SyntheticEvent {
    pub fn kind(self) -> EventKind {
        match self {
            SyntheticEvent::ReadyStateChange => EventKind::ReadyStateChange,
            SyntheticEvent::SvgLoad => EventKind::SvgLoad,
            SyntheticEvent::DomContentLoaded => EventKind::DomContentLoaded,
            SyntheticEvent::Load => EventKind::Load,
        }
    }

    /// `DOMContentLoaded` is re-fired bubbling and cancelable.
    pub fn bubbles(self) -> bool {
        matches!(self, SyntheticEvent::DomContentLoaded)
    }
}

/// Whether the page gets to observe a dispatched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    /// Swallowed by a one-shot suppressor (`preventDefault` +
    /// `stopImmediatePropagation`).
    Suppressed,
}

impl Dispatch {
    pub fn is_suppressed(self) -> bool {
        self == Dispatch::Suppressed
    }
}
