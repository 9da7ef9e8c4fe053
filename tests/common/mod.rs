//! In-memory document host driving the guard in integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use serde_json::json;
use syncpolicy::*;
use tokio::task::JoinHandle;
use url::Url;

/// Every host operation the guard performed, in order. Completion signals
/// delivered by the pump are logged too.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    Install,
    Remove,
    Serialize,
    ScrollTo(ScrollOffset),
    Rewrite(String),
    Replace { original: NodeId, clone: NodeId },
    Completed(NodeId),
    Synthetic(SyntheticEvent),
    Navigate(String),
}

#[derive(Default)]
struct FakeState {
    ready: Option<ReadyState>,
    interceptor: Option<Arc<dyn ScriptInterceptor>>,
    markup: String,
    scroll: ScrollOffset,
    scripts: Vec<ScriptElement>,
    next_node: u64,
    executed: Vec<String>,
    log: Vec<HostCall>,
}

pub struct FakeDocument {
    url: String,
    base_uri: String,
    content_type: String,
    root: RootKind,
    pub install_error: Option<String>,
    pub fail_rewrite: bool,
    pub fail_replace: bool,
    state: Mutex<FakeState>,
    signals: UnboundedSender<DocumentEvent>,
}

impl FakeDocument {
    pub fn new(
        url: &str,
        content_type: &str,
        root: RootKind,
    ) -> (Self, UnboundedReceiver<DocumentEvent>) {
        let (signals, rx) = unbounded();
        let doc = Self {
            url: url.into(),
            base_uri: url.into(),
            content_type: content_type.into(),
            root,
            install_error: None,
            fail_rewrite: false,
            fail_replace: false,
            state: Mutex::new(FakeState {
                ready: Some(ReadyState::Loading),
                markup: "<html><head></head><body><p>hello</p></body></html>".into(),
                next_node: 100,
                ..Default::default()
            }),
            signals,
        };
        (doc, rx)
    }

    pub fn html(url: &str) -> (Self, UnboundedReceiver<DocumentEvent>) {
        Self::new(url, "text/html", RootKind::Html)
    }

    pub fn svg(url: &str) -> (Self, UnboundedReceiver<DocumentEvent>) {
        Self::new(url, "image/svg+xml", RootKind::Svg)
    }

    pub fn with_base_uri(mut self, base_uri: &str) -> Self {
        self.base_uri = base_uri.into();
        self
    }

    pub fn with_markup(self, markup: &str) -> Self {
        self.state.lock().unwrap().markup = markup.into();
        self
    }

    pub fn set_ready_state(&self, ready: ReadyState) {
        self.state.lock().unwrap().ready = Some(ready);
    }

    pub fn set_scroll(&self, x: f64, y: f64) {
        self.state.lock().unwrap().scroll = ScrollOffset::new(x, y);
    }

    /// The parser reaching a `<script>`: returns its node and whether it ran.
    pub fn parse_script(&self, attrs: &[(&str, &str)], text: &str) -> (NodeId, bool) {
        let (script, interceptor) = {
            let mut state = self.state.lock().unwrap();
            state.next_node += 1;
            let script = ScriptElement {
                node: NodeId(state.next_node),
                namespace: None,
                attributes: attrs.iter().map(|(k, v)| Attribute::new(*k, *v)).collect(),
                text: text.into(),
            };
            state.scripts.push(script.clone());
            (script, state.interceptor.clone())
        };

        let verdict = interceptor
            .map(|i| i.before_script_execute(&script))
            .unwrap_or(ScriptVerdict::Allow);

        let ran = verdict == ScriptVerdict::Allow;
        if ran {
            self.state.lock().unwrap().executed.push(label(&script));
        }
        (script.node, ran)
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn log(&self) -> Vec<HostCall> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn count(&self, call: &HostCall) -> usize {
        self.log().iter().filter(|c| *c == call).count()
    }

    pub fn position(&self, call: &HostCall) -> Option<usize> {
        self.log().iter().position(|c| c == call)
    }

    pub fn replaced(&self) -> Vec<(NodeId, NodeId)> {
        self.log()
            .into_iter()
            .filter_map(|c| match c {
                HostCall::Replace { original, clone } => Some((original, clone)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: HostCall) {
        self.state.lock().unwrap().log.push(call);
    }
}

fn label(script: &ScriptElement) -> String {
    script
        .attribute("src")
        .map(str::to_string)
        .unwrap_or_else(|| script.text.clone())
}

impl DocumentHost for FakeDocument {
    fn url(&self) -> String {
        self.url.clone()
    }

    fn base_uri(&self) -> String {
        self.base_uri.clone()
    }

    fn content_type(&self) -> String {
        self.content_type.clone()
    }

    fn root_kind(&self) -> RootKind {
        self.root
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().unwrap().ready.unwrap_or(ReadyState::Loading)
    }

    fn install_script_interceptor(&self, interceptor: Arc<dyn ScriptInterceptor>) -> Result<()> {
        if let Some(reason) = &self.install_error {
            return Err(PolicyError::FreezeInstallation(reason.clone()));
        }
        let mut state = self.state.lock().unwrap();
        state.interceptor = Some(interceptor);
        state.log.push(HostCall::Install);
        Ok(())
    }

    fn remove_script_interceptor(&self) {
        let mut state = self.state.lock().unwrap();
        state.interceptor = None;
        state.log.push(HostCall::Remove);
    }

    fn serialize(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.log.push(HostCall::Serialize);
        Ok(state.markup.clone())
    }

    fn scroll_offset(&self) -> ScrollOffset {
        self.state.lock().unwrap().scroll
    }

    fn scroll_to(&self, offset: ScrollOffset) {
        let mut state = self.state.lock().unwrap();
        state.scroll = offset;
        state.log.push(HostCall::ScrollTo(offset));
    }

    fn rewrite(&self, markup: &str) -> Result<()> {
        if self.fail_rewrite {
            return Err(PolicyError::msg("document.write() is not available"));
        }
        let mut state = self.state.lock().unwrap();
        state.log.push(HostCall::Rewrite(markup.into()));
        // a fresh parse with scripting enabled runs every script and resets the viewport
        let labels: Vec<String> = state.scripts.iter().map(label).collect();
        state.executed.extend(labels);
        state.scroll = ScrollOffset::default();
        Ok(())
    }

    fn replace_script(&self, original: NodeId, clone: &ScriptElement) -> Result<NodeId> {
        if self.fail_replace {
            return Err(PolicyError::msg("replaceWith threw"));
        }
        let (node, kind) = {
            let mut state = self.state.lock().unwrap();
            let index = state
                .scripts
                .iter()
                .position(|s| s.node == original)
                .ok_or_else(|| PolicyError::msg("no such script"))?;
            state.next_node += 1;
            let node = NodeId(state.next_node);
            let mut inserted = clone.clone();
            inserted.node = node;
            let kind = if inserted.attribute("src").is_some() {
                EventKind::ScriptLoad
            } else {
                EventKind::AfterScriptExecute
            };
            state.executed.push(label(&inserted));
            state.scripts[index] = inserted;
            state.log.push(HostCall::Replace {
                original,
                clone: node,
            });
            (node, kind)
        };
        // completion reaches the context on a later turn, through the pump
        let _ = self.signals.unbounded_send(DocumentEvent::script(kind, node));
        Ok(node)
    }

    fn dispatch_synthetic(&self, event: SyntheticEvent) -> Result<()> {
        self.record(HostCall::Synthetic(event));
        Ok(())
    }

    fn navigate_replace(&self, url: &Url) -> Result<()> {
        self.record(HostCall::Navigate(url.to_string()));
        Ok(())
    }
}

/// A document wired to its context, with a task pumping host signals into it.
pub struct Harness {
    pub doc: Arc<FakeDocument>,
    pub context: DocumentContext,
    pump: JoinHandle<()>,
}

impl Harness {
    pub fn new((doc, mut signals): (FakeDocument, UnboundedReceiver<DocumentEvent>)) -> Self {
        let doc = Arc::new(doc);
        let context = DocumentContext::new(doc.clone());

        let pump_context = context.clone();
        let pump_doc = doc.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = signals.next().await {
                if let Some(node) = event.target {
                    pump_doc.record(HostCall::Completed(node));
                }
                pump_context.dispatch(event);
            }
        });

        Self { doc, context, pump }
    }

    /// Move readiness forward, firing the natural signals on the way.
    /// Returns what happened to `DOMContentLoaded` when it was fired.
    pub fn advance(&self, ready: ReadyState) -> Option<Dispatch> {
        self.doc.set_ready_state(ready);
        self.context
            .dispatch(DocumentEvent::natural(EventKind::ReadyStateChange));
        match ready {
            ReadyState::Interactive => Some(
                self.context
                    .dispatch(DocumentEvent::natural(EventKind::DomContentLoaded)),
            ),
            ReadyState::Complete => {
                self.context.dispatch(DocumentEvent::natural(EventKind::Load));
                None
            }
            ReadyState::Loading => None,
        }
    }

    pub fn guard(&self, channel: Arc<dyn PolicyChannel>, can_script: bool) -> SyncPolicyGuard {
        self.guard_with(channel, can_script, GuardConfig::default())
    }

    pub fn guard_with(
        &self,
        channel: Arc<dyn PolicyChannel>,
        can_script: bool,
        config: GuardConfig,
    ) -> SyncPolicyGuard {
        let evaluator = move |_: &Policy| -> Result<bool> { Ok(can_script) };
        SyncPolicyGuard::new(self.context.clone(), channel, Arc::new(evaluator), config)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// A messenger whose policy provider is already registered.
pub fn ready_messenger() -> Arc<RuntimeMessenger> {
    let messenger = RuntimeMessenger::new();
    messenger.register(FETCH_POLICY, |msg| {
        Ok(json!({ "url": msg["url"], "permissions": { "capabilities": ["script"] } }))
    });
    Arc::new(messenger)
}

/// Fails with `EndpointMissing` a fixed number of times, then answers.
pub struct FlakyChannel {
    pub calls: AtomicUsize,
    missing: usize,
    error: Option<fn() -> PolicyError>,
}

impl FlakyChannel {
    pub fn missing(times: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            missing: times,
            error: None,
        }
    }

    pub fn failing(error: fn() -> PolicyError) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            missing: 0,
            error: Some(error),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PolicyChannel for FlakyChannel {
    fn fetch(&self, request: &PolicyRequest) -> Result<Policy> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = self.error {
            return Err(error());
        }
        if call <= self.missing {
            return Err(PolicyError::EndpointMissing);
        }
        Ok(Policy(json!({ "url": request.url, "attempt": call })))
    }
}
