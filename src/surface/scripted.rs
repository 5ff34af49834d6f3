//! Deterministic in-memory surface for tests.
//!
//! A [`ScriptedSurface`] holds a set of "present" selectors, reactions to
//! clicks and sends, and a queue of inbound messages. Every call is recorded
//! so tests can assert on what the engine did. The surface shares its state
//! with a [`ScriptHandle`], which stays usable after the surface itself has
//! been boxed and handed to the code under test.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde_json::Value;

use crate::platform::PlatformId;

use super::{
    AutomationSurface, InboundMessage, ObservationBatch, ObserveSpec, SurfaceError,
    SurfaceFactory,
};

/// One recorded surface call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Navigate(String),
    Click(String),
    Type { selector: String, text: String },
    Submit(String),
    Subscribe,
    Unsubscribe,
    Import,
    Export,
    Close,
}

/// What the next drain returns besides the auto replies.
#[derive(Debug, Clone)]
enum DrainStep {
    Messages(Vec<String>),
    Errors(Vec<String>),
    Fail(String),
}

#[derive(Debug, Default)]
struct ScriptState {
    /// Selector → remaining existence checks before it vanishes (`None`: forever).
    present: HashMap<String, Option<u32>>,
    on_click: HashMap<String, (Vec<String>, Vec<String>)>,
    replies: HashMap<String, Vec<String>>,
    echo_marker: Option<String>,
    steps: VecDeque<DrainStep>,
    inbox: Vec<String>,
    typed: HashMap<String, String>,
    sent: Vec<String>,
    actions: Vec<Action>,
    cookies: Value,
    imported: Option<Value>,
    subscribed: bool,
    subscribe_fails: bool,
    seq: u64,
}

impl ScriptState {
    fn show(&mut self, selector: &str) {
        self.present.insert(selector.to_string(), None);
    }

    fn hide(&mut self, selector: &str) {
        self.present.remove(selector);
    }
}

/// Shared view of a scripted surface's state.
#[derive(Debug, Clone, Default)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptHandle {
    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        // A panicking test thread must not hide the state from the assertions.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Messages submitted through the composer, in order.
    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.lock().actions.clone()
    }

    /// Whether any recorded action equals `action`.
    pub fn did(&self, action: &Action) -> bool {
        self.lock().actions.iter().any(|a| a == action)
    }

    pub fn imported(&self) -> Option<Value> {
        self.lock().imported.clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.lock().subscribed
    }

    pub fn is_closed(&self) -> bool {
        self.did(&Action::Close)
    }

    /// Queue messages for the next drain.
    pub fn push_messages(&self, texts: &[&str]) {
        self.lock()
            .steps
            .push_back(DrainStep::Messages(texts.iter().map(|s| s.to_string()).collect()));
    }
}

/// In-memory [`AutomationSurface`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedSurface {
    handle: ScriptHandle,
}

impl ScriptedSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> ScriptHandle {
        self.handle.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.handle.lock()
    }

    /// Selector exists from the start.
    pub fn with_element(self, selector: &str) -> Self {
        self.lock().show(selector);
        self
    }

    /// Selector exists for `checks` existence checks, then disappears.
    pub fn with_element_for(self, selector: &str, checks: u32) -> Self {
        self.lock().present.insert(selector.to_string(), Some(checks));
        self
    }

    /// Clicking `selector` shows and hides the given selectors.
    pub fn on_click(self, selector: &str, show: &[&str], hide: &[&str]) -> Self {
        self.lock().on_click.insert(
            selector.to_string(),
            (
                show.iter().map(|s| s.to_string()).collect(),
                hide.iter().map(|s| s.to_string()).collect(),
            ),
        );
        self
    }

    /// Every send is echoed back as `marker + text` before any reply.
    pub fn with_echo(self, marker: &str) -> Self {
        self.lock().echo_marker = Some(marker.to_string());
        self
    }

    /// Sending `input` makes the bot answer with `replies`.
    pub fn reply_to(self, input: &str, replies: &[&str]) -> Self {
        self.lock().replies.insert(
            input.to_string(),
            replies.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Queue messages for the next drain, independent of sends.
    pub fn then_messages(self, texts: &[&str]) -> Self {
        self.handle.push_messages(texts);
        self
    }

    /// The next drain reports page-side observer errors.
    pub fn then_observer_errors(self, errors: &[&str]) -> Self {
        self.lock()
            .steps
            .push_back(DrainStep::Errors(errors.iter().map(|s| s.to_string()).collect()));
        self
    }

    /// The next drain fails as if the page navigated away.
    pub fn then_lost(self, detail: &str) -> Self {
        self.lock()
            .steps
            .push_back(DrainStep::Fail(detail.to_string()));
        self
    }

    /// `export_session` returns these cookies.
    pub fn with_cookies(self, cookies: Value) -> Self {
        self.lock().cookies = cookies;
        self
    }

    pub fn failing_subscribe(self) -> Self {
        self.lock().subscribe_fails = true;
        self
    }
}

impl AutomationSurface for ScriptedSurface {
    fn navigate(&mut self, url: &str) -> Result<(), SurfaceError> {
        self.lock().actions.push(Action::Navigate(url.to_string()));
        Ok(())
    }

    fn element_exists(&mut self, selector: &str) -> Result<bool, SurfaceError> {
        let mut state = self.lock();
        match state.present.get(selector).copied() {
            None => Ok(false),
            Some(None) => Ok(true),
            Some(Some(0)) => {
                state.hide(selector);
                Ok(false)
            }
            Some(Some(n)) => {
                state.present.insert(selector.to_string(), Some(n - 1));
                Ok(true)
            }
        }
    }

    fn click(&mut self, selector: &str) -> Result<(), SurfaceError> {
        let mut state = self.lock();
        if !state.present.contains_key(selector) {
            return Err(SurfaceError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        state.actions.push(Action::Click(selector.to_string()));
        if let Some((show, hide)) = state.on_click.get(selector).cloned() {
            for s in &hide {
                state.hide(s);
            }
            for s in &show {
                state.show(s);
            }
        }
        Ok(())
    }

    fn type_text(&mut self, selector: &str, text: &str) -> Result<(), SurfaceError> {
        let mut state = self.lock();
        if !state.present.contains_key(selector) {
            return Err(SurfaceError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        state.actions.push(Action::Type {
            selector: selector.to_string(),
            text: text.to_string(),
        });
        state
            .typed
            .entry(selector.to_string())
            .or_default()
            .push_str(text);
        Ok(())
    }

    fn submit(&mut self, selector: &str) -> Result<(), SurfaceError> {
        let mut state = self.lock();
        if !state.present.contains_key(selector) {
            return Err(SurfaceError::ElementNotFound {
                selector: selector.to_string(),
            });
        }
        state.actions.push(Action::Submit(selector.to_string()));
        let text = state.typed.remove(selector).unwrap_or_default();
        if text.is_empty() {
            return Ok(());
        }
        if let Some(marker) = state.echo_marker.clone() {
            state.inbox.push(format!("{marker}{text}"));
        }
        if let Some(replies) = state.replies.get(&text).cloned() {
            state.inbox.extend(replies);
        }
        state.sent.push(text);
        Ok(())
    }

    fn subscribe(&mut self, spec: &ObserveSpec) -> Result<(), SurfaceError> {
        let mut state = self.lock();
        if state.subscribe_fails {
            return Err(SurfaceError::ElementNotFound {
                selector: spec.container.clone(),
            });
        }
        state.actions.push(Action::Subscribe);
        state.subscribed = true;
        Ok(())
    }

    fn drain(&mut self) -> Result<ObservationBatch, SurfaceError> {
        let mut state = self.lock();
        let mut texts = Vec::new();
        let mut errors = Vec::new();
        match state.steps.pop_front() {
            Some(DrainStep::Fail(detail)) => return Err(SurfaceError::ObservationLost(detail)),
            Some(DrainStep::Messages(m)) => texts = m,
            Some(DrainStep::Errors(e)) => errors = e,
            None => {}
        }
        texts.append(&mut state.inbox);

        let mut messages = Vec::with_capacity(texts.len());
        for text in texts {
            state.seq += 1;
            messages.push(InboundMessage {
                seq: state.seq,
                text,
                observed_at: Utc::now(),
            });
        }
        Ok(ObservationBatch { messages, errors })
    }

    fn unsubscribe(&mut self) -> Result<(), SurfaceError> {
        let mut state = self.lock();
        state.actions.push(Action::Unsubscribe);
        state.subscribed = false;
        Ok(())
    }

    fn export_session(&mut self) -> Result<Value, SurfaceError> {
        let mut state = self.lock();
        state.actions.push(Action::Export);
        Ok(state.cookies.clone())
    }

    fn import_session(&mut self, cookies: &Value) -> Result<(), SurfaceError> {
        let mut state = self.lock();
        state.actions.push(Action::Import);
        state.imported = Some(cookies.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<(), SurfaceError> {
        self.lock().actions.push(Action::Close);
        Ok(())
    }
}

/// Hands out one prepared [`ScriptedSurface`] per platform.
///
/// A platform without a prepared surface fails to open as unreachable.
#[derive(Debug, Default)]
pub struct ScriptedFactory {
    surfaces: Mutex<HashMap<PlatformId, ScriptedSurface>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, platform: PlatformId, surface: ScriptedSurface) -> Self {
        self.surfaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(platform, surface);
        self
    }
}

impl SurfaceFactory for ScriptedFactory {
    fn open(&self, platform: PlatformId) -> Result<Box<dyn AutomationSurface>, SurfaceError> {
        let surface = self
            .surfaces
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&platform)
            .ok_or_else(|| SurfaceError::Unreachable(format!("no scripted surface for {platform}")))?;
        Ok(Box::new(surface))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPOSER: &str = "div[role=\"textbox\"]";

    fn send(surface: &mut ScriptedSurface, text: &str) {
        surface.type_text(COMPOSER, text).unwrap();
        surface.submit(COMPOSER).unwrap();
    }

    #[test]
    fn sends_trigger_echo_then_replies() {
        let mut surface = ScriptedSurface::new()
            .with_element(COMPOSER)
            .with_echo("You sent\n")
            .reply_to("介紹", &["Develope club\n您好"]);
        let handle = surface.handle();

        send(&mut surface, "介紹");
        let batch = surface.drain().unwrap();
        let texts: Vec<_> = batch.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["You sent\n介紹", "Develope club\n您好"]);
        assert_eq!(handle.sent(), vec!["介紹"]);
        assert!(surface.drain().unwrap().is_empty());
    }

    #[test]
    fn seq_is_strictly_increasing_across_drains() {
        let mut surface = ScriptedSurface::new()
            .then_messages(&["a", "b"])
            .then_messages(&["c"]);
        let first = surface.drain().unwrap();
        let second = surface.drain().unwrap();
        let seqs: Vec<u64> = first
            .messages
            .iter()
            .chain(second.messages.iter())
            .map(|m| m.seq)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn element_vanishes_after_budget() {
        let mut surface = ScriptedSurface::new().with_element_for("#pin", 2);
        assert!(surface.element_exists("#pin").unwrap());
        assert!(surface.element_exists("#pin").unwrap());
        assert!(!surface.element_exists("#pin").unwrap());
        assert!(!surface.element_exists("#pin").unwrap());
    }

    #[test]
    fn click_reactions_change_presence() {
        let mut surface = ScriptedSurface::new()
            .with_element("#login")
            .with_element("#user")
            .on_click("#login", &["#code"], &["#user"]);
        surface.click("#login").unwrap();
        assert!(surface.element_exists("#code").unwrap());
        assert!(!surface.element_exists("#user").unwrap());
    }

    #[test]
    fn missing_element_errors() {
        let mut surface = ScriptedSurface::new();
        assert!(matches!(
            surface.click("#nope"),
            Err(SurfaceError::ElementNotFound { .. })
        ));
    }

    #[test]
    fn lost_step_fails_drain() {
        let mut surface = ScriptedSurface::new().then_lost("navigated away");
        assert!(matches!(
            surface.drain(),
            Err(SurfaceError::ObservationLost(_))
        ));
    }

    #[test]
    fn factory_hands_out_each_surface_once() {
        let factory = ScriptedFactory::new().with(PlatformId::Fb, ScriptedSurface::new());
        assert!(factory.open(PlatformId::Fb).is_ok());
        assert!(matches!(
            factory.open(PlatformId::Fb),
            Err(SurfaceError::Unreachable(_))
        ));
        assert!(factory.open(PlatformId::Ig).is_err());
    }
}
