//! W3C WebDriver surface.
//!
//! Speaks the WebDriver JSON wire protocol to a chromedriver-compatible
//! endpoint with the blocking `ureq` client. Message observation is done by
//! installing a `MutationObserver` in the page that pushes into
//! `window.__botprobe.queue`; [`WebDriverSurface::drain`] empties it.

use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::WebDriverConfig;
use crate::platform::PlatformId;

use super::{AutomationSurface, ObservationBatch, ObserveSpec, SurfaceError, SurfaceFactory};

/// Key under which WebDriver returns element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecc";

/// WebDriver key code for Enter.
const ENTER: &str = "\u{E007}";

/// Queues each message element once, with its rendered (`innerText`) text
/// trimmed. Elements whose text is still blank are left unseen so a later
/// text mutation can queue them. Re-inserted subtrees are skipped through
/// the `seen` set.
const INSTALL_OBSERVER: &str = r#"
const [containerSel, messageSel] = arguments;
const container = document.querySelector(containerSel);
if (!container) return false;
if (window.__botprobe && window.__botprobe.observer) {
    window.__botprobe.observer.disconnect();
}
const state = { queue: [], errors: [], seq: 0, seen: new WeakSet(), observer: null };
for (const el of container.querySelectorAll(messageSel)) state.seen.add(el);
const consider = (el) => {
    if (!el || state.seen.has(el)) return;
    const text = (el.innerText || "").trim();
    if (!text) return;
    state.seen.add(el);
    state.seq += 1;
    state.queue.push({ seq: state.seq, text, observed_at: new Date().toISOString() });
};
const enclosing = (node) => {
    const el = node.nodeType === Node.ELEMENT_NODE ? node : node.parentElement;
    return el ? el.closest(messageSel) : null;
};
state.observer = new MutationObserver((mutations) => {
    try {
        for (const mutation of mutations) {
            if (mutation.type === "characterData") {
                consider(enclosing(mutation.target));
                continue;
            }
            for (const node of mutation.addedNodes) {
                if (node.nodeType !== Node.ELEMENT_NODE) {
                    consider(enclosing(node));
                    continue;
                }
                consider(node.closest(messageSel));
                node.querySelectorAll(messageSel).forEach(consider);
            }
        }
    } catch (e) {
        state.errors.push(String((e && e.message) || e));
    }
});
state.observer.observe(container, { childList: true, subtree: true, characterData: true });
window.__botprobe = state;
return true;
"#;

const DRAIN_OBSERVER: &str = r#"
const state = window.__botprobe;
if (!state) return null;
return { messages: state.queue.splice(0), errors: state.errors.splice(0) };
"#;

const REMOVE_OBSERVER: &str = r#"
const state = window.__botprobe;
if (state && state.observer) state.observer.disconnect();
window.__botprobe = undefined;
return true;
"#;

/// One browser session driven over WebDriver.
pub struct WebDriverSurface {
    agent: ureq::Agent,
    base: String,
    session_id: String,
    closed: bool,
}

impl WebDriverSurface {
    /// Start a new browser session on the configured endpoint.
    pub fn connect(config: &WebDriverConfig) -> Result<Self, SurfaceError> {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build();
        let base = config.url.trim_end_matches('/').to_string();

        let mut args = vec!["--start-maximized", "--disable-notifications"];
        if config.headless {
            args.push("--headless=new");
        }
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args },
                }
            }
        });

        let value = send(
            agent.post(&format!("{base}/session")),
            Some(capabilities),
            "POST /session",
        )?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| SurfaceError::Malformed("new session without sessionId".into()))?
            .to_string();

        info!(endpoint = %base, session = %session_id, "webdriver session started");
        Ok(Self {
            agent,
            base,
            session_id,
            closed: false,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.base, self.session_id, path)
    }

    fn get(&self, path: &str) -> Result<Value, SurfaceError> {
        send(self.agent.get(&self.endpoint(path)), None, &format!("GET {path}"))
    }

    fn post(&self, path: &str, body: Value) -> Result<Value, SurfaceError> {
        send(
            self.agent.post(&self.endpoint(path)),
            Some(body),
            &format!("POST {path}"),
        )
    }

    fn execute(&self, script: &str, args: Value) -> Result<Value, SurfaceError> {
        self.post("/execute/sync", json!({ "script": script, "args": args }))
    }

    /// Reference of the first element matching `selector`, if any.
    fn find(&self, selector: &str) -> Result<Option<String>, SurfaceError> {
        let value = self.post(
            "/elements",
            json!({ "using": "css selector", "value": selector }),
        )?;
        let elements = value
            .as_array()
            .ok_or_else(|| SurfaceError::Malformed("element list is not an array".into()))?;
        Ok(elements
            .first()
            .and_then(|e| e.get(ELEMENT_KEY))
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn require(&self, selector: &str) -> Result<String, SurfaceError> {
        self.find(selector)?
            .ok_or_else(|| SurfaceError::ElementNotFound {
                selector: selector.to_string(),
            })
    }

    fn send_keys(&self, selector: &str, text: &str) -> Result<(), SurfaceError> {
        let id = self.require(selector)?;
        self.post(&format!("/element/{id}/value"), json!({ "text": text }))?;
        Ok(())
    }
}

impl AutomationSurface for WebDriverSurface {
    fn navigate(&mut self, url: &str) -> Result<(), SurfaceError> {
        debug!(url, "navigate");
        self.post("/url", json!({ "url": url }))?;
        Ok(())
    }

    fn element_exists(&mut self, selector: &str) -> Result<bool, SurfaceError> {
        Ok(self.find(selector)?.is_some())
    }

    fn click(&mut self, selector: &str) -> Result<(), SurfaceError> {
        let id = self.require(selector)?;
        self.post(&format!("/element/{id}/click"), json!({}))?;
        Ok(())
    }

    fn type_text(&mut self, selector: &str, text: &str) -> Result<(), SurfaceError> {
        self.send_keys(selector, text)
    }

    fn submit(&mut self, selector: &str) -> Result<(), SurfaceError> {
        self.send_keys(selector, ENTER)
    }

    fn subscribe(&mut self, spec: &ObserveSpec) -> Result<(), SurfaceError> {
        let installed = self.execute(INSTALL_OBSERVER, json!([spec.container, spec.message]))?;
        if installed.as_bool() != Some(true) {
            return Err(SurfaceError::ElementNotFound {
                selector: spec.container.clone(),
            });
        }
        debug!(container = %spec.container, message = %spec.message, "observer installed");
        Ok(())
    }

    fn drain(&mut self) -> Result<ObservationBatch, SurfaceError> {
        let value = self.execute(DRAIN_OBSERVER, json!([]))?;
        if value.is_null() {
            return Err(SurfaceError::ObservationLost(
                "page-side observer state is gone".into(),
            ));
        }
        parse_batch(value)
    }

    fn unsubscribe(&mut self) -> Result<(), SurfaceError> {
        self.execute(REMOVE_OBSERVER, json!([]))?;
        Ok(())
    }

    fn export_session(&mut self) -> Result<Value, SurfaceError> {
        self.get("/cookie")
    }

    fn import_session(&mut self, state: &Value) -> Result<(), SurfaceError> {
        let cookies = state
            .as_array()
            .ok_or_else(|| SurfaceError::Malformed("session state is not a cookie list".into()))?;
        for cookie in cookies {
            if let Err(e) = self.post("/cookie", json!({ "cookie": cookie })) {
                // Cookies for another domain are rejected; keep the rest.
                warn!(error = %e, "cookie rejected");
            }
        }
        debug!(count = cookies.len(), "cookies imported");
        Ok(())
    }

    fn close(&mut self) -> Result<(), SurfaceError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let url = format!("{}/session/{}", self.base, self.session_id);
        send(self.agent.delete(&url), None, "DELETE /session")?;
        info!(session = %self.session_id, "webdriver session closed");
        Ok(())
    }
}

impl Drop for WebDriverSurface {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close webdriver session");
        }
    }
}

/// Decode a drained queue, trimming texts and dropping blank ones.
fn parse_batch(value: Value) -> Result<ObservationBatch, SurfaceError> {
    let mut batch: ObservationBatch =
        serde_json::from_value(value).map_err(|e| SurfaceError::Malformed(e.to_string()))?;
    batch.messages.retain_mut(|message| {
        let trimmed = message.text.trim();
        if trimmed.len() != message.text.len() {
            message.text = trimmed.to_string();
        }
        !message.text.is_empty()
    });
    Ok(batch)
}

/// Issue a request and unwrap the protocol's `{"value": ...}` envelope.
fn send(request: ureq::Request, body: Option<Value>, command: &str) -> Result<Value, SurfaceError> {
    let result = match body {
        Some(body) => request.send_json(body),
        None => request.call(),
    };
    match result {
        Ok(response) => {
            let envelope: Value = response
                .into_json()
                .map_err(|e| SurfaceError::Malformed(format!("{command}: {e}")))?;
            Ok(unwrap_value(envelope))
        }
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_json::<Value>().unwrap_or(Value::Null);
            Err(SurfaceError::Command {
                command: command.to_string(),
                status,
                message: error_message(&body),
            })
        }
        Err(ureq::Error::Transport(transport)) => {
            Err(SurfaceError::Unreachable(transport.to_string()))
        }
    }
}

fn unwrap_value(envelope: Value) -> Value {
    match envelope {
        Value::Object(mut map) => map.remove("value").unwrap_or(Value::Null),
        other => other,
    }
}

/// `value.message` (or `value.error`) of a WebDriver error body.
fn error_message(body: &Value) -> String {
    body.pointer("/value/message")
        .or_else(|| body.pointer("/value/error"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string()
}

/// Opens a new WebDriver session per platform run.
#[derive(Debug, Clone)]
pub struct WebDriverFactory {
    config: WebDriverConfig,
}

impl WebDriverFactory {
    pub fn new(config: WebDriverConfig) -> Self {
        Self { config }
    }
}

impl SurfaceFactory for WebDriverFactory {
    fn open(&self, platform: PlatformId) -> Result<Box<dyn super::AutomationSurface>, SurfaceError> {
        debug!(%platform, endpoint = %self.config.url, "opening webdriver surface");
        Ok(Box::new(WebDriverSurface::connect(&self.config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_value_extracts_envelope() {
        let envelope = json!({ "value": { "sessionId": "abc" } });
        assert_eq!(unwrap_value(envelope), json!({ "sessionId": "abc" }));
        assert_eq!(unwrap_value(json!({})), Value::Null);
        assert_eq!(unwrap_value(json!([1, 2])), json!([1, 2]));
    }

    #[test]
    fn drained_batch_is_trimmed_and_drops_blank_messages() {
        let value = json!({
            "messages": [
                { "seq": 1, "text": "  \n", "observed_at": "2026-10-16T10:00:00Z" },
                { "seq": 2, "text": "Develope club\n您好\n", "observed_at": "2026-10-16T10:00:01Z" },
                { "seq": 3, "text": "", "observed_at": "2026-10-16T10:00:02Z" }
            ],
            "errors": ["boom"]
        });

        let batch = parse_batch(value).unwrap();

        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.messages[0].seq, 2);
        assert_eq!(batch.messages[0].text, "Develope club\n您好");
        assert_eq!(batch.errors, vec!["boom".to_string()]);
    }

    #[test]
    fn malformed_batch_is_reported() {
        assert!(matches!(
            parse_batch(json!({ "messages": 3 })),
            Err(SurfaceError::Malformed(_))
        ));
    }

    #[test]
    fn observer_reads_rendered_text_once_per_element() {
        // Rendered text keeps the line break between sender and body.
        assert!(INSTALL_OBSERVER.contains("el.innerText"));
        assert!(!INSTALL_OBSERVER.contains("textContent"));
        assert!(INSTALL_OBSERVER.contains("new WeakSet()"));
        assert!(INSTALL_OBSERVER.contains("state.seen.has(el)"));
        assert!(INSTALL_OBSERVER.contains("characterData: true"));
    }

    #[test]
    fn error_message_prefers_message_then_error() {
        let body = json!({ "value": { "error": "no such element", "message": "Unable to locate" } });
        assert_eq!(error_message(&body), "Unable to locate");

        let body = json!({ "value": { "error": "invalid session id" } });
        assert_eq!(error_message(&body), "invalid session id");

        assert_eq!(error_message(&Value::Null), "unknown error");
    }

    #[test]
    fn connect_to_closed_port_is_unreachable() {
        // Bind then drop to get a port nothing listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = WebDriverConfig {
            url: format!("http://127.0.0.1:{port}"),
            headless: true,
            request_timeout_secs: 2,
        };
        match WebDriverSurface::connect(&config) {
            Err(SurfaceError::Unreachable(_)) => {}
            Err(other) => panic!("expected Unreachable, got {other}"),
            Ok(_) => panic!("expected Unreachable, got a session"),
        }
    }

    #[test]
    fn observer_scripts_use_one_page_global() {
        for script in [INSTALL_OBSERVER, DRAIN_OBSERVER, REMOVE_OBSERVER] {
            assert!(script.contains("window.__botprobe"));
        }
    }
}
