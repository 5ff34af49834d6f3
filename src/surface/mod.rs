//! Automation surface abstraction.
//!
//! An [`AutomationSurface`] is one live UI session: a browser tab the probe
//! engine can navigate, click and type into, and whose message stream it can
//! observe. The auth controller and the engine only ever talk to this trait.
//!
//! Inbound messages are not pushed to the engine. The surface keeps a queue
//! on its side (filled by a page-side observer for [`webdriver`]) and the
//! engine drains it once per poll tick.

#[cfg(any(test, feature = "scenario-test"))]
pub mod scripted;
pub mod webdriver;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::PlatformId;

#[derive(Debug, Error)]
pub enum SurfaceError {
    /// The automation endpoint could not be reached at all.
    #[error("automation endpoint unreachable: {0}")]
    Unreachable(String),

    /// The endpoint answered a command with an error status.
    #[error("{command} failed ({status}): {message}")]
    Command {
        command: String,
        status: u16,
        message: String,
    },

    #[error("no element matches `{selector}`")]
    ElementNotFound { selector: String },

    /// The page-side observation point disappeared (navigation, reload).
    #[error("observation lost: {0}")]
    ObservationLost(String),

    /// The endpoint answered with something we could not interpret.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Where to watch for new messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserveSpec {
    /// Element whose subtree is observed.
    pub container: String,
    /// Selector of one message element.
    pub message: String,
}

/// One message observed by the surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Strictly increasing per subscription.
    pub seq: u64,
    pub text: String,
    pub observed_at: DateTime<Utc>,
}

/// Result of one drain of the inbound queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationBatch {
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
    /// Page-side observer errors since the previous drain.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ObservationBatch {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.errors.is_empty()
    }
}

/// A live UI session.
pub trait AutomationSurface: Send {
    fn navigate(&mut self, url: &str) -> Result<(), SurfaceError>;

    fn element_exists(&mut self, selector: &str) -> Result<bool, SurfaceError>;

    fn click(&mut self, selector: &str) -> Result<(), SurfaceError>;

    /// Type `text` into the first element matching `selector`.
    fn type_text(&mut self, selector: &str, text: &str) -> Result<(), SurfaceError>;

    /// Press Enter in the first element matching `selector`.
    fn submit(&mut self, selector: &str) -> Result<(), SurfaceError>;

    /// Start queueing messages that appear under `spec.container`.
    fn subscribe(&mut self, spec: &ObserveSpec) -> Result<(), SurfaceError>;

    /// Take everything queued since the previous drain.
    fn drain(&mut self) -> Result<ObservationBatch, SurfaceError>;

    fn unsubscribe(&mut self) -> Result<(), SurfaceError>;

    /// Opaque credential state (the cookie jar) for the current origin.
    fn export_session(&mut self) -> Result<serde_json::Value, SurfaceError>;

    fn import_session(&mut self, state: &serde_json::Value) -> Result<(), SurfaceError>;

    fn close(&mut self) -> Result<(), SurfaceError>;
}

/// Opens one fresh surface per platform run.
pub trait SurfaceFactory: Send + Sync {
    fn open(&self, platform: PlatformId) -> Result<Box<dyn AutomationSurface>, SurfaceError>;
}
