//! Platform adapter layer.
//!
//! Each messaging platform (Messenger, Instagram Direct, Line) is described by
//! a [`PlatformAdapter`]: plain data that tells the auth controller how to log
//! in and tells the probe engine:
//! - where the conversation lives
//! - which selectors locate the composer and the message stream
//! - how to recognise our own echoed messages
//! - which replies count as a pass
//!
//! The engine never branches on the platform; adding one means adding data.

pub mod instagram;
pub mod line;
pub mod messenger;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::PlatformSettings;
use crate::pattern::{MatchMode, PatternTable};

/// Identifier of a supported platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformId {
    Fb,
    Ig,
    Line,
}

impl PlatformId {
    /// Every platform, in fan-out order.
    pub const ALL: [PlatformId; 3] = [PlatformId::Fb, PlatformId::Ig, PlatformId::Line];

    pub fn as_str(self) -> &'static str {
        match self {
            PlatformId::Fb => "fb",
            PlatformId::Ig => "ig",
            PlatformId::Line => "line",
        }
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid platform, need fb, ig or line")]
pub struct UnknownPlatform(pub String);

impl FromStr for PlatformId {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fb" | "facebook" | "messenger" => Ok(PlatformId::Fb),
            "ig" | "instagram" => Ok(PlatformId::Ig),
            "line" => Ok(PlatformId::Line),
            _ => Err(UnknownPlatform(s.to_string())),
        }
    }
}

/// How an interactive login is driven.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoginFlow {
    /// The operator logs in by hand in the visible browser, then types
    /// `confirm_word` at the terminal.
    Manual { confirm_word: String },
    /// Username/password form, optionally followed by step-up challenges.
    Credentials {
        username_field: String,
        password_field: String,
        submit: String,
    },
}

/// A step-up prompt that can appear mid-login or on opening a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthChallenge {
    None,
    /// One-time code sent out of band (2FA).
    VerificationCode {
        field: String,
        submit: Option<String>,
    },
    /// Fixed numeric PIN, e.g. an end-to-end encryption unlock widget.
    NumericPin {
        field: String,
        submit: Option<String>,
    },
}

impl AuthChallenge {
    /// Human-readable label used in prompts and errors.
    pub fn label(&self) -> &'static str {
        match self {
            AuthChallenge::None => "no challenge",
            AuthChallenge::VerificationCode { .. } => "verification code",
            AuthChallenge::NumericPin { .. } => "numeric PIN",
        }
    }

    /// Selector of the input the answer is typed into.
    pub fn field(&self) -> Option<&str> {
        match self {
            AuthChallenge::None => None,
            AuthChallenge::VerificationCode { field, .. }
            | AuthChallenge::NumericPin { field, .. } => Some(field),
        }
    }

    pub fn submit(&self) -> Option<&str> {
        match self {
            AuthChallenge::None => None,
            AuthChallenge::VerificationCode { submit, .. }
            | AuthChallenge::NumericPin { submit, .. } => submit.as_deref(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, AuthChallenge::None)
    }
}

/// Selectors the probe engine needs inside a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selectors {
    /// The message input box.
    pub composer: String,
    /// Element whose subtree is observed for new messages.
    pub container: String,
    /// Matches one rendered message inside the container.
    pub message: String,
    /// While present, sending is not possible (e.g. a pending PIN widget).
    pub blocking: Option<String>,
}

/// Credentials pulled from config. Never serialized.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub pin: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &mask(&self.password))
            .field("pin", &mask(&self.pin))
            .finish()
    }
}

/// Everything platform-specific the auth controller and probe engine need.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformAdapter {
    pub id: PlatformId,
    /// Origin the session cookies belong to.
    pub home_url: String,
    pub login_url: String,
    pub conversation_url: String,
    pub login: LoginFlow,
    /// Present once a login has gone through.
    pub success_indicator: Option<String>,
    /// Present when the platform rejected the credentials.
    pub rejected_indicator: Option<String>,
    /// Present when a restored session turned out to be stale.
    pub logged_out_indicator: Option<String>,
    /// Step-up prompts that may follow a credentials submit.
    pub challenges: Vec<AuthChallenge>,
    /// Prompt shown on opening the conversation, answered from config.
    pub unlock: AuthChallenge,
    pub selectors: Selectors,
    /// Prefix the UI puts on our own outbound messages.
    pub echo_marker: Option<String>,
    pub probe_input: String,
    pub match_mode: MatchMode,
    pub patterns: PatternTable,
    #[serde(skip)]
    pub credentials: Credentials,
}

impl PlatformAdapter {
    /// Overlay per-platform settings from config onto the built-in data.
    pub fn apply(&mut self, settings: &PlatformSettings) {
        if let Some(url) = &settings.conversation_url {
            self.conversation_url = url.clone();
        }
        if let Some(input) = &settings.probe_input {
            self.probe_input = input.clone();
        }
        if let Some(marker) = &settings.echo_marker {
            self.echo_marker = (!marker.is_empty()).then(|| marker.clone());
        }
        if let Some(mode) = settings.match_mode {
            self.match_mode = mode;
        }

        let selectors = &settings.selectors;
        if let Some(s) = &selectors.composer {
            self.selectors.composer = s.clone();
        }
        if let Some(s) = &selectors.container {
            self.selectors.container = s.clone();
        }
        if let Some(s) = &selectors.message {
            self.selectors.message = s.clone();
        }
        if let Some(s) = &selectors.blocking {
            self.selectors.blocking = (!s.is_empty()).then(|| s.clone());
        }

        self.patterns.merge(&settings.patterns);

        if settings.username.is_some() {
            self.credentials.username = settings.username.clone();
        }
        if settings.password.is_some() {
            self.credentials.password = settings.password.clone();
        }
        if settings.pin.is_some() {
            self.credentials.pin = settings.pin.clone();
        }
    }
}

/// Built-in adapter for a platform, without config overrides.
pub fn builtin(id: PlatformId) -> PlatformAdapter {
    match id {
        PlatformId::Fb => messenger::adapter(),
        PlatformId::Ig => instagram::adapter(),
        PlatformId::Line => line::adapter(),
    }
}

/// Built-in adapter with the matching `[platforms.<id>]` section applied.
pub fn adapter_for(id: PlatformId, settings: Option<&PlatformSettings>) -> PlatformAdapter {
    let mut adapter = builtin(id);
    if let Some(settings) = settings {
        adapter.apply(settings);
    }
    adapter
}
