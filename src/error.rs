//! Error taxonomy for a probe run.
//!
//! Auth and send failures are terminal for the current run only; the caller
//! decides whether to run again. A reply that matches no pattern is *not* an
//! error; it is an unmatched [`crate::monitor::Outcome`].

use thiserror::Error;

use crate::platform::PlatformId;
use crate::surface::SurfaceError;

#[derive(Debug, Error)]
pub enum ProbeError {
    /// No usable persisted session. Recoverable by interactive login.
    #[error("no saved session for {platform}; run `botprobe run {platform} login` first")]
    SessionNotFound { platform: PlatformId },

    /// A step-up prompt needed an operator answer that never arrived.
    #[error("{platform}: {challenge} required an operator answer that never arrived")]
    AuthChallengeUnanswered {
        platform: PlatformId,
        challenge: &'static str,
    },

    /// Login was rejected or could not be completed.
    #[error("{platform}: login failed: {reason}")]
    AuthFailure { platform: PlatformId, reason: String },

    /// Neither a success indicator nor a known challenge appeared in time.
    #[error(
        "{platform}: unknown auth failure: no success indicator or known challenge after {attempts} checks"
    )]
    UnknownAuthFailure { platform: PlatformId, attempts: u32 },

    /// A UI precondition (e.g. a PIN widget) never cleared before sending.
    #[error("{platform}: send precondition did not clear after {attempts} checks")]
    SendTimeout { platform: PlatformId, attempts: u32 },

    /// The inbound event source became unusable mid-run.
    #[error("{platform}: observation fault: {detail}")]
    ObservationFault { platform: PlatformId, detail: String },

    /// The run was stopped between poll ticks.
    #[error("{platform}: run cancelled")]
    Cancelled { platform: PlatformId },

    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ProbeError {
    /// Whether this failure can be recovered from by logging in interactively.
    pub fn is_recoverable_by_login(&self) -> bool {
        matches!(self, ProbeError::SessionNotFound { .. })
    }

    /// Whether the automation endpoint itself could not be reached.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ProbeError::Surface(SurfaceError::Unreachable(_)))
    }
}
