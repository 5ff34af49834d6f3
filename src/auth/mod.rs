//! Session establishment.
//!
//! [`AuthController::establish`] turns a fresh surface into a logged-in one,
//! either by restoring a saved session or by driving an interactive login:
//!
//! ```text
//! Restore ──load ok──▶ home_url → import → reload ──fresh──▶ Restored
//!    │                                        │
//!    └──SessionNotFound──┐                 stale
//!                        ▼                    │
//! Login ──────────▶ login_url → LoginFlow ◀───┘ ──ok──▶ save → LoggedIn
//! ```
//!
//! The restore path never consults the operator. Interactive login retries
//! selector checks within the auth budget and then fails; it never loops.

pub mod operator;

use std::thread;

use tracing::{debug, info, warn};

use crate::error::ProbeError;
use crate::log::{RunEvent, RunLog};
use crate::platform::{AuthChallenge, LoginFlow, PlatformAdapter, PlatformId};
use crate::session::{Session, SessionStore};
use crate::surface::{AutomationSurface, SurfaceError};
use crate::wait::{RetryBudget, poll_until};

pub use operator::{OperatorInput, OperatorPrompt, TerminalOperator, Unattended};

#[cfg(any(test, feature = "scenario-test"))]
pub use operator::ScriptedOperator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Use the saved session if there is one.
    Restore,
    /// Always log in interactively.
    Login,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    Restored,
    LoggedIn,
}

/// An established surface, ready for probing.
pub struct LiveSession<'s> {
    pub platform: PlatformId,
    pub surface: &'s mut dyn AutomationSurface,
    pub origin: SessionOrigin,
}

pub struct AuthController<'a> {
    adapter: &'a PlatformAdapter,
    store: &'a SessionStore,
    log: &'a RunLog,
    budget: RetryBudget,
}

impl<'a> AuthController<'a> {
    pub fn new(
        adapter: &'a PlatformAdapter,
        store: &'a SessionStore,
        log: &'a RunLog,
        budget: RetryBudget,
    ) -> Self {
        Self {
            adapter,
            store,
            log,
            budget,
        }
    }

    fn platform(&self) -> PlatformId {
        self.adapter.id
    }

    pub fn establish<'s>(
        &self,
        surface: &'s mut dyn AutomationSurface,
        mode: AuthMode,
        operator: &mut dyn OperatorInput,
    ) -> Result<LiveSession<'s>, ProbeError> {
        let platform = self.platform();

        if mode == AuthMode::Restore {
            match self.restore(surface) {
                Ok(true) => {
                    self.log.record(platform, &RunEvent::SessionRestored)?;
                    return Ok(LiveSession {
                        platform,
                        surface,
                        origin: SessionOrigin::Restored,
                    });
                }
                Ok(false) => warn!(%platform, "saved session is stale, logging in again"),
                Err(e) if e.is_recoverable_by_login() => {
                    info!(%platform, "no saved session, logging in")
                }
                Err(e) => return Err(e),
            }
        }

        if let Err(e) = self.login(surface, operator) {
            if let Err(log_err) = self.log.record(
                platform,
                &RunEvent::AuthFailed {
                    reason: e.to_string(),
                },
            ) {
                warn!(%platform, error = %log_err, "failed to record login failure");
            }
            return Err(e);
        }

        let state = surface.export_session()?;
        self.store.save(&Session::new(platform, state))?;
        self.log.record(platform, &RunEvent::LoggedIn)?;
        info!(%platform, "logged in, session saved");

        Ok(LiveSession {
            platform,
            surface,
            origin: SessionOrigin::LoggedIn,
        })
    }

    /// Apply the saved session. `Ok(false)`: it was applied but is stale.
    fn restore(&self, surface: &mut dyn AutomationSurface) -> Result<bool, ProbeError> {
        let session = self.store.load(self.platform())?;
        let home = &self.adapter.home_url;

        // Cookies can only be set on their own origin.
        surface.navigate(home)?;
        surface.import_session(&session.state)?;
        surface.navigate(home)?;

        if let Some(indicator) = &self.adapter.logged_out_indicator {
            if surface.element_exists(indicator)? {
                return Ok(false);
            }
        }
        debug!(platform = %self.platform(), saved_at = %session.saved_at, "session restored");
        Ok(true)
    }

    fn login(
        &self,
        surface: &mut dyn AutomationSurface,
        operator: &mut dyn OperatorInput,
    ) -> Result<(), ProbeError> {
        surface.navigate(&self.adapter.login_url)?;
        match &self.adapter.login {
            LoginFlow::Manual { confirm_word } => self.manual_login(operator, confirm_word),
            LoginFlow::Credentials {
                username_field,
                password_field,
                submit,
            } => self.credentials_login(surface, operator, username_field, password_field, submit),
        }
    }

    fn manual_login(
        &self,
        operator: &mut dyn OperatorInput,
        confirm_word: &str,
    ) -> Result<(), ProbeError> {
        let platform = self.platform();
        let prompt = OperatorPrompt::new(
            platform,
            format!("log in in the browser window, then type '{confirm_word}'"),
        );
        match operator.ask(&prompt) {
            None => Err(ProbeError::AuthChallengeUnanswered {
                platform,
                challenge: "login confirmation",
            }),
            Some(answer) if answer.trim().eq_ignore_ascii_case(confirm_word) => Ok(()),
            Some(_) => Err(ProbeError::AuthFailure {
                platform,
                reason: "login not confirmed".to_string(),
            }),
        }
    }

    fn credentials_login(
        &self,
        surface: &mut dyn AutomationSurface,
        operator: &mut dyn OperatorInput,
        username_field: &str,
        password_field: &str,
        submit: &str,
    ) -> Result<(), ProbeError> {
        let platform = self.platform();

        let form = poll_until(self.budget, || surface.element_exists(username_field))?;
        if !form.is_ready() {
            info!(%platform, "no login form, already logged in");
            return Ok(());
        }

        let creds = &self.adapter.credentials;
        let username = match &creds.username {
            Some(username) => username.clone(),
            None => operator
                .ask(&OperatorPrompt::new(platform, "username"))
                .ok_or(ProbeError::AuthChallengeUnanswered {
                    platform,
                    challenge: "username",
                })?,
        };
        let password = match &creds.password {
            Some(password) => password.clone(),
            None => operator
                .ask(&OperatorPrompt::secret(platform, "password"))
                .ok_or(ProbeError::AuthChallengeUnanswered {
                    platform,
                    challenge: "password",
                })?,
        };

        surface.type_text(username_field, &username)?;
        surface.type_text(password_field, &password)?;
        surface.click(submit)?;
        debug!(%platform, "credentials submitted");

        let attempts = self.budget.attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(rejected) = &self.adapter.rejected_indicator {
                if surface.element_exists(rejected)? {
                    return Err(ProbeError::AuthFailure {
                        platform,
                        reason: "credentials rejected".to_string(),
                    });
                }
            }

            if let Some(challenge) = self.pending_challenge(surface)? {
                self.answer_challenge(surface, operator, challenge)?;
            } else if self.logged_in(surface, username_field)? {
                return Ok(());
            }

            if attempt < attempts {
                thread::sleep(self.budget.interval);
            }
        }

        Err(ProbeError::UnknownAuthFailure { platform, attempts })
    }

    fn pending_challenge(
        &self,
        surface: &mut dyn AutomationSurface,
    ) -> Result<Option<&'a AuthChallenge>, SurfaceError> {
        for challenge in &self.adapter.challenges {
            if let Some(field) = challenge.field() {
                if surface.element_exists(field)? {
                    return Ok(Some(challenge));
                }
            }
        }
        Ok(None)
    }

    fn answer_challenge(
        &self,
        surface: &mut dyn AutomationSurface,
        operator: &mut dyn OperatorInput,
        challenge: &AuthChallenge,
    ) -> Result<(), ProbeError> {
        let platform = self.platform();
        let Some(field) = challenge.field() else {
            return Ok(());
        };
        info!(%platform, challenge = challenge.label(), "step-up challenge");

        let configured = match challenge {
            AuthChallenge::NumericPin { .. } => self.adapter.credentials.pin.clone(),
            _ => None,
        };
        let answer = match configured {
            Some(answer) => answer,
            None => operator
                .ask(&OperatorPrompt::new(
                    platform,
                    format!("enter the {}", challenge.label()),
                ))
                .ok_or(ProbeError::AuthChallengeUnanswered {
                    platform,
                    challenge: challenge.label(),
                })?,
        };

        surface.type_text(field, &answer)?;
        match challenge.submit() {
            Some(submit) => surface.click(submit)?,
            None => surface.submit(field)?,
        }
        Ok(())
    }

    fn logged_in(
        &self,
        surface: &mut dyn AutomationSurface,
        username_field: &str,
    ) -> Result<bool, SurfaceError> {
        match &self.adapter.success_indicator {
            Some(indicator) => surface.element_exists(indicator),
            None => Ok(!surface.element_exists(username_field)?),
        }
    }
}

/// Type the configured PIN into the adapter's unlock widget, if it shows.
///
/// Returns whether a PIN was typed. Without a configured PIN this does
/// nothing; the send precondition then waits for a human to clear it.
pub fn unlock_conversation(
    surface: &mut dyn AutomationSurface,
    adapter: &PlatformAdapter,
) -> Result<bool, SurfaceError> {
    let AuthChallenge::NumericPin { field, submit } = &adapter.unlock else {
        return Ok(false);
    };
    let Some(pin) = &adapter.credentials.pin else {
        debug!(platform = %adapter.id, "no PIN configured");
        return Ok(false);
    };
    if !surface.element_exists(field)? {
        return Ok(false);
    }
    surface.type_text(field, pin)?;
    if let Some(submit) = submit {
        surface.click(submit)?;
    }
    info!(platform = %adapter.id, "PIN entered");
    Ok(true)
}
