//! Human-in-the-loop answers for interactive login.
//!
//! The auth controller never reads stdin itself. It asks an [`OperatorInput`]
//! and treats `None` as "no answer": the terminal operator returns `None` on
//! timeout or when stdin is not interactive, and the unattended operator
//! always does.

use std::io::IsTerminal;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use dialoguer::{Input, Password};
use tracing::{debug, warn};

use crate::platform::PlatformId;

/// What the operator is asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorPrompt {
    pub platform: PlatformId,
    pub message: String,
    /// Do not echo the answer (passwords).
    pub secret: bool,
}

impl OperatorPrompt {
    pub fn new(platform: PlatformId, message: impl Into<String>) -> Self {
        Self {
            platform,
            message: message.into(),
            secret: false,
        }
    }

    pub fn secret(platform: PlatformId, message: impl Into<String>) -> Self {
        Self {
            secret: true,
            ..Self::new(platform, message)
        }
    }
}

/// Source of operator answers for one `establish` call.
pub trait OperatorInput: Send {
    /// Block until the operator answers. `None`: no answer will come.
    fn ask(&mut self, prompt: &OperatorPrompt) -> Option<String>;
}

/// Prompts on the controlling terminal.
#[derive(Debug, Clone, Default)]
pub struct TerminalOperator {
    timeout: Option<Duration>,
}

impl TerminalOperator {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl OperatorInput for TerminalOperator {
    fn ask(&mut self, prompt: &OperatorPrompt) -> Option<String> {
        if !std::io::stdin().is_terminal() {
            warn!(platform = %prompt.platform, "operator input required but stdin is not interactive");
            return None;
        }

        let text = format!("[botprobe] {}: {}", prompt.platform, prompt.message);
        let secret = prompt.secret;
        let (tx, rx) = mpsc::channel();

        // The read runs on its own thread so a timeout can abandon it.
        thread::spawn(move || {
            let answer = if secret {
                Password::new().with_prompt(text).interact()
            } else {
                Input::<String>::new()
                    .with_prompt(text)
                    .allow_empty(true)
                    .interact_text()
            };
            let _ = tx.send(answer);
        });

        let answer = match self.timeout {
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(answer) => answer,
                Err(_) => {
                    warn!(platform = %prompt.platform, ?timeout, "operator did not answer in time");
                    return None;
                }
            },
            None => rx.recv().ok()?,
        };

        match answer {
            Ok(answer) => Some(answer.trim().to_string()),
            Err(e) => {
                warn!(platform = %prompt.platform, error = %e, "operator prompt failed");
                None
            }
        }
    }
}

/// Never answers. Used where nobody is watching (server, fan-out).
#[derive(Debug, Clone, Copy, Default)]
pub struct Unattended;

impl OperatorInput for Unattended {
    fn ask(&mut self, prompt: &OperatorPrompt) -> Option<String> {
        debug!(platform = %prompt.platform, message = %prompt.message, "unattended: no operator");
        None
    }
}

/// Answers from a fixed list, recording every prompt.
#[cfg(any(test, feature = "scenario-test"))]
#[derive(Debug, Clone, Default)]
pub struct ScriptedOperator {
    answers: std::collections::VecDeque<Option<String>>,
    pub prompts: Vec<OperatorPrompt>,
}

#[cfg(any(test, feature = "scenario-test"))]
impl ScriptedOperator {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(|a| Some(a.into())).collect(),
            prompts: Vec::new(),
        }
    }

    /// Queue a "no answer".
    pub fn then_silence(mut self) -> Self {
        self.answers.push_back(None);
        self
    }
}

#[cfg(any(test, feature = "scenario-test"))]
impl OperatorInput for ScriptedOperator {
    fn ask(&mut self, prompt: &OperatorPrompt) -> Option<String> {
        self.prompts.push(prompt.clone());
        self.answers.pop_front().flatten()
    }
}
