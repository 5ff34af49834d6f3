//! Probe engine.
//!
//! Sends the probe message, then drains the surface's inbound queue once per
//! poll tick and classifies each reply until the completion threshold is hit.
//!
//! ## State machine
//!
//! ```text
//! ARMED       → open conversation, unlock, subscribe, send probe
//! MONITORING  → drain, classify, maybe send follow-up, sleep
//! TERMINATED  → threshold reached → unsubscribe, return result
//! ERRORED     → send/observation failure or stop flag → unsubscribe, raise
//! ```
//!
//! Classification state lives in [`ProbeRun`], which does no I/O and can be
//! driven directly in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::auth::{LiveSession, unlock_conversation};
use crate::config::MonitorConfig;
use crate::error::ProbeError;
use crate::log::{RunEvent, RunLog};
use crate::pattern::{Classification, is_echo};
use crate::platform::{PlatformAdapter, PlatformId};
use crate::surface::{AutomationSurface, InboundMessage, ObserveSpec, SurfaceError};
use crate::wait::{RetryBudget, poll_until};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Armed,
    Monitoring,
    Terminated,
    Errored,
}

/// One classified reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub response_type: String,
    /// The message the reply was answering.
    pub probe_input: String,
    pub reply: String,
    pub matched: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunResult {
    #[serde(rename = "passed")]
    pub success_count: u32,
    #[serde(rename = "failed")]
    pub failed_count: u32,
    pub outcomes: Vec<Outcome>,
}

impl RunResult {
    pub fn total(&self) -> u32 {
        self.success_count + self.failed_count
    }
}

/// What [`ProbeRun::observe`] made of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    /// Already consumed (same or lower `seq`).
    Duplicate,
    /// Our own outbound message.
    Echo,
    /// Blank text, e.g. a bubble whose content has not rendered yet.
    Blank,
    /// A reply was classified. `follow_up` is what to send next, if anything.
    Classified {
        outcome: Outcome,
        follow_up: Option<String>,
    },
    /// The run had already reached its threshold.
    Ignored,
}

/// Classification state of one probe run.
#[derive(Debug)]
pub struct ProbeRun<'a> {
    adapter: &'a PlatformAdapter,
    response_type: String,
    last_input: String,
    follow_up: String,
    threshold: u32,
    last_seq: Option<u64>,
    result: RunResult,
}

impl<'a> ProbeRun<'a> {
    pub fn new(
        adapter: &'a PlatformAdapter,
        response_type: &str,
        probe_input: &str,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            adapter,
            response_type: response_type.to_string(),
            last_input: probe_input.to_string(),
            follow_up: config.follow_up.clone(),
            threshold: config.completion_threshold.max(1),
            last_seq: None,
            result: RunResult::default(),
        }
    }

    pub fn last_input(&self) -> &str {
        &self.last_input
    }

    /// Record that `text` went out; replies are now judged against it.
    pub fn sent(&mut self, text: &str) {
        self.last_input = text.to_string();
    }

    pub fn is_complete(&self) -> bool {
        self.result.total() >= self.threshold
    }

    pub fn result(&self) -> &RunResult {
        &self.result
    }

    pub fn into_result(self) -> RunResult {
        self.result
    }

    pub fn observe(&mut self, message: &InboundMessage) -> Observed {
        if self.is_complete() {
            return Observed::Ignored;
        }
        match self.last_seq {
            Some(last) if message.seq <= last => return Observed::Duplicate,
            _ => self.last_seq = Some(message.seq),
        }
        if message.text.trim().is_empty() {
            return Observed::Blank;
        }
        if is_echo(self.adapter.echo_marker.as_deref(), &message.text) {
            return Observed::Echo;
        }

        let classification = self.adapter.patterns.classify(
            self.adapter.match_mode,
            &self.response_type,
            &self.last_input,
            &message.text,
        );
        if classification == Classification::NoEntry {
            debug!(
                platform = %self.adapter.id,
                response_type = %self.response_type,
                input = %self.last_input,
                "no pattern entry, counting as unmatched"
            );
        }
        let matched = classification.is_match();
        if matched {
            self.result.success_count += 1;
        } else {
            self.result.failed_count += 1;
        }

        let outcome = Outcome {
            response_type: self.response_type.clone(),
            probe_input: self.last_input.clone(),
            reply: message.text.clone(),
            matched,
            timestamp: Utc::now(),
        };
        self.result.outcomes.push(outcome.clone());

        let follow_up = matched.then(|| self.follow_up.clone());
        Observed::Classified { outcome, follow_up }
    }
}

/// Drives one probe run on a live session.
pub struct ProbeEngine<'a> {
    config: &'a MonitorConfig,
    selector_budget: RetryBudget,
    log: &'a RunLog,
    state: MonitorState,
}

impl<'a> ProbeEngine<'a> {
    pub fn new(config: &'a MonitorConfig, selector_budget: RetryBudget, log: &'a RunLog) -> Self {
        Self {
            config,
            selector_budget,
            log,
            state: MonitorState::Armed,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    fn transition(&mut self, adapter: &PlatformAdapter, next: MonitorState) {
        debug!(platform = %adapter.id, from = ?self.state, to = ?next, "monitor state");
        self.state = next;
    }

    pub fn run(
        &mut self,
        live: &mut LiveSession<'_>,
        adapter: &PlatformAdapter,
        response_type: &str,
        probe_input: &str,
        stop: &AtomicBool,
    ) -> Result<RunResult, ProbeError> {
        let platform = adapter.id;
        self.state = MonitorState::Armed;
        info!(%platform, %response_type, %probe_input, "probe started");
        self.log.record(
            platform,
            &RunEvent::ProbeStarted {
                response_type: response_type.to_string(),
                probe_input: probe_input.to_string(),
            },
        )?;

        let mut run = ProbeRun::new(adapter, response_type, probe_input, self.config);
        let surface = &mut *live.surface;
        match self.drive(surface, adapter, &mut run, stop) {
            Ok(()) => {
                self.transition(adapter, MonitorState::Terminated);
                if let Err(e) = surface.unsubscribe() {
                    warn!(%platform, error = %e, "unsubscribe failed");
                }
                let result = run.into_result();
                self.log.record(
                    platform,
                    &RunEvent::ProbeFinished {
                        passed: result.success_count,
                        failed: result.failed_count,
                    },
                )?;
                info!(
                    %platform,
                    passed = result.success_count,
                    failed = result.failed_count,
                    "probe finished"
                );
                Ok(result)
            }
            Err(e) => {
                self.transition(adapter, MonitorState::Errored);
                if let Err(unsub) = surface.unsubscribe() {
                    debug!(%platform, error = %unsub, "unsubscribe after failure");
                }
                Err(self.record_failure(platform, e))
            }
        }
    }

    fn drive(
        &mut self,
        surface: &mut dyn AutomationSurface,
        adapter: &PlatformAdapter,
        run: &mut ProbeRun<'_>,
        stop: &AtomicBool,
    ) -> Result<(), ProbeError> {
        let platform = adapter.id;

        surface.navigate(&adapter.conversation_url)?;
        unlock_conversation(surface, adapter)?;

        let spec = ObserveSpec {
            container: adapter.selectors.container.clone(),
            message: adapter.selectors.message.clone(),
        };
        surface
            .subscribe(&spec)
            .map_err(|e| ProbeError::ObservationFault {
                platform,
                detail: e.to_string(),
            })?;

        let probe = run.last_input().to_string();
        self.send(surface, adapter, &probe)?;
        self.transition(adapter, MonitorState::Monitoring);

        loop {
            if stop.load(Ordering::SeqCst) {
                info!(%platform, "stop requested");
                return Err(ProbeError::Cancelled { platform });
            }

            let batch = surface
                .drain()
                .map_err(|e| ProbeError::ObservationFault {
                    platform,
                    detail: e.to_string(),
                })?;

            if !batch.errors.is_empty() {
                warn!(%platform, errors = ?batch.errors, "observer errors");
                self.log.record(
                    platform,
                    &RunEvent::ObserverErrors {
                        errors: batch.errors.clone(),
                    },
                )?;
            }

            for (idx, message) in batch.messages.iter().enumerate() {
                match run.observe(message) {
                    Observed::Duplicate => trace!(%platform, seq = message.seq, "duplicate"),
                    Observed::Ignored => {}
                    Observed::Blank => trace!(%platform, seq = message.seq, "blank message"),
                    Observed::Echo => self.log.record(platform, &RunEvent::Waiting)?,
                    Observed::Classified { outcome, follow_up } => {
                        self.log.record(
                            platform,
                            &RunEvent::Outcome {
                                response_type: outcome.response_type.clone(),
                                input: outcome.probe_input.clone(),
                                matched: outcome.matched,
                            },
                        )?;
                        if let Some(text) = follow_up {
                            self.send(surface, adapter, &text)?;
                            run.sent(&text);
                        }
                    }
                }
                if run.is_complete() {
                    let discarded = batch.messages.len() - idx - 1;
                    trace!(%platform, discarded, "threshold reached");
                    return Ok(());
                }
            }

            thread::sleep(self.config.poll_interval());
        }
    }

    /// Log a run failure. A failing log write never replaces `e`.
    fn record_failure(&self, platform: PlatformId, e: ProbeError) -> ProbeError {
        warn!(%platform, error = %e, "probe failed");
        let event = RunEvent::ProbeFailed {
            reason: e.to_string(),
        };
        if let Err(log_err) = self.log.record(platform, &event) {
            warn!(%platform, error = %log_err, "failed to record run failure");
        }
        e
    }

    /// Wait for the send precondition, then type and submit `text`.
    fn send(
        &self,
        surface: &mut dyn AutomationSurface,
        adapter: &PlatformAdapter,
        text: &str,
    ) -> Result<(), ProbeError> {
        let platform = adapter.id;

        if let Some(blocking) = &adapter.selectors.blocking {
            let budget = self.config.send_budget();
            let cleared = poll_until(budget, || {
                Ok::<_, SurfaceError>(!surface.element_exists(blocking)?)
            })?;
            if !cleared.is_ready() {
                return Err(ProbeError::SendTimeout {
                    platform,
                    attempts: budget.attempts.max(1),
                });
            }
        }

        let composer = &adapter.selectors.composer;
        let found = poll_until(self.selector_budget, || surface.element_exists(composer))?;
        if !found.is_ready() {
            return Err(SurfaceError::ElementNotFound {
                selector: composer.clone(),
            }
            .into());
        }

        surface.click(composer)?;
        thread::sleep(self.config.keystroke_pause());
        surface.type_text(composer, text)?;
        thread::sleep(self.config.keystroke_pause());
        surface.submit(composer)?;
        thread::sleep(self.config.post_send_pause());

        debug!(%platform, text, "sent");
        self.log.record(
            platform,
            &RunEvent::Sent {
                text: text.to_string(),
            },
        )?;
        Ok(())
    }
}
