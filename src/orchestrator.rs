//! Orchestrator: runs probes for one platform or all of them.
//!
//! A [`Runner`] owns everything a run needs (config, session store, run log,
//! surface factory) and is shared read-only between concurrent platform runs.
//! Each run opens its own surface and closes it when done, also on error.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{AuthController, AuthMode, OperatorInput, SessionOrigin, Unattended};
use crate::config::ProjectConfig;
use crate::error::ProbeError;
use crate::log::RunLog;
use crate::monitor::{ProbeEngine, RunResult};
use crate::paths;
use crate::platform::{PlatformAdapter, PlatformId, adapter_for};
use crate::session::SessionStore;
use crate::surface::{AutomationSurface, SurfaceFactory};

/// One probe to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub platform: PlatformId,
    pub response_type: String,
    /// Overrides the adapter's probe input.
    pub probe_input: Option<String>,
}

impl ProbeRequest {
    pub fn new(platform: PlatformId, response_type: impl Into<String>) -> Self {
        Self {
            platform,
            response_type: response_type.into(),
            probe_input: None,
        }
    }
}

/// Why a platform run failed, as far as callers need to distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    TimedOut,
    Unreachable,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReportStatus {
    Success {
        passed: u32,
        failed: u32,
    },
    Error {
        error: String,
        details: String,
        #[serde(skip)]
        kind: FailureKind,
    },
}

/// Result of one platform run as reported to the CLI and the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformReport {
    pub platform: PlatformId,
    #[serde(rename = "type")]
    pub response_type: String,
    #[serde(flatten)]
    pub status: ReportStatus,
}

impl PlatformReport {
    pub fn success(request: &ProbeRequest, result: &RunResult) -> Self {
        Self {
            platform: request.platform,
            response_type: request.response_type.clone(),
            status: ReportStatus::Success {
                passed: result.success_count,
                failed: result.failed_count,
            },
        }
    }

    pub fn failure(
        request: &ProbeRequest,
        kind: FailureKind,
        error: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            platform: request.platform,
            response_type: request.response_type.clone(),
            status: ReportStatus::Error {
                error: error.into(),
                details: details.into(),
                kind,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ReportStatus::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.status {
            ReportStatus::Success { .. } => None,
            ReportStatus::Error { kind, .. } => Some(kind),
        }
    }
}

pub struct Runner {
    config: ProjectConfig,
    store: SessionStore,
    log: RunLog,
    factory: Arc<dyn SurfaceFactory>,
}

impl Runner {
    pub fn new(
        config: ProjectConfig,
        store: SessionStore,
        log: RunLog,
        factory: Arc<dyn SurfaceFactory>,
    ) -> Self {
        Self {
            config,
            store,
            log,
            factory,
        }
    }

    /// Store and log under `state_dir` (`sessions/`, `logs/messages.log`).
    pub fn open(
        config: ProjectConfig,
        state_dir: &Path,
        factory: Arc<dyn SurfaceFactory>,
    ) -> Result<Self> {
        let store = SessionStore::new(paths::sessions_dir(state_dir));
        store.ensure_dir()?;
        let log = RunLog::open(&paths::run_log_path(state_dir))?;
        Ok(Self::new(config, store, log, factory))
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    /// Built-in adapter for `platform` with config overrides applied.
    pub fn adapter(&self, platform: PlatformId) -> PlatformAdapter {
        adapter_for(platform, self.config.platform(platform))
    }

    fn controller<'a>(&'a self, adapter: &'a PlatformAdapter) -> AuthController<'a> {
        AuthController::new(adapter, &self.store, &self.log, self.config.auth.budget())
    }

    /// Log in interactively and save the session.
    pub fn login(
        &self,
        platform: PlatformId,
        operator: &mut dyn OperatorInput,
    ) -> Result<SessionOrigin, ProbeError> {
        let adapter = self.adapter(platform);
        let mut surface = self.factory.open(platform)?;
        let result = self
            .controller(&adapter)
            .establish(surface.as_mut(), AuthMode::Login, operator)
            .map(|live| live.origin);
        close(platform, surface.as_mut());
        result
    }

    /// Restore (or log in), then run one probe.
    pub fn probe(
        &self,
        request: &ProbeRequest,
        operator: &mut dyn OperatorInput,
        stop: &AtomicBool,
    ) -> Result<RunResult, ProbeError> {
        let platform = request.platform;
        let adapter = self.adapter(platform);
        let probe_input = request
            .probe_input
            .clone()
            .unwrap_or_else(|| adapter.probe_input.clone());

        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("probe", %run_id, %platform);
        let _guard = span.enter();
        debug!(response_type = %request.response_type, "opening surface");

        let mut surface = self.factory.open(platform)?;
        let result = (|| {
            let mut live = self
                .controller(&adapter)
                .establish(surface.as_mut(), AuthMode::Restore, operator)?;
            let mut engine =
                ProbeEngine::new(&self.config.monitor, self.config.auth.budget(), &self.log);
            engine.run(
                &mut live,
                &adapter,
                &request.response_type,
                &probe_input,
                stop,
            )
        })();
        close(platform, surface.as_mut());
        result
    }

    /// Unattended probe bounded by `timeout`.
    ///
    /// The watchdog sets the stop flag when the timeout elapses; the engine
    /// notices between poll ticks.
    pub fn run_platform(&self, request: &ProbeRequest, timeout: Duration) -> PlatformReport {
        let stop = AtomicBool::new(false);
        let timed_out = AtomicBool::new(false);
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let result = thread::scope(|s| {
            let stop = &stop;
            let timed_out = &timed_out;
            s.spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
                    timed_out.store(true, Ordering::SeqCst);
                    stop.store(true, Ordering::SeqCst);
                }
            });
            let result = self.probe(request, &mut Unattended, stop);
            drop(done_tx);
            result
        });

        match result {
            Ok(result) => PlatformReport::success(request, &result),
            Err(e) if timed_out.load(Ordering::SeqCst) => {
                warn!(platform = %request.platform, ?timeout, "run timed out");
                PlatformReport::failure(
                    request,
                    FailureKind::TimedOut,
                    "Execution timed out",
                    format!("no result within {}s: {e}", timeout.as_secs()),
                )
            }
            Err(e) if e.is_unreachable() => PlatformReport::failure(
                request,
                FailureKind::Unreachable,
                "Automation endpoint unreachable",
                e.to_string(),
            ),
            Err(e) => PlatformReport::failure(
                request,
                FailureKind::Other,
                "Failed to execute",
                e.to_string(),
            ),
        }
    }

    /// Run `response_type` on every platform concurrently.
    ///
    /// Runs are isolated; one failing never cancels the others.
    pub fn fan_out(&self, response_type: &str, timeout: Duration) -> Vec<PlatformReport> {
        info!(%response_type, "fan-out started");
        let reports = thread::scope(|s| {
            let handles: Vec<_> = PlatformId::ALL
                .into_iter()
                .map(|platform| {
                    let request = ProbeRequest::new(platform, response_type);
                    (
                        request.clone(),
                        s.spawn(move || self.run_platform(&request, timeout)),
                    )
                })
                .collect();

            handles
                .into_iter()
                .map(|(request, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        PlatformReport::failure(
                            &request,
                            FailureKind::Other,
                            "Failed to execute",
                            "platform run panicked",
                        )
                    })
                })
                .collect::<Vec<_>>()
        });
        let passed = reports.iter().filter(|r| r.is_success()).count();
        info!(%response_type, succeeded = passed, total = reports.len(), "fan-out finished");
        reports
    }
}

fn close(platform: PlatformId, surface: &mut dyn AutomationSurface) {
    if let Err(e) = surface.close() {
        warn!(%platform, error = %e, "failed to close surface");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ScriptedOperator;
    use crate::config::MonitorConfig;
    use crate::platform::builtin;
    use crate::session::Session;
    use crate::surface::scripted::{ScriptHandle, ScriptedFactory, ScriptedSurface};
    use serde_json::json;

    fn fast_config() -> ProjectConfig {
        let mut config = ProjectConfig::default();
        config.monitor = MonitorConfig {
            poll_interval_millis: 1,
            send_retry_attempts: 2,
            send_retry_interval_millis: 1,
            keystroke_pause_millis: 0,
            post_send_pause_millis: 0,
            ..MonitorConfig::default()
        };
        config.auth.selector_attempts = 2;
        config.auth.selector_interval_millis = 1;
        config
    }

    fn runner(tmp: &tempfile::TempDir, factory: ScriptedFactory) -> Runner {
        Runner::open(fast_config(), tmp.path(), Arc::new(factory)).unwrap()
    }

    /// A Messenger surface whose bot answers type A correctly.
    fn fb_surface() -> (ScriptedSurface, ScriptHandle) {
        let adapter = builtin(PlatformId::Fb);
        let surface = ScriptedSurface::new()
            .with_element(&adapter.selectors.composer)
            .with_echo("You sent\n")
            .reply_to("介紹", &["Develope club\n您好"])
            .reply_to("hi", &["Develope club\n愛爾麗"]);
        let handle = surface.handle();
        (surface, handle)
    }

    fn save_session(runner: &Runner, platform: PlatformId) {
        runner
            .store()
            .save(&Session::new(platform, json!([])))
            .unwrap();
    }

    #[test]
    fn probe_with_saved_session_runs_and_closes() {
        let tmp = tempfile::tempdir().unwrap();
        let (surface, handle) = fb_surface();
        let runner = runner(&tmp, ScriptedFactory::new().with(PlatformId::Fb, surface));
        save_session(&runner, PlatformId::Fb);

        let stop = AtomicBool::new(false);
        let result = runner
            .probe(
                &ProbeRequest::new(PlatformId::Fb, "A"),
                &mut Unattended,
                &stop,
            )
            .unwrap();

        assert_eq!(result.success_count, 2);
        assert!(handle.is_closed());
    }

    #[test]
    fn probe_input_override_is_sent() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = builtin(PlatformId::Fb);
        let surface = ScriptedSurface::new()
            .with_element(&adapter.selectors.composer)
            .reply_to("hello", &["Develope club\n不是", "Develope club\n不是"]);
        let handle = surface.handle();
        let runner = runner(&tmp, ScriptedFactory::new().with(PlatformId::Fb, surface));
        save_session(&runner, PlatformId::Fb);

        let mut request = ProbeRequest::new(PlatformId::Fb, "A");
        request.probe_input = Some("hello".to_string());
        let result = runner
            .probe(&request, &mut Unattended, &AtomicBool::new(false))
            .unwrap();

        assert_eq!(handle.sent(), vec!["hello"]);
        assert_eq!(result.failed_count, 2);
    }

    #[test]
    fn unattended_probe_without_session_fails_fast_and_closes() {
        let tmp = tempfile::tempdir().unwrap();
        let (surface, handle) = fb_surface();
        let runner = runner(&tmp, ScriptedFactory::new().with(PlatformId::Fb, surface));

        let err = runner
            .probe(
                &ProbeRequest::new(PlatformId::Fb, "A"),
                &mut Unattended,
                &AtomicBool::new(false),
            )
            .unwrap_err();

        assert!(matches!(err, ProbeError::AuthChallengeUnanswered { .. }));
        assert!(handle.is_closed());
        assert!(handle.sent().is_empty());
    }

    #[test]
    fn login_saves_session() {
        let tmp = tempfile::tempdir().unwrap();
        let surface = ScriptedSurface::new().with_cookies(json!([{ "name": "xs" }]));
        let handle = surface.handle();
        let runner = runner(&tmp, ScriptedFactory::new().with(PlatformId::Fb, surface));

        let origin = runner
            .login(PlatformId::Fb, &mut ScriptedOperator::new(["save"]))
            .unwrap();

        assert_eq!(origin, SessionOrigin::LoggedIn);
        assert!(runner.store().load(PlatformId::Fb).is_ok());
        assert!(handle.is_closed());
    }

    #[test]
    fn run_platform_reports_success() {
        let tmp = tempfile::tempdir().unwrap();
        let (surface, _) = fb_surface();
        let runner = runner(&tmp, ScriptedFactory::new().with(PlatformId::Fb, surface));
        save_session(&runner, PlatformId::Fb);

        let report = runner.run_platform(
            &ProbeRequest::new(PlatformId::Fb, "A"),
            Duration::from_secs(30),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(
            json,
            json!({ "platform": "fb", "type": "A", "status": "success", "passed": 2, "failed": 0 })
        );
    }

    #[test]
    fn run_platform_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = builtin(PlatformId::Fb);
        // The bot never answers.
        let surface = ScriptedSurface::new().with_element(&adapter.selectors.composer);
        let runner = runner(&tmp, ScriptedFactory::new().with(PlatformId::Fb, surface));
        save_session(&runner, PlatformId::Fb);

        let report = runner.run_platform(
            &ProbeRequest::new(PlatformId::Fb, "B"),
            Duration::from_millis(50),
        );
        assert_eq!(report.failure_kind(), Some(FailureKind::TimedOut));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "Execution timed out");
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn unreachable_surface_is_reported_as_such() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = runner(&tmp, ScriptedFactory::new());

        let report = runner.run_platform(
            &ProbeRequest::new(PlatformId::Ig, "A"),
            Duration::from_secs(5),
        );
        assert_eq!(report.failure_kind(), Some(FailureKind::Unreachable));
    }

    #[test]
    fn fan_out_returns_partial_results() {
        let tmp = tempfile::tempdir().unwrap();
        let (surface, _) = fb_surface();
        let runner = runner(&tmp, ScriptedFactory::new().with(PlatformId::Fb, surface));
        save_session(&runner, PlatformId::Fb);

        let reports = runner.fan_out("A", Duration::from_secs(30));

        assert_eq!(reports.len(), 3);
        assert_eq!(
            reports.iter().map(|r| r.platform).collect::<Vec<_>>(),
            PlatformId::ALL.to_vec()
        );
        assert!(reports[0].is_success());
        assert!(!reports[1].is_success());
        assert!(!reports[2].is_success());
        assert!(reports.iter().all(|r| r.response_type == "A"));
    }
}
