//! Run log: the append-only, human-readable audit trail of every probe.
//!
//! One line per event, `[YYYY-MM-DD HH:MM:SS] [platform] message`, local
//! time. The file is shared by all platform runs of a process; appends are
//! serialized by a mutex and flushed immediately. Every line is mirrored to
//! `tracing` at debug level.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::debug;

use crate::platform::PlatformId;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Something worth recording in the run log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// A probe run started.
    ProbeStarted {
        response_type: String,
        probe_input: String,
    },
    /// A message went out through the composer.
    Sent { text: String },
    /// Our own echoed message showed up.
    Waiting,
    /// A reply was classified.
    Outcome {
        response_type: String,
        input: String,
        matched: bool,
    },
    /// The page-side observer reported errors.
    ObserverErrors { errors: Vec<String> },
    /// The run reached its threshold.
    ProbeFinished { passed: u32, failed: u32 },
    /// The run ended with an error.
    ProbeFailed { reason: String },
    /// A saved session was applied.
    SessionRestored,
    /// An interactive login completed and was saved.
    LoggedIn,
    /// An interactive login failed.
    AuthFailed { reason: String },
}

impl RunEvent {
    /// Text after the `[timestamp] [platform]` prefix.
    pub fn render(&self) -> String {
        match self {
            RunEvent::ProbeStarted {
                response_type,
                probe_input,
            } => format!("Probe started: type {response_type}, input {probe_input}"),
            RunEvent::Sent { text } => format!("Sent: {text}"),
            RunEvent::Waiting => "Waiting for response...".to_string(),
            RunEvent::Outcome {
                response_type,
                input,
                matched,
            } => {
                let mark = if *matched { "O" } else { "X" };
                format!("Type {response_type} : {input} - {mark}")
            }
            RunEvent::ObserverErrors { errors } => {
                format!("Observer errors: {}", errors.join(", "))
            }
            RunEvent::ProbeFinished { passed, failed } => {
                format!("Passed: {passed}, Failed: {failed}")
            }
            RunEvent::ProbeFailed { reason } => format!("Run failed: {reason}"),
            RunEvent::SessionRestored => "Session restored".to_string(),
            RunEvent::LoggedIn => "Logged in, session saved".to_string(),
            RunEvent::AuthFailed { reason } => format!("Login failed: {reason}"),
        }
    }
}

/// Writer for the run log.
pub struct RunLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl RunLog {
    /// Open the run log for appending.
    ///
    /// Creates the file (and parent directories) if they don't exist. Never
    /// truncates.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Append one event for `platform`.
    pub fn record(&self, platform: PlatformId, event: &RunEvent) -> io::Result<()> {
        let line = format!(
            "[{}] [{platform}] {}",
            Local::now().format(TIMESTAMP_FORMAT),
            event.render()
        );

        debug!(%platform, line = %line, "run log");

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(writer, "{line}")?;
        writer.flush()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn outcome_lines_use_o_and_x() {
        let pass = RunEvent::Outcome {
            response_type: "A".to_string(),
            input: "介紹".to_string(),
            matched: true,
        };
        let fail = RunEvent::Outcome {
            response_type: "B".to_string(),
            input: "hi".to_string(),
            matched: false,
        };
        assert_eq!(pass.render(), "Type A : 介紹 - O");
        assert_eq!(fail.render(), "Type B : hi - X");
    }

    #[test]
    fn observer_errors_are_joined() {
        let event = RunEvent::ObserverErrors {
            errors: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(event.render(), "Observer errors: a, b");
    }

    #[test]
    fn write_and_read_log_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("messages.log");

        let log = RunLog::open(&log_path).unwrap();
        log.record(PlatformId::Fb, &RunEvent::Waiting).unwrap();
        log.record(
            PlatformId::Ig,
            &RunEvent::ProbeFinished {
                passed: 2,
                failed: 0,
            },
        )
        .unwrap();

        let content = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] [fb] Waiting for response..."));
        assert!(lines[1].ends_with("] [ig] Passed: 2, Failed: 0"));

        // "[YYYY-MM-DD HH:MM:SS]" prefix
        assert_eq!(lines[0].find(']'), Some(20));
    }

    #[test]
    fn creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("deep").join("logs").join("messages.log");

        let log = RunLog::open(&log_path).unwrap();
        log.record(PlatformId::Line, &RunEvent::LoggedIn).unwrap();

        assert!(log_path.exists());
        assert_eq!(log.path(), log_path);
    }

    #[test]
    fn appends_to_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("messages.log");

        {
            let log = RunLog::open(&log_path).unwrap();
            log.record(PlatformId::Fb, &RunEvent::SessionRestored).unwrap();
        }
        {
            let log = RunLog::open(&log_path).unwrap();
            log.record(PlatformId::Fb, &RunEvent::Waiting).unwrap();
        }

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn concurrent_appends_do_not_interleave() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("messages.log");
        let log = Arc::new(RunLog::open(&log_path).unwrap());

        let handles: Vec<_> = PlatformId::ALL
            .into_iter()
            .map(|platform| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for _ in 0..50 {
                        log.record(platform, &RunEvent::Waiting).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 150);
        assert!(
            content
                .lines()
                .all(|line| line.ends_with("Waiting for response..."))
        );
    }
}
