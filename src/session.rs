//! Persisted per-platform login state.
//!
//! One JSON file per platform under the sessions directory. Writes go to a
//! temp file in the same directory and are renamed over the target, so a
//! reader never sees a partial file. Concurrent writers: last one wins.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ProbeError;
use crate::platform::PlatformId;

/// Opaque credential state for one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub platform: PlatformId,
    pub saved_at: DateTime<Utc>,
    /// Whatever the surface exported (the cookie jar).
    pub state: serde_json::Value,
}

impl Session {
    pub fn new(platform: PlatformId, state: serde_json::Value) -> Self {
        Self {
            platform,
            saved_at: Utc::now(),
            state,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, platform: PlatformId) -> PathBuf {
        self.dir.join(format!("{platform}_session.json"))
    }

    pub fn ensure_dir(&self) -> Result<(), ProbeError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Load the saved session. Absent, unreadable and corrupt files all
    /// report [`ProbeError::SessionNotFound`].
    pub fn load(&self, platform: PlatformId) -> Result<Session, ProbeError> {
        let path = self.path_for(platform);
        let not_found = || ProbeError::SessionNotFound { platform };

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(%platform, path = %path.display(), "no saved session");
                return Err(not_found());
            }
            Err(e) => {
                warn!(%platform, path = %path.display(), error = %e, "saved session unreadable");
                return Err(not_found());
            }
        };

        let session: Session = match serde_json::from_str(&contents) {
            Ok(session) => session,
            Err(e) => {
                warn!(%platform, path = %path.display(), error = %e, "saved session is corrupt");
                return Err(not_found());
            }
        };

        if session.platform != platform {
            warn!(
                %platform,
                found = %session.platform,
                path = %path.display(),
                "saved session belongs to another platform"
            );
            return Err(not_found());
        }

        debug!(%platform, saved_at = %session.saved_at, "session loaded");
        Ok(session)
    }

    /// Atomically replace the saved session.
    pub fn save(&self, session: &Session) -> Result<(), ProbeError> {
        self.ensure_dir()?;
        let path = self.path_for(session.platform);
        let json = serde_json::to_vec_pretty(session)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;

        info!(platform = %session.platform, path = %path.display(), "session saved");
        Ok(())
    }

    /// Delete the saved session. Absent is not an error.
    pub fn remove(&self, platform: PlatformId) -> Result<bool, ProbeError> {
        let path = self.path_for(platform);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(%platform, path = %path.display(), "session removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
