use std::path::{Path, PathBuf};

use crate::config::CONFIG_DIR;

/// Resolve the state directory for a run.
///
/// Absolute `state_dir` values are used as-is. Relative ones resolve against
/// the project root (the directory holding `.botprobe/config.toml`), or
/// against `cwd` when no config file was found.
pub fn resolve_state_dir(state_dir: &Path, config_path: Option<&Path>, cwd: &Path) -> PathBuf {
    if state_dir.is_absolute() {
        return state_dir.to_path_buf();
    }
    let root = config_path
        .and_then(project_root)
        .unwrap_or_else(|| cwd.to_path_buf());
    root.join(state_dir)
}

/// `<root>` for a `<root>/.botprobe/config.toml` path.
fn project_root(config_path: &Path) -> Option<PathBuf> {
    let dir = config_path.parent()?;
    if dir.file_name()? == CONFIG_DIR {
        dir.parent().map(Path::to_path_buf)
    } else {
        Some(dir.to_path_buf())
    }
}

pub fn sessions_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("sessions")
}

pub fn run_log_path(state_dir: &Path) -> PathBuf {
    state_dir.join("logs").join("messages.log")
}
