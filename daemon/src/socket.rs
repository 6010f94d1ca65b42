//! Unix socket and PID file handling for the daemon.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;

/// Daemon socket path in the XDG state directory.
pub fn socket_path() -> Result<PathBuf> {
    scribe_common::dirs::socket_path()
}

/// Daemon PID file path in the XDG state directory.
pub fn pid_path() -> Result<PathBuf> {
    scribe_common::dirs::pid_path()
}

/// Daemon log file path in the XDG state directory.
pub fn log_path() -> Result<PathBuf> {
    scribe_common::dirs::log_path()
}

/// Bind the daemon socket, replacing a stale socket file left by a crash.
pub async fn create_listener(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        if scribe_common::client::is_daemon_running(path).await {
            anyhow::bail!("Another daemon is already listening on {}", path.display());
        }
        std::fs::remove_file(path).context("Failed to remove stale socket")?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    UnixListener::bind(path).context("Failed to bind Unix socket")
}

/// Write the current process id.
pub fn write_pid_file(path: &Path) -> Result<u32> {
    let pid = std::process::id();
    std::fs::write(path, pid.to_string()).context("Failed to write PID file")?;
    Ok(pid)
}

/// Remove a runtime file, ignoring errors.
pub fn cleanup(path: &Path) {
    let _ = std::fs::remove_file(path);
}
