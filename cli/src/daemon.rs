//! Daemon lifecycle commands.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use scribe_common::client::{connect, is_daemon_running};
use scribe_proto::Empty;
use tracing::{debug, info};

const DAEMON_BINARY: &str = "scribed";
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Prefer the daemon next to this executable, then fall back to `PATH`.
fn daemon_binary() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DAEMON_BINARY)))
        .filter(|candidate| candidate.exists())
        .unwrap_or_else(|| PathBuf::from(DAEMON_BINARY))
}

async fn wait_until(timeout: Duration, mut check: impl AsyncFnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    false
}

pub async fn start(socket: &Path) -> Result<()> {
    if is_daemon_running(socket).await {
        println!("Daemon is already running");
        return Ok(());
    }

    let binary = daemon_binary();
    info!(binary = %binary.display(), "Starting daemon");
    let child = Command::new(&binary)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to start {}", binary.display()))?;
    debug!(pid = child.id(), "Daemon process spawned");

    if !wait_until(STARTUP_TIMEOUT, async || is_daemon_running(socket).await).await {
        anyhow::bail!(
            "Daemon did not come up within {}s; see the daemon log",
            STARTUP_TIMEOUT.as_secs()
        );
    }
    println!("Daemon started (pid {})", child.id());
    Ok(())
}

pub async fn stop(socket: &Path) -> Result<()> {
    if !is_daemon_running(socket).await {
        println!("Daemon is not running");
        return Ok(());
    }

    let mut client = connect(socket).await?;
    client
        .shutdown(Empty {})
        .await
        .context("Shutdown request failed")?;

    if !wait_until(STARTUP_TIMEOUT, async || !socket.exists()).await {
        anyhow::bail!("Daemon did not exit in time");
    }
    println!("Daemon stopped");
    Ok(())
}

pub async fn status(socket: &Path) -> Result<()> {
    if !is_daemon_running(socket).await {
        println!("Daemon: not running");
        return Ok(());
    }

    let mut client = connect(socket).await?;
    let status = client.get_status(Empty {}).await?.into_inner();
    println!(
        "Daemon: {}",
        if status.ready { "ready" } else { "initializing" }
    );
    println!("Backend: {}", status.backend);
    println!(
        "Sessions: {} ({} busy)",
        status.sessions, status.busy_sessions
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_without_daemon() {
        let temp = tempfile::tempdir().unwrap();
        assert!(status(&temp.path().join("absent.sock")).await.is_ok());
        assert!(stop(&temp.path().join("absent.sock")).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_gives_up() {
        let mut calls = 0;
        let ok = wait_until(Duration::from_secs(1), async || {
            calls += 1;
            false
        })
        .await;
        assert!(!ok);
        assert!(calls >= 10);
    }
}
