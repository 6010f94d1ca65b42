//! Daemon runner that wires the pipeline, controller and gRPC server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use tonic::transport::Server;
use tracing::{error, info};

use crate::config::Config;
use crate::controller::Controller;
use crate::pipeline::Pipeline;
use crate::server::ScribeService;
use crate::socket::{cleanup, create_listener, write_pid_file};
use crate::transcribe::Transcriber;

/// Paths used by the daemon at runtime.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    pub socket: PathBuf,
    pub pid: PathBuf,
}

impl DaemonPaths {
    /// Create paths using XDG state directory defaults.
    pub fn from_xdg() -> Result<Self> {
        Ok(Self {
            socket: crate::socket::socket_path()?,
            pid: crate::socket::pid_path()?,
        })
    }
}

/// Serve until a `Shutdown` call or a termination signal.
pub async fn run_with<T: Transcriber + 'static>(
    paths: DaemonPaths,
    config: Config,
    transcriber: T,
) -> Result<()> {
    let listener = create_listener(&paths.socket).await?;
    info!(path = %paths.socket.display(), "Listening on Unix socket");

    let pid = write_pid_file(&paths.pid)?;
    info!(pid, path = %paths.pid.display(), "Wrote PID file");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let pipeline = Pipeline::from_config(&config, Arc::new(transcriber));
    let controller = Arc::new(Controller::new(config, pipeline, shutdown_tx));

    let init = Arc::clone(&controller);
    tokio::spawn(async move { init.initialize().await });

    let service = ScribeService::new(Arc::clone(&controller));

    let incoming = async_stream::stream! {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => yield Ok::<_, std::io::Error>(stream),
                Err(e) => {
                    error!(error = %e, "Accept error");
                }
            }
        }
    };

    info!(backend = controller.pipeline().transcriber().name(), "Daemon started");
    let result = Server::builder()
        .add_service(service.into_server())
        .serve_with_incoming_shutdown(incoming, async {
            tokio::select! {
                _ = shutdown_rx => info!("Shutdown requested over gRPC"),
                _ = termination() => info!("Termination signal received"),
            }
        })
        .await;

    cleanup(&paths.socket);
    cleanup(&paths.pid);
    info!("Daemon stopped");

    result.context("Server error")
}

/// Resolves on SIGINT or SIGTERM.
async fn termination() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
