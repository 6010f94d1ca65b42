//! Controller owns daemon-wide state: open sessions, the pipeline, readiness
//! and the shutdown signal.

use std::sync::{Arc, Mutex};

use tokio::sync::{RwLock, oneshot};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::session::{Session, SessionError, SessionId, SessionRegistry};
use crate::transcribe::{Backend, Transcriber, TranscriptionRequest};

/// Lifecycle of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Preloading models.
    Initializing,
    Ready,
    Stopped,
}

/// Counts reported by `GetStatus`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub ready: bool,
    pub backend: &'static str,
    pub sessions: usize,
    pub busy_sessions: usize,
}

pub struct Controller<T = Backend> {
    state: RwLock<ControllerState>,
    config: Config,
    pipeline: Pipeline<T>,
    sessions: SessionRegistry,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl<T: Transcriber> Controller<T> {
    pub fn new(config: Config, pipeline: Pipeline<T>, shutdown_tx: oneshot::Sender<()>) -> Self {
        Self {
            state: RwLock::new(ControllerState::Initializing),
            config,
            pipeline,
            sessions: SessionRegistry::new(),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
        }
    }

    pub async fn state(&self) -> ControllerState {
        *self.state.read().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline<T> {
        &self.pipeline
    }

    /// Request parameters before per-call overrides.
    pub fn default_request(&self) -> TranscriptionRequest {
        TranscriptionRequest::from_config(&self.config)
    }

    /// Preload the default model when configured, then mark the daemon ready.
    /// A failed preload is logged; models then load on first use.
    pub async fn initialize(&self) {
        if self.config.model.preload {
            info!(
                backend = self.pipeline.transcriber().name(),
                "Preloading default model"
            );
            if let Err(e) = self
                .pipeline
                .transcriber()
                .preload(&self.default_request())
                .await
            {
                error!(error = %e, "Model preload failed");
            }
        }
        self.mark_ready().await;
    }

    pub async fn mark_ready(&self) {
        let mut state = self.state.write().await;
        if *state == ControllerState::Initializing {
            *state = ControllerState::Ready;
            info!("Daemon ready");
        }
    }

    /// Open a session; `auto_run` defaults to the configured mode.
    pub async fn open_session(&self, auto_run: Option<bool>) -> Arc<Session> {
        self.sessions
            .open(auto_run.unwrap_or(self.config.session.auto_run))
            .await
    }

    pub async fn close_session(&self, id: SessionId) -> Result<(), SessionError> {
        self.sessions.close(id).await
    }

    pub async fn session(&self, id: SessionId) -> Result<Arc<Session>, SessionError> {
        self.sessions.get(id).await
    }

    pub async fn status(&self) -> StatusReport {
        StatusReport {
            ready: self.state().await == ControllerState::Ready,
            backend: self.pipeline.transcriber().name(),
            sessions: self.sessions.len().await,
            busy_sessions: self.sessions.busy_count().await,
        }
    }

    /// Stop the daemon. Later calls are no-ops.
    pub async fn shutdown(&self) {
        *self.state.write().await = ControllerState::Stopped;
        let sender = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match sender {
            Some(tx) => {
                info!("Shutdown requested");
                let _ = tx.send(());
            }
            None => warn!("Shutdown already requested"),
        }
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod tests;
