//! Per-session run state: the busy flag and the re-run guard.
//!
//! A session runs at most one transcription at a time. Automatic triggers are
//! skipped when the upload's signature matches the last one seen; manual
//! triggers always run unless the session is busy. The signature is recorded
//! when a run starts, not when it ends, so a trigger that arrives while the
//! first run is in flight does not start a second one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::signature::FileSignature;

/// Identifier of a client session.
pub type SessionId = Uuid;

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Explicit user request; runs regardless of the signature.
    Manual,
    /// Re-submission of the current upload; runs only for a new signature.
    Auto,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Same upload as last time; carries the transcript produced then.
    Unchanged { last_transcript: Option<String> },
    AutoRunDisabled,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("a transcription is already running in this session")]
    Busy,
    #[error("unknown session {0}")]
    NotFound(SessionId),
}

/// Mutable state of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub busy: bool,
    pub auto_run: bool,
    pub last_signature: Option<FileSignature>,
    pub last_transcript: Option<String>,
}

/// A client session. Shared between the registry and in-flight runs.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: Arc<Mutex<SessionState>>,
}

/// Outcome of [`Session::begin`].
#[derive(Debug)]
pub enum RunDecision {
    Run(RunGuard),
    Skip(SkipReason),
}

impl Session {
    pub fn new(auto_run: bool) -> Self {
        Self::with_id(Uuid::new_v4(), auto_run)
    }

    pub fn with_id(id: SessionId, auto_run: bool) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(SessionState {
                auto_run,
                ..SessionState::default()
            })),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> SessionState {
        lock(&self.state).clone()
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.state).busy
    }

    pub fn last_transcript(&self) -> Option<String> {
        lock(&self.state).last_transcript.clone()
    }

    pub fn set_auto_run(&self, enabled: bool) {
        lock(&self.state).auto_run = enabled;
    }

    /// Decide whether a run for `signature` starts, and mark it started.
    pub fn begin(
        &self,
        signature: FileSignature,
        trigger: Trigger,
    ) -> Result<RunDecision, SessionError> {
        let mut state = lock(&self.state);

        if state.busy {
            return Err(SessionError::Busy);
        }

        if trigger == Trigger::Auto {
            if !state.auto_run {
                return Ok(RunDecision::Skip(SkipReason::AutoRunDisabled));
            }
            if state.last_signature == Some(signature) {
                debug!(session = %self.id, %signature, "Upload unchanged, skipping");
                return Ok(RunDecision::Skip(SkipReason::Unchanged {
                    last_transcript: state.last_transcript.clone(),
                }));
            }
        }

        state.busy = true;
        state.last_signature = Some(signature);
        debug!(session = %self.id, %signature, ?trigger, "Run started");

        Ok(RunDecision::Run(RunGuard {
            session: self.id,
            state: Arc::clone(&self.state),
        }))
    }
}

/// Held for the duration of a run. Dropping it clears the busy flag, whatever
/// the outcome of the run was.
#[derive(Debug)]
pub struct RunGuard {
    session: SessionId,
    state: Arc<Mutex<SessionState>>,
}

impl RunGuard {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Record the transcript of a successful run and end it.
    pub fn complete(self, transcript: String) {
        lock(&self.state).last_transcript = Some(transcript);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock(&self.state).busy = false;
        debug!(session = %self.session, "Run finished");
    }
}

/// Lock the state, recovering from a poisoned mutex. A panic inside a run
/// must not wedge the session.
fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// All open sessions, keyed by id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&self, auto_run: bool) -> Arc<Session> {
        let session = Arc::new(Session::new(auto_run));
        self.sessions
            .write()
            .await
            .insert(session.id(), Arc::clone(&session));
        info!(session = %session.id(), auto_run, "Session opened");
        session
    }

    pub async fn get(&self, id: SessionId) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotFound(id))
    }

    /// Remove a session. A run still in flight keeps its own handle and
    /// finishes normally.
    pub async fn close(&self, id: SessionId) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .remove(&id)
            .map(|_| info!(session = %id, "Session closed"))
            .ok_or(SessionError::NotFound(id))
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn busy_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|session| session.is_busy())
            .count()
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
