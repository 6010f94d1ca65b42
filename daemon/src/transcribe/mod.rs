//! Speech-to-text transcription.
//!
//! The [`Transcriber`] trait is the seam between the pipeline and a backend.
//! [`Backend`] holds the variant chosen from configuration at start: local
//! whisper.cpp inference or the hosted transcription API.

use std::path::Path;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{BackendKind, Config, Precision, SpeechModel};
use crate::retry::{RetryNotice, Retryable};

mod local;
mod remote;

pub use local::LocalTranscriber;
pub use remote::{RemoteError, RemoteTranscriber};

/// Parameters of one transcription run. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionRequest {
    /// Language hint; `None` enables detection.
    pub language: Option<String>,
    pub model: SpeechModel,
    pub precision: Precision,
    /// Beam width; 0 or 1 selects greedy decoding.
    pub beam_size: u32,
    pub vad_filter: bool,
    pub min_silence_ms: u32,
    pub vad_threshold: f32,
    /// Model name sent to the hosted API.
    pub remote_model: String,
}

impl TranscriptionRequest {
    /// Request with every parameter taken from the daemon configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            language: config.language_hint(),
            model: config.model.model,
            precision: config.model.precision,
            beam_size: config.model.beam_size,
            vad_filter: config.vad.enabled,
            min_silence_ms: config.vad.min_silence_ms,
            vad_threshold: config.vad.threshold,
            remote_model: config.remote.model.clone(),
        }
    }
}

/// Text and detected language of one run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TranscriptionResult {
    pub text: String,
    pub language: Option<String>,
    /// Confidence of `language`, in `[0, 1]`.
    pub language_probability: Option<f32>,
}

/// Progress reported while a run is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Stage(String),
    Retry(RetryNotice),
}

/// Where a run reports progress. Sending never blocks and never fails; events
/// sent after the receiver is gone are dropped.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    pub fn discard() -> Self {
        Self::default()
    }

    pub fn stage(&self, message: impl Into<String>) {
        self.send(ProgressEvent::Stage(message.into()));
    }

    pub fn retry(&self, notice: &RetryNotice) {
        self.send(ProgressEvent::Retry(notice.clone()));
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("local transcription failed: {0:#}")]
    Local(anyhow::Error),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl TranscribeError {
    /// True when the backend kept failing with retryable errors until the
    /// retry ceiling was reached.
    pub fn is_retries_exhausted(&self) -> bool {
        match self {
            TranscribeError::Remote(error) => error.class().is_retryable(),
            TranscribeError::Local(_) => false,
        }
    }
}

/// Speech-to-text backend.
#[tonic::async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio file at `audio`.
    async fn transcribe(
        &self,
        audio: &Path,
        request: &TranscriptionRequest,
        progress: &ProgressSink,
    ) -> Result<TranscriptionResult, TranscribeError>;

    /// Short backend name for status reports.
    fn name(&self) -> &'static str;

    /// Load whatever the first run for `request` would otherwise load.
    async fn preload(&self, _request: &TranscriptionRequest) -> Result<()> {
        Ok(())
    }
}

/// The configured backend.
pub enum Backend {
    Local(LocalTranscriber),
    Remote(RemoteTranscriber),
}

impl Backend {
    /// Build the backend selected by `config`. The remote variant needs the
    /// API key resolved at startup.
    pub fn from_config(config: &Config, api_key: Option<String>) -> Result<Self> {
        match config.backend.kind {
            BackendKind::Local => Ok(Backend::Local(LocalTranscriber::new()?)),
            BackendKind::Remote => {
                let api_key = api_key
                    .ok_or_else(|| anyhow::anyhow!("Remote backend requires an API key"))?;
                Ok(Backend::Remote(RemoteTranscriber::new(
                    &config.remote,
                    api_key,
                    config.retry.policy(),
                )?))
            }
        }
    }
}

#[tonic::async_trait]
impl Transcriber for Backend {
    async fn transcribe(
        &self,
        audio: &Path,
        request: &TranscriptionRequest,
        progress: &ProgressSink,
    ) -> Result<TranscriptionResult, TranscribeError> {
        match self {
            Backend::Local(local) => local.transcribe(audio, request, progress).await,
            Backend::Remote(remote) => remote.transcribe(audio, request, progress).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Backend::Local(local) => local.name(),
            Backend::Remote(remote) => remote.name(),
        }
    }

    async fn preload(&self, request: &TranscriptionRequest) -> Result<()> {
        match self {
            Backend::Local(local) => local.preload(request).await,
            Backend::Remote(remote) => remote.preload(request).await,
        }
    }
}

/// Trim every segment, drop empty ones, and join the rest with newlines.
pub fn join_segments<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    segments
        .into_iter()
        .filter_map(|segment| {
            let trimmed = segment.as_ref().trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect::<Vec<_>>()
        .join("\n")
}
