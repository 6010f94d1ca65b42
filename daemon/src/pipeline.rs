//! One transcription run, from uploaded bytes to transcript.
//!
//! A run is split in two. [`Pipeline::prepare`] does the cheap checks that
//! decide whether a run happens at all: the size ceiling, the signature and
//! the session guard. [`Pipeline::execute`] stages the upload, normalizes it,
//! calls the backend and releases every staged artifact.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::normalize::{NormalizeError, Normalizer};
use crate::session::{RunDecision, RunGuard, Session, SessionError, SkipReason, Trigger};
use crate::signature::FileSignature;
use crate::staging::{StagedFile, Stager};
use crate::transcribe::{
    Backend, ProgressSink, TranscribeError, Transcriber, TranscriptionRequest,
    TranscriptionResult,
};
use crate::upload::UploadedAudio;

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("upload is {size_mb:.1} MB, above the {limit_mb} MB limit")]
    TooLarge { size_mb: f64, limit_mb: u32 },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to stage upload: {0:#}")]
    Staging(anyhow::Error),
    #[error(transparent)]
    Normalization(#[from] NormalizeError),
    #[error(transparent)]
    Backend(#[from] TranscribeError),
}

impl RunError {
    /// Message suitable for showing to the person who uploaded the file.
    pub fn user_message(&self) -> String {
        match self {
            RunError::TooLarge { size_mb, limit_mb } => format!(
                "File is too large: {size_mb:.1} MB. Limit: {limit_mb} MB."
            ),
            RunError::Session(SessionError::Busy) => {
                "A transcription is already running. Wait for it to finish.".to_string()
            }
            RunError::Session(SessionError::NotFound(_)) => {
                "This session has ended. Open a new one and upload again.".to_string()
            }
            RunError::Staging(error) => format!("Could not store the uploaded file: {error:#}"),
            RunError::Normalization(NormalizeError::NotFound { program }) => format!(
                "Audio conversion is unavailable: `{program}` is not installed."
            ),
            RunError::Normalization(NormalizeError::Failed { stderr, .. }) => format!(
                "The file could not be converted to audio the recognizer can read: {stderr}"
            ),
            RunError::Normalization(error) => format!("Audio conversion failed: {error}"),
            RunError::Backend(error) if error.is_retries_exhausted() => format!(
                "The transcription service is still unavailable after several retries ({error}). \
                 Wait a few minutes and try again, and check your account quota and billing."
            ),
            RunError::Backend(error) => format!("Transcription failed: {error}"),
        }
    }
}

/// A run that passed [`Pipeline::prepare`] and holds the session.
#[derive(Debug)]
pub struct PendingRun {
    guard: RunGuard,
    upload: UploadedAudio,
    signature: FileSignature,
}

impl PendingRun {
    pub fn signature(&self) -> FileSignature {
        self.signature
    }
}

#[derive(Debug)]
pub enum Prepared {
    Run(PendingRun),
    Skip(SkipReason),
}

/// Result of a run that reached the backend and succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct Completed {
    pub result: TranscriptionResult,
    pub signature: FileSignature,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(Completed),
    Skipped(SkipReason),
}

/// Stages, normalizes and transcribes uploads with backend `T`.
pub struct Pipeline<T = Backend> {
    transcriber: Arc<T>,
    stager: Stager,
    normalizer: Option<Normalizer>,
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            transcriber: Arc::clone(&self.transcriber),
            stager: self.stager.clone(),
            normalizer: self.normalizer.clone(),
        }
    }
}

impl<T: Transcriber> Pipeline<T> {
    pub fn new(
        transcriber: Arc<T>,
        stager: Stager,
        normalizer: Option<Normalizer>,
    ) -> Self {
        Self {
            transcriber,
            stager,
            normalizer,
        }
    }

    pub fn from_config(config: &Config, transcriber: Arc<T>) -> Self {
        let stager = config
            .storage
            .temp_dir
            .as_ref()
            .map(Stager::new)
            .unwrap_or_default();
        let normalizer = config
            .normalize
            .enabled
            .then(|| Normalizer::new(&config.normalize.ffmpeg, stager.clone()));
        Self::new(transcriber, stager, normalizer)
    }

    pub fn transcriber(&self) -> &T {
        &self.transcriber
    }

    /// Check the size ceiling and claim the session.
    pub fn prepare(
        &self,
        session: &Session,
        upload: UploadedAudio,
        trigger: Trigger,
        max_upload_mb: u32,
    ) -> Result<Prepared, RunError> {
        if upload.size() > u64::from(max_upload_mb) * BYTES_PER_MB {
            info!(
                session = %session.id(),
                size_mb = upload.size_mb(),
                limit_mb = max_upload_mb,
                "Upload rejected: too large"
            );
            return Err(RunError::TooLarge {
                size_mb: upload.size_mb(),
                limit_mb: max_upload_mb,
            });
        }

        let signature = FileSignature::of(&upload);
        match session.begin(signature, trigger)? {
            RunDecision::Run(guard) => Ok(Prepared::Run(PendingRun {
                guard,
                upload,
                signature,
            })),
            RunDecision::Skip(reason) => Ok(Prepared::Skip(reason)),
        }
    }

    /// Run a prepared upload to completion. The session is released on every
    /// exit path; the transcript is stored only on success.
    pub async fn execute(
        &self,
        run: PendingRun,
        request: &TranscriptionRequest,
        progress: &ProgressSink,
    ) -> Result<Completed, RunError> {
        let PendingRun {
            guard,
            upload,
            signature,
        } = run;
        let session = guard.session();
        info!(
            %session,
            file = upload.name(),
            mime_type = upload.mime_type(),
            bytes = upload.size(),
            %signature,
            backend = self.transcriber.name(),
            "Starting transcription"
        );

        progress.stage("Staging upload");
        let stager = self.stager.clone();
        let staged = tokio::task::spawn_blocking(move || stager.stage(&upload))
            .await
            .map_err(|e| RunError::Staging(anyhow::Error::new(e)))?
            .map_err(RunError::Staging)?;

        let normalized = match &self.normalizer {
            Some(normalizer) => {
                progress.stage("Normalizing audio");
                Some(normalizer.normalize(staged.path()).await?)
            }
            None => None,
        };
        let input = normalized.as_ref().map_or(staged.path(), StagedFile::path);

        let result = self.transcriber.transcribe(input, request, progress).await;

        if let Some(normalized) = normalized {
            normalized.release();
        }
        staged.release();

        let result = result.inspect_err(|error| {
            warn!(%session, error = %error, "Transcription failed");
        })?;

        debug!(%session, chars = result.text.len(), "Transcription finished");
        guard.complete(result.text.clone());
        Ok(Completed { result, signature })
    }

    /// [`prepare`](Self::prepare) followed by [`execute`](Self::execute).
    pub async fn run(
        &self,
        session: &Session,
        upload: UploadedAudio,
        trigger: Trigger,
        request: &TranscriptionRequest,
        max_upload_mb: u32,
        progress: &ProgressSink,
    ) -> Result<RunOutcome, RunError> {
        match self.prepare(session, upload, trigger, max_upload_mb)? {
            Prepared::Skip(reason) => Ok(RunOutcome::Skipped(reason)),
            Prepared::Run(pending) => self
                .execute(pending, request, progress)
                .await
                .map(RunOutcome::Completed),
        }
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod tests;
