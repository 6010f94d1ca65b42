//! gRPC service: sessions, streamed transcription runs, transcript download.

use std::pin::Pin;
use std::sync::Arc;

use scribe_common::client::MAX_MESSAGE_BYTES;
use scribe_proto::{
    self as proto, Empty, OpenSessionRequest, SessionInfo, SessionRef, TranscribeEvent,
    TranscribeRequest, Transcript,
    scribe_server::{Scribe, ScribeServer},
    transcribe_event::Event,
};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{MAX_UPLOAD_MB, MIN_UPLOAD_MB, Precision, SpeechModel, normalize_language};
use crate::controller::Controller;
use crate::pipeline::{Completed, Prepared, RunError};
use crate::session::{SessionError, SessionId, SkipReason, Trigger};
use crate::transcribe::{Backend, ProgressEvent, ProgressSink, Transcriber, TranscriptionRequest};
use crate::upload::UploadedAudio;

/// Name of the transcript download artifact.
pub const TRANSCRIPT_FILE_NAME: &str = "transcript.txt";
pub const TRANSCRIPT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Buffered events per transcription stream.
const EVENT_BUFFER: usize = 32;

/// gRPC service implementation.
pub struct ScribeService<T = Backend> {
    controller: Arc<Controller<T>>,
}

impl<T: Transcriber + 'static> ScribeService<T> {
    pub fn new(controller: Arc<Controller<T>>) -> Self {
        Self { controller }
    }

    /// Create the tonic server with message limits above the largest upload.
    pub fn into_server(self) -> ScribeServer<Self> {
        ScribeServer::new(self)
            .max_decoding_message_size(MAX_MESSAGE_BYTES)
            .max_encoding_message_size(MAX_MESSAGE_BYTES)
    }
}

fn parse_session_id(raw: &str) -> Result<SessionId, Status> {
    Uuid::parse_str(raw).map_err(|_| Status::invalid_argument(format!("invalid session id: {raw}")))
}

fn session_status(error: SessionError) -> Status {
    match error {
        SessionError::Busy => Status::failed_precondition(error.to_string()),
        SessionError::NotFound(_) => Status::not_found(error.to_string()),
    }
}

/// Apply per-call overrides to the configured defaults. Returns the request
/// and the upload ceiling in MiB.
pub fn resolve_request(
    mut request: TranscriptionRequest,
    default_max_upload_mb: u32,
    options: &proto::TranscribeOptions,
) -> Result<(TranscriptionRequest, u32), Status> {
    if let Some(language) = &options.language {
        request.language = normalize_language(language);
    }
    if let Some(model) = &options.model {
        request.model = SpeechModel::parse(model)
            .ok_or_else(|| Status::invalid_argument(format!("unknown model: {model}")))?;
    }
    match options.precision() {
        proto::Precision::Unspecified => {}
        proto::Precision::Full => request.precision = Precision::Full,
        proto::Precision::Int8 => request.precision = Precision::Int8,
    }
    if let Some(beam_size) = options.beam_size {
        request.beam_size = beam_size;
    }
    if let Some(vad_filter) = options.vad_filter {
        request.vad_filter = vad_filter;
    }

    let max_upload_mb = options.max_upload_mb.unwrap_or(default_max_upload_mb);
    if !(MIN_UPLOAD_MB..=MAX_UPLOAD_MB).contains(&max_upload_mb) {
        return Err(Status::invalid_argument(format!(
            "max_upload_mb must be between {MIN_UPLOAD_MB} and {MAX_UPLOAD_MB}, got {max_upload_mb}"
        )));
    }
    Ok((request, max_upload_mb))
}

fn event(event: Event) -> TranscribeEvent {
    TranscribeEvent { event: Some(event) }
}

fn progress_event(progress: ProgressEvent) -> TranscribeEvent {
    match progress {
        ProgressEvent::Stage(message) => event(Event::Stage(proto::StageUpdate { message })),
        ProgressEvent::Retry(notice) => event(Event::Retry(proto::RetryNotice {
            attempt: notice.attempt,
            max_retries: notice.max_retries,
            wait_ms: notice.wait.as_millis() as u64,
            reason: notice.reason,
        })),
    }
}

fn skipped_event(reason: SkipReason) -> TranscribeEvent {
    let (reason, last_transcript) = match reason {
        SkipReason::Unchanged { last_transcript } => {
            (proto::skipped::Reason::Unchanged, last_transcript)
        }
        SkipReason::AutoRunDisabled => (proto::skipped::Reason::AutoRunDisabled, None),
    };
    event(Event::Skipped(proto::Skipped {
        reason: reason.into(),
        last_transcript,
    }))
}

fn completed_event(completed: Completed) -> TranscribeEvent {
    event(Event::Completed(proto::Completed {
        text: completed.result.text,
        language: completed.result.language,
        language_probability: completed.result.language_probability,
        signature: completed.signature.to_string(),
    }))
}

fn failed_event(error: &RunError) -> TranscribeEvent {
    use proto::failed::Kind;

    let kind = match error {
        RunError::TooLarge { .. } => Kind::TooLarge,
        RunError::Normalization(_) => Kind::Normalization,
        RunError::Backend(e) if e.is_retries_exhausted() => Kind::RetriesExhausted,
        RunError::Backend(_) => Kind::Backend,
        RunError::Session(_) | RunError::Staging(_) => Kind::Internal,
    };
    event(Event::Failed(proto::Failed {
        kind: kind.into(),
        message: error.user_message(),
    }))
}

type EventStream = Pin<Box<dyn Stream<Item = Result<TranscribeEvent, Status>> + Send>>;

fn single(event: TranscribeEvent) -> EventStream {
    Box::pin(tokio_stream::iter([Ok::<_, Status>(event)]))
}

#[tonic::async_trait]
impl<T: Transcriber + 'static> Scribe for ScribeService<T> {
    async fn open_session(
        &self,
        request: Request<OpenSessionRequest>,
    ) -> Result<Response<SessionInfo>, Status> {
        let session = self
            .controller
            .open_session(request.into_inner().auto_run)
            .await;
        Ok(Response::new(SessionInfo {
            session_id: session.id().to_string(),
            auto_run: session.snapshot().auto_run,
        }))
    }

    async fn close_session(&self, request: Request<SessionRef>) -> Result<Response<Empty>, Status> {
        let id = parse_session_id(&request.into_inner().session_id)?;
        self.controller
            .close_session(id)
            .await
            .map_err(session_status)?;
        Ok(Response::new(Empty {}))
    }

    type TranscribeStream = EventStream;

    async fn transcribe(
        &self,
        request: Request<TranscribeRequest>,
    ) -> Result<Response<Self::TranscribeStream>, Status> {
        let req = request.into_inner();
        let id = parse_session_id(&req.session_id)?;
        let session = self
            .controller
            .session(id)
            .await
            .map_err(session_status)?;

        let trigger = match req.trigger() {
            proto::Trigger::Manual => Trigger::Manual,
            proto::Trigger::Auto => Trigger::Auto,
        };
        let options = req.options.clone().unwrap_or_default();
        let (run_request, max_upload_mb) = resolve_request(
            self.controller.default_request(),
            self.controller.config().limits.max_upload_mb,
            &options,
        )?;

        let upload = UploadedAudio::new(req.audio, req.file_name, req.mime_type);
        let pipeline = self.controller.pipeline().clone();

        let pending = match pipeline.prepare(&session, upload, trigger, max_upload_mb) {
            Ok(Prepared::Run(pending)) => pending,
            Ok(Prepared::Skip(reason)) => {
                debug!(session = %id, ?reason, "Run skipped");
                return Ok(Response::new(single(skipped_event(reason))));
            }
            Err(RunError::Session(e)) => return Err(session_status(e)),
            Err(e) => return Ok(Response::new(single(failed_event(&e)))),
        };

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            let (sink, mut progress) = ProgressSink::channel();
            let run = tokio::spawn(async move {
                pipeline.execute(pending, &run_request, &sink).await
            });

            // Keep draining after a disconnect so the run is not stalled.
            while let Some(update) = progress.recv().await {
                let _ = tx.send(Ok(progress_event(update))).await;
            }

            let last = match run.await {
                Ok(Ok(completed)) => completed_event(completed),
                Ok(Err(e)) => failed_event(&e),
                Err(e) => {
                    warn!(session = %id, error = %e, "Transcription task failed");
                    event(Event::Failed(proto::Failed {
                        kind: proto::failed::Kind::Internal.into(),
                        message: "Transcription stopped unexpectedly.".to_string(),
                    }))
                }
            };
            if tx.send(Ok(last)).await.is_err() {
                debug!(session = %id, "Client went away before the result");
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn get_transcript(
        &self,
        request: Request<SessionRef>,
    ) -> Result<Response<Transcript>, Status> {
        let id = parse_session_id(&request.into_inner().session_id)?;
        let session = self
            .controller
            .session(id)
            .await
            .map_err(session_status)?;
        let text = session
            .last_transcript()
            .ok_or_else(|| Status::not_found("no transcript in this session yet"))?;
        Ok(Response::new(Transcript {
            text,
            file_name: TRANSCRIPT_FILE_NAME.to_string(),
            content_type: TRANSCRIPT_CONTENT_TYPE.to_string(),
        }))
    }

    async fn get_status(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<proto::Status>, Status> {
        let report = self.controller.status().await;
        Ok(Response::new(proto::Status {
            ready: report.ready,
            backend: report.backend.to_string(),
            sessions: report.sessions as u32,
            busy_sessions: report.busy_sessions as u32,
        }))
    }

    async fn shutdown(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.controller.shutdown().await;
        Ok(Response::new(Empty {}))
    }
}

#[cfg(test)]
#[path = "server_test.rs"]
mod tests;
