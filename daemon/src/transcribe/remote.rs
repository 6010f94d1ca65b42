//! Hosted transcription API backend (OpenAI-compatible `/audio/transcriptions`).

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{StatusCode, multipart};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::{
    ProgressSink, TranscribeError, Transcriber, TranscriptionRequest, TranscriptionResult,
    join_segments,
};
use crate::config::RemoteConfig;
use crate::retry::{self, FailureClass, RetryPolicy, Retryable};
use crate::upload::mime_type_for;

/// Failure of one request to the hosted API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("{0}")]
    Fatal(String),
}

impl Retryable for RemoteError {
    fn class(&self) -> FailureClass {
        match self {
            RemoteError::RateLimited { .. } => FailureClass::RateLimited,
            RemoteError::Timeout(_) | RemoteError::Server { .. } => FailureClass::Transient,
            RemoteError::Fatal(_) => FailureClass::Fatal,
        }
    }

    fn retry_hint(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Map a non-success HTTP status to an error.
pub fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    message: String,
) -> RemoteError {
    match status.as_u16() {
        429 => RemoteError::RateLimited {
            retry_after,
            message,
        },
        408 => RemoteError::Timeout(message),
        500 | 502 | 503 | 504 => RemoteError::Server {
            status: status.as_u16(),
            message,
        },
        code => RemoteError::Fatal(format!("HTTP {code}: {message}")),
    }
}

/// Map a transport-level failure to an error.
fn classify_transport(error: &reqwest::Error) -> RemoteError {
    if error.is_timeout() || error.is_connect() {
        RemoteError::Timeout(error.to_string())
    } else {
        RemoteError::Fatal(format!("request failed: {error}"))
    }
}

/// `Retry-After` in its delay-seconds form. HTTP dates are ignored. Values
/// too large for a `Duration` saturate; the backoff ceiling caps them later.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX))
}

/// Best-effort human message from an error body.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: Detail,
    }
    #[derive(Deserialize)]
    struct Detail {
        message: String,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) if body.trim().is_empty() => "no response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// `response_format=verbose_json` payload.
#[derive(Debug, Deserialize)]
pub(crate) struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    #[serde(default)]
    text: String,
}

impl VerboseTranscription {
    pub(crate) fn into_result(self) -> TranscriptionResult {
        let text = if self.segments.is_empty() {
            join_segments(self.text.lines())
        } else {
            join_segments(self.segments.iter().map(|segment| segment.text.as_str()))
        };
        TranscriptionResult {
            text,
            language: self.language,
            language_probability: None,
        }
    }
}

/// Client for the hosted transcription API.
pub struct RemoteTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    policy: RetryPolicy,
}

impl RemoteTranscriber {
    pub fn new(config: &RemoteConfig, api_key: String, policy: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            policy,
        })
    }

    /// One request, no retries.
    async fn send(
        &self,
        audio: Vec<u8>,
        file_name: &str,
        mime_type: &str,
        request: &TranscriptionRequest,
    ) -> Result<TranscriptionResult, RemoteError> {
        let url = format!("{}/audio/transcriptions", self.base_url);

        let file_part = multipart::Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .map_err(|e| RemoteError::Fatal(format!("mime: {e}")))?;

        let mut form = multipart::Form::new()
            .text("model", request.remote_model.clone())
            .text("response_format", "verbose_json")
            .part("file", file_part);
        if let Some(language) = &request.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, error_message(&body)));
        }

        let payload: VerboseTranscription = response
            .json()
            .await
            .map_err(|e| RemoteError::Fatal(format!("invalid response body: {e}")))?;
        Ok(payload.into_result())
    }
}

#[tonic::async_trait]
impl Transcriber for RemoteTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        request: &TranscriptionRequest,
        progress: &ProgressSink,
    ) -> Result<TranscriptionResult, TranscribeError> {
        let bytes = tokio::fs::read(audio)
            .await
            .map_err(|e| RemoteError::Fatal(format!("failed to read {}: {e}", audio.display())))?;
        let file_name = audio
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("audio.wav")
            .to_string();
        let mime_type = mime_type_for(audio);

        debug!(
            model = %request.remote_model,
            bytes = bytes.len(),
            mime_type,
            "Sending audio to transcription API"
        );
        progress.stage("Uploading to transcription API");

        let result = retry::call_with_retry(
            &self.policy,
            |_attempt| self.send(bytes.clone(), &file_name, mime_type, request),
            |notice| progress.retry(notice),
        )
        .await?;

        info!(chars = result.text.len(), "Remote transcription completed");
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
#[path = "remote_test.rs"]
mod tests;
