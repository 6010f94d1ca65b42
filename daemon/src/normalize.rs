//! Audio normalization through an external transcoder.
//!
//! Converts arbitrary input audio to 16 kHz mono 16-bit PCM WAV with ffmpeg.
//! A failed conversion is final for the run: the same command on the same
//! input will fail the same way.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::audio::TARGET_SAMPLE_RATE;
use crate::staging::{StagedFile, Stager};

/// Maximum number of stderr bytes kept in error messages.
const STDERR_LIMIT: usize = 2048;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("audio transcoder `{program}` was not found; install ffmpeg or set normalize.ffmpeg")]
    NotFound { program: String },
    #[error("audio transcoder exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("audio transcoder I/O error: {0}")]
    Io(#[source] anyhow::Error),
}

/// Runs ffmpeg to produce canonical WAV artifacts.
#[derive(Debug, Clone)]
pub struct Normalizer {
    program: PathBuf,
    stager: Stager,
}

impl Normalizer {
    pub fn new(program: impl Into<PathBuf>, stager: Stager) -> Self {
        Self {
            program: program.into(),
            stager,
        }
    }

    /// Convert `input` into a new staged WAV file owned by the caller.
    pub async fn normalize(&self, input: &Path) -> Result<StagedFile, NormalizeError> {
        let output = self
            .stager
            .reserve(".wav")
            .map_err(NormalizeError::Io)?;

        let args = ffmpeg_args(input, output.path());
        debug!(program = %self.program.display(), ?args, "Running audio transcoder");

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    NormalizeError::NotFound {
                        program: self.program.display().to_string(),
                    }
                } else {
                    NormalizeError::Io(anyhow::Error::new(e).context("Failed to run transcoder"))
                }
            })?;

        if !result.status.success() {
            return Err(NormalizeError::Failed {
                status: result.status.to_string(),
                stderr: truncate_stderr(&result.stderr),
            });
        }

        info!(
            input = %input.display(),
            output = %output.path().display(),
            "Audio normalized"
        );
        Ok(output)
    }
}

/// Arguments for a 16 kHz mono PCM conversion that overwrites `output`.
pub fn ffmpeg_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-nostdin".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-ac".to_string(),
        "1".to_string(),
        "-ar".to_string(),
        TARGET_SAMPLE_RATE.to_string(),
        "-c:a".to_string(),
        "pcm_s16le".to_string(),
        output.display().to_string(),
    ]
}

fn truncate_stderr(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_LIMIT {
        return text.to_string();
    }
    let mut end = STDERR_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
#[path = "normalize_test.rs"]
mod tests;
