//! Run one file through the transcription pipeline without the daemon.
//!
//! Run with: cargo run -p scribe-daemon --example transcribe_file -- <audio-file>
//!
//! Uses the backend, model and language from the config file. Set RUST_LOG
//! for tracing output:
//!   RUST_LOG=info  - model loading and stage timing
//!   RUST_LOG=debug - staging, normalization and VAD details

use std::sync::Arc;

use anyhow::Context;
use scribe_daemon::config::{BackendKind, Config};
use scribe_daemon::credentials::load_api_key;
use scribe_daemon::pipeline::{Pipeline, RunOutcome};
use scribe_daemon::session::{Session, Trigger};
use scribe_daemon::transcribe::{Backend, ProgressEvent, ProgressSink, TranscriptionRequest};
use scribe_daemon::upload::UploadedAudio;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: transcribe_file <audio-file>")?;
    let bytes = std::fs::read(&path).with_context(|| format!("Failed to read {path}"))?;

    let config = Config::load()?;
    let api_key = match config.backend.kind {
        BackendKind::Remote => Some(load_api_key(&config.remote)?),
        BackendKind::Local => None,
    };
    let backend = Backend::from_config(&config, api_key)?;
    let pipeline = Pipeline::from_config(&config, Arc::new(backend));
    let request = TranscriptionRequest::from_config(&config);

    println!("Backend: {}", config.backend.kind.as_str());
    println!("Model: {:?} ({:?})", request.model, request.precision);
    println!();

    let (progress, mut updates) = ProgressSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            match update {
                ProgressEvent::Stage(message) => println!("... {message}"),
                ProgressEvent::Retry(notice) => println!(
                    "... retry {}/{} in {:.1}s: {}",
                    notice.attempt,
                    notice.max_retries,
                    notice.wait.as_secs_f32(),
                    notice.reason
                ),
            }
        }
    });

    let session = Session::new(false);
    let upload = UploadedAudio::new(bytes, path, "");
    let outcome = pipeline
        .run(
            &session,
            upload,
            Trigger::Manual,
            &request,
            config.limits.max_upload_mb,
            &progress,
        )
        .await;
    drop(progress);
    printer.await?;

    match outcome {
        Ok(RunOutcome::Completed(done)) => {
            println!();
            if let Some(language) = &done.result.language {
                println!("Language: {language}");
            }
            println!("{}", done.result.text);
        }
        Ok(RunOutcome::Skipped(reason)) => println!("Skipped: {reason:?}"),
        Err(e) => eprintln!("{}", e.user_message()),
    }
    Ok(())
}
