//! `transcribe` and `watch` commands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use scribe_common::client::{MAX_UPLOAD_MB, connect};
use scribe_proto::scribe_client::ScribeClient;
use scribe_proto::transcribe_event::Event;
use scribe_proto::{
    Completed, Failed, OpenSessionRequest, SessionRef, Skipped, TranscribeRequest, Trigger,
};
use tonic::transport::Channel;
use tracing::{debug, warn};

use crate::RunOptions;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Terminal event of one run.
#[derive(Debug)]
enum RunResult {
    Completed(Completed),
    Skipped(Skipped),
    Failed(Failed),
}

fn mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("ogg" | "oga" | "opus") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("webm") => "audio/webm",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Where to write the transcript: into `output` when it is a directory,
/// otherwise to `output` itself.
fn transcript_destination(output: &Path, file_name: &str) -> PathBuf {
    if output.is_dir() {
        output.join(file_name)
    } else {
        output.to_path_buf()
    }
}

/// Read `file`, refusing it before reading when it exceeds `limit_mb`.
async fn read_upload(file: &Path, limit_mb: u32) -> Result<Vec<u8>> {
    let size = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?
        .len();
    if size > u64::from(limit_mb) * BYTES_PER_MB {
        anyhow::bail!(
            "File is too large: {:.1} MB. Limit: {limit_mb} MB.",
            size as f64 / BYTES_PER_MB as f64
        );
    }
    tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))
}

async fn connect_running(socket: &Path) -> Result<ScribeClient<Channel>> {
    connect(socket)
        .await
        .context("Daemon is not running; start it with `scribectl start`")
}

async fn submit(
    client: &mut ScribeClient<Channel>,
    session_id: &str,
    file: &Path,
    options: &RunOptions,
    trigger: Trigger,
) -> Result<RunResult> {
    let limit_mb = options.max_mb.unwrap_or(MAX_UPLOAD_MB).min(MAX_UPLOAD_MB);
    let audio = read_upload(file, limit_mb).await?;
    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let request = TranscribeRequest {
        session_id: session_id.to_string(),
        file_name,
        mime_type: mime_type(file).to_string(),
        audio,
        trigger: trigger.into(),
        options: Some(options.to_proto()),
    };

    let mut stream = client.transcribe(request).await?.into_inner();
    while let Some(update) = stream.message().await? {
        match update.event {
            Some(Event::Stage(stage)) => eprintln!("... {}", stage.message),
            Some(Event::Retry(retry)) => eprintln!(
                "Retry {}/{} in {:.1}s: {}",
                retry.attempt,
                retry.max_retries,
                Duration::from_millis(retry.wait_ms).as_secs_f32(),
                retry.reason
            ),
            Some(Event::Completed(done)) => return Ok(RunResult::Completed(done)),
            Some(Event::Skipped(skipped)) => return Ok(RunResult::Skipped(skipped)),
            Some(Event::Failed(failed)) => return Ok(RunResult::Failed(failed)),
            None => {}
        }
    }
    anyhow::bail!("Daemon closed the stream without a result")
}

async fn close(client: &mut ScribeClient<Channel>, session_id: &str) {
    let request = SessionRef {
        session_id: session_id.to_string(),
    };
    if let Err(e) = client.close_session(request).await {
        debug!(error = %e, "Failed to close session");
    }
}

pub async fn transcribe(
    socket: &Path,
    file: &Path,
    options: &RunOptions,
    output: Option<&Path>,
) -> Result<()> {
    let mut client = connect_running(socket).await?;
    let session = client
        .open_session(OpenSessionRequest {
            auto_run: Some(false),
        })
        .await?
        .into_inner();

    let result = submit(&mut client, &session.session_id, file, options, Trigger::Manual).await;
    let outcome = match result {
        Ok(RunResult::Completed(done)) => {
            if let Some(language) = &done.language {
                eprintln!("Language: {language}");
            }
            println!("{}", done.text);
            match output {
                Some(output) => save_transcript(&mut client, &session.session_id, output).await,
                None => Ok(()),
            }
        }
        Ok(RunResult::Failed(failed)) => Err(anyhow::anyhow!(failed.message)),
        Ok(RunResult::Skipped(skipped)) => {
            debug!(?skipped, "Manual run skipped");
            Ok(())
        }
        Err(e) => Err(e),
    };

    close(&mut client, &session.session_id).await;
    outcome
}

async fn save_transcript(
    client: &mut ScribeClient<Channel>,
    session_id: &str,
    output: &Path,
) -> Result<()> {
    let transcript = client
        .get_transcript(SessionRef {
            session_id: session_id.to_string(),
        })
        .await?
        .into_inner();
    let path = transcript_destination(output, &transcript.file_name);
    tokio::fs::write(&path, transcript.text)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    eprintln!("Saved {}", path.display());
    Ok(())
}

pub async fn watch(
    socket: &Path,
    file: &Path,
    options: &RunOptions,
    interval: Duration,
) -> Result<()> {
    let mut client = connect_running(socket).await?;
    let session = client
        .open_session(OpenSessionRequest {
            auto_run: Some(true),
        })
        .await?
        .into_inner();
    eprintln!("Watching {} (Ctrl+C to stop)", file.display());

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }

        match submit(&mut client, &session.session_id, file, options, Trigger::Auto).await {
            Ok(RunResult::Completed(done)) => {
                println!("--- {}", file.display());
                println!("{}", done.text);
            }
            Ok(RunResult::Skipped(_)) => debug!("Unchanged, skipped"),
            Ok(RunResult::Failed(failed)) => eprintln!("{}", failed.message),
            Err(e) => warn!(error = %e, "Run failed"),
        }
    }

    close(&mut client, &session.session_id).await;
    Ok(())
}
