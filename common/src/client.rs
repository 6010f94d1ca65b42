//! gRPC client for communicating with the audio-scribe daemon.

use std::path::Path;

use anyhow::{Context, Result};
use hyper_util::rt::TokioIo;
use scribe_proto::scribe_client::ScribeClient;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;

/// Hard upload ceiling in MiB, whatever the configured limit.
pub const MAX_UPLOAD_MB: u32 = 200;

/// Largest message the client will send: the upload ceiling plus framing
/// headroom.
pub const MAX_MESSAGE_BYTES: usize = (MAX_UPLOAD_MB as usize + 1) * 1024 * 1024;

/// Connect to daemon via Unix socket.
pub async fn connect(socket_path: impl AsRef<Path>) -> Result<ScribeClient<Channel>> {
    let socket_path = socket_path.as_ref().to_path_buf();

    // The URI is ignored by the connector; tonic only needs a well-formed one.
    let channel = Endpoint::try_from("http://[::]:50051")?
        .connect_with_connector(service_fn(move |_: Uri| {
            let path = socket_path.clone();
            async move {
                let stream = UnixStream::connect(path).await?;
                Ok::<_, std::io::Error>(TokioIo::new(stream))
            }
        }))
        .await
        .context("Failed to connect to daemon")?;

    Ok(ScribeClient::new(channel)
        .max_encoding_message_size(MAX_MESSAGE_BYTES)
        .max_decoding_message_size(MAX_MESSAGE_BYTES))
}

/// Check if daemon is running by attempting to connect.
pub async fn is_daemon_running(socket_path: impl AsRef<Path>) -> bool {
    let socket_path = socket_path.as_ref();
    if !socket_path.exists() {
        return false;
    }
    connect(socket_path).await.is_ok()
}
