pub mod audio;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod daemon;
pub mod model_cache;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod retry;
pub mod server;
pub mod session;
pub mod signature;
pub mod socket;
pub mod staging;
pub mod transcribe;
pub mod upload;
pub mod vad;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{BackendKind, Config};
use crate::daemon::DaemonPaths;
use crate::transcribe::Backend;

/// Application-specific environment variable for log filtering (overrides config).
const LOG_ENV_VAR: &str = "SCRIBE_LOG";

/// Entry point for the daemon process: configures logging and launches the daemon.
pub async fn run() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    let log_path = socket::log_path().context("Failed to determine log path")?;
    let log_dir = log_path
        .parent()
        .context("Log path has no parent directory")?;
    let log_filename = log_path.file_name().context("Log path has no file name")?;
    std::fs::create_dir_all(log_dir).context("Failed to create log directory")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_filename);
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // SCRIBE_LOG env var overrides config file level
    let filter = EnvFilter::builder()
        .with_env_var(LOG_ENV_VAR)
        .with_default_directive(config.logging.level.as_directive().parse()?)
        .from_env()?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(filter)
        .init();

    // Route whisper.cpp and GGML logs through tracing
    whisper_rs::install_logging_hooks();

    let api_key = match config.backend.kind {
        BackendKind::Remote => Some(credentials::load_api_key(&config.remote)?),
        BackendKind::Local => None,
    };
    let backend = Backend::from_config(&config, api_key)?;

    daemon::run_with(DaemonPaths::from_xdg()?, config, backend).await
}
