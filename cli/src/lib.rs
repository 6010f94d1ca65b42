//! `scribectl`: manage the audio-scribe daemon and transcribe files through it.

mod daemon;
mod transcribe;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "scribectl")]
#[command(about = "audio-scribe CLI - transcribe audio files with a local or hosted backend")]
#[command(version)]
struct Cli {
    /// Daemon socket (defaults to the XDG state directory)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the transcription daemon in the background
    Start,
    /// Stop the transcription daemon
    Stop,
    /// Show daemon status
    Status,
    /// Transcribe one audio file
    Transcribe {
        file: PathBuf,
        #[command(flatten)]
        options: RunOptions,
        /// Write the transcript to this file, or into this directory as transcript.txt
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Re-submit a file on every change and print each new transcript
    Watch {
        file: PathBuf,
        #[command(flatten)]
        options: RunOptions,
        /// Poll interval in seconds
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
}

/// Per-run overrides of the daemon configuration.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct RunOptions {
    /// Language code, or "auto" to detect
    #[arg(short, long)]
    pub language: Option<String>,
    /// Local model name, e.g. "small" or "whisper-large-v3-turbo"
    #[arg(short, long)]
    pub model: Option<String>,
    #[arg(long, value_enum)]
    pub precision: Option<PrecisionArg>,
    /// Beam width; 1 selects greedy decoding
    #[arg(long)]
    pub beam_size: Option<u32>,
    /// Keep silent stretches instead of filtering them out
    #[arg(long)]
    pub no_vad: bool,
    /// Upload ceiling in MB (1-200)
    #[arg(long)]
    pub max_mb: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PrecisionArg {
    Full,
    Int8,
}

impl RunOptions {
    fn to_proto(&self) -> scribe_proto::TranscribeOptions {
        let precision = match self.precision {
            None => scribe_proto::Precision::Unspecified,
            Some(PrecisionArg::Full) => scribe_proto::Precision::Full,
            Some(PrecisionArg::Int8) => scribe_proto::Precision::Int8,
        };
        scribe_proto::TranscribeOptions {
            language: self.language.clone(),
            model: self.model.clone(),
            precision: precision.into(),
            beam_size: self.beam_size,
            vad_filter: self.no_vad.then_some(false),
            max_upload_mb: self.max_mb,
        }
    }
}

/// Entry point for the CLI binary.
pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let socket = match cli.socket {
        Some(path) => path,
        None => scribe_common::dirs::socket_path()?,
    };

    match cli.command {
        Commands::Start => daemon::start(&socket).await,
        Commands::Stop => daemon::stop(&socket).await,
        Commands::Status => daemon::status(&socket).await,
        Commands::Transcribe {
            file,
            options,
            output,
        } => transcribe::transcribe(&socket, &file, &options, output.as_deref()).await,
        Commands::Watch {
            file,
            options,
            interval,
        } => {
            transcribe::watch(&socket, &file, &options, Duration::from_secs(interval.max(1)))
                .await
        }
    }
}
