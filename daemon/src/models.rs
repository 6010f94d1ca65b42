//! Model download and management.
//!
//! Local transcription needs a whisper.cpp weight file and, with silence
//! filtering on, the Silero VAD model. Both are fetched on first use.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::config::{Config, Precision, SpeechModel};

const WHISPER_BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";
const SILERO_VAD_URL: &str =
    "https://github.com/snakers4/silero-vad/raw/master/src/silero_vad/data/silero_vad.onnx";

/// Identifier for downloadable models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelId {
    /// Silero VAD model for silence filtering.
    SileroVad,
    /// A whisper.cpp weight file.
    Whisper {
        model: SpeechModel,
        precision: Precision,
    },
}

impl ModelId {
    pub fn whisper(model: SpeechModel, precision: Precision) -> Self {
        ModelId::Whisper { model, precision }
    }

    /// File name on disk, e.g. `ggml-small-q8_0.bin`.
    pub fn filename(&self) -> String {
        match self {
            ModelId::SileroVad => "silero_vad.onnx".to_string(),
            ModelId::Whisper { model, precision } => match precision {
                Precision::Full => format!("ggml-{}.bin", model.ggml_name()),
                Precision::Int8 => format!("ggml-{}-q8_0.bin", model.ggml_name()),
            },
        }
    }

    fn info(&self) -> ModelInfo {
        let filename = self.filename();
        match self {
            ModelId::SileroVad => ModelInfo {
                url: SILERO_VAD_URL.to_string(),
                size_bytes: Some(2_327_524),
                filename,
            },
            ModelId::Whisper { model, precision } => ModelInfo {
                url: format!("{WHISPER_BASE_URL}/{filename}"),
                size_bytes: match precision {
                    Precision::Full => Some(full_precision_size(*model)),
                    // Quantized files are re-published often; skip the size check.
                    Precision::Int8 => None,
                },
                filename,
            },
        }
    }
}

/// Published sizes of the full-precision ggml files.
fn full_precision_size(model: SpeechModel) -> u64 {
    match model {
        SpeechModel::WhisperTiny => 77_691_713,
        SpeechModel::WhisperTinyEn => 77_704_715,
        SpeechModel::WhisperBase => 147_951_465,
        SpeechModel::WhisperBaseEn => 147_964_211,
        SpeechModel::WhisperSmall => 487_601_967,
        SpeechModel::WhisperSmallEn => 487_614_201,
        SpeechModel::WhisperMedium | SpeechModel::WhisperMediumEn => 1_533_774_781,
        SpeechModel::WhisperLargeV3Turbo => 1_624_592_891,
    }
}

/// Metadata for a downloadable model.
struct ModelInfo {
    filename: String,
    url: String,
    /// Expected file size, when it is stable enough to validate against.
    size_bytes: Option<u64>,
}

/// On-disk state of a model file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    Missing,
    Ready(PathBuf),
    Corrupted {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}

/// Manages model downloads and storage.
#[derive(Debug, Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Create a new ModelManager using the default models directory.
    ///
    /// Default: `~/.local/share/audio-scribe/models/`
    pub fn new() -> Result<Self> {
        Ok(Self {
            models_dir: Config::models_dir()?,
        })
    }

    /// Create a ModelManager with a custom models directory.
    pub fn with_dir(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn model_path(&self, model: ModelId) -> PathBuf {
        self.models_dir.join(model.filename())
    }

    /// Inspect a model file without downloading anything.
    pub async fn check_model(&self, model: ModelId) -> ModelStatus {
        let info = model.info();
        let path = self.models_dir.join(&info.filename);

        let Ok(metadata) = fs::metadata(&path).await else {
            return ModelStatus::Missing;
        };

        match info.size_bytes {
            Some(expected) if metadata.len() != expected => ModelStatus::Corrupted {
                path,
                expected,
                actual: metadata.len(),
            },
            _ => ModelStatus::Ready(path),
        }
    }

    /// Ensure a model is available, downloading if necessary.
    ///
    /// Returns the path to the model file.
    pub async fn ensure_model(&self, model: ModelId) -> Result<PathBuf> {
        match self.check_model(model).await {
            ModelStatus::Ready(path) => {
                debug!(path = %path.display(), "Model already exists");
                return Ok(path);
            }
            ModelStatus::Corrupted {
                path,
                expected,
                actual,
            } => {
                warn!(
                    model = ?model,
                    expected,
                    actual,
                    "Model size mismatch, re-downloading"
                );
                fs::remove_file(&path)
                    .await
                    .context("Failed to remove corrupted model")?;
            }
            ModelStatus::Missing => {}
        }

        let info = model.info();
        let dest = self.models_dir.join(&info.filename);
        download(&info, &dest).await?;
        Ok(dest)
    }
}

/// Stream a model to `<dest>.part`, then rename it into place.
async fn download(info: &ModelInfo, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .await
            .context("Failed to create models directory")?;
    }

    info!(url = %info.url, dest = %dest.display(), "Downloading model");

    let response = reqwest::get(&info.url)
        .await
        .with_context(|| format!("Failed to download model from {}", info.url))?;

    if !response.status().is_success() {
        anyhow::bail!("Failed to download model: HTTP {}", response.status());
    }

    let temp_path = dest.with_extension("part");
    let mut file = fs::File::create(&temp_path)
        .await
        .context("Failed to create temporary model file")?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Failed to read model download")?;
        file.write_all(&chunk)
            .await
            .context("Failed to write model file")?;
        written += chunk.len() as u64;
    }
    file.sync_all().await.context("Failed to sync model file")?;
    drop(file);

    if let Some(expected) = info.size_bytes
        && written != expected
    {
        let _ = fs::remove_file(&temp_path).await;
        anyhow::bail!(
            "Downloaded model size mismatch: expected {}, got {}",
            expected,
            written
        );
    }

    fs::rename(&temp_path, dest)
        .await
        .context("Failed to finalize model file")?;

    info!(path = %dest.display(), size = written, "Model downloaded");
    Ok(())
}

#[cfg(test)]
#[path = "models_test.rs"]
mod tests;
