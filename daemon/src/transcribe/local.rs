//! Local whisper.cpp backend.
//!
//! Loads the normalized WAV, optionally drops silence with Silero VAD, and
//! decodes the remaining speech with whisper-rs. Loaded models live in a
//! process-wide cache shared by every session.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{
    ProgressSink, TranscribeError, Transcriber, TranscriptionRequest, TranscriptionResult,
    join_segments,
};
use crate::audio;
use crate::config::{Precision, SpeechModel};
use crate::model_cache::ModelCache;
use crate::models::{ModelId, ModelManager};
use crate::vad::{self, DEFAULT_CHUNK_SIZE, VadConfig, VoiceActivityDetector};

type ModelKey = (SpeechModel, Precision);

static WHISPER_MODELS: LazyLock<ModelCache<ModelKey, WhisperContext>> =
    LazyLock::new(ModelCache::new);

/// Upper bound on decoder threads.
const MAX_THREADS: usize = 8;

/// Whisper speech-to-text running in-process.
pub struct LocalTranscriber {
    models: ModelManager,
    cache: &'static ModelCache<ModelKey, WhisperContext>,
}

impl LocalTranscriber {
    /// Backend using the default models directory and the shared cache.
    pub fn new() -> Result<Self> {
        Ok(Self::with_models(ModelManager::new()?))
    }

    pub fn with_models(models: ModelManager) -> Self {
        Self {
            models,
            cache: &WHISPER_MODELS,
        }
    }

    /// Loaded whisper context for `(model, precision)`, downloading and
    /// loading it on first use.
    async fn context(
        &self,
        model: SpeechModel,
        precision: Precision,
    ) -> Result<Arc<WhisperContext>> {
        let models = self.models.clone();
        self.cache
            .get_or_load((model, precision), || async move {
                let path = models
                    .ensure_model(ModelId::whisper(model, precision))
                    .await?;
                tokio::task::spawn_blocking(move || load_whisper(&path))
                    .await
                    .context("Model loading task panicked")?
            })
            .await
    }

    async fn run(
        &self,
        audio: &Path,
        request: &TranscriptionRequest,
        progress: &ProgressSink,
    ) -> Result<TranscriptionResult> {
        progress.stage(format!(
            "Loading model {} ({:?})",
            request.model.ggml_name(),
            request.precision
        ));
        let ctx = self.context(request.model, request.precision).await?;

        let vad_model = if request.vad_filter {
            Some(self.models.ensure_model(ModelId::SileroVad).await?)
        } else {
            None
        };

        progress.stage("Transcribing audio");
        let audio = audio.to_path_buf();
        let request = request.clone();
        tokio::task::spawn_blocking(move || transcribe_file(&ctx, &audio, &request, vad_model))
            .await
            .context("Transcription task panicked")?
    }
}

#[tonic::async_trait]
impl Transcriber for LocalTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        request: &TranscriptionRequest,
        progress: &ProgressSink,
    ) -> Result<TranscriptionResult, TranscribeError> {
        self.run(audio, request, progress)
            .await
            .map_err(TranscribeError::Local)
    }

    fn name(&self) -> &'static str {
        "local"
    }

    async fn preload(&self, request: &TranscriptionRequest) -> Result<()> {
        self.context(request.model, request.precision).await?;
        if request.vad_filter {
            self.models.ensure_model(ModelId::SileroVad).await?;
        }
        info!(model = request.model.ggml_name(), "Model preloaded");
        Ok(())
    }
}

fn load_whisper(path: &Path) -> Result<WhisperContext> {
    info!(path = %path.display(), "Loading Whisper model");
    WhisperContext::new_with_params(
        path.to_str().context("Invalid model path")?,
        WhisperContextParameters::default(),
    )
    .with_context(|| format!("Failed to load Whisper model from {}", path.display()))
}

fn transcribe_file(
    ctx: &WhisperContext,
    audio_path: &Path,
    request: &TranscriptionRequest,
    vad_model: Option<PathBuf>,
) -> Result<TranscriptionResult> {
    let buffer = audio::load_for_recognition(audio_path)?;

    let samples = match vad_model {
        Some(model_path) => {
            let config = VadConfig::for_silence(
                request.vad_threshold,
                request.min_silence_ms,
                DEFAULT_CHUNK_SIZE,
            );
            let mut detector = VoiceActivityDetector::new(model_path, config)?;
            let regions = detector.detect_regions(&buffer.samples)?;
            vad::collect_speech(&buffer.samples, &regions)
        }
        None => buffer.samples,
    };

    if samples.is_empty() {
        debug!("No speech found, returning empty transcript");
        return Ok(TranscriptionResult {
            text: String::new(),
            language: request.language.clone(),
            language_probability: request.language.as_ref().map(|_| 1.0),
        });
    }

    decode(ctx, &samples, request)
}

fn decode(
    ctx: &WhisperContext,
    samples: &[f32],
    request: &TranscriptionRequest,
) -> Result<TranscriptionResult> {
    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(MAX_THREADS);

    let mut state = ctx
        .create_state()
        .context("Failed to create Whisper state")?;

    let (language, probability) = match &request.language {
        Some(hint) => (hint.clone(), 1.0),
        None => {
            state
                .pcm_to_mel(samples, threads)
                .context("Failed to compute mel spectrogram")?;
            let (lang_id, probs) = state
                .lang_detect(0, threads)
                .context("Language detection failed")?;
            let language = whisper_rs::get_lang_str(lang_id)
                .context("Unknown language id")?
                .to_string();
            let probability = usize::try_from(lang_id)
                .ok()
                .and_then(|id| probs.get(id).copied())
                .unwrap_or(0.0)
                .clamp(0.0, 1.0);
            debug!(language = %language, probability, "Detected language");
            (language, probability)
        }
    };

    let strategy = if request.beam_size > 1 {
        SamplingStrategy::BeamSearch {
            beam_size: request.beam_size as i32,
            patience: -1.0,
        }
    } else {
        SamplingStrategy::Greedy { best_of: 1 }
    };

    let mut params = FullParams::new(strategy);
    params.set_language(Some(&language));
    params.set_n_threads(threads as i32);
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);

    debug!(
        samples = samples.len(),
        beam_size = request.beam_size,
        language = %language,
        "Running Whisper inference"
    );

    state
        .full(params, samples)
        .context("Whisper inference failed")?;

    let segments: Vec<String> = (0..state.full_n_segments())
        .filter_map(|i| state.get_segment(i))
        .filter_map(|segment| segment.to_str_lossy().ok().map(|text| text.into_owned()))
        .collect();

    let text = join_segments(&segments);
    debug!(segments = segments.len(), text_len = text.len(), "Transcription complete");

    Ok(TranscriptionResult {
        text,
        language: Some(language),
        language_probability: Some(probability),
    })
}
