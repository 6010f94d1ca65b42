//! Voice Activity Detection using Silero VAD.
//!
//! Finds the speech regions of a recording so silence can be dropped before
//! transcription.

use anyhow::{Context, Result};
use ndarray::{Array0, Array2, Array3};
use ort::session::Session;
use ort::value::TensorRef;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, trace};

/// LSTM hidden state size for Silero VAD.
const LSTM_HIDDEN_SIZE: usize = 128;

/// Context size for 16kHz audio (prepended to each chunk).
const CONTEXT_SIZE_16K: usize = 64;

/// Sample rate expected by Silero VAD.
pub const VAD_SAMPLE_RATE: u32 = 16000;

/// Supported chunk sizes for Silero VAD (in samples at 16kHz).
pub const VAD_CHUNK_SIZES: [usize; 3] = [512, 1024, 1536];

/// Chunk size used for whole-file filtering.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Default speech probability threshold.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Audio kept on each side of a speech region, in milliseconds.
pub const SPEECH_PAD_MS: u32 = 200;

/// VAD event indicating speech state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Speech started.
    SpeechStart,
    /// Speech ended.
    SpeechEnd,
}

/// Configuration for the VAD state machine.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Probability threshold for considering audio as speech.
    pub threshold: f32,
    /// Minimum consecutive speech chunks before triggering SpeechStart.
    pub min_speech_chunks: usize,
    /// Minimum consecutive silence chunks before triggering SpeechEnd.
    pub min_silence_chunks: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            min_speech_chunks: 2,
            min_silence_chunks: 8,
        }
    }
}

impl VadConfig {
    /// Config whose silence run must last at least `min_silence_ms`.
    pub fn for_silence(threshold: f32, min_silence_ms: u32, chunk_size: usize) -> Self {
        let chunk_ms = (chunk_size as u64 * 1000 / VAD_SAMPLE_RATE as u64).max(1);
        let min_silence_chunks = (min_silence_ms as u64).div_ceil(chunk_ms).max(1) as usize;
        Self {
            threshold,
            min_silence_chunks,
            ..Self::default()
        }
    }
}

/// Debounced speech/silence tracker.
///
/// Flips state only after enough consecutive chunks disagree with the current
/// one: `min_speech_chunks` to enter speech, `min_silence_chunks` to leave it.
#[derive(Debug)]
pub struct VadStateMachine {
    config: VadConfig,
    speaking: bool,
    /// Consecutive chunks contradicting `speaking`.
    contrary: usize,
}

impl VadStateMachine {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            speaking: false,
            contrary: 0,
        }
    }

    /// Feed one chunk probability; returns the transition it caused, if any.
    pub fn process(&mut self, probability: f32) -> Option<VadEvent> {
        let is_speech = probability >= self.config.threshold;
        if is_speech == self.speaking {
            self.contrary = 0;
            return None;
        }

        self.contrary += 1;
        let needed = if self.speaking {
            self.config.min_silence_chunks
        } else {
            self.config.min_speech_chunks
        };
        trace!(probability, speaking = self.speaking, run = self.contrary, needed, "VAD chunk");
        if self.contrary < needed {
            return None;
        }

        self.speaking = !self.speaking;
        self.contrary = 0;
        Some(if self.speaking {
            VadEvent::SpeechStart
        } else {
            VadEvent::SpeechEnd
        })
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn reset(&mut self) {
        self.speaking = false;
        self.contrary = 0;
    }
}

/// Turn per-chunk speech probabilities into sample ranges of speech.
///
/// A region starts at the first chunk of the speech run that triggered it and
/// ends where the silence run that closed it began. Regions are padded by
/// `pad` samples, clamped to `total_samples`, and merged when they overlap.
pub fn speech_regions(
    probabilities: &[f32],
    chunk_size: usize,
    config: &VadConfig,
    pad: usize,
    total_samples: usize,
) -> Vec<Range<usize>> {
    let mut machine = VadStateMachine::new(config.clone());
    let mut raw = Vec::new();
    let mut start = None;

    for (index, &probability) in probabilities.iter().enumerate() {
        match machine.process(probability) {
            Some(VadEvent::SpeechStart) => {
                let first = (index + 1).saturating_sub(config.min_speech_chunks);
                start = Some(first * chunk_size);
            }
            Some(VadEvent::SpeechEnd) => {
                if let Some(begin) = start.take() {
                    let last = (index + 1).saturating_sub(config.min_silence_chunks);
                    raw.push(begin..(last * chunk_size).max(begin));
                }
            }
            None => {}
        }
    }
    if let Some(begin) = start {
        raw.push(begin..total_samples);
    }

    let mut merged: Vec<Range<usize>> = Vec::with_capacity(raw.len());
    for region in raw {
        let padded = region.start.saturating_sub(pad)..(region.end + pad).min(total_samples);
        match merged.last_mut() {
            Some(previous) if padded.start <= previous.end => {
                previous.end = previous.end.max(padded.end);
            }
            _ => merged.push(padded),
        }
    }
    merged
}

/// Concatenate the samples covered by `regions`.
pub fn collect_speech(samples: &[f32], regions: &[Range<usize>]) -> Vec<f32> {
    regions
        .iter()
        .flat_map(|region| {
            let end = region.end.min(samples.len());
            let start = region.start.min(end);
            samples[start..end].iter().copied()
        })
        .collect()
}

/// Voice Activity Detector using Silero VAD ONNX model.
pub struct VoiceActivityDetector {
    session: Session,
    /// LSTM state: shape (2, 1, 128) - combines h and c states.
    state: Array3<f32>,
    /// Audio context from previous chunk (64 samples at 16kHz).
    context: Vec<f32>,
    config: VadConfig,
    chunk_size: usize,
}

impl VoiceActivityDetector {
    /// Load the Silero VAD model from the given path.
    pub fn new(model_path: impl AsRef<Path>, config: VadConfig) -> Result<Self> {
        Self::with_chunk_size(model_path, config, DEFAULT_CHUNK_SIZE)
    }

    /// Load the model with a specific chunk size.
    pub fn with_chunk_size(
        model_path: impl AsRef<Path>,
        config: VadConfig,
        chunk_size: usize,
    ) -> Result<Self> {
        if !VAD_CHUNK_SIZES.contains(&chunk_size) {
            anyhow::bail!(
                "Invalid chunk size {}. Must be one of {:?}",
                chunk_size,
                VAD_CHUNK_SIZES
            );
        }

        debug!(
            path = %model_path.as_ref().display(),
            chunk_size = chunk_size,
            "Loading VAD model"
        );

        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .with_intra_threads(1)
            .context("Failed to set intra threads")?
            .commit_from_file(model_path.as_ref())
            .with_context(|| {
                format!(
                    "Failed to load VAD model from {}",
                    model_path.as_ref().display()
                )
            })?;

        Ok(Self {
            session,
            state: Array3::<f32>::zeros((2, 1, LSTM_HIDDEN_SIZE)),
            context: vec![0.0f32; CONTEXT_SIZE_16K],
            config,
            chunk_size,
        })
    }

    /// Speech probability of one `chunk_size` slice of 16kHz mono audio.
    pub fn process_chunk(&mut self, audio: &[f32]) -> Result<f32> {
        if audio.len() != self.chunk_size {
            anyhow::bail!(
                "Audio chunk size {} doesn't match expected {}",
                audio.len(),
                self.chunk_size
            );
        }

        // Silero expects the previous chunk's tail in front of the input.
        let window: Vec<f32> = self.context.iter().chain(audio).copied().collect();
        let window = Array2::from_shape_vec((1, CONTEXT_SIZE_16K + self.chunk_size), window)
            .context("Failed to shape VAD input")?;
        let rate = Array0::from_elem((), i64::from(VAD_SAMPLE_RATE));

        let outputs = self
            .session
            .run(ort::inputs![
                "input" => TensorRef::from_array_view(&window)?,
                "sr" => TensorRef::from_array_view(&rate)?,
                "state" => TensorRef::from_array_view(&self.state)?
            ])
            .context("VAD inference failed")?;

        let (_, probability) = outputs["output"]
            .try_extract_tensor::<f32>()
            .context("Failed to read VAD output")?;
        let probability = probability.first().copied().unwrap_or(0.0);

        let (_, next_state) = outputs["stateN"]
            .try_extract_tensor::<f32>()
            .context("Failed to read VAD state")?;
        self.state = Array3::from_shape_vec((2, 1, LSTM_HIDDEN_SIZE), next_state.to_vec())
            .context("Failed to reshape VAD state")?;
        self.context.copy_from_slice(&audio[audio.len() - CONTEXT_SIZE_16K..]);

        Ok(probability)
    }

    /// Speech regions of a whole 16kHz mono recording, as sample ranges.
    pub fn detect_regions(&mut self, samples: &[f32]) -> Result<Vec<Range<usize>>> {
        self.reset();

        let mut probabilities = Vec::with_capacity(samples.len() / self.chunk_size + 1);
        for chunk in samples.chunks(self.chunk_size) {
            let probability = if chunk.len() == self.chunk_size {
                self.process_chunk(chunk)?
            } else {
                let mut padded = chunk.to_vec();
                padded.resize(self.chunk_size, 0.0);
                self.process_chunk(&padded)?
            };
            probabilities.push(probability);
        }

        let pad = (SPEECH_PAD_MS as usize * VAD_SAMPLE_RATE as usize) / 1000;
        let regions = speech_regions(
            &probabilities,
            self.chunk_size,
            &self.config,
            pad,
            samples.len(),
        );
        debug!(
            chunks = probabilities.len(),
            regions = regions.len(),
            "Voice activity detection complete"
        );
        Ok(regions)
    }

    /// Reset the detector state.
    pub fn reset(&mut self) {
        self.state = Array3::<f32>::zeros((2, 1, LSTM_HIDDEN_SIZE));
        self.context = vec![0.0f32; CONTEXT_SIZE_16K];
    }
}

#[cfg(test)]
#[path = "vad_test.rs"]
mod tests;
