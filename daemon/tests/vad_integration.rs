//! Integration tests for VAD that require the Silero model on disk.
//!
//! Run with `VAD_MODEL_PATH=/path/to/silero_vad.onnx cargo test -- --ignored`.

use scribe_daemon::vad::{
    VAD_CHUNK_SIZES, VAD_SAMPLE_RATE, VadConfig, VoiceActivityDetector, collect_speech,
};

/// VAD_MODEL_PATH, or the model the daemon downloads into its data dir.
fn model_path() -> std::path::PathBuf {
    std::env::var_os("VAD_MODEL_PATH")
        .map(Into::into)
        .unwrap_or_else(|| {
            scribe_daemon::config::Config::models_dir()
                .expect("data dir")
                .join("silero_vad.onnx")
        })
}

fn load_vad(chunk_size: usize) -> VoiceActivityDetector {
    VoiceActivityDetector::with_chunk_size(model_path(), VadConfig::default(), chunk_size)
        .expect("Failed to load VAD")
}

#[test]
#[ignore = "requires the Silero VAD model"]
fn test_silence_produces_no_regions() {
    let mut vad = load_vad(512);
    let silence = vec![0.0f32; VAD_SAMPLE_RATE as usize * 2];

    let regions = vad.detect_regions(&silence).unwrap();

    assert!(regions.is_empty(), "Silence should have no speech: {regions:?}");
    assert!(collect_speech(&silence, &regions).is_empty());
}

#[test]
#[ignore = "requires the Silero VAD model"]
fn test_noise_probability_in_range() {
    let mut vad = load_vad(512);
    let noise: Vec<f32> = (0..512)
        .map(|i| ((i as f32 * 12.9898).sin() * 43758.545).fract() * 0.1)
        .collect();

    let probability = vad.process_chunk(&noise).unwrap();

    assert!((0.0..=1.0).contains(&probability));
}

#[test]
#[ignore = "requires the Silero VAD model"]
fn test_all_chunk_sizes_accepted() {
    for &size in &VAD_CHUNK_SIZES {
        let mut vad = load_vad(size);
        assert!(vad.process_chunk(&vec![0.0; size]).is_ok());
        assert!(vad.process_chunk(&vec![0.0; size + 1]).is_err());
    }
}

#[test]
#[ignore = "requires the Silero VAD model"]
fn test_partial_final_chunk_is_padded() {
    let mut vad = load_vad(512);
    let samples = vec![0.0f32; 512 * 3 + 100];

    assert!(vad.detect_regions(&samples).is_ok());
}

#[test]
fn test_invalid_chunk_size_rejected_before_loading() {
    let result =
        VoiceActivityDetector::with_chunk_size("/nonexistent/model.onnx", VadConfig::default(), 500);

    let err = result.err().expect("chunk size 500 must be rejected");
    assert!(err.to_string().contains("Invalid chunk size"));
}
