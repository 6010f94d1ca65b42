use super::*;

fn config(min_speech_chunks: usize, min_silence_chunks: usize) -> VadConfig {
    VadConfig {
        threshold: 0.5,
        min_speech_chunks,
        min_silence_chunks,
    }
}

#[test]
fn test_state_machine_speech_start_and_end() {
    let mut sm = VadStateMachine::new(config(2, 2));

    assert_eq!(sm.process(0.8), None);
    assert_eq!(sm.process(0.9), Some(VadEvent::SpeechStart));
    assert!(sm.is_speaking());

    assert_eq!(sm.process(0.2), None);
    assert_eq!(sm.process(0.1), Some(VadEvent::SpeechEnd));
    assert!(!sm.is_speaking());
}

#[test]
fn test_state_machine_threshold_is_inclusive() {
    let mut sm = VadStateMachine::new(VadConfig {
        threshold: 0.7,
        min_speech_chunks: 1,
        min_silence_chunks: 1,
    });

    assert_eq!(sm.process(0.69), None);
    assert_eq!(sm.process(0.70), Some(VadEvent::SpeechStart));
    assert_eq!(sm.process(0.69), Some(VadEvent::SpeechEnd));
}

#[test]
fn test_state_machine_short_blip_does_not_start_speech() {
    let mut sm = VadStateMachine::new(config(3, 3));

    sm.process(0.8);
    sm.process(0.8);
    sm.process(0.2);
    sm.process(0.8);
    assert!(!sm.is_speaking());

    sm.reset();
    assert!(!sm.is_speaking());
}

#[test]
fn test_for_silence_converts_ms_to_chunks() {
    // 512 samples at 16kHz is 32ms, so 500ms needs 16 chunks.
    let config = VadConfig::for_silence(0.4, 500, 512);
    assert_eq!(config.min_silence_chunks, 16);
    assert!((config.threshold - 0.4).abs() < f32::EPSILON);
    assert_eq!(config.min_speech_chunks, VadConfig::default().min_speech_chunks);

    assert_eq!(VadConfig::for_silence(0.5, 0, 512).min_silence_chunks, 1);
}

#[test]
fn test_speech_regions_single_run() {
    let probs = [0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0];

    let regions = speech_regions(&probs, 10, &config(2, 2), 0, 80);

    assert_eq!(regions, vec![20..50]);
}

#[test]
fn test_speech_regions_open_at_end_runs_to_total() {
    let probs = [0.0, 1.0, 1.0, 1.0];

    let regions = speech_regions(&probs, 10, &config(2, 2), 0, 37);

    assert_eq!(regions, vec![10..37]);
}

#[test]
fn test_speech_regions_silence_only() {
    let probs = [0.1; 20];
    assert!(speech_regions(&probs, 512, &VadConfig::default(), 3200, 10240).is_empty());
}

#[test]
fn test_speech_regions_padding_is_clamped_and_merged() {
    // Two runs separated by a short gap; padding makes them overlap.
    let probs = [1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0];

    let unpadded = speech_regions(&probs, 10, &config(2, 2), 0, 90);
    assert_eq!(unpadded, vec![0..20, 50..70]);

    let padded = speech_regions(&probs, 10, &config(2, 2), 15, 90);
    assert_eq!(padded, vec![0..85]);
}

#[test]
fn test_collect_speech_concatenates_regions() {
    let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();

    let speech = collect_speech(&samples, &[1..3, 7..20]);

    assert_eq!(speech, vec![1.0, 2.0, 7.0, 8.0, 9.0]);
}

#[test]
fn test_collect_speech_no_regions_is_empty() {
    assert!(collect_speech(&[0.5; 8], &[]).is_empty());
}
