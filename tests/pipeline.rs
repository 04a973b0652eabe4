use melstream::config::Config;
use melstream::dsp::{
    frame_count, FftProcessor, LogMelParams, MelConfig, MelSpectrogramConverter,
    StreamingMelProcessor,
};
use melstream::pipeline::{stream_log_mel, FeatureExtractor};
use melstream::DspContext;
use std::f32::consts::PI;
use std::sync::Arc;

const SR: f32 = 44100.0;

fn two_tone(seconds: f32) -> Vec<f32> {
    let len = (SR * seconds) as usize;
    (0..len)
        .map(|i| {
            let freq = if i < len / 2 { 440.0 } else { 880.0 };
            (2.0 * PI * freq * i as f32 / SR).sin() * 0.5
        })
        .collect()
}

fn bin_of(freq: f32, fft_size: usize) -> usize {
    (freq * fft_size as f32 / SR).round() as usize
}

fn peak_near(spectrum: &[f32], bin: usize) -> f32 {
    spectrum[bin.saturating_sub(1)..=bin + 1]
        .iter()
        .copied()
        .fold(f32::MIN, f32::max)
}

#[test]
fn two_tone_signal_shifts_energy() {
    let ctx = DspContext::new("e2e");
    let extractor = FeatureExtractor::new(&Config::default(), ctx.clone()).unwrap();
    let signal = two_tone(2.0);

    let spec = extractor.spectrogram(&signal);
    assert_eq!(spec.len(), frame_count(signal.len(), 1024, 256));

    let (low, high) = (bin_of(440.0, 1024), bin_of(880.0, 1024));
    let first = &spec[0];
    let last = &spec[spec.len() - 1];
    assert!(peak_near(first, low) > peak_near(first, high));
    assert!(peak_near(last, high) > peak_near(last, low));

    ctx.finish();
}

#[test]
fn log_mel_pipeline_shape_and_range() {
    let cfg = Config::default();
    let extractor = FeatureExtractor::new(&cfg, DspContext::new("e2e")).unwrap();
    let signal = two_tone(0.5);

    let mel = extractor.mel_spectrogram(&signal);
    assert!(mel.iter().flatten().all(|&v| v >= 0.0));

    let log_mel = extractor.log_mel_spectrogram(&signal);
    assert_eq!(log_mel.len(), frame_count(signal.len(), 1024, 256));
    for frame in &log_mel {
        assert_eq!(frame.len(), cfg.mel.mel_bands);
        assert!(frame
            .iter()
            .all(|&v| v >= cfg.log_mel.min_db && v <= cfg.log_mel.max_db));
    }
}

#[test]
fn short_input_yields_nothing() {
    let extractor = FeatureExtractor::new(&Config::default(), DspContext::new("e2e")).unwrap();
    assert!(extractor.spectrogram(&[0.0; 512]).is_empty());
    assert!(extractor.log_mel_spectrogram(&[0.0; 512]).is_empty());
}

#[test]
fn streaming_matches_batch_for_hop_aligned_chunks() {
    let mut cfg = Config::default();
    cfg.mel.mel_bands = 40;
    let ctx = DspContext::new("stream-vs-batch");
    let extractor = FeatureExtractor::new(&cfg, ctx.clone()).unwrap();
    let processor = StreamingMelProcessor::new(cfg.streaming_config(), ctx).unwrap();

    let signal: Vec<f32> = two_tone(2.0)[..172 * 512].to_vec();
    let batch = extractor.log_mel_spectrogram(&signal);

    let mut positions = Vec::new();
    let streamed = stream_log_mel(&processor, &signal, 512, &cfg.log_mel, |fed| {
        positions.push(fed)
    });

    assert_eq!(positions.last().copied(), Some(signal.len()));
    assert_frames_close(&streamed, &batch);
    // caller-driven consumption leaves exactly one window minus one hop
    assert_eq!(processor.buffer_len(), 1024 - 256);
}

fn assert_frames_close(streamed: &[Vec<f32>], batch: &[Vec<f32>]) {
    assert_eq!(streamed.len(), batch.len());
    for (i, (a, b)) in streamed.iter().zip(batch).enumerate() {
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-3, "frame {} differs: {} vs {}", i, x, y);
        }
    }
}

#[test]
fn streaming_matches_batch_for_unaligned_chunks() {
    let mut cfg = Config::default();
    cfg.mel.mel_bands = 40;
    let ctx = DspContext::new("unaligned");
    let extractor = FeatureExtractor::new(&cfg, ctx.clone()).unwrap();
    let signal = two_tone(1.0);
    let batch = extractor.log_mel_spectrogram(&signal);
    assert_eq!(batch.len(), 169);

    for chunk_size in [300, 100, 1000, 7] {
        let processor = StreamingMelProcessor::new(cfg.streaming_config(), ctx.clone()).unwrap();
        let streamed = stream_log_mel(&processor, &signal, chunk_size, &cfg.log_mel, |_| {});
        assert_frames_close(&streamed, &batch);
        assert!(processor.buffer_len() < 1024);
    }
}

#[test]
fn streaming_skips_gaps_when_hop_exceeds_window() {
    let mut cfg = Config::default();
    cfg.spectrogram.fft_size = 256;
    cfg.spectrogram.hop_size = 400;
    cfg.mel.mel_bands = 20;
    let ctx = DspContext::new("wide-hop");
    let extractor = FeatureExtractor::new(&cfg, ctx.clone()).unwrap();
    let processor = StreamingMelProcessor::new(cfg.streaming_config(), ctx).unwrap();

    let signal = two_tone(0.2);
    let batch = extractor.log_mel_spectrogram(&signal);
    assert_eq!(batch.len(), frame_count(signal.len(), 256, 400));

    let streamed = stream_log_mel(&processor, &signal, 100, &cfg.log_mel, |_| {});
    assert_frames_close(&streamed, &batch);
}

#[test]
fn streaming_single_frame_and_reset() {
    let config = melstream::dsp::StreamingConfig {
        mel: MelConfig {
            mel_bands: 64,
            ..MelConfig::default()
        },
        ..Default::default()
    };
    let processor = StreamingMelProcessor::new(config, DspContext::new("stream")).unwrap();

    processor.add_samples(&two_tone(0.01)[..300]);
    assert!(processor.process_mel_spectrogram(1).is_empty());
    processor.add_samples(&vec![0.1; 1024]);

    let mel = processor.process_mel_spectrogram(1);
    assert_eq!(mel.len(), 1);
    assert_eq!(mel[0].len(), 64);

    let log_mel = processor.process_log_mel_spectrogram(1, &LogMelParams::default());
    assert_eq!(log_mel.len(), 1);

    processor.reset();
    assert_eq!(processor.buffer_len(), 0);
}

#[test]
fn components_share_one_context() {
    let ctx = DspContext::new("shared");
    let fft = FftProcessor::new(512, Arc::clone(&ctx)).unwrap();
    let converter = MelSpectrogramConverter::new(
        MelConfig {
            fft_size: 512,
            mel_bands: 20,
            ..MelConfig::default()
        },
        Arc::clone(&ctx),
    )
    .unwrap();

    let spectrum = fft.perform_fft(&two_tone(0.05)[..512]);
    let mel = converter.spec_to_mel_spec(&[spectrum]);
    assert_eq!(mel[0].len(), 20);

    let stages: Vec<&str> = ctx.finish().into_iter().map(|(name, _)| name).collect();
    assert!(stages.contains(&"fft"));
    assert!(stages.contains(&"mel_filterbank"));
    assert!(stages.contains(&"spec_to_mel"));
}
