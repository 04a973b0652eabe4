use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::Config;
use crate::context::DspContext;
use crate::dsp::{
    FftProcessor, LogMelParams, MelSpectrogramConverter, SpectrogramGenerator,
    StreamingMelProcessor,
};
use crate::error::FeatureResult;

/// Batch pipeline: samples -> dB spectrogram -> mel -> log-mel.
pub struct FeatureExtractor {
    generator: SpectrogramGenerator,
    converter: MelSpectrogramConverter,
    hop_size: usize,
    log_params: LogMelParams,
    ctx: Arc<DspContext>,
}

impl FeatureExtractor {
    pub fn new(config: &Config, ctx: Arc<DspContext>) -> FeatureResult<Self> {
        config.validate()?;
        let fft = FftProcessor::new(config.spectrogram.fft_size, Arc::clone(&ctx))?;
        let generator =
            SpectrogramGenerator::new(Arc::new(fft), config.generator_options(), Arc::clone(&ctx))?;
        let converter = MelSpectrogramConverter::new(config.mel_config(), Arc::clone(&ctx))?;
        Ok(Self {
            generator,
            converter,
            hop_size: config.spectrogram.hop_size,
            log_params: config.log_mel,
            ctx,
        })
    }

    pub fn generator(&self) -> &SpectrogramGenerator {
        &self.generator
    }

    pub fn converter(&self) -> &MelSpectrogramConverter {
        &self.converter
    }

    pub fn context(&self) -> &Arc<DspContext> {
        &self.ctx
    }

    pub fn spectrogram(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.generator.generate(samples, self.hop_size)
    }

    pub fn mel_spectrogram(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let spectrogram = self.spectrogram(samples);
        self.converter.spec_to_mel_spec(&spectrogram)
    }

    pub fn log_mel_spectrogram(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mel = self.mel_spectrogram(samples);
        self.converter.mel_to_log_mel(&mel, &self.log_params)
    }
}

/// Feed `samples` through a streaming processor in `chunk_size` pieces,
/// draining every complete frame as soon as it is available.
///
/// Samples are held back until the buffered frames sit on the hop grid, so any
/// chunk size yields the batch pipeline's frames in order. `processor` must
/// start empty. `on_chunk` receives the running count of samples received.
pub fn stream_log_mel(
    processor: &StreamingMelProcessor,
    samples: &[f32],
    chunk_size: usize,
    params: &LogMelParams,
    mut on_chunk: impl FnMut(usize),
) -> Vec<Vec<f32>> {
    let mut frames = Vec::new();
    let mut pending: VecDeque<f32> = VecDeque::new();
    // future samples that fall between frames when hop_size > fft_size
    let mut skip = 0usize;
    let mut fed = 0;

    for chunk in samples.chunks(chunk_size.max(1)) {
        pending.extend(chunk.iter().copied());
        fed += chunk.len();

        loop {
            let skipped = skip.min(pending.len());
            pending.drain(..skipped);
            skip -= skipped;

            let take = processor.aligned_fill(processor.buffer_len(), pending.len());
            if take > 0 {
                let aligned: Vec<f32> = pending.drain(..take).collect();
                processor.add_samples(&aligned);
            }

            let len = processor.buffer_len();
            let available = processor.available_frames(len);
            if available == 0 {
                break;
            }
            let log_mel = processor.process_log_mel_spectrogram(available, params);
            if log_mel.is_empty() {
                break;
            }
            frames.extend(log_mel);

            let wanted = processor.samples_consumed(available, len);
            skip += wanted - processor.consume(wanted);
        }
        on_chunk(fed);
    }
    frames
}
