//! Incremental mel extraction over audio that arrives in small chunks.
//!
//! Frames are always taken from the tail of the buffer, most recent frame
//! last. Processing never trims the buffer: the caller decides how many
//! samples were consumed and removes them with [`StreamingMelProcessor::consume`].

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::cache::{BoundedCache, CacheStats};
use super::fft::FftProcessor;
use super::mel::{LogMelParams, MelConfig, MelSpectrogramConverter};
use super::spectrogram::{GeneratorOptions, SpectrogramGenerator};
use crate::context::DspContext;
use crate::error::{FeatureError, FeatureResult};

/// About 23 seconds of 44.1 kHz audio.
pub const DEFAULT_MAX_BUFFER: usize = 1_000_000;

const CACHE_CAPACITY: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamingConfig {
    pub mel: MelConfig,
    pub hop_size: usize,
    pub max_buffer_size: usize,
    pub generator: GeneratorOptions,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            mel: MelConfig::default(),
            hop_size: 256,
            max_buffer_size: DEFAULT_MAX_BUFFER,
            generator: GeneratorOptions::default(),
        }
    }
}

impl StreamingConfig {
    pub fn validate(&self) -> FeatureResult<()> {
        self.mel.validate()?;
        if self.hop_size == 0 {
            return Err(FeatureError::InvalidHopSize);
        }
        if self.max_buffer_size < self.mel.fft_size {
            return Err(FeatureError::InvalidBufferSize {
                max_buffer: self.max_buffer_size,
                fft_size: self.mel.fft_size,
            });
        }
        Ok(())
    }
}

/// (frame count, buffer length, buffer generation)
type MelKey = (usize, usize, u64);
type LogMelKey = (usize, usize, u64, [u32; 4]);

struct DerivedCaches {
    mel: BoundedCache<MelKey, Vec<Vec<f32>>>,
    log_mel: BoundedCache<LogMelKey, Vec<Vec<f32>>>,
}

impl DerivedCaches {
    fn clear(&mut self) {
        self.mel.clear();
        self.log_mel.clear();
    }
}

/// Buffers streamed samples and turns the newest ones into mel frames.
///
/// The sample buffer and the result caches sit behind separate locks that
/// are never held together, and neither is held while frames are computed.
pub struct StreamingMelProcessor {
    config: StreamingConfig,
    generator: SpectrogramGenerator,
    converter: MelSpectrogramConverter,
    buffer: Mutex<VecDeque<f32>>,
    // bumped on every buffer mutation; part of every cache key
    generation: AtomicU64,
    caches: Mutex<DerivedCaches>,
    ctx: Arc<DspContext>,
}

impl StreamingMelProcessor {
    pub fn new(config: StreamingConfig, ctx: Arc<DspContext>) -> FeatureResult<Self> {
        config.validate()?;

        let fft = Arc::new(FftProcessor::new(config.mel.fft_size, Arc::clone(&ctx))?);
        let generator = SpectrogramGenerator::new(fft, config.generator, Arc::clone(&ctx))?;
        let converter = MelSpectrogramConverter::new(config.mel, Arc::clone(&ctx))?;

        log::info!(
            "[{}] streaming mel processor: fft={}, hop={}, bands={}, max_buffer={}",
            ctx.label(),
            config.mel.fft_size,
            config.hop_size,
            config.mel.mel_bands,
            config.max_buffer_size
        );

        Ok(Self {
            config,
            generator,
            converter,
            buffer: Mutex::new(VecDeque::with_capacity(config.max_buffer_size.min(1 << 16))),
            generation: AtomicU64::new(0),
            caches: Mutex::new(DerivedCaches {
                mel: BoundedCache::new(CACHE_CAPACITY),
                log_mel: BoundedCache::new(CACHE_CAPACITY),
            }),
            ctx,
        })
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn converter(&self) -> &MelSpectrogramConverter {
        &self.converter
    }

    pub fn generator(&self) -> &SpectrogramGenerator {
        &self.generator
    }

    /// Samples needed to produce `frame_count` frames.
    pub fn samples_for_frames(&self, frame_count: usize) -> usize {
        if frame_count == 0 {
            return 0;
        }
        self.config.mel.fft_size + (frame_count - 1) * self.config.hop_size
    }

    /// Sample advance covered by `frame_count` hops.
    pub fn hop_advance(&self, frame_count: usize) -> usize {
        frame_count * self.config.hop_size
    }

    /// Frames available from a buffer of `buffer_len` samples.
    pub fn available_frames(&self, buffer_len: usize) -> usize {
        super::spectrogram::frame_count(buffer_len, self.config.mel.fft_size, self.config.hop_size)
    }

    /// How many of `pending` samples to append to a buffer of `buffer_len` so
    /// that the newest window lands on the hop grid that starts at the buffer
    /// head, without growing past `max_buffer_size`.
    ///
    /// Below one window everything that fits is taken. Above it, the unaligned
    /// remainder is left for a later call.
    pub fn aligned_fill(&self, buffer_len: usize, pending: usize) -> usize {
        let fft_size = self.config.mel.fft_size;
        let hop = self.config.hop_size;
        let room = self.config.max_buffer_size.saturating_sub(buffer_len);
        let total = buffer_len + pending.min(room);
        if total < fft_size {
            return total - buffer_len;
        }
        let aligned = fft_size + (total - fft_size) / hop * hop;
        aligned.saturating_sub(buffer_len)
    }

    /// Samples to consume after processing `frame_count` frames from a buffer
    /// of `buffer_len`: everything up to one hop past the oldest frame taken.
    ///
    /// The next call starts on the same hop grid only when the buffer head was
    /// on it, i.e. `(buffer_len - fft_size) % hop_size == 0` (see
    /// [`Self::aligned_fill`]). When `hop_size > fft_size` the result exceeds
    /// `buffer_len`; the excess is the count of future samples to skip.
    pub fn samples_consumed(&self, frame_count: usize, buffer_len: usize) -> usize {
        let required = self.samples_for_frames(frame_count);
        if frame_count == 0 || buffer_len < required {
            return 0;
        }
        buffer_len - required + self.hop_advance(frame_count)
    }

    /// Append samples, dropping the oldest ones past `max_buffer_size`.
    pub fn add_samples(&self, chunk: &[f32]) {
        if chunk.is_empty() {
            return;
        }
        let max = self.config.max_buffer_size;
        let chunk = if chunk.len() > max {
            &chunk[chunk.len() - max..]
        } else {
            chunk
        };

        let dropped = {
            let mut buffer = self.buffer.lock();
            buffer.extend(chunk.iter().copied());
            let overflow = buffer.len().saturating_sub(max);
            buffer.drain(..overflow);
            self.generation.fetch_add(1, Ordering::AcqRel);
            overflow
        };
        self.caches.lock().clear();

        if dropped > 0 {
            log::debug!(
                "[{}] streaming buffer full, dropped {} oldest samples",
                self.ctx.label(),
                dropped
            );
        }
    }

    /// Remove up to `count` of the oldest samples. Returns how many were removed.
    pub fn consume(&self, count: usize) -> usize {
        let removed = {
            let mut buffer = self.buffer.lock();
            let n = count.min(buffer.len());
            if n > 0 {
                buffer.drain(..n);
                self.generation.fetch_add(1, Ordering::AcqRel);
            }
            n
        };
        if removed > 0 {
            self.caches.lock().clear();
        }
        removed
    }

    pub fn reset(&self) {
        {
            let mut buffer = self.buffer.lock();
            buffer.clear();
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        self.caches.lock().clear();
        self.generator.clear_cache();
        self.generator.fft().clear_cache();
        self.converter.clear_caches();
        log::debug!("[{}] streaming state reset", self.ctx.label());
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Mel frames for the newest `frame_count` windows, oldest first.
    ///
    /// Empty when fewer than `fft_size + (frame_count - 1) * hop_size`
    /// samples are buffered.
    pub fn process_mel_spectrogram(&self, frame_count: usize) -> Vec<Vec<f32>> {
        self.mel_frames(frame_count)
            .map(|(mel, _, _)| mel)
            .unwrap_or_default()
    }

    /// Log-compressed variant of [`process_mel_spectrogram`](Self::process_mel_spectrogram),
    /// cached separately per parameter set.
    pub fn process_log_mel_spectrogram(
        &self,
        frame_count: usize,
        params: &LogMelParams,
    ) -> Vec<Vec<f32>> {
        if frame_count == 0 {
            return Vec::new();
        }

        let (len, generation) = self.buffer_state();
        let key = (frame_count, len, generation, params.cache_bits());
        if let Some(hit) = self.caches.lock().log_mel.get(&key) {
            return hit;
        }

        let Some((mel, len, generation)) = self.mel_frames(frame_count) else {
            return Vec::new();
        };
        let log_mel = self.converter.mel_to_log_mel(&mel, params);
        if log_mel.is_empty() {
            return log_mel;
        }

        let key = (frame_count, len, generation, params.cache_bits());
        self.caches.lock().log_mel.insert(key, log_mel.clone());
        log_mel
    }

    pub fn mel_cache_stats(&self) -> CacheStats {
        self.caches.lock().mel.stats()
    }

    pub fn log_mel_cache_stats(&self) -> CacheStats {
        self.caches.lock().log_mel.stats()
    }

    fn buffer_state(&self) -> (usize, u64) {
        let buffer = self.buffer.lock();
        (buffer.len(), self.generation.load(Ordering::Acquire))
    }

    /// Copy the newest `required` samples along with the length and generation they came from.
    fn snapshot_tail(&self, required: usize) -> Option<(Vec<f32>, usize, u64)> {
        let buffer = self.buffer.lock();
        let len = buffer.len();
        if len < required {
            return None;
        }
        let tail = buffer.range(len - required..).copied().collect();
        Some((tail, len, self.generation.load(Ordering::Acquire)))
    }

    fn mel_frames(&self, frame_count: usize) -> Option<(Vec<Vec<f32>>, usize, u64)> {
        if frame_count == 0 {
            return None;
        }
        let required = self.samples_for_frames(frame_count);

        let (len, generation) = self.buffer_state();
        if len < required {
            log::debug!(
                "[{}] waiting for samples: {} buffered, {} needed for {} frames",
                self.ctx.label(),
                len,
                required,
                frame_count
            );
            return None;
        }

        if let Some(hit) = self.caches.lock().mel.get(&(frame_count, len, generation)) {
            return Some((hit, len, generation));
        }

        let (tail, len, generation) = self.snapshot_tail(required)?;
        let mel = self.ctx.time("streaming_mel", || {
            let spectrogram = self.generator.generate(&tail, self.config.hop_size);
            self.converter.spec_to_mel_spec(&spectrogram)
        });
        if mel.is_empty() {
            return None;
        }

        self.caches
            .lock()
            .mel
            .insert((frame_count, len, generation), mel.clone());
        Some((mel, len, generation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> StreamingConfig {
        StreamingConfig {
            mel: MelConfig {
                fft_size: 1024,
                mel_bands: 40,
                ..MelConfig::default()
            },
            hop_size: 256,
            max_buffer_size: 8192,
            generator: GeneratorOptions {
                worker_threads: 2,
                ..GeneratorOptions::default()
            },
        }
    }

    fn processor(config: StreamingConfig) -> StreamingMelProcessor {
        StreamingMelProcessor::new(config, DspContext::new("streaming-test")).unwrap()
    }

    fn tone(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / 44100.0).sin() * 0.5)
            .collect()
    }

    #[test]
    fn rejects_invalid_config() {
        let ctx = DspContext::new("t");
        let zero_hop = StreamingConfig { hop_size: 0, ..small_config() };
        assert!(matches!(
            StreamingMelProcessor::new(zero_hop, Arc::clone(&ctx)),
            Err(FeatureError::InvalidHopSize)
        ));
        let tiny = StreamingConfig { max_buffer_size: 512, ..small_config() };
        assert!(StreamingMelProcessor::new(tiny, ctx).is_err());
    }

    #[test]
    fn one_frame_after_one_window() {
        let stream = processor(small_config());
        stream.add_samples(&tone(440.0, 1024));
        let mel = stream.process_mel_spectrogram(1);
        assert_eq!(mel.len(), 1);
        assert_eq!(mel[0].len(), 40);
    }

    #[test]
    fn insufficient_samples_yield_empty() {
        let stream = processor(small_config());
        assert!(stream.process_mel_spectrogram(1).is_empty());
        stream.add_samples(&tone(440.0, 1000));
        assert!(stream.process_mel_spectrogram(1).is_empty());
        stream.add_samples(&tone(440.0, 24));
        assert_eq!(stream.process_mel_spectrogram(1).len(), 1);
        assert!(stream.process_mel_spectrogram(2).is_empty());
        assert!(stream.process_mel_spectrogram(0).is_empty());
    }

    #[test]
    fn reset_clears_everything() {
        let stream = processor(small_config());
        stream.add_samples(&tone(440.0, 4096));
        stream.process_mel_spectrogram(2);
        stream.reset();
        assert_eq!(stream.buffer_len(), 0);
        assert!(stream.process_mel_spectrogram(1).is_empty());
    }

    #[test]
    fn buffer_drops_oldest_on_overflow() {
        let config = small_config();
        let stream = processor(config);
        let signal = tone(440.0, 3000);
        let noise: Vec<f32> = (0..9000).map(|i| ((i * 7919) % 97) as f32 / 97.0 - 0.5).collect();
        stream.add_samples(&noise);
        assert_eq!(stream.buffer_len(), 8192);
        stream.add_samples(&signal);
        assert_eq!(stream.buffer_len(), 8192);

        // the newest window must come from the tone only
        let fresh = processor(config);
        fresh.add_samples(&signal);
        assert_eq!(stream.process_mel_spectrogram(2), fresh.process_mel_spectrogram(2));
    }

    #[test]
    fn frames_come_from_the_tail() {
        let stream = processor(small_config());
        let mut signal = tone(300.0, 2048);
        signal.extend(tone(3000.0, 1024 + 256));
        stream.add_samples(&signal);

        let mel = stream.process_mel_spectrogram(2);
        let tail = &signal[signal.len() - stream.samples_for_frames(2)..];
        let spec = stream.generator().generate(tail, 256);
        let expected = stream.converter().spec_to_mel_spec(&spec);
        assert_eq!(mel, expected);
    }

    #[test]
    fn adding_samples_invalidates_cache() {
        let stream = processor(small_config());
        stream.add_samples(&tone(440.0, 2048));
        let before = stream.process_mel_spectrogram(1);
        assert_eq!(stream.process_mel_spectrogram(1), before);
        assert_eq!(stream.mel_cache_stats().hits, 1);

        stream.add_samples(&tone(2000.0, 1024));
        let after = stream.process_mel_spectrogram(1);
        assert_ne!(after, before);
        assert_eq!(stream.mel_cache_stats().hits, 1);
    }

    #[test]
    fn processing_does_not_trim() {
        let stream = processor(small_config());
        stream.add_samples(&tone(440.0, 2048));
        stream.process_mel_spectrogram(3);
        stream.process_log_mel_spectrogram(3, &LogMelParams::default());
        assert_eq!(stream.buffer_len(), 2048);
        assert_eq!(stream.consume(512), 512);
        assert_eq!(stream.buffer_len(), 1536);
        assert_eq!(stream.consume(10_000), 1536);
        assert_eq!(stream.consume(1), 0);
    }

    #[test]
    fn log_mel_is_cached_per_params() {
        let stream = processor(small_config());
        stream.add_samples(&tone(440.0, 2048));
        let params = LogMelParams::default();
        let a = stream.process_log_mel_spectrogram(2, &params);
        let b = stream.process_log_mel_spectrogram(2, &params);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert!(a.iter().flatten().all(|&v| v >= params.min_db && v <= params.max_db));
        assert_eq!(stream.log_mel_cache_stats().hits, 1);

        let other = LogMelParams { max_db: 0.0, ..params };
        stream.process_log_mel_spectrogram(2, &other);
        assert_eq!(stream.log_mel_cache_stats().misses, 2);

        stream.consume(1);
        stream.process_log_mel_spectrogram(2, &params);
        assert_eq!(stream.log_mel_cache_stats().misses, 3);
    }

    #[test]
    fn consumption_helpers() {
        let stream = processor(small_config());
        assert_eq!(stream.samples_for_frames(0), 0);
        assert_eq!(stream.samples_for_frames(1), 1024);
        assert_eq!(stream.samples_for_frames(4), 1024 + 3 * 256);
        assert_eq!(stream.hop_advance(4), 1024);
        assert_eq!(stream.available_frames(1023), 0);
        assert_eq!(stream.available_frames(1280), 2);
        assert_eq!(stream.samples_consumed(2, 1280), 512);
        assert_eq!(stream.samples_consumed(2, 1300), 532);
        assert_eq!(stream.samples_consumed(2, 1000), 0);
    }

    #[test]
    fn aligned_fill_holds_back_partial_hops() {
        let stream = processor(small_config());
        assert_eq!(stream.aligned_fill(0, 300), 300);
        assert_eq!(stream.aligned_fill(900, 300), 124);
        assert_eq!(stream.aligned_fill(768, 600), 512);
        assert_eq!(stream.aligned_fill(1280, 100), 0);
        // capped at the buffer limit, which is itself on the grid here
        assert_eq!(stream.aligned_fill(0, 20_000), 8192);

        let len = 768 + stream.aligned_fill(768, 600);
        assert_eq!((len - 1024) % 256, 0);
    }

    #[test]
    fn concurrent_producers_and_consumers() {
        let stream = Arc::new(processor(small_config()));
        let producer = {
            let stream = Arc::clone(&stream);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    stream.add_samples(&tone(440.0, 256));
                }
            })
        };
        let consumer = {
            let stream = Arc::clone(&stream);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let mel = stream.process_mel_spectrogram(1);
                    assert!(mel.is_empty() || mel.len() == 1);
                }
            })
        };
        producer.join().unwrap();
        consumer.join().unwrap();
        assert!(stream.buffer_len() <= 8192);
        assert_eq!(stream.process_mel_spectrogram(1).len(), 1);
    }
}
