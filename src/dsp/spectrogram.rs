use parking_lot::Mutex;
use rayon::prelude::*;
use std::sync::Arc;

use super::cache::{BoundedCache, CacheStats, Fingerprint};
use super::fft::FftProcessor;
use super::scratch::FftScratch;
use crate::context::DspContext;
use crate::error::{FeatureError, FeatureResult};

const CACHE_CAPACITY: usize = 5;

/// How frames are scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Parallel at or above the configured frame threshold, sequential below.
    Auto,
    Sequential,
    Parallel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeneratorOptions {
    /// Minimum frame count for the parallel path.
    pub parallel_threshold: usize,
    /// Upper bound on frames per worker batch.
    pub max_batch_size: usize,
    /// Worker pool size, 0 = one per core.
    pub worker_threads: usize,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            parallel_threshold: 8,
            max_batch_size: 8,
            worker_threads: 0,
        }
    }
}

type CacheKey = (Fingerprint, usize, Strategy);

/// Number of analysis frames for `len` samples. Zero when there is not a
/// full window or the hop is zero.
pub fn frame_count(len: usize, fft_size: usize, hop_size: usize) -> usize {
    if hop_size == 0 || fft_size == 0 || len < fft_size {
        return 0;
    }
    ((len - fft_size) / hop_size + 1).max(1)
}

/// Slices a sample buffer into overlapping frames and runs the FFT on each.
pub struct SpectrogramGenerator {
    fft: Arc<FftProcessor>,
    options: GeneratorOptions,
    workers: rayon::ThreadPool,
    cache: Mutex<BoundedCache<CacheKey, Vec<Vec<f32>>>>,
    ctx: Arc<DspContext>,
}

impl SpectrogramGenerator {
    pub fn new(
        fft: Arc<FftProcessor>,
        options: GeneratorOptions,
        ctx: Arc<DspContext>,
    ) -> FeatureResult<Self> {
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(options.worker_threads)
            .thread_name(|i| format!("melstream-fft-{}", i))
            .build()
            .map_err(|e| FeatureError::WorkerPool(e.to_string()))?;

        let options = GeneratorOptions {
            max_batch_size: options.max_batch_size.max(1),
            ..options
        };

        log::debug!(
            "[{}] spectrogram generator: fft={}, workers={}, threshold={}, max_batch={}",
            ctx.label(),
            fft.fft_size(),
            workers.current_num_threads(),
            options.parallel_threshold,
            options.max_batch_size
        );

        Ok(Self {
            fft,
            options,
            workers,
            cache: Mutex::new(BoundedCache::new(CACHE_CAPACITY)),
            ctx,
        })
    }

    pub fn fft(&self) -> &Arc<FftProcessor> {
        &self.fft
    }

    pub fn fft_size(&self) -> usize {
        self.fft.fft_size()
    }

    pub fn options(&self) -> GeneratorOptions {
        self.options
    }

    pub fn worker_count(&self) -> usize {
        self.workers.current_num_threads()
    }

    /// Spectrogram of `buffer` with frames `hop_size` apart.
    ///
    /// Returns an empty spectrogram when the buffer is shorter than one window.
    pub fn generate(&self, buffer: &[f32], hop_size: usize) -> Vec<Vec<f32>> {
        self.generate_with(buffer, hop_size, Strategy::Auto)
    }

    pub fn generate_sequential(&self, buffer: &[f32], hop_size: usize) -> Vec<Vec<f32>> {
        self.generate_with(buffer, hop_size, Strategy::Sequential)
    }

    pub fn generate_parallel(&self, buffer: &[f32], hop_size: usize) -> Vec<Vec<f32>> {
        self.generate_with(buffer, hop_size, Strategy::Parallel)
    }

    pub fn generate_with(
        &self,
        buffer: &[f32],
        hop_size: usize,
        strategy: Strategy,
    ) -> Vec<Vec<f32>> {
        let fft_size = self.fft.fft_size();
        let frames = frame_count(buffer.len(), fft_size, hop_size);
        if frames == 0 {
            log::debug!(
                "[{}] insufficient samples for spectrogram: {} < {} (hop {})",
                self.ctx.label(),
                buffer.len(),
                fft_size,
                hop_size
            );
            return Vec::new();
        }

        let strategy = match strategy {
            Strategy::Auto if frames >= self.options.parallel_threshold => Strategy::Parallel,
            Strategy::Auto => Strategy::Sequential,
            s => s,
        };

        let key = (Fingerprint::of_samples(buffer), hop_size, strategy);
        if let Some(hit) = self.cache.lock().get(&key) {
            log::trace!("[{}] spectrogram cache hit ({} frames)", self.ctx.label(), hit.len());
            return hit;
        }

        let spectrogram = match strategy {
            Strategy::Parallel => self.ctx.time("spectrogram_parallel", || {
                self.compute_parallel(buffer, hop_size, frames)
            }),
            _ => self.ctx.time("spectrogram_sequential", || {
                self.compute_sequential(buffer, hop_size, frames)
            }),
        };

        self.cache.lock().insert(key, spectrogram.clone());
        spectrogram
    }

    fn compute_sequential(&self, buffer: &[f32], hop_size: usize, frames: usize) -> Vec<Vec<f32>> {
        let pool = self.fft.scratch_pool();
        let mut scratch = pool.acquire();
        let out = (0..frames)
            .map(|i| self.frame_spectrum(buffer, i * hop_size, &mut scratch))
            .collect();
        pool.release(scratch);
        out
    }

    fn compute_parallel(&self, buffer: &[f32], hop_size: usize, frames: usize) -> Vec<Vec<f32>> {
        let workers = self.workers.current_num_threads().max(1);
        let batch = (frames / workers).clamp(1, self.options.max_batch_size);
        let mut out: Vec<Vec<f32>> = vec![Vec::new(); frames];

        // Each batch owns a disjoint slice of the output, indexed by absolute frame.
        self.workers.install(|| {
            out.par_chunks_mut(batch)
                .enumerate()
                .for_each(|(batch_idx, slots)| {
                    let pool = self.fft.scratch_pool();
                    let mut scratch = pool.acquire();
                    let first = batch_idx * batch;
                    for (offset, slot) in slots.iter_mut().enumerate() {
                        let start = (first + offset) * hop_size;
                        *slot = self.frame_spectrum(buffer, start, &mut scratch);
                    }
                    pool.release(scratch);
                });
        });

        out
    }

    fn frame_spectrum(&self, buffer: &[f32], start: usize, scratch: &mut FftScratch) -> Vec<f32> {
        let fft_size = self.fft.fft_size();
        let end = start + fft_size;
        if end <= buffer.len() {
            return self.fft.perform_fft_with_scratch(&buffer[start..end], scratch);
        }

        // Guard only: frame_count keeps every window of `generate` in bounds.
        let mut padded = vec![0.0f32; fft_size];
        if start < buffer.len() {
            let available = buffer.len() - start;
            padded[..available].copy_from_slice(&buffer[start..]);
        }
        self.fft.perform_fft_with_scratch(&padded, scratch)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}
