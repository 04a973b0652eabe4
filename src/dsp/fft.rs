use parking_lot::Mutex;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use super::cache::{BoundedCache, CacheStats, Fingerprint};
use super::scratch::{FftScratch, ScratchPool};
use crate::context::DspContext;
use crate::error::{FeatureError, FeatureResult};

/// Added to every power value so silent bins stay finite in dB.
pub const EPSILON: f32 = 1e-10;

const CACHE_CAPACITY: usize = 10;
const MAX_IDLE_SCRATCH: usize = 16;

/// Windowed FFT of one fixed-size frame, returning `fft_size / 2` dB magnitudes.
pub struct FftProcessor {
    fft_size: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    pool: ScratchPool,
    cache: Mutex<BoundedCache<Fingerprint, Vec<f32>>>,
    ctx: Arc<DspContext>,
}

impl FftProcessor {
    pub fn new(fft_size: usize, ctx: Arc<DspContext>) -> FeatureResult<Self> {
        if fft_size < 2 || !fft_size.is_power_of_two() {
            return Err(FeatureError::InvalidFftSize(fft_size));
        }

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let pool = ScratchPool::new(fft_size, fft.get_inplace_scratch_len(), MAX_IDLE_SCRATCH);

        log::debug!("[{}] FFT processor ready: size={}", ctx.label(), fft_size);

        Ok(Self {
            fft_size,
            window: hann_window(fft_size),
            fft,
            pool,
            cache: Mutex::new(BoundedCache::new(CACHE_CAPACITY)),
            ctx,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of non-redundant bins in each spectrum.
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn window(&self) -> &[f32] {
        &self.window
    }

    pub(crate) fn scratch_pool(&self) -> &ScratchPool {
        &self.pool
    }

    /// Magnitude spectrum in dB of the first `fft_size` samples of `frame`.
    ///
    /// Returns an empty vector when `frame` is shorter than one FFT window.
    pub fn perform_fft(&self, frame: &[f32]) -> Vec<f32> {
        if frame.len() < self.fft_size {
            log::debug!(
                "[{}] insufficient samples for FFT: {} < {}",
                self.ctx.label(),
                frame.len(),
                self.fft_size
            );
            return Vec::new();
        }
        let frame = &frame[..self.fft_size];

        let key = Fingerprint::of_samples(frame);
        if let Some(hit) = self.cache.lock().get(&key) {
            return hit;
        }

        let mut scratch = self.pool.acquire();
        let spectrum = self.ctx.time("fft", || self.transform(frame, &mut scratch));
        self.pool.release(scratch);

        self.cache.lock().insert(key, spectrum.clone());
        spectrum
    }

    /// Uncached transform on caller-owned scratch. Used by batch workers.
    pub fn perform_fft_with_scratch(&self, frame: &[f32], scratch: &mut FftScratch) -> Vec<f32> {
        if frame.len() < self.fft_size {
            return Vec::new();
        }
        self.transform(&frame[..self.fft_size], scratch)
    }

    fn transform(&self, frame: &[f32], scratch: &mut FftScratch) -> Vec<f32> {
        for ((dst, &s), &w) in scratch.buffer.iter_mut().zip(frame).zip(&self.window) {
            *dst = Complex::new(s * w, 0.0);
        }

        self.fft
            .process_with_scratch(&mut scratch.buffer, &mut scratch.scratch);

        let scale = 2.0 / self.fft_size as f32;
        scratch.buffer[..self.bin_count()]
            .iter()
            .map(|c| 10.0 * (c.norm_sqr() * scale + EPSILON).log10())
            .collect()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}
