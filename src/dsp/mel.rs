//! Triangular mel filterbank and spectrogram-to-mel conversion.
//!
//! Spectrogram rows are dB magnitudes as produced by [`FftProcessor`]; the
//! converter maps them back to power before projecting onto mel bands, then
//! [`MelSpectrogramConverter::mel_to_log_mel`] compresses the result to dB.
//!
//! [`FftProcessor`]: super::fft::FftProcessor

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

use super::cache::{BoundedCache, CacheStats, Fingerprint};
use crate::context::DspContext;
use crate::error::{FeatureError, FeatureResult};

const CACHE_CAPACITY: usize = 5;

/// Hz to mel formula.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MelScale {
    /// `2595 * log10(1 + f / 700)`
    Htk,
    /// `1127 * ln(1 + f / 700)`
    #[default]
    Natural,
}

impl MelScale {
    pub fn hz_to_mel(self, hz: f32) -> f32 {
        match self {
            MelScale::Htk => 2595.0 * (1.0 + hz / 700.0).log10(),
            MelScale::Natural => 1127.0 * (1.0 + hz / 700.0).ln(),
        }
    }

    pub fn mel_to_hz(self, mel: f32) -> f32 {
        match self {
            MelScale::Htk => 700.0 * (10.0f32.powf(mel / 2595.0) - 1.0),
            MelScale::Natural => 700.0 * ((mel / 1127.0).exp() - 1.0),
        }
    }
}

/// Filterbank geometry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MelConfig {
    pub sample_rate: u32,
    pub fft_size: usize,
    pub mel_bands: usize,
    pub min_freq: f32,
    /// Upper edge in Hz, `None` for Nyquist.
    pub max_freq: Option<f32>,
    pub scale: MelScale,
}

impl Default for MelConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            fft_size: 1024,
            mel_bands: 80,
            min_freq: 0.0,
            max_freq: None,
            scale: MelScale::Natural,
        }
    }
}

impl MelConfig {
    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    pub fn max_freq_hz(&self) -> f32 {
        self.max_freq.unwrap_or_else(|| self.nyquist())
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn validate(&self) -> FeatureResult<()> {
        if self.fft_size < 2 || !self.fft_size.is_power_of_two() {
            return Err(FeatureError::InvalidFftSize(self.fft_size));
        }
        if self.mel_bands == 0 {
            return Err(FeatureError::InvalidMelBands);
        }
        if self.sample_rate == 0 {
            return Err(FeatureError::InvalidSampleRate);
        }
        let (min_hz, max_hz, nyquist) = (self.min_freq, self.max_freq_hz(), self.nyquist());
        if !(min_hz >= 0.0 && min_hz < max_hz && max_hz <= nyquist) {
            return Err(FeatureError::InvalidFrequencyRange {
                min_hz,
                max_hz,
                nyquist,
            });
        }
        Ok(())
    }
}

/// `mel_bands x bin_count` matrix of triangular weights.
#[derive(Clone, Debug, PartialEq)]
pub struct MelFilterbank {
    weights: Vec<Vec<f32>>,
    bin_count: usize,
    degenerate: Vec<usize>,
}

impl MelFilterbank {
    /// Build the filterbank for a validated configuration.
    pub fn build(config: &MelConfig) -> Self {
        let bin_count = config.bin_count();
        let bands = config.mel_bands;
        let scale = config.scale;

        let mel_min = scale.hz_to_mel(config.min_freq);
        let mel_max = scale.hz_to_mel(config.max_freq_hz());

        let last_bin = bin_count.saturating_sub(1) as f32;
        let bins: Vec<usize> = (0..bands + 2)
            .map(|i| {
                let mel = mel_min + (mel_max - mel_min) * i as f32 / (bands + 1) as f32;
                let hz = scale.mel_to_hz(mel);
                (hz * config.fft_size as f32 / config.sample_rate as f32)
                    .floor()
                    .clamp(0.0, last_bin) as usize
            })
            .collect();

        let mut weights = vec![vec![0.0f32; bin_count]; bands];
        let mut degenerate = Vec::new();

        for (band, row) in weights.iter_mut().enumerate() {
            let (left, center, right) = (bins[band], bins[band + 1], bins[band + 2]);
            if right < left + 2 {
                degenerate.push(band);
                continue;
            }

            for (j, w) in row.iter_mut().enumerate().take(right + 1).skip(left) {
                *w = if j < center {
                    (j - left) as f32 / (center - left) as f32
                } else if j == center {
                    1.0
                } else {
                    (right - j) as f32 / (right - center) as f32
                };
            }

            let sum: f32 = row.iter().sum();
            if sum > 0.0 {
                row.iter_mut().for_each(|w| *w /= sum);
            }
        }

        if !degenerate.is_empty() {
            log::warn!(
                "{} of {} mel bands collapse to fewer than 2 FFT bins and stay zero \
                 (fft_size={}, range {:.0}-{:.0} Hz): {:?}",
                degenerate.len(),
                bands,
                config.fft_size,
                config.min_freq,
                config.max_freq_hz(),
                degenerate
            );
        }

        Self {
            weights,
            bin_count,
            degenerate,
        }
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.weights
    }

    pub fn band_count(&self) -> usize {
        self.weights.len()
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    /// Bands whose triangle spans fewer than 2 bins. Their rows are all zero.
    pub fn degenerate_bands(&self) -> &[usize] {
        &self.degenerate
    }

    /// Project one power spectrum onto the mel bands. NaN and negative sums become 0.
    pub fn project(&self, power: &[f32]) -> Vec<f32> {
        self.weights
            .iter()
            .map(|row| {
                let dot: f32 = row.iter().zip(power).map(|(w, p)| w * p).sum();
                if dot.is_nan() || dot < 0.0 {
                    0.0
                } else {
                    dot
                }
            })
            .collect()
    }
}

/// Log compression parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogMelParams {
    /// Reference level mapped to 0 dB.
    pub ref_level: f32,
    /// Values are clipped to at least this before the log.
    pub floor: f32,
    pub min_db: f32,
    pub max_db: f32,
}

impl Default for LogMelParams {
    fn default() -> Self {
        Self {
            ref_level: 1.0,
            floor: 1e-10,
            min_db: -100.0,
            max_db: 60.0,
        }
    }
}

impl LogMelParams {
    pub fn validate(&self) -> FeatureResult<()> {
        if !(self.ref_level > 0.0) {
            return Err(FeatureError::InvalidLogParams(format!(
                "ref_level must be positive, got {}",
                self.ref_level
            )));
        }
        if !(self.floor > 0.0) {
            return Err(FeatureError::InvalidLogParams(format!(
                "floor must be positive, got {}",
                self.floor
            )));
        }
        if !(self.min_db <= self.max_db) {
            return Err(FeatureError::InvalidLogParams(format!(
                "min_db {} exceeds max_db {}",
                self.min_db, self.max_db
            )));
        }
        Ok(())
    }

    pub(crate) fn cache_bits(&self) -> [u32; 4] {
        [
            self.ref_level.to_bits(),
            self.floor.to_bits(),
            self.min_db.to_bits(),
            self.max_db.to_bits(),
        ]
    }

    /// dB value of one mel energy, clamped to `[min_db, max_db]`.
    pub fn compress(&self, value: f32) -> f32 {
        // f32::max drops a NaN operand, so NaN lands on the floor
        let clipped = value.max(self.floor);
        let db = 10.0 * (clipped / self.ref_level).log10();
        if db.is_nan() {
            self.min_db
        } else {
            db.clamp(self.min_db, self.max_db)
        }
    }
}

/// Projects spectrograms onto a lazily built mel filterbank.
pub struct MelSpectrogramConverter {
    config: MelConfig,
    filterbank: OnceLock<Arc<MelFilterbank>>,
    mel_cache: Mutex<BoundedCache<Fingerprint, Vec<Vec<f32>>>>,
    log_cache: Mutex<BoundedCache<(Fingerprint, [u32; 4]), Vec<Vec<f32>>>>,
    ctx: Arc<DspContext>,
}

impl MelSpectrogramConverter {
    pub fn new(config: MelConfig, ctx: Arc<DspContext>) -> FeatureResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            filterbank: OnceLock::new(),
            mel_cache: Mutex::new(BoundedCache::new(CACHE_CAPACITY)),
            log_cache: Mutex::new(BoundedCache::new(CACHE_CAPACITY)),
            ctx,
        })
    }

    pub fn config(&self) -> &MelConfig {
        &self.config
    }

    /// The filterbank, built on first access.
    pub fn filterbank(&self) -> &Arc<MelFilterbank> {
        self.filterbank.get_or_init(|| {
            let fb = self.ctx.time("mel_filterbank", || MelFilterbank::build(&self.config));
            log::info!(
                "[{}] mel filterbank built: {} bands x {} bins, {:?} scale, {:.0}-{:.0} Hz",
                self.ctx.label(),
                fb.band_count(),
                fb.bin_count(),
                self.config.scale,
                self.config.min_freq,
                self.config.max_freq_hz()
            );
            Arc::new(fb)
        })
    }

    /// Mel energies for each frame of a dB spectrogram.
    pub fn spec_to_mel_spec(&self, spectrogram: &[Vec<f32>]) -> Vec<Vec<f32>> {
        if spectrogram.is_empty() {
            return Vec::new();
        }

        let fb = self.filterbank();
        if let Some(bad) = spectrogram.iter().find(|row| row.len() != fb.bin_count()) {
            log::warn!(
                "[{}] spectrogram row has {} bins, filterbank expects {}",
                self.ctx.label(),
                bad.len(),
                fb.bin_count()
            );
            return Vec::new();
        }

        let key = Fingerprint::of_matrix(spectrogram);
        if let Some(hit) = self.mel_cache.lock().get(&key) {
            return hit;
        }

        let mel = self.ctx.time("spec_to_mel", || {
            let mut power = vec![0.0f32; fb.bin_count()];
            spectrogram
                .iter()
                .map(|row| {
                    for (p, &db) in power.iter_mut().zip(row) {
                        *p = 10.0f32.powf(db / 10.0);
                    }
                    fb.project(&power)
                })
                .collect::<Vec<_>>()
        });

        self.mel_cache.lock().insert(key, mel.clone());
        mel
    }

    /// Log-compressed mel spectrogram. Invalid parameters yield an empty result.
    pub fn mel_to_log_mel(&self, mel: &[Vec<f32>], params: &LogMelParams) -> Vec<Vec<f32>> {
        if mel.is_empty() {
            return Vec::new();
        }
        if let Err(e) = params.validate() {
            log::warn!("[{}] {}", self.ctx.label(), e);
            return Vec::new();
        }

        let key = (Fingerprint::of_matrix(mel), params.cache_bits());
        if let Some(hit) = self.log_cache.lock().get(&key) {
            return hit;
        }

        let log_mel: Vec<Vec<f32>> = self.ctx.time("mel_to_log_mel", || {
            mel.iter()
                .map(|frame| frame.iter().map(|&v| params.compress(v)).collect())
                .collect()
        });

        self.log_cache.lock().insert(key, log_mel.clone());
        log_mel
    }

    /// `spec_to_mel_spec` followed by `mel_to_log_mel`.
    pub fn spec_to_log_mel(
        &self,
        spectrogram: &[Vec<f32>],
        params: &LogMelParams,
    ) -> Vec<Vec<f32>> {
        let mel = self.spec_to_mel_spec(spectrogram);
        self.mel_to_log_mel(&mel, params)
    }

    pub fn mel_cache_stats(&self) -> CacheStats {
        self.mel_cache.lock().stats()
    }

    pub fn log_cache_stats(&self) -> CacheStats {
        self.log_cache.lock().stats()
    }

    pub fn clear_caches(&self) {
        self.mel_cache.lock().clear();
        self.log_cache.lock().clear();
    }
}
