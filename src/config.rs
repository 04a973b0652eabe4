use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::dsp::{GeneratorOptions, LogMelParams, MelConfig, MelScale, StreamingConfig};
use crate::error::{FeatureError, FeatureResult};

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub spectrogram: SpectrogramConfig,
    #[serde(default)]
    pub mel: MelSection,
    #[serde(default)]
    pub log_mel: LogMelParams,
    #[serde(default)]
    pub streaming: StreamingSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpectrogramConfig {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_hop_size")]
    pub hop_size: usize,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// 0 = one worker per core
    #[serde(default)]
    pub worker_threads: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MelSection {
    #[serde(default = "default_mel_bands")]
    pub mel_bands: usize,
    #[serde(default)]
    pub min_freq: f32,
    #[serde(default)]
    pub max_freq: Option<f32>,
    #[serde(default)]
    pub mel_scale: MelScale,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamingSection {
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for SpectrogramConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            hop_size: default_hop_size(),
            sample_rate: default_sample_rate(),
            parallel_threshold: default_parallel_threshold(),
            max_batch_size: default_max_batch_size(),
            worker_threads: 0,
        }
    }
}

impl Default for MelSection {
    fn default() -> Self {
        Self {
            mel_bands: default_mel_bands(),
            min_freq: 0.0,
            max_freq: None,
            mel_scale: MelScale::default(),
        }
    }
}

impl Default for StreamingSection {
    fn default() -> Self {
        Self {
            max_buffer_size: default_max_buffer_size(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_fft_size() -> usize { 1024 }
fn default_hop_size() -> usize { 256 }
fn default_sample_rate() -> u32 { 44100 }
fn default_parallel_threshold() -> usize { 8 }
fn default_max_batch_size() -> usize { 8 }
fn default_mel_bands() -> usize { 80 }
fn default_max_buffer_size() -> usize { crate::dsp::DEFAULT_MAX_BUFFER }
fn default_chunk_size() -> usize { 512 }

impl Config {
    pub fn mel_config(&self) -> MelConfig {
        MelConfig {
            sample_rate: self.spectrogram.sample_rate,
            fft_size: self.spectrogram.fft_size,
            mel_bands: self.mel.mel_bands,
            min_freq: self.mel.min_freq,
            max_freq: self.mel.max_freq,
            scale: self.mel.mel_scale,
        }
    }

    pub fn generator_options(&self) -> GeneratorOptions {
        GeneratorOptions {
            parallel_threshold: self.spectrogram.parallel_threshold,
            max_batch_size: self.spectrogram.max_batch_size,
            worker_threads: self.spectrogram.worker_threads,
        }
    }

    pub fn streaming_config(&self) -> StreamingConfig {
        StreamingConfig {
            mel: self.mel_config(),
            hop_size: self.spectrogram.hop_size,
            max_buffer_size: self.streaming.max_buffer_size,
            generator: self.generator_options(),
        }
    }

    pub fn validate(&self) -> FeatureResult<()> {
        self.streaming_config().validate()?;
        self.log_mel.validate()?;
        if self.streaming.chunk_size == 0 {
            return Err(FeatureError::InvalidChunkSize);
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
}

/// `melstream.toml` in the working directory, then the per-user config locations.
pub fn discover_config() -> Option<PathBuf> {
    let local = PathBuf::from("melstream.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("melstream").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("melstream").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}
