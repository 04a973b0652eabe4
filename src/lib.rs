//! Real-time spectral feature extraction: dB spectrograms and log-mel
//! spectrograms from mono f32 PCM, in batch or streaming form.

pub mod audio;
pub mod config;
pub mod context;
pub mod dsp;
pub mod error;
pub mod pipeline;

pub use context::DspContext;
pub use error::{FeatureError, FeatureResult};
