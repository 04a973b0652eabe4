pub mod cache;
pub mod fft;
pub mod mel;
pub mod scratch;
pub mod spectrogram;
pub mod streaming;

pub use cache::{BoundedCache, CacheStats, Fingerprint};
pub use fft::FftProcessor;
pub use mel::{LogMelParams, MelConfig, MelFilterbank, MelScale, MelSpectrogramConverter};
pub use spectrogram::{frame_count, GeneratorOptions, SpectrogramGenerator, Strategy};
pub use streaming::{StreamingConfig, StreamingMelProcessor, DEFAULT_MAX_BUFFER};
