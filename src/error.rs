use thiserror::Error;

/// Configuration errors raised when a feature extractor is constructed.
///
/// Per-call processing never returns these; insufficient or degenerate input
/// resolves to an empty or zeroed result instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeatureError {
    #[error("FFT size must be a power of two >= 2, got {0}")]
    InvalidFftSize(usize),

    #[error("hop size must be greater than zero")]
    InvalidHopSize,

    #[error("mel band count must be greater than zero")]
    InvalidMelBands,

    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,

    #[error("invalid frequency range {min_hz}..{max_hz} Hz (nyquist {nyquist} Hz)")]
    InvalidFrequencyRange {
        min_hz: f32,
        max_hz: f32,
        nyquist: f32,
    },

    #[error("streaming buffer size {max_buffer} is smaller than one FFT window ({fft_size})")]
    InvalidBufferSize { max_buffer: usize, fft_size: usize },

    #[error("streaming chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("invalid log-mel parameters: {0}")]
    InvalidLogParams(String),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),
}

pub type FeatureResult<T> = std::result::Result<T, FeatureError>;
