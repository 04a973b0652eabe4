use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "melstream", about = "Log-mel spectrogram extraction for voice conversion")]
pub struct Cli {
    /// Input audio file (WAV, MP3, FLAC, OGG)
    pub input: Option<PathBuf>,

    /// Write log-mel frames as JSON to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Config file (defaults to melstream.toml or the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// FFT size (power of two)
    #[arg(long, default_value_t = 1024)]
    pub fft_size: usize,

    /// Hop size in samples
    #[arg(long, default_value_t = 256)]
    pub hop_size: usize,

    /// Number of mel bands
    #[arg(long, default_value_t = 80)]
    pub mel_bands: usize,

    /// Use the HTK mel formula instead of the natural-log one
    #[arg(long)]
    pub htk: bool,

    /// Feed the audio through the streaming processor in chunks
    #[arg(long)]
    pub stream: bool,

    /// Chunk size in samples for --stream
    #[arg(long, default_value_t = 512)]
    pub chunk_size: usize,

    /// FFT worker threads (0 = one per core)
    #[arg(long, default_value_t = 0)]
    pub threads: usize,
}
