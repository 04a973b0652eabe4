mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::BufWriter;

use cli::Cli;
use melstream::config::{self, Config};
use melstream::dsp::{MelScale, StreamingMelProcessor};
use melstream::pipeline::{self, FeatureExtractor};
use melstream::DspContext;

#[derive(Serialize)]
struct FeatureDump<'a> {
    sample_rate: u32,
    fft_size: usize,
    hop_size: usize,
    mel_bands: usize,
    mel_scale: MelScale,
    frames: &'a [Vec<f32>],
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let mut cfg = match cli.config.clone().or_else(config::discover_config) {
        Some(path) => match config::load_config(&path) {
            Ok(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            Err(err) => {
                log::warn!("{:#}", err);
                Config::default()
            }
        },
        None => Config::default(),
    };
    merge_cli(&cli, &mut cfg);

    let input = cli.input.as_ref().context("Input audio file is required")?;
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }

    let audio = melstream::audio::decode_file(input)?;
    cfg.spectrogram.sample_rate = audio.sample_rate;
    if let Some(max) = cfg.mel.max_freq {
        let nyquist = audio.sample_rate as f32 / 2.0;
        if max > nyquist {
            log::warn!("max_freq {:.0} Hz above nyquist, clamping to {:.0} Hz", max, nyquist);
            cfg.mel.max_freq = Some(nyquist);
        }
    }
    cfg.validate().context("Invalid feature configuration")?;

    log::info!(
        "fft={} hop={} mel_bands={} scale={:?} mode={}",
        cfg.spectrogram.fft_size,
        cfg.spectrogram.hop_size,
        cfg.mel.mel_bands,
        cfg.mel.mel_scale,
        if cli.stream { "streaming" } else { "batch" }
    );

    let ctx = DspContext::new("melstream");
    let frames = if cli.stream {
        run_streaming(&cfg, &audio.samples, &ctx)?
    } else {
        let extractor = FeatureExtractor::new(&cfg, ctx.clone())?;
        extractor.log_mel_spectrogram(&audio.samples)
    };

    if frames.is_empty() {
        log::warn!(
            "No frames produced: {} samples is shorter than one {}-sample window",
            audio.samples.len(),
            cfg.spectrogram.fft_size
        );
    } else {
        log::info!("Extracted {} log-mel frames of {} bands", frames.len(), frames[0].len());
    }

    if let Some(ref output) = cli.output {
        let file = std::fs::File::create(output)
            .with_context(|| format!("Failed to create {}", output.display()))?;
        let dump = FeatureDump {
            sample_rate: cfg.spectrogram.sample_rate,
            fft_size: cfg.spectrogram.fft_size,
            hop_size: cfg.spectrogram.hop_size,
            mel_bands: cfg.mel.mel_bands,
            mel_scale: cfg.mel.mel_scale,
            frames: &frames,
        };
        serde_json::to_writer(BufWriter::new(file), &dump)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        log::info!("Wrote {}", output.display());
    }

    ctx.finish();
    Ok(())
}

fn run_streaming(
    cfg: &Config,
    samples: &[f32],
    ctx: &std::sync::Arc<DspContext>,
) -> Result<Vec<Vec<f32>>> {
    let processor = StreamingMelProcessor::new(cfg.streaming_config(), ctx.clone())?;

    let pb = ProgressBar::new(samples.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} samples ({eta} remaining)",
            )
            .context("Invalid progress bar template")?
            .progress_chars("=>-"),
    );

    let frames = pipeline::stream_log_mel(
        &processor,
        samples,
        cfg.streaming.chunk_size,
        &cfg.log_mel,
        |fed| pb.set_position(fed as u64),
    );
    pb.finish_with_message("Streaming complete");

    log::info!("{} samples left unconsumed in the stream buffer", processor.buffer_len());
    Ok(frames)
}

// Flags only override the config file when moved off their defaults.
fn merge_cli(cli: &Cli, cfg: &mut Config) {
    if cli.fft_size != 1024 { cfg.spectrogram.fft_size = cli.fft_size; }
    if cli.hop_size != 256 { cfg.spectrogram.hop_size = cli.hop_size; }
    if cli.mel_bands != 80 { cfg.mel.mel_bands = cli.mel_bands; }
    if cli.htk { cfg.mel.mel_scale = MelScale::Htk; }
    if cli.chunk_size != 512 { cfg.streaming.chunk_size = cli.chunk_size; }
    if cli.threads != 0 { cfg.spectrogram.worker_threads = cli.threads; }
}
