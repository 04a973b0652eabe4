use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Aggregated timing for one named stage.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimingStat {
    pub calls: u64,
    pub total: Duration,
    pub max: Duration,
}

impl TimingStat {
    pub fn mean(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(self.total.as_secs_f64() / self.calls as f64)
        }
    }
}

/// Logging and timing context shared by the feature extractors.
///
/// Created explicitly by the owner of a pipeline and handed to each component
/// as an `Arc`. `finish()` tears it down: the summary is logged once and later
/// recordings are ignored.
#[derive(Debug)]
pub struct DspContext {
    label: String,
    started: Instant,
    timings: Mutex<BTreeMap<&'static str, TimingStat>>,
    finished: AtomicBool,
}

impl DspContext {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        let label = label.into();
        log::debug!("[{}] context initialized", label);
        Arc::new(Self {
            label,
            started: Instant::now(),
            timings: Mutex::new(BTreeMap::new()),
            finished: AtomicBool::new(false),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Run `f`, recording its wall time under `stage`.
    pub fn time<T>(&self, stage: &'static str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.record(stage, start.elapsed());
        out
    }

    pub fn record(&self, stage: &'static str, elapsed: Duration) {
        if self.is_finished() {
            return;
        }
        let mut timings = self.timings.lock();
        let stat = timings.entry(stage).or_default();
        stat.calls += 1;
        stat.total += elapsed;
        stat.max = stat.max.max(elapsed);
    }

    pub fn snapshot(&self) -> Vec<(&'static str, TimingStat)> {
        self.timings
            .lock()
            .iter()
            .map(|(name, stat)| (*name, *stat))
            .collect()
    }

    pub fn report(&self) {
        for (stage, stat) in self.snapshot() {
            log::info!(
                "[{}] {:<24} calls={:<6} total={:.2}ms mean={:.3}ms max={:.3}ms",
                self.label,
                stage,
                stat.calls,
                stat.total.as_secs_f64() * 1e3,
                stat.mean().as_secs_f64() * 1e3,
                stat.max.as_secs_f64() * 1e3,
            );
        }
    }

    /// Log the final summary and stop recording. Returns the collected stats.
    pub fn finish(&self) -> Vec<(&'static str, TimingStat)> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return self.snapshot();
        }
        self.report();
        log::info!(
            "[{}] context finished after {:.1}s",
            self.label,
            self.started.elapsed().as_secs_f32()
        );
        self.snapshot()
    }
}
