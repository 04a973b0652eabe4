use parking_lot::Mutex;
use rustfft::num_complex::Complex;

/// Working buffers for one FFT: the in-place signal buffer and the
/// algorithm's scratch space.
#[derive(Debug)]
pub struct FftScratch {
    pub buffer: Vec<Complex<f32>>,
    pub scratch: Vec<Complex<f32>>,
}

impl FftScratch {
    pub fn new(fft_size: usize, scratch_len: usize) -> Self {
        Self {
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
        }
    }
}

/// Component-owned pool of FFT scratch buffers.
///
/// The lock is taken only to pop or push a buffer; callers run the transform
/// on a buffer they own exclusively.
#[derive(Debug)]
pub struct ScratchPool {
    fft_size: usize,
    scratch_len: usize,
    max_idle: usize,
    idle: Mutex<Vec<FftScratch>>,
}

impl ScratchPool {
    pub fn new(fft_size: usize, scratch_len: usize, max_idle: usize) -> Self {
        Self {
            fft_size,
            scratch_len,
            max_idle,
            idle: Mutex::new(Vec::with_capacity(max_idle)),
        }
    }

    pub fn acquire(&self) -> FftScratch {
        let reused = self.idle.lock().pop();
        reused.unwrap_or_else(|| FftScratch::new(self.fft_size, self.scratch_len))
    }

    pub fn release(&self, scratch: FftScratch) {
        if scratch.buffer.len() != self.fft_size || scratch.scratch.len() != self.scratch_len {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(scratch);
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}
