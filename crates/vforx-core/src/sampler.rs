//! Live spectrum tap.
//!
//! The stream thread pushes samples; readers take snapshots paced by wall-clock
//! time, so the display advances at the stream rate no matter how often it polls.

use crate::dsp::{spectrum::SpectrumFft, window::WindowKind};
use num_complex::Complex32;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

struct Ring {
    buf: Vec<Complex32>,
    sample_rate: f64,
    // Total samples ever pushed / consumed; positions in `buf` are taken modulo its length.
    written: u64,
    read: u64,
    last_snapshot: Option<Instant>,
}

impl Ring {
    fn capacity(&self) -> u64 {
        self.buf.len() as u64
    }

    fn push(&mut self, samples: &[Complex32]) {
        let cap = self.buf.len();
        if cap == 0 {
            return;
        }
        let skip = samples.len().saturating_sub(cap);
        if skip > 0 {
            self.written += skip as u64;
        }
        for s in &samples[skip..] {
            let pos = (self.written % cap as u64) as usize;
            self.buf[pos] = *s;
            self.written += 1;
        }
        if self.written - self.read > self.capacity() {
            self.read = self.written - self.capacity();
        }
    }

    /// Copies the `out.len()` samples ending at the read cursor; positions that
    /// were never written or already overwritten come out as zero.
    fn copy_window(&self, out: &mut [Complex32]) {
        let cap = self.capacity();
        let oldest = self.written.saturating_sub(cap);
        let end = self.read;
        let len = out.len() as u64;
        for (i, dst) in out.iter_mut().enumerate() {
            let pos = (end + i as u64).checked_sub(len);
            *dst = match pos {
                Some(p) if p >= oldest && p < self.written => self.buf[(p % cap) as usize],
                _ => Complex32::new(0.0, 0.0),
            };
        }
    }
}

pub struct SpectrumSampler {
    ring: Mutex<Ring>,
    buffer_ms: u32,
    window: WindowKind,
    engine: Mutex<Option<SpectrumFft>>,
}

impl SpectrumSampler {
    pub fn new(sample_rate: f64, buffer_ms: u32, window: WindowKind) -> Self {
        Self {
            ring: Mutex::new(Ring {
                buf: vec![Complex32::new(0.0, 0.0); ring_len(sample_rate, buffer_ms)],
                sample_rate,
                written: 0,
                read: 0,
                last_snapshot: None,
            }),
            buffer_ms,
            window,
            engine: Mutex::new(None),
        }
    }

    pub fn capacity(&self) -> usize {
        self.lock_ring().buf.len()
    }

    pub fn sample_rate(&self) -> f64 {
        self.lock_ring().sample_rate
    }

    /// Drops buffered samples and resizes for a new stream rate.
    pub fn reset(&self, sample_rate: f64) {
        let mut ring = self.lock_ring();
        ring.buf = vec![Complex32::new(0.0, 0.0); ring_len(sample_rate, self.buffer_ms)];
        ring.sample_rate = sample_rate;
        ring.written = 0;
        ring.read = 0;
        ring.last_snapshot = None;
    }

    /// Producer side; never waits for readers and overwrites the oldest samples when full.
    pub fn push(&self, samples: &[Complex32]) {
        self.lock_ring().push(samples);
    }

    pub fn snapshot(&self, window_size: usize) -> Vec<f32> {
        let mut out = Vec::new();
        self.snapshot_at(Instant::now(), window_size, &mut out);
        out
    }

    /// Advances the read cursor by the time elapsed since the previous snapshot and
    /// transforms the `window_size` samples ending there into `out`.
    pub fn snapshot_at(&self, now: Instant, window_size: usize, out: &mut Vec<f32>) {
        let samples = {
            let mut ring = self.lock_ring();
            let cap = ring.capacity();
            let advance = match ring.last_snapshot {
                Some(prev) => {
                    let elapsed = now.saturating_duration_since(prev).as_secs_f64();
                    ((elapsed * ring.sample_rate).round() as u64).min(cap)
                }
                None => cap,
            };
            ring.read = (ring.read + advance).min(ring.written);
            ring.last_snapshot = Some(now);

            let size = window_size.clamp(1, cap.max(1) as usize);
            let mut samples = vec![Complex32::new(0.0, 0.0); size];
            ring.copy_window(&mut samples);
            samples
        };

        out.clear();
        out.resize(samples.len(), 0.0);
        let mut engine = match self.engine.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::error!("spectrum engine mutex poisoned; recovering");
                poisoned.into_inner()
            }
        };
        if engine.as_ref().map_or(true, |fft| fft.size() != samples.len()) {
            *engine = Some(SpectrumFft::new(samples.len(), self.window));
        }
        if let Some(fft) = engine.as_mut() {
            fft.process(&samples, out);
        }
    }

    fn lock_ring(&self) -> MutexGuard<'_, Ring> {
        match self.ring.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::error!("spectrum ring mutex poisoned; recovering");
                poisoned.into_inner()
            }
        }
    }
}

fn ring_len(sample_rate: f64, buffer_ms: u32) -> usize {
    ((sample_rate.max(0.0) * f64::from(buffer_ms) / 1000.0).round() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ramp(from: usize, n: usize) -> Vec<Complex32> {
        (from..from + n).map(|i| Complex32::new(i as f32, 0.0)).collect()
    }

    #[test]
    fn push_overwrites_oldest_when_full() {
        let sampler = SpectrumSampler::new(1000.0, 10, WindowKind::Rectangular);
        assert_eq!(sampler.capacity(), 10);
        sampler.push(&ramp(0, 25));
        {
            let ring = sampler.lock_ring();
            assert_eq!(ring.written, 25);
            assert_eq!(ring.read, 15);
        }
        let mut out = vec![Complex32::new(0.0, 0.0); 10];
        let mut ring = sampler.lock_ring();
        ring.read = 25;
        ring.copy_window(&mut out);
        assert_eq!(out[0].re, 15.0);
        assert_eq!(out[9].re, 24.0);
    }

    #[test]
    fn snapshot_advances_by_elapsed_time_and_clamps() {
        let sampler = SpectrumSampler::new(1000.0, 100, WindowKind::Rectangular);
        sampler.push(&ramp(0, 100));
        let t0 = Instant::now();
        let mut out = Vec::new();
        sampler.snapshot_at(t0, 8, &mut out);
        assert_eq!(out.len(), 8);
        assert_eq!(sampler.lock_ring().read, 100);

        sampler.push(&ramp(100, 100));
        sampler.snapshot_at(t0 + Duration::from_millis(20), 8, &mut out);
        assert_eq!(sampler.lock_ring().read, 120);

        // A long stall advances at most one buffer.
        sampler.snapshot_at(t0 + Duration::from_secs(60), 8, &mut out);
        assert_eq!(sampler.lock_ring().read, 200);
    }
}
