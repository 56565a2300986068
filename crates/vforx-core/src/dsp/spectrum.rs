use crate::dsp::window::{window, WindowKind};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

const POWER_FLOOR: f32 = 1e-20;

/// Windowed forward FFT producing fft-shifted log-power lines.
///
/// Each instance owns its plan and scratch, so one engine per thread.
pub struct SpectrumFft {
    size: usize,
    kind: WindowKind,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    norm: f32,
    buf: Vec<Complex32>,
    scratch: Vec<Complex32>,
    power: Vec<f32>,
}

impl SpectrumFft {
    pub fn new(size: usize, kind: WindowKind) -> Self {
        let size = size.max(1);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex32::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        let mut engine = Self {
            size,
            kind,
            fft,
            window: Vec::new(),
            norm: 1.0,
            buf: vec![Complex32::new(0.0, 0.0); size],
            scratch,
            power: vec![0.0; size],
        };
        engine.set_window(kind);
        engine
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn window_kind(&self) -> WindowKind {
        self.kind
    }

    pub fn set_window(&mut self, kind: WindowKind) {
        self.kind = kind;
        self.window = window(kind, self.size);
        // A full-scale complex tone reads 0 dB regardless of window.
        let gain: f32 = self.window.iter().sum();
        self.norm = 1.0 / (gain * gain).max(POWER_FLOOR);
    }

    /// Transforms `input` in consecutive frames of `size()` samples and writes the
    /// averaged, shifted log-power into `out_db`.
    ///
    /// A trailing partial frame is zero-padded; an empty input yields the floor.
    pub fn process(&mut self, input: &[Complex32], out_db: &mut [f32]) {
        self.power.fill(0.0);
        let frames = input.len().div_ceil(self.size).max(1);
        for frame in 0..frames {
            let start = (frame * self.size).min(input.len());
            let end = (start + self.size).min(input.len());
            let src = &input[start..end];
            for (i, dst) in self.buf.iter_mut().enumerate() {
                *dst = src.get(i).map_or(Complex32::new(0.0, 0.0), |s| *s * self.window[i]);
            }
            self.fft.process_with_scratch(&mut self.buf, &mut self.scratch);
            for (p, v) in self.power.iter_mut().zip(self.buf.iter()) {
                *p += v.norm_sqr();
            }
        }

        let scale = self.norm / frames as f32;
        for p in self.power.iter_mut() {
            *p *= scale;
        }

        let half = self.size / 2;
        for (i, dst) in out_db.iter_mut().take(self.size).enumerate() {
            let p = self.power[(i + self.size - half) % self.size];
            *dst = 10.0 * p.max(POWER_FLOOR).log10();
        }
    }

    /// Output of the last transformed frame, in natural (unshifted) bin order.
    pub fn transformed(&self) -> &[Complex32] {
        &self.buf
    }

    /// Linear averaged power of the last call, in natural bin order.
    pub fn power(&self) -> &[f32] {
        &self.power
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_lands_in_expected_shifted_bin() {
        let n = 64;
        let bin = 8;
        let input: Vec<Complex32> = (0..n)
            .map(|i| {
                let ph = 2.0 * std::f32::consts::PI * (bin * i) as f32 / n as f32;
                Complex32::new(ph.cos(), ph.sin())
            })
            .collect();
        let mut fft = SpectrumFft::new(n, WindowKind::Hann);
        let mut out = vec![0.0f32; n];
        fft.process(&input, &mut out);

        let peak = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, n / 2 + bin);
        assert!(out[peak].abs() < 0.5, "full-scale tone should read ~0 dB, got {}", out[peak]);
    }

    #[test]
    fn tone_stands_out_of_noise() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let n = 256;
        let bin = 20;
        let mut rng = StdRng::seed_from_u64(7);
        let input: Vec<Complex32> = (0..n)
            .map(|i| {
                let ph = 2.0 * std::f32::consts::PI * (bin * i) as f32 / n as f32;
                let noise = Complex32::new(rng.gen_range(-0.1..0.1), rng.gen_range(-0.1..0.1));
                Complex32::new(ph.cos(), ph.sin()) * 0.5 + noise
            })
            .collect();
        let mut fft = SpectrumFft::new(n, WindowKind::BlackmanHarris);
        let mut out = vec![0.0f32; n];
        fft.process(&input, &mut out);

        let peak = n / 2 + bin;
        let floor = out
            .iter()
            .enumerate()
            .filter(|(i, _)| i.abs_diff(peak) > 4)
            .map(|(_, v)| *v)
            .fold(f32::NEG_INFINITY, f32::max);
        assert!(out[peak] - floor > 20.0, "peak {} floor {}", out[peak], floor);
    }

    #[test]
    fn silence_reads_the_floor() {
        let mut fft = SpectrumFft::new(16, WindowKind::Rectangular);
        let mut out = vec![0.0f32; 16];
        fft.process(&[], &mut out);
        assert!(out.iter().all(|v| *v <= -199.0));
    }
}
