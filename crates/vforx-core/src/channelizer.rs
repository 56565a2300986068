//! Weighted overlap-add analysis filterbank.
//!
//! Splits one wideband stream into `bands` equally spaced sub-bands. Output `k` is
//! the input mixed down by `k * rate / bands`, low-passed by a windowed-sinc
//! prototype and decimated by `bands / oversample`.

use crate::dsp::window::{filter_window, WindowKind};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChannelizerParams {
    pub bands: usize,
    pub oversample: usize,
    pub window: WindowKind,
    /// Prototype length per band; higher is steeper.
    pub taps_per_band: usize,
}

impl ChannelizerParams {
    /// Picks the largest band count whose output rate still covers `target_rate`.
    pub fn auto(
        input_rate: f64,
        target_rate: f64,
        oversample: usize,
        window: WindowKind,
        taps_per_band: usize,
    ) -> Self {
        let oversample = oversample.max(1);
        let raw = (input_rate * oversample as f64 / target_rate.max(1.0)).floor() as usize;
        let bands = (raw - raw % oversample).max(2 * oversample);
        Self {
            bands,
            oversample,
            window,
            taps_per_band: taps_per_band.max(1),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.bands >= 2, "channelizer needs at least two bands");
        anyhow::ensure!(self.oversample >= 1, "channelizer oversample must be >= 1");
        anyhow::ensure!(
            self.bands % self.oversample == 0,
            "channelizer bands ({}) must be a multiple of oversample ({})",
            self.bands,
            self.oversample
        );
        anyhow::ensure!(self.taps_per_band >= 1, "channelizer taps_per_band must be >= 1");
        Ok(())
    }

    pub fn hop(&self) -> usize {
        self.bands / self.oversample
    }
}

pub struct Channelizer {
    params: ChannelizerParams,
    input_rate: f64,
    threads: usize,
    // Time-reversed prototype, aligned with the oldest sample of each window.
    prototype: Vec<f32>,
    twiddles: Vec<Complex32>,
    fft: Arc<dyn Fft<f32>>,
    history: Vec<Complex32>,
    // Absolute stream index of `history[0]` and of the next window's first sample.
    base: u64,
    next_start: u64,
    outputs: Vec<Vec<Complex32>>,
}

impl Channelizer {
    pub fn new(params: ChannelizerParams, input_rate: f64, threads: usize) -> anyhow::Result<Self> {
        params.validate()?;
        let bands = params.bands;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(bands);
        let twiddles = (0..bands)
            .map(|i| Complex32::from_polar(1.0, -2.0 * PI * i as f32 / bands as f32))
            .collect();
        Ok(Self {
            prototype: design_prototype(&params),
            twiddles,
            fft,
            history: Vec::new(),
            base: 0,
            next_start: 0,
            outputs: vec![Vec::new(); bands],
            params,
            input_rate,
            threads: threads.max(1),
        })
    }

    pub fn params(&self) -> &ChannelizerParams {
        &self.params
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn set_threads(&mut self, threads: usize) {
        self.threads = threads.max(1);
    }

    pub fn input_rate(&self) -> f64 {
        self.input_rate
    }

    /// Replaces every derived table; buffered history is discarded.
    pub fn set_params(&mut self, params: ChannelizerParams) -> anyhow::Result<()> {
        let threads = self.threads;
        *self = Self::new(params, self.input_rate, threads)?;
        Ok(())
    }

    pub fn set_input_rate(&mut self, input_rate: f64) {
        self.input_rate = input_rate;
    }

    pub fn bands(&self) -> usize {
        self.params.bands
    }

    pub fn output_rate(&self) -> f64 {
        self.input_rate * self.params.oversample as f64 / self.params.bands as f64
    }

    /// Centre offset of output `k` relative to the input centre, in Hz.
    pub fn bin_center(&self, k: usize) -> f64 {
        let n = self.params.bands as i64;
        let k = k as i64 % n;
        let signed = if k < (n + 1) / 2 { k } else { k - n };
        signed as f64 * self.input_rate / n as f64
    }

    pub fn bin_map(&self) -> Vec<f64> {
        (0..self.params.bands).map(|k| self.bin_center(k)).collect()
    }

    /// Nearest output for `offset_hz` and the residual offset within that band.
    pub fn nearest_bin(&self, offset_hz: f64) -> (usize, f64) {
        let n = self.params.bands as i64;
        let spacing = self.input_rate / n as f64;
        let k = if spacing > 0.0 {
            ((offset_hz / spacing).round() as i64).rem_euclid(n) as usize
        } else {
            0
        };
        (k, offset_hz - self.bin_center(k))
    }

    /// Consumes `input` and returns the samples each output produced from it.
    pub fn process(&mut self, input: &[Complex32]) -> &[Vec<Complex32>] {
        for out in self.outputs.iter_mut() {
            out.clear();
        }
        self.history.extend_from_slice(input);

        let len = self.prototype.len() as u64;
        let hop = self.params.hop() as u64;
        let end = self.base + self.history.len() as u64;
        let count = if self.next_start + len <= end {
            ((end - len - self.next_start) / hop + 1) as usize
        } else {
            0
        };

        if count > 0 {
            let starts: Vec<u64> = (0..count as u64)
                .map(|m| self.next_start + m * hop)
                .collect();
            let frames = self.compute(&starts);
            let bands = self.params.bands;
            for frame in frames.chunks_exact(bands) {
                for (out, v) in self.outputs.iter_mut().zip(frame.iter()) {
                    out.push(*v);
                }
            }
            self.next_start += count as u64 * hop;
        }

        let keep_from = self.next_start.min(end);
        let consumed = (keep_from - self.base) as usize;
        self.history.drain(..consumed);
        self.base = keep_from;
        &self.outputs
    }

    fn compute(&self, starts: &[u64]) -> Vec<Complex32> {
        let bands = self.params.bands;
        let mut frames = vec![Complex32::new(0.0, 0.0); starts.len() * bands];
        let threads = self.threads.clamp(1, starts.len().max(1));
        if threads == 1 {
            let mut worker = FrameWorker::new(self);
            for (start, frame) in starts.iter().zip(frames.chunks_mut(bands)) {
                worker.frame(self, *start, frame);
            }
            return frames;
        }

        let per_thread = starts.len().div_ceil(threads);
        let this = &*self;
        std::thread::scope(|scope| {
            for (chunk, out) in starts
                .chunks(per_thread)
                .zip(frames.chunks_mut(per_thread * bands))
            {
                scope.spawn(move || {
                    let mut worker = FrameWorker::new(this);
                    for (start, frame) in chunk.iter().zip(out.chunks_mut(bands)) {
                        worker.frame(this, *start, frame);
                    }
                });
            }
        });
        frames
    }
}

struct FrameWorker {
    buf: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl FrameWorker {
    fn new(ch: &Channelizer) -> Self {
        Self {
            buf: vec![Complex32::new(0.0, 0.0); ch.params.bands],
            scratch: vec![Complex32::new(0.0, 0.0); ch.fft.get_inplace_scratch_len()],
        }
    }

    fn frame(&mut self, ch: &Channelizer, start: u64, out: &mut [Complex32]) {
        let bands = ch.params.bands;
        let off = (start - ch.base) as usize;
        let window = &ch.history[off..off + ch.prototype.len()];

        self.buf.fill(Complex32::new(0.0, 0.0));
        for (i, (x, h)) in window.iter().zip(ch.prototype.iter()).enumerate() {
            self.buf[i % bands] += *x * *h;
        }
        ch.fft.process_with_scratch(&mut self.buf, &mut self.scratch);

        // Re-reference each bin's mixer phase to absolute stream time.
        let rot = (start % bands as u64) as usize;
        for (k, (dst, v)) in out.iter_mut().zip(self.buf.iter()).enumerate() {
            *dst = *v * ch.twiddles[(k * rot) % bands];
        }
    }
}

fn design_prototype(params: &ChannelizerParams) -> Vec<f32> {
    let len = params.bands * params.taps_per_band;
    let cutoff = 0.5 / params.bands as f32;
    let win = filter_window(params.window, len);
    let mid = (len as f32 - 1.0) / 2.0;
    let mut taps: Vec<f32> = (0..len)
        .map(|i| {
            let x = i as f32 - mid;
            let sinc = if x.abs() < 1e-6 {
                2.0 * cutoff
            } else {
                (2.0 * PI * cutoff * x).sin() / (PI * x)
            };
            sinc * win[i]
        })
        .collect();
    let sum: f32 = taps.iter().sum();
    if sum.abs() > 1e-12 {
        for t in taps.iter_mut() {
            *t /= sum;
        }
    }
    taps.reverse();
    taps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(bands: usize, oversample: usize) -> ChannelizerParams {
        ChannelizerParams {
            bands,
            oversample,
            window: WindowKind::Hann,
            taps_per_band: 8,
        }
    }

    fn tone(freq: f64, rate: f64, n: usize) -> Vec<Complex32> {
        (0..n)
            .map(|i| {
                let ph = (2.0 * std::f64::consts::PI * freq * i as f64 / rate) as f32;
                Complex32::from_polar(1.0, ph)
            })
            .collect()
    }

    fn band_power(samples: &[Complex32]) -> f32 {
        samples.iter().skip(16).map(|v| v.norm_sqr()).sum::<f32>()
            / samples.len().saturating_sub(16).max(1) as f32
    }

    #[test]
    fn tone_appears_only_in_its_band() {
        let rate = 8000.0;
        let mut ch = Channelizer::new(params(8, 2), rate, 1).unwrap();
        let (k, residual) = ch.nearest_bin(2000.0);
        assert_eq!(k, 2);
        assert!(residual.abs() < 1e-9);

        let outputs = ch.process(&tone(2000.0, rate, 4096)).to_vec();
        let inside = band_power(&outputs[2]);
        let outside = band_power(&outputs[5]);
        assert!(inside > 0.5, "in-band power {inside}");
        assert!(outside < 1e-3, "out-of-band power {outside}");
    }

    #[test]
    fn output_length_follows_hop_across_calls() {
        let mut ch = Channelizer::new(params(8, 2), 8000.0, 1).unwrap();
        let input = tone(0.0, 8000.0, 1000);
        let mut produced = 0usize;
        for block in input.chunks(77) {
            produced += ch.process(block)[0].len();
        }
        // First output needs one full prototype (64 samples), then one per hop of 4.
        assert_eq!(produced, (1000 - 64) / 4 + 1);
    }

    #[test]
    fn threaded_and_single_threaded_outputs_match() {
        let input = tone(1234.0, 8000.0, 3000);
        let mut single = Channelizer::new(params(8, 2), 8000.0, 1).unwrap();
        let mut multi = Channelizer::new(params(8, 2), 8000.0, 4).unwrap();
        let a = single.process(&input).to_vec();
        let b = multi.process(&input).to_vec();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.len(), y.len());
            for (p, q) in x.iter().zip(y.iter()) {
                assert!((p - q).norm() < 1e-5);
            }
        }
    }

    #[test]
    fn negative_offsets_map_to_upper_bins() {
        let ch = Channelizer::new(params(8, 1), 8000.0, 1).unwrap();
        let (k, residual) = ch.nearest_bin(-1100.0);
        assert_eq!(k, 7);
        assert!((residual - (-100.0)).abs() < 1e-9);
        assert_eq!(ch.bin_center(7), -1000.0);
    }
}
