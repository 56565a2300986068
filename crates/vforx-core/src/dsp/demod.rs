//! Minimal demodulators used by the channel chains. No filter design here,
//! only single-pole smoothing.

use num_complex::Complex32;

pub fn am_envelope(iq: &[Complex32], out: &mut [f32]) {
    for (dst, v) in out.iter_mut().zip(iq.iter()) {
        *dst = v.norm();
    }
}

pub fn polar_discriminator_fm(iq: &[Complex32], mut prev: Complex32, out: &mut [f32]) -> Complex32 {
    for (dst, v) in out.iter_mut().zip(iq.iter()) {
        let d = *v * prev.conj();
        *dst = d.arg() / std::f32::consts::PI;
        prev = *v;
    }
    prev
}

pub fn real_part(iq: &[Complex32], out: &mut [f32]) {
    for (dst, v) in out.iter_mut().zip(iq.iter()) {
        *dst = v.re;
    }
}

/// Weaver-style sideband selector: shifts the passband centre to DC, low-passes,
/// shifts back up and keeps the real part.
#[derive(Debug, Clone)]
pub struct SidebandSelector {
    phase: f32,
    phase_inc: f32,
    lpf: Complex32,
    alpha: f32,
}

impl SidebandSelector {
    pub fn new(low_hz: f32, high_hz: f32, sample_rate: f32) -> Self {
        let centre = 0.5 * (low_hz + high_hz);
        let half_bw = (0.5 * (high_hz - low_hz)).abs().max(1.0);
        let sr = sample_rate.max(1.0);
        Self {
            phase: 0.0,
            phase_inc: 2.0 * std::f32::consts::PI * centre / sr,
            lpf: Complex32::new(0.0, 0.0),
            alpha: 1.0 - (-2.0 * std::f32::consts::PI * half_bw / sr).exp(),
        }
    }

    pub fn process(&mut self, iq: &[Complex32], out: &mut [f32]) {
        for (dst, v) in out.iter_mut().zip(iq.iter()) {
            let lo = Complex32::from_polar(1.0, self.phase);
            let down = *v * lo.conj();
            self.lpf += (down - self.lpf) * self.alpha;
            *dst = (self.lpf * lo).re;
            self.phase = (self.phase + self.phase_inc) % std::f32::consts::TAU;
        }
    }
}

/// One-pole DC blocker.
#[derive(Debug, Clone)]
pub struct DcBlocker {
    pole: f32,
    x1: f32,
    y1: f32,
}

impl DcBlocker {
    pub fn new(pole: f32) -> Self {
        Self {
            pole,
            x1: 0.0,
            y1: 0.0,
        }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let y = *s - self.x1 + self.pole * self.y1;
            self.x1 = *s;
            self.y1 = y;
            *s = y;
        }
    }
}

/// One-pole de-emphasis low-pass with time constant `tau_us`.
#[derive(Debug, Clone)]
pub struct Deemphasis {
    alpha: f32,
    y1: f32,
}

impl Deemphasis {
    pub fn new(tau_us: f32, sample_rate: f32) -> Self {
        let alpha = if tau_us <= 0.0 {
            1.0
        } else {
            1.0 - (-1.0 / (tau_us * 1e-6 * sample_rate.max(1.0))).exp()
        };
        Self { alpha, y1: 0.0 }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            self.y1 += self.alpha * (*s - self.y1);
            *s = self.y1;
        }
    }
}

/// Peak-tracking gain control with fast attack and slow release.
#[derive(Debug, Clone)]
pub struct SimpleAgc {
    target: f32,
    peak: f32,
    attack: f32,
    release: f32,
    max_gain: f32,
}

impl SimpleAgc {
    pub fn new(sample_rate: f32) -> Self {
        let sr = sample_rate.max(1.0);
        Self {
            target: 0.5,
            peak: 0.0,
            attack: 1.0 - (-1.0 / (0.002 * sr)).exp(),
            release: 1.0 - (-1.0 / (0.5 * sr)).exp(),
            max_gain: 1000.0,
        }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let mag = s.abs();
            let coeff = if mag > self.peak { self.attack } else { self.release };
            self.peak += coeff * (mag - self.peak);
            let gain = (self.target / self.peak.max(1e-6)).min(self.max_gain);
            *s *= gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminator_tracks_constant_rotation() {
        let step = 0.25 * std::f32::consts::PI;
        let iq: Vec<Complex32> = (0..16)
            .map(|i| Complex32::from_polar(1.0, step * i as f32))
            .collect();
        let mut out = vec![0.0; 16];
        let last = polar_discriminator_fm(&iq, iq[0], &mut out);
        assert_eq!(last, iq[15]);
        for v in &out[1..] {
            assert!((v - 0.25).abs() < 1e-4, "got {v}");
        }
    }

    #[test]
    fn dc_blocker_removes_constant_offset() {
        let mut dc = DcBlocker::new(0.99);
        let mut samples = vec![1.0f32; 2000];
        dc.process(&mut samples);
        assert!(samples[1999].abs() < 0.01);
    }
}
