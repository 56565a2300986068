use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WindowKind {
    Rectangular,
    #[default]
    Hann,
    Hamming,
    Blackman,
    BlackmanHarris,
    FlatTop,
}

pub fn hann_window(size: usize) -> Vec<f32> {
    window(WindowKind::Hann, size)
}

/// Periodic window, for spectral analysis.
pub fn window(kind: WindowKind, size: usize) -> Vec<f32> {
    generate(kind, size, size as f32)
}

/// Symmetric window, for FIR prototype design.
pub fn filter_window(kind: WindowKind, size: usize) -> Vec<f32> {
    generate(kind, size, size.saturating_sub(1).max(1) as f32)
}

fn generate(kind: WindowKind, size: usize, denom: f32) -> Vec<f32> {
    let coeffs: &[f32] = match kind {
        WindowKind::Rectangular => &[1.0],
        WindowKind::Hann => &[0.5, 0.5],
        WindowKind::Hamming => &[0.54, 0.46],
        WindowKind::Blackman => &[0.42, 0.5, 0.08],
        WindowKind::BlackmanHarris => &[0.358_75, 0.488_29, 0.141_28, 0.011_68],
        WindowKind::FlatTop => &[0.215_578_95, 0.416_631_58, 0.277_263_16, 0.083_578_95, 0.006_947_37],
    };
    let mut out = vec![0.0f32; size];
    for (i, v) in out.iter_mut().enumerate() {
        let x = 2.0 * PI * (i as f32) / denom;
        let mut acc = 0.0f32;
        for (k, a) in coeffs.iter().enumerate() {
            let term = a * (k as f32 * x).cos();
            if k % 2 == 0 {
                acc += term;
            } else {
                acc -= term;
            }
        }
        *v = acc;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_is_zero_at_start_and_one_at_center() {
        let w = hann_window(8);
        assert!(w[0].abs() < 1e-6);
        assert!((w[4] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn symmetric_window_mirrors() {
        let w = filter_window(WindowKind::Blackman, 9);
        for i in 0..9 {
            assert!((w[i] - w[8 - i]).abs() < 1e-5);
        }
    }
}
