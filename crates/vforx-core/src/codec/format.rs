use num_complex::Complex32;
use serde::{Deserialize, Serialize};

/// Decodes whole chunks of `raw` into complex samples.
///
/// `out` always holds exactly `raw.len() / bytes_per_chunk * samples_per_chunk` entries.
pub type Converter = fn(&[u8], &mut [Complex32]);

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    U8,
    S8,
    U16,
    S16,
    F32,
    F64,
    Cu8,
    Cs8,
    Cs12,
    Cs16,
    Cf32,
    Cf64,
}

#[derive(Debug, Clone, Copy)]
pub struct FormatInfo {
    pub bytes_per_chunk: usize,
    pub samples_per_chunk: usize,
    /// `None` means the bytes already are little-endian `Complex32` pairs.
    pub converter: Option<Converter>,
}

impl SampleFormat {
    pub fn info(self) -> FormatInfo {
        let (bytes_per_chunk, converter): (usize, Option<Converter>) = match self {
            Self::U8 => (1, Some(convert_u8)),
            Self::S8 => (1, Some(convert_s8)),
            Self::U16 => (2, Some(convert_u16)),
            Self::S16 => (2, Some(convert_s16)),
            Self::F32 => (4, Some(convert_f32)),
            Self::F64 => (8, Some(convert_f64)),
            Self::Cu8 => (2, Some(convert_cu8)),
            Self::Cs8 => (2, Some(convert_cs8)),
            Self::Cs12 => (3, Some(convert_cs12)),
            Self::Cs16 => (4, Some(convert_cs16)),
            Self::Cf32 => (8, None),
            Self::Cf64 => (16, Some(convert_cf64)),
        };
        FormatInfo {
            bytes_per_chunk,
            samples_per_chunk: 1,
            converter,
        }
    }

    pub fn is_complex(self) -> bool {
        matches!(
            self,
            Self::Cu8 | Self::Cs8 | Self::Cs12 | Self::Cs16 | Self::Cf32 | Self::Cf64
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::S8 => "s8",
            Self::U16 => "u16",
            Self::S16 => "s16",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Cu8 => "cu8",
            Self::Cs8 => "cs8",
            Self::Cs12 => "cs12",
            Self::Cs16 => "cs16",
            Self::Cf32 => "cf32",
            Self::Cf64 => "cf64",
        }
    }
}

impl FormatInfo {
    /// Bytes needed to hold at least `samples` samples, rounded up to whole chunks.
    pub fn bytes_for_samples(&self, samples: usize) -> usize {
        samples.div_ceil(self.samples_per_chunk) * self.bytes_per_chunk
    }

    /// Samples contained in the whole chunks of `bytes`.
    pub fn samples_for_bytes(&self, bytes: usize) -> usize {
        (bytes / self.bytes_per_chunk) * self.samples_per_chunk
    }

    /// Byte offset of the chunk holding sample `sample`.
    pub fn chunk_offset(&self, sample: u64) -> u64 {
        (sample / self.samples_per_chunk as u64) * self.bytes_per_chunk as u64
    }

    /// Decodes the whole chunks of `raw` into the front of `out`; returns samples written.
    pub fn decode(&self, raw: &[u8], out: &mut [Complex32]) -> usize {
        let chunks = (raw.len() / self.bytes_per_chunk)
            .min(out.len() / self.samples_per_chunk);
        let bytes = chunks * self.bytes_per_chunk;
        let samples = chunks * self.samples_per_chunk;
        let (raw, out) = (&raw[..bytes], &mut out[..samples]);
        match self.converter {
            Some(convert) => convert(raw, out),
            None => match bytemuck::try_cast_slice::<u8, Complex32>(raw) {
                Ok(native) if cfg!(target_endian = "little") => out.copy_from_slice(native),
                _ => convert_cf32(raw, out),
            },
        }
        samples
    }
}

static U8_TO_F32: [f32; 256] = {
    let mut lut = [0.0f32; 256];
    let mut i = 0usize;
    while i < 256 {
        let signed = ((i as u8) ^ 0x80) as i8;
        lut[i] = (signed as f32) / 128.0;
        i += 1;
    }
    lut
};

fn convert_u8(raw: &[u8], out: &mut [Complex32]) {
    for (dst, b) in out.iter_mut().zip(raw.iter().copied()) {
        *dst = Complex32::new(U8_TO_F32[b as usize], 0.0);
    }
}

fn convert_s8(raw: &[u8], out: &mut [Complex32]) {
    for (dst, b) in out.iter_mut().zip(raw.iter().copied()) {
        *dst = Complex32::new((b as i8) as f32 / 128.0, 0.0);
    }
}

fn convert_u16(raw: &[u8], out: &mut [Complex32]) {
    for (dst, c) in out.iter_mut().zip(raw.chunks_exact(2)) {
        let signed = (u16::from_le_bytes([c[0], c[1]]) ^ 0x8000) as i16;
        *dst = Complex32::new(signed as f32 / 32768.0, 0.0);
    }
}

fn convert_s16(raw: &[u8], out: &mut [Complex32]) {
    for (dst, c) in out.iter_mut().zip(raw.chunks_exact(2)) {
        *dst = Complex32::new(i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0, 0.0);
    }
}

fn convert_f32(raw: &[u8], out: &mut [Complex32]) {
    for (dst, c) in out.iter_mut().zip(raw.chunks_exact(4)) {
        *dst = Complex32::new(f32::from_le_bytes([c[0], c[1], c[2], c[3]]), 0.0);
    }
}

fn convert_f64(raw: &[u8], out: &mut [Complex32]) {
    for (dst, c) in out.iter_mut().zip(raw.chunks_exact(8)) {
        *dst = Complex32::new(read_f64(c) as f32, 0.0);
    }
}

fn convert_cu8(raw: &[u8], out: &mut [Complex32]) {
    for (dst, c) in out.iter_mut().zip(raw.chunks_exact(2)) {
        *dst = Complex32::new(U8_TO_F32[c[0] as usize], U8_TO_F32[c[1] as usize]);
    }
}

fn convert_cs8(raw: &[u8], out: &mut [Complex32]) {
    for (dst, c) in out.iter_mut().zip(raw.chunks_exact(2)) {
        *dst = Complex32::new((c[0] as i8) as f32 / 128.0, (c[1] as i8) as f32 / 128.0);
    }
}

// I in the low 12 bits, Q in the high 12 bits of a little-endian 24-bit word.
fn convert_cs12(raw: &[u8], out: &mut [Complex32]) {
    for (dst, c) in out.iter_mut().zip(raw.chunks_exact(3)) {
        let word = u32::from(c[0]) | u32::from(c[1]) << 8 | u32::from(c[2]) << 16;
        let i = sign_extend_12((word & 0x0fff) as u16);
        let q = sign_extend_12((word >> 12) as u16);
        *dst = Complex32::new(i as f32 / 2048.0, q as f32 / 2048.0);
    }
}

fn sign_extend_12(v: u16) -> i16 {
    ((v << 4) as i16) >> 4
}

fn convert_cs16(raw: &[u8], out: &mut [Complex32]) {
    for (dst, c) in out.iter_mut().zip(raw.chunks_exact(4)) {
        let i = i16::from_le_bytes([c[0], c[1]]);
        let q = i16::from_le_bytes([c[2], c[3]]);
        *dst = Complex32::new(i as f32 / 32768.0, q as f32 / 32768.0);
    }
}

fn convert_cf32(raw: &[u8], out: &mut [Complex32]) {
    for (dst, c) in out.iter_mut().zip(raw.chunks_exact(8)) {
        let i = f32::from_le_bytes([c[0], c[1], c[2], c[3]]);
        let q = f32::from_le_bytes([c[4], c[5], c[6], c[7]]);
        *dst = Complex32::new(i, q);
    }
}

fn convert_cf64(raw: &[u8], out: &mut [Complex32]) {
    for (dst, c) in out.iter_mut().zip(raw.chunks_exact(16)) {
        *dst = Complex32::new(read_f64(&c[..8]) as f32, read_f64(&c[8..]) as f32);
    }
}

fn read_f64(c: &[u8]) -> f64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&c[..8]);
    f64::from_le_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cs12_sign_extends_both_components() {
        // I = -1 (0xfff), Q = 0x7ff
        let raw = [0xff, 0xff, 0x7f];
        let mut out = [Complex32::new(0.0, 0.0); 1];
        assert_eq!(SampleFormat::Cs12.info().decode(&raw, &mut out), 1);
        assert!((out[0].re - (-1.0 / 2048.0)).abs() < 1e-6);
        assert!((out[0].im - (2047.0 / 2048.0)).abs() < 1e-6);
    }

    #[test]
    fn decode_ignores_trailing_partial_chunk() {
        let info = SampleFormat::Cs16.info();
        let raw = [0u8; 10];
        let mut out = [Complex32::new(1.0, 1.0); 4];
        assert_eq!(info.decode(&raw, &mut out), 2);
        assert_eq!(out[2], Complex32::new(1.0, 1.0));
    }

    #[test]
    fn bytes_for_samples_rounds_up_to_chunks() {
        let info = FormatInfo {
            bytes_per_chunk: 3,
            samples_per_chunk: 2,
            converter: None,
        };
        assert_eq!(info.bytes_for_samples(3), 6);
        assert_eq!(info.samples_for_bytes(7), 4);
        assert_eq!(info.chunk_offset(5), 6);
    }
}
