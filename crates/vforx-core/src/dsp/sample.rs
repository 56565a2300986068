use crate::codec::{FormatInfo, SampleFormat};
use anyhow::Context;
use num_complex::Complex32;
use std::io::{ErrorKind, Read};

/// Streams raw recorder/device bytes of any [`SampleFormat`] as complex samples.
pub struct SampleReader<R> {
    reader: R,
    format: SampleFormat,
    info: FormatInfo,
    raw: Vec<u8>,
    // Bytes of a chunk left over from a short read.
    carry: usize,
}

impl<R: Read> SampleReader<R> {
    pub fn new(reader: R, format: SampleFormat) -> Self {
        Self {
            reader,
            format,
            info: format.info(),
            raw: Vec::new(),
            carry: 0,
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Fills `out` with whole chunks; returns the number of samples written.
    ///
    /// A short count means the reader hit end of stream.
    pub fn read_complex(&mut self, out: &mut [Complex32]) -> anyhow::Result<usize> {
        let chunks = out.len() / self.info.samples_per_chunk;
        if chunks == 0 {
            return Ok(0);
        }
        let want = chunks * self.info.bytes_per_chunk;
        if self.raw.len() < want {
            self.raw.resize(want, 0u8);
        }

        let mut filled = self.carry;
        while filled < want {
            match self.reader.read(&mut self.raw[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("input sample read"),
            }
        }

        let whole = filled - filled % self.info.bytes_per_chunk;
        let samples = self.info.decode(&self.raw[..whole], out);
        self.carry = filled - whole;
        if self.carry > 0 {
            self.raw.copy_within(whole..filled, 0);
        }
        Ok(samples)
    }
}
