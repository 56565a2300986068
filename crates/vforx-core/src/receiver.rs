//! Source → sampler tap → channels → bus, driven one block at a time.

use crate::bus::StereoBuffer;
use crate::channel::{ChannelError, ChannelManager, ManagerOptions};
use crate::codec::SampleFormat;
use crate::dsp::sample::SampleReader;
use crate::dsp::window::WindowKind;
use crate::sampler::SpectrumSampler;
use num_complex::Complex32;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};

pub trait SignalSource: Send {
    fn name(&self) -> &str;
    fn sample_rate(&self) -> f64;
    fn set_sample_rate(&mut self, rate: f64) -> anyhow::Result<()>;
    fn center_frequency(&self) -> f64;
    fn set_center_frequency(&mut self, hz: f64) -> anyhow::Result<()>;
    /// Fills `out`; a short count means end of stream.
    fn read(&mut self, out: &mut [Complex32]) -> anyhow::Result<usize>;
}

/// Endless silence at a fixed rate; stands in when the configured input fails.
#[derive(Debug, Clone)]
pub struct NullSource {
    sample_rate: f64,
    center_hz: f64,
}

impl NullSource {
    pub fn new(sample_rate: f64, center_hz: f64) -> Self {
        Self {
            sample_rate,
            center_hz,
        }
    }
}

impl SignalSource for NullSource {
    fn name(&self) -> &str {
        "null"
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn set_sample_rate(&mut self, rate: f64) -> anyhow::Result<()> {
        self.sample_rate = rate;
        Ok(())
    }

    fn center_frequency(&self) -> f64 {
        self.center_hz
    }

    fn set_center_frequency(&mut self, hz: f64) -> anyhow::Result<()> {
        self.center_hz = hz;
        Ok(())
    }

    fn read(&mut self, out: &mut [Complex32]) -> anyhow::Result<usize> {
        out.fill(Complex32::new(0.0, 0.0));
        Ok(out.len())
    }
}

/// Raw samples from any byte stream, decoded through the sample format table.
pub struct ReaderSource<R> {
    name: String,
    reader: SampleReader<R>,
    sample_rate: f64,
    center_hz: f64,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(
        name: impl Into<String>,
        reader: R,
        format: SampleFormat,
        sample_rate: f64,
        center_hz: f64,
    ) -> Self {
        Self {
            name: name.into(),
            reader: SampleReader::new(reader, format),
            sample_rate,
            center_hz,
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.reader.format()
    }
}

impl<R: Read + Send> SignalSource for ReaderSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn set_sample_rate(&mut self, rate: f64) -> anyhow::Result<()> {
        // Recorded streams carry their rate; a change only relabels them.
        self.sample_rate = rate;
        Ok(())
    }

    fn center_frequency(&self) -> f64 {
        self.center_hz
    }

    fn set_center_frequency(&mut self, hz: f64) -> anyhow::Result<()> {
        self.center_hz = hz;
        Ok(())
    }

    fn read(&mut self, out: &mut [Complex32]) -> anyhow::Result<usize> {
        self.reader.read_complex(out)
    }
}

/// Source shared by the reading thread and the receiver.
pub type SharedSource = Arc<Mutex<Box<dyn SignalSource>>>;

pub fn lock_source(source: &Mutex<Box<dyn SignalSource>>) -> MutexGuard<'_, Box<dyn SignalSource>> {
    match source.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::error!("source mutex poisoned; recovering");
            poisoned.into_inner()
        }
    }
}

/// Pulls raw blocks from the source without holding the [`Receiver`].
pub struct BlockReader {
    source: SharedSource,
    raw: Vec<Complex32>,
}

impl BlockReader {
    /// Next raw block; empty at end of stream.
    pub fn read(&mut self) -> anyhow::Result<&[Complex32]> {
        let n = lock_source(&self.source).read(&mut self.raw)?;
        Ok(&self.raw[..n])
    }
}

#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// Integer input decimation ahead of the channel stage.
    pub decimation: usize,
    pub block_size: usize,
    pub spectrum_buffer_ms: u32,
    pub spectrum_window: WindowKind,
    pub manager: ManagerOptions,
}

pub struct Receiver {
    source: SharedSource,
    source_name: String,
    sample_rate: f64,
    center_hz: f64,
    manager: ChannelManager,
    sampler: Arc<SpectrumSampler>,
    decimation: usize,
    acc: Complex32,
    acc_len: usize,
    raw: Vec<Complex32>,
    decimated: Vec<Complex32>,
}

impl Receiver {
    /// Opens a source, logging the failure and substituting a [`NullSource`].
    pub fn open_source(
        open: impl FnOnce() -> anyhow::Result<Box<dyn SignalSource>>,
        fallback_rate: f64,
        fallback_center_hz: f64,
    ) -> Box<dyn SignalSource> {
        match open() {
            Ok(src) => {
                tracing::info!(
                    source = src.name(),
                    sample_rate = src.sample_rate(),
                    center_hz = src.center_frequency(),
                    "input opened"
                );
                src
            }
            Err(e) => {
                tracing::warn!(error = ?e, "input failed to open; falling back to null source");
                Box::new(NullSource::new(fallback_rate, fallback_center_hz))
            }
        }
    }

    pub fn new(source: Box<dyn SignalSource>, opts: ReceiverOptions) -> Result<Self, ChannelError> {
        let decimation = opts.decimation.max(1);
        let rate = source.sample_rate() / decimation as f64;
        let mut manager_opts = opts.manager;
        manager_opts.input_rate = rate;
        Ok(Self {
            sampler: Arc::new(SpectrumSampler::new(
                rate,
                opts.spectrum_buffer_ms,
                opts.spectrum_window,
            )),
            manager: ChannelManager::local(manager_opts)?,
            source_name: source.name().to_string(),
            sample_rate: source.sample_rate(),
            center_hz: source.center_frequency(),
            source: Arc::new(Mutex::new(source)),
            decimation,
            acc: Complex32::new(0.0, 0.0),
            acc_len: 0,
            raw: vec![Complex32::new(0.0, 0.0); opts.block_size.max(1)],
            decimated: Vec::new(),
        })
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Reader for a streaming thread; reads never take the receiver lock.
    pub fn block_reader(&self) -> BlockReader {
        BlockReader {
            source: Arc::clone(&self.source),
            raw: vec![Complex32::new(0.0, 0.0); self.raw.len().max(1)],
        }
    }

    pub fn manager(&self) -> &ChannelManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ChannelManager {
        &mut self.manager
    }

    pub fn sampler(&self) -> Arc<SpectrumSampler> {
        Arc::clone(&self.sampler)
    }

    pub fn snapshot_spectrum(&self, window_size: usize) -> Vec<f32> {
        self.sampler.snapshot(window_size)
    }

    pub fn decimation(&self) -> usize {
        self.decimation
    }

    /// Stream rate after decimation.
    pub fn channel_rate(&self) -> f64 {
        self.sample_rate / self.decimation as f64
    }

    pub fn center_frequency(&self) -> f64 {
        self.center_hz
    }

    /// Retunes the source; waits for a read in progress to finish.
    pub fn set_center_frequency(&mut self, hz: f64) -> Result<(), ChannelError> {
        lock_source(&self.source).set_center_frequency(hz)?;
        self.center_hz = hz;
        let threads = self.manager.channelizer().map_or(1, |c| c.threads());
        self.manager.set_channelizer(threads)?;
        Ok(())
    }

    pub fn set_input_rate(&mut self, rate: f64) -> Result<(), ChannelError> {
        lock_source(&self.source).set_sample_rate(rate)?;
        self.sample_rate = rate;
        self.rate_changed()
    }

    pub fn set_decimation(&mut self, decimation: usize) -> Result<(), ChannelError> {
        self.decimation = decimation.max(1);
        self.acc = Complex32::new(0.0, 0.0);
        self.acc_len = 0;
        self.rate_changed()
    }

    fn rate_changed(&mut self) -> Result<(), ChannelError> {
        let rate = self.channel_rate();
        self.sampler.reset(rate);
        self.manager.set_input_rate(rate)?;
        tracing::info!(rate, decimation = self.decimation, "channel stream rate changed");
        Ok(())
    }

    /// Absolute frequency lookup; see [`ChannelManager::find_by_offset`].
    pub fn find_by_frequency(&self, hz: f64) -> Option<usize> {
        self.manager.find_by_offset(hz - self.center_hz)
    }

    /// Reads one block and runs it through the receiver; returns samples read, 0 at end of stream.
    pub fn process_block(&mut self, out: &mut StereoBuffer) -> anyhow::Result<usize> {
        let n = lock_source(&self.source).read(&mut self.raw)?;
        let raw = std::mem::take(&mut self.raw);
        self.run_block(&raw[..n], out);
        self.raw = raw;
        Ok(n)
    }

    /// Decimates `raw`, feeds the spectrum tap and runs the channels.
    pub fn run_block(&mut self, raw: &[Complex32], out: &mut StereoBuffer) {
        self.decimate(raw);
        self.sampler.push(&self.decimated);
        self.manager.process(&self.decimated, out);
    }

    fn decimate(&mut self, raw: &[Complex32]) {
        self.decimated.clear();
        if self.decimation == 1 {
            self.decimated.extend_from_slice(raw);
            return;
        }
        let scale = 1.0 / self.decimation as f32;
        for v in raw {
            self.acc += *v;
            self.acc_len += 1;
            if self.acc_len == self.decimation {
                self.decimated.push(self.acc * scale);
                self.acc = Complex32::new(0.0, 0.0);
                self.acc_len = 0;
            }
        }
    }
}
