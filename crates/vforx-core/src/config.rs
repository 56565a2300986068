use crate::channel::{ChainSettings, ChannelizerOptions, ManagerOptions, Mode};
use crate::codec::SampleFormat;
use crate::dsp::window::WindowKind;
use crate::receiver::ReceiverOptions;
use crate::reconstructor::{self, FftParams, ReconstructorConfig};
use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    pub input: Input,
    #[serde(default)]
    pub audio: Audio,
    #[serde(default)]
    pub channels: Channels,
    #[serde(default)]
    pub channelizer: ChannelizerSection,
    #[serde(default)]
    pub spectrum: Spectrum,
    #[serde(default)]
    pub history: History,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Input {
    pub sps: i64,
    #[serde(default)]
    pub frequency: i64,
    #[serde(default = "default_decimation")]
    pub decimation: usize,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    pub driver: InputDriver,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum InputDriver {
    #[serde(rename = "stdin")]
    Stdin { format: SampleFormat },
    #[serde(rename = "file")]
    File(FileDriver),
    #[serde(rename = "null")]
    Null,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileDriver {
    pub path: PathBuf,
    pub format: SampleFormat,
    /// Wall-clock timestamp of the first sample, in ms.
    #[serde(default)]
    pub start_ms: i64,
    /// Pace reads at the sample rate instead of as fast as possible.
    #[serde(default = "default_realtime")]
    pub realtime: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Audio {
    #[serde(default = "default_audio_sps")]
    pub sps: i64,
    #[serde(default = "default_audio_gain")]
    pub gain: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Channels {
    #[serde(default = "default_max_channels")]
    pub max: usize,
    #[serde(default)]
    pub defaults: ChannelDefaults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelDefaults {
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub offset: f64,
    /// Passband edges in Hz; the mode's defaults when absent.
    #[serde(default)]
    pub filter_low: Option<i32>,
    #[serde(default)]
    pub filter_high: Option<i32>,
    #[serde(default = "default_squelch")]
    pub squelch: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelizerSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_target_rate")]
    pub target_rate: f64,
    /// Sub-band count; derived from `target_rate` when absent.
    #[serde(default)]
    pub decimation: Option<usize>,
    #[serde(default = "default_oversample")]
    pub oversample: usize,
    #[serde(default)]
    pub window: WindowKind,
    #[serde(default = "default_taps_per_band")]
    pub taps_per_band: usize,
    /// 0 picks half the hardware threads.
    #[serde(default)]
    pub threads: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Spectrum {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default)]
    pub window: WindowKind,
    #[serde(default = "default_buffer_ms")]
    pub buffer_ms: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct History {
    /// Recording to rebuild history from; the file input when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub format: Option<SampleFormat>,
    #[serde(default)]
    pub start_ms: Option<i64>,
    #[serde(default)]
    pub threads: usize,
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_history_oversample")]
    pub oversample: usize,
    #[serde(default = "default_history_window")]
    pub window: WindowKind,
    #[serde(default = "default_lines")]
    pub lines: usize,
    #[serde(default = "default_ms_per_line")]
    pub ms_per_line: f64,
}

fn default_port() -> u16 {
    9100
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_decimation() -> usize {
    1
}
fn default_block_size() -> usize {
    16_384
}
fn default_realtime() -> bool {
    true
}
fn default_audio_sps() -> i64 {
    48_000
}
fn default_audio_gain() -> f32 {
    1.0
}
fn default_max_channels() -> usize {
    32
}
fn default_mode() -> String {
    "AM".to_string()
}
fn default_squelch() -> f32 {
    crate::channel::chain::SQUELCH_OPEN_DB
}
fn default_true() -> bool {
    true
}
fn default_target_rate() -> f64 {
    96_000.0
}
fn default_oversample() -> usize {
    2
}
fn default_taps_per_band() -> usize {
    8
}
fn default_fft_size() -> usize {
    2048
}
fn default_buffer_ms() -> u32 {
    500
}
fn default_history_oversample() -> usize {
    4
}
fn default_history_window() -> WindowKind {
    WindowKind::BlackmanHarris
}
fn default_lines() -> usize {
    512
}
fn default_ms_per_line() -> f64 {
    100.0
}

impl Default for Server {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

impl Default for Input {
    fn default() -> Self {
        Self {
            sps: 2_048_000,
            frequency: 100_000_000,
            decimation: default_decimation(),
            block_size: default_block_size(),
            driver: InputDriver::Null,
        }
    }
}

impl Default for Audio {
    fn default() -> Self {
        Self {
            sps: default_audio_sps(),
            gain: default_audio_gain(),
        }
    }
}

impl Default for Channels {
    fn default() -> Self {
        Self {
            max: default_max_channels(),
            defaults: ChannelDefaults::default(),
        }
    }
}

impl Default for ChannelDefaults {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            offset: 0.0,
            filter_low: None,
            filter_high: None,
            squelch: default_squelch(),
        }
    }
}

impl Default for ChannelizerSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            target_rate: default_target_rate(),
            decimation: None,
            oversample: default_oversample(),
            window: WindowKind::default(),
            taps_per_band: default_taps_per_band(),
            threads: 0,
        }
    }
}

impl Default for Spectrum {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            window: WindowKind::default(),
            buffer_ms: default_buffer_ms(),
        }
    }
}

impl Default for History {
    fn default() -> Self {
        Self {
            path: None,
            format: None,
            start_ms: None,
            threads: 0,
            fft_size: default_fft_size(),
            oversample: default_history_oversample(),
            window: default_history_window(),
            lines: default_lines(),
            ms_per_line: default_ms_per_line(),
        }
    }
}

pub fn load_from_file(path: &Path) -> anyhow::Result<Config> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Config =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Values derived from [`Config`] that the receiver, history and server consume.
#[derive(Debug, Clone)]
pub struct Runtime {
    pub input_rate: f64,
    pub channel_rate: f64,
    pub center_hz: f64,
    pub receiver: ReceiverOptions,
    pub channelizer_threads: usize,
    pub history: Option<ReconstructorConfig>,
    pub waterfall_lines: usize,
    pub ms_per_line: f64,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.input.sps > 0, "input.sps must be > 0");
        anyhow::ensure!(self.input.decimation >= 1, "input.decimation must be >= 1");
        anyhow::ensure!(self.input.block_size > 0, "input.block_size must be > 0");
        anyhow::ensure!(self.audio.sps > 0, "audio.sps must be > 0");
        let channel_rate = self.input.sps as f64 / self.input.decimation as f64;
        anyhow::ensure!(
            self.audio.sps as f64 <= channel_rate,
            "audio.sps ({}) must be <= the decimated input rate ({channel_rate} Hz)",
            self.audio.sps
        );
        anyhow::ensure!(self.channels.max >= 1, "channels.max must be >= 1");
        anyhow::ensure!(
            Mode::parse(&self.channels.defaults.mode).is_some(),
            "channels.defaults.mode {:?} is not a known mode",
            self.channels.defaults.mode
        );
        if let (Some(low), Some(high)) = (
            self.channels.defaults.filter_low,
            self.channels.defaults.filter_high,
        ) {
            anyhow::ensure!(
                high > low,
                "channels.defaults.filter_high must be > channels.defaults.filter_low"
            );
        }

        let ch = &self.channelizer;
        anyhow::ensure!(ch.target_rate > 0.0, "channelizer.target_rate must be > 0");
        anyhow::ensure!(ch.oversample >= 1, "channelizer.oversample must be >= 1");
        anyhow::ensure!(ch.taps_per_band >= 1, "channelizer.taps_per_band must be >= 1");
        if let Some(bands) = ch.decimation {
            anyhow::ensure!(
                bands >= 2 && bands % ch.oversample == 0,
                "channelizer.decimation must be >= 2 and a multiple of channelizer.oversample"
            );
        }

        anyhow::ensure!(
            self.spectrum.fft_size.is_power_of_two(),
            "spectrum.fft_size must be power of two"
        );
        anyhow::ensure!(self.spectrum.buffer_ms > 0, "spectrum.buffer_ms must be > 0");

        let h = &self.history;
        anyhow::ensure!(
            h.fft_size.is_power_of_two(),
            "history.fft_size must be power of two"
        );
        anyhow::ensure!(h.oversample >= 1, "history.oversample must be >= 1");
        anyhow::ensure!(h.lines >= 1, "history.lines must be >= 1");
        anyhow::ensure!(
            h.ms_per_line.is_finite(),
            "history.ms_per_line must be a finite number"
        );
        Ok(())
    }

    pub fn runtime(&self) -> anyhow::Result<Runtime> {
        self.validate()?;
        let input_rate = self.input.sps as f64;
        let channel_rate = input_rate / self.input.decimation as f64;

        let defaults = &self.channels.defaults;
        let mode = Mode::parse(&defaults.mode)
            .with_context(|| format!("unknown mode {:?}", defaults.mode))?;
        let mut first = ChainSettings::for_mode(mode);
        if let Some(low) = defaults.filter_low {
            first.filter_low = low;
        }
        if let Some(high) = defaults.filter_high {
            first.filter_high = high;
        }
        first.squelch_db = defaults.squelch;

        let channelizer_threads = match self.channelizer.threads {
            0 => reconstructor::default_threads(),
            n => n,
        };

        let file = match &self.input.driver {
            InputDriver::File(f) => Some(f),
            _ => None,
        };
        let input_format = match &self.input.driver {
            InputDriver::File(f) => Some(f.format),
            InputDriver::Stdin { format } => Some(*format),
            InputDriver::Null => None,
        };

        let manager = ManagerOptions {
            capacity: self.channels.max,
            input_rate: channel_rate,
            audio_rate: self.audio.sps as f64,
            audio_gain: self.audio.gain,
            input_format,
            channelizer: ChannelizerOptions {
                enabled: self.channelizer.enabled,
                target_rate: self.channelizer.target_rate,
                bands: self.channelizer.decimation,
                oversample: self.channelizer.oversample,
                window: self.channelizer.window,
                taps_per_band: self.channelizer.taps_per_band,
            },
            threads: channelizer_threads,
            first_channel: first,
            first_offset_hz: defaults.offset,
        };

        let h = &self.history;
        let history_path = h.path.clone().or_else(|| file.map(|f| f.path.clone()));
        let history_format = h.format.or_else(|| file.map(|f| f.format));
        let base_ms = h
            .start_ms
            .or_else(|| file.map(|f| f.start_ms))
            .unwrap_or(0);
        let history = match (history_path, history_format) {
            (Some(path), Some(format)) => Some(ReconstructorConfig {
                path: Some(path),
                format,
                sample_rate: input_rate,
                threads: h.threads,
                fft: FftParams {
                    size: h.fft_size,
                    oversample: h.oversample,
                    window: h.window,
                },
                base_ms,
            }),
            _ => None,
        };

        Ok(Runtime {
            input_rate,
            channel_rate,
            center_hz: self.input.frequency as f64,
            receiver: ReceiverOptions {
                decimation: self.input.decimation,
                block_size: self.input.block_size,
                spectrum_buffer_ms: self.spectrum.buffer_ms,
                spectrum_window: self.spectrum.window,
                manager,
            },
            channelizer_threads,
            history,
            waterfall_lines: h.lines,
            ms_per_line: h.ms_per_line,
        })
    }
}
