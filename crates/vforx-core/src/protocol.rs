//! JSON bodies of the control surface.

use crate::channel::{ChainFamily, Channel, ChannelState, ChannelizerUpdate, TaggedValue};
use crate::dsp::window::WindowKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub index: usize,
    pub offset_hz: f64,
    pub frequency_hz: f64,
    pub mode: String,
    pub family: ChainFamily,
    pub filter_low: i32,
    pub filter_high: i32,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<usize>,
    pub state: ChannelState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_band: Option<usize>,
    pub current: bool,
}

impl ChannelInfo {
    pub fn new(ch: &Channel, center_hz: f64, current: usize) -> Self {
        let settings = ch.settings();
        let sub_band = match ch.route() {
            crate::channel::Route::Band { bin, .. } => Some(bin),
            crate::channel::Route::Direct => None,
        };
        Self {
            index: ch.index(),
            offset_hz: ch.offset_hz(),
            frequency_hz: center_hz + ch.offset_hz(),
            mode: settings.mode.as_str().to_string(),
            family: ch.family(),
            filter_low: settings.filter_low,
            filter_high: settings.filter_high,
            locked: ch.locked(),
            port: ch.port(),
            state: ch.state(),
            sub_band,
            current: ch.index() == current,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelList {
    pub current: usize,
    pub capacity: usize,
    pub active: usize,
    pub channelized: bool,
    pub channels: Vec<ChannelInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddChannel {
    /// Channel to copy; the current one when absent.
    #[serde(default)]
    pub seed: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Added {
    pub index: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Deleted {
    pub selected: usize,
    /// True when the last channel was switched off instead of removed.
    pub switched_off: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamValue {
    pub value: TaggedValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FindQuery {
    pub freq: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Found {
    pub index: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpectrumQuery {
    #[serde(default)]
    pub size: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpectrumResponse {
    pub center_hz: f64,
    pub sample_rate: f64,
    pub bins: Vec<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelizerBody {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub decimation: Option<usize>,
    #[serde(default)]
    pub oversample: Option<usize>,
    #[serde(default)]
    pub window: Option<WindowKind>,
    #[serde(default)]
    pub taps_per_band: Option<usize>,
    #[serde(default)]
    pub threads: Option<usize>,
}

impl ChannelizerBody {
    pub fn update(&self) -> ChannelizerUpdate {
        ChannelizerUpdate {
            enabled: self.enabled,
            bands: self.decimation,
            oversample: self.oversample,
            window: self.window,
            taps_per_band: self.taps_per_band,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelizerStatus {
    pub channelized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bands: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_rate: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeekRequest {
    pub position_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaterfallResponse {
    pub width: usize,
    pub ms_per_line: f64,
    /// Earliest timestamp the recording can supply.
    pub history_start_ms: i64,
    /// Newest row first.
    pub rows: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub error: String,
}
