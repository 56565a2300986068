//! Per-channel demodulation chains.
//!
//! Each chain translates its slice of the input to baseband, decimates to the
//! audio rate and runs a minimal demodulator, then applies squelch, AGC, gain,
//! mute and panning into a [`StereoBuffer`].

use crate::bus::StereoBuffer;
use crate::dsp::demod::{
    am_envelope, polar_discriminator_fm, real_part, DcBlocker, Deemphasis, SidebandSelector,
    SimpleAgc,
};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::ops::{AddAssign, Mul};

/// Squelch level at or below which the squelch is always open.
pub const SQUELCH_OPEN_DB: f32 = -150.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Off,
    Am,
    Sam,
    Nfm,
    Lsb,
    Usb,
    Cwl,
    Cwu,
    Raw,
    Wfm,
    WfmStereo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Off,
    Narrowband,
    Wideband,
}

impl Mode {
    pub const ALL: [Mode; 11] = [
        Mode::Off,
        Mode::Am,
        Mode::Sam,
        Mode::Nfm,
        Mode::Lsb,
        Mode::Usb,
        Mode::Cwl,
        Mode::Cwu,
        Mode::Raw,
        Mode::Wfm,
        Mode::WfmStereo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Off => "OFF",
            Mode::Am => "AM",
            Mode::Sam => "SAM",
            Mode::Nfm => "NFM",
            Mode::Lsb => "LSB",
            Mode::Usb => "USB",
            Mode::Cwl => "CWL",
            Mode::Cwu => "CWU",
            Mode::Raw => "RAW",
            Mode::Wfm => "WFM",
            Mode::WfmStereo => "WFM_STEREO",
        }
    }

    pub fn parse(s: &str) -> Option<Mode> {
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
    }

    pub fn family(self) -> ChainFamily {
        match self {
            Mode::Off => ChainFamily::Off,
            Mode::Wfm | Mode::WfmStereo => ChainFamily::Wideband,
            _ => ChainFamily::Narrowband,
        }
    }

    /// Default passband edges (low, high) in Hz.
    pub fn default_filter(self) -> (i32, i32) {
        match self {
            Mode::Off | Mode::Am | Mode::Sam | Mode::Raw => (-5_000, 5_000),
            Mode::Nfm => (-6_250, 6_250),
            Mode::Lsb => (-2_800, -100),
            Mode::Usb => (100, 2_800),
            Mode::Cwl => (-1_000, -400),
            Mode::Cwu => (400, 1_000),
            Mode::Wfm | Mode::WfmStereo => (-80_000, 80_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChainSettings {
    pub mode: Mode,
    pub filter_low: i32,
    pub filter_high: i32,
    pub filter_tw: i32,
    pub gain_db: f32,
    pub squelch_db: f32,
    pub agc: bool,
    pub mute: bool,
    pub pan: f32,
    pub deemphasis_us: f32,
    pub recording: bool,
}

impl ChainSettings {
    pub fn for_mode(mode: Mode) -> Self {
        let (filter_low, filter_high) = mode.default_filter();
        Self {
            mode,
            filter_low,
            filter_high,
            ..Self::default()
        }
    }

    pub fn family(&self) -> ChainFamily {
        self.mode.family()
    }
}

impl Default for ChainSettings {
    fn default() -> Self {
        let (filter_low, filter_high) = Mode::Am.default_filter();
        Self {
            mode: Mode::Am,
            filter_low,
            filter_high,
            filter_tw: 1_000,
            gain_db: 0.0,
            squelch_db: SQUELCH_OPEN_DB,
            agc: true,
            mute: false,
            pan: 0.0,
            deemphasis_us: 50.0,
            recording: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainRates {
    /// Rate of the samples handed to `process` (input or channelizer output).
    pub input: f64,
    pub audio: f64,
}

pub enum Chain {
    Off(ChainSettings),
    Narrowband(NarrowbandChain),
    Wideband(WidebandChain),
}

impl Chain {
    /// Builds the chain object for the family of `settings.mode`.
    pub fn build(settings: ChainSettings, rates: ChainRates, offset_hz: f64) -> Chain {
        match settings.family() {
            ChainFamily::Off => Chain::Off(settings),
            ChainFamily::Narrowband => {
                Chain::Narrowband(NarrowbandChain::new(settings, rates, offset_hz))
            }
            ChainFamily::Wideband => Chain::Wideband(WidebandChain::new(settings, rates, offset_hz)),
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            Chain::Off(_) => ChainFamily::Off,
            Chain::Narrowband(_) => ChainFamily::Narrowband,
            Chain::Wideband(_) => ChainFamily::Wideband,
        }
    }

    pub fn settings(&self) -> &ChainSettings {
        match self {
            Chain::Off(s) => s,
            Chain::Narrowband(c) => &c.settings,
            Chain::Wideband(c) => &c.settings,
        }
    }

    /// Applies settings of the same family in place.
    pub fn set_settings(&mut self, settings: ChainSettings) {
        debug_assert_eq!(settings.family(), self.family(), "family change needs a rebuild");
        match self {
            Chain::Off(s) => *s = settings,
            Chain::Narrowband(c) => c.set_settings(settings),
            Chain::Wideband(c) => c.set_settings(settings),
        }
    }

    pub fn rates(&self) -> Option<ChainRates> {
        match self {
            Chain::Off(_) => None,
            Chain::Narrowband(c) => Some(c.frontend.rates),
            Chain::Wideband(c) => Some(c.frontend.rates),
        }
    }

    pub fn set_offset(&mut self, offset_hz: f64) {
        match self {
            Chain::Off(_) => {}
            Chain::Narrowband(c) => c.frontend.set_offset(offset_hz),
            Chain::Wideband(c) => c.frontend.set_offset(offset_hz),
        }
    }

    pub fn process(&mut self, iq: &[Complex32], out: &mut StereoBuffer) {
        out.clear();
        match self {
            Chain::Off(_) => {}
            Chain::Narrowband(c) => c.process(iq, out),
            Chain::Wideband(c) => c.process(iq, out),
        }
    }
}

struct Frontend {
    rates: ChainRates,
    offset_hz: f64,
    phase: f64,
    mixed: Vec<Complex32>,
}

impl Frontend {
    fn new(rates: ChainRates, offset_hz: f64) -> Self {
        Self {
            rates,
            offset_hz,
            phase: 0.0,
            mixed: Vec::new(),
        }
    }

    fn set_offset(&mut self, offset_hz: f64) {
        self.offset_hz = offset_hz;
    }

    fn decimation(&self) -> f64 {
        (self.rates.input / self.rates.audio.max(1.0)).max(1.0)
    }

    fn mix(&mut self, iq: &[Complex32]) {
        let inc = -std::f64::consts::TAU * self.offset_hz / self.rates.input.max(1.0);
        self.mixed.clear();
        self.mixed.reserve(iq.len());
        for v in iq {
            let lo = Complex32::from_polar(1.0, self.phase as f32);
            self.mixed.push(*v * lo);
            self.phase = (self.phase + inc).rem_euclid(std::f64::consts::TAU);
        }
    }
}

/// Integrate-and-dump decimator with a fractional ratio.
struct Boxcar<T> {
    ratio: f64,
    pos: f64,
    acc: T,
    count: u32,
}

impl<T> Boxcar<T>
where
    T: Copy + Default + AddAssign + Mul<f32, Output = T>,
{
    fn new(ratio: f64) -> Self {
        Self {
            ratio: ratio.max(1.0),
            pos: 0.0,
            acc: T::default(),
            count: 0,
        }
    }

    fn process(&mut self, input: &[T], out: &mut Vec<T>) {
        out.clear();
        for v in input {
            self.acc += *v;
            self.count += 1;
            self.pos += 1.0;
            if self.pos >= self.ratio {
                out.push(self.acc * (1.0 / self.count as f32));
                self.acc = T::default();
                self.count = 0;
                self.pos -= self.ratio;
            }
        }
    }
}

enum NarrowDemod {
    Envelope(DcBlocker),
    Discriminator(Complex32),
    Sideband(SidebandSelector),
    Raw,
}

impl NarrowDemod {
    fn for_settings(settings: &ChainSettings, audio_rate: f64) -> Self {
        match settings.mode {
            Mode::Am | Mode::Sam => NarrowDemod::Envelope(DcBlocker::new(0.995)),
            Mode::Nfm => NarrowDemod::Discriminator(Complex32::new(1.0, 0.0)),
            Mode::Lsb | Mode::Usb | Mode::Cwl | Mode::Cwu => {
                NarrowDemod::Sideband(SidebandSelector::new(
                    settings.filter_low as f32,
                    settings.filter_high as f32,
                    audio_rate as f32,
                ))
            }
            _ => NarrowDemod::Raw,
        }
    }
}

pub struct NarrowbandChain {
    settings: ChainSettings,
    frontend: Frontend,
    decim: Boxcar<Complex32>,
    demod: NarrowDemod,
    agc: SimpleAgc,
    baseband: Vec<Complex32>,
    audio: Vec<f32>,
    quadrature: Vec<f32>,
}

impl NarrowbandChain {
    fn new(settings: ChainSettings, rates: ChainRates, offset_hz: f64) -> Self {
        let frontend = Frontend::new(rates, offset_hz);
        Self {
            decim: Boxcar::new(frontend.decimation()),
            demod: NarrowDemod::for_settings(&settings, rates.audio),
            agc: SimpleAgc::new(rates.audio as f32),
            frontend,
            settings,
            baseband: Vec::new(),
            audio: Vec::new(),
            quadrature: Vec::new(),
        }
    }

    fn set_settings(&mut self, settings: ChainSettings) {
        let rebuild_demod = settings.mode != self.settings.mode
            || settings.filter_low != self.settings.filter_low
            || settings.filter_high != self.settings.filter_high;
        self.settings = settings;
        if rebuild_demod {
            self.demod = NarrowDemod::for_settings(&self.settings, self.frontend.rates.audio);
        }
    }

    fn process(&mut self, iq: &[Complex32], out: &mut StereoBuffer) {
        self.frontend.mix(iq);
        self.decim.process(&self.frontend.mixed, &mut self.baseband);
        let n = self.baseband.len();
        self.audio.clear();
        self.audio.resize(n, 0.0);
        match &mut self.demod {
            NarrowDemod::Envelope(dc) => {
                am_envelope(&self.baseband, &mut self.audio);
                dc.process(&mut self.audio);
            }
            NarrowDemod::Discriminator(prev) => {
                *prev = polar_discriminator_fm(&self.baseband, *prev, &mut self.audio);
            }
            NarrowDemod::Sideband(sel) => sel.process(&self.baseband, &mut self.audio),
            NarrowDemod::Raw => {
                real_part(&self.baseband, &mut self.audio);
                self.quadrature.clear();
                self.quadrature.extend(self.baseband.iter().map(|v| v.im));
                let open = squelch_open(&self.settings, block_power_db(&self.baseband));
                let gain = if open && !self.settings.mute {
                    db_to_gain(self.settings.gain_db)
                } else {
                    0.0
                };
                for (i, q) in self.audio.iter().zip(self.quadrature.iter()) {
                    out.push(*i * gain, *q * gain);
                }
                return;
            }
        }
        let power = block_power_db(&self.baseband);
        finish(&self.settings, &mut self.agc, power, &mut self.audio, out);
    }
}

pub struct WidebandChain {
    settings: ChainSettings,
    frontend: Frontend,
    prev: Complex32,
    disc: Vec<f32>,
    decim: Boxcar<f32>,
    deemphasis: Deemphasis,
    agc: SimpleAgc,
    audio: Vec<f32>,
}

impl WidebandChain {
    fn new(settings: ChainSettings, rates: ChainRates, offset_hz: f64) -> Self {
        let frontend = Frontend::new(rates, offset_hz);
        Self {
            decim: Boxcar::new(frontend.decimation()),
            deemphasis: Deemphasis::new(settings.deemphasis_us, rates.audio as f32),
            agc: SimpleAgc::new(rates.audio as f32),
            prev: Complex32::new(1.0, 0.0),
            frontend,
            settings,
            disc: Vec::new(),
            audio: Vec::new(),
        }
    }

    fn set_settings(&mut self, settings: ChainSettings) {
        if settings.deemphasis_us != self.settings.deemphasis_us {
            self.deemphasis =
                Deemphasis::new(settings.deemphasis_us, self.frontend.rates.audio as f32);
        }
        self.settings = settings;
    }

    fn process(&mut self, iq: &[Complex32], out: &mut StereoBuffer) {
        self.frontend.mix(iq);
        let mixed = &self.frontend.mixed;
        self.disc.clear();
        self.disc.resize(mixed.len(), 0.0);
        self.prev = polar_discriminator_fm(mixed, self.prev, &mut self.disc);
        self.decim.process(&self.disc, &mut self.audio);
        self.deemphasis.process(&mut self.audio);
        let power = block_power_db(mixed);
        finish(&self.settings, &mut self.agc, power, &mut self.audio, out);
    }
}

fn block_power_db(iq: &[Complex32]) -> f32 {
    if iq.is_empty() {
        return f32::NEG_INFINITY;
    }
    let p = iq.iter().map(|v| v.norm_sqr()).sum::<f32>() / iq.len() as f32;
    10.0 * p.max(1e-20).log10()
}

fn squelch_open(settings: &ChainSettings, power_db: f32) -> bool {
    settings.squelch_db <= SQUELCH_OPEN_DB || power_db >= settings.squelch_db
}

fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

fn finish(
    settings: &ChainSettings,
    agc: &mut SimpleAgc,
    power_db: f32,
    audio: &mut [f32],
    out: &mut StereoBuffer,
) {
    if settings.agc {
        agc.process(audio);
    }
    let open = squelch_open(settings, power_db);
    let gain = if open && !settings.mute {
        db_to_gain(settings.gain_db)
    } else {
        0.0
    };
    let pan = settings.pan.clamp(-1.0, 1.0);
    let left = gain * (1.0 - pan).min(1.0);
    let right = gain * (1.0 + pan).min(1.0);
    for s in audio.iter() {
        out.push(*s * left, *s * right);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates() -> ChainRates {
        ChainRates {
            input: 48_000.0,
            audio: 8_000.0,
        }
    }

    #[test]
    fn modes_parse_case_insensitively_and_map_to_families() {
        assert_eq!(Mode::parse("wfm_stereo"), Some(Mode::WfmStereo));
        assert_eq!(Mode::parse("usb"), Some(Mode::Usb));
        assert_eq!(Mode::parse("FM"), None);
        assert_eq!(Mode::Off.family(), ChainFamily::Off);
        assert_eq!(Mode::Cwl.family(), ChainFamily::Narrowband);
        assert_eq!(Mode::Wfm.family(), ChainFamily::Wideband);
    }

    #[test]
    fn narrowband_chain_decimates_to_audio_rate() {
        let mut chain = Chain::build(ChainSettings::default(), rates(), 0.0);
        let iq = vec![Complex32::new(0.5, 0.0); 4_800];
        let mut out = StereoBuffer::default();
        chain.process(&iq, &mut out);
        assert_eq!(out.len(), 800);
    }

    #[test]
    fn closed_squelch_and_mute_silence_output() {
        let settings = ChainSettings {
            squelch_db: 0.0,
            agc: false,
            ..ChainSettings::default()
        };
        let mut chain = Chain::build(settings.clone(), rates(), 0.0);
        let iq: Vec<Complex32> = (0..4_800)
            .map(|i| Complex32::new(0.01 * (i as f32 * 0.3).sin(), 0.0))
            .collect();
        let mut out = StereoBuffer::default();
        chain.process(&iq, &mut out);
        assert!(out.left.iter().all(|v| *v == 0.0));

        chain.set_settings(ChainSettings {
            squelch_db: SQUELCH_OPEN_DB,
            mute: true,
            ..settings
        });
        chain.process(&iq, &mut out);
        assert!(out.right.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn hard_pan_leaves_one_side_silent() {
        let settings = ChainSettings {
            mode: Mode::Nfm,
            agc: false,
            pan: 1.0,
            ..ChainSettings::default()
        };
        let mut chain = Chain::build(settings, rates(), 1_000.0);
        let iq: Vec<Complex32> = (0..4_800)
            .map(|i| Complex32::from_polar(1.0, 0.7 * i as f32 + 0.001 * (i * i) as f32))
            .collect();
        let mut out = StereoBuffer::default();
        chain.process(&iq, &mut out);
        assert!(out.left.iter().all(|v| *v == 0.0));
        assert!(out.right.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn off_chain_produces_nothing() {
        let mut chain = Chain::build(ChainSettings::for_mode(Mode::Off), rates(), 0.0);
        let mut out = StereoBuffer::default();
        chain.process(&[Complex32::new(1.0, 0.0); 64], &mut out);
        assert!(out.is_empty());
        assert!(chain.rates().is_none());
    }
}
