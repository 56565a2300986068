use super::{Channel, ChainSettings, Mode, ParamError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dynamically typed parameter value.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TaggedValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
}

impl TaggedValue {
    fn as_real(&self) -> Option<f64> {
        match self {
            TaggedValue::Real(v) => Some(*v),
            TaggedValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            TaggedValue::Int(v) => Some(*v),
            TaggedValue::Real(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            TaggedValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            TaggedValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    Offset,
    FilterLow,
    FilterHigh,
    FilterTw,
    Mode,
    Gain,
    Squelch,
    Agc,
    Mute,
    Pan,
    Locked,
    Deemphasis,
    Recording,
}

impl ParamId {
    pub const ALL: [ParamId; 13] = [
        ParamId::Offset,
        ParamId::FilterLow,
        ParamId::FilterHigh,
        ParamId::FilterTw,
        ParamId::Mode,
        ParamId::Gain,
        ParamId::Squelch,
        ParamId::Agc,
        ParamId::Mute,
        ParamId::Pan,
        ParamId::Locked,
        ParamId::Deemphasis,
        ParamId::Recording,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ParamId::Offset => "offset",
            ParamId::FilterLow => "filter_low",
            ParamId::FilterHigh => "filter_high",
            ParamId::FilterTw => "filter_tw",
            ParamId::Mode => "mode",
            ParamId::Gain => "gain",
            ParamId::Squelch => "squelch",
            ParamId::Agc => "agc",
            ParamId::Mute => "mute",
            ParamId::Pan => "pan",
            ParamId::Locked => "locked",
            ParamId::Deemphasis => "deemphasis",
            ParamId::Recording => "recording",
        }
    }

    pub fn parse(s: &str) -> Result<ParamId, ParamError> {
        ParamId::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ParamError::Unknown(s.to_string()))
    }
}

/// What the manager still has to do after a setter ran.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamEffect {
    Applied,
    /// Offset changed; the route and mixer need recomputing.
    Retune,
    /// Mode changes go through the manager so family switches can rebuild the chain.
    ModeChange(Mode),
}

type Getter = Box<dyn Fn(&Channel) -> TaggedValue + Send + Sync>;
type Setter = Box<dyn Fn(&mut Channel, &TaggedValue) -> Result<ParamEffect, ParamError> + Send + Sync>;

pub struct ParamRegistry {
    entries: HashMap<ParamId, (Getter, Setter)>,
}

impl ParamRegistry {
    pub fn new() -> Self {
        let mut reg = Self {
            entries: HashMap::new(),
        };

        reg.insert(
            ParamId::Offset,
            Box::new(|ch| TaggedValue::Real(ch.offset_hz)),
            Box::new(|ch, v| {
                let hz = real(ParamId::Offset, v)?;
                if ch.locked {
                    return Err(ParamError::Locked(ch.index));
                }
                ch.offset_hz = hz;
                Ok(ParamEffect::Retune)
            }),
        );
        reg.insert(
            ParamId::FilterLow,
            Box::new(|ch| TaggedValue::Int(i64::from(ch.settings().filter_low))),
            Box::new(|ch, v| {
                let hz = int_hz(ParamId::FilterLow, v)?;
                let high = ch.settings().filter_high;
                ensure_range(ParamId::FilterLow, hz < high, || {
                    format!("{hz} must be below filter_high {high}")
                })?;
                update(ch, |s| s.filter_low = hz)
            }),
        );
        reg.insert(
            ParamId::FilterHigh,
            Box::new(|ch| TaggedValue::Int(i64::from(ch.settings().filter_high))),
            Box::new(|ch, v| {
                let hz = int_hz(ParamId::FilterHigh, v)?;
                let low = ch.settings().filter_low;
                ensure_range(ParamId::FilterHigh, hz > low, || {
                    format!("{hz} must be above filter_low {low}")
                })?;
                update(ch, |s| s.filter_high = hz)
            }),
        );
        reg.insert(
            ParamId::FilterTw,
            Box::new(|ch| TaggedValue::Int(i64::from(ch.settings().filter_tw))),
            Box::new(|ch, v| {
                let hz = int_hz(ParamId::FilterTw, v)?;
                ensure_range(ParamId::FilterTw, hz > 0, || format!("{hz} must be positive"))?;
                update(ch, |s| s.filter_tw = hz)
            }),
        );
        reg.insert(
            ParamId::Mode,
            Box::new(|ch| TaggedValue::Str(ch.mode().as_str().to_string())),
            Box::new(|_, v| {
                let name = v.as_str().ok_or(ParamError::TypeMismatch {
                    param: ParamId::Mode.as_str(),
                    expected: "a string",
                })?;
                let mode = Mode::parse(name).ok_or_else(|| ParamError::OutOfRange {
                    param: ParamId::Mode.as_str(),
                    detail: format!("unknown mode `{name}`"),
                })?;
                Ok(ParamEffect::ModeChange(mode))
            }),
        );
        reg.insert(
            ParamId::Gain,
            Box::new(|ch| TaggedValue::Real(f64::from(ch.settings().gain_db))),
            Box::new(|ch, v| {
                let db = real(ParamId::Gain, v)? as f32;
                update(ch, |s| s.gain_db = db)
            }),
        );
        reg.insert(
            ParamId::Squelch,
            Box::new(|ch| TaggedValue::Real(f64::from(ch.settings().squelch_db))),
            Box::new(|ch, v| {
                let db = real(ParamId::Squelch, v)? as f32;
                update(ch, |s| s.squelch_db = db)
            }),
        );
        reg.insert(
            ParamId::Agc,
            Box::new(|ch| TaggedValue::Bool(ch.settings().agc)),
            Box::new(|ch, v| {
                let on = boolean(ParamId::Agc, v)?;
                update(ch, |s| s.agc = on)
            }),
        );
        reg.insert(
            ParamId::Mute,
            Box::new(|ch| TaggedValue::Bool(ch.settings().mute)),
            Box::new(|ch, v| {
                let on = boolean(ParamId::Mute, v)?;
                update(ch, |s| s.mute = on)
            }),
        );
        reg.insert(
            ParamId::Pan,
            Box::new(|ch| TaggedValue::Real(f64::from(ch.settings().pan))),
            Box::new(|ch, v| {
                let pan = real(ParamId::Pan, v)?;
                ensure_range(ParamId::Pan, (-1.0..=1.0).contains(&pan), || {
                    format!("{pan} is outside -1..1")
                })?;
                update(ch, |s| s.pan = pan as f32)
            }),
        );
        reg.insert(
            ParamId::Locked,
            Box::new(|ch| TaggedValue::Bool(ch.locked)),
            Box::new(|ch, v| {
                ch.locked = boolean(ParamId::Locked, v)?;
                Ok(ParamEffect::Applied)
            }),
        );
        reg.insert(
            ParamId::Deemphasis,
            Box::new(|ch| TaggedValue::Real(f64::from(ch.settings().deemphasis_us))),
            Box::new(|ch, v| {
                let us = real(ParamId::Deemphasis, v)?;
                ensure_range(ParamId::Deemphasis, us >= 0.0, || {
                    format!("{us} must not be negative")
                })?;
                update(ch, |s| s.deemphasis_us = us as f32)
            }),
        );
        reg.insert(
            ParamId::Recording,
            Box::new(|ch| TaggedValue::Bool(ch.settings().recording)),
            Box::new(|ch, v| {
                let on = boolean(ParamId::Recording, v)?;
                update(ch, |s| s.recording = on)
            }),
        );

        reg
    }

    fn insert(&mut self, id: ParamId, get: Getter, set: Setter) {
        self.entries.insert(id, (get, set));
    }

    pub fn get(&self, channel: &Channel, id: ParamId) -> Result<TaggedValue, ParamError> {
        let (get, _) = self
            .entries
            .get(&id)
            .ok_or_else(|| ParamError::Unknown(id.as_str().to_string()))?;
        Ok(get(channel))
    }

    pub fn set(
        &self,
        channel: &mut Channel,
        id: ParamId,
        value: &TaggedValue,
    ) -> Result<ParamEffect, ParamError> {
        let (_, set) = self
            .entries
            .get(&id)
            .ok_or_else(|| ParamError::Unknown(id.as_str().to_string()))?;
        set(channel, value)
    }
}

impl Default for ParamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn update(ch: &mut Channel, f: impl FnOnce(&mut ChainSettings)) -> Result<ParamEffect, ParamError> {
    let mut settings = ch.settings().clone();
    f(&mut settings);
    ch.chain.set_settings(settings);
    Ok(ParamEffect::Applied)
}

fn real(id: ParamId, v: &TaggedValue) -> Result<f64, ParamError> {
    let value = v.as_real().ok_or(ParamError::TypeMismatch {
        param: id.as_str(),
        expected: "a number",
    })?;
    ensure_range(id, value.is_finite(), || format!("{value} is not finite"))?;
    Ok(value)
}

fn int_hz(id: ParamId, v: &TaggedValue) -> Result<i32, ParamError> {
    let value = v.as_int().ok_or(ParamError::TypeMismatch {
        param: id.as_str(),
        expected: "an integer",
    })?;
    i32::try_from(value).map_err(|_| ParamError::OutOfRange {
        param: id.as_str(),
        detail: format!("{value} does not fit in Hz range"),
    })
}

fn boolean(id: ParamId, v: &TaggedValue) -> Result<bool, ParamError> {
    v.as_bool().ok_or(ParamError::TypeMismatch {
        param: id.as_str(),
        expected: "a boolean",
    })
}

fn ensure_range(id: ParamId, ok: bool, detail: impl FnOnce() -> String) -> Result<(), ParamError> {
    if ok {
        Ok(())
    } else {
        Err(ParamError::OutOfRange {
            param: id.as_str(),
            detail: detail(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_values_keep_their_json_type() {
        let v: TaggedValue = serde_json::from_str("5").unwrap();
        assert_eq!(v, TaggedValue::Int(5));
        let v: TaggedValue = serde_json::from_str("5.5").unwrap();
        assert_eq!(v, TaggedValue::Real(5.5));
        let v: TaggedValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, TaggedValue::Bool(true));
        let v: TaggedValue = serde_json::from_str("\"USB\"").unwrap();
        assert_eq!(v, TaggedValue::Str("USB".into()));
    }

    #[test]
    fn every_id_round_trips_through_its_name() {
        for id in ParamId::ALL {
            assert_eq!(ParamId::parse(id.as_str()), Ok(id));
        }
        assert!(matches!(ParamId::parse("volume"), Err(ParamError::Unknown(_))));
    }
}
