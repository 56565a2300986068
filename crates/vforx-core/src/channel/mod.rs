//! Channel arena: the ordered channel set, its bus ports and per-channel chains.

pub mod chain;
mod error;
pub mod manager;
pub mod params;
pub mod table;

pub use chain::{Chain, ChainFamily, ChainRates, ChainSettings, Mode};
pub use error::{ChannelError, ParamError};
pub use manager::{ChannelManager, ChannelizerOptions, ChannelizerUpdate, ManagerOptions};
pub use params::{ParamEffect, ParamId, ParamRegistry, TaggedValue};
pub use table::ChannelTable;

use crate::engine::NodeId;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Unconnected,
    ConnectedInactive,
    ConnectedActive,
}

/// Where a channel takes its samples from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Route {
    Direct,
    Band { bin: usize, residual_hz: f64 },
}

/// Addressing for single-channel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRef {
    Current,
    Index(usize),
}

impl FromStr for ChannelRef {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("current") {
            return Ok(ChannelRef::Current);
        }
        s.parse().map(ChannelRef::Index)
    }
}

pub struct Channel {
    pub(crate) index: usize,
    pub(crate) offset_hz: f64,
    pub(crate) locked: bool,
    pub(crate) port: Option<usize>,
    pub(crate) connected: bool,
    pub(crate) node: NodeId,
    pub(crate) route: Route,
    pub(crate) chain: Chain,
}

impl Channel {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn offset_hz(&self) -> f64 {
        self.offset_hz
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn port(&self) -> Option<usize> {
        self.port
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn settings(&self) -> &ChainSettings {
        self.chain.settings()
    }

    pub fn mode(&self) -> Mode {
        self.chain.settings().mode
    }

    pub fn family(&self) -> ChainFamily {
        self.chain.family()
    }

    /// Rates the chain was built for; `None` while switched off.
    pub fn rates(&self) -> Option<ChainRates> {
        self.chain.rates()
    }

    pub fn state(&self) -> ChannelState {
        match (self.connected, self.port) {
            (false, _) => ChannelState::Unconnected,
            (true, None) => ChannelState::ConnectedInactive,
            (true, Some(_)) => ChannelState::ConnectedActive,
        }
    }

    /// Absolute passband edges for a given center frequency.
    pub fn passband(&self, center_hz: f64) -> (f64, f64) {
        let s = self.settings();
        let mid = center_hz + self.offset_hz;
        (mid + f64::from(s.filter_low), mid + f64::from(s.filter_high))
    }
}
