use super::{
    Chain, ChainFamily, ChainRates, ChainSettings, Channel, ChannelError, ChannelRef,
    ChannelTable, Mode, ParamEffect, ParamError, ParamId, ParamRegistry, Route, TaggedValue,
};
use crate::bus::{AudioBus, StereoBuffer};
use crate::channelizer::{Channelizer, ChannelizerParams};
use crate::codec::SampleFormat;
use crate::dsp::window::WindowKind;
use crate::engine::{BusSide, Endpoint, Flowgraph, LocalFlowgraph, NodeId, NodeKind};
use num_complex::Complex32;

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelizerOptions {
    pub enabled: bool,
    /// Channel rate the sub-bands must at least cover.
    pub target_rate: f64,
    /// Fixed sub-band count; derived from the rates when absent.
    pub bands: Option<usize>,
    pub oversample: usize,
    pub window: WindowKind,
    pub taps_per_band: usize,
}

impl Default for ChannelizerOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            target_rate: 96_000.0,
            bands: None,
            oversample: 2,
            window: WindowKind::Hann,
            taps_per_band: 8,
        }
    }
}

impl ChannelizerOptions {
    /// Channelize only when the input is wide enough to be worth splitting.
    pub fn wants_channelizer(&self, input_rate: f64) -> bool {
        self.enabled && input_rate > 2.0 * self.target_rate
    }

    pub fn params_for(&self, input_rate: f64) -> ChannelizerParams {
        match self.bands {
            Some(bands) => ChannelizerParams {
                bands,
                oversample: self.oversample,
                window: self.window,
                taps_per_band: self.taps_per_band,
            },
            None => ChannelizerParams::auto(
                input_rate,
                self.target_rate,
                self.oversample,
                self.window,
                self.taps_per_band,
            ),
        }
    }
}

/// Partial update of the channelizer options; absent fields stay unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelizerUpdate {
    pub enabled: Option<bool>,
    pub bands: Option<usize>,
    pub oversample: Option<usize>,
    pub window: Option<WindowKind>,
    pub taps_per_band: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub capacity: usize,
    /// Rate of the stream reaching the channels, after input decimation.
    pub input_rate: f64,
    pub audio_rate: f64,
    pub audio_gain: f32,
    /// Recording format when the source is file based.
    pub input_format: Option<SampleFormat>,
    pub channelizer: ChannelizerOptions,
    pub threads: usize,
    pub first_channel: ChainSettings,
    pub first_offset_hz: f64,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            capacity: 32,
            input_rate: 2_048_000.0,
            audio_rate: 48_000.0,
            audio_gain: 1.0,
            input_format: None,
            channelizer: ChannelizerOptions::default(),
            threads: 1,
            first_channel: ChainSettings::default(),
            first_offset_hz: 0.0,
        }
    }
}

struct Topology {
    source: NodeId,
    converter: Option<NodeId>,
    channelizer: Option<NodeId>,
    bus_left: NodeId,
    bus_right: NodeId,
    downmix: NodeId,
    sink: NodeId,
    downmix_wired: bool,
}

impl Topology {
    /// Output feeding the channel stage in direct topology.
    fn stream(&self) -> Endpoint {
        Endpoint::new(self.converter.unwrap_or(self.source), 0)
    }
}

/// Owns the channel arena and keeps the flowgraph wiring in step with it.
///
/// Every topology change is bracketed by stop/wait and a restart if the graph was
/// running; in-place parameter changes use lock/unlock instead.
pub struct ChannelManager<G: Flowgraph = LocalFlowgraph> {
    graph: G,
    table: ChannelTable,
    registry: ParamRegistry,
    bus: AudioBus,
    topo: Topology,
    channelizer: Option<Channelizer>,
    opts: ManagerOptions,
    input_rate: f64,
    threads: usize,
}

impl ChannelManager<LocalFlowgraph> {
    pub fn local(opts: ManagerOptions) -> Result<Self, ChannelError> {
        Self::new(LocalFlowgraph::new(), opts)
    }
}

impl<G: Flowgraph> ChannelManager<G> {
    /// Builds the fixed nodes and the first channel, wires everything and starts the graph.
    pub fn new(mut graph: G, opts: ManagerOptions) -> Result<Self, ChannelError> {
        let source = graph.instantiate(NodeKind::Source);
        let converter = opts
            .input_format
            .map(|f| graph.instantiate(NodeKind::FormatConverter(f)));
        if let Some(conv) = converter {
            graph.connect(Endpoint::new(source, 0), Endpoint::new(conv, 0))?;
        }
        let topo = Topology {
            source,
            converter,
            channelizer: None,
            bus_left: graph.instantiate(NodeKind::BusSum(BusSide::Left)),
            bus_right: graph.instantiate(NodeKind::BusSum(BusSide::Right)),
            downmix: graph.instantiate(NodeKind::Downmix),
            sink: graph.instantiate(NodeKind::Sink),
            downmix_wired: false,
        };

        let rates = ChainRates {
            input: opts.input_rate,
            audio: opts.audio_rate,
        };
        let first = Channel {
            index: 0,
            offset_hz: opts.first_offset_hz,
            locked: false,
            port: None,
            connected: false,
            node: graph.instantiate(NodeKind::Channel),
            route: Route::Direct,
            chain: Chain::build(opts.first_channel.clone(), rates, opts.first_offset_hz),
        };

        let mut mgr = Self {
            table: ChannelTable::new(opts.capacity, first),
            registry: ParamRegistry::new(),
            bus: AudioBus::new(opts.audio_gain),
            input_rate: opts.input_rate,
            threads: opts.threads.max(1),
            channelizer: None,
            graph,
            topo,
            opts,
        };
        let channelized = mgr.opts.channelizer.wants_channelizer(mgr.input_rate);
        mgr.rebuild_topology(channelized)?;
        mgr.graph.start()?;
        Ok(mgr)
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn count(&self) -> usize {
        self.table.len()
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn current(&self) -> usize {
        self.table.current()
    }

    pub fn active_count(&self) -> usize {
        self.table.active_count()
    }

    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.table.get(index)
    }

    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.table.iter()
    }

    pub fn ports_are_dense(&self) -> bool {
        self.table.ports_are_dense()
    }

    pub fn is_channelized(&self) -> bool {
        self.channelizer.is_some()
    }

    pub fn channelizer(&self) -> Option<&Channelizer> {
        self.channelizer.as_ref()
    }

    pub fn channelizer_options(&self) -> &ChannelizerOptions {
        &self.opts.channelizer
    }

    pub fn input_rate(&self) -> f64 {
        self.input_rate
    }

    pub fn audio_rate(&self) -> f64 {
        self.opts.audio_rate
    }

    pub fn is_running(&self) -> bool {
        self.graph.is_running()
    }

    pub fn resolve(&self, target: ChannelRef) -> Result<usize, ChannelError> {
        let index = match target {
            ChannelRef::Current => self.table.current(),
            ChannelRef::Index(i) => i,
        };
        if index < self.table.len() {
            Ok(index)
        } else {
            Err(ChannelError::NoSuchChannel(index))
        }
    }

    /// Adds a channel with the seed's mode, filter and offset; returns its index.
    pub fn add(&mut self, seed: usize) -> Result<usize, ChannelError> {
        let (settings, offset_hz) = {
            let ch = self
                .table
                .get(seed)
                .ok_or(ChannelError::NoSuchChannel(seed))?;
            (ch.settings().clone(), ch.offset_hz)
        };
        if self.table.is_full() {
            return Err(ChannelError::CapacityExhausted(self.table.capacity()));
        }

        self.with_paused(|mgr| {
            let route = mgr.route_for(offset_hz);
            let chain = Chain::build(settings, mgr.chain_rates(), mgr.mixer_offset(route, offset_hz));
            let channel = Channel {
                index: 0,
                offset_hz,
                locked: false,
                port: None,
                connected: false,
                node: mgr.graph.instantiate(NodeKind::Channel),
                route,
                chain,
            };
            let index = mgr.table.push(channel)?;
            mgr.connect_locked(index)?;
            tracing::debug!(channel = index, seed, "channel added");
            Ok(index)
        })
    }

    /// Removes a channel and returns the index selected afterwards.
    ///
    /// The only remaining channel is switched off instead and
    /// [`ChannelError::LastChannel`] is returned.
    pub fn delete(&mut self, index: usize) -> Result<usize, ChannelError> {
        if index >= self.table.len() {
            return Err(ChannelError::NoSuchChannel(index));
        }

        if self.table.len() == 1 {
            self.apply_mode(index, Mode::Off)?;
            tracing::debug!(channel = index, "last channel switched off instead of removed");
            return Err(ChannelError::LastChannel { selected: 0 });
        }

        self.with_paused(|mgr| {
            mgr.disconnect_locked(index)?;
            let (removed, moved_from) = mgr.table.swap_remove(index);
            mgr.graph.release(removed.node);

            let current = mgr.table.current();
            let selected = if current == index {
                index.min(mgr.table.len() - 1)
            } else if Some(current) == moved_from {
                index
            } else {
                current
            };
            mgr.table.set_current(selected);
            tracing::debug!(channel = index, ?moved_from, selected, "channel deleted");
            Ok(selected)
        })
    }

    /// Makes `index` the target of single-channel operations.
    pub fn select(&mut self, index: usize) -> Result<(), ChannelError> {
        if index >= self.table.len() {
            return Err(ChannelError::NoSuchChannel(index));
        }
        if self.graph.is_running() {
            self.with_paused(|mgr| {
                mgr.table.set_current(index);
                Ok(())
            })
        } else {
            self.table.set_current(index);
            Ok(())
        }
    }

    pub fn connect(&mut self, index: usize) -> Result<(), ChannelError> {
        self.resolve(ChannelRef::Index(index))?;
        self.with_paused(|mgr| mgr.connect_locked(index))
    }

    pub fn disconnect(&mut self, index: usize) -> Result<(), ChannelError> {
        self.resolve(ChannelRef::Index(index))?;
        self.with_paused(|mgr| mgr.disconnect_locked(index))
    }

    pub fn get_param(&self, target: ChannelRef, id: &str) -> Result<TaggedValue, ChannelError> {
        let index = self.resolve_param_target(target)?;
        let id = ParamId::parse(id)?;
        let channel = self
            .table
            .get(index)
            .ok_or(ParamError::NoSuchChannel(index))?;
        Ok(self.registry.get(channel, id)?)
    }

    pub fn set_param(
        &mut self,
        target: ChannelRef,
        id: &str,
        value: &TaggedValue,
    ) -> Result<(), ChannelError> {
        let index = self.resolve_param_target(target)?;
        let id = ParamId::parse(id)?;
        let channel = self
            .table
            .get_mut(index)
            .ok_or(ParamError::NoSuchChannel(index))?;
        let prev_offset = channel.offset_hz;

        self.graph.lock();
        let effect = self.registry.set(channel, id, value);
        self.graph.unlock();

        match effect? {
            ParamEffect::Applied => Ok(()),
            ParamEffect::Retune => {
                let res = self.retune(index);
                if res.is_err() {
                    if let Some(ch) = self.table.get_mut(index) {
                        ch.offset_hz = prev_offset;
                    }
                }
                res
            }
            ParamEffect::ModeChange(mode) => self.apply_mode(index, mode),
        }
    }

    /// Changes mode; a family change rebuilds the chain, same family applies in place.
    pub fn apply_mode(&mut self, index: usize, mode: Mode) -> Result<(), ChannelError> {
        let channel = self
            .table
            .get(index)
            .ok_or(ChannelError::NoSuchChannel(index))?;
        let mut settings = channel.settings().clone();
        let old_family = channel.family();
        settings.mode = mode;

        if old_family == mode.family() {
            self.graph.lock();
            if let Some(ch) = self.table.get_mut(index) {
                ch.chain.set_settings(settings);
            }
            self.graph.unlock();
            return Ok(());
        }

        self.with_paused(|mgr| {
            mgr.disconnect_locked(index)?;
            let rates = mgr.chain_rates();
            if let Some(ch) = mgr.table.get_mut(index) {
                let offset = mixer_offset(ch.route, ch.offset_hz);
                ch.chain = Chain::build(settings, rates, offset);
            }
            mgr.connect_locked(index)?;
            tracing::debug!(channel = index, mode = mode.as_str(), ?old_family, "chain rebuilt");
            Ok(())
        })
    }

    /// Channels whose passband contains `offset_hz`, nearest center first.
    pub fn find_by_offset(&self, offset_hz: f64) -> Option<usize> {
        self.table
            .iter()
            .filter(|ch| {
                let (low, high) = ch.passband(0.0);
                low <= offset_hz && offset_hz <= high
            })
            .min_by(|a, b| {
                let da = (a.offset_hz - offset_hz).abs();
                let db = (b.offset_hz - offset_hz).abs();
                da.total_cmp(&db)
            })
            .map(|ch| ch.index)
    }

    /// Re-evaluates the direct/channelized decision for `threads` workers.
    ///
    /// Returns whether the topology is channelized afterwards.
    pub fn set_channelizer(&mut self, threads: usize) -> Result<bool, ChannelError> {
        self.threads = threads.max(1);
        let want = self.opts.channelizer.wants_channelizer(self.input_rate);
        if want == self.channelizer.is_some() {
            if let Some(ch) = self.channelizer.as_mut() {
                self.graph.lock();
                ch.set_threads(self.threads);
                self.graph.unlock();
            }
            return Ok(want);
        }
        self.with_paused(|mgr| mgr.rebuild_topology(want))?;
        Ok(want)
    }

    /// Applies channelizer option changes; in place when the topology survives.
    pub fn update_channelizer(&mut self, update: &ChannelizerUpdate) -> Result<bool, ChannelError> {
        let mut opts = self.opts.channelizer.clone();
        if let Some(enabled) = update.enabled {
            opts.enabled = enabled;
        }
        if let Some(bands) = update.bands {
            opts.bands = Some(bands);
        }
        if let Some(oversample) = update.oversample {
            opts.oversample = oversample;
        }
        if let Some(window) = update.window {
            opts.window = window;
        }
        if let Some(taps) = update.taps_per_band {
            opts.taps_per_band = taps;
        }
        let want = opts.wants_channelizer(self.input_rate);
        let params = opts.params_for(self.input_rate);
        params.validate()?;
        // Compare against the band count that would be built; derived counts follow oversample.
        let bands_changed = self
            .channelizer
            .as_ref()
            .is_some_and(|c| c.bands() != params.bands);
        self.opts.channelizer = opts;

        if want != self.channelizer.is_some() || bands_changed {
            self.with_paused(|mgr| mgr.rebuild_topology(want))?;
            return Ok(want);
        }

        if let Some(ch) = self.channelizer.as_mut() {
            self.graph.lock();
            let res = ch.set_params(params);
            self.graph.unlock();
            res?;
            self.refresh_chain_rates();
            tracing::debug!("channelizer updated in place");
        }
        Ok(want)
    }

    /// New stream rate; every chain and the channelizer are rebuilt for it.
    pub fn set_input_rate(&mut self, input_rate: f64) -> Result<bool, ChannelError> {
        self.input_rate = input_rate;
        let want = self.opts.channelizer.wants_channelizer(input_rate);
        self.with_paused(|mgr| mgr.rebuild_topology(want))?;
        Ok(want)
    }

    /// Runs one block through the channel stage and the bus.
    pub fn process(&mut self, input: &[Complex32], out: &mut StereoBuffer) {
        out.clear();
        if !self.graph.is_running() {
            return;
        }
        let outputs = self.channelizer.as_mut().map(|c| c.process(input));
        for ch in self.table.iter_mut() {
            let Some(port) = ch.port else { continue };
            let Some(dst) = self.bus.input_mut(port) else {
                continue;
            };
            let samples = match (ch.route, outputs) {
                (Route::Band { bin, .. }, Some(outs)) => outs.get(bin).map_or(&[][..], |v| &v[..]),
                _ => input,
            };
            ch.chain.process(samples, dst);
        }
        self.bus.mix(out);
    }

    fn resolve_param_target(&self, target: ChannelRef) -> Result<usize, ParamError> {
        self.resolve(target).map_err(|_| match target {
            ChannelRef::Index(i) => ParamError::NoSuchChannel(i),
            ChannelRef::Current => ParamError::NoSuchChannel(self.table.current()),
        })
    }

    fn with_paused<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ChannelError>,
    ) -> Result<T, ChannelError> {
        let was_running = self.graph.is_running();
        if was_running {
            self.graph.stop();
            self.graph.wait();
        }
        let res = f(self);
        debug_assert!(self.table.ports_are_dense(), "bus ports lost density");
        if was_running {
            self.graph.start()?;
        }
        res
    }

    fn chain_rates(&self) -> ChainRates {
        ChainRates {
            input: self
                .channelizer
                .as_ref()
                .map_or(self.input_rate, Channelizer::output_rate),
            audio: self.opts.audio_rate,
        }
    }

    fn route_for(&self, offset_hz: f64) -> Route {
        match &self.channelizer {
            Some(c) => {
                let (bin, residual_hz) = c.nearest_bin(offset_hz);
                Route::Band { bin, residual_hz }
            }
            None => Route::Direct,
        }
    }

    fn mixer_offset(&self, route: Route, offset_hz: f64) -> f64 {
        mixer_offset(route, offset_hz)
    }

    fn upstream(&self, route: Route) -> Endpoint {
        match (route, self.topo.channelizer) {
            (Route::Band { bin, .. }, Some(node)) => Endpoint::new(node, bin),
            _ => self.topo.stream(),
        }
    }

    fn retune(&mut self, index: usize) -> Result<(), ChannelError> {
        let (old_route, offset_hz) = match self.table.get(index) {
            Some(ch) => (ch.route, ch.offset_hz),
            None => return Err(ChannelError::NoSuchChannel(index)),
        };
        let route = self.route_for(offset_hz);
        let same_input = match (old_route, route) {
            (Route::Band { bin: a, .. }, Route::Band { bin: b, .. }) => a == b,
            (Route::Direct, Route::Direct) => true,
            _ => false,
        };

        if same_input {
            self.graph.lock();
            if let Some(ch) = self.table.get_mut(index) {
                ch.route = route;
                ch.chain.set_offset(mixer_offset(route, offset_hz));
            }
            self.graph.unlock();
            return Ok(());
        }

        self.with_paused(|mgr| {
            let connected = mgr.table.get(index).is_some_and(|c| c.connected);
            let node = mgr.table.get(index).map(|c| c.node);
            if let (true, Some(node)) = (connected, node) {
                let from = mgr.upstream(old_route);
                let to = mgr.upstream(route);
                let input = Endpoint::new(node, 0);
                mgr.graph.disconnect(from, input)?;
                if let Err(e) = mgr.graph.connect(to, input) {
                    if let Err(restore) = mgr.graph.connect(from, input) {
                        tracing::error!(error = ?restore, channel = index, "previous sub-band edge lost");
                    }
                    return Err(e.into());
                }
            }
            if let Some(ch) = mgr.table.get_mut(index) {
                ch.route = route;
                ch.chain.set_offset(mixer_offset(route, offset_hz));
            }
            tracing::debug!(channel = index, ?route, "channel moved to another sub-band");
            Ok(())
        })
    }

    fn connect_locked(&mut self, index: usize) -> Result<(), ChannelError> {
        let next_port = self.table.next_port();
        let (node, route, active, connected) = match self.table.get(index) {
            Some(ch) => (ch.node, ch.route, ch.family() != ChainFamily::Off, ch.connected),
            None => return Err(ChannelError::NoSuchChannel(index)),
        };
        if connected {
            return Ok(());
        }

        let upstream = self.upstream(route);
        self.graph.connect(upstream, Endpoint::new(node, 0))?;
        let port = if active {
            self.wire_port(node, next_port)?;
            Some(next_port)
        } else {
            None
        };
        if let Some(ch) = self.table.get_mut(index) {
            ch.connected = true;
            ch.port = port;
        }
        self.bus.set_ports(self.table.active_count());

        if port.is_some() && !self.topo.downmix_wired {
            let t = &self.topo;
            let (l, r, d, s) = (t.bus_left, t.bus_right, t.downmix, t.sink);
            self.graph.connect(Endpoint::new(l, 0), Endpoint::new(d, 0))?;
            self.graph.connect(Endpoint::new(r, 0), Endpoint::new(d, 1))?;
            self.graph.connect(Endpoint::new(d, 0), Endpoint::new(s, 0))?;
            self.topo.downmix_wired = true;
            tracing::debug!("downmix stage wired");
        }
        tracing::debug!(channel = index, ?port, "channel connected");
        Ok(())
    }

    fn disconnect_locked(&mut self, index: usize) -> Result<(), ChannelError> {
        let (node, route, port, connected) = match self.table.get(index) {
            Some(ch) => (ch.node, ch.route, ch.port, ch.connected),
            None => return Err(ChannelError::NoSuchChannel(index)),
        };
        if !connected {
            return Ok(());
        }

        if let Some(freed) = port {
            self.unwire_port(node, freed)?;
            if let Some(ch) = self.table.get_mut(index) {
                ch.port = None;
            }
            if let Some((moved, from)) = self.table.compact_ports(freed) {
                let moved_node = self.table.get(moved).map(|c| c.node);
                if let Some(moved_node) = moved_node {
                    self.unwire_port(moved_node, from)?;
                    self.wire_port(moved_node, freed)?;
                }
                tracing::debug!(channel = moved, from, to = freed, "bus port reassigned");
            }
        }
        let upstream = self.upstream(route);
        self.graph.disconnect(upstream, Endpoint::new(node, 0))?;
        if let Some(ch) = self.table.get_mut(index) {
            ch.connected = false;
        }
        self.bus.set_ports(self.table.active_count());

        if self.table.active_count() == 0 && self.topo.downmix_wired {
            let t = &self.topo;
            let (l, r, d, s) = (t.bus_left, t.bus_right, t.downmix, t.sink);
            self.graph.disconnect(Endpoint::new(l, 0), Endpoint::new(d, 0))?;
            self.graph.disconnect(Endpoint::new(r, 0), Endpoint::new(d, 1))?;
            self.graph.disconnect(Endpoint::new(d, 0), Endpoint::new(s, 0))?;
            self.topo.downmix_wired = false;
            tracing::debug!("downmix stage removed");
        }
        tracing::debug!(channel = index, "channel disconnected");
        Ok(())
    }

    fn wire_port(&mut self, node: NodeId, port: usize) -> anyhow::Result<()> {
        self.graph
            .connect(Endpoint::new(node, 0), Endpoint::new(self.topo.bus_left, port))?;
        self.graph
            .connect(Endpoint::new(node, 1), Endpoint::new(self.topo.bus_right, port))
    }

    fn unwire_port(&mut self, node: NodeId, port: usize) -> anyhow::Result<()> {
        self.graph
            .disconnect(Endpoint::new(node, 0), Endpoint::new(self.topo.bus_left, port))?;
        self.graph
            .disconnect(Endpoint::new(node, 1), Endpoint::new(self.topo.bus_right, port))
    }

    /// Tears down every connection and rebuilds for `channelized`. Graph must be stopped.
    ///
    /// A channelizer that cannot be built leaves a direct topology and the error is returned.
    fn rebuild_topology(&mut self, channelized: bool) -> Result<(), ChannelError> {
        let (built, failure) = if channelized {
            let params = self.opts.channelizer.params_for(self.input_rate);
            match Channelizer::new(params, self.input_rate, self.threads) {
                Ok(c) => (Some(c), None),
                Err(e) => {
                    tracing::warn!(error = ?e, "channelizer rejected; using direct topology");
                    (None, Some(e))
                }
            }
        } else {
            (None, None)
        };

        for ch in self.table.iter_mut() {
            ch.port = None;
            ch.connected = false;
        }
        self.bus.set_ports(0);
        self.graph.disconnect_all()?;
        self.topo.downmix_wired = false;
        if let Some(node) = self.topo.channelizer.take() {
            self.graph.release(node);
        }
        self.channelizer = None;
        if let Some(conv) = self.topo.converter {
            self.graph
                .connect(Endpoint::new(self.topo.source, 0), Endpoint::new(conv, 0))?;
        }

        if let Some(channelizer) = built {
            let node = self.graph.instantiate(NodeKind::Channelizer {
                bands: channelizer.bands(),
            });
            let stream = self.topo.stream();
            self.graph.connect(stream, Endpoint::new(node, 0))?;
            tracing::debug!(
                bands = channelizer.bands(),
                output_rate = channelizer.output_rate(),
                "channelized topology"
            );
            self.topo.channelizer = Some(node);
            self.channelizer = Some(channelizer);
        } else {
            tracing::debug!(input_rate = self.input_rate, "direct topology");
        }

        let rates = self.chain_rates();
        let routes: Vec<Route> = self
            .table
            .iter()
            .map(|ch| self.route_for(ch.offset_hz))
            .collect();
        for (ch, route) in self.table.iter_mut().zip(routes) {
            ch.route = route;
            let settings = ch.settings().clone();
            ch.chain = Chain::build(settings, rates, mixer_offset(route, ch.offset_hz));
        }
        for index in 0..self.table.len() {
            self.connect_locked(index)?;
        }
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Channelizer output rate changed in place; chains follow without rewiring.
    fn refresh_chain_rates(&mut self) {
        let rates = self.chain_rates();
        let routes: Vec<Route> = self
            .table
            .iter()
            .map(|ch| self.route_for(ch.offset_hz))
            .collect();
        self.graph.lock();
        for (ch, route) in self.table.iter_mut().zip(routes) {
            // Bands are unchanged here, so only the residual can differ.
            ch.route = route;
            let settings = ch.settings().clone();
            ch.chain = Chain::build(settings, rates, mixer_offset(route, ch.offset_hz));
        }
        self.graph.unlock();
    }
}

fn mixer_offset(route: Route, offset_hz: f64) -> f64 {
    match route {
        Route::Direct => offset_hz,
        Route::Band { residual_hz, .. } => residual_hz,
    }
}
