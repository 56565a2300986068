//! Realtime substrate seam.
//!
//! The channel manager only ever talks to a [`Flowgraph`]: it instantiates nodes,
//! wires ports and brackets every topology change with stop/wait/start. The
//! in-process [`LocalFlowgraph`] keeps the wiring as data and enforces the same
//! rules a hardware-backed scheduler would.

use crate::codec::SampleFormat;
use std::collections::{BTreeMap, BTreeSet};

pub type NodeId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusSide {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Source,
    FormatConverter(SampleFormat),
    Channelizer { bands: usize },
    Channel,
    BusSum(BusSide),
    Downmix,
    Sink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    pub node: NodeId,
    pub port: usize,
}

impl Endpoint {
    pub fn new(node: NodeId, port: usize) -> Self {
        Self { node, port }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    pub from: Endpoint,
    pub to: Endpoint,
}

pub trait Flowgraph: Send {
    fn instantiate(&mut self, kind: NodeKind) -> NodeId;
    /// Drops a node and every edge touching it.
    fn release(&mut self, node: NodeId);
    fn connect(&mut self, from: Endpoint, to: Endpoint) -> anyhow::Result<()>;
    fn disconnect(&mut self, from: Endpoint, to: Endpoint) -> anyhow::Result<()>;
    /// Removes every edge; nodes stay instantiated.
    fn disconnect_all(&mut self) -> anyhow::Result<()>;
    fn start(&mut self) -> anyhow::Result<()>;
    fn stop(&mut self);
    /// Blocks until the scheduler has fully stopped.
    fn wait(&mut self);
    /// Holds the scheduler between blocks so node internals can change in place.
    fn lock(&mut self);
    fn unlock(&mut self);
    fn is_running(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct LocalFlowgraph {
    next_id: NodeId,
    nodes: BTreeMap<NodeId, NodeKind>,
    edges: BTreeSet<Edge>,
    running: bool,
    lock_depth: usize,
    starts: u64,
    stops: u64,
}

impl LocalFlowgraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeKind> {
        self.nodes.get(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn has_edge(&self, from: Endpoint, to: Endpoint) -> bool {
        self.edges.contains(&Edge { from, to })
    }

    pub fn is_locked(&self) -> bool {
        self.lock_depth > 0
    }

    pub fn start_count(&self) -> u64 {
        self.starts
    }

    pub fn stop_count(&self) -> u64 {
        self.stops
    }

    fn ensure_stopped(&self, what: &str) -> anyhow::Result<()> {
        anyhow::ensure!(!self.running, "cannot {what} while the flowgraph is running");
        Ok(())
    }

    fn ensure_node(&self, id: NodeId) -> anyhow::Result<()> {
        anyhow::ensure!(self.nodes.contains_key(&id), "unknown flowgraph node {id}");
        Ok(())
    }
}

impl Flowgraph for LocalFlowgraph {
    fn instantiate(&mut self, kind: NodeKind) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        tracing::trace!(node = id, ?kind, "flowgraph node instantiated");
        self.nodes.insert(id, kind);
        id
    }

    fn release(&mut self, node: NodeId) {
        self.edges.retain(|e| e.from.node != node && e.to.node != node);
        self.nodes.remove(&node);
    }

    fn connect(&mut self, from: Endpoint, to: Endpoint) -> anyhow::Result<()> {
        self.ensure_stopped("connect")?;
        self.ensure_node(from.node)?;
        self.ensure_node(to.node)?;
        if let Some(existing) = self.edges.iter().find(|e| e.to == to) {
            anyhow::bail!(
                "input {}:{} is already driven by {}:{}",
                to.node,
                to.port,
                existing.from.node,
                existing.from.port
            );
        }
        self.edges.insert(Edge { from, to });
        Ok(())
    }

    fn disconnect(&mut self, from: Endpoint, to: Endpoint) -> anyhow::Result<()> {
        self.ensure_stopped("disconnect")?;
        anyhow::ensure!(
            self.edges.remove(&Edge { from, to }),
            "no edge {}:{} -> {}:{}",
            from.node,
            from.port,
            to.node,
            to.port
        );
        Ok(())
    }

    fn disconnect_all(&mut self) -> anyhow::Result<()> {
        self.ensure_stopped("tear down")?;
        self.edges.clear();
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(self.lock_depth == 0, "cannot start a locked flowgraph");
        if !self.running {
            self.running = true;
            self.starts += 1;
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.stops += 1;
        }
    }

    fn wait(&mut self) {}

    fn lock(&mut self) {
        self.lock_depth += 1;
    }

    fn unlock(&mut self) {
        debug_assert!(self.lock_depth > 0, "flowgraph unlock without lock");
        self.lock_depth = self.lock_depth.saturating_sub(1);
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewiring_requires_a_stopped_graph() {
        let mut g = LocalFlowgraph::new();
        let a = g.instantiate(NodeKind::Source);
        let b = g.instantiate(NodeKind::Sink);
        g.start().unwrap();
        assert!(g.connect(Endpoint::new(a, 0), Endpoint::new(b, 0)).is_err());
        g.stop();
        g.wait();
        g.connect(Endpoint::new(a, 0), Endpoint::new(b, 0)).unwrap();
        assert!(g.has_edge(Endpoint::new(a, 0), Endpoint::new(b, 0)));
    }

    #[test]
    fn an_input_accepts_one_driver() {
        let mut g = LocalFlowgraph::new();
        let a = g.instantiate(NodeKind::Source);
        let b = g.instantiate(NodeKind::Source);
        let sum = g.instantiate(NodeKind::BusSum(BusSide::Left));
        g.connect(Endpoint::new(a, 0), Endpoint::new(sum, 3)).unwrap();
        assert!(g.connect(Endpoint::new(b, 0), Endpoint::new(sum, 3)).is_err());
        g.release(a);
        g.connect(Endpoint::new(b, 0), Endpoint::new(sum, 3)).unwrap();
    }
}
