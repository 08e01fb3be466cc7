//! Connectivity tracking on top of a [`Network`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Deref;

use crate::components::{Node, Wire};
use crate::error::Result;

use super::electrical::{Network, NetworkConfig, SolveReport};
use super::types::{NodeId, WireId};

/// Adjacency map of nodes joined by wires.
///
/// Parallel wires are counted, so removing one of two wires between the
/// same pair keeps the pair adjacent. Grounded wires add no edge.
#[derive(Debug, Clone, Default)]
pub struct NetworkGraph {
    adjacency: HashMap<NodeId, HashMap<NodeId, usize>>,
}

impl NetworkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: NodeId) {
        self.adjacency.entry(node).or_default();
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.adjacency.contains_key(&node)
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Record one wire between `a` and `b`.
    pub fn connect(&mut self, a: NodeId, b: NodeId) {
        *self.adjacency.entry(a).or_default().entry(b).or_insert(0) += 1;
        *self.adjacency.entry(b).or_default().entry(a).or_insert(0) += 1;
    }

    /// Forget one wire between `a` and `b`.
    pub fn disconnect(&mut self, a: NodeId, b: NodeId) {
        Self::decrement(&mut self.adjacency, a, b);
        Self::decrement(&mut self.adjacency, b, a);
    }

    fn decrement(adjacency: &mut HashMap<NodeId, HashMap<NodeId, usize>>, from: NodeId, to: NodeId) {
        if let Some(edges) = adjacency.get_mut(&from) {
            if let Some(count) = edges.get_mut(&to) {
                *count -= 1;
                if *count == 0 {
                    edges.remove(&to);
                }
            }
        }
    }

    /// Drop a node and every edge touching it.
    pub fn remove_node(&mut self, node: NodeId) {
        if let Some(edges) = self.adjacency.remove(&node) {
            for neighbor in edges.keys() {
                if let Some(back) = self.adjacency.get_mut(neighbor) {
                    back.remove(&node);
                }
            }
        }
    }

    /// Keep only nodes matching `keep`.
    pub fn retain_nodes(&mut self, mut keep: impl FnMut(NodeId) -> bool) {
        let stale: Vec<NodeId> = self
            .adjacency
            .keys()
            .copied()
            .filter(|&id| !keep(id))
            .collect();
        for id in stale {
            self.remove_node(id);
        }
    }

    /// Number of distinct nodes wired to `node`.
    pub fn connection_count(&self, node: NodeId) -> usize {
        self.adjacency.get(&node).map_or(0, HashMap::len)
    }

    pub fn neighbors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.adjacency
            .get(&node)
            .into_iter()
            .flat_map(|edges| edges.keys().copied())
    }

    /// Whether a wire path joins `a` and `b`.
    pub fn is_connected(&self, a: NodeId, b: NodeId) -> bool {
        if !self.contains(a) || !self.contains(b) {
            return false;
        }
        let mut seen = HashSet::from([a]);
        let mut queue = VecDeque::from([a]);
        while let Some(node) = queue.pop_front() {
            if node == b {
                return true;
            }
            for next in self.neighbors(node) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }

    /// Take over every node and edge of `other`.
    pub fn merge(&mut self, other: NetworkGraph) {
        for (node, edges) in other.adjacency {
            let entry = self.adjacency.entry(node).or_default();
            for (neighbor, count) in edges {
                *entry.entry(neighbor).or_insert(0) += count;
            }
        }
    }
}

/// A [`Network`] that keeps a [`NetworkGraph`] in sync with its wires.
///
/// Read access goes through `Deref`; every mutation is mirrored here so the
/// graph cannot drift from the network.
#[derive(Debug, Default)]
pub struct GraphedNetwork {
    network: Network,
    graph: NetworkGraph,
}

impl Deref for GraphedNetwork {
    type Target = Network;

    fn deref(&self) -> &Network {
        &self.network
    }
}

impl GraphedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: NetworkConfig) -> Self {
        Self {
            network: Network::with_config(config),
            graph: NetworkGraph::new(),
        }
    }

    pub fn graph(&self) -> &NetworkGraph {
        &self.graph
    }

    /// Give up the graph and return the plain network.
    pub fn into_network(self) -> Network {
        self.network
    }

    pub fn connection_count(&self, node: NodeId) -> usize {
        self.graph.connection_count(node)
    }

    pub fn is_connected(&self, a: NodeId, b: NodeId) -> bool {
        self.graph.is_connected(a, b)
    }

    pub fn add_node(&mut self, node: Node) -> Result<NodeId> {
        let id = self.network.add_node(node)?;
        self.graph.add_node(id);
        Ok(id)
    }

    pub fn add_nodes(&mut self, nodes: impl IntoIterator<Item = Node>) -> Result<Vec<NodeId>> {
        nodes.into_iter().map(|node| self.add_node(node)).collect()
    }

    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        let node = self.network.remove_node(id)?;
        let network = &self.network;
        self.graph.retain_nodes(|n| network.contains_node(n));
        Ok(node)
    }

    pub fn add_wire(&mut self, wire: Wire) -> Result<WireId> {
        let endpoints = wire.endpoints();
        let id = self.network.add_wire(wire)?;
        if let (Some(a), Some(b)) = endpoints {
            self.graph.connect(a, b);
        }
        Ok(id)
    }

    pub fn remove_wire(&mut self, id: WireId) -> Result<Wire> {
        let wire = self.network.remove_wire(id)?;
        if let (Some(a), Some(b)) = wire.endpoints() {
            self.graph.disconnect(a, b);
        }
        Ok(wire)
    }

    /// Absorb `other` together with its adjacency.
    pub fn merge(&mut self, other: &mut GraphedNetwork) -> Result<()> {
        self.network.merge(&mut other.network)?;
        self.graph.merge(std::mem::take(&mut other.graph));
        Ok(())
    }

    pub fn set_resistance(&mut self, id: WireId, resistance: f64) -> Result<()> {
        self.network.set_resistance(id, resistance)
    }

    pub fn set_switch_state(&mut self, id: WireId, closed: bool) -> Result<()> {
        self.network.set_switch_state(id, closed)
    }

    pub fn set_voltage(&mut self, id: NodeId, voltage: f64) -> Result<()> {
        self.network.set_voltage(id, voltage)
    }

    pub fn set_current(&mut self, id: NodeId, current: f64) -> Result<()> {
        self.network.set_current(id, current)
    }

    pub fn set_coupling_resistance(&mut self, id: NodeId, resistance: f64) -> Result<()> {
        self.network.set_coupling_resistance(id, resistance)
    }

    pub fn calculate(&mut self) -> SolveReport {
        self.network.calculate()
    }
}
