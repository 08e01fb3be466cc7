//! Node variants: floating, voltage source, current source and coupling.

use super::coupling::Coupling;
use crate::network::NodeId;

/// Behavior of a node inside the MNA system.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Unconstrained; solved for voltage.
    Floating,
    /// Forces the node to `voltage`; the solved unknown is the `current`
    /// the source pushes into the network.
    VoltageSource { voltage: f64, current: f64 },
    /// Injects a fixed `current` into the node from ground.
    CurrentSource { current: f64 },
    /// Auxiliary ideal-transformer constraint row.
    Coupling(Coupling),
}

/// A point of electrical potential.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id: NodeId,
    index: usize,
    voltage: f64,
    kind: NodeKind,
}

impl Node {
    fn with_kind(kind: NodeKind) -> Self {
        let voltage = match kind {
            NodeKind::VoltageSource { voltage, .. } => voltage,
            _ => 0.0,
        };
        Self {
            id: NodeId::fresh(),
            index: 0,
            voltage,
            kind,
        }
    }

    /// Create an unconstrained node.
    pub fn floating() -> Self {
        Self::with_kind(NodeKind::Floating)
    }

    /// Create an ideal voltage source node held at `voltage`.
    pub fn voltage_source(voltage: f64) -> Self {
        Self::with_kind(NodeKind::VoltageSource {
            voltage,
            current: 0.0,
        })
    }

    /// Create an ideal current source node injecting `current`.
    pub fn current_source(current: f64) -> Self {
        Self::with_kind(NodeKind::CurrentSource { current })
    }

    /// Create a transformer coupling node.
    pub fn coupling(coupling: Coupling) -> Self {
        Self::with_kind(NodeKind::Coupling(coupling))
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Row/column in the owning network's matrices.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn assign_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Voltage from the last solve (the setpoint for a voltage source).
    pub fn voltage(&self) -> f64 {
        self.voltage
    }

    /// Source current: solved for voltage sources, fixed for current sources.
    pub fn current(&self) -> Option<f64> {
        match self.kind {
            NodeKind::VoltageSource { current, .. } | NodeKind::CurrentSource { current } => {
                Some(current)
            }
            _ => None,
        }
    }

    pub fn is_voltage_source(&self) -> bool {
        matches!(self.kind, NodeKind::VoltageSource { .. })
    }

    pub fn is_current_source(&self) -> bool {
        matches!(self.kind, NodeKind::CurrentSource { .. })
    }

    pub fn as_coupling(&self) -> Option<&Coupling> {
        match &self.kind {
            NodeKind::Coupling(c) => Some(c),
            _ => None,
        }
    }

    /// Short variant name for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Floating => "floating",
            NodeKind::VoltageSource { .. } => "voltage source",
            NodeKind::CurrentSource { .. } => "current source",
            NodeKind::Coupling(_) => "coupling",
        }
    }

    /// Store this node's entry of the solution vector.
    pub(crate) fn receive_result(&mut self, value: f64) {
        match &mut self.kind {
            NodeKind::VoltageSource { current, .. } => *current = value,
            _ => self.voltage = value,
        }
    }

    /// Update a voltage source setpoint, returning the previous one.
    pub(crate) fn set_source_voltage(&mut self, value: f64) -> Option<f64> {
        match &mut self.kind {
            NodeKind::VoltageSource { voltage, .. } => {
                let old = *voltage;
                *voltage = value;
                self.voltage = value;
                Some(old)
            }
            _ => None,
        }
    }

    /// Update a current source value, returning the previous one.
    pub(crate) fn set_source_current(&mut self, value: f64) -> Option<f64> {
        match &mut self.kind {
            NodeKind::CurrentSource { current } => Some(std::mem::replace(current, value)),
            _ => None,
        }
    }

    pub(crate) fn coupling_mut(&mut self) -> Option<&mut Coupling> {
        match &mut self.kind {
            NodeKind::Coupling(c) => Some(c),
            _ => None,
        }
    }
}
