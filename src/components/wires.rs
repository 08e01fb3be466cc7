//! Resistive edges: plain and switched wires.

use crate::network::{NodeId, WireId};

/// Wire variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    Plain,
    /// Conducts only while `closed`.
    Switched { closed: bool },
}

/// A resistive edge between two nodes. A missing endpoint is ground.
#[derive(Debug, Clone, PartialEq)]
pub struct Wire {
    id: WireId,
    node1: Option<NodeId>,
    node2: Option<NodeId>,
    resistance: f64,
    kind: WireKind,
}

impl Wire {
    /// Create a wire between two optional endpoints.
    pub fn between(node1: Option<NodeId>, node2: Option<NodeId>, resistance: f64) -> Self {
        Self {
            id: WireId::fresh(),
            node1,
            node2,
            resistance,
            kind: WireKind::Plain,
        }
    }

    /// Create a wire between two nodes.
    pub fn new(node1: NodeId, node2: NodeId, resistance: f64) -> Self {
        Self::between(Some(node1), Some(node2), resistance)
    }

    /// Create a wire from `node` to ground.
    pub fn to_ground(node: NodeId, resistance: f64) -> Self {
        Self::between(Some(node), None, resistance)
    }

    /// Create a switched wire.
    pub fn switched(
        node1: Option<NodeId>,
        node2: Option<NodeId>,
        resistance: f64,
        closed: bool,
    ) -> Self {
        Self {
            kind: WireKind::Switched { closed },
            ..Self::between(node1, node2, resistance)
        }
    }

    pub fn id(&self) -> WireId {
        self.id
    }

    pub fn node1(&self) -> Option<NodeId> {
        self.node1
    }

    pub fn node2(&self) -> Option<NodeId> {
        self.node2
    }

    pub fn endpoints(&self) -> (Option<NodeId>, Option<NodeId>) {
        (self.node1, self.node2)
    }

    pub fn touches(&self, node: NodeId) -> bool {
        self.node1 == Some(node) || self.node2 == Some(node)
    }

    pub fn kind(&self) -> WireKind {
        self.kind
    }

    pub fn resistance(&self) -> f64 {
        self.resistance
    }

    /// Switch state; `None` for a plain wire.
    pub fn is_closed(&self) -> Option<bool> {
        match self.kind {
            WireKind::Plain => None,
            WireKind::Switched { closed } => Some(closed),
        }
    }

    /// Effective conductance. An open switch conducts nothing regardless of
    /// its resistance.
    pub fn conductance(&self) -> f64 {
        match self.kind {
            WireKind::Switched { closed: false } => 0.0,
            _ => 1.0 / self.resistance,
        }
    }

    pub(crate) fn set_resistance(&mut self, resistance: f64) {
        self.resistance = resistance;
    }

    /// Returns `false` for a plain wire.
    pub(crate) fn set_closed(&mut self, state: bool) -> bool {
        match &mut self.kind {
            WireKind::Switched { closed } => {
                *closed = state;
                true
            }
            WireKind::Plain => false,
        }
    }
}
