//! Ideal transformer coupling.
//!
//! A coupling is an auxiliary node whose row enforces the winding voltage
//! relation and whose column carries the secondary current back into the
//! terminal KCL rows:
//!
//! ```text
//! row c : R·I + V_secondary_loop - ratio·V_primary_loop = 0
//! KCL   : primary terminals draw ±ratio·I, secondary terminals supply ±I
//! ```
//!
//! `I` is the current leaving the positive secondary terminal. The diagonal
//! cell holds the series resistance itself, not a conductance.

use crate::network::NodeId;

/// Winding topology of a coupling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winding {
    /// Grounded primary and grounded secondary.
    OneToOne { primary: NodeId, secondary: NodeId },
    /// Grounded primary, secondary loop between two terminals.
    OneToTwo {
        primary: NodeId,
        secondary: [NodeId; 2],
    },
    /// Primary loop and secondary loop, each between two terminals.
    TwoToTwo {
        primary: [NodeId; 2],
        secondary: [NodeId; 2],
    },
}

/// An ideal transformer with turns ratio and optional series resistance.
#[derive(Debug, Clone, PartialEq)]
pub struct Coupling {
    winding: Winding,
    ratio: f64,
    resistance: f64,
}

impl Coupling {
    /// Create a coupling with no series resistance.
    pub fn new(winding: Winding, ratio: f64) -> Self {
        Self {
            winding,
            ratio,
            resistance: 0.0,
        }
    }

    pub fn one_to_one(primary: NodeId, secondary: NodeId, ratio: f64) -> Self {
        Self::new(Winding::OneToOne { primary, secondary }, ratio)
    }

    pub fn one_to_two(primary: NodeId, secondary: [NodeId; 2], ratio: f64) -> Self {
        Self::new(Winding::OneToTwo { primary, secondary }, ratio)
    }

    pub fn two_to_two(primary: [NodeId; 2], secondary: [NodeId; 2], ratio: f64) -> Self {
        Self::new(Winding::TwoToTwo { primary, secondary }, ratio)
    }

    /// Set the lumped series resistance.
    pub fn with_resistance(mut self, resistance: f64) -> Self {
        self.resistance = resistance;
        self
    }

    pub fn winding(&self) -> Winding {
        self.winding
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn resistance(&self) -> f64 {
        self.resistance
    }

    pub(crate) fn set_resistance(&mut self, resistance: f64) -> f64 {
        std::mem::replace(&mut self.resistance, resistance)
    }

    /// Every node this coupling spans.
    pub fn terminals(&self) -> Vec<NodeId> {
        self.stamp_terms().into_iter().map(|(node, _, _)| node).collect()
    }

    pub fn touches(&self, node: NodeId) -> bool {
        self.terminals().contains(&node)
    }

    /// `(terminal, coefficient in the coupling row, coefficient in the terminal row)`.
    pub fn stamp_terms(&self) -> Vec<(NodeId, f64, f64)> {
        let k = self.ratio;
        let primary = |node, sign: f64| (node, -sign * k, sign * k);
        let secondary = |node, sign: f64| (node, sign, -sign);
        match self.winding {
            Winding::OneToOne {
                primary: p,
                secondary: s,
            } => vec![primary(p, 1.0), secondary(s, 1.0)],
            Winding::OneToTwo {
                primary: p,
                secondary: [s1, s2],
            } => vec![primary(p, 1.0), secondary(s1, 1.0), secondary(s2, -1.0)],
            Winding::TwoToTwo {
                primary: [p1, p2],
                secondary: [s1, s2],
            } => vec![
                primary(p1, 1.0),
                primary(p2, -1.0),
                secondary(s1, 1.0),
                secondary(s2, -1.0),
            ],
        }
    }
}
