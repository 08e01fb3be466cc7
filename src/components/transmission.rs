//! Matrix-external transmission line.
//!
//! A transmission line links two voltage-source nodes, usually in different
//! networks, without joining their matrices. Once per tick it reads the
//! current each end pushes into its network, smooths it, drains or fills a
//! lumped charge, and sets both ends to the resulting line voltage minus the
//! drop across half the line resistance. The lag this introduces stands in
//! for propagation delay and line capacitance.
//!
//! There is no conversion from a line to a [`Wire`](super::Wire), so a line
//! can never be added to a network.

use crate::error::{Result, WirenetError};
use crate::network::{Network, NodeId};
use crate::DEFAULT_TICK_SECONDS;

/// Default weight of the newest sample in the current rolling average.
pub const DEFAULT_SMOOTHING: f64 = 0.5;

/// A lumped RC link between two voltage-source ends.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmissionLine {
    ends: [NodeId; 2],
    resistance: f64,
    capacitance: f64,
    smoothing: f64,
    tick_seconds: f64,
    charge: f64,
    average_current: [f64; 2],
}

impl TransmissionLine {
    /// Create an uncharged line between two voltage-source nodes.
    pub fn new(end_a: NodeId, end_b: NodeId, resistance: f64, capacitance: f64) -> Result<Self> {
        if !(resistance >= 0.0 && resistance.is_finite()) {
            return Err(WirenetError::parameter(
                "resistance",
                "line resistance must be finite and non-negative",
            ));
        }
        if !(capacitance > 0.0 && capacitance.is_finite()) {
            return Err(WirenetError::parameter(
                "capacitance",
                "line capacitance must be finite and positive",
            ));
        }
        if end_a == end_b {
            return Err(WirenetError::topology("transmission line ends must differ"));
        }
        Ok(Self {
            ends: [end_a, end_b],
            resistance,
            capacitance,
            smoothing: DEFAULT_SMOOTHING,
            tick_seconds: DEFAULT_TICK_SECONDS,
            charge: 0.0,
            average_current: [0.0; 2],
        })
    }

    /// Set the rolling-average weight of the newest current sample, in `(0, 1]`.
    pub fn with_smoothing(mut self, smoothing: f64) -> Self {
        self.smoothing = smoothing.clamp(f64::EPSILON, 1.0);
        self
    }

    /// Set the simulated duration of one tick.
    pub fn with_tick_seconds(mut self, seconds: f64) -> Self {
        self.tick_seconds = seconds;
        self
    }

    /// Start the line charged to `voltage`.
    pub fn with_initial_voltage(mut self, voltage: f64) -> Self {
        self.charge = voltage * self.capacitance;
        self
    }

    pub fn ends(&self) -> [NodeId; 2] {
        self.ends
    }

    pub fn charge(&self) -> f64 {
        self.charge
    }

    pub fn line_voltage(&self) -> f64 {
        self.charge / self.capacitance
    }

    pub fn average_currents(&self) -> [f64; 2] {
        self.average_current
    }

    /// Fold one pair of end currents into the line state and return the
    /// voltages both ends should be driven to.
    fn advance(&mut self, currents: [f64; 2]) -> [f64; 2] {
        for (average, current) in self.average_current.iter_mut().zip(currents) {
            *average += self.smoothing * (current - *average);
        }
        let drawn: f64 = self.average_current.iter().sum();
        self.charge -= drawn * self.tick_seconds;

        let v = self.line_voltage();
        let half = self.resistance / 2.0;
        [
            v - self.average_current[0] * half,
            v - self.average_current[1] * half,
        ]
    }

    fn end_current(network: &Network, end: NodeId) -> Result<f64> {
        let node = network
            .node(end)
            .ok_or(WirenetError::NodeNotFound { node: end })?;
        if !node.is_voltage_source() {
            return Err(WirenetError::WrongNodeKind {
                node: end,
                expected: "voltage source",
            });
        }
        Ok(node.current().unwrap_or(0.0))
    }

    /// Exchange state with ends living in two different networks.
    ///
    /// Call after both networks have been calculated for the tick.
    pub fn tick(&mut self, network_a: &mut Network, network_b: &mut Network) -> Result<()> {
        let currents = [
            Self::end_current(network_a, self.ends[0])?,
            Self::end_current(network_b, self.ends[1])?,
        ];
        let [va, vb] = self.advance(currents);
        network_a.set_voltage(self.ends[0], va)?;
        network_b.set_voltage(self.ends[1], vb)
    }

    /// Exchange state with both ends in the same network.
    pub fn tick_within(&mut self, network: &mut Network) -> Result<()> {
        let currents = [
            Self::end_current(network, self.ends[0])?,
            Self::end_current(network, self.ends[1])?,
        ];
        let [va, vb] = self.advance(currents);
        network.set_voltage(self.ends[0], va)?;
        network.set_voltage(self.ends[1], vb)
    }
}
