//! # Wirenet Core
//!
//! An incremental electrical network solver for tick-driven simulations.
//!
//! This library provides:
//! - Networks of nodes and resistive wires solved by Modified Nodal Analysis
//! - Voltage sources, current sources and ideal transformer couplings
//! - Incremental matrix updates for cheap per-tick value changes
//! - A text netlist format for describing networks
//!
//! ## Architecture
//!
//! - [`components`] - Node, wire and transmission line models
//! - [`network`] - Network ownership, incremental updates and connectivity
//! - [`solver`] - MNA matrix assembly and the BiCGSTAB iterative solver
//! - [`netlist`] - Parser and builder for the netlist format
//!
//! ## Usage
//!
//! ```
//! use wirenet_core::{Network, Node, Wire};
//!
//! let mut net = Network::new();
//! let supply = net.add_node(Node::voltage_source(12.0))?;
//! let mid = net.add_node(Node::floating())?;
//! net.add_wire(Wire::new(supply, mid, 1.0))?;
//! let load = net.add_wire(Wire::to_ground(mid, 2.0))?;
//!
//! net.calculate();
//! assert!((net.voltage(mid).unwrap() - 8.0).abs() < 1e-6);
//!
//! // Value changes are folded into the existing matrices.
//! net.set_resistance(load, 1.0)?;
//! assert!(!net.calculate().rebuilt);
//! # Ok::<(), wirenet_core::WirenetError>(())
//! ```
//!
//! ## Simulation Method
//!
//! Each call to [`Network::calculate`] is one tick:
//!
//! 1. Rebuild the MNA system if the topology changed since the last tick
//! 2. Solve `Ax = b` with BiCGSTAB, warm-started from the previous tick
//! 3. Write node voltages and source currents back into the nodes
//!
//! Voltage sources become constrained columns whose unknown is the current
//! they push into the network, so no extra branch rows are needed.

pub mod components;
pub mod error;
pub mod netlist;
pub mod network;
pub mod solver;

// Re-export main types for convenience
pub use components::{Coupling, Node, NodeKind, TransmissionLine, Winding, Wire, WireKind};
pub use error::{Result, WirenetError};
pub use network::{
    validate_network, GraphedNetwork, Network, NetworkConfig, NetworkGraph, NodeId, SolveReport,
    WireId,
};
pub use solver::SolverConfig;

/// Default simulated duration of one tick in seconds
pub const DEFAULT_TICK_SECONDS: f64 = 0.05;
