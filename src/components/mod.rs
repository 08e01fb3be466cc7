//! Element models for electrical networks.
//!
//! This module provides:
//! - Nodes: Floating, Voltage Source, Current Source, Coupling
//! - Wires: plain and switched resistive edges
//! - Transmission lines: matrix-external links between voltage sources
//!
//! Nodes and wires are plain values until handed to a
//! [`Network`](crate::network::Network), which then owns them and stamps
//! them into its matrices.

mod coupling;
mod nodes;
mod transmission;
mod wires;

pub use coupling::{Coupling, Winding};
pub use nodes::{Node, NodeKind};
pub use transmission::{TransmissionLine, DEFAULT_SMOOTHING};
pub use wires::{Wire, WireKind};
