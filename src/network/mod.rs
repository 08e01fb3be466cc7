//! Electrical networks and their bookkeeping.
//!
//! A [`Network`] owns a dense list of nodes, a set of wires and the MNA
//! matrices built from them. It is solved once per simulation tick with
//! [`Network::calculate`]. [`GraphedNetwork`] additionally tracks which
//! nodes are wired together.

mod electrical;
mod graph;
mod types;
mod validate;

pub use electrical::{Network, NetworkConfig, SolveReport};
pub use graph::{GraphedNetwork, NetworkGraph};
pub use types::*;
pub use validate::{validate_network, Issue};
