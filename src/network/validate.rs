//! Non-fatal network diagnostics.

use std::collections::HashSet;
use std::fmt;

use super::electrical::Network;
use super::types::NodeId;

/// A condition that will not fail a solve but probably is not intended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    /// No voltage source: every node will read 0V.
    NoVoltageSource,
    /// Node with no wire and no coupling attached.
    IsolatedNode(NodeId),
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::NoVoltageSource => {
                write!(f, "network has no voltage source; all nodes will read 0V")
            }
            Issue::IsolatedNode(node) => write!(f, "node {} has nothing attached", node),
        }
    }
}

/// Inspect a network for suspicious configurations.
pub fn validate_network(network: &Network) -> Vec<Issue> {
    let mut issues = Vec::new();

    if network.node_count() > 0 && !network.nodes().any(|n| n.is_voltage_source()) {
        issues.push(Issue::NoVoltageSource);
    }

    let mut attached: HashSet<NodeId> = network
        .wires()
        .flat_map(|w| [w.node1(), w.node2()])
        .flatten()
        .collect();
    for node in network.nodes() {
        if let Some(coupling) = node.as_coupling() {
            attached.insert(node.id());
            attached.extend(coupling.terminals());
        }
    }

    // TODO: report voltage-source loops once the graph can enumerate cycles.
    issues.extend(
        network
            .nodes()
            .map(|n| n.id())
            .filter(|id| !attached.contains(id))
            .map(Issue::IsolatedNode),
    );

    issues
}
