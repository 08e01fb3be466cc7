//! Netlist parser for network descriptions.
//!
//! A line-oriented text format for describing a [`Network`]. Each line is
//! one element; names are case-sensitive, keywords are not.
//!
//! # Grammar Overview
//!
//! ```text
//! netlist  = { line }
//! line     = comment | element | empty
//! comment  = ('#' | ';') { any_char }
//! element  = keyword { word } { key '=' word }
//!
//! endpoint = name | "0" | "GND"
//! value    = number [unit_suffix]
//! unit_suffix = 'p' | 'n' | 'u' | 'm' | 'k' | 'M' | 'G'
//! ```
//!
//! # Elements
//!
//! | Keyword | Description | Syntax |
//! |---------|-------------|--------|
//! | V | Voltage source node | `V <node> <volts>` |
//! | I | Current source node | `I <node> <amps>` |
//! | N | Floating node | `N <node>` |
//! | R | Wire | `R <name> <a> <b> <ohms>` |
//! | SW | Switched wire | `SW <name> <a> <b> <ohms> [on\|off]` |
//! | X | Coupling | `X <name> <1p1s\|1p2s\|2p2s> <primary...> <secondary...> <ratio> [r=<ohms>]` |
//!
//! Wire endpoints that are never declared become floating nodes. Coupling
//! terminals must name a node that exists somewhere in the file.
//!
//! # Example
//!
//! ```text
//! # Step-down transformer feeding a load
//! V mains 230
//! X t1 1p1s mains sec 0.1 r=0.5
//! R load sec 0 100
//! ```

mod ast;
mod lexer;
mod parser;

use std::collections::BTreeMap;

use log::{debug, info};

pub use ast::*;
pub use lexer::{parse_value, Lexer, Token, TokenKind};
pub use parser::{is_ground, Parser};

use crate::components::{Coupling, Node, Wire};
use crate::error::{Result, WirenetError};
use crate::network::{Network, NetworkConfig, NodeId, WireId};

/// Parse netlist text into an AST.
pub fn parse(input: &str) -> Result<NetlistAst> {
    let mut parser = Parser::new(Lexer::new(input));
    parser.parse()
}

/// Parse a netlist file.
#[cfg(feature = "cli")]
pub fn parse_file(path: &std::path::Path) -> Result<NetlistAst> {
    let content = std::fs::read_to_string(path).map_err(|e| WirenetError::FileReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    parse(&content)
}

/// A network built from a netlist, with its names resolved to ids.
#[derive(Debug)]
pub struct BuiltNetwork {
    pub network: Network,
    /// Every named node, couplings included
    pub nodes: BTreeMap<String, NodeId>,
    pub wires: BTreeMap<String, WireId>,
}

impl BuiltNetwork {
    pub fn node(&self, name: &str) -> Option<NodeId> {
        self.nodes.get(name).copied()
    }

    pub fn wire(&self, name: &str) -> Option<WireId> {
        self.wires.get(name).copied()
    }
}

/// Parse and build in one step with the default configuration.
pub fn load(input: &str) -> Result<BuiltNetwork> {
    build(&parse(input)?, NetworkConfig::default())
}

/// Turn an AST into a live network.
///
/// Plain nodes are added first, then couplings, then wires, so couplings
/// and wires may refer to nodes declared further down the file.
pub fn build(ast: &NetlistAst, config: NetworkConfig) -> Result<BuiltNetwork> {
    let mut network = Network::with_config(config);
    let mut nodes = BTreeMap::new();

    for element in &ast.elements {
        let node = match element.kind {
            ElementKind::VoltageSource { volts } => Node::voltage_source(volts),
            ElementKind::CurrentSource { amps } => Node::current_source(amps),
            ElementKind::Node => Node::floating(),
            _ => continue,
        };
        nodes.insert(element.name.clone(), network.add_node(node)?);
    }

    // Wire ends that were never declared.
    for name in ast.node_names() {
        if !nodes.contains_key(name) && !is_coupling_name(ast, name) {
            debug!("implicit floating node '{}'", name);
            nodes.insert(name.to_string(), network.add_node(Node::floating())?);
        }
    }

    for element in &ast.elements {
        if let ElementKind::Coupling {
            winding,
            terminals,
            ratio,
            resistance,
        } = &element.kind
        {
            let ids = terminals
                .iter()
                .map(|name| {
                    nodes
                        .get(name)
                        .copied()
                        .ok_or_else(|| WirenetError::UndefinedNode {
                            name: name.clone(),
                            line: element.line,
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            let mut coupling = match winding {
                WindingKind::OneToOne => Coupling::one_to_one(ids[0], ids[1], *ratio),
                WindingKind::OneToTwo => Coupling::one_to_two(ids[0], [ids[1], ids[2]], *ratio),
                WindingKind::TwoToTwo => {
                    Coupling::two_to_two([ids[0], ids[1]], [ids[2], ids[3]], *ratio)
                }
            };
            if let Some(r) = resistance {
                coupling = coupling.with_resistance(*r);
            }
            let id = network.add_node(Node::coupling(coupling))?;
            nodes.insert(element.name.clone(), id);
        }
    }

    let mut wires = BTreeMap::new();
    for element in &ast.elements {
        let wire = match &element.kind {
            ElementKind::Wire { ends, ohms } => {
                Wire::between(resolve(&nodes, &ends[0]), resolve(&nodes, &ends[1]), *ohms)
            }
            ElementKind::Switch { ends, ohms, closed } => Wire::switched(
                resolve(&nodes, &ends[0]),
                resolve(&nodes, &ends[1]),
                *ohms,
                *closed,
            ),
            _ => continue,
        };
        let id = network.add_wire(wire).map_err(|e| {
            WirenetError::parse(element.line, format!("wire '{}': {}", element.name, e))
        })?;
        wires.insert(element.name.clone(), id);
    }

    info!(
        "built network with {} nodes and {} wires",
        network.node_count(),
        network.wire_count()
    );
    Ok(BuiltNetwork {
        network,
        nodes,
        wires,
    })
}

fn is_coupling_name(ast: &NetlistAst, name: &str) -> bool {
    ast.elements
        .iter()
        .any(|e| e.name == name && matches!(e.kind, ElementKind::Coupling { .. }))
}

fn resolve(nodes: &BTreeMap<String, NodeId>, end: &Option<String>) -> Option<NodeId> {
    end.as_ref().and_then(|name| nodes.get(name).copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_load_divider() {
        let mut built = load("V vcc 10\nR top vcc mid 1k\nR bottom mid 0 1k").unwrap();
        assert_eq!(built.nodes.len(), 2);
        built.network.calculate();

        let mid = built.node("mid").unwrap();
        assert_abs_diff_eq!(built.network.voltage(mid).unwrap(), 5.0, epsilon = 1e-6);
        let bottom = built.wire("bottom").unwrap();
        assert_abs_diff_eq!(
            built.network.wire_current(bottom).unwrap(),
            5e-3,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_load_transformer_declared_after_use() {
        let input = "\
            X t1 1p1s mains sec 0.1\n\
            R load sec 0 100\n\
            V mains 230\n";
        let mut built = load(input).unwrap();
        assert_eq!(built.nodes.len(), 3);
        built.network.calculate();
        let sec = built.node("sec").unwrap();
        assert_abs_diff_eq!(built.network.voltage(sec).unwrap(), 23.0, epsilon = 1e-6);
    }

    #[test]
    fn test_open_switch_isolates_load() {
        let mut built = load("V vcc 12\nSW s1 vcc out 1 off\nR load out 0 10").unwrap();
        built.network.calculate();
        let out = built.node("out").unwrap();
        assert_abs_diff_eq!(built.network.voltage(out).unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_undefined_coupling_terminal() {
        let result = load("V p 1\nX t 1p1s p missing 2\n");
        assert!(matches!(
            result,
            Err(WirenetError::UndefinedNode { ref name, line: 2 }) if name == "missing"
        ));
    }

    #[test]
    fn test_wire_to_coupling_is_rejected_with_line() {
        let result = load("V p 1\nN s\nX t 1p1s p s 2\nR bad t 0 1\n");
        assert!(matches!(result, Err(WirenetError::ParseError { line: 4, .. })));
    }
}
