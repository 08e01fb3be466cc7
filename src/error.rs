//! Error types for the Wirenet network solver.
//!
//! This module provides a unified error type [`WirenetError`] that covers
//! all error conditions that can occur while mutating a network, solving it,
//! and reading netlist descriptions.

use thiserror::Error;

use crate::network::{NodeId, WireId};

/// Result type alias using [`WirenetError`].
pub type Result<T> = std::result::Result<T, WirenetError>;

/// Unified error type for all Wirenet operations.
#[derive(Error, Debug)]
pub enum WirenetError {
    // ============ Topology Errors ============
    /// Node is not registered in this network
    #[error("Node {node} is not part of this network")]
    NodeNotFound { node: NodeId },

    /// Wire is not registered in this network
    #[error("Wire {wire} is not part of this network")]
    WireNotFound { wire: WireId },

    /// Invalid network topology
    #[error("Invalid network topology: {message}")]
    InvalidTopology { message: String },

    /// Operation applied to the wrong node variant
    #[error("Node {node} is not a {expected} node")]
    WrongNodeKind { node: NodeId, expected: &'static str },

    /// Operation applied to a wire variant that does not support it
    #[error("Wire {wire} is not a switched wire")]
    NotSwitched { wire: WireId },

    /// Invalid parameter value
    #[error("Invalid parameter '{param}': {message}")]
    InvalidParameter { param: String, message: String },

    /// Configuration the solver does not model correctly
    #[error("Unsupported configuration: {message}")]
    UnsupportedConfiguration { message: String },

    // ============ Netlist Errors ============
    /// Error while parsing a netlist line
    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    /// Unknown element keyword
    #[error("Unknown element '{element}' at line {line}")]
    UnknownElement { element: String, line: usize },

    /// Duplicate element name
    #[error("Duplicate name '{name}' at line {line}")]
    DuplicateName { name: String, line: usize },

    /// Reference to a name that was never declared
    #[error("Undefined node '{name}' referenced at line {line}")]
    UndefinedNode { name: String, line: usize },

    // ============ I/O Errors ============
    /// Error reading a netlist file
    #[cfg(feature = "cli")]
    #[error("Failed to read netlist file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl WirenetError {
    /// Create an invalid topology error
    pub fn topology(message: impl Into<String>) -> Self {
        Self::InvalidTopology {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn parameter(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::ParseError {
            line,
            message: message.into(),
        }
    }
}
