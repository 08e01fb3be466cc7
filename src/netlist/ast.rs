//! Parsed form of a netlist.

/// Every element of a netlist, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetlistAst {
    pub elements: Vec<ElementDef>,
}

impl NetlistAst {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every node the netlist declares or implies, in first-seen
    /// order. Ground is not included.
    pub fn node_names(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        let mut names = Vec::new();
        for element in &self.elements {
            for name in element.declared_nodes() {
                if seen.insert(name) {
                    names.push(name);
                }
            }
        }
        names
    }
}

/// One netlist line.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementDef {
    /// Node name for sources and nodes, element name for wires and couplings
    pub name: String,
    pub kind: ElementKind,
    /// Source line number for error reporting
    pub line: usize,
}

impl ElementDef {
    /// Node names this element brings into existence.
    fn declared_nodes(&self) -> Vec<&str> {
        match &self.kind {
            ElementKind::VoltageSource { .. }
            | ElementKind::CurrentSource { .. }
            | ElementKind::Node
            | ElementKind::Coupling { .. } => vec![self.name.as_str()],
            ElementKind::Wire { ends, .. } | ElementKind::Switch { ends, .. } => ends
                .iter()
                .filter_map(|end| end.as_deref())
                .collect(),
        }
    }

    /// Whether the element lives in the node namespace.
    pub fn is_node(&self) -> bool {
        !matches!(
            self.kind,
            ElementKind::Wire { .. } | ElementKind::Switch { .. }
        )
    }
}

/// Element variants. Wire ends of `None` are ground.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    VoltageSource {
        volts: f64,
    },
    CurrentSource {
        amps: f64,
    },
    Node,
    Wire {
        ends: [Option<String>; 2],
        ohms: f64,
    },
    Switch {
        ends: [Option<String>; 2],
        ohms: f64,
        closed: bool,
    },
    Coupling {
        winding: WindingKind,
        /// Primaries first, then secondaries
        terminals: Vec<String>,
        ratio: f64,
        resistance: Option<f64>,
    },
}

/// Coupling winding layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindingKind {
    OneToOne,
    OneToTwo,
    TwoToTwo,
}

impl WindingKind {
    /// Parse a winding layout from its netlist keyword.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "1p1s" => Some(Self::OneToOne),
            "1p2s" => Some(Self::OneToTwo),
            "2p2s" => Some(Self::TwoToTwo),
            _ => None,
        }
    }

    /// Number of terminal nodes the layout connects.
    pub fn terminal_count(&self) -> usize {
        match self {
            Self::OneToOne => 2,
            Self::OneToTwo => 3,
            Self::TwoToTwo => 4,
        }
    }
}
