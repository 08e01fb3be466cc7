//! The electrical network: node arena, wires and the incrementally
//! maintained MNA system.

use std::collections::{BTreeMap, HashMap};

use log::{debug, trace, warn};

use crate::components::{Coupling, Node, NodeKind, Wire};
use crate::error::{Result, WirenetError};
use crate::solver::{BiCgStab, LuFactors, MnaSystem, SolverConfig};

use super::types::{NodeId, WireId};

/// Configuration for a network.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfig {
    /// Linear solver settings.
    pub solver: SolverConfig,
    /// Dump A and b at trace level before every solve.
    pub log_matrices: bool,
}

impl NetworkConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the linear solver configuration.
    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    /// Enable trace-level matrix dumps.
    pub fn with_matrix_logging(mut self, enabled: bool) -> Self {
        self.log_matrices = enabled;
        self
    }
}

/// What a [`Network::calculate`] call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveReport {
    /// The matrices were rebuilt from scratch before solving.
    pub rebuilt: bool,
    /// BiCGSTAB iterations, summed over the retry if there was one.
    pub iterations: usize,
    /// The published values come from a converged or direct solve.
    pub converged: bool,
    /// The first solve was non-finite or did not converge and was retried.
    pub retried: bool,
    /// The values came from the LU fallback.
    pub direct: bool,
    /// Nodes forced to 0 because every path was still non-finite.
    pub zeroed_nodes: usize,
}

/// A set of nodes and wires solved together every tick.
///
/// Nodes live in a dense vector: a node's position is its matrix index and
/// removal swaps the last node into the hole. Value changes on registered
/// elements are pushed into the matrices incrementally; structural changes
/// set `dirty`, which forces a full rebuild on the next
/// [`calculate`](Self::calculate).
#[derive(Debug)]
pub struct Network {
    config: NetworkConfig,
    nodes: Vec<Node>,
    slots: HashMap<NodeId, usize>,
    wires: BTreeMap<WireId, Wire>,
    mna: MnaSystem,
    solver: BiCgStab,
    /// LU factors of A, tagged with the A revision they were taken from.
    factors: Option<(u64, LuFactors)>,
    dirty: bool,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    /// Create an empty network with default configuration.
    pub fn new() -> Self {
        Self::with_config(NetworkConfig::default())
    }

    /// Create an empty network with custom configuration.
    pub fn with_config(config: NetworkConfig) -> Self {
        let solver = BiCgStab::new(config.solver);
        Self {
            config,
            nodes: Vec::new(),
            slots: HashMap::new(),
            wires: BTreeMap::new(),
            mna: MnaSystem::new(),
            solver,
            factors: None,
            dirty: true,
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Whether the matrices are stale and will be rebuilt on the next solve.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn wire_count(&self) -> usize {
        self.wires.len()
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn contains_wire(&self, id: WireId) -> bool {
        self.wires.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.slots.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn wire(&self, id: WireId) -> Option<&Wire> {
        self.wires.get(&id)
    }

    /// Nodes in matrix-index order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn wires(&self) -> impl Iterator<Item = &Wire> {
        self.wires.values()
    }

    /// Wires with `node` as an endpoint.
    pub fn wires_touching(&self, node: NodeId) -> Vec<WireId> {
        self.wires
            .values()
            .filter(|w| w.touches(node))
            .map(Wire::id)
            .collect()
    }

    fn slot(&self, id: NodeId) -> Result<usize> {
        self.slots
            .get(&id)
            .copied()
            .ok_or(WirenetError::NodeNotFound { node: id })
    }

    // ============ Structural mutation ============

    /// Register a node and assign it the next matrix index.
    ///
    /// A coupling's terminals must already be registered, must not be
    /// couplings themselves and must not be current sources.
    pub fn add_node(&mut self, mut node: Node) -> Result<NodeId> {
        let id = node.id();
        if self.slots.contains_key(&id) {
            return Err(WirenetError::topology(format!(
                "node {} is already registered",
                id
            )));
        }
        if let Some(coupling) = node.as_coupling() {
            self.check_coupling(id, coupling)?;
        }

        let index = self.nodes.len();
        node.assign_index(index);
        trace!("adding {} node {} at index {}", node.kind_name(), id, index);
        self.nodes.push(node);
        self.slots.insert(id, index);
        self.dirty = true;
        Ok(id)
    }

    /// Register several nodes in order.
    pub fn add_nodes(&mut self, nodes: impl IntoIterator<Item = Node>) -> Result<Vec<NodeId>> {
        nodes.into_iter().map(|node| self.add_node(node)).collect()
    }

    fn check_coupling(&self, id: NodeId, coupling: &Coupling) -> Result<()> {
        if !coupling.ratio().is_finite() {
            return Err(WirenetError::parameter("ratio", "must be finite"));
        }
        check_coupling_resistance(coupling.resistance())?;
        for terminal in coupling.terminals() {
            let node = self
                .node(terminal)
                .ok_or(WirenetError::NodeNotFound { node: terminal })?;
            if node.as_coupling().is_some() {
                return Err(WirenetError::topology(format!(
                    "coupling {} cannot use coupling {} as a terminal",
                    id, terminal
                )));
            }
            if node.is_current_source() {
                return Err(WirenetError::UnsupportedConfiguration {
                    message: format!(
                        "current source {} cannot be joined directly to coupling {}",
                        terminal, id
                    ),
                });
            }
        }
        Ok(())
    }

    /// Remove a node, every wire attached to it and every coupling spanning it.
    ///
    /// The last node is swapped into the freed index.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        self.slot(id)?;

        let dependent_couplings: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.as_coupling().is_some_and(|c| c.touches(id)))
            .map(Node::id)
            .collect();
        for coupling in dependent_couplings {
            self.remove_node(coupling)?;
        }
        for wire in self.wires_touching(id) {
            self.remove_wire(wire)?;
        }

        let index = self.slot(id)?;
        let node = self.nodes.swap_remove(index);
        self.slots.remove(&id);
        if let Some(moved) = self.nodes.get_mut(index) {
            moved.assign_index(index);
            self.slots.insert(moved.id(), index);
        }
        trace!("removed {} node {} from index {}", node.kind_name(), id, index);
        self.dirty = true;
        Ok(node)
    }

    /// Register a wire between already-registered nodes (or ground).
    pub fn add_wire(&mut self, wire: Wire) -> Result<WireId> {
        let id = wire.id();
        if self.wires.contains_key(&id) {
            return Err(WirenetError::topology(format!(
                "wire {} is already registered",
                id
            )));
        }
        check_resistance(wire.resistance())?;
        match wire.endpoints() {
            (None, None) => {
                return Err(WirenetError::topology(format!(
                    "wire {} has no endpoints",
                    id
                )))
            }
            (Some(a), Some(b)) if a == b => {
                return Err(WirenetError::topology(format!(
                    "wire {} connects node {} to itself",
                    id, a
                )))
            }
            _ => {}
        }
        for endpoint in [wire.node1(), wire.node2()].into_iter().flatten() {
            let node = self
                .node(endpoint)
                .ok_or(WirenetError::NodeNotFound { node: endpoint })?;
            if node.as_coupling().is_some() {
                return Err(WirenetError::topology(format!(
                    "coupling node {} cannot terminate wire {}",
                    endpoint, id
                )));
            }
        }

        self.update_conductance(wire.endpoints(), wire.conductance());
        self.wires.insert(id, wire);
        Ok(id)
    }

    /// Unregister a wire, removing its contribution incrementally.
    pub fn remove_wire(&mut self, id: WireId) -> Result<Wire> {
        let wire = self
            .wires
            .remove(&id)
            .ok_or(WirenetError::WireNotFound { wire: id })?;
        self.update_conductance(wire.endpoints(), -wire.conductance());
        Ok(wire)
    }

    /// Absorb every node and wire of `other`, leaving it empty.
    ///
    /// Electrical behavior is unchanged; only bookkeeping is pooled. There
    /// is no inverse: a merged network stays one network even if it later
    /// becomes disconnected.
    pub fn merge(&mut self, other: &mut Network) -> Result<()> {
        let nodes = std::mem::take(&mut other.nodes);
        let wires = std::mem::take(&mut other.wires);
        other.slots.clear();
        other.mna.reset(0);
        other.solver.set_state_size(0);
        other.dirty = true;

        debug!(
            "merging {} nodes and {} wires into a network of {} nodes",
            nodes.len(),
            wires.len(),
            self.nodes.len()
        );

        let (couplings, plain): (Vec<Node>, Vec<Node>) =
            nodes.into_iter().partition(|n| n.as_coupling().is_some());
        for node in plain.into_iter().chain(couplings) {
            self.add_node(node)?;
        }
        for wire in wires.into_values() {
            self.add_wire(wire)?;
        }
        Ok(())
    }

    // ============ Value mutation ============

    /// Change a wire's resistance.
    pub fn set_resistance(&mut self, id: WireId, resistance: f64) -> Result<()> {
        check_resistance(resistance)?;
        let wire = self
            .wires
            .get_mut(&id)
            .ok_or(WirenetError::WireNotFound { wire: id })?;
        let before = wire.conductance();
        wire.set_resistance(resistance);
        let delta = wire.conductance() - before;
        let endpoints = wire.endpoints();
        self.update_conductance(endpoints, delta);
        Ok(())
    }

    /// Open or close a switched wire.
    pub fn set_switch_state(&mut self, id: WireId, closed: bool) -> Result<()> {
        let wire = self
            .wires
            .get_mut(&id)
            .ok_or(WirenetError::WireNotFound { wire: id })?;
        let before = wire.conductance();
        if !wire.set_closed(closed) {
            return Err(WirenetError::NotSwitched { wire: id });
        }
        let delta = wire.conductance() - before;
        let endpoints = wire.endpoints();
        self.update_conductance(endpoints, delta);
        Ok(())
    }

    /// Change a voltage source setpoint.
    pub fn set_voltage(&mut self, id: NodeId, voltage: f64) -> Result<()> {
        if !voltage.is_finite() {
            return Err(WirenetError::parameter("voltage", "must be finite"));
        }
        let index = self.slot(id)?;
        self.nodes[index]
            .set_source_voltage(voltage)
            .ok_or(WirenetError::WrongNodeKind {
                node: id,
                expected: "voltage source",
            })?;
        if !self.dirty {
            self.mna.shift_source_voltage(index, voltage);
        }
        Ok(())
    }

    /// Change a current source value.
    pub fn set_current(&mut self, id: NodeId, current: f64) -> Result<()> {
        if !current.is_finite() {
            return Err(WirenetError::parameter("current", "must be finite"));
        }
        let index = self.slot(id)?;
        let old = self.nodes[index]
            .set_source_current(current)
            .ok_or(WirenetError::WrongNodeKind {
                node: id,
                expected: "current source",
            })?;
        if !self.dirty {
            self.mna.inject_current(index, current - old);
        }
        Ok(())
    }

    /// Change a coupling's series resistance.
    pub fn set_coupling_resistance(&mut self, id: NodeId, resistance: f64) -> Result<()> {
        check_coupling_resistance(resistance)?;
        let index = self.slot(id)?;
        let old = self.nodes[index]
            .coupling_mut()
            .map(|c| c.set_resistance(resistance))
            .ok_or(WirenetError::WrongNodeKind {
                node: id,
                expected: "coupling",
            })?;
        if !self.dirty {
            self.mna.stamp(index, index, resistance - old);
        }
        Ok(())
    }

    /// Push a conductance change for a wire into the live matrices.
    fn update_conductance(&mut self, endpoints: (Option<NodeId>, Option<NodeId>), delta: f64) {
        if self.dirty || delta == 0.0 {
            return;
        }
        let n1 = endpoints.0.and_then(|id| self.slots.get(&id).copied());
        let n2 = endpoints.1.and_then(|id| self.slots.get(&id).copied());
        self.mna.stamp_conductance(n1, n2, delta);
    }

    // ============ Solving ============

    /// Rebuild G, A and b from scratch.
    fn rebuild(&mut self) {
        let n = self.nodes.len();
        self.mna.reset(n);
        if self.solver.state_size() != n {
            self.solver.set_state_size(n);
        }

        for wire in self.wires.values() {
            let (a, b) = wire.endpoints();
            let n1 = a.and_then(|id| self.slots.get(&id).copied());
            let n2 = b.and_then(|id| self.slots.get(&id).copied());
            self.mna.stamp_conductance(n1, n2, wire.conductance());
        }

        for node in &self.nodes {
            if let Some(coupling) = node.as_coupling() {
                let row = node.index();
                for (terminal, row_coefficient, column_coefficient) in coupling.stamp_terms() {
                    if let Some(&t) = self.slots.get(&terminal) {
                        self.mna.stamp(row, t, row_coefficient);
                        self.mna.stamp(t, row, column_coefficient);
                    }
                }
                self.mna.stamp(row, row, coupling.resistance());
            }
        }

        for node in &self.nodes {
            if let NodeKind::CurrentSource { current } = *node.kind() {
                self.mna.inject_current(node.index(), current);
            }
        }
        for node in &self.nodes {
            if node.is_voltage_source() {
                self.mna.constrain_voltage_source(node.index(), node.voltage());
            }
        }

        self.dirty = false;
        debug!(
            "rebuilt MNA system: {} nodes, {} wires",
            n,
            self.wires.len()
        );
    }

    /// Solve the network and push a result into every node.
    ///
    /// Without any voltage source there is no reference, so every node is
    /// given 0V. A solve that is non-finite or misses the tolerance is
    /// retried once from a zeroed solver; if that fails too the system goes
    /// through a dense LU factorization, which is kept and reused for as long
    /// as A is unchanged. Entries still non-finite after that are set to 0.
    pub fn calculate(&mut self) -> SolveReport {
        if !self.nodes.iter().any(Node::is_voltage_source) {
            for node in &mut self.nodes {
                node.receive_result(0.0);
            }
            return SolveReport {
                converged: true,
                ..SolveReport::default()
            };
        }

        let rebuilt = self.dirty || self.mna.size() != self.nodes.len();
        if rebuilt {
            self.rebuild();
        }
        if self.config.log_matrices {
            self.mna.log_system();
        }

        let mut report = SolveReport {
            rebuilt,
            ..SolveReport::default()
        };
        let revision = self.mna.revision();
        let cached = matches!(&self.factors, Some((r, _)) if *r == revision);

        if !cached {
            let outcome = self.solver.solve(&self.mna.a, &self.mna.b);
            report.iterations = outcome.iterations;
            report.converged = outcome.converged && self.solution_is_finite();
            if !report.converged {
                debug!(
                    "network solve of {} nodes did not converge; retrying from zero",
                    self.nodes.len()
                );
                self.solver.zero();
                let outcome = self.solver.solve(&self.mna.a, &self.mna.b);
                report.iterations += outcome.iterations;
                report.converged = outcome.converged && self.solution_is_finite();
                report.retried = true;
            }
        }

        if !report.converged {
            if !cached {
                debug!("factoring {} unknowns for a direct solve", self.mna.size());
                self.factors = Some((revision, LuFactors::factor(&self.mna.a)));
            }
            if let Some((_, factors)) = &self.factors {
                factors.solve(&self.mna.b, self.solver.solution_mut());
            }
            report.direct = true;
            report.converged = self.solution_is_finite();
        }

        for (node, &value) in self.nodes.iter_mut().zip(self.solver.solution()) {
            if value.is_finite() {
                node.receive_result(value);
            } else {
                node.receive_result(0.0);
                report.zeroed_nodes += 1;
            }
        }
        if report.zeroed_nodes > 0 {
            warn!(
                "{} node(s) still degenerate after direct solve; set to 0",
                report.zeroed_nodes
            );
            self.solver.zero();
        }

        report
    }

    fn solution_is_finite(&self) -> bool {
        self.solver.solution().iter().all(|v| v.is_finite())
    }

    // ============ Results ============

    /// Voltage of a node after the last solve.
    pub fn voltage(&self, id: NodeId) -> Option<f64> {
        self.node(id).map(Node::voltage)
    }

    /// Current of a voltage or current source node.
    pub fn source_current(&self, id: NodeId) -> Option<f64> {
        self.node(id).and_then(Node::current)
    }

    /// `V(node1) - V(node2)`, with a missing endpoint at 0V.
    pub fn potential_difference(&self, id: WireId) -> Option<f64> {
        let wire = self.wires.get(&id)?;
        let v = |end: Option<NodeId>| end.and_then(|n| self.voltage(n)).unwrap_or(0.0);
        Some(v(wire.node1()) - v(wire.node2()))
    }

    /// Current flowing from `node1` to `node2`.
    pub fn wire_current(&self, id: WireId) -> Option<f64> {
        let conductance = self.wires.get(&id)?.conductance();
        self.potential_difference(id).map(|dv| dv * conductance)
    }
}

fn check_resistance(resistance: f64) -> Result<()> {
    if resistance > 0.0 {
        Ok(())
    } else {
        Err(WirenetError::parameter(
            "resistance",
            format!("must be positive, got {}", resistance),
        ))
    }
}

fn check_coupling_resistance(resistance: f64) -> Result<()> {
    if resistance >= 0.0 && resistance.is_finite() {
        Ok(())
    } else {
        Err(WirenetError::parameter(
            "resistance",
            format!("coupling resistance must be finite and non-negative, got {}", resistance),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Coupling;
    use approx::assert_abs_diff_eq;

    const EPS: f64 = 1e-6;

    struct Divider {
        net: Network,
        source: NodeId,
        mid: NodeId,
        upper: WireId,
        lower: WireId,
    }

    fn divider(v: f64, r1: f64, r2: f64) -> Divider {
        let mut net = Network::new();
        let source = net.add_node(Node::voltage_source(v)).unwrap();
        let mid = net.add_node(Node::floating()).unwrap();
        let upper = net.add_wire(Wire::new(source, mid, r1)).unwrap();
        let lower = net.add_wire(Wire::to_ground(mid, r2)).unwrap();
        Divider {
            net,
            source,
            mid,
            upper,
            lower,
        }
    }

    fn voltages(net: &Network) -> Vec<f64> {
        net.nodes().map(Node::voltage).collect()
    }

    #[test]
    fn test_resistor_divider() {
        let mut d = divider(5.0, 10.0, 20.0);
        let report = d.net.calculate();
        assert!(report.rebuilt);
        assert!(report.converged);

        assert_abs_diff_eq!(d.net.voltage(d.mid).unwrap(), 5.0 * 20.0 / 30.0, epsilon = EPS);
        assert_abs_diff_eq!(d.net.source_current(d.source).unwrap(), 5.0 / 30.0, epsilon = EPS);
        assert_abs_diff_eq!(d.net.wire_current(d.upper).unwrap(), 5.0 / 30.0, epsilon = EPS);
        assert_abs_diff_eq!(d.net.wire_current(d.lower).unwrap(), 5.0 / 30.0, epsilon = EPS);
        assert_abs_diff_eq!(
            d.net.potential_difference(d.upper).unwrap(),
            5.0 - 5.0 * 20.0 / 30.0,
            epsilon = EPS
        );
        assert_eq!(d.net.voltage(d.source), Some(5.0));
    }

    #[test]
    fn test_resistor_divider_values() {
        for &(v, r1, r2) in &[(1.0, 1.0, 1.0), (230.0, 4.7, 0.33), (12.0, 1000.0, 50.0)] {
            let mut d = divider(v, r1, r2);
            d.net.calculate();
            let mid = d.net.voltage(d.mid).unwrap();
            assert_abs_diff_eq!(mid / v, r2 / (r1 + r2), epsilon = EPS);
            let current = d.net.source_current(d.source).unwrap();
            assert_abs_diff_eq!(current * (r1 + r2) / v, 1.0, epsilon = EPS);
        }
    }

    #[test]
    fn test_resistor_divider_wide_ratios() {
        for &(v, r1, r2) in &[(1000.0, 1e6, 1.0), (1e-3, 1.0, 1e6), (5.0, 1e-3, 1e3)] {
            let mut d = divider(v, r1, r2);
            let report = d.net.calculate();
            assert!(report.converged, "divider {v}V {r1}/{r2}: {report:?}");
            assert_abs_diff_eq!(d.net.voltage(d.mid).unwrap(), v * r2 / (r1 + r2), epsilon = EPS);
            assert_abs_diff_eq!(
                d.net.source_current(d.source).unwrap(),
                v / (r1 + r2),
                epsilon = EPS
            );
        }
    }

    fn ladder(v: f64, series: &[f64], shunt: f64) -> (Network, NodeId, Vec<WireId>) {
        let mut net = Network::new();
        let source = net.add_node(Node::voltage_source(v)).unwrap();
        let mut links = Vec::with_capacity(series.len());
        let mut prev = source;
        for &r in series {
            let node = net.add_node(Node::floating()).unwrap();
            links.push(net.add_wire(Wire::new(prev, node, r)).unwrap());
            net.add_wire(Wire::to_ground(node, shunt)).unwrap();
            prev = node;
        }
        (net, source, links)
    }

    #[test]
    fn test_long_ladder_incremental_matches_fresh() {
        let mut series = vec![1.0; 59];
        let (mut net, source, links) = ladder(10.0, &series, 1000.0);
        net.calculate();

        for (step, &i) in [3usize, 17, 40, 58].iter().enumerate() {
            series[i] = 2.0 + step as f64;
            net.set_resistance(links[i], series[i]).unwrap();
            assert!(!net.calculate().rebuilt);
        }
        net.set_voltage(source, 12.0).unwrap();
        let report = net.calculate();
        assert!(!report.rebuilt);
        assert!(report.converged);

        let (mut fresh, fresh_source, _) = ladder(12.0, &series, 1000.0);
        assert!(fresh.calculate().rebuilt);

        assert_eq!(net.node_count(), 60);
        for (a, b) in voltages(&net).iter().zip(voltages(&fresh).iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = EPS);
        }
        assert_abs_diff_eq!(
            net.source_current(source).unwrap(),
            fresh.source_current(fresh_source).unwrap(),
            epsilon = EPS
        );
    }

    #[test]
    fn test_incremental_updates_match_rebuild() {
        let mut d = divider(5.0, 10.0, 20.0);
        let extra = d.net.add_node(Node::floating()).unwrap();
        d.net.calculate();

        let bridge = d.net.add_wire(Wire::new(d.mid, extra, 5.0)).unwrap();
        let tail = d.net.add_wire(Wire::to_ground(extra, 15.0)).unwrap();
        assert!(!d.net.calculate().rebuilt);

        d.net.set_resistance(d.upper, 7.5).unwrap();
        d.net.set_voltage(d.source, 9.0).unwrap();
        assert!(!d.net.calculate().rebuilt);

        d.net.remove_wire(d.lower).unwrap();
        d.net.set_resistance(tail, 40.0).unwrap();
        assert!(!d.net.is_dirty());
        let report = d.net.calculate();
        assert!(!report.rebuilt);

        // Same final topology, built in one go.
        let mut fresh = Network::new();
        let ids = fresh
            .add_nodes([Node::voltage_source(9.0), Node::floating(), Node::floating()])
            .unwrap();
        fresh.add_wire(Wire::new(ids[0], ids[1], 7.5)).unwrap();
        fresh.add_wire(Wire::new(ids[1], ids[2], 5.0)).unwrap();
        fresh.add_wire(Wire::to_ground(ids[2], 40.0)).unwrap();
        assert!(fresh.calculate().rebuilt);

        for (a, b) in voltages(&d.net).iter().zip(voltages(&fresh).iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = EPS);
        }
        assert_abs_diff_eq!(
            d.net.source_current(d.source).unwrap(),
            fresh.source_current(ids[0]).unwrap(),
            epsilon = EPS
        );
        assert_abs_diff_eq!(d.net.voltage(extra).unwrap(), 9.0 * 40.0 / 52.5, epsilon = EPS);
        assert!(d.net.wire(bridge).is_some());
    }

    #[test]
    fn test_switch_toggle_restores_solution() {
        let mut d = divider(10.0, 10.0, 10.0);
        let switch = d
            .net
            .add_wire(Wire::switched(Some(d.mid), None, 10.0, true))
            .unwrap();
        d.net.calculate();
        let before = voltages(&d.net);
        let current_before = d.net.source_current(d.source).unwrap();
        assert_abs_diff_eq!(before[1], 10.0 / 3.0, epsilon = EPS);

        d.net.set_switch_state(switch, false).unwrap();
        d.net.calculate();
        assert_abs_diff_eq!(d.net.voltage(d.mid).unwrap(), 5.0, epsilon = EPS);
        assert_eq!(d.net.wire_current(switch), Some(0.0));

        d.net.set_switch_state(switch, true).unwrap();
        d.net.calculate();
        for (a, b) in voltages(&d.net).iter().zip(before.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = EPS);
        }
        assert_abs_diff_eq!(d.net.source_current(d.source).unwrap(), current_before, epsilon = EPS);

        assert!(matches!(
            d.net.set_switch_state(d.upper, false),
            Err(WirenetError::NotSwitched { .. })
        ));
    }

    #[test]
    fn test_transformer_ratio_and_reflected_load() {
        let (v, k, r) = (10.0, 2.0, 8.0);
        let mut net = Network::new();
        let primary = net.add_node(Node::voltage_source(v)).unwrap();
        let secondary = net.add_node(Node::floating()).unwrap();
        net.add_node(Node::coupling(Coupling::one_to_one(primary, secondary, k)))
            .unwrap();
        let load = net
            .add_wire(Wire::to_ground(secondary, f64::INFINITY))
            .unwrap();

        net.calculate();
        assert_abs_diff_eq!(net.voltage(secondary).unwrap(), v * k, epsilon = EPS);
        assert_abs_diff_eq!(net.source_current(primary).unwrap(), 0.0, epsilon = EPS);

        net.set_resistance(load, r).unwrap();
        assert!(!net.calculate().rebuilt);
        assert_abs_diff_eq!(net.voltage(secondary).unwrap(), v * k, epsilon = EPS);
        assert_abs_diff_eq!(net.source_current(primary).unwrap(), v * k * k / r, epsilon = EPS);
    }

    #[test]
    fn test_coupling_series_resistance_update() {
        let (v, k, r, rs) = (6.0, 0.5, 3.0, 1.0);
        let mut net = Network::new();
        let primary = net.add_node(Node::voltage_source(v)).unwrap();
        let secondary = net.add_node(Node::floating()).unwrap();
        let coupling = net
            .add_node(Node::coupling(Coupling::one_to_one(primary, secondary, k)))
            .unwrap();
        net.add_wire(Wire::to_ground(secondary, r)).unwrap();
        net.calculate();

        net.set_coupling_resistance(coupling, rs).unwrap();
        assert!(!net.calculate().rebuilt);
        let i = k * v / (r + rs);
        assert_abs_diff_eq!(net.voltage(secondary).unwrap(), i * r, epsilon = EPS);
        assert_abs_diff_eq!(net.source_current(primary).unwrap(), k * i, epsilon = EPS);

        assert!(matches!(
            net.set_coupling_resistance(secondary, 1.0),
            Err(WirenetError::WrongNodeKind { .. })
        ));
    }

    #[test]
    fn test_one_to_two_coupling_drives_secondary_loop() {
        let (v, k, r) = (4.0, 3.0, 6.0);
        let mut net = Network::new();
        let primary = net.add_node(Node::voltage_source(v)).unwrap();
        let ids = net.add_nodes([Node::floating(), Node::floating()]).unwrap();
        net.add_node(Node::coupling(Coupling::one_to_two(primary, [ids[0], ids[1]], k)))
            .unwrap();
        net.add_wire(Wire::new(ids[0], ids[1], r)).unwrap();
        net.add_wire(Wire::to_ground(ids[1], 2.0)).unwrap();
        net.calculate();

        let loop_voltage = net.voltage(ids[0]).unwrap() - net.voltage(ids[1]).unwrap();
        assert_abs_diff_eq!(loop_voltage, v * k, epsilon = EPS);
        assert_abs_diff_eq!(net.voltage(ids[1]).unwrap(), 0.0, epsilon = EPS);
        assert_abs_diff_eq!(net.source_current(primary).unwrap(), v * k * k / r, epsilon = EPS);
    }

    #[test]
    fn test_two_to_two_coupling_between_driven_terminals() {
        let (v1, v2, k, r) = (10.0, 1.0, 2.0, 8.0);
        let mut net = Network::new();
        let p1 = net.add_node(Node::voltage_source(v1)).unwrap();
        let p2 = net.add_node(Node::voltage_source(v2)).unwrap();
        let ids = net.add_nodes([Node::floating(), Node::floating()]).unwrap();
        net.add_node(Node::coupling(Coupling::two_to_two([p1, p2], [ids[0], ids[1]], k)))
            .unwrap();
        net.add_wire(Wire::new(ids[0], ids[1], r)).unwrap();
        net.add_wire(Wire::to_ground(ids[1], 1.0)).unwrap();

        let report = net.calculate();
        assert!(report.converged, "{report:?}");
        assert_eq!(report.zeroed_nodes, 0);

        let loop_voltage = net.voltage(ids[0]).unwrap() - net.voltage(ids[1]).unwrap();
        assert_abs_diff_eq!(loop_voltage, k * (v1 - v2), epsilon = EPS);
        assert_abs_diff_eq!(net.voltage(ids[1]).unwrap(), 0.0, epsilon = EPS);
        let load_current = k * (v1 - v2) / r;
        assert_abs_diff_eq!(net.source_current(p1).unwrap(), k * load_current, epsilon = EPS);
        assert_abs_diff_eq!(net.source_current(p2).unwrap(), -k * load_current, epsilon = EPS);

        // Setpoint change only touches b.
        net.set_voltage(p2, 4.0).unwrap();
        let report = net.calculate();
        assert!(!report.rebuilt);
        assert!(report.converged);
        let loop_voltage = net.voltage(ids[0]).unwrap() - net.voltage(ids[1]).unwrap();
        assert_abs_diff_eq!(loop_voltage, k * (v1 - 4.0), epsilon = EPS);
    }

    #[test]
    fn test_two_to_two_coupling_with_floating_return() {
        let (v, k, r) = (10.0, 2.0, 8.0);
        let mut net = Network::new();
        let p1 = net.add_node(Node::voltage_source(v)).unwrap();
        let ids = net
            .add_nodes([Node::floating(), Node::floating(), Node::floating()])
            .unwrap();
        let (p2, s1, s2) = (ids[0], ids[1], ids[2]);
        net.add_node(Node::coupling(Coupling::two_to_two([p1, p2], [s1, s2], k)))
            .unwrap();
        net.add_wire(Wire::to_ground(p2, 1.0)).unwrap();
        net.add_wire(Wire::new(s1, s2, r)).unwrap();
        net.add_wire(Wire::to_ground(s2, 1.0)).unwrap();

        let report = net.calculate();
        assert!(report.converged, "{report:?}");

        // Loop: r·I = k·(v - k·I·1Ω)
        let i = k * v / (r + k * k);
        assert_abs_diff_eq!(net.voltage(p2).unwrap(), k * i, epsilon = EPS);
        assert_abs_diff_eq!(net.voltage(s1).unwrap() - net.voltage(s2).unwrap(), i * r, epsilon = EPS);
        assert_abs_diff_eq!(net.source_current(p1).unwrap(), k * i, epsilon = EPS);
    }

    #[test]
    fn test_current_source_division() {
        let (i, r1, r2) = (2.0, 3.0, 6.0);
        let mut net = Network::new();
        let ret = net.add_node(Node::voltage_source(0.0)).unwrap();
        let inject = net.add_node(Node::current_source(i)).unwrap();
        let w1 = net.add_wire(Wire::new(inject, ret, r1)).unwrap();
        let w2 = net.add_wire(Wire::new(inject, ret, r2)).unwrap();
        net.calculate();

        assert_abs_diff_eq!(net.voltage(inject).unwrap(), i * r1 * r2 / (r1 + r2), epsilon = EPS);
        assert_abs_diff_eq!(net.wire_current(w1).unwrap(), i * r2 / (r1 + r2), epsilon = EPS);
        assert_abs_diff_eq!(net.wire_current(w2).unwrap(), i * r1 / (r1 + r2), epsilon = EPS);
        assert_abs_diff_eq!(net.source_current(ret).unwrap(), -i, epsilon = EPS);

        net.set_current(inject, 4.0).unwrap();
        assert!(!net.calculate().rebuilt);
        assert_abs_diff_eq!(net.voltage(inject).unwrap(), 4.0 * 2.0, epsilon = EPS);
    }

    #[test]
    fn test_merge_keeps_each_result() {
        let mut a = divider(5.0, 10.0, 20.0);
        let mut b = divider(3.0, 1.0, 2.0);
        a.net.calculate();
        b.net.calculate();
        let a_mid = a.net.voltage(a.mid).unwrap();
        let b_mid = b.net.voltage(b.mid).unwrap();
        let b_current = b.net.source_current(b.source).unwrap();

        a.net.merge(&mut b.net).unwrap();
        assert_eq!(b.net.node_count(), 0);
        assert_eq!(b.net.wire_count(), 0);
        assert_eq!(a.net.node_count(), 4);
        assert_eq!(a.net.wire_count(), 4);
        assert!(a.net.is_dirty());

        assert!(a.net.calculate().rebuilt);
        assert_abs_diff_eq!(a.net.voltage(a.mid).unwrap(), a_mid, epsilon = EPS);
        assert_abs_diff_eq!(a.net.voltage(b.mid).unwrap(), b_mid, epsilon = EPS);
        assert_abs_diff_eq!(a.net.source_current(b.source).unwrap(), b_current, epsilon = EPS);
        assert!(a.net.wire(b.upper).is_some());
    }

    #[test]
    fn test_merge_carries_coupling() {
        let (v, k, r) = (10.0, 2.0, 8.0);
        let mut a = divider(5.0, 10.0, 20.0);
        let mut b = Network::new();
        let primary = b.add_node(Node::voltage_source(v)).unwrap();
        let secondary = b.add_node(Node::floating()).unwrap();
        let coupling = b
            .add_node(Node::coupling(Coupling::one_to_one(primary, secondary, k)))
            .unwrap();
        b.add_wire(Wire::to_ground(secondary, r)).unwrap();
        a.net.calculate();
        b.calculate();
        let secondary_voltage = b.voltage(secondary).unwrap();
        assert_abs_diff_eq!(secondary_voltage, v * k, epsilon = EPS);

        a.net.merge(&mut b).unwrap();
        assert_eq!(a.net.node_count(), 5);
        assert!(a.net.contains_node(coupling));

        let report = a.net.calculate();
        assert!(report.rebuilt);
        assert!(report.converged);
        assert_abs_diff_eq!(a.net.voltage(secondary).unwrap(), secondary_voltage, epsilon = EPS);
        assert_abs_diff_eq!(a.net.source_current(primary).unwrap(), v * k * k / r, epsilon = EPS);
        assert_abs_diff_eq!(a.net.voltage(a.mid).unwrap(), 5.0 * 20.0 / 30.0, epsilon = EPS);
    }

    #[test]
    fn test_no_voltage_source_reports_zero() {
        let mut net = Network::new();
        let inject = net.add_node(Node::current_source(1.0)).unwrap();
        let other = net.add_node(Node::floating()).unwrap();
        net.add_wire(Wire::new(inject, other, 1.0)).unwrap();
        net.add_wire(Wire::to_ground(other, 1.0)).unwrap();

        let report = net.calculate();
        assert_eq!(report.iterations, 0);
        assert_eq!(net.voltage(inject), Some(0.0));
        assert_eq!(net.voltage(other), Some(0.0));
    }

    #[test]
    fn test_remove_node_keeps_indices_dense() {
        let mut d = divider(5.0, 10.0, 20.0);
        let tail = d.net.add_node(Node::floating()).unwrap();
        d.net.add_wire(Wire::to_ground(tail, 1.0)).unwrap();
        d.net.calculate();

        let removed = d.net.remove_node(d.mid).unwrap();
        assert_eq!(removed.id(), d.mid);
        assert_eq!(d.net.node_count(), 2);
        assert_eq!(d.net.wire_count(), 1);
        assert_eq!(d.net.node(tail).unwrap().index(), 1);
        assert!(d.net.is_dirty());
        for (i, node) in d.net.nodes().enumerate() {
            assert_eq!(node.index(), i);
        }

        assert!(matches!(
            d.net.remove_node(d.mid),
            Err(WirenetError::NodeNotFound { .. })
        ));
        d.net.calculate();
        assert_abs_diff_eq!(d.net.source_current(d.source).unwrap(), 0.0, epsilon = EPS);
    }

    #[test]
    fn test_removing_terminal_drops_coupling() {
        let mut net = Network::new();
        let primary = net.add_node(Node::voltage_source(1.0)).unwrap();
        let secondary = net.add_node(Node::floating()).unwrap();
        let coupling = net
            .add_node(Node::coupling(Coupling::one_to_one(primary, secondary, 1.0)))
            .unwrap();
        net.remove_node(secondary).unwrap();
        assert!(!net.contains_node(coupling));
        assert_eq!(net.node_count(), 1);
    }

    #[test]
    fn test_invalid_topology_is_rejected() {
        let mut net = Network::new();
        let a = net.add_node(Node::floating()).unwrap();
        let stranger = Node::floating();

        assert!(matches!(
            net.add_wire(Wire::new(a, stranger.id(), 1.0)),
            Err(WirenetError::NodeNotFound { .. })
        ));
        assert!(matches!(
            net.add_wire(Wire::between(None, None, 1.0)),
            Err(WirenetError::InvalidTopology { .. })
        ));
        assert!(matches!(
            net.add_wire(Wire::new(a, a, 1.0)),
            Err(WirenetError::InvalidTopology { .. })
        ));
        assert!(matches!(
            net.add_wire(Wire::to_ground(a, 0.0)),
            Err(WirenetError::InvalidParameter { .. })
        ));
        assert!(matches!(
            net.remove_wire(Wire::to_ground(a, 1.0).id()),
            Err(WirenetError::WireNotFound { .. })
        ));
        assert!(matches!(
            net.set_voltage(a, 1.0),
            Err(WirenetError::WrongNodeKind { .. })
        ));
    }

    #[test]
    fn test_coupling_rejects_current_source_terminal() {
        let mut net = Network::new();
        let source = net.add_node(Node::current_source(1.0)).unwrap();
        let other = net.add_node(Node::floating()).unwrap();
        let result = net.add_node(Node::coupling(Coupling::one_to_one(source, other, 1.0)));
        assert!(matches!(
            result,
            Err(WirenetError::UnsupportedConfiguration { .. })
        ));
    }

    #[test]
    fn test_coupling_cannot_terminate_wire() {
        let mut net = Network::new();
        let p = net.add_node(Node::voltage_source(1.0)).unwrap();
        let s = net.add_node(Node::floating()).unwrap();
        let c = net
            .add_node(Node::coupling(Coupling::one_to_one(p, s, 1.0)))
            .unwrap();
        assert!(matches!(
            net.add_wire(Wire::to_ground(c, 1.0)),
            Err(WirenetError::InvalidTopology { .. })
        ));
    }

    #[test]
    fn test_degenerate_solve_fails_soft() {
        let mut d = divider(5.0, 10.0, 20.0);
        d.net.calculate();
        d.net.mna.b[1] = f64::NAN;

        let report = d.net.calculate();
        assert!(report.retried);
        assert!(report.direct);
        assert_eq!(report.zeroed_nodes, 2);
        assert!(!report.converged);
        assert_eq!(d.net.voltage(d.mid), Some(0.0));
        assert_eq!(d.net.source_current(d.source), Some(0.0));
    }
}
