//! Stabilized biconjugate-gradient (BiCGSTAB) solver.
//!
//! The solver keeps its iteration buffers between calls and warm-starts
//! from the previous solution, so the typical tick-to-tick case (same `A`,
//! slightly different `b`) converges in very few iterations.
//!
//! The iteration runs on `A·D⁻¹`, where `D` is the diagonal of `A` (zero
//! entries read as 1). Voltage-source columns carry `-1` on the diagonal, so
//! the scaling turns the indefinite MNA matrix of a resistive network into
//! one with a positive spectrum. The residual is still the true `b - A·x`.

use log::debug;

use super::mna::DenseMatrix;
use super::{CONVERGENCE_TOLERANCE, MAX_ITERATIONS};

/// Denominators below this are treated as a breakdown of the recurrence.
const BREAKDOWN_EPSILON: f64 = 1e-300;

/// `(r̂, v)` or `(r̂, r)` at or below this fraction of the norms involved
/// counts as a breakdown of the recurrence.
const BREAKDOWN_RATIO: f64 = 1e-12;

/// Configuration for the iterative linear solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverConfig {
    /// Convergence tolerance on the residual norm, relative to `||b||`.
    pub tolerance: f64,
    /// Maximum BiCGSTAB iterations per solve.
    pub max_iterations: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tolerance: CONVERGENCE_TOLERANCE,
            max_iterations: MAX_ITERATIONS,
        }
    }
}

impl SolverConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the relative residual tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the iteration cap.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Outcome of a single [`BiCgStab::solve`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveOutcome {
    /// Iterations performed (0 when the warm start already satisfied the tolerance).
    pub iterations: usize,
    /// Whether the residual dropped below the tolerance.
    pub converged: bool,
}

/// Reusable BiCGSTAB state for an `n`-unknown system.
#[derive(Debug, Clone)]
pub struct BiCgStab {
    config: SolverConfig,
    size: usize,
    x: Vec<f64>,
    r: Vec<f64>,
    r_hat: Vec<f64>,
    p: Vec<f64>,
    v: Vec<f64>,
    s: Vec<f64>,
    t: Vec<f64>,
    diag_inv: Vec<f64>,
    p_hat: Vec<f64>,
    s_hat: Vec<f64>,
}

impl Default for BiCgStab {
    fn default() -> Self {
        Self::new(SolverConfig::default())
    }
}

impl BiCgStab {
    /// Create a solver with no allocated state.
    pub fn new(config: SolverConfig) -> Self {
        Self {
            config,
            size: 0,
            x: Vec::new(),
            r: Vec::new(),
            r_hat: Vec::new(),
            p: Vec::new(),
            v: Vec::new(),
            s: Vec::new(),
            t: Vec::new(),
            diag_inv: Vec::new(),
            p_hat: Vec::new(),
            s_hat: Vec::new(),
        }
    }

    /// Solver configuration.
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Number of unknowns the buffers are sized for.
    pub fn state_size(&self) -> usize {
        self.size
    }

    /// Allocate iteration buffers for an `n`-unknown system.
    ///
    /// Resets the iterate; buffers are only reallocated when `n` changes.
    pub fn set_state_size(&mut self, n: usize) {
        if self.size != n {
            self.size = n;
            for buf in self.buffers_mut() {
                buf.clear();
                buf.resize(n, 0.0);
            }
        } else {
            self.zero();
        }
    }

    /// Reset the iterate and all work vectors to zero.
    pub fn zero(&mut self) {
        for buf in self.buffers_mut() {
            buf.fill(0.0);
        }
    }

    /// Last computed solution.
    pub fn solution(&self) -> &[f64] {
        &self.x
    }

    /// Mutable access to the iterate, used to seed the next warm start
    /// with a solution computed elsewhere.
    pub fn solution_mut(&mut self) -> &mut [f64] {
        &mut self.x
    }

    fn buffers_mut(&mut self) -> [&mut Vec<f64>; 10] {
        [
            &mut self.x,
            &mut self.r,
            &mut self.r_hat,
            &mut self.p,
            &mut self.v,
            &mut self.s,
            &mut self.t,
            &mut self.diag_inv,
            &mut self.p_hat,
            &mut self.s_hat,
        ]
    }

    /// Solve `A·x = b`, starting from the previous solution.
    ///
    /// The result is left in [`solution`](Self::solution). A breakdown that
    /// survives one restart of the shadow residual, stagnation or a singular
    /// system is reported through `converged: false`, never as an error.
    pub fn solve(&mut self, a: &DenseMatrix, b: &[f64]) -> SolveOutcome {
        let n = self.size;
        debug_assert_eq!(a.size(), n, "matrix dimension mismatch");
        debug_assert_eq!(b.len(), n, "RHS dimension mismatch");

        let b_norm = norm(b);
        if b_norm == 0.0 {
            self.x.fill(0.0);
            return SolveOutcome {
                iterations: 0,
                converged: true,
            };
        }
        let threshold = self.config.tolerance * b_norm;

        // r = b - A·x
        a.mul_vec(&self.x, &mut self.r);
        for (ri, &bi) in self.r.iter_mut().zip(b) {
            *ri = bi - *ri;
        }
        if norm(&self.r) <= threshold {
            return SolveOutcome {
                iterations: 0,
                converged: true,
            };
        }

        for i in 0..n {
            let d = a.get(i, i);
            self.diag_inv[i] = if d != 0.0 && d.is_finite() { 1.0 / d } else { 1.0 };
        }

        self.restart();
        let mut fresh = true;
        let mut rho = 1.0;
        let mut alpha = 1.0;
        let mut omega = 1.0;

        for iteration in 1..=self.config.max_iterations {
            let mut rho_next = dot(&self.r_hat, &self.r);
            if is_breakdown(rho_next, &self.r_hat, &self.r) {
                if fresh {
                    return self.broke_down(iteration);
                }
                // Shadow residual became orthogonal; restart from the current residual.
                self.restart();
                fresh = true;
                rho = 1.0;
                alpha = 1.0;
                omega = 1.0;
                rho_next = dot(&self.r, &self.r);
            }

            let beta = (rho_next / rho) * (alpha / omega);
            for i in 0..n {
                self.p[i] = self.r[i] + beta * (self.p[i] - omega * self.v[i]);
                self.p_hat[i] = self.diag_inv[i] * self.p[i];
            }

            a.mul_vec(&self.p_hat, &mut self.v);
            let r_hat_v = dot(&self.r_hat, &self.v);
            if is_breakdown(r_hat_v, &self.r_hat, &self.v) {
                if fresh {
                    return self.broke_down(iteration);
                }
                self.restart();
                fresh = true;
                rho = 1.0;
                alpha = 1.0;
                omega = 1.0;
                continue;
            }
            alpha = rho_next / r_hat_v;

            for i in 0..n {
                self.s[i] = self.r[i] - alpha * self.v[i];
            }
            if norm(&self.s) <= threshold {
                for i in 0..n {
                    self.x[i] += alpha * self.p_hat[i];
                }
                return SolveOutcome {
                    iterations: iteration,
                    converged: true,
                };
            }

            for i in 0..n {
                self.s_hat[i] = self.diag_inv[i] * self.s[i];
            }
            a.mul_vec(&self.s_hat, &mut self.t);
            let tt = dot(&self.t, &self.t);
            omega = if tt.abs() < BREAKDOWN_EPSILON {
                0.0
            } else {
                dot(&self.t, &self.s) / tt
            };

            for i in 0..n {
                self.x[i] += alpha * self.p_hat[i] + omega * self.s_hat[i];
                self.r[i] = self.s[i] - omega * self.t[i];
            }

            let residual = norm(&self.r);
            if residual <= threshold {
                return SolveOutcome {
                    iterations: iteration,
                    converged: true,
                };
            }
            if !residual.is_finite() || omega == 0.0 {
                return self.broke_down(iteration);
            }

            fresh = false;
            rho = rho_next;
        }

        debug!(
            "BiCGSTAB did not converge after {} iterations (residual {:.2e})",
            self.config.max_iterations,
            norm(&self.r) / b_norm
        );
        SolveOutcome {
            iterations: self.config.max_iterations,
            converged: false,
        }
    }

    /// Point the shadow residual at the current residual and clear the
    /// search directions.
    fn restart(&mut self) {
        self.r_hat.copy_from_slice(&self.r);
        self.p.fill(0.0);
        self.v.fill(0.0);
    }

    fn broke_down(&self, iteration: usize) -> SolveOutcome {
        debug!("BiCGSTAB broke down after {} iterations", iteration);
        SolveOutcome {
            iterations: iteration,
            converged: false,
        }
    }
}

fn is_breakdown(value: f64, a: &[f64], b: &[f64]) -> bool {
    !value.is_finite() || value.abs() <= BREAKDOWN_RATIO * norm(a) * norm(b)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}
