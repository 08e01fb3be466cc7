//! Linear-algebra engine for network solving.
//!
//! ## Modified Nodal Analysis
//!
//! Every registered node owns one row/column of a square system `A·x = b`:
//!
//! ```text
//! floating / current source : KCL row, unknown is the node voltage
//! voltage source            : KCL row, column replaced by -1, unknown is the
//!                             current the source pushes into the network
//! coupling                  : transformer constraint row, unknown is the
//!                             secondary winding current
//! ```
//!
//! Ground is implicit (0V) and has no row. The system is solved with
//! Jacobi-scaled BiCGSTAB, warm-started from the previous tick. Systems the
//! iteration cannot handle (zero-diagonal coupling rows, breakdowns) go
//! through [`LuFactors`] instead.

mod bicgstab;
mod mna;

pub use bicgstab::{BiCgStab, SolveOutcome, SolverConfig};
pub use mna::{DenseMatrix, LuFactors, MnaSystem};

/// Relative residual tolerance for BiCGSTAB.
///
/// Node values must agree to 1e-6 between incremental and fresh solves; a
/// residual bound of the same size relative to `||b||` leaves errors of
/// `cond(A)·1e-6`, so the bound sits well below it.
pub const CONVERGENCE_TOLERANCE: f64 = 1e-10;

/// Maximum BiCGSTAB iterations per solve.
pub const MAX_ITERATIONS: usize = 1000;
