//! MNA buffer ownership, stamping and the dense LU fallback.

use log::{debug, trace};

/// Pivots at or below this fraction of the largest entry count as zero.
const PIVOT_EPSILON: f64 = 1e-13;

/// Square dense matrix stored row-major.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DenseMatrix {
    data: Vec<f64>,
    size: usize,
}

impl DenseMatrix {
    /// Create a zeroed `size × size` matrix.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0.0; size * size],
            size,
        }
    }

    /// Matrix dimension.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Resize and zero the matrix. Reallocates only when the dimension changes.
    pub fn resize(&mut self, size: usize) {
        if self.size != size {
            self.size = size;
            self.data.clear();
            self.data.resize(size * size, 0.0);
        } else {
            self.data.fill(0.0);
        }
    }

    /// Get matrix element at (row, col).
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.size + col]
    }

    /// Set matrix element at (row, col).
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.size + col] = value;
    }

    /// Add to matrix element at (row, col).
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.size + col] += value;
    }

    /// Overwrite this matrix with the contents of `other` (same dimension).
    pub fn copy_from(&mut self, other: &DenseMatrix) {
        debug_assert_eq!(self.size, other.size);
        self.data.copy_from_slice(&other.data);
    }

    /// `out = self · x`
    pub fn mul_vec(&self, x: &[f64], out: &mut [f64]) {
        for (row, o) in out.iter_mut().enumerate() {
            let start = row * self.size;
            *o = self.data[start..start + self.size]
                .iter()
                .zip(x)
                .map(|(a, b)| a * b)
                .sum();
        }
    }

    /// Row `row` as a slice.
    pub fn row(&self, row: usize) -> &[f64] {
        let start = row * self.size;
        &self.data[start..start + self.size]
    }

    fn swap_rows(&mut self, r1: usize, r2: usize) {
        let n = self.size;
        for j in 0..n {
            self.data.swap(r1 * n + j, r2 * n + j);
        }
    }
}

/// LU decomposition with partial pivoting, `P·A = L·U`.
///
/// `L` (unit diagonal) and `U` share one matrix. A column without a usable
/// pivot is a free unknown: elimination moves on to the next column without
/// consuming a row, and the solve pins that unknown to zero. An isolated
/// node therefore does not poison the rest of the system.
#[derive(Debug, Clone, Default)]
pub struct LuFactors {
    lu: DenseMatrix,
    pivots: Vec<usize>,
    /// Elimination steps as (pivot row, pivot column), in order.
    steps: Vec<(usize, usize)>,
}

impl LuFactors {
    /// Factor `a`.
    pub fn factor(a: &DenseMatrix) -> Self {
        let n = a.size();
        let mut lu = a.clone();
        let mut pivots: Vec<usize> = (0..n).collect();
        let mut steps = Vec::with_capacity(n);

        let scale = lu.data.iter().filter(|v| v.is_finite()).fold(0.0_f64, |m, v| m.max(v.abs()));
        let threshold = PIVOT_EPSILON * scale;

        let mut row = 0;
        for k in 0..n {
            if row == n {
                break;
            }

            // Find pivot
            let mut max_val = lu.get(row, k).abs();
            let mut max_row = row;
            for i in (row + 1)..n {
                let val = lu.get(i, k).abs();
                if val > max_val {
                    max_val = val;
                    max_row = i;
                }
            }
            if max_val <= threshold {
                continue;
            }

            if max_row != row {
                pivots.swap(row, max_row);
                lu.swap_rows(row, max_row);
            }

            // Eliminate
            let pivot = lu.get(row, k);
            for i in (row + 1)..n {
                let factor = lu.get(i, k) / pivot;
                lu.set(i, k, factor);
                for j in (k + 1)..n {
                    let updated = lu.get(i, j) - factor * lu.get(row, j);
                    lu.set(i, j, updated);
                }
            }
            steps.push((row, k));
            row += 1;
        }

        if steps.len() < n {
            debug!("LU factorization found {} free unknown(s)", n - steps.len());
        }

        Self { lu, pivots, steps }
    }

    /// Dimension of the factored system.
    pub fn size(&self) -> usize {
        self.lu.size()
    }

    /// Number of unknowns with no pivot.
    pub fn free_unknowns(&self) -> usize {
        self.size() - self.steps.len()
    }

    /// Solve `A·x = b` using the factors.
    pub fn solve(&self, b: &[f64], x: &mut [f64]) {
        let n = self.size();
        debug_assert_eq!(b.len(), n, "RHS dimension mismatch");

        // Apply pivot permutation to b
        let mut y: Vec<f64> = self.pivots.iter().map(|&p| b[p]).collect();

        // Forward substitution (L * y = Pb)
        for &(row, col) in &self.steps {
            let yr = y[row];
            for i in (row + 1)..n {
                y[i] -= self.lu.get(i, col) * yr;
            }
        }

        // Back substitution (U * x = y)
        x.fill(0.0);
        for &(row, col) in self.steps.iter().rev() {
            let mut sum = y[row];
            for j in (col + 1)..n {
                sum -= self.lu.get(row, j) * x[j];
            }
            x[col] = sum / self.lu.get(row, col);
        }
    }
}

/// The MNA system of one network.
///
/// `g` is the raw conductance matrix (wires plus coupling stamps). `a` is
/// `g` with every voltage-source column replaced by the `-1` identity
/// constraint, so the unknown in that slot becomes the source's current.
/// The fixed source voltages are folded into `b` instead.
#[derive(Debug, Clone, Default)]
pub struct MnaSystem {
    /// Conductance matrix G
    pub g: DenseMatrix,
    /// System matrix A
    pub a: DenseMatrix,
    /// Right-hand side (current injections and folded source voltages)
    pub b: Vec<f64>,
    /// Per-index voltage-source mask
    pub is_voltage_source: Vec<bool>,
    /// Setpoint folded into `b` for each masked column
    pub source_voltage: Vec<f64>,
    revision: u64,
}

impl MnaSystem {
    /// Create an empty system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current dimension.
    pub fn size(&self) -> usize {
        self.b.len()
    }

    /// Counter bumped on every change to A. Cached factors of A are valid
    /// while it stays the same.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Zero everything and size it for `n` unknowns, keeping allocations
    /// when the dimension is unchanged.
    pub fn reset(&mut self, n: usize) {
        self.g.resize(n);
        self.a.resize(n);
        self.b.clear();
        self.b.resize(n, 0.0);
        self.is_voltage_source.clear();
        self.is_voltage_source.resize(n, false);
        self.source_voltage.clear();
        self.source_voltage.resize(n, 0.0);
        self.revision += 1;
    }

    /// Add `delta` to cell (row, col) of G and carry it into A or b.
    ///
    /// A masked column is held at the identity constraint, so its change is
    /// folded into `b[row]` using that source's setpoint.
    pub fn stamp(&mut self, row: usize, col: usize, delta: f64) {
        self.g.add(row, col, delta);
        if self.is_voltage_source[col] {
            self.b[row] -= self.source_voltage[col] * delta;
        } else {
            self.a.add(row, col, delta);
            self.revision += 1;
        }
    }

    /// Stamp a conductance between two (optionally grounded) indices.
    ///   G[n1,n1] += g
    ///   G[n2,n2] += g
    ///   G[n1,n2] -= g
    ///   G[n2,n1] -= g
    pub fn stamp_conductance(&mut self, n1: Option<usize>, n2: Option<usize>, g: f64) {
        if let Some(i) = n1 {
            self.stamp(i, i, g);
        }
        if let Some(j) = n2 {
            self.stamp(j, j, g);
        }
        if let (Some(i), Some(j)) = (n1, n2) {
            self.stamp(i, j, -g);
            self.stamp(j, i, -g);
        }
    }

    /// Add an injected current into row `row`.
    pub fn inject_current(&mut self, row: usize, delta: f64) {
        self.b[row] += delta;
    }

    /// Turn column `col` into a voltage-source constraint with setpoint `voltage`.
    ///
    /// Used once per source during a full rebuild, after every conductance
    /// has been stamped.
    pub fn constrain_voltage_source(&mut self, col: usize, voltage: f64) {
        for i in 0..self.size() {
            self.b[i] -= voltage * self.g.get(i, col);
            self.a.set(i, col, 0.0);
        }
        self.a.set(col, col, -1.0);
        self.is_voltage_source[col] = true;
        self.source_voltage[col] = voltage;
        self.revision += 1;
    }

    /// Move a constrained column to a new setpoint without touching A.
    pub fn shift_source_voltage(&mut self, col: usize, voltage: f64) {
        debug_assert!(self.is_voltage_source[col]);
        let dv = voltage - self.source_voltage[col];
        for i in 0..self.size() {
            self.b[i] -= dv * self.g.get(i, col);
        }
        self.source_voltage[col] = voltage;
    }

    /// Dump A and b at trace level.
    pub fn log_system(&self) {
        for i in 0..self.size() {
            trace!("A[{}] = {:?} | b = {:.6e}", i, self.a.row(i), self.b[i]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rebuilt_divider(v: f64) -> MnaSystem {
        let mut mna = MnaSystem::new();
        mna.reset(2);
        mna.stamp_conductance(Some(0), Some(1), 0.1);
        mna.stamp_conductance(Some(1), None, 0.05);
        mna.constrain_voltage_source(0, v);
        mna
    }

    #[test]
    fn test_stamp_conductance_pattern() {
        let mut mna = MnaSystem::new();
        mna.reset(2);
        mna.stamp_conductance(Some(0), Some(1), 0.5);
        assert_eq!(mna.g.get(0, 0), 0.5);
        assert_eq!(mna.g.get(1, 1), 0.5);
        assert_eq!(mna.g.get(0, 1), -0.5);
        assert_eq!(mna.g.get(1, 0), -0.5);
        assert_eq!(mna.a, mna.g);

        mna.stamp_conductance(None, Some(1), 0.25);
        assert_eq!(mna.g.get(1, 1), 0.75);
        assert_eq!(mna.g.get(0, 0), 0.5);
    }

    #[test]
    fn test_voltage_source_constraint() {
        let mna = rebuilt_divider(5.0);
        assert_eq!(mna.a.get(0, 0), -1.0);
        assert_eq!(mna.a.get(1, 0), 0.0);
        assert_eq!(mna.a.get(0, 1), -0.1);
        assert!((mna.b[0] + 0.5).abs() < 1e-12);
        assert!((mna.b[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_incremental_stamp_matches_rebuild() {
        let mut incremental = rebuilt_divider(5.0);
        incremental.stamp_conductance(Some(0), Some(1), 0.2);

        let mut rebuilt = MnaSystem::new();
        rebuilt.reset(2);
        rebuilt.stamp_conductance(Some(0), Some(1), 0.3);
        rebuilt.stamp_conductance(Some(1), None, 0.05);
        rebuilt.constrain_voltage_source(0, 5.0);

        for i in 0..2 {
            assert!((incremental.b[i] - rebuilt.b[i]).abs() < 1e-12);
            for j in 0..2 {
                assert!((incremental.a.get(i, j) - rebuilt.a.get(i, j)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_revision_tracks_changes_to_a() {
        let mut mna = rebuilt_divider(5.0);
        let before = mna.revision();
        mna.shift_source_voltage(0, 12.0);
        mna.inject_current(1, 0.5);
        mna.stamp(1, 0, 0.1);
        assert_eq!(mna.revision(), before);

        mna.stamp_conductance(Some(1), None, 0.05);
        assert!(mna.revision() > before);
    }

    #[test]
    fn test_lu_solves_zero_diagonal_rows() {
        // Ideal-coupling shape: the constraint row has no diagonal entry.
        let mut a = DenseMatrix::new(3);
        a.set(0, 0, 0.5);
        a.set(0, 2, -1.0);
        a.set(1, 1, 0.25);
        a.set(1, 2, 1.0);
        a.set(2, 0, 1.0);
        a.set(2, 1, -1.0);
        let b = [0.0, 0.0, 12.0];

        let lu = LuFactors::factor(&a);
        let mut x = [0.0; 3];
        lu.solve(&b, &mut x);

        let mut check = [0.0; 3];
        a.mul_vec(&x, &mut check);
        for i in 0..3 {
            assert!((check[i] - b[i]).abs() < 1e-12, "row {i}: {:?}", check);
        }
        assert!((x[0] - x[1] - 12.0).abs() < 1e-12);
    }

    #[test]
    fn test_lu_pins_isolated_unknown_to_zero() {
        let mut a = DenseMatrix::new(3);
        a.set(0, 0, 2.0);
        a.set(0, 1, -1.0);
        a.set(1, 0, -1.0);
        a.set(1, 1, 2.0);
        let b = [1.0, 1.0, 0.0];

        let lu = LuFactors::factor(&a);
        let mut x = [f64::NAN; 3];
        lu.solve(&b, &mut x);
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 1.0).abs() < 1e-12);
        assert_eq!(x[2], 0.0);
        assert_eq!(lu.free_unknowns(), 1);
    }

    #[test]
    fn test_lu_keeps_equations_after_free_column() {
        // Floating pair tied to a driven node: the reference column is free
        // but the rows below it still carry independent equations.
        let mut a = DenseMatrix::new(3);
        a.set(0, 1, 1.0);
        a.set(1, 1, 1.0);
        a.set(1, 2, -1.0);
        a.set(2, 2, 1.0);
        let b = [3.0, 1.0, 2.0];

        let lu = LuFactors::factor(&a);
        let mut x = [0.0; 3];
        lu.solve(&b, &mut x);
        assert_eq!(x[0], 0.0);
        assert!((x[1] - 3.0).abs() < 1e-12);
        assert!((x[2] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_shift_source_voltage() {
        let mut shifted = rebuilt_divider(5.0);
        shifted.shift_source_voltage(0, 12.0);
        let rebuilt = rebuilt_divider(12.0);
        for i in 0..2 {
            assert!((shifted.b[i] - rebuilt.b[i]).abs() < 1e-12);
        }
    }
}
