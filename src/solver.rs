//! Sparse solve of the boundary-edited Poisson system.
//!
//! Identity rows fix their unknown to the right-hand side, so they are
//! eliminated up front and their values moved to the right-hand side of the
//! remaining rows. What is left is a principal submatrix of the Laplacian:
//! symmetric positive definite, which makes preconditioned conjugate gradient
//! applicable even though the edited operator itself is not symmetric.

use tracing::debug;

use crate::error::{Error, Result};
use crate::laplacian::BoundedOperator;
use crate::sparse::CsrMatrix;

/// Marks an eliminated (identity) row in the global-to-reduced index map.
const FIXED: usize = usize::MAX;

/// Lower bound on the default iteration cap for tiny systems.
const MIN_ITERATIONS: usize = 100;

/// Options for the conjugate gradient solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    /// Stop once `||r|| <= tolerance * ||b||` on the reduced system.
    pub tolerance: f64,
    /// Iteration cap. `None` uses `max(2 * unknowns, 100)`.
    pub max_iterations: Option<usize>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: None,
        }
    }
}

/// Result of a single solve.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Solution over every grid pixel, indexed by `x + y * width`.
    pub values: Vec<f64>,
    /// Conjugate gradient iterations performed.
    pub iterations: usize,
    /// Final relative residual of the reduced system.
    pub residual: f64,
}

/// A bounded operator prepared for repeated solves with different right-hand sides.
#[derive(Debug, Clone)]
pub struct PoissonSystem {
    size: usize,
    /// Global index of each unknown.
    free: Vec<usize>,
    /// Operator restricted to unknown rows and columns.
    reduced: CsrMatrix,
    /// Unknown rows against fixed columns, in global column indices.
    coupling: CsrMatrix,
    inv_diag: Vec<f64>,
}

impl PoissonSystem {
    /// Eliminate the identity rows of `operator` and assemble the reduced system.
    #[must_use]
    pub fn new(operator: &BoundedOperator) -> Self {
        let matrix = operator.matrix();
        let size = matrix.rows();

        let mut map = vec![FIXED; size];
        let mut free = Vec::new();
        for (k, &fixed) in operator.identity_rows().iter().enumerate() {
            if !fixed {
                map[k] = free.len();
                free.push(k);
            }
        }

        let mut r_ptr = vec![0];
        let mut r_idx = Vec::new();
        let mut r_val = Vec::new();
        let mut c_ptr = vec![0];
        let mut c_idx = Vec::new();
        let mut c_val = Vec::new();
        for &k in &free {
            for (col, v) in matrix.row(k) {
                if map[col] == FIXED {
                    c_idx.push(col);
                    c_val.push(v);
                } else {
                    r_idx.push(map[col]);
                    r_val.push(v);
                }
            }
            r_ptr.push(r_idx.len());
            c_ptr.push(c_idx.len());
        }

        let unknowns = free.len();
        let reduced = CsrMatrix::from_parts(unknowns, unknowns, r_ptr, r_idx, r_val);
        let coupling = CsrMatrix::from_parts(unknowns, size, c_ptr, c_idx, c_val);
        let inv_diag = reduced
            .diagonal()
            .into_iter()
            .map(|d| if d == 0.0 { 1.0 } else { 1.0 / d })
            .collect();

        debug!(size, unknowns, nnz = reduced.nnz(), "assembled reduced system");
        Self {
            size,
            free,
            reduced,
            coupling,
            inv_diag,
        }
    }

    /// Total number of grid pixels.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of unknowns left after eliminating identity rows.
    #[must_use]
    pub fn unknowns(&self) -> usize {
        self.free.len()
    }

    /// Solve `A x = b` for the full grid.
    ///
    /// `guess`, when given, seeds the unknowns; it only affects the number
    /// of iterations, not the solution.
    ///
    /// Errors carry channel 0; callers solving several channels relabel them.
    ///
    /// # Errors
    ///
    /// - [`Error::SingularSystem`] if a search direction has non-positive curvature.
    /// - [`Error::NotConverged`] if the iteration cap is reached.
    /// - [`Error::NonFinite`] if the solution holds NaN or infinite values.
    ///
    /// # Panics
    ///
    /// Panics if `b` (or `guess`) does not have one entry per grid pixel.
    pub fn solve(&self, b: &[f64], guess: Option<&[f64]>, opts: &SolverOptions) -> Result<Solution> {
        assert_eq!(b.len(), self.size, "right-hand side length must match grid");
        let mut values = b.to_vec();
        let n = self.free.len();
        if n == 0 {
            return finite(Solution {
                values,
                iterations: 0,
                residual: 0.0,
            });
        }

        let moved = self.coupling.mul_vec(b);
        let rhs: Vec<f64> = self
            .free
            .iter()
            .zip(&moved)
            .map(|(&k, m)| b[k] - m)
            .collect();
        let mut x: Vec<f64> = match guess {
            Some(g) => {
                assert_eq!(g.len(), self.size, "guess length must match grid");
                self.free.iter().map(|&k| g[k]).collect()
            }
            None => vec![0.0; n],
        };

        let (iterations, residual) = self.conjugate_gradient(&rhs, &mut x, opts)?;
        for (&k, v) in self.free.iter().zip(x) {
            values[k] = v;
        }
        debug!(unknowns = n, iterations, residual, "solved");
        finite(Solution {
            values,
            iterations,
            residual,
        })
    }

    /// Jacobi-preconditioned conjugate gradient on the reduced system.
    fn conjugate_gradient(
        &self,
        rhs: &[f64],
        x: &mut [f64],
        opts: &SolverOptions,
    ) -> Result<(usize, f64)> {
        let n = rhs.len();
        let b_norm = norm(rhs);
        if b_norm == 0.0 {
            x.fill(0.0);
            return Ok((0, 0.0));
        }
        let threshold = opts.tolerance * b_norm;
        let max_iterations = opts
            .max_iterations
            .unwrap_or_else(|| (2 * n).max(MIN_ITERATIONS));

        let mut ap = self.reduced.mul_vec(x);
        let mut r: Vec<f64> = rhs.iter().zip(&ap).map(|(b, a)| b - a).collect();
        let mut r_norm = norm(&r);
        if r_norm <= threshold {
            return Ok((0, r_norm / b_norm));
        }
        let mut z: Vec<f64> = r.iter().zip(&self.inv_diag).map(|(r, d)| r * d).collect();
        let mut p = z.clone();
        let mut rz = dot(&r, &z);

        for iter in 0..max_iterations {
            self.reduced.mul_vec_into(&p, &mut ap);
            let curvature = dot(&p, &ap);
            if curvature.is_nan() || curvature <= 0.0 {
                return Err(Error::SingularSystem {
                    channel: 0,
                    iterations: iter,
                });
            }
            let alpha = rz / curvature;
            for ((xi, ri), (pi, api)) in x.iter_mut().zip(r.iter_mut()).zip(p.iter().zip(&ap)) {
                *xi += alpha * pi;
                *ri -= alpha * api;
            }
            r_norm = norm(&r);
            if r_norm <= threshold {
                return Ok((iter + 1, r_norm / b_norm));
            }
            for ((zi, ri), d) in z.iter_mut().zip(&r).zip(&self.inv_diag) {
                *zi = ri * d;
            }
            let rz_next = dot(&r, &z);
            let beta = rz_next / rz;
            rz = rz_next;
            for (pi, zi) in p.iter_mut().zip(&z) {
                *pi = zi + beta * *pi;
            }
        }

        Err(Error::NotConverged {
            channel: 0,
            iterations: max_iterations,
            residual: r_norm / b_norm,
        })
    }
}

fn finite(solution: Solution) -> Result<Solution> {
    match solution.values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(Error::NonFinite { channel: 0, index }),
        None => Ok(solution),
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::laplacian::{build_laplacian, BorderPolicy, OperatorEdit};

    fn system(h: usize, w: usize, mask: &[u8], policy: BorderPolicy) -> (PoissonSystem, CsrMatrix) {
        let a = build_laplacian(h, w).unwrap();
        let mut edit = OperatorEdit::new(&a, w);
        edit.carve(mask, policy);
        let op = edit.finish();
        let matrix = op.matrix().clone();
        (PoissonSystem::new(&op), matrix)
    }

    fn assert_residual_small(a: &CsrMatrix, x: &[f64], b: &[f64]) {
        let ax = a.mul_vec(x);
        for (k, (l, r)) in ax.iter().zip(b).enumerate() {
            assert!((l - r).abs() < 1e-6, "row {k}: {l} != {r}");
        }
    }

    #[test]
    fn solves_plain_laplacian() {
        let (sys, a) = system(4, 5, &[1; 20], BorderPolicy::Laplacian);
        assert_eq!(sys.unknowns(), 20);
        let expected: Vec<f64> = (0..20_i32).map(|i| f64::from(i) * 3.5 - 10.0).collect();
        let b = a.mul_vec(&expected);
        let sol = sys.solve(&b, None, &SolverOptions::default()).unwrap();
        for (got, want) in sol.values.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn identity_rows_pass_rhs_through() {
        let (h, w) = (5, 5);
        let mut mask = vec![0u8; h * w];
        mask[12] = 1;
        let (sys, a) = system(h, w, &mask, BorderPolicy::Passthrough);
        assert_eq!(sys.unknowns(), 1);

        let mut b = vec![50.0; h * w];
        b[12] = 8.0;
        let sol = sys.solve(&b, None, &SolverOptions::default()).unwrap();
        // 4x - 4*50 = 8
        assert!((sol.values[12] - 52.0).abs() < 1e-9);
        for (k, v) in sol.values.iter().enumerate() {
            if k != 12 {
                assert_eq!(*v, 50.0);
            }
        }
        assert_residual_small(&a, &sol.values, &b);
    }

    #[test]
    fn mixed_system_satisfies_every_row() {
        let (h, w) = (6, 7);
        let mask: Vec<u8> = (0..h * w)
            .map(|k| u8::from((k % w) > 1 && (k / w) > 1 && (k % w) < 5))
            .collect();
        let (sys, a) = system(h, w, &mask, BorderPolicy::Laplacian);
        let b: Vec<f64> = (0..h * w).map(|k| f64::from(u32::try_from(k * 37 % 255).unwrap())).collect();
        let sol = sys.solve(&b, None, &SolverOptions::default()).unwrap();
        assert_residual_small(&a, &sol.values, &b);
    }

    #[test]
    fn guess_does_not_change_solution() {
        let (sys, _) = system(3, 3, &[1; 9], BorderPolicy::Laplacian);
        let b = vec![1.0, -2.0, 3.0, 0.5, 7.0, -1.0, 2.0, 0.0, 4.0];
        let opts = SolverOptions::default();
        let cold = sys.solve(&b, None, &opts).unwrap();
        let warm = sys.solve(&b, Some(&[100.0; 9][..]), &opts).unwrap();
        for (c, w) in cold.values.iter().zip(&warm.values) {
            assert!((c - w).abs() < 1e-8);
        }
    }

    #[test]
    fn exact_guess_needs_no_iterations() {
        let (sys, a) = system(3, 4, &[1; 12], BorderPolicy::Laplacian);
        let x = vec![9.0; 12];
        let b = a.mul_vec(&x);
        let sol = sys.solve(&b, Some(x.as_slice()), &SolverOptions::default()).unwrap();
        assert_eq!(sol.iterations, 0);
    }

    #[test]
    fn iteration_cap_is_reported() {
        let (sys, _) = system(8, 8, &[1; 64], BorderPolicy::Laplacian);
        let b: Vec<f64> = (0..64_i32).map(f64::from).collect();
        let opts = SolverOptions {
            tolerance: 1e-14,
            max_iterations: Some(1),
        };
        assert!(matches!(
            sys.solve(&b, None, &opts),
            Err(Error::NotConverged { iterations: 1, .. })
        ));
    }

    #[test]
    fn non_finite_rhs_is_reported() {
        let (sys, _) = system(3, 3, &[0; 9], BorderPolicy::Passthrough);
        let mut b = vec![1.0; 9];
        b[4] = f64::NAN;
        assert!(matches!(
            sys.solve(&b, None, &SolverOptions::default()),
            Err(Error::NonFinite { index: 4, .. })
        ));
    }

    #[test]
    fn zero_rhs_gives_zero_solution() {
        let (sys, _) = system(3, 3, &[1; 9], BorderPolicy::Laplacian);
        let sol = sys
            .solve(&[0.0; 9], Some(&[5.0; 9][..]), &SolverOptions::default())
            .unwrap();
        assert!(sol.values.iter().all(|&v| v == 0.0));
    }

    /// Gaussian elimination with partial pivoting on a dense copy of `a`.
    fn dense_solve(a: &CsrMatrix, b: &[f64]) -> Vec<f64> {
        let n = a.rows();
        let mut m: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                let mut row: Vec<f64> = (0..n).map(|j| a.get(i, j)).collect();
                row.push(b[i]);
                row
            })
            .collect();
        for col in 0..n {
            let pivot = (col..n)
                .max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))
                .unwrap();
            m.swap(col, pivot);
            let (top, bottom) = m.split_at_mut(col + 1);
            let p = &top[col];
            for row in bottom {
                let f = row[col] / p[col];
                for (v, q) in row[col..].iter_mut().zip(&p[col..]) {
                    *v -= f * q;
                }
            }
        }
        let mut x = vec![0.0; n];
        for (i, row) in m.iter().enumerate().rev() {
            let tail: f64 = row[i + 1..n].iter().zip(&x[i + 1..]).map(|(a, b)| a * b).sum();
            x[i] = (row[n] - tail) / row[i];
        }
        x
    }

    #[test]
    fn default_border_system_matches_dense_elimination() {
        // Target 100, source 200, mask only at (1,1) on a 4x4 grid.
        let mut mask = vec![0u8; 16];
        mask[5] = 1;
        let (sys, a) = system(4, 4, &mask, BorderPolicy::Laplacian);
        assert_eq!(sys.unknowns(), 13);

        let lap = build_laplacian(4, 4).unwrap();
        let mut b = lap.mul_vec(&[200.0; 16]);
        for (k, v) in b.iter_mut().enumerate() {
            if mask[k] == 0 {
                *v = 100.0;
            }
        }

        let sol = sys.solve(&b, None, &SolverOptions::default()).unwrap();
        let dense = dense_solve(&a, &b);
        for (k, (got, want)) in sol.values.iter().zip(&dense).enumerate() {
            assert!((got - want).abs() < 1e-8, "pixel {k}: {got} != {want}");
        }

        let pixels: Vec<u8> = dense.iter().map(|&v| crate::raster::clamp_to_u8(v)).collect();
        #[rustfmt::skip]
        let expected: [u8; 16] = [
            69,  88,  89, 69,
            88,  94, 100, 89,
            89, 100, 100, 89,
            69,  89,  89, 69,
        ];
        assert_eq!(pixels, expected);
    }
}
