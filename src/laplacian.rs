//! Discrete Laplacian operator and its mask-driven boundary edit.
//!
//! The operator for an `n x m` grid is the 5-point stencil
//! `4 f(x,y) - f(x-1,y) - f(x+1,y) - f(x,y-1) - f(x,y+1)` laid out over the
//! linear index `k = x + y * m`. It is the negated textbook Laplacian, so the
//! matrix is symmetric positive definite.
//!
//! Building a blending operator happens in three stages:
//! 1. [`build_laplacian`] constructs the plain operator;
//! 2. [`OperatorEdit::carve`] turns rows outside the mask into identity rows;
//! 3. [`OperatorEdit::finish`] freezes the result into a [`BoundedOperator`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::sparse::{CsrMatrix, LilMatrix};

/// Build the `(n*m) x (n*m)` 5-point Laplacian for a grid of `n` rows and
/// `m` columns.
///
/// Each image row is a tridiagonal block (4 on the diagonal, -1 beside it);
/// the diagonals at `+m` and `-m` couple vertically adjacent pixels. The first
/// and last pixels of consecutive rows are not coupled.
///
/// # Errors
///
/// Returns [`Error::InvalidDimension`] if `n` or `m` is zero.
pub fn build_laplacian(n: usize, m: usize) -> Result<CsrMatrix> {
    let invalid = || Error::InvalidDimension { rows: n, cols: m };
    if n == 0 || m == 0 {
        return Err(invalid());
    }
    let stride = isize::try_from(m).map_err(|_| invalid())?;
    n.checked_mul(m).ok_or_else(invalid)?;

    let mut block = LilMatrix::new(m, m);
    block.set_diag(-1, -1.0);
    block.set_diag(0, 4.0);
    block.set_diag(1, -1.0);

    let mut a = LilMatrix::block_diag(&block, n);
    a.set_diag(stride, -1.0);
    a.set_diag(-stride, -1.0);

    let csr = a.to_csr();
    debug!(rows = n, cols = m, nnz = csr.nnz(), "built laplacian");
    Ok(csr)
}

/// Which mask-zero pixels get their row replaced by an identity row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BorderPolicy {
    /// Only pixels with `1 <= y <= H-2` and `1 <= x <= W-2` are eligible.
    ///
    /// Border pixels always keep the full Laplacian row, even where the mask
    /// is zero, and are solved against the target value as right-hand side.
    /// This reproduces the classic reference behavior pixel for pixel.
    #[default]
    Laplacian,
    /// Every mask-zero pixel, border included, is pinned to the target.
    Passthrough,
}

impl BorderPolicy {
    fn eligible(self, x: usize, y: usize, width: usize, height: usize) -> bool {
        match self {
            Self::Passthrough => true,
            Self::Laplacian => x >= 1 && y >= 1 && x + 1 < width && y + 1 < height,
        }
    }
}

/// An operator under boundary editing.
#[derive(Debug, Clone)]
pub struct OperatorEdit {
    matrix: LilMatrix,
    width: usize,
    height: usize,
    identity: Vec<bool>,
}

impl OperatorEdit {
    /// Start editing a copy of `laplacian`, which covers a grid `width` pixels wide.
    ///
    /// # Panics
    ///
    /// Panics if `width` is zero or does not divide the operator size.
    #[must_use]
    pub fn new(laplacian: &CsrMatrix, width: usize) -> Self {
        assert!(
            width > 0 && laplacian.rows() % width == 0,
            "operator size {} is not a multiple of width {width}",
            laplacian.rows()
        );
        Self {
            matrix: LilMatrix::from_csr(laplacian),
            width,
            height: laplacian.rows() / width,
            identity: vec![false; laplacian.rows()],
        }
    }

    /// Replace the row of every eligible pixel whose binarized `mask` entry is
    /// zero with an identity row. Returns the number of rows rewritten.
    ///
    /// # Panics
    ///
    /// Panics if `mask.len()` differs from the number of grid pixels.
    pub fn carve(&mut self, mask: &[u8], policy: BorderPolicy) -> usize {
        assert_eq!(mask.len(), self.identity.len(), "mask length must match grid");
        let mut carved = 0;
        for y in 0..self.height {
            for x in 0..self.width {
                let k = x + y * self.width;
                if mask[k] == 0 && !self.identity[k] && policy.eligible(x, y, self.width, self.height)
                {
                    self.matrix.set_identity_row(k);
                    self.identity[k] = true;
                    carved += 1;
                }
            }
        }
        trace!(carved, ?policy, "carved identity rows");
        carved
    }

    /// Freeze the edited operator for solving.
    #[must_use]
    pub fn finish(self) -> BoundedOperator {
        BoundedOperator {
            matrix: self.matrix.to_csr(),
            identity: self.identity,
            width: self.width,
            height: self.height,
        }
    }
}

/// A Laplacian with identity rows in place, ready for the solver.
#[derive(Debug, Clone)]
pub struct BoundedOperator {
    matrix: CsrMatrix,
    identity: Vec<bool>,
    width: usize,
    height: usize,
}

impl BoundedOperator {
    /// The edited operator.
    #[must_use]
    pub fn matrix(&self) -> &CsrMatrix {
        &self.matrix
    }

    /// Whether row `k` was replaced by an identity row.
    #[must_use]
    pub fn is_identity(&self, k: usize) -> bool {
        self.identity[k]
    }

    /// Per-row identity flags.
    #[must_use]
    pub fn identity_rows(&self) -> &[bool] {
        &self.identity
    }

    /// Grid width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Grid height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }
}

/// Cache of built Laplacians keyed by `(height, width)`.
///
/// The plain operator depends on nothing but the grid size, so repeated edits
/// of same-sized images can share one copy.
#[derive(Debug, Default)]
pub struct LaplacianCache {
    entries: Mutex<HashMap<(usize, usize), Arc<CsrMatrix>>>,
}

impl LaplacianCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached operator for `height x width`, building it on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDimension`] if either dimension is zero.
    pub fn get_or_build(&self, height: usize, width: usize) -> Result<Arc<CsrMatrix>> {
        if let Some(hit) = self.lock().get(&(height, width)) {
            debug!(height, width, "laplacian cache hit");
            return Ok(Arc::clone(hit));
        }
        // Built outside the lock; a concurrent miss on the same key keeps the first insert.
        let built = Arc::new(build_laplacian(height, width)?);
        let mut entries = self.lock();
        Ok(Arc::clone(entries.entry((height, width)).or_insert(built)))
    }

    /// Number of cached operators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop all cached operators.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(usize, usize), Arc<CsrMatrix>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_dimensions() {
        assert!(matches!(
            build_laplacian(0, 4),
            Err(Error::InvalidDimension { rows: 0, cols: 4 })
        ));
        assert!(matches!(
            build_laplacian(3, 0),
            Err(Error::InvalidDimension { .. })
        ));
    }

    #[test]
    fn interior_rows_have_five_point_stencil() {
        let (n, m) = (5, 6);
        let a = build_laplacian(n, m).unwrap();
        assert_eq!(a.rows(), n * m);
        assert_eq!(a.cols(), n * m);

        for y in 1..n - 1 {
            for x in 1..m - 1 {
                let k = x + y * m;
                let row: Vec<_> = a.row(k).collect();
                assert_eq!(
                    row,
                    vec![
                        (k - m, -1.0),
                        (k - 1, -1.0),
                        (k, 4.0),
                        (k + 1, -1.0),
                        (k + m, -1.0)
                    ],
                    "row {k}"
                );
            }
        }
    }

    #[test]
    fn every_diagonal_entry_is_four() {
        let a = build_laplacian(4, 3).unwrap();
        assert!(a.diagonal().iter().all(|&d| d == 4.0));
    }

    #[test]
    fn row_ends_do_not_wrap() {
        let m = 4;
        let a = build_laplacian(3, m).unwrap();
        // Last pixel of row 0 and first pixel of row 1 are not neighbours.
        assert_eq!(a.get(m - 1, m), 0.0);
        assert_eq!(a.get(m, m - 1), 0.0);
        // Corner has only two neighbours.
        assert_eq!(a.row(0).count(), 3);
    }

    #[test]
    fn laplacian_is_symmetric() {
        let a = build_laplacian(4, 5).unwrap();
        for r in 0..a.rows() {
            for (c, v) in a.row(r) {
                assert_eq!(a.get(c, r), v);
            }
        }
    }

    #[test]
    fn single_pixel_grid() {
        let a = build_laplacian(1, 1).unwrap();
        assert_eq!(a.nnz(), 1);
        assert_eq!(a.get(0, 0), 4.0);
    }

    #[test]
    fn single_row_grid_is_tridiagonal() {
        let a = build_laplacian(1, 4).unwrap();
        assert_eq!(a.nnz(), 10);
        assert_eq!(a.get(1, 0), -1.0);
        assert_eq!(a.get(1, 2), -1.0);
    }

    #[test]
    fn carve_skips_border_by_default() {
        let (h, w) = (4, 4);
        let a = build_laplacian(h, w).unwrap();
        let mask = vec![0u8; h * w];
        let mut edit = OperatorEdit::new(&a, w);
        assert_eq!(edit.carve(&mask, BorderPolicy::Laplacian), 4);
        let op = edit.finish();

        for y in 0..h {
            for x in 0..w {
                let k = x + y * w;
                let border = x == 0 || y == 0 || x == w - 1 || y == h - 1;
                assert_eq!(op.is_identity(k), !border, "pixel ({x},{y})");
                if border {
                    assert_eq!(op.matrix().get(k, k), 4.0);
                } else {
                    let row: Vec<_> = op.matrix().row(k).collect();
                    assert_eq!(row, vec![(k, 1.0)]);
                }
            }
        }
    }

    #[test]
    fn carve_leaves_masked_rows_alone() {
        let (h, w) = (3, 3);
        let a = build_laplacian(h, w).unwrap();
        let mut mask = vec![0u8; 9];
        mask[4] = 1;
        let mut edit = OperatorEdit::new(&a, w);
        assert_eq!(edit.carve(&mask, BorderPolicy::Laplacian), 0);
        assert_eq!(edit.finish().matrix(), &a);
    }

    #[test]
    fn passthrough_carves_border_too() {
        let (h, w) = (3, 4);
        let a = build_laplacian(h, w).unwrap();
        let mut mask = vec![0u8; h * w];
        mask[5] = 1;
        let mut edit = OperatorEdit::new(&a, w);
        assert_eq!(edit.carve(&mask, BorderPolicy::Passthrough), 11);
        let op = edit.finish();
        assert!(!op.is_identity(5));
        assert_eq!(op.identity_rows().iter().filter(|&&b| b).count(), 11);
        assert_eq!((op.width(), op.height()), (4, 3));
    }

    #[test]
    fn cache_reuses_operators() {
        let cache = LaplacianCache::new();
        assert!(cache.is_empty());
        let a = cache.get_or_build(3, 4).unwrap();
        let b = cache.get_or_build(3, 4).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        cache.get_or_build(4, 3).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.get_or_build(0, 3).is_err());
        cache.clear();
        assert!(cache.is_empty());
    }
}
