//! Sparse matrix storage.
//!
//! Two layouts are provided:
//! - [`LilMatrix`]: one sorted entry list per row, cheap to edit entry by entry.
//! - [`CsrMatrix`]: compressed sparse rows, immutable and fast for
//!   matrix-vector products.
//!
//! Operators are assembled and edited as [`LilMatrix`] and converted with
//! [`LilMatrix::to_csr`] once they are ready to be multiplied or solved.

/// Compressed sparse row matrix of `f64` values.
///
/// Column indices within each row are strictly increasing and no explicit
/// zeros are stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    rows: usize,
    cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Assemble from raw CSR arrays. Callers guarantee sorted, in-range columns.
    pub(crate) fn from_parts(
        rows: usize,
        cols: usize,
        indptr: Vec<usize>,
        indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Self {
        debug_assert_eq!(indptr.len(), rows + 1);
        debug_assert_eq!(indices.len(), values.len());
        debug_assert!(indices.iter().all(|&c| c < cols));
        Self {
            rows,
            cols,
            indptr,
            indices,
            values,
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of stored (nonzero) entries.
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Iterate over the `(column, value)` pairs stored in `row`.
    ///
    /// # Panics
    ///
    /// Panics if `row >= self.rows()`.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let span = self.indptr[row]..self.indptr[row + 1];
        self.indices[span.clone()]
            .iter()
            .copied()
            .zip(self.values[span].iter().copied())
    }

    /// Value at `(row, col)`, zero when the entry is not stored.
    ///
    /// # Panics
    ///
    /// Panics if `row >= self.rows()`.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let span = self.indptr[row]..self.indptr[row + 1];
        match self.indices[span.clone()].binary_search(&col) {
            Ok(pos) => self.values[span.start + pos],
            Err(_) => 0.0,
        }
    }

    /// Main diagonal, one value per row.
    #[must_use]
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.rows).map(|k| self.get(k, k)).collect()
    }

    /// Compute `y = A * x`.
    ///
    /// # Panics
    ///
    /// Panics if `x.len() != self.cols()` or `y.len() != self.rows()`.
    pub fn mul_vec_into(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.cols, "input length must match column count");
        assert_eq!(y.len(), self.rows, "output length must match row count");
        for (row, out) in y.iter_mut().enumerate() {
            *out = self.row(row).map(|(col, v)| v * x[col]).sum();
        }
    }

    /// Compute and return `A * x`.
    ///
    /// # Panics
    ///
    /// Panics if `x.len() != self.cols()`.
    #[must_use]
    pub fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; self.rows];
        self.mul_vec_into(x, &mut y);
        y
    }
}

/// Row-list sparse matrix for incremental construction and editing.
#[derive(Debug, Clone, PartialEq)]
pub struct LilMatrix {
    cols: usize,
    data: Vec<Vec<(usize, f64)>>,
}

impl LilMatrix {
    /// Create an all-zero `rows x cols` matrix.
    #[must_use]
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            cols,
            data: vec![Vec::new(); rows],
        }
    }

    /// Copy a CSR matrix into editable form.
    #[must_use]
    pub fn from_csr(csr: &CsrMatrix) -> Self {
        let data = (0..csr.rows()).map(|r| csr.row(r).collect()).collect();
        Self {
            cols: csr.cols(),
            data,
        }
    }

    /// Block-diagonal matrix made of `count` copies of `block`.
    #[must_use]
    pub fn block_diag(block: &Self, count: usize) -> Self {
        let (br, bc) = (block.rows(), block.cols);
        let mut out = Self::new(br * count, bc * count);
        for b in 0..count {
            for (r, entries) in block.data.iter().enumerate() {
                out.data[b * br + r] = entries.iter().map(|&(c, v)| (b * bc + c, v)).collect();
            }
        }
        out
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.data.len()
    }

    /// Number of columns.
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Value at `(row, col)`, zero when the entry is not stored.
    ///
    /// # Panics
    ///
    /// Panics if `row >= self.rows()`.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let entries = &self.data[row];
        match entries.binary_search_by_key(&col, |&(c, _)| c) {
            Ok(pos) => entries[pos].1,
            Err(_) => 0.0,
        }
    }

    /// Store `value` at `(row, col)`. Writing zero removes the entry.
    ///
    /// # Panics
    ///
    /// Panics if the position is out of range.
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        assert!(col < self.cols, "column {col} out of range");
        let entries = &mut self.data[row];
        match entries.binary_search_by_key(&col, |&(c, _)| c) {
            Ok(pos) if value == 0.0 => {
                entries.remove(pos);
            }
            Ok(pos) => entries[pos].1 = value,
            Err(_) if value == 0.0 => {}
            Err(pos) => entries.insert(pos, (col, value)),
        }
    }

    /// Set every in-range element of the diagonal `col - row == offset`.
    pub fn set_diag(&mut self, offset: isize, value: f64) {
        let cols = self.cols;
        for row in 0..self.rows() {
            let Some(col) = row.checked_add_signed(offset) else {
                continue;
            };
            if col < cols {
                self.set(row, col, value);
            }
        }
    }

    /// Replace `row` by a unit row: 1 on the diagonal, nothing else.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of range.
    pub fn set_identity_row(&mut self, row: usize) {
        assert!(row < self.cols, "row {row} has no diagonal element");
        self.data[row] = vec![(row, 1.0)];
    }

    /// Convert into compressed sparse row storage.
    #[must_use]
    pub fn to_csr(&self) -> CsrMatrix {
        let nnz = self.data.iter().map(Vec::len).sum();
        let mut indptr = Vec::with_capacity(self.rows() + 1);
        let mut indices = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        indptr.push(0);
        for entries in &self.data {
            for &(c, v) in entries {
                indices.push(c);
                values.push(v);
            }
            indptr.push(indices.len());
        }
        CsrMatrix::from_parts(self.rows(), self.cols, indptr, indices, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tridiagonal(n: usize) -> LilMatrix {
        let mut m = LilMatrix::new(n, n);
        m.set_diag(-1, -1.0);
        m.set_diag(0, 4.0);
        m.set_diag(1, -1.0);
        m
    }

    #[test]
    fn set_diag_stays_in_range() {
        let m = tridiagonal(3);
        assert_eq!(m.get(0, 0), 4.0);
        assert_eq!(m.get(0, 1), -1.0);
        assert_eq!(m.get(1, 0), -1.0);
        assert_eq!(m.get(2, 1), -1.0);
        assert_eq!(m.get(0, 2), 0.0);
        assert_eq!(m.to_csr().nnz(), 7);
    }

    #[test]
    fn setting_zero_removes_entry() {
        let mut m = tridiagonal(3);
        m.set(1, 0, 0.0);
        assert_eq!(m.get(1, 0), 0.0);
        assert_eq!(m.to_csr().nnz(), 6);
        // Zero into an empty slot must not store anything.
        m.set(0, 2, 0.0);
        assert_eq!(m.to_csr().nnz(), 6);
    }

    #[test]
    fn block_diag_offsets_blocks() {
        let m = LilMatrix::block_diag(&tridiagonal(2), 3);
        assert_eq!(m.rows(), 6);
        assert_eq!(m.cols(), 6);
        assert_eq!(m.get(2, 2), 4.0);
        assert_eq!(m.get(2, 3), -1.0);
        // No coupling between consecutive blocks.
        assert_eq!(m.get(1, 2), 0.0);
        assert_eq!(m.get(2, 1), 0.0);
    }

    #[test]
    fn identity_row_clears_neighbours() {
        let mut m = tridiagonal(4);
        m.set_identity_row(2);
        let csr = m.to_csr();
        let row: Vec<_> = csr.row(2).collect();
        assert_eq!(row, vec![(2, 1.0)]);
        // Other rows keep their coupling to the edited row's column.
        assert_eq!(csr.get(1, 2), -1.0);
    }

    #[test]
    fn csr_round_trips_through_lil() {
        let csr = tridiagonal(5).to_csr();
        assert_eq!(LilMatrix::from_csr(&csr).to_csr(), csr);
    }

    #[test]
    fn mul_vec_matches_hand_computation() {
        let csr = tridiagonal(3).to_csr();
        let y = csr.mul_vec(&[1.0, 2.0, 3.0]);
        assert_eq!(y, vec![2.0, 4.0, 10.0]);
        assert_eq!(csr.diagonal(), vec![4.0, 4.0, 4.0]);
    }
}
