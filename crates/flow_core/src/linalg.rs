//! Updatable QR factorization.
//!
//! `DynamicQr` keeps `A = Q R` for a tall matrix `A` whose columns are appended, deleted and
//! shifted by rank-one corrections. `Q` is a full orthogonal `dim x dim` matrix and `R` is upper
//! trapezoidal with one column per column of `A`. Every update is restored with Givens rotations,
//! so no operation refactorizes from scratch.

use nalgebra::{DMatrix, DVector};

#[derive(Debug, Clone)]
pub struct DynamicQr {
    q: DMatrix<f64>,
    r: DMatrix<f64>,
}

/// Rotation `[c s; -s c]` that maps `(a, b)` to `(r, 0)`.
#[derive(Debug, Clone, Copy)]
struct Givens {
    c: f64,
    s: f64,
}

impl Givens {
    fn cancel(a: f64, b: f64) -> Self {
        if b == 0.0 {
            return Self { c: 1.0, s: 0.0 };
        }
        let r = a.hypot(b);
        Self { c: a / r, s: b / r }
    }

    fn apply(self, x: f64, y: f64) -> (f64, f64) {
        (self.c * x + self.s * y, -self.s * x + self.c * y)
    }

    /// Rotates rows `i` and `i + 1` of `m`, starting at column `from`.
    fn rotate_rows(self, m: &mut DMatrix<f64>, i: usize, from: usize) {
        for col in from..m.ncols() {
            let (x, y) = self.apply(m[(i, col)], m[(i + 1, col)]);
            m[(i, col)] = x;
            m[(i + 1, col)] = y;
        }
    }

    /// Applies the transposed rotation to columns `i` and `i + 1` of `q`, keeping `Q R` fixed.
    fn rotate_cols(self, q: &mut DMatrix<f64>, i: usize) {
        for row in 0..q.nrows() {
            let (x, y) = self.apply(q[(row, i)], q[(row, i + 1)]);
            q[(row, i)] = x;
            q[(row, i + 1)] = y;
        }
    }
}

impl DynamicQr {
    pub fn new(dim: usize) -> Self {
        Self {
            q: DMatrix::identity(dim, dim),
            r: DMatrix::zeros(dim, 0),
        }
    }

    pub fn dim(&self) -> usize {
        self.q.nrows()
    }

    pub fn num_cols(&self) -> usize {
        self.r.ncols()
    }

    /// Drops all columns and resets `Q` to the identity.
    pub fn clear(&mut self) {
        let dim = self.dim();
        self.q = DMatrix::identity(dim, dim);
        self.r = DMatrix::zeros(dim, 0);
    }

    pub fn append_column(&mut self, a: &DVector<f64>) {
        let k = self.num_cols();
        assert!(k < self.dim(), "cannot append column {} to a {}-dimensional QR", k, self.dim());
        assert_eq!(a.len(), self.dim());

        let mut w = self.q.tr_mul(a);
        // Rows >= k of the existing columns are zero, so these rotations leave R untouched.
        for i in (k..self.dim() - 1).rev() {
            let g = Givens::cancel(w[i], w[i + 1]);
            let (x, y) = g.apply(w[i], w[i + 1]);
            w[i] = x;
            w[i + 1] = y;
            g.rotate_cols(&mut self.q, i);
        }
        for i in (k + 1)..self.dim() {
            w[i] = 0.0;
        }

        let r = std::mem::replace(&mut self.r, DMatrix::zeros(0, 0));
        self.r = r.insert_column(k, 0.0);
        self.r.set_column(k, &w);
    }

    pub fn delete_column(&mut self, pos: usize) {
        assert!(pos < self.num_cols(), "column {} out of range", pos);

        let r = std::mem::replace(&mut self.r, DMatrix::zeros(0, 0));
        self.r = r.remove_column(pos);
        // R is now upper Hessenberg from column `pos` on.
        for k in pos..self.num_cols() {
            let g = Givens::cancel(self.r[(k, k)], self.r[(k + 1, k)]);
            g.rotate_rows(&mut self.r, k, k);
            self.r[(k + 1, k)] = 0.0;
            g.rotate_cols(&mut self.q, k);
        }
    }

    /// Updates the factorization to represent `A + u vᵀ`.
    pub fn rank_one_update(&mut self, u: &DVector<f64>, v: &DVector<f64>) {
        assert_eq!(u.len(), self.dim());
        assert_eq!(v.len(), self.num_cols());
        let n = self.num_cols();
        if n == 0 {
            return;
        }

        let mut w = self.q.tr_mul(u);
        for i in (0..self.dim() - 1).rev() {
            let g = Givens::cancel(w[i], w[i + 1]);
            let (x, y) = g.apply(w[i], w[i + 1]);
            w[i] = x;
            w[i + 1] = y;
            g.rotate_rows(&mut self.r, i, 0);
            g.rotate_cols(&mut self.q, i);
        }
        for j in 0..n {
            self.r[(0, j)] += w[0] * v[j];
        }
        // Back to upper trapezoidal.
        for k in 0..n.min(self.dim() - 1) {
            let g = Givens::cancel(self.r[(k, k)], self.r[(k + 1, k)]);
            g.rotate_rows(&mut self.r, k, k);
            self.r[(k + 1, k)] = 0.0;
            g.rotate_cols(&mut self.q, k);
        }
    }

    /// Least-squares coefficients `z` minimizing `|A z - rhs|`.
    /// Returns `None` when `R` is singular.
    pub fn solve(&self, rhs: &DVector<f64>) -> Option<DVector<f64>> {
        let n = self.num_cols();
        let c = self.q.tr_mul(rhs);
        let mut z = DVector::zeros(n);
        for i in (0..n).rev() {
            let diag = self.r[(i, i)];
            if diag == 0.0 || !diag.is_finite() {
                return None;
            }
            let mut acc = c[i];
            for j in (i + 1)..n {
                acc -= self.r[(i, j)] * z[j];
            }
            z[i] = acc / diag;
        }
        Some(z)
    }

    /// Column `k` of `Q`. For `k >= num_cols()` it is orthogonal to every column of `A`.
    pub fn complement_column(&self, k: usize) -> DVector<f64> {
        self.q.column(k).into_owned()
    }

    #[cfg(test)]
    fn reconstruct(&self) -> DMatrix<f64> {
        &self.q * &self.r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_matrix_close(a: &DMatrix<f64>, b: &DMatrix<f64>) {
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-10, "{a} != {b}");
        }
    }

    fn columns(cols: &[&[f64]]) -> DMatrix<f64> {
        let dim = cols[0].len();
        DMatrix::from_fn(dim, cols.len(), |i, j| cols[j][i])
    }

    #[test]
    fn append_column_keeps_factorization() {
        let mut qr = DynamicQr::new(3);
        qr.append_column(&DVector::from_vec(vec![1.0, 2.0, 2.0]));
        qr.append_column(&DVector::from_vec(vec![0.0, 1.0, -1.0]));
        let expected = columns(&[&[1.0, 2.0, 2.0], &[0.0, 1.0, -1.0]]);
        assert_matrix_close(&qr.reconstruct(), &expected);
        assert!(qr.r[(1, 0)].abs() < 1e-12);
        assert!(qr.r[(2, 0)].abs() < 1e-12);
        assert!(qr.r[(2, 1)].abs() < 1e-12);
        let qtq = qr.q.tr_mul(&qr.q);
        assert_matrix_close(&qtq, &DMatrix::identity(3, 3));
    }

    #[test]
    fn delete_column_keeps_factorization() {
        let mut qr = DynamicQr::new(3);
        qr.append_column(&DVector::from_vec(vec![1.0, 0.0, 1.0]));
        qr.append_column(&DVector::from_vec(vec![2.0, 1.0, 0.0]));
        qr.append_column(&DVector::from_vec(vec![0.0, 3.0, 1.0]));
        qr.delete_column(0);
        let expected = columns(&[&[2.0, 1.0, 0.0], &[0.0, 3.0, 1.0]]);
        assert_matrix_close(&qr.reconstruct(), &expected);
        assert!(qr.r[(1, 0)].abs() < 1e-12);
        assert!(qr.r[(2, 1)].abs() < 1e-12);
    }

    #[test]
    fn rank_one_update_matches_direct_sum() {
        let mut qr = DynamicQr::new(3);
        qr.append_column(&DVector::from_vec(vec![1.0, 0.0, 1.0]));
        qr.append_column(&DVector::from_vec(vec![2.0, 1.0, 0.0]));
        let u = DVector::from_vec(vec![0.5, -1.0, 2.0]);
        let v = DVector::from_vec(vec![1.0, 1.0]);
        let expected = qr.reconstruct() + &u * v.transpose();
        qr.rank_one_update(&u, &v);
        assert_matrix_close(&qr.reconstruct(), &expected);
        assert!(qr.r[(1, 0)].abs() < 1e-12);
        assert!(qr.r[(2, 0)].abs() < 1e-12);
        assert!(qr.r[(2, 1)].abs() < 1e-12);
    }

    #[test]
    fn solve_returns_least_squares_coefficients() {
        let mut qr = DynamicQr::new(3);
        qr.append_column(&DVector::from_vec(vec![1.0, 0.0, 0.0]));
        qr.append_column(&DVector::from_vec(vec![0.0, 1.0, 0.0]));
        let z = qr
            .solve(&DVector::from_vec(vec![2.0, -3.0, 7.0]))
            .expect("solve should succeed");
        assert!((z[0] - 2.0).abs() < 1e-12);
        assert!((z[1] + 3.0).abs() < 1e-12);

        let normal = qr.complement_column(2);
        assert!(normal[0].abs() < 1e-12);
        assert!(normal[1].abs() < 1e-12);
        assert!((normal[2].abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn solve_reports_singular_system() {
        let mut qr = DynamicQr::new(2);
        qr.append_column(&DVector::from_vec(vec![0.0, 0.0]));
        assert!(qr.solve(&DVector::from_vec(vec![1.0, 1.0])).is_none());
    }
}
