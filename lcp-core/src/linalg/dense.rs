//! Dense LU backend and small batched kernels.
//!
//! Every per-instance block in this crate is small and dense, so a single
//! partial-pivoting LU (nalgebra) backs all factorizations. A factorization
//! whose pivots collapse is retried with a growing diagonal shift instead of
//! failing; the shift is recorded so callers can surface it as a warning.

use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};

/// Relative pivot threshold below which a matrix is treated as singular.
const PIVOT_REL_TOL: f64 = 1e-13;

/// Growth factor for the diagonal shift between retries.
const SHIFT_GROWTH: f64 = 100.0;

/// Maximum number of regularized retries.
const MAX_SHIFT_RETRIES: usize = 8;

/// LU factorization with regularization bookkeeping.
#[derive(Debug, Clone)]
pub struct DenseLu {
    lu: LU<f64, Dyn, Dyn>,
    shift: f64,
}

impl DenseLu {
    /// Factor `m`, falling back to `m + δI` when it is numerically singular.
    ///
    /// Singularity is judged by the pivot range relative to the largest
    /// pivot, which suits the invariant blocks (Q and A Q^-1 A^T). The first
    /// shift is `reg * max(1, max |m_ii|)`; it grows by `SHIFT_GROWTH` until
    /// the pivots are acceptable. A zero `reg` still gets a tiny floor so the
    /// retry loop can make progress.
    pub fn factor(m: DMatrix<f64>, reg: f64) -> Self {
        Self::factor_with(m, reg, pivots_well_scaled)
    }

    /// Factor `m`, regularizing only on exactly zero or non-finite pivots.
    ///
    /// Used for the weighted Schur block, whose diagonal legitimately spans
    /// many orders of magnitude near convergence.
    pub fn factor_weighted(m: DMatrix<f64>, reg: f64) -> Self {
        Self::factor_with(m, reg, pivots_nonsingular)
    }

    fn factor_with(m: DMatrix<f64>, reg: f64, accept: fn(&LU<f64, Dyn, Dyn>) -> bool) -> Self {
        let n = m.nrows();
        debug_assert_eq!(n, m.ncols());

        let lu = m.clone().lu();
        if accept(&lu) {
            return Self { lu, shift: 0.0 };
        }

        let diag_scale = m.diagonal().iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
        let mut shift = reg.max(f64::EPSILON) * diag_scale;
        let mut shifted = m;
        let mut applied = 0.0;
        let mut lu = lu;

        for _ in 0..MAX_SHIFT_RETRIES {
            for i in 0..n {
                shifted[(i, i)] += shift - applied;
            }
            applied = shift;
            lu = shifted.clone().lu();
            if accept(&lu) {
                break;
            }
            shift *= SHIFT_GROWTH;
        }

        Self { lu, shift: applied }
    }

    /// Diagonal shift that was added (0 when none was needed).
    #[inline]
    pub fn shift(&self) -> f64 {
        self.shift
    }

    #[inline]
    pub fn is_regularized(&self) -> bool {
        self.shift > 0.0
    }

    /// Solve `M x = b`. A factorization that stayed singular yields zeros.
    pub fn solve_vec(&self, b: &DVector<f64>) -> DVector<f64> {
        let mut x = b.clone();
        if !self.lu.solve_mut(&mut x) {
            x.fill(0.0);
        }
        x
    }

    /// Solve `M X = B` column by column.
    pub fn solve_mat(&self, b: &DMatrix<f64>) -> DMatrix<f64> {
        let mut x = b.clone();
        if !self.lu.solve_mut(&mut x) {
            x.fill(0.0);
        }
        x
    }
}

fn pivot_range(lu: &LU<f64, Dyn, Dyn>) -> (f64, f64) {
    let u = lu.u();
    let diag = u.diagonal();
    let max_piv = diag.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let min_piv = diag.iter().fold(f64::INFINITY, |acc, v| acc.min(v.abs()));
    (min_piv, max_piv)
}

fn pivots_well_scaled(lu: &LU<f64, Dyn, Dyn>) -> bool {
    if !lu.is_invertible() {
        return false;
    }
    let (min_piv, max_piv) = pivot_range(lu);
    min_piv.is_finite() && min_piv > PIVOT_REL_TOL * max_piv.max(1.0)
}

fn pivots_nonsingular(lu: &LU<f64, Dyn, Dyn>) -> bool {
    if !lu.is_invertible() {
        return false;
    }
    let (min_piv, max_piv) = pivot_range(lu);
    min_piv > 0.0 && max_piv.is_finite()
}

/// Outer product `a b^T`.
#[inline]
pub fn outer(a: &DVector<f64>, b: &DVector<f64>) -> DMatrix<f64> {
    a * b.transpose()
}

/// Batched outer product: `out[i] = a[i] b[i]^T`.
pub fn bger(a: &[DVector<f64>], b: &[DVector<f64>]) -> Vec<DMatrix<f64>> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(ai, bi)| outer(ai, bi)).collect()
}

/// Batched transpose-multiply: `out[i] = M_i^T v[i]`.
pub fn batch_tr_mul<'a>(
    m: impl IntoIterator<Item = &'a DMatrix<f64>>,
    v: &[DVector<f64>],
) -> Vec<DVector<f64>> {
    m.into_iter().zip(v.iter()).map(|(mi, vi)| mi.tr_mul(vi)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_lu_solves() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 2.0, 3.0]);
        let lu = DenseLu::factor(m.clone(), 1e-8);
        assert!(!lu.is_regularized());

        let b = DVector::from_vec(vec![1.0, 2.0]);
        let x = lu.solve_vec(&b);
        assert!((&m * &x - &b).norm() < 1e-12);
    }

    #[test]
    fn test_dense_lu_regularizes_singular() {
        // PSD but singular
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let lu = DenseLu::factor(m, 1e-8);
        assert!(lu.is_regularized());
        assert!(lu.shift() > 0.0);

        let x = lu.solve_vec(&DVector::from_vec(vec![1.0, 1.0]));
        assert!(x.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_dense_lu_zero_matrix() {
        let lu = DenseLu::factor(DMatrix::zeros(3, 3), 1e-8);
        assert!(lu.is_regularized());
        let x = lu.solve_vec(&DVector::from_element(3, 1.0));
        assert!(x.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_weighted_factor_accepts_wide_diagonal() {
        let m = DMatrix::from_diagonal(&DVector::from_vec(vec![1e-10, 1.0, 1e12]));
        assert!(!DenseLu::factor_weighted(m.clone(), 1e-8).is_regularized());
        assert!(DenseLu::factor(m, 1e-8).is_regularized());
    }

    #[test]
    fn test_batched_kernels() {
        let a = vec![DVector::from_vec(vec![1.0, 2.0])];
        let b = vec![DVector::from_vec(vec![3.0, 4.0, 5.0])];
        let out = bger(&a, &b);
        assert_eq!(out[0].shape(), (2, 3));
        assert_eq!(out[0][(1, 2)], 10.0);

        let m = vec![DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0])];
        let v = vec![DVector::from_vec(vec![1.0, 1.0])];
        let r = batch_tr_mul(m.iter(), &v);
        assert_eq!(r[0], DVector::from_vec(vec![4.0, 6.0]));
    }
}
