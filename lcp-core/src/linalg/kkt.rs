//! Block factorization of the weighted KKT system.
//!
//! Each Newton step (and the single backward solve) needs the solution of
//!
//! ```text
//! [ Q   0   G^T  A^T ] [dx  ]     [rx  ]
//! [ 0   D   I    0   ] [ds  ] = - [rs  ]
//! [ G   I  -F    0   ] [dlam]     [rlam]
//! [ A   0   0    0   ] [dnu ]     [rnu ]
//! ```
//!
//! with `D = diag(d)` the only block that changes between iterations.
//! Eliminating `ds` and then `dx` leaves the Schur system
//!
//! ```text
//! S = [ A Q^-1 A^T    A Q^-1 G^T             ]
//!     [ G Q^-1 A^T    G Q^-1 G^T + D^-1 + F  ]
//! ```
//!
//! Q, `A Q^-1 A^T` and the reduced block
//! `R = G Q^-1 G^T - G Q^-1 A^T (A Q^-1 A^T)^-1 A Q^-1 G^T` are factored or
//! formed once in [`InstanceKkt::pre_factor`]. Only `T = R + F + D^-1` is
//! re-factored per weight update in [`InstanceKkt::factor`].
//!
//! The adjoint orientation swaps `F` for `F^T`, which (Q being symmetric) is
//! exactly the transposed KKT operator needed for implicit differentiation.

use nalgebra::{DMatrix, DVector};

use super::dense::DenseLu;
use crate::problem::{LcpProblem, LcpSettings, ProblemDims};
use crate::util::{for_each_instance, map_instances};

/// Weights below this are clamped before inversion.
const MIN_WEIGHT: f64 = 1e-300;

/// Which operator the weighted block factorization represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KktOrientation {
    /// The Newton system itself (coupling block `F`)
    Primal,
    /// Its transpose (coupling block `F^T`)
    Adjoint,
}

/// Right-hand side `(rx, rs, rlam, rnu)` of one KKT solve.
#[derive(Debug, Clone, Copy)]
pub struct KktRhs<'a> {
    pub rx: &'a DVector<f64>,
    pub rs: &'a DVector<f64>,
    pub rlam: &'a DVector<f64>,
    pub rnu: &'a DVector<f64>,
}

/// Solution `(dx, ds, dlam, dnu)` of one KKT solve.
#[derive(Debug, Clone)]
pub struct KktStep {
    pub dx: DVector<f64>,
    pub ds: DVector<f64>,
    pub dlam: DVector<f64>,
    pub dnu: DVector<f64>,
}

/// Factorization state of a single instance.
///
/// Groups the three parts of the block factorization:
/// - the Q factorization (`q_lu`),
/// - the weighted Schur block (`schur_lu`, `d_inv`, `orientation`),
/// - the reduction data needed to re-form it (`inv_q_gt`, `inv_q_at`,
///   `g_inv_q_at`, `eq_lu`, `r`) together with copies of G, A and F.
#[derive(Debug, Clone)]
pub struct InstanceKkt {
    g: DMatrix<f64>,
    a: DMatrix<f64>,
    f: DMatrix<f64>,

    q_lu: DenseLu,

    /// Q^-1 G^T (nz × nineq)
    inv_q_gt: DMatrix<f64>,
    /// Q^-1 A^T (nz × neq)
    inv_q_at: DMatrix<f64>,
    /// G Q^-1 A^T (nineq × neq)
    g_inv_q_at: DMatrix<f64>,
    /// LU of A Q^-1 A^T (None when neq = 0)
    eq_lu: Option<DenseLu>,
    /// Weight-independent part of the inequality Schur block
    r: DMatrix<f64>,

    /// LU of T = R + F (or F^T) + D^-1 (None when nineq = 0)
    schur_lu: Option<DenseLu>,
    d_inv: DVector<f64>,
    orientation: KktOrientation,
}

impl InstanceKkt {
    /// One-time factorization of the weight-independent blocks.
    ///
    /// A singular Q (or rank-deficient `A Q^-1 A^T`) is regularized rather
    /// than rejected; see [`InstanceKkt::invariant_regularized`]. The Schur
    /// block starts out factored with unit weights.
    pub fn pre_factor(
        q: &DMatrix<f64>,
        g: &DMatrix<f64>,
        f: &DMatrix<f64>,
        a: Option<&DMatrix<f64>>,
        reg: f64,
    ) -> Self {
        let nz = q.nrows();
        let nineq = g.nrows();
        let a = a.cloned().unwrap_or_else(|| DMatrix::zeros(0, nz));
        let neq = a.nrows();

        let q_lu = DenseLu::factor(q.clone(), reg);
        let inv_q_gt = q_lu.solve_mat(&g.transpose());
        let mut r = g * &inv_q_gt;

        let (inv_q_at, g_inv_q_at, eq_lu) = if neq > 0 {
            let inv_q_at = q_lu.solve_mat(&a.transpose());
            let a_inv_q_at = &a * &inv_q_at;
            let g_inv_q_at = g * &inv_q_at;
            let eq_lu = DenseLu::factor(a_inv_q_at, reg);

            // Fold the equality block into R
            let t = eq_lu.solve_mat(&g_inv_q_at.transpose());
            r -= &g_inv_q_at * t;

            (inv_q_at, g_inv_q_at, Some(eq_lu))
        } else {
            (DMatrix::zeros(nz, 0), DMatrix::zeros(nineq, 0), None)
        };

        let mut kkt = Self {
            g: g.clone(),
            a,
            f: f.clone(),
            q_lu,
            inv_q_gt,
            inv_q_at,
            g_inv_q_at,
            eq_lu,
            r,
            schur_lu: None,
            d_inv: DVector::from_element(nineq, 1.0),
            orientation: KktOrientation::Primal,
        };
        kkt.factor(&DVector::from_element(nineq, 1.0), KktOrientation::Primal, reg);
        kkt
    }

    /// Re-factor the weighted Schur block for weights `d`.
    ///
    /// Must be called after every change of `d` and before the next solve.
    /// Returns true when the block had to be regularized.
    pub fn factor(&mut self, d: &DVector<f64>, orientation: KktOrientation, reg: f64) -> bool {
        let nineq = self.r.nrows();
        debug_assert_eq!(d.len(), nineq);

        self.orientation = orientation;
        for (di, &w) in self.d_inv.iter_mut().zip(d.iter()) {
            *di = 1.0 / w.max(MIN_WEIGHT);
        }

        if nineq == 0 {
            self.schur_lu = None;
            return false;
        }

        let mut t = self.r.clone();
        match orientation {
            KktOrientation::Primal => t += &self.f,
            KktOrientation::Adjoint => t += self.f.transpose(),
        }
        for j in 0..nineq {
            t[(j, j)] += self.d_inv[j];
        }

        let lu = DenseLu::factor_weighted(t, reg);
        let regularized = lu.is_regularized();
        self.schur_lu = Some(lu);
        regularized
    }

    /// Solve the KKT system for the current weights and orientation.
    pub fn solve(&self, rhs: &KktRhs<'_>) -> KktStep {
        let inv_q_rx = self.q_lu.solve_vec(rhs.rx);
        let rs_over_d = rhs.rs.component_mul(&self.d_inv);
        let hz = &self.g * &inv_q_rx + rs_over_d - rhs.rlam;

        let (dlam, dnu) = match &self.eq_lu {
            Some(eq_lu) => {
                let hy = &self.a * &inv_q_rx - rhs.rnu;
                let u = eq_lu.solve_vec(&hy);
                let wz = self.schur_solve(&(hz - &self.g_inv_q_at * &u));
                let wy = u - eq_lu.solve_vec(&self.g_inv_q_at.tr_mul(&wz));
                (-wz, -wy)
            }
            None => (-self.schur_solve(&hz), DVector::zeros(0)),
        };

        let dx = -inv_q_rx - &self.inv_q_gt * &dlam - &self.inv_q_at * &dnu;
        let ds = (-rhs.rs - &dlam).component_mul(&self.d_inv);

        KktStep { dx, ds, dlam, dnu }
    }

    fn schur_solve(&self, rhs: &DVector<f64>) -> DVector<f64> {
        match &self.schur_lu {
            Some(lu) => lu.solve_vec(rhs),
            None => DVector::zeros(0),
        }
    }

    /// Whether Q or `A Q^-1 A^T` needed a diagonal shift.
    pub fn invariant_regularized(&self) -> bool {
        self.q_lu.is_regularized() || self.eq_lu.as_ref().is_some_and(DenseLu::is_regularized)
    }

    /// Whether the current weighted block needed a diagonal shift.
    pub fn schur_regularized(&self) -> bool {
        self.schur_lu.as_ref().is_some_and(DenseLu::is_regularized)
    }

    /// Orientation of the current weighted factorization.
    pub fn orientation(&self) -> KktOrientation {
        self.orientation
    }
}

/// Factorization state for a whole batch.
#[derive(Debug, Clone)]
pub struct BatchKkt {
    instances: Vec<InstanceKkt>,
    dims: ProblemDims,
    reg: f64,
    parallel: bool,
}

/// Factor the invariant part of every instance's KKT system.
pub fn pre_factor_kkt(prob: &LcpProblem, dims: ProblemDims, settings: &LcpSettings) -> BatchKkt {
    let parallel = settings.parallel_for(dims.batch);
    let reg = settings.q_regularization;

    let instances = map_instances(dims.batch, parallel, |i| {
        InstanceKkt::pre_factor(
            prob.Q.get(i),
            prob.G.get(i),
            prob.F.get(i),
            prob.A.as_ref().map(|a| a.get(i)),
            reg,
        )
    });

    BatchKkt { instances, dims, reg, parallel }
}

/// Re-factor the weighted Schur block of every instance.
///
/// Returns the number of instances whose block needed regularization.
pub fn factor_kkt(kkt: &mut BatchKkt, d: &[DVector<f64>], orientation: KktOrientation) -> usize {
    debug_assert_eq!(d.len(), kkt.instances.len());
    let reg = kkt.reg;
    for_each_instance(&mut kkt.instances, kkt.parallel, |i, inst| {
        inst.factor(&d[i], orientation, reg);
    });
    kkt.instances.iter().filter(|k| k.schur_regularized()).count()
}

impl BatchKkt {
    pub fn dims(&self) -> ProblemDims {
        self.dims
    }

    pub fn instance(&self, i: usize) -> &InstanceKkt {
        &self.instances[i]
    }

    /// Per instance: whether an invariant block was regularized.
    pub fn invariant_regularized(&self) -> Vec<bool> {
        self.instances.iter().map(InstanceKkt::invariant_regularized).collect()
    }

    /// Solve one right-hand side per instance.
    pub fn solve(&self, rhs: &[KktRhs<'_>]) -> Vec<KktStep> {
        debug_assert_eq!(rhs.len(), self.instances.len());
        map_instances(self.instances.len(), self.parallel, |i| self.instances[i].solve(&rhs[i]))
    }
}
