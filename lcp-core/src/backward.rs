//! Implicit gradients of the LCP solution map.
//!
//! At a converged iterate the optimality conditions define `z*` implicitly as
//! a function of the problem data. Differentiating them gives a linear system
//! with the same structure as a Newton step, transposed. One adjoint solve
//! with right-hand side `(dl/dz*, 0, 0)` therefore yields directions
//! `(dx, dlam, dnu)` from which every parameter gradient is an outer product:
//!
//! ```text
//! dQ = (dx z^T + z dx^T) / 2     dp = dx
//! dG = dlam z^T + lam dx^T       dh = -dlam
//! dA = dnu z^T + nu dx^T         db = -dnu
//! dF = -dlam lam^T
//! ```

use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::batch::Param;
use crate::error::{LcpError, LcpResult};
use crate::linalg::dense::bger;
use crate::linalg::kkt::{factor_kkt, BatchKkt, KktOrientation, KktRhs};
use crate::pdipm::Iterate;
use crate::problem::{LcpProblem, LcpSettings};

/// Gradients of a scalar loss with respect to every problem parameter.
///
/// Each field has the sharing of the corresponding input: shared inputs get
/// the batch mean, per-instance inputs one gradient per instance. Equality
/// gradients are `None` when the problem has no equality rows.
#[derive(Debug, Clone)]
#[allow(non_snake_case)]
pub struct LcpGradients {
    pub Q: Param<DMatrix<f64>>,
    pub p: Param<DVector<f64>>,
    pub G: Param<DMatrix<f64>>,
    pub h: Param<DVector<f64>>,
    pub A: Option<Param<DMatrix<f64>>>,
    pub b: Option<Param<DVector<f64>>>,
    pub F: Param<DMatrix<f64>>,
}

/// Check the incoming gradient against the batch dimensions.
fn check_incoming(dl_dz: &[DVector<f64>], batch: usize, nz: usize) -> LcpResult<()> {
    if dl_dz.len() != batch {
        return Err(LcpError::BatchSizeMismatch {
            what: "dl_dz",
            expected: batch,
            found: dl_dz.len(),
        });
    }
    if let Some(g) = dl_dz.iter().find(|g| g.len() != nz) {
        return Err(LcpError::DimensionMismatch {
            what: "dl_dz",
            expected: nz.to_string(),
            found: g.len().to_string(),
        });
    }
    Ok(())
}

/// Compute parameter gradients from a converged forward state.
///
/// Re-factors the weighted Schur block in the adjoint orientation with
/// `d = lam* / s*` before the solve. Fails for a shared coupling matrix F.
pub fn backward_pdipm(
    prob: &LcpProblem,
    kkt: &mut BatchKkt,
    iterates: &[Iterate],
    dl_dz: &[DVector<f64>],
    settings: &LcpSettings,
) -> LcpResult<LcpGradients> {
    if prob.F.is_shared() {
        return Err(LcpError::SharedCouplingGradient);
    }
    let dims = kkt.dims();
    check_incoming(dl_dz, dims.batch, dims.nz)?;

    let d: Vec<DVector<f64>> = iterates.iter().map(|it| it.lam.component_div(&it.s)).collect();
    let n_shifted = factor_kkt(kkt, &d, KktOrientation::Adjoint);
    if n_shifted > 0 {
        debug!("backward: {} weighted Schur blocks regularized", n_shifted);
    }

    let zero_z = DVector::zeros(dims.nineq);
    let zero_y = DVector::zeros(dims.neq);
    let rhs: Vec<KktRhs<'_>> = dl_dz
        .iter()
        .map(|g| KktRhs { rx: g, rs: &zero_z, rlam: &zero_z, rnu: &zero_y })
        .collect();
    let adjoint = kkt.solve(&rhs);

    let zs: Vec<DVector<f64>> = iterates.iter().map(|it| it.z.clone()).collect();
    let lams: Vec<DVector<f64>> = iterates.iter().map(|it| it.lam.clone()).collect();
    let dxs: Vec<DVector<f64>> = adjoint.iter().map(|a| a.dx.clone()).collect();
    let dlams: Vec<DVector<f64>> = adjoint.iter().map(|a| a.dlam.clone()).collect();

    let d_q: Vec<DMatrix<f64>> = bger(&dxs, &zs)
        .into_iter()
        .map(|m| (&m + m.transpose()) * 0.5)
        .collect();
    let d_g = add_pairs(bger(&dlams, &zs), bger(&lams, &dxs));
    let d_h: Vec<DVector<f64>> = dlams.iter().map(|v| -v).collect();
    let d_f: Vec<DMatrix<f64>> = bger(&dlams, &lams).into_iter().map(|m| -m).collect();

    let (d_a, d_b) = match (&prob.A, &prob.b) {
        (Some(a), Some(b)) if dims.neq > 0 => {
            let nus: Vec<DVector<f64>> = iterates.iter().map(|it| it.nu.clone()).collect();
            let dnus: Vec<DVector<f64>> = adjoint.iter().map(|a| a.dnu.clone()).collect();
            let d_a = add_pairs(bger(&dnus, &zs), bger(&nus, &dxs));
            let d_b: Vec<DVector<f64>> = dnus.iter().map(|v| -v).collect();
            (Some(a.gradient_like(d_a)), Some(b.gradient_like(d_b)))
        }
        _ => (None, None),
    };

    if settings.verbose.iterations() {
        let max_dx = dxs.iter().map(|v| v.amax()).fold(0.0, f64::max);
        debug!("backward: batch = {}, max |dx| = {:.3e}", dims.batch, max_dx);
    }

    Ok(LcpGradients {
        Q: prob.Q.gradient_like(d_q),
        p: prob.p.gradient_like(dxs),
        G: prob.G.gradient_like(d_g),
        h: prob.h.gradient_like(d_h),
        A: d_a,
        b: d_b,
        F: prob.F.gradient_like(d_f),
    })
}

fn add_pairs(a: Vec<DMatrix<f64>>, b: Vec<DMatrix<f64>>) -> Vec<DMatrix<f64>> {
    a.into_iter().zip(b).map(|(x, y)| x + y).collect()
}
