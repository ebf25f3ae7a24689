//! Optimality residuals of a single instance.

use nalgebra::DVector;

use crate::problem::LcpProblem;

/// Primal-dual iterate of one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Iterate {
    /// Primal variables (nz)
    pub z: DVector<f64>,
    /// Slacks (nineq)
    pub s: DVector<f64>,
    /// Inequality multipliers (nineq)
    pub lam: DVector<f64>,
    /// Equality multipliers (neq)
    pub nu: DVector<f64>,
}

/// Residuals of the optimality conditions at an iterate.
#[derive(Debug, Clone)]
pub struct Residuals {
    /// Stationarity: `Q z + p + G^T lam + A^T nu`
    pub rx: DVector<f64>,
    /// Modified inequality: `G z + s - F lam - h`
    pub rlam: DVector<f64>,
    /// Equality: `A z - b`
    pub rnu: DVector<f64>,
    /// Barrier parameter `|s^T lam| / nineq`
    pub mu: f64,
    /// Convergence measure `||rlam|| + ||rnu|| + ||rx|| + nineq * mu`
    pub measure: f64,
}

impl Residuals {
    pub fn compute(prob: &LcpProblem, i: usize, it: &Iterate) -> Self {
        let q = prob.Q.get(i);
        let g = prob.G.get(i);
        let f = prob.F.get(i);

        let mut rx = q * &it.z + prob.p.get(i) + g.tr_mul(&it.lam);
        let rlam = g * &it.z + &it.s - f * &it.lam - prob.h.get(i);

        let rnu = match (&prob.A, &prob.b) {
            (Some(a), Some(b)) => {
                let a = a.get(i);
                rx += a.tr_mul(&it.nu);
                a * &it.z - b.get(i)
            }
            _ => DVector::zeros(0),
        };

        let nineq = it.s.len();
        let mu = if nineq > 0 {
            it.s.dot(&it.lam).abs() / nineq as f64
        } else {
            0.0
        };
        let measure = rlam.norm() + rnu.norm() + rx.norm() + nineq as f64 * mu;

        Self { rx, rlam, rnu, mu, measure }
    }
}
