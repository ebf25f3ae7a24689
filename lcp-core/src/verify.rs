//! Diagnostic checks of a computed solution.
//!
//! Never part of the solve's control flow. Failed checks are logged and
//! reported, not raised.

use log::warn;
use nalgebra::DVector;

use crate::linalg::dense::batch_tr_mul;
use crate::pdipm::Iterate;
use crate::problem::LcpProblem;
use crate::util::min_slice;

/// Default tolerance for [`verify_lcp`].
pub const DEFAULT_VERIFY_TOL: f64 = 1e-7;

/// Outcome of the diagnostic checks over a whole batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerifyReport {
    /// `|s_j lam_j| < tol` everywhere
    pub complementarity_ok: bool,
    /// `||Q z + p + G^T lam + A^T nu|| < tol` for every instance
    pub stationarity_ok: bool,
    /// `s, lam >= -tol` and `||G z + s - F lam - h|| < tol`
    pub inequality_ok: bool,
    /// `||A z - b|| < tol` (vacuous without equality rows)
    pub equality_ok: bool,

    /// Worst values seen, for reporting
    pub max_complementarity: f64,
    pub max_stationarity: f64,
    pub max_inequality: f64,
    pub max_equality: f64,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.complementarity_ok && self.stationarity_ok && self.inequality_ok && self.equality_ok
    }

    /// Report for a solution that cannot be checked against the problem.
    fn unchecked() -> Self {
        Self {
            complementarity_ok: false,
            stationarity_ok: false,
            inequality_ok: false,
            equality_ok: false,
            max_complementarity: f64::INFINITY,
            max_stationarity: f64::INFINITY,
            max_inequality: f64::INFINITY,
            max_equality: f64::INFINITY,
        }
    }
}

/// Check complementarity, stationarity and feasibility of `solution`.
///
/// `solution` holds one iterate per instance of `problem`. The inequality
/// check uses the solver's own convention `s = h - G z + F lam`. A problem
/// that fails validation, or a solution whose batch size or vector lengths
/// do not match it, fails every check.
pub fn verify_lcp(problem: &LcpProblem, solution: &[Iterate], tol: f64) -> VerifyReport {
    let dims = match problem.validate() {
        Ok(dims) => dims,
        Err(e) => {
            warn!("LCP verify: problem is invalid: {}", e);
            return VerifyReport::unchecked();
        }
    };
    if solution.len() != dims.batch {
        warn!(
            "LCP verify: solution has {} instances, problem has {}",
            solution.len(),
            dims.batch
        );
        return VerifyReport::unchecked();
    }
    if let Some(i) = solution.iter().position(|it| {
        it.z.len() != dims.nz || it.s.len() != dims.nineq || it.lam.len() != dims.nineq || it.nu.len() != dims.neq
    }) {
        warn!("LCP verify: instance {} has vectors of the wrong length", i);
        return VerifyReport::unchecked();
    }

    let batch = dims.batch;

    let lams: Vec<DVector<f64>> = solution.iter().map(|it| it.lam.clone()).collect();
    let gt_lam = batch_tr_mul((0..batch).map(|i| problem.G.get(i)), &lams);

    let mut max_comp = 0.0_f64;
    let mut max_stat = 0.0_f64;
    let mut max_ineq = 0.0_f64;
    let mut min_sign = 0.0_f64;
    let mut max_eq = 0.0_f64;

    for (i, it) in solution.iter().enumerate() {
        let comp = it
            .s
            .iter()
            .zip(it.lam.iter())
            .map(|(s, l)| (s * l).abs())
            .fold(0.0, f64::max);
        max_comp = max_comp.max(comp);

        let mut stat = problem.Q.get(i) * &it.z + problem.p.get(i) + &gt_lam[i];
        if let Some(a) = &problem.A {
            stat += a.get(i).tr_mul(&it.nu);
        }
        max_stat = max_stat.max(stat.norm());

        let ineq = problem.G.get(i) * &it.z + &it.s - problem.F.get(i) * &it.lam - problem.h.get(i);
        max_ineq = max_ineq.max(ineq.norm());
        min_sign = min_sign
            .min(min_slice(it.s.as_slice()))
            .min(min_slice(it.lam.as_slice()));

        if let (Some(a), Some(b)) = (&problem.A, &problem.b) {
            let eq = a.get(i) * &it.z - b.get(i);
            max_eq = max_eq.max(eq.norm());
        }
    }

    let report = VerifyReport {
        complementarity_ok: max_comp < tol,
        stationarity_ok: max_stat < tol,
        inequality_ok: max_ineq < tol && min_sign >= -tol,
        equality_ok: max_eq < tol,
        max_complementarity: max_comp,
        max_stationarity: max_stat,
        max_inequality: max_ineq,
        max_equality: max_eq,
    };

    if !report.complementarity_ok {
        warn!("LCP verify: complementarity violated, max |s ∘ lam| = {:.3e}", max_comp);
    }
    if !report.stationarity_ok {
        warn!("LCP verify: stationarity residual {:.3e}", max_stat);
    }
    if !report.inequality_ok {
        warn!(
            "LCP verify: inequality residual {:.3e}, most negative s/lam entry {:.3e}",
            max_ineq, min_sign
        );
    }
    if !report.equality_ok {
        warn!("LCP verify: equality residual {:.3e}", max_eq);
    }

    report
}
