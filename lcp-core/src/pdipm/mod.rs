//! Batched primal-dual interior point solver.
//!
//! Mehrotra predictor-corrector on the perturbed complementarity system
//! `s ∘ lam = sigma * mu`. All instances advance in lock-step: residuals,
//! weight re-factorization and termination are batch-wide, while the step
//! itself (directions, step length, centering) is computed per instance.

pub mod residuals;
pub mod step;

use log::{debug, info, warn};
use nalgebra::DVector;

use crate::linalg::kkt::{factor_kkt, BatchKkt, InstanceKkt, KktOrientation, KktRhs};
use crate::problem::{ForwardInfo, ForwardStatus, LcpProblem, LcpSettings};
use crate::util::{for_each_instance, map_instances, max_slice, min_slice};

pub use residuals::{Iterate, Residuals};
use step::{affine_step, centering_sigma, damped_step};

/// Fraction-to-boundary factor for the combined step.
const STEP_FRACTION: f64 = 0.999;

/// Barrier parameter beyond which every instance is considered divergent.
const DIVERGENCE_MU: f64 = 1e32;

/// Best iterates of every instance plus run diagnostics.
#[derive(Debug, Clone)]
pub struct PdipmOutput {
    pub iterates: Vec<Iterate>,
    pub info: ForwardInfo,
}

/// Run the forward solve on a pre-factored batch.
///
/// # Arguments
///
/// * `prob` - Validated problem batch
/// * `kkt` - Factorization from [`crate::linalg::kkt::pre_factor_kkt`], still
///   holding its unit-weight Schur block
/// * `settings` - Solver settings
///
/// # Returns
///
/// The best iterate seen per instance (lowest convergence measure), which is
/// only approximately optimal unless `info.status` is `Converged`.
pub fn solve_pdipm(prob: &LcpProblem, kkt: &mut BatchKkt, settings: &LcpSettings) -> PdipmOutput {
    let dims = kkt.dims();
    let parallel = settings.parallel_for(dims.batch);
    let verbose = settings.verbose;

    let regularized = kkt.invariant_regularized();
    let n_regularized = regularized.iter().filter(|&&r| r).count();
    if n_regularized > 0 && verbose.warnings() {
        warn!(
            "{} of {} instances have a singular Q or equality block; solved with regularization {:.1e}",
            n_regularized, dims.batch, settings.q_regularization
        );
    }

    let mut iterates = initial_point(prob, kkt, parallel);
    let mut best = iterates.clone();
    let mut best_resid = vec![f64::INFINITY; dims.batch];
    let mut not_improved = 0;
    let mut status = ForwardStatus::MaxIterations;
    let mut iterations = 0;

    if verbose.iterations() {
        info!(
            "LCP PDIPM: batch = {}, nz = {}, nineq = {}, neq = {}",
            dims.batch, dims.nz, dims.nineq, dims.neq
        );
        info!("{:>4} {:>12} {:>12} {:>12} {:>8}", "Iter", "Max Resid", "Best Resid", "Max μ", "Stall");
    }

    for iter in 0..settings.max_iter {
        iterations = iter + 1;

        let res: Vec<Residuals> =
            map_instances(dims.batch, parallel, |i| Residuals::compute(prob, i, &iterates[i]));

        let mut improved = false;
        for (i, r) in res.iter().enumerate() {
            if r.measure < best_resid[i] {
                best_resid[i] = r.measure;
                best[i].clone_from(&iterates[i]);
                improved = true;
            }
        }
        not_improved = if improved { 0 } else { not_improved + 1 };

        let mus: Vec<f64> = res.iter().map(|r| r.mu).collect();
        if verbose.iterations() {
            let measures: Vec<f64> = res.iter().map(|r| r.measure).collect();
            info!(
                "{:4} {:12.4e} {:12.4e} {:12.4e} {:8}",
                iter,
                max_slice(&measures),
                max_slice(&best_resid),
                max_slice(&mus),
                not_improved
            );
        }

        if not_improved == settings.not_improved_lim {
            status = ForwardStatus::NotImproved;
            break;
        }
        if max_slice(&best_resid) < settings.eps {
            status = ForwardStatus::Converged;
            break;
        }
        if min_slice(&mus) > DIVERGENCE_MU {
            status = ForwardStatus::Diverged;
            break;
        }

        let d: Vec<DVector<f64>> = iterates.iter().map(|it| it.lam.component_div(&it.s)).collect();
        let n_shifted = factor_kkt(kkt, &d, KktOrientation::Primal);
        if n_shifted > 0 {
            debug!("iter {}: {} weighted Schur blocks regularized", iter, n_shifted);
        }

        let factored: &BatchKkt = kkt;
        for_each_instance(&mut iterates, parallel, |i, it| {
            newton_step(factored.instance(i), it, &res[i]);
        });
    }

    let info = ForwardInfo {
        iterations,
        status,
        best_residual: best_resid,
        regularized,
    };

    if verbose.iterations() {
        info!("{}", "-".repeat(52));
        info!("Status: {}", info.status);
        info!("Iterations: {}", info.iterations);
    }
    if verbose.warnings() && info.max_residual() > 1.0 {
        warn!(
            "LCP solver returned an inaccurate solution: max residual {:.3e} ({})",
            info.max_residual(),
            info.status
        );
    }

    PdipmOutput { iterates: best, info }
}

/// Starting point from the unit-weight system with right-hand side
/// `(p, 0, -h, -b)`, shifted into the strict interior.
fn initial_point(prob: &LcpProblem, kkt: &BatchKkt, parallel: bool) -> Vec<Iterate> {
    let dims = kkt.dims();

    map_instances(dims.batch, parallel, |i| {
        let zero = DVector::zeros(dims.nineq);
        let neg_h = -prob.h.get(i);
        let neg_b = prob
            .b
            .as_ref()
            .map_or_else(|| DVector::zeros(0), |b| -b.get(i));

        let step = kkt.instance(i).solve(&KktRhs {
            rx: prob.p.get(i),
            rs: &zero,
            rlam: &neg_h,
            rnu: &neg_b,
        });

        let mut s = step.ds;
        let mut lam = step.dlam;
        shift_into_interior(&mut s);
        shift_into_interior(&mut lam);

        Iterate { z: step.dx, s, lam, nu: step.dnu }
    })
}

/// Shift `v` so its smallest entry is at least 1 when it is not already positive.
fn shift_into_interior(v: &mut DVector<f64>) {
    let m = min_slice(v.as_slice());
    if m.is_finite() && m <= 0.0 {
        v.add_scalar_mut(1.0 - m);
    }
}

/// One predictor-corrector step for a single instance.
///
/// The instance's KKT factorization must already carry `d = lam / s`.
fn newton_step(kkt: &InstanceKkt, it: &mut Iterate, r: &Residuals) {
    // Predictor
    let aff = kkt.solve(&KktRhs {
        rx: &r.rx,
        rs: &it.lam,
        rlam: &r.rlam,
        rnu: &r.rnu,
    });
    let alpha_aff = affine_step(&it.s, &aff.ds, &it.lam, &aff.dlam);
    let sigma = centering_sigma(&it.s, &aff.ds, &it.lam, &aff.dlam, alpha_aff);

    // Corrector
    let rs = (aff.ds.component_mul(&aff.dlam).add_scalar(-sigma * r.mu)).component_div(&it.s);
    let zero_x = DVector::zeros(it.z.len());
    let zero_z = DVector::zeros(it.s.len());
    let zero_y = DVector::zeros(it.nu.len());
    let cor = kkt.solve(&KktRhs {
        rx: &zero_x,
        rs: &rs,
        rlam: &zero_z,
        rnu: &zero_y,
    });

    let dx = aff.dx + cor.dx;
    let ds = aff.ds + cor.ds;
    let dlam = aff.dlam + cor.dlam;
    let dnu = aff.dnu + cor.dnu;

    let alpha = damped_step(&it.s, &ds, &it.lam, &dlam, STEP_FRACTION);

    it.z.axpy(alpha, &dx, 1.0);
    it.s.axpy(alpha, &ds, 1.0);
    it.lam.axpy(alpha, &dlam, 1.0);
    it.nu.axpy(alpha, &dnu, 1.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Param;
    use crate::linalg::kkt::pre_factor_kkt;
    use crate::problem::Verbosity;
    use nalgebra::DMatrix;

    fn settings() -> LcpSettings {
        LcpSettings {
            max_iter: 50,
            verbose: Verbosity::Silent,
            ..LcpSettings::default()
        }
    }

    #[test]
    fn test_shift_into_interior() {
        let mut v = DVector::from_vec(vec![-2.0, 0.5]);
        shift_into_interior(&mut v);
        assert_eq!(v, DVector::from_vec(vec![1.0, 3.5]));

        let mut v = DVector::from_vec(vec![0.1, 0.5]);
        shift_into_interior(&mut v);
        assert_eq!(v, DVector::from_vec(vec![0.1, 0.5]));
    }

    #[test]
    fn test_nonnegative_orthant_projection() {
        // min 1/2 |z - c|^2 s.t. z >= 0  =>  z = max(c, 0)
        let prob = LcpProblem::new(
            Param::Shared(DMatrix::identity(3, 3)),
            Param::Shared(DVector::from_vec(vec![-1.0, 2.0, -0.5])),
            Param::Shared(-DMatrix::identity(3, 3)),
            Param::Shared(DVector::zeros(3)),
            Param::Shared(DMatrix::zeros(3, 3)),
        );
        let settings = settings();
        let dims = prob.validate().unwrap();
        let mut kkt = pre_factor_kkt(&prob, dims, &settings);
        let out = solve_pdipm(&prob, &mut kkt, &settings);

        let z = &out.iterates[0].z;
        let expected = DVector::from_vec(vec![1.0, 0.0, 0.5]);
        assert!((z - expected).norm() < 1e-6, "z = {:?}", z);
        assert!(out.info.max_residual() < 1e-6);
        assert!(!out.info.regularized[0]);
    }

    #[test]
    fn test_iteration_limit_reports_status() {
        let prob = LcpProblem::new(
            Param::Shared(DMatrix::identity(2, 2)),
            Param::Shared(DVector::from_element(2, 1.0)),
            Param::Shared(-DMatrix::identity(2, 2)),
            Param::Shared(DVector::zeros(2)),
            Param::Shared(DMatrix::zeros(2, 2)),
        );
        let settings = LcpSettings { max_iter: 1, ..settings() };
        let dims = prob.validate().unwrap();
        let mut kkt = pre_factor_kkt(&prob, dims, &settings);
        let out = solve_pdipm(&prob, &mut kkt, &settings);

        assert_eq!(out.info.iterations, 1);
        assert_eq!(out.info.status, ForwardStatus::MaxIterations);
    }
}
