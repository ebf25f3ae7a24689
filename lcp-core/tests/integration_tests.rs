//! End-to-end integration tests for the batched LCP solver.
//!
//! These tests run the full forward pipeline (validation, block
//! factorization, interior point iteration) and the session/function
//! wrappers on small problems with known answers.

use lcp_core::pdipm::Residuals;
use lcp_core::{
    forward, verify_lcp, ForwardStatus, LcpError, LcpFunction, LcpProblem, LcpSettings, Param,
    Verbosity, DEFAULT_VERIFY_TOL,
};
use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn settings() -> LcpSettings {
    LcpSettings {
        max_iter: 50,
        verbose: Verbosity::Silent,
        ..LcpSettings::default()
    }
}

/// min 1/2 |z|^2 + z1 + z2  s.t. z >= 0
fn orthant_problem(batch: usize) -> LcpProblem {
    LcpProblem::new(
        Param::Shared(DMatrix::identity(2, 2)),
        Param::PerInstance(vec![DVector::from_vec(vec![1.0, 1.0]); batch]),
        Param::Shared(-DMatrix::identity(2, 2)),
        Param::Shared(DVector::zeros(2)),
        Param::PerInstance(vec![DMatrix::zeros(2, 2); batch]),
    )
}

/// Random strongly convex instance with a monotone coupling and a known
/// interior point `(z0, s0, lam0)`.
fn random_problem(rng: &mut ChaCha8Rng, batch: usize, nz: usize, nineq: usize, neq: usize) -> LcpProblem {
    let mut q = Vec::new();
    let mut p = Vec::new();
    let mut g = Vec::new();
    let mut h = Vec::new();
    let mut f = Vec::new();
    let mut a = Vec::new();
    let mut b = Vec::new();

    for _ in 0..batch {
        let m = DMatrix::from_fn(nz, nz, |_, _| rng.gen_range(-1.0..1.0));
        let gi = DMatrix::from_fn(nineq, nz, |_, _| rng.gen_range(-1.0..1.0));
        let n = DMatrix::from_fn(nineq, nineq, |_, _| rng.gen_range(-0.3..0.3));
        let z0 = DVector::from_fn(nz, |_, _| rng.gen_range(-1.0..1.0));
        let s0 = DVector::from_fn(nineq, |_, _| rng.gen_range(0.5..2.0));
        let lam0 = DVector::from_fn(nineq, |_, _| rng.gen_range(0.0..1.0));
        let ai = DMatrix::from_fn(neq, nz, |_, _| rng.gen_range(-1.0..1.0));

        let fi = n.transpose() * &n;
        q.push(m.transpose() * &m + DMatrix::identity(nz, nz));
        p.push(DVector::from_fn(nz, |_, _| rng.gen_range(-2.0..2.0)));
        h.push(&gi * &z0 + s0 - &fi * lam0);
        b.push(&ai * &z0);
        g.push(gi);
        f.push(fi);
        a.push(ai);
    }

    let prob = LcpProblem::new(
        Param::PerInstance(q),
        Param::PerInstance(p),
        Param::PerInstance(g),
        Param::PerInstance(h),
        Param::PerInstance(f),
    );
    if neq > 0 {
        prob.with_equalities(Param::PerInstance(a), Param::PerInstance(b))
    } else {
        prob
    }
}

/// Copy of instance `i` as a batch of one.
fn single_instance(prob: &LcpProblem, i: usize) -> LcpProblem {
    let one = |m: &Param<DMatrix<f64>>| Param::Shared(m.get(i).clone());
    let one_v = |v: &Param<DVector<f64>>| Param::Shared(v.get(i).clone());
    let single = LcpProblem::new(one(&prob.Q), one_v(&prob.p), one(&prob.G), one_v(&prob.h), one(&prob.F));
    match (&prob.A, &prob.b) {
        (Some(a), Some(b)) => single.with_equalities(one(a), one_v(b)),
        _ => single,
    }
}

#[test]
fn test_orthant_projection_end_to_end() {
    // Unconstrained minimizer z = -p violates z >= 0, so z* clips to 0
    let session = forward(orthant_problem(1), &settings()).unwrap();
    let z = &session.z()[0];

    println!("z* = {:?}, info = {:?}", z, session.info());
    assert!(z.norm() < 1e-6, "expected z* ≈ 0, got {:?}", z);
    assert_eq!(session.info().status, ForwardStatus::Converged);

    // Multipliers absorb the cost: lam* = p
    let lam = &session.solution()[0].lam;
    assert!((lam - DVector::from_vec(vec![1.0, 1.0])).norm() < 1e-6);

    let report = session.verify(DEFAULT_VERIFY_TOL);
    assert!(report.passed(), "verify failed: {:?}", report);
}

#[test]
fn test_orthant_projection_default_settings() {
    // Same problem under the library defaults: eps 1e-12, 10 iterations
    let settings = LcpSettings {
        verbose: Verbosity::Silent,
        ..LcpSettings::default()
    };
    let session = forward(orthant_problem(1), &settings).unwrap();
    let z = &session.z()[0];

    println!("z* = {:?}, info = {:?}", z, session.info());
    assert_eq!(session.info().status, ForwardStatus::Converged);
    assert!(session.info().iterations <= settings.max_iter);
    assert!(session.info().max_residual() < settings.eps);
    assert!(z.norm() < 1e-8, "expected z* ≈ 0, got {:?}", z);

    let report = session.verify(DEFAULT_VERIFY_TOL);
    assert!(report.passed(), "verify failed: {:?}", report);
}

#[test]
fn test_random_batch_default_settings() {
    let mut rng = ChaCha8Rng::seed_from_u64(2718);
    let prob = random_problem(&mut rng, 8, 6, 10, 0);
    let settings = LcpSettings {
        verbose: Verbosity::Silent,
        ..LcpSettings::default()
    };
    let session = forward(prob, &settings).unwrap();

    let report = session.verify(DEFAULT_VERIFY_TOL);
    assert!(report.passed(), "verify failed: {:?}, info = {:?}", report, session.info());
}

#[test]
fn test_infeasible_problem_stops_on_stall() {
    // z >= 1 and z <= -1 cannot both hold
    let prob = LcpProblem::new(
        Param::Shared(DMatrix::identity(1, 1)),
        Param::Shared(DVector::zeros(1)),
        Param::Shared(DMatrix::from_column_slice(2, 1, &[-1.0, 1.0])),
        Param::Shared(DVector::from_element(2, -1.0)),
        Param::PerInstance(vec![DMatrix::zeros(2, 2)]),
    );
    let settings = LcpSettings { max_iter: 200, ..settings() };
    let session = forward(prob.clone(), &settings).unwrap();

    let info = session.info().clone();
    println!("info = {:?}", info);
    assert_eq!(info.status, ForwardStatus::NotImproved);
    assert!(info.iterations < settings.max_iter);
    assert!(info.best_residual[0].is_finite());
    assert!(info.best_residual[0] > settings.eps);

    // The returned iterate is the best one seen, not the last
    let best = &session.solution()[0];
    assert!(best.z.iter().chain(best.lam.iter()).all(|v| v.is_finite()));
    let measure = Residuals::compute(&prob, 0, best).measure;
    assert!((measure - info.best_residual[0]).abs() <= 1e-12 * info.best_residual[0]);
    assert!(!session.verify(DEFAULT_VERIFY_TOL).passed());

    // Gradients are still produced at the best iterate
    let grads = session.backward(&[DVector::from_element(1, 1.0)]).unwrap();
    assert!(grads.p.values().all(|v| v.iter().all(|x| x.is_finite())));
    assert!(grads.Q.values().all(|m| m.iter().all(|x| x.is_finite())));
}

#[test]
fn test_random_batch_converges() {
    let mut rng = ChaCha8Rng::seed_from_u64(12345);
    let prob = random_problem(&mut rng, 6, 4, 5, 0);
    let session = forward(prob, &settings()).unwrap();

    let info = session.info();
    println!("status = {}, iters = {}, resid = {:.3e}", info.status, info.iterations, info.max_residual());
    assert!(info.max_residual() < 1e-8);
    assert!(info.regularized.iter().all(|&r| !r));

    let report = session.verify(DEFAULT_VERIFY_TOL);
    assert!(report.passed(), "verify failed: {:?}", report);
}

#[test]
fn test_equality_constraints() {
    let mut rng = ChaCha8Rng::seed_from_u64(777);
    let prob = random_problem(&mut rng, 3, 4, 3, 2);
    let session = forward(prob, &settings()).unwrap();

    let report = session.verify(DEFAULT_VERIFY_TOL);
    assert!(report.equality_ok, "equality residual {:.3e}", report.max_equality);
    assert!(report.passed(), "verify failed: {:?}", report);
    assert!(session.solution().iter().all(|it| it.nu.len() == 2));
}

#[test]
fn test_equality_only_problem() {
    // min 1/2 |z|^2  s.t. z1 + z2 = 2  =>  z = [1, 1]
    let prob = LcpProblem::new(
        Param::Shared(DMatrix::identity(2, 2)),
        Param::Shared(DVector::zeros(2)),
        Param::Shared(DMatrix::zeros(0, 2)),
        Param::Shared(DVector::zeros(0)),
        Param::Shared(DMatrix::zeros(0, 0)),
    )
    .with_equalities(
        Param::Shared(DMatrix::from_row_slice(1, 2, &[1.0, 1.0])),
        Param::Shared(DVector::from_element(1, 2.0)),
    );

    let session = forward(prob, &settings()).unwrap();
    let z = &session.z()[0];
    assert!((z - DVector::from_vec(vec![1.0, 1.0])).norm() < 1e-8, "z = {:?}", z);
    assert_eq!(session.info().status, ForwardStatus::Converged);
}

#[test]
fn test_batch_independence() {
    let mut rng = ChaCha8Rng::seed_from_u64(4242);
    let prob = random_problem(&mut rng, 4, 3, 4, 1);

    let batched = forward(prob.clone(), &settings()).unwrap().z();
    for (i, z_batch) in batched.iter().enumerate() {
        let alone = forward(single_instance(&prob, i), &settings()).unwrap().z();
        let diff = (z_batch - &alone[0]).norm();
        assert!(diff < 1e-6, "instance {} differs by {:.3e}", i, diff);
    }
}

#[test]
fn test_parallel_matches_sequential() {
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let prob = random_problem(&mut rng, 8, 3, 4, 0);

    let seq = LcpSettings { min_batch_for_parallel: usize::MAX, ..settings() };
    let par = LcpSettings { min_batch_for_parallel: 1, ..settings() };

    let z_seq = forward(prob.clone(), &seq).unwrap().z();
    let z_par = forward(prob, &par).unwrap().z();
    for (a, b) in z_seq.iter().zip(z_par.iter()) {
        assert!((a - b).norm() < 1e-12);
    }
}

#[test]
fn test_singular_q_is_regularized() {
    // min 1/2 z1^2 - z1 + z2  s.t. z >= 0  =>  z = [1, 0]
    // Q is only semidefinite, so its factorization gets a diagonal shift
    let prob = LcpProblem::new(
        Param::Shared(DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 0.0])),
        Param::Shared(DVector::from_vec(vec![-1.0, 1.0])),
        Param::Shared(-DMatrix::identity(2, 2)),
        Param::Shared(DVector::zeros(2)),
        Param::PerInstance(vec![DMatrix::zeros(2, 2)]),
    );
    let session = forward(prob, &settings()).unwrap();
    assert!(session.info().regularized[0]);

    let z = &session.z()[0];
    assert!((z - DVector::from_vec(vec![1.0, 0.0])).norm() < 1e-5, "z = {:?}", z);
}

#[test]
fn test_no_constraints_rejected() {
    let prob = LcpProblem::new(
        Param::Shared(DMatrix::identity(2, 2)),
        Param::Shared(DVector::zeros(2)),
        Param::Shared(DMatrix::zeros(0, 2)),
        Param::Shared(DVector::zeros(0)),
        Param::Shared(DMatrix::zeros(0, 0)),
    );
    assert_eq!(forward(prob, &settings()).unwrap_err(), LcpError::NoConstraints);
}

#[test]
fn test_batch_size_mismatch_rejected() {
    let mut prob = orthant_problem(3);
    prob.h = Param::PerInstance(vec![DVector::zeros(2); 2]);
    assert!(matches!(
        forward(prob, &settings()),
        Err(LcpError::BatchSizeMismatch { what: "h", expected: 3, found: 2 })
    ));
}

#[test]
fn test_invalid_settings_rejected() {
    let bad = LcpSettings { max_iter: 0, ..settings() };
    assert!(matches!(forward(orthant_problem(1), &bad), Err(LcpError::InvalidSettings(_))));
}

#[test]
fn test_verifier_flags_perturbed_solution() {
    let prob = orthant_problem(2);
    let session = forward(prob.clone(), &settings()).unwrap();

    let mut sol = session.solution().to_vec();
    sol[1].z[0] += 0.1;
    let report = verify_lcp(&prob, &sol, DEFAULT_VERIFY_TOL);
    assert!(!report.stationarity_ok);
    assert!(!report.inequality_ok);
    assert!(!report.passed());
}

#[test]
fn test_function_wrapper_is_single_use() {
    let mut func = LcpFunction::new(settings());
    assert_eq!(
        func.backward(&[DVector::zeros(2)]).unwrap_err(),
        LcpError::NoForwardState
    );

    let z = func.forward(orthant_problem(2)).unwrap();
    assert_eq!(z.len(), 2);
    assert!(func.info().is_some());

    let dl_dz = vec![DVector::from_element(2, 1.0); 2];
    assert!(func.backward(&dl_dz).is_ok());
    assert!(func.info().is_none());
    assert_eq!(func.backward(&dl_dz).unwrap_err(), LcpError::NoForwardState);
}
