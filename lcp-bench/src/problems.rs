//! Random batched contact-style LCPs.

use lcp_core::{LcpProblem, Param};
use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Problem sizes for one generated batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchShape {
    pub batch: usize,
    pub nz: usize,
    pub nineq: usize,
    pub neq: usize,
}

/// Generate a batch of contact-style problems:
///
/// ```text
/// Q = M + J^T J / nz       (mass matrix plus a damping term)
/// G = -contact Jacobian    (non-penetration / friction rows)
/// F = diag(compliance) + skew friction coupling
/// ```
///
/// `h` (and `b`) are built from a known interior point, so every instance is
/// feasible. Q, G and F are per instance; `p` is shared to exercise the
/// reduced gradient path.
pub fn contact_batch(shape: BatchShape, seed: u64) -> LcpProblem {
    let BatchShape { batch, nz, nineq, neq } = shape;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut qs = Vec::with_capacity(batch);
    let mut gs = Vec::with_capacity(batch);
    let mut hs = Vec::with_capacity(batch);
    let mut fs = Vec::with_capacity(batch);
    let mut as_ = Vec::with_capacity(batch);
    let mut bs = Vec::with_capacity(batch);

    for _ in 0..batch {
        let mass = DVector::from_fn(nz, |_, _| rng.gen_range(0.5..2.0));
        let damp = DMatrix::from_fn(nz, nz, |_, _| rng.gen_range(-1.0..1.0));
        let jac = DMatrix::from_fn(nineq, nz, |_, _| rng.gen_range(-1.0..1.0));
        let compliance = DVector::from_fn(nineq, |_, _| rng.gen_range(0.0..0.1));
        let skew = DMatrix::from_fn(nineq, nineq, |_, _| rng.gen_range(-0.05..0.05));
        let eq = DMatrix::from_fn(neq, nz, |_, _| rng.gen_range(-1.0..1.0));

        let z0 = DVector::from_fn(nz, |_, _| rng.gen_range(-1.0..1.0));
        let s0 = DVector::from_fn(nineq, |_, _| rng.gen_range(0.1..1.0));
        let lam0 = DVector::from_fn(nineq, |_, _| rng.gen_range(0.0..1.0));

        let q = DMatrix::from_diagonal(&mass) + damp.transpose() * &damp / nz as f64;
        let g = -jac;
        let f = DMatrix::from_diagonal(&compliance) + &skew - skew.transpose();

        hs.push(&g * &z0 + s0 - &f * lam0);
        bs.push(&eq * &z0);
        qs.push(q);
        gs.push(g);
        fs.push(f);
        as_.push(eq);
    }

    let p = DVector::from_fn(nz, |_, _| rng.gen_range(-1.0..1.0));
    let prob = LcpProblem::new(
        Param::PerInstance(qs),
        Param::Shared(p),
        Param::PerInstance(gs),
        Param::PerInstance(hs),
        Param::PerInstance(fs),
    );

    if neq > 0 {
        prob.with_equalities(Param::PerInstance(as_), Param::PerInstance(bs))
    } else {
        prob
    }
}
