//! Step-length and centering rules for the predictor-corrector step.

use nalgebra::DVector;

/// Largest `alpha` with `v + alpha * dv >= 0`, taken over the entries where
/// `dv < 0`. Returns 1 when no entry moves toward the boundary.
///
/// The result is not capped at 1; callers apply their own fraction and cap.
pub fn step_to_boundary(v: &DVector<f64>, dv: &DVector<f64>) -> f64 {
    let alpha = v
        .iter()
        .zip(dv.iter())
        .filter(|&(_, &d)| d < 0.0)
        .map(|(&x, &d)| -x / d)
        .fold(f64::INFINITY, f64::min);

    if alpha.is_finite() {
        alpha
    } else {
        1.0
    }
}

/// Affine step length: the full step toward the nearer boundary, capped at 1.
pub fn affine_step(s: &DVector<f64>, ds: &DVector<f64>, lam: &DVector<f64>, dlam: &DVector<f64>) -> f64 {
    step_to_boundary(lam, dlam).min(step_to_boundary(s, ds)).min(1.0)
}

/// Combined step length with a fraction-to-boundary safety factor.
pub fn damped_step(
    s: &DVector<f64>,
    ds: &DVector<f64>,
    lam: &DVector<f64>,
    dlam: &DVector<f64>,
    fraction: f64,
) -> f64 {
    (fraction * step_to_boundary(lam, dlam).min(step_to_boundary(s, ds))).min(1.0)
}

/// Mehrotra centering parameter `sigma = (gap_aff / gap)^3`.
///
/// Zero when there is no complementarity gap to center (no inequality rows,
/// or an exactly complementary iterate).
pub fn centering_sigma(
    s: &DVector<f64>,
    ds: &DVector<f64>,
    lam: &DVector<f64>,
    dlam: &DVector<f64>,
    alpha: f64,
) -> f64 {
    let gap = s.dot(lam);
    if !(gap > 0.0) {
        return 0.0;
    }

    let gap_aff: f64 = s
        .iter()
        .zip(ds.iter())
        .zip(lam.iter().zip(dlam.iter()))
        .map(|((&si, &dsi), (&li, &dli))| (si + alpha * dsi) * (li + alpha * dli))
        .sum();

    let ratio = gap_aff / gap;
    if ratio.is_finite() {
        ratio.powi(3)
    } else {
        0.0
    }
}
