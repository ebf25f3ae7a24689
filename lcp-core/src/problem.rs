//! Problem data structures and validation.
//!
//! This module defines the batched mixed LCP representation, the solver
//! settings, and the diagnostics record returned by a forward solve.

use std::fmt;

use nalgebra::{DMatrix, DVector};

use crate::batch::{resolve_batch_size, Param};
use crate::error::{LcpError, LcpResult};

/// A batch of mixed LCPs with slack/multiplier coupling.
///
/// Each instance `i` is the optimality system of
///
/// ```text
/// minimize    (1/2) z^T Q z + p^T z
/// subject to  s = h - G z + F lam,   s >= 0,  lam >= 0,  s ∘ lam = 0
///             A z = b
/// ```
///
/// with stationarity `Q z + p + G^T lam + A^T nu = 0`. When `F = 0` this is a
/// convex QP; a nonzero `F` couples the inequality multipliers back into the
/// slacks (contact and friction models).
///
/// # Dimensions
///
/// - `nz`: primal variables (columns of G)
/// - `nineq`: inequality rows (rows of G)
/// - `neq`: equality rows (rows of A, 0 when absent)
#[derive(Debug, Clone)]
#[allow(non_snake_case)] // Q, G, F, A are standard mathematical notation
pub struct LcpProblem {
    /// Cost matrix Q (nz × nz, symmetric PSD)
    pub Q: Param<DMatrix<f64>>,

    /// Linear cost p (nz)
    pub p: Param<DVector<f64>>,

    /// Inequality matrix G (nineq × nz)
    pub G: Param<DMatrix<f64>>,

    /// Inequality offset h (nineq)
    pub h: Param<DVector<f64>>,

    /// Equality matrix A (neq × nz). None disables equality handling.
    pub A: Option<Param<DMatrix<f64>>>,

    /// Equality offset b (neq). Present exactly when A is.
    pub b: Option<Param<DVector<f64>>>,

    /// Slack/multiplier coupling F (nineq × nineq)
    pub F: Param<DMatrix<f64>>,
}

/// Dimensions shared by every instance of a validated batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProblemDims {
    /// Number of instances
    pub batch: usize,
    /// Primal variables per instance
    pub nz: usize,
    /// Inequality rows per instance
    pub nineq: usize,
    /// Equality rows per instance
    pub neq: usize,
}

impl LcpProblem {
    /// Build a problem without equality constraints.
    #[allow(non_snake_case)]
    pub fn new(
        Q: Param<DMatrix<f64>>,
        p: Param<DVector<f64>>,
        G: Param<DMatrix<f64>>,
        h: Param<DVector<f64>>,
        F: Param<DMatrix<f64>>,
    ) -> Self {
        Self { Q, p, G, h, A: None, b: None, F }
    }

    /// Attach equality constraints `A z = b`.
    #[allow(non_snake_case)]
    pub fn with_equalities(mut self, A: Param<DMatrix<f64>>, b: Param<DVector<f64>>) -> Self {
        self.A = Some(A);
        self.b = Some(b);
        self
    }

    /// Number of primal variables, read from the first `Q`.
    pub fn num_vars(&self) -> usize {
        self.Q.first().map_or(0, |q| q.nrows())
    }

    /// Number of inequality rows, read from the first `G`.
    pub fn num_ineq(&self) -> usize {
        self.G.first().map_or(0, |g| g.nrows())
    }

    /// Number of equality rows (0 when no equality block is attached).
    pub fn num_eq(&self) -> usize {
        self.A
            .as_ref()
            .and_then(Param::first)
            .map_or(0, |a| a.nrows())
    }

    /// Resolve the batch size from the per-instance parameters.
    pub fn batch_size(&self) -> LcpResult<usize> {
        resolve_batch_size(&[
            ("Q", self.Q.batch_len()),
            ("p", self.p.batch_len()),
            ("G", self.G.batch_len()),
            ("h", self.h.batch_len()),
            ("A", self.A.as_ref().and_then(Param::batch_len)),
            ("b", self.b.as_ref().and_then(Param::batch_len)),
            ("F", self.F.batch_len()),
        ])
    }

    /// Validate shapes across every instance and return the batch dimensions.
    ///
    /// Rejects a problem with no constraints before any numeric work.
    pub fn validate(&self) -> LcpResult<ProblemDims> {
        let batch = self.batch_size()?;
        let nz = self.num_vars();
        let nineq = self.num_ineq();

        let neq = match (&self.A, &self.b) {
            (Some(_), Some(_)) => self.num_eq(),
            (None, None) => 0,
            (Some(_), None) => {
                return Err(mismatch("b", "neq-vector with A", "missing"));
            }
            (None, Some(_)) => {
                return Err(mismatch("A", "neq×nz matrix with b", "missing"));
            }
        };

        if nineq + neq == 0 {
            return Err(LcpError::NoConstraints);
        }

        for q in self.Q.values() {
            check_mat("Q", q, nz, nz)?;
        }
        for p in self.p.values() {
            check_vec("p", p, nz)?;
        }
        for g in self.G.values() {
            check_mat("G", g, nineq, nz)?;
        }
        for h in self.h.values() {
            check_vec("h", h, nineq)?;
        }
        for f in self.F.values() {
            check_mat("F", f, nineq, nineq)?;
        }
        if let (Some(a), Some(b)) = (&self.A, &self.b) {
            for a in a.values() {
                check_mat("A", a, neq, nz)?;
            }
            for b in b.values() {
                check_vec("b", b, neq)?;
            }
        }

        Ok(ProblemDims { batch, nz, nineq, neq })
    }
}

fn mismatch(what: &'static str, expected: impl Into<String>, found: impl Into<String>) -> LcpError {
    LcpError::DimensionMismatch {
        what,
        expected: expected.into(),
        found: found.into(),
    }
}

fn check_mat(what: &'static str, m: &DMatrix<f64>, rows: usize, cols: usize) -> LcpResult<()> {
    if m.nrows() != rows || m.ncols() != cols {
        return Err(mismatch(
            what,
            format!("{}×{}", rows, cols),
            format!("{}×{}", m.nrows(), m.ncols()),
        ));
    }
    Ok(())
}

fn check_vec(what: &'static str, v: &DVector<f64>, len: usize) -> LcpResult<()> {
    if v.len() != len {
        return Err(mismatch(what, len.to_string(), v.len().to_string()));
    }
    Ok(())
}

/// Logging level, following the integer convention `-1 / 0 / 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// No output at all
    #[default]
    Silent,
    /// Warn about inaccurate solutions and regularized factorizations
    Warnings,
    /// Per-iteration trace in addition to warnings
    Iterations,
}

impl Verbosity {
    /// Map the integer level (`<0` silent, `0` warnings, `>=1` iterations).
    pub fn from_level(level: i32) -> Self {
        match level {
            l if l < 0 => Verbosity::Silent,
            0 => Verbosity::Warnings,
            _ => Verbosity::Iterations,
        }
    }

    #[inline]
    pub fn warnings(self) -> bool {
        self >= Verbosity::Warnings
    }

    #[inline]
    pub fn iterations(self) -> bool {
        self >= Verbosity::Iterations
    }
}

/// Solver strategy. Exactly one strategy is implemented; new ones are
/// added as variants and dispatched in [`crate::session::forward`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverStrategy {
    /// Batched primal-dual interior point with an LU block factorization
    #[default]
    PdipmBatched,
}

/// Solver settings and parameters.
#[derive(Debug, Clone)]
pub struct LcpSettings {
    /// Convergence threshold on the combined residual measure
    pub eps: f64,

    /// Maximum number of Newton iterations
    pub max_iter: usize,

    /// Stop after this many consecutive iterations without improvement
    pub not_improved_lim: usize,

    /// Logging level
    pub verbose: Verbosity,

    /// Solver strategy
    pub strategy: SolverStrategy,

    /// Diagonal shift used when Q (or a Schur block) is numerically singular
    pub q_regularization: f64,

    /// Minimum batch size before instances are processed with rayon
    pub min_batch_for_parallel: usize,
}

impl Default for LcpSettings {
    fn default() -> Self {
        // LCP_VERBOSE=-1|0|1 overrides the silent default
        let verbose = std::env::var("LCP_VERBOSE")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .map(Verbosity::from_level)
            .unwrap_or_default();

        Self {
            eps: 1e-12,
            max_iter: 10,
            not_improved_lim: 3,
            verbose,
            strategy: SolverStrategy::PdipmBatched,
            q_regularization: 1e-8,
            min_batch_for_parallel: 4,
        }
    }
}

impl LcpSettings {
    /// Check that every knob is in range.
    pub fn validate(&self) -> LcpResult<()> {
        if !(self.eps > 0.0) {
            return Err(LcpError::InvalidSettings(format!("eps must be positive, got {}", self.eps)));
        }
        if self.max_iter == 0 {
            return Err(LcpError::InvalidSettings("max_iter must be at least 1".into()));
        }
        if self.not_improved_lim == 0 {
            return Err(LcpError::InvalidSettings("not_improved_lim must be at least 1".into()));
        }
        if !(self.q_regularization >= 0.0) {
            return Err(LcpError::InvalidSettings(format!(
                "q_regularization must be non-negative, got {}",
                self.q_regularization
            )));
        }
        Ok(())
    }

    /// Whether a batch of this size should be processed in parallel.
    #[inline]
    pub fn parallel_for(&self, batch: usize) -> bool {
        batch >= self.min_batch_for_parallel && rayon::current_num_threads() > 1
    }
}

/// Why the forward iteration stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardStatus {
    /// Every instance reached the residual tolerance
    Converged,

    /// No instance improved for `not_improved_lim` iterations
    NotImproved,

    /// `max_iter` iterations were taken
    MaxIterations,

    /// The barrier parameter blew up for every instance
    Diverged,
}

impl fmt::Display for ForwardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardStatus::Converged => write!(f, "Converged"),
            ForwardStatus::NotImproved => write!(f, "NotImproved"),
            ForwardStatus::MaxIterations => write!(f, "MaxIterations"),
            ForwardStatus::Diverged => write!(f, "Diverged"),
        }
    }
}

/// Diagnostics of a forward solve.
#[derive(Debug, Clone)]
pub struct ForwardInfo {
    /// Newton iterations performed (batch-wide)
    pub iterations: usize,

    /// Termination reason
    pub status: ForwardStatus,

    /// Best combined residual measure reached per instance
    pub best_residual: Vec<f64>,

    /// Per instance: whether Q or the A-Schur block needed regularization
    pub regularized: Vec<bool>,
}

impl ForwardInfo {
    /// Largest per-instance residual measure.
    pub fn max_residual(&self) -> f64 {
        self.best_residual.iter().copied().fold(0.0, f64::max)
    }
}
