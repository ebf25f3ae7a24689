//! Forward/backward pairing.
//!
//! [`forward`] returns an [`LcpSession`] that owns everything the backward
//! pass needs: the problem, the KKT factorization and the converged iterates.
//! [`LcpSession::backward`] consumes it, so one forward call feeds at most
//! one backward call.

use nalgebra::DVector;

use crate::backward::{backward_pdipm, LcpGradients};
use crate::error::{LcpError, LcpResult};
use crate::linalg::kkt::{pre_factor_kkt, BatchKkt};
use crate::pdipm::{solve_pdipm, Iterate};
use crate::problem::{ForwardInfo, LcpProblem, LcpSettings, SolverStrategy};
use crate::verify::{verify_lcp, VerifyReport};

/// Solve a batch and keep the state needed for differentiation.
///
/// Validates the problem and settings before any numeric work.
pub fn forward(problem: LcpProblem, settings: &LcpSettings) -> LcpResult<LcpSession> {
    settings.validate()?;
    let dims = problem.validate()?;

    match settings.strategy {
        SolverStrategy::PdipmBatched => {
            let mut kkt = pre_factor_kkt(&problem, dims, settings);
            let out = solve_pdipm(&problem, &mut kkt, settings);
            Ok(LcpSession {
                problem,
                settings: settings.clone(),
                kkt,
                iterates: out.iterates,
                info: out.info,
            })
        }
    }
}

/// Converged state of one forward call.
///
/// Not `Clone`: the factorization is tied to exactly one backward call.
#[derive(Debug)]
pub struct LcpSession {
    problem: LcpProblem,
    settings: LcpSettings,
    kkt: BatchKkt,
    iterates: Vec<Iterate>,
    info: ForwardInfo,
}

impl LcpSession {
    /// Primal solution `z*` of every instance.
    pub fn z(&self) -> Vec<DVector<f64>> {
        self.iterates.iter().map(|it| it.z.clone()).collect()
    }

    /// Full primal-dual solution `(z*, s*, lam*, nu*)` of every instance.
    pub fn solution(&self) -> &[Iterate] {
        &self.iterates
    }

    pub fn info(&self) -> &ForwardInfo {
        &self.info
    }

    /// Run the diagnostic checks on the converged solution.
    pub fn verify(&self, tol: f64) -> VerifyReport {
        verify_lcp(&self.problem, &self.iterates, tol)
    }

    /// Gradients of a loss with respect to every parameter, given `dl/dz*`.
    ///
    /// Consumes the session.
    pub fn backward(mut self, dl_dz: &[DVector<f64>]) -> LcpResult<LcpGradients> {
        match self.settings.strategy {
            SolverStrategy::PdipmBatched => backward_pdipm(
                &self.problem,
                &mut self.kkt,
                &self.iterates,
                dl_dz,
                &self.settings,
            ),
        }
    }
}

/// Function-style wrapper holding at most one live session.
///
/// `forward` replaces any previous session; `backward` takes it, so a second
/// `backward` without a new `forward` fails with [`LcpError::NoForwardState`].
#[derive(Debug, Default)]
pub struct LcpFunction {
    settings: LcpSettings,
    session: Option<LcpSession>,
}

impl LcpFunction {
    pub fn new(settings: LcpSettings) -> Self {
        Self { settings, session: None }
    }

    /// Solve and remember the session. Returns `z*`.
    pub fn forward(&mut self, problem: LcpProblem) -> LcpResult<Vec<DVector<f64>>> {
        self.session = None;
        let session = forward(problem, &self.settings)?;
        let z = session.z();
        self.session = Some(session);
        Ok(z)
    }

    /// Diagnostics of the live session, if any.
    pub fn info(&self) -> Option<&ForwardInfo> {
        self.session.as_ref().map(LcpSession::info)
    }

    pub fn backward(&mut self, dl_dz: &[DVector<f64>]) -> LcpResult<LcpGradients> {
        let session = self.session.take().ok_or(LcpError::NoForwardState)?;
        session.backward(dl_dz)
    }
}
