//! Batched differentiable mixed LCP solver.
//!
//! Solves batches of mixed linear complementarity problems with a
//! slack/multiplier coupling term (contact and friction models) and
//! differentiates the solution with respect to every problem parameter.
//!
//! # Algorithm
//!
//! - **Forward**: a primal-dual interior point method with Mehrotra
//!   predictor-corrector steps, run in lock-step over the batch
//! - **Block factorization**: Q and the equality Schur block are factored
//!   once per solve; only the weighted inequality block is re-factored per
//!   Newton iteration
//! - **Backward**: implicit differentiation of the optimality conditions,
//!   one adjoint KKT solve per batch and closed-form outer products
//!
//! # Example
//!
//! ```ignore
//! use lcp_core::{forward, LcpProblem, LcpSettings, Param};
//! use nalgebra::{DMatrix, DVector};
//!
//! // min 1/2 |z|^2 + z1 + z2  s.t. z >= 0
//! let prob = LcpProblem::new(
//!     Param::Shared(DMatrix::identity(2, 2)),
//!     Param::PerInstance(vec![DVector::from_element(2, 1.0); 8]),
//!     Param::Shared(-DMatrix::identity(2, 2)),
//!     Param::Shared(DVector::zeros(2)),
//!     Param::PerInstance(vec![DMatrix::zeros(2, 2); 8]),
//! );
//!
//! let session = forward(prob, &LcpSettings::default())?;
//! println!("z = {:?}", session.z());
//!
//! let grads = session.backward(&vec![DVector::from_element(2, 1.0); 8])?;
//! println!("dl/dp = {:?}", grads.p);
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod backward;
pub mod batch;
pub mod error;
pub mod linalg;
pub mod pdipm;
pub mod problem;
pub mod session;
pub mod util;
pub mod verify;

// Re-export main types
pub use backward::LcpGradients;
pub use batch::Param;
pub use error::{LcpError, LcpResult};
pub use pdipm::Iterate;
pub use problem::{
    ForwardInfo, ForwardStatus, LcpProblem, LcpSettings, ProblemDims, SolverStrategy, Verbosity,
};
pub use session::{forward, LcpFunction, LcpSession};
pub use verify::{verify_lcp, VerifyReport, DEFAULT_VERIFY_TOL};
