//! Error types for the batched LCP solver.
//!
//! Only hard precondition failures are errors. Soft outcomes such as a
//! regularized factorization or an unconverged solve are reported through
//! [`crate::ForwardInfo`] instead.

use thiserror::Error;

/// Errors that can occur while solving or differentiating a batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LcpError {
    /// Neither inequality nor equality rows were supplied.
    #[error("Problem has no constraints (nineq + neq must be positive)")]
    NoConstraints,

    /// A matrix or vector does not have the dimensions implied by the others.
    #[error("Dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: String,
        found: String,
    },

    /// Two per-instance parameters disagree on the batch size.
    #[error("Batch size mismatch for {what}: expected {expected}, found {found}")]
    BatchSizeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// A per-instance parameter was given with zero instances.
    #[error("Per-instance parameter {0} has an empty batch")]
    EmptyBatch(&'static str),

    /// Gradient w.r.t. a coupling matrix shared across the batch.
    #[error("Gradient w.r.t. a shared coupling matrix F is not supported")]
    SharedCouplingGradient,

    /// Backward was requested with no live forward state.
    #[error("No forward state available: call forward before backward (state is single-use)")]
    NoForwardState,

    /// Solver settings are out of range.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

/// Result type for LCP operations.
pub type LcpResult<T> = Result<T, LcpError>;
