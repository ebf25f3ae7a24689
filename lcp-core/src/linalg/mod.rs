//! Linear algebra layer.
//!
//! Dense LU factorizations and the batched KKT block factorizer.

pub mod dense;
pub mod kkt;
