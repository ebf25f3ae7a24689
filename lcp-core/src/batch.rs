//! Batch parameter handling.
//!
//! Every problem parameter is either supplied once per instance or once for
//! the whole batch. The tag travels with the value so the solver never has to
//! infer sharing from shapes, and so the backward pass knows which gradients
//! to reduce over the batch dimension.

use nalgebra::{DMatrix, DVector};

use crate::error::{LcpError, LcpResult};

/// A parameter that is either per-instance or shared across the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Param<T> {
    /// One value per batch instance
    PerInstance(Vec<T>),
    /// A single value broadcast to every instance
    Shared(T),
}

impl<T> Param<T> {
    /// Whether this value is broadcast (its gradient gets batch-reduced).
    #[inline]
    pub fn is_shared(&self) -> bool {
        matches!(self, Param::Shared(_))
    }

    /// Number of instances, or None when shared.
    #[inline]
    pub fn batch_len(&self) -> Option<usize> {
        match self {
            Param::PerInstance(v) => Some(v.len()),
            Param::Shared(_) => None,
        }
    }

    /// Batch-expanded view of instance `i`.
    ///
    /// Shared values return the same reference for every index. Panics when a
    /// per-instance parameter is indexed past the batch; validated problems
    /// never do this.
    #[inline]
    pub fn get(&self, i: usize) -> &T {
        match self {
            Param::PerInstance(v) => &v[i],
            Param::Shared(t) => t,
        }
    }

    /// First stored value (used to read dimensions).
    pub fn first(&self) -> Option<&T> {
        match self {
            Param::PerInstance(v) => v.first(),
            Param::Shared(t) => Some(t),
        }
    }

    /// Every distinct stored value.
    pub fn values(&self) -> std::slice::Iter<'_, T> {
        match self {
            Param::PerInstance(v) => v.iter(),
            Param::Shared(t) => std::slice::from_ref(t).iter(),
        }
    }

    /// Package per-instance gradients in the shape of this parameter.
    ///
    /// Shared parameters get the batch mean; per-instance parameters keep one
    /// gradient per instance.
    pub fn gradient_like(&self, grads: Vec<T>) -> Param<T>
    where
        T: BatchMean,
    {
        match self {
            Param::PerInstance(_) => Param::PerInstance(grads),
            Param::Shared(_) => match T::batch_mean(grads) {
                Some(mean) => Param::Shared(mean),
                None => Param::PerInstance(Vec::new()),
            },
        }
    }
}

/// Determine the batch size from the per-instance lengths of all parameters.
///
/// Shared parameters (`None`) are ignored. Per-instance parameters must agree
/// and be non-empty. A batch where everything is shared has size 1.
pub fn resolve_batch_size(lens: &[(&'static str, Option<usize>)]) -> LcpResult<usize> {
    let mut batch: Option<(&'static str, usize)> = None;

    for &(what, len) in lens {
        let Some(len) = len else { continue };
        if len == 0 {
            return Err(LcpError::EmptyBatch(what));
        }
        match batch {
            None => batch = Some((what, len)),
            Some((_, expected)) if expected != len => {
                return Err(LcpError::BatchSizeMismatch { what, expected, found: len });
            }
            Some(_) => {}
        }
    }

    Ok(batch.map_or(1, |(_, n)| n))
}

/// Mean reduction over the batch dimension.
pub trait BatchMean: Sized {
    /// Average of `items`, or None for an empty batch.
    fn batch_mean(items: Vec<Self>) -> Option<Self>;
}

impl BatchMean for DMatrix<f64> {
    fn batch_mean(items: Vec<Self>) -> Option<Self> {
        let n = items.len();
        let mut iter = items.into_iter();
        let mut acc = iter.next()?;
        for m in iter {
            acc += &m;
        }
        acc /= n as f64;
        Some(acc)
    }
}

impl BatchMean for DVector<f64> {
    fn batch_mean(items: Vec<Self>) -> Option<Self> {
        let n = items.len();
        let mut iter = items.into_iter();
        let mut acc = iter.next()?;
        for v in iter {
            acc += &v;
        }
        acc /= n as f64;
        Some(acc)
    }
}
