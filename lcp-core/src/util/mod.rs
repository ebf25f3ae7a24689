//! Utility functions.
//!
//! Batch dispatch (sequential or rayon) and small numerical helpers.

use rayon::prelude::*;

/// Evaluate `f` for every instance index, in parallel when `parallel` is set.
///
/// Results are returned in instance order either way.
pub fn map_instances<T, F>(batch: usize, parallel: bool, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    if parallel {
        (0..batch).into_par_iter().map(f).collect()
    } else {
        (0..batch).map(f).collect()
    }
}

/// Mutate every element with its index, in parallel when `parallel` is set.
pub fn for_each_instance<T, F>(items: &mut [T], parallel: bool, f: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync + Send,
{
    if parallel {
        items.par_iter_mut().enumerate().for_each(|(i, item)| f(i, item));
    } else {
        items.iter_mut().enumerate().for_each(|(i, item)| f(i, item));
    }
}

#[inline]
pub fn min_slice(v: &[f64]) -> f64 {
    v.iter().copied().fold(f64::INFINITY, f64::min)
}

#[inline]
pub fn max_slice(v: &[f64]) -> f64 {
    v.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_instances_keeps_order() {
        let seq = map_instances(16, false, |i| i * i);
        let par = map_instances(16, true, |i| i * i);
        assert_eq!(seq, par);
        assert_eq!(seq[5], 25);
    }

    #[test]
    fn test_for_each_instance() {
        let mut v = vec![0usize; 8];
        for_each_instance(&mut v, true, |i, x| *x = 2 * i);
        assert_eq!(v, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_min_max_slice() {
        assert_eq!(min_slice(&[3.0, -1.0, 2.0]), -1.0);
        assert_eq!(max_slice(&[3.0, -1.0, 2.0]), 3.0);
        assert_eq!(min_slice(&[]), f64::INFINITY);
    }
}
