//! Data-parallel dispatch over amplitude index ranges
//!
//! Engines never spawn threads themselves. Every kernel goes through a
//! [`ParallelExecutor`], which fans out over rayon's pool once the range is
//! large enough and otherwise runs inline. Each call returns only after all
//! work items finished.

use num_complex::Complex64;
use rayon::prelude::*;

use crate::bits::{insert_zero_bits, pow2};

/// Parallel-for and reduction over index ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelExecutor {
    /// Ranges of at least this many items run in parallel
    min_parallel_len: u64,
}

impl ParallelExecutor {
    /// Executor that parallelizes ranges of `2^threshold_qubits` or more items
    pub fn new(threshold_qubits: usize) -> Self {
        let min_parallel_len = if threshold_qubits >= 63 {
            u64::MAX
        } else {
            pow2(threshold_qubits)
        };
        Self { min_parallel_len }
    }

    /// Executor that never fans out
    pub fn sequential() -> Self {
        Self {
            min_parallel_len: u64::MAX,
        }
    }

    /// Whether a range of `len` items would run in parallel
    #[inline]
    pub fn is_parallel(&self, len: u64) -> bool {
        len >= self.min_parallel_len
    }

    /// Call `f(i)` for every `i` in `[0, count)`
    pub fn par_for<F>(&self, count: u64, f: F)
    where
        F: Fn(u64) + Sync + Send,
    {
        if self.is_parallel(count) {
            (0..count).into_par_iter().for_each(f);
        } else {
            (0..count).for_each(f);
        }
    }

    /// Call `f(i)` for every index of a `2^n` space whose `skip_masks` bits are clear
    ///
    /// `count` is `2^n >> skip_masks.len()`; masks must be single bits, ascending.
    pub fn par_for_skip<F>(&self, count: u64, skip_masks: &[u64], f: F)
    where
        F: Fn(u64) + Sync + Send,
    {
        self.par_for(count, |i| f(insert_zero_bits(i, skip_masks)));
    }

    /// Sum `f(i)` over `[0, count)`
    pub fn par_sum<F>(&self, count: u64, f: F) -> f64
    where
        F: Fn(u64) -> f64 + Sync + Send,
    {
        if self.is_parallel(count) {
            (0..count).into_par_iter().map(f).sum()
        } else {
            (0..count).map(f).sum()
        }
    }

    /// Squared norm of an amplitude buffer
    pub fn par_norm(&self, amplitudes: &[Complex64]) -> f64 {
        if self.is_parallel(amplitudes.len() as u64) {
            amplitudes.par_iter().map(|a| a.norm_sqr()).sum()
        } else {
            amplitudes.iter().map(|a| a.norm_sqr()).sum()
        }
    }

    /// Apply `f` to every element of `data`
    pub fn par_map_inplace<T, F>(&self, data: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync + Send,
    {
        if self.is_parallel(data.len() as u64) {
            data.par_iter_mut().enumerate().for_each(|(i, x)| f(i, x));
        } else {
            data.iter_mut().enumerate().for_each(|(i, x)| f(i, x));
        }
    }

    /// Apply `f` to each chunk of `chunk_len` elements, with the chunk's index
    pub fn par_chunks<T, F>(&self, data: &mut [T], chunk_len: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send,
    {
        if self.is_parallel(data.len() as u64) {
            data.par_chunks_mut(chunk_len)
                .enumerate()
                .for_each(|(i, c)| f(i, c));
        } else {
            data.chunks_mut(chunk_len)
                .enumerate()
                .for_each(|(i, c)| f(i, c));
        }
    }

    /// Like [`par_chunks`](Self::par_chunks), summing the value each chunk returns
    pub fn par_chunks_sum<T, F>(&self, data: &mut [T], chunk_len: usize, f: F) -> f64
    where
        T: Send,
        F: Fn(usize, &mut [T]) -> f64 + Sync + Send,
    {
        if self.is_parallel(data.len() as u64) {
            data.par_chunks_mut(chunk_len)
                .enumerate()
                .map(|(i, c)| f(i, c))
                .sum()
        } else {
            data.chunks_mut(chunk_len)
                .enumerate()
                .map(|(i, c)| f(i, c))
                .sum()
        }
    }
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new(12)
    }
}
