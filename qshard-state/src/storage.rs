//! Amplitude storage for state-vector engines
//!
//! A [`StateStorage`] maps every basis index in `[0, 2^n)` to an amplitude,
//! either as a dense buffer or as a sparse map of the nonzero entries.
//! Engines talk to storage through indexed reads and writes plus a few bulk
//! operations; the dense arm additionally hands out its slice so kernels can
//! run over it in parallel.

use ahash::{AHashMap, AHashSet};
use num_complex::Complex64;
use qshard_core::bits::pow2;
use qshard_core::complex::ZERO;
use qshard_core::ParallelExecutor;

/// Dense buffer or sparse map of amplitudes
#[derive(Debug, Clone, PartialEq)]
pub enum StateStorage {
    Dense(Vec<Complex64>),
    Sparse(AHashMap<u64, Complex64>),
}

impl StateStorage {
    /// All-zero storage over `2^num_qubits` indices
    pub fn zeroed(num_qubits: usize, sparse: bool) -> Self {
        if sparse {
            Self::Sparse(AHashMap::new())
        } else {
            Self::Dense(vec![ZERO; pow2(num_qubits) as usize])
        }
    }

    /// Storage holding `amplitudes`, dropping zero entries when sparse
    pub fn from_amplitudes(amplitudes: &[Complex64], sparse: bool) -> Self {
        if sparse {
            Self::Sparse(
                amplitudes
                    .iter()
                    .enumerate()
                    .filter(|(_, a)| a.norm_sqr() > 0.0)
                    .map(|(i, a)| (i as u64, *a))
                    .collect(),
            )
        } else {
            Self::Dense(amplitudes.to_vec())
        }
    }

    /// Empty storage of the same kind over `2^num_qubits` indices
    pub fn zeroed_like(&self, num_qubits: usize) -> Self {
        Self::zeroed(num_qubits, self.is_sparse())
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse(_))
    }

    /// Amplitude at `index`
    #[inline]
    pub fn read(&self, index: u64) -> Complex64 {
        match self {
            Self::Dense(v) => v[index as usize],
            Self::Sparse(m) => m.get(&index).copied().unwrap_or(ZERO),
        }
    }

    /// Overwrite the amplitude at `index`
    #[inline]
    pub fn write(&mut self, index: u64, amp: Complex64) {
        match self {
            Self::Dense(v) => v[index as usize] = amp,
            Self::Sparse(m) => {
                if amp.norm_sqr() > 0.0 {
                    m.insert(index, amp);
                } else {
                    m.remove(&index);
                }
            }
        }
    }

    /// Zero every amplitude
    pub fn clear(&mut self) {
        match self {
            Self::Dense(v) => v.iter_mut().for_each(|a| *a = ZERO),
            Self::Sparse(m) => m.clear(),
        }
    }

    /// Dense slice, if this storage has one
    pub fn as_slice(&self) -> Option<&[Complex64]> {
        match self {
            Self::Dense(v) => Some(v),
            Self::Sparse(_) => None,
        }
    }

    /// Mutable dense slice, if this storage has one
    pub fn as_mut_slice(&mut self) -> Option<&mut [Complex64]> {
        match self {
            Self::Dense(v) => Some(v),
            Self::Sparse(_) => None,
        }
    }

    /// Copy out as a dense vector of length `max_power`
    pub fn to_vec(&self, max_power: u64) -> Vec<Complex64> {
        match self {
            Self::Dense(v) => v.clone(),
            Self::Sparse(m) => {
                let mut out = vec![ZERO; max_power as usize];
                for (&i, &a) in m {
                    out[i as usize] = a;
                }
                out
            }
        }
    }

    /// Visit every amplitude that may be nonzero
    pub fn for_each_nonzero(&self, mut f: impl FnMut(u64, Complex64)) {
        match self {
            Self::Dense(v) => v
                .iter()
                .enumerate()
                .filter(|(_, a)| a.norm_sqr() > 0.0)
                .for_each(|(i, a)| f(i as u64, *a)),
            Self::Sparse(m) => m.iter().for_each(|(&i, &a)| f(i, a)),
        }
    }

    /// Number of stored nonzero amplitudes
    pub fn nonzero_count(&self) -> usize {
        match self {
            Self::Dense(v) => v.iter().filter(|a| a.norm_sqr() > 0.0).count(),
            Self::Sparse(m) => m.len(),
        }
    }

    /// Sum of squared magnitudes
    pub fn norm(&self, exec: &ParallelExecutor) -> f64 {
        match self {
            Self::Dense(v) => exec.par_norm(v),
            Self::Sparse(m) => m.values().map(|a| a.norm_sqr()).sum(),
        }
    }

    /// Sum of squared magnitudes over indices where `index & mask == value`
    pub fn masked_norm(&self, exec: &ParallelExecutor, mask: u64, value: u64) -> f64 {
        match self {
            Self::Dense(v) => exec.par_sum(v.len() as u64, |i| {
                if i & mask == value {
                    v[i as usize].norm_sqr()
                } else {
                    0.0
                }
            }),
            Self::Sparse(m) => m
                .iter()
                .filter(|(&i, _)| i & mask == value)
                .map(|(_, a)| a.norm_sqr())
                .sum(),
        }
    }

    /// Multiply every amplitude by `factor`, zeroing those whose squared
    /// magnitude lands below `floor`
    pub fn scale(&mut self, exec: &ParallelExecutor, factor: Complex64, floor: f64) {
        match self {
            Self::Dense(v) => exec.par_map_inplace(v, |_, a| {
                *a *= factor;
                if a.norm_sqr() < floor {
                    *a = ZERO;
                }
            }),
            Self::Sparse(m) => {
                m.values_mut().for_each(|a| *a *= factor);
                m.retain(|_, a| a.norm_sqr() >= floor && a.norm_sqr() > 0.0);
            }
        }
    }

    /// Multiply amplitudes by `f(index)`
    pub fn scale_by<F>(&mut self, exec: &ParallelExecutor, f: F)
    where
        F: Fn(u64) -> Complex64 + Sync + Send,
    {
        match self {
            Self::Dense(v) => exec.par_map_inplace(v, |i, a| *a *= f(i as u64)),
            Self::Sparse(m) => {
                m.iter_mut().for_each(|(&i, a)| *a *= f(i));
                m.retain(|_, a| a.norm_sqr() > 0.0);
            }
        }
    }

    /// Distinct values of `index & !pair_mask` over nonzero entries matching the controls
    pub(crate) fn sparse_pair_bases(
        map: &AHashMap<u64, Complex64>,
        pair_mask: u64,
        ctrl_mask: u64,
        ctrl_perm: u64,
    ) -> AHashSet<u64> {
        map.keys()
            .filter(|&&i| i & ctrl_mask == ctrl_perm)
            .map(|&i| i & !pair_mask)
            .collect()
    }

    /// Exchange the upper half of `self` with the lower half of `other`
    ///
    /// Both storages span the same index width. This is the page shuffle
    /// used when a gate targets a page-selecting qubit.
    pub fn shuffle(&mut self, other: &mut StateStorage, max_power: u64) {
        let half = max_power >> 1;
        match (self, other) {
            (Self::Dense(a), Self::Dense(b)) => {
                let h = half as usize;
                a[h..].swap_with_slice(&mut b[..h]);
            }
            (a, b) => {
                for i in 0..half {
                    let upper = a.read(i + half);
                    let lower = b.read(i);
                    a.write(i + half, lower);
                    b.write(i, upper);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use qshard_core::complex::ONE;

    #[test]
    fn test_dense_and_sparse_agree() {
        let amps = vec![
            Complex64::new(0.5, 0.0),
            ZERO,
            Complex64::new(0.0, 0.5),
            Complex64::new(0.5, 0.5),
        ];
        let exec = ParallelExecutor::sequential();
        let dense = StateStorage::from_amplitudes(&amps, false);
        let sparse = StateStorage::from_amplitudes(&amps, true);

        assert_eq!(sparse.nonzero_count(), 3);
        assert_eq!(dense.to_vec(4), sparse.to_vec(4));
        assert_relative_eq!(dense.norm(&exec), 1.0, epsilon = 1e-12);
        assert_relative_eq!(sparse.norm(&exec), 1.0, epsilon = 1e-12);
        assert_relative_eq!(
            dense.masked_norm(&exec, 0b10, 0b10),
            sparse.masked_norm(&exec, 0b10, 0b10),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_sparse_write_removes_zero() {
        let mut s = StateStorage::zeroed(3, true);
        s.write(5, ONE);
        assert_eq!(s.nonzero_count(), 1);
        s.write(5, ZERO);
        assert_eq!(s.nonzero_count(), 0);
        assert_eq!(s.read(5), ZERO);
    }

    #[test]
    fn test_shuffle_swaps_halves() {
        let mut a = StateStorage::from_amplitudes(&[ONE, ONE * 2.0, ONE * 3.0, ONE * 4.0], false);
        let mut b =
            StateStorage::from_amplitudes(&[ONE * 5.0, ONE * 6.0, ONE * 7.0, ONE * 8.0], false);
        a.shuffle(&mut b, 4);
        assert_eq!(a.to_vec(4)[2], ONE * 5.0);
        assert_eq!(a.to_vec(4)[3], ONE * 6.0);
        assert_eq!(b.to_vec(4)[0], ONE * 3.0);
        assert_eq!(b.to_vec(4)[1], ONE * 4.0);
    }

    #[test]
    fn test_scale_applies_floor() {
        let exec = ParallelExecutor::sequential();
        let mut s = StateStorage::from_amplitudes(&[ONE, Complex64::new(1e-9, 0.0)], true);
        s.scale(&exec, ONE, 1e-15);
        assert_eq!(s.nonzero_count(), 1);
    }
}
