//! Gate and permutation kernels over [`StateStorage`]
//!
//! Dense kernels partition the index space so that every amplitude pair (or
//! every destination index) is owned by exactly one work item, then fan out
//! through the [`ParallelExecutor`]. Sparse kernels walk the stored entries.

use num_complex::Complex64;
use qshard_core::bits::{insert_zero_bits, pow2, sorted_masks};
use qshard_core::complex::ZERO;
use qshard_core::{Matrix2, ParallelExecutor};

use crate::storage::StateStorage;

// Raw pointer shared across workers. Sound only because each kernel below
// writes disjoint indices from distinct work items.
#[derive(Copy, Clone)]
struct SendPtr(*mut Complex64);
unsafe impl Send for SendPtr {}
unsafe impl Sync for SendPtr {}

impl SendPtr {
    #[inline]
    fn get(self) -> *mut Complex64 {
        self.0
    }
}

/// Which amplitudes a controlled kernel touches
#[derive(Debug, Clone, Copy)]
pub struct ControlSpec {
    /// OR of the control qubit masks
    pub mask: u64,
    /// Required value of the control bits
    pub perm: u64,
}

impl ControlSpec {
    /// Controls that must all read |1>, or all |0> when `anti`
    pub fn new(controls: &[usize], anti: bool) -> Self {
        let mask = controls.iter().fold(0u64, |m, &c| m | pow2(c));
        Self {
            mask,
            perm: if anti { 0 } else { mask },
        }
    }

    pub fn none() -> Self {
        Self { mask: 0, perm: 0 }
    }

    #[inline]
    pub fn matches(&self, index: u64) -> bool {
        index & self.mask == self.perm
    }
}

/// Call `f` on every amplitude pair differing only in `target`, where the controls match
///
/// `f` receives the |0> and |1> amplitudes of the pair and returns a value
/// that is summed over all pairs (used for norm accumulation).
pub fn for_each_pair<F>(
    storage: &mut StateStorage,
    exec: &ParallelExecutor,
    max_power: u64,
    target: usize,
    controls: &[usize],
    ctrl: ControlSpec,
    f: F,
) -> f64
where
    F: Fn(&mut Complex64, &mut Complex64) -> f64 + Sync + Send,
{
    let target_mask = pow2(target);
    match storage {
        StateStorage::Dense(v) => {
            let mut qubits: Vec<usize> = controls.to_vec();
            qubits.push(target);
            let masks = sorted_masks(&qubits);
            let count = max_power >> masks.len();
            let ptr = SendPtr(v.as_mut_ptr());
            exec.par_sum(count, |lcv| {
                let i0 = insert_zero_bits(lcv, &masks) | ctrl.perm;
                let i1 = i0 | target_mask;
                // SAFETY: i0 and i1 differ only in the target bit and every
                // lcv yields a distinct (i0, i1) pair inside the buffer.
                unsafe {
                    let base = ptr.get();
                    f(&mut *base.add(i0 as usize), &mut *base.add(i1 as usize))
                }
            })
        }
        StateStorage::Sparse(map) => {
            let bases = StateStorage::sparse_pair_bases(map, target_mask, ctrl.mask, ctrl.perm);
            let mut total = 0.0;
            for base in bases {
                let i1 = base | target_mask;
                let mut a0 = map.get(&base).copied().unwrap_or(ZERO);
                let mut a1 = map.get(&i1).copied().unwrap_or(ZERO);
                total += f(&mut a0, &mut a1);
                for (i, a) in [(base, a0), (i1, a1)] {
                    if a.norm_sqr() > 0.0 {
                        map.insert(i, a);
                    } else {
                        map.remove(&i);
                    }
                }
            }
            total
        }
    }
}

/// Apply `m` to each matching pair
///
/// When `floor` is given, amplitudes whose squared magnitude falls below it
/// are zeroed and the returned value is the norm of the touched pairs.
#[allow(clippy::too_many_arguments)]
pub fn apply_2x2(
    storage: &mut StateStorage,
    exec: &ParallelExecutor,
    max_power: u64,
    m: &Matrix2,
    target: usize,
    controls: &[usize],
    ctrl: ControlSpec,
    floor: Option<f64>,
) -> f64 {
    let m = *m;
    for_each_pair(storage, exec, max_power, target, controls, ctrl, |a0, a1| {
        let y0 = m[0][0] * *a0 + m[0][1] * *a1;
        let y1 = m[1][0] * *a0 + m[1][1] * *a1;
        match floor {
            Some(fl) => {
                let (n0, n1) = (y0.norm_sqr(), y1.norm_sqr());
                *a0 = if n0 < fl { ZERO } else { y0 };
                *a1 = if n1 < fl { ZERO } else { y1 };
                (if n0 < fl { 0.0 } else { n0 }) + (if n1 < fl { 0.0 } else { n1 })
            }
            None => {
                *a0 = y0;
                *a1 = y1;
                0.0
            }
        }
    })
}

/// Swap each matching pair and scale: `|0> <- top_right·|1>`, `|1> <- bottom_left·|0>`
#[allow(clippy::too_many_arguments)]
pub fn apply_invert(
    storage: &mut StateStorage,
    exec: &ParallelExecutor,
    max_power: u64,
    top_right: Complex64,
    bottom_left: Complex64,
    target: usize,
    controls: &[usize],
    ctrl: ControlSpec,
) {
    for_each_pair(storage, exec, max_power, target, controls, ctrl, |a0, a1| {
        let y0 = top_right * *a1;
        let y1 = bottom_left * *a0;
        *a0 = y0;
        *a1 = y1;
        0.0
    });
}

/// Scale matching amplitudes by `top_left` or `bottom_right` depending on the target bit
pub fn apply_phase(
    storage: &mut StateStorage,
    exec: &ParallelExecutor,
    top_left: Complex64,
    bottom_right: Complex64,
    target: usize,
    ctrl: ControlSpec,
) {
    let target_mask = pow2(target);
    storage.scale_by(exec, move |i| {
        if !ctrl.matches(i) {
            Complex64::new(1.0, 0.0)
        } else if i & target_mask == 0 {
            top_left
        } else {
            bottom_right
        }
    });
}

/// Build new storage of `new_max_power` indices by sending each source index through `f`
///
/// `f` returns the destination index and a real factor, or `None` to drop
/// the amplitude. It must be injective over the indices it keeps.
pub fn permute<F>(
    storage: &StateStorage,
    exec: &ParallelExecutor,
    max_power: u64,
    new_max_power: u64,
    f: F,
) -> StateStorage
where
    F: Fn(u64) -> Option<(u64, f64)> + Sync + Send,
{
    match storage {
        StateStorage::Dense(src) => {
            let mut dst = vec![ZERO; new_max_power as usize];
            let ptr = SendPtr(dst.as_mut_ptr());
            exec.par_for(max_power, |i| {
                let a = src[i as usize];
                if a.norm_sqr() == 0.0 {
                    return;
                }
                if let Some((j, s)) = f(i) {
                    // SAFETY: `f` is injective over kept indices, so no two
                    // work items write the same destination.
                    unsafe {
                        *ptr.get().add(j as usize) = a * s;
                    }
                }
            });
            StateStorage::Dense(dst)
        }
        StateStorage::Sparse(map) => StateStorage::Sparse(
            map.iter()
                .filter_map(|(&i, &a)| f(i).map(|(j, s)| (j, a * s)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use qshard_core::complex::ONE;

    const H: f64 = std::f64::consts::FRAC_1_SQRT_2;

    fn hadamard() -> Matrix2 {
        [
            [Complex64::new(H, 0.0), Complex64::new(H, 0.0)],
            [Complex64::new(H, 0.0), Complex64::new(-H, 0.0)],
        ]
    }

    #[test]
    fn test_apply_2x2_dense_and_sparse() {
        for sparse in [false, true] {
            let exec = ParallelExecutor::new(0);
            let mut s = StateStorage::zeroed(2, sparse);
            s.write(0, ONE);
            let norm = apply_2x2(
                &mut s,
                &exec,
                4,
                &hadamard(),
                1,
                &[],
                ControlSpec::none(),
                Some(1e-15),
            );
            assert_relative_eq!(norm, 1.0, epsilon = 1e-12);
            assert_relative_eq!(s.read(0).re, H, epsilon = 1e-12);
            assert_relative_eq!(s.read(2).re, H, epsilon = 1e-12);
            assert_eq!(s.read(1), ZERO);
        }
    }

    #[test]
    fn test_controlled_invert() {
        for sparse in [false, true] {
            let exec = ParallelExecutor::sequential();
            let mut s = StateStorage::zeroed(2, sparse);
            s.write(1, ONE);
            // CNOT control 0, target 1: |01> -> |11>
            apply_invert(&mut s, &exec, 4, ONE, ONE, 1, &[0], ControlSpec::new(&[0], false));
            assert_eq!(s.read(3), ONE);
            assert_eq!(s.read(1), ZERO);
            // anti-controlled: nothing happens while control is |1>
            apply_invert(&mut s, &exec, 4, ONE, ONE, 1, &[0], ControlSpec::new(&[0], true));
            assert_eq!(s.read(3), ONE);
        }
    }

    #[test]
    fn test_apply_phase() {
        let exec = ParallelExecutor::sequential();
        let mut s = StateStorage::from_amplitudes(&[ONE, ONE, ONE, ONE], false);
        apply_phase(&mut s, &exec, ONE, -ONE, 0, ControlSpec::new(&[1], false));
        assert_eq!(s.to_vec(4), vec![ONE, ONE, ONE, -ONE]);
    }

    #[test]
    fn test_permute_rotates() {
        let exec = ParallelExecutor::new(0);
        let s = StateStorage::from_amplitudes(&[ONE, ONE * 2.0, ONE * 3.0, ONE * 4.0], false);
        let p = permute(&s, &exec, 4, 4, |i| Some(((i + 1) % 4, -1.0)));
        assert_eq!(p.to_vec(4), vec![-ONE * 4.0, -ONE, -ONE * 2.0, -ONE * 3.0]);
    }
}
