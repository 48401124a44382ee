//! Amplitude index and bit-mask helpers
//!
//! Bit `i` of an amplitude index holds the computational-basis value of qubit `i`.

use smallvec::SmallVec;

/// Largest register the amplitude index type can address
pub const MAX_QUBITS: usize = 63;

/// Masks for a handful of qubits, kept inline for the common case
pub type Masks = SmallVec<[u64; 4]>;

/// `2^n` as an amplitude index
#[inline]
pub const fn pow2(n: usize) -> u64 {
    1u64 << n
}

/// `2^n - 1`
#[inline]
pub const fn pow2_mask(n: usize) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

/// Mask covering `length` bits starting at `start`
#[inline]
pub const fn reg_mask(start: usize, length: usize) -> u64 {
    pow2_mask(length) << start
}

/// Extract the `length`-bit register value at `start`
#[inline]
pub const fn get_reg(perm: u64, start: usize, length: usize) -> u64 {
    (perm >> start) & pow2_mask(length)
}

/// Replace the `length`-bit register at `start` with `value`
#[inline]
pub const fn set_reg(perm: u64, start: usize, length: usize, value: u64) -> u64 {
    (perm & !reg_mask(start, length)) | ((value & pow2_mask(length)) << start)
}

/// Whether qubit `bit` is set in `perm`
#[inline]
pub const fn bit_set(perm: u64, bit: usize) -> bool {
    (perm >> bit) & 1 == 1
}

/// Floor of log2; zero maps to zero
#[inline]
pub const fn log2(n: u64) -> usize {
    if n == 0 {
        0
    } else {
        63 - n.leading_zeros() as usize
    }
}

/// Masks of `qubits`, ascending
pub fn sorted_masks(qubits: &[usize]) -> Masks {
    let mut masks: Masks = qubits.iter().map(|&q| pow2(q)).collect();
    masks.sort_unstable();
    masks
}

/// Spread `index` over the positions not covered by `sorted_masks`
///
/// Each mask in `sorted_masks` must be a single bit, in ascending order. The
/// returned index has a zero at every masked position.
#[inline]
pub fn insert_zero_bits(mut index: u64, sorted_masks: &[u64]) -> u64 {
    for &mask in sorted_masks {
        let low = mask - 1;
        index = (index & low) | ((index & !low) << 1);
    }
    index
}

/// Parity of the set bits in `value`
#[inline]
pub const fn parity(value: u64) -> bool {
    value.count_ones() & 1 == 1
}
