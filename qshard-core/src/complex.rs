//! Complex scalar constants and tolerance comparisons

use num_complex::Complex64;

/// A 2x2 complex matrix, row-major
pub type Matrix2 = [[Complex64; 2]; 2];

pub const ZERO: Complex64 = Complex64::new(0.0, 0.0);
pub const ONE: Complex64 = Complex64::new(1.0, 0.0);
pub const NEG_ONE: Complex64 = Complex64::new(-1.0, 0.0);
pub const I: Complex64 = Complex64::new(0.0, 1.0);
pub const NEG_I: Complex64 = Complex64::new(0.0, -1.0);

/// Default floor below which an amplitude's squared magnitude counts as zero
pub const MIN_NORM: f64 = 1e-15;

/// Tolerance on squared magnitudes when comparing matrix entries and amplitudes
pub const FP_NORM_EPSILON: f64 = 1e-12;

/// Tolerance on probabilities treated as exactly 0 or 1
pub const PROB_EPSILON: f64 = 1e-9;

/// `r * e^{i theta}`
#[inline]
pub fn polar(r: f64, theta: f64) -> Complex64 {
    Complex64::from_polar(r, theta)
}

/// Squared magnitude below tolerance
#[inline]
pub fn is_norm_0(c: Complex64) -> bool {
    c.norm_sqr() <= FP_NORM_EPSILON
}

/// `a` and `b` equal within tolerance
#[inline]
pub fn is_same(a: Complex64, b: Complex64) -> bool {
    is_norm_0(a - b)
}

/// Whether `a / b` is `ratio`, compared without dividing
#[inline]
pub fn is_ratio(a: Complex64, b: Complex64, ratio: Complex64) -> bool {
    is_same(a, ratio * b)
}

/// Clamp a probability into `[0, 1]`
#[inline]
pub fn clamp_prob(p: f64) -> f64 {
    p.clamp(0.0, 1.0)
}

/// Whether `p` is within [`PROB_EPSILON`] of zero
#[inline]
pub fn is_prob_zero(p: f64) -> bool {
    p <= PROB_EPSILON
}

/// Whether `p` is within [`PROB_EPSILON`] of one
#[inline]
pub fn is_prob_one(p: f64) -> bool {
    p >= 1.0 - PROB_EPSILON
}
