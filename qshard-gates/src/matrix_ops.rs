//! 2x2 matrix algebra
//!
//! Products, adjoints, inverses, the matrix exponential and the shape tests
//! engines use to pick a cheaper kernel (diagonal, anti-diagonal, identity).
//!
//! # Example
//!
//! ```rust
//! use qshard_gates::matrix_ops::{is_phase, mul2x2};
//! use qshard_gates::matrices::{S_GATE, PAULI_Z};
//!
//! let ss = mul2x2(&S_GATE, &S_GATE);
//! assert!(is_phase(&ss));
//! assert!((ss[1][1] - PAULI_Z[1][1]).norm() < 1e-12);
//! ```

use num_complex::Complex64;
use qshard_core::complex::{is_norm_0, is_same, ONE, ZERO};
use qshard_core::Matrix2;

/// `a · b`
#[inline]
pub fn mul2x2(a: &Matrix2, b: &Matrix2) -> Matrix2 {
    [
        [
            a[0][0] * b[0][0] + a[0][1] * b[1][0],
            a[0][0] * b[0][1] + a[0][1] * b[1][1],
        ],
        [
            a[1][0] * b[0][0] + a[1][1] * b[1][0],
            a[1][0] * b[0][1] + a[1][1] * b[1][1],
        ],
    ]
}

/// `m · v`
#[inline]
pub fn apply2x2(m: &Matrix2, v: [Complex64; 2]) -> [Complex64; 2] {
    [
        m[0][0] * v[0] + m[0][1] * v[1],
        m[1][0] * v[0] + m[1][1] * v[1],
    ]
}

/// Conjugate transpose
#[inline]
pub fn adjoint2x2(m: &Matrix2) -> Matrix2 {
    [
        [m[0][0].conj(), m[1][0].conj()],
        [m[0][1].conj(), m[1][1].conj()],
    ]
}

/// Determinant
#[inline]
pub fn det2x2(m: &Matrix2) -> Complex64 {
    m[0][0] * m[1][1] - m[0][1] * m[1][0]
}

/// Inverse, or `None` for a singular matrix
pub fn inverse2x2(m: &Matrix2) -> Option<Matrix2> {
    let det = det2x2(m);
    if is_norm_0(det) {
        return None;
    }
    let inv = ONE / det;
    Some([
        [m[1][1] * inv, -m[0][1] * inv],
        [-m[1][0] * inv, m[0][0] * inv],
    ])
}

/// `m` scaled by `s`
#[inline]
pub fn scale2x2(m: &Matrix2, s: Complex64) -> Matrix2 {
    [[m[0][0] * s, m[0][1] * s], [m[1][0] * s, m[1][1] * s]]
}

/// Off-diagonal entries vanish
#[inline]
pub fn is_phase(m: &Matrix2) -> bool {
    is_norm_0(m[0][1]) && is_norm_0(m[1][0])
}

/// Diagonal entries vanish
#[inline]
pub fn is_invert(m: &Matrix2) -> bool {
    is_norm_0(m[0][0]) && is_norm_0(m[1][1])
}

/// Exactly the identity
#[inline]
pub fn is_identity(m: &Matrix2) -> bool {
    is_phase(m) && is_same(m[0][0], ONE) && is_same(m[1][1], ONE)
}

/// A multiple of the identity, i.e. only a global phase
#[inline]
pub fn is_global_phase(m: &Matrix2) -> bool {
    is_phase(m) && is_same(m[0][0], m[1][1])
}

/// Entry-wise equality within tolerance
pub fn matrices_equal(a: &Matrix2, b: &Matrix2) -> bool {
    (0..2).all(|r| (0..2).all(|c| is_same(a[r][c], b[r][c])))
}

/// `m† m = I` within `tolerance`
pub fn is_unitary(m: &Matrix2, tolerance: f64) -> bool {
    let p = mul2x2(&adjoint2x2(m), m);
    (p[0][0] - ONE).norm() <= tolerance
        && (p[1][1] - ONE).norm() <= tolerance
        && p[0][1].norm() <= tolerance
        && p[1][0].norm() <= tolerance
}

/// Matrix exponential `e^m`
///
/// Splits `m = aI + N` with `N` traceless; then `N² = δ²I` and
/// `e^m = e^a (cosh δ · I + sinh δ / δ · N)`.
pub fn exp2x2(m: &Matrix2) -> Matrix2 {
    let a = (m[0][0] + m[1][1]) * 0.5;
    let n = [[m[0][0] - a, m[0][1]], [m[1][0], m[1][1] - a]];
    let delta = (n[0][0] * n[0][0] + n[0][1] * n[1][0]).sqrt();
    let ea = a.exp();
    let cosh = delta.cosh();
    let sinhc = if is_norm_0(delta) {
        ONE + delta * delta / 6.0
    } else {
        delta.sinh() / delta
    };
    [
        [ea * (cosh + sinhc * n[0][0]), ea * sinhc * n[0][1]],
        [ea * sinhc * n[1][0], ea * (cosh + sinhc * n[1][1])],
    ]
}

/// `e^(i·m)`
pub fn exp_i2x2(m: &Matrix2) -> Matrix2 {
    let i = Complex64::new(0.0, 1.0);
    exp2x2(&scale2x2(m, i))
}

/// The 2x2 zero matrix
pub const ZERO_MATRIX: Matrix2 = [[ZERO, ZERO], [ZERO, ZERO]];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrices::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn assert_matrix_eq(a: &Matrix2, b: &Matrix2) {
        for r in 0..2 {
            for c in 0..2 {
                assert_relative_eq!(a[r][c].re, b[r][c].re, epsilon = 1e-10);
                assert_relative_eq!(a[r][c].im, b[r][c].im, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_mul_and_inverse() {
        let hh = mul2x2(&HADAMARD, &HADAMARD);
        assert!(is_identity(&hh));
        let inv = inverse2x2(&S_GATE).unwrap();
        assert_matrix_eq(&inv, &S_GATE_DAGGER);
        assert!(inverse2x2(&ZERO_MATRIX).is_none());
        assert_matrix_eq(&adjoint2x2(&T_GATE), &T_GATE_DAGGER);
    }

    #[test]
    fn test_shape_classification() {
        assert!(is_phase(&PAULI_Z));
        assert!(!is_phase(&PAULI_X));
        assert!(is_invert(&PAULI_Y));
        assert!(!is_invert(&HADAMARD));
        assert!(is_global_phase(&scale2x2(&IDENTITY, Complex64::new(0.0, 1.0))));
        assert!(!is_identity(&S_GATE));
    }

    #[test]
    fn test_exp_of_pauli() {
        // e^(-iθX/2) = RX(θ)
        let theta = 0.9;
        let arg = scale2x2(&PAULI_X, Complex64::new(-theta / 2.0, 0.0));
        assert_matrix_eq(&exp_i2x2(&arg), &rotation_x(theta));

        // e^(iπ/2 Z) = iZ
        let ez = exp_i2x2(&scale2x2(&PAULI_Z, Complex64::new(PI / 2.0, 0.0)));
        assert_matrix_eq(&ez, &scale2x2(&PAULI_Z, Complex64::new(0.0, 1.0)));
    }

    #[test]
    fn test_exp_of_scalar_and_nilpotent() {
        let e = exp2x2(&scale2x2(&IDENTITY, Complex64::new(1.0, 0.0)));
        assert_relative_eq!(e[0][0].re, std::f64::consts::E, epsilon = 1e-12);

        // N = [[0,1],[0,0]] is nilpotent: e^N = I + N
        let n = [[ZERO, ONE], [ZERO, ZERO]];
        assert_matrix_eq(&exp2x2(&n), &[[ONE, ONE], [ZERO, ONE]]);
    }
}
