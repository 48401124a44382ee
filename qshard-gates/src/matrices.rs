//! Gate matrices
//!
//! Constant 2x2 matrices for the fixed single-qubit gates and constructors
//! for the parameterized ones. Angles follow the half-angle convention:
//! `RX(theta) = exp(-i theta X / 2)`.

use num_complex::Complex64;
use qshard_core::complex::{I, NEG_I, NEG_ONE, ONE, ZERO};
use qshard_core::Matrix2;

const INV_SQRT2: f64 = std::f64::consts::FRAC_1_SQRT_2;
const HALF_PLUS_I: Complex64 = Complex64::new(0.5, 0.5);
const HALF_MINUS_I: Complex64 = Complex64::new(0.5, -0.5);

/// Hadamard gate matrix
/// H = 1/√2 * [[1,  1],
///             [1, -1]]
pub const HADAMARD: Matrix2 = [
    [
        Complex64::new(INV_SQRT2, 0.0),
        Complex64::new(INV_SQRT2, 0.0),
    ],
    [
        Complex64::new(INV_SQRT2, 0.0),
        Complex64::new(-INV_SQRT2, 0.0),
    ],
];

/// Pauli-X gate matrix
/// X = [[0, 1],
///      [1, 0]]
pub const PAULI_X: Matrix2 = [[ZERO, ONE], [ONE, ZERO]];

/// Pauli-Y gate matrix
/// Y = [[0, -i],
///      [i,  0]]
pub const PAULI_Y: Matrix2 = [[ZERO, NEG_I], [I, ZERO]];

/// Pauli-Z gate matrix
/// Z = [[1,  0],
///      [0, -1]]
pub const PAULI_Z: Matrix2 = [[ONE, ZERO], [ZERO, NEG_ONE]];

/// Identity gate matrix
pub const IDENTITY: Matrix2 = [[ONE, ZERO], [ZERO, ONE]];

/// S gate matrix (√Z)
/// S = [[1, 0],
///      [0, i]]
pub const S_GATE: Matrix2 = [[ONE, ZERO], [ZERO, I]];

/// S† gate matrix
pub const S_GATE_DAGGER: Matrix2 = [[ONE, ZERO], [ZERO, NEG_I]];

/// T gate matrix (√S)
/// T = [[1, 0],
///      [0, e^(iπ/4)]]
pub const T_GATE: Matrix2 = [
    [ONE, ZERO],
    [ZERO, Complex64::new(INV_SQRT2, INV_SQRT2)],
];

/// T† gate matrix
pub const T_GATE_DAGGER: Matrix2 = [
    [ONE, ZERO],
    [ZERO, Complex64::new(INV_SQRT2, -INV_SQRT2)],
];

/// √X gate matrix
/// √X = 1/2 * [[1+i, 1-i],
///             [1-i, 1+i]]
pub const SQRT_X: Matrix2 = [[HALF_PLUS_I, HALF_MINUS_I], [HALF_MINUS_I, HALF_PLUS_I]];

/// √X† gate matrix
pub const SQRT_X_DAGGER: Matrix2 = [[HALF_MINUS_I, HALF_PLUS_I], [HALF_PLUS_I, HALF_MINUS_I]];

/// √Y gate matrix
/// √Y = 1/2 * [[1+i, -1-i],
///             [1+i,  1+i]]
pub const SQRT_Y: Matrix2 = [
    [HALF_PLUS_I, Complex64::new(-0.5, -0.5)],
    [HALF_PLUS_I, HALF_PLUS_I],
];

/// √Y† gate matrix
pub const SQRT_Y_DAGGER: Matrix2 = [
    [HALF_MINUS_I, HALF_MINUS_I],
    [Complex64::new(-0.5, 0.5), HALF_MINUS_I],
];

/// Phase shift on |1>: `diag(1, e^(iθ/2))`
pub fn rotation_t(theta: f64) -> Matrix2 {
    [[ONE, ZERO], [ZERO, Complex64::from_polar(1.0, theta / 2.0)]]
}

/// Rotation around X
/// RX(θ) = [[cos(θ/2),    -i·sin(θ/2)],
///          [-i·sin(θ/2), cos(θ/2)]]
pub fn rotation_x(theta: f64) -> Matrix2 {
    let (s, c) = (theta / 2.0).sin_cos();
    [
        [Complex64::new(c, 0.0), Complex64::new(0.0, -s)],
        [Complex64::new(0.0, -s), Complex64::new(c, 0.0)],
    ]
}

/// Rotation around Y
/// RY(θ) = [[cos(θ/2), -sin(θ/2)],
///          [sin(θ/2),  cos(θ/2)]]
pub fn rotation_y(theta: f64) -> Matrix2 {
    let (s, c) = (theta / 2.0).sin_cos();
    [
        [Complex64::new(c, 0.0), Complex64::new(-s, 0.0)],
        [Complex64::new(s, 0.0), Complex64::new(c, 0.0)],
    ]
}

/// Rotation around Z
/// RZ(θ) = [[e^(-iθ/2), 0],
///          [0,         e^(iθ/2)]]
pub fn rotation_z(theta: f64) -> Matrix2 {
    [
        [Complex64::from_polar(1.0, -theta / 2.0), ZERO],
        [ZERO, Complex64::from_polar(1.0, theta / 2.0)],
    ]
}

/// General single-qubit unitary
/// U(θ, φ, λ) = [[cos(θ/2),          -e^(iλ)·sin(θ/2)],
///               [e^(iφ)·sin(θ/2),   e^(i(φ+λ))·cos(θ/2)]]
pub fn u3(theta: f64, phi: f64, lambda: f64) -> Matrix2 {
    let (s, c) = (theta / 2.0).sin_cos();
    [
        [
            Complex64::new(c, 0.0),
            -Complex64::from_polar(s, lambda),
        ],
        [
            Complex64::from_polar(s, phi),
            Complex64::from_polar(c, phi + lambda),
        ],
    ]
}

/// U2(φ, λ) = U(π/2, φ, λ)
pub fn u2(phi: f64, lambda: f64) -> Matrix2 {
    u3(std::f64::consts::FRAC_PI_2, phi, lambda)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix_ops::{is_unitary, mul2x2};
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_fixed_gates_are_unitary() {
        for m in [
            HADAMARD, PAULI_X, PAULI_Y, PAULI_Z, S_GATE, T_GATE, SQRT_X, SQRT_X_DAGGER, SQRT_Y,
            SQRT_Y_DAGGER,
        ] {
            assert!(is_unitary(&m, 1e-12));
        }
    }

    #[test]
    fn test_square_roots() {
        let xx = mul2x2(&SQRT_X, &SQRT_X);
        let yy = mul2x2(&SQRT_Y, &SQRT_Y);
        let tt = mul2x2(&T_GATE, &T_GATE);
        for r in 0..2 {
            for c in 0..2 {
                assert_relative_eq!(xx[r][c].re, PAULI_X[r][c].re, epsilon = 1e-12);
                assert_relative_eq!(xx[r][c].im, PAULI_X[r][c].im, epsilon = 1e-12);
                assert_relative_eq!(yy[r][c].re, PAULI_Y[r][c].re, epsilon = 1e-12);
                assert_relative_eq!(yy[r][c].im, PAULI_Y[r][c].im, epsilon = 1e-12);
                assert_relative_eq!(tt[r][c].re, S_GATE[r][c].re, epsilon = 1e-12);
                assert_relative_eq!(tt[r][c].im, S_GATE[r][c].im, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_rotations() {
        let rx = rotation_x(PI);
        assert_relative_eq!(rx[0][1].im, -1.0, epsilon = 1e-12);
        let ry = rotation_y(PI);
        assert_relative_eq!(ry[1][0].re, 1.0, epsilon = 1e-12);
        let rz = rotation_z(PI);
        assert_relative_eq!(rz[0][0].im, -1.0, epsilon = 1e-12);
        assert_relative_eq!(rz[1][1].im, 1.0, epsilon = 1e-12);
        assert!(is_unitary(&u3(0.3, 1.1, -0.7), 1e-12));
        let rt = rotation_t(PI);
        assert_relative_eq!(rt[1][1].im, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_u3_reduces_to_ry() {
        let u = u3(0.8, 0.0, 0.0);
        let ry = rotation_y(0.8);
        for r in 0..2 {
            for c in 0..2 {
                assert_relative_eq!(u[r][c].re, ry[r][c].re, epsilon = 1e-12);
                assert_relative_eq!(u[r][c].im, ry[r][c].im, epsilon = 1e-12);
            }
        }
    }
}
