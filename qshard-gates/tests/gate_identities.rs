//! Algebraic identities between the gate constructors

use num_complex::Complex64;
use qshard_gates::matrices::*;
use qshard_gates::matrix_ops::*;

fn check(a: &qshard_core::Matrix2, b: &qshard_core::Matrix2) {
    assert!(matrices_equal(a, b), "{:?} != {:?}", a, b);
}

#[test]
fn test_hadamard_conjugates_paulis() {
    check(&mul2x2(&HADAMARD, &mul2x2(&PAULI_X, &HADAMARD)), &PAULI_Z);
    check(&mul2x2(&HADAMARD, &mul2x2(&PAULI_Z, &HADAMARD)), &PAULI_X);
    check(&mul2x2(&HADAMARD, &HADAMARD), &IDENTITY);
}

#[test]
fn test_rotations_compose_additively() {
    for (a, b) in [(0.3, 0.9), (-1.2, 2.5), (3.0, 3.5)] {
        check(&mul2x2(&rotation_z(a), &rotation_z(b)), &rotation_z(a + b));
        check(&mul2x2(&rotation_y(a), &rotation_y(b)), &rotation_y(a + b));
        check(&mul2x2(&rotation_t(a), &rotation_t(b)), &rotation_t(a + b));
    }
}

#[test]
fn test_phase_rotation_period_is_four_pi() {
    let four_pi = 4.0 * std::f64::consts::PI;
    check(&rotation_t(1.3 + four_pi), &rotation_t(1.3));
    assert!(!matrices_equal(
        &rotation_t(1.3 + four_pi / 2.0),
        &rotation_t(1.3)
    ));
}

#[test]
fn test_rotations_are_pauli_exponentials() {
    let theta = 0.77;
    let half = Complex64::new(-theta / 2.0, 0.0);
    check(&exp_i2x2(&scale2x2(&PAULI_X, half)), &rotation_x(theta));
    check(&exp_i2x2(&scale2x2(&PAULI_Y, half)), &rotation_y(theta));
    check(&exp_i2x2(&scale2x2(&PAULI_Z, half)), &rotation_z(theta));
    check(&exp2x2(&ZERO_MATRIX), &IDENTITY);
}

#[test]
fn test_inverse_matches_adjoint_for_unitaries() {
    for m in [HADAMARD, SQRT_X, T_GATE, u3(0.4, -0.2, 1.9), rotation_y(2.2)] {
        let inv = inverse2x2(&m).unwrap();
        check(&inv, &adjoint2x2(&m));
        check(&mul2x2(&inv, &m), &IDENTITY);
    }
    assert!(inverse2x2(&ZERO_MATRIX).is_none());
    check(&adjoint2x2(&SQRT_Y), &SQRT_Y_DAGGER);
    check(&adjoint2x2(&S_GATE), &S_GATE_DAGGER);
}

#[test]
fn test_classification() {
    assert!(is_phase(&rotation_z(0.5)));
    assert!(is_phase(&T_GATE));
    assert!(!is_phase(&HADAMARD));
    assert!(is_invert(&PAULI_Y));
    assert!(!is_invert(&PAULI_Z));
    assert!(is_identity(&mul2x2(&T_GATE, &T_GATE_DAGGER)));
    assert!(is_global_phase(&scale2x2(&IDENTITY, Complex64::from_polar(1.0, 0.6))));
    assert!(!is_global_phase(&S_GATE));
    assert!(is_unitary(&u2(0.1, 0.2), 1e-12));
}
