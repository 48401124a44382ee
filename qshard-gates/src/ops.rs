//! Named gates over the primitive register contract
//!
//! [`GateOps`] is implemented for every [`QuantumEngine`]. Each named gate
//! reduces to one of the primitive calls (`mtrx`, `phase`, `invert` and their
//! controlled forms), so representations that pattern-match primitives (the
//! stabilizer hybrid, the shard tracker) see the cheapest form of each gate.

use num_complex::Complex64;
use qshard_core::bits::{bit_set, pow2, reg_mask};
use qshard_core::complex::{I, NEG_I, NEG_ONE, ONE, ZERO};
use qshard_core::error::check_range;
use qshard_core::{Matrix2, QuantumEngine, QuantumError, Result};

use crate::matrices::*;
use crate::matrix_ops::exp_i2x2;

/// Measurement basis for joint-ensemble probabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pauli {
    I,
    X,
    Y,
    Z,
}

/// Named single- and multi-qubit gates
pub trait GateOps: QuantumEngine {
    fn h(&mut self, q: usize) -> Result<()> {
        self.mtrx(&HADAMARD, q)
    }

    fn x(&mut self, q: usize) -> Result<()> {
        self.invert(ONE, ONE, q)
    }

    fn y(&mut self, q: usize) -> Result<()> {
        self.invert(NEG_I, I, q)
    }

    fn z(&mut self, q: usize) -> Result<()> {
        self.phase(ONE, NEG_ONE, q)
    }

    fn s(&mut self, q: usize) -> Result<()> {
        self.phase(ONE, I, q)
    }

    /// Inverse of S
    fn is(&mut self, q: usize) -> Result<()> {
        self.phase(ONE, NEG_I, q)
    }

    fn t(&mut self, q: usize) -> Result<()> {
        self.phase(ONE, T_GATE[1][1], q)
    }

    /// Inverse of T
    fn it(&mut self, q: usize) -> Result<()> {
        self.phase(ONE, T_GATE_DAGGER[1][1], q)
    }

    fn sqrt_x(&mut self, q: usize) -> Result<()> {
        self.mtrx(&SQRT_X, q)
    }

    fn isqrt_x(&mut self, q: usize) -> Result<()> {
        self.mtrx(&SQRT_X_DAGGER, q)
    }

    fn sqrt_y(&mut self, q: usize) -> Result<()> {
        self.mtrx(&SQRT_Y, q)
    }

    fn isqrt_y(&mut self, q: usize) -> Result<()> {
        self.mtrx(&SQRT_Y_DAGGER, q)
    }

    /// Phase shift `diag(1, e^(iθ/2))`
    fn rt(&mut self, theta: f64, q: usize) -> Result<()> {
        self.phase(ONE, Complex64::from_polar(1.0, theta / 2.0), q)
    }

    fn rx(&mut self, theta: f64, q: usize) -> Result<()> {
        self.mtrx(&rotation_x(theta), q)
    }

    fn ry(&mut self, theta: f64, q: usize) -> Result<()> {
        self.mtrx(&rotation_y(theta), q)
    }

    fn rz(&mut self, theta: f64, q: usize) -> Result<()> {
        let m = rotation_z(theta);
        self.phase(m[0][0], m[1][1], q)
    }

    /// General unitary `U(θ, φ, λ)`
    fn u(&mut self, theta: f64, phi: f64, lambda: f64, q: usize) -> Result<()> {
        self.mtrx(&u3(theta, phi, lambda), q)
    }

    fn u2(&mut self, phi: f64, lambda: f64, q: usize) -> Result<()> {
        self.mtrx(&u2(phi, lambda), q)
    }

    /// Global phase `e^(iθ)` carried on one qubit
    fn exp(&mut self, theta: f64, q: usize) -> Result<()> {
        let p = Complex64::from_polar(1.0, theta);
        self.phase(p, p, q)
    }

    /// `e^(iθX)`
    fn exp_x(&mut self, theta: f64, q: usize) -> Result<()> {
        let t = Complex64::new(theta, 0.0);
        self.mtrx(&exp_i2x2(&[[ZERO, t], [t, ZERO]]), q)
    }

    /// `e^(iθY)`
    fn exp_y(&mut self, theta: f64, q: usize) -> Result<()> {
        let t = Complex64::new(0.0, theta);
        self.mtrx(&exp_i2x2(&[[ZERO, -t], [t, ZERO]]), q)
    }

    /// `e^(iθZ)`
    fn exp_z(&mut self, theta: f64, q: usize) -> Result<()> {
        self.phase(
            Complex64::from_polar(1.0, theta),
            Complex64::from_polar(1.0, -theta),
            q,
        )
    }

    /// `e^(i·m)` for a Hermitian `m`, optionally controlled
    fn exp_matrix(&mut self, controls: &[usize], m: &Matrix2, q: usize) -> Result<()> {
        let u = exp_i2x2(m);
        if controls.is_empty() {
            self.mtrx(&u, q)
        } else {
            self.mc_mtrx(controls, &u, q)
        }
    }

    fn cnot(&mut self, control: usize, target: usize) -> Result<()> {
        self.mc_invert(&[control], ONE, ONE, target)
    }

    /// NOT on `target` when `control` is |0>
    fn anti_cnot(&mut self, control: usize, target: usize) -> Result<()> {
        self.mac_invert(&[control], ONE, ONE, target)
    }

    fn cy(&mut self, control: usize, target: usize) -> Result<()> {
        self.mc_invert(&[control], NEG_I, I, target)
    }

    fn cz(&mut self, control: usize, target: usize) -> Result<()> {
        self.mc_phase(&[control], ONE, NEG_ONE, target)
    }

    fn ch(&mut self, control: usize, target: usize) -> Result<()> {
        self.mc_mtrx(&[control], &HADAMARD, target)
    }

    fn cs(&mut self, control: usize, target: usize) -> Result<()> {
        self.mc_phase(&[control], ONE, I, target)
    }

    fn cis(&mut self, control: usize, target: usize) -> Result<()> {
        self.mc_phase(&[control], ONE, NEG_I, target)
    }

    fn ct(&mut self, control: usize, target: usize) -> Result<()> {
        self.mc_phase(&[control], ONE, T_GATE[1][1], target)
    }

    /// Toffoli
    fn ccnot(&mut self, c1: usize, c2: usize, target: usize) -> Result<()> {
        self.mc_invert(&[c1, c2], ONE, ONE, target)
    }

    /// NOT on `target` when both controls are |0>
    fn anti_ccnot(&mut self, c1: usize, c2: usize, target: usize) -> Result<()> {
        self.mac_invert(&[c1, c2], ONE, ONE, target)
    }

    fn ccz(&mut self, c1: usize, c2: usize, target: usize) -> Result<()> {
        self.mc_phase(&[c1, c2], ONE, NEG_ONE, target)
    }

    fn ccy(&mut self, c1: usize, c2: usize, target: usize) -> Result<()> {
        self.mc_invert(&[c1, c2], NEG_I, I, target)
    }

    fn crt(&mut self, theta: f64, control: usize, target: usize) -> Result<()> {
        self.mc_phase(&[control], ONE, Complex64::from_polar(1.0, theta / 2.0), target)
    }

    fn crx(&mut self, theta: f64, control: usize, target: usize) -> Result<()> {
        self.mc_mtrx(&[control], &rotation_x(theta), target)
    }

    fn cry(&mut self, theta: f64, control: usize, target: usize) -> Result<()> {
        self.mc_mtrx(&[control], &rotation_y(theta), target)
    }

    fn crz(&mut self, theta: f64, control: usize, target: usize) -> Result<()> {
        let m = rotation_z(theta);
        self.mc_phase(&[control], m[0][0], m[1][1], target)
    }

    fn cu(
        &mut self,
        controls: &[usize],
        theta: f64,
        phi: f64,
        lambda: f64,
        target: usize,
    ) -> Result<()> {
        self.mc_mtrx(controls, &u3(theta, phi, lambda), target)
    }

    /// `|01> -> i|10>`, `|10> -> i|01>`
    fn iswap(&mut self, q1: usize, q2: usize) -> Result<()> {
        self.swap(q1, q2)?;
        self.cz(q1, q2)?;
        self.s(q1)?;
        self.s(q2)
    }

    /// Inverse of [`iswap`](Self::iswap)
    fn iiswap(&mut self, q1: usize, q2: usize) -> Result<()> {
        self.is(q2)?;
        self.is(q1)?;
        self.cz(q1, q2)?;
        self.swap(q1, q2)
    }

    /// Square root of swap
    fn sqrt_swap(&mut self, q1: usize, q2: usize) -> Result<()> {
        self.cnot(q1, q2)?;
        self.mc_mtrx(&[q2], &SQRT_X, q1)?;
        self.cnot(q1, q2)
    }

    /// Inverse square root of swap
    fn isqrt_swap(&mut self, q1: usize, q2: usize) -> Result<()> {
        self.cnot(q1, q2)?;
        self.mc_mtrx(&[q2], &SQRT_X_DAGGER, q1)?;
        self.cnot(q1, q2)
    }

    /// Swap `q1` and `q2` when every control is |1>
    fn cswap(&mut self, controls: &[usize], q1: usize, q2: usize) -> Result<()> {
        if controls.is_empty() {
            return self.swap(q1, q2);
        }
        let mut inner: Vec<usize> = controls.to_vec();
        inner.push(q1);
        self.cnot(q2, q1)?;
        self.mc_invert(&inner, ONE, ONE, q2)?;
        self.cnot(q2, q1)
    }

    /// Apply `mtrxs[k]` to `target` where the controls read `k`
    ///
    /// Bit `i` of `k` is the value of `controls[i]`.
    fn uniformly_controlled_single_bit(
        &mut self,
        controls: &[usize],
        target: usize,
        mtrxs: &[Matrix2],
    ) -> Result<()> {
        let count = pow2(controls.len());
        if (mtrxs.len() as u64) < count {
            return Err(QuantumError::DimensionMismatch {
                expected: count as usize,
                actual: mtrxs.len(),
            });
        }
        if controls.is_empty() {
            return self.mtrx(&mtrxs[0], target);
        }
        for (k, m) in mtrxs.iter().take(count as usize).enumerate() {
            let k = k as u64;
            for (i, &c) in controls.iter().enumerate() {
                if !bit_set(k, i) {
                    self.x(c)?;
                }
            }
            let applied = self.mc_mtrx(controls, m, target);
            for (i, &c) in controls.iter().enumerate() {
                if !bit_set(k, i) {
                    self.x(c)?;
                }
            }
            applied?;
        }
        Ok(())
    }

    /// Uniformly controlled RY, one angle per control permutation
    fn uniformly_controlled_ry(
        &mut self,
        controls: &[usize],
        target: usize,
        angles: &[f64],
    ) -> Result<()> {
        let mtrxs: Vec<Matrix2> = angles.iter().map(|&a| rotation_y(a)).collect();
        self.uniformly_controlled_single_bit(controls, target, &mtrxs)
    }

    /// Uniformly controlled RZ, one angle per control permutation
    fn uniformly_controlled_rz(
        &mut self,
        controls: &[usize],
        target: usize,
        angles: &[f64],
    ) -> Result<()> {
        let mtrxs: Vec<Matrix2> = angles.iter().map(|&a| rotation_z(a)).collect();
        self.uniformly_controlled_single_bit(controls, target, &mtrxs)
    }

    /// Phase `e^(iθ)` on odd parity of `mask`, `e^(-iθ)` on even
    fn uniform_parity_rz(&mut self, mask: u64, theta: f64) -> Result<()> {
        if mask >= self.max_power() {
            return Err(QuantumError::invalid_qubit(
                qshard_core::bits::log2(mask),
                self.num_qubits(),
            ));
        }
        let qubits: Vec<usize> = (0..self.num_qubits())
            .filter(|&q| bit_set(mask, q))
            .collect();
        let Some((&last, rest)) = qubits.split_last() else {
            return Ok(());
        };
        for &q in rest {
            self.cnot(q, last)?;
        }
        self.rz(2.0 * theta, last)?;
        for &q in rest.iter().rev() {
            self.cnot(q, last)?;
        }
        Ok(())
    }

    /// Probability of odd parity after rotating each qubit into its Pauli basis
    fn joint_ensemble_probability(&mut self, bases: &[(usize, Pauli)]) -> Result<f64> {
        let mut mask = 0u64;
        for &(q, basis) in bases {
            match basis {
                Pauli::X => self.h(q)?,
                Pauli::Y => {
                    self.is(q)?;
                    self.h(q)?;
                }
                Pauli::Z | Pauli::I => {}
            }
            if basis != Pauli::I {
                mask |= pow2(q);
            }
        }
        let prob = self.prob_parity(mask);
        for &(q, basis) in bases.iter().rev() {
            match basis {
                Pauli::X => self.h(q)?,
                Pauli::Y => {
                    self.h(q)?;
                    self.s(q)?;
                }
                Pauli::Z | Pauli::I => {}
            }
        }
        prob
    }

    /// Expected integer value of `bits` read as a little-endian register, plus `offset`
    fn expectation_bits_all(&mut self, bits: &[usize], offset: u64) -> Result<f64> {
        let mut expectation = offset as f64;
        for (i, &q) in bits.iter().enumerate() {
            expectation += pow2(i) as f64 * self.prob(q)?;
        }
        Ok(expectation)
    }

    /// Measure the register `[start, start + length)` qubit by qubit
    fn m_reg(&mut self, start: usize, length: usize) -> Result<u64> {
        check_range(start, length, self.num_qubits())?;
        let mut value = 0u64;
        for i in 0..length {
            if self.m(start + i)? {
                value |= pow2(i);
            }
        }
        Ok(value)
    }

    /// Measure the register, then flip it to `value`
    fn set_reg(&mut self, start: usize, length: usize, value: u64) -> Result<()> {
        let current = self.m_reg(start, length)?;
        let diff = (current ^ value) & (reg_mask(0, length));
        for i in 0..length {
            if bit_set(diff, i) {
                self.x(start + i)?;
            }
        }
        Ok(())
    }

    /// One-bit full adder; the sum lands on `carry_in`, `carry_out` starts |0>
    fn full_add(&mut self, in1: usize, in2: usize, carry_in: usize, carry_out: usize) -> Result<()> {
        self.ccnot(in1, in2, carry_out)?;
        self.cnot(in1, in2)?;
        self.ccnot(in2, carry_in, carry_out)?;
        self.cnot(in2, carry_in)?;
        self.cnot(in1, in2)
    }

    /// Inverse of [`full_add`](Self::full_add)
    fn ifull_add(&mut self, in1: usize, in2: usize, carry_in: usize, carry_out: usize) -> Result<()> {
        self.cnot(in1, in2)?;
        self.cnot(in2, carry_in)?;
        self.ccnot(in2, carry_in, carry_out)?;
        self.cnot(in1, in2)?;
        self.ccnot(in1, in2, carry_out)
    }
}

impl<T: QuantumEngine + ?Sized> GateOps for T {}
