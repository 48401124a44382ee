//! Common register contract
//!
//! [`QuantumEngine`] is the primitive interface every representation
//! implements: 2x2 gates with optional controls, probabilities, measurement,
//! amplitude access and register arithmetic, all addressed by integer qubit
//! index. Structural operations that produce or consume another register of
//! the same representation live in [`Composable`].

use num_complex::Complex64;

use crate::arith::ArithOp;
use crate::bits::{parity, pow2};
use crate::complex::{clamp_prob, Matrix2, ONE, ZERO};
use crate::config::EngineConfig;
use crate::error::{check_qubit, QuantumError, Result};
use crate::rng::QRng;

/// Primitive operations of a quantum register
pub trait QuantumEngine: Send {
    /// Number of qubits in the register
    fn num_qubits(&self) -> usize;

    /// Size of the amplitude index space, `2^n`
    fn max_power(&self) -> u64 {
        pow2(self.num_qubits())
    }

    /// Configuration the register was built with
    fn config(&self) -> &EngineConfig;

    /// Random source used for sampling
    fn rng(&self) -> &QRng;

    /// Reset to basis state `perm`, with `phase` or a configured global phase
    fn set_permutation(&mut self, perm: u64, phase: Option<Complex64>) -> Result<()>;

    /// Copy out the full amplitude vector
    ///
    /// Fails with a capacity error when the state cannot be held densely.
    fn get_quantum_state(&mut self) -> Result<Vec<Complex64>>;

    /// Overwrite the full amplitude vector
    fn set_quantum_state(&mut self, state: &[Complex64]) -> Result<()>;

    /// Amplitude of basis state `perm`
    fn get_amplitude(&mut self, perm: u64) -> Result<Complex64>;

    /// Overwrite the amplitude of basis state `perm`
    fn set_amplitude(&mut self, perm: u64, amp: Complex64) -> Result<()>;

    /// Probability of every basis state
    fn get_probs(&mut self) -> Result<Vec<f64>> {
        Ok(self
            .get_quantum_state()?
            .iter()
            .map(|a| a.norm_sqr())
            .collect())
    }

    /// Apply `m` to `target`
    fn mtrx(&mut self, m: &Matrix2, target: usize) -> Result<()>;

    /// Apply `m` to `target` where every control is |1>
    fn mc_mtrx(&mut self, controls: &[usize], m: &Matrix2, target: usize) -> Result<()>;

    /// Apply `m` to `target` where every control is |0>
    fn mac_mtrx(&mut self, controls: &[usize], m: &Matrix2, target: usize) -> Result<()>;

    /// Diagonal gate `diag(top_left, bottom_right)`
    fn phase(&mut self, top_left: Complex64, bottom_right: Complex64, target: usize) -> Result<()> {
        self.mtrx(&[[top_left, ZERO], [ZERO, bottom_right]], target)
    }

    /// Anti-diagonal gate `[[0, top_right], [bottom_left, 0]]`
    fn invert(&mut self, top_right: Complex64, bottom_left: Complex64, target: usize) -> Result<()> {
        self.mtrx(&[[ZERO, top_right], [bottom_left, ZERO]], target)
    }

    /// Controlled diagonal gate
    fn mc_phase(
        &mut self,
        controls: &[usize],
        top_left: Complex64,
        bottom_right: Complex64,
        target: usize,
    ) -> Result<()> {
        self.mc_mtrx(controls, &[[top_left, ZERO], [ZERO, bottom_right]], target)
    }

    /// Controlled anti-diagonal gate
    fn mc_invert(
        &mut self,
        controls: &[usize],
        top_right: Complex64,
        bottom_left: Complex64,
        target: usize,
    ) -> Result<()> {
        self.mc_mtrx(controls, &[[ZERO, top_right], [bottom_left, ZERO]], target)
    }

    /// Anti-controlled diagonal gate
    fn mac_phase(
        &mut self,
        controls: &[usize],
        top_left: Complex64,
        bottom_right: Complex64,
        target: usize,
    ) -> Result<()> {
        self.mac_mtrx(controls, &[[top_left, ZERO], [ZERO, bottom_right]], target)
    }

    /// Anti-controlled anti-diagonal gate
    fn mac_invert(
        &mut self,
        controls: &[usize],
        top_right: Complex64,
        bottom_left: Complex64,
        target: usize,
    ) -> Result<()> {
        self.mac_mtrx(controls, &[[ZERO, top_right], [bottom_left, ZERO]], target)
    }

    /// Exchange two qubits
    fn swap(&mut self, q1: usize, q2: usize) -> Result<()> {
        if q1 == q2 {
            return Ok(());
        }
        self.mc_invert(&[q1], ONE, ONE, q2)?;
        self.mc_invert(&[q2], ONE, ONE, q1)?;
        self.mc_invert(&[q1], ONE, ONE, q2)
    }

    /// Probability that `qubit` reads |1>
    fn prob(&mut self, qubit: usize) -> Result<f64>;

    /// Probability of basis state `perm`
    fn prob_all(&mut self, perm: u64) -> Result<f64> {
        Ok(clamp_prob(self.get_amplitude(perm)?.norm_sqr()))
    }

    /// Probability that the bits under `mask` equal `perm & mask`
    fn prob_mask(&mut self, mask: u64, perm: u64) -> Result<f64> {
        let target = perm & mask;
        let total = self
            .get_probs()?
            .iter()
            .enumerate()
            .filter(|(i, _)| (*i as u64) & mask == target)
            .map(|(_, p)| *p)
            .sum::<f64>();
        Ok(clamp_prob(total))
    }

    /// Probability that the register `[start, start + length)` holds `value`
    fn prob_reg(&mut self, start: usize, length: usize, value: u64) -> Result<f64> {
        crate::error::check_range(start, length, self.num_qubits())?;
        let mask = crate::bits::reg_mask(start, length);
        self.prob_mask(mask, value << start)
    }

    /// Probability of odd parity over the bits under `mask`
    fn prob_parity(&mut self, mask: u64) -> Result<f64> {
        if mask >= self.max_power() {
            return Err(QuantumError::invalid_qubit(
                crate::bits::log2(mask),
                self.num_qubits(),
            ));
        }
        let odd = self
            .get_probs()?
            .iter()
            .enumerate()
            .filter(|(i, _)| parity((*i as u64) & mask))
            .map(|(_, p)| *p)
            .sum::<f64>();
        Ok(clamp_prob(odd))
    }

    /// Measure `qubit`, optionally forcing the outcome
    ///
    /// With `do_apply` false the outcome is sampled (or forced) and returned
    /// without collapsing the state.
    ///
    /// # Errors
    ///
    /// Returns [`QuantumError::ZeroProbability`] when forcing an outcome that
    /// cannot occur.
    fn force_m(&mut self, qubit: usize, forced: Option<bool>, do_apply: bool) -> Result<bool>;

    /// Measure `qubit`
    fn m(&mut self, qubit: usize) -> Result<bool> {
        self.force_m(qubit, None, true)
    }

    /// Measure every qubit, returning the resulting basis state
    fn m_all(&mut self) -> Result<u64> {
        let mut result = 0u64;
        for q in 0..self.num_qubits() {
            if self.m(q)? {
                result |= pow2(q);
            }
        }
        Ok(result)
    }

    /// Measure the parity of the bits under `mask`
    fn force_m_parity(&mut self, mask: u64, forced: Option<bool>) -> Result<bool> {
        let p_odd = self.prob_parity(mask)?;
        let outcome = match forced {
            Some(r) => r,
            None => self.rng().rand() < p_odd,
        };
        let keep = if outcome { p_odd } else { 1.0 - p_odd };
        if keep <= 0.0 {
            return Err(QuantumError::ZeroProbability {
                qubit: crate::bits::log2(mask),
                outcome,
            });
        }
        let scale = 1.0 / keep.sqrt();
        let state: Vec<Complex64> = self
            .get_quantum_state()?
            .into_iter()
            .enumerate()
            .map(|(i, a)| {
                if parity((i as u64) & mask) == outcome {
                    a * scale
                } else {
                    ZERO
                }
            })
            .collect();
        self.set_quantum_state(&state)?;
        Ok(outcome)
    }

    /// Apply a register arithmetic permutation
    fn arithmetic(&mut self, op: &ArithOp) -> Result<()>;

    /// Divide out any accumulated norm drift
    fn normalize_state(&mut self) {}

    /// Recompute the tracked norm exactly
    fn update_running_norm(&mut self) {}

    /// Wait for any queued work to complete
    fn finish(&mut self) {}

    /// `1 - |<self|other>|^2`, zero for identical states up to global phase
    fn sum_sqr_diff(&mut self, other: &mut dyn QuantumEngine) -> Result<f64> {
        if self.num_qubits() != other.num_qubits() {
            return Ok(1.0);
        }
        let a = self.get_quantum_state()?;
        let b = other.get_quantum_state()?;
        let inner: Complex64 = a.iter().zip(b.iter()).map(|(x, y)| x.conj() * y).sum();
        Ok(clamp_prob(1.0 - inner.norm_sqr()))
    }

    /// Whether `other` holds the same state up to global phase
    fn approx_compare(&mut self, other: &mut dyn QuantumEngine, tolerance: f64) -> Result<bool> {
        Ok(self.sum_sqr_diff(other)? <= tolerance)
    }
}

/// Structural operations between registers of the same representation
pub trait Composable: QuantumEngine + Sized {
    /// Fresh register of this representation in basis state `perm`
    fn spawn(&self, num_qubits: usize, perm: u64) -> Result<Self>;

    /// Tensor `other` in at qubit `start`, returning `start`
    fn compose_at(&mut self, other: Self, start: usize) -> Result<usize>;

    /// Tensor `other` in above the current qubits, returning its first index
    fn compose(&mut self, other: Self) -> Result<usize> {
        let start = self.num_qubits();
        self.compose_at(other, start)
    }

    /// Split `[start, start + length)` out into its own register
    fn decompose(&mut self, start: usize, length: usize) -> Result<Self>;

    /// Discard `[start, start + length)`
    fn dispose(&mut self, start: usize, length: usize) -> Result<()>;

    /// Discard `[start, start + length)`, known to hold basis value `perm`
    ///
    /// By default `perm` is advisory and the range is disposed as with
    /// [`Composable::dispose`]; representations that can use it override this.
    fn dispose_perm(&mut self, start: usize, length: usize, _perm: u64) -> Result<()> {
        self.dispose(start, length)
    }

    /// Insert `length` fresh |0> qubits at `start`
    fn allocate(&mut self, start: usize, length: usize) -> Result<usize> {
        if length == 0 {
            return Ok(start);
        }
        let fresh = self.spawn(length, 0)?;
        self.compose_at(fresh, start)
    }

    /// Decompose only if the range is a product state with the rest within `tolerance`
    fn try_decompose(&mut self, start: usize, length: usize, tolerance: f64) -> Result<Option<Self>>
    where
        Self: Clone,
    {
        let mut original = self.clone();
        let mut remainder = self.clone();
        let part = match remainder.decompose(start, length) {
            Ok(part) => part,
            Err(QuantumError::NonSeparable { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut rebuilt = remainder.clone();
        rebuilt.compose_at(part.clone(), start)?;
        if original.sum_sqr_diff(&mut rebuilt)? > tolerance {
            return Ok(None);
        }
        *self = remainder;
        Ok(Some(part))
    }
}

/// Validate a target and its controls for a register of `num_qubits`
pub fn check_controlled(controls: &[usize], target: usize, num_qubits: usize) -> Result<()> {
    check_qubit(target, num_qubits)?;
    for (i, &c) in controls.iter().enumerate() {
        check_qubit(c, num_qubits)?;
        if c == target || controls[..i].contains(&c) {
            return Err(QuantumError::invalid_qubit(c, num_qubits));
        }
    }
    Ok(())
}

/// Convenience constructors for [`ArithOp`] on any engine
pub trait ArithmeticOps: QuantumEngine {
    /// Add a classical integer to a register, modulo `2^length`
    fn inc(&mut self, value: u64, start: usize, length: usize) -> Result<()> {
        self.arithmetic(&ArithOp::Inc {
            value,
            start,
            length,
            controls: Vec::new(),
        })
    }

    /// Subtract a classical integer from a register, modulo `2^length`
    fn dec(&mut self, value: u64, start: usize, length: usize) -> Result<()> {
        let m = crate::bits::pow2_mask(length);
        self.inc((m - (value & m)).wrapping_add(1) & m, start, length)
    }

    /// Controlled [`inc`](Self::inc)
    fn cinc(&mut self, value: u64, start: usize, length: usize, controls: &[usize]) -> Result<()> {
        self.arithmetic(&ArithOp::Inc {
            value,
            start,
            length,
            controls: controls.to_vec(),
        })
    }

    /// Controlled [`dec`](Self::dec)
    fn cdec(&mut self, value: u64, start: usize, length: usize, controls: &[usize]) -> Result<()> {
        let m = crate::bits::pow2_mask(length);
        self.cinc((m - (value & m)).wrapping_add(1) & m, start, length, controls)
    }

    /// Add with carry
    fn incc(&mut self, value: u64, start: usize, length: usize, carry: usize) -> Result<()> {
        self.arithmetic(&ArithOp::IncC {
            value,
            start,
            length,
            carry,
        })
    }

    /// Subtract with borrow
    fn decc(&mut self, value: u64, start: usize, length: usize, carry: usize) -> Result<()> {
        self.arithmetic(&ArithOp::DecC {
            value,
            start,
            length,
            carry,
        })
    }

    /// Signed add, phase-flipping overflowed states where `overflow` is set
    fn incs(&mut self, value: u64, start: usize, length: usize, overflow: usize) -> Result<()> {
        self.arithmetic(&ArithOp::IncS {
            value,
            start,
            length,
            overflow,
        })
    }

    /// Signed subtract, phase-flipping overflowed states where `overflow` is set
    fn decs(&mut self, value: u64, start: usize, length: usize, overflow: usize) -> Result<()> {
        let m = crate::bits::pow2_mask(length);
        self.incs((m - (value & m)).wrapping_add(1) & m, start, length, overflow)
    }

    /// Signed add with carry
    fn incsc(
        &mut self,
        value: u64,
        start: usize,
        length: usize,
        overflow: usize,
        carry: usize,
    ) -> Result<()> {
        self.arithmetic(&ArithOp::IncSC {
            value,
            start,
            length,
            overflow,
            carry,
        })
    }

    /// Signed subtract with borrow
    fn decsc(
        &mut self,
        value: u64,
        start: usize,
        length: usize,
        overflow: usize,
        carry: usize,
    ) -> Result<()> {
        self.arithmetic(&ArithOp::DecSC {
            value,
            start,
            length,
            overflow,
            carry,
        })
    }

    /// Multiply, spilling high bits into the carry register
    fn mul(&mut self, value: u64, start: usize, carry_start: usize, length: usize) -> Result<()> {
        self.arithmetic(&ArithOp::Mul {
            value,
            start,
            carry_start,
            length,
            controls: Vec::new(),
        })
    }

    /// Inverse of [`mul`](Self::mul)
    fn div(&mut self, value: u64, start: usize, carry_start: usize, length: usize) -> Result<()> {
        self.arithmetic(&ArithOp::Div {
            value,
            start,
            carry_start,
            length,
            controls: Vec::new(),
        })
    }

    /// Controlled [`mul`](Self::mul)
    fn cmul(
        &mut self,
        value: u64,
        start: usize,
        carry_start: usize,
        length: usize,
        controls: &[usize],
    ) -> Result<()> {
        self.arithmetic(&ArithOp::Mul {
            value,
            start,
            carry_start,
            length,
            controls: controls.to_vec(),
        })
    }

    /// Controlled [`div`](Self::div)
    fn cdiv(
        &mut self,
        value: u64,
        start: usize,
        carry_start: usize,
        length: usize,
        controls: &[usize],
    ) -> Result<()> {
        self.arithmetic(&ArithOp::Div {
            value,
            start,
            carry_start,
            length,
            controls: controls.to_vec(),
        })
    }

    /// `out ^= (in * value) mod modulus`
    fn mul_mod_n_out(
        &mut self,
        value: u64,
        modulus: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
    ) -> Result<()> {
        self.cmul_mod_n_out(value, modulus, in_start, out_start, length, &[])
    }

    /// Uncompute of [`mul_mod_n_out`](Self::mul_mod_n_out)
    fn imul_mod_n_out(
        &mut self,
        value: u64,
        modulus: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
    ) -> Result<()> {
        self.cimul_mod_n_out(value, modulus, in_start, out_start, length, &[])
    }

    /// Controlled [`mul_mod_n_out`](Self::mul_mod_n_out)
    fn cmul_mod_n_out(
        &mut self,
        value: u64,
        modulus: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
        controls: &[usize],
    ) -> Result<()> {
        self.arithmetic(&ArithOp::MulModNOut {
            value,
            modulus,
            in_start,
            out_start,
            length,
            controls: controls.to_vec(),
            inverse: false,
        })
    }

    /// Controlled [`imul_mod_n_out`](Self::imul_mod_n_out)
    fn cimul_mod_n_out(
        &mut self,
        value: u64,
        modulus: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
        controls: &[usize],
    ) -> Result<()> {
        self.arithmetic(&ArithOp::MulModNOut {
            value,
            modulus,
            in_start,
            out_start,
            length,
            controls: controls.to_vec(),
            inverse: true,
        })
    }

    /// `out ^= base^in mod modulus`
    fn pow_mod_n_out(
        &mut self,
        base: u64,
        modulus: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
    ) -> Result<()> {
        self.cpow_mod_n_out(base, modulus, in_start, out_start, length, &[])
    }

    /// Controlled [`pow_mod_n_out`](Self::pow_mod_n_out)
    fn cpow_mod_n_out(
        &mut self,
        base: u64,
        modulus: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
        controls: &[usize],
    ) -> Result<()> {
        self.arithmetic(&ArithOp::PowModNOut {
            base,
            modulus,
            in_start,
            out_start,
            length,
            controls: controls.to_vec(),
        })
    }

    /// Rotate a register left
    fn rol(&mut self, shift: usize, start: usize, length: usize) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        self.arithmetic(&ArithOp::Rol {
            shift: shift % length,
            start,
            length,
        })
    }

    /// Rotate a register right
    fn ror(&mut self, shift: usize, start: usize, length: usize) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        self.rol((length - shift % length) % length, start, length)
    }

    /// Negate the amplitude of the all-zero register value
    fn zero_phase_flip(&mut self, start: usize, length: usize) -> Result<()> {
        self.arithmetic(&ArithOp::ZeroPhaseFlip { start, length })
    }

    /// Negate amplitudes whose register value is below `bound`
    fn phase_flip_if_less(&mut self, bound: u64, start: usize, length: usize) -> Result<()> {
        self.arithmetic(&ArithOp::PhaseFlipIfLess {
            bound,
            start,
            length,
            flag: None,
        })
    }

    /// Negate amplitudes whose register value is below `bound` and `flag` is set
    fn cphase_flip_if_less(
        &mut self,
        bound: u64,
        start: usize,
        length: usize,
        flag: usize,
    ) -> Result<()> {
        self.arithmetic(&ArithOp::PhaseFlipIfLess {
            bound,
            start,
            length,
            flag: Some(flag),
        })
    }

    /// Negate every amplitude
    fn phase_flip(&mut self) -> Result<()> {
        self.arithmetic(&ArithOp::PhaseFlip)
    }

    /// Table lookup into a value register
    fn indexed_lda(
        &mut self,
        index_start: usize,
        index_length: usize,
        value_start: usize,
        value_length: usize,
        table: &[u64],
    ) -> Result<()> {
        self.arithmetic(&ArithOp::IndexedLda {
            index_start,
            index_length,
            value_start,
            value_length,
            table: table.into(),
        })
    }

    /// Table lookup added into a value register with carry
    fn indexed_adc(
        &mut self,
        index_start: usize,
        index_length: usize,
        value_start: usize,
        value_length: usize,
        carry: usize,
        table: &[u64],
    ) -> Result<()> {
        self.arithmetic(&ArithOp::IndexedAdc {
            index_start,
            index_length,
            value_start,
            value_length,
            carry,
            table: table.into(),
        })
    }

    /// Table lookup subtracted from a value register with borrow
    fn indexed_sbc(
        &mut self,
        index_start: usize,
        index_length: usize,
        value_start: usize,
        value_length: usize,
        carry: usize,
        table: &[u64],
    ) -> Result<()> {
        self.arithmetic(&ArithOp::IndexedSbc {
            index_start,
            index_length,
            value_start,
            value_length,
            carry,
            table: table.into(),
        })
    }
}

impl<T: QuantumEngine + ?Sized> ArithmeticOps for T {}
