//! Register arithmetic descriptors
//!
//! Every arithmetic operation is a permutation (or a partial permutation with
//! a sign) of amplitude indices. Engines receive an [`ArithOp`] through
//! [`QuantumEngine::arithmetic`](crate::QuantumEngine::arithmetic) and run it as
//! one whole-vector remapping pass.

use std::sync::Arc;

use crate::bits::{pow2, pow2_mask, MAX_QUBITS};
use crate::error::{check_qubit, check_range, QuantumError, Result};

/// A register arithmetic operation over qubit ranges
#[derive(Debug, Clone, PartialEq)]
pub enum ArithOp {
    /// `reg += value mod 2^length`, gated on `controls`
    Inc {
        value: u64,
        start: usize,
        length: usize,
        controls: Vec<usize>,
    },
    /// `reg += value` with carry in and out through `carry`
    IncC {
        value: u64,
        start: usize,
        length: usize,
        carry: usize,
    },
    /// `reg -= value` with borrow in and out through `carry`
    DecC {
        value: u64,
        start: usize,
        length: usize,
        carry: usize,
    },
    /// Signed `reg += value`; states that overflow with `overflow` set change sign
    IncS {
        value: u64,
        start: usize,
        length: usize,
        overflow: usize,
    },
    /// Signed add with both an overflow flag and a carry
    IncSC {
        value: u64,
        start: usize,
        length: usize,
        overflow: usize,
        carry: usize,
    },
    /// Signed subtract with both an overflow flag and a borrow
    DecSC {
        value: u64,
        start: usize,
        length: usize,
        overflow: usize,
        carry: usize,
    },
    /// `(carry:reg) = reg * value`, carry register starting at zero
    Mul {
        value: u64,
        start: usize,
        carry_start: usize,
        length: usize,
        controls: Vec<usize>,
    },
    /// Inverse of [`ArithOp::Mul`]
    Div {
        value: u64,
        start: usize,
        carry_start: usize,
        length: usize,
        controls: Vec<usize>,
    },
    /// `out ^= (in * value) mod modulus` when `inverse` is false, its uncompute otherwise
    MulModNOut {
        value: u64,
        modulus: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
        controls: Vec<usize>,
        inverse: bool,
    },
    /// `out ^= base^in mod modulus`
    PowModNOut {
        base: u64,
        modulus: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
        controls: Vec<usize>,
    },
    /// `value ^= table[index]`
    IndexedLda {
        index_start: usize,
        index_length: usize,
        value_start: usize,
        value_length: usize,
        table: Arc<[u64]>,
    },
    /// `value += table[index]` with carry
    IndexedAdc {
        index_start: usize,
        index_length: usize,
        value_start: usize,
        value_length: usize,
        carry: usize,
        table: Arc<[u64]>,
    },
    /// `value -= table[index]` with borrow
    IndexedSbc {
        index_start: usize,
        index_length: usize,
        value_start: usize,
        value_length: usize,
        carry: usize,
        table: Arc<[u64]>,
    },
    /// Rotate the register left by `shift` bits
    Rol {
        shift: usize,
        start: usize,
        length: usize,
    },
    /// Negate the amplitude of the all-zero register value
    ZeroPhaseFlip { start: usize, length: usize },
    /// Negate every amplitude whose register value is below `bound`
    PhaseFlipIfLess {
        bound: u64,
        start: usize,
        length: usize,
        flag: Option<usize>,
    },
    /// Negate every amplitude
    PhaseFlip,
}

impl ArithOp {
    /// Short name used in errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Inc { .. } => "INC",
            Self::IncC { .. } => "INCC",
            Self::DecC { .. } => "DECC",
            Self::IncS { .. } => "INCS",
            Self::IncSC { .. } => "INCSC",
            Self::DecSC { .. } => "DECSC",
            Self::Mul { .. } => "MUL",
            Self::Div { .. } => "DIV",
            Self::MulModNOut { inverse: false, .. } => "MULModNOut",
            Self::MulModNOut { inverse: true, .. } => "IMULModNOut",
            Self::PowModNOut { .. } => "POWModNOut",
            Self::IndexedLda { .. } => "IndexedLDA",
            Self::IndexedAdc { .. } => "IndexedADC",
            Self::IndexedSbc { .. } => "IndexedSBC",
            Self::Rol { .. } => "ROL",
            Self::ZeroPhaseFlip { .. } => "ZeroPhaseFlip",
            Self::PhaseFlipIfLess { .. } => "PhaseFlipIfLess",
            Self::PhaseFlip => "PhaseFlip",
        }
    }

    /// Every qubit the operation reads or writes, ascending and deduplicated
    pub fn qubits(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut range = |start: usize, length: usize| out.extend(start..start + length);
        match self {
            Self::Inc { start, length, .. } => range(*start, *length),
            Self::IncC {
                start,
                length,
                carry,
                ..
            }
            | Self::DecC {
                start,
                length,
                carry,
                ..
            } => {
                range(*start, *length);
                range(*carry, 1);
            }
            Self::IncS {
                start,
                length,
                overflow,
                ..
            } => {
                range(*start, *length);
                range(*overflow, 1);
            }
            Self::IncSC {
                start,
                length,
                overflow,
                carry,
                ..
            }
            | Self::DecSC {
                start,
                length,
                overflow,
                carry,
                ..
            } => {
                range(*start, *length);
                range(*overflow, 1);
                range(*carry, 1);
            }
            Self::Mul {
                start,
                carry_start,
                length,
                ..
            }
            | Self::Div {
                start,
                carry_start,
                length,
                ..
            } => {
                range(*start, *length);
                range(*carry_start, *length);
            }
            Self::MulModNOut {
                in_start,
                out_start,
                length,
                ..
            }
            | Self::PowModNOut {
                in_start,
                out_start,
                length,
                ..
            } => {
                range(*in_start, *length);
                range(*out_start, *length);
            }
            Self::IndexedLda {
                index_start,
                index_length,
                value_start,
                value_length,
                ..
            } => {
                range(*index_start, *index_length);
                range(*value_start, *value_length);
            }
            Self::IndexedAdc {
                index_start,
                index_length,
                value_start,
                value_length,
                carry,
                ..
            }
            | Self::IndexedSbc {
                index_start,
                index_length,
                value_start,
                value_length,
                carry,
                ..
            } => {
                range(*index_start, *index_length);
                range(*value_start, *value_length);
                range(*carry, 1);
            }
            Self::Rol { start, length, .. } | Self::ZeroPhaseFlip { start, length } => {
                range(*start, *length)
            }
            Self::PhaseFlipIfLess {
                start,
                length,
                flag,
                ..
            } => {
                range(*start, *length);
                if let Some(f) = flag {
                    range(*f, 1);
                }
            }
            Self::PhaseFlip => {}
        }
        out.extend(self.controls().iter().copied());
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Control qubits, if the operation is controlled
    pub fn controls(&self) -> &[usize] {
        match self {
            Self::Inc { controls, .. }
            | Self::Mul { controls, .. }
            | Self::Div { controls, .. }
            | Self::MulModNOut { controls, .. }
            | Self::PowModNOut { controls, .. } => controls,
            _ => &[],
        }
    }

    /// Rewrite every qubit index through `f`
    ///
    /// Register starts are mapped as single qubits; callers must keep each
    /// register contiguous under `f`.
    pub fn remap(&self, f: impl Fn(usize) -> usize) -> Self {
        let mut op = self.clone();
        let map_all = |v: &mut Vec<usize>| v.iter_mut().for_each(|q| *q = f(*q));
        match &mut op {
            Self::Inc {
                start, controls, ..
            } => {
                *start = f(*start);
                map_all(controls);
            }
            Self::IncC { start, carry, .. } | Self::DecC { start, carry, .. } => {
                *start = f(*start);
                *carry = f(*carry);
            }
            Self::IncS {
                start, overflow, ..
            } => {
                *start = f(*start);
                *overflow = f(*overflow);
            }
            Self::IncSC {
                start,
                overflow,
                carry,
                ..
            }
            | Self::DecSC {
                start,
                overflow,
                carry,
                ..
            } => {
                *start = f(*start);
                *overflow = f(*overflow);
                *carry = f(*carry);
            }
            Self::Mul {
                start,
                carry_start,
                controls,
                ..
            }
            | Self::Div {
                start,
                carry_start,
                controls,
                ..
            } => {
                *start = f(*start);
                *carry_start = f(*carry_start);
                map_all(controls);
            }
            Self::MulModNOut {
                in_start,
                out_start,
                controls,
                ..
            }
            | Self::PowModNOut {
                in_start,
                out_start,
                controls,
                ..
            } => {
                *in_start = f(*in_start);
                *out_start = f(*out_start);
                map_all(controls);
            }
            Self::IndexedLda {
                index_start,
                value_start,
                ..
            } => {
                *index_start = f(*index_start);
                *value_start = f(*value_start);
            }
            Self::IndexedAdc {
                index_start,
                value_start,
                carry,
                ..
            }
            | Self::IndexedSbc {
                index_start,
                value_start,
                carry,
                ..
            } => {
                *index_start = f(*index_start);
                *value_start = f(*value_start);
                *carry = f(*carry);
            }
            Self::Rol { start, .. } | Self::ZeroPhaseFlip { start, .. } => *start = f(*start),
            Self::PhaseFlipIfLess { start, flag, .. } => {
                *start = f(*start);
                if let Some(q) = flag {
                    *q = f(*q);
                }
            }
            Self::PhaseFlip => {}
        }
        op
    }

    /// Reject operands that cannot define a permutation on `num_qubits`
    ///
    /// # Errors
    ///
    /// Returns [`QuantumError::InvalidRange`]/[`QuantumError::InvalidQubit`] for
    /// registers outside the engine and [`QuantumError::InvalidArithmeticOperand`]
    /// for zero divisors, bad moduli, overlapping registers or short tables.
    pub fn validate(&self, num_qubits: usize) -> Result<()> {
        let name = self.name();
        let operand = |reason: &str| Err(QuantumError::invalid_operand(name, reason));

        let registers: Vec<(usize, usize)> = match self {
            Self::Inc { start, length, .. } | Self::Rol { start, length, .. } => {
                vec![(*start, *length)]
            }
            Self::ZeroPhaseFlip { start, length } => vec![(*start, *length)],
            Self::IncC {
                start,
                length,
                carry,
                ..
            }
            | Self::DecC {
                start,
                length,
                carry,
                ..
            } => vec![(*start, *length), (*carry, 1)],
            Self::IncS {
                start,
                length,
                overflow,
                ..
            } => vec![(*start, *length), (*overflow, 1)],
            Self::IncSC {
                start,
                length,
                overflow,
                carry,
                ..
            }
            | Self::DecSC {
                start,
                length,
                overflow,
                carry,
                ..
            } => {
                if overflow == carry {
                    return operand("overflow and carry must be distinct qubits");
                }
                vec![(*start, *length), (*overflow, 1), (*carry, 1)]
            }
            Self::Mul {
                start,
                carry_start,
                length,
                ..
            }
            | Self::Div {
                start,
                carry_start,
                length,
                ..
            } => vec![(*start, *length), (*carry_start, *length)],
            Self::MulModNOut {
                in_start,
                out_start,
                length,
                ..
            }
            | Self::PowModNOut {
                in_start,
                out_start,
                length,
                ..
            } => vec![(*in_start, *length), (*out_start, *length)],
            Self::IndexedLda {
                index_start,
                index_length,
                value_start,
                value_length,
                ..
            } => vec![(*index_start, *index_length), (*value_start, *value_length)],
            Self::IndexedAdc {
                index_start,
                index_length,
                value_start,
                value_length,
                carry,
                ..
            }
            | Self::IndexedSbc {
                index_start,
                index_length,
                value_start,
                value_length,
                carry,
                ..
            } => vec![
                (*index_start, *index_length),
                (*value_start, *value_length),
                (*carry, 1),
            ],
            Self::PhaseFlipIfLess {
                start,
                length,
                flag,
                ..
            } => {
                let mut v = vec![(*start, *length)];
                if let Some(f) = flag {
                    v.push((*f, 1));
                }
                v
            }
            Self::PhaseFlip => Vec::new(),
        };

        let mut used = 0u64;
        for &(start, length) in &registers {
            check_range(start, length, num_qubits)?;
            if length == 0 {
                return operand("register length must be positive");
            }
            if length >= MAX_QUBITS {
                return operand("register is wider than the index type");
            }
            let mask = pow2_mask(length) << start;
            if used & mask != 0 {
                return operand("registers overlap");
            }
            used |= mask;
        }
        for &c in self.controls() {
            check_qubit(c, num_qubits)?;
            if used & pow2(c) != 0 {
                return operand("control overlaps a target register");
            }
            used |= pow2(c);
        }

        match self {
            Self::Div { value: 0, .. } => operand("divisor is zero"),
            Self::Mul { value: 0, .. } => operand("multiplier is zero"),
            Self::Mul { value, length, .. } | Self::Div { value, length, .. }
                if *value >= pow2(*length) =>
            {
                operand("operand does not fit in the register")
            }
            Self::MulModNOut {
                modulus, length, ..
            }
            | Self::PowModNOut {
                modulus, length, ..
            } => {
                if *modulus == 0 {
                    operand("modulus is zero")
                } else if *modulus > pow2(*length) {
                    operand("modulus does not fit in the output register")
                } else {
                    Ok(())
                }
            }
            Self::IndexedLda {
                index_length,
                table,
                ..
            }
            | Self::IndexedAdc {
                index_length,
                table,
                ..
            }
            | Self::IndexedSbc {
                index_length,
                table,
                ..
            } => {
                if (table.len() as u64) < pow2(*index_length) {
                    operand("lookup table is shorter than the index space")
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}
