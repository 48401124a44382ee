//! Register arithmetic as amplitude index permutations
//!
//! Each [`ArithOp`] becomes a map from source index to destination index
//! plus a sign, which the engine applies in one [`permute`](crate::kernels::permute)
//! pass. Operations with a carry qubit first measure it and fold the result
//! into the classical operand, so the remaining map only acts on states
//! whose carry reads |0>.

use qshard_core::bits::{bit_set, get_reg, pow2, pow2_mask, set_reg};
use qshard_core::complex::ONE;
use qshard_core::{ArithOp, QuantumEngine, Result};

/// Source index to `(destination, sign)`, `None` to drop
pub type IndexMap = Box<dyn Fn(u64) -> Option<(u64, f64)> + Send + Sync>;

/// Measure the carry qubit of `op` and return the operand adjustment
///
/// For additions a set carry adds one; for subtractions a clear carry
/// (pending borrow) subtracts one. The carry is left at |0>.
pub fn resolve_carry<E: QuantumEngine + ?Sized>(engine: &mut E, op: &ArithOp) -> Result<u64> {
    let (carry, is_add) = match op {
        ArithOp::IncC { carry, .. }
        | ArithOp::IncSC { carry, .. }
        | ArithOp::IndexedAdc { carry, .. } => (*carry, true),
        ArithOp::DecC { carry, .. }
        | ArithOp::DecSC { carry, .. }
        | ArithOp::IndexedSbc { carry, .. } => (*carry, false),
        _ => return Ok(0),
    };
    let has_carry = engine.m(carry)?;
    if has_carry {
        engine.invert(ONE, ONE, carry)?;
    }
    Ok(match (is_add, has_carry) {
        (true, true) | (false, false) => 1,
        _ => 0,
    })
}

/// Signed overflow of `a + b` in a `length_power`-sized two's complement register
pub fn is_overflow_add(a: u64, b: u64, sign_mask: u64, length_power: u64) -> bool {
    let b = b & (length_power - 1);
    if a & b & sign_mask != 0 {
        let na = ((!a) & (length_power - 1)) + 1;
        let nb = ((!b) & (length_power - 1)) + 1;
        na + nb > sign_mask
    } else if (!a) & (!b) & sign_mask != 0 {
        a + b >= sign_mask
    } else {
        false
    }
}

/// `base^exp mod modulus`
pub fn pow_mod(base: u64, mut exp: u64, modulus: u64) -> u64 {
    if modulus == 1 {
        return 0;
    }
    let m = modulus as u128;
    let mut result: u128 = 1;
    let mut b = (base as u128) % m;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result * b % m;
        }
        b = b * b % m;
        exp >>= 1;
    }
    result as u64
}

fn controls_mask(controls: &[usize]) -> u64 {
    controls.iter().fold(0, |m, &c| m | pow2(c))
}

/// Build the index map for `op`, given the carry adjustment from [`resolve_carry`]
pub fn index_map(op: &ArithOp, carry_in: u64) -> IndexMap {
    match op.clone() {
        ArithOp::Inc {
            value,
            start,
            length,
            controls,
        } => {
            let cmask = controls_mask(&controls);
            let mask = pow2_mask(length);
            Box::new(move |i| {
                if i & cmask != cmask {
                    return Some((i, 1.0));
                }
                let out = get_reg(i, start, length).wrapping_add(value) & mask;
                Some((set_reg(i, start, length, out), 1.0))
            })
        }
        ArithOp::IncC {
            value,
            start,
            length,
            carry,
        } => add_with_carry(value & pow2_mask(length), carry_in, start, length, carry),
        ArithOp::DecC {
            value,
            start,
            length,
            carry,
        } => {
            let to_sub = (value & pow2_mask(length)) + carry_in;
            add_with_carry(pow2(length) - to_sub, 0, start, length, carry)
        }
        ArithOp::IncS {
            value,
            start,
            length,
            overflow,
        } => {
            let length_power = pow2(length);
            let sign_mask = pow2(length - 1);
            let to_add = value & (length_power - 1);
            Box::new(move |i| {
                let reg = get_reg(i, start, length);
                let out = (reg + to_add) & (length_power - 1);
                let sign = if bit_set(i, overflow)
                    && is_overflow_add(reg, to_add, sign_mask, length_power)
                {
                    -1.0
                } else {
                    1.0
                };
                Some((set_reg(i, start, length, out), sign))
            })
        }
        ArithOp::IncSC {
            value,
            start,
            length,
            overflow,
            carry,
        } => signed_add_with_carry(
            (value & pow2_mask(length)) + carry_in,
            start,
            length,
            overflow,
            carry,
        ),
        ArithOp::DecSC {
            value,
            start,
            length,
            overflow,
            carry,
        } => {
            let to_sub = (value & pow2_mask(length)) + carry_in;
            signed_add_with_carry(pow2(length) - to_sub, start, length, overflow, carry)
        }
        ArithOp::Mul {
            value,
            start,
            carry_start,
            length,
            controls,
        } => {
            let cmask = controls_mask(&controls);
            let mask = pow2_mask(length);
            Box::new(move |i| {
                if i & cmask != cmask {
                    return Some((i, 1.0));
                }
                if get_reg(i, carry_start, length) != 0 {
                    return None;
                }
                let product = get_reg(i, start, length) as u128 * value as u128;
                let low = (product as u64) & mask;
                let high = ((product >> length) as u64) & mask;
                Some((
                    set_reg(set_reg(i, start, length, low), carry_start, length, high),
                    1.0,
                ))
            })
        }
        ArithOp::Div {
            value,
            start,
            carry_start,
            length,
            controls,
        } => {
            let cmask = controls_mask(&controls);
            Box::new(move |i| {
                if i & cmask != cmask {
                    return Some((i, 1.0));
                }
                let product = ((get_reg(i, carry_start, length) as u128) << length)
                    | get_reg(i, start, length) as u128;
                let divisor = value as u128;
                if product % divisor != 0 {
                    return None;
                }
                let quotient = product / divisor;
                if quotient >= pow2(length) as u128 {
                    return None;
                }
                Some((
                    set_reg(
                        set_reg(i, start, length, quotient as u64),
                        carry_start,
                        length,
                        0,
                    ),
                    1.0,
                ))
            })
        }
        ArithOp::MulModNOut {
            value,
            modulus,
            in_start,
            out_start,
            length,
            controls,
            ..
        } => {
            let cmask = controls_mask(&controls);
            Box::new(move |i| {
                if i & cmask != cmask {
                    return Some((i, 1.0));
                }
                let input = get_reg(i, in_start, length) as u128;
                let r = (input * value as u128 % modulus as u128) as u64;
                let out = get_reg(i, out_start, length) ^ r;
                Some((set_reg(i, out_start, length, out), 1.0))
            })
        }
        ArithOp::PowModNOut {
            base,
            modulus,
            in_start,
            out_start,
            length,
            controls,
        } => {
            let cmask = controls_mask(&controls);
            Box::new(move |i| {
                if i & cmask != cmask {
                    return Some((i, 1.0));
                }
                let r = pow_mod(base, get_reg(i, in_start, length), modulus);
                let out = get_reg(i, out_start, length) ^ r;
                Some((set_reg(i, out_start, length, out), 1.0))
            })
        }
        ArithOp::IndexedLda {
            index_start,
            index_length,
            value_start,
            value_length,
            table,
        } => {
            let vmask = pow2_mask(value_length);
            Box::new(move |i| {
                let looked_up = table[get_reg(i, index_start, index_length) as usize] & vmask;
                let out = get_reg(i, value_start, value_length) ^ looked_up;
                Some((set_reg(i, value_start, value_length, out), 1.0))
            })
        }
        ArithOp::IndexedAdc {
            index_start,
            index_length,
            value_start,
            value_length,
            carry,
            table,
        } => {
            let vmask = pow2_mask(value_length);
            Box::new(move |i| {
                if bit_set(i, carry) {
                    return None;
                }
                let looked_up = table[get_reg(i, index_start, index_length) as usize] & vmask;
                let sum = get_reg(i, value_start, value_length) + looked_up + carry_in;
                let out = set_reg(i, value_start, value_length, sum & vmask);
                let out = if sum > vmask { out | pow2(carry) } else { out };
                Some((out, 1.0))
            })
        }
        ArithOp::IndexedSbc {
            index_start,
            index_length,
            value_start,
            value_length,
            carry,
            table,
        } => {
            let vmask = pow2_mask(value_length);
            let length_power = pow2(value_length);
            Box::new(move |i| {
                if bit_set(i, carry) {
                    return None;
                }
                let looked_up = table[get_reg(i, index_start, index_length) as usize] & vmask;
                let diff =
                    get_reg(i, value_start, value_length) + length_power - looked_up - carry_in;
                Some(if diff >= length_power {
                    (
                        set_reg(i, value_start, value_length, diff - length_power) | pow2(carry),
                        1.0,
                    )
                } else {
                    (set_reg(i, value_start, value_length, diff), 1.0)
                })
            })
        }
        ArithOp::Rol {
            shift,
            start,
            length,
        } => {
            let shift = shift % length.max(1);
            let mask = pow2_mask(length);
            Box::new(move |i| {
                if shift == 0 {
                    return Some((i, 1.0));
                }
                let reg = get_reg(i, start, length);
                let out = ((reg << shift) | (reg >> (length - shift))) & mask;
                Some((set_reg(i, start, length, out), 1.0))
            })
        }
        ArithOp::ZeroPhaseFlip { start, length } => Box::new(move |i| {
            let sign = if get_reg(i, start, length) == 0 {
                -1.0
            } else {
                1.0
            };
            Some((i, sign))
        }),
        ArithOp::PhaseFlipIfLess {
            bound,
            start,
            length,
            flag,
        } => Box::new(move |i| {
            let flagged = flag.map_or(true, |f| bit_set(i, f));
            let sign = if flagged && get_reg(i, start, length) < bound {
                -1.0
            } else {
                1.0
            };
            Some((i, sign))
        }),
        ArithOp::PhaseFlip => Box::new(|i| Some((i, -1.0))),
    }
}

fn add_with_carry(to_add: u64, carry_in: u64, start: usize, length: usize, carry: usize) -> IndexMap {
    let length_power = pow2(length);
    let to_add = to_add + carry_in;
    Box::new(move |i| {
        if bit_set(i, carry) {
            return None;
        }
        let sum = get_reg(i, start, length) + to_add;
        Some(if sum >= length_power {
            (set_reg(i, start, length, sum - length_power) | pow2(carry), 1.0)
        } else {
            (set_reg(i, start, length, sum), 1.0)
        })
    })
}

fn signed_add_with_carry(
    to_add: u64,
    start: usize,
    length: usize,
    overflow: usize,
    carry: usize,
) -> IndexMap {
    let length_power = pow2(length);
    let sign_mask = pow2(length - 1);
    Box::new(move |i| {
        if bit_set(i, carry) {
            return None;
        }
        let reg = get_reg(i, start, length);
        let sum = reg + to_add;
        let sign = if bit_set(i, overflow) && is_overflow_add(reg, to_add, sign_mask, length_power) {
            -1.0
        } else {
            1.0
        };
        Some(if sum >= length_power {
            (set_reg(i, start, length, sum - length_power) | pow2(carry), sign)
        } else {
            (set_reg(i, start, length, sum), sign)
        })
    })
}
