//! Gate library for qshard registers
//!
//! - [`matrices`]: constant 2x2 matrices and rotation constructors
//! - [`matrix_ops`]: 2x2 products, inverses, exponentials and shape tests
//! - [`ops`]: the [`GateOps`] extension trait with every named gate
//!
//! # Example
//!
//! ```
//! use qshard_gates::matrices::{HADAMARD, rotation_z};
//! use qshard_gates::matrix_ops::{is_phase, mul2x2};
//! use std::f64::consts::PI;
//!
//! let hzh = mul2x2(&HADAMARD, &mul2x2(&rotation_z(PI), &HADAMARD));
//! assert!(!is_phase(&hzh));
//! ```

pub mod matrices;
pub mod matrix_ops;
pub mod ops;

pub use ops::{GateOps, Pauli};
