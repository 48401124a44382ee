//! Representation layers above the state-vector engines
//!
//! This crate stacks cheaper representations on top of `qshard-state` and
//! picks between them from the configuration's layer list:
//!
//! - [`Tableau`]: a CHP stabilizer tableau for Clifford-only states
//! - [`StabilizerHybrid`]: runs on the tableau until a non-Clifford gate
//!   arrives, then switches to an amplitude engine for good
//! - [`QUnit`]: tracks every qubit separately and only builds sub-engines for
//!   qubits that are actually entangled, buffering controlled phases between
//!   them
//! - [`Register`]: whichever of the above the outermost layer names
//! - [`SimulatorContext`]: caller-owned configuration, random source and
//!   register handles
//!
//! # Example
//!
//! ```
//! use qshard_core::{EngineConfig, EngineKind, QuantumEngine};
//! use qshard_gates::GateOps;
//! use qshard_sim::SimulatorContext;
//!
//! let config = EngineConfig::fast()
//!     .with_layers([EngineKind::Unit, EngineKind::StabilizerHybrid, EngineKind::Cpu])
//!     .with_seed(7);
//! let ctx = SimulatorContext::new(config).unwrap();
//! let mut register = ctx.create(3, 0).unwrap();
//! register.h(0).unwrap();
//! register.cnot(0, 2).unwrap();
//! assert!((register.prob_all(0b101).unwrap() - 0.5).abs() < 1e-12);
//! assert_eq!(register.m(0).unwrap(), register.m(2).unwrap());
//! ```

mod arena;
pub mod context;
pub mod register;
pub mod stabilizer_hybrid;
pub mod tableau;
pub mod unit;

pub use context::{RegisterHandle, SimulatorContext};
pub use register::Register;
pub use stabilizer_hybrid::StabilizerHybrid;
pub use tableau::Tableau;
pub use unit::QUnit;
