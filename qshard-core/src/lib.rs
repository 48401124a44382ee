//! Core types and contracts for the qshard quantum register simulator
//!
//! This crate provides what every engine representation shares:
//! - [`QuantumEngine`] and [`Composable`]: the register contract
//! - [`EngineConfig`]: the configuration bundle and representation stack
//! - [`QRng`]: the shared random source
//! - [`ParallelExecutor`]: data-parallel dispatch over index ranges
//! - [`ArithOp`]: register arithmetic as index permutations
//!
//! # Example
//! ```
//! use qshard_core::{EngineConfig, EngineKind};
//!
//! let config = EngineConfig::new()
//!     .with_layers(vec![EngineKind::StabilizerHybrid, EngineKind::Cpu])
//!     .with_seed(1);
//! assert!(config.validate().is_ok());
//! ```

pub mod arith;
pub mod bits;
pub mod complex;
pub mod config;
pub mod engine;
pub mod error;
pub mod parallel;
pub mod rng;

pub use arith::ArithOp;
pub use complex::Matrix2;
pub use config::{EngineConfig, EngineKind, SeparabilityPolicy};
pub use engine::{check_controlled, ArithmeticOps, Composable, QuantumEngine};
pub use error::{QuantumError, Result};
pub use num_complex::Complex64;
pub use parallel::ParallelExecutor;
pub use rng::QRng;
