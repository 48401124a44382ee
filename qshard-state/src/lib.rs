//! State-vector engines
//!
//! This crate holds the amplitude-level representations of a register:
//!
//! - [`DenseEngine`]: all `2^n` amplitudes in one buffer (or a sparse map of
//!   the nonzero ones), with lazy norm tracking
//! - [`PagedEngine`]: the same vector split into independently owned pages,
//!   with cross-page gates routed through a page shuffle
//! - [`QEngine`]: whichever of the two the configuration names
//!
//! Register arithmetic is compiled to index permutations in [`arithmetic`].
//!
//! # Example
//!
//! ```
//! use qshard_core::{EngineConfig, EngineKind, QRng, QuantumEngine};
//! use qshard_gates::GateOps;
//! use qshard_state::QEngine;
//!
//! let config = EngineConfig::fast()
//!     .with_layers([EngineKind::Pager, EngineKind::Cpu])
//!     .with_page_qubits(2);
//! let mut engine = QEngine::new(config, 4, 0, QRng::new(Some(9))).unwrap();
//! engine.h(3).unwrap();
//! engine.cnot(3, 0).unwrap();
//! assert!((engine.prob(0).unwrap() - 0.5).abs() < 1e-12);
//! ```

pub mod arithmetic;
pub mod dense;
pub mod engine;
pub mod kernels;
pub mod pager;
pub mod storage;

pub use dense::{DenseEngine, MAX_DENSE_QUBITS};
pub use engine::QEngine;
pub use pager::{PagedEngine, MAX_PAGED_QUBITS};
pub use storage::StateStorage;
