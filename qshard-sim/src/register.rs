//! The register handed to callers, in whichever representation the configuration names

use num_complex::Complex64;
use qshard_core::bits::MAX_QUBITS;
use qshard_core::{
    ArithOp, Composable, EngineConfig, EngineKind, Matrix2, QRng, QuantumEngine, Result,
};
use qshard_state::{QEngine, MAX_DENSE_QUBITS, MAX_PAGED_QUBITS};
use tracing::info;

use crate::stabilizer_hybrid::StabilizerHybrid;
use crate::unit::QUnit;

/// A quantum register backed by one of the representation layers
#[derive(Debug, Clone)]
pub enum Register {
    Engine(QEngine),
    Hybrid(Box<StabilizerHybrid>),
    Unit(Box<QUnit>),
}

macro_rules! dispatch {
    ($self:expr, $e:ident => $body:expr) => {
        match $self {
            Register::Engine($e) => $body,
            Register::Hybrid($e) => $body,
            Register::Unit($e) => $body,
        }
    };
}

/// Widest register the outermost layer of `config` can hold
pub(crate) fn layer_capacity(config: &EngineConfig) -> usize {
    match config.outer_kind() {
        EngineKind::Unit | EngineKind::StabilizerHybrid => MAX_QUBITS,
        EngineKind::Pager => MAX_PAGED_QUBITS,
        EngineKind::Cpu if config.sparse => MAX_QUBITS,
        EngineKind::Cpu => MAX_DENSE_QUBITS,
    }
}

impl Register {
    /// Build the register named by the outermost layer of `config`
    pub fn new(config: EngineConfig, num_qubits: usize, perm: u64, rng: QRng) -> Result<Self> {
        let register = Self::build(config, num_qubits, perm, rng)?;
        info!(num_qubits, kind = ?register.kind(), "register created");
        Ok(register)
    }

    /// Same as [`Register::new`] without the construction event, for sub-registers
    pub(crate) fn build(
        config: EngineConfig,
        num_qubits: usize,
        perm: u64,
        rng: QRng,
    ) -> Result<Self> {
        Ok(match config.outer_kind() {
            EngineKind::Unit => Self::Unit(Box::new(QUnit::new(config, num_qubits, perm, rng)?)),
            EngineKind::StabilizerHybrid => Self::Hybrid(Box::new(StabilizerHybrid::new(
                config, num_qubits, perm, rng,
            )?)),
            EngineKind::Pager | EngineKind::Cpu => {
                Self::Engine(QEngine::new(config, num_qubits, perm, rng)?)
            }
        })
    }

    /// Representation currently in use
    ///
    /// A hybrid that has switched still reports `StabilizerHybrid`; see
    /// [`StabilizerHybrid::is_stabilizer`].
    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Engine(e) => e.kind(),
            Self::Hybrid(_) => EngineKind::StabilizerHybrid,
            Self::Unit(_) => EngineKind::Unit,
        }
    }

    /// Collapse every layer down to a state-vector engine
    pub fn into_engine(self) -> Result<QEngine> {
        match self {
            Self::Engine(e) => Ok(e),
            Self::Hybrid(h) => h.into_engine(),
            Self::Unit(u) => u.into_register()?.into_engine(),
        }
    }

    fn into_hybrid(self, config: &EngineConfig) -> Result<StabilizerHybrid> {
        match self {
            Self::Hybrid(h) => Ok(*h),
            Self::Engine(e) => Ok(StabilizerHybrid::from_engine(config.clone(), e)),
            Self::Unit(u) => u.into_register()?.into_hybrid(config),
        }
    }

    fn into_unit(self, config: &EngineConfig) -> Result<QUnit> {
        match self {
            Self::Unit(u) => Ok(*u),
            other => QUnit::from_register(config.clone(), other),
        }
    }
}

impl QuantumEngine for Register {
    fn num_qubits(&self) -> usize {
        dispatch!(self, e => e.num_qubits())
    }

    fn config(&self) -> &EngineConfig {
        dispatch!(self, e => e.config())
    }

    fn rng(&self) -> &QRng {
        dispatch!(self, e => e.rng())
    }

    fn set_permutation(&mut self, perm: u64, phase: Option<Complex64>) -> Result<()> {
        dispatch!(self, e => e.set_permutation(perm, phase))
    }

    fn get_quantum_state(&mut self) -> Result<Vec<Complex64>> {
        dispatch!(self, e => e.get_quantum_state())
    }

    fn set_quantum_state(&mut self, state: &[Complex64]) -> Result<()> {
        dispatch!(self, e => e.set_quantum_state(state))
    }

    fn get_amplitude(&mut self, perm: u64) -> Result<Complex64> {
        dispatch!(self, e => e.get_amplitude(perm))
    }

    fn set_amplitude(&mut self, perm: u64, amp: Complex64) -> Result<()> {
        dispatch!(self, e => e.set_amplitude(perm, amp))
    }

    fn get_probs(&mut self) -> Result<Vec<f64>> {
        dispatch!(self, e => e.get_probs())
    }

    fn mtrx(&mut self, m: &Matrix2, target: usize) -> Result<()> {
        dispatch!(self, e => e.mtrx(m, target))
    }

    fn mc_mtrx(&mut self, controls: &[usize], m: &Matrix2, target: usize) -> Result<()> {
        dispatch!(self, e => e.mc_mtrx(controls, m, target))
    }

    fn mac_mtrx(&mut self, controls: &[usize], m: &Matrix2, target: usize) -> Result<()> {
        dispatch!(self, e => e.mac_mtrx(controls, m, target))
    }

    fn swap(&mut self, q1: usize, q2: usize) -> Result<()> {
        dispatch!(self, e => e.swap(q1, q2))
    }

    fn prob(&mut self, qubit: usize) -> Result<f64> {
        dispatch!(self, e => e.prob(qubit))
    }

    fn prob_all(&mut self, perm: u64) -> Result<f64> {
        dispatch!(self, e => e.prob_all(perm))
    }

    fn prob_mask(&mut self, mask: u64, perm: u64) -> Result<f64> {
        dispatch!(self, e => e.prob_mask(mask, perm))
    }

    fn prob_parity(&mut self, mask: u64) -> Result<f64> {
        dispatch!(self, e => e.prob_parity(mask))
    }

    fn force_m(&mut self, qubit: usize, forced: Option<bool>, do_apply: bool) -> Result<bool> {
        dispatch!(self, e => e.force_m(qubit, forced, do_apply))
    }

    fn force_m_parity(&mut self, mask: u64, forced: Option<bool>) -> Result<bool> {
        dispatch!(self, e => e.force_m_parity(mask, forced))
    }

    fn arithmetic(&mut self, op: &ArithOp) -> Result<()> {
        dispatch!(self, e => e.arithmetic(op))
    }

    fn normalize_state(&mut self) {
        dispatch!(self, e => e.normalize_state())
    }

    fn update_running_norm(&mut self) {
        dispatch!(self, e => e.update_running_norm())
    }

    fn finish(&mut self) {
        dispatch!(self, e => e.finish())
    }
}

impl Composable for Register {
    fn spawn(&self, num_qubits: usize, perm: u64) -> Result<Self> {
        Self::build(self.config().clone(), num_qubits, perm, self.rng().clone())
    }

    /// Tensor `other` in, converting it to this register's representation
    fn compose_at(&mut self, other: Self, start: usize) -> Result<usize> {
        self.finish();
        match self {
            Self::Engine(a) => {
                let mut other = other;
                other.finish();
                a.compose_at(other.into_engine()?, start)
            }
            Self::Hybrid(a) => {
                let config = a.config().clone();
                a.compose_at(other.into_hybrid(&config)?, start)
            }
            Self::Unit(a) => {
                let config = a.config().clone();
                a.compose_at(other.into_unit(&config)?, start)
            }
        }
    }

    fn decompose(&mut self, start: usize, length: usize) -> Result<Self> {
        Ok(match self {
            Self::Engine(e) => Self::Engine(e.decompose(start, length)?),
            Self::Hybrid(h) => Self::Hybrid(Box::new(h.decompose(start, length)?)),
            Self::Unit(u) => Self::Unit(Box::new(u.decompose(start, length)?)),
        })
    }

    fn dispose(&mut self, start: usize, length: usize) -> Result<()> {
        dispatch!(self, e => e.dispose(start, length))
    }

    fn dispose_perm(&mut self, start: usize, length: usize, perm: u64) -> Result<()> {
        dispatch!(self, e => e.dispose_perm(start, length, perm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use qshard_gates::GateOps;

    fn layered(layers: &[EngineKind], n: usize) -> Register {
        let config = EngineConfig::fast().with_layers(layers.to_vec());
        Register::new(config, n, 0, QRng::new(Some(17))).unwrap()
    }

    #[test]
    fn test_outer_layer_selects_variant() {
        assert_eq!(layered(&[EngineKind::Cpu], 2).kind(), EngineKind::Cpu);
        assert_eq!(
            layered(&[EngineKind::StabilizerHybrid, EngineKind::Cpu], 2).kind(),
            EngineKind::StabilizerHybrid
        );
        assert_eq!(
            layered(&[EngineKind::Unit, EngineKind::Cpu], 2).kind(),
            EngineKind::Unit
        );
    }

    #[test]
    fn test_compose_across_representations() {
        let mut unit = layered(&[EngineKind::Unit, EngineKind::StabilizerHybrid, EngineKind::Cpu], 2);
        unit.h(0).unwrap();
        unit.cnot(0, 1).unwrap();

        let mut dense = layered(&[EngineKind::Cpu], 1);
        dense.x(0).unwrap();
        unit.compose(dense).unwrap();
        assert_eq!(unit.num_qubits(), 3);
        assert_relative_eq!(unit.prob(2).unwrap(), 1.0, epsilon = 1e-10);
        assert_relative_eq!(unit.prob_parity(0b011).unwrap(), 0.0, epsilon = 1e-10);

        let mut engine = layered(&[EngineKind::Cpu], 1);
        engine.compose(unit).unwrap();
        assert_eq!(engine.kind(), EngineKind::Cpu);
        assert_relative_eq!(engine.prob(3).unwrap(), 1.0, epsilon = 1e-10);
        assert_relative_eq!(engine.prob_all(0b1110).unwrap(), 0.5, epsilon = 1e-10);
    }

    #[test]
    fn test_every_stack_agrees() {
        let stacks: [&[EngineKind]; 4] = [
            &[EngineKind::Cpu],
            &[EngineKind::Pager, EngineKind::Cpu],
            &[EngineKind::StabilizerHybrid, EngineKind::Cpu],
            &[EngineKind::Unit, EngineKind::StabilizerHybrid, EngineKind::Pager, EngineKind::Cpu],
        ];
        let mut reference = layered(stacks[0], 3);
        let circuit = |r: &mut Register| {
            r.h(0).unwrap();
            r.t(0).unwrap();
            r.cnot(0, 2).unwrap();
            r.crz(0.7, 2, 1).unwrap();
            r.ry(0.4, 1).unwrap();
            r.cz(1, 0).unwrap();
        };
        circuit(&mut reference);
        for stack in &stacks[1..] {
            let mut r = layered(stack, 3);
            circuit(&mut r);
            assert!(r.sum_sqr_diff(&mut reference).unwrap() < 1e-10, "{:?} diverged", stack);
        }
    }
}
