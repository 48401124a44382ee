//! State-vector engine selected by configuration

use num_complex::Complex64;
use qshard_core::{
    ArithOp, Composable, EngineConfig, EngineKind, Matrix2, QRng, QuantumEngine, Result,
};
use tracing::debug;

use crate::dense::DenseEngine;
use crate::pager::PagedEngine;

/// A dense or paged state-vector engine
#[derive(Debug, Clone)]
pub enum QEngine {
    Cpu(DenseEngine),
    Pager(PagedEngine),
}

macro_rules! dispatch {
    ($self:expr, $e:ident => $body:expr) => {
        match $self {
            QEngine::Cpu($e) => $body,
            QEngine::Pager($e) => $body,
        }
    };
}

impl QEngine {
    /// Build the engine named by the outermost layer of `config`
    ///
    /// A `Pager` layer yields a [`PagedEngine`]; anything else yields a
    /// [`DenseEngine`].
    pub fn new(config: EngineConfig, num_qubits: usize, perm: u64, rng: QRng) -> Result<Self> {
        let engine = match config.outer_kind() {
            EngineKind::Pager => Self::Pager(PagedEngine::new(config, num_qubits, perm, rng)?),
            _ => Self::Cpu(DenseEngine::new(config, num_qubits, perm, rng)?),
        };
        debug!(num_qubits, kind = ?engine.kind(), "state-vector engine ready");
        Ok(engine)
    }

    /// Build an engine holding `amplitudes`
    pub fn from_amplitudes(
        config: EngineConfig,
        num_qubits: usize,
        amplitudes: &[Complex64],
        rng: QRng,
    ) -> Result<Self> {
        let mut engine = Self::new(config, num_qubits, 0, rng)?;
        engine.set_quantum_state(amplitudes)?;
        Ok(engine)
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Cpu(_) => EngineKind::Cpu,
            Self::Pager(_) => EngineKind::Pager,
        }
    }

    /// Native dense buffer, if the engine holds one
    pub fn amplitudes(&self) -> Option<&[Complex64]> {
        match self {
            Self::Cpu(e) => e.amplitudes(),
            Self::Pager(_) => None,
        }
    }

    fn into_dense(self) -> Result<DenseEngine> {
        match self {
            Self::Cpu(e) => Ok(e),
            Self::Pager(e) => e.into_dense(),
        }
    }
}

impl QuantumEngine for QEngine {
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

impl Composable for QEngine {
    fn spawn(&self, num_qubits: usize, perm: u64) -> Result<Self> {
        Self::new(self.config().clone(), num_qubits, perm, self.rng().clone())
    }

    fn compose_at(&mut self, other: Self, start: usize) -> Result<usize> {
        match (self, other) {
            (Self::Cpu(a), Self::Cpu(b)) => a.compose_at(b, start),
            (Self::Pager(a), Self::Pager(b)) => a.compose_at(b, start),
            (Self::Cpu(a), b) => a.compose_at(b.into_dense()?, start),
            (Self::Pager(a), b) => {
                let b = PagedEngine::from_dense(a.config().clone(), b.into_dense()?)?;
                a.compose_at(b, start)
            }
        }
    }

    fn decompose(&mut self, start: usize, length: usize) -> Result<Self> {
        Ok(match self {
            Self::Cpu(e) => Self::Cpu(e.decompose(start, length)?),
            Self::Pager(e) => Self::Pager(e.decompose(start, length)?),
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

    #[test]
    fn test_layer_selects_variant() {
        let rng = QRng::new(Some(2));
        let cpu = QEngine::new(EngineConfig::fast(), 3, 0, rng.clone()).unwrap();
        assert_eq!(cpu.kind(), EngineKind::Cpu);
        assert!(cpu.amplitudes().is_some());

        let paged_config = EngineConfig::fast().with_layers([EngineKind::Pager, EngineKind::Cpu]);
        let paged = QEngine::new(paged_config, 3, 0, rng).unwrap();
        assert_eq!(paged.kind(), EngineKind::Pager);
        assert!(paged.amplitudes().is_none());
    }

    #[test]
    fn test_compose_across_variants() {
        let rng = QRng::new(Some(2));
        let paged_config = EngineConfig::fast()
            .with_layers([EngineKind::Pager, EngineKind::Cpu])
            .with_page_qubits(1);
        let mut paged = QEngine::new(paged_config, 2, 0b01, rng.clone()).unwrap();
        let mut cpu = QEngine::new(EngineConfig::fast(), 1, 0, rng).unwrap();
        cpu.h(0).unwrap();
        paged.compose(cpu).unwrap();
        assert_eq!(paged.kind(), EngineKind::Pager);
        assert_eq!(paged.num_qubits(), 3);
        assert_relative_eq!(paged.prob(2).unwrap(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(paged.prob(0).unwrap(), 1.0, epsilon = 1e-12);
    }
}
