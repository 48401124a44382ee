//! Dense state-vector engine
//!
//! [`DenseEngine`] holds every amplitude of an n-qubit register and applies
//! gates by pairing amplitudes that differ only in the target bit. The norm is
//! tracked lazily: gates do not renormalize, and the tracked squared norm is
//! only recomputed (or divided out) when a probability, measurement or
//! amplitude query needs an exact value.
//!
//! # Example
//!
//! ```
//! use qshard_core::{EngineConfig, QRng, QuantumEngine};
//! use qshard_gates::GateOps;
//! use qshard_state::DenseEngine;
//!
//! let mut engine = DenseEngine::new(EngineConfig::fast(), 2, 0, QRng::new(Some(1))).unwrap();
//! engine.h(0).unwrap();
//! engine.cnot(0, 1).unwrap();
//! assert!((engine.prob(1).unwrap() - 0.5).abs() < 1e-12);
//! ```

use ahash::AHashMap;
use num_complex::Complex64;
use qshard_core::bits::{bit_set, get_reg, parity, pow2, pow2_mask, MAX_QUBITS};
use qshard_core::complex::{clamp_prob, is_prob_zero, polar, Matrix2, ONE, ZERO};
use qshard_core::error::{check_qubit, check_range};
use qshard_core::{
    check_controlled, ArithOp, Composable, EngineConfig, ParallelExecutor, QRng, QuantumEngine,
    QuantumError, Result, SeparabilityPolicy,
};
use qshard_gates::matrix_ops::{is_identity, is_invert, is_phase, scale2x2};
use tracing::{debug, warn};

use crate::arithmetic::{index_map, resolve_carry, IndexMap};
use crate::kernels::{self, ControlSpec};
use crate::storage::StateStorage;

/// Widest register a dense buffer may hold
pub const MAX_DENSE_QUBITS: usize = 30;

/// Drift of the tracked norm from 1 that triggers a rescale
const NORM_DRIFT: f64 = 1e-12;

/// A register stored as a full amplitude vector
#[derive(Debug, Clone)]
pub struct DenseEngine {
    num_qubits: usize,
    storage: StateStorage,
    /// Tracked squared norm; `None` when it must be recomputed
    running_norm: Option<f64>,
    config: EngineConfig,
    rng: QRng,
    exec: ParallelExecutor,
}

pub(crate) fn check_capacity(num_qubits: usize, sparse: bool) -> Result<()> {
    let max = if sparse { MAX_QUBITS } else { MAX_DENSE_QUBITS };
    if num_qubits > max {
        return Err(QuantumError::CapacityExceeded {
            requested: num_qubits,
            max,
        });
    }
    Ok(())
}

fn unit_phase(z: Complex64) -> Complex64 {
    let n = z.norm();
    if n > 0.0 {
        z / n
    } else {
        ONE
    }
}

/// Probability tally indexed by sub-register value
enum Tally {
    Dense(Vec<f64>),
    Sparse(AHashMap<u64, f64>),
}

impl Tally {
    fn new(power: u64, sparse: bool) -> Self {
        if sparse {
            Self::Sparse(AHashMap::new())
        } else {
            Self::Dense(vec![0.0; power as usize])
        }
    }

    fn add(&mut self, k: u64, p: f64) {
        match self {
            Self::Dense(v) => v[k as usize] += p,
            Self::Sparse(m) => *m.entry(k).or_insert(0.0) += p,
        }
    }

    fn get(&self, k: u64) -> f64 {
        match self {
            Self::Dense(v) => v[k as usize],
            Self::Sparse(m) => m.get(&k).copied().unwrap_or(0.0),
        }
    }

    fn argmax(&self) -> u64 {
        let mut best = (0u64, -1.0f64);
        let mut visit = |k: u64, p: f64| {
            if p > best.1 {
                best = (k, p);
            }
        };
        match self {
            Self::Dense(v) => v.iter().enumerate().for_each(|(k, p)| visit(k as u64, *p)),
            Self::Sparse(m) => m.iter().for_each(|(k, p)| visit(*k, *p)),
        }
        best.0
    }

    fn keys(&self) -> Vec<u64> {
        match self {
            Self::Dense(v) => (0..v.len() as u64).collect(),
            Self::Sparse(m) => m.keys().copied().collect(),
        }
    }
}

/// Both halves of a separated register
struct Separated {
    part: StateStorage,
    remainder: StateStorage,
}

impl DenseEngine {
    /// Create an engine in basis state `perm`
    ///
    /// # Arguments
    /// * `config` - Engine configuration
    /// * `num_qubits` - Number of qubits
    /// * `perm` - Initial basis state
    /// * `rng` - Random source, shared with any register composed into this one
    ///
    /// # Errors
    /// Returns [`QuantumError::CapacityExceeded`] if the register is too wide
    /// for the configured storage.
    pub fn new(config: EngineConfig, num_qubits: usize, perm: u64, rng: QRng) -> Result<Self> {
        Self::with_phase(config, num_qubits, perm, rng, None)
    }

    /// Create an engine in basis state `perm` with an explicit global phase
    pub fn with_phase(
        config: EngineConfig,
        num_qubits: usize,
        perm: u64,
        rng: QRng,
        phase: Option<Complex64>,
    ) -> Result<Self> {
        check_capacity(num_qubits, config.sparse)?;
        debug!(num_qubits, perm, sparse = config.sparse, "creating dense engine");
        let exec = ParallelExecutor::new(config.parallel_threshold);
        let mut engine = Self {
            num_qubits,
            storage: StateStorage::zeroed(num_qubits, config.sparse),
            running_norm: Some(1.0),
            config,
            rng,
            exec,
        };
        engine.set_permutation(perm, phase)?;
        Ok(engine)
    }

    /// Create an engine holding `amplitudes`
    pub fn from_amplitudes(
        config: EngineConfig,
        num_qubits: usize,
        amplitudes: &[Complex64],
        rng: QRng,
    ) -> Result<Self> {
        let mut engine = Self::with_phase(config, num_qubits, 0, rng, Some(ONE))?;
        engine.set_quantum_state(amplitudes)?;
        Ok(engine)
    }

    pub(crate) fn from_storage(
        config: EngineConfig,
        num_qubits: usize,
        storage: StateStorage,
        rng: QRng,
    ) -> Result<Self> {
        check_capacity(num_qubits, storage.is_sparse())?;
        let exec = ParallelExecutor::new(config.parallel_threshold);
        Ok(Self {
            num_qubits,
            storage,
            running_norm: None,
            config,
            rng,
            exec,
        })
    }

    /// Send every amplitude through an arithmetic index map
    pub(crate) fn apply_index_map(&mut self, map: IndexMap) {
        let max_power = self.max_power();
        self.storage = kernels::permute(&self.storage, &self.exec, max_power, max_power, map);
        self.running_norm = None;
    }

    /// Native dense buffer, if the engine stores one
    pub fn amplitudes(&self) -> Option<&[Complex64]> {
        self.storage.as_slice()
    }

    /// Underlying storage
    pub fn storage(&self) -> &StateStorage {
        &self.storage
    }

    pub(crate) fn storage_mut(&mut self) -> &mut StateStorage {
        self.running_norm = None;
        &mut self.storage
    }

    /// Executor used by this engine's kernels
    pub fn executor(&self) -> &ParallelExecutor {
        &self.exec
    }

    /// Tracked squared norm, recomputed if stale
    pub fn norm(&mut self) -> f64 {
        match self.running_norm {
            Some(n) => n,
            None => {
                let n = self.storage.norm(&self.exec);
                self.running_norm = Some(n);
                n
            }
        }
    }

    /// Unnormalized weight of `qubit` reading |1>
    pub fn prob_raw(&self, qubit: usize) -> f64 {
        let mask = pow2(qubit);
        self.storage.masked_norm(&self.exec, mask, mask)
    }

    /// Multiply every amplitude by `factor`
    pub fn scale(&mut self, factor: Complex64) {
        self.storage
            .scale(&self.exec, factor, self.config.amplitude_floor);
        self.running_norm = None;
    }

    /// Zero every amplitude
    pub fn zero_amplitudes(&mut self) {
        self.storage.clear();
        self.running_norm = Some(0.0);
    }

    /// Whether every amplitude is zero
    pub fn is_zero(&self) -> bool {
        self.storage.nonzero_count() == 0
    }

    /// Keep amplitudes where `qubit` reads `outcome`, scaled by `nrm`; zero the rest
    pub fn collapse(&mut self, qubit: usize, outcome: bool, nrm: f64) {
        let mask = pow2(qubit);
        let keep = if outcome { mask } else { 0 };
        let factor = Complex64::new(nrm, 0.0);
        self.storage.scale_by(&self.exec, move |i| {
            if i & mask == keep {
                factor
            } else {
                ZERO
            }
        });
        self.running_norm = None;
    }

    fn initial_phase(&self, phase: Option<Complex64>) -> Complex64 {
        match phase {
            Some(p) => p,
            None if self.config.random_global_phase => polar(1.0, self.rng.rand_angle()),
            None => ONE,
        }
    }

    /// Apply `m` with the given controls, picking the phase, invert or general kernel
    fn apply_gate(
        &mut self,
        controls: &[usize],
        anti: bool,
        m: &Matrix2,
        target: usize,
    ) -> Result<()> {
        check_controlled(controls, target, self.num_qubits)?;
        if is_identity(m) {
            return Ok(());
        }
        let ctrl = if controls.is_empty() {
            ControlSpec::none()
        } else {
            ControlSpec::new(controls, anti)
        };
        let max_power = self.max_power();

        if is_phase(m) {
            self.normalize_if_needed();
            kernels::apply_phase(&mut self.storage, &self.exec, m[0][0], m[1][1], target, ctrl);
            return Ok(());
        }
        if is_invert(m) {
            self.normalize_if_needed();
            kernels::apply_invert(
                &mut self.storage,
                &self.exec,
                max_power,
                m[0][1],
                m[1][0],
                target,
                controls,
                ctrl,
            );
            return Ok(());
        }

        let fuse_norm = self.config.do_normalize && controls.is_empty();
        if fuse_norm {
            let norm = self.norm();
            let nrm = if norm > 0.0 { 1.0 / norm.sqrt() } else { 1.0 };
            let scaled = scale2x2(m, Complex64::new(nrm, 0.0));
            let total = kernels::apply_2x2(
                &mut self.storage,
                &self.exec,
                max_power,
                &scaled,
                target,
                controls,
                ctrl,
                Some(self.config.amplitude_floor),
            );
            self.running_norm = Some(total);
        } else {
            self.normalize_if_needed();
            kernels::apply_2x2(
                &mut self.storage,
                &self.exec,
                max_power,
                m,
                target,
                controls,
                ctrl,
                None,
            );
        }
        Ok(())
    }

    fn normalize_if_needed(&mut self) {
        if self.config.do_normalize {
            self.normalize_state();
        }
    }

    fn separate(&mut self, start: usize, length: usize) -> Result<Separated> {
        check_range(start, length, self.num_qubits)?;
        self.normalize_state();
        let n = self.num_qubits;
        let sparse = self.storage.is_sparse();
        let low_mask = pow2_mask(start);
        let split = |i: u64| -> (u64, u64) {
            (
                get_reg(i, start, length),
                (i & low_mask) | ((i >> (start + length)) << start),
            )
        };
        let join = |k: u64, r: u64| -> u64 {
            (r & low_mask) | (k << start) | ((r >> start) << (start + length))
        };

        let mut part_prob = Tally::new(pow2(length), sparse);
        let mut rem_prob = Tally::new(pow2(n - length), sparse);
        self.storage.for_each_nonzero(|i, a| {
            let (k, r) = split(i);
            let p = a.norm_sqr();
            part_prob.add(k, p);
            rem_prob.add(r, p);
        });

        let k_star = part_prob.argmax();
        let r_star = rem_prob.argmax();
        let ref_phase = unit_phase(self.storage.read(join(k_star, r_star))).conj();

        let mut part = StateStorage::zeroed(length, sparse);
        for k in part_prob.keys() {
            let p = part_prob.get(k);
            if p > 0.0 {
                part.write(k, unit_phase(self.storage.read(join(k, r_star))) * p.sqrt());
            }
        }
        let mut remainder = StateStorage::zeroed(n - length, sparse);
        for r in rem_prob.keys() {
            let p = rem_prob.get(r);
            if p > 0.0 {
                remainder.write(
                    r,
                    unit_phase(self.storage.read(join(k_star, r))) * ref_phase * p.sqrt(),
                );
            }
        }

        // |sv - part⊗rem|² over all indices, using that the product has unit norm
        let mut residual = 1.0;
        self.storage.for_each_nonzero(|i, a| {
            let (k, r) = split(i);
            let prod = part.read(k) * remainder.read(r);
            residual += (a - prod).norm_sqr() - prod.norm_sqr();
        });
        let residual = residual.max(0.0);

        let tolerance = self.config.separability_threshold;
        if residual > tolerance {
            match self.config.separability_policy {
                SeparabilityPolicy::Strict => {
                    return Err(QuantumError::NonSeparable {
                        start,
                        length,
                        residual,
                    })
                }
                SeparabilityPolicy::Lenient => {
                    warn!(start, length, residual, "decomposing an entangled range");
                }
            }
        }

        Ok(Separated { part, remainder })
    }

    fn replace_storage(&mut self, num_qubits: usize, storage: StateStorage) {
        self.num_qubits = num_qubits;
        self.storage = storage;
        self.running_norm = None;
    }
}

impl QuantumEngine for DenseEngine {
    fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn rng(&self) -> &QRng {
        &self.rng
    }

    fn set_permutation(&mut self, perm: u64, phase: Option<Complex64>) -> Result<()> {
        if perm >= self.max_power() {
            return Err(QuantumError::invalid_operand(
                "SetPermutation",
                format!("permutation {} outside {} qubits", perm, self.num_qubits),
            ));
        }
        let phase = self.initial_phase(phase);
        self.storage.clear();
        self.storage.write(perm, phase);
        self.running_norm = Some(1.0);
        Ok(())
    }

    fn get_quantum_state(&mut self) -> Result<Vec<Complex64>> {
        self.normalize_state();
        Ok(self.storage.to_vec(self.max_power()))
    }

    fn set_quantum_state(&mut self, state: &[Complex64]) -> Result<()> {
        let expected = self.max_power() as usize;
        if state.len() != expected {
            return Err(QuantumError::DimensionMismatch {
                expected,
                actual: state.len(),
            });
        }
        self.storage = StateStorage::from_amplitudes(state, self.storage.is_sparse());
        self.running_norm = None;
        Ok(())
    }

    fn get_amplitude(&mut self, perm: u64) -> Result<Complex64> {
        if perm >= self.max_power() {
            return Err(QuantumError::invalid_operand(
                "GetAmplitude",
                format!("permutation {} outside {} qubits", perm, self.num_qubits),
            ));
        }
        let norm = self.norm();
        let amp = self.storage.read(perm);
        Ok(if norm > 0.0 { amp / norm.sqrt() } else { amp })
    }

    fn set_amplitude(&mut self, perm: u64, amp: Complex64) -> Result<()> {
        if perm >= self.max_power() {
            return Err(QuantumError::invalid_operand(
                "SetAmplitude",
                format!("permutation {} outside {} qubits", perm, self.num_qubits),
            ));
        }
        self.storage.write(perm, amp);
        self.running_norm = None;
        Ok(())
    }

    fn get_probs(&mut self) -> Result<Vec<f64>> {
        self.normalize_state();
        Ok(self
            .storage
            .to_vec(self.max_power())
            .iter()
            .map(|a| a.norm_sqr())
            .collect())
    }

    fn mtrx(&mut self, m: &Matrix2, target: usize) -> Result<()> {
        self.apply_gate(&[], false, m, target)
    }

    fn mc_mtrx(&mut self, controls: &[usize], m: &Matrix2, target: usize) -> Result<()> {
        self.apply_gate(controls, false, m, target)
    }

    fn mac_mtrx(&mut self, controls: &[usize], m: &Matrix2, target: usize) -> Result<()> {
        self.apply_gate(controls, true, m, target)
    }

    fn swap(&mut self, q1: usize, q2: usize) -> Result<()> {
        check_qubit(q1, self.num_qubits)?;
        check_qubit(q2, self.num_qubits)?;
        if q1 == q2 {
            return Ok(());
        }
        let max_power = self.max_power();
        self.storage = kernels::permute(&self.storage, &self.exec, max_power, max_power, |i| {
            let (b1, b2) = (bit_set(i, q1), bit_set(i, q2));
            if b1 == b2 {
                Some((i, 1.0))
            } else {
                Some((i ^ (pow2(q1) | pow2(q2)), 1.0))
            }
        });
        Ok(())
    }

    fn prob(&mut self, qubit: usize) -> Result<f64> {
        check_qubit(qubit, self.num_qubits)?;
        let norm = self.norm();
        if norm <= 0.0 {
            return Ok(0.0);
        }
        Ok(clamp_prob(self.prob_raw(qubit) / norm))
    }

    fn prob_mask(&mut self, mask: u64, perm: u64) -> Result<f64> {
        if mask >= self.max_power() {
            return Err(QuantumError::invalid_qubit(
                qshard_core::bits::log2(mask),
                self.num_qubits,
            ));
        }
        let norm = self.norm();
        if norm <= 0.0 {
            return Ok(0.0);
        }
        Ok(clamp_prob(
            self.storage.masked_norm(&self.exec, mask, perm & mask) / norm,
        ))
    }

    fn prob_parity(&mut self, mask: u64) -> Result<f64> {
        if mask >= self.max_power() {
            return Err(QuantumError::invalid_qubit(
                qshard_core::bits::log2(mask),
                self.num_qubits,
            ));
        }
        let norm = self.norm();
        if norm <= 0.0 || mask == 0 {
            return Ok(0.0);
        }
        let odd = match &self.storage {
            StateStorage::Dense(v) => self.exec.par_sum(v.len() as u64, |i| {
                if parity(i & mask) {
                    v[i as usize].norm_sqr()
                } else {
                    0.0
                }
            }),
            StateStorage::Sparse(m) => m
                .iter()
                .filter(|(&i, _)| parity(i & mask))
                .map(|(_, a)| a.norm_sqr())
                .sum(),
        };
        Ok(clamp_prob(odd / norm))
    }

    fn force_m(&mut self, qubit: usize, forced: Option<bool>, do_apply: bool) -> Result<bool> {
        let p1 = self.prob(qubit)?;
        let outcome = match forced {
            Some(r) => r,
            None => self.rng.rand() < p1,
        };
        let p = if outcome { p1 } else { 1.0 - p1 };
        if is_prob_zero(p) {
            return Err(QuantumError::ZeroProbability { qubit, outcome });
        }
        if do_apply {
            let nrm = 1.0 / (p * self.norm()).sqrt();
            self.collapse(qubit, outcome, nrm);
            self.running_norm = Some(1.0);
        }
        Ok(outcome)
    }

    fn force_m_parity(&mut self, mask: u64, forced: Option<bool>) -> Result<bool> {
        let p_odd = self.prob_parity(mask)?;
        let outcome = match forced {
            Some(r) => r,
            None => self.rng.rand() < p_odd,
        };
        let p = if outcome { p_odd } else { 1.0 - p_odd };
        if is_prob_zero(p) {
            return Err(QuantumError::ZeroProbability {
                qubit: qshard_core::bits::log2(mask),
                outcome,
            });
        }
        let factor = Complex64::new(1.0 / (p * self.norm()).sqrt(), 0.0);
        self.storage.scale_by(&self.exec, move |i| {
            if parity(i & mask) == outcome {
                factor
            } else {
                ZERO
            }
        });
        self.running_norm = Some(1.0);
        Ok(outcome)
    }

    fn arithmetic(&mut self, op: &ArithOp) -> Result<()> {
        op.validate(self.num_qubits)?;
        let carry_in = resolve_carry(self, op)?;
        self.apply_index_map(index_map(op, carry_in));
        Ok(())
    }

    fn normalize_state(&mut self) {
        let norm = self.norm();
        if norm <= 0.0 {
            return;
        }
        if (norm - 1.0).abs() <= NORM_DRIFT {
            self.running_norm = Some(1.0);
            return;
        }
        let factor = Complex64::new(1.0 / norm.sqrt(), 0.0);
        self.storage
            .scale(&self.exec, factor, self.config.amplitude_floor);
        self.running_norm = Some(1.0);
    }

    fn update_running_norm(&mut self) {
        self.running_norm = Some(self.storage.norm(&self.exec));
    }
}

impl Composable for DenseEngine {
    fn spawn(&self, num_qubits: usize, perm: u64) -> Result<Self> {
        Self::new(self.config.clone(), num_qubits, perm, self.rng.clone())
    }

    fn compose_at(&mut self, mut other: Self, start: usize) -> Result<usize> {
        let n = self.num_qubits;
        let m = other.num_qubits;
        if start > n {
            return Err(QuantumError::invalid_range(start, m, n));
        }
        check_capacity(n + m, self.storage.is_sparse())?;
        self.normalize_state();
        other.normalize_state();

        let low_mask = pow2_mask(start);
        let other_mask = pow2_mask(m);
        let storage = match (&self.storage, &other.storage) {
            (StateStorage::Dense(a), StateStorage::Dense(b)) => {
                let mut out = vec![ZERO; pow2(n + m) as usize];
                self.exec.par_map_inplace(&mut out, |i, amp| {
                    let i = i as u64;
                    let mid = (i >> start) & other_mask;
                    let outer = (i & low_mask) | ((i >> (start + m)) << start);
                    *amp = a[outer as usize] * b[mid as usize];
                });
                StateStorage::Dense(out)
            }
            (mine, theirs) => {
                let mut out = self.storage.zeroed_like(n + m);
                let mut other_entries = Vec::new();
                theirs.for_each_nonzero(|j, b| other_entries.push((j, b)));
                mine.for_each_nonzero(|i, a| {
                    for &(j, b) in &other_entries {
                        let idx = (i & low_mask) | (j << start) | ((i >> start) << (start + m));
                        out.write(idx, a * b);
                    }
                });
                out
            }
        };
        self.replace_storage(n + m, storage);
        self.running_norm = Some(1.0);
        Ok(start)
    }

    fn decompose(&mut self, start: usize, length: usize) -> Result<Self> {
        let Separated { part, remainder } = self.separate(start, length)?;
        let remaining = self.num_qubits - length;
        self.replace_storage(remaining, remainder);
        Ok(Self {
            num_qubits: length,
            storage: part,
            running_norm: None,
            config: self.config.clone(),
            rng: self.rng.clone(),
            exec: self.exec,
        })
    }

    fn dispose(&mut self, start: usize, length: usize) -> Result<()> {
        let Separated { remainder, .. } = self.separate(start, length)?;
        let remaining = self.num_qubits - length;
        self.replace_storage(remaining, remainder);
        Ok(())
    }

    fn dispose_perm(&mut self, start: usize, length: usize, perm: u64) -> Result<()> {
        check_range(start, length, self.num_qubits)?;
        let low_mask = pow2_mask(start);
        let remaining = self.num_qubits - length;
        let perm = perm & pow2_mask(length);
        let mut remainder = self.storage.zeroed_like(remaining);
        self.storage.for_each_nonzero(|i, a| {
            if get_reg(i, start, length) == perm {
                remainder.write((i & low_mask) | ((i >> (start + length)) << start), a);
            }
        });
        self.replace_storage(remaining, remainder);
        self.normalize_state();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use qshard_core::ArithmeticOps;
    use qshard_gates::GateOps;

    const INV_SQRT2: f64 = std::f64::consts::FRAC_1_SQRT_2;

    fn engine(n: usize, perm: u64) -> DenseEngine {
        DenseEngine::new(EngineConfig::fast().with_seed(7), n, perm, QRng::new(Some(7))).unwrap()
    }

    #[test]
    fn test_new_engine() {
        let mut e = engine(3, 5);
        assert_eq!(e.num_qubits(), 3);
        assert_relative_eq!(e.prob_all(5).unwrap(), 1.0);
        assert_relative_eq!(e.prob(0).unwrap(), 1.0);
        assert_relative_eq!(e.prob(1).unwrap(), 0.0);
    }

    #[test]
    fn test_capacity_violation() {
        let err = DenseEngine::new(EngineConfig::fast(), 40, 0, QRng::new(Some(1))).unwrap_err();
        assert!(matches!(err, QuantumError::CapacityExceeded { requested: 40, .. }));
    }

    #[test]
    fn test_bell_state() {
        let mut e = engine(2, 0);
        e.h(0).unwrap();
        e.cnot(0, 1).unwrap();
        let state = e.get_quantum_state().unwrap();
        assert_relative_eq!(state[0].re, INV_SQRT2, epsilon = 1e-12);
        assert_relative_eq!(state[1].norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(state[2].norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(state[3].re, INV_SQRT2, epsilon = 1e-12);

        let a = e.m(0).unwrap();
        let b = e.m(1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalize_on_gate_tracks_norm() {
        let config = EngineConfig::fast().with_normalize(true);
        let mut e = DenseEngine::new(config, 2, 0, QRng::new(Some(3))).unwrap();
        e.set_amplitude(0, Complex64::new(2.0, 0.0)).unwrap();
        e.h(1).unwrap();
        assert_relative_eq!(e.norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(e.prob(1).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_forced_measurement() {
        let mut e = engine(1, 0);
        e.h(0).unwrap();
        assert!(e.force_m(0, Some(true), true).unwrap());
        assert_relative_eq!(e.prob(0).unwrap(), 1.0, epsilon = 1e-12);
        assert!(matches!(
            e.force_m(0, Some(false), true),
            Err(QuantumError::ZeroProbability { qubit: 0, outcome: false })
        ));
    }

    #[test]
    fn test_measure_without_apply_keeps_state() {
        let mut e = engine(1, 0);
        e.h(0).unwrap();
        e.force_m(0, None, false).unwrap();
        assert_relative_eq!(e.prob(0).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_compose_and_decompose() {
        let mut a = engine(2, 0);
        a.h(0).unwrap();
        a.cnot(0, 1).unwrap();
        let mut b = engine(1, 0);
        b.ry(0.7, 0).unwrap();
        let expected_b = b.get_quantum_state().unwrap();

        assert_eq!(a.compose(b).unwrap(), 2);
        assert_eq!(a.num_qubits(), 3);

        let mut part = a.decompose(2, 1).unwrap();
        let got_b = part.get_quantum_state().unwrap();
        for (x, y) in expected_b.iter().zip(got_b.iter()) {
            assert_relative_eq!(x.re, y.re, epsilon = 1e-10);
            assert_relative_eq!(x.im, y.im, epsilon = 1e-10);
        }
        assert_relative_eq!(a.prob_all(0).unwrap(), 0.5, epsilon = 1e-10);
        assert_relative_eq!(a.prob_all(3).unwrap(), 0.5, epsilon = 1e-10);
    }

    #[test]
    fn test_compose_at_middle() {
        let mut a = engine(2, 0b11);
        let b = engine(1, 0);
        a.compose_at(b, 1).unwrap();
        assert_relative_eq!(a.prob_all(0b101).unwrap(), 1.0);
    }

    #[test]
    fn test_strict_decompose_of_entangled_range() {
        let config = EngineConfig::fast().with_separability_policy(SeparabilityPolicy::Strict);
        let mut e = DenseEngine::new(config, 2, 0, QRng::new(Some(1))).unwrap();
        e.h(0).unwrap();
        e.cnot(0, 1).unwrap();
        let err = e.decompose(1, 1).unwrap_err();
        assert!(matches!(err, QuantumError::NonSeparable { start: 1, length: 1, .. }));
        assert_eq!(e.num_qubits(), 2);
    }

    #[test]
    fn test_lenient_dispose_of_entangled_range() {
        let mut e = engine(2, 0);
        e.h(0).unwrap();
        e.cnot(0, 1).unwrap();
        e.dispose(1, 1).unwrap();
        assert_eq!(e.num_qubits(), 1);
        let norm: f64 = e.get_probs().unwrap().iter().sum();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_dispose_perm() {
        let mut e = engine(3, 0b010);
        e.h(0).unwrap();
        e.dispose_perm(1, 1, 1).unwrap();
        assert_eq!(e.num_qubits(), 2);
        assert_relative_eq!(e.prob(0).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_sparse_matches_dense() {
        let mut dense = engine(3, 0);
        let mut sparse =
            DenseEngine::new(EngineConfig::fast().with_sparse(true), 3, 0, QRng::new(Some(7)))
                .unwrap();
        for e in [&mut dense, &mut sparse] {
            e.h(0).unwrap();
            e.cnot(0, 2).unwrap();
            e.rx(0.4, 1).unwrap();
            e.cz(1, 2).unwrap();
        }
        assert!(dense.sum_sqr_diff(&mut sparse).unwrap() < 1e-12);
    }

    #[test]
    fn test_swap_and_arithmetic() {
        let mut e = engine(4, 0b0001);
        e.swap(0, 3).unwrap();
        assert_relative_eq!(e.prob_all(0b1000).unwrap(), 1.0);

        let mut e = engine(4, 3);
        e.inc(2, 0, 2).unwrap();
        assert_relative_eq!(e.prob_all(1).unwrap(), 1.0);

        let mut e = engine(3, 0b011);
        e.incc(1, 0, 2, 2).unwrap();
        assert_relative_eq!(e.prob_all(0b100).unwrap(), 1.0);

        let mut e = engine(4, 3);
        e.mul(3, 0, 2, 2).unwrap();
        assert_relative_eq!(e.prob_all(0b1001).unwrap(), 1.0);
        e.div(3, 0, 2, 2).unwrap();
        assert_relative_eq!(e.prob_all(3).unwrap(), 1.0);
    }

    #[test]
    fn test_arithmetic_rejects_zero_modulus() {
        let mut e = engine(4, 0);
        let err = e.mul_mod_n_out(3, 0, 0, 2, 2).unwrap_err();
        assert!(matches!(err, QuantumError::InvalidArithmeticOperand { .. }));
    }

    #[test]
    fn test_parity() {
        let mut e = engine(2, 0);
        e.h(0).unwrap();
        assert_relative_eq!(e.prob_parity(0b11).unwrap(), 0.5, epsilon = 1e-12);
        let odd = e.force_m_parity(0b11, Some(true)).unwrap();
        assert!(odd);
        assert_relative_eq!(e.prob_all(0b01).unwrap(), 1.0, epsilon = 1e-12);
    }
}
