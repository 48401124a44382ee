//! Paged state-vector engine
//!
//! A [`PagedEngine`] splits the amplitude vector of an n-qubit register into
//! `2^(n - q)` pages of `2^q` amplitudes, each held by its own
//! [`DenseEngine`]. The low `q` qubits are local to every page; the high
//! qubits select a page.
//!
//! Gates on local qubits run on each page unmodified. A gate whose target
//! selects pages pairs the pages that differ only in that bit, swaps the
//! upper half of the first with the lower half of the second so the last
//! local qubit stands in for the target, applies the gate there, and swaps
//! back. Page pairs are independent and run in parallel.
//!
//! Structural operations (compose, decompose, dispose) and register
//! arithmetic combine the pages into one engine, delegate, and split again.
//! That merge is bounded by the single-engine limit, [`MAX_DENSE_QUBITS`]
//! for dense storage, so those operations fail with
//! [`QuantumError::PageMergeCapacity`] on wider registers even though gates,
//! probabilities and measurement reach [`MAX_PAGED_QUBITS`].

use num_complex::Complex64;
use qshard_core::bits::{parity, pow2, pow2_mask, MAX_QUBITS};
use qshard_core::complex::{clamp_prob, is_prob_zero, polar, Matrix2, ONE};
use qshard_core::error::check_qubit;
use qshard_core::{
    check_controlled, ArithOp, Composable, EngineConfig, QRng, QuantumEngine, QuantumError,
    Result,
};
use qshard_gates::matrix_ops::{is_identity, is_invert, is_phase};
use rayon::prelude::*;
use tracing::debug;

use crate::arithmetic::{index_map, resolve_carry};
use crate::dense::{check_capacity, DenseEngine, MAX_DENSE_QUBITS};
use crate::storage::StateStorage;

/// Widest register a paged engine will address
pub const MAX_PAGED_QUBITS: usize = 48;

/// A register stored as independently owned pages
///
/// Compose, decompose, dispose and arithmetic need the pages merged, which
/// caps them at the single-engine width.
#[derive(Debug, Clone)]
pub struct PagedEngine {
    num_qubits: usize,
    pages: Vec<DenseEngine>,
    config: EngineConfig,
    rng: QRng,
}

/// Configuration handed to each page
fn page_config(config: &EngineConfig) -> EngineConfig {
    let mut inner = config.inner();
    inner.do_normalize = false;
    inner.random_global_phase = false;
    inner
}

/// Check that a register of `num_qubits` can be merged into one engine
fn check_merge(operation: &str, num_qubits: usize, sparse: bool) -> Result<()> {
    check_capacity(num_qubits, sparse).map_err(|_| QuantumError::PageMergeCapacity {
        operation: operation.to_owned(),
        requested: num_qubits,
        max: if sparse { MAX_QUBITS } else { MAX_DENSE_QUBITS },
    })
}

fn local_qubits(config: &EngineConfig, num_qubits: usize) -> usize {
    config.page_qubits.max(1).min(num_qubits)
}

impl PagedEngine {
    /// Create a paged engine in basis state `perm`
    ///
    /// # Errors
    /// Returns [`QuantumError::CapacityExceeded`] if `num_qubits` exceeds
    /// [`MAX_PAGED_QUBITS`] or a single page would exceed the dense limit.
    pub fn new(config: EngineConfig, num_qubits: usize, perm: u64, rng: QRng) -> Result<Self> {
        if num_qubits > MAX_PAGED_QUBITS.min(MAX_QUBITS) {
            return Err(QuantumError::CapacityExceeded {
                requested: num_qubits,
                max: MAX_PAGED_QUBITS,
            });
        }
        let qpp = local_qubits(&config, num_qubits);
        let inner = page_config(&config);
        check_capacity(qpp, inner.sparse)?;
        let page_count = pow2(num_qubits - qpp) as usize;
        debug!(num_qubits, pages = page_count, page_qubits = qpp, "creating paged engine");

        let mut pages = Vec::with_capacity(page_count);
        for _ in 0..page_count {
            let mut page = DenseEngine::with_phase(inner.clone(), qpp, 0, rng.clone(), Some(ONE))?;
            page.zero_amplitudes();
            pages.push(page);
        }
        let mut engine = Self {
            num_qubits,
            pages,
            config,
            rng,
        };
        engine.set_permutation(perm, None)?;
        Ok(engine)
    }

    /// Split a dense engine into pages
    pub fn from_dense(config: EngineConfig, whole: DenseEngine) -> Result<Self> {
        let rng = whole.rng().clone();
        let mut engine = Self {
            num_qubits: 0,
            pages: Vec::new(),
            config,
            rng,
        };
        engine.separate(whole)?;
        Ok(engine)
    }

    /// Merge every page into one dense engine
    pub fn into_dense(self) -> Result<DenseEngine> {
        self.combine("merge")
    }

    /// Number of pages
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Local qubits per page
    pub fn page_qubits(&self) -> usize {
        self.pages.first().map_or(0, |p| p.num_qubits())
    }

    fn page_power(&self) -> u64 {
        pow2(self.page_qubits())
    }

    fn norm(&mut self) -> f64 {
        self.pages.iter_mut().map(|p| p.norm()).sum()
    }

    fn combine(&self, operation: &str) -> Result<DenseEngine> {
        let qpp = self.page_qubits();
        let inner = page_config(&self.config);
        check_merge(operation, self.num_qubits, inner.sparse)?;
        let mut storage = StateStorage::zeroed(self.num_qubits, inner.sparse);
        for (p, page) in self.pages.iter().enumerate() {
            let offset = (p as u64) << qpp;
            page.storage().for_each_nonzero(|i, a| storage.write(offset | i, a));
        }
        debug!(num_qubits = self.num_qubits, pages = self.pages.len(), "combining pages");
        DenseEngine::from_storage(inner, self.num_qubits, storage, self.rng.clone())
    }

    fn separate(&mut self, whole: DenseEngine) -> Result<()> {
        let num_qubits = whole.num_qubits();
        let qpp = local_qubits(&self.config, num_qubits);
        let inner = page_config(&self.config);
        let mask = pow2_mask(qpp);
        let mut parts: Vec<StateStorage> = (0..pow2(num_qubits - qpp))
            .map(|_| StateStorage::zeroed(qpp, inner.sparse))
            .collect();
        whole
            .storage()
            .for_each_nonzero(|i, a| parts[(i >> qpp) as usize].write(i & mask, a));
        self.pages = parts
            .into_iter()
            .map(|s| DenseEngine::from_storage(inner.clone(), qpp, s, self.rng.clone()))
            .collect::<Result<Vec<_>>>()?;
        self.num_qubits = num_qubits;
        debug!(num_qubits, pages = self.pages.len(), "separating pages");
        Ok(())
    }

    fn with_combined<T>(
        &mut self,
        operation: &str,
        f: impl FnOnce(&mut DenseEngine) -> Result<T>,
    ) -> Result<T> {
        let mut whole = self.combine(operation)?;
        let out = f(&mut whole)?;
        self.separate(whole)?;
        Ok(out)
    }

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
        let qpp = self.page_qubits();
        let mut meta_mask = 0u64;
        let mut intra: Vec<usize> = Vec::with_capacity(controls.len());
        for &c in controls {
            if c >= qpp {
                meta_mask |= pow2(c - qpp);
            } else {
                intra.push(c);
            }
        }
        let meta_perm = if anti { 0 } else { meta_mask };
        let selected = move |p: usize| (p as u64) & meta_mask == meta_perm;
        let m = *m;

        if target < qpp {
            return self
                .pages
                .par_iter_mut()
                .enumerate()
                .filter(|(p, _)| selected(*p))
                .try_for_each(|(_, page)| run_local(page, &intra, anti, &m, target));
        }

        let tbit = pow2(target - qpp) as usize;

        if intra.is_empty() && is_phase(&m) {
            let (top_left, bottom_right) = (m[0][0], m[1][1]);
            self.pages
                .par_iter_mut()
                .enumerate()
                .filter(|(p, _)| selected(*p))
                .for_each(|(p, page)| {
                    let factor = if p & tbit == 0 { top_left } else { bottom_right };
                    if factor != ONE {
                        page.scale(factor);
                    }
                });
            return Ok(());
        }

        if intra.is_empty() && is_invert(&m) {
            let (top_right, bottom_left) = (m[0][1], m[1][0]);
            self.pages
                .par_chunks_mut(2 * tbit)
                .enumerate()
                .for_each(|(chunk, group)| {
                    let (low, high) = group.split_at_mut(tbit);
                    for (j, (p0, p1)) in low.iter_mut().zip(high.iter_mut()).enumerate() {
                        if !selected(chunk * 2 * tbit + j) {
                            continue;
                        }
                        std::mem::swap(p0, p1);
                        if top_right != ONE {
                            p0.scale(top_right);
                        }
                        if bottom_left != ONE {
                            p1.scale(bottom_left);
                        }
                    }
                });
            return Ok(());
        }

        // The last local qubit stands in for the target. A control on that
        // qubit picks which page of the pair holds the matching half.
        let sqi = qpp - 1;
        let (on_low, on_high) = if intra.contains(&sqi) {
            intra.retain(|&c| c != sqi);
            (anti, !anti)
        } else {
            (true, true)
        };
        let page_power = self.page_power();
        self.pages
            .par_chunks_mut(2 * tbit)
            .enumerate()
            .try_for_each(|(chunk, group)| {
                let (low, high) = group.split_at_mut(tbit);
                for (j, (p0, p1)) in low.iter_mut().zip(high.iter_mut()).enumerate() {
                    if !selected(chunk * 2 * tbit + j) {
                        continue;
                    }
                    p0.storage_mut().shuffle(p1.storage_mut(), page_power);
                    if on_low {
                        run_local(p0, &intra, anti, &m, sqi)?;
                    }
                    if on_high {
                        run_local(p1, &intra, anti, &m, sqi)?;
                    }
                    p0.storage_mut().shuffle(p1.storage_mut(), page_power);
                }
                Ok(())
            })
    }
}

fn run_local(
    page: &mut DenseEngine,
    controls: &[usize],
    anti: bool,
    m: &Matrix2,
    target: usize,
) -> Result<()> {
    if controls.is_empty() {
        page.mtrx(m, target)
    } else if anti {
        page.mac_mtrx(controls, m, target)
    } else {
        page.mc_mtrx(controls, m, target)
    }
}

impl QuantumEngine for PagedEngine {
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
        let phase = match phase {
            Some(p) => p,
            None if self.config.random_global_phase => polar(1.0, self.rng.rand_angle()),
            None => ONE,
        };
        let qpp = self.page_qubits();
        let home = (perm >> qpp) as usize;
        let local = perm & pow2_mask(qpp);
        for (p, page) in self.pages.iter_mut().enumerate() {
            if p == home {
                page.set_permutation(local, Some(phase))?;
            } else {
                page.zero_amplitudes();
            }
        }
        Ok(())
    }

    fn get_quantum_state(&mut self) -> Result<Vec<Complex64>> {
        self.normalize_state();
        let page_power = self.page_power();
        Ok(self
            .pages
            .iter()
            .flat_map(|p| p.storage().to_vec(page_power))
            .collect())
    }

    fn set_quantum_state(&mut self, state: &[Complex64]) -> Result<()> {
        let expected = self.max_power() as usize;
        if state.len() != expected {
            return Err(QuantumError::DimensionMismatch {
                expected,
                actual: state.len(),
            });
        }
        let page_power = self.page_power() as usize;
        for (page, chunk) in self.pages.iter_mut().zip(state.chunks(page_power)) {
            page.set_quantum_state(chunk)?;
        }
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
        let qpp = self.page_qubits();
        let amp = self.pages[(perm >> qpp) as usize]
            .storage()
            .read(perm & pow2_mask(qpp));
        Ok(if norm > 0.0 { amp / norm.sqrt() } else { amp })
    }

    fn set_amplitude(&mut self, perm: u64, amp: Complex64) -> Result<()> {
        if perm >= self.max_power() {
            return Err(QuantumError::invalid_operand(
                "SetAmplitude",
                format!("permutation {} outside {} qubits", perm, self.num_qubits),
            ));
        }
        let qpp = self.page_qubits();
        self.pages[(perm >> qpp) as usize].set_amplitude(perm & pow2_mask(qpp), amp)
    }

    fn get_probs(&mut self) -> Result<Vec<f64>> {
        Ok(self
            .get_quantum_state()?
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

    fn prob(&mut self, qubit: usize) -> Result<f64> {
        check_qubit(qubit, self.num_qubits)?;
        let total = self.norm();
        if total <= 0.0 {
            return Ok(0.0);
        }
        let qpp = self.page_qubits();
        let raw: f64 = if qubit < qpp {
            self.pages.par_iter().map(|p| p.prob_raw(qubit)).sum()
        } else {
            let bit = pow2(qubit - qpp) as usize;
            self.pages
                .iter_mut()
                .enumerate()
                .filter(|(p, _)| p & bit != 0)
                .map(|(_, page)| page.norm())
                .sum()
        };
        Ok(clamp_prob(raw / total))
    }

    fn prob_parity(&mut self, mask: u64) -> Result<f64> {
        if mask >= self.max_power() {
            return Err(QuantumError::invalid_qubit(
                qshard_core::bits::log2(mask),
                self.num_qubits,
            ));
        }
        let total = self.norm();
        if total <= 0.0 || mask == 0 {
            return Ok(0.0);
        }
        let qpp = self.page_qubits();
        let mut odd = 0.0;
        for (p, page) in self.pages.iter().enumerate() {
            let offset = (p as u64) << qpp;
            page.storage().for_each_nonzero(|i, a| {
                if parity((offset | i) & mask) {
                    odd += a.norm_sqr();
                }
            });
        }
        Ok(clamp_prob(odd / total))
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
        if !do_apply {
            return Ok(outcome);
        }
        let nrm = 1.0 / (p * self.norm()).sqrt();
        let qpp = self.page_qubits();
        if qubit < qpp {
            self.pages
                .par_iter_mut()
                .for_each(|page| page.collapse(qubit, outcome, nrm));
        } else {
            let bit = pow2(qubit - qpp) as usize;
            let factor = Complex64::new(nrm, 0.0);
            self.pages.par_iter_mut().enumerate().for_each(|(p, page)| {
                if (p & bit != 0) == outcome {
                    page.scale(factor);
                } else {
                    page.zero_amplitudes();
                }
            });
        }
        Ok(outcome)
    }

    fn arithmetic(&mut self, op: &ArithOp) -> Result<()> {
        op.validate(self.num_qubits)?;
        let carry_in = resolve_carry(self, op)?;
        let map = index_map(op, carry_in);
        self.with_combined("apply arithmetic to", |whole| {
            whole.apply_index_map(map);
            Ok(())
        })
    }

    fn normalize_state(&mut self) {
        let total = self.norm();
        if total <= 0.0 || (total - 1.0).abs() <= 1e-12 {
            return;
        }
        let factor = Complex64::new(1.0 / total.sqrt(), 0.0);
        self.pages.par_iter_mut().for_each(|page| page.scale(factor));
    }

    fn update_running_norm(&mut self) {
        self.pages
            .iter_mut()
            .for_each(|page| page.update_running_norm());
    }
}

impl Composable for PagedEngine {
    fn spawn(&self, num_qubits: usize, perm: u64) -> Result<Self> {
        Self::new(self.config.clone(), num_qubits, perm, self.rng.clone())
    }

    fn compose_at(&mut self, other: Self, start: usize) -> Result<usize> {
        let other = other.combine("compose")?;
        self.with_combined("compose", |whole| whole.compose_at(other, start))
    }

    fn decompose(&mut self, start: usize, length: usize) -> Result<Self> {
        let part = self.with_combined("decompose", |whole| whole.decompose(start, length))?;
        Self::from_dense(self.config.clone(), part)
    }

    fn dispose(&mut self, start: usize, length: usize) -> Result<()> {
        self.with_combined("dispose", |whole| whole.dispose(start, length))
    }

    fn dispose_perm(&mut self, start: usize, length: usize, perm: u64) -> Result<()> {
        self.with_combined("dispose", |whole| whole.dispose_perm(start, length, perm))
    }
}
