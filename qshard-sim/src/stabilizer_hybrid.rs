//! Stabilizer tableau with a one-way switch to a state-vector engine
//!
//! A [`StabilizerHybrid`] starts as a [`Tableau`] plus one pending 2x2
//! buffer per qubit. Single-qubit gates compose into the buffer and fold
//! into the tableau as soon as the product is a recognized Clifford.
//! Controlled gates stay in the tableau when they are controlled Paulis, or
//! when definite controls and targets reduce them to single-qubit work.
//! Anything else switches the register to the engine named by the next
//! configuration layer, and it stays there.

use std::sync::OnceLock;

use num_complex::Complex64;
use qshard_core::bits::{bit_set, MAX_QUBITS};
use qshard_core::complex::{
    clamp_prob, is_norm_0, is_prob_one, is_prob_zero, is_same, I, ONE, PROB_EPSILON, ZERO,
};
use qshard_core::error::{check_qubit, check_range};
use qshard_core::{
    check_controlled, ArithOp, Composable, EngineConfig, Matrix2, QRng, QuantumEngine,
    QuantumError, Result,
};
use qshard_gates::matrices::{HADAMARD, IDENTITY, PAULI_X, PAULI_Y, PAULI_Z, S_GATE};
use qshard_gates::matrix_ops::{apply2x2, is_invert, is_phase, mul2x2};
use qshard_gates::Pauli;
use qshard_state::{QEngine, MAX_DENSE_QUBITS};
use smallvec::SmallVec;
use tracing::{debug, info};

use crate::tableau::Tableau;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliffordStep {
    H,
    S,
}

/// `lambda` with `a = lambda * b`, if one exists
fn phase_ratio(a: &Matrix2, b: &Matrix2) -> Option<Complex64> {
    let (r, c) = [(0, 0), (0, 1), (1, 0), (1, 1)]
        .into_iter()
        .max_by(|x, y| b[x.0][x.1].norm_sqr().total_cmp(&b[y.0][y.1].norm_sqr()))?;
    if is_norm_0(b[r][c]) {
        return None;
    }
    let lambda = a[r][c] / b[r][c];
    (0..2)
        .all(|i| (0..2).all(|j| is_same(a[i][j], lambda * b[i][j])))
        .then_some(lambda)
}

/// The 24 single-qubit Cliffords, up to global phase, as H/S words
fn clifford_table() -> &'static [(Matrix2, Vec<CliffordStep>)] {
    static TABLE: OnceLock<Vec<(Matrix2, Vec<CliffordStep>)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = vec![(IDENTITY, Vec::new())];
        let mut next = 0;
        while next < table.len() {
            let (m, steps) = table[next].clone();
            for (step, gate) in [(CliffordStep::H, HADAMARD), (CliffordStep::S, S_GATE)] {
                let product = mul2x2(&gate, &m);
                if !table
                    .iter()
                    .any(|(known, _)| phase_ratio(&product, known).is_some())
                {
                    let mut path = steps.clone();
                    path.push(step);
                    table.push((product, path));
                }
            }
            next += 1;
        }
        table
    })
}

/// H/S word equal to `m` up to a unit global phase
fn clifford_steps(m: &Matrix2) -> Option<&'static [CliffordStep]> {
    clifford_table().iter().find_map(|(known, steps)| {
        let lambda = phase_ratio(m, known)?;
        ((lambda.norm_sqr() - 1.0).abs() <= PROB_EPSILON).then_some(steps.as_slice())
    })
}

/// `m = lambda * P` for a Pauli `P`
fn pauli_factor(m: &Matrix2) -> Option<(Pauli, Complex64)> {
    [
        (Pauli::I, IDENTITY),
        (Pauli::X, PAULI_X),
        (Pauli::Y, PAULI_Y),
        (Pauli::Z, PAULI_Z),
    ]
    .into_iter()
    .find_map(|(p, pm)| phase_ratio(m, &pm).map(|lambda| (p, lambda)))
}

/// Phase on a control qubit when the control condition holds
fn control_phase(anti: bool, v: Complex64) -> Matrix2 {
    if anti {
        [[v, ZERO], [ZERO, ONE]]
    } else {
        [[ONE, ZERO], [ZERO, v]]
    }
}

fn is_general(m: &Matrix2) -> bool {
    !is_phase(m) && !is_invert(m)
}

/// Pauli axis and sign of `q`'s eigenstate, when `q` is one
fn eigen_axis(tableau: &mut Tableau, q: usize) -> Option<(Pauli, bool)> {
    if tableau.is_separable_z(q) {
        return Some((Pauli::Z, tableau.prob(q) > 0.5));
    }
    if tableau.is_separable_x(q) {
        tableau.h(q);
        let sign = tableau.prob(q) > 0.5;
        tableau.h(q);
        return Some((Pauli::X, sign));
    }
    if tableau.is_separable_y(q) {
        tableau.is(q);
        tableau.h(q);
        let sign = tableau.prob(q) > 0.5;
        tableau.h(q);
        tableau.s(q);
        return Some((Pauli::Y, sign));
    }
    None
}

fn axis_state(axis: Pauli, sign: bool) -> [Complex64; 2] {
    let h = std::f64::consts::FRAC_1_SQRT_2;
    let s = if sign { -h } else { h };
    match axis {
        Pauli::X => [Complex64::new(h, 0.0), Complex64::new(s, 0.0)],
        Pauli::Y => [Complex64::new(h, 0.0), I * s],
        _ if sign => [ZERO, ONE],
        _ => [ONE, ZERO],
    }
}

/// Move separable `q` from its eigenstate to basis state `outcome`
fn rebase(tableau: &mut Tableau, q: usize, axis: Pauli, sign: bool, outcome: bool) {
    match axis {
        Pauli::X => tableau.h(q),
        Pauli::Y => {
            tableau.is(q);
            tableau.h(q);
        }
        _ => {}
    }
    if sign != outcome {
        tableau.x(q);
    }
}

/// Pick a measurement outcome with `p` the probability of |1>
pub(crate) fn choose_outcome(p: f64, forced: Option<bool>, qubit: usize, rng: &QRng) -> Result<bool> {
    match forced {
        Some(outcome) => {
            let keep = if outcome { p } else { 1.0 - p };
            if is_prob_zero(keep) {
                Err(QuantumError::ZeroProbability { qubit, outcome })
            } else {
                Ok(outcome)
            }
        }
        None if is_prob_zero(p) => Ok(false),
        None if is_prob_one(p) => Ok(true),
        None => Ok(rng.rand() < p),
    }
}

#[derive(Debug, Clone)]
enum HybridState {
    Stabilizer {
        tableau: Tableau,
        shards: Vec<Option<Matrix2>>,
    },
    Engine(QEngine),
}

/// Register that stays a stabilizer tableau until a gate leaves the Clifford group
#[derive(Debug, Clone)]
pub struct StabilizerHybrid {
    num_qubits: usize,
    config: EngineConfig,
    rng: QRng,
    state: HybridState,
}

impl StabilizerHybrid {
    /// Basis state `perm` held as a tableau
    pub fn new(config: EngineConfig, num_qubits: usize, perm: u64, rng: QRng) -> Result<Self> {
        if num_qubits > MAX_QUBITS {
            return Err(QuantumError::CapacityExceeded {
                requested: num_qubits,
                max: MAX_QUBITS,
            });
        }
        debug!(num_qubits, perm, "creating stabilizer hybrid");
        Ok(Self {
            num_qubits,
            config,
            rng,
            state: HybridState::Stabilizer {
                tableau: Tableau::new(num_qubits, perm),
                shards: vec![None; num_qubits],
            },
        })
    }

    /// Wrap an engine; the register starts already switched
    pub fn from_engine(config: EngineConfig, engine: QEngine) -> Self {
        Self {
            num_qubits: engine.num_qubits(),
            rng: engine.rng().clone(),
            config,
            state: HybridState::Engine(engine),
        }
    }

    /// Whether the register is still a tableau
    pub fn is_stabilizer(&self) -> bool {
        matches!(self.state, HybridState::Stabilizer { .. })
    }

    /// Number of qubits with a pending non-Clifford buffer
    pub fn pending_buffers(&self) -> usize {
        match &self.state {
            HybridState::Stabilizer { shards, .. } => shards.iter().flatten().count(),
            HybridState::Engine(_) => 0,
        }
    }

    /// Switch (if needed) and hand over the engine
    pub fn into_engine(mut self) -> Result<QEngine> {
        self.switch_to_engine()?;
        match self.state {
            HybridState::Engine(engine) => Ok(engine),
            // switch_to_engine leaves the register in Engine state
            HybridState::Stabilizer { .. } => unreachable!(),
        }
    }

    /// Convert the tableau and its buffers into a state-vector engine
    pub fn switch_to_engine(&mut self) -> Result<()> {
        let HybridState::Stabilizer { tableau, shards } = &mut self.state else {
            return Ok(());
        };
        // allocate first so that oversized registers fail before enumeration
        let mut engine = QEngine::new(self.config.inner(), self.num_qubits, 0, self.rng.clone())?;
        engine.set_quantum_state(&tableau.amplitudes())?;
        for (q, shard) in shards.iter().enumerate() {
            if let Some(m) = shard {
                engine.mtrx(m, q)?;
            }
        }
        info!(
            num_qubits = self.num_qubits,
            kind = ?engine.kind(),
            "stabilizer register switched to state-vector engine"
        );
        self.state = HybridState::Engine(engine);
        Ok(())
    }

    fn engine_mut(&mut self) -> Result<&mut QEngine> {
        self.switch_to_engine()?;
        match &mut self.state {
            HybridState::Engine(engine) => Ok(engine),
            // switch_to_engine leaves the register in Engine state
            HybridState::Stabilizer { .. } => unreachable!(),
        }
    }

    /// Fold `m` into `q`'s buffer, committing it to the tableau when Clifford
    fn buffer_single(tableau: &mut Tableau, shard: &mut Option<Matrix2>, m: &Matrix2, q: usize) {
        let combined = match shard {
            Some(s) => mul2x2(m, s),
            None => *m,
        };
        match clifford_steps(&combined) {
            Some(steps) => {
                for step in steps {
                    match step {
                        CliffordStep::H => tableau.h(q),
                        CliffordStep::S => tableau.s(q),
                    }
                }
                *shard = None;
            }
            None => *shard = Some(combined),
        }
    }

    /// Definite Z value of `q` including its buffer, absorbing general buffers it resolves
    fn settle(&mut self, q: usize) -> Option<bool> {
        let HybridState::Stabilizer { tableau, shards } = &mut self.state else {
            return None;
        };
        let shard = shards[q];
        match shard {
            Some(s) if is_general(&s) => {
                let (axis, sign) = eigen_axis(tableau, q)?;
                let phi = apply2x2(&s, axis_state(axis, sign));
                let total = phi[0].norm_sqr() + phi[1].norm_sqr();
                let p1 = phi[1].norm_sqr() / total;
                let bit = if is_prob_zero(p1) {
                    false
                } else if is_prob_one(p1) {
                    true
                } else {
                    return None;
                };
                rebase(tableau, q, axis, sign, bit);
                shards[q] = None;
                debug!(qubit = q, "absorbed resolved buffer into tableau");
                Some(bit)
            }
            _ => {
                if !tableau.is_definite(q) {
                    return None;
                }
                let flipped = shard.is_some_and(|s| is_invert(&s));
                Some((tableau.prob(q) > 0.5) ^ flipped)
            }
        }
    }

    /// Probability of |1> on `q` without switching, if the tableau can tell
    fn stabilizer_prob(tableau: &mut Tableau, shard: Option<Matrix2>, q: usize) -> Option<f64> {
        match shard {
            Some(s) if is_general(&s) => {
                let (axis, sign) = eigen_axis(tableau, q)?;
                let phi = apply2x2(&s, axis_state(axis, sign));
                let total = phi[0].norm_sqr() + phi[1].norm_sqr();
                Some(clamp_prob(phi[1].norm_sqr() / total))
            }
            Some(s) if is_invert(&s) => Some(1.0 - tableau.prob(q)),
            _ => Some(tableau.prob(q)),
        }
    }

    /// Apply a controlled gate inside the tableau; `false` means a switch is needed
    fn try_controlled(
        &mut self,
        controls: &[usize],
        anti: bool,
        m: &Matrix2,
        target: usize,
    ) -> bool {
        let mut live: SmallVec<[usize; 4]> = SmallVec::new();
        for &c in controls {
            match self.settle(c) {
                Some(bit) if bit != anti => {}
                Some(_) => return true,
                None => live.push(c),
            }
        }

        if live.is_empty() {
            if let HybridState::Stabilizer { tableau, shards } = &mut self.state {
                Self::buffer_single(tableau, &mut shards[target], m, target);
                return true;
            }
            return false;
        }
        let HybridState::Stabilizer { shards, .. } = &self.state else {
            return false;
        };
        if live.iter().any(|&c| shards[c].is_some_and(|s| !is_phase(&s))) {
            return false;
        }

        let target_bit = self.settle(target);
        match live.as_slice() {
            &[c] => self.try_single_control(c, anti, m, target, target_bit),
            &[c1, c2] if is_phase(m) => match target_bit {
                // a doubly controlled phase on a definite target is a controlled phase between the controls
                Some(bit) => {
                    let v = if bit { m[1][1] } else { m[0][0] };
                    let reduced = control_phase(anti, v);
                    self.try_single_control(c1, anti, &reduced, c2, None)
                }
                None => false,
            },
            _ => false,
        }
    }

    fn try_single_control(
        &mut self,
        c: usize,
        anti: bool,
        m: &Matrix2,
        t: usize,
        target_bit: Option<bool>,
    ) -> bool {
        let HybridState::Stabilizer { tableau, shards } = &mut self.state else {
            return false;
        };
        let target_shard = shards[t];

        if let Some((pauli, lambda)) = pauli_factor(m) {
            let target_ok = match pauli {
                Pauli::I => true,
                Pauli::Z => target_shard.map_or(true, |s| is_phase(&s)),
                Pauli::X | Pauli::Y => target_shard.is_none(),
            };
            if target_ok {
                if anti {
                    tableau.x(c);
                }
                match pauli {
                    Pauli::X => tableau.cnot(c, t),
                    Pauli::Y => tableau.cy(c, t),
                    Pauli::Z => tableau.cz(c, t),
                    Pauli::I => {}
                }
                if anti {
                    tableau.x(c);
                }
                if !is_same(lambda, ONE) {
                    Self::buffer_single(tableau, &mut shards[c], &control_phase(anti, lambda), c);
                }
                return true;
            }
        }

        let Some(bit) = target_bit else {
            return false;
        };
        let b = usize::from(bit);
        if is_phase(m) {
            Self::buffer_single(tableau, &mut shards[c], &control_phase(anti, m[b][b]), c);
            return true;
        }
        if is_invert(m) && target_shard.is_none() {
            if anti {
                tableau.x(c);
            }
            tableau.cnot(c, t);
            if anti {
                tableau.x(c);
            }
            Self::buffer_single(tableau, &mut shards[c], &control_phase(anti, m[1 - b][b]), c);
            return true;
        }
        false
    }

    /// Qubits under `mask`, if none of them carries a buffer
    fn unbuffered_qubits(&self, mask: u64) -> Option<SmallVec<[usize; 8]>> {
        let HybridState::Stabilizer { shards, .. } = &self.state else {
            return None;
        };
        let qubits: SmallVec<[usize; 8]> = (0..self.num_qubits)
            .filter(|&q| bit_set(mask, q))
            .collect();
        qubits
            .iter()
            .all(|&q| shards[q].is_none())
            .then_some(qubits)
    }

    /// Run `f` on the last of `qubits` after folding their parity into it
    fn with_parity<T>(
        tableau: &mut Tableau,
        last: usize,
        rest: &[usize],
        f: impl FnOnce(&mut Tableau) -> T,
    ) -> T {
        for &q in rest {
            tableau.cnot(q, last);
        }
        let out = f(tableau);
        for &q in rest.iter().rev() {
            tableau.cnot(q, last);
        }
        out
    }

    fn check_mask(&self, mask: u64) -> Result<()> {
        if mask >= self.max_power() {
            return Err(QuantumError::invalid_qubit(
                qshard_core::bits::log2(mask),
                self.num_qubits,
            ));
        }
        Ok(())
    }
}

impl QuantumEngine for StabilizerHybrid {
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
        match &mut self.state {
            HybridState::Stabilizer { tableau, shards } => {
                tableau.set_permutation(perm);
                shards.iter_mut().for_each(|s| *s = None);
                Ok(())
            }
            HybridState::Engine(engine) => engine.set_permutation(perm, phase),
        }
    }

    fn get_quantum_state(&mut self) -> Result<Vec<Complex64>> {
        self.engine_mut()?.get_quantum_state()
    }

    fn set_quantum_state(&mut self, state: &[Complex64]) -> Result<()> {
        let expected = 1usize << self.num_qubits;
        if state.len() != expected {
            return Err(QuantumError::DimensionMismatch {
                expected,
                actual: state.len(),
            });
        }
        if let (1, HybridState::Stabilizer { tableau, shards }) =
            (self.num_qubits, &mut self.state)
        {
            let total = state[0].norm_sqr() + state[1].norm_sqr();
            if !is_prob_zero(total) {
                // prepare |0> and buffer the unitary that takes it to `state`
                let norm = total.sqrt();
                let (a, b) = (state[0] / norm, state[1] / norm);
                let prep: Matrix2 = [[a, -b.conj()], [b, a.conj()]];
                tableau.set_permutation(0);
                shards[0] = None;
                Self::buffer_single(tableau, &mut shards[0], &prep, 0);
                return Ok(());
            }
        }
        self.engine_mut()?.set_quantum_state(state)
    }

    fn get_amplitude(&mut self, perm: u64) -> Result<Complex64> {
        if perm >= self.max_power() {
            return Err(QuantumError::invalid_qubit(
                qshard_core::bits::log2(perm),
                self.num_qubits,
            ));
        }
        self.engine_mut()?.get_amplitude(perm)
    }

    fn set_amplitude(&mut self, perm: u64, amp: Complex64) -> Result<()> {
        self.engine_mut()?.set_amplitude(perm, amp)
    }

    fn get_probs(&mut self) -> Result<Vec<f64>> {
        if self.pending_buffers() == 0 {
            if let HybridState::Stabilizer { tableau, .. } = &mut self.state {
                if self.num_qubits > MAX_DENSE_QUBITS {
                    return Err(QuantumError::CapacityExceeded {
                        requested: self.num_qubits,
                        max: MAX_DENSE_QUBITS,
                    });
                }
                let mut probs = vec![0.0; 1usize << self.num_qubits];
                tableau.for_each_amplitude(|perm, amp| probs[perm as usize] = amp.norm_sqr());
                return Ok(probs);
            }
        }
        Ok(self
            .get_quantum_state()?
            .iter()
            .map(|a| a.norm_sqr())
            .collect())
    }

    fn mtrx(&mut self, m: &Matrix2, target: usize) -> Result<()> {
        check_qubit(target, self.num_qubits)?;
        match &mut self.state {
            HybridState::Stabilizer { tableau, shards } => {
                Self::buffer_single(tableau, &mut shards[target], m, target);
                Ok(())
            }
            HybridState::Engine(engine) => engine.mtrx(m, target),
        }
    }

    fn mc_mtrx(&mut self, controls: &[usize], m: &Matrix2, target: usize) -> Result<()> {
        check_controlled(controls, target, self.num_qubits)?;
        if self.is_stabilizer() && self.try_controlled(controls, false, m, target) {
            return Ok(());
        }
        self.engine_mut()?.mc_mtrx(controls, m, target)
    }

    fn mac_mtrx(&mut self, controls: &[usize], m: &Matrix2, target: usize) -> Result<()> {
        check_controlled(controls, target, self.num_qubits)?;
        if self.is_stabilizer() && self.try_controlled(controls, true, m, target) {
            return Ok(());
        }
        self.engine_mut()?.mac_mtrx(controls, m, target)
    }

    fn swap(&mut self, q1: usize, q2: usize) -> Result<()> {
        check_qubit(q1, self.num_qubits)?;
        check_qubit(q2, self.num_qubits)?;
        match &mut self.state {
            HybridState::Stabilizer { tableau, shards } => {
                tableau.swap(q1, q2);
                shards.swap(q1, q2);
                Ok(())
            }
            HybridState::Engine(engine) => engine.swap(q1, q2),
        }
    }

    fn prob(&mut self, qubit: usize) -> Result<f64> {
        check_qubit(qubit, self.num_qubits)?;
        if let HybridState::Stabilizer { tableau, shards } = &mut self.state {
            if let Some(p) = Self::stabilizer_prob(tableau, shards[qubit], qubit) {
                return Ok(p);
            }
        }
        self.engine_mut()?.prob(qubit)
    }

    fn prob_all(&mut self, perm: u64) -> Result<f64> {
        if self.pending_buffers() == 0 {
            if let HybridState::Stabilizer { tableau, .. } = &mut self.state {
                return Ok(clamp_prob(tableau.amplitude(perm).norm_sqr()));
            }
        }
        Ok(clamp_prob(self.get_amplitude(perm)?.norm_sqr()))
    }

    fn prob_parity(&mut self, mask: u64) -> Result<f64> {
        self.check_mask(mask)?;
        if let Some(qubits) = self.unbuffered_qubits(mask) {
            if let HybridState::Stabilizer { tableau, .. } = &mut self.state {
                let Some((&last, rest)) = qubits.split_last() else {
                    return Ok(0.0);
                };
                return Ok(Self::with_parity(tableau, last, rest, |t| t.prob(last)));
            }
        }
        self.engine_mut()?.prob_parity(mask)
    }

    fn force_m(&mut self, qubit: usize, forced: Option<bool>, do_apply: bool) -> Result<bool> {
        check_qubit(qubit, self.num_qubits)?;
        let HybridState::Stabilizer { tableau, shards } = &mut self.state else {
            return self.engine_mut()?.force_m(qubit, forced, do_apply);
        };
        let shard = shards[qubit];
        let Some(p) = Self::stabilizer_prob(tableau, shard, qubit) else {
            return self.engine_mut()?.force_m(qubit, forced, do_apply);
        };
        let outcome = choose_outcome(p, forced, qubit, &self.rng)?;
        if !do_apply {
            return Ok(outcome);
        }
        match shard {
            Some(s) if is_general(&s) => {
                // stabilizer_prob only answers for general buffers on eigenstates
                if let Some((axis, sign)) = eigen_axis(tableau, qubit) {
                    rebase(tableau, qubit, axis, sign, outcome);
                }
            }
            Some(s) if is_invert(&s) => {
                tableau.force_m(qubit, Some(!outcome), &self.rng)?;
                tableau.x(qubit);
            }
            _ => {
                tableau.force_m(qubit, Some(outcome), &self.rng)?;
            }
        }
        shards[qubit] = None;
        Ok(outcome)
    }

    fn force_m_parity(&mut self, mask: u64, forced: Option<bool>) -> Result<bool> {
        self.check_mask(mask)?;
        if let Some(qubits) = self.unbuffered_qubits(mask) {
            if let HybridState::Stabilizer { tableau, .. } = &mut self.state {
                let Some((&last, rest)) = qubits.split_last() else {
                    return match forced {
                        Some(true) => Err(QuantumError::ZeroProbability {
                            qubit: 0,
                            outcome: true,
                        }),
                        _ => Ok(false),
                    };
                };
                let rng = &self.rng;
                return Self::with_parity(tableau, last, rest, |t| t.force_m(last, forced, rng));
            }
        }
        self.engine_mut()?.force_m_parity(mask, forced)
    }

    fn arithmetic(&mut self, op: &ArithOp) -> Result<()> {
        op.validate(self.num_qubits)?;
        self.engine_mut()?.arithmetic(op)
    }

    fn normalize_state(&mut self) {
        if let HybridState::Engine(engine) = &mut self.state {
            engine.normalize_state();
        }
    }

    fn update_running_norm(&mut self) {
        if let HybridState::Engine(engine) = &mut self.state {
            engine.update_running_norm();
        }
    }

    fn finish(&mut self) {
        if let HybridState::Engine(engine) = &mut self.state {
            engine.finish();
        }
    }
}

impl Composable for StabilizerHybrid {
    fn spawn(&self, num_qubits: usize, perm: u64) -> Result<Self> {
        Self::new(self.config.clone(), num_qubits, perm, self.rng.clone())
    }

    fn compose_at(&mut self, other: Self, start: usize) -> Result<usize> {
        check_range(start, 0, self.num_qubits)?;
        let total = self.num_qubits + other.num_qubits;
        if total > MAX_QUBITS {
            return Err(QuantumError::CapacityExceeded {
                requested: total,
                max: MAX_QUBITS,
            });
        }
        match other.state {
            HybridState::Stabilizer {
                tableau: other_tableau,
                shards: other_shards,
            } if self.is_stabilizer() => {
                if let HybridState::Stabilizer { tableau, shards } = &mut self.state {
                    tableau.compose_at(&other_tableau, start)?;
                    shards.splice(start..start, other_shards);
                }
            }
            other_state => {
                let other = Self {
                    num_qubits: other.num_qubits,
                    config: other.config,
                    rng: other.rng,
                    state: other_state,
                };
                let other_engine = other.into_engine()?;
                self.engine_mut()?.compose_at(other_engine, start)?;
            }
        }
        self.num_qubits = total;
        Ok(start)
    }

    fn decompose(&mut self, start: usize, length: usize) -> Result<Self> {
        check_range(start, length, self.num_qubits)?;
        if let HybridState::Stabilizer { tableau, shards } = &mut self.state {
            if tableau.can_decompose_dispose(start, length) {
                let part_tableau = tableau.decompose(start, length)?;
                let part_shards: Vec<Option<Matrix2>> =
                    shards.drain(start..start + length).collect();
                self.num_qubits -= length;
                return Ok(Self {
                    num_qubits: length,
                    config: self.config.clone(),
                    rng: self.rng.clone(),
                    state: HybridState::Stabilizer {
                        tableau: part_tableau,
                        shards: part_shards,
                    },
                });
            }
        }
        let part = self.engine_mut()?.decompose(start, length)?;
        self.num_qubits -= length;
        Ok(Self::from_engine(self.config.clone(), part))
    }

    fn dispose(&mut self, start: usize, length: usize) -> Result<()> {
        check_range(start, length, self.num_qubits)?;
        if length == self.num_qubits {
            *self = Self::new(self.config.clone(), 0, 0, self.rng.clone())?;
            return Ok(());
        }
        self.decompose(start, length).map(|_| ())
    }

    fn dispose_perm(&mut self, start: usize, length: usize, perm: u64) -> Result<()> {
        check_range(start, length, self.num_qubits)?;
        if self.is_stabilizer() {
            // collapse the range onto `perm` so the tableau can drop it
            for i in 0..length {
                self.force_m(start + i, Some(bit_set(perm, i)), true)?;
            }
        }
        if let HybridState::Engine(engine) = &mut self.state {
            engine.dispose_perm(start, length, perm)?;
            self.num_qubits -= length;
            return Ok(());
        }
        self.dispose(start, length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use qshard_core::EngineKind;
    use qshard_gates::GateOps;
    use std::f64::consts::FRAC_1_SQRT_2;

    fn hybrid(n: usize) -> StabilizerHybrid {
        let config = EngineConfig::fast().with_layers([EngineKind::StabilizerHybrid, EngineKind::Cpu]);
        StabilizerHybrid::new(config, n, 0, QRng::new(Some(21))).unwrap()
    }

    fn dense(n: usize) -> QEngine {
        QEngine::new(EngineConfig::fast(), n, 0, QRng::new(Some(21))).unwrap()
    }

    #[test]
    fn test_clifford_table_has_24_entries() {
        assert_eq!(clifford_table().len(), 24);
        assert!(clifford_steps(&PAULI_Y).is_some());
        assert!(clifford_steps(&qshard_gates::matrices::T_GATE).is_none());
        assert!(clifford_steps(&qshard_gates::matrices::SQRT_X).is_some());
    }

    #[test]
    fn test_clifford_circuit_stays_stabilizer() {
        let mut h = hybrid(3);
        h.h(0).unwrap();
        h.cnot(0, 1).unwrap();
        h.s(1).unwrap();
        h.cz(1, 2).unwrap();
        h.sqrt_x(2).unwrap();
        h.cy(2, 0).unwrap();
        assert!(h.is_stabilizer());
        assert_relative_eq!(h.prob(0).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_t_pair_folds_into_s() {
        let mut h = hybrid(1);
        h.h(0).unwrap();
        h.t(0).unwrap();
        assert_eq!(h.pending_buffers(), 1);
        h.t(0).unwrap();
        assert_eq!(h.pending_buffers(), 0);
        assert!(h.is_stabilizer());
    }

    #[test]
    fn test_non_clifford_entangler_switches() {
        let mut h = hybrid(2);
        h.h(0).unwrap();
        h.h(1).unwrap();
        h.ch(0, 1).unwrap();
        assert!(!h.is_stabilizer());

        let mut d = dense(2);
        d.h(0).unwrap();
        d.h(1).unwrap();
        d.ch(0, 1).unwrap();
        assert!(h.sum_sqr_diff(&mut d).unwrap() < 1e-12);
    }

    #[test]
    fn test_definite_controls_short_circuit() {
        let mut h = hybrid(3);
        h.x(0).unwrap();
        h.h(2).unwrap();
        // control 0 is definitely |1>, control 1 definitely |0>
        h.ccnot(0, 1, 2).unwrap();
        h.ch(1, 2).unwrap();
        h.ch(0, 1).unwrap();
        assert_eq!(h.pending_buffers(), 0);
        h.ct(0, 1).unwrap();
        assert!(h.is_stabilizer());
        assert_eq!(h.pending_buffers(), 1);
        assert_relative_eq!(h.prob(1).unwrap(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(h.prob(2).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_buffered_gate_measurement() {
        let mut h = hybrid(1);
        h.ry(0.8, 0).unwrap();
        assert!(h.is_stabilizer());
        let expected = (0.4f64).sin().powi(2);
        assert_relative_eq!(h.prob(0).unwrap(), expected, epsilon = 1e-12);
        let outcome = h.m(0).unwrap();
        assert!(h.is_stabilizer());
        assert_eq!(h.pending_buffers(), 0);
        assert_relative_eq!(h.prob(0).unwrap(), if outcome { 1.0 } else { 0.0 });
    }

    #[test]
    fn test_controlled_phase_on_definite_target() {
        let mut h = hybrid(2);
        let mut d = dense(2);
        for e in [&mut h as &mut dyn QuantumEngine, &mut d] {
            e.h(0).unwrap();
            e.x(1).unwrap();
            e.ct(0, 1).unwrap();
        }
        assert!(h.is_stabilizer());
        assert!(h.sum_sqr_diff(&mut d).unwrap() < 1e-12);
    }

    #[test]
    fn test_amplitude_query_switches() {
        let mut h = hybrid(2);
        h.h(0).unwrap();
        h.cnot(0, 1).unwrap();
        assert_relative_eq!(h.prob_all(0b11).unwrap(), 0.5, epsilon = 1e-12);
        assert!(h.is_stabilizer());
        let amp = h.get_amplitude(0b11).unwrap();
        assert!(!h.is_stabilizer());
        assert_relative_eq!(amp.norm_sqr(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_dispose_perm_collapses_in_tableau() {
        let mut h = hybrid(3);
        h.h(0).unwrap();
        h.cnot(0, 2).unwrap();
        h.x(1).unwrap();
        h.dispose_perm(2, 1, 1).unwrap();
        assert!(h.is_stabilizer());
        assert_eq!(h.num_qubits(), 2);
        assert_relative_eq!(h.prob(0).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(h.prob(1).unwrap(), 1.0, epsilon = 1e-12);

        let mut h = hybrid(2);
        h.x(1).unwrap();
        assert!(matches!(
            h.dispose_perm(1, 1, 0),
            Err(QuantumError::ZeroProbability { qubit: 1, outcome: false })
        ));
    }

    #[test]
    fn test_single_qubit_state_load_stays_stabilizer() {
        let mut h = hybrid(1);
        let mut d = dense(1);
        let state = [Complex64::new(0.6, 0.0), Complex64::new(0.0, 0.8)];
        h.set_quantum_state(&state).unwrap();
        d.set_quantum_state(&state).unwrap();
        assert!(h.is_stabilizer());
        assert_relative_eq!(h.prob(0).unwrap(), 0.64, epsilon = 1e-12);
        assert!(h.sum_sqr_diff(&mut d).unwrap() < 1e-12);

        let plus = [Complex64::new(FRAC_1_SQRT_2, 0.0), Complex64::new(FRAC_1_SQRT_2, 0.0)];
        h.set_quantum_state(&plus).unwrap();
        assert!(h.is_stabilizer());
        assert_eq!(h.pending_buffers(), 0);

        let mut wide = hybrid(2);
        let mut state = vec![ZERO; 4];
        state[3] = ONE;
        wide.set_quantum_state(&state).unwrap();
        assert!(!wide.is_stabilizer());
    }

    #[test]
    fn test_parity_in_tableau() {
        let mut h = hybrid(3);
        h.h(0).unwrap();
        h.cnot(0, 1).unwrap();
        assert_relative_eq!(h.prob_parity(0b011).unwrap(), 0.0);
        assert_relative_eq!(h.prob_parity(0b001).unwrap(), 0.5);
        let odd = h.force_m_parity(0b001, Some(true)).unwrap();
        assert!(odd);
        assert_relative_eq!(h.prob(1).unwrap(), 1.0);
        assert!(h.is_stabilizer());
    }

    #[test]
    fn test_decompose_without_switch() {
        let mut h = hybrid(4);
        h.h(0).unwrap();
        h.cnot(0, 3).unwrap();
        h.h(2).unwrap();
        h.s(2).unwrap();
        let part = h.decompose(2, 1).unwrap();
        assert!(h.is_stabilizer());
        assert!(part.is_stabilizer());
        assert_eq!(h.num_qubits(), 3);
        assert!(h.decompose(0, 1).is_ok());
        assert!(!h.is_stabilizer());
    }

    #[test]
    fn test_compose_mixed_modes() {
        let mut a = hybrid(1);
        a.h(0).unwrap();
        let mut b = hybrid(1);
        b.ry(0.3, 0).unwrap();
        b.switch_to_engine().unwrap();
        a.compose(b).unwrap();
        assert!(!a.is_stabilizer());
        assert_eq!(a.num_qubits(), 2);
        assert_relative_eq!(a.prob(0).unwrap(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(
            a.prob(1).unwrap(),
            (0.15f64).sin().powi(2),
            epsilon = 1e-12
        );
    }
}
