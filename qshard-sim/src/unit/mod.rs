//! Shard tracker: one record per qubit, sub-engines only where entanglement demands them
//!
//! [`QUnit`] keeps every qubit as a shard. A shard is either emulated (two
//! amplitudes, no engine at all) or a member of a sub-engine built from the
//! next configuration layer. Qubits meet in a sub-engine only when a gate
//! between them cannot be deferred; controlled phase and invert gates between
//! otherwise independent qubits become phase buffers on the pair instead.
//!
//! The logical state is `P * R * U`: `U` the tensor product of sub-engines
//! and emulated qubits, `R` a Hadamard on every rotated shard, `P` the
//! product of the live buffers.

mod buffers;
mod separate;
mod shard;

use ahash::AHashMap;
use num_complex::Complex64;
use qshard_core::bits::{bit_set, pow2, pow2_mask, MAX_QUBITS};
use qshard_core::complex::{clamp_prob, is_prob_one, is_prob_zero, NEG_ONE, ONE, ZERO};
use qshard_core::error::{check_qubit, check_range};
use qshard_core::{
    check_controlled, ArithOp, Composable, EngineConfig, EngineKind, Matrix2, QRng,
    QuantumEngine, QuantumError, Result,
};
use qshard_gates::matrices::HADAMARD;
use qshard_gates::matrix_ops::{apply2x2, is_phase, matrices_equal, mul2x2};
use smallvec::SmallVec;
use tracing::debug;

use self::shard::{PhaseShard, QubitShard, ShardId, ShardState, UnitId};
use crate::arena::Arena;
use crate::register::Register;
use crate::stabilizer_hybrid::choose_outcome;

#[derive(Debug, Clone)]
struct UnitSlot {
    register: Register,
    /// Bumped on every mutation; cached shard probabilities compare against it
    generation: u64,
}

/// Register of independently tracked qubits
#[derive(Debug, Clone)]
pub struct QUnit {
    config: EngineConfig,
    rng: QRng,
    /// Shard of each logical qubit
    order: Vec<ShardId>,
    shards: Arena<QubitShard>,
    units: Arena<UnitSlot>,
}

impl QUnit {
    /// Basis state `perm` with every qubit emulated
    ///
    /// Sub-engines are built from `config.inner()` as they become necessary.
    pub fn new(config: EngineConfig, num_qubits: usize, perm: u64, rng: QRng) -> Result<Self> {
        config.validate().map_err(QuantumError::InvalidConfig)?;
        if config.inner().outer_kind() == EngineKind::Unit {
            return Err(QuantumError::InvalidConfig(
                "shard tracker cannot nest another shard tracker".to_string(),
            ));
        }
        if num_qubits > MAX_QUBITS {
            return Err(QuantumError::CapacityExceeded {
                requested: num_qubits,
                max: MAX_QUBITS,
            });
        }
        debug!(num_qubits, perm, "creating shard tracker");
        let mut unit = Self::empty(config, rng);
        for q in 0..num_qubits {
            let id = unit
                .shards
                .insert(QubitShard::new(ShardState::basis(bit_set(perm, q))));
            unit.order.push(id);
        }
        Ok(unit)
    }

    fn empty(config: EngineConfig, rng: QRng) -> Self {
        Self {
            config,
            rng,
            order: Vec::new(),
            shards: Arena::default(),
            units: Arena::default(),
        }
    }

    /// Track an existing register as a single sub-engine
    pub fn from_register(config: EngineConfig, register: Register) -> Result<Self> {
        let register = match register {
            Register::Unit(unit) => return Ok(*unit),
            other => other,
        };
        let mut tracker = Self::empty(config, register.rng().clone());
        let num_qubits = register.num_qubits();
        if num_qubits == 0 {
            return Ok(tracker);
        }
        let unit = tracker.units.insert(UnitSlot {
            register,
            generation: 0,
        });
        for mapped in 0..num_qubits {
            let id = tracker
                .shards
                .insert(QubitShard::new(ShardState::InUnit { unit, mapped }));
            tracker.order.push(id);
        }
        Ok(tracker)
    }

    /// Number of live sub-engines
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Width of the sub-engine holding `qubit`, zero when it is emulated
    pub fn unit_width(&self, qubit: usize) -> Result<usize> {
        check_qubit(qubit, self.num_qubits())?;
        Ok(match self.shards[self.order[qubit]].state.location() {
            Some((unit, _)) => self.units[unit].register.num_qubits(),
            None => 0,
        })
    }

    /// Entangle everything into one register in logical qubit order
    pub fn into_register(mut self) -> Result<Register> {
        match self.entangle_all()?.and_then(|unit| self.units.remove(unit)) {
            Some(slot) => Ok(slot.register),
            None => Register::build(self.config.inner(), 0, 0, self.rng.clone()),
        }
    }

    fn unit_mut(&mut self, unit: UnitId) -> &mut Register {
        let slot = &mut self.units[unit];
        slot.generation += 1;
        &mut slot.register
    }

    /// Access for queries that leave the state unchanged
    fn unit_query(&mut self, unit: UnitId) -> &mut Register {
        &mut self.units[unit].register
    }

    fn position_map(&self) -> AHashMap<ShardId, usize> {
        self.order
            .iter()
            .enumerate()
            .map(|(q, &id)| (id, q))
            .collect()
    }

    /// Apply `m` underneath the shard's basis flag
    fn apply_stored(&mut self, sid: ShardId, m: &Matrix2) -> Result<()> {
        match self.shards[sid].state {
            ShardState::Emulated(amps) => {
                self.shards[sid].state = ShardState::Emulated(apply2x2(m, amps));
                Ok(())
            }
            ShardState::InUnit { unit, mapped } => self.unit_mut(unit).mtrx(m, mapped),
            ShardState::Rotated { unit, mapped } => {
                let conjugated = mul2x2(&HADAMARD, &mul2x2(m, &HADAMARD));
                self.unit_mut(unit).mtrx(&conjugated, mapped)
            }
        }
    }

    /// Put a rotated shard back in the computational basis
    fn revert_basis(&mut self, sid: ShardId) -> Result<()> {
        if let ShardState::Rotated { unit, mapped } = self.shards[sid].state {
            self.unit_mut(unit).mtrx(&HADAMARD, mapped)?;
            self.shards[sid].state = ShardState::InUnit { unit, mapped };
        }
        Ok(())
    }

    fn apply_single(&mut self, sid: ShardId, m: &Matrix2) -> Result<()> {
        if matrices_equal(m, &HADAMARD) {
            if !self.try_h_commute(sid) {
                self.flush_all(sid)?;
            }
            let flipped = self.shards[sid].state.hadamard();
            self.shards[sid].state = flipped;
            return Ok(());
        }
        if is_phase(m) {
            self.flush_invert_targets(sid)?;
        } else {
            self.flush_all(sid)?;
        }
        self.apply_stored(sid, m)
    }

    /// Z value of `sid` when it is known without touching a sub-engine
    fn cached_bit(&self, sid: ShardId) -> Option<bool> {
        if self.is_invert_target(sid) {
            return None;
        }
        let shard = &self.shards[sid];
        let p = match shard.state {
            ShardState::Emulated(a) => a[1].norm_sqr() / (a[0].norm_sqr() + a[1].norm_sqr()),
            ShardState::InUnit { unit, .. } => {
                let (generation, p) = shard.cached_prob?;
                if generation != self.units[unit].generation {
                    return None;
                }
                p
            }
            ShardState::Rotated { .. } => return None,
        };
        if is_prob_zero(p) {
            Some(false)
        } else if is_prob_one(p) {
            Some(true)
        } else {
            None
        }
    }

    fn apply_controlled(
        &mut self,
        controls: &[usize],
        anti: bool,
        m: &Matrix2,
        target: usize,
    ) -> Result<()> {
        check_controlled(controls, target, self.num_qubits())?;
        let mut live: SmallVec<[ShardId; 8]> = SmallVec::new();
        for &c in controls {
            let sid = self.order[c];
            match self.cached_bit(sid) {
                Some(bit) if bit != anti => {}
                Some(_) => return Ok(()),
                None => live.push(sid),
            }
        }
        let tid = self.order[target];
        if live.is_empty() {
            return self.apply_single(tid, m);
        }
        if let (&[cid], Some(buffer)) = (live.as_slice(), PhaseShard::from_matrix(m)) {
            if !anti {
                return self.add_buffer(cid, tid, buffer);
            }
            // anti-controlled m is m on the target followed by m^-1 controlled on |1>
            self.apply_single(tid, m)?;
            return self.add_buffer(cid, tid, buffer.inverse());
        }

        self.flush_all(tid)?;
        for &c in &live {
            self.flush_invert_targets(c)?;
        }
        live.push(tid);
        for &s in &live {
            self.revert_basis(s)?;
        }
        let (unit, mapped) = self.entangle(&live)?;
        let (mapped_target, mapped_controls) = match mapped.split_last() {
            Some((t, cs)) => (*t, cs),
            None => return Ok(()),
        };
        let register = self.unit_mut(unit);
        if anti {
            register.mac_mtrx(mapped_controls, m, mapped_target)
        } else {
            register.mc_mtrx(mapped_controls, m, mapped_target)
        }
    }

    /// Z probability of a shard, without flushing buffers that leave it unchanged
    fn prob_shard(&mut self, sid: ShardId) -> Result<f64> {
        self.flush_invert_targets(sid)?;
        self.revert_basis(sid)?;
        match self.shards[sid].state {
            ShardState::Emulated(a) => Ok(clamp_prob(
                a[1].norm_sqr() / (a[0].norm_sqr() + a[1].norm_sqr()),
            )),
            ShardState::InUnit { unit, mapped } | ShardState::Rotated { unit, mapped } => {
                let generation = self.units[unit].generation;
                if let Some((g, p)) = self.shards[sid].cached_prob {
                    if g == generation {
                        return Ok(p);
                    }
                }
                let p = self.unit_query(unit).prob(mapped)?;
                self.shards[sid].cached_prob = Some((generation, p));
                Ok(p)
            }
        }
    }

    /// Turn the buffers on a collapsed shard into single-qubit gates on the other end
    ///
    /// Inverting buffers that target `sid` must already be flushed.
    fn resolve_buffers(&mut self, sid: ShardId, outcome: bool) -> Result<()> {
        let targets: Vec<(ShardId, PhaseShard)> = self.shards[sid].controls.drain().collect();
        for (t, _) in &targets {
            self.shards[*t].targeted_by.remove(&sid);
        }
        let controls: Vec<ShardId> = self.shards[sid].targeted_by.drain().collect();
        let controls: Vec<(ShardId, PhaseShard)> = controls
            .into_iter()
            .filter_map(|c| self.shards[c].controls.remove(&sid).map(|b| (c, b)))
            .collect();
        if outcome {
            for (t, buffer) in targets {
                self.apply_single(t, &buffer.matrix())?;
            }
        }
        for (c, buffer) in controls {
            let phase = buffer.target_phase(outcome);
            self.apply_single(c, &[[ONE, ZERO], [ZERO, phase]])?;
        }
        Ok(())
    }

    /// Shards of the set bits of `mask`, ready for computational-basis reads
    fn basis_reads(&mut self, mask: u64) -> Result<SmallVec<[(usize, ShardId); 8]>> {
        let n = self.num_qubits();
        if mask > pow2_mask(n) {
            return Err(QuantumError::invalid_qubit(
                qshard_core::bits::log2(mask),
                n,
            ));
        }
        let mut out = SmallVec::new();
        for q in (0..n).filter(|&q| bit_set(mask, q)) {
            let sid = self.order[q];
            self.flush_invert_targets(sid)?;
            self.revert_basis(sid)?;
            out.push((q, sid));
        }
        Ok(out)
    }

    /// Flush every buffer and entangle all qubits into one unit in logical order
    fn entangle_all(&mut self) -> Result<Option<UnitId>> {
        let sids = self.order.clone();
        if sids.is_empty() {
            return Ok(None);
        }
        for &s in &sids {
            self.flush_all(s)?;
        }
        for &s in &sids {
            self.revert_basis(s)?;
        }
        let (unit, _) = self.entangle(&sids)?;
        self.order_contiguous(unit)?;
        Ok(Some(unit))
    }
}

impl QuantumEngine for QUnit {
    fn num_qubits(&self) -> usize {
        self.order.len()
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn rng(&self) -> &QRng {
        &self.rng
    }

    fn set_permutation(&mut self, perm: u64, phase: Option<Complex64>) -> Result<()> {
        let n = self.num_qubits();
        *self = Self::new(self.config.clone(), n, perm, self.rng.clone())?;
        if let (Some(phase), Some(&sid)) = (phase, self.order.first()) {
            if let ShardState::Emulated(amps) = self.shards[sid].state {
                self.shards[sid].state = ShardState::Emulated([amps[0] * phase, amps[1] * phase]);
            }
        }
        Ok(())
    }

    fn get_quantum_state(&mut self) -> Result<Vec<Complex64>> {
        self.clone().into_register()?.get_quantum_state()
    }

    fn set_quantum_state(&mut self, state: &[Complex64]) -> Result<()> {
        let n = self.num_qubits();
        let expected = 1usize << n;
        if state.len() != expected {
            return Err(QuantumError::DimensionMismatch {
                expected,
                actual: state.len(),
            });
        }
        let mut register = Register::build(self.config.inner(), n, 0, self.rng.clone())?;
        register.set_quantum_state(state)?;
        *self = Self::from_register(self.config.clone(), register)?;
        Ok(())
    }

    fn get_amplitude(&mut self, perm: u64) -> Result<Complex64> {
        let n = self.num_qubits();
        if perm >= self.max_power() {
            return Err(QuantumError::invalid_qubit(qshard_core::bits::log2(perm), n));
        }
        self.basis_reads(pow2_mask(n))?;
        let positions = self.position_map();
        let mut amp = ONE;
        let mut sub_perms: AHashMap<UnitId, u64> = AHashMap::new();
        for (q, &sid) in self.order.iter().enumerate() {
            let bit = bit_set(perm, q);
            let shard = &self.shards[sid];
            match shard.state {
                ShardState::Emulated(a) => amp *= a[bit as usize],
                ShardState::InUnit { unit, mapped } | ShardState::Rotated { unit, mapped } => {
                    let sub = sub_perms.entry(unit).or_insert(0);
                    if bit {
                        *sub |= pow2(mapped);
                    }
                }
            }
            if bit {
                for (t, buffer) in &shard.controls {
                    let target_bit = positions.get(t).map_or(false, |&tq| bit_set(perm, tq));
                    amp *= buffer.target_phase(target_bit);
                }
            }
        }
        for (unit, sub) in sub_perms {
            amp *= self.unit_query(unit).get_amplitude(sub)?;
        }
        Ok(amp)
    }

    fn set_amplitude(&mut self, perm: u64, amp: Complex64) -> Result<()> {
        match self.entangle_all()? {
            Some(unit) => self.unit_mut(unit).set_amplitude(perm, amp),
            None => Ok(()),
        }
    }

    fn mtrx(&mut self, m: &Matrix2, target: usize) -> Result<()> {
        check_qubit(target, self.num_qubits())?;
        let sid = self.order[target];
        self.apply_single(sid, m)
    }

    fn mc_mtrx(&mut self, controls: &[usize], m: &Matrix2, target: usize) -> Result<()> {
        self.apply_controlled(controls, false, m, target)
    }

    fn mac_mtrx(&mut self, controls: &[usize], m: &Matrix2, target: usize) -> Result<()> {
        self.apply_controlled(controls, true, m, target)
    }

    /// Relabels the two shards; no amplitudes move
    fn swap(&mut self, q1: usize, q2: usize) -> Result<()> {
        let n = self.num_qubits();
        check_qubit(q1, n)?;
        check_qubit(q2, n)?;
        self.order.swap(q1, q2);
        Ok(())
    }

    fn prob(&mut self, qubit: usize) -> Result<f64> {
        check_qubit(qubit, self.num_qubits())?;
        let sid = self.order[qubit];
        self.prob_shard(sid)
    }

    fn prob_all(&mut self, perm: u64) -> Result<f64> {
        let n = self.num_qubits();
        if perm >= self.max_power() {
            return Err(QuantumError::invalid_qubit(qshard_core::bits::log2(perm), n));
        }
        self.prob_mask(pow2_mask(n), perm)
    }

    /// Product of the per-unit probabilities, since units are independent
    fn prob_mask(&mut self, mask: u64, perm: u64) -> Result<f64> {
        let reads = self.basis_reads(mask)?;
        let mut p = 1.0;
        let mut sub: AHashMap<UnitId, (u64, u64)> = AHashMap::new();
        for (q, sid) in reads {
            let bit = bit_set(perm, q);
            match self.shards[sid].state {
                ShardState::Emulated(a) => {
                    p *= a[bit as usize].norm_sqr() / (a[0].norm_sqr() + a[1].norm_sqr())
                }
                ShardState::InUnit { unit, mapped } | ShardState::Rotated { unit, mapped } => {
                    let entry = sub.entry(unit).or_insert((0, 0));
                    entry.0 |= pow2(mapped);
                    if bit {
                        entry.1 |= pow2(mapped);
                    }
                }
            }
        }
        for (unit, (sub_mask, sub_perm)) in sub {
            p *= self.unit_query(unit).prob_mask(sub_mask, sub_perm)?;
        }
        Ok(clamp_prob(p))
    }

    fn prob_parity(&mut self, mask: u64) -> Result<f64> {
        let reads = self.basis_reads(mask)?;
        let combine = |odd: f64, p: f64| odd * (1.0 - p) + p * (1.0 - odd);
        let mut odd = 0.0;
        let mut sub: AHashMap<UnitId, u64> = AHashMap::new();
        for (_, sid) in reads {
            match self.shards[sid].state {
                ShardState::Emulated(a) => {
                    odd = combine(odd, a[1].norm_sqr() / (a[0].norm_sqr() + a[1].norm_sqr()))
                }
                ShardState::InUnit { unit, mapped } | ShardState::Rotated { unit, mapped } => {
                    *sub.entry(unit).or_insert(0) |= pow2(mapped);
                }
            }
        }
        for (unit, sub_mask) in sub {
            let p = self.unit_query(unit).prob_parity(sub_mask)?;
            odd = combine(odd, p);
        }
        Ok(clamp_prob(odd))
    }

    fn force_m(&mut self, qubit: usize, forced: Option<bool>, do_apply: bool) -> Result<bool> {
        check_qubit(qubit, self.num_qubits())?;
        let sid = self.order[qubit];
        let p = self.prob_shard(sid)?;
        let outcome = choose_outcome(p, forced, qubit, &self.rng)?;
        if !do_apply {
            return Ok(outcome);
        }
        self.revert_basis(sid)?;
        if let Some((unit, mapped)) = self.shards[sid].state.location() {
            self.unit_mut(unit).force_m(mapped, Some(outcome), true)?;
        }
        self.detach_basis(sid, outcome)?;
        self.resolve_buffers(sid, outcome)?;
        Ok(outcome)
    }

    fn force_m_parity(&mut self, mask: u64, forced: Option<bool>) -> Result<bool> {
        let reads = self.basis_reads(mask)?;
        if reads.is_empty() {
            return match forced {
                Some(true) => Err(QuantumError::ZeroProbability {
                    qubit: 0,
                    outcome: true,
                }),
                _ => Ok(false),
            };
        }
        let sids: SmallVec<[ShardId; 8]> = reads.iter().map(|&(_, sid)| sid).collect();
        let (unit, mapped) = self.entangle(&sids)?;
        let sub_mask = mapped.iter().fold(0u64, |acc, &m| acc | pow2(m));
        self.unit_mut(unit).force_m_parity(sub_mask, forced)
    }

    /// Runs on one sub-engine holding every operand, ordered like the register
    fn arithmetic(&mut self, op: &ArithOp) -> Result<()> {
        op.validate(self.num_qubits())?;
        let qubits = op.qubits();
        if qubits.is_empty() {
            return match self.order.first() {
                Some(&sid) => self.apply_single(sid, &[[NEG_ONE, ZERO], [ZERO, NEG_ONE]]),
                None => Ok(()),
            };
        }
        let sids: SmallVec<[ShardId; 8]> = qubits.iter().map(|&q| self.order[q]).collect();
        for &s in &sids {
            self.flush_all(s)?;
        }
        for &s in &sids {
            self.revert_basis(s)?;
        }
        let (unit, _) = self.entangle(&sids)?;
        self.order_contiguous(unit)?;
        let lookup: AHashMap<usize, usize> = qubits
            .iter()
            .filter_map(|&q| {
                self.shards[self.order[q]]
                    .state
                    .location()
                    .map(|(_, m)| (q, m))
            })
            .collect();
        let remapped = op.remap(|q| lookup.get(&q).copied().unwrap_or(q));
        debug!(op = op.name(), unit, "arithmetic on entangled unit");
        self.unit_mut(unit).arithmetic(&remapped)
    }

    fn normalize_state(&mut self) {
        for (_, slot) in self.units.iter_mut() {
            slot.register.normalize_state();
        }
    }

    fn update_running_norm(&mut self) {
        for (_, slot) in self.units.iter_mut() {
            slot.register.update_running_norm();
        }
    }

    fn finish(&mut self) {
        for (_, slot) in self.units.iter_mut() {
            slot.register.finish();
        }
    }
}

impl Composable for QUnit {
    fn spawn(&self, num_qubits: usize, perm: u64) -> Result<Self> {
        Self::new(self.config.clone(), num_qubits, perm, self.rng.clone())
    }

    fn compose_at(&mut self, other: Self, start: usize) -> Result<usize> {
        check_range(start, 0, self.num_qubits())?;
        let total = self.num_qubits() + other.num_qubits();
        if total > MAX_QUBITS {
            return Err(QuantumError::CapacityExceeded {
                requested: total,
                max: MAX_QUBITS,
            });
        }
        let ids = self.absorb(other);
        self.order.splice(start..start, ids);
        Ok(start)
    }

    /// Buffers crossing the boundary are flushed and mixed units split
    fn decompose(&mut self, start: usize, length: usize) -> Result<Self> {
        check_range(start, length, self.num_qubits())?;
        let part: Vec<ShardId> = self.order[start..start + length].to_vec();
        let inside = |id: ShardId| part.contains(&id);

        for &sid in &part {
            let outward: Vec<ShardId> = self.shards[sid]
                .controls
                .keys()
                .copied()
                .filter(|&t| !inside(t))
                .collect();
            for t in outward {
                self.flush_buffer(sid, t)?;
            }
            let inward: Vec<ShardId> = self.shards[sid]
                .targeted_by
                .iter()
                .copied()
                .filter(|&c| !inside(c))
                .collect();
            for c in inward {
                self.flush_buffer(c, sid)?;
            }
        }

        let mut touched: Vec<UnitId> = part
            .iter()
            .filter_map(|&sid| self.shards[sid].state.location().map(|(u, _)| u))
            .collect();
        touched.sort_unstable();
        touched.dedup();
        for unit in touched {
            let members = self.members(unit);
            let moving: Vec<ShardId> = members.iter().copied().filter(|&m| inside(m)).collect();
            if moving.len() == members.len() {
                continue;
            }
            let keep = members.len() - moving.len();
            for (i, &sid) in moving.iter().enumerate() {
                if let Some((_, current)) = self.shards[sid].state.location() {
                    self.swap_mapped(unit, current, keep + i)?;
                }
            }
            let piece = self.unit_mut(unit).decompose(keep, moving.len())?;
            let new_unit = self.units.insert(UnitSlot {
                register: piece,
                generation: 0,
            });
            for (i, &sid) in moving.iter().enumerate() {
                let shard = &mut self.shards[sid];
                shard.state = shard.state.relocated(new_unit, i);
                shard.cached_prob = None;
            }
            debug!(unit, new_unit, qubits = moving.len(), "split unit");
        }

        self.order.drain(start..start + length);
        Ok(self.extract(&part))
    }

    fn dispose(&mut self, start: usize, length: usize) -> Result<()> {
        self.decompose(start, length).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use qshard_core::ArithmeticOps;
    use qshard_gates::GateOps;
    use qshard_state::QEngine;

    fn tracker(n: usize) -> QUnit {
        let config = EngineConfig::fast().with_layers([
            EngineKind::Unit,
            EngineKind::StabilizerHybrid,
            EngineKind::Cpu,
        ]);
        QUnit::new(config, n, 0, QRng::new(Some(5))).unwrap()
    }

    fn dense(n: usize) -> QEngine {
        QEngine::new(EngineConfig::fast(), n, 0, QRng::new(Some(5))).unwrap()
    }

    fn both(n: usize, circuit: impl Fn(&mut dyn QuantumEngine)) -> (QUnit, QEngine) {
        let mut a = tracker(n);
        let mut b = dense(n);
        circuit(&mut a);
        circuit(&mut b);
        (a, b)
    }

    #[test]
    fn test_single_qubit_gates_stay_emulated() {
        let (mut u, mut d) = both(3, |e| {
            e.h(0).unwrap();
            e.t(0).unwrap();
            e.ry(0.8, 1).unwrap();
            e.x(2).unwrap();
        });
        assert_eq!(u.unit_count(), 0);
        assert!(u.sum_sqr_diff(&mut d).unwrap() < 1e-12);
    }

    #[test]
    fn test_controlled_phase_is_buffered() {
        let (mut u, mut d) = both(2, |e| {
            e.h(0).unwrap();
            e.h(1).unwrap();
            e.cz(0, 1).unwrap();
        });
        assert_eq!(u.unit_count(), 0);
        assert_eq!(u.buffer_count(), 1);
        assert!(u.sum_sqr_diff(&mut d).unwrap() < 1e-12);
    }

    #[test]
    fn test_fused_buffers_cancel() {
        let mut u = tracker(2);
        u.h(0).unwrap();
        u.h(1).unwrap();
        u.cs(0, 1).unwrap();
        u.cs(0, 1).unwrap();
        u.cz(0, 1).unwrap();
        assert_eq!(u.buffer_count(), 0);
        assert_eq!(u.unit_count(), 0);
    }

    #[test]
    fn test_rotated_target_flushes_buffer_into_unit() {
        let (mut u, mut d) = both(3, |e| {
            e.h(0).unwrap();
            e.h(1).unwrap();
            e.cz(0, 1).unwrap();
            e.rx(0.3, 1).unwrap();
        });
        assert_eq!(u.buffer_count(), 0);
        assert_eq!(u.unit_width(0).unwrap(), 2);
        assert_eq!(u.unit_width(2).unwrap(), 0);
        assert!(u.sum_sqr_diff(&mut d).unwrap() < 1e-12);
    }

    #[test]
    fn test_hadamard_commutes_through_cz() {
        // CNOT written as H CZ H never entangles a sub-engine
        let (mut u, mut d) = both(2, |e| {
            e.h(0).unwrap();
            e.h(1).unwrap();
            e.cz(0, 1).unwrap();
            e.h(1).unwrap();
        });
        assert_eq!(u.unit_count(), 0);
        assert_eq!(u.buffer_count(), 1);
        assert!(u.sum_sqr_diff(&mut d).unwrap() < 1e-12);
        assert_relative_eq!(u.prob_all(0b11).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_cnot_is_buffered_until_measured() {
        let mut u = tracker(3);
        u.h(0).unwrap();
        u.cnot(0, 1).unwrap();
        assert_eq!(u.buffer_count(), 1);
        assert_eq!(u.unit_width(1).unwrap(), 0);
        let first = u.m(0).unwrap();
        assert_eq!(u.buffer_count(), 0);
        assert_eq!(u.m(1).unwrap(), first);
        assert_eq!(u.unit_count(), 0);
    }

    #[test]
    fn test_general_controlled_gate_entangles() {
        let mut u = tracker(3);
        u.h(0).unwrap();
        u.ch(0, 1).unwrap();
        assert_eq!(u.unit_width(0).unwrap(), 2);
        assert_eq!(u.unit_width(2).unwrap(), 0);
        u.m(0).unwrap();
        assert_eq!(u.unit_width(0).unwrap(), 0);
    }

    #[test]
    fn test_definite_control_is_trimmed() {
        let mut u = tracker(2);
        u.x(0).unwrap();
        u.cnot(0, 1).unwrap();
        assert_eq!(u.unit_count(), 0);
        assert_relative_eq!(u.prob(1).unwrap(), 1.0, epsilon = 1e-12);
        u.anti_cnot(0, 1).unwrap();
        assert_relative_eq!(u.prob(1).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_measurement_resolves_buffers() {
        let (mut u, mut d) = both(3, |e| {
            for q in 0..3 {
                e.h(q).unwrap();
            }
            e.cz(0, 1).unwrap();
            e.ct(2, 0).unwrap();
        });
        assert!(u.sum_sqr_diff(&mut d).unwrap() < 1e-12);
        let outcome = u.force_m(0, Some(true), true).unwrap();
        d.force_m(0, Some(outcome), true).unwrap();
        assert_eq!(u.buffer_count(), 0);
        assert!(u.sum_sqr_diff(&mut d).unwrap() < 1e-12);
    }

    #[test]
    fn test_try_separate_after_disentangling() {
        let mut u = tracker(2);
        u.h(0).unwrap();
        u.ch(0, 1).unwrap();
        u.ch(0, 1).unwrap();
        assert_eq!(u.unit_width(1).unwrap(), 2);
        assert!(u.try_separate(1).unwrap());
        assert!(u.try_separate(0).unwrap());
        assert_eq!(u.unit_count(), 0);
        assert_relative_eq!(u.prob(0).unwrap(), 0.5, epsilon = 1e-9);
        assert_relative_eq!(u.prob(1).unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_entangled_qubit_does_not_separate() {
        let mut u = tracker(2);
        u.h(0).unwrap();
        u.ch(0, 1).unwrap();
        assert!(!u.try_separate(1).unwrap());
        assert_eq!(u.unit_width(1).unwrap(), 2);
    }

    #[test]
    fn test_pair_separates_from_unit() {
        let mut u = tracker(4);
        u.h(0).unwrap();
        u.cnot(0, 1).unwrap();
        u.h(2).unwrap();
        u.cnot(2, 3).unwrap();
        // tie both pairs into one unit, then undo the tie
        u.ch(1, 2).unwrap();
        u.ch(1, 2).unwrap();
        assert_eq!(u.unit_width(0).unwrap(), 4);
        assert!(u.try_separate_pair(2, 3).unwrap());
        assert_eq!(u.unit_width(0).unwrap(), 2);
        assert_eq!(u.unit_width(3).unwrap(), 2);
        assert_relative_eq!(u.prob_parity(0b1100).unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_arithmetic_orders_unit() {
        let mut u = tracker(4);
        u.x(3).unwrap();
        u.h(0).unwrap();
        u.inc(1, 0, 2).unwrap();
        let mut d = dense(4);
        d.x(3).unwrap();
        d.h(0).unwrap();
        d.inc(1, 0, 2).unwrap();
        assert!(u.sum_sqr_diff(&mut d).unwrap() < 1e-12);
        assert_eq!(u.unit_width(3).unwrap(), 0);
    }

    #[test]
    fn test_swap_is_relabel() {
        let mut u = tracker(3);
        u.x(0).unwrap();
        u.h(2).unwrap();
        u.swap(0, 2).unwrap();
        assert_eq!(u.unit_count(), 0);
        assert_relative_eq!(u.prob(2).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(u.prob(0).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_decompose_keeps_unrelated_qubits() {
        let mut u = tracker(5);
        u.h(0).unwrap();
        u.cnot(0, 1).unwrap();
        u.ry(0.6, 3).unwrap();
        u.h(4).unwrap();
        u.cnot(4, 2).unwrap();
        let mut part = u.decompose(3, 1).unwrap();
        assert_eq!(u.num_qubits(), 4);
        assert_relative_eq!(part.prob(0).unwrap(), (0.3f64).sin().powi(2), epsilon = 1e-12);
        assert_relative_eq!(u.prob_parity(0b0011).unwrap(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(u.prob_parity(0b1100).unwrap(), 0.0, epsilon = 1e-12);

        let mut back = tracker(0);
        back.compose(part).unwrap();
        u.compose_at(back, 3).unwrap();
        assert_eq!(u.num_qubits(), 5);
        assert_relative_eq!(u.prob(3).unwrap(), (0.3f64).sin().powi(2), epsilon = 1e-12);
    }

    #[test]
    fn test_decompose_splits_buffered_pair() {
        let mut u = tracker(3);
        u.h(0).unwrap();
        u.h(1).unwrap();
        u.cz(0, 2).unwrap();
        u.cz(0, 1).unwrap();
        // qubit 2 is |0>, so its buffer flushes without entangling anything real
        let part = u.decompose(2, 1).unwrap();
        assert_eq!(part.num_qubits(), 1);
        assert_eq!(u.buffer_count(), 1);
    }

    #[test]
    fn test_amplitudes_include_buffer_phases() {
        let mut u = tracker(2);
        u.h(0).unwrap();
        u.h(1).unwrap();
        u.cz(0, 1).unwrap();
        let amp = u.get_amplitude(0b11).unwrap();
        assert_relative_eq!(amp.re, -0.5, epsilon = 1e-12);
        assert_eq!(u.buffer_count(), 1);
        let state = u.get_quantum_state().unwrap();
        let relative = state[3] / state[0];
        assert_relative_eq!(relative.re, -1.0, epsilon = 1e-12);
        assert_relative_eq!(relative.im, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_set_quantum_state_round_trip() {
        let mut d = dense(3);
        d.h(0).unwrap();
        d.cry(0.9, 0, 2).unwrap();
        let state = d.get_quantum_state().unwrap();
        let mut u = tracker(3);
        u.set_quantum_state(&state).unwrap();
        assert!(u.sum_sqr_diff(&mut d).unwrap() < 1e-12);
        assert!(u.set_quantum_state(&state[..4]).is_err());
    }

    #[test]
    fn test_parity_measurement() {
        let mut u = tracker(3);
        u.h(0).unwrap();
        u.cnot(0, 1).unwrap();
        u.h(2).unwrap();
        assert_relative_eq!(u.prob_parity(0b011).unwrap(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(u.prob_parity(0b101).unwrap(), 0.5, epsilon = 1e-12);
        assert!(!u.force_m_parity(0b011, None).unwrap());
        assert!(u.force_m_parity(0b101, Some(true)).unwrap());
        assert_relative_eq!(u.prob_parity(0b101).unwrap(), 1.0, epsilon = 1e-12);
    }
}
