//! Moving shards into and out of sub-engines

use ahash::AHashMap;
use num_complex::Complex64;
use qshard_core::complex::{is_norm_0, polar, ONE};
use qshard_core::error::check_qubit;
use qshard_core::{Composable, Matrix2, QuantumEngine, QuantumError, Result};
use qshard_gates::matrices::HADAMARD;
use qshard_gates::matrix_ops::apply2x2;
use qshard_gates::GateOps;
use smallvec::SmallVec;
use tracing::debug;

use crate::arena::Arena;
use super::shard::{QubitShard, ShardId, ShardState, UnitId};
use super::{QUnit, UnitSlot};
use crate::register::{layer_capacity, Register};

/// Rewrite buffer endpoints of `ids` through `map`, dropping edges that leave the set
fn remap_edges(shards: &mut Arena<QubitShard>, ids: &[ShardId], map: &AHashMap<ShardId, ShardId>) {
    for &id in ids {
        let shard = &mut shards[id];
        let controls = std::mem::take(&mut shard.controls);
        shard.controls = controls
            .into_iter()
            .filter_map(|(t, b)| map.get(&t).map(|&nt| (nt, b)))
            .collect();
        let targeted_by = std::mem::take(&mut shard.targeted_by);
        shard.targeted_by = targeted_by
            .into_iter()
            .filter_map(|c| map.get(&c).copied())
            .collect();
    }
}

impl QUnit {
    /// Shards stored in `unit`, ordered by their index there
    pub(super) fn members(&self, unit: UnitId) -> Vec<ShardId> {
        let mut members: Vec<(usize, ShardId)> = self
            .shards
            .iter()
            .filter_map(|(id, s)| match s.state.location() {
                Some((u, mapped)) if u == unit => Some((mapped, id)),
                _ => None,
            })
            .collect();
        members.sort_unstable();
        members.into_iter().map(|(_, id)| id).collect()
    }

    /// Give an emulated shard a one-qubit sub-engine
    pub(super) fn end_emulation(&mut self, sid: ShardId) -> Result<UnitId> {
        let amps = match self.shards[sid].state {
            ShardState::InUnit { unit, .. } | ShardState::Rotated { unit, .. } => return Ok(unit),
            ShardState::Emulated(amps) => amps,
        };
        let norm = (amps[0].norm_sqr() + amps[1].norm_sqr()).sqrt();
        let (a0, a1) = (amps[0] / norm, amps[1] / norm);
        let inner = self.config.inner();
        let register = if is_norm_0(a0) {
            let mut r = Register::build(inner, 1, 1, self.rng.clone())?;
            r.phase(ONE, a1, 0)?;
            r
        } else {
            let mut r = Register::build(inner, 1, 0, self.rng.clone())?;
            let prepare: Matrix2 = [[a0, -a1.conj()], [a1, a0.conj()]];
            r.mtrx(&prepare, 0)?;
            r
        };
        let unit = self.units.insert(UnitSlot {
            register,
            generation: 0,
        });
        let shard = &mut self.shards[sid];
        shard.state = ShardState::InUnit { unit, mapped: 0 };
        shard.cached_prob = None;
        Ok(unit)
    }

    /// Bring `sids` into one sub-engine, returning it and their indices there
    pub(super) fn entangle(&mut self, sids: &[ShardId]) -> Result<(UnitId, SmallVec<[usize; 8]>)> {
        let mut units: SmallVec<[UnitId; 8]> = SmallVec::new();
        for &sid in sids {
            let unit = self.end_emulation(sid)?;
            if !units.contains(&unit) {
                units.push(unit);
            }
        }
        let size = |this: &Self, u: UnitId| this.units[u].register.num_qubits();
        let mut base = units[0];
        for &u in &units[1..] {
            if size(self, u) > size(self, base) {
                base = u;
            }
        }
        if units.len() > 1 {
            let total: usize = units.iter().map(|&u| size(self, u)).sum();
            let max = layer_capacity(&self.config.inner());
            if total > max {
                return Err(QuantumError::CapacityExceeded {
                    requested: total,
                    max,
                });
            }
            for &u in &units {
                if u == base {
                    continue;
                }
                let Some(slot) = self.units.remove(u) else {
                    continue;
                };
                let offset = self.unit_mut(base).compose(slot.register)?;
                for (_, shard) in self.shards.iter_mut() {
                    if let Some((owner, mapped)) = shard.state.location() {
                        if owner == u {
                            shard.state = shard.state.relocated(base, mapped + offset);
                            shard.cached_prob = None;
                        }
                    }
                }
            }
            debug!(
                units = units.len(),
                qubits = total,
                "entangled sub-engines"
            );
        }
        let mapped: Option<SmallVec<[usize; 8]>> = sids
            .iter()
            .map(|&s| self.shards[s].state.location().map(|(_, m)| m))
            .collect();
        match mapped {
            Some(mapped) => Ok((base, mapped)),
            // every shard was given a unit above
            None => unreachable!(),
        }
    }

    /// Exchange the qubits at `a` and `b` inside `unit`
    pub(super) fn swap_mapped(&mut self, unit: UnitId, a: usize, b: usize) -> Result<()> {
        if a == b {
            return Ok(());
        }
        self.unit_mut(unit).swap(a, b)?;
        for (_, shard) in self.shards.iter_mut() {
            match shard.state.location() {
                Some((u, m)) if u == unit && m == a => shard.state = shard.state.relocated(u, b),
                Some((u, m)) if u == unit && m == b => shard.state = shard.state.relocated(u, a),
                _ => {}
            }
        }
        Ok(())
    }

    /// Reorder `unit` so its qubits sit in logical order
    pub(super) fn order_contiguous(&mut self, unit: UnitId) -> Result<()> {
        let positions = self.position_map();
        let mut members = self.members(unit);
        members.sort_by_key(|id| positions.get(id).copied().unwrap_or(usize::MAX));
        for (rank, sid) in members.into_iter().enumerate() {
            if let Some((_, current)) = self.shards[sid].state.location() {
                self.swap_mapped(unit, current, rank)?;
            }
        }
        Ok(())
    }

    /// Account for the removal of index `removed` from `unit`
    fn shift_down(&mut self, unit: UnitId, removed: usize) {
        for (_, shard) in self.shards.iter_mut() {
            if let Some((u, m)) = shard.state.location() {
                if u == unit && m > removed {
                    shard.state = shard.state.relocated(u, m - 1);
                }
            }
        }
    }

    /// Take a qubit known to be in basis state `bit` out of its unit
    pub(super) fn detach_basis(&mut self, sid: ShardId, bit: bool) -> Result<()> {
        if let Some((unit, mapped)) = self.shards[sid].state.location() {
            if self.units[unit].register.num_qubits() == 1 {
                self.units.remove(unit);
            } else {
                self.unit_mut(unit).dispose_perm(mapped, 1, bit as u64)?;
                self.shift_down(unit, mapped);
            }
            debug!(unit, mapped, "separated measured qubit");
        }
        let shard = &mut self.shards[sid];
        shard.state = ShardState::basis(bit);
        shard.cached_prob = None;
        Ok(())
    }

    /// Split a shard out of its unit if its reduced state is pure
    pub(super) fn try_separate_shard(&mut self, sid: ShardId) -> Result<bool> {
        let state = self.shards[sid].state;
        let Some((unit, mapped)) = state.location() else {
            return Ok(true);
        };
        let single = self.units[unit].register.num_qubits() == 1;
        let threshold = self.config.separability_threshold;
        let register = self.unit_mut(unit);
        let z = 1.0 - 2.0 * register.prob(mapped)?;
        register.h(mapped)?;
        let x = 1.0 - 2.0 * register.prob(mapped)?;
        register.h(mapped)?;
        register.is(mapped)?;
        register.h(mapped)?;
        let y = 1.0 - 2.0 * register.prob(mapped)?;
        register.h(mapped)?;
        register.s(mapped)?;

        let r = (x * x + y * y + z * z).sqrt();
        if !single && 1.0 - r > threshold {
            return Ok(false);
        }
        let theta = (z / r).clamp(-1.0, 1.0).acos();
        let phi = y.atan2(x);
        let (c, s) = ((theta / 2.0).cos(), (theta / 2.0).sin());
        let e = polar(1.0, phi);
        if single {
            self.units.remove(unit);
        } else {
            let to_zero: Matrix2 = [
                [Complex64::new(c, 0.0), e.conj() * s],
                [-e * s, Complex64::new(c, 0.0)],
            ];
            register.mtrx(&to_zero, mapped)?;
            register.dispose_perm(mapped, 1, 0)?;
            self.shift_down(unit, mapped);
        }
        let amps = [Complex64::new(c, 0.0), e * s];
        let amps = if state.is_rotated() {
            apply2x2(&HADAMARD, amps)
        } else {
            amps
        };
        let shard = &mut self.shards[sid];
        shard.state = ShardState::Emulated(amps);
        shard.cached_prob = None;
        debug!(unit, mapped, "separated qubit from its unit");
        Ok(true)
    }

    /// Try to move `qubit` out of its sub-engine
    ///
    /// Succeeds when the qubit's Bloch vector is within the configured
    /// `separability_threshold` of the unit sphere.
    pub fn try_separate(&mut self, qubit: usize) -> Result<bool> {
        check_qubit(qubit, self.num_qubits())?;
        let sid = self.order[qubit];
        self.try_separate_shard(sid)
    }

    /// Try to split `q1` and `q2` out of the rest of their sub-engine
    ///
    /// Each qubit is first tried alone; a pair that is entangled only with
    /// itself ends up in its own two-qubit unit.
    pub fn try_separate_pair(&mut self, q1: usize, q2: usize) -> Result<bool> {
        let n = self.num_qubits();
        check_qubit(q1, n)?;
        check_qubit(q2, n)?;
        if q1 == q2 {
            return Err(QuantumError::invalid_qubit(q2, n));
        }
        let (a, b) = (self.order[q1], self.order[q2]);
        let first = self.try_separate_shard(a)?;
        let second = self.try_separate_shard(b)?;
        if first && second {
            return Ok(true);
        }
        if first || second {
            return Ok(false);
        }
        let (Some((ua, _)), Some((ub, _))) = (
            self.shards[a].state.location(),
            self.shards[b].state.location(),
        ) else {
            return Ok(false);
        };
        if ua != ub {
            return Ok(false);
        }
        let size = self.units[ua].register.num_qubits();
        if size == 2 {
            return Ok(true);
        }
        for (sid, slot) in [(a, size - 2), (b, size - 1)] {
            if let Some((_, current)) = self.shards[sid].state.location() {
                self.swap_mapped(ua, current, slot)?;
            }
        }
        let tolerance = self.config.separability_threshold;
        let Some(part) = self.unit_mut(ua).try_decompose(size - 2, 2, tolerance)? else {
            return Ok(false);
        };
        let unit = self.units.insert(UnitSlot {
            register: part,
            generation: 0,
        });
        for (sid, mapped) in [(a, 0), (b, 1)] {
            let shard = &mut self.shards[sid];
            shard.state = shard.state.relocated(unit, mapped);
            shard.cached_prob = None;
        }
        debug!(from = ua, to = unit, "separated qubit pair");
        Ok(true)
    }

    /// Move every unit and shard of `other` in, returning the new ids in its qubit order
    pub(super) fn absorb(&mut self, mut other: QUnit) -> Vec<ShardId> {
        let mut unit_ids = AHashMap::new();
        for (old, slot) in other.units.drain() {
            unit_ids.insert(old, self.units.insert(slot));
        }
        let mut shard_ids = AHashMap::new();
        let mut inserted = Vec::new();
        for (old, mut shard) in other.shards.drain() {
            if let Some((u, m)) = shard.state.location() {
                if let Some(&nu) = unit_ids.get(&u) {
                    shard.state = shard.state.relocated(nu, m);
                }
            }
            let id = self.shards.insert(shard);
            shard_ids.insert(old, id);
            inserted.push(id);
        }
        remap_edges(&mut self.shards, &inserted, &shard_ids);
        other
            .order
            .iter()
            .filter_map(|old| shard_ids.get(old).copied())
            .collect()
    }

    /// Move `sids`, with their units, into a fresh tracker
    ///
    /// The units touched must hold nothing else and all buffers must stay inside the set.
    pub(super) fn extract(&mut self, sids: &[ShardId]) -> QUnit {
        let mut part = QUnit::empty(self.config.clone(), self.rng.clone());
        let mut unit_ids = AHashMap::new();
        let mut shard_ids = AHashMap::new();
        let mut inserted = Vec::with_capacity(sids.len());
        for &sid in sids {
            let Some(mut shard) = self.shards.remove(sid) else {
                continue;
            };
            if let Some((u, m)) = shard.state.location() {
                let nu = match unit_ids.get(&u) {
                    Some(&nu) => nu,
                    None => match self.units.remove(u) {
                        Some(slot) => {
                            let nu = part.units.insert(slot);
                            unit_ids.insert(u, nu);
                            nu
                        }
                        None => continue,
                    },
                };
                shard.state = shard.state.relocated(nu, m);
            }
            let id = part.shards.insert(shard);
            shard_ids.insert(sid, id);
            inserted.push(id);
        }
        remap_edges(&mut part.shards, &inserted, &shard_ids);
        part.order = inserted;
        part
    }
}
