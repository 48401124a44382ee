//! Phase buffers between shards
//!
//! Every buffer acts after the sub-engines and basis flags, and the set of
//! live buffers always commutes. Two rules keep it that way: a qubit that is
//! the target of an inverting buffer controls nothing, and its other target
//! buffers are inverting too. Whatever would break a rule is flushed first.

use qshard_core::{QuantumEngine, Result};
use smallvec::SmallVec;
use tracing::debug;

use super::shard::{PhaseShard, ShardId};
use super::QUnit;

type Ids = SmallVec<[ShardId; 8]>;

impl QUnit {
    pub(super) fn buffer(&self, control: ShardId, target: ShardId) -> Option<PhaseShard> {
        self.shards[control].controls.get(&target).copied()
    }

    fn store_buffer(&mut self, control: ShardId, target: ShardId, buffer: PhaseShard) {
        if buffer.is_identity() {
            self.take_buffer(control, target);
        } else {
            self.shards[control].controls.insert(target, buffer);
            self.shards[target].targeted_by.insert(control);
        }
    }

    pub(super) fn take_buffer(&mut self, control: ShardId, target: ShardId) -> Option<PhaseShard> {
        self.shards[target].targeted_by.remove(&control);
        self.shards[control].controls.remove(&target)
    }

    /// Apply the buffer on `control -> target` inside a sub-engine
    pub(super) fn flush_buffer(&mut self, control: ShardId, target: ShardId) -> Result<()> {
        let Some(buffer) = self.take_buffer(control, target) else {
            return Ok(());
        };
        self.revert_basis(control)?;
        self.revert_basis(target)?;
        let (unit, mapped) = self.entangle(&[control, target])?;
        debug!(
            unit,
            control = mapped[0],
            target = mapped[1],
            invert = buffer.invert,
            "flushing phase buffer"
        );
        self.unit_mut(unit)
            .mc_mtrx(&[mapped[0]], &buffer.matrix(), mapped[1])
    }

    fn controlling(&self, target: ShardId, invert: Option<bool>) -> Ids {
        self.shards[target]
            .targeted_by
            .iter()
            .copied()
            .filter(|&c| match (invert, self.buffer(c, target)) {
                (None, _) => true,
                (Some(want), Some(b)) => b.invert == want,
                (Some(_), None) => false,
            })
            .collect()
    }

    fn controlled(&self, control: ShardId, invert: Option<bool>) -> Ids {
        self.shards[control]
            .controls
            .iter()
            .filter(|(_, b)| invert.map_or(true, |want| b.invert == want))
            .map(|(&t, _)| t)
            .collect()
    }

    pub(super) fn is_invert_target(&self, sid: ShardId) -> bool {
        !self.controlling(sid, Some(true)).is_empty()
    }

    /// Flush every buffer touching `sid`
    pub(super) fn flush_all(&mut self, sid: ShardId) -> Result<()> {
        for target in self.controlled(sid, None) {
            self.flush_buffer(sid, target)?;
        }
        for control in self.controlling(sid, None) {
            self.flush_buffer(control, sid)?;
        }
        Ok(())
    }

    /// Flush the inverting buffers that target `sid`
    pub(super) fn flush_invert_targets(&mut self, sid: ShardId) -> Result<()> {
        for control in self.controlling(sid, Some(true)) {
            self.flush_buffer(control, sid)?;
        }
        Ok(())
    }

    /// Move a Hadamard on `sid` past its buffers, rewriting them, if all of them allow it
    pub(super) fn try_h_commute(&mut self, sid: ShardId) -> bool {
        if !self.shards[sid].controls.is_empty() {
            return false;
        }
        let mut turned: SmallVec<[(ShardId, PhaseShard); 8]> = SmallVec::new();
        for &control in &self.shards[sid].targeted_by {
            match self.buffer(control, sid).and_then(|b| b.h_commuted()) {
                Some(b) => turned.push((control, b)),
                None => return false,
            }
        }
        for (control, b) in turned {
            self.shards[control].controls.insert(sid, b);
        }
        true
    }

    /// Record `buffer` on `control -> target`, fusing with any buffer already there
    pub(super) fn add_buffer(
        &mut self,
        control: ShardId,
        target: ShardId,
        buffer: PhaseShard,
    ) -> Result<()> {
        self.flush_invert_targets(control)?;
        if !buffer.invert {
            self.flush_invert_targets(target)?;
            let fused = match self.buffer(control, target) {
                Some(old) => old.fuse(&buffer),
                None => buffer,
            };
            self.store_buffer(control, target, fused);
            return Ok(());
        }

        for t in self.controlled(target, None) {
            self.flush_buffer(target, t)?;
        }
        for c in self.controlling(target, Some(false)) {
            self.flush_buffer(c, target)?;
        }
        let fused = match self.buffer(control, target) {
            Some(old) => old.fuse(&buffer),
            None => buffer,
        };
        let others: Ids = self
            .controlling(target, None)
            .into_iter()
            .filter(|&c| c != control)
            .collect();
        if !fused.invert {
            // a diagonal buffer cannot sit beside inverting ones on the same target
            self.store_buffer(control, target, fused);
            if !others.is_empty() {
                self.flush_buffer(control, target)?;
            }
            return Ok(());
        }
        let commutes = fused.is_x_type()
            && others
                .iter()
                .all(|&c| self.buffer(c, target).map_or(true, |b| b.is_x_type()));
        if !commutes {
            for c in others {
                self.flush_buffer(c, target)?;
            }
        }
        self.store_buffer(control, target, fused);
        Ok(())
    }

    /// Number of live buffers
    pub fn buffer_count(&self) -> usize {
        self.shards.iter().map(|(_, s)| s.controls.len()).sum()
    }
}
