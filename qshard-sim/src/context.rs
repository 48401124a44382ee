//! Caller-owned simulator context
//!
//! A [`SimulatorContext`] carries the configuration and random source that
//! registers are built from, and optionally holds registers behind integer
//! handles for callers that prefer not to own them directly. There is no
//! process-wide state: two contexts never share a generator unless the caller
//! hands one to both.

use qshard_core::{Composable, EngineConfig, QRng, QuantumEngine, QuantumError, Result};
use tracing::{debug, info};

use crate::arena::Arena;
use crate::register::Register;

/// Handle to a register held by a [`SimulatorContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterHandle(usize);

impl RegisterHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Configuration, random source and handle table for a set of registers
#[derive(Debug)]
pub struct SimulatorContext {
    config: EngineConfig,
    rng: QRng,
    registers: Arena<Register>,
}

impl SimulatorContext {
    /// Validate `config` and seed a generator from it
    pub fn new(config: EngineConfig) -> Result<Self> {
        let rng = QRng::new(config.seed);
        Self::with_rng(config, rng)
    }

    /// Build around an existing generator, which keeps drawing its own sequence
    pub fn with_rng(config: EngineConfig, rng: QRng) -> Result<Self> {
        config.validate().map_err(QuantumError::InvalidConfig)?;
        info!(layers = ?config.layers, seed = ?config.seed, "simulator context initialized");
        Ok(Self {
            config,
            rng,
            registers: Arena::default(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rng(&self) -> &QRng {
        &self.rng
    }

    /// Reseed the shared generator; registers already built follow along
    pub fn set_seed(&self, seed: u64) {
        self.rng.set_seed(seed);
    }

    /// Build a register owned by the caller
    pub fn create(&self, num_qubits: usize, perm: u64) -> Result<Register> {
        Register::new(self.config.clone(), num_qubits, perm, self.rng.clone())
    }

    /// Build a caller-owned register from a different layer stack, sharing this generator
    pub fn create_with(
        &self,
        config: EngineConfig,
        num_qubits: usize,
        perm: u64,
    ) -> Result<Register> {
        config.validate().map_err(QuantumError::InvalidConfig)?;
        Register::new(config, num_qubits, perm, self.rng.clone())
    }

    /// Build a register held by the context and return its handle
    pub fn allocate(&mut self, num_qubits: usize, perm: u64) -> Result<RegisterHandle> {
        let register = self.create(num_qubits, perm)?;
        Ok(self.insert(register))
    }

    /// Hand a register over to the context
    pub fn insert(&mut self, register: Register) -> RegisterHandle {
        let handle = RegisterHandle(self.registers.insert(register));
        debug!(handle = handle.0, live = self.registers.len(), "register attached");
        handle
    }

    pub fn get(&self, handle: RegisterHandle) -> Result<&Register> {
        self.registers
            .get(handle.0)
            .ok_or(QuantumError::UnknownHandle(handle.0))
    }

    pub fn get_mut(&mut self, handle: RegisterHandle) -> Result<&mut Register> {
        self.registers
            .get_mut(handle.0)
            .ok_or(QuantumError::UnknownHandle(handle.0))
    }

    /// Take a register back out of the context, invalidating its handle
    pub fn release(&mut self, handle: RegisterHandle) -> Result<Register> {
        let register = self
            .registers
            .remove(handle.0)
            .ok_or(QuantumError::UnknownHandle(handle.0))?;
        debug!(handle = handle.0, live = self.registers.len(), "register released");
        Ok(register)
    }

    /// Copy a held register into a new handle
    pub fn duplicate(&mut self, handle: RegisterHandle) -> Result<RegisterHandle> {
        let copy = self.get(handle)?.clone();
        Ok(self.insert(copy))
    }

    /// Tensor `src` in above the qubits of `dest`; `src` is consumed
    ///
    /// Returns the index of the first qubit that came from `src`. The source
    /// handle is released even when the compose fails.
    pub fn compose(&mut self, dest: RegisterHandle, src: RegisterHandle) -> Result<usize> {
        if dest == src {
            return Err(QuantumError::invalid_operand(
                "compose",
                "a register cannot be composed with itself",
            ));
        }
        self.get(dest)?;
        let other = self.release(src)?;
        self.get_mut(dest)?.compose(other)
    }

    /// Split `[start, start + length)` out of a held register into a new handle
    pub fn decompose(
        &mut self,
        handle: RegisterHandle,
        start: usize,
        length: usize,
    ) -> Result<RegisterHandle> {
        let part = self.get_mut(handle)?.decompose(start, length)?;
        Ok(self.insert(part))
    }

    /// Live handles in index order
    pub fn handles(&self) -> Vec<RegisterHandle> {
        self.registers.iter().map(|(id, _)| RegisterHandle(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.len() == 0
    }

    /// Finish and drop every held register
    pub fn clear(&mut self) {
        for (id, mut register) in self.registers.drain() {
            register.finish();
            debug!(handle = id, "register dropped");
        }
    }

    /// End the context, returning the registers it still held
    pub fn teardown(mut self) -> Vec<Register> {
        let held: Vec<Register> = self
            .registers
            .drain()
            .into_iter()
            .map(|(_, mut register)| {
                register.finish();
                register
            })
            .collect();
        info!(returned = held.len(), "simulator context torn down");
        held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use qshard_core::EngineKind;
    use qshard_gates::GateOps;

    fn context() -> SimulatorContext {
        let config = EngineConfig::fast()
            .with_layers([EngineKind::StabilizerHybrid, EngineKind::Cpu])
            .with_seed(3);
        SimulatorContext::new(config).unwrap()
    }

    #[test]
    fn test_rejects_invalid_layers() {
        let config = EngineConfig::fast().with_layers([EngineKind::Cpu, EngineKind::Unit]);
        assert!(matches!(
            SimulatorContext::new(config),
            Err(QuantumError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_created_registers_share_the_generator() {
        let ctx = context();
        let a = ctx.create(2, 0).unwrap();
        let b = ctx.create(3, 0).unwrap();
        assert!(a.rng().shares_with(b.rng()));
        assert!(a.rng().shares_with(ctx.rng()));
        assert_eq!(a.kind(), EngineKind::StabilizerHybrid);
    }

    #[test]
    fn test_handle_lifecycle() {
        let mut ctx = context();
        let h = ctx.allocate(2, 0).unwrap();
        ctx.get_mut(h).unwrap().x(1).unwrap();
        assert_eq!(ctx.len(), 1);

        let mut register = ctx.release(h).unwrap();
        assert_relative_eq!(register.prob(1).unwrap(), 1.0);
        assert!(ctx.is_empty());
        assert_eq!(ctx.get(h).unwrap_err(), QuantumError::UnknownHandle(h.index()));
        assert!(ctx.release(h).is_err());
    }

    #[test]
    fn test_compose_and_decompose_through_handles() {
        let mut ctx = context();
        let a = ctx.allocate(2, 0b01).unwrap();
        let b = ctx.allocate(1, 1).unwrap();
        let start = ctx.compose(a, b).unwrap();
        assert_eq!(start, 2);
        assert_eq!(ctx.len(), 1);
        assert!(ctx.get(b).is_err());
        assert_relative_eq!(ctx.get_mut(a).unwrap().prob_all(0b101).unwrap(), 1.0);

        let part = ctx.decompose(a, 0, 1).unwrap();
        assert_eq!(ctx.get(a).unwrap().num_qubits(), 2);
        assert_relative_eq!(ctx.get_mut(part).unwrap().prob(0).unwrap(), 1.0);
        assert!(ctx.compose(a, a).is_err());
    }

    #[test]
    fn test_duplicate_is_independent() {
        let mut ctx = context();
        let a = ctx.allocate(1, 0).unwrap();
        let b = ctx.duplicate(a).unwrap();
        ctx.get_mut(b).unwrap().x(0).unwrap();
        assert_relative_eq!(ctx.get_mut(a).unwrap().prob(0).unwrap(), 0.0);
        assert_relative_eq!(ctx.get_mut(b).unwrap().prob(0).unwrap(), 1.0);
        assert_eq!(ctx.handles(), vec![a, b]);
    }

    #[test]
    fn test_teardown_returns_held_registers() {
        let mut ctx = context();
        ctx.allocate(1, 0).unwrap();
        ctx.allocate(2, 0).unwrap();
        let held = ctx.teardown();
        assert_eq!(held.len(), 2);
    }
}
