//! Engine configuration

use crate::complex::MIN_NORM;

/// A representation layer in a register's engine stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Dense (or sparse) state vector held in one buffer
    Cpu,
    /// State vector split into independently owned pages
    Pager,
    /// Stabilizer tableau until a non-Clifford gate forces a switch
    StabilizerHybrid,
    /// Per-qubit shards with deferred entanglement
    Unit,
}

/// What to do when a decompose or dispose targets an entangled range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeparabilityPolicy {
    /// Proceed with the best product-state approximation and log a warning
    #[default]
    Lenient,
    /// Refuse with [`QuantumError::NonSeparable`](crate::QuantumError::NonSeparable)
    Strict,
}

/// Configuration shared by every engine variant
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Normalize the state after each gate instead of lazily
    ///
    /// Default: false
    pub do_normalize: bool,

    /// Apply a random global phase at initialization
    ///
    /// Default: false
    pub random_global_phase: bool,

    /// Keep amplitudes in host memory
    ///
    /// Device-resident buffers are not modelled; the flag is carried through
    /// composition so that derived registers inherit it.
    ///
    /// Default: true
    pub use_host_mem: bool,

    /// Store amplitudes in a sparse map rather than a dense buffer
    ///
    /// Default: false
    pub sparse: bool,

    /// Squared magnitude under which an amplitude is zeroed on normalization
    ///
    /// Default: 1e-15
    pub amplitude_floor: f64,

    /// Maximum distance from a pure single-qubit state for a shard to be split off
    ///
    /// Default: 1e-6
    pub separability_threshold: f64,

    /// Local qubits per page for the paged engine
    ///
    /// Registers wider than this are split into `2^(n - page_qubits)` pages.
    ///
    /// Default: 18
    pub page_qubits: usize,

    /// Minimum number of qubits to enable parallel kernels
    ///
    /// Default: 12
    pub parallel_threshold: usize,

    /// Random number generator seed for reproducibility
    ///
    /// Default: None (random)
    pub seed: Option<u64>,

    /// Behaviour on non-separable decompose
    ///
    /// Default: Lenient
    pub separability_policy: SeparabilityPolicy,

    /// Representation stack, outermost first
    ///
    /// Default: `[Unit, StabilizerHybrid, Pager, Cpu]`
    pub layers: Vec<EngineKind>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            do_normalize: false,
            random_global_phase: false,
            use_host_mem: true,
            sparse: false,
            amplitude_floor: MIN_NORM,
            separability_threshold: 1e-6,
            page_qubits: 18,
            parallel_threshold: 12,
            seed: None,
            separability_policy: SeparabilityPolicy::Lenient,
            layers: vec![
                EngineKind::Unit,
                EngineKind::StabilizerHybrid,
                EngineKind::Pager,
                EngineKind::Cpu,
            ],
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain dense engine, no deferred work
    pub fn fast() -> Self {
        Self {
            layers: vec![EngineKind::Cpu],
            ..Default::default()
        }
    }

    /// Normalize after every gate and refuse lossy decompositions
    pub fn accurate() -> Self {
        Self {
            do_normalize: true,
            separability_threshold: 1e-9,
            separability_policy: SeparabilityPolicy::Strict,
            ..Default::default()
        }
    }

    /// Default stack with the strict separability policy
    pub fn strict() -> Self {
        Self {
            separability_policy: SeparabilityPolicy::Strict,
            ..Default::default()
        }
    }

    /// Deterministic, single-threaded, small pages
    pub fn debug() -> Self {
        Self {
            seed: Some(42),
            parallel_threshold: usize::MAX,
            page_qubits: 2,
            ..Default::default()
        }
    }

    /// Set the representation stack
    pub fn with_layers(mut self, layers: impl Into<Vec<EngineKind>>) -> Self {
        self.layers = layers.into();
        self
    }

    /// Set the random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set normalize-on-gate
    pub fn with_normalize(mut self, enabled: bool) -> Self {
        self.do_normalize = enabled;
        self
    }

    /// Set random global phase at initialization
    pub fn with_random_global_phase(mut self, enabled: bool) -> Self {
        self.random_global_phase = enabled;
        self
    }

    /// Set sparse storage
    pub fn with_sparse(mut self, enabled: bool) -> Self {
        self.sparse = enabled;
        self
    }

    /// Set the local qubit width of each page
    pub fn with_page_qubits(mut self, page_qubits: usize) -> Self {
        self.page_qubits = page_qubits;
        self
    }

    /// Set the parallel kernel threshold
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Set the separability policy
    pub fn with_separability_policy(mut self, policy: SeparabilityPolicy) -> Self {
        self.separability_policy = policy;
        self
    }

    /// Set the shard separability threshold
    pub fn with_separability_threshold(mut self, threshold: f64) -> Self {
        self.separability_threshold = threshold;
        self
    }

    /// Configuration for the layer below the outermost one
    ///
    /// The last layer is never removed; a stack that runs out falls back to `Cpu`.
    pub fn inner(&self) -> Self {
        let mut next = self.clone();
        if next.layers.len() > 1 {
            next.layers.remove(0);
        } else {
            next.layers = vec![EngineKind::Cpu];
        }
        next
    }

    /// Outermost layer
    pub fn outer_kind(&self) -> EngineKind {
        self.layers.first().copied().unwrap_or(EngineKind::Cpu)
    }

    /// Whether `kind` appears anywhere in the stack
    pub fn has_layer(&self, kind: EngineKind) -> bool {
        self.layers.contains(&kind)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(self.amplitude_floor >= 0.0 && self.amplitude_floor < 1.0) {
            return Err("amplitude_floor must be in [0, 1)".to_string());
        }
        if !(self.separability_threshold >= 0.0 && self.separability_threshold < 1.0) {
            return Err("separability_threshold must be in [0, 1)".to_string());
        }
        if self.page_qubits == 0 {
            return Err("page_qubits must be at least 1".to_string());
        }
        if self.layers.is_empty() {
            return Err("layers must name at least one engine kind".to_string());
        }
        for (i, kind) in self.layers.iter().enumerate() {
            if self.layers[i + 1..].contains(kind) {
                return Err(format!("engine kind {:?} appears twice in layers", kind));
            }
        }
        let rank = |kind: EngineKind| match kind {
            EngineKind::Unit => 0,
            EngineKind::StabilizerHybrid => 1,
            EngineKind::Pager => 2,
            EngineKind::Cpu => 3,
        };
        if self.layers.windows(2).any(|w| rank(w[0]) > rank(w[1])) {
            return Err("layers must be ordered Unit, StabilizerHybrid, Pager, Cpu".to_string());
        }
        Ok(())
    }
}
