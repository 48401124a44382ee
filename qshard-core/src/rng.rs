//! Random generator shared between registers
//!
//! Measurement sampling and global phase randomization draw from a [`QRng`].
//! Clones share the same underlying generator, so composed registers keep
//! drawing from one sequence.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::Arc;

/// Uniform random source with a resettable seed
#[derive(Clone)]
pub struct QRng {
    inner: Arc<Mutex<StdRng>>,
}

impl QRng {
    /// Seeded generator, or an entropy-seeded one when `seed` is `None`
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: Arc::new(Mutex::new(rng)),
        }
    }

    /// Uniform draw in `[0, 1)`
    pub fn rand(&self) -> f64 {
        self.inner.lock().gen::<f64>()
    }

    /// Uniform angle in `[0, 2pi)`
    pub fn rand_angle(&self) -> f64 {
        2.0 * std::f64::consts::PI * self.rand()
    }

    /// Reseed every holder of this generator
    pub fn set_seed(&self, seed: u64) {
        *self.inner.lock() = StdRng::seed_from_u64(seed);
    }

    /// Whether `other` draws from the same generator
    pub fn shares_with(&self, other: &QRng) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for QRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Debug for QRng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QRng")
            .field("shared", &Arc::strong_count(&self.inner))
            .finish()
    }
}
