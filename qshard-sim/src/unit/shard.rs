//! Per-qubit bookkeeping for the shard tracker

use std::f64::consts::PI;

use ahash::{AHashMap, AHashSet};
use num_complex::Complex64;
use qshard_core::complex::{polar, PROB_EPSILON, ZERO};
use qshard_core::Matrix2;
use qshard_gates::matrices::HADAMARD;
use qshard_gates::matrix_ops::{apply2x2, is_invert, is_phase};

pub(crate) type ShardId = usize;
pub(crate) type UnitId = usize;

const FOUR_PI: f64 = 4.0 * PI;

fn wrap(angle: f64) -> f64 {
    angle.rem_euclid(FOUR_PI)
}

fn same_phase(a: f64, b: f64) -> bool {
    1.0 - (a - b).cos() <= PROB_EPSILON
}

/// Deferred controlled gate between two shards
///
/// Holds `diag(e^{i angle0}, e^{i angle1})`, or with `invert` set the
/// anti-diagonal `[[0, e^{i angle0}], [e^{i angle1}, 0]]`, applied to the
/// target when the control is |1>.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PhaseShard {
    pub angle0: f64,
    pub angle1: f64,
    pub invert: bool,
}

impl PhaseShard {
    pub fn new(angle0: f64, angle1: f64, invert: bool) -> Self {
        Self {
            angle0: wrap(angle0),
            angle1: wrap(angle1),
            invert,
        }
    }

    /// Buffer for a diagonal or anti-diagonal unitary `m`
    pub fn from_matrix(m: &Matrix2) -> Option<Self> {
        let unit = |c: Complex64| (c.norm_sqr() - 1.0).abs() <= PROB_EPSILON;
        if is_phase(m) && unit(m[0][0]) && unit(m[1][1]) {
            Some(Self::new(m[0][0].arg(), m[1][1].arg(), false))
        } else if is_invert(m) && unit(m[0][1]) && unit(m[1][0]) {
            Some(Self::new(m[0][1].arg(), m[1][0].arg(), true))
        } else {
            None
        }
    }

    pub fn matrix(&self) -> Matrix2 {
        let a = polar(1.0, self.angle0);
        let b = polar(1.0, self.angle1);
        if self.invert {
            [[ZERO, a], [b, ZERO]]
        } else {
            [[a, ZERO], [ZERO, b]]
        }
    }

    pub fn inverse(&self) -> Self {
        if self.invert {
            Self::new(-self.angle1, -self.angle0, true)
        } else {
            Self::new(-self.angle0, -self.angle1, false)
        }
    }

    /// Single buffer equal to `newer` applied after `self`
    pub fn fuse(&self, newer: &Self) -> Self {
        let (n0, n1, s0, s1) = (newer.angle0, newer.angle1, self.angle0, self.angle1);
        match (newer.invert, self.invert) {
            (false, invert) => Self::new(n0 + s0, n1 + s1, invert),
            (true, false) => Self::new(n0 + s1, n1 + s0, true),
            (true, true) => Self::new(n0 + s1, n1 + s0, false),
        }
    }

    pub fn is_identity(&self) -> bool {
        !self.invert && same_phase(self.angle0, 0.0) && same_phase(self.angle1, 0.0)
    }

    /// `e^{ia} X`, which commutes with every other buffer of the same form
    pub fn is_x_type(&self) -> bool {
        self.invert && same_phase(self.angle0, self.angle1)
    }

    /// `e^{ia} Z`
    pub fn is_z_type(&self) -> bool {
        !self.invert && same_phase(self.angle1, self.angle0 + PI)
    }

    /// The buffer after moving a Hadamard on the target past it
    pub fn h_commuted(&self) -> Option<Self> {
        if self.is_z_type() {
            Some(Self::new(self.angle0, self.angle0, true))
        } else if self.is_x_type() {
            Some(Self::new(self.angle0, self.angle0 + PI, false))
        } else {
            None
        }
    }

    /// Diagonal entry seen by a target collapsed to `bit`
    pub fn target_phase(&self, bit: bool) -> Complex64 {
        polar(1.0, if bit { self.angle1 } else { self.angle0 })
    }
}

/// Where a logical qubit's state lives
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ShardState {
    /// Unentangled qubit kept as its two amplitudes
    Emulated([Complex64; 2]),
    /// Qubit `mapped` of a sub-engine, in the computational basis
    InUnit { unit: UnitId, mapped: usize },
    /// Qubit `mapped` of a sub-engine holds the Hadamard image of this qubit
    Rotated { unit: UnitId, mapped: usize },
}

impl ShardState {
    pub fn basis(bit: bool) -> Self {
        if bit {
            Self::Emulated([ZERO, Complex64::new(1.0, 0.0)])
        } else {
            Self::Emulated([Complex64::new(1.0, 0.0), ZERO])
        }
    }

    pub fn location(&self) -> Option<(UnitId, usize)> {
        match *self {
            Self::Emulated(_) => None,
            Self::InUnit { unit, mapped } | Self::Rotated { unit, mapped } => Some((unit, mapped)),
        }
    }

    pub fn is_rotated(&self) -> bool {
        matches!(self, Self::Rotated { .. })
    }

    /// Same basis, new position
    pub fn relocated(self, unit: UnitId, mapped: usize) -> Self {
        match self {
            Self::Rotated { .. } => Self::Rotated { unit, mapped },
            _ => Self::InUnit { unit, mapped },
        }
    }

    /// Account for a Hadamard without touching any sub-engine
    pub fn hadamard(self) -> Self {
        match self {
            Self::Emulated(amps) => Self::Emulated(apply2x2(&HADAMARD, amps)),
            Self::InUnit { unit, mapped } => Self::Rotated { unit, mapped },
            Self::Rotated { unit, mapped } => Self::InUnit { unit, mapped },
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct QubitShard {
    pub state: ShardState,
    /// Buffers this qubit controls, keyed by target
    pub controls: AHashMap<ShardId, PhaseShard>,
    /// Shards holding a buffer that targets this one
    pub targeted_by: AHashSet<ShardId>,
    /// Z probability of the stored qubit, tagged with the unit generation it was read at
    pub cached_prob: Option<(u64, f64)>,
}

impl QubitShard {
    pub fn new(state: ShardState) -> Self {
        Self {
            state,
            controls: AHashMap::new(),
            targeted_by: AHashSet::new(),
            cached_prob: None,
        }
    }

    pub fn has_buffers(&self) -> bool {
        !self.controls.is_empty() || !self.targeted_by.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use qshard_gates::matrices::{PAULI_X, PAULI_Z, S_GATE, T_GATE};
    use qshard_gates::matrix_ops::{matrices_equal, mul2x2};

    #[test]
    fn test_fused_angles_add() {
        let t = PhaseShard::from_matrix(&T_GATE).unwrap();
        let s = t.fuse(&t);
        assert!(matrices_equal(&s.matrix(), &S_GATE));
        let back = s.fuse(&t.inverse()).fuse(&t.inverse());
        assert!(back.is_identity());
    }

    #[test]
    fn test_fuse_matches_matrix_product() {
        let a = PhaseShard::new(0.3, 1.7, true);
        let b = PhaseShard::new(-0.4, 2.2, false);
        let c = PhaseShard::new(1.1, 0.5, true);
        for (older, newer) in [(a, b), (b, a), (a, c), (b, b)] {
            let fused = older.fuse(&newer);
            let product = mul2x2(&newer.matrix(), &older.matrix());
            assert!(matrices_equal(&fused.matrix(), &product));
        }
    }

    #[test]
    fn test_angles_wrap_at_four_pi() {
        let p = PhaseShard::new(3.0 * PI, -PI, false);
        assert_relative_eq!(p.angle0, 3.0 * PI);
        assert_relative_eq!(p.angle1, 3.0 * PI);
        assert!(PhaseShard::new(2.0 * PI, 0.0, false).is_identity());
    }

    #[test]
    fn test_hadamard_commutes_z_into_x() {
        let cz = PhaseShard::from_matrix(&PAULI_Z).unwrap();
        let cx = cz.h_commuted().unwrap();
        assert!(cx.is_x_type());
        assert!(matrices_equal(&cx.matrix(), &PAULI_X));
        assert!(matrices_equal(&cx.h_commuted().unwrap().matrix(), &PAULI_Z));
        assert!(PhaseShard::from_matrix(&T_GATE).unwrap().h_commuted().is_none());
    }

    #[test]
    fn test_basis_flag_transitions() {
        let s = ShardState::InUnit { unit: 2, mapped: 1 };
        assert!(s.hadamard().is_rotated());
        assert_eq!(s.hadamard().hadamard(), s);
        assert_eq!(s.hadamard().relocated(0, 3), ShardState::Rotated { unit: 0, mapped: 3 });
        match ShardState::basis(false).hadamard() {
            ShardState::Emulated(amps) => {
                assert_relative_eq!(amps[0].re, amps[1].re, epsilon = 1e-12)
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
