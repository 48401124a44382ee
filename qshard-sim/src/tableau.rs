//! Stabilizer tableau
//!
//! Destabilizer and stabilizer generators for an `n`-qubit Clifford state,
//! stored as bit-packed Pauli rows. Rows `0..n` are destabilizers, rows
//! `n..2n` the stabilizers they pair with, and row `2n` is scratch space for
//! deterministic measurement and amplitude enumeration.
//!
//! Each row carries an exponent `r` of `i`; for Hermitian rows it is 0 or 2.
//! A row with both its x and z bit set on a qubit stands for `Y` there.

use num_complex::Complex64;
use qshard_core::bits::{bit_set, pow2};
use qshard_core::complex::{I, NEG_I, NEG_ONE, ONE, ZERO};
use qshard_core::error::{check_qubit, check_range};
use qshard_core::{QRng, QuantumError, Result};

const WORD_BITS: usize = 64;

#[inline]
fn words_for(num_qubits: usize) -> usize {
    num_qubits.div_ceil(WORD_BITS).max(1)
}

#[inline]
fn get_bit(words: &[u64], i: usize) -> bool {
    (words[i / WORD_BITS] >> (i % WORD_BITS)) & 1 == 1
}

#[inline]
fn set_bit(words: &mut [u64], i: usize, value: bool) {
    let mask = 1u64 << (i % WORD_BITS);
    if value {
        words[i / WORD_BITS] |= mask;
    } else {
        words[i / WORD_BITS] &= !mask;
    }
}

#[inline]
fn xor_words(dst: &mut [u64], src: &[u64]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

/// One Pauli string with an `i^r` phase
#[derive(Debug, Clone, PartialEq, Eq)]
struct PauliRow {
    x: Vec<u64>,
    z: Vec<u64>,
    r: u8,
}

impl PauliRow {
    fn identity(words: usize) -> Self {
        Self {
            x: vec![0; words],
            z: vec![0; words],
            r: 0,
        }
    }

    fn single_x(words: usize, q: usize) -> Self {
        let mut row = Self::identity(words);
        set_bit(&mut row.x, q, true);
        row
    }

    fn single_z(words: usize, q: usize) -> Self {
        let mut row = Self::identity(words);
        set_bit(&mut row.z, q, true);
        row
    }

    #[inline]
    fn x(&self, q: usize) -> bool {
        get_bit(&self.x, q)
    }

    #[inline]
    fn z(&self, q: usize) -> bool {
        get_bit(&self.z, q)
    }

    #[inline]
    fn flip_phase(&mut self) {
        self.r = (self.r + 2) & 3;
    }

    /// `self <- other * self`, tracking the phase of the product
    fn mul_left(&mut self, other: &PauliRow) {
        let mut e = i64::from(self.r) + i64::from(other.r);
        for w in 0..self.x.len() {
            let (xa, za) = (other.x[w], other.z[w]);
            let (xb, zb) = (self.x[w], self.z[w]);
            // XY, YZ, ZX pick up +i; XZ, YX, ZY pick up -i
            let plus = (xa & !za & xb & zb) | (xa & za & !xb & zb) | (!xa & za & xb & !zb);
            let minus = (xa & !za & !xb & zb) | (xa & za & xb & !zb) | (!xa & za & xb & zb);
            e += i64::from(plus.count_ones()) - i64::from(minus.count_ones());
        }
        xor_words(&mut self.x, &other.x);
        xor_words(&mut self.z, &other.z);
        self.r = e.rem_euclid(4) as u8;
    }

    /// Symplectic product: whether the two strings anticommute
    fn anticommutes(&self, other: &PauliRow) -> bool {
        let mut acc = 0u32;
        for w in 0..self.x.len() {
            acc ^= ((self.x[w] & other.z[w]) ^ (self.z[w] & other.x[w])).count_ones() & 1;
        }
        acc == 1
    }

    /// Copy the columns `src` maps to `Some(dst)` into a row of `words` width
    fn remap(&self, src_qubits: usize, words: usize, map: impl Fn(usize) -> Option<usize>) -> Self {
        let mut out = Self::identity(words);
        out.r = self.r;
        for q in 0..src_qubits {
            if let Some(d) = map(q) {
                set_bit(&mut out.x, d, self.x(q));
                set_bit(&mut out.z, d, self.z(q));
            }
        }
        out
    }
}

/// CHP stabilizer tableau
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tableau {
    num_qubits: usize,
    words: usize,
    rows: Vec<PauliRow>,
}

impl Tableau {
    /// Basis state `perm`
    pub fn new(num_qubits: usize, perm: u64) -> Self {
        let words = words_for(num_qubits);
        let mut rows = Vec::with_capacity(2 * num_qubits + 1);
        rows.extend((0..num_qubits).map(|q| PauliRow::single_x(words, q)));
        rows.extend((0..num_qubits).map(|q| PauliRow::single_z(words, q)));
        rows.push(PauliRow::identity(words));
        let mut tableau = Self {
            num_qubits,
            words,
            rows,
        };
        for q in 0..num_qubits.min(64) {
            if bit_set(perm, q) {
                tableau.x(q);
            }
        }
        tableau
    }

    /// Rebuild from `n` independent commuting stabilizers over `n` qubits
    ///
    /// Destabilizers are recovered by solving the symplectic pairing
    /// conditions, then made mutually commuting.
    fn from_stabilizers(num_qubits: usize, stabs: Vec<PauliRow>) -> Self {
        let n = num_qubits;
        let words = words_for(n);
        let cols = 2 * n;
        let col_words = words_for(cols);

        // omega(D, S_j) = D . (z_j | x_j); row-reduce those duals with an identity alongside
        let mut duals: Vec<Vec<u64>> = stabs
            .iter()
            .map(|s| {
                let mut v = vec![0u64; col_words];
                for q in 0..n {
                    set_bit(&mut v, q, s.z(q));
                    set_bit(&mut v, n + q, s.x(q));
                }
                v
            })
            .collect();
        let mut transform: Vec<Vec<u64>> = (0..n)
            .map(|i| {
                let mut v = vec![0u64; words];
                set_bit(&mut v, i, true);
                v
            })
            .collect();
        let mut pivots = Vec::with_capacity(n);
        let mut row = 0;
        for col in 0..cols {
            if row == n {
                break;
            }
            let Some(k) = (row..n).find(|&k| get_bit(&duals[k], col)) else {
                continue;
            };
            duals.swap(row, k);
            transform.swap(row, k);
            for k2 in 0..n {
                if k2 != row && get_bit(&duals[k2], col) {
                    let (d, t) = (duals[row].clone(), transform[row].clone());
                    xor_words(&mut duals[k2], &d);
                    xor_words(&mut transform[k2], &t);
                }
            }
            pivots.push(col);
            row += 1;
        }

        let mut destabs: Vec<PauliRow> = (0..n)
            .map(|i| {
                let mut d = PauliRow::identity(words);
                for (r, &col) in pivots.iter().enumerate() {
                    if get_bit(&transform[r], i) {
                        if col < n {
                            set_bit(&mut d.x, col, true);
                        } else {
                            set_bit(&mut d.z, col - n, true);
                        }
                    }
                }
                d
            })
            .collect();
        for j in 0..n {
            for i in 0..j {
                if destabs[i].anticommutes(&destabs[j]) {
                    xor_words(&mut destabs[j].x, &stabs[i].x);
                    xor_words(&mut destabs[j].z, &stabs[i].z);
                }
            }
        }

        let mut rows = destabs;
        rows.extend(stabs);
        rows.push(PauliRow::identity(words));
        Self {
            num_qubits: n,
            words,
            rows,
        }
    }

    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    /// Reset to basis state `perm`
    pub fn set_permutation(&mut self, perm: u64) {
        *self = Self::new(self.num_qubits, perm);
    }

    #[inline]
    fn gate_rows(&mut self) -> impl Iterator<Item = &mut PauliRow> {
        let n2 = 2 * self.num_qubits;
        self.rows.iter_mut().take(n2)
    }

    /// `rows[target] <- rows[source] * rows[target]`
    fn row_mul(&mut self, target: usize, source: usize) {
        if target < source {
            let (lo, hi) = self.rows.split_at_mut(source);
            lo[target].mul_left(&hi[0]);
        } else {
            let (lo, hi) = self.rows.split_at_mut(target);
            hi[0].mul_left(&lo[source]);
        }
    }

    pub fn h(&mut self, q: usize) {
        for row in self.gate_rows() {
            let (x, z) = (row.x(q), row.z(q));
            if x && z {
                row.flip_phase();
            }
            set_bit(&mut row.x, q, z);
            set_bit(&mut row.z, q, x);
        }
    }

    pub fn s(&mut self, q: usize) {
        for row in self.gate_rows() {
            let (x, z) = (row.x(q), row.z(q));
            if x && z {
                row.flip_phase();
            }
            set_bit(&mut row.z, q, z ^ x);
        }
    }

    /// Inverse of [`s`](Self::s)
    pub fn is(&mut self, q: usize) {
        for row in self.gate_rows() {
            let (x, z) = (row.x(q), row.z(q));
            if x && !z {
                row.flip_phase();
            }
            set_bit(&mut row.z, q, z ^ x);
        }
    }

    pub fn x(&mut self, q: usize) {
        for row in self.gate_rows() {
            if row.z(q) {
                row.flip_phase();
            }
        }
    }

    pub fn y(&mut self, q: usize) {
        for row in self.gate_rows() {
            if row.x(q) ^ row.z(q) {
                row.flip_phase();
            }
        }
    }

    pub fn z(&mut self, q: usize) {
        for row in self.gate_rows() {
            if row.x(q) {
                row.flip_phase();
            }
        }
    }

    pub fn cnot(&mut self, control: usize, target: usize) {
        for row in self.gate_rows() {
            let (xc, zc) = (row.x(control), row.z(control));
            let (xt, zt) = (row.x(target), row.z(target));
            if xc && zt && (xt == zc) {
                row.flip_phase();
            }
            set_bit(&mut row.x, target, xt ^ xc);
            set_bit(&mut row.z, control, zc ^ zt);
        }
    }

    pub fn cz(&mut self, control: usize, target: usize) {
        self.h(target);
        self.cnot(control, target);
        self.h(target);
    }

    pub fn cy(&mut self, control: usize, target: usize) {
        self.is(target);
        self.cnot(control, target);
        self.s(target);
    }

    pub fn swap(&mut self, q1: usize, q2: usize) {
        if q1 == q2 {
            return;
        }
        for row in self.gate_rows() {
            let (x1, z1) = (row.x(q1), row.z(q1));
            let (x2, z2) = (row.x(q2), row.z(q2));
            set_bit(&mut row.x, q1, x2);
            set_bit(&mut row.z, q1, z2);
            set_bit(&mut row.x, q2, x1);
            set_bit(&mut row.z, q2, z1);
        }
    }

    /// Stabilizer row whose X part touches `q`, if any
    fn random_pivot(&self, q: usize) -> Option<usize> {
        let n = self.num_qubits;
        (n..2 * n).find(|&p| self.rows[p].x(q))
    }

    /// Whether measuring `q` in Z has a certain outcome
    pub fn is_definite(&self, q: usize) -> bool {
        self.random_pivot(q).is_none()
    }

    /// Outcome of a Z measurement of `q`, which must be definite
    fn deterministic_outcome(&mut self, q: usize) -> bool {
        let n = self.num_qubits;
        let scratch = 2 * n;
        self.rows[scratch] = PauliRow::identity(self.words);
        for i in 0..n {
            if self.rows[i].x(q) {
                self.row_mul(scratch, i + n);
            }
        }
        self.rows[scratch].r == 2
    }

    /// Probability that `q` reads |1>
    pub fn prob(&mut self, q: usize) -> f64 {
        if !self.is_definite(q) {
            0.5
        } else if self.deterministic_outcome(q) {
            1.0
        } else {
            0.0
        }
    }

    /// Measure `q`, optionally forcing the outcome
    pub fn force_m(&mut self, q: usize, forced: Option<bool>, rng: &QRng) -> Result<bool> {
        check_qubit(q, self.num_qubits)?;
        let n = self.num_qubits;
        let Some(p) = self.random_pivot(q) else {
            let outcome = self.deterministic_outcome(q);
            return match forced {
                Some(r) if r != outcome => Err(QuantumError::ZeroProbability {
                    qubit: q,
                    outcome: r,
                }),
                _ => Ok(outcome),
            };
        };

        let outcome = forced.unwrap_or_else(|| rng.rand() < 0.5);
        for i in 0..2 * n {
            if i != p && self.rows[i].x(q) {
                self.row_mul(i, p);
            }
        }
        self.rows[p - n] = self.rows[p].clone();
        let mut collapsed = PauliRow::single_z(self.words, q);
        if outcome {
            collapsed.flip_phase();
        }
        self.rows[p] = collapsed;
        Ok(outcome)
    }

    /// Bring the stabilizers to row-echelon form; returns the count with X support
    fn gaussian(&mut self) -> usize {
        let n = self.num_qubits;
        let mut i = n;
        let mut x_rank = 0;
        for use_x in [true, false] {
            for j in 0..n {
                let has = |row: &PauliRow| if use_x { row.x(j) } else { row.z(j) };
                let Some(k) = (i..2 * n).find(|&k| has(&self.rows[k])) else {
                    continue;
                };
                self.rows.swap(i, k);
                self.rows.swap(i - n, k - n);
                for k2 in i + 1..2 * n {
                    if has(&self.rows[k2]) {
                        self.row_mul(k2, i);
                        self.row_mul(i - n, k2 - n);
                    }
                }
                i += 1;
            }
            if use_x {
                x_rank = i - n;
            }
        }
        x_rank
    }

    /// Put a basis state consistent with every stabilizer in the scratch row
    fn seed_scratch(&mut self, g: usize) {
        let n = self.num_qubits;
        let scratch = 2 * n;
        self.rows[scratch] = PauliRow::identity(self.words);
        for i in (n + g..2 * n).rev() {
            let mut f = self.rows[i].r;
            let mut min = 0;
            for j in (0..n).rev() {
                if self.rows[i].z(j) {
                    min = j;
                    if self.rows[scratch].x(j) {
                        f = (f + 2) & 3;
                    }
                }
            }
            if f == 2 {
                let flipped = !self.rows[scratch].x(min);
                set_bit(&mut self.rows[scratch].x, min, flipped);
            }
        }
    }

    /// Basis index and `i`-exponent of the scratch row's state
    fn scratch_basis(&self) -> (u64, u8) {
        let row = &self.rows[2 * self.num_qubits];
        let mut e = row.r;
        let mut perm = 0u64;
        for j in 0..self.num_qubits {
            if row.x(j) {
                perm |= pow2(j);
                if row.z(j) {
                    e = (e + 1) & 3;
                }
            }
        }
        (perm, e)
    }

    /// Visit every basis state in the support with its amplitude
    ///
    /// All `2^g` nonzero amplitudes share the magnitude `2^(-g/2)`.
    pub fn for_each_amplitude(&mut self, mut f: impl FnMut(u64, Complex64)) {
        let n = self.num_qubits;
        let g = self.gaussian();
        self.seed_scratch(g);
        let magnitude = 0.5f64.powf(g as f64 / 2.0);
        let phase = |e: u8| match e {
            0 => ONE,
            1 => I,
            2 => NEG_ONE,
            _ => NEG_I,
        };
        let (perm, e) = self.scratch_basis();
        f(perm, phase(e) * magnitude);
        let count = 1u64 << g;
        for t in 0..count - 1 {
            let t2 = t ^ (t + 1);
            for i in 0..g {
                if bit_set(t2, i) {
                    self.row_mul(2 * n, n + i);
                }
            }
            let (perm, e) = self.scratch_basis();
            f(perm, phase(e) * magnitude);
        }
    }

    /// Full amplitude vector, up to a global phase
    pub fn amplitudes(&mut self) -> Vec<Complex64> {
        let mut out = vec![ZERO; 1usize << self.num_qubits];
        self.for_each_amplitude(|perm, amp| out[perm as usize] = amp);
        out
    }

    /// Amplitude of basis state `perm`, up to the same global phase as [`amplitudes`](Self::amplitudes)
    pub fn amplitude(&mut self, perm: u64) -> Complex64 {
        let mut found = ZERO;
        self.for_each_amplitude(|p, amp| {
            if p == perm {
                found = amp;
            }
        });
        found
    }

    /// Tensor `other` in at qubit `start`
    pub fn compose_at(&mut self, other: &Tableau, start: usize) -> Result<()> {
        check_range(start, 0, self.num_qubits)?;
        let (n, m) = (self.num_qubits, other.num_qubits);
        let total = n + m;
        let words = words_for(total);
        let own = |q: usize| Some(if q < start { q } else { q + m });
        let theirs = |q: usize| Some(start + q);

        let mut rows = Vec::with_capacity(2 * total + 1);
        rows.extend(self.rows[..n].iter().map(|r| r.remap(n, words, own)));
        rows.extend(other.rows[..m].iter().map(|r| r.remap(m, words, theirs)));
        rows.extend(self.rows[n..2 * n].iter().map(|r| r.remap(n, words, own)));
        rows.extend(other.rows[m..2 * m].iter().map(|r| r.remap(m, words, theirs)));
        rows.push(PauliRow::identity(words));

        *self = Self {
            num_qubits: total,
            words,
            rows,
        };
        Ok(())
    }

    /// Rank of the stabilizer group restricted to the columns in `[start, start + length)`
    fn restricted_rank(&self, start: usize, length: usize) -> usize {
        let n = self.num_qubits;
        let width = words_for(2 * length);
        let mut vecs: Vec<Vec<u64>> = self.rows[n..2 * n]
            .iter()
            .map(|row| {
                let mut v = vec![0u64; width];
                for j in 0..length {
                    set_bit(&mut v, 2 * j, row.x(start + j));
                    set_bit(&mut v, 2 * j + 1, row.z(start + j));
                }
                v
            })
            .collect();
        let mut rank = 0;
        for col in 0..2 * length {
            let Some(k) = (rank..vecs.len()).find(|&k| get_bit(&vecs[k], col)) else {
                continue;
            };
            vecs.swap(rank, k);
            let pivot = vecs[rank].clone();
            for v in vecs.iter_mut().skip(rank + 1) {
                if get_bit(v, col) {
                    xor_words(v, &pivot);
                }
            }
            rank += 1;
        }
        rank
    }

    /// Whether `[start, start + length)` is unentangled with the other qubits
    pub fn can_decompose_dispose(&self, start: usize, length: usize) -> bool {
        if length == 0 || length == self.num_qubits {
            return true;
        }
        self.restricted_rank(start, length) == length
    }

    /// Row-reduce the stabilizers so that those without support outside `keep` come last
    fn isolate(&self, keep: impl Fn(usize) -> bool) -> Vec<PauliRow> {
        let n = self.num_qubits;
        let mut stabs: Vec<PauliRow> = self.rows[n..2 * n].to_vec();
        let mut pivot = 0;
        for q in (0..n).filter(|&q| !keep(q)) {
            for use_x in [true, false] {
                let has = |row: &PauliRow| if use_x { row.x(q) } else { row.z(q) };
                let Some(k) = (pivot..n).find(|&k| has(&stabs[k])) else {
                    continue;
                };
                stabs.swap(pivot, k);
                let source = stabs[pivot].clone();
                for (k2, row) in stabs.iter_mut().enumerate() {
                    if k2 != pivot && has(row) {
                        row.mul_left(&source);
                    }
                }
                pivot += 1;
            }
        }
        stabs.split_off(pivot)
    }

    /// Split `[start, start + length)` out into its own tableau
    ///
    /// # Errors
    ///
    /// [`QuantumError::NonSeparable`] when the range is entangled with the rest.
    pub fn decompose(&mut self, start: usize, length: usize) -> Result<Tableau> {
        check_range(start, length, self.num_qubits)?;
        if !self.can_decompose_dispose(start, length) {
            return Err(QuantumError::NonSeparable {
                start,
                length,
                residual: 1.0,
            });
        }
        let n = self.num_qubits;
        let end = start + length;
        let inside = |q: usize| q >= start && q < end;

        let part_stabs: Vec<PauliRow> = self
            .isolate(inside)
            .iter()
            .map(|row| {
                row.remap(n, words_for(length), |q| {
                    inside(q).then(|| q - start)
                })
            })
            .collect();
        let rest_stabs: Vec<PauliRow> = self
            .isolate(|q| !inside(q))
            .iter()
            .map(|row| {
                row.remap(n, words_for(n - length), |q| {
                    if q < start {
                        Some(q)
                    } else if q >= end {
                        Some(q - length)
                    } else {
                        None
                    }
                })
            })
            .collect();

        let part = Self::from_stabilizers(length, part_stabs);
        *self = Self::from_stabilizers(n - length, rest_stabs);
        Ok(part)
    }

    /// Discard `[start, start + length)`
    pub fn dispose(&mut self, start: usize, length: usize) -> Result<()> {
        self.decompose(start, length).map(|_| ())
    }

    /// Whether `q` is a Z eigenstate, and so unentangled
    pub fn is_separable_z(&self, q: usize) -> bool {
        self.is_definite(q)
    }

    /// Whether `q` is an X eigenstate
    pub fn is_separable_x(&mut self, q: usize) -> bool {
        self.h(q);
        let separable = self.is_definite(q);
        self.h(q);
        separable
    }

    /// Whether `q` is a Y eigenstate
    pub fn is_separable_y(&mut self, q: usize) -> bool {
        self.is(q);
        self.h(q);
        let separable = self.is_definite(q);
        self.h(q);
        self.s(q);
        separable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use qshard_core::{EngineConfig, QuantumEngine};
    use qshard_gates::GateOps;
    use qshard_state::DenseEngine;

    fn fidelity_gap(tableau: &mut Tableau, engine: &mut DenseEngine) -> f64 {
        let a = tableau.amplitudes();
        let b = engine.get_quantum_state().unwrap();
        let inner: Complex64 = a.iter().zip(&b).map(|(x, y)| x.conj() * y).sum();
        1.0 - inner.norm_sqr()
    }

    #[test]
    fn test_initial_state_is_basis() {
        let mut t = Tableau::new(3, 0b101);
        assert_eq!(t.prob(0), 1.0);
        assert_eq!(t.prob(1), 0.0);
        assert_eq!(t.prob(2), 1.0);
        let amps = t.amplitudes();
        assert_relative_eq!(amps[0b101].norm(), 1.0);
    }

    #[test]
    fn test_bell_state() {
        let mut t = Tableau::new(2, 0);
        t.h(0);
        t.cnot(0, 1);
        assert!(!t.is_definite(0));
        assert_eq!(t.prob(1), 0.5);
        let amps = t.amplitudes();
        assert_relative_eq!(amps[0].re, amps[3].re, epsilon = 1e-12);
        assert_relative_eq!(amps[0].norm_sqr(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(amps[1].norm(), 0.0);

        let rng = QRng::new(Some(5));
        let first = t.force_m(0, None, &rng).unwrap();
        assert!(t.is_definite(1));
        assert_eq!(t.force_m(1, None, &rng).unwrap(), first);
    }

    #[test]
    fn test_forced_impossible_outcome() {
        let mut t = Tableau::new(1, 1);
        let rng = QRng::new(Some(1));
        assert_eq!(
            t.force_m(0, Some(false), &rng),
            Err(QuantumError::ZeroProbability {
                qubit: 0,
                outcome: false
            })
        );
        assert!(t.force_m(0, Some(true), &rng).unwrap());
    }

    #[test]
    fn test_clifford_sequence_matches_dense() {
        let mut t = Tableau::new(4, 0);
        let mut e = DenseEngine::new(EngineConfig::fast(), 4, 0, QRng::new(Some(3))).unwrap();

        t.h(0);
        e.h(0).unwrap();
        t.s(0);
        e.s(0).unwrap();
        t.cnot(0, 2);
        e.cnot(0, 2).unwrap();
        t.h(3);
        e.h(3).unwrap();
        t.cy(3, 1);
        e.cy(3, 1).unwrap();
        t.cz(2, 3);
        e.cz(2, 3).unwrap();
        t.is(1);
        e.is(1).unwrap();
        t.y(2);
        e.y(2).unwrap();
        t.swap(0, 3);
        e.swap(0, 3).unwrap();
        t.x(1);
        e.x(1).unwrap();
        t.z(0);
        e.z(0).unwrap();

        assert!(fidelity_gap(&mut t, &mut e) < 1e-12);
        for q in 0..4 {
            assert_relative_eq!(t.prob(q), e.prob(q).unwrap(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_s_squared_is_z() {
        let mut a = Tableau::new(1, 0);
        let mut b = Tableau::new(1, 0);
        a.h(0);
        b.h(0);
        a.s(0);
        a.s(0);
        b.z(0);
        let (va, vb) = (a.amplitudes(), b.amplitudes());
        for (x, y) in va.iter().zip(&vb) {
            assert_relative_eq!(x.re, y.re, epsilon = 1e-12);
            assert_relative_eq!(x.im, y.im, epsilon = 1e-12);
        }
        assert_relative_eq!(va[1].re, -va[0].re, epsilon = 1e-12);
    }

    #[test]
    fn test_compose_at_interleaves() {
        let mut outer = Tableau::new(2, 0b10);
        let mut inner = Tableau::new(2, 0);
        inner.h(0);
        inner.cnot(0, 1);
        outer.compose_at(&inner, 1).unwrap();
        assert_eq!(outer.num_qubits(), 4);
        assert_eq!(outer.prob(0), 0.0);
        assert_eq!(outer.prob(3), 1.0);
        assert_eq!(outer.prob(1), 0.5);
        assert!(outer.can_decompose_dispose(1, 2));
        assert!(!outer.can_decompose_dispose(1, 1));
        assert!(outer.can_decompose_dispose(3, 1));
    }

    #[test]
    fn test_decompose_round_trip() {
        let mut whole = Tableau::new(5, 0);
        whole.h(0);
        whole.cnot(0, 1);
        whole.h(3);
        whole.s(3);
        whole.x(4);
        whole.cnot(4, 2);

        let mut expected = Tableau::new(1, 0);
        expected.h(0);
        expected.s(0);

        let mut part = whole.decompose(3, 1).unwrap();
        assert_eq!(part.num_qubits(), 1);
        assert_eq!(whole.num_qubits(), 4);
        let (a, b) = (part.amplitudes(), expected.amplitudes());
        let overlap: Complex64 = a.iter().zip(&b).map(|(x, y)| x.conj() * y).sum();
        assert_relative_eq!(overlap.norm(), 1.0, epsilon = 1e-12);

        // remainder keeps the Bell pair on 0,1 and |1> on the old qubits 2 and 4
        assert_eq!(whole.prob(2), 1.0);
        assert_eq!(whole.prob(3), 1.0);
        let rng = QRng::new(Some(8));
        let first = whole.force_m(0, None, &rng).unwrap();
        assert_eq!(whole.force_m(1, None, &rng).unwrap(), first);
    }

    #[test]
    fn test_entangled_range_refuses_decompose() {
        let mut t = Tableau::new(3, 0);
        t.h(0);
        t.cnot(0, 2);
        let before = t.clone();
        assert!(matches!(
            t.decompose(2, 1),
            Err(QuantumError::NonSeparable { .. })
        ));
        assert_eq!(t, before);
        assert!(t.can_decompose_dispose(1, 1));
    }

    #[test]
    fn test_decomposed_part_keeps_measuring() {
        let mut whole = Tableau::new(3, 0);
        whole.h(1);
        whole.cnot(1, 2);
        let mut pair = whole.decompose(1, 2).unwrap();
        let rng = QRng::new(Some(12));
        for _ in 0..4 {
            let mut trial = pair.clone();
            let a = trial.force_m(0, None, &rng).unwrap();
            assert_eq!(trial.force_m(1, None, &rng).unwrap(), a);
        }
        pair.h(0);
        pair.h(1);
        // H on both halves of a Bell pair leaves it invariant
        let amps = pair.amplitudes();
        assert_relative_eq!(amps[0].norm_sqr(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(amps[3].norm_sqr(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_separable_axes() {
        let mut t = Tableau::new(3, 0);
        t.h(0);
        t.h(1);
        t.s(1);
        t.h(2);
        t.cnot(2, 0);
        assert!(t.is_separable_x(0));
        assert!(!t.is_separable_z(0));
        assert!(t.is_separable_y(1));
        assert!(!t.is_separable_x(1));
        assert!(t.is_separable_x(2));

        let mut bell = Tableau::new(2, 0);
        bell.h(0);
        bell.cnot(0, 1);
        assert!(!bell.is_separable_x(0));
        assert!(!bell.is_separable_y(0));
        assert!(!bell.is_separable_z(0));
    }
}
