//! Behaviour every layer stack must share

use approx::assert_relative_eq;
use num_complex::Complex64;
use qshard_core::{Composable, EngineConfig, EngineKind, QRng, QuantumEngine, QuantumError};
use qshard_gates::GateOps;
use qshard_sim::{Register, SimulatorContext};

const STACKS: [&[EngineKind]; 6] = [
    &[EngineKind::Cpu],
    &[EngineKind::Pager, EngineKind::Cpu],
    &[EngineKind::StabilizerHybrid, EngineKind::Cpu],
    &[EngineKind::Unit, EngineKind::Cpu],
    &[EngineKind::Unit, EngineKind::StabilizerHybrid, EngineKind::Cpu],
    &[
        EngineKind::Unit,
        EngineKind::StabilizerHybrid,
        EngineKind::Pager,
        EngineKind::Cpu,
    ],
];

fn config(stack: &[EngineKind], seed: u64) -> EngineConfig {
    EngineConfig::fast()
        .with_layers(stack.to_vec())
        .with_page_qubits(1)
        .with_seed(seed)
}

fn register(stack: &[EngineKind], n: usize, perm: u64) -> Register {
    Register::new(config(stack, 31), n, perm, QRng::new(Some(31))).unwrap()
}

fn reference(n: usize) -> Register {
    register(&[EngineKind::Cpu], n, 0)
}

/// Mixed Clifford and non-Clifford gates over every qubit
fn scramble(r: &mut Register) {
    let n = r.num_qubits();
    for q in 0..n {
        r.h(q).unwrap();
        r.rz(0.3 + 0.2 * q as f64, q).unwrap();
    }
    for q in 0..n - 1 {
        r.cnot(q, q + 1).unwrap();
        r.cry(0.45, q + 1, q).unwrap();
    }
    r.t(0).unwrap();
    r.ccz(0, 1, n - 1).unwrap();
    r.sqrt_x(n - 1).unwrap();
    r.cs(n - 1, 0).unwrap();
}

/// Seeded Clifford circuit drawn from `rng`
fn random_clifford(r: &mut Register, rng: &QRng, depth: usize) {
    let n = r.num_qubits();
    let pick = |k: usize| ((rng.rand() * k as f64) as usize).min(k - 1);
    for _ in 0..depth {
        let a = pick(n);
        let mut b = pick(n);
        if b == a {
            b = (a + 1) % n;
        }
        match pick(8) {
            0 => r.h(a).unwrap(),
            1 => r.s(a).unwrap(),
            2 => r.is(a).unwrap(),
            3 => r.x(a).unwrap(),
            4 => r.y(a).unwrap(),
            5 => r.cnot(a, b).unwrap(),
            6 => r.cz(a, b).unwrap(),
            _ => r.swap(a, b).unwrap(),
        }
    }
}

/// Route engine events to the test output; `RUST_LOG=debug` shows them
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn is_stabilizer(r: &Register) -> bool {
    matches!(r, Register::Hybrid(h) if h.is_stabilizer())
}

#[test]
fn test_bell_state_on_every_stack() {
    let root = std::f64::consts::FRAC_1_SQRT_2;
    for stack in STACKS {
        let mut r = register(stack, 2, 0);
        r.h(0).unwrap();
        r.cnot(0, 1).unwrap();
        let state = r.get_quantum_state().unwrap();
        assert_relative_eq!(state[0].norm(), root, epsilon = 1e-10);
        assert_relative_eq!(state[1].norm(), 0.0, epsilon = 1e-10);
        assert_relative_eq!(state[2].norm(), 0.0, epsilon = 1e-10);
        assert_relative_eq!((state[3] / state[0]).re, 1.0, epsilon = 1e-10);
        assert_relative_eq!((state[3] / state[0]).im, 0.0, epsilon = 1e-10);
    }
}

#[test]
fn test_bell_measurements_always_agree() {
    for stack in STACKS {
        for seed in 0..16 {
            let mut r =
                Register::new(config(stack, seed), 2, 0, QRng::new(Some(seed))).unwrap();
            r.h(0).unwrap();
            r.cnot(0, 1).unwrap();
            let first = r.m(0).unwrap();
            assert_eq!(r.m(1).unwrap(), first, "{:?} seed {}", stack, seed);
        }
    }
}

#[test]
fn test_s_twice_is_z() {
    for stack in STACKS {
        let mut a = register(stack, 1, 0);
        let mut b = register(stack, 1, 0);
        a.h(0).unwrap();
        b.h(0).unwrap();
        a.s(0).unwrap();
        a.s(0).unwrap();
        b.z(0).unwrap();
        let sa = a.get_quantum_state().unwrap();
        let sb = b.get_quantum_state().unwrap();
        assert_relative_eq!((sa[1] / sa[0]).re, -1.0, epsilon = 1e-10);
        assert_relative_eq!((sb[1] / sb[0]).re, -1.0, epsilon = 1e-10);
        assert!(a.sum_sqr_diff(&mut b).unwrap() < 1e-10, "{:?}", stack);
    }
}

#[test]
fn test_gates_preserve_norm() {
    for stack in STACKS {
        let mut r = register(stack, 4, 0);
        scramble(&mut r);
        r.normalize_state();
        let total: f64 = r.get_probs().unwrap().iter().sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-6);
    }
}

#[test]
fn test_every_stack_matches_dense_after_scramble() {
    let mut expected = reference(4);
    scramble(&mut expected);
    for stack in &STACKS[1..] {
        let mut r = register(stack, 4, 0);
        scramble(&mut r);
        assert!(r.sum_sqr_diff(&mut expected).unwrap() < 1e-10, "{:?} diverged", stack);
    }
}

#[test]
fn test_self_inverse_gates_restore_state() {
    for stack in STACKS {
        let mut r = register(stack, 3, 0);
        scramble(&mut r);
        let mut before = r.clone();
        for _ in 0..2 {
            r.x(0).unwrap();
            r.y(1).unwrap();
            r.z(2).unwrap();
            r.h(1).unwrap();
            r.cnot(2, 0).unwrap();
        }
        assert!(r.sum_sqr_diff(&mut before).unwrap() < 1e-10, "{:?}", stack);
    }

    // dense amplitudes come back exactly, phase included
    let mut r = reference(3);
    scramble(&mut r);
    let before = r.get_quantum_state().unwrap();
    for _ in 0..2 {
        r.h(2).unwrap();
        r.cnot(0, 1).unwrap();
    }
    for (a, b) in r.get_quantum_state().unwrap().iter().zip(before.iter()) {
        assert_relative_eq!(a.re, b.re, epsilon = 1e-12);
        assert_relative_eq!(a.im, b.im, epsilon = 1e-12);
    }
}

#[test]
fn test_clifford_circuits_agree_with_dense() {
    init_tracing();
    let stabilizer = [EngineKind::StabilizerHybrid, EngineKind::Cpu];
    let circuit_rng = QRng::new(Some(2024));
    for round in 0..12 {
        let seed = 100 + round;
        let mut hybrid = register(&stabilizer, 5, 0);
        let mut dense = reference(5);
        circuit_rng.set_seed(seed);
        random_clifford(&mut hybrid, &circuit_rng, 40);
        circuit_rng.set_seed(seed);
        random_clifford(&mut dense, &circuit_rng, 40);
        assert!(is_stabilizer(&hybrid));

        for q in 0..5 {
            let p_tableau = hybrid.prob(q).unwrap();
            let p_dense = dense.prob(q).unwrap();
            if p_dense < 1e-12 || p_dense > 1.0 - 1e-12 {
                assert_eq!(p_tableau, p_dense.round(), "round {} qubit {}", round, q);
            } else {
                assert_relative_eq!(p_tableau, p_dense, epsilon = 1e-10);
            }
        }
        assert!(is_stabilizer(&hybrid));

        // amplitude query promotes to an engine
        let mut promoted = hybrid.clone();
        promoted.get_quantum_state().unwrap();
        assert!(!is_stabilizer(&promoted));
        assert!(promoted.sum_sqr_diff(&mut dense).unwrap() < 1e-10, "round {}", round);
    }
}

#[test]
fn test_unentangled_qubit_decomposes_without_switch() {
    let mut r = register(&[EngineKind::StabilizerHybrid, EngineKind::Cpu], 5, 0);
    r.h(0).unwrap();
    r.cnot(0, 1).unwrap();
    r.cnot(1, 4).unwrap();
    r.h(2).unwrap();
    r.cz(2, 4).unwrap();
    r.h(3).unwrap();
    r.s(3).unwrap();

    let mut part = r.decompose(3, 1).unwrap();
    assert!(is_stabilizer(&r));
    assert!(is_stabilizer(&part));
    assert_eq!(part.num_qubits(), 1);
    assert_eq!(r.num_qubits(), 4);

    let amps = part.get_quantum_state().unwrap();
    assert_relative_eq!((amps[1] / amps[0]).im, 1.0, epsilon = 1e-10);
    assert_relative_eq!(r.prob_parity(0b1011).unwrap(), 0.5, epsilon = 1e-10);
    assert_relative_eq!(r.prob_parity(0b0011).unwrap(), 0.0, epsilon = 1e-10);
    let total: f64 = r.get_probs().unwrap().iter().sum();
    assert_relative_eq!(total, 1.0, epsilon = 1e-10);
}

#[test]
fn test_unentangled_qubit_decomposes_from_shard_tracker() {
    init_tracing();
    let layers = [EngineKind::Unit, EngineKind::StabilizerHybrid, EngineKind::Cpu];
    let mut r = register(&layers, 5, 0);
    r.h(0).unwrap();
    r.ch(0, 1).unwrap();
    r.cnot(1, 4).unwrap();
    r.rx(0.8, 3).unwrap();

    let mut part = r.decompose(3, 1).unwrap();
    assert_eq!(r.num_qubits(), 4);
    assert_relative_eq!(part.prob(0).unwrap(), 0.4f64.sin().powi(2), epsilon = 1e-10);

    let mut expected = reference(4);
    expected.h(0).unwrap();
    expected.ch(0, 1).unwrap();
    expected.cnot(1, 3).unwrap();
    assert!(r.sum_sqr_diff(&mut expected).unwrap() < 1e-10);
}

#[test]
fn test_compose_decompose_round_trip() {
    for stack in STACKS {
        let mut a = register(stack, 2, 0);
        a.ry(0.7, 0).unwrap();
        a.h(1).unwrap();
        a.t(1).unwrap();
        let mut b = register(stack, 3, 0b010);
        b.rx(1.3, 0).unwrap();
        b.h(2).unwrap();
        b.s(2).unwrap();
        let mut a_expected = a.clone();
        let mut b_expected = b.clone();

        a.compose(b).unwrap();
        assert_eq!(a.num_qubits(), 5);
        let mut recovered = a.decompose(2, 3).unwrap();
        assert!(recovered.sum_sqr_diff(&mut b_expected).unwrap() < 1e-10, "{:?}", stack);
        assert!(a.sum_sqr_diff(&mut a_expected).unwrap() < 1e-10, "{:?}", stack);
    }
}

#[test]
fn test_controlled_phase_fusion() {
    init_tracing();
    let four_pi = 4.0 * std::f64::consts::PI;
    let (t1, t2) = (3.1, 11.0);
    for stack in STACKS {
        let prepare = |r: &mut Register| {
            r.h(0).unwrap();
            r.h(1).unwrap();
            r.ry(0.6, 2).unwrap();
            r.cnot(1, 2).unwrap();
        };
        let mut fused = register(stack, 3, 0);
        prepare(&mut fused);
        fused.crt(t1, 0, 1).unwrap();
        fused.crt(t2, 0, 1).unwrap();

        let mut single = register(stack, 3, 0);
        prepare(&mut single);
        single.crt((t1 + t2) % four_pi, 0, 1).unwrap();

        if let Register::Unit(unit) = &fused {
            assert!(unit.buffer_count() <= 2);
        }
        assert!(fused.sum_sqr_diff(&mut single).unwrap() < 1e-10, "{:?}", stack);
    }
}

#[test]
fn test_fused_buffer_cancels_to_nothing() {
    let layers = [EngineKind::Unit, EngineKind::Cpu];
    let mut r = register(&layers, 2, 0);
    r.h(0).unwrap();
    r.h(1).unwrap();
    r.crz(1.2, 0, 1).unwrap();
    r.crz(-1.2, 0, 1).unwrap();
    match &r {
        Register::Unit(unit) => {
            assert_eq!(unit.buffer_count(), 0);
            assert_eq!(unit.unit_count(), 0);
        }
        other => panic!("expected a shard tracker, got {:?}", other.kind()),
    }
    for amp in r.get_quantum_state().unwrap() {
        assert_relative_eq!(amp.norm(), 0.5, epsilon = 1e-12);
    }
}

#[test]
fn test_amplitude_round_trip() {
    let state: Vec<Complex64> = (0..8)
        .map(|i| Complex64::new(i as f64 + 1.0, 0.5 * i as f64))
        .collect();
    let norm = state.iter().map(|a| a.norm_sqr()).sum::<f64>().sqrt();
    let state: Vec<Complex64> = state.into_iter().map(|a| a / norm).collect();
    for stack in STACKS {
        let mut r = register(stack, 3, 0);
        r.set_quantum_state(&state).unwrap();
        for (perm, expected) in state.iter().enumerate() {
            let amp = r.get_amplitude(perm as u64).unwrap();
            assert_relative_eq!(amp.re, expected.re, epsilon = 1e-10);
            assert_relative_eq!(amp.im, expected.im, epsilon = 1e-10);
        }
    }
}

#[test]
fn test_contexts_are_isolated_across_threads() {
    let run = |seed: u64| {
        std::thread::spawn(move || {
            let ctx = SimulatorContext::new(config(STACKS[5], seed)).unwrap();
            let mut r = ctx.create(4, 0).unwrap();
            for q in 0..4 {
                r.h(q).unwrap();
            }
            r.m_all().unwrap()
        })
    };
    let first: Vec<u64> = (0..4).map(|_| run(77)).map(|t| t.join().unwrap()).collect();
    assert!(first.iter().all(|&m| m == first[0]));
}

#[test]
fn test_oversized_state_read_fails() {
    let stacks: [&[EngineKind]; 2] = [
        &[EngineKind::Unit, EngineKind::Cpu],
        &[EngineKind::StabilizerHybrid, EngineKind::Cpu],
    ];
    for stack in stacks {
        let mut r = register(stack, 40, 0);
        r.h(0).unwrap();
        r.cnot(0, 39).unwrap();
        assert_eq!(r.num_qubits(), 40);
        assert!(
            matches!(
                r.get_quantum_state(),
                Err(QuantumError::CapacityExceeded { .. })
            ),
            "{:?}",
            stack
        );
        assert!(r.get_probs().is_err(), "{:?}", stack);

        let mut other = register(stack, 40, 0);
        assert!(r.sum_sqr_diff(&mut other).is_err(), "{:?}", stack);
        // the failed read leaves the register usable
        assert_relative_eq!(r.prob(39).unwrap(), 0.5, epsilon = 1e-10);
    }
}
