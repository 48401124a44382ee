use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use qshard_core::{EngineConfig, EngineKind, QRng, QuantumEngine};
use qshard_gates::GateOps;
use qshard_sim::Register;

fn register(layers: &[EngineKind], num_qubits: usize) -> Register {
    let config = EngineConfig::fast().with_layers(layers.to_vec());
    Register::new(config, num_qubits, 0, QRng::new(Some(42))).unwrap()
}

fn ghz(r: &mut Register) {
    r.h(0).unwrap();
    for q in 1..r.num_qubits() {
        r.cnot(q - 1, q).unwrap();
    }
}

fn bench_ghz_preparation(c: &mut Criterion) {
    let mut group = c.benchmark_group("ghz_preparation");
    let stacks: [(&str, &[EngineKind]); 3] = [
        ("cpu", &[EngineKind::Cpu]),
        ("stabilizer", &[EngineKind::StabilizerHybrid, EngineKind::Cpu]),
        (
            "unit",
            &[EngineKind::Unit, EngineKind::StabilizerHybrid, EngineKind::Cpu],
        ),
    ];

    for (name, layers) in stacks.iter() {
        group.bench_with_input(BenchmarkId::new(*name, 16), layers, |b, layers| {
            b.iter(|| {
                let mut r = register(layers, 16);
                ghz(&mut r);
                black_box(r.prob(15).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_product_state_gates(c: &mut Criterion) {
    let mut group = c.benchmark_group("unit_product_state");

    for num_qubits in [16, 32, 48].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_qubits", num_qubits)),
            num_qubits,
            |b, &num_qubits| {
                b.iter(|| {
                    let mut r = register(&[EngineKind::Unit, EngineKind::Cpu], num_qubits);
                    for q in 0..num_qubits {
                        r.ry(black_box(0.3), q).unwrap();
                    }
                    for q in 1..num_qubits {
                        r.crz(black_box(0.1), q - 1, q).unwrap();
                    }
                    black_box(r.prob(num_qubits - 1).unwrap())
                });
            },
        );
    }

    group.finish();
}

fn bench_clifford_measurement(c: &mut Criterion) {
    let mut group = c.benchmark_group("stabilizer_measurement");

    for num_qubits in [20, 40].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_qubits", num_qubits)),
            num_qubits,
            |b, &num_qubits| {
                b.iter(|| {
                    let mut r =
                        register(&[EngineKind::StabilizerHybrid, EngineKind::Cpu], num_qubits);
                    ghz(&mut r);
                    black_box(r.m_all().unwrap())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ghz_preparation,
    bench_product_state_gates,
    bench_clifford_measurement
);
criterion_main!(benches);
