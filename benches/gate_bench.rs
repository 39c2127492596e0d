//! Benchmarks for the admission gate and the kernel lock.
//!
//! Benchmarks cover:
//! - Ticket re-entry (no lock)
//! - Immediate enter/exit through the gate lock
//! - Contended admission with more clients than slots
//! - Meter updates and worker registration under the kernel lock

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use engine_kernel::config::{MeterConfig, ServerConfig};
use engine_kernel::core::{Admission, ConcurrencyGate, SchedulingContext, ThreadCategory};

// ============================================================================
// Gate Benchmarks
// ============================================================================

fn bench_gate_ticket_reentry(c: &mut Criterion) {
    let gate = ConcurrencyGate::new(8, u32::MAX, 64);
    let mut admission = Admission::new();
    gate.enter(&mut admission);

    c.bench_function("gate/ticket_reentry", |b| {
        b.iter(|| {
            black_box(gate.enter(&mut admission));
            gate.exit(&mut admission);
        });
    });
}

fn bench_gate_immediate(c: &mut Criterion) {
    let gate = ConcurrencyGate::new(8, 0, 64);

    c.bench_function("gate/immediate_enter_exit", |b| {
        b.iter(|| {
            let mut admission = Admission::new();
            black_box(gate.enter(&mut admission));
            gate.force_exit(&mut admission);
        });
    });
}

fn bench_gate_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("gate_contended");

    for clients in [2usize, 8, 32] {
        let rounds = 200u64;
        group.throughput(Throughput::Elements(clients as u64 * rounds));
        group.bench_with_input(
            BenchmarkId::from_parameter(clients),
            &clients,
            |b, &clients| {
                b.iter(|| {
                    let gate = Arc::new(ConcurrencyGate::new(4, 10, clients));
                    let handles: Vec<_> = (0..clients)
                        .map(|_| {
                            let gate = Arc::clone(&gate);
                            thread::spawn(move || {
                                let mut admission = Admission::new();
                                for _ in 0..rounds {
                                    gate.enter(&mut admission);
                                    gate.exit(&mut admission);
                                }
                                gate.force_exit(&mut admission);
                            })
                        })
                        .collect();
                    for h in handles {
                        h.join().unwrap();
                    }
                    black_box(gate.admitted());
                });
            },
        );
    }
    group.finish();
}

// ============================================================================
// Kernel Lock Benchmarks
// ============================================================================

fn bench_meter_updates(c: &mut Criterion) {
    // Two utility workers at level 500 allow one running thread, so the
    // registered worker never has to suspend.
    let mut config = ServerConfig {
        initial_meter_level: 500,
        ..ServerConfig::default()
    };
    config
        .meters
        .insert(ThreadCategory::Utility, MeterConfig::default().with_workers(2));
    let ctx = SchedulingContext::new(config).unwrap();
    let handle = ctx.register_worker(ThreadCategory::Utility).unwrap();

    c.bench_function("kernel/meter_increment_decrement", |b| {
        b.iter(|| {
            black_box(ctx.increment_meter(ThreadCategory::Utility, 10));
            black_box(ctx.decrement_meter(handle, 10).unwrap());
        });
    });
}

fn bench_worker_registration(c: &mut Criterion) {
    let ctx = SchedulingContext::new(ServerConfig::default()).unwrap();

    c.bench_function("kernel/register_deregister", |b| {
        b.iter(|| {
            let handle = ctx.register_worker(ThreadCategory::Worker).unwrap();
            black_box(ctx.deregister_worker(handle).unwrap());
        });
    });
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(
    gate_benches,
    bench_gate_ticket_reentry,
    bench_gate_immediate,
    bench_gate_contended
);

criterion_group!(kernel_benches, bench_meter_updates, bench_worker_registration);

criterion_main!(gate_benches, kernel_benches);
