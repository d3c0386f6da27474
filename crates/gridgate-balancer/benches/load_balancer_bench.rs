// Criterion benchmarks for gridgate-balancer
//
// Run benchmarks with:
//   cargo bench -p gridgate-balancer

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gridgate_balancer::{LoadBalancer, RemoteWorker, Worker};
use gridgate_common::Topology;
use std::sync::Arc;

fn balancer(servers: u32, down_every: u32) -> LoadBalancer {
    let lb = LoadBalancer::new(Topology::new(2, servers));
    for id in 2..2 + servers {
        let worker = Arc::new(RemoteWorker::new(id, format!("worker{}", id)));
        if down_every > 0 && id % down_every == 0 {
            worker.mark_down();
        }
        lb.register(worker);
    }
    lb
}

fn bench_try_pick(c: &mut Criterion) {
    let mut group = c.benchmark_group("try_pick");

    for server_count in [2, 8, 32, 128].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(server_count),
            server_count,
            |b, &count| {
                let lb = balancer(count, 0);
                b.iter(|| black_box(lb.try_pick()));
            },
        );
    }

    group.finish();
}

fn bench_try_pick_with_down_workers(c: &mut Criterion) {
    let mut group = c.benchmark_group("try_pick_half_down");

    for server_count in [8, 32, 128].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(server_count),
            server_count,
            |b, &count| {
                let lb = balancer(count, 2);
                b.iter(|| black_box(lb.try_pick()));
            },
        );
    }

    group.finish();
}

fn bench_pick_by_id(c: &mut Criterion) {
    let lb = balancer(32, 0);
    c.bench_function("pick_by_id", |b| {
        b.iter(|| {
            for id in 0..40 {
                black_box(lb.pick_by_id(black_box(id)).map(|w| w.instance_id()));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_try_pick,
    bench_try_pick_with_down_workers,
    bench_pick_by_id
);
criterion_main!(benches);
