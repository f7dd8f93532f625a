//! Frame throughput of the actor manager.
//!
//! Run with: cargo bench --bench frame_step --features profile

use beam_sim::{ActorManager, ControlInput, InMemoryContent, Placement, SimConfig};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;
use std::sync::Arc;

const FRAME: f32 = 1.0 / 60.0;

/// Trucks on a grid, all driving so none of them sleeps.
fn driving_fleet(count: usize) -> ActorManager {
    let content = Arc::new(InMemoryContent::with_presets());
    let mut manager = ActorManager::new(SimConfig::default(), content).expect("worker pool");
    manager.load_world("flat").expect("flat terrain");
    for i in 0..count {
        let position = Vec3::new((i % 8) as f32 * 8.0, 0.0, (i / 8) as f32 * 12.0);
        let id = manager.spawn_by_name("truck", None, Placement::at(position)).expect("spawn");
        manager.set_input(id, ControlInput { throttle: 0.4, ..Default::default() });
    }
    manager
}

fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_step");
    group.sample_size(20);
    for count in [1, 8, 32] {
        group.bench_with_input(BenchmarkId::new("trucks", count), &count, |b, &count| {
            let mut manager = driving_fleet(count);
            b.iter(|| manager.update(FRAME));
        });
    }
    group.finish();
}

fn bench_crate_pile(c: &mut Criterion) {
    c.bench_function("crate_pile_contacts", |b| {
        let content = Arc::new(InMemoryContent::with_presets());
        let mut manager = ActorManager::new(SimConfig::default(), content).expect("worker pool");
        manager.load_world("flat").expect("flat terrain");
        for level in 0..4 {
            for i in 0..4 {
                let position = Vec3::new(i as f32 * 1.05, level as f32 * 1.05, 0.0);
                manager.spawn_by_name("crate", None, Placement::at(position)).expect("spawn");
            }
        }
        manager.force_wake_all();
        b.iter(|| manager.update(FRAME));
    });
}

criterion_group!(benches, bench_frame, bench_crate_pile);
criterion_main!(benches);
