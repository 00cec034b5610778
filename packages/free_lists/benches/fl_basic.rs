//! Basic benchmarks for the `free_lists` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::time::Instant;

use alloc_tracker::Allocator;
use criterion::{Criterion, criterion_group, criterion_main};
use free_lists::FreeListSet;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

type TestElement = [u8; 64];

fn entrypoint(c: &mut Criterion) {
    let allocs = alloc_tracker::Session::new();

    let mut group = c.benchmark_group("fl_basic");

    let mut allocs_op = allocs.operation("build_one_list");
    group.bench_function("build_one_list", |b| {
        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(
                    FreeListSet::<TestElement>::builder().build().unwrap(),
                ));
            }

            start.elapsed()
        });
    });

    // The hot path is expected to never touch the allocator.
    let mut allocs_op = allocs.operation("get_return");
    group.bench_function("get_return", |b| {
        let set = FreeListSet::<TestElement>::builder().lists(4).build().unwrap();

        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                let element = set.get_elt(black_box(2)).unwrap();
                set.return_elt(2, black_box(element)).unwrap();
            }

            start.elapsed()
        });
    });

    let mut allocs_op = allocs.operation("drain_and_refill");
    group.bench_function("drain_and_refill", |b| {
        let set = FreeListSet::<TestElement>::builder().build().unwrap();
        let per_chunk = set.elements_per_chunk();
        let mut held = Vec::with_capacity(per_chunk);

        b.iter_custom(|iters| {
            let _span = allocs_op.measure_thread().iterations(iters);

            let start = Instant::now();

            for _ in 0..iters {
                for _ in 0..per_chunk {
                    held.push(set.get_elt(0).unwrap());
                }

                for element in held.drain(..) {
                    set.return_elt(0, element).unwrap();
                }
            }

            start.elapsed()
        });
    });

    group.finish();

    allocs.print_to_stdout();
}
