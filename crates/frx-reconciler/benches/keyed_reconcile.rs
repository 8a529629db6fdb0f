//! Benchmarks for keyed child reconciliation and commit.
//!
//! Each iteration renders a new keyed list over the committed one and
//! flushes it against the headless host, so the numbers include diffing,
//! effect list construction and host mutation.
//!
//! Run with: cargo bench -p frx-reconciler --bench keyed_reconcile

use std::hint::black_box;
use std::rc::Rc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use frx_reconciler::{
    Element, HeadlessHost, ManualScheduler, ReconcilerConfig, Root, RootOptions, TraceConfig,
    WorkBudget, create_root, h,
};

fn list(keys: &[u32]) -> Element {
    h("ul")
        .children(keys.iter().map(|k| h("li").key(*k).child(k.to_string()).build()))
        .build()
}

fn mounted(keys: &[u32]) -> Root<HeadlessHost> {
    let host = HeadlessHost::new();
    let container = host.root_container();
    let config =
        ReconcilerConfig::default().with_trace(TraceConfig::default().with_enabled(false));
    let mut root = create_root(
        host,
        container,
        Rc::new(ManualScheduler::new()),
        RootOptions::default().with_config(config),
    );
    root.render(list(keys));
    root.flush_all().expect("mount");
    root
}

// =============================================================================
// Keyed diff: alternate between two orders of the same keys
// =============================================================================

fn bench_keyed_orders(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/keyed");

    for n in [100u32, 1_000] {
        group.throughput(Throughput::Elements(u64::from(n)));
        let base: Vec<u32> = (0..n).collect();

        let mut rotated = base.clone();
        rotated.rotate_left(1);
        let mut reversed = base.clone();
        reversed.reverse();
        let mut swapped = base.clone();
        swapped.swap(1, (n - 2) as usize);
        let appended: Vec<u32> = (0..n + 10).collect();

        for (name, target) in [
            ("rotate", &rotated),
            ("reverse", &reversed),
            ("swap_two", &swapped),
            ("append_10", &appended),
        ] {
            let (from, to) = (list(&base), list(target));
            let mut root = mounted(&base);
            let mut flip = false;
            group.bench_with_input(BenchmarkId::new(name, n), &(), |b, _| {
                b.iter(|| {
                    flip = !flip;
                    root.render(if flip { to.clone() } else { from.clone() });
                    black_box(root.flush_all().expect("flush"));
                })
            });
        }
    }

    group.finish();
}

// =============================================================================
// Time slicing: the same diff in 64-unit slices
// =============================================================================

fn bench_sliced(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/sliced");

    for n in [100u32, 1_000] {
        group.throughput(Throughput::Elements(u64::from(n)));
        let base: Vec<u32> = (0..n).collect();
        let mut reversed = base.clone();
        reversed.reverse();
        let (from, to) = (list(&base), list(&reversed));
        let mut root = mounted(&base);
        let mut flip = false;

        group.bench_with_input(BenchmarkId::new("reverse", n), &(), |b, _| {
            b.iter(|| {
                flip = !flip;
                root.render(if flip { to.clone() } else { from.clone() });
                while root.perform_work(WorkBudget::Units(64)).expect("slice")
                    == frx_reconciler::WorkStatus::Yielded
                {}
                black_box(root.flush_all().expect("flush"));
            })
        });
    }

    group.finish();
}

// =============================================================================
// Mount from scratch
// =============================================================================

fn bench_mount(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile/mount");

    for n in [100u32, 1_000] {
        group.throughput(Throughput::Elements(u64::from(n)));
        let keys: Vec<u32> = (0..n).collect();
        group.bench_with_input(BenchmarkId::new("list", n), &keys, |b, keys| {
            b.iter(|| black_box(mounted(keys).fiber_count()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_keyed_orders, bench_sliced, bench_mount);
criterion_main!(benches);
