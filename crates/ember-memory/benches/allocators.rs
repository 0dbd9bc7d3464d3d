//! Throughput comparison of the allocator family on common patterns.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ember_memory::prelude::*;

fn bench_bump_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_64B");

    group.bench_function("linear", |b| {
        let alloc = LinearAllocator::with_capacity(1 << 20).expect("valid capacity");
        b.iter(|| {
            unsafe { alloc.clear() };
            for _ in 0..1000 {
                black_box(alloc.allocate(64, 8));
            }
        });
    });

    group.bench_function("stack", |b| {
        let alloc = StackAllocator::with_capacity(1 << 20).expect("valid capacity");
        b.iter(|| {
            unsafe { alloc.clear() };
            for _ in 0..1000 {
                black_box(alloc.allocate(64, 8));
            }
        });
    });

    group.bench_function("arena", |b| {
        let alloc = ArenaAllocator::new();
        b.iter(|| {
            unsafe { alloc.clear() };
            for _ in 0..1000 {
                black_box(alloc.allocate(64, 8));
            }
        });
    });

    group.finish();
}

fn bench_free_list_churn(c: &mut Criterion) {
    c.bench_function("free_list_alloc_free_pairs", |b| {
        let list = FreeListAllocator::with_capacity(1 << 16).expect("valid capacity");
        b.iter(|| {
            let mut handles = [INVALID_HANDLE; 64];
            for handle in handles.iter_mut() {
                *handle = list.allocate_handle(96, 8);
            }
            for &handle in handles.iter().rev() {
                unsafe { list.free_handle(black_box(handle)) };
            }
        });
    });
}

fn bench_sequence_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence_append_1000");

    group.bench_function("over_linear", |b| {
        let alloc = LinearAllocator::with_capacity(1 << 20).expect("valid capacity");
        b.iter(|| {
            let mut seq: DynVec<u64, _> = DynVec::new(&alloc);
            for i in 0..1000u64 {
                seq.append(black_box(i));
            }
            black_box(seq.len());
        });
    });

    group.bench_function("over_system", |b| {
        b.iter(|| {
            let mut seq: DynVec<u64, _> = DynVec::new(global());
            for i in 0..1000u64 {
                seq.append(black_box(i));
            }
            black_box(seq.len());
        });
    });

    group.finish();
}

fn bench_table_inserts(c: &mut Criterion) {
    c.bench_function("table_put_1000", |b| {
        b.iter(|| {
            let mut table: HashTable<u32, u64, _> = HashTable::new(global());
            for i in 0..1000u32 {
                table.put(black_box(i), u64::from(i));
            }
            black_box(table.len());
        });
    });
}

criterion_group!(
    benches,
    bench_bump_allocation,
    bench_free_list_churn,
    bench_sequence_append,
    bench_table_inserts
);
criterion_main!(benches);
