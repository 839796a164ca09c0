use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use segalloc::{HeapConfig, SegAlloc};

fn alloc_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc sizes");

    for size in [8, 16, 32, 64, 128, 512, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut heap = SegAlloc::with_config(HeapConfig::default().with_max_heap(1 << 30)).unwrap();

            b.iter(|| {
                if heap.allocate(black_box(size)).is_none() {
                    heap.init().unwrap();
                }
            });
        });
    }

    group.finish();
}

fn alloc_free_pairs(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc free");

    for size in [16, 256, 4096].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut heap = SegAlloc::new().unwrap();

            b.iter(|| {
                let ptr = heap.allocate(black_box(size));
                heap.deallocate(ptr);
            });
        });
    }

    group.finish();
}

fn fragmented_heap(c: &mut Criterion) {
    c.bench_function("fragmented realloc", |b| {
        let mut heap = SegAlloc::new().unwrap();
        let ptrs: Vec<_> = (0..1000).filter_map(|i| heap.allocate(16 + (i % 7) * 40)).collect();
        for ptr in ptrs.iter().step_by(2) {
            heap.deallocate(*ptr);
        }

        b.iter(|| {
            let ptr = heap.allocate(black_box(100));
            let ptr = heap.reallocate(ptr, black_box(900));
            heap.deallocate(ptr);
        });
    });
}

criterion_group!(benches, alloc_sizes, alloc_free_pairs, fragmented_heap);
criterion_main!(benches);
