use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use pcb_cas_storage::hasher::{hash_bytes, hash_reader};

fn bench_hashing(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("hash");

    for size in [64 * 1024, 1024 * 1024, 8 * 1024 * 1024] {
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("bytes", size), &data, |b, data| {
            b.iter(|| hash_bytes(black_box(data)))
        });

        group.bench_with_input(BenchmarkId::new("reader", size), &data, |b, data| {
            b.to_async(&rt)
                .iter(|| async { hash_reader(&mut &black_box(data)[..]).await.unwrap() })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_hashing);
criterion_main!(benches);
