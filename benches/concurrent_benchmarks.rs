//! Concurrent Cache Benchmarks
//!
//! Measures block cache throughput with several threads sharing one cache,
//! across hit-heavy and eviction-heavy access patterns and stripe counts.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dfs_block_cache::{Block, BlockCache, BlockCacheConfig, BlockFile, Category, StreamKey, KB, MB};
use std::sync::Arc;
use std::thread;

const THREADS: usize = 8;
const OPS_PER_THREAD: usize = 1_000;

struct ZeroFile(StreamKey);

impl BlockFile for ZeroFile {
    type Error = ();

    fn key(&self) -> &StreamKey {
        &self.0
    }

    fn read_one_block(&self, position: u64, block_size: u32) -> Result<Block, ()> {
        Ok(Block::new(self.0.clone(), position, vec![0u8; block_size as usize]))
    }
}

fn make_cache(limit: u64, concurrency: u32) -> Arc<BlockCache> {
    Arc::new(
        BlockCache::new(BlockCacheConfig {
            block_limit: limit,
            block_size: 4 * KB as u32,
            concurrency_level: concurrency,
            ..Default::default()
        })
        .unwrap(),
    )
}

fn run(cache: &Arc<BlockCache>, file: &Arc<ZeroFile>, span: u64) {
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = Arc::clone(cache);
            let file = Arc::clone(file);
            thread::spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    let block = (t * 7919 + i * 31) as u64 % span;
                    black_box(cache.get_or_load(&*file, block * 4 * KB).unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

/// Working set fits: nearly every request is a lock-free hit.
fn concurrent_hits(c: &mut Criterion) {
    let mut group = c.benchmark_group("Concurrent Hits");
    group.throughput(Throughput::Elements((THREADS * OPS_PER_THREAD) as u64));

    let cache = make_cache(16 * MB, 32);
    let file = Arc::new(ZeroFile(StreamKey::new("pack-hit.pack", Category::PACK)));
    run(&cache, &file, 512);

    group.bench_function("get_or_load", |b| b.iter(|| run(&cache, &file, 512)));
    group.finish();
}

/// Working set is eight times the cache: every request sweeps the clock.
fn concurrent_evictions(c: &mut Criterion) {
    let mut group = c.benchmark_group("Concurrent Evictions");
    group.throughput(Throughput::Elements((THREADS * OPS_PER_THREAD) as u64));

    let cache = make_cache(MB, 32);
    let file = Arc::new(ZeroFile(StreamKey::new("pack-miss.pack", Category::PACK)));

    group.bench_function("get_or_load", |b| b.iter(|| run(&cache, &file, 2048)));
    group.finish();
}

/// How the number of load stripes affects a mixed workload.
fn stripe_count_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("Stripe Count");
    group.throughput(Throughput::Elements((THREADS * OPS_PER_THREAD) as u64));

    for stripes in [1u32, 4, 32, 128] {
        let cache = make_cache(4 * MB, stripes);
        let file = Arc::new(ZeroFile(StreamKey::new("pack-mix.pack", Category::PACK)));
        group.bench_with_input(BenchmarkId::from_parameter(stripes), &stripes, |b, _| {
            b.iter(|| run(&cache, &file, 2048));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    concurrent_hits,
    concurrent_evictions,
    stripe_count_comparison
);
criterion_main!(benches);
