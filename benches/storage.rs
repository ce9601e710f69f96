//! Benchmarks for state backends and the in-process shared store.

use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use keygate::storage::{
    COMPARE_AND_SET_SCRIPT, FixedWindowState, LocalStore, MemoryBackend, SharedStore,
    StateBackend, StoreBackend, TOKEN_BUCKET_SCRIPT,
};
use tokio::runtime::Runtime;

const TTL: Duration = Duration::from_secs(3600);

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

fn bump(current: Option<FixedWindowState>) -> (FixedWindowState, u64) {
    let mut state = current.unwrap_or(FixedWindowState {
        window_index: 0,
        remaining: u64::MAX,
    });
    state.remaining -= 1;
    let remaining = state.remaining;
    (state, remaining)
}

fn bench_store_operations(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("local_store");

    group.bench_function("get_existing", |b| {
        let store = LocalStore::new();
        rt.block_on(async { store.set("bench:key", "{}", TTL).await.unwrap() });
        b.iter(|| rt.block_on(async { black_box(store.get("bench:key").await) }))
    });

    group.bench_function("get_missing", |b| {
        let store = LocalStore::new();
        b.iter(|| rt.block_on(async { black_box(store.get("nonexistent:key").await) }))
    });

    group.bench_function("set", |b| {
        let store = LocalStore::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("bench:set:{}", i);
            rt.block_on(async { black_box(store.set(&key, "{}", TTL).await) })
        })
    });

    group.bench_function("compare_and_set_conflict", |b| {
        let store = LocalStore::new();
        rt.block_on(async { store.set("bench:cas", "current", TTL).await.unwrap() });
        let keys = vec!["bench:cas".to_string()];
        let args = strings(&["1", "stale", "next", "60000"]);
        b.iter(|| {
            rt.block_on(async {
                black_box(store.run_atomic(&COMPARE_AND_SET_SCRIPT, &keys, &args).await)
            })
        })
    });

    group.bench_function("token_bucket_script", |b| {
        let store = LocalStore::new();
        let keys = vec!["bench:bucket".to_string()];
        let args = strings(&["1000000", "1000", "0", "1"]);
        b.iter(|| {
            rt.block_on(async {
                black_box(store.run_atomic(&TOKEN_BUCKET_SCRIPT, &keys, &args).await)
            })
        })
    });

    group.finish();
}

fn bench_backend_update(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("backend_update");

    for num_keys in [1u64, 100, 10_000] {
        group.bench_with_input(BenchmarkId::new("memory", num_keys), &num_keys, |b, &num_keys| {
            let backend: MemoryBackend<FixedWindowState> = MemoryBackend::new();
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                let key = format!("k:{}", i % num_keys);
                rt.block_on(async { black_box(backend.update(&key, TTL, bump).await) })
            })
        });

        group.bench_with_input(BenchmarkId::new("store", num_keys), &num_keys, |b, &num_keys| {
            let backend = StoreBackend::new(Arc::new(LocalStore::new()));
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                let key = format!("k:{}", i % num_keys);
                rt.block_on(async { black_box(backend.update(&key, TTL, bump).await) })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_store_operations, bench_backend_update);
criterion_main!(benches);
