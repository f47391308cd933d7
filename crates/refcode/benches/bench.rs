use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use refcode::{
    CodeGenerator, Connector, Schema, StoreKind, ThreadRandom, is_unique,
    store::{
        Value,
        memory::{MemoryConnection, MemoryStore},
    },
};
use std::time::Instant;
use tokio::runtime::Builder;

// Codes generated per benchmark iteration.
const TOTAL_CODES: usize = 4096;

// Codes already present in each store for the uniqueness benchmarks.
const OCCUPIED: i64 = 10_000;

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate");
    group.throughput(Throughput::Elements(TOTAL_CODES as u64));

    group.bench_function(format!("thread_random/elems/{TOTAL_CODES}"), |b| {
        let generator = CodeGenerator::<ThreadRandom>::random();
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                for _ in 0..TOTAL_CODES {
                    black_box(generator.generate());
                }
            }
            start.elapsed()
        });
    });

    group.bench_function(format!("contended/threads/8/elems/{TOTAL_CODES}"), |b| {
        let generator = CodeGenerator::<ThreadRandom>::random();
        let generator = &generator;
        b.iter_custom(|iters| {
            let start = Instant::now();
            std::thread::scope(|s| {
                for _ in 0..8 {
                    s.spawn(move || {
                        for _ in 0..iters {
                            for _ in 0..TOTAL_CODES / 8 {
                                black_box(generator.generate());
                            }
                        }
                    });
                }
            });
            start.elapsed()
        });
    });

    group.finish();
}

/// Fills both stores with `OCCUPIED` random codes.
fn occupied_stores() -> (MemoryStore, MemoryStore) {
    let generator = CodeGenerator::<ThreadRandom>::random();
    let a = MemoryStore::new(StoreKind::Primary);
    a.create_table("user", &["user_code"]);
    a.create_table("user_bridge", &[]);
    let b = MemoryStore::new(StoreKind::Secondary);
    b.create_table("user_info", &["referral_code"]);
    for id in 1..=OCCUPIED {
        let code = generator.generate().to_string();
        a.insert("user", &[("id", Value::Int(id)), ("user_code", Value::Text(code.clone()))]);
        b.insert("user_info", &[("user_id", Value::Int(id)), ("referral_code", Value::Text(code))]);
    }
    (a, b)
}

async fn connect(store: &MemoryStore) -> MemoryConnection {
    store.connector().connect().await.unwrap()
}

fn bench_is_unique(c: &mut Criterion) {
    let rt = Builder::new_current_thread().enable_all().build().unwrap();
    let (a, b) = occupied_stores();
    let schema = Schema::users();
    let generator = CodeGenerator::<ThreadRandom>::random();
    let generator = &generator;

    let mut group = c.benchmark_group("is_unique");
    group.throughput(Throughput::Elements(1));
    group.bench_function(format!("memory/occupied/{OCCUPIED}"), |bench| {
        bench.to_async(&rt).iter_custom(|iters| {
            let (a, b, schema) = (a.clone(), b.clone(), schema.clone());
            async move {
                let mut primary = connect(&a).await;
                let mut secondary = connect(&b).await;
                let start = Instant::now();
                for _ in 0..iters {
                    let candidate = generator.generate();
                    let unique = is_unique(&candidate, &schema, &mut primary, &mut secondary).await;
                    black_box(unique.unwrap());
                }
                start.elapsed()
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_generate, bench_is_unique);
criterion_main!(benches);
