use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use offerguard::admission::{AdmissionGuard, OperationClass};
use offerguard::cache::{CacheKey, MemoryCacheBackend, ResultCache};
use offerguard::computation::CachedComputation;
use offerguard::rate_limit::{FixedWindowLimiter, RateLimitPolicy, RateLimiter};
use std::sync::Arc;
use std::time::Duration;

fn bench_fixed_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixed_window_check");

    // Always admitted: the counter keeps growing inside one huge window.
    let policy = RateLimitPolicy::per_window(Duration::from_secs(3600), u32::MAX).unwrap();
    let limiter = FixedWindowLimiter::new(policy);
    group.bench_function("single_identifier", |b| {
        b.iter(|| black_box(limiter.check(black_box("203.0.113.5"))))
    });

    // Mostly denied after warm-up.
    let policy = RateLimitPolicy::per_window(Duration::from_secs(3600), 2).unwrap();
    let strict = FixedWindowLimiter::new(policy);
    group.bench_function("denied", |b| b.iter(|| black_box(strict.check(black_box("10.0.0.1")))));

    for identifiers in [100usize, 10_000] {
        let ids: Vec<String> = (0..identifiers).map(|i| format!("10.0.{}.{}", i / 256, i % 256)).collect();
        let policy = RateLimitPolicy::per_window(Duration::from_secs(3600), u32::MAX).unwrap();
        let limiter = FixedWindowLimiter::new(policy);
        let mut n = 0usize;
        group.bench_with_input(BenchmarkId::new("many_identifiers", identifiers), &ids, |b, ids| {
            b.iter(|| {
                n = (n + 1) % ids.len();
                black_box(limiter.check(&ids[n]))
            })
        });
    }
    group.finish();
}

fn bench_admission_guard(c: &mut Criterion) {
    let guard = AdmissionGuard::default();
    let mut headers = http::HeaderMap::new();
    headers.insert("x-forwarded-for", http::HeaderValue::from_static("203.0.113.5, 10.0.0.1"));

    c.bench_function("admission_identify", |b| b.iter(|| black_box(guard.identify(&headers))));
    c.bench_function("admission_decide_api", |b| {
        b.iter(|| black_box(guard.decide(black_box("203.0.113.5"), OperationClass::Api)))
    });
}

fn bench_cache_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let computation =
        CachedComputation::new(ResultCache::new(Arc::new(MemoryCacheBackend::default())));
    let key = CacheKey::best_offer("casino-42");
    rt.block_on(async {
        computation
            .get_or_compute(&key, Duration::from_secs(3600), || async {
                Ok::<_, std::io::Error>(serde_json::json!({"rank": 1}))
            })
            .await
            .unwrap();
    });

    c.bench_function("get_or_compute_hit", |b| {
        b.to_async(&rt).iter(|| async {
            let hit = computation
                .get_or_compute(&key, Duration::from_secs(3600), || async {
                    Ok::<_, std::io::Error>(serde_json::json!({"rank": 1}))
                })
                .await
                .unwrap();
            black_box(hit)
        })
    });
}

criterion_group!(benches, bench_fixed_window, bench_admission_guard, bench_cache_hit);
criterion_main!(benches);
