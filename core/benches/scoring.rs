use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pulsewatch_core::scoring::components::{
    orderflow_imbalance, token_freshness, tx_accel, vol_momentum,
};
use pulsewatch_core::scoring::smoother;
use pulsewatch_core::types::{ComponentKey, ComponentVector};

fn bench_components(c: &mut Criterion) {
    c.bench_function("tx_accel", |b| {
        b.iter(|| tx_accel(black_box(420), black_box(3800)))
    });
    c.bench_function("vol_momentum", |b| {
        b.iter(|| vol_momentum(black_box(12_000.0), black_box(90_000.0)))
    });
    c.bench_function("token_freshness", |b| {
        b.iter(|| token_freshness(black_box(2.5), black_box(6.0)))
    });
    c.bench_function("orderflow_imbalance", |b| {
        b.iter(|| orderflow_imbalance(black_box(5_000.0), black_box(3_000.0)))
    });
}

fn bench_smoother(c: &mut Criterion) {
    let mut previous = ComponentVector::new();
    previous.insert(ComponentKey::TxAccel, 0.42);
    previous.insert(ComponentKey::VolMomentum, 0.83);
    previous.insert(ComponentKey::TokenFreshness, 0.2);
    previous.insert(ComponentKey::OrderflowImbalance, -0.1);

    let mut raw = ComponentVector::new();
    raw.insert(ComponentKey::TxAccel, 0.55);
    raw.insert(ComponentKey::VolMomentum, 0.61);
    raw.insert(ComponentKey::TokenFreshness, 0.1);
    raw.insert(ComponentKey::OrderflowImbalance, 0.05);

    c.bench_function("ewma_apply", |b| {
        b.iter(|| smoother::apply(Some(black_box(&previous)), black_box(&raw), black_box(0.3)))
    });
}

criterion_group!(benches, bench_components, bench_smoother);
criterion_main!(benches);
