use attention::masks::{build_causal_mask, padding_mask_from_lengths};
use attention::{Attention, Config, MultiHeadAttention, MultiHeadAttentionConfig, ScaledDotProductAttention};
use candle_core::{Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use layers::WeightMap;

fn bench_scaled_dot_product(c: &mut Criterion) {
    let device = Device::Cpu;
    let batch = 2usize;
    let heads = 8usize;
    let head_dim = 64usize;
    let mut group = c.benchmark_group("attention/scaled_dot_product");

    for &seq in &[32usize, 128, 512] {
        let q = Tensor::randn(0f32, 1.0, (batch, heads, seq, head_dim), &device).expect("q");
        let k = Tensor::randn(0f32, 1.0, (batch, heads, seq, head_dim), &device).expect("k");
        let v = Tensor::randn(0f32, 1.0, (batch, heads, seq, head_dim), &device).expect("v");
        let mask = build_causal_mask(&device, seq, seq).expect("mask");
        let kernel = ScaledDotProductAttention::new();
        let config = Config::inference();

        group.throughput(Throughput::Elements((batch * heads * seq * seq) as u64));
        group.bench_with_input(BenchmarkId::new("causal", seq), &seq, |b, _| {
            b.iter(|| {
                let out = kernel
                    .attend(black_box(&q), &k, &v, Some(&mask), &config)
                    .expect("attend");
                black_box(out);
            });
        });
    }
    group.finish();
}

fn bench_multi_head(c: &mut Criterion) {
    let device = Device::Cpu;
    let mut group = c.benchmark_group("attention/multi_head");

    for &d_model in &[256usize, 512] {
        let mut weights = WeightMap::initialize(&device);
        let mha = MultiHeadAttention::load(
            MultiHeadAttentionConfig::new(d_model, 8),
            &mut weights.scope("self_attn"),
        )
        .expect("multi-head attention");
        let x = Tensor::randn(0f32, 1.0, (4, 64, d_model), &device).expect("input");
        let mask = padding_mask_from_lengths(&device, &[64, 48, 32, 16], 64).expect("mask");

        group.throughput(Throughput::Elements((4 * 64 * d_model) as u64));
        group.bench_with_input(BenchmarkId::new("self", d_model), &d_model, |b, _| {
            b.iter(|| {
                let out = mha.forward(black_box(&x), &x, Some(&mask)).expect("forward");
                black_box(out);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scaled_dot_product, bench_multi_head);
criterion_main!(benches);
