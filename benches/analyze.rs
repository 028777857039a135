use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cuecraft_analysis::detect::{key, tempo};
use cuecraft_analysis::features::build_feature_bundle;

fn synthetic_track(seconds: f64) -> Vec<f32> {
    let sample_rate = cuecraft_analysis::dsp::SAMPLE_RATE;
    let n = (seconds * f64::from(sample_rate)) as usize;
    (0..n)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.6 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
                + 0.3 * (2.0 * std::f32::consts::PI * 110.0 * t).sin()
        })
        .collect()
}

fn bench_feature_bundle(c: &mut Criterion) {
    let samples = synthetic_track(8.0);
    c.bench_function("cuecraft-analysis: features.rs: build_feature_bundle", |b| {
        b.iter(|| {
            let _ = black_box(build_feature_bundle(black_box(&samples), black_box(cuecraft_analysis::dsp::SAMPLE_RATE)));
        });
    });
}

fn bench_key_and_tempo(c: &mut Criterion) {
    let samples = synthetic_track(8.0);
    let bundle = build_feature_bundle(&samples, cuecraft_analysis::dsp::SAMPLE_RATE).unwrap();
    c.bench_function("cuecraft-analysis: detect/key.rs + detect/tempo.rs", |b| {
        b.iter(|| {
            let _ = black_box(key::detect_key(black_box(&bundle)));
            let _ = black_box(tempo::detect_tempo(black_box(&bundle)));
        });
    });
}

criterion_group!(benches, bench_feature_bundle, bench_key_and_tempo);
criterion_main!(benches);
