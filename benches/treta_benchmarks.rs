//! # Treta Performance Benchmarks
//!
//! Benchmarks for the hot paths: frame analysis, mood rules, forest
//! prediction and queue generation.
//!
//! ## Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Run specific benchmark group
//! cargo bench dsp
//! cargo bench queue
//! ```

use chrono::{Duration, Utc};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use treta::db::SqliteTrackStore;
use treta::dsp::FrameAnalysis;
use treta::features::{FeatureVector, FEATURE_COUNT};
use treta::forest::{ForestParams, RandomForest};
use treta::heuristic;
use treta::mood::MoodCategory;
use treta::queue::{QueueGenerator, QueueKind};
use treta::track::NewTrack;

/// In-memory library of `count` tracks spread over 20 artists and every mood.
fn create_benchmark_store(count: u32) -> SqliteTrackStore {
    let store = SqliteTrackStore::open_in_memory().expect("Failed to open database");
    let now = Utc::now();
    for i in 0..count {
        let mut track = NewTrack::new(format!("Song {i:04}"), format!("Artist {}", i % 20))
            .with_mood(MoodCategory::ALL[i as usize % MoodCategory::ALL.len()])
            .with_play_count(i % 60)
            .downloaded(now - Duration::hours(i64::from(i)));
        if i % 3 == 0 {
            track = track.last_played(now - Duration::days(i64::from(i % 45)));
        }
        store.add_track(&track).expect("Failed to insert track");
    }
    store
}

fn synthetic_audio(seconds: u32, sample_rate: u32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(1);
    (0..seconds * sample_rate)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5 + rng.gen_range(-0.05..0.05)
        })
        .collect()
}

fn benchmark_dsp(c: &mut Criterion) {
    let mut group = c.benchmark_group("dsp");
    group.sample_size(10);

    for seconds in [5, 30] {
        let samples = synthetic_audio(seconds, 22050);
        group.bench_with_input(BenchmarkId::new("frame_analysis", seconds), &samples, |b, samples| {
            b.iter(|| FrameAnalysis::compute(black_box(samples), 22050));
        });
    }

    group.finish();
}

fn benchmark_heuristic(c: &mut Criterion) {
    let features = FeatureVector {
        tempo: 128.0,
        spectral_centroid_mean: 2400.0,
        rmse_mean: 0.12,
        zero_crossing_rate_mean: 0.08,
        ..FeatureVector::default()
    };
    c.bench_function("heuristic_suggest", |b| b.iter(|| heuristic::suggest(black_box(&features))));
}

fn benchmark_forest(c: &mut Criterion) {
    let mut group = c.benchmark_group("forest");
    let mut rng = StdRng::seed_from_u64(5);
    let rows: Vec<Vec<f64>> = (0..300)
        .map(|_| (0..FEATURE_COUNT).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();
    let labels: Vec<usize> = rows.iter().map(|r| usize::from(r[0] > 0.0) + usize::from(r[1] > 0.5)).collect();

    group.sample_size(10);
    group.bench_function("fit_300x21", |b| {
        b.iter_batched(
            || StdRng::seed_from_u64(9),
            |mut rng| RandomForest::fit(ForestParams::default(), &rows, &labels, 3, &mut rng),
            BatchSize::SmallInput,
        );
    });

    let forest = RandomForest::fit(ForestParams::default(), &rows, &labels, 3, &mut rng).expect("Failed to fit forest");
    group.bench_function("predict_proba", |b| b.iter(|| forest.predict_proba(black_box(&rows[17]))));
    group.finish();
}

fn benchmark_queue_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    let store = create_benchmark_store(1000);
    let generator = QueueGenerator::new(&store);

    let kinds = [
        QueueKind::Mood(MoodCategory::Happy),
        QueueKind::Artist("Artist 3".to_string()),
        QueueKind::Discovery,
        QueueKind::Favorites,
        QueueKind::Mixed,
    ];
    for kind in &kinds {
        group.bench_with_input(BenchmarkId::new("generate", kind.queue_type()), kind, |b, kind| {
            let mut rng = StdRng::seed_from_u64(3);
            b.iter(|| generator.generate(black_box(kind), None, &mut rng).expect("Failed to generate queue"));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_dsp,
    benchmark_heuristic,
    benchmark_forest,
    benchmark_queue_generation
);

criterion_main!(benches);
