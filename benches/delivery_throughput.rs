use abr_cast::abr::{AbrController, SegmentMetrics};
use abr_cast::catalog::BitrateCatalog;
use abr_cast::config::{AbrConfig, DistributorConfig};
use abr_cast::distribution::LiveDistributor;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use tokio::runtime::Runtime;

// Fan one segment out to every viewer of a recording
fn bench_fan_out(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("segment_fan_out");

    for viewers in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(viewers), &viewers, |b, &viewers| {
            b.to_async(&rt).iter(|| async move {
                let config = DistributorConfig::new().max_viewers(viewers);
                let distributor = LiveDistributor::new("bench", config, BitrateCatalog::standard()).unwrap();
                for i in 0..viewers {
                    distributor.join_viewer(&format!("viewer-{}", i), "720p").await.unwrap();
                }
                let segment = distributor
                    .new_segment("720p", 0, Duration::from_secs(4), "/bench/0.ts", 512 * 1024)
                    .with_keyframe(true);
                let segment_id = segment.id.clone();
                distributor.enqueue_segment(segment).await.unwrap();

                for i in 0..viewers {
                    let delivered = distributor
                        .deliver_segment(&format!("viewer-{}", i), &segment_id)
                        .await
                        .unwrap();
                    black_box(delivered);
                }
            });
        });
    }
    group.finish();
}

// Controller decisions over a full history window
fn bench_abr_selection(c: &mut Criterion) {
    let mut abr = AbrController::new(AbrConfig::default(), BitrateCatalog::standard()).unwrap();
    for i in 0..10 {
        abr.record_segment_metrics(SegmentMetrics::new(
            i,
            Duration::from_millis(800 + i * 50),
            1_000_000,
            1500.0 + i as f64 * 100.0,
            40.0 + i as f64 * 3.0,
        ));
    }

    c.bench_function("abr_select_quality", |b| {
        b.iter(|| black_box(abr.select_quality(black_box(2750.0)).bitrate_kbps))
    });
    c.bench_function("abr_predict_optimal_bitrate", |b| {
        b.iter(|| black_box(abr.predict_optimal_bitrate()))
    });
}

criterion_group!(benches, bench_fan_out, bench_abr_selection);
criterion_main!(benches);
