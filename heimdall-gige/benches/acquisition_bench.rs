//! Benchmark des calculs de l'ordonnanceur de bande passante et de la
//! machine d'état PTP à une seule caméra, les deux chemins évalués à chaque
//! démarrage de session.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use heimdall_gige::bandwidth::{fps_ceiling, packet_delay_ns, transmission_delay_ns};
use heimdall_gige::{GigeSession, SessionConfig};
use tokio::runtime::Runtime;

fn bench_bandwidth_scheduling(c: &mut Criterion) {
    let mut group = c.benchmark_group("bandwidth");

    for camera_count in [2usize, 4, 6] {
        group.bench_with_input(
            BenchmarkId::new("packet_delay_ns", camera_count),
            &camera_count,
            |b, &n| {
                b.iter(|| {
                    let dp = packet_delay_ns(black_box(n), 8_228, 125_000_000, 15.0);
                    black_box(dp);
                });
            },
        );
    }

    group.bench_function("fps_ceiling_2mp_mono8", |b| {
        let dp = packet_delay_ns(2, 8_228, 125_000_000, 15.0);
        b.iter(|| {
            let ceiling = fps_ceiling(
                black_box(1920),
                black_box(1080),
                heimdall_camera::PixelFormat::Mono8,
                8_228,
                125_000_000,
                dp,
            );
            black_box(ceiling);
        });
    });

    group.bench_function("transmission_delay_ns_fanout", |b| {
        let dp = packet_delay_ns(6, 8_228, 125_000_000, 15.0);
        b.iter(|| {
            for i in 0..6 {
                black_box(transmission_delay_ns(dp, 6, i));
            }
        });
    });

    group.finish();
}

fn bench_single_camera_ptp_convergence(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    c.bench_function("ptp_single_camera_short_circuit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut session = GigeSession::new(SessionConfig::default());
                let cameras = session.discover().unwrap();
                let ids: Vec<String> = cameras.into_iter().take(1).map(|c| c.id).collect();
                session.open(&ids).await;
                let state = black_box(session.synchronize("bench_session").await.unwrap());
                black_box(state);
            });
        });
    });
}

criterion_group!(benches, bench_bandwidth_scheduling, bench_single_camera_ptp_convergence);
criterion_main!(benches);
