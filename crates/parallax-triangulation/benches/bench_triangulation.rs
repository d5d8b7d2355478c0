use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::{DVec2, DVec3};
use parallax_scene::{CameraIntrinsics, PinholeCamera};
use parallax_triangulation::{triangulate, TriangulationMethod};

/// Cameras on an arc observing one point near the origin.
fn generate_track(n: usize) -> (Vec<PinholeCamera>, Vec<DVec2>) {
    let intrinsics = CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0);
    let point = DVec3::new(0.3, -0.2, 0.4);
    let cameras: Vec<PinholeCamera> = (0..n)
        .map(|i| {
            let angle = std::f64::consts::PI * (0.2 + 0.6 * i as f64 / n as f64);
            let center = DVec3::new(10.0 * angle.cos(), 2.0, 10.0 * angle.sin());
            PinholeCamera::look_at(center, DVec3::ZERO, DVec3::Y, intrinsics)
        })
        .collect();
    let pixels = cameras
        .iter()
        .map(|camera| camera.project_point(point.extend(1.0)).0)
        .collect();
    (cameras, pixels)
}

fn bench_methods(c: &mut Criterion) {
    for (name, method) in [
        ("triangulate_midpoint", TriangulationMethod::Midpoint),
        ("triangulate_svd", TriangulationMethod::Svd),
        ("triangulate_l2", TriangulationMethod::L2Minimization),
    ] {
        let mut group = c.benchmark_group(name);
        for &n in &[2, 5, 10] {
            let (cameras, pixels) = generate_track(n);
            group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
                b.iter(|| {
                    let _ = std::hint::black_box(triangulate(&cameras, &pixels, method));
                });
            });
        }
        group.finish();
    }
}

criterion_group!(benches, bench_methods);
criterion_main!(benches);
