//! Estimates a batch of synthetic tracks and prints the outcome.
//!
//! Run with `RUST_LOG=debug` to see the per-call rejection tallies.

use glam::DVec3;
use parallax_scene::{CameraIntrinsics, PinholeCamera, Reconstruction, SceneStore};
use parallax_triangulation::{TrackEstimator, TrackEstimatorOptions};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let intrinsics = CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0);
    let mut scene = Reconstruction::new();

    // Eight estimated cameras on an arc around the scene.
    let views: Vec<_> = (0..8)
        .map(|i| {
            let angle = std::f64::consts::PI * (0.15 + 0.7 * i as f64 / 7.0);
            let center = DVec3::new(12.0 * angle.cos(), 3.0, 12.0 * angle.sin());
            scene.add_view(PinholeCamera::look_at(center, DVec3::ZERO, DVec3::Y, intrinsics))
        })
        .collect();
    for &view in &views {
        scene.set_view_estimated(view, true)?;
    }

    // Tracks scattered around the origin, observed by every camera with a
    // little pixel noise; a few observations are corrupted outright.
    let mut rng = StdRng::seed_from_u64(42);
    for i in 0..200 {
        let point = DVec3::new(
            rng.random_range(-3.0..3.0),
            rng.random_range(-3.0..3.0),
            rng.random_range(-3.0..3.0),
        );
        let track = scene.add_track();
        for (j, &view) in views.iter().enumerate() {
            let camera = scene.view_camera(view).expect("view exists");
            let (mut pixel, _) = camera.project_point(point.extend(1.0));
            pixel.x += rng.random_range(-0.5..0.5);
            pixel.y += rng.random_range(-0.5..0.5);
            if i % 17 == 0 && j == 0 {
                pixel.x += 50.0;
            }
            scene.add_observation(view, track, pixel)?;
        }
    }

    let options = TrackEstimatorOptions {
        num_threads: 4,
        ..Default::default()
    };
    let estimator = TrackEstimator::new(options, &scene);
    let summary = estimator.estimate_all_tracks()?;

    println!(
        "estimated {} of {} candidate tracks ({} were already estimated)",
        summary.estimated_tracks.len(),
        summary.num_triangulation_attempts,
        summary.input_num_estimated_tracks
    );
    Ok(())
}
