//! End-to-end tests of the track estimation engine on synthetic scenes.

use std::collections::BTreeSet;
use std::f64::consts::PI;

use glam::DVec3;
use parallax_scene::{
    CameraIntrinsics, PinholeCamera, Reconstruction, SceneStore, TrackId, ViewId,
};
use parallax_triangulation::{
    ray_angle_degrees, reprojection_error, TrackEstimator, TrackEstimatorError,
    TrackEstimatorOptions, TriangulationMethod,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0)
}

fn arc_camera(i: usize, n: usize) -> PinholeCamera {
    let angle = PI * (0.2 + 0.6 * i as f64 / (n - 1) as f64);
    let center = DVec3::new(10.0 * angle.cos(), 2.0, 10.0 * angle.sin());
    PinholeCamera::look_at(center, DVec3::ZERO, DVec3::Y, intrinsics())
}

fn observe(scene: &mut Reconstruction, view: ViewId, track: TrackId, point: DVec3) {
    let camera = scene.view_camera(view).expect("view exists");
    let (pixel, _) = camera.project_point(point.extend(1.0));
    scene.add_observation(view, track, pixel).unwrap();
}

struct TestScene {
    scene: Reconstruction,
    clean: Vec<TrackId>,
    outliers: Vec<TrackId>,
    shallow: Vec<TrackId>,
    starved: Vec<TrackId>,
}

impl TestScene {
    fn num_tracks(&self) -> usize {
        self.clean.len() + self.outliers.len() + self.shallow.len() + self.starved.len()
    }
}

/// A deterministic scene mixing healthy tracks with every rejection cause:
/// gross pixel outliers, a near-coincident camera pair, and tracks observed
/// by fewer than two estimated views.
fn build_scene() -> TestScene {
    let mut rng = StdRng::seed_from_u64(7);
    let mut scene = Reconstruction::new();

    let views: Vec<ViewId> = (0..6)
        .map(|i| {
            let view = scene.add_view(arc_camera(i, 6));
            scene.set_view_estimated(view, true).unwrap();
            view
        })
        .collect();
    let unestimated = scene.add_view(arc_camera(2, 6));

    // Two estimated cameras almost on top of each other, far from the scene.
    let shallow_pair: Vec<ViewId> = [DVec3::new(0.0, 1.0, -100.0), DVec3::new(0.5, 1.0, -100.0)]
        .into_iter()
        .map(|center| {
            let view =
                scene.add_view(PinholeCamera::look_at(center, DVec3::ZERO, DVec3::Y, intrinsics()));
            scene.set_view_estimated(view, true).unwrap();
            view
        })
        .collect();

    let random_point = |rng: &mut StdRng| {
        DVec3::new(
            rng.random_range(-2.0..2.0),
            rng.random_range(-2.0..2.0),
            rng.random_range(-2.0..2.0),
        )
    };

    let mut clean = Vec::new();
    for _ in 0..24 {
        let point = random_point(&mut rng);
        let track = scene.add_track();
        for &view in &views {
            observe(&mut scene, view, track, point);
        }
        clean.push(track);
    }

    let mut outliers = Vec::new();
    for i in 0..6 {
        let point = random_point(&mut rng);
        let track = scene.add_track();
        for &view in &views {
            observe(&mut scene, view, track, point);
        }
        // Re-insert one observation with a gross pixel offset.
        let corrupted = views[i % views.len()];
        let camera = scene.view_camera(corrupted).expect("view exists");
        let (mut pixel, _) = camera.project_point(point.extend(1.0));
        pixel.x += 50.0;
        scene.add_observation(corrupted, track, pixel).unwrap();
        outliers.push(track);
    }

    let mut shallow = Vec::new();
    for _ in 0..4 {
        let point = random_point(&mut rng);
        let track = scene.add_track();
        for &view in &shallow_pair {
            observe(&mut scene, view, track, point);
        }
        shallow.push(track);
    }

    let mut starved = Vec::new();
    for _ in 0..4 {
        let point = random_point(&mut rng);
        let track = scene.add_track();
        observe(&mut scene, views[0], track, point);
        observe(&mut scene, unestimated, track, point);
        starved.push(track);
    }

    TestScene {
        scene,
        clean,
        outliers,
        shallow,
        starved,
    }
}

#[test]
fn estimate_all_accepts_exactly_the_healthy_tracks() {
    let test = build_scene();
    let estimator = TrackEstimator::new(TrackEstimatorOptions::default(), &test.scene);
    let summary = estimator.estimate_all_tracks().unwrap();

    assert_eq!(summary.input_num_estimated_tracks, 0);
    assert_eq!(summary.num_triangulation_attempts, test.num_tracks());
    let expected: BTreeSet<TrackId> = test.clean.iter().copied().collect();
    assert_eq!(summary.estimated_tracks, expected);

    for &track in test.outliers.iter().chain(&test.shallow).chain(&test.starved) {
        assert!(!test.scene.is_track_estimated(track));
    }
}

#[test]
fn accepted_tracks_satisfy_both_quality_gates() {
    let test = build_scene();
    let options = TrackEstimatorOptions::default();
    let estimator = TrackEstimator::new(options.clone(), &test.scene);
    let summary = estimator.estimate_all_tracks().unwrap();

    for &track in &summary.estimated_tracks {
        let point = test.scene.track_point(track).expect("accepted track has a point");
        let views: Vec<ViewId> = test
            .scene
            .observing_views(track)
            .into_iter()
            .filter(|&view| test.scene.is_view_estimated(view))
            .collect();

        for &view in &views {
            let camera = test.scene.view_camera(view).unwrap();
            let observed = test.scene.observation(view, track).unwrap();
            assert!(
                reprojection_error(&camera, observed, point)
                    <= options.max_acceptable_reprojection_error_pixels
            );
        }

        let mut max_angle = 0.0_f64;
        for (i, &first) in views.iter().enumerate() {
            for &second in &views[i + 1..] {
                let c1 = test.scene.view_camera(first).unwrap().center;
                let c2 = test.scene.view_camera(second).unwrap().center;
                max_angle = max_angle.max(ray_angle_degrees(c1, c2, point));
            }
        }
        assert!(max_angle >= options.min_triangulation_angle_degrees);
    }
}

#[test]
fn second_pass_over_an_estimated_scene_is_empty() {
    let test = build_scene();
    let estimator = TrackEstimator::new(TrackEstimatorOptions::default(), &test.scene);

    let first = estimator.estimate_all_tracks().unwrap();
    assert_eq!(first.estimated_tracks.len(), test.clean.len());

    let second = estimator.estimate_all_tracks().unwrap();
    assert_eq!(second.input_num_estimated_tracks, test.clean.len());
    assert!(second.estimated_tracks.is_empty());
    // Only the previously rejected tracks are re-attempted.
    assert_eq!(
        second.num_triangulation_attempts,
        test.num_tracks() - test.clean.len()
    );
}

#[test]
fn summary_is_invariant_to_thread_count_and_chunk_size() {
    let baseline = {
        let test = build_scene();
        let estimator = TrackEstimator::new(TrackEstimatorOptions::default(), &test.scene);
        estimator.estimate_all_tracks().unwrap()
    };

    for (num_threads, step) in [(1, 1), (4, 1), (8, 3), (8, 100), (8, 0)] {
        let test = build_scene();
        let options = TrackEstimatorOptions {
            num_threads,
            multithreaded_step_size: step,
            ..Default::default()
        };
        let estimator = TrackEstimator::new(options, &test.scene);
        let summary = estimator.estimate_all_tracks().unwrap();
        assert_eq!(
            summary, baseline,
            "summary changed with {num_threads} threads and step {step}"
        );
    }
}

#[test]
fn every_triangulation_method_handles_a_clean_scene() {
    for method in [
        TriangulationMethod::Midpoint,
        TriangulationMethod::Svd,
        TriangulationMethod::L2Minimization,
    ] {
        let point = DVec3::new(0.4, -0.2, 0.3);
        let mut scene = Reconstruction::new();
        let track = scene.add_track();
        for i in 0..3 {
            let view = scene.add_view(arc_camera(i, 3));
            scene.set_view_estimated(view, true).unwrap();
            observe(&mut scene, view, track, point);
        }

        let options = TrackEstimatorOptions {
            triangulation_method: method,
            ..Default::default()
        };
        let estimator = TrackEstimator::new(options, &scene);
        let summary = estimator.estimate_all_tracks().unwrap();
        assert!(summary.estimated_tracks.contains(&track), "{method:?} failed");

        let estimate = scene.track_point(track).unwrap();
        let estimate = estimate.truncate() / estimate.w;
        assert!(
            (estimate - point).length() < 1e-5,
            "{method:?} estimate too far off"
        );
    }
}

#[test]
fn estimate_tracks_reports_only_previously_unestimated_ids_as_new() {
    let point_a = DVec3::new(0.5, 0.0, -0.4);
    let point_b = DVec3::new(-0.3, 0.2, 0.6);
    let mut scene = Reconstruction::new();
    let track_a = scene.add_track();
    let track_b = scene.add_track();
    for i in 0..3 {
        let view = scene.add_view(arc_camera(i, 3));
        scene.set_view_estimated(view, true).unwrap();
        observe(&mut scene, view, track_a, point_a);
        observe(&mut scene, view, track_b, point_b);
    }

    let estimator = TrackEstimator::new(TrackEstimatorOptions::default(), &scene);
    let first = estimator
        .estimate_tracks(&BTreeSet::from([track_a]))
        .unwrap();
    assert_eq!(first.estimated_tracks, BTreeSet::from([track_a]));

    let both = estimator
        .estimate_tracks(&BTreeSet::from([track_a, track_b]))
        .unwrap();
    assert_eq!(both.input_num_estimated_tracks, 1);
    assert_eq!(both.num_triangulation_attempts, 2);
    assert_eq!(both.estimated_tracks, BTreeSet::from([track_b]));
}

#[test]
fn estimate_tracks_overwrites_a_stale_position() {
    let point = DVec3::new(0.1, 0.3, -0.2);
    let mut scene = Reconstruction::new();
    let track = scene.add_track();
    for i in 0..3 {
        let view = scene.add_view(arc_camera(i, 3));
        scene.set_view_estimated(view, true).unwrap();
        observe(&mut scene, view, track, point);
    }
    scene.commit_track_point(track, glam::DVec4::new(5.0, 5.0, 5.0, 1.0));

    let estimator = TrackEstimator::new(TrackEstimatorOptions::default(), &scene);
    let summary = estimator.estimate_tracks(&BTreeSet::from([track])).unwrap();

    // Re-attempted but not newly estimated.
    assert_eq!(summary.input_num_estimated_tracks, 1);
    assert!(summary.estimated_tracks.is_empty());

    let estimate = scene.track_point(track).unwrap();
    let estimate = estimate.truncate() / estimate.w;
    assert!((estimate - point).length() < 1e-5);
}

#[test]
fn unknown_track_id_fails_the_whole_call() {
    let test = build_scene();
    let estimator = TrackEstimator::new(TrackEstimatorOptions::default(), &test.scene);

    let mut ids: BTreeSet<TrackId> = test.clean.iter().copied().collect();
    ids.insert(TrackId(100_000));
    let result = estimator.estimate_tracks(&ids);
    assert!(matches!(
        result,
        Err(TrackEstimatorError::UnknownTrack(TrackId(100_000)))
    ));
    // The failed call did not estimate anything.
    assert!(test.clean.iter().all(|&id| !test.scene.is_track_estimated(id)));
}
