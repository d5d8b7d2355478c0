#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Parallax Triangulation
//!
//! Computes 3D positions for feature tracks observed by calibrated,
//! pose-estimated views, and decides per track whether the triangulation is
//! trustworthy enough to accept.
//!
//! A track is accepted only if the triangulation solve is numerically valid,
//! at least one pair of observing views has a sufficient triangulation
//! angle, and every observation reprojects within a pixel threshold.
//! Accepted tracks are optionally refined by a per-track bundle refinement
//! step. Candidates are processed in chunks by a configurable pool of worker
//! threads; the outcome is independent of thread count and chunk size.
//!
//! ## Example
//!
//! ```rust
//! use glam::DVec3;
//! use parallax_scene::{CameraIntrinsics, PinholeCamera, Reconstruction, SceneStore};
//! use parallax_triangulation::{TrackEstimator, TrackEstimatorOptions};
//!
//! let intrinsics = CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0);
//! let point = DVec3::new(0.0, 0.0, 4.0);
//!
//! // Two estimated views with a 90 degree baseline towards the point.
//! let mut scene = Reconstruction::new();
//! let left = scene.add_view(PinholeCamera::look_at(DVec3::ZERO, point, DVec3::Y, intrinsics));
//! let right = scene.add_view(PinholeCamera::look_at(
//!     DVec3::new(4.0, 0.0, 4.0),
//!     point,
//!     DVec3::Y,
//!     intrinsics,
//! ));
//! scene.set_view_estimated(left, true)?;
//! scene.set_view_estimated(right, true)?;
//!
//! let track = scene.add_track();
//! for view in [left, right] {
//!     let camera = scene.view_camera(view).expect("view was just added");
//!     let (pixel, _depth) = camera.project_point(point.extend(1.0));
//!     scene.add_observation(view, track, pixel)?;
//! }
//!
//! let estimator = TrackEstimator::new(TrackEstimatorOptions::default(), &scene);
//! let summary = estimator.estimate_all_tracks()?;
//!
//! assert_eq!(summary.num_triangulation_attempts, 1);
//! assert!(summary.estimated_tracks.contains(&track));
//! assert!(scene.is_track_estimated(track));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Parallel track estimation engine.
pub mod estimator;

/// Per-track nonlinear position refinement.
pub mod refine;

/// Multi-view triangulation kernel.
pub mod triangulation;

pub use estimator::{
    TrackEstimator, TrackEstimatorError, TrackEstimatorOptions, TrackEstimatorSummary,
};
pub use refine::{LmTrackRefiner, RefineSummary, RefinementOptions, TrackRefiner};
pub use triangulation::{
    ray_angle_degrees, reprojection_error, triangulate, TriangulationError, TriangulationMethod,
};
