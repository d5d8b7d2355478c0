//! Parallel estimation of track positions across a reconstruction.

use std::collections::BTreeSet;

use log::{debug, trace};
use parallax_scene::{SceneStore, TrackId};
use rayon::prelude::*;
use thiserror::Error;

use crate::refine::{LmTrackRefiner, RefinementOptions, TrackRefiner};
use crate::triangulation::{self, TriangulationMethod};

/// Errors that fail an estimation call as a whole.
///
/// Data-dependent rejections (bad angle, bad reprojection, degenerate
/// geometry) are not errors; they leave the track unestimated and show up in
/// the summary.
#[derive(Debug, Error)]
pub enum TrackEstimatorError {
    /// A supplied track id does not exist in the scene.
    #[error("unknown {0}")]
    UnknownTrack(TrackId),
    /// The worker thread pool could not be constructed.
    #[error("failed to build worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Configuration of the track estimation engine.
#[derive(Debug, Clone)]
pub struct TrackEstimatorOptions {
    /// Number of worker threads; 1 runs fully sequential.
    pub num_threads: usize,

    /// Maximum reprojection error for a successful triangulation.
    pub max_acceptable_reprojection_error_pixels: f64,

    /// Minimum triangulation angle between two views required for
    /// triangulation. For N-view tracks at least one pair of views must
    /// reach this angle.
    pub min_triangulation_angle_degrees: f64,

    /// Refine each track with bundle adjustment as soon as its position is
    /// estimated.
    pub bundle_adjustment: bool,

    /// Options forwarded to the per-track refinement step.
    pub refinement: RefinementOptions,

    /// Number of tracks estimated per worker dispatch. A throughput tuning
    /// knob only; any chunk size >= 1 produces identical results.
    pub multithreaded_step_size: usize,

    /// Triangulation strategy used by the geometry kernel.
    pub triangulation_method: TriangulationMethod,
}

impl Default for TrackEstimatorOptions {
    fn default() -> Self {
        Self {
            num_threads: 1,
            max_acceptable_reprojection_error_pixels: 5.0,
            min_triangulation_angle_degrees: 3.0,
            bundle_adjustment: true,
            refinement: RefinementOptions::default(),
            multithreaded_step_size: 100,
            triangulation_method: TriangulationMethod::default(),
        }
    }
}

/// Aggregate outcome of one estimation call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackEstimatorSummary {
    /// Tracks that were already estimated when the call started.
    pub input_num_estimated_tracks: usize,

    /// Number of triangulation attempts made.
    pub num_triangulation_attempts: usize,

    /// Tracks newly estimated by this call. Never contains tracks that were
    /// already estimated at call start, even if they were re-attempted.
    pub estimated_tracks: BTreeSet<TrackId>,
}

/// Why one track was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackRejection {
    /// Fewer than two estimated views observe the track.
    InsufficientViews,
    /// The geometry kernel could not produce a valid point.
    FailedTriangulation,
    /// No view pair reaches the minimum triangulation angle.
    BadAngle,
    /// At least one observation reprojects too far from its feature.
    BadReprojection,
}

enum TrackOutcome {
    Accepted { refinement_failed: bool },
    Rejected(TrackRejection),
}

/// Tallies accumulated by one worker chunk, merged after the parallel phase.
#[derive(Debug, Default)]
struct ChunkStats {
    newly_estimated: Vec<TrackId>,
    num_insufficient_views: usize,
    num_failed_triangulations: usize,
    num_bad_angles: usize,
    num_bad_reprojections: usize,
    num_refinement_failures: usize,
}

impl ChunkStats {
    fn merge(&mut self, other: ChunkStats) {
        self.newly_estimated.extend(other.newly_estimated);
        self.num_insufficient_views += other.num_insufficient_views;
        self.num_failed_triangulations += other.num_failed_triangulations;
        self.num_bad_angles += other.num_bad_angles;
        self.num_bad_reprojections += other.num_bad_reprojections;
        self.num_refinement_failures += other.num_refinement_failures;
    }
}

/// Estimates 3D positions for tracks from their observations in estimated
/// views.
///
/// Each candidate track is triangulated with the configured method and
/// accepted only if the viewing geometry gives a sufficient triangulation
/// angle and every observation reprojects within the configured error. An
/// accepted track is optionally refined in place by the bundle-refinement
/// collaborator. Candidates are processed in chunks by a fixed pool of
/// worker threads; the accepted/rejected outcome is independent of thread
/// count and chunk size.
pub struct TrackEstimator<'a, S, R = LmTrackRefiner> {
    options: TrackEstimatorOptions,
    scene: &'a S,
    refiner: R,
}

impl<'a, S: SceneStore> TrackEstimator<'a, S> {
    /// Creates an estimator that refines accepted tracks with the built-in
    /// Levenberg-Marquardt point refiner.
    pub fn new(options: TrackEstimatorOptions, scene: &'a S) -> Self {
        let refiner = LmTrackRefiner::new(options.refinement.clone());
        Self {
            options,
            scene,
            refiner,
        }
    }
}

impl<'a, S: SceneStore, R: TrackRefiner<S>> TrackEstimator<'a, S, R> {
    /// Creates an estimator with a caller-supplied refinement collaborator.
    pub fn with_refiner(options: TrackEstimatorOptions, scene: &'a S, refiner: R) -> Self {
        Self {
            options,
            scene,
            refiner,
        }
    }

    /// Attempts to estimate every track that is currently unestimated.
    pub fn estimate_all_tracks(&self) -> Result<TrackEstimatorSummary, TrackEstimatorError> {
        let mut candidates = Vec::new();
        let mut input_num_estimated_tracks = 0;
        for track_id in self.scene.track_ids() {
            if self.scene.is_track_estimated(track_id) {
                input_num_estimated_tracks += 1;
            } else {
                candidates.push(track_id);
            }
        }
        candidates.sort_unstable();
        self.estimate_track_list(candidates, input_num_estimated_tracks)
    }

    /// Attempts to estimate exactly the supplied tracks.
    ///
    /// Already-estimated tracks are attempted again and may be overwritten;
    /// they are counted as attempts but never reported as newly estimated.
    /// A track id that does not exist in the scene fails the whole call.
    pub fn estimate_tracks(
        &self,
        track_ids: &BTreeSet<TrackId>,
    ) -> Result<TrackEstimatorSummary, TrackEstimatorError> {
        let mut candidates = Vec::with_capacity(track_ids.len());
        let mut input_num_estimated_tracks = 0;
        for &track_id in track_ids {
            if !self.scene.contains_track(track_id) {
                return Err(TrackEstimatorError::UnknownTrack(track_id));
            }
            if self.scene.is_track_estimated(track_id) {
                input_num_estimated_tracks += 1;
            }
            candidates.push(track_id);
        }
        self.estimate_track_list(candidates, input_num_estimated_tracks)
    }

    fn estimate_track_list(
        &self,
        candidates: Vec<TrackId>,
        input_num_estimated_tracks: usize,
    ) -> Result<TrackEstimatorSummary, TrackEstimatorError> {
        let step = self.options.multithreaded_step_size.max(1);
        debug!(
            "estimating {} candidate tracks in chunks of {step}",
            candidates.len()
        );

        let chunk_stats: Vec<ChunkStats> = if self.options.num_threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.options.num_threads)
                .build()?;
            pool.install(|| {
                candidates
                    .par_chunks(step)
                    .map(|chunk| self.estimate_track_set(chunk))
                    .collect()
            })
        } else {
            candidates
                .chunks(step)
                .map(|chunk| self.estimate_track_set(chunk))
                .collect()
        };

        let mut stats = ChunkStats::default();
        for chunk in chunk_stats {
            stats.merge(chunk);
        }

        debug!(
            "{} tracks failed triangulation ({} of them for lack of views)",
            stats.num_insufficient_views + stats.num_failed_triangulations,
            stats.num_insufficient_views
        );
        debug!(
            "{} tracks failed the triangulation angle check",
            stats.num_bad_angles
        );
        debug!(
            "{} tracks failed the reprojection error check",
            stats.num_bad_reprojections
        );
        if stats.num_refinement_failures > 0 {
            debug!(
                "{} accepted tracks kept their unrefined position",
                stats.num_refinement_failures
            );
        }

        Ok(TrackEstimatorSummary {
            input_num_estimated_tracks,
            num_triangulation_attempts: candidates.len(),
            estimated_tracks: stats.newly_estimated.into_iter().collect(),
        })
    }

    /// Processes one contiguous chunk of candidates on the current worker.
    fn estimate_track_set(&self, track_ids: &[TrackId]) -> ChunkStats {
        let mut stats = ChunkStats::default();
        for &track_id in track_ids {
            let was_estimated = self.scene.is_track_estimated(track_id);
            match self.estimate_track(track_id) {
                TrackOutcome::Accepted { refinement_failed } => {
                    if refinement_failed {
                        stats.num_refinement_failures += 1;
                    }
                    if !was_estimated {
                        stats.newly_estimated.push(track_id);
                    }
                }
                TrackOutcome::Rejected(reason) => {
                    trace!("{track_id} rejected: {reason:?}");
                    match reason {
                        TrackRejection::InsufficientViews => stats.num_insufficient_views += 1,
                        TrackRejection::FailedTriangulation => {
                            stats.num_failed_triangulations += 1
                        }
                        TrackRejection::BadAngle => stats.num_bad_angles += 1,
                        TrackRejection::BadReprojection => stats.num_bad_reprojections += 1,
                    }
                }
            }
        }
        stats
    }

    /// Triangulates one track and commits the result if every gate passes.
    fn estimate_track(&self, track_id: TrackId) -> TrackOutcome {
        let mut cameras = Vec::new();
        let mut pixels = Vec::new();
        for view_id in self.scene.observing_views(track_id) {
            if !self.scene.is_view_estimated(view_id) {
                continue;
            }
            let (Some(camera), Some(pixel)) = (
                self.scene.view_camera(view_id),
                self.scene.observation(view_id, track_id),
            ) else {
                continue;
            };
            cameras.push(camera);
            pixels.push(pixel);
        }
        if cameras.len() < 2 {
            return TrackOutcome::Rejected(TrackRejection::InsufficientViews);
        }

        let point =
            match triangulation::triangulate(&cameras, &pixels, self.options.triangulation_method)
            {
                Ok(point) => point,
                Err(_) => return TrackOutcome::Rejected(TrackRejection::FailedTriangulation),
            };

        // One well-separated view pair is enough for a stable solution;
        // shallow pairs in between are tolerated.
        let mut max_angle = 0.0_f64;
        for (i, first) in cameras.iter().enumerate() {
            for second in &cameras[i + 1..] {
                max_angle = max_angle.max(triangulation::ray_angle_degrees(
                    first.center,
                    second.center,
                    point,
                ));
            }
        }
        if max_angle < self.options.min_triangulation_angle_degrees {
            return TrackOutcome::Rejected(TrackRejection::BadAngle);
        }

        for (camera, pixel) in cameras.iter().zip(&pixels) {
            let error = triangulation::reprojection_error(camera, *pixel, point);
            if error > self.options.max_acceptable_reprojection_error_pixels {
                return TrackOutcome::Rejected(TrackRejection::BadReprojection);
            }
        }

        self.scene.commit_track_point(track_id, point);

        let mut refinement_failed = false;
        if self.options.bundle_adjustment {
            let refined = self.refiner.refine_track(self.scene, track_id);
            if !refined.success {
                refinement_failed = true;
            }
        }
        TrackOutcome::Accepted { refinement_failed }
    }
}
