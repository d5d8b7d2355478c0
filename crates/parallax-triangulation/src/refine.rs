//! Levenberg–Marquardt refinement of a single track position.

use glam::{DMat3, DVec2, DVec3};
use log::trace;
use parallax_scene::{PinholeCamera, SceneStore, TrackId};

use crate::triangulation::{outer, reprojection_error};

/// Damping factor above which the optimizer gives up on finding a step.
const LAMBDA_MAX: f64 = 1e12;

/// Parameters controlling the per-track LM refinement.
#[derive(Debug, Clone)]
pub struct RefinementOptions {
    /// Maximum number of LM iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the relative cost decrease.
    pub cost_tolerance: f64,
    /// Initial damping factor (lambda).
    pub lambda_init: f64,
    /// Multiplicative factor to increase/decrease lambda.
    pub lambda_scale: f64,
}

impl Default for RefinementOptions {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            cost_tolerance: 1e-10,
            lambda_init: 1e-3,
            lambda_scale: 10.0,
        }
    }
}

/// Result of refining one track.
#[derive(Debug, Clone, Copy)]
pub struct RefineSummary {
    /// Whether refinement converged and the refined point was committed.
    pub success: bool,
    /// Total squared reprojection error before refinement.
    pub initial_cost: f64,
    /// Total squared reprojection error after refinement.
    pub final_cost: f64,
    /// Number of LM iterations performed.
    pub num_iterations: usize,
}

impl RefineSummary {
    fn failure() -> Self {
        Self {
            success: false,
            initial_cost: f64::INFINITY,
            final_cost: f64::INFINITY,
            num_iterations: 0,
        }
    }
}

/// A collaborator that can refine the position of an estimated track.
///
/// Implementations must leave the stored point untouched unless refinement
/// succeeds.
pub trait TrackRefiner<S: SceneStore>: Sync {
    /// Refines the position of `track_id` using all estimated observing
    /// views.
    fn refine_track(&self, scene: &S, track_id: TrackId) -> RefineSummary;
}

/// Refines track positions by minimizing the total squared pixel
/// reprojection error with Levenberg–Marquardt, keeping cameras fixed.
#[derive(Debug, Clone, Default)]
pub struct LmTrackRefiner {
    options: RefinementOptions,
}

impl LmTrackRefiner {
    /// Creates a refiner with the given options.
    pub fn new(options: RefinementOptions) -> Self {
        Self { options }
    }
}

impl<S: SceneStore> TrackRefiner<S> for LmTrackRefiner {
    fn refine_track(&self, scene: &S, track_id: TrackId) -> RefineSummary {
        let Some(point) = scene.track_point(track_id) else {
            return RefineSummary::failure();
        };
        if point.w.abs() <= f64::EPSILON {
            return RefineSummary::failure();
        }

        let mut cameras = Vec::new();
        let mut pixels = Vec::new();
        for view_id in scene.observing_views(track_id) {
            if !scene.is_view_estimated(view_id) {
                continue;
            }
            let (Some(camera), Some(pixel)) = (
                scene.view_camera(view_id),
                scene.observation(view_id, track_id),
            ) else {
                continue;
            };
            cameras.push(camera);
            pixels.push(pixel);
        }
        if cameras.len() < 2 {
            return RefineSummary::failure();
        }

        let result = refine_point(&cameras, &pixels, point.truncate() / point.w, &self.options);
        let success = result.converged && result.final_cost <= result.initial_cost;
        if success {
            scene.commit_track_point(track_id, result.point.extend(1.0));
        } else {
            trace!(
                "{track_id}: refinement did not converge after {} iterations",
                result.num_iterations
            );
        }
        RefineSummary {
            success,
            initial_cost: result.initial_cost,
            final_cost: result.final_cost,
            num_iterations: result.num_iterations,
        }
    }
}

pub(crate) struct PointRefinement {
    pub point: DVec3,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub num_iterations: usize,
    pub converged: bool,
}

/// Minimizes the summed squared pixel reprojection error over the 3D point
/// with damped Gauss-Newton steps.
pub(crate) fn refine_point(
    cameras: &[PinholeCamera],
    pixels: &[DVec2],
    initial: DVec3,
    options: &RefinementOptions,
) -> PointRefinement {
    let mut point = initial;
    let initial_cost = reprojection_cost(cameras, pixels, point);
    let mut cost = initial_cost;
    let mut lambda = options.lambda_init;
    let mut num_iterations = 0;
    let mut converged = false;

    if !initial_cost.is_finite() {
        return PointRefinement {
            point,
            initial_cost,
            final_cost: initial_cost,
            num_iterations,
            converged,
        };
    }
    if initial_cost <= options.cost_tolerance {
        converged = true;
    }

    while !converged && num_iterations < options.max_iterations {
        num_iterations += 1;

        let mut hessian = DMat3::ZERO;
        let mut gradient = DVec3::ZERO;
        for (camera, observed) in cameras.iter().zip(pixels) {
            let Some((residual, rows)) = projection_residual(camera, *observed, point) else {
                continue;
            };
            for (r, row) in residual.iter().zip(rows.iter()) {
                hessian += outer(*row, *row);
                gradient += *r * *row;
            }
        }

        let mut damped = hessian;
        damped.x_axis.x *= 1.0 + lambda;
        damped.y_axis.y *= 1.0 + lambda;
        damped.z_axis.z *= 1.0 + lambda;
        if damped.determinant().abs() <= 1e-18 {
            lambda *= options.lambda_scale;
            if lambda > LAMBDA_MAX {
                break;
            }
            continue;
        }

        let step = damped.inverse() * -gradient;
        let candidate = point + step;
        let candidate_cost = reprojection_cost(cameras, pixels, candidate);
        if candidate_cost < cost {
            let decrease = cost - candidate_cost;
            point = candidate;
            cost = candidate_cost;
            lambda = (lambda / options.lambda_scale).max(1e-12);
            if cost <= options.cost_tolerance || decrease <= options.cost_tolerance * (1.0 + cost) {
                converged = true;
            }
        } else {
            lambda *= options.lambda_scale;
            if lambda > LAMBDA_MAX {
                break;
            }
        }
    }

    PointRefinement {
        point,
        initial_cost,
        final_cost: cost,
        num_iterations,
        converged,
    }
}

fn reprojection_cost(cameras: &[PinholeCamera], pixels: &[DVec2], point: DVec3) -> f64 {
    let mut cost = 0.0;
    for (camera, observed) in cameras.iter().zip(pixels) {
        let error = reprojection_error(camera, *observed, point.extend(1.0));
        if !error.is_finite() {
            return f64::INFINITY;
        }
        cost += error * error;
    }
    cost
}

/// Pixel residual of one observation and its 2x3 Jacobian rows with respect
/// to the world point. Observations behind the camera contribute nothing.
fn projection_residual(
    camera: &PinholeCamera,
    observed: DVec2,
    point: DVec3,
) -> Option<([f64; 2], [DVec3; 2])> {
    let rotation = DMat3::from_quat(camera.rotation);
    let p_cam = rotation * (point - camera.center);
    if p_cam.z <= 0.0 {
        return None;
    }

    let fx = camera.intrinsics.fx;
    let fy = camera.intrinsics.fy;
    let inv_z = 1.0 / p_cam.z;
    let u = fx * p_cam.x * inv_z + camera.intrinsics.cx;
    let v = fy * p_cam.y * inv_z + camera.intrinsics.cy;

    let rotation_t = rotation.transpose();
    let row_u = rotation_t * DVec3::new(fx * inv_z, 0.0, -fx * p_cam.x * inv_z * inv_z);
    let row_v = rotation_t * DVec3::new(0.0, fy * inv_z, -fy * p_cam.y * inv_z * inv_z);
    Some(([u - observed.x, v - observed.y], [row_u, row_v]))
}
