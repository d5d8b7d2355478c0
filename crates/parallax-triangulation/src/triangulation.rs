//! Triangulation of a single 3D point from multiple posed views.
//!
//! Three numerically distinct strategies are provided: the ray midpoint
//! (fast, least accurate under noise), the smallest right singular vector of
//! the stacked DLT system (better conditioned with more views), and an L2
//! minimization of the total squared reprojection error (most accurate, most
//! expensive). All of them report degenerate viewing geometry as an error so
//! callers can tell a failed solve apart from a low-quality one.

use glam::{DMat3, DVec2, DVec3, DVec4};
use parallax_scene::PinholeCamera;

use crate::refine::{refine_point, RefinementOptions};

/// Tolerance below which a linear system is considered degenerate.
const DEGENERACY_EPS: f64 = 1e-12;

/// Errors returned by the triangulation kernel.
#[derive(Debug, thiserror::Error)]
pub enum TriangulationError {
    /// Fewer observations than the solver needs.
    #[error("triangulation requires at least {required} observations, got {actual}")]
    InsufficientObservations {
        /// Minimum number of observations required.
        required: usize,
        /// Number of observations provided.
        actual: usize,
    },
    /// The per-view inputs disagree in length.
    #[error("mismatched input lengths: {left} vs {right}")]
    MismatchedLengths {
        /// Length of the first input.
        left: usize,
        /// Length of the second input.
        right: usize,
    },
    /// The system is rank deficient, e.g. all viewing rays near parallel.
    #[error("degenerate viewing geometry")]
    DegenerateGeometry,
}

/// Selectable triangulation strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TriangulationMethod {
    /// Point closest to all viewing rays in the least-squares sense.
    #[default]
    Midpoint,
    /// Smallest right singular vector of the stacked DLT system.
    Svd,
    /// Nonlinear minimization of the total squared reprojection error.
    L2Minimization,
}

/// Triangulates a homogeneous 3D point from posed cameras and their pixel
/// observations with the selected method.
pub fn triangulate(
    cameras: &[PinholeCamera],
    pixels: &[DVec2],
    method: TriangulationMethod,
) -> Result<DVec4, TriangulationError> {
    check_observations(cameras.len(), pixels.len())?;
    match method {
        TriangulationMethod::Midpoint => {
            let origins: Vec<DVec3> = cameras.iter().map(|camera| camera.center).collect();
            let directions: Vec<DVec3> = cameras
                .iter()
                .zip(pixels)
                .map(|(camera, pixel)| camera.pixel_to_unit_ray(*pixel))
                .collect();
            triangulate_midpoint(&origins, &directions)
        }
        TriangulationMethod::Svd => triangulate_svd(cameras, pixels),
        TriangulationMethod::L2Minimization => triangulate_l2(cameras, pixels),
    }
}

/// Triangulates the point minimizing the summed squared distance to all
/// viewing rays.
///
/// Solves `sum(I - d dᵀ) x = sum(I - d dᵀ) o` over the unit ray directions
/// `d` and origins `o`. Near-parallel ray bundles make the system singular.
pub fn triangulate_midpoint(
    origins: &[DVec3],
    directions: &[DVec3],
) -> Result<DVec4, TriangulationError> {
    if origins.len() != directions.len() {
        return Err(TriangulationError::MismatchedLengths {
            left: origins.len(),
            right: directions.len(),
        });
    }
    if origins.len() < 2 {
        return Err(TriangulationError::InsufficientObservations {
            required: 2,
            actual: origins.len(),
        });
    }

    let mut a = DMat3::ZERO;
    let mut b = DVec3::ZERO;
    for (origin, direction) in origins.iter().zip(directions) {
        let m = DMat3::IDENTITY - outer(*direction, *direction);
        a += m;
        b += m * *origin;
    }

    if a.determinant().abs() <= DEGENERACY_EPS {
        return Err(TriangulationError::DegenerateGeometry);
    }
    Ok((a.inverse() * b).extend(1.0))
}

/// Triangulates via the homogeneous DLT system stacked over all views.
///
/// Each view contributes the two rows `u P3 - P1` and `v P3 - P2` of its
/// projection matrix; the solution is the right singular vector of the
/// smallest singular value.
pub fn triangulate_svd(
    cameras: &[PinholeCamera],
    pixels: &[DVec2],
) -> Result<DVec4, TriangulationError> {
    check_observations(cameras.len(), pixels.len())?;

    let mut a = faer::Mat::<f64>::zeros(2 * cameras.len(), 4);
    for (i, (camera, pixel)) in cameras.iter().zip(pixels).enumerate() {
        let p = camera.projection_matrix();
        write_dlt_row(&mut a, 2 * i, pixel.x, &p[2], &p[0]);
        write_dlt_row(&mut a, 2 * i + 1, pixel.y, &p[2], &p[1]);
    }

    let svd = a.svd();
    let s = svd.s_diagonal();
    // A unique solution direction needs rank 3; rank <= 2 leaves the
    // nullspace ambiguous.
    if s[0] <= DEGENERACY_EPS || s[2] / s[0] <= DEGENERACY_EPS {
        return Err(TriangulationError::DegenerateGeometry);
    }

    let v = svd.v();
    let xh = v.col(3);
    let w = xh[3];
    if !w.is_finite() || w.abs() <= DEGENERACY_EPS {
        return Err(TriangulationError::DegenerateGeometry);
    }
    Ok(DVec4::new(xh[0], xh[1], xh[2], w))
}

/// Triangulates by minimizing the total squared pixel reprojection error,
/// starting from the linear DLT solution.
pub fn triangulate_l2(
    cameras: &[PinholeCamera],
    pixels: &[DVec2],
) -> Result<DVec4, TriangulationError> {
    let initial = triangulate_svd(cameras, pixels)?;
    let refined = refine_point(
        cameras,
        pixels,
        initial.truncate() / initial.w,
        &RefinementOptions::default(),
    );
    Ok(refined.point.extend(1.0))
}

/// Angle in degrees between the two viewing rays from `center1` and
/// `center2` through the homogeneous point.
///
/// Returns 0 when either ray is too short to define a direction, so
/// coincident centers read as "no baseline".
pub fn ray_angle_degrees(center1: DVec3, center2: DVec3, point: DVec4) -> f64 {
    if point.w.abs() <= DEGENERACY_EPS {
        return 0.0;
    }
    let p = point.truncate() / point.w;
    let ray1 = p - center1;
    let ray2 = p - center2;
    let n1 = ray1.length();
    let n2 = ray2.length();
    if n1 <= 1e-12 || n2 <= 1e-12 {
        return 0.0;
    }
    let cos_angle = (ray1.dot(ray2) / (n1 * n2)).clamp(-1.0, 1.0);
    cos_angle.acos().to_degrees()
}

/// Pixel distance between the observed feature and the projection of the
/// point into the camera.
///
/// Points behind the camera or with a non-finite projection report an
/// infinite error, which fails any threshold.
pub fn reprojection_error(camera: &PinholeCamera, observed: DVec2, point: DVec4) -> f64 {
    let (pixel, depth) = camera.project_point(point);
    if depth <= 0.0 || !pixel.is_finite() {
        return f64::INFINITY;
    }
    pixel.distance(observed)
}

pub(crate) fn outer(a: DVec3, b: DVec3) -> DMat3 {
    DMat3::from_cols(a * b.x, a * b.y, a * b.z)
}

fn check_observations(cameras: usize, pixels: usize) -> Result<(), TriangulationError> {
    if cameras != pixels {
        return Err(TriangulationError::MismatchedLengths {
            left: cameras,
            right: pixels,
        });
    }
    if cameras < 2 {
        return Err(TriangulationError::InsufficientObservations {
            required: 2,
            actual: cameras,
        });
    }
    Ok(())
}

fn write_dlt_row(a: &mut faer::Mat<f64>, row: usize, coord: f64, p3: &[f64; 4], pk: &[f64; 4]) {
    for j in 0..4 {
        a.write(row, j, coord * p3[j] - pk[j]);
    }
}
