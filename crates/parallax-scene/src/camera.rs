//! Calibrated pinhole camera with a world-to-camera pose.

use glam::{DMat3, DQuat, DVec2, DVec3, DVec4};

/// Focal lengths and principal point of a pinhole camera, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length along x in pixels.
    pub fx: f64,
    /// Focal length along y in pixels.
    pub fy: f64,
    /// Principal point x coordinate in pixels.
    pub cx: f64,
    /// Principal point y coordinate in pixels.
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Creates intrinsics from focal lengths and a principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Returns the 3x3 calibration matrix.
    pub fn matrix(&self) -> DMat3 {
        DMat3::from_cols(
            DVec3::new(self.fx, 0.0, 0.0),
            DVec3::new(0.0, self.fy, 0.0),
            DVec3::new(self.cx, self.cy, 1.0),
        )
    }
}

/// A calibrated, posed pinhole camera.
///
/// `rotation` maps world coordinates into the camera frame and `center` is
/// the camera position in world coordinates, so a world point `p` lands at
/// `rotation * (p - center)` in camera coordinates.
#[derive(Debug, Clone, Copy)]
pub struct PinholeCamera {
    /// World-to-camera rotation.
    pub rotation: DQuat,
    /// Camera center in world coordinates.
    pub center: DVec3,
    /// Calibration parameters.
    pub intrinsics: CameraIntrinsics,
}

impl PinholeCamera {
    /// Creates a camera from a world-to-camera rotation, a center and intrinsics.
    pub fn new(rotation: DQuat, center: DVec3, intrinsics: CameraIntrinsics) -> Self {
        Self {
            rotation,
            center,
            intrinsics,
        }
    }

    /// Creates a camera at `center` whose optical axis points at `target`.
    ///
    /// `up` picks the image orientation and must not be parallel to the
    /// viewing direction.
    pub fn look_at(center: DVec3, target: DVec3, up: DVec3, intrinsics: CameraIntrinsics) -> Self {
        let z = (target - center).normalize();
        let x = up.cross(z).normalize();
        let y = z.cross(x);
        let world_to_camera = DMat3::from_cols(x, y, z).transpose();
        Self::new(DQuat::from_mat3(&world_to_camera), center, intrinsics)
    }

    /// Projects a homogeneous world point into the image.
    ///
    /// Returns the pixel position and the depth of the point along the
    /// optical axis; a depth <= 0 means the point lies behind the camera.
    pub fn project_point(&self, point: DVec4) -> (DVec2, f64) {
        let p_cam = self.rotation * (point.truncate() - point.w * self.center);
        let depth = if point.w.abs() > f64::EPSILON {
            p_cam.z / point.w
        } else {
            p_cam.z
        };
        let pixel = DVec2::new(
            self.intrinsics.fx * p_cam.x / p_cam.z + self.intrinsics.cx,
            self.intrinsics.fy * p_cam.y / p_cam.z + self.intrinsics.cy,
        );
        (pixel, depth)
    }

    /// Returns the unit viewing ray through `pixel`, in world coordinates.
    pub fn pixel_to_unit_ray(&self, pixel: DVec2) -> DVec3 {
        let dir_cam = DVec3::new(
            (pixel.x - self.intrinsics.cx) / self.intrinsics.fx,
            (pixel.y - self.intrinsics.cy) / self.intrinsics.fy,
            1.0,
        );
        (self.rotation.inverse() * dir_cam).normalize()
    }

    /// Returns the 3x4 projection matrix `K [R | -R c]` as row arrays.
    pub fn projection_matrix(&self) -> [[f64; 4]; 3] {
        let rotation = DMat3::from_quat(self.rotation);
        let m = self.intrinsics.matrix() * rotation;
        let t = m * -self.center;
        let r0 = m.row(0);
        let r1 = m.row(1);
        let r2 = m.row(2);
        [
            [r0.x, r0.y, r0.z, t.x],
            [r1.x, r1.y, r1.z, t.y],
            [r2.x, r2.y, r2.z, t.z],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::new(500.0, 500.0, 320.0, 240.0)
    }

    #[test]
    fn project_point_on_axis_hits_principal_point() {
        let camera = PinholeCamera::new(DQuat::IDENTITY, DVec3::ZERO, intrinsics());
        let (pixel, depth) = camera.project_point(DVec4::new(0.0, 0.0, 5.0, 1.0));
        assert_relative_eq!(pixel.x, 320.0, epsilon = 1e-12);
        assert_relative_eq!(pixel.y, 240.0, epsilon = 1e-12);
        assert_relative_eq!(depth, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn project_point_behind_camera_has_negative_depth() {
        let camera = PinholeCamera::new(DQuat::IDENTITY, DVec3::ZERO, intrinsics());
        let (_, depth) = camera.project_point(DVec4::new(0.0, 0.0, -3.0, 1.0));
        assert!(depth < 0.0);
    }

    #[test]
    fn project_point_is_scale_invariant() {
        let camera = PinholeCamera::look_at(
            DVec3::new(1.0, -2.0, 0.5),
            DVec3::new(0.0, 0.0, 10.0),
            DVec3::Y,
            intrinsics(),
        );
        let (p1, d1) = camera.project_point(DVec4::new(0.3, -0.1, 8.0, 1.0));
        let (p2, d2) = camera.project_point(DVec4::new(0.6, -0.2, 16.0, 2.0));
        assert_relative_eq!(p1.x, p2.x, epsilon = 1e-9);
        assert_relative_eq!(p1.y, p2.y, epsilon = 1e-9);
        assert_relative_eq!(d1, d2, epsilon = 1e-9);
    }

    #[test]
    fn pixel_to_unit_ray_inverts_projection() {
        let camera = PinholeCamera::look_at(
            DVec3::new(2.0, 1.0, -3.0),
            DVec3::ZERO,
            DVec3::Y,
            intrinsics(),
        );
        let point = DVec3::new(0.4, -0.3, 2.0);
        let (pixel, depth) = camera.project_point(point.extend(1.0));
        assert!(depth > 0.0);

        let ray = camera.pixel_to_unit_ray(pixel);
        let expected = (point - camera.center).normalize();
        assert_relative_eq!(ray.x, expected.x, epsilon = 1e-9);
        assert_relative_eq!(ray.y, expected.y, epsilon = 1e-9);
        assert_relative_eq!(ray.z, expected.z, epsilon = 1e-9);
    }

    #[test]
    fn projection_matrix_matches_project_point() {
        let camera = PinholeCamera::look_at(
            DVec3::new(-1.0, 0.5, 2.0),
            DVec3::new(0.0, 0.0, 6.0),
            DVec3::Y,
            intrinsics(),
        );
        let point = DVec4::new(0.2, 0.7, 5.0, 1.0);
        let p = camera.projection_matrix();
        let mut projected = [0.0; 3];
        for (row, out) in p.iter().zip(projected.iter_mut()) {
            *out = row[0] * point.x + row[1] * point.y + row[2] * point.z + row[3] * point.w;
        }
        let (pixel, _) = camera.project_point(point);
        assert_relative_eq!(projected[0] / projected[2], pixel.x, epsilon = 1e-9);
        assert_relative_eq!(projected[1] / projected[2], pixel.y, epsilon = 1e-9);
    }
}
