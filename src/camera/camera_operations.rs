//! Camera operations - Pure DOP functions
//!
//! All functions are pure: they take data, return new data, no side effects.

use super::camera_data::CameraData;
use crate::renderer::gpu_culling::Frustum;
use cgmath::{InnerSpace, Matrix4, Rad, Vector3};

// ============================================================================
// INITIALIZATION
// ============================================================================

/// Initialize camera at a position looking along yaw/pitch
pub fn init_camera(position: cgmath::Point3<f32>, yaw: f32, pitch: f32) -> CameraData {
    CameraData {
        position,
        yaw_radians: yaw,
        pitch_radians: pitch,
        ..Default::default()
    }
}

// ============================================================================
// VIEW/PROJECTION MATRICES
// ============================================================================

/// Build view matrix from camera data
pub fn build_view_matrix(camera: &CameraData) -> Matrix4<f32> {
    let forward = calculate_forward_vector(camera.yaw_radians, camera.pitch_radians);
    let target = camera.position + forward;
    let up = Vector3::new(0.0, 1.0, 0.0);

    Matrix4::look_at_rh(camera.position, target, up)
}

/// Build projection matrix from camera data
pub fn build_projection_matrix(camera: &CameraData) -> Matrix4<f32> {
    cgmath::perspective(
        Rad(camera.fov_radians),
        camera.aspect_ratio,
        camera.near_plane,
        camera.far_plane,
    )
}

pub fn build_view_projection(camera: &CameraData) -> Matrix4<f32> {
    build_projection_matrix(camera) * build_view_matrix(camera)
}

/// Six normalized clip planes for the camera, ready for `FrustumCuller::cull`
pub fn camera_frustum(camera: &CameraData) -> Frustum {
    Frustum::from_view_projection(&build_view_projection(camera))
}

// ============================================================================
// UTILITIES
// ============================================================================

/// Calculate forward vector from yaw and pitch
pub fn calculate_forward_vector(yaw: f32, pitch: f32) -> Vector3<f32> {
    Vector3::new(
        yaw.cos() * pitch.cos(),
        pitch.sin(),
        yaw.sin() * pitch.cos(),
    )
    .normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Point3;

    #[test]
    fn test_forward_vector_at_zero_yaw() {
        let forward = calculate_forward_vector(0.0, 0.0);
        assert!((forward.x - 1.0).abs() < 1e-6);
        assert!(forward.y.abs() < 1e-6);
        assert!(forward.z.abs() < 1e-6);
    }

    #[test]
    fn test_camera_frustum_contains_point_ahead() {
        let camera = init_camera(Point3::new(0.0, 0.0, 0.0), 0.0, 0.0);
        let frustum = camera_frustum(&camera);

        assert!(frustum.intersects_sphere([10.0, 0.0, 0.0], 0.0));
        assert!(!frustum.intersects_sphere([-10.0, 0.0, 0.0], 0.0));
        // Beyond the far plane
        assert!(!frustum.intersects_sphere([2000.0, 0.0, 0.0], 0.0));
    }

    #[test]
    fn test_camera_frustum_radius_is_conservative() {
        let camera = init_camera(Point3::new(0.0, 0.0, 0.0), 0.0, 0.0);
        let frustum = camera_frustum(&camera);

        // Just behind the near plane: the point is outside, its sphere is not
        assert!(!frustum.intersects_sphere([0.1, 0.0, 0.0], 0.0));
        assert!(frustum.intersects_sphere([0.1, 0.0, 0.0], 1.0));
    }
}
