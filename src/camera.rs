//! Cameras and view frustums.
//!
//! Camera pose comes from outside the pipeline (input handling, XR tracking).
//! What the pipeline reads from a [`Camera`] is its frustum, its layer mask and
//! its current render target, which post-process stages repoint while their
//! generator renders.

use glam::{Mat4, UVec2, Vec3, Vec4};

use crate::context::TargetId;
use crate::geometry::Aabb;

/// The surface a camera currently renders into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraTarget {
    pub id: TargetId,
    pub size: UVec2,
}

impl CameraTarget {
    /// The host surface at the given size.
    pub fn screen(width: u32, height: u32) -> Self {
        Self {
            id: TargetId::SCREEN,
            size: UVec2::new(width, height),
        }
    }

    pub fn is_zero_sized(&self) -> bool {
        self.size.x == 0 || self.size.y == 0
    }
}

/// Six clip planes, normals pointing inward.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Extracts the planes of a view-projection matrix with a `[0, 1]` depth
    /// range (the convention of `Mat4::perspective_rh`).
    pub fn from_view_projection(m: &Mat4) -> Self {
        let r0 = m.row(0);
        let r1 = m.row(1);
        let r2 = m.row(2);
        let r3 = m.row(3);
        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2].map(|p| {
            let len = p.truncate().length();
            if len > 0.0 { p / len } else { p }
        });
        Self { planes }
    }

    pub fn planes(&self) -> &[Vec4; 6] {
        &self.planes
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|p| p.truncate().dot(point) + p.w >= 0.0)
    }

    /// Conservative box test: `false` only if the box is fully outside one plane.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        if aabb.is_empty() {
            return false;
        }
        self.planes.iter().all(|p| {
            let normal = p.truncate();
            let positive = Vec3::new(
                if normal.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if normal.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if normal.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );
            normal.dot(positive) + p.w >= 0.0
        })
    }
}

/// A perspective camera.
///
/// # Example
///
/// ```ignore
/// let camera = Camera::new()
///     .at(0.0, 2.0, 8.0)
///     .looking_at(0.0, 0.0, 0.0)
///     .with_fov(60.0)
///     .with_layer_mask(LAYER_WORLD | LAYER_EFFECTS);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    /// Only drawables whose layer bits intersect this mask are visible.
    pub layer_mask: u32,
    /// Where the camera renders this frame. Post-process stages swap this out
    /// while their generator runs and restore it afterwards.
    pub target: CameraTarget,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_2,
            near: 0.1,
            far: 1000.0,
            layer_mask: u32::MAX,
            target: CameraTarget::screen(800, 600),
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position = Vec3::new(x, y, z);
        self
    }

    pub fn looking_at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.forward = (Vec3::new(x, y, z) - self.position).normalize_or_zero();
        self
    }

    pub fn with_fov(mut self, fov_degrees: f32) -> Self {
        self.fov = fov_degrees.to_radians();
        self
    }

    pub fn with_layer_mask(mut self, mask: u32) -> Self {
        self.layer_mask = mask;
        self
    }

    pub fn with_target(mut self, target: CameraTarget) -> Self {
        self.target = target;
        self
    }

    pub fn viewport_size(&self) -> UVec2 {
        self.target.size
    }

    pub fn aspect(&self) -> f32 {
        let size = self.target.size;
        if size.y == 0 {
            1.0
        } else {
            size.x as f32 / size.y as f32
        }
    }

    pub fn right(&self) -> Vec3 {
        self.forward.cross(self.up).normalize_or_zero()
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect(), self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box_at(z: f32) -> Aabb {
        Aabb::from_center(Vec3::new(0.0, 0.0, z), Vec3::splat(0.5))
    }

    #[test]
    fn frustum_accepts_boxes_in_front() {
        let camera = Camera::new().at(0.0, 0.0, 0.0);
        let frustum = camera.frustum();
        assert!(frustum.intersects_aabb(&unit_box_at(-5.0)));
        assert!(frustum.contains_point(Vec3::new(0.0, 0.0, -5.0)));
    }

    #[test]
    fn frustum_rejects_boxes_behind_and_beyond() {
        let camera = Camera::new().at(0.0, 0.0, 0.0);
        let frustum = camera.frustum();
        assert!(!frustum.intersects_aabb(&unit_box_at(5.0)));
        assert!(!frustum.intersects_aabb(&unit_box_at(-2000.0)));
        assert!(!frustum.intersects_aabb(&Aabb::from_center(
            Vec3::new(500.0, 0.0, -5.0),
            Vec3::splat(0.5)
        )));
    }

    #[test]
    fn frustum_keeps_boxes_straddling_a_plane() {
        let camera = Camera::new().at(0.0, 0.0, 0.0);
        // 90° fov: the left plane at z = -5 sits at x = -5 * aspect.
        let straddling = Aabb::from_center(Vec3::new(-6.6, 0.0, -5.0), Vec3::splat(0.5));
        assert!(camera.frustum().intersects_aabb(&straddling));
    }

    #[test]
    fn looking_at_normalizes_forward() {
        let camera = Camera::new().at(0.0, 0.0, 10.0).looking_at(0.0, 0.0, 0.0);
        assert!((camera.forward - Vec3::NEG_Z).length() < 1e-6);
    }
}
