//! Drawables and the visibility query the pipeline consumes.
//!
//! The scene graph itself is not part of this crate. The deferred stage only
//! asks a [`SceneQuery`] for the drawables inside a camera frustum. [`EcsScene`]
//! is a small `hecs`-backed implementation for hosts that don't bring their own.
//!
//! # Example
//!
//! ```ignore
//! let mut scene = EcsScene::new();
//! let material = Arc::new(Material::new(RenderType::Pbr));
//!
//! scene.spawn(
//!     Drawable::new(DrawableId(1), MeshId(0), material.clone())
//!         .with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0))),
//!     Aabb::from_center(Vec3::ZERO, Vec3::splat(0.5)),
//! );
//! ```

use std::sync::Arc;

use glam::Mat4;

use crate::camera::Frustum;
use crate::context::MeshId;
use crate::geometry::Aabb;
use crate::material::Material;

/// Stable drawable identity, used to detect when a visible set changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawableId(pub u64);

/// A mesh placed in the world with a material.
///
/// Cheap to clone: the material is shared.
#[derive(Clone, Debug)]
pub struct Drawable {
    pub id: DrawableId,
    pub mesh: MeshId,
    pub transform: Mat4,
    pub material: Arc<Material>,
}

impl Drawable {
    pub fn new(id: DrawableId, mesh: MeshId, material: Arc<Material>) -> Self {
        Self {
            id,
            mesh,
            transform: Mat4::IDENTITY,
            material,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }
}

/// Model-space bounds of a drawable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds(pub Aabb);

/// Layer bits of a drawable. Entities without one are on layer 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layer(pub u32);

impl Default for Layer {
    fn default() -> Self {
        Layer(1)
    }
}

/// Visibility query.
pub trait SceneQuery {
    /// Replaces the contents of `out` with the drawables intersecting `frustum`
    /// whose layer bits intersect `layer_mask`.
    ///
    /// Implementations should reuse `out`'s allocation. Ordering is unspecified;
    /// identity must be stable across calls.
    fn frustum_cast(&self, frustum: &Frustum, layer_mask: u32, out: &mut Vec<Drawable>);
}

/// A `hecs` world of `(Drawable, Bounds, Layer)` entities.
pub struct EcsScene {
    world: hecs::World,
}

impl EcsScene {
    pub fn new() -> Self {
        Self {
            world: hecs::World::new(),
        }
    }

    /// Adds a drawable on the default layer.
    pub fn spawn(&mut self, drawable: Drawable, bounds: Aabb) -> hecs::Entity {
        self.world.spawn((drawable, Bounds(bounds), Layer::default()))
    }

    /// Adds a drawable on specific layers.
    pub fn spawn_on(&mut self, drawable: Drawable, bounds: Aabb, layer: Layer) -> hecs::Entity {
        self.world.spawn((drawable, Bounds(bounds), layer))
    }

    pub fn despawn(&mut self, entity: hecs::Entity) -> bool {
        self.world.despawn(entity).is_ok()
    }

    pub fn len(&self) -> usize {
        self.world.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.world.len() == 0
    }

    pub fn world(&self) -> &hecs::World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut hecs::World {
        &mut self.world
    }
}

impl Default for EcsScene {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneQuery for EcsScene {
    fn frustum_cast(&self, frustum: &Frustum, layer_mask: u32, out: &mut Vec<Drawable>) {
        out.clear();
        for (_, (drawable, bounds, layer)) in self
            .world
            .query::<(&Drawable, &Bounds, Option<&Layer>)>()
            .iter()
        {
            let layer = layer.copied().unwrap_or_default();
            if layer.0 & layer_mask == 0 {
                continue;
            }
            if frustum.intersects_aabb(&bounds.0.transformed(&drawable.transform)) {
                out.push(drawable.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::material::RenderType;
    use glam::Vec3;

    fn drawable_at(id: u64, z: f32) -> Drawable {
        Drawable::new(
            DrawableId(id),
            MeshId(0),
            Arc::new(Material::new(RenderType::Pbr)),
        )
        .with_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, z)))
    }

    fn unit_bounds() -> Aabb {
        Aabb::from_center(Vec3::ZERO, Vec3::splat(0.5))
    }

    #[test]
    fn frustum_cast_filters_by_visibility() {
        let mut scene = EcsScene::new();
        scene.spawn(drawable_at(1, -5.0), unit_bounds());
        scene.spawn(drawable_at(2, 5.0), unit_bounds());

        let camera = Camera::new().at(0.0, 0.0, 0.0);
        let mut out = Vec::new();
        scene.frustum_cast(&camera.frustum(), camera.layer_mask, &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, DrawableId(1));
    }

    #[test]
    fn frustum_cast_filters_by_layer() {
        let mut scene = EcsScene::new();
        scene.spawn_on(drawable_at(1, -5.0), unit_bounds(), Layer(0b01));
        scene.spawn_on(drawable_at(2, -6.0), unit_bounds(), Layer(0b10));

        let camera = Camera::new().at(0.0, 0.0, 0.0).with_layer_mask(0b10);
        let mut out = Vec::new();
        scene.frustum_cast(&camera.frustum(), camera.layer_mask, &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, DrawableId(2));
    }

    #[test]
    fn frustum_cast_reuses_the_output_list() {
        let mut scene = EcsScene::new();
        scene.spawn(drawable_at(1, -5.0), unit_bounds());

        let camera = Camera::new().at(0.0, 0.0, 0.0);
        let mut out = Vec::with_capacity(16);
        out.push(drawable_at(99, 0.0));
        scene.frustum_cast(&camera.frustum(), camera.layer_mask, &mut out);

        assert_eq!(out.len(), 1);
        assert!(out.capacity() >= 16);
    }
}
