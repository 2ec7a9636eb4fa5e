//! # Strata
//!
//! **Composable render stages for deferred rendering.**
//!
//! Strata orchestrates a frame as a tree of stages: a post-process stage owns a
//! pair of ping-pong buffers, the deferred stage inside it owns a G-buffer and
//! the transparency targets, and small pass stages fill and consume them in
//! order. Drawables are grouped by shader and material so each frame binds as
//! little as possible.
//!
//! The crate never talks to a graphics API directly. Everything goes through a
//! [`GraphicsContext`]; a headless recording backend and a wgpu backend ship in
//! [`backend`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use strata::backend::recording::RecordingContext;
//! use strata::*;
//!
//! let mut engine = Engine::new(EngineOptions::default().with_ssao(true));
//! let camera = engine.add_deferred_camera(
//!     Camera::new()
//!         .at(0.0, 1.0, 5.0)
//!         .looking_at(0.0, 0.0, 0.0)
//!         .with_target(CameraTarget::screen(1280, 720)),
//! );
//!
//! let mut scene = EcsScene::new();
//! let material = Arc::new(Material::new(RenderType::Pbr).with_definition("SHADER", "pbr"));
//! scene.spawn(
//!     Drawable::new(DrawableId(1), MeshId(0), material),
//!     Aabb::from_center(Vec3::ZERO, Vec3::splat(0.5)),
//! );
//!
//! let mut gfx = RecordingContext::new();
//! engine.render_frame(&mut gfx, &scene).unwrap();
//! engine.resize(camera, UVec2::new(1920, 1080));
//! engine.render_frame(&mut gfx, &scene).unwrap();
//! ```
//!
//! ## Layout
//!
//! - [`stage`]: the stage tree, post-processing and the deferred pipeline
//! - [`batch`]: shader/material grouping and the views that draw it
//! - [`target`]: resizable offscreen targets with shared depth
//! - [`backend`]: [`GraphicsContext`] implementations

pub mod backend;
pub mod batch;
mod camera;
mod context;
mod engine;
mod error;
mod geometry;
mod material;
mod options;
mod scene;
pub mod stage;
mod target;

pub use camera::{Camera, CameraTarget, Frustum};
pub use context::{
    BlendMode, Capabilities, DepthId, GraphicsContext, MeshId, RasterState, ShaderId, TargetId,
    TextureId,
};
pub use engine::{CameraHandle, Engine};
pub use error::{BindError, ContextError, OptionsError, StageError};
pub use geometry::{Aabb, RawGeometry, TexCoords, Vertex3d, project_tex_coords};
pub use material::{
    Material, MaterialId, RenderType, Sampler, ShaderSignature, Transparency, UniformValue,
    Uniforms,
};
pub use options::EngineOptions;
pub use scene::{Bounds, Drawable, DrawableId, EcsScene, Layer, SceneQuery};
pub use target::{
    ColorFormat, DepthAttachment, RenderTarget, TargetAllocation, TargetDesc, Viewport,
};

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, UVec2, Vec2, Vec3, Vec4};

// ECS support
pub use hecs::{Entity, World};
