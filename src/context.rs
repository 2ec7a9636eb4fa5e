//! The graphics capability object every stage draws through.
//!
//! [`GraphicsContext`] is deliberately small and immediate-mode: bind a target,
//! pick a shader, bind a material, draw. Stages never see a concrete API. The
//! crate ships two implementations:
//!
//! - [`RecordingContext`](crate::backend::recording::RecordingContext), a headless
//!   backend that records and validates every call
//! - [`WgpuContext`](crate::backend::wgpu::WgpuContext), which turns the calls into
//!   wgpu render passes
//!
//! Handles returned by a context are plain copyable ids. Texture handles carry a
//! generation that changes whenever their target is resized, so a sampler taken
//! before a resize is detectably stale afterwards.

use glam::{Mat4, UVec2, Vec3, Vec4};

use crate::error::{BindError, ContextError};
use crate::material::{Sampler, ShaderSignature, Uniforms};
use crate::target::{TargetAllocation, TargetDesc, Viewport};

/// Handle to a render target owned by a [`GraphicsContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u32);

impl TargetId {
    /// The host surface (window back buffer, XR layer, ...). Always bindable.
    pub const SCREEN: TargetId = TargetId(0);

    pub fn is_screen(self) -> bool {
        self == Self::SCREEN
    }
}

/// Handle to one color attachment of a render target.
///
/// `generation` increases every time the owning target is resized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId {
    pub slot: u32,
    pub generation: u32,
}

impl TextureId {
    pub fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }
}

/// Handle to a depth (or depth/stencil) resource. Several targets may attach
/// the same one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthId(pub u32);

/// Handle to a linked shader program or one of its variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

/// Handle to mesh geometry uploaded by an external loader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

/// How fragment output combines with what is already in the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Overwrite.
    Replace,
    /// Standard premultiplied-free alpha blending.
    Alpha,
    /// `dst + src`. Used for emissive and OIT accumulation.
    Additive,
    /// `dst * (1 - src)`. Used for OIT revealage.
    Revealage,
}

/// Fixed-function state applied to subsequent draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub cull_back_faces: bool,
    pub blend: BlendMode,
}

impl RasterState {
    /// Depth-tested, depth-writing, back-face culled geometry.
    pub const OPAQUE: RasterState = RasterState {
        depth_test: true,
        depth_write: true,
        cull_back_faces: true,
        blend: BlendMode::Replace,
    };

    /// Screen-aligned quads: no depth, no culling.
    pub const FULLSCREEN: RasterState = RasterState {
        depth_test: false,
        depth_write: false,
        cull_back_faces: false,
        blend: BlendMode::Replace,
    };

    /// Screen-aligned quads added on top of the target.
    pub const FULLSCREEN_ADDITIVE: RasterState = RasterState {
        blend: BlendMode::Additive,
        ..Self::FULLSCREEN
    };

    /// Screen-aligned quads alpha-blended over the target.
    pub const FULLSCREEN_ALPHA: RasterState = RasterState {
        blend: BlendMode::Alpha,
        ..Self::FULLSCREEN
    };

    /// Forward geometry tested against and written into opaque depth.
    pub const FORWARD: RasterState = RasterState {
        depth_test: true,
        depth_write: true,
        cull_back_faces: true,
        blend: BlendMode::Alpha,
    };

    /// Transparent geometry tested (not written) against opaque depth, summed.
    pub const OIT_ACCUMULATE: RasterState = RasterState {
        depth_test: true,
        depth_write: false,
        cull_back_faces: false,
        blend: BlendMode::Additive,
    };

    /// Transparent geometry tested against opaque depth, multiplying revealage.
    pub const OIT_REVEALAGE: RasterState = RasterState {
        blend: BlendMode::Revealage,
        ..Self::OIT_ACCUMULATE
    };
}

/// Device limits a stage may need to respect when allocating targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub max_color_attachments: u32,
    pub max_texture_dimension: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            max_color_attachments: 8,
            max_texture_dimension: 8192,
        }
    }
}

/// Immediate-mode drawing interface implemented by each backend.
///
/// Calls are made from a single thread, in frame order. A backend may buffer
/// them (the wgpu backend records pass segments) as long as the observable
/// result matches issuing them in order.
pub trait GraphicsContext {
    /// Device limits.
    fn capabilities(&self) -> Capabilities;

    /// Allocates a render target. The returned allocation lists one texture per
    /// color attachment in descriptor order.
    fn create_target(
        &mut self,
        label: &str,
        desc: &TargetDesc,
    ) -> Result<TargetAllocation, ContextError>;

    /// Resizes a target in place, keeping its attachment layout. Owned depth is
    /// resized with it; a shared depth resource is left to its owner. Every color
    /// texture handle is reissued with a new generation.
    fn resize_target(
        &mut self,
        target: TargetId,
        size: UVec2,
    ) -> Result<TargetAllocation, ContextError>;

    /// Sets the region of `target` subsequent draws write to.
    fn set_viewport(&mut self, target: TargetId, viewport: Viewport);

    /// Makes `target` the destination for subsequent clears and draws.
    fn bind_target(&mut self, target: TargetId);

    /// Ends drawing into `target`.
    fn unbind_target(&mut self, target: TargetId);

    /// Clears color of the bound target, and its depth if the target owns it.
    /// A shared depth resource keeps its contents.
    fn clear(&mut self, color: Vec4);

    /// Sets fixed-function state for subsequent draws.
    fn set_raster_state(&mut self, state: RasterState);

    /// Sets the camera block shared by every program for the rest of the frame.
    fn set_camera(&mut self, view_projection: &Mat4, position: Vec3);

    /// Resolves a built-in program by name.
    fn program(&mut self, name: &str) -> Option<ShaderId>;

    /// Picks the variant of `base` compiled for `signature`. Returns `None` while
    /// the variant is not linked yet.
    fn select_shader(&mut self, base: ShaderId, signature: &ShaderSignature) -> Option<ShaderId>;

    /// Makes `shader` current.
    fn use_shader(&mut self, shader: ShaderId);

    /// Uploads uniform values for `shader`.
    fn bind_uniforms(&mut self, shader: ShaderId, uniforms: &Uniforms) -> Result<(), BindError>;

    /// Binds textures by sampler name for `shader`.
    fn bind_samplers(&mut self, shader: ShaderId, samplers: &[Sampler]) -> Result<(), BindError>;

    /// Draws mesh geometry with the current shader.
    fn draw_mesh(&mut self, mesh: MeshId, transform: &Mat4);

    /// Draws a quad covering the bound target's viewport with the current shader.
    fn draw_fullscreen_quad(&mut self);
}
