//! Offscreen render targets.
//!
//! A [`RenderTarget`] owns one target allocated from a
//! [`GraphicsContext`]. It can hold several color attachments (a G-buffer), an
//! owned depth/stencil buffer, or a depth resource borrowed from another target
//! so two targets depth-test against the same surface.
//!
//! ```text
//!  G-Buffer ──────────────┐            OIT accumulation ─┐
//!   0: colorMetallic      │             0: oitAccum      │
//!   1: normalRoughness    ├─ depth ◀───────────────────── shared
//!   2: positionOcclusion  │            OIT revealage ────┘
//!  (3: emissive)          │             0: oitReveal
//! ```
//!
//! Targets keep their attachment layout for their whole life. Resizing reissues
//! the texture handles, so samplers must be taken again afterwards (see
//! [`RenderTarget::sampler`]).

use glam::UVec2;

use crate::context::{DepthId, GraphicsContext, TargetId, TextureId};
use crate::error::ContextError;
use crate::material::Sampler;

/// Pixel format of a color attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorFormat {
    Rgba8,
    Rgba16Float,
    Rgba32Float,
    R8,
    R16Float,
    R32Float,
}

/// Depth configuration of a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthAttachment {
    None,
    /// Owned depth buffer.
    Depth,
    /// Owned depth buffer with a stencil channel.
    DepthStencil,
    /// Depth resource owned by another target.
    Shared(DepthId),
}

/// Description of a target to allocate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetDesc {
    pub size: UVec2,
    pub colors: Vec<ColorFormat>,
    pub depth: DepthAttachment,
}

impl TargetDesc {
    /// Single color attachment, no depth.
    pub fn color(size: UVec2, format: ColorFormat) -> Self {
        Self {
            size,
            colors: vec![format],
            depth: DepthAttachment::None,
        }
    }

    /// `count` color attachments of the same format, no depth.
    pub fn multi(size: UVec2, count: usize, format: ColorFormat) -> Self {
        Self {
            size,
            colors: vec![format; count],
            depth: DepthAttachment::None,
        }
    }

    pub fn with_depth(mut self, depth: DepthAttachment) -> Self {
        self.depth = depth;
        self
    }
}

/// Handles produced when a target is created or resized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetAllocation {
    pub target: TargetId,
    pub textures: Vec<TextureId>,
    pub depth: Option<DepthId>,
}

/// Pixel rectangle draws are restricted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Viewport covering a whole surface of `size`.
    pub fn full(size: UVec2) -> Self {
        Self {
            x: 0,
            y: 0,
            width: size.x,
            height: size.y,
        }
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }
}

/// An owned, resizable offscreen surface.
///
/// # Example
///
/// ```ignore
/// let mut target = RenderTarget::new(gfx, "Scene", TargetDesc::color(size, ColorFormat::Rgba16Float))?;
///
/// target.bind(gfx);
/// gfx.clear(Vec4::ZERO);
/// // ... draw ...
/// target.unbind(gfx);
///
/// // Later stages read it through a sampler.
/// let input = target.sampler("src", 0);
/// ```
#[derive(Debug)]
pub struct RenderTarget {
    label: String,
    id: TargetId,
    desc: TargetDesc,
    textures: Vec<TextureId>,
    depth: Option<DepthId>,
    viewport: Viewport,
}

impl RenderTarget {
    /// Allocates a target matching `desc`.
    ///
    /// # Errors
    ///
    /// Fails if `desc` has a zero dimension or more color attachments than the
    /// device supports, or if the backend rejects the allocation.
    pub fn new(
        gfx: &mut dyn GraphicsContext,
        label: &str,
        desc: TargetDesc,
    ) -> Result<Self, ContextError> {
        if desc.size.x == 0 || desc.size.y == 0 {
            return Err(ContextError::ZeroSize {
                label: label.to_string(),
            });
        }
        let max = gfx.capabilities().max_color_attachments;
        if desc.colors.len() > max as usize {
            return Err(ContextError::TooManyAttachments {
                label: label.to_string(),
                requested: desc.colors.len(),
                max,
            });
        }

        let allocation = gfx.create_target(label, &desc)?;
        let viewport = Viewport::full(desc.size);
        gfx.set_viewport(allocation.target, viewport);

        Ok(Self {
            label: label.to_string(),
            id: allocation.target,
            textures: allocation.textures,
            depth: allocation.depth,
            viewport,
            desc,
        })
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> UVec2 {
        self.desc.size
    }

    pub fn desc(&self) -> &TargetDesc {
        &self.desc
    }

    /// Number of color attachments. Fixed for the target's lifetime.
    pub fn attachment_count(&self) -> usize {
        self.textures.len()
    }

    /// Current handle of color attachment `index`.
    pub fn texture(&self, index: usize) -> Option<TextureId> {
        self.textures.get(index).copied()
    }

    pub fn textures(&self) -> &[TextureId] {
        &self.textures
    }

    /// Depth resource attached to this target, owned or shared.
    pub fn depth(&self) -> Option<DepthId> {
        self.depth
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Sampler named `name` reading color attachment `index`.
    ///
    /// The sampler is a snapshot: it goes stale when this target is resized.
    pub fn sampler(&self, name: &str, index: usize) -> Option<Sampler> {
        self.texture(index).map(|texture| Sampler::new(name, texture))
    }

    /// Resizes the target, keeping its layout.
    ///
    /// Zero-sized dimensions are ignored (a minimized window reports 0×0) and
    /// leave the current allocation valid. Returns `true` if the target changed.
    /// The viewport is not touched; call [`reset_viewport`](Self::reset_viewport).
    pub fn set_size(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        size: UVec2,
    ) -> Result<bool, ContextError> {
        if size.x == 0 || size.y == 0 || size == self.desc.size {
            return Ok(false);
        }
        let allocation = gfx.resize_target(self.id, size)?;
        self.textures = allocation.textures;
        self.depth = allocation.depth;
        self.desc.size = size;
        Ok(true)
    }

    /// Makes the viewport cover the whole target again.
    pub fn reset_viewport(&mut self, gfx: &mut dyn GraphicsContext) {
        self.viewport = Viewport::full(self.desc.size);
        gfx.set_viewport(self.id, self.viewport);
    }

    /// Resizes and resets the viewport if `size` differs from the current size.
    pub fn ensure_size(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        size: UVec2,
    ) -> Result<bool, ContextError> {
        let resized = self.set_size(gfx, size)?;
        if resized {
            self.reset_viewport(gfx);
        }
        Ok(resized)
    }

    pub fn bind(&self, gfx: &mut dyn GraphicsContext) {
        gfx.bind_target(self.id);
    }

    pub fn unbind(&self, gfx: &mut dyn GraphicsContext) {
        gfx.unbind_target(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingContext;

    #[test]
    fn resize_reissues_textures_and_keeps_layout() {
        let mut gfx = RecordingContext::new();
        let mut target = RenderTarget::new(
            &mut gfx,
            "gbuffer",
            TargetDesc::multi(UVec2::new(800, 600), 3, ColorFormat::Rgba16Float)
                .with_depth(DepthAttachment::DepthStencil),
        )
        .unwrap();
        let before = target.textures().to_vec();

        assert!(target.ensure_size(&mut gfx, UVec2::new(1024, 768)).unwrap());

        assert_eq!(target.attachment_count(), 3);
        assert_eq!(target.size(), UVec2::new(1024, 768));
        assert_eq!(target.viewport(), Viewport::full(UVec2::new(1024, 768)));
        for (old, new) in before.iter().zip(target.textures()) {
            assert_eq!(old.slot, new.slot);
            assert_ne!(old.generation, new.generation);
        }
    }

    #[test]
    fn zero_size_is_ignored() {
        let mut gfx = RecordingContext::new();
        let mut target = RenderTarget::new(
            &mut gfx,
            "scene",
            TargetDesc::color(UVec2::new(64, 64), ColorFormat::Rgba8),
        )
        .unwrap();

        assert!(!target.ensure_size(&mut gfx, UVec2::new(0, 480)).unwrap());
        assert_eq!(target.size(), UVec2::new(64, 64));
    }

    #[test]
    fn rejects_too_many_attachments() {
        let mut gfx = RecordingContext::new();
        let result = RenderTarget::new(
            &mut gfx,
            "wide",
            TargetDesc::multi(UVec2::new(8, 8), 9, ColorFormat::Rgba8),
        );
        assert!(matches!(
            result,
            Err(ContextError::TooManyAttachments { requested: 9, .. })
        ));
    }

    #[test]
    fn shared_depth_is_reported_by_both_targets() {
        let mut gfx = RecordingContext::new();
        let owner = RenderTarget::new(
            &mut gfx,
            "owner",
            TargetDesc::color(UVec2::new(32, 32), ColorFormat::Rgba8)
                .with_depth(DepthAttachment::DepthStencil),
        )
        .unwrap();
        let depth = owner.depth().unwrap();
        let borrower = RenderTarget::new(
            &mut gfx,
            "borrower",
            TargetDesc::color(UVec2::new(32, 32), ColorFormat::R8)
                .with_depth(DepthAttachment::Shared(depth)),
        )
        .unwrap();

        assert_eq!(borrower.depth(), Some(depth));
    }
}
