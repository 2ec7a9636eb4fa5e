//! The main deferred stage.
//!
//! Runs inside a [`PostProcessStage`](crate::stage::PostProcessStage), whose
//! ping-pong buffers it lights and composites into. Its children run in a fixed
//! order:
//!
//! ```text
//! shadow-maps      depth of opaque geometry from the light
//! gbuffer          opaque geometry into the G-buffer
//! ssao             occlusion from G-buffer positions           (optional)
//! bind-dst ─┐
//! lighting  │      G-buffer ─▶ lit HDR image
//! unbind-dst┘      swap: the lit image becomes src
//! bind-dst ─┐
//! background│      clear color (skipped while immersive)
//! tonemap   │      src ─▶ display range
//! emissive  │      emissive attachment, added                   (optional)
//! unlit     │      forward, unlit materials, composited
//! custom    │      forward, custom materials, composited
//! transparent      weighted blended OIT, composited
//! unbind-dst┘      swap
//! ```
//!
//! Everything the children share (G-buffer, OIT targets, shadow map, occlusion
//! buffer, the visible drawables and their batches) lives in
//! [`DeferredShared`], owned by this stage and lent to its children each frame.

mod passes;

use glam::UVec2;
use log::{debug, info, warn};

use crate::batch::RendererOrganizer;
use crate::context::GraphicsContext;
use crate::error::{ContextError, StageError};
use crate::material::Sampler;
use crate::options::EngineOptions;
use crate::scene::Drawable;
use crate::stage::hooks::{FrameContext, FrameEvent, StageHooks, StageKind, StartContext};
use crate::stage::post_process::{PostProcessStage, SOURCE_SAMPLER};
use crate::stage::RenderStage;
use crate::target::{ColorFormat, DepthAttachment, RenderTarget, TargetDesc};

pub use passes::{
    BackgroundStage, BindDst, EmissiveStage, ForwardStage, GBufferStage, LightingStage,
    ShadowMapStage, SsaoStage, TonemapStage, TransparentStage, UnbindDst,
};

/// G-buffer attachment names, in attachment order.
pub const GBUFFER_SAMPLERS: [&str; 3] = ["colorMetallic", "normalRoughness", "positionOcclusion"];
pub const EMISSIVE_SAMPLER: &str = "emissive";
pub const AMBIENT_SAMPLER: &str = "ambientBuffer";
pub const OIT_ACCUM_SAMPLER: &str = "oitAccum";
pub const OIT_REVEAL_SAMPLER: &str = "oitReveal";
pub const SHADOW_SAMPLER: &str = "shadowMap";
pub const OCCLUSION_SAMPLER: &str = "occlusion";

/// Index of the G-buffer position attachment.
pub const POSITION_ATTACHMENT: usize = 2;

const NAME: &str = "deferred";

/// Targets and per-frame data shared by the deferred stage's children.
#[derive(Debug)]
pub struct DeferredShared {
    size: UVec2,
    gbuffer: RenderTarget,
    gbuffer_samplers: Vec<Sampler>,
    oit_accum: RenderTarget,
    oit_reveal: RenderTarget,
    oit_samplers: Vec<Sampler>,
    forward: RenderTarget,
    forward_sampler: Option<Sampler>,
    shadow_map: Option<RenderTarget>,
    occlusion: Option<RenderTarget>,
    visible: Vec<Drawable>,
    organizer: RendererOrganizer,
}

impl DeferredShared {
    /// Allocates every target the enabled options call for at `size`.
    ///
    /// ```text
    /// G-buffer          3 attachments (+ emissive) (+ ambientBuffer), depth/stencil
    /// OIT accumulation  RGBA16F, G-buffer depth
    /// OIT revealage     R8,      G-buffer depth
    /// forward           RGBA16F, G-buffer depth
    /// shadow map        R32F, square, own depth     if shadows are enabled
    /// occlusion         R8                          if SSAO is enabled
    /// ```
    pub fn new(
        gfx: &mut dyn GraphicsContext,
        options: &EngineOptions,
        size: UVec2,
    ) -> Result<Self, ContextError> {
        let gbuffer = RenderTarget::new(
            gfx,
            "gbuffer",
            TargetDesc::multi(size, options.gbuffer_attachment_count(), ColorFormat::Rgba16Float)
                .with_depth(DepthAttachment::DepthStencil),
        )?;
        let depth = gbuffer
            .depth()
            .ok_or_else(|| ContextError::UnknownDepth(gbuffer.label().to_string()))?;

        let oit_accum = RenderTarget::new(
            gfx,
            "oit accumulation",
            TargetDesc::color(size, ColorFormat::Rgba16Float)
                .with_depth(DepthAttachment::Shared(depth)),
        )?;
        let oit_reveal = RenderTarget::new(
            gfx,
            "oit revealage",
            TargetDesc::color(size, ColorFormat::R8).with_depth(DepthAttachment::Shared(depth)),
        )?;
        let forward = RenderTarget::new(
            gfx,
            "forward",
            TargetDesc::color(size, ColorFormat::Rgba16Float)
                .with_depth(DepthAttachment::Shared(depth)),
        )?;

        let shadow_map = if options.shadows_enabled {
            Some(RenderTarget::new(
                gfx,
                "shadow map",
                TargetDesc::color(UVec2::splat(options.shadow_map_size), ColorFormat::R32Float)
                    .with_depth(DepthAttachment::Depth),
            )?)
        } else {
            None
        };

        let occlusion = if options.ssao_enabled {
            Some(RenderTarget::new(
                gfx,
                "occlusion",
                TargetDesc::color(size, ColorFormat::R8),
            )?)
        } else {
            None
        };

        let mut shared = Self {
            size,
            gbuffer,
            gbuffer_samplers: Vec::new(),
            oit_accum,
            oit_reveal,
            oit_samplers: Vec::new(),
            forward,
            forward_sampler: None,
            shadow_map,
            occlusion,
            visible: Vec::new(),
            organizer: RendererOrganizer::new(),
        };
        shared.take_samplers(options);
        Ok(shared)
    }

    /// Retakes every sampler onto the shared targets.
    fn take_samplers(&mut self, options: &EngineOptions) {
        let mut names: Vec<&str> = GBUFFER_SAMPLERS.to_vec();
        if options.emissive_enabled {
            names.push(EMISSIVE_SAMPLER);
        }
        if options.legacy_ambient {
            names.push(AMBIENT_SAMPLER);
        }
        self.gbuffer_samplers = names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| self.gbuffer.sampler(name, i))
            .collect();

        self.oit_samplers = [
            self.oit_accum.sampler(OIT_ACCUM_SAMPLER, 0),
            self.oit_reveal.sampler(OIT_REVEAL_SAMPLER, 0),
        ]
        .into_iter()
        .flatten()
        .collect();

        self.forward_sampler = self.forward.sampler(SOURCE_SAMPLER, 0);
    }

    /// Resizes every viewport-sized target and retakes their samplers.
    /// The shadow map keeps its size. Returns `false` if `size` is unchanged.
    pub fn resize(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        options: &EngineOptions,
        size: UVec2,
    ) -> Result<bool, ContextError> {
        if size == self.size || size.x == 0 || size.y == 0 {
            return Ok(false);
        }
        self.gbuffer.ensure_size(gfx, size)?;
        self.oit_accum.ensure_size(gfx, size)?;
        self.oit_reveal.ensure_size(gfx, size)?;
        self.forward.ensure_size(gfx, size)?;
        if let Some(occlusion) = self.occlusion.as_mut() {
            occlusion.ensure_size(gfx, size)?;
        }
        self.size = size;
        self.take_samplers(options);
        Ok(true)
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn gbuffer(&self) -> &RenderTarget {
        &self.gbuffer
    }

    /// Samplers onto the G-buffer attachments, named by attachment.
    pub fn gbuffer_samplers(&self) -> &[Sampler] {
        &self.gbuffer_samplers
    }

    /// The G-buffer sampler named `name`.
    pub fn gbuffer_sampler(&self, name: &str) -> Option<&Sampler> {
        self.gbuffer_samplers.iter().find(|s| s.name == name)
    }

    pub fn oit_accum(&self) -> &RenderTarget {
        &self.oit_accum
    }

    pub fn oit_reveal(&self) -> &RenderTarget {
        &self.oit_reveal
    }

    /// `oitAccum` and `oitReveal`.
    pub fn oit_samplers(&self) -> &[Sampler] {
        &self.oit_samplers
    }

    /// Target the forward passes draw into before compositing.
    pub fn forward(&self) -> &RenderTarget {
        &self.forward
    }

    pub fn forward_sampler(&self) -> Option<&Sampler> {
        self.forward_sampler.as_ref()
    }

    pub fn shadow_map(&self) -> Option<&RenderTarget> {
        self.shadow_map.as_ref()
    }

    pub fn shadow_sampler(&self) -> Option<Sampler> {
        self.shadow_map
            .as_ref()
            .and_then(|target| target.sampler(SHADOW_SAMPLER, 0))
    }

    pub fn occlusion(&self) -> Option<&RenderTarget> {
        self.occlusion.as_ref()
    }

    pub fn occlusion_sampler(&self) -> Option<Sampler> {
        self.occlusion
            .as_ref()
            .and_then(|target| target.sampler(OCCLUSION_SAMPLER, 0))
    }

    /// Drawables inside the camera frustum this frame.
    pub fn visible(&self) -> &[Drawable] {
        &self.visible
    }

    /// Batches of [`visible`](Self::visible).
    pub fn organizer(&self) -> &RendererOrganizer {
        &self.organizer
    }
}

/// Gathers and batches visible drawables, owns the shared targets, and sets
/// which optional children run.
#[derive(Debug, Default)]
pub struct DeferredStage {
    shared: Option<DeferredShared>,
}

impl DeferredStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The deferred stage with its standard children.
    pub fn stage() -> RenderStage {
        RenderStage::new(Self::new())
            .with_child(RenderStage::new(ShadowMapStage::new()))
            .with_child(RenderStage::new(GBufferStage::new()))
            .with_child(RenderStage::new(SsaoStage::new()).disabled())
            .with_child(RenderStage::new(BindDst))
            .with_child(RenderStage::new(LightingStage::new()))
            .with_child(RenderStage::new(UnbindDst))
            .with_child(RenderStage::new(BindDst))
            .with_child(RenderStage::new(BackgroundStage::new()))
            .with_child(RenderStage::new(TonemapStage::new()))
            .with_child(RenderStage::new(EmissiveStage::new()).disabled())
            .with_child(RenderStage::new(ForwardStage::unlit()))
            .with_child(RenderStage::new(ForwardStage::custom()))
            .with_child(RenderStage::new(TransparentStage::new()))
            .with_child(RenderStage::new(UnbindDst))
    }

    pub fn shared(&self) -> Option<&DeferredShared> {
        self.shared.as_ref()
    }
}

impl StageHooks for DeferredStage {
    fn name(&self) -> &str {
        NAME
    }

    fn kind(&self) -> StageKind {
        StageKind::Deferred
    }

    fn on_start(
        &mut self,
        cx: &mut StartContext<'_>,
        children: &mut [RenderStage],
    ) -> Result<(), StageError> {
        let Some(ping_pong) = cx.ping_pong else {
            return Err(StageError::MissingAncestor {
                stage: NAME.to_string(),
                requires: "post-process",
            });
        };
        let size = ping_pong.size();
        let options = cx.options;

        let shared = DeferredShared::new(cx.gfx, options, size)
            .map_err(|err| StageError::target(NAME, err))?;
        info!(
            "deferred pipeline started at {}x{} with {} G-buffer attachments",
            size.x,
            size.y,
            shared.gbuffer().attachment_count()
        );
        self.shared = Some(shared);

        for child in children.iter_mut() {
            match child.name() {
                passes::SHADOW_MAPS => child.set_enabled(options.shadows_enabled),
                passes::SSAO => child.set_enabled(options.ssao_enabled),
                passes::EMISSIVE => child.set_enabled(options.emissive_enabled),
                _ => {}
            }
        }
        Ok(())
    }

    fn on_pre_render(&mut self, cx: &mut FrameContext<'_>) {
        let Some(shared) = self.shared.as_mut() else {
            return;
        };

        let camera = &*cx.camera;
        cx.gfx.set_camera(&camera.view_projection(), camera.position);
        cx.scene
            .frustum_cast(&camera.frustum(), camera.layer_mask, &mut shared.visible);

        let size = cx.ping_pong.as_deref().map_or(camera.target.size, |p| p.size());
        match shared.resize(cx.gfx, cx.options, size) {
            Ok(true) => debug!("deferred targets resized to {}x{}", size.x, size.y),
            Ok(false) => {}
            Err(err) => warn!("deferred targets could not be resized: {}", err),
        }
        let reported = cx.events.iter().rev().find_map(|event| match event {
            FrameEvent::Resized(reported) => Some(*reported),
            FrameEvent::Immersive(_) => None,
        });
        if let Some(reported) = reported.filter(|reported| *reported != size) {
            debug!(
                "camera reported {}x{}, deferred targets follow the post-process buffers at {}x{}",
                reported.x, reported.y, size.x, size.y
            );
        }

        if shared.organizer.batch_if_changed(&shared.visible) {
            debug!("re-batched {} visible drawables", shared.visible.len());
        }
    }

    fn deferred(&self) -> Option<&DeferredShared> {
        self.shared.as_ref()
    }
}

/// A post-process stage running the deferred stage as its generator: the
/// complete pipeline for one camera.
pub fn deferred_pipeline() -> RenderStage {
    RenderStage::new(PostProcessStage::new(DeferredStage::stage()).with_name("main"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::RecordingContext;
    use crate::camera::Camera;

    fn start(
        gfx: &mut RecordingContext,
        options: &EngineOptions,
    ) -> (RenderStage, Result<(), StageError>) {
        let camera = Camera::new();
        let mut root = deferred_pipeline();
        let result = root.start(&mut StartContext::new(gfx, options, &camera));
        (root, result)
    }

    fn shared(root: &RenderStage) -> &DeferredShared {
        root.find(NAME).and_then(|s| s.hooks().deferred()).unwrap()
    }

    #[test]
    fn gbuffer_layout_follows_options() {
        let mut gfx = RecordingContext::new();
        let (root, result) = start(&mut gfx, &EngineOptions::default());
        result.unwrap();
        assert_eq!(shared(&root).gbuffer().attachment_count(), 3);
        let names: Vec<_> = shared(&root)
            .gbuffer_samplers()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, GBUFFER_SAMPLERS);

        let mut gfx = RecordingContext::new();
        let options = EngineOptions::default()
            .with_emissive(true)
            .with_legacy_ambient(true);
        let (root, result) = start(&mut gfx, &options);
        result.unwrap();
        let shared = shared(&root);
        assert_eq!(shared.gbuffer().attachment_count(), 5);
        assert_eq!(
            shared.gbuffer_sampler(EMISSIVE_SAMPLER).map(|s| s.texture),
            shared.gbuffer().texture(3)
        );
        assert_eq!(
            shared.gbuffer_sampler(AMBIENT_SAMPLER).map(|s| s.texture),
            shared.gbuffer().texture(4)
        );
    }

    #[test]
    fn oit_and_forward_targets_share_gbuffer_depth() {
        let mut gfx = RecordingContext::new();
        let (root, result) = start(&mut gfx, &EngineOptions::default());
        result.unwrap();
        let shared = shared(&root);

        let depth = shared.gbuffer().depth();
        assert!(depth.is_some());
        assert_eq!(shared.oit_accum().depth(), depth);
        assert_eq!(shared.oit_reveal().depth(), depth);
        assert_eq!(shared.forward().depth(), depth);
        assert_eq!(
            shared.forward_sampler().map(|s| s.name.as_str()),
            Some(SOURCE_SAMPLER)
        );
        let names: Vec<_> = shared.oit_samplers().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, [OIT_ACCUM_SAMPLER, OIT_REVEAL_SAMPLER]);
    }

    #[test]
    fn optional_children_follow_options() {
        let mut gfx = RecordingContext::new();
        let options = EngineOptions::default()
            .with_emissive(true)
            .with_ssao(true)
            .with_shadows(false);
        let (root, result) = start(&mut gfx, &options);
        result.unwrap();

        assert!(root.find(passes::EMISSIVE).unwrap().is_enabled());
        assert!(root.find(passes::SSAO).unwrap().is_enabled());
        assert!(!root.find(passes::SHADOW_MAPS).unwrap().is_enabled());
        assert!(shared(&root).occlusion().is_some());
        assert!(shared(&root).shadow_map().is_none());
    }

    #[test]
    fn too_many_attachments_is_a_configuration_error() {
        let mut gfx = RecordingContext::new().with_capabilities(crate::context::Capabilities {
            max_color_attachments: 4,
            ..Default::default()
        });
        let options = EngineOptions::default()
            .with_emissive(true)
            .with_legacy_ambient(true);
        let (_, result) = start(&mut gfx, &options);
        assert!(matches!(
            result,
            Err(StageError::Target {
                source: ContextError::TooManyAttachments { requested: 5, .. },
                ..
            })
        ));
    }

    #[test]
    fn requires_a_post_process_ancestor() {
        let mut gfx = RecordingContext::new();
        let camera = Camera::new();
        let options = EngineOptions::default();
        let mut stage = DeferredStage::stage();

        let result = stage.start(&mut StartContext::new(&mut gfx, &options, &camera));
        assert!(matches!(
            result,
            Err(StageError::MissingAncestor { requires: "post-process", .. })
        ));
    }

    #[test]
    fn children_run_in_pipeline_order() {
        let names: Vec<_> = DeferredStage::stage()
            .children()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "shadow-maps",
                "gbuffer",
                "ssao",
                "bind-dst",
                "lighting",
                "unbind-dst",
                "bind-dst",
                "background",
                "tonemap",
                "emissive",
                "unlit",
                "custom",
                "transparent",
                "unbind-dst",
            ]
        );
    }
}
