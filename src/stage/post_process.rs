//! Offscreen rendering with ping-pong buffers.
//!
//! A [`PostProcessStage`] renders its generator into an offscreen buffer, then
//! draws that buffer onto the camera's real target through a compositing
//! program:
//!
//! ```text
//!             ┌────────── generator ──────────┐
//! camera ───▶ │  renders into src (and may    │ ───▶ composite src ───▶ camera target
//!             │  bracket dst, swapping roles) │        swap()
//!             └───────────────────────────────┘
//! ```
//!
//! Generator stages that need to read what was drawn so far bind `dst`, draw
//! while sampling `src`, then unbind and swap.

use std::slice;

use glam::{UVec2, Vec4};
use log::{debug, warn};

use crate::camera::CameraTarget;
use crate::context::{GraphicsContext, RasterState, ShaderId};
use crate::error::{ContextError, StageError};
use crate::material::{Sampler, UniformValue, Uniforms};
use crate::stage::hooks::{FrameContext, StageHooks, StageKind, StartContext};
use crate::stage::programs;
use crate::stage::RenderStage;
use crate::target::{ColorFormat, RenderTarget, TargetDesc};

/// Sampler name both buffers are read through.
pub const SOURCE_SAMPLER: &str = "src";

/// Two same-sized HDR targets whose roles alternate.
///
/// Exactly one of them is the source at any time. [`swap`](Self::swap)
/// exchanges the targets together with their samplers, so `swap(); swap();` is
/// a no-op.
#[derive(Debug)]
pub struct PingPong {
    src: RenderTarget,
    dst: RenderTarget,
    src_sampler: Sampler,
    dst_sampler: Sampler,
}

impl PingPong {
    /// Allocates both buffers at `size`.
    pub fn new(gfx: &mut dyn GraphicsContext, size: UVec2) -> Result<Self, ContextError> {
        let src = RenderTarget::new(
            gfx,
            "ping-pong a",
            TargetDesc::color(size, ColorFormat::Rgba16Float),
        )?;
        let dst = RenderTarget::new(
            gfx,
            "ping-pong b",
            TargetDesc::color(size, ColorFormat::Rgba16Float),
        )?;
        let src_sampler = source_sampler(&src)?;
        let dst_sampler = source_sampler(&dst)?;

        Ok(Self {
            src,
            dst,
            src_sampler,
            dst_sampler,
        })
    }

    pub fn src(&self) -> &RenderTarget {
        &self.src
    }

    pub fn dst(&self) -> &RenderTarget {
        &self.dst
    }

    /// Sampler reading the current source.
    pub fn src_sampler(&self) -> &Sampler {
        &self.src_sampler
    }

    pub fn dst_sampler(&self) -> &Sampler {
        &self.dst_sampler
    }

    pub fn size(&self) -> UVec2 {
        self.src.size()
    }

    /// Exchanges the roles of the two buffers.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.src, &mut self.dst);
        std::mem::swap(&mut self.src_sampler, &mut self.dst_sampler);
    }

    /// Resizes both buffers, resets both viewports and retakes both samplers.
    /// Returns `false` if nothing changed.
    pub fn resize(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        size: UVec2,
    ) -> Result<bool, ContextError> {
        let src_resized = self.src.ensure_size(gfx, size)?;
        let dst_resized = self.dst.ensure_size(gfx, size)?;
        if src_resized || dst_resized {
            self.src_sampler = source_sampler(&self.src)?;
            self.dst_sampler = source_sampler(&self.dst)?;
        }
        Ok(src_resized || dst_resized)
    }
}

fn source_sampler(target: &RenderTarget) -> Result<Sampler, ContextError> {
    target.sampler(SOURCE_SAMPLER, 0).ok_or_else(|| {
        ContextError::Device(format!(
            "target '{}' has no color attachment",
            target.label()
        ))
    })
}

/// Renders a generator stage offscreen and composites the result.
///
/// # Example
///
/// ```ignore
/// let blur = RenderStage::new(
///     PostProcessStage::new(RenderStage::group("scene").with_child(scene_pass))
///         .with_program("blur")
///         .with_uniform("radius", 4.0),
/// );
/// ```
pub struct PostProcessStage {
    name: String,
    generator: RenderStage,
    program_name: String,
    program: Option<ShaderId>,
    uniforms: Uniforms,
    size: Option<UVec2>,
    buffers: Option<PingPong>,
    skipped: bool,
}

impl PostProcessStage {
    /// Composites `generator` with the plain screen-quad program.
    pub fn new(generator: RenderStage) -> Self {
        Self {
            name: "post-process".to_string(),
            generator,
            program_name: programs::SCREEN_QUAD.to_string(),
            program: None,
            uniforms: Uniforms::new(),
            size: None,
            buffers: None,
            skipped: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Program used to draw the source buffer onto the camera target.
    pub fn with_program(mut self, name: impl Into<String>) -> Self {
        self.program_name = name.into();
        self
    }

    pub fn with_uniform(mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        self.uniforms.set(name, value);
        self
    }

    /// Buffer size used at start instead of the camera's target size.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = Some(UVec2::new(width, height));
        self
    }

    pub fn buffers(&self) -> Option<&PingPong> {
        self.buffers.as_ref()
    }
}

impl StageHooks for PostProcessStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::PostProcess
    }

    fn on_start(
        &mut self,
        cx: &mut StartContext<'_>,
        _children: &mut [RenderStage],
    ) -> Result<(), StageError> {
        let mut size = self.size.unwrap_or(cx.camera.target.size);
        if size.x == 0 || size.y == 0 {
            warn!(
                "stage '{}' started with a {}x{} target; allocating 1x1 until resized",
                self.name, size.x, size.y
            );
            size = size.max(UVec2::ONE);
        }

        self.program = Some(cx.gfx.program(&self.program_name).ok_or_else(|| {
            StageError::MissingProgram {
                stage: self.name.clone(),
                program: self.program_name.clone(),
            }
        })?);

        // A retried start keeps the buffers of the failed attempt.
        let buffers = match &mut self.buffers {
            Some(buffers) => buffers,
            slot @ None => slot.insert(
                PingPong::new(cx.gfx, size).map_err(|err| StageError::target(&self.name, err))?,
            ),
        };
        self.generator.start(&mut cx.with_ping_pong(buffers))
    }

    fn on_pre_render(&mut self, cx: &mut FrameContext<'_>) {
        let Some(buffers) = self.buffers.as_mut() else {
            return;
        };

        let target = cx.camera.target;
        if target.is_zero_sized() {
            if !self.skipped {
                debug!("stage '{}': camera target is zero-sized, skipping", self.name);
            }
            self.skipped = true;
            return;
        }

        if target.size != buffers.size() {
            if let Err(err) = buffers.resize(cx.gfx, target.size) {
                warn!("stage '{}': could not resize buffers: {}", self.name, err);
                self.skipped = true;
                return;
            }
            debug!(
                "stage '{}': buffers resized to {}x{}",
                self.name, target.size.x, target.size.y
            );
        }
        self.skipped = false;

        cx.camera.target = CameraTarget {
            id: buffers.src().id(),
            size: buffers.size(),
        };
        self.generator.frame(&mut cx.with_ping_pong(buffers));
        cx.camera.target = target;
    }

    fn on_post_render(&mut self, cx: &mut FrameContext<'_>) {
        if self.skipped {
            return;
        }
        let (Some(buffers), Some(program)) = (self.buffers.as_mut(), self.program) else {
            return;
        };

        let target = cx.camera.target.id;
        let gfx = &mut *cx.gfx;
        gfx.bind_target(target);
        gfx.set_raster_state(RasterState::FULLSCREEN);
        gfx.clear(Vec4::ZERO);
        gfx.use_shader(program);
        let bound = gfx
            .bind_uniforms(program, &self.uniforms)
            .and_then(|()| gfx.bind_samplers(program, slice::from_ref(buffers.src_sampler())));
        match bound {
            Ok(()) => gfx.draw_fullscreen_quad(),
            Err(err) => warn!("stage '{}': skipping composite: {}", self.name, err),
        }
        gfx.unbind_target(target);

        buffers.swap();
    }

    fn ping_pong(&self) -> Option<&PingPong> {
        self.buffers.as_ref()
    }

    fn generator(&self) -> Option<&RenderStage> {
        Some(&self.generator)
    }

    fn generator_mut(&mut self) -> Option<&mut RenderStage> {
        Some(&mut self.generator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{Command, RecordingContext};
    use crate::camera::Camera;
    use crate::options::EngineOptions;
    use crate::scene::EcsScene;

    fn start(gfx: &mut RecordingContext, stage: &mut RenderStage, camera: &Camera) {
        let options = EngineOptions::default();
        stage
            .start(&mut StartContext::new(gfx, &options, camera))
            .unwrap();
    }

    fn frame(gfx: &mut RecordingContext, stage: &mut RenderStage, camera: &mut Camera) {
        let options = EngineOptions::default();
        let scene = EcsScene::new();
        stage.frame(&mut FrameContext::new(gfx, &scene, camera, &options, &[]));
    }

    fn buffers(stage: &RenderStage) -> &PingPong {
        stage.hooks().ping_pong().unwrap()
    }

    #[test]
    fn swap_is_an_involution() {
        let mut gfx = RecordingContext::new();
        let mut pair = PingPong::new(&mut gfx, UVec2::new(64, 64)).unwrap();
        let src = pair.src().id();
        let src_sampler = pair.src_sampler().clone();

        pair.swap();
        assert_ne!(pair.src().id(), src);
        assert_eq!(pair.dst().id(), src);
        assert_eq!(pair.dst_sampler(), &src_sampler);

        pair.swap();
        assert_eq!(pair.src().id(), src);
        assert_eq!(pair.src_sampler(), &src_sampler);
    }

    #[test]
    fn both_samplers_are_named_src() {
        let mut gfx = RecordingContext::new();
        let pair = PingPong::new(&mut gfx, UVec2::new(64, 64)).unwrap();
        assert_eq!(pair.src_sampler().name, SOURCE_SAMPLER);
        assert_eq!(pair.dst_sampler().name, SOURCE_SAMPLER);
    }

    #[test]
    fn resize_resizes_both_buffers_and_swaps_once_per_frame() {
        let mut gfx = RecordingContext::new();
        let mut camera = Camera::new().with_target(CameraTarget::screen(800, 600));
        let mut stage = RenderStage::new(PostProcessStage::new(RenderStage::group("scene")));
        start(&mut gfx, &mut stage, &camera);

        let first = buffers(&stage).src().id();
        let second = buffers(&stage).dst().id();
        frame(&mut gfx, &mut stage, &mut camera);
        assert_eq!(buffers(&stage).src().id(), second);

        camera.target.size = UVec2::new(1024, 768);
        frame(&mut gfx, &mut stage, &mut camera);

        let size = UVec2::new(1024, 768);
        assert_eq!(buffers(&stage).src().id(), first);
        for id in [first, second] {
            assert_eq!(gfx.target_size(id), Some(size));
            assert_eq!(gfx.viewport(id).map(|v| v.size()), Some(size));
        }
        assert_eq!(buffers(&stage).src_sampler().texture, buffers(&stage).src().textures()[0]);
        assert_eq!(camera.target, CameraTarget::screen(1024, 768));
        assert!(gfx.violations().is_empty(), "{:?}", gfx.violations());
    }

    #[test]
    fn generator_renders_into_src() {
        struct Clear;
        impl StageHooks for Clear {
            fn name(&self) -> &str {
                "clear"
            }
            fn on_render(&mut self, cx: &mut FrameContext<'_>) {
                cx.gfx.bind_target(cx.camera.target.id);
                cx.gfx.clear(Vec4::ONE);
                cx.gfx.unbind_target(cx.camera.target.id);
            }
        }

        let mut gfx = RecordingContext::new();
        let mut camera = Camera::new();
        let mut stage = RenderStage::new(PostProcessStage::new(RenderStage::new(Clear)));
        start(&mut gfx, &mut stage, &camera);
        let src = buffers(&stage).src().id();

        frame(&mut gfx, &mut stage, &mut camera);

        let binds: Vec<_> = gfx
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::BindTarget(id) => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(binds, vec![src, camera.target.id]);
        assert_eq!(camera.target.id, crate::context::TargetId::SCREEN);
    }

    #[test]
    fn zero_sized_target_skips_composite_and_swap() {
        let mut gfx = RecordingContext::new();
        let mut camera = Camera::new();
        let mut stage = RenderStage::new(PostProcessStage::new(RenderStage::group("scene")));
        start(&mut gfx, &mut stage, &camera);
        let src = buffers(&stage).src().id();

        camera.target.size = UVec2::new(0, 600);
        gfx.clear_commands();
        frame(&mut gfx, &mut stage, &mut camera);

        assert_eq!(buffers(&stage).src().id(), src);
        assert_eq!(gfx.draw_count(), 0);
        assert!(gfx.commands().is_empty());
    }

    #[test]
    fn missing_composite_program_fails_start() {
        let mut gfx = RecordingContext::new().without_program(programs::SCREEN_QUAD);
        let camera = Camera::new();
        let options = EngineOptions::default();
        let mut stage = RenderStage::new(PostProcessStage::new(RenderStage::group("scene")));

        let err = stage
            .start(&mut StartContext::new(&mut gfx, &options, &camera))
            .unwrap_err();
        assert!(matches!(err, StageError::MissingProgram { .. }));
    }

    #[test]
    fn preset_size_overrides_camera_size() {
        let mut gfx = RecordingContext::new();
        let camera = Camera::new();
        let mut stage = RenderStage::new(
            PostProcessStage::new(RenderStage::group("scene")).with_size(256, 128),
        );
        start(&mut gfx, &mut stage, &camera);
        assert_eq!(buffers(&stage).size(), UVec2::new(256, 128));
    }
}
