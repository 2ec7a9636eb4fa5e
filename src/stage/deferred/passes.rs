//! The children of the deferred stage.
//!
//! Each pass reads the shared targets and batches through
//! [`FrameContext::deferred`] and resolves its program once at start. A pass
//! with nothing to draw returns early without touching the context.

use glam::{UVec2, Vec4};
use log::{debug, warn};

use crate::batch::{DepthOnlyDraw, StandardDraw, ViewKind};
use crate::context::{GraphicsContext, RasterState, ShaderId};
use crate::error::StageError;
use crate::material::{Sampler, Uniforms};
use crate::stage::deferred::{DeferredShared, EMISSIVE_SAMPLER, POSITION_ATTACHMENT};
use crate::stage::hooks::{FrameContext, StageHooks, StageKind, StartContext};
use crate::stage::programs;
use crate::stage::RenderStage;

pub(super) const SHADOW_MAPS: &str = "shadow-maps";
pub(super) const GBUFFER: &str = "gbuffer";
pub(super) const SSAO: &str = "ssao";
pub(super) const BIND_DST: &str = "bind-dst";
pub(super) const LIGHTING: &str = "lighting";
pub(super) const UNBIND_DST: &str = "unbind-dst";
pub(super) const BACKGROUND: &str = "background";
pub(super) const TONEMAP: &str = "tonemap";
pub(super) const EMISSIVE: &str = "emissive";
pub(super) const UNLIT: &str = "unlit";
pub(super) const CUSTOM: &str = "custom";
pub(super) const TRANSPARENT: &str = "transparent";

/// Position sampler name the SSAO program reads.
const SSAO_POSITION_SAMPLER: &str = "position0";

fn resolve(cx: &mut StartContext<'_>, stage: &str, program: &str) -> Result<ShaderId, StageError> {
    cx.gfx
        .program(program)
        .ok_or_else(|| StageError::MissingProgram {
            stage: stage.to_string(),
            program: program.to_string(),
        })
}

/// Binds `shader` with `uniforms` and `samplers` and draws a full-screen quad
/// into whatever target is bound. A failed bind skips the draw.
fn draw_fullscreen(
    gfx: &mut dyn GraphicsContext,
    stage: &str,
    shader: ShaderId,
    uniforms: &Uniforms,
    samplers: &[Sampler],
) {
    gfx.use_shader(shader);
    let bound = gfx
        .bind_uniforms(shader, uniforms)
        .and_then(|()| gfx.bind_samplers(shader, samplers));
    match bound {
        Ok(()) => gfx.draw_fullscreen_quad(),
        Err(err) => warn!("stage '{}': skipping draw: {}", stage, err),
    }
}

fn shared<'a>(cx: &FrameContext<'a>, stage: &str) -> Option<&'a DeferredShared> {
    if cx.deferred.is_none() {
        debug!("stage '{}' has no deferred ancestor, skipping", stage);
    }
    cx.deferred
}

/// Renders opaque geometry depth from the light into the shadow map.
#[derive(Debug, Default)]
pub struct ShadowMapStage {
    program: Option<ShaderId>,
}

impl ShadowMapStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StageHooks for ShadowMapStage {
    fn name(&self) -> &str {
        SHADOW_MAPS
    }

    fn kind(&self) -> StageKind {
        StageKind::Pass
    }

    fn on_start(
        &mut self,
        cx: &mut StartContext<'_>,
        _children: &mut [RenderStage],
    ) -> Result<(), StageError> {
        self.program = Some(resolve(cx, SHADOW_MAPS, programs::SHADOW_DEPTH)?);
        Ok(())
    }

    fn on_render(&mut self, cx: &mut FrameContext<'_>) {
        let (Some(shared), Some(program)) = (shared(cx, SHADOW_MAPS), self.program) else {
            return;
        };
        let Some(shadow_map) = shared.shadow_map() else {
            return;
        };

        shadow_map.bind(cx.gfx);
        cx.gfx.set_raster_state(RasterState::OPAQUE);
        cx.gfx.clear(Vec4::ONE);
        shared.organizer().view(ViewKind::Opaque).run(
            cx.gfx,
            program,
            shared.visible(),
            &mut DepthOnlyDraw,
        );
        shadow_map.unbind(cx.gfx);
    }
}

/// Renders opaque geometry into the G-buffer attachments.
#[derive(Debug, Default)]
pub struct GBufferStage {
    program: Option<ShaderId>,
}

impl GBufferStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StageHooks for GBufferStage {
    fn name(&self) -> &str {
        GBUFFER
    }

    fn kind(&self) -> StageKind {
        StageKind::Pass
    }

    fn on_start(
        &mut self,
        cx: &mut StartContext<'_>,
        _children: &mut [RenderStage],
    ) -> Result<(), StageError> {
        self.program = Some(resolve(cx, GBUFFER, programs::GBUFFER)?);
        Ok(())
    }

    fn on_render(&mut self, cx: &mut FrameContext<'_>) {
        let (Some(shared), Some(program)) = (shared(cx, GBUFFER), self.program) else {
            return;
        };

        let gbuffer = shared.gbuffer();
        gbuffer.bind(cx.gfx);
        cx.gfx.set_raster_state(RasterState::OPAQUE);
        cx.gfx.clear(Vec4::ZERO);
        shared.organizer().view(ViewKind::Opaque).run(
            cx.gfx,
            program,
            shared.visible(),
            &mut StandardDraw,
        );
        gbuffer.unbind(cx.gfx);
    }
}

/// Screen-space ambient occlusion from G-buffer positions into the shared
/// occlusion buffer. Only runs directly under the deferred stage.
#[derive(Debug, Default)]
pub struct SsaoStage {
    program: Option<ShaderId>,
    uniforms: Uniforms,
    viewport: UVec2,
    position: Option<Sampler>,
}

impl SsaoStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StageHooks for SsaoStage {
    fn name(&self) -> &str {
        SSAO
    }

    fn kind(&self) -> StageKind {
        StageKind::Pass
    }

    fn on_start(
        &mut self,
        cx: &mut StartContext<'_>,
        _children: &mut [RenderStage],
    ) -> Result<(), StageError> {
        self.program = Some(resolve(cx, SSAO, programs::SSAO)?);

        self.viewport = cx.camera.target.size;
        self.uniforms = Uniforms::new()
            .with("ViewportSize", self.viewport.as_vec2())
            .with("ssaoGDisplace", cx.options.ssao_g_displace)
            .with("ssaoRadius", cx.options.ssao_radius)
            .with("ssaoDivider", cx.options.ssao_divider);
        self.position = cx.deferred.and_then(|shared| {
            shared
                .gbuffer()
                .sampler(SSAO_POSITION_SAMPLER, POSITION_ATTACHMENT)
        });
        Ok(())
    }

    fn on_pre_render(&mut self, cx: &mut FrameContext<'_>) {
        if cx.parent != Some(StageKind::Deferred) {
            return;
        }

        let size = cx.camera.target.size;
        if size != self.viewport {
            self.viewport = size;
            self.uniforms.set("ViewportSize", size.as_vec2());
        }

        let current = cx.deferred.and_then(|shared| shared.gbuffer().texture(POSITION_ATTACHMENT));
        if self.position.as_ref().map(|s| s.texture) != current {
            self.position = current.map(|texture| Sampler::new(SSAO_POSITION_SAMPLER, texture));
        }
    }

    fn on_render(&mut self, cx: &mut FrameContext<'_>) {
        if cx.parent != Some(StageKind::Deferred) {
            debug!("stage '{}' is not directly under the deferred stage, skipping", SSAO);
            return;
        }
        let (Some(shared), Some(program), Some(position)) =
            (cx.deferred, self.program, self.position.as_ref())
        else {
            return;
        };
        let Some(occlusion) = shared.occlusion() else {
            return;
        };

        occlusion.bind(cx.gfx);
        cx.gfx.set_raster_state(RasterState::FULLSCREEN);
        cx.gfx.clear(Vec4::ZERO);
        draw_fullscreen(
            cx.gfx,
            SSAO,
            program,
            &self.uniforms,
            std::slice::from_ref(position),
        );
        occlusion.unbind(cx.gfx);
    }
}

/// Binds the enclosing post-process stage's destination buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct BindDst;

impl StageHooks for BindDst {
    fn name(&self) -> &str {
        BIND_DST
    }

    fn kind(&self) -> StageKind {
        StageKind::Bracket
    }

    fn on_start(
        &mut self,
        cx: &mut StartContext<'_>,
        _children: &mut [RenderStage],
    ) -> Result<(), StageError> {
        if cx.ping_pong.is_none() {
            warn!("stage '{}' has no post-process ancestor and will do nothing", BIND_DST);
        }
        Ok(())
    }

    fn on_render(&mut self, cx: &mut FrameContext<'_>) {
        if let Some(ping_pong) = cx.ping_pong.as_deref() {
            ping_pong.dst().bind(cx.gfx);
        }
    }
}

/// Unbinds the enclosing post-process stage's destination buffer and swaps
/// the pair, so what was just drawn becomes the source.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnbindDst;

impl StageHooks for UnbindDst {
    fn name(&self) -> &str {
        UNBIND_DST
    }

    fn kind(&self) -> StageKind {
        StageKind::Bracket
    }

    fn on_start(
        &mut self,
        cx: &mut StartContext<'_>,
        _children: &mut [RenderStage],
    ) -> Result<(), StageError> {
        if cx.ping_pong.is_none() {
            warn!("stage '{}' has no post-process ancestor and will do nothing", UNBIND_DST);
        }
        Ok(())
    }

    fn on_render(&mut self, cx: &mut FrameContext<'_>) {
        if let Some(ping_pong) = cx.ping_pong.as_deref_mut() {
            ping_pong.dst().unbind(cx.gfx);
            ping_pong.swap();
        }
    }
}

/// Lights the G-buffer into the bound destination.
#[derive(Debug, Default)]
pub struct LightingStage {
    program: Option<ShaderId>,
    uniforms: Uniforms,
    samplers: Vec<Sampler>,
}

impl LightingStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StageHooks for LightingStage {
    fn name(&self) -> &str {
        LIGHTING
    }

    fn kind(&self) -> StageKind {
        StageKind::Pass
    }

    fn on_start(
        &mut self,
        cx: &mut StartContext<'_>,
        _children: &mut [RenderStage],
    ) -> Result<(), StageError> {
        self.program = Some(resolve(cx, LIGHTING, programs::PBR_LIGHTS)?);
        Ok(())
    }

    fn on_render(&mut self, cx: &mut FrameContext<'_>) {
        let (Some(shared), Some(program)) = (shared(cx, LIGHTING), self.program) else {
            return;
        };

        self.uniforms.set("cameraPosition", cx.camera.position);
        self.uniforms.set("ViewportSize", shared.size().as_vec2());

        self.samplers.clear();
        self.samplers.extend_from_slice(shared.gbuffer_samplers());
        self.samplers.extend(shared.shadow_sampler());
        self.samplers.extend(shared.occlusion_sampler());

        cx.gfx.set_raster_state(RasterState::FULLSCREEN);
        cx.gfx.clear(Vec4::ZERO);
        draw_fullscreen(cx.gfx, LIGHTING, program, &self.uniforms, &self.samplers);
    }
}

/// Clears the destination to the background color. Skipped while the camera
/// is presenting to an immersive XR display, where the destination is cleared
/// transparent instead.
#[derive(Debug, Default)]
pub struct BackgroundStage {
    program: Option<ShaderId>,
    uniforms: Uniforms,
    immersive: bool,
}

impl BackgroundStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_immersive(&self) -> bool {
        self.immersive
    }
}

impl StageHooks for BackgroundStage {
    fn name(&self) -> &str {
        BACKGROUND
    }

    fn kind(&self) -> StageKind {
        StageKind::Pass
    }

    fn on_start(
        &mut self,
        cx: &mut StartContext<'_>,
        _children: &mut [RenderStage],
    ) -> Result<(), StageError> {
        self.program = Some(resolve(cx, BACKGROUND, programs::BACKGROUND)?);
        Ok(())
    }

    fn on_pre_render(&mut self, cx: &mut FrameContext<'_>) {
        if let Some(immersive) = cx.immersive_event() {
            if immersive != self.immersive {
                debug!("background {}", if immersive { "off (immersive)" } else { "on" });
            }
            self.immersive = immersive;
        }
    }

    fn on_render(&mut self, cx: &mut FrameContext<'_>) {
        if self.immersive {
            cx.gfx.clear(Vec4::ZERO);
            return;
        }
        let Some(program) = self.program else {
            return;
        };

        let color = Vec4::from_array(cx.options.background_color);
        self.uniforms.set("backgroundColor", color);
        cx.gfx.set_raster_state(RasterState::FULLSCREEN);
        cx.gfx.clear(color);
        draw_fullscreen(cx.gfx, BACKGROUND, program, &self.uniforms, &[]);
    }
}

/// Maps the lit HDR source into display range over the background.
#[derive(Debug, Default)]
pub struct TonemapStage {
    program: Option<ShaderId>,
    uniforms: Uniforms,
}

impl TonemapStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StageHooks for TonemapStage {
    fn name(&self) -> &str {
        TONEMAP
    }

    fn kind(&self) -> StageKind {
        StageKind::Pass
    }

    fn on_start(
        &mut self,
        cx: &mut StartContext<'_>,
        _children: &mut [RenderStage],
    ) -> Result<(), StageError> {
        self.program = Some(resolve(cx, TONEMAP, programs::TONEMAP)?);
        Ok(())
    }

    fn on_render(&mut self, cx: &mut FrameContext<'_>) {
        let (Some(ping_pong), Some(program)) = (cx.ping_pong.as_deref(), self.program) else {
            return;
        };

        self.uniforms.set("exposure", cx.options.exposure);
        cx.gfx.set_raster_state(RasterState::FULLSCREEN_ALPHA);
        draw_fullscreen(
            cx.gfx,
            TONEMAP,
            program,
            &self.uniforms,
            std::slice::from_ref(ping_pong.src_sampler()),
        );
    }
}

/// Adds the emissive G-buffer attachment onto the destination.
#[derive(Debug, Default)]
pub struct EmissiveStage {
    program: Option<ShaderId>,
    uniforms: Uniforms,
}

impl EmissiveStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StageHooks for EmissiveStage {
    fn name(&self) -> &str {
        EMISSIVE
    }

    fn kind(&self) -> StageKind {
        StageKind::Pass
    }

    fn on_start(
        &mut self,
        cx: &mut StartContext<'_>,
        _children: &mut [RenderStage],
    ) -> Result<(), StageError> {
        self.program = Some(resolve(cx, EMISSIVE, programs::EMISSIVE)?);
        Ok(())
    }

    fn on_render(&mut self, cx: &mut FrameContext<'_>) {
        let (Some(shared), Some(program)) = (shared(cx, EMISSIVE), self.program) else {
            return;
        };
        let Some(emissive) = shared.gbuffer_sampler(EMISSIVE_SAMPLER) else {
            debug!("G-buffer has no emissive attachment, skipping");
            return;
        };

        cx.gfx.set_raster_state(RasterState::FULLSCREEN_ADDITIVE);
        draw_fullscreen(
            cx.gfx,
            EMISSIVE,
            program,
            &self.uniforms,
            std::slice::from_ref(emissive),
        );
    }
}

/// Draws one batched view forward, then composites it over the destination.
///
/// Geometry goes into the shared forward target, which carries the G-buffer
/// depth, so forward drawables are hidden behind opaque ones and occlude the
/// transparent pass that follows.
#[derive(Debug)]
pub struct ForwardStage {
    name: &'static str,
    program_name: &'static str,
    view: ViewKind,
    program: Option<ShaderId>,
    composite: Option<ShaderId>,
}

impl ForwardStage {
    /// Unlit materials with the unlit program.
    pub fn unlit() -> Self {
        Self {
            name: UNLIT,
            program_name: programs::UNLIT,
            view: ViewKind::Unlit,
            program: None,
            composite: None,
        }
    }

    /// Custom materials with the custom program.
    pub fn custom() -> Self {
        Self {
            name: CUSTOM,
            program_name: programs::CUSTOM,
            view: ViewKind::Custom,
            program: None,
            composite: None,
        }
    }
}

impl StageHooks for ForwardStage {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Pass
    }

    fn on_start(
        &mut self,
        cx: &mut StartContext<'_>,
        _children: &mut [RenderStage],
    ) -> Result<(), StageError> {
        self.program = Some(resolve(cx, self.name, self.program_name)?);
        self.composite = Some(resolve(cx, self.name, programs::SCREEN_QUAD)?);
        Ok(())
    }

    fn on_render(&mut self, cx: &mut FrameContext<'_>) {
        let (Some(shared), Some(program), Some(composite)) =
            (shared(cx, self.name), self.program, self.composite)
        else {
            return;
        };
        let view = shared.organizer().view(self.view);
        if view.is_empty() {
            return;
        }

        let forward = shared.forward();
        forward.bind(cx.gfx);
        cx.gfx.set_raster_state(RasterState::FORWARD);
        cx.gfx.clear(Vec4::ZERO);
        view.run(cx.gfx, program, shared.visible(), &mut StandardDraw);
        forward.unbind(cx.gfx);

        let (Some(ping_pong), Some(sampler)) =
            (cx.ping_pong.as_deref(), shared.forward_sampler())
        else {
            return;
        };
        ping_pong.dst().bind(cx.gfx);
        cx.gfx.set_raster_state(RasterState::FULLSCREEN_ALPHA);
        draw_fullscreen(
            cx.gfx,
            self.name,
            composite,
            &Uniforms::new(),
            std::slice::from_ref(sampler),
        );
    }
}

/// Weighted blended order-independent transparency.
///
/// ```text
/// accumulation  clear 0, sum  (color * weight, alpha * weight)
/// revealage     clear 1, product of (1 - alpha)
/// composite     both onto the destination, alpha blended
/// ```
///
/// Both OIT targets depth-test against the G-buffer depth without writing it.
#[derive(Debug, Default)]
pub struct TransparentStage {
    accumulate: Option<ShaderId>,
    reveal: Option<ShaderId>,
    composite: Option<ShaderId>,
}

impl TransparentStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StageHooks for TransparentStage {
    fn name(&self) -> &str {
        TRANSPARENT
    }

    fn kind(&self) -> StageKind {
        StageKind::Pass
    }

    fn on_start(
        &mut self,
        cx: &mut StartContext<'_>,
        _children: &mut [RenderStage],
    ) -> Result<(), StageError> {
        self.accumulate = Some(resolve(cx, TRANSPARENT, programs::OIT_ACCUM)?);
        self.reveal = Some(resolve(cx, TRANSPARENT, programs::OIT_REVEAL)?);
        self.composite = Some(resolve(cx, TRANSPARENT, programs::OIT_COMPOSITE)?);
        Ok(())
    }

    fn on_render(&mut self, cx: &mut FrameContext<'_>) {
        let (Some(shared), Some(accumulate), Some(reveal), Some(composite)) = (
            shared(cx, TRANSPARENT),
            self.accumulate,
            self.reveal,
            self.composite,
        ) else {
            return;
        };
        let view = shared.organizer().view(ViewKind::Transparent);
        if view.is_empty() {
            return;
        }
        let visible = shared.visible();

        let accum_target = shared.oit_accum();
        accum_target.bind(cx.gfx);
        cx.gfx.set_raster_state(RasterState::OIT_ACCUMULATE);
        cx.gfx.clear(Vec4::ZERO);
        view.run(cx.gfx, accumulate, visible, &mut StandardDraw);
        accum_target.unbind(cx.gfx);

        let reveal_target = shared.oit_reveal();
        reveal_target.bind(cx.gfx);
        cx.gfx.set_raster_state(RasterState::OIT_REVEALAGE);
        cx.gfx.clear(Vec4::ONE);
        view.run(cx.gfx, reveal, visible, &mut StandardDraw);
        reveal_target.unbind(cx.gfx);

        let Some(ping_pong) = cx.ping_pong.as_deref() else {
            return;
        };
        ping_pong.dst().bind(cx.gfx);
        cx.gfx.set_raster_state(RasterState::FULLSCREEN_ALPHA);
        draw_fullscreen(
            cx.gfx,
            TRANSPARENT,
            composite,
            &Uniforms::new(),
            shared.oit_samplers(),
        );
    }
}
