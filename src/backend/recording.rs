//! A headless [`GraphicsContext`] that records and checks every call.
//!
//! `RecordingContext` allocates no GPU memory. It tracks just enough state to
//! catch mistakes a real backend would turn into corrupted frames or validation
//! errors:
//!
//! - drawing or clearing with no target bound
//! - drawing with no shader in use
//! - unbinding a target that is not the bound one
//! - binding a target that was never created
//!
//! Protocol mistakes are collected as [`Violation`]s instead of failing the
//! call. Binding a stale texture or omitting a required sampler returns a
//! [`BindError`] like a real backend would.
//!
//! # Example
//!
//! ```ignore
//! let mut gfx = RecordingContext::new()
//!     .require_samplers("pbr-lights", &["colorMetallic", "normalRoughness", "positionOcclusion"]);
//!
//! engine.render_frame(&mut gfx, &scene)?;
//!
//! assert!(gfx.violations().is_empty());
//! println!("{} draws", gfx.draw_count());
//! ```

use std::collections::{HashMap, HashSet};

use glam::{Mat4, UVec2, Vec3, Vec4};

use crate::context::{
    Capabilities, DepthId, GraphicsContext, MeshId, RasterState, ShaderId, TargetId, TextureId,
};
use crate::error::{BindError, ContextError};
use crate::material::{Sampler, ShaderSignature, Uniforms};
use crate::stage::programs;
use crate::target::{DepthAttachment, TargetAllocation, TargetDesc, Viewport};

/// One recorded call.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CreateTarget {
        target: TargetId,
        label: String,
        size: UVec2,
        attachments: usize,
    },
    ResizeTarget {
        target: TargetId,
        size: UVec2,
    },
    SetViewport {
        target: TargetId,
        viewport: Viewport,
    },
    BindTarget(TargetId),
    UnbindTarget(TargetId),
    Clear {
        target: TargetId,
        color: Vec4,
    },
    SetRasterState(RasterState),
    SetCamera {
        view_projection: Mat4,
        position: Vec3,
    },
    UseShader(ShaderId),
    BindUniforms {
        shader: ShaderId,
        count: usize,
    },
    BindSamplers {
        shader: ShaderId,
        names: Vec<String>,
    },
    DrawMesh {
        target: TargetId,
        shader: ShaderId,
        mesh: MeshId,
    },
    DrawFullscreenQuad {
        target: TargetId,
        shader: ShaderId,
    },
}

/// A call made out of protocol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    DrawWithoutTarget,
    DrawWithoutShader,
    ClearWithoutTarget,
    UnbindNotBound {
        target: TargetId,
        bound: Option<TargetId>,
    },
    UnknownTarget(TargetId),
    UnknownShader(ShaderId),
}

#[derive(Debug)]
struct TargetRecord {
    label: String,
    desc: TargetDesc,
    textures: Vec<TextureId>,
    depth: Option<DepthId>,
    viewport: Viewport,
}

/// Records every call; see the [module documentation](self).
#[derive(Debug)]
pub struct RecordingContext {
    capabilities: Capabilities,
    targets: HashMap<TargetId, TargetRecord>,
    textures: HashMap<u32, u32>,
    depths: HashSet<DepthId>,
    next_target: u32,
    next_slot: u32,
    next_depth: u32,

    programs: HashMap<String, ShaderId>,
    program_names: HashMap<ShaderId, String>,
    variants: HashMap<(ShaderId, u64), ShaderId>,
    variant_base: HashMap<ShaderId, ShaderId>,
    unlinked: HashSet<ShaderId>,
    required_samplers: HashMap<String, Vec<String>>,
    next_shader: u32,

    bound: Option<TargetId>,
    shader: Option<ShaderId>,
    commands: Vec<Command>,
    violations: Vec<Violation>,
}

impl RecordingContext {
    /// A context providing every built-in program.
    pub fn new() -> Self {
        let mut context = Self {
            capabilities: Capabilities::default(),
            targets: HashMap::new(),
            textures: HashMap::new(),
            depths: HashSet::new(),
            next_target: 1,
            next_slot: 1,
            next_depth: 1,
            programs: HashMap::new(),
            program_names: HashMap::new(),
            variants: HashMap::new(),
            variant_base: HashMap::new(),
            unlinked: HashSet::new(),
            required_samplers: HashMap::new(),
            next_shader: 1,
            bound: None,
            shader: None,
            commands: Vec::new(),
            violations: Vec::new(),
        };
        for name in programs::ALL {
            context.register_program(name);
        }
        context
    }

    /// Registers a program under `name`, replacing any previous one.
    pub fn register_program(&mut self, name: &str) -> ShaderId {
        let id = ShaderId(self.next_shader);
        self.next_shader += 1;
        self.programs.insert(name.to_string(), id);
        self.program_names.insert(id, name.to_string());
        id
    }

    /// Removes a built-in program, as if the backend failed to compile it.
    pub fn without_program(mut self, name: &str) -> Self {
        if let Some(id) = self.programs.remove(name) {
            self.program_names.remove(&id);
        }
        self
    }

    /// Keeps every variant of `name` unlinked: selecting one returns `None`.
    pub fn with_unlinked_program(mut self, name: &str) -> Self {
        if let Some(&id) = self.programs.get(name) {
            self.unlinked.insert(id);
        }
        self
    }

    /// Makes binding samplers to `program` (or its variants) fail unless all of
    /// `names` are present.
    pub fn require_samplers(mut self, program: &str, names: &[&str]) -> Self {
        self.required_samplers.insert(
            program.to_string(),
            names.iter().map(|n| n.to_string()).collect(),
        );
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Mesh draws plus full-screen quads.
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::DrawMesh { .. } | Command::DrawFullscreenQuad { .. }))
            .count()
    }

    /// Mesh draws only.
    pub fn mesh_draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::DrawMesh { .. }))
            .count()
    }

    /// Full-screen quads drawn with the program named `program` (or one of its
    /// variants).
    pub fn quads_with(&self, program: &str) -> usize {
        self.commands
            .iter()
            .filter(|c| match c {
                Command::DrawFullscreenQuad { shader, .. } => {
                    self.program_name(*shader) == Some(program)
                }
                _ => false,
            })
            .count()
    }

    /// Name of the program `shader` is, or is a variant of.
    pub fn program_name(&self, shader: ShaderId) -> Option<&str> {
        let base = self.variant_base.get(&shader).copied().unwrap_or(shader);
        self.program_names.get(&base).map(String::as_str)
    }

    pub fn bound_target(&self) -> Option<TargetId> {
        self.bound
    }

    pub fn target_size(&self, target: TargetId) -> Option<UVec2> {
        self.targets.get(&target).map(|t| t.desc.size)
    }

    pub fn viewport(&self, target: TargetId) -> Option<Viewport> {
        self.targets.get(&target).map(|t| t.viewport)
    }

    /// The depth resource attached to `target`, owned or shared.
    pub fn target_depth(&self, target: TargetId) -> Option<DepthId> {
        self.targets.get(&target).and_then(|t| t.depth)
    }

    pub fn target_label(&self, target: TargetId) -> Option<&str> {
        self.targets.get(&target).map(|t| t.label.as_str())
    }

    /// The target most recently created with `label`.
    pub fn target_by_label(&self, label: &str) -> Option<TargetId> {
        self.targets
            .iter()
            .filter(|(_, t)| t.label == label)
            .map(|(id, _)| *id)
            .max()
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Number of times `target` was bound.
    pub fn bind_count(&self, target: TargetId) -> usize {
        self.commands
            .iter()
            .filter(|c| **c == Command::BindTarget(target))
            .count()
    }

    fn allocate_textures(&mut self, count: usize) -> Vec<TextureId> {
        (0..count)
            .map(|_| {
                let slot = self.next_slot;
                self.next_slot += 1;
                self.textures.insert(slot, 0);
                TextureId::new(slot, 0)
            })
            .collect()
    }

    fn allocate_depth(&mut self) -> DepthId {
        let id = DepthId(self.next_depth);
        self.next_depth += 1;
        self.depths.insert(id);
        id
    }

    fn current(&mut self) -> Option<(TargetId, ShaderId)> {
        let Some(target) = self.bound else {
            self.violations.push(Violation::DrawWithoutTarget);
            return None;
        };
        let Some(shader) = self.shader else {
            self.violations.push(Violation::DrawWithoutShader);
            return None;
        };
        Some((target, shader))
    }

    fn required_for(&self, shader: ShaderId) -> Result<&[String], BindError> {
        let name = self
            .program_name(shader)
            .ok_or(BindError::UnknownShader(shader))?;
        Ok(self
            .required_samplers
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }
}

impl Default for RecordingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsContext for RecordingContext {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_target(
        &mut self,
        label: &str,
        desc: &TargetDesc,
    ) -> Result<TargetAllocation, ContextError> {
        if desc.size.x == 0 || desc.size.y == 0 {
            return Err(ContextError::ZeroSize {
                label: label.to_string(),
            });
        }
        if desc.colors.len() > self.capabilities.max_color_attachments as usize {
            return Err(ContextError::TooManyAttachments {
                label: label.to_string(),
                requested: desc.colors.len(),
                max: self.capabilities.max_color_attachments,
            });
        }

        let depth = match desc.depth {
            DepthAttachment::None => None,
            DepthAttachment::Depth | DepthAttachment::DepthStencil => Some(self.allocate_depth()),
            DepthAttachment::Shared(depth) => {
                if !self.depths.contains(&depth) {
                    return Err(ContextError::UnknownDepth(label.to_string()));
                }
                Some(depth)
            }
        };

        let target = TargetId(self.next_target);
        self.next_target += 1;
        let textures = self.allocate_textures(desc.colors.len());

        self.targets.insert(
            target,
            TargetRecord {
                label: label.to_string(),
                desc: desc.clone(),
                textures: textures.clone(),
                depth,
                viewport: Viewport::full(desc.size),
            },
        );
        self.commands.push(Command::CreateTarget {
            target,
            label: label.to_string(),
            size: desc.size,
            attachments: desc.colors.len(),
        });

        Ok(TargetAllocation {
            target,
            textures,
            depth,
        })
    }

    fn resize_target(
        &mut self,
        target: TargetId,
        size: UVec2,
    ) -> Result<TargetAllocation, ContextError> {
        let record = self
            .targets
            .get_mut(&target)
            .ok_or(ContextError::UnknownTarget(target))?;
        if size.x == 0 || size.y == 0 {
            return Err(ContextError::ZeroSize {
                label: record.label.clone(),
            });
        }

        record.desc.size = size;
        for texture in &mut record.textures {
            texture.generation += 1;
            self.textures.insert(texture.slot, texture.generation);
        }
        let allocation = TargetAllocation {
            target,
            textures: record.textures.clone(),
            depth: record.depth,
        };
        self.commands.push(Command::ResizeTarget { target, size });
        Ok(allocation)
    }

    fn set_viewport(&mut self, target: TargetId, viewport: Viewport) {
        match self.targets.get_mut(&target) {
            Some(record) => record.viewport = viewport,
            None if target.is_screen() => {}
            None => self.violations.push(Violation::UnknownTarget(target)),
        }
        self.commands.push(Command::SetViewport { target, viewport });
    }

    fn bind_target(&mut self, target: TargetId) {
        if !target.is_screen() && !self.targets.contains_key(&target) {
            self.violations.push(Violation::UnknownTarget(target));
        }
        self.bound = Some(target);
        self.commands.push(Command::BindTarget(target));
    }

    fn unbind_target(&mut self, target: TargetId) {
        if self.bound != Some(target) {
            self.violations.push(Violation::UnbindNotBound {
                target,
                bound: self.bound,
            });
        }
        self.bound = None;
        self.commands.push(Command::UnbindTarget(target));
    }

    fn clear(&mut self, color: Vec4) {
        let Some(target) = self.bound else {
            self.violations.push(Violation::ClearWithoutTarget);
            return;
        };
        self.commands.push(Command::Clear { target, color });
    }

    fn set_raster_state(&mut self, state: RasterState) {
        self.commands.push(Command::SetRasterState(state));
    }

    fn set_camera(&mut self, view_projection: &Mat4, position: Vec3) {
        self.commands.push(Command::SetCamera {
            view_projection: *view_projection,
            position,
        });
    }

    fn program(&mut self, name: &str) -> Option<ShaderId> {
        self.programs.get(name).copied()
    }

    fn select_shader(&mut self, base: ShaderId, signature: &ShaderSignature) -> Option<ShaderId> {
        if !self.program_names.contains_key(&base) {
            self.violations.push(Violation::UnknownShader(base));
            return None;
        }
        if self.unlinked.contains(&base) {
            return None;
        }
        if signature.is_empty() {
            return Some(base);
        }

        let key = (base, signature.hash_value());
        if let Some(&variant) = self.variants.get(&key) {
            return Some(variant);
        }
        let variant = ShaderId(self.next_shader);
        self.next_shader += 1;
        self.variants.insert(key, variant);
        self.variant_base.insert(variant, base);
        Some(variant)
    }

    fn use_shader(&mut self, shader: ShaderId) {
        if self.program_name(shader).is_none() {
            self.violations.push(Violation::UnknownShader(shader));
        }
        self.shader = Some(shader);
        self.commands.push(Command::UseShader(shader));
    }

    fn bind_uniforms(&mut self, shader: ShaderId, uniforms: &Uniforms) -> Result<(), BindError> {
        if self.program_name(shader).is_none() {
            return Err(BindError::UnknownShader(shader));
        }
        self.commands.push(Command::BindUniforms {
            shader,
            count: uniforms.len(),
        });
        Ok(())
    }

    fn bind_samplers(&mut self, shader: ShaderId, samplers: &[Sampler]) -> Result<(), BindError> {
        let required = self.required_for(shader)?;
        if let Some(missing) = required
            .iter()
            .find(|name| !samplers.iter().any(|s| &s.name == *name))
        {
            return Err(BindError::MissingBinding {
                shader,
                name: missing.clone(),
            });
        }
        for sampler in samplers {
            if self.textures.get(&sampler.texture.slot) != Some(&sampler.texture.generation) {
                return Err(BindError::StaleTexture {
                    name: sampler.name.clone(),
                });
            }
        }

        self.commands.push(Command::BindSamplers {
            shader,
            names: samplers.iter().map(|s| s.name.clone()).collect(),
        });
        Ok(())
    }

    fn draw_mesh(&mut self, mesh: MeshId, _transform: &Mat4) {
        if let Some((target, shader)) = self.current() {
            self.commands.push(Command::DrawMesh {
                target,
                shader,
                mesh,
            });
        }
    }

    fn draw_fullscreen_quad(&mut self) {
        if let Some((target, shader)) = self.current() {
            self.commands
                .push(Command::DrawFullscreenQuad { target, shader });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::ColorFormat;

    #[test]
    fn stale_samplers_are_rejected_after_resize() {
        let mut gfx = RecordingContext::new();
        let allocation = gfx
            .create_target("a", &TargetDesc::color(UVec2::new(4, 4), ColorFormat::Rgba8))
            .unwrap();
        let sampler = Sampler::new("src", allocation.textures[0]);
        let shader = gfx.program(programs::SCREEN_QUAD).unwrap();

        assert!(gfx.bind_samplers(shader, &[sampler.clone()]).is_ok());
        gfx.resize_target(allocation.target, UVec2::new(8, 8)).unwrap();
        assert_eq!(
            gfx.bind_samplers(shader, &[sampler]),
            Err(BindError::StaleTexture { name: "src".into() })
        );
    }

    #[test]
    fn required_samplers_must_be_present() {
        let mut gfx = RecordingContext::new().require_samplers(programs::TONEMAP, &["src"]);
        let shader = gfx.program(programs::TONEMAP).unwrap();
        assert!(matches!(
            gfx.bind_samplers(shader, &[]),
            Err(BindError::MissingBinding { ref name, .. }) if name == "src"
        ));
    }

    #[test]
    fn variants_share_required_samplers_with_their_base() {
        let mut gfx = RecordingContext::new().require_samplers(programs::GBUFFER, &["albedo"]);
        let base = gfx.program(programs::GBUFFER).unwrap();
        let variant = gfx
            .select_shader(base, &ShaderSignature::new().with("USE_NORMAL_MAP", "1"))
            .unwrap();
        assert_ne!(variant, base);
        assert_eq!(gfx.program_name(variant), Some(programs::GBUFFER));
        assert!(gfx.bind_samplers(variant, &[]).is_err());
    }

    #[test]
    fn protocol_violations_are_recorded() {
        let mut gfx = RecordingContext::new();
        gfx.draw_fullscreen_quad();
        gfx.clear(Vec4::ZERO);
        gfx.bind_target(TargetId::SCREEN);
        gfx.unbind_target(TargetId(42));

        assert_eq!(
            gfx.violations(),
            &[
                Violation::DrawWithoutTarget,
                Violation::ClearWithoutTarget,
                Violation::UnbindNotBound {
                    target: TargetId(42),
                    bound: Some(TargetId::SCREEN)
                },
            ]
        );
    }

    #[test]
    fn shared_depth_must_exist() {
        let mut gfx = RecordingContext::new();
        let desc = TargetDesc::color(UVec2::new(4, 4), ColorFormat::R8)
            .with_depth(DepthAttachment::Shared(DepthId(99)));
        assert!(matches!(
            gfx.create_target("oit", &desc),
            Err(ContextError::UnknownDepth(_))
        ));
    }
}
