//! WGSL programs and their signature variants.
//!
//! A program is registered once under a name with its WGSL source and the
//! sampler names it reads, in binding order. Variants are compiled lazily the
//! first time a signature is selected: each definition whose value is a number
//! or a boolean is prepended as a WGSL `const`, so shaders branch on
//! `HAS_NORMAL_MAP` and friends without a preprocessor.
//!
//! Bind group convention shared by every program:
//!
//! | group | binding | contents                                   |
//! |-------|---------|--------------------------------------------|
//! | 0     | 0       | camera block (`view_proj`, `position`)     |
//! | 1     | 0       | material uniforms, std140, name order      |
//! | 2     | 0       | non-filtering sampler                      |
//! | 2     | 1..=n   | textures, one per declared sampler name    |
//! | 3     | 0       | model block (`model`, mesh programs only)  |

use std::collections::HashMap;

use crate::context::ShaderId;
use crate::material::ShaderSignature;

/// What a program draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    /// Vertex shader emits a full-screen triangle from `vertex_index`; no
    /// vertex buffer, no model block.
    Fullscreen,
    /// Vertex shader consumes [`Vertex3d`](crate::geometry::Vertex3d) buffers.
    Mesh,
}

/// Source of one named program.
#[derive(Clone, Debug)]
pub struct WgpuProgram {
    pub wgsl: String,
    pub kind: ProgramKind,
    pub samplers: Vec<String>,
}

impl WgpuProgram {
    pub fn fullscreen(wgsl: impl Into<String>) -> Self {
        Self {
            wgsl: wgsl.into(),
            kind: ProgramKind::Fullscreen,
            samplers: Vec::new(),
        }
    }

    pub fn mesh(wgsl: impl Into<String>) -> Self {
        Self {
            wgsl: wgsl.into(),
            kind: ProgramKind::Mesh,
            samplers: Vec::new(),
        }
    }

    /// Declares the sampler names the shader reads, bound at group 2 from
    /// binding 1 onwards.
    pub fn with_samplers(mut self, names: &[&str]) -> Self {
        self.samplers = names.iter().map(|name| name.to_string()).collect();
        self
    }
}

/// A compiled program or variant.
pub(super) struct Program {
    pub name: String,
    pub kind: ProgramKind,
    pub samplers: Vec<String>,
    pub module: wgpu::ShaderModule,
    pub texture_layout: wgpu::BindGroupLayout,
    pub pipeline_layout: wgpu::PipelineLayout,
}

/// Layouts every program shares.
pub(super) struct SharedLayouts {
    pub camera: wgpu::BindGroupLayout,
    pub material: wgpu::BindGroupLayout,
    pub model: wgpu::BindGroupLayout,
}

impl SharedLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            camera: uniform_layout(device, "Camera Bind Group Layout"),
            material: uniform_layout(device, "Material Bind Group Layout"),
            model: uniform_layout(device, "Model Bind Group Layout"),
        }
    }
}

fn uniform_layout(device: &wgpu::Device, label: &str) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

fn texture_layout(device: &wgpu::Device, label: &str, count: usize) -> wgpu::BindGroupLayout {
    let mut entries = vec![wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
        count: None,
    }];
    entries.extend((0..count).map(|i| wgpu::BindGroupLayoutEntry {
        binding: i as u32 + 1,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }));
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &entries,
    })
}

/// WGSL `const` declarations for the numeric and boolean definitions of
/// `signature`. Other values only select the variant.
pub(super) fn signature_prelude(signature: &ShaderSignature) -> String {
    let mut prelude = String::new();
    for (name, value) in signature.definitions() {
        if value == "true" || value == "false" {
            prelude.push_str(&format!("const {name}: bool = {value};\n"));
        } else if value.parse::<i32>().is_ok() {
            prelude.push_str(&format!("const {name}: i32 = {value};\n"));
        } else if value.parse::<f32>().is_ok() {
            prelude.push_str(&format!("const {name}: f32 = {value};\n"));
        }
    }
    prelude
}

/// Named programs, their variants, and what has been compiled so far.
pub(super) struct ProgramRegistry {
    sources: HashMap<String, ShaderId>,
    programs: HashMap<ShaderId, Program>,
    bases: HashMap<ShaderId, (String, WgpuProgram)>,
    variants: HashMap<(ShaderId, u64), ShaderId>,
    next: u32,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            programs: HashMap::new(),
            bases: HashMap::new(),
            variants: HashMap::new(),
            next: 1,
        }
    }

    fn allocate(&mut self) -> ShaderId {
        let id = ShaderId(self.next);
        self.next += 1;
        id
    }

    /// Registers (or replaces) `name` and compiles its base variant.
    pub fn register(
        &mut self,
        device: &wgpu::Device,
        layouts: &SharedLayouts,
        name: &str,
        source: WgpuProgram,
    ) -> ShaderId {
        let id = match self.sources.get(name) {
            Some(&id) => {
                self.variants.retain(|(base, _), _| *base != id);
                id
            }
            None => {
                let id = self.allocate();
                self.sources.insert(name.to_string(), id);
                id
            }
        };
        let program = compile(device, layouts, name, &source, "");
        self.programs.insert(id, program);
        self.bases.insert(id, (name.to_string(), source));
        log::debug!("Registered program '{name}' as {id:?}");
        id
    }

    pub fn lookup(&self, name: &str) -> Option<ShaderId> {
        self.sources.get(name).copied()
    }

    pub fn get(&self, id: ShaderId) -> Option<&Program> {
        self.programs.get(&id)
    }

    /// Returns the variant of `base` for `signature`, compiling it on first use.
    pub fn variant(
        &mut self,
        device: &wgpu::Device,
        layouts: &SharedLayouts,
        base: ShaderId,
        signature: &ShaderSignature,
    ) -> Option<ShaderId> {
        if signature.is_empty() {
            return self.programs.contains_key(&base).then_some(base);
        }
        let key = (base, signature.hash_value());
        if let Some(&id) = self.variants.get(&key) {
            return Some(id);
        }
        let (name, source) = self.bases.get(&base)?.clone();
        let prelude = signature_prelude(signature);
        let program = compile(device, layouts, &name, &source, &prelude);
        let id = self.allocate();
        self.programs.insert(id, program);
        self.variants.insert(key, id);
        log::debug!("Compiled variant {id:?} of '{name}'");
        Some(id)
    }
}

fn compile(
    device: &wgpu::Device,
    layouts: &SharedLayouts,
    name: &str,
    source: &WgpuProgram,
    prelude: &str,
) -> Program {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(name),
        source: wgpu::ShaderSource::Wgsl(format!("{prelude}{}", source.wgsl).into()),
    });
    let texture_layout = texture_layout(device, name, source.samplers.len());

    let mut groups = vec![&layouts.camera, &layouts.material, &texture_layout];
    if source.kind == ProgramKind::Mesh {
        groups.push(&layouts.model);
    }
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(name),
        bind_group_layouts: &groups,
        push_constant_ranges: &[],
    });

    Program {
        name: name.to_string(),
        kind: source.kind,
        samplers: source.samplers.clone(),
        module,
        texture_layout,
        pipeline_layout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_declares_numeric_and_boolean_definitions() {
        let signature = ShaderSignature::new()
            .with("SHADER", "pbr")
            .with("HAS_NORMAL_MAP", "true")
            .with("LIGHT_COUNT", "4")
            .with("ALPHA_CUTOFF", "0.5");

        let prelude = signature_prelude(&signature);

        assert!(prelude.contains("const HAS_NORMAL_MAP: bool = true;"));
        assert!(prelude.contains("const LIGHT_COUNT: i32 = 4;"));
        assert!(prelude.contains("const ALPHA_CUTOFF: f32 = 0.5;"));
        assert!(!prelude.contains("SHADER"));
    }

    #[test]
    fn sampler_declaration_keeps_order() {
        let source = WgpuProgram::fullscreen("")
            .with_samplers(&["colorMetallic", "normalRoughness", "positionOcclusion"]);
        assert_eq!(source.samplers[2], "positionOcclusion");
        assert_eq!(source.kind, ProgramKind::Fullscreen);
    }
}
