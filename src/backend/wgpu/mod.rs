//! A [`GraphicsContext`] backed by wgpu.
//!
//! Targets are real textures; depth resources live in their own table so
//! several targets can attach the same one. Programs are WGSL modules
//! registered by name (see [`WgpuProgram`]) and turned into render pipelines
//! on demand, one per program, raster state and attachment layout.
//!
//! Calls are not encoded immediately. Everything between `bind_target` and
//! `unbind_target` becomes a pass segment; [`WgpuContext::submit`] encodes the
//! segments as render passes in call order and submits them in one command
//! buffer.
//!
//! # Example
//!
//! ```ignore
//! let mut gfx = WgpuContext::headless(UVec2::new(1280, 720))?;
//! gfx.register_program("gbuffer", WgpuProgram::mesh(GBUFFER_WGSL));
//! gfx.register_program(
//!     "pbr-lights",
//!     WgpuProgram::fullscreen(LIGHTS_WGSL)
//!         .with_samplers(&["colorMetallic", "normalRoughness", "positionOcclusion"]),
//! );
//! let mesh = gfx.upload_mesh(&geometry);
//!
//! engine.render_frame(&mut gfx, &scene)?;
//! gfx.submit();
//! ```

mod program;
mod resources;

use std::collections::HashMap;

use glam::{Mat4, UVec2, Vec3, Vec4};
use wgpu::util::DeviceExt;

pub use program::{ProgramKind, WgpuProgram};

use program::{ProgramRegistry, SharedLayouts};
use resources::{
    CameraUniforms, GpuDepth, GpuTarget, GpuTexture, ModelUniforms, TargetLayout, color_format,
    depth_format,
};

use crate::context::{
    BlendMode, Capabilities, DepthId, GraphicsContext, MeshId, RasterState, ShaderId, TargetId,
    TextureId,
};
use crate::error::{BindError, ContextError};
use crate::geometry::RawGeometry;
use crate::material::{Sampler, ShaderSignature, Uniforms};
use crate::stage::programs;
use crate::target::{DepthAttachment, TargetAllocation, TargetDesc, Viewport};

/// Format of the headless screen target.
pub const SCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

enum DrawGeometry {
    Fullscreen,
    Mesh(MeshId),
}

struct DrawOp {
    pipeline: wgpu::RenderPipeline,
    viewport: Viewport,
    camera: wgpu::BindGroup,
    material: wgpu::BindGroup,
    textures: wgpu::BindGroup,
    model: Option<wgpu::BindGroup>,
    geometry: DrawGeometry,
}

/// Calls recorded between binding and unbinding one target.
struct Segment {
    target: TargetId,
    clear: Option<Vec4>,
    draws: Vec<DrawOp>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    shader: ShaderId,
    raster: RasterState,
    layout: TargetLayout,
}

pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    capabilities: Capabilities,
    layouts: SharedLayouts,
    programs: ProgramRegistry,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    sampler: wgpu::Sampler,
    empty_material: wgpu::BindGroup,
    camera: wgpu::BindGroup,

    textures: Vec<GpuTexture>,
    depths: HashMap<DepthId, GpuDepth>,
    targets: HashMap<TargetId, GpuTarget>,
    meshes: HashMap<MeshId, GpuMesh>,
    next_target: u32,
    next_depth: u32,
    next_mesh: u32,

    shader: Option<ShaderId>,
    raster: RasterState,
    material_groups: HashMap<ShaderId, wgpu::BindGroup>,
    texture_groups: HashMap<ShaderId, wgpu::BindGroup>,
    open: Option<Segment>,
    segments: Vec<Segment>,
}

impl WgpuContext {
    /// Creates a device with no surface and an offscreen screen target of `size`.
    ///
    /// # Errors
    ///
    /// Fails if no adapter is available or the device cannot be created.
    pub fn headless(size: UVec2) -> Result<Self, ContextError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| ContextError::Device(format!("no suitable adapter: {e}")))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Strata Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: Default::default(),
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(|e| ContextError::Device(format!("device creation failed: {e}")))?;

        log::info!("Created headless wgpu device on {}", adapter.get_info().name);
        Ok(Self::from_device(device, queue, size))
    }

    /// Wraps a device the host already owns. The screen target is an offscreen
    /// texture of `size`; copy it to a surface with [`screen_texture`](Self::screen_texture).
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, size: UVec2) -> Self {
        let limits = device.limits();
        let capabilities = Capabilities {
            max_color_attachments: limits.max_color_attachments,
            max_texture_dimension: limits.max_texture_dimension_2d,
        };
        let layouts = SharedLayouts::new(&device);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Stage Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let empty_material =
            uniform_group(&device, &layouts.material, "Empty Material", &[0.0f32; 4]);
        let camera = uniform_group(
            &device,
            &layouts.camera,
            "Camera Uniforms",
            &[CameraUniforms {
                view_proj: Mat4::IDENTITY.to_cols_array_2d(),
                position: [0.0; 4],
            }],
        );

        let mut gfx = Self {
            device,
            queue,
            capabilities,
            layouts,
            programs: ProgramRegistry::new(),
            pipelines: HashMap::new(),
            sampler,
            empty_material,
            camera,
            textures: Vec::new(),
            depths: HashMap::new(),
            targets: HashMap::new(),
            meshes: HashMap::new(),
            next_target: 1,
            next_depth: 0,
            next_mesh: 0,
            shader: None,
            raster: RasterState::OPAQUE,
            material_groups: HashMap::new(),
            texture_groups: HashMap::new(),
            open: None,
            segments: Vec::new(),
        };

        let size = size.max(UVec2::ONE);
        let slot = gfx.push_texture("screen", size, SCREEN_FORMAT, 0);
        gfx.targets.insert(
            TargetId::SCREEN,
            GpuTarget {
                label: "screen".to_string(),
                desc: TargetDesc::color(size, crate::target::ColorFormat::Rgba8),
                slots: vec![slot],
                depth: None,
                owns_depth: false,
                viewport: Viewport::full(size),
            },
        );

        gfx.register_program(
            programs::SCREEN_QUAD,
            WgpuProgram::fullscreen(include_str!("../../shaders/screen_quad.wgsl"))
                .with_samplers(&[crate::stage::post_process::SOURCE_SAMPLER]),
        );
        gfx
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Registers (or hot-swaps) a named program. Previously compiled variants
    /// and pipelines of the same name are dropped.
    pub fn register_program(&mut self, name: &str, program: WgpuProgram) -> ShaderId {
        let id = self
            .programs
            .register(&self.device, &self.layouts, name, program);
        self.pipelines.retain(|key, _| key.shader != id);
        self.material_groups.remove(&id);
        self.texture_groups.remove(&id);
        id
    }

    /// Uploads geometry and returns the handle drawables refer to.
    pub fn upload_mesh(&mut self, geometry: &RawGeometry) -> MeshId {
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh Vertex Buffer"),
                contents: bytemuck::cast_slice(&geometry.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh Index Buffer"),
                contents: bytemuck::cast_slice(&geometry.indices),
                usage: wgpu::BufferUsages::INDEX,
            });

        let id = MeshId(self.next_mesh);
        self.next_mesh += 1;
        self.meshes.insert(
            id,
            GpuMesh {
                vertex_buffer,
                index_buffer,
                index_count: geometry.indices.len() as u32,
            },
        );
        id
    }

    /// The texture behind [`TargetId::SCREEN`].
    pub fn screen_texture(&self) -> Option<&wgpu::Texture> {
        let target = self.targets.get(&TargetId::SCREEN)?;
        let slot = *target.slots.first()?;
        self.textures.get(slot as usize).map(|t| &t.texture)
    }

    /// Current size of `target`.
    pub fn target_size(&self, target: TargetId) -> Option<UVec2> {
        self.targets.get(&target).map(|t| t.desc.size)
    }

    /// Number of pass segments waiting for [`submit`](Self::submit).
    pub fn pending_segments(&self) -> usize {
        self.segments.len() + usize::from(self.open.is_some())
    }

    /// Encodes every recorded segment and submits them to the queue.
    pub fn submit(&mut self) {
        self.close_segment();
        let segments = std::mem::take(&mut self.segments);
        if segments.is_empty() {
            return;
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Strata Frame Encoder"),
            });

        let mut passes = 0;
        for segment in &segments {
            if segment.clear.is_none() && segment.draws.is_empty() {
                continue;
            }
            self.encode_segment(&mut encoder, segment);
            passes += 1;
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        log::trace!("Submitted {passes} render passes");
    }

    fn encode_segment(&self, encoder: &mut wgpu::CommandEncoder, segment: &Segment) {
        let Some(target) = self.targets.get(&segment.target) else {
            log::warn!("Dropping pass for destroyed target {:?}", segment.target);
            return;
        };

        let load = match segment.clear {
            Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
                r: c.x as f64,
                g: c.y as f64,
                b: c.z as f64,
                a: c.w as f64,
            }),
            None => wgpu::LoadOp::Load,
        };
        let color_attachments: Vec<_> = target
            .slots
            .iter()
            .filter_map(|&slot| self.textures.get(slot as usize))
            .map(|texture| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &texture.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })
            })
            .collect();

        let depth = target.depth.and_then(|id| self.depths.get(&id));
        // Shared depth belongs to another target's pass; never clear it here.
        let clear_depth = segment.clear.is_some() && target.owns_depth;
        let depth_load = if clear_depth {
            wgpu::LoadOp::Clear(1.0)
        } else {
            wgpu::LoadOp::Load
        };
        let stencil_load = if clear_depth {
            wgpu::LoadOp::Clear(0)
        } else {
            wgpu::LoadOp::Load
        };

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(target.label.as_str()),
            color_attachments: &color_attachments,
            depth_stencil_attachment: depth.map(|depth| wgpu::RenderPassDepthStencilAttachment {
                view: &depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: depth_load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: depth.has_stencil().then_some(wgpu::Operations {
                    load: stencil_load,
                    store: wgpu::StoreOp::Store,
                }),
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for draw in &segment.draws {
            let v = draw.viewport;
            render_pass.set_viewport(
                v.x as f32,
                v.y as f32,
                v.width as f32,
                v.height as f32,
                0.0,
                1.0,
            );
            render_pass.set_pipeline(&draw.pipeline);
            render_pass.set_bind_group(0, &draw.camera, &[]);
            render_pass.set_bind_group(1, &draw.material, &[]);
            render_pass.set_bind_group(2, &draw.textures, &[]);
            if let Some(model) = &draw.model {
                render_pass.set_bind_group(3, model, &[]);
            }
            match draw.geometry {
                DrawGeometry::Fullscreen => render_pass.draw(0..3, 0..1),
                DrawGeometry::Mesh(id) => {
                    let Some(mesh) = self.meshes.get(&id) else {
                        continue;
                    };
                    render_pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                    render_pass
                        .set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    render_pass.draw_indexed(0..mesh.index_count, 0, 0..1);
                }
            }
        }
    }

    fn push_texture(
        &mut self,
        label: &str,
        size: UVec2,
        format: wgpu::TextureFormat,
        generation: u32,
    ) -> u32 {
        let slot = self.textures.len() as u32;
        self.textures
            .push(GpuTexture::new(&self.device, label, size, format, generation));
        slot
    }

    fn close_segment(&mut self) {
        if let Some(segment) = self.open.take() {
            self.segments.push(segment);
        }
    }

    fn target_layout(&self, target: &GpuTarget) -> TargetLayout {
        TargetLayout {
            colors: target
                .slots
                .iter()
                .filter_map(|&slot| self.textures.get(slot as usize))
                .map(|t| t.format)
                .collect(),
            depth: target
                .depth
                .and_then(|id| self.depths.get(&id))
                .map(|d| d.format),
        }
    }

    fn pipeline(&mut self, shader: ShaderId, layout: TargetLayout) -> Option<wgpu::RenderPipeline> {
        let key = PipelineKey {
            shader,
            raster: self.raster,
            layout,
        };
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Some(pipeline.clone());
        }
        let program = self.programs.get(shader)?;

        let blend = blend_state(self.raster.blend);
        let targets: Vec<_> = key
            .layout
            .colors
            .iter()
            .map(|&format| {
                Some(wgpu::ColorTargetState {
                    format,
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();
        let buffers: &[wgpu::VertexBufferLayout] = match program.kind {
            ProgramKind::Fullscreen => &[],
            ProgramKind::Mesh => &[crate::geometry::Vertex3d::LAYOUT],
        };

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(program.name.as_str()),
                layout: Some(&program.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &program.module,
                    entry_point: Some("vs"),
                    buffers,
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.module,
                    entry_point: Some("fs"),
                    targets: &targets,
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode: self.raster.cull_back_faces.then_some(wgpu::Face::Back),
                    front_face: wgpu::FrontFace::Ccw,
                    ..Default::default()
                },
                depth_stencil: key.layout.depth.map(|format| wgpu::DepthStencilState {
                    format,
                    depth_write_enabled: self.raster.depth_write,
                    depth_compare: if self.raster.depth_test {
                        wgpu::CompareFunction::Less
                    } else {
                        wgpu::CompareFunction::Always
                    },
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
        log::debug!("Built pipeline for '{}' ({:?})", program.name, self.raster);
        self.pipelines.insert(key, pipeline.clone());
        Some(pipeline)
    }

    fn record_draw(&mut self, geometry: DrawGeometry, transform: &Mat4) {
        let Some(target_id) = self.open.as_ref().map(|s| s.target) else {
            log::warn!("Draw issued with no render target bound");
            return;
        };
        let Some(shader) = self.shader else {
            log::warn!("Draw issued with no shader in use");
            return;
        };
        let Some(target) = self.targets.get(&target_id) else {
            return;
        };
        let viewport = target.viewport;
        let layout = self.target_layout(target);

        let Some(program) = self.programs.get(shader) else {
            log::warn!("Draw issued with unknown shader {shader:?}");
            return;
        };
        let kind = program.kind;
        match (&geometry, kind) {
            (DrawGeometry::Fullscreen, ProgramKind::Mesh)
            | (DrawGeometry::Mesh(_), ProgramKind::Fullscreen) => {
                log::warn!("Program '{}' cannot draw {kind:?} geometry here", program.name);
                return;
            }
            _ => {}
        }

        let textures = match self.texture_groups.get(&shader) {
            Some(group) => group.clone(),
            None if program.samplers.is_empty() => {
                let group =
                    texture_group(&self.device, &self.sampler, &program.texture_layout, &[]);
                self.texture_groups.insert(shader, group.clone());
                group
            }
            None => {
                log::warn!("Program '{}' drawn without its samplers bound", program.name);
                return;
            }
        };
        let material = self
            .material_groups
            .get(&shader)
            .cloned()
            .unwrap_or_else(|| self.empty_material.clone());
        let model = match geometry {
            DrawGeometry::Fullscreen => None,
            DrawGeometry::Mesh(_) => Some(uniform_group(
                &self.device,
                &self.layouts.model,
                "Model Uniforms",
                &[ModelUniforms {
                    model: transform.to_cols_array_2d(),
                    normal_matrix: transform.inverse().transpose().to_cols_array_2d(),
                }],
            )),
        };

        let Some(pipeline) = self.pipeline(shader, layout) else {
            return;
        };
        let camera = self.camera.clone();
        if let Some(segment) = self.open.as_mut() {
            segment.draws.push(DrawOp {
                pipeline,
                viewport,
                camera,
                material,
                textures,
                model,
                geometry,
            });
        }
    }

    fn allocation(&self, target: TargetId) -> Option<TargetAllocation> {
        let gpu = self.targets.get(&target)?;
        Some(TargetAllocation {
            target,
            textures: gpu
                .slots
                .iter()
                .filter_map(|&slot| {
                    self.textures
                        .get(slot as usize)
                        .map(|t| TextureId::new(slot, t.generation))
                })
                .collect(),
            depth: gpu.depth,
        })
    }
}

fn texture_group(
    device: &wgpu::Device,
    sampler: &wgpu::Sampler,
    layout: &wgpu::BindGroupLayout,
    views: &[&wgpu::TextureView],
) -> wgpu::BindGroup {
    let mut entries = vec![wgpu::BindGroupEntry {
        binding: 0,
        resource: wgpu::BindingResource::Sampler(sampler),
    }];
    entries.extend(views.iter().enumerate().map(|(i, view)| wgpu::BindGroupEntry {
        binding: i as u32 + 1,
        resource: wgpu::BindingResource::TextureView(view),
    }));
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Texture Bind Group"),
        layout,
        entries: &entries,
    })
}

fn uniform_group<T: bytemuck::Pod>(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    label: &str,
    contents: &[T],
) -> wgpu::BindGroup {
    let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(contents),
        usage: wgpu::BufferUsages::UNIFORM,
    });
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: buffer.as_entire_binding(),
        }],
    })
}

fn blend_state(mode: BlendMode) -> Option<wgpu::BlendState> {
    let additive = wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    };
    let revealage = wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::Zero,
        dst_factor: wgpu::BlendFactor::OneMinusSrc,
        operation: wgpu::BlendOperation::Add,
    };
    match mode {
        BlendMode::Replace => None,
        BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
        BlendMode::Additive => Some(wgpu::BlendState {
            color: additive,
            alpha: additive,
        }),
        BlendMode::Revealage => Some(wgpu::BlendState {
            color: revealage,
            alpha: revealage,
        }),
    }
}

impl GraphicsContext for WgpuContext {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn create_target(
        &mut self,
        label: &str,
        desc: &TargetDesc,
    ) -> Result<TargetAllocation, ContextError> {
        let max = self.capabilities.max_texture_dimension;
        if desc.size.x > max || desc.size.y > max {
            return Err(ContextError::Device(format!(
                "render target '{label}' is {}x{}, device maximum is {max}",
                desc.size.x, desc.size.y
            )));
        }

        let (depth, owns_depth) = match desc.depth {
            DepthAttachment::Shared(id) => {
                if !self.depths.contains_key(&id) {
                    return Err(ContextError::UnknownDepth(label.to_string()));
                }
                (Some(id), false)
            }
            other => match depth_format(other) {
                Some(format) => {
                    let id = DepthId(self.next_depth);
                    self.next_depth += 1;
                    let depth_label = format!("{label} depth");
                    self.depths.insert(
                        id,
                        GpuDepth::new(&self.device, &depth_label, desc.size, format),
                    );
                    (Some(id), true)
                }
                None => (None, false),
            },
        };

        let slots = desc
            .colors
            .iter()
            .enumerate()
            .map(|(i, &format)| {
                self.push_texture(&format!("{label} {i}"), desc.size, color_format(format), 0)
            })
            .collect();

        let id = TargetId(self.next_target);
        self.next_target += 1;
        self.targets.insert(
            id,
            GpuTarget {
                label: label.to_string(),
                desc: desc.clone(),
                slots,
                depth,
                owns_depth,
                viewport: Viewport::full(desc.size),
            },
        );
        log::debug!(
            "Created target '{label}' {:?}: {}x{}, {} color attachments",
            id,
            desc.size.x,
            desc.size.y,
            desc.colors.len()
        );
        self.allocation(id).ok_or(ContextError::UnknownTarget(id))
    }

    fn resize_target(
        &mut self,
        target: TargetId,
        size: UVec2,
    ) -> Result<TargetAllocation, ContextError> {
        let Some(gpu) = self.targets.get_mut(&target) else {
            return Err(ContextError::UnknownTarget(target));
        };
        gpu.desc.size = size;
        let label = gpu.label.clone();
        let slots = gpu.slots.clone();
        let owned_depth = gpu.depth.filter(|_| gpu.owns_depth);

        for (i, slot) in slots.into_iter().enumerate() {
            if let Some(texture) = self.textures.get_mut(slot as usize) {
                *texture = GpuTexture::new(
                    &self.device,
                    &format!("{label} {i}"),
                    size,
                    texture.format,
                    texture.generation + 1,
                );
            }
        }
        if let Some(id) = owned_depth {
            if let Some(depth) = self.depths.get_mut(&id) {
                *depth = GpuDepth::new(&self.device, &format!("{label} depth"), size, depth.format);
            }
        }
        // Bind groups may reference the old views.
        self.texture_groups.clear();

        log::debug!("Resized target '{label}' to {}x{}", size.x, size.y);
        self.allocation(target).ok_or(ContextError::UnknownTarget(target))
    }

    fn set_viewport(&mut self, target: TargetId, viewport: Viewport) {
        if let Some(gpu) = self.targets.get_mut(&target) {
            gpu.viewport = viewport;
        }
    }

    fn bind_target(&mut self, target: TargetId) {
        self.close_segment();
        if !self.targets.contains_key(&target) {
            log::warn!("Binding unknown target {target:?}");
            return;
        }
        self.open = Some(Segment {
            target,
            clear: None,
            draws: Vec::new(),
        });
    }

    fn unbind_target(&mut self, target: TargetId) {
        match self.open.as_ref().map(|s| s.target) {
            Some(bound) if bound == target => self.close_segment(),
            bound => log::warn!("Unbinding {target:?} while {bound:?} is bound"),
        }
    }

    fn clear(&mut self, color: Vec4) {
        let Some(target) = self.open.as_ref().map(|s| s.target) else {
            log::warn!("Clear issued with no render target bound");
            return;
        };
        if self.open.as_ref().is_some_and(|s| !s.draws.is_empty()) {
            self.close_segment();
            self.open = Some(Segment {
                target,
                clear: None,
                draws: Vec::new(),
            });
        }
        if let Some(segment) = self.open.as_mut() {
            segment.clear = Some(color);
        }
    }

    fn set_raster_state(&mut self, state: RasterState) {
        self.raster = state;
    }

    fn set_camera(&mut self, view_projection: &Mat4, position: Vec3) {
        self.camera = uniform_group(
            &self.device,
            &self.layouts.camera,
            "Camera Uniforms",
            &[CameraUniforms {
                view_proj: view_projection.to_cols_array_2d(),
                position: position.extend(1.0).to_array(),
            }],
        );
    }

    fn program(&mut self, name: &str) -> Option<ShaderId> {
        self.programs.lookup(name)
    }

    fn select_shader(&mut self, base: ShaderId, signature: &ShaderSignature) -> Option<ShaderId> {
        self.programs
            .variant(&self.device, &self.layouts, base, signature)
    }

    fn use_shader(&mut self, shader: ShaderId) {
        self.shader = Some(shader);
    }

    fn bind_uniforms(&mut self, shader: ShaderId, uniforms: &Uniforms) -> Result<(), BindError> {
        if self.programs.get(shader).is_none() {
            return Err(BindError::UnknownShader(shader));
        }
        let mut packed = uniforms.pack_std140();
        if packed.is_empty() {
            packed.resize(4, 0.0);
        }
        let group = uniform_group(
            &self.device,
            &self.layouts.material,
            "Material Uniforms",
            &packed,
        );
        self.material_groups.insert(shader, group);
        Ok(())
    }

    fn bind_samplers(&mut self, shader: ShaderId, samplers: &[Sampler]) -> Result<(), BindError> {
        let program = self
            .programs
            .get(shader)
            .ok_or(BindError::UnknownShader(shader))?;

        let mut views = Vec::with_capacity(program.samplers.len());
        for name in &program.samplers {
            let sampler = samplers
                .iter()
                .find(|s| &s.name == name)
                .ok_or_else(|| BindError::MissingBinding {
                    shader,
                    name: name.clone(),
                })?;
            let texture = self
                .textures
                .get(sampler.texture.slot as usize)
                .filter(|t| t.generation == sampler.texture.generation)
                .ok_or_else(|| BindError::StaleTexture { name: name.clone() })?;
            views.push(&texture.view);
        }

        let group = texture_group(&self.device, &self.sampler, &program.texture_layout, &views);
        self.texture_groups.insert(shader, group);
        Ok(())
    }

    fn draw_mesh(&mut self, mesh: MeshId, transform: &Mat4) {
        if !self.meshes.contains_key(&mesh) {
            log::warn!("Drawing mesh {mesh:?} which was never uploaded");
            return;
        }
        self.record_draw(DrawGeometry::Mesh(mesh), transform);
    }

    fn draw_fullscreen_quad(&mut self) {
        self.record_draw(DrawGeometry::Fullscreen, &Mat4::IDENTITY);
    }
}

impl std::fmt::Debug for WgpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuContext")
            .field("targets", &self.targets.len())
            .field("textures", &self.textures.len())
            .field("pipelines", &self.pipelines.len())
            .field("pending_segments", &self.pending_segments())
            .finish()
    }
}
