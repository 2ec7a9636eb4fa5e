use glam::UVec2;

use crate::context::DepthId;
use crate::target::{ColorFormat, DepthAttachment, TargetDesc, Viewport};

/// Camera block at group 0.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub(super) struct CameraUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub position: [f32; 4],
}

/// Model block at group 3.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub(super) struct ModelUniforms {
    pub model: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
}

pub(super) fn color_format(format: ColorFormat) -> wgpu::TextureFormat {
    match format {
        ColorFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        ColorFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        ColorFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        ColorFormat::R8 => wgpu::TextureFormat::R8Unorm,
        ColorFormat::R16Float => wgpu::TextureFormat::R16Float,
        ColorFormat::R32Float => wgpu::TextureFormat::R32Float,
    }
}

pub(super) fn depth_format(depth: DepthAttachment) -> Option<wgpu::TextureFormat> {
    match depth {
        DepthAttachment::None | DepthAttachment::Shared(_) => None,
        DepthAttachment::Depth => Some(wgpu::TextureFormat::Depth32Float),
        DepthAttachment::DepthStencil => Some(wgpu::TextureFormat::Depth24PlusStencil8),
    }
}

fn extent(size: UVec2) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.x,
        height: size.y,
        depth_or_array_layers: 1,
    }
}

/// One color attachment. Its slot is its index in the context's texture table.
pub(super) struct GpuTexture {
    pub generation: u32,
    pub format: wgpu::TextureFormat,
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl GpuTexture {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        size: UVec2,
        format: wgpu::TextureFormat,
        generation: u32,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            generation,
            format,
            texture,
            view,
        }
    }
}

/// A depth or depth/stencil surface, possibly attached to several targets.
pub(super) struct GpuDepth {
    pub format: wgpu::TextureFormat,
    pub view: wgpu::TextureView,
}

impl GpuDepth {
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        size: UVec2,
        format: wgpu::TextureFormat,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { format, view }
    }

    pub fn has_stencil(&self) -> bool {
        self.format.has_stencil_aspect()
    }
}

/// Bookkeeping for one render target.
pub(super) struct GpuTarget {
    pub label: String,
    pub desc: TargetDesc,
    pub slots: Vec<u32>,
    pub depth: Option<DepthId>,
    pub owns_depth: bool,
    pub viewport: Viewport,
}

/// Identifies the attachment formats a pipeline must be compatible with.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(super) struct TargetLayout {
    pub colors: Vec<wgpu::TextureFormat>,
    pub depth: Option<wgpu::TextureFormat>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_depth_allocates_nothing() {
        assert_eq!(depth_format(DepthAttachment::Shared(DepthId(3))), None);
        assert_eq!(
            depth_format(DepthAttachment::DepthStencil),
            Some(wgpu::TextureFormat::Depth24PlusStencil8)
        );
    }

    #[test]
    fn uniform_blocks_are_std140_sized() {
        assert_eq!(std::mem::size_of::<CameraUniforms>() % 16, 0);
        assert_eq!(std::mem::size_of::<ModelUniforms>(), 128);
    }
}
