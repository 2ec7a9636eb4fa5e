//! CPU-side geometry: vertices, bounds and the full-screen quad.
//!
//! Mesh loading lives outside this crate. What remains here is the small amount
//! of geometry the pipeline itself needs: bounding boxes for frustum tests, the
//! vertex layout the wgpu backend uploads, and the quad used by every
//! screen-space pass.

use glam::{Mat4, Vec3};

/// A vertex with position, normal, and texture coordinates.
///
/// Each vertex occupies 32 bytes:
/// - `position`: 12 bytes (3 × f32) at offset 0
/// - `normal`: 12 bytes (3 × f32) at offset 12
/// - `uv`: 8 bytes (2 × f32) at offset 24
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex3d {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex3d {
    /// The wgpu vertex buffer layout for this vertex type: position (loc 0),
    /// normal (loc 1), uv (loc 2).
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex3d>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            },
            wgpu::VertexAttribute {
                offset: 12,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x3,
            },
            wgpu::VertexAttribute {
                offset: 24,
                shader_location: 2,
                format: wgpu::VertexFormat::Float32x2,
            },
        ],
    };

    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box centered at `center` extending `half_extents` along each axis.
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// An inverted box that any `union` replaces.
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn extend(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// The box enclosing all eight corners of this box after `transform`.
    pub fn transformed(&self, transform: &Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let mut out = Aabb::empty();
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.extend(transform.transform_point3(corner));
        }
        out
    }
}

/// Texture coordinates as delivered by a loader.
#[derive(Clone, Debug, PartialEq)]
pub enum TexCoords {
    None,
    /// Two components per vertex.
    Uv(Vec<f32>),
    /// Three components per vertex; only the first two are used.
    Uvw(Vec<f32>),
}

/// Projects packed 3-component texture coordinates to 2 components per vertex.
///
/// A trailing partial vertex is dropped.
pub fn project_tex_coords(uvw: &[f32]) -> Vec<f32> {
    let mut uv = Vec::with_capacity(uvw.len() / 3 * 2);
    for chunk in uvw.chunks_exact(3) {
        uv.push(chunk[0]);
        uv.push(chunk[1]);
    }
    uv
}

/// Vertex and index data before upload.
#[derive(Clone, Debug)]
pub struct RawGeometry {
    pub vertices: Vec<Vertex3d>,
    pub indices: Vec<u32>,
}

impl RawGeometry {
    pub fn new(vertices: Vec<Vertex3d>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Builds geometry from flat attribute arrays.
    ///
    /// `positions` holds three floats per vertex; `normals`, if present, the
    /// same. 3-component texture coordinates are projected to two components
    /// per vertex. Missing attributes are zero-filled.
    pub fn from_arrays(
        positions: &[f32],
        normals: Option<&[f32]>,
        tex_coords: &TexCoords,
        indices: Vec<u32>,
    ) -> Self {
        let uv = match tex_coords {
            TexCoords::None => Vec::new(),
            TexCoords::Uv(uv) => uv.clone(),
            TexCoords::Uvw(uvw) => project_tex_coords(uvw),
        };

        let vertices = positions
            .chunks_exact(3)
            .enumerate()
            .map(|(i, p)| {
                let normal = normals
                    .and_then(|n| n.get(i * 3..i * 3 + 3))
                    .map(|n| [n[0], n[1], n[2]])
                    .unwrap_or([0.0, 0.0, 0.0]);
                let uv = uv
                    .get(i * 2..i * 2 + 2)
                    .map(|t| [t[0], t[1]])
                    .unwrap_or([0.0, 0.0]);
                Vertex3d::new([p[0], p[1], p[2]], normal, uv)
            })
            .collect();

        Self { vertices, indices }
    }

    /// Two triangles covering clip space, UVs with `v` pointing down.
    pub fn fullscreen_quad() -> Self {
        let positions = [
            -1.0, -1.0, 0.0, //
            -1.0, 1.0, 0.0, //
            1.0, 1.0, 0.0, //
            1.0, -1.0, 0.0,
        ];
        let uvs = vec![0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0];
        Self::from_arrays(
            &positions,
            None,
            &TexCoords::Uv(uvs),
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    /// Axis-aligned bounds of all vertices.
    pub fn bounds(&self) -> Aabb {
        let mut bounds = Aabb::empty();
        for v in &self.vertices {
            bounds.extend(Vec3::from(v.position));
        }
        bounds
    }

    pub fn center(&self) -> Vec3 {
        self.bounds().center()
    }

    pub fn translate(&mut self, offset: Vec3) {
        for v in &mut self.vertices {
            v.position = (Vec3::from(v.position) + offset).into();
        }
    }

    /// Centers the geometry at the origin.
    pub fn recenter(&mut self) {
        let center = self.center();
        self.translate(-center);
    }
}
