//! Materials: what a drawable needs bound before it can be drawn.
//!
//! Two parts of a [`Material`] drive batching:
//!
//! - its [`ShaderSignature`], the set of shader definitions that selects a
//!   compiled shader variant
//! - its [`MaterialId`], which identifies the uniform and sampler values
//!
//! Both must stay fixed while a batch grouping built from them is in use.
//! Changing either means the grouping has to be rebuilt.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::context::TextureId;

static NEXT_MATERIAL_ID: AtomicU64 = AtomicU64::new(1);

/// Stable per-instance material identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u64);

impl MaterialId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        MaterialId(NEXT_MATERIAL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The shader definitions a material needs, with a precomputed hash.
///
/// Definitions are kept sorted so two signatures with the same entries hash the
/// same regardless of insertion order.
#[derive(Clone, Debug)]
pub struct ShaderSignature {
    definitions: BTreeMap<String, String>,
    hash: u64,
}

impl ShaderSignature {
    pub fn new() -> Self {
        let mut signature = Self {
            definitions: BTreeMap::new(),
            hash: 0,
        };
        signature.rehash();
        signature
    }

    /// Adds a definition, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.define(name, value);
        self
    }

    /// Adds or replaces a definition.
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.definitions.insert(name.into(), value.into());
        self.rehash();
    }

    /// Removes a definition. Returns `true` if it was present.
    pub fn undefine(&mut self, name: &str) -> bool {
        let removed = self.definitions.remove(name).is_some();
        if removed {
            self.rehash();
        }
        removed
    }

    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.definitions.get(name).map(String::as_str)
    }

    pub fn definitions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.definitions
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    fn rehash(&mut self) {
        let mut hasher = DefaultHasher::new();
        self.definitions.hash(&mut hasher);
        self.hash = hasher.finish();
    }
}

impl Default for ShaderSignature {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ShaderSignature {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.definitions == other.definitions
    }
}

impl Eq for ShaderSignature {}

impl Hash for ShaderSignature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// A single uniform value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    /// Appends this value as 16-byte aligned floats (std140 style).
    ///
    /// Scalars and vectors occupy one vec4 slot; a matrix occupies four.
    pub fn write_std140(&self, out: &mut Vec<f32>) {
        match *self {
            UniformValue::Int(v) => out.extend_from_slice(&[v as f32, 0.0, 0.0, 0.0]),
            UniformValue::Float(v) => out.extend_from_slice(&[v, 0.0, 0.0, 0.0]),
            UniformValue::Vec2(v) => out.extend_from_slice(&[v.x, v.y, 0.0, 0.0]),
            UniformValue::Vec3(v) => out.extend_from_slice(&[v.x, v.y, v.z, 0.0]),
            UniformValue::Vec4(v) => out.extend_from_slice(&v.to_array()),
            UniformValue::Mat4(m) => out.extend_from_slice(&m.to_cols_array()),
        }
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::Int(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        UniformValue::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        UniformValue::Mat4(v)
    }
}

/// Named uniform values, ordered by name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Uniforms {
    values: BTreeMap<String, UniformValue>,
}

impl Uniforms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<UniformValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Packs every value in name order into a std140-style float block.
    pub fn pack_std140(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.values.len() * 4);
        for value in self.values.values() {
            value.write_std140(&mut out);
        }
        out
    }
}

/// A texture bound to a named sampler slot.
///
/// Samplers never own the texture they read. One taken from another stage's
/// target must be taken again after that target is resized.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Sampler {
    pub name: String,
    pub texture: TextureId,
}

impl Sampler {
    pub fn new(name: impl Into<String>, texture: TextureId) -> Self {
        Self {
            name: name.into(),
            texture,
        }
    }
}

/// Which family of passes renders a material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderType {
    /// Physically based, lit through the G-buffer.
    Pbr,
    /// Forward-rendered after tonemapping, no lighting.
    Unlit,
    /// Forward-rendered with a material-specific shader.
    Custom,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transparency {
    Opaque,
    Transparent,
}

/// Everything bound between a shader switch and a draw call.
///
/// # Example
///
/// ```ignore
/// let glass = Material::new(RenderType::Pbr)
///     .with_name("glass")
///     .with_definition("USE_NORMAL_MAP", "1")
///     .with_uniform("roughness", 0.05)
///     .transparent();
/// ```
#[derive(Clone, Debug)]
pub struct Material {
    id: MaterialId,
    name: String,
    signature: ShaderSignature,
    uniforms: Uniforms,
    samplers: Vec<Sampler>,
    render_type: RenderType,
    transparency: Transparency,
}

impl Material {
    /// Creates an opaque material with a fresh id and an empty signature.
    pub fn new(render_type: RenderType) -> Self {
        Self {
            id: MaterialId::next(),
            name: String::new(),
            signature: ShaderSignature::new(),
            uniforms: Uniforms::new(),
            samplers: Vec::new(),
            render_type,
            transparency: Transparency::Opaque,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_signature(mut self, signature: ShaderSignature) -> Self {
        self.signature = signature;
        self
    }

    pub fn with_definition(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.signature.define(name, value);
        self
    }

    pub fn with_uniform(mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        self.uniforms.set(name, value);
        self
    }

    pub fn with_sampler(mut self, sampler: Sampler) -> Self {
        self.samplers.push(sampler);
        self
    }

    pub fn transparent(mut self) -> Self {
        self.transparency = Transparency::Transparent;
        self
    }

    pub fn id(&self) -> MaterialId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &ShaderSignature {
        &self.signature
    }

    /// Mutable access to the signature. Any batch grouping containing this
    /// material must be rebuilt afterwards.
    pub fn signature_mut(&mut self) -> &mut ShaderSignature {
        &mut self.signature
    }

    pub fn uniforms(&self) -> &Uniforms {
        &self.uniforms
    }

    pub fn uniforms_mut(&mut self) -> &mut Uniforms {
        &mut self.uniforms
    }

    pub fn samplers(&self) -> &[Sampler] {
        &self.samplers
    }

    pub fn render_type(&self) -> RenderType {
        self.render_type
    }

    pub fn transparency(&self) -> Transparency {
        self.transparency
    }

    pub fn is_transparent(&self) -> bool {
        self.transparency == Transparency::Transparent
    }
}
