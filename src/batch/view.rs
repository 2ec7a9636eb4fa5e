//! Filtered projections of a batch grouping and the draw loop that walks them.

use crate::batch::BatchGrouping;
use crate::context::{GraphicsContext, ShaderId};
use crate::error::BindError;
use crate::material::Material;
use crate::scene::Drawable;

/// The three steps of drawing a batched view.
///
/// [`View::run`] calls `select_shader` once per shader group, `bind_material`
/// once per material group and `render` once per drawable. Swap in another
/// implementation to draw with a different shader, skip material binding for a
/// depth-only pass, or count calls in a test.
pub trait DrawStrategy {
    /// Resolves and activates the shader for the first drawable of a shader
    /// group. `None` skips the group for this frame.
    fn select_shader(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        base: ShaderId,
        drawable: &Drawable,
    ) -> Option<ShaderId>;

    /// Binds uniforms and samplers of the first drawable of a material group.
    fn bind_material(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        material: &Material,
        shader: ShaderId,
    ) -> Result<(), BindError>;

    /// Issues the geometry draw for one drawable.
    fn render(&mut self, gfx: &mut dyn GraphicsContext, drawable: &Drawable, shader: ShaderId);
}

/// Selects the variant of the base shader matching each material's
/// definitions, binds the material's uniforms and samplers, draws the mesh.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardDraw;

impl DrawStrategy for StandardDraw {
    fn select_shader(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        base: ShaderId,
        drawable: &Drawable,
    ) -> Option<ShaderId> {
        let shader = gfx.select_shader(base, drawable.material.signature())?;
        gfx.use_shader(shader);
        Some(shader)
    }

    fn bind_material(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        material: &Material,
        shader: ShaderId,
    ) -> Result<(), BindError> {
        gfx.bind_uniforms(shader, material.uniforms())?;
        gfx.bind_samplers(shader, material.samplers())
    }

    fn render(&mut self, gfx: &mut dyn GraphicsContext, drawable: &Drawable, _shader: ShaderId) {
        gfx.draw_mesh(drawable.mesh, &drawable.transform);
    }
}

/// Draws every drawable with one shared shader and no material bindings.
/// Used by depth-only passes such as shadow maps.
#[derive(Clone, Copy, Debug, Default)]
pub struct DepthOnlyDraw;

impl DrawStrategy for DepthOnlyDraw {
    fn select_shader(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        base: ShaderId,
        _drawable: &Drawable,
    ) -> Option<ShaderId> {
        gfx.use_shader(base);
        Some(base)
    }

    fn bind_material(
        &mut self,
        _gfx: &mut dyn GraphicsContext,
        _material: &Material,
        _shader: ShaderId,
    ) -> Result<(), BindError> {
        Ok(())
    }

    fn render(&mut self, gfx: &mut dyn GraphicsContext, drawable: &Drawable, _shader: ShaderId) {
        gfx.draw_mesh(drawable.mesh, &drawable.transform);
    }
}

/// Counters returned by [`View::run`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub shader_binds: usize,
    pub material_binds: usize,
    pub draws: usize,
    /// Drawables not drawn because their shader was not ready, their material
    /// failed to bind, or their index was out of range.
    pub skipped: usize,
}

/// A filtered copy of a [`BatchGrouping`].
///
/// Same nesting as the grouping with failing drawables removed and emptied
/// groups dropped. Nothing is reordered.
pub struct View {
    name: String,
    filter: Box<dyn Fn(&Drawable) -> bool>,
    batches: Vec<Vec<Vec<usize>>>,
    count: usize,
}

impl View {
    pub fn new(name: impl Into<String>, filter: impl Fn(&Drawable) -> bool + 'static) -> Self {
        Self {
            name: name.into(),
            filter: Box::new(filter),
            batches: Vec::new(),
            count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `drawable` passes this view's filter.
    pub fn accepts(&self, drawable: &Drawable) -> bool {
        (self.filter)(drawable)
    }

    /// Re-derives this view from `grouping`, which must have been built from
    /// `drawables`.
    pub fn rebuild(&mut self, drawables: &[Drawable], grouping: &BatchGrouping) {
        self.batches.clear();
        self.count = 0;

        for shader_group in grouping.groups() {
            let mut filtered_shader_group = Vec::new();
            for material_group in shader_group {
                let filtered: Vec<usize> = material_group
                    .iter()
                    .copied()
                    .filter(|&i| drawables.get(i).is_some_and(|d| (self.filter)(d)))
                    .collect();
                if !filtered.is_empty() {
                    self.count += filtered.len();
                    filtered_shader_group.push(filtered);
                }
            }
            if !filtered_shader_group.is_empty() {
                self.batches.push(filtered_shader_group);
            }
        }
    }

    /// Number of drawables that passed the filter in the last rebuild.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn batches(&self) -> &[Vec<Vec<usize>>] {
        &self.batches
    }

    pub fn shader_group_count(&self) -> usize {
        self.batches.len()
    }

    pub fn material_group_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Draws the view.
    ///
    /// The shader is bound once per shader group and the material once per
    /// material group, never once per drawable. A shader group whose shader is
    /// not ready is skipped for this frame; a material group that fails to bind
    /// is skipped and logged.
    ///
    /// # Arguments
    ///
    /// * `gfx` - Context to draw through
    /// * `base` - Program the per-material variants are selected from
    /// * `drawables` - The list this view was rebuilt from
    /// * `strategy` - How to select shaders, bind materials and draw
    pub fn run(
        &self,
        gfx: &mut dyn GraphicsContext,
        base: ShaderId,
        drawables: &[Drawable],
        strategy: &mut dyn DrawStrategy,
    ) -> RunStats {
        let mut stats = RunStats::default();

        for shader_group in &self.batches {
            let mut shader: Option<ShaderId> = None;

            'materials: for material_group in shader_group {
                let mut material_bound = false;

                for (n, &i) in material_group.iter().enumerate() {
                    let Some(drawable) = drawables.get(i) else {
                        stats.skipped += 1;
                        continue;
                    };

                    let active = match shader {
                        Some(active) => active,
                        None => match strategy.select_shader(gfx, base, drawable) {
                            Some(selected) => {
                                stats.shader_binds += 1;
                                shader = Some(selected);
                                selected
                            }
                            None => {
                                log::debug!(
                                    "view '{}': shader for '{}' not ready, skipping its group",
                                    self.name,
                                    drawable.material.name()
                                );
                                stats.skipped += shader_group.iter().map(Vec::len).sum::<usize>();
                                break 'materials;
                            }
                        },
                    };

                    if !material_bound {
                        match strategy.bind_material(gfx, &drawable.material, active) {
                            Ok(()) => {
                                stats.material_binds += 1;
                                material_bound = true;
                            }
                            Err(err) => {
                                log::warn!(
                                    "view '{}': skipping material '{}': {}",
                                    self.name,
                                    drawable.material.name(),
                                    err
                                );
                                stats.skipped += material_group.len() - n;
                                continue 'materials;
                            }
                        }
                    }

                    strategy.render(gfx, drawable, active);
                    stats.draws += 1;
                }
            }
        }

        log::trace!(
            "view '{}': {} shader binds, {} material binds, {} draws",
            self.name,
            stats.shader_binds,
            stats.material_binds,
            stats.draws
        );
        stats
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("name", &self.name)
            .field("batches", &self.batches)
            .field("count", &self.count)
            .finish()
    }
}
