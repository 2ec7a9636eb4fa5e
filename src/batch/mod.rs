//! Renderer batching.
//!
//! Switching shaders and rebinding materials are the expensive state changes of
//! a frame. This module reorders drawables so each happens once per group:
//!
//! ```text
//! drawables ──▶ BatchGrouping ──▶ View "opaque"      ──▶ run(StandardDraw)
//!  (flat list)   [shader][material]  View "transparent"
//!                                    View "unlit" ...
//! ```
//!
//! - [`BatchGrouping`] partitions indices into the flat list by shader
//!   signature, then material.
//! - [`View`] is a filtered copy of a grouping for one category of drawable.
//! - [`RendererOrganizer`] holds the standard views and rebuilds them together.
//! - [`DrawStrategy`] is what a view calls to select, bind and draw.

mod grouping;
mod organizer;
mod view;

pub use grouping::BatchGrouping;
pub use organizer::{RendererOrganizer, ViewKind};
pub use view::{DepthOnlyDraw, DrawStrategy, RunStats, StandardDraw, View};

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use crate::context::MeshId;
    use crate::material::{Material, RenderType};
    use crate::scene::{Drawable, DrawableId};

    /// A material whose signature selects shader `shader`.
    pub(crate) fn material(shader: &str, render_type: RenderType) -> Material {
        Material::new(render_type).with_definition("SHADER", shader)
    }

    /// One drawable per entry; drawable `i` uses mesh `i`.
    pub(crate) fn drawables(materials: &[&Material]) -> Vec<Drawable> {
        materials
            .iter()
            .enumerate()
            .map(|(i, material)| {
                Drawable::new(
                    DrawableId(i as u64),
                    MeshId(i as u32),
                    Arc::new((*material).clone()),
                )
            })
            .collect()
    }
}
