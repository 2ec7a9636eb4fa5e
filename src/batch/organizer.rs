//! The standard set of views, rebuilt together from one grouping.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::batch::{BatchGrouping, View};
use crate::material::{RenderType, Transparency};
use crate::scene::Drawable;

/// The views every [`RendererOrganizer`] carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewKind {
    /// PBR drawables, transparent ones included for their opaque parts.
    Opaque,
    /// Transparent drawables of every type except custom.
    Transparent,
    Unlit,
    Custom,
}

impl ViewKind {
    const ALL: [ViewKind; 4] = [
        ViewKind::Opaque,
        ViewKind::Transparent,
        ViewKind::Unlit,
        ViewKind::Custom,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            ViewKind::Opaque => "opaque",
            ViewKind::Transparent => "transparent",
            ViewKind::Unlit => "unlit",
            ViewKind::Custom => "custom",
        }
    }

    fn view(self) -> View {
        let name = self.name();
        match self {
            ViewKind::Opaque => View::new(name, |d: &Drawable| {
                d.material.render_type() == RenderType::Pbr
            }),
            ViewKind::Transparent => View::new(name, |d: &Drawable| {
                d.material.transparency() == Transparency::Transparent
                    && d.material.render_type() != RenderType::Custom
            }),
            ViewKind::Unlit => View::new(name, |d: &Drawable| {
                d.material.render_type() == RenderType::Unlit
            }),
            ViewKind::Custom => View::new(name, |d: &Drawable| {
                d.material.render_type() == RenderType::Custom
            }),
        }
    }
}

/// Groups drawables by shader and material and keeps a set of views over the
/// grouping current.
///
/// # Example
///
/// ```ignore
/// let mut organizer = RendererOrganizer::new();
/// let outlines = organizer.add_view(View::new("outlined", |d| d.material.signature().get("OUTLINE").is_some()));
///
/// organizer.batch(&visible);
/// organizer.view(ViewKind::Opaque).run(gfx, gbuffer, &visible, &mut StandardDraw);
/// organizer.extra_view(outlines).unwrap().run(gfx, outline, &visible, &mut StandardDraw);
/// ```
#[derive(Debug)]
pub struct RendererOrganizer {
    views: Vec<View>,
    grouping: BatchGrouping,
    fingerprint: Option<u64>,
}

impl RendererOrganizer {
    pub fn new() -> Self {
        Self {
            views: ViewKind::ALL.iter().map(|kind| kind.view()).collect(),
            grouping: BatchGrouping::default(),
            fingerprint: None,
        }
    }

    /// Registers an additional view. Returns the handle for
    /// [`extra_view`](Self::extra_view). The view is filled on the next batch.
    pub fn add_view(&mut self, view: View) -> usize {
        self.views.push(view);
        self.fingerprint = None;
        self.views.len() - 1
    }

    pub fn view(&self, kind: ViewKind) -> &View {
        &self.views[kind.index()]
    }

    /// A view registered with [`add_view`](Self::add_view).
    pub fn extra_view(&self, handle: usize) -> Option<&View> {
        if handle < ViewKind::ALL.len() {
            return None;
        }
        self.views.get(handle)
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    /// The grouping the views were last rebuilt from.
    pub fn grouping(&self) -> &BatchGrouping {
        &self.grouping
    }

    /// Regroups `drawables` and rebuilds every view.
    ///
    /// Call whenever the order or contents of `drawables` change, or a material
    /// in it changes signature or identity.
    pub fn batch(&mut self, drawables: &[Drawable]) {
        self.grouping = BatchGrouping::build(drawables);
        for view in &mut self.views {
            view.rebuild(drawables, &self.grouping);
        }
        self.fingerprint = Some(fingerprint(drawables));
    }

    /// Like [`batch`](Self::batch), but skipped when `drawables` has the same
    /// identities, signatures, materials, render types and transparency in the
    /// same order as last time.
    /// Returns `true` if the views were rebuilt.
    pub fn batch_if_changed(&mut self, drawables: &[Drawable]) -> bool {
        let current = fingerprint(drawables);
        if self.fingerprint == Some(current) {
            return false;
        }
        self.batch(drawables);
        true
    }
}

impl Default for RendererOrganizer {
    fn default() -> Self {
        Self::new()
    }
}

fn fingerprint(drawables: &[Drawable]) -> u64 {
    let mut hasher = DefaultHasher::new();
    drawables.len().hash(&mut hasher);
    for drawable in drawables {
        drawable.id.hash(&mut hasher);
        drawable.material.signature().hash_value().hash(&mut hasher);
        drawable.material.id().hash(&mut hasher);
        drawable.material.render_type().hash(&mut hasher);
        drawable.material.transparency().hash(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::tests::{drawables, material};

    #[test]
    fn standard_views_split_by_type_and_transparency() {
        let pbr = material("A", RenderType::Pbr);
        let glass = material("A", RenderType::Pbr).transparent();
        let unlit = material("U", RenderType::Unlit);
        let unlit_glass = material("U", RenderType::Unlit).transparent();
        let custom = material("C", RenderType::Custom).transparent();
        let list = drawables(&[&pbr, &glass, &unlit, &unlit_glass, &custom]);

        let mut organizer = RendererOrganizer::new();
        organizer.batch(&list);

        assert_eq!(organizer.view(ViewKind::Opaque).count(), 2);
        assert_eq!(organizer.view(ViewKind::Transparent).count(), 2);
        assert_eq!(organizer.view(ViewKind::Unlit).count(), 2);
        assert_eq!(organizer.view(ViewKind::Custom).count(), 1);
    }

    #[test]
    fn views_never_exceed_the_grouping() {
        let a = material("A", RenderType::Pbr);
        let b = material("B", RenderType::Unlit).transparent();
        let list = drawables(&[&a, &b, &a, &b]);

        let mut organizer = RendererOrganizer::new();
        organizer.batch(&list);

        for view in organizer.views() {
            assert!(view.count() <= organizer.grouping().len());
            for index in view.batches().iter().flatten().flatten() {
                assert!(organizer.grouping().iter().any(|i| i == *index));
            }
        }
    }

    #[test]
    fn exclusive_views_partition_the_matching_drawables() {
        let pbr = material("A", RenderType::Pbr);
        let unlit = material("U", RenderType::Unlit);
        let custom = material("C", RenderType::Custom);
        let glass = material("G", RenderType::Pbr).transparent();
        let list = drawables(&[&pbr, &unlit, &custom, &glass, &pbr, &unlit]);

        let mut organizer = RendererOrganizer::new();
        let views = [
            organizer.add_view(View::new("unlit only", |d: &Drawable| {
                d.material.render_type() == RenderType::Unlit
            })),
            organizer.add_view(View::new("custom only", |d: &Drawable| {
                d.material.render_type() == RenderType::Custom
            })),
            organizer.add_view(View::new("solid pbr", |d: &Drawable| {
                d.material.render_type() == RenderType::Pbr && !d.material.is_transparent()
            })),
        ];
        organizer.batch(&list);

        let total: usize = views
            .iter()
            .filter_map(|&handle| organizer.extra_view(handle))
            .map(View::count)
            .sum();
        assert_eq!(total, 5);

        // the transparent PBR drawable matches none of the three
        for &handle in &views {
            let view = organizer.extra_view(handle).unwrap();
            assert!(!view.batches().iter().flatten().flatten().any(|&i| i == 3));
        }
    }

    #[test]
    fn transparency_change_triggers_a_rebatch() {
        let pbr = material("A", RenderType::Pbr);
        let before = drawables(&[&pbr]);
        let after = drawables(&[&pbr.clone().transparent()]);
        assert_eq!(before[0].material.id(), after[0].material.id());

        let mut organizer = RendererOrganizer::new();
        assert!(organizer.batch_if_changed(&before));
        assert_eq!(organizer.view(ViewKind::Transparent).count(), 0);

        assert!(organizer.batch_if_changed(&after));
        assert_eq!(organizer.view(ViewKind::Transparent).count(), 1);
    }

    #[test]
    fn batch_if_changed_skips_identical_input() {
        let a = material("A", RenderType::Pbr);
        let b = material("B", RenderType::Pbr);
        let list = drawables(&[&a, &b]);

        let mut organizer = RendererOrganizer::new();
        assert!(organizer.batch_if_changed(&list));
        assert!(!organizer.batch_if_changed(&list));

        let reordered = drawables(&[&b, &a]);
        assert!(organizer.batch_if_changed(&reordered));
    }

    #[test]
    fn extra_views_are_rebuilt_with_the_standard_ones() {
        let a = material("A", RenderType::Pbr);
        let b = material("B", RenderType::Pbr);
        let list = drawables(&[&a, &b, &b]);

        let mut organizer = RendererOrganizer::new();
        let only_b = organizer.add_view(View::new("only B", |d: &Drawable| {
            d.material.signature().get("SHADER") == Some("B")
        }));
        organizer.batch(&list);

        assert_eq!(organizer.extra_view(only_b).map(View::count), Some(2));
        assert!(organizer.extra_view(0).is_none());
    }
}
