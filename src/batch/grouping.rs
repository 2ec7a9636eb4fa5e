//! Two-level partition of drawables by shader signature, then material.

use std::collections::HashMap;

use crate::material::MaterialId;
use crate::scene::Drawable;

/// Drawable indices grouped as `groups[shader][material] = [index, ...]`.
///
/// Built in one pass over the input:
///
/// ```text
/// input:   0:A/M1  1:B/M3  2:A/M2  3:A/M1  4:B/M3
///
/// shader A ─┬─ M1: [0, 3]
///           └─ M2: [2]
/// shader B ─── M3: [1, 4]
/// ```
///
/// Groups appear in first-seen order and indices keep their input order, so the
/// same input always yields the same draw order. Indices refer to the slice the
/// grouping was built from and mean nothing once that slice changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchGrouping {
    groups: Vec<Vec<Vec<usize>>>,
    len: usize,
}

impl BatchGrouping {
    /// Groups `drawables` by signature hash, then by material id.
    pub fn build(drawables: &[Drawable]) -> Self {
        let mut shader_indices: HashMap<u64, usize> = HashMap::new();
        let mut material_indices: HashMap<(usize, MaterialId), usize> = HashMap::new();
        let mut groups: Vec<Vec<Vec<usize>>> = Vec::new();

        for (i, drawable) in drawables.iter().enumerate() {
            let material = &drawable.material;

            let shader_index = *shader_indices
                .entry(material.signature().hash_value())
                .or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                });

            let shader_group = &mut groups[shader_index];
            let material_index = *material_indices
                .entry((shader_index, material.id()))
                .or_insert_with(|| {
                    shader_group.push(Vec::new());
                    shader_group.len() - 1
                });

            shader_group[material_index].push(i);
        }

        Self {
            groups,
            len: drawables.len(),
        }
    }

    /// The nested groups.
    pub fn groups(&self) -> &[Vec<Vec<usize>>] {
        &self.groups
    }

    pub fn shader_group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn material_group_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// Number of drawables grouped.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// All indices in draw order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.groups.iter().flatten().flatten().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::tests::{material, drawables};
    use crate::material::RenderType;

    #[test]
    fn groups_in_first_seen_order() {
        let m1 = material("A", RenderType::Pbr);
        let m2 = material("A", RenderType::Pbr);
        let m3 = material("B", RenderType::Pbr);
        let list = drawables(&[&m1, &m3, &m2, &m1, &m3]);

        let grouping = BatchGrouping::build(&list);

        assert_eq!(
            grouping.groups(),
            &[vec![vec![0, 3], vec![2]], vec![vec![1, 4]]]
        );
        assert_eq!(grouping.shader_group_count(), 2);
        assert_eq!(grouping.material_group_count(), 3);
        assert_eq!(grouping.len(), 5);
    }

    #[test]
    fn partitions_by_signature_and_material() {
        let materials = [
            material("A", RenderType::Pbr),
            material("B", RenderType::Unlit),
            material("A", RenderType::Pbr),
            material("C", RenderType::Custom),
        ];
        let order = [0, 1, 2, 3, 2, 1, 0, 0, 3, 2, 1];
        let refs: Vec<_> = order.iter().map(|&i| &materials[i]).collect();
        let list = drawables(&refs);

        let grouping = BatchGrouping::build(&list);

        for shader_group in grouping.groups() {
            let hash = list[shader_group[0][0]].material.signature().hash_value();
            for material_group in shader_group {
                let id = list[material_group[0]].material.id();
                for &i in material_group {
                    assert_eq!(list[i].material.signature().hash_value(), hash);
                    assert_eq!(list[i].material.id(), id);
                }
                assert!(material_group.windows(2).all(|w| w[0] < w[1]));
            }
        }
        let mut all: Vec<usize> = grouping.iter().collect();
        all.sort_unstable();
        assert_eq!(all, (0..order.len()).collect::<Vec<_>>());
    }

    #[test]
    fn empty_input_has_no_groups() {
        let grouping = BatchGrouping::build(&[]);
        assert!(grouping.is_empty());
        assert_eq!(grouping.shader_group_count(), 0);
    }
}
