//! Mutating operations on an [`Octree`]
use super::{
    cube::{CubeBasic, CubeType, OctreeCube, OTHER_PROC},
    coordinates::MAX_LEVEL,
    types::Corner,
    Neighbour, Octree,
};
use crate::graph::Graph;
use log::{debug, warn};
use rayon::prelude::*;
use std::collections::VecDeque;

/// Data for one child of a refined cube, computed before insertion
struct ChildData {
    basic: CubeBasic,
    elements: Vec<usize>,
    edges: Vec<usize>,
}

/// Exclusive handle for modifying an octree
///
/// Every operation that changes the set of leaves finishes by rebuilding the
/// leaf list, so leaf labels are always valid between calls.
pub struct OctreeModifier<'a> {
    octree: &'a mut Octree,
}

impl<'a> OctreeModifier<'a> {
    /// Builds a modifier for the given octree
    pub fn new(octree: &'a mut Octree) -> Self {
        Self { octree }
    }

    /// Returns the underlying octree
    pub fn octree(&self) -> &Octree {
        self.octree
    }

    pub(crate) fn octree_mut(&mut self) -> &mut Octree {
        self.octree
    }

    /// Rebuilds the Morton-ordered leaf list
    pub fn create_list_of_leaves(&mut self) {
        self.octree.create_list_of_leaves();
    }

    /// Sets the classification of a leaf
    pub fn set_leaf_type(&mut self, leaf: usize, t: CubeType) {
        let i = self.octree.leaves[leaf];
        self.octree.cubes[i].basic.cube_type = t;
    }

    /// Sets the owning rank of a leaf
    pub fn set_leaf_proc(&mut self, leaf: usize, proc_no: usize) {
        let i = self.octree.leaves[leaf];
        self.octree.cubes[i].basic.proc_no = proc_no;
    }

    /// Extends the refinement set until the 1-irregular rule holds
    ///
    /// After refinement no leaf may be more than one level finer than any
    /// face neighbour; this marks every coarser neighbour of a marked leaf
    /// until a fixed point is reached.  Returns the number of added leaves.
    pub fn ensure_correct_regularity(&self, refine: &mut [bool]) -> usize {
        let o = &*self.octree;
        let mut added = 0;
        let mut front: Vec<usize> = (0..o.n_leaves()).filter(|l| refine[*l]).collect();
        let mut scratch = vec![];
        while !front.is_empty() {
            let mut next = vec![];
            for l in front {
                let level = o.leaf_level(l);
                scratch.clear();
                for s in super::Side::iter() {
                    o.find_neighbours_in_direction(l, s, &mut scratch);
                }
                for n in &scratch {
                    if let Neighbour::Leaf(n) = *n {
                        if !refine[n] && o.leaf_level(n) < level {
                            refine[n] = true;
                            added += 1;
                            next.push(n);
                        }
                    }
                }
            }
            front = next;
        }
        added
    }

    /// Marks all siblings of a marked leaf, so that refined boxes keep their
    /// children in complete groups
    ///
    /// Returns the number of added leaves.
    pub fn ensure_correct_regularity_sons(&self, refine: &mut [bool]) -> usize {
        let o = &*self.octree;
        let mut added = 0;
        for l in 0..o.n_leaves() {
            if !refine[l] {
                continue;
            }
            let Some(parent) = o.leaf(l).parent else {
                continue;
            };
            let Some(first) = o.cubes[parent].children else {
                continue;
            };
            for c in first..first + o.n_children() {
                if let Some(s) = o.cubes[c].leaf {
                    if !refine[s] {
                        refine[s] = true;
                        added += 1;
                    }
                }
            }
        }
        added
    }

    /// Grows the refinement set by `n_layers` rings of neighbouring leaves
    ///
    /// Only neighbours that are not finer than the marked leaf are added.
    /// Returns the number of added leaves.
    pub fn mark_additional_layers(&self, refine: &mut [bool], n_layers: usize) -> usize {
        let o = &*self.octree;
        let mut added = 0;
        let mut front: Vec<usize> = (0..o.n_leaves()).filter(|l| refine[*l]).collect();
        for _ in 0..n_layers {
            let mut next = vec![];
            for l in front {
                let level = o.leaf_level(l);
                for n in o.find_all_leaf_neighbours(l) {
                    if !refine[n] && o.leaf_level(n) <= level {
                        refine[n] = true;
                        added += 1;
                        next.push(n);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            front = next;
        }
        added
    }

    /// Refines the marked leaves, enforcing regularity first
    ///
    /// With `hex_refinement`, sibling groups are refined together.  Returns
    /// the number of refined leaves.
    pub fn refine_selected_boxes(&mut self, refine: &mut [bool], hex_refinement: bool) -> usize {
        debug_assert_eq!(refine.len(), self.octree.n_leaves());
        loop {
            let mut changed = self.ensure_correct_regularity(refine);
            if hex_refinement {
                changed += self.ensure_correct_regularity_sons(refine);
            }
            if changed == 0 {
                break;
            }
        }

        let mut targets = vec![];
        for (l, r) in refine.iter().enumerate() {
            if !*r || !self.octree.is_owned(l) {
                continue;
            }
            if self.octree.leaf_level(l) >= MAX_LEVEL {
                warn!("leaf {l} is already at the deepest level; not refining");
                continue;
            }
            targets.push(self.octree.leaves[l]);
        }
        if targets.is_empty() {
            return 0;
        }

        let o = &*self.octree;
        let children: Vec<Vec<ChildData>> =
            targets.par_iter().map(|i| Self::child_data(o, *i)).collect();
        for (i, data) in targets.iter().zip(children) {
            self.insert_children(*i, data);
        }
        self.octree.create_list_of_leaves();
        debug!(
            "refined {} boxes; octree now has {} leaves",
            targets.len(),
            self.octree.n_leaves()
        );
        targets.len()
    }

    /// Subdivides a single leaf, distributing its surface data to children
    pub fn refine_cube(&mut self, cube: usize) {
        let data = Self::child_data(self.octree, cube);
        self.insert_children(cube, data);
    }

    /// Subdivides a placeholder leaf
    ///
    /// The new children are placeholders themselves; they become real leaves
    /// once a rank claims them.  Surface data is distributed as usual.
    pub fn refine_missing_cube(&mut self, cube: usize) {
        let mut data = Self::child_data(self.octree, cube);
        for d in &mut data {
            d.basic.cube_type = CubeType::Unknown;
            d.basic.proc_no = OTHER_PROC;
        }
        self.insert_children(cube, data);
    }

    fn child_data(o: &Octree, cube: usize) -> Vec<ChildData> {
        let parent = &o.cubes[cube];
        let surf = &o.surface;
        let elements = o.cube_elements(cube);
        let edges = match parent.edges {
            Some(r) => o.edges.row(r),
            None => &[],
        };
        (0..o.n_children())
            .map(|i| {
                let coordinates = parent.coordinates().refine_for_position(Corner::new(i as u8));
                let elements = elements
                    .iter()
                    .cloned()
                    .filter(|f| {
                        let [a, b, c] = surf.facet_points(*f);
                        coordinates.intersects_triangle(&o.root, &a, &b, &c)
                            && coordinates.intersects_triangle_exact(&o.root, &a, &b, &c)
                    })
                    .collect::<Vec<_>>();
                let edges = edges
                    .iter()
                    .cloned()
                    .filter(|e| {
                        let [a, b] = surf.edges()[*e];
                        coordinates.intersects_line(
                            &o.root,
                            &surf.points()[a],
                            &surf.points()[b],
                        )
                    })
                    .collect();
                let cube_type = if elements.is_empty() {
                    CubeType::Unknown
                } else {
                    CubeType::Data
                };
                ChildData {
                    basic: CubeBasic {
                        coordinates,
                        cube_type,
                        proc_no: parent.basic.proc_no,
                    },
                    elements,
                    edges,
                }
            })
            .collect()
    }

    fn insert_children(&mut self, cube: usize, data: Vec<ChildData>) {
        let o = &mut *self.octree;
        debug_assert!(o.cubes[cube].is_leaf());
        let first = o.cubes.len();
        for d in data {
            let mut child = OctreeCube::new(d.basic, Some(cube));
            if !d.elements.is_empty() {
                o.elements.append_row(d.elements);
                child.elements = Some(o.elements.n_rows() - 1);
            }
            if !d.edges.is_empty() {
                o.edges.append_row(d.edges);
                child.edges = Some(o.edges.n_rows() - 1);
            }
            o.cubes.push(child);
        }
        o.cubes[cube].children = Some(first);
        o.cubes[cube].leaf = None;
    }

    /// Collapses every subtree without leaves owned by `rank`
    ///
    /// Collapsed subtrees become placeholder leaves owned by [`OTHER_PROC`];
    /// the arena is compacted afterwards.
    pub fn purge_processor_cubes(&mut self, rank: usize) {
        let o = &mut *self.octree;
        let n = o.cubes.len();

        // Children always come after their parent in the arena, so a reverse
        // sweep sees every child before its parent.
        let mut has_mine = vec![false; n];
        for i in (0..n).rev() {
            has_mine[i] = match o.cubes[i].children {
                Some(first) => (first..first + o.n_children()).any(|c| has_mine[c]),
                None => o.cubes[i].basic.proc_no == rank,
            };
        }
        let mut stack = vec![0];
        let mut purged = 0;
        while let Some(i) = stack.pop() {
            if !has_mine[i] {
                // Surface rows are kept, so the subtree can be rebuilt later
                let c = &mut o.cubes[i];
                c.children = None;
                c.basic.proc_no = OTHER_PROC;
                c.basic.cube_type = CubeType::Unknown;
                purged += 1;
            } else if let Some(first) = o.cubes[i].children {
                stack.extend(first..first + o.n_children());
            }
        }
        debug!("rank {rank}: collapsed {purged} foreign subtrees");
        self.compact();
    }

    /// Drops unreachable nodes and unused graph rows from the arena
    pub fn compact(&mut self) {
        let o = &mut *self.octree;
        let n_children = o.n_children();
        let mut cubes = vec![o.cubes[0].clone()];
        let mut elements = Graph::new();
        let mut edges = Graph::new();
        let mut queue = VecDeque::from([(0, 0)]);
        while let Some((old, new)) = queue.pop_front() {
            if let Some(r) = o.cubes[old].elements {
                elements.append_row(o.elements.row(r).iter().cloned());
                cubes[new].elements = Some(elements.n_rows() - 1);
            }
            if let Some(r) = o.cubes[old].edges {
                edges.append_row(o.edges.row(r).iter().cloned());
                cubes[new].edges = Some(edges.n_rows() - 1);
            }
            if let Some(first) = o.cubes[old].children {
                let nf = cubes.len();
                for k in 0..n_children {
                    let mut c = o.cubes[first + k].clone();
                    c.parent = Some(new);
                    cubes.push(c);
                    queue.push_back((first + k, nf + k));
                }
                cubes[new].children = Some(nf);
            }
        }
        o.cubes = cubes;
        o.elements = elements;
        o.edges = edges;
        o.create_list_of_leaves();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geom::{BoundBox, Point};
    use crate::octree::test::sphere_octree;
    use crate::surface::box_surface;
    use std::sync::Arc;

    fn check_regularity(o: &Octree) {
        for l in 0..o.n_leaves() {
            for n in o.find_face_neighbours(l) {
                if let Neighbour::Leaf(n) = n {
                    let (a, b) = (o.leaf_level(l) as i32, o.leaf_level(n) as i32);
                    assert!((a - b).abs() <= 1, "leaves {l} and {n}: levels {a} / {b}");
                }
            }
        }
    }

    #[test]
    fn regularity_is_enforced() {
        let mut o = sphere_octree(1);
        // Refine a single corner leaf three times
        for _ in 0..3 {
            let mut refine = vec![false; o.n_leaves()];
            refine[0] = true;
            OctreeModifier::new(&mut o).refine_selected_boxes(&mut refine, false);
            check_regularity(&o);
        }
        assert_eq!(o.max_leaf_level(), 4);
    }

    #[test]
    fn sons_are_refined_together() {
        let mut o = sphere_octree(2);
        let mut refine = vec![false; o.n_leaves()];
        refine[5] = true;
        let m = OctreeModifier::new(&mut o);
        let added = m.ensure_correct_regularity_sons(&mut refine);
        assert_eq!(added, 7);
        assert_eq!(refine.iter().filter(|r| **r).count(), 8);
    }

    #[test]
    fn additional_layers() {
        let mut o = sphere_octree(2);
        let mut refine = vec![false; o.n_leaves()];
        refine[0] = true;
        let m = OctreeModifier::new(&mut o);
        // The corner leaf touches 7 others in a 4x4x4 grid
        assert_eq!(m.mark_additional_layers(&mut refine, 1), 7);
        assert_eq!(m.mark_additional_layers(&mut refine, 1), 19);
    }

    #[test]
    fn children_inherit_surface() {
        let bb = BoundBox::new(Point::zeros(), Point::repeat(1.0));
        let s = Arc::new(box_surface(&bb));
        let mut o = Octree::new(s, bb.inflate(0.5), false);
        let mut refine = vec![true];
        OctreeModifier::new(&mut o).refine_selected_boxes(&mut refine, false);
        // Every child of the inflated root touches the box surface
        for l in 0..8 {
            assert_eq!(o.leaf_type(l), CubeType::Data);
            assert!(!o.leaf_elements(l).is_empty());
            assert!(!o.leaf_edges(l).is_empty());
        }
    }

    #[test]
    fn purge_and_compact() {
        let mut o = sphere_octree(2);
        let n = o.n_leaves();
        {
            let mut m = OctreeModifier::new(&mut o);
            for l in 0..n {
                m.set_leaf_proc(l, if l < n / 2 { 0 } else { 1 });
            }
            m.purge_processor_cubes(0);
        }
        assert_eq!(o.n_leaves(), n / 2);
        for l in 0..o.n_leaves() {
            assert_eq!(o.leaf_proc(l), 0);
        }
        // Root children 4..8 are collapsed placeholders
        assert_eq!(o.n_cubes(), 1 + 8 + 4 * 8);
    }
}
