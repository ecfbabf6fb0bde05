//! Adaptive octree over a triangulated surface
//!
//! The tree is stored as an arena of [`OctreeCube`] nodes; a refined node
//! points at 8 contiguous children (4 in quadtree mode).  Leaves that belong
//! to this rank (or are ghost copies of leaves on neighbouring ranks) are
//! listed in Morton order and addressed by their position in that list, the
//! *leaf label*.
//!
//! The tree is only mutated through [`OctreeModifier`]; derived connectivity
//! lives in [`OctreeAddressing`], which must be rebuilt (or cleared) after
//! any modification.
use crate::{
    geom::{self, BoundBox, Point, TriangleFeature},
    graph::Graph,
    surface::TriSurface,
};
use std::collections::BTreeSet;
use std::sync::Arc;

mod addressing;
mod coordinates;
mod creator;
mod cube;
mod inside_outside;
mod modifier;
mod parallel;
mod refinement;
mod types;

pub use addressing::{NodeType, OctreeAddressing};
pub use coordinates::{CubeCoordinates, RootBox, MAX_LEVEL};
pub use creator::OctreeCreator;
pub use cube::{CubeBasic, CubeType, OctreeCube, OTHER_PROC};
pub use inside_outside::InsideOutside;
pub use modifier::OctreeModifier;
pub use refinement::AutomaticRefinement;
pub use types::{cube_edges, Axis, Corner, Side, X, Y, Z};

/// Result of looking up a cube by coordinates
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// The coordinates lie outside of the root box
    Outside,
    /// The coordinates lie in this leaf (which may be coarser)
    Leaf(usize),
    /// The cube at these coordinates is refined; the value is its node index
    Refined(usize),
    /// The coordinates belong to a subtree held by another rank
    Remote,
}

/// A face neighbour of a leaf
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Neighbour {
    /// A local (or ghost) leaf
    Leaf(usize),
    /// The exterior of the root box
    Boundary,
    /// Space owned by another rank, at the querying leaf's level
    Remote(CubeCoordinates),
}

/// Nearest point on the surface to a query point
#[derive(Copy, Clone, Debug)]
pub struct NearestPoint {
    /// Position of the nearest point
    pub point: Point,
    /// Squared distance to the query point
    pub distance_squared: f64,
    /// Facet holding the nearest point
    pub facet: usize,
    /// Feature of the facet holding the nearest point
    pub feature: TriangleFeature,
}

/// Octree over a surface
#[derive(Clone, Debug)]
pub struct Octree {
    surface: Arc<TriSurface>,
    root: RootBox,
    cubes: Vec<OctreeCube>,
    leaves: Vec<usize>,
    elements: Graph,
    edges: Graph,

    rank: usize,
    n_procs: usize,
    proc_starts: Vec<u64>,
    neighbour_procs: Vec<usize>,
}

impl Octree {
    /// Builds a single-cube octree covering `bb`
    ///
    /// The root cube contains every surface facet and feature edge.
    pub fn new(surface: Arc<TriSurface>, bb: BoundBox, quadtree: bool) -> Self {
        let mut elements = Graph::new();
        let mut edges = Graph::new();
        let mut root = OctreeCube::new(CubeBasic::new(CubeCoordinates::root()), None);
        let n = surface.facets().len();
        if n > 0 {
            elements.append_row(0..n);
            root.elements = Some(0);
            root.basic.cube_type = CubeType::Data;
        }
        let features = (0..surface.edges().len())
            .filter(|e| surface.is_feature_edge(*e))
            .collect::<Vec<_>>();
        if !features.is_empty() {
            edges.append_row(features);
            root.edges = Some(0);
        }
        let mut out = Self {
            surface,
            root: RootBox::new(bb, quadtree),
            cubes: vec![root],
            leaves: vec![],
            elements,
            edges,
            rank: 0,
            n_procs: 1,
            proc_starts: vec![0],
            neighbour_procs: vec![],
        };
        out.create_list_of_leaves();
        out
    }

    /// Returns the surface this octree was built for
    pub fn surface(&self) -> &Arc<TriSurface> {
        &self.surface
    }

    /// Returns the root box
    pub fn root_box(&self) -> &RootBox {
        &self.root
    }

    /// Checks whether the tree is a quadtree (planar meshing)
    pub fn is_quadtree(&self) -> bool {
        self.root.quadtree
    }

    /// Returns the number of children of a refined cube
    pub fn n_children(&self) -> usize {
        if self.root.quadtree { 4 } else { 8 }
    }

    /// Returns the number of nodes in the arena
    pub fn n_cubes(&self) -> usize {
        self.cubes.len()
    }

    /// Returns a node by arena index
    pub fn cube(&self, i: usize) -> &OctreeCube {
        &self.cubes[i]
    }

    /// Returns the number of leaves
    pub fn n_leaves(&self) -> usize {
        self.leaves.len()
    }

    /// Returns the arena index of a leaf
    pub fn leaf_node(&self, leaf: usize) -> usize {
        self.leaves[leaf]
    }

    /// Returns a leaf by label
    pub fn leaf(&self, leaf: usize) -> &OctreeCube {
        &self.cubes[self.leaves[leaf]]
    }

    /// Returns the coordinates of a leaf
    pub fn leaf_coordinates(&self, leaf: usize) -> CubeCoordinates {
        *self.leaf(leaf).coordinates()
    }

    /// Returns the level of a leaf
    pub fn leaf_level(&self, leaf: usize) -> u8 {
        self.leaf(leaf).level()
    }

    /// Returns the classification of a leaf
    pub fn leaf_type(&self, leaf: usize) -> CubeType {
        self.leaf(leaf).cube_type()
    }

    /// Returns the bounds of a leaf
    pub fn leaf_box(&self, leaf: usize) -> BoundBox {
        self.leaf_coordinates(leaf).bounding_box(&self.root)
    }

    /// Returns the centre of a leaf
    pub fn leaf_centre(&self, leaf: usize) -> Point {
        self.leaf_coordinates(leaf).centre(&self.root)
    }

    /// Returns the edge length of a leaf
    pub fn leaf_size(&self, leaf: usize) -> f64 {
        self.leaf_coordinates(leaf).size(&self.root)
    }

    /// Returns the rank owning a leaf
    pub fn leaf_proc(&self, leaf: usize) -> usize {
        self.leaf(leaf).basic.proc_no
    }

    /// Checks whether a leaf is owned by this rank (and not a ghost copy)
    pub fn is_owned(&self, leaf: usize) -> bool {
        self.leaf_proc(leaf) == self.rank
    }

    /// Returns the surface facets intersecting a leaf
    pub fn leaf_elements(&self, leaf: usize) -> &[usize] {
        self.cube_elements(self.leaves[leaf])
    }

    /// Returns the surface feature edges intersecting a leaf
    pub fn leaf_edges(&self, leaf: usize) -> &[usize] {
        match self.cubes[self.leaves[leaf]].edges {
            Some(r) => self.edges.row(r),
            None => &[],
        }
    }

    /// Returns the surface facets intersecting a node
    pub fn cube_elements(&self, cube: usize) -> &[usize] {
        match self.cubes[cube].elements {
            Some(r) => self.elements.row(r),
            None => &[],
        }
    }

    /// Returns the deepest leaf level
    pub fn max_leaf_level(&self) -> u8 {
        self.leaves
            .iter()
            .map(|i| self.cubes[*i].level())
            .max()
            .unwrap_or(0)
    }

    /// Returns the rank this tree lives on
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Returns the number of ranks sharing this tree
    pub fn n_procs(&self) -> usize {
        self.n_procs
    }

    /// Returns the ranks owning leaves adjacent to this rank's leaves
    pub fn neighbour_procs(&self) -> &[usize] {
        &self.neighbour_procs
    }

    /// Rebuilds the leaf list by walking the tree in Morton order
    pub(crate) fn create_list_of_leaves(&mut self) {
        let mut leaves = vec![];
        let mut stack = vec![0];
        while let Some(i) = stack.pop() {
            match self.cubes[i].children {
                Some(first) => {
                    // Push in reverse so that children pop in corner order
                    stack.extend((first..first + self.n_children()).rev());
                }
                None => {
                    if self.cubes[i].basic.proc_no == OTHER_PROC {
                        self.cubes[i].leaf = None;
                    } else {
                        self.cubes[i].leaf = Some(leaves.len());
                        leaves.push(i);
                    }
                }
            }
        }
        self.leaves = leaves;
    }

    /// Finds the cube at (or enclosing) the given coordinates
    pub fn find_cube(&self, c: &CubeCoordinates) -> Lookup {
        if !c.is_valid(self.root.quadtree) {
            return Lookup::Outside;
        }
        let mut i = 0;
        loop {
            let cube = &self.cubes[i];
            match cube.children {
                Some(first) if cube.level() < c.level() => {
                    let child = c.reduce_to_level(cube.level() + 1).child_position();
                    i = first + child.index();
                }
                Some(_) => return Lookup::Refined(i),
                None => {
                    return match cube.leaf {
                        Some(l) => Lookup::Leaf(l),
                        None => Lookup::Remote,
                    };
                }
            }
        }
    }

    /// Finds the deepest existing node containing the given coordinates
    ///
    /// Unlike [`find_cube`](Self::find_cube), this also returns placeholder
    /// nodes held for other ranks.
    pub(crate) fn find_node(&self, c: &CubeCoordinates) -> Option<usize> {
        if !c.is_valid(self.root.quadtree) {
            return None;
        }
        let mut i = 0;
        loop {
            let cube = &self.cubes[i];
            match cube.children {
                Some(first) if cube.level() < c.level() => {
                    let child = c.reduce_to_level(cube.level() + 1).child_position();
                    i = first + child.index();
                }
                _ => return Some(i),
            }
        }
    }

    /// Returns the leaf label at the given coordinates, if it is a leaf
    pub fn find_leaf_label_for_position(&self, c: &CubeCoordinates) -> Option<usize> {
        match self.find_cube(c) {
            Lookup::Leaf(l) if self.leaf_level(l) == c.level() => Some(l),
            _ => None,
        }
    }

    /// Finds the local leaf containing a point
    pub fn find_leaf_containing_vertex(&self, p: &Point) -> Option<usize> {
        if !self.root.bb.contains(p) {
            return None;
        }
        let mut i = 0;
        loop {
            let cube = &self.cubes[i];
            match cube.children {
                Some(first) => {
                    let c = cube.coordinates().centre(&self.root);
                    let mut pos = 0;
                    for axis in 0..3 {
                        if self.root.quadtree && axis == 2 {
                            continue;
                        }
                        if p[axis] >= c[axis] {
                            pos |= 1 << axis;
                        }
                    }
                    i = first + pos;
                }
                None => return cube.leaf,
            }
        }
    }

    /// Collects the leaves of a subtree that satisfy a predicate
    ///
    /// Subtrees are pruned when `keep` rejects their root.
    fn collect_leaves<F: Fn(&CubeCoordinates) -> bool>(
        &self,
        start: usize,
        keep: F,
        out: &mut Vec<Neighbour>,
    ) {
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            let cube = &self.cubes[i];
            if !keep(cube.coordinates()) {
                continue;
            }
            match cube.children {
                Some(first) => stack.extend((first..first + self.n_children()).rev()),
                None => out.push(match cube.leaf {
                    Some(l) => Neighbour::Leaf(l),
                    None => Neighbour::Remote(*cube.coordinates()),
                }),
            }
        }
    }

    /// Finds the leaves sharing the given side of a leaf
    ///
    /// Results are appended to `out`; a coarser or same-level neighbour gives
    /// a single entry, a refined neighbour one entry per adjacent leaf.
    pub fn find_neighbours_in_direction(
        &self,
        leaf: usize,
        side: Side,
        out: &mut Vec<Neighbour>,
    ) {
        if self.root.quadtree && side.axis() == Z {
            out.push(Neighbour::Boundary);
            return;
        }
        let c = self.leaf_coordinates(leaf);
        let n = c.neighbour(side);
        match self.find_cube(&n) {
            Lookup::Outside => out.push(Neighbour::Boundary),
            Lookup::Leaf(l) => out.push(Neighbour::Leaf(l)),
            Lookup::Remote => out.push(Neighbour::Remote(n)),
            Lookup::Refined(i) => {
                let quadtree = self.root.quadtree;
                self.collect_leaves(i, |k| k.shares_face(&c, quadtree), out)
            }
        }
    }

    /// Finds all leaves sharing a face with the given leaf
    pub fn find_face_neighbours(&self, leaf: usize) -> Vec<Neighbour> {
        let mut out = vec![];
        for s in Side::iter() {
            self.find_neighbours_in_direction(leaf, s, &mut out);
        }
        out
    }

    /// Finds all leaves touching the given leaf (faces, edges and corners)
    pub fn find_all_leaf_neighbours(&self, leaf: usize) -> Vec<usize> {
        let mut out = self.find_leaves_touching(&self.leaf_coordinates(leaf));
        out.retain(|l| *l != leaf);
        out
    }

    /// Finds the local leaves touching an arbitrary cube from outside
    ///
    /// Returns sorted leaf labels.
    pub fn find_leaves_touching(&self, c: &CubeCoordinates) -> Vec<usize> {
        let zs: &[i64] = if self.root.quadtree { &[0] } else { &[-1, 0, 1] };
        let mut found = BTreeSet::new();
        let mut scratch = vec![];
        for dz in zs {
            for dy in [-1, 0, 1] {
                for dx in [-1, 0, 1] {
                    if (dx, dy, *dz) == (0, 0, 0) {
                        continue;
                    }
                    let n = c.shifted([dx, dy, *dz]);
                    match self.find_cube(&n) {
                        Lookup::Leaf(l) => {
                            if !c.contains(&self.leaf_coordinates(l)) {
                                found.insert(l);
                            }
                        }
                        Lookup::Refined(i) => {
                            scratch.clear();
                            self.collect_leaves(i, |k| k.touches(c), &mut scratch);
                            found.extend(scratch.iter().filter_map(|n| match n {
                                Neighbour::Leaf(l) => Some(*l),
                                _ => None,
                            }));
                        }
                        Lookup::Outside | Lookup::Remote => (),
                    }
                }
            }
        }
        found.into_iter().collect()
    }

    /// Finds the local leaves sharing a face with an arbitrary cube
    ///
    /// The cube itself need not exist in this tree (e.g. a leaf received from
    /// another rank).
    pub fn find_leaves_sharing_face(&self, c: &CubeCoordinates) -> Vec<usize> {
        let quadtree = self.root.quadtree;
        let mut scratch = vec![];
        for s in Side::iter() {
            if quadtree && s.axis() == Z {
                continue;
            }
            match self.find_cube(&c.neighbour(s)) {
                Lookup::Leaf(l) => {
                    if self.leaf_coordinates(l).shares_face(c, quadtree) {
                        scratch.push(Neighbour::Leaf(l));
                    }
                }
                Lookup::Refined(i) => {
                    self.collect_leaves(i, |k| k.shares_face(c, quadtree), &mut scratch)
                }
                Lookup::Outside | Lookup::Remote => (),
            }
        }
        let mut out: Vec<usize> = scratch
            .into_iter()
            .filter_map(|n| match n {
                Neighbour::Leaf(l) => Some(l),
                _ => None,
            })
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Returns the local leaves whose boxes overlap `bb`
    pub fn leaves_in_box(&self, bb: &BoundBox) -> Vec<usize> {
        let mut out = vec![];
        let mut stack = vec![0];
        while let Some(i) = stack.pop() {
            let cube = &self.cubes[i];
            if !cube.coordinates().bounding_box(&self.root).overlaps(bb) {
                continue;
            }
            match cube.children {
                Some(first) => stack.extend(first..first + self.n_children()),
                None => out.extend(cube.leaf),
            }
        }
        out.sort_unstable();
        out
    }

    /// Returns the local leaves whose boxes intersect a sphere
    pub fn leaves_in_sphere(&self, centre: &Point, r: f64) -> Vec<usize> {
        let bb = BoundBox::new(centre - Point::repeat(r), centre + Point::repeat(r));
        let r2 = r * r;
        self.leaves_in_box(&bb)
            .into_iter()
            .filter(|l| self.leaf_box(*l).distance_squared(centre) <= r2)
            .collect()
    }

    /// Marks the leaves intersecting a sphere, returning `true` if any was
    /// newly marked
    pub fn mark_leaves_in_sphere(&self, centre: &Point, r: f64, marks: &mut [bool]) -> bool {
        let mut changed = false;
        for l in self.leaves_in_sphere(centre, r) {
            changed |= !marks[l];
            marks[l] = true;
        }
        changed
    }

    /// Finds the nearest surface point, considering only accepted facets
    pub fn find_nearest_point_filtered<F: Fn(usize) -> bool>(
        &self,
        p: &Point,
        accept: F,
    ) -> Option<NearestPoint> {
        let surf = &self.surface;
        let root_size = self.root.bb.span().max();
        let mut r = match self.find_leaf_containing_vertex(p) {
            Some(l) => self.leaf_size(l),
            None => self.root.bb.distance_squared(p).sqrt() + root_size / 64.0,
        };
        let mut checked = vec![false; surf.facets().len()];
        let mut best: Option<NearestPoint> = None;
        loop {
            let bb = BoundBox::new(p - Point::repeat(r), p + Point::repeat(r));
            for l in self.leaves_in_box(&bb) {
                for &f in self.leaf_elements(l) {
                    if checked[f] || !accept(f) {
                        continue;
                    }
                    checked[f] = true;
                    let [a, b, c] = surf.facet_points(f);
                    let (q, feature) = geom::nearest_point_on_triangle(p, &a, &b, &c);
                    let d = (q - p).norm_squared();
                    if best.is_none_or(|b| d < b.distance_squared) {
                        best = Some(NearestPoint {
                            point: q,
                            distance_squared: d,
                            facet: f,
                            feature,
                        });
                    }
                }
            }
            if let Some(b) = best {
                if b.distance_squared <= r * r {
                    return Some(b);
                }
            }
            let covers = (0..3).all(|i| {
                bb.min[i] <= self.root.bb.min[i] && bb.max[i] >= self.root.bb.max[i]
            });
            if covers {
                return best;
            }
            r *= 2.0;
        }
    }

    /// Finds the nearest surface point
    pub fn find_nearest_surface_point(&self, p: &Point) -> Option<NearestPoint> {
        self.find_nearest_point_filtered(p, |_| true)
    }

    /// Finds the nearest surface point on the given patches
    pub fn find_nearest_surface_point_in_patches(
        &self,
        p: &Point,
        patches: &[usize],
    ) -> Option<NearestPoint> {
        let facets = self.surface.facets();
        self.find_nearest_point_filtered(p, |f| patches.contains(&facets[f].patch))
    }

    /// Finds the nearest point on the surface feature edges
    ///
    /// Returns the point, its squared distance and the surface edge index.
    pub fn find_nearest_edge_point<F: Fn(usize) -> bool>(
        &self,
        p: &Point,
        accept: F,
    ) -> Option<(Point, f64, usize)> {
        let surf = &self.surface;
        let root_size = self.root.bb.span().max();
        let mut r = match self.find_leaf_containing_vertex(p) {
            Some(l) => self.leaf_size(l),
            None => self.root.bb.distance_squared(p).sqrt() + root_size / 64.0,
        };
        let mut best: Option<(Point, f64, usize)> = None;
        loop {
            let bb = BoundBox::new(p - Point::repeat(r), p + Point::repeat(r));
            for l in self.leaves_in_box(&bb) {
                for &e in self.leaf_edges(l) {
                    if !accept(e) {
                        continue;
                    }
                    let [a, b] = surf.edges()[e];
                    let q = geom::nearest_point_on_segment(
                        p,
                        &surf.points()[a],
                        &surf.points()[b],
                    );
                    let d = (q - p).norm_squared();
                    if best.is_none_or(|b| d < b.1) {
                        best = Some((q, d, e));
                    }
                }
            }
            if let Some(b) = best {
                if b.1 <= r * r {
                    return Some(b);
                }
            }
            let covers = (0..3).all(|i| {
                bb.min[i] <= self.root.bb.min[i] && bb.max[i] >= self.root.bb.max[i]
            });
            if covers {
                return best;
            }
            r *= 2.0;
        }
    }

    /// Checks whether a point lies inside the closed surface
    ///
    /// Uses the sign of the distance along the pseudo-normal of the nearest
    /// surface feature.  Returns `None` for an empty surface.
    pub fn is_point_inside(&self, p: &Point) -> Option<bool> {
        let n = self.find_nearest_surface_point(p)?;
        let normal = self.surface.pseudo_normal(n.facet, n.feature);
        Some((p - n.point).dot(&normal) < 0.0)
    }

    /// Checks whether the tree holds no leaves on this rank
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::surface::{box_surface, sphere_surface};
    use approx::assert_relative_eq;

    pub(crate) fn sphere_octree(levels: u8) -> Octree {
        let s = Arc::new(sphere_surface(Point::zeros(), 1.0, 2));
        let bb = BoundBox::new(Point::repeat(-2.0), Point::repeat(2.0));
        let mut o = Octree::new(s, bb, false);
        for _ in 0..levels {
            let mut refine = vec![true; o.n_leaves()];
            OctreeModifier::new(&mut o).refine_selected_boxes(&mut refine, false);
        }
        o
    }

    #[test]
    fn uniform_refinement() {
        let o = sphere_octree(2);
        assert_eq!(o.n_leaves(), 64);
        assert_eq!(o.max_leaf_level(), 2);

        // Leaves are listed in Morton order
        for w in (0..o.n_leaves()).collect::<Vec<_>>().windows(2) {
            assert!(o.leaf_coordinates(w[0]) < o.leaf_coordinates(w[1]));
        }
    }

    #[test]
    fn lookup() {
        let o = sphere_octree(2);
        let c = CubeCoordinates::new(1, 2, 3, 2);
        let l = o.find_leaf_label_for_position(&c).unwrap();
        assert_eq!(o.leaf_coordinates(l), c);
        assert_eq!(
            o.find_cube(&CubeCoordinates::new(0, 1, 1, 1)),
            Lookup::Refined(o.cube(0).children.unwrap() + 6)
        );
        assert_eq!(o.find_cube(&c.shifted([-2, 0, 0])), Lookup::Outside);
        let fine = c.refine_for_position(Corner::new(3));
        assert_eq!(o.find_cube(&fine), Lookup::Leaf(l));

        let p = o.leaf_centre(l);
        assert_eq!(o.find_leaf_containing_vertex(&p), Some(l));
    }

    #[test]
    fn face_neighbours() {
        let o = sphere_octree(1);
        let l = 0;
        let n = o.find_face_neighbours(l);
        let leaves = n
            .iter()
            .filter(|n| matches!(n, Neighbour::Leaf(_)))
            .count();
        assert_eq!(leaves, 3);
        assert_eq!(n.len(), 6);
        assert_eq!(o.find_all_leaf_neighbours(l).len(), 7);
    }

    #[test]
    fn nearest_point() {
        let o = sphere_octree(3);
        let p = Point::new(0.1, 1.7, 0.2);
        let n = o.find_nearest_surface_point(&p).unwrap();
        assert_relative_eq!(n.point.norm(), 1.0, epsilon = 0.05);

        // Brute force agrees
        let s = o.surface();
        let best = (0..s.facets().len())
            .map(|f| {
                let [a, b, c] = s.facet_points(f);
                (geom::nearest_point_on_triangle(&p, &a, &b, &c).0 - p).norm_squared()
            })
            .fold(f64::INFINITY, f64::min);
        assert_relative_eq!(n.distance_squared, best);

        assert_eq!(o.is_point_inside(&Point::new(0.2, 0.1, 0.0)), Some(true));
        assert_eq!(o.is_point_inside(&Point::new(1.5, 0.1, 0.0)), Some(false));
    }

    #[test]
    fn spatial_queries() {
        let s = Arc::new(box_surface(&BoundBox::new(Point::zeros(), Point::repeat(1.0))));
        let bb = BoundBox::new(Point::zeros(), Point::repeat(1.0));
        let mut o = Octree::new(s, bb, false);
        let mut refine = vec![true];
        OctreeModifier::new(&mut o).refine_selected_boxes(&mut refine, false);
        assert_eq!(o.n_leaves(), 8);
        let q = BoundBox::new(Point::repeat(0.1), Point::repeat(0.2));
        assert_eq!(o.leaves_in_box(&q), vec![0]);
        assert_eq!(o.leaves_in_sphere(&Point::repeat(0.5), 0.01).len(), 8);
        let mut marks = vec![false; 8];
        assert!(o.mark_leaves_in_sphere(&Point::repeat(0.9), 0.05, &mut marks));
        assert_eq!(marks.iter().filter(|m| **m).count(), 1);
        assert!(marks[7]);
    }
}
