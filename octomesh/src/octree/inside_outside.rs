//! Frontal marking of leaves as inside, outside or boundary
use super::{
    coordinates::CubeCoordinates, cube::CubeType, modifier::OctreeModifier, Neighbour,
    Octree, Side, Z,
};
use crate::{comm::Communicator, Error};
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// Counts produced by a classification run
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    /// Leaves inside the domain
    pub n_inside: usize,
    /// Leaves outside the domain
    pub n_outside: usize,
    /// Leaves intersected by the surface
    pub n_data: usize,
    /// Isolated DATA leaves given the type of their neighbours
    pub n_revised: usize,
    /// OUTSIDE leaves next to the surface whose centre lies inside it
    pub n_leaks: usize,
}

/// Types seen among the face neighbours of a leaf
#[derive(Copy, Clone, Debug, Default)]
struct NeighbourTypes {
    inside: bool,
    outside: bool,
    data: bool,
}

impl NeighbourTypes {
    fn add(&mut self, t: CubeType) {
        match t {
            CubeType::Inside => self.inside = true,
            CubeType::Outside => self.outside = true,
            CubeType::Data | CubeType::Unknown => self.data = true,
        }
    }

    /// Type taken by an isolated DATA leaf, if its neighbours agree
    fn pocket_type(&self) -> Option<CubeType> {
        match (self.data, self.inside, self.outside) {
            (false, true, false) => Some(CubeType::Inside),
            (false, false, true) => Some(CubeType::Outside),
            _ => None,
        }
    }
}

/// Classifies every leaf relative to the surface
///
/// Leaves intersected by the surface are DATA.  The remaining leaves are
/// grouped into face-connected components; components touching the exterior
/// of the root box are OUTSIDE, and the outside state then spreads between
/// ranks through the components' communication cubes.  Whatever remains is
/// INSIDE.
pub struct InsideOutside<'a, C: Communicator> {
    octree: &'a mut Octree,
    comm: &'a C,

    /// Group of each non-DATA leaf
    cube_group: Vec<Option<usize>>,
    /// Leaves of each group
    cubes_in_group: Vec<Vec<usize>>,
    /// Outside flag of each group
    group_outside: Vec<bool>,
    /// Leaves of each group touching a remote rank, with the remote region
    communication_cubes: Vec<Vec<(usize, CubeCoordinates)>>,
}

impl<'a, C: Communicator> InsideOutside<'a, C> {
    /// Prepares a classification run
    pub fn new(octree: &'a mut Octree, comm: &'a C) -> Self {
        Self {
            octree,
            comm,
            cube_group: vec![],
            cubes_in_group: vec![],
            group_outside: vec![],
            communication_cubes: vec![],
        }
    }

    /// Runs the full classification
    pub fn run(mut self) -> Result<Classification, Error> {
        self.initialise_boxes();
        self.create_groups();
        self.frontal_marking()?;
        self.mark_inside_cubes();
        let n_revised = self.revise_data_boxes()?;
        let n_leaks = self.count_leaks();

        let o = &*self.octree;
        let mut out = Classification {
            n_revised,
            n_leaks,
            ..Classification::default()
        };
        for l in (0..o.n_leaves()).filter(|l| o.is_owned(*l)) {
            match o.leaf_type(l) {
                CubeType::Inside => out.n_inside += 1,
                CubeType::Outside => out.n_outside += 1,
                CubeType::Data => out.n_data += 1,
                CubeType::Unknown => unreachable!("leaf {l} left unclassified"),
            }
        }
        info!(
            "classified leaves: {} inside, {} outside, {} boundary ({} revised)",
            out.n_inside, out.n_outside, out.n_data, out.n_revised
        );
        if n_leaks > 0 {
            warn!(
                "{n_leaks} outside leaves lie inside the surface; \
                 the surface probably has gaps"
            );
        }
        Ok(out)
    }

    /// Marks leaves containing surface facets as DATA, all others UNKNOWN
    fn initialise_boxes(&mut self) {
        let mut m = OctreeModifier::new(self.octree);
        for l in 0..m.octree().n_leaves() {
            let t = if m.octree().leaf(l).has_elements() {
                CubeType::Data
            } else {
                CubeType::Unknown
            };
            m.set_leaf_type(l, t);
        }
    }

    /// Sides which lead to the exterior of the domain
    fn exterior_sides(&self) -> impl Iterator<Item = Side> {
        let quadtree = self.octree.is_quadtree();
        Side::iter().filter(move |s| !(quadtree && s.axis() == Z))
    }

    /// Groups UNKNOWN leaves into face-connected components
    fn create_groups(&mut self) {
        let o = &*self.octree;
        let n = o.n_leaves();
        self.cube_group = vec![None; n];
        self.cubes_in_group.clear();
        self.group_outside.clear();
        self.communication_cubes.clear();

        let sides: Vec<Side> = self.exterior_sides().collect();
        let mut scratch = vec![];
        for seed in 0..n {
            if self.cube_group[seed].is_some()
                || !o.is_owned(seed)
                || o.leaf_type(seed) != CubeType::Unknown
            {
                continue;
            }
            let g = self.cubes_in_group.len();
            let mut members = vec![];
            let mut outside = false;
            let mut comm_cubes = vec![];
            let mut stack = vec![seed];
            self.cube_group[seed] = Some(g);
            while let Some(l) = stack.pop() {
                members.push(l);
                for s in &sides {
                    scratch.clear();
                    o.find_neighbours_in_direction(l, *s, &mut scratch);
                    for nb in &scratch {
                        match *nb {
                            Neighbour::Boundary => outside = true,
                            Neighbour::Remote(c) => comm_cubes.push((l, c)),
                            Neighbour::Leaf(n) => {
                                if !o.is_owned(n) {
                                    comm_cubes.push((l, o.leaf_coordinates(n)));
                                } else if self.cube_group[n].is_none()
                                    && o.leaf_type(n) == CubeType::Unknown
                                {
                                    self.cube_group[n] = Some(g);
                                    stack.push(n);
                                }
                            }
                        }
                    }
                }
            }
            members.sort_unstable();
            self.cubes_in_group.push(members);
            self.group_outside.push(outside);
            self.communication_cubes.push(comm_cubes);
        }
        debug!("created {} leaf groups", self.cubes_in_group.len());
    }

    /// Spreads the outside state between ranks until nothing changes
    fn frontal_marking(&mut self) -> Result<(), Error> {
        if !self.comm.is_parallel() {
            return Ok(());
        }
        let mut sent = vec![false; self.group_outside.len()];
        loop {
            let o = &*self.octree;
            let mut outgoing: BTreeMap<usize, Vec<CubeCoordinates>> = BTreeMap::new();
            for g in 0..self.group_outside.len() {
                if !self.group_outside[g] || sent[g] {
                    continue;
                }
                sent[g] = true;
                for (l, remote) in &self.communication_cubes[g] {
                    for p in o.procs_overlapping(remote) {
                        if p != o.rank() {
                            outgoing.entry(p).or_default().push(o.leaf_coordinates(*l));
                        }
                    }
                }
            }
            let incoming = self.comm.exchange(outgoing)?;

            let mut changed = false;
            for c in incoming.values().flatten() {
                for l in o.find_leaves_sharing_face(c) {
                    if let Some(g) = self.cube_group[l] {
                        if !self.group_outside[g] {
                            self.group_outside[g] = true;
                            changed = true;
                        }
                    }
                }
            }
            if !self.comm.all_reduce_or(changed)? {
                break;
            }
        }
        Ok(())
    }

    /// Applies group results: outside groups become OUTSIDE, the rest INSIDE
    fn mark_inside_cubes(&mut self) {
        let mut m = OctreeModifier::new(self.octree);
        for (g, members) in self.cubes_in_group.iter().enumerate() {
            let t = if self.group_outside[g] {
                CubeType::Outside
            } else {
                CubeType::Inside
            };
            for l in members {
                m.set_leaf_type(*l, t);
            }
        }
    }

    /// Reclassifies isolated DATA leaves
    ///
    /// A DATA leaf without any DATA face neighbour holds a piece of surface
    /// that is closed within the leaf.  It takes the type of its neighbours
    /// when they agree: enclosed by INSIDE leaves it becomes INSIDE, and
    /// surrounded by OUTSIDE leaves (or the domain exterior) it becomes
    /// OUTSIDE.  Every other DATA leaf keeps its type.
    ///
    /// All decisions are made before any leaf changes, so the result does not
    /// depend on leaf order.  Neighbours on other ranks report their types
    /// through one exchange.  Returns the number of changed leaves.
    fn revise_data_boxes(&mut self) -> Result<usize, Error> {
        let o = &*self.octree;
        let sides: Vec<Side> = self.exterior_sides().collect();
        let n = o.n_leaves();
        let mut around = vec![NeighbourTypes::default(); n];
        let mut outgoing: BTreeMap<usize, Vec<(CubeCoordinates, CubeType)>> = BTreeMap::new();
        let mut scratch = vec![];
        for l in (0..n).filter(|l| o.is_owned(*l)) {
            let t = o.leaf_type(l);
            let c = o.leaf_coordinates(l);
            scratch.clear();
            for s in &sides {
                o.find_neighbours_in_direction(l, *s, &mut scratch);
            }
            for nb in &scratch {
                let remote = match nb {
                    Neighbour::Boundary => {
                        around[l].add(CubeType::Outside);
                        None
                    }
                    Neighbour::Remote(r) => Some(*r),
                    Neighbour::Leaf(k) if !o.is_owned(*k) => Some(o.leaf_coordinates(*k)),
                    Neighbour::Leaf(k) => {
                        around[l].add(o.leaf_type(*k));
                        None
                    }
                };
                if let Some(r) = remote {
                    for p in o.procs_overlapping(&r) {
                        if p != o.rank() {
                            outgoing.entry(p).or_default().push((c, t));
                        }
                    }
                }
            }
        }
        if self.comm.is_parallel() {
            for v in outgoing.values_mut() {
                v.sort_unstable_by_key(|(c, _)| *c);
                v.dedup_by_key(|(c, _)| *c);
            }
            let incoming = self.comm.exchange(outgoing)?;
            for (c, t) in incoming.values().flatten() {
                for l in o.find_leaves_sharing_face(c) {
                    around[l].add(*t);
                }
            }
        }

        let revise: Vec<(usize, CubeType)> = (0..n)
            .filter(|l| o.is_owned(*l) && o.leaf_type(*l) == CubeType::Data)
            .filter_map(|l| around[l].pocket_type().map(|t| (l, t)))
            .collect();
        let mut m = OctreeModifier::new(self.octree);
        for (l, t) in &revise {
            m.set_leaf_type(*l, *t);
        }
        Ok(revise.len())
    }

    /// Counts OUTSIDE leaves next to DATA leaves that lie inside the surface
    fn count_leaks(&self) -> usize {
        let o = &*self.octree;
        if !o.is_quadtree() && !o.surface().open_edges().is_empty() {
            // The point-in-surface test is meaningless for open surfaces
            return 0;
        }
        let mut scratch = vec![];
        let mut n = 0;
        for l in 0..o.n_leaves() {
            if o.leaf_type(l) != CubeType::Outside || !o.is_owned(l) {
                continue;
            }
            scratch.clear();
            for s in self.exterior_sides() {
                o.find_neighbours_in_direction(l, s, &mut scratch);
            }
            let near_data = scratch.iter().any(|nb| match nb {
                Neighbour::Leaf(k) => o.leaf_type(*k) == CubeType::Data,
                _ => false,
            });
            if near_data && o.is_point_inside(&o.leaf_centre(l)) == Some(true) {
                n += 1;
            }
        }
        n
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::SerialComm;
    use crate::geom::{BoundBox, Point};
    use crate::octree::test::sphere_octree;
    use crate::surface::{box_surface, sphere_surface, Facet, TriSurface};
    use std::sync::Arc;

    /// Concatenates closed surfaces into one
    fn merge(parts: &[TriSurface]) -> TriSurface {
        let mut points = vec![];
        let mut facets = vec![];
        let mut patches = vec![];
        for s in parts {
            let (np, npatch) = (points.len(), patches.len());
            points.extend_from_slice(s.points());
            patches.extend_from_slice(s.patches());
            facets.extend(s.facets().iter().map(|f| Facet {
                points: f.points.map(|p| p + np),
                patch: f.patch + npatch,
            }));
        }
        TriSurface::new(points, facets, patches).unwrap()
    }

    fn leaf_at(o: &Octree, p: Point) -> usize {
        (0..o.n_leaves())
            .find(|l| (o.leaf_centre(*l) - p).abs().max() < 1e-9)
            .unwrap()
    }

    fn types(o: &Octree) -> Vec<CubeType> {
        (0..o.n_leaves()).map(|l| o.leaf_type(l)).collect()
    }

    #[test]
    fn sphere_in_large_box() {
        let mut o = sphere_octree(4);
        let c = InsideOutside::new(&mut o, &SerialComm).run().unwrap();
        assert_eq!(c.n_inside + c.n_outside + c.n_data, o.n_leaves());
        assert!(c.n_inside > 0);
        assert!(c.n_outside > 0);
        assert_eq!(c.n_leaks, 0);

        for l in 0..o.n_leaves() {
            let r = o.leaf_centre(l).norm();
            let half_diag = o.leaf_size(l) * 3f64.sqrt() / 2.0;
            match o.leaf_type(l) {
                CubeType::Inside => assert!(r < 1.0 + half_diag),
                CubeType::Outside => assert!(r > 1.0 - half_diag),
                CubeType::Data => (),
                CubeType::Unknown => panic!("unclassified leaf"),
            }
        }

        // Leaves holding surface facets are never promoted to INSIDE
        for l in 0..o.n_leaves() {
            if o.leaf_type(l) == CubeType::Inside {
                assert!(o.leaf_elements(l).is_empty(), "inside leaf {l} holds facets");
            }
        }

        // A second run gives the same answer
        let before = types(&o);
        InsideOutside::new(&mut o, &SerialComm).run().unwrap();
        assert_eq!(before, types(&o));
    }

    #[test]
    fn isolated_pockets() {
        let cube = |lo: f64| box_surface(&BoundBox::new(Point::repeat(lo), Point::repeat(lo + 0.05)));
        let s = merge(&[
            sphere_surface(Point::zeros(), 1.0, 2),
            cube(0.1),
            cube(1.6),
        ]);
        let bb = BoundBox::new(Point::repeat(-2.0), Point::repeat(2.0));
        let mut o = Octree::new(Arc::new(s), bb, false);
        for _ in 0..4 {
            let mut refine = vec![true; o.n_leaves()];
            OctreeModifier::new(&mut o).refine_selected_boxes(&mut refine, false);
        }
        let inner = leaf_at(&o, Point::repeat(0.125));
        let outer = leaf_at(&o, Point::repeat(1.625));
        assert!(o.leaf(inner).has_elements());
        assert!(o.leaf(outer).has_elements());

        let c = InsideOutside::new(&mut o, &SerialComm).run().unwrap();
        assert_eq!(c.n_revised, 2);
        assert_eq!(o.leaf_type(inner), CubeType::Inside);
        assert_eq!(o.leaf_type(outer), CubeType::Outside);

        // The sphere shell stays DATA
        for l in 0..o.n_leaves() {
            if l != inner && o.leaf(l).has_elements() && l != outer {
                assert_eq!(o.leaf_type(l), CubeType::Data, "leaf {l}");
            }
        }
    }
}
