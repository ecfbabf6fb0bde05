//! Derived connectivity of a classified octree
//!
//! Every table is computed on first access and cached; none of them track
//! changes to the octree, so an addressing object must be dropped (or
//! [`clear_out`](OctreeAddressing::clear_out)) whenever the tree changes.
use super::{
    coordinates::{CubeCoordinates, MAX_LEVEL},
    cube::CubeType,
    types::{cube_edges, Corner, Side},
    Lookup, Neighbour, Octree, Z,
};
use crate::{comm::Communicator, geom::Point, graph::Graph, Error};
use log::{debug, info};
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Classification of an octree node, as a set of flags
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NodeType(u8);

impl NodeType {
    /// All leaves around the node are mesh cells
    pub const INNERNODE: Self = Self(1);
    /// No leaf around the node is a mesh cell
    pub const OUTERNODE: Self = Self(2);
    /// Mesh cells and other leaves meet at the node
    pub const BOUNDARYNODE: Self = Self(4);

    /// Checks whether all flags in `other` are set
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for NodeType {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A face between two leaves, or between a leaf and the exterior
///
/// The face always has the geometry of the owner's side, so the owner is
/// never coarser than the neighbour.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OctreeFace {
    /// Leaf whose side this face is
    pub owner: usize,
    /// Leaf on the other side, or `None` at the root box boundary
    pub neighbour: Option<usize>,
    /// Side of the owner, pointing towards the neighbour
    pub side: Side,
    /// Corner nodes, counter-clockwise seen from the neighbour
    pub nodes: [usize; 4],
}

#[derive(Debug)]
struct Nodes {
    leaf_nodes: Vec<[usize; 8]>,
    keys: Vec<[i64; 3]>,
    lookup: HashMap<[i64; 3], usize>,
}

#[derive(Debug)]
struct Faces {
    faces: Vec<OctreeFace>,
    leaf_faces: Graph,
}

#[derive(Debug)]
struct Edges {
    edges: Vec<[usize; 2]>,
    edge_leaves: Graph,
    leaf_edges: Vec<[usize; 12]>,
}

/// Lazily built addressing of an octree
pub struct OctreeAddressing<'a> {
    octree: &'a Octree,
    use_data_boxes: bool,

    box_type: OnceCell<Vec<bool>>,
    nodes: OnceCell<Nodes>,
    node_leaves: OnceCell<Vec<[Option<usize>; 8]>>,
    node_type: OnceCell<Vec<NodeType>>,
    faces: OnceCell<Faces>,
    edges: OnceCell<Edges>,
    leaf_leaves: OnceCell<Graph>,
    node_faces: OnceCell<Graph>,
}

impl<'a> OctreeAddressing<'a> {
    /// Builds an (empty) addressing cache over an octree
    ///
    /// With `use_data_boxes`, every DATA leaf becomes a mesh cell; otherwise
    /// only those whose centre lies inside the surface do.
    pub fn new(octree: &'a Octree, use_data_boxes: bool) -> Self {
        Self {
            octree,
            use_data_boxes,
            box_type: OnceCell::new(),
            nodes: OnceCell::new(),
            node_leaves: OnceCell::new(),
            node_type: OnceCell::new(),
            faces: OnceCell::new(),
            edges: OnceCell::new(),
            leaf_leaves: OnceCell::new(),
            node_faces: OnceCell::new(),
        }
    }

    /// Returns the underlying octree
    pub fn octree(&self) -> &'a Octree {
        self.octree
    }

    /// Drops every cached table
    pub fn clear_out(&mut self) {
        self.box_type.take();
        self.clear_geometry();
    }

    fn clear_geometry(&mut self) {
        self.nodes.take();
        self.node_leaves.take();
        self.node_type.take();
        self.faces.take();
        self.edges.take();
        self.leaf_leaves.take();
        self.node_faces.take();
    }

    ////////////////////////////////////////////////////////////////////////////
    // Leaf classification

    fn box_type(&self) -> &[bool] {
        self.box_type.get_or_init(|| {
            let o = self.octree;
            (0..o.n_leaves())
                .map(|l| match o.leaf_type(l) {
                    CubeType::Inside => true,
                    CubeType::Data => {
                        self.use_data_boxes
                            || o.is_point_inside(&o.leaf_centre(l)) == Some(true)
                    }
                    CubeType::Outside | CubeType::Unknown => false,
                })
                .collect()
        })
    }

    /// Checks whether a leaf becomes a cell of the mesh template
    pub fn is_mesh_cell(&self, leaf: usize) -> bool {
        self.box_type()[leaf]
    }

    /// Checks whether a mesh cell has a face on the template boundary
    pub fn is_boundary_cell(&self, leaf: usize) -> bool {
        self.is_mesh_cell(leaf)
            && self.leaf_faces().row(leaf).iter().any(|f| {
                let f = &self.faces()[*f];
                let other = if f.owner == leaf { f.neighbour } else { Some(f.owner) };
                !other.is_some_and(|o| self.is_mesh_cell(o))
            })
    }

    /// Returns the number of mesh cells
    pub fn n_mesh_cells(&self) -> usize {
        self.box_type().iter().filter(|b| **b).count()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Nodes

    /// Integer key of a leaf corner on the finest grid
    ///
    /// In quadtree mode the `z` key is 0 at the bottom and 1 at the top.
    fn corner_key(&self, c: &CubeCoordinates, corner: Corner) -> [i64; 3] {
        let (lo, hi) = c.finest_range();
        let o = corner.offset();
        let mut key = std::array::from_fn(|i| if o[i] == 1 { hi[i] } else { lo[i] });
        if self.octree.is_quadtree() {
            key[2] = o[2];
        }
        key
    }

    fn nodes(&self) -> &Nodes {
        self.nodes.get_or_init(|| {
            let o = self.octree;
            let mut lookup = HashMap::new();
            let mut keys = vec![];
            let mut leaf_nodes = Vec::with_capacity(o.n_leaves());
            for l in 0..o.n_leaves() {
                let c = o.leaf_coordinates(l);
                let mut nodes = [0; 8];
                for corner in Corner::iter() {
                    let key = self.corner_key(&c, corner);
                    nodes[corner.index()] = *lookup.entry(key).or_insert_with(|| {
                        keys.push(key);
                        keys.len() - 1
                    });
                }
                leaf_nodes.push(nodes);
            }
            debug!("octree addressing: {} nodes", keys.len());
            Nodes {
                leaf_nodes,
                keys,
                lookup,
            }
        })
    }

    /// Returns the number of octree nodes
    pub fn n_nodes(&self) -> usize {
        self.nodes().keys.len()
    }

    /// Returns the eight corner nodes of a leaf, indexed by [`Corner`]
    pub fn leaf_nodes(&self, leaf: usize) -> &[usize; 8] {
        &self.nodes().leaf_nodes[leaf]
    }

    /// Returns the finest-grid key of a node
    pub fn node_key(&self, node: usize) -> [i64; 3] {
        self.nodes().keys[node]
    }

    /// Finds the node at a finest-grid key
    pub fn find_node(&self, key: &[i64; 3]) -> Option<usize> {
        self.nodes().lookup.get(key).copied()
    }

    /// Returns the physical position of a node
    pub fn node_position(&self, node: usize) -> Point {
        let key = self.node_key(node);
        let root = self.octree.root_box();
        let n = (1u64 << MAX_LEVEL) as f64;
        let span = root.bb.span();
        let mut p = Point::zeros();
        for i in 0..3 {
            p[i] = if self.octree.is_quadtree() && i == 2 {
                if key[2] == 0 { root.bb.min.z } else { root.bb.max.z }
            } else {
                root.bb.min[i] + span[i] * key[i] as f64 / n
            };
        }
        p
    }

    /// Returns the positions of all nodes
    pub fn node_positions(&self) -> Vec<Point> {
        (0..self.n_nodes()).map(|n| self.node_position(n)).collect()
    }

    /// Returns the nodes strictly between two nodes on a straight grid line
    ///
    /// These are the hanging nodes on an edge, ordered from `a` to `b`.
    pub fn nodes_between(&self, a: usize, b: usize) -> Vec<usize> {
        let mut out = vec![];
        self.bisect(self.node_key(a), self.node_key(b), &mut out);
        out
    }

    fn bisect(&self, a: [i64; 3], b: [i64; 3], out: &mut Vec<usize>) {
        let d: [i64; 3] = std::array::from_fn(|i| b[i] - a[i]);
        if d.iter().all(|v| v.abs() <= 1) || d.iter().any(|v| v % 2 != 0) {
            return;
        }
        let mid = std::array::from_fn(|i| a[i] + d[i] / 2);
        if let Some(m) = self.find_node(&mid) {
            self.bisect(a, mid, out);
            out.push(m);
            self.bisect(mid, b, out);
        }
    }

    /// Returns, for each octant around a node, the leaf occupying it
    ///
    /// Octants are indexed like [`Corner`]s of the node; in quadtree mode
    /// only the four `z = 0` octants are used.
    pub fn node_leaves(&self, node: usize) -> &[Option<usize>; 8] {
        &self.node_leaves.get_or_init(|| {
            let o = self.octree;
            let quadtree = o.is_quadtree();
            (0..self.n_nodes())
                .map(|n| {
                    let key = self.node_key(n);
                    std::array::from_fn(|i| {
                        let off = Corner::new(i as u8).offset();
                        if quadtree && off[2] == 1 {
                            return None;
                        }
                        let pos: [i64; 3] = std::array::from_fn(|k| {
                            if quadtree && k == 2 { 0 } else { key[k] + off[k] - 1 }
                        });
                        let c = CubeCoordinates::new(pos[0], pos[1], pos[2], MAX_LEVEL);
                        match o.find_cube(&c) {
                            Lookup::Leaf(l) => Some(l),
                            _ => None,
                        }
                    })
                })
                .collect::<Vec<_>>()
        })[node]
    }

    /// Returns the classification of a node
    pub fn node_type(&self, node: usize) -> NodeType {
        self.node_type.get_or_init(|| {
            (0..self.n_nodes())
                .map(|n| {
                    let mut inner = false;
                    let mut outer = false;
                    for l in self.octants(n) {
                        match l {
                            Some(l) if self.is_mesh_cell(l) => inner = true,
                            _ => outer = true,
                        }
                    }
                    match (inner, outer) {
                        (true, false) => NodeType::INNERNODE,
                        (false, _) => NodeType::OUTERNODE,
                        (true, true) => NodeType::BOUNDARYNODE,
                    }
                })
                .collect::<Vec<_>>()
        })[node]
    }

    /// Iterates over the used octants of a node
    fn octants(&self, node: usize) -> impl Iterator<Item = Option<usize>> + '_ {
        let n = if self.octree.is_quadtree() { 4 } else { 8 };
        self.node_leaves(node)[..n].iter().copied()
    }

    ////////////////////////////////////////////////////////////////////////////
    // Faces and edges

    fn faces(&self) -> &[OctreeFace] {
        &self.face_data().faces
    }

    fn face_data(&self) -> &Faces {
        self.faces.get_or_init(|| {
            let o = self.octree;
            let mut faces = vec![];
            let mut scratch = vec![];
            for l in 0..o.n_leaves() {
                let nodes = self.leaf_nodes(l);
                for side in Side::iter() {
                    let face_nodes = side.corners().map(|c| nodes[c.index()]);
                    if o.is_quadtree() && side.axis() == Z {
                        faces.push(OctreeFace {
                            owner: l,
                            neighbour: None,
                            side,
                            nodes: face_nodes,
                        });
                        continue;
                    }
                    scratch.clear();
                    o.find_neighbours_in_direction(l, side, &mut scratch);
                    let neighbour = match scratch.as_slice() {
                        [Neighbour::Boundary] => None,
                        [Neighbour::Leaf(n)] => {
                            let (a, b) = (o.leaf_level(l), o.leaf_level(*n));
                            if a < b || (a == b && *n < l) {
                                // The face belongs to the other leaf
                                continue;
                            }
                            Some(*n)
                        }
                        // Finer neighbours or space on another rank
                        _ => continue,
                    };
                    faces.push(OctreeFace {
                        owner: l,
                        neighbour,
                        side,
                        nodes: face_nodes,
                    });
                }
            }
            let mut pairs = vec![];
            for (i, f) in faces.iter().enumerate() {
                pairs.push((f.owner, i));
                if let Some(n) = f.neighbour {
                    pairs.push((n, i));
                }
            }
            let leaf_faces = Graph::from_pairs(o.n_leaves(), &pairs);
            debug!("octree addressing: {} faces", faces.len());
            Faces { faces, leaf_faces }
        })
    }

    /// Returns all octree faces
    pub fn octree_faces(&self) -> &[OctreeFace] {
        self.faces()
    }

    /// Returns the faces of each leaf
    pub fn leaf_faces(&self) -> &Graph {
        &self.face_data().leaf_faces
    }

    /// Returns the nodes of a face, including hanging nodes on its edges
    ///
    /// Nodes are ordered counter-clockwise seen from the neighbour, i.e. the
    /// polygon normal points out of the owner.
    pub fn face_polygon(&self, face: usize) -> Vec<usize> {
        let nodes = self.faces()[face].nodes;
        let mut out = vec![];
        for i in 0..4 {
            let (a, b) = (nodes[i], nodes[(i + 1) % 4]);
            out.push(a);
            out.extend(self.nodes_between(a, b));
        }
        out
    }

    /// Returns the faces around each node
    pub fn node_faces(&self) -> &Graph {
        self.node_faces.get_or_init(|| {
            let pairs: Vec<(usize, usize)> = self
                .faces()
                .iter()
                .enumerate()
                .flat_map(|(i, f)| f.nodes.iter().map(move |n| (*n, i)))
                .collect();
            Graph::from_pairs(self.n_nodes(), &pairs)
        })
    }

    fn edge_data(&self) -> &Edges {
        self.edges.get_or_init(|| {
            let o = self.octree;
            let mut lookup: HashMap<[usize; 2], usize> = HashMap::new();
            let mut edges = vec![];
            let mut leaf_edges = Vec::with_capacity(o.n_leaves());
            let mut pairs = vec![];
            for l in 0..o.n_leaves() {
                let nodes = self.leaf_nodes(l);
                let mut le = [0; 12];
                for (i, (a, b)) in cube_edges().enumerate() {
                    let (a, b) = (nodes[a.index()], nodes[b.index()]);
                    let key = if a < b { [a, b] } else { [b, a] };
                    let e = *lookup.entry(key).or_insert_with(|| {
                        edges.push(key);
                        edges.len() - 1
                    });
                    le[i] = e;
                    pairs.push((e, l));
                }
                leaf_edges.push(le);
            }
            let edge_leaves = Graph::from_pairs(edges.len(), &pairs);
            Edges {
                edges,
                edge_leaves,
                leaf_edges,
            }
        })
    }

    /// Returns the octree edges as node pairs
    pub fn octree_edges(&self) -> &[[usize; 2]] {
        &self.edge_data().edges
    }

    /// Returns the leaves around each octree edge
    pub fn edge_leaves(&self) -> &Graph {
        &self.edge_data().edge_leaves
    }

    /// Returns the 12 edges of a leaf, in [`cube_edges`] order
    pub fn leaf_edges(&self, leaf: usize) -> &[usize; 12] {
        &self.edge_data().leaf_edges[leaf]
    }

    /// Returns the face neighbours of each leaf
    pub fn leaf_leaves(&self) -> &Graph {
        self.leaf_leaves.get_or_init(|| {
            let mut pairs = vec![];
            for f in self.faces() {
                if let Some(n) = f.neighbour {
                    pairs.push((f.owner, n));
                    pairs.push((n, f.owner));
                }
            }
            pairs.sort_unstable();
            pairs.dedup();
            Graph::from_pairs(self.octree.n_leaves(), &pairs)
        })
    }

    ////////////////////////////////////////////////////////////////////////////
    // Repairs

    /// Removes mesh cells that touch other mesh cells only at an edge or a
    /// vertex
    ///
    /// At every node, the mesh cells around it must form one face-connected
    /// group.  DATA cells outside the largest group at an offending node are
    /// dropped from the mesh; if only INSIDE cells are involved, the DATA
    /// leaves joining them are added instead.  Returns the number of changed
    /// leaves.
    pub fn check_and_fix_irregular_connections(&mut self) -> usize {
        let mut changed = 0;
        for _ in 0..10 {
            let mut remove = BTreeSet::new();
            let mut add = BTreeSet::new();
            for n in 0..self.n_nodes() {
                let groups = self.mesh_cell_groups(n);
                if groups.len() < 2 {
                    continue;
                }
                let largest = groups
                    .iter()
                    .enumerate()
                    .max_by_key(|(i, g)| (g.len(), std::cmp::Reverse(*i)))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                let mut found = false;
                for (i, g) in groups.iter().enumerate() {
                    if i == largest {
                        continue;
                    }
                    for l in g {
                        if self.octree.leaf_type(*l) == CubeType::Data {
                            remove.insert(*l);
                            found = true;
                        }
                    }
                }
                if !found {
                    for l in self.octants(n).flatten() {
                        if !self.is_mesh_cell(l) && self.octree.leaf_type(l) == CubeType::Data {
                            add.insert(l);
                        }
                    }
                }
            }
            if remove.is_empty() && add.is_empty() {
                break;
            }
            let mut bt = self.box_type().to_vec();
            for l in &remove {
                bt[*l] = false;
            }
            for l in &add {
                bt[*l] = true;
            }
            changed += remove.len() + add.len();
            self.clear_geometry();
            self.box_type = OnceCell::with_value(bt);
        }
        if changed > 0 {
            info!("fixed irregular connections by changing {changed} leaves");
        }
        changed
    }

    /// Splits the mesh cells around a node into face-connected groups
    fn mesh_cell_groups(&self, node: usize) -> Vec<Vec<usize>> {
        let n = if self.octree.is_quadtree() { 4 } else { 8 };
        let octants = self.node_leaves(node);
        let mut group = [usize::MAX; 8];
        let mut out: Vec<Vec<usize>> = vec![];
        for seed in 0..n {
            let Some(l) = octants[seed] else { continue };
            if group[seed] != usize::MAX || !self.is_mesh_cell(l) {
                continue;
            }
            let g = out.len();
            let mut members = BTreeSet::new();
            let mut stack = vec![seed];
            group[seed] = g;
            while let Some(i) = stack.pop() {
                let Some(li) = octants[i] else { continue };
                members.insert(li);
                for j in 0..n {
                    if group[j] != usize::MAX {
                        continue;
                    }
                    let Some(lj) = octants[j] else { continue };
                    let face_adjacent = (i ^ j).count_ones() == 1;
                    if self.is_mesh_cell(lj) && (lj == li || face_adjacent) {
                        group[j] = g;
                        stack.push(j);
                    }
                }
            }
            out.push(members.into_iter().collect());
        }
        out
    }

    ////////////////////////////////////////////////////////////////////////////
    // Global labels

    /// Assigns labels to owned leaves that are unique over all ranks
    ///
    /// Ghost leaves receive the label given by their owner; leaves whose
    /// owner did not send a label are `None`.
    pub fn global_leaf_labels<C: Communicator>(
        &self,
        comm: &C,
    ) -> Result<Vec<Option<usize>>, Error> {
        if !comm.is_parallel() {
            return Err(Error::SerialRun("global_leaf_labels"));
        }
        let o = self.octree;
        let rank = comm.rank();
        let owned: Vec<usize> = (0..o.n_leaves()).filter(|l| o.is_owned(*l)).collect();
        let counts = comm.all_gather(owned.len())?;
        let offset: usize = counts[..rank].iter().sum();

        let mut labels = vec![None; o.n_leaves()];
        let mut outgoing: BTreeMap<usize, Vec<(CubeCoordinates, usize)>> = BTreeMap::new();
        for (i, l) in owned.iter().enumerate() {
            labels[*l] = Some(offset + i);
            let c = o.leaf_coordinates(*l);
            let mut targets = BTreeSet::new();
            for t in o.find_all_leaf_neighbours(*l) {
                if !o.is_owned(t) {
                    targets.insert(o.leaf_proc(t));
                }
            }
            for t in targets {
                outgoing.entry(t).or_default().push((c, offset + i));
            }
        }
        for (c, label) in comm.exchange(outgoing)?.into_values().flatten() {
            if let Some(l) = o.find_leaf_label_for_position(&c) {
                labels[l] = Some(label);
            }
        }
        Ok(labels)
    }

    /// Assigns labels to nodes that are unique over all ranks
    ///
    /// A node belongs to the lowest rank owning a leaf around it.  This needs
    /// a ghost layer (see
    /// [`add_layer_from_neighbouring_processors`](super::OctreeModifier::add_layer_from_neighbouring_processors))
    /// so that every octant around an owned leaf's nodes is known.  Nodes
    /// not touching an owned leaf are `None`.
    pub fn global_node_labels<C: Communicator>(
        &self,
        comm: &C,
    ) -> Result<Vec<Option<usize>>, Error> {
        if !comm.is_parallel() {
            return Err(Error::SerialRun("global_node_labels"));
        }
        let o = self.octree;
        let rank = comm.rank();
        let n_nodes = self.n_nodes();

        let mut procs = vec![BTreeSet::new(); n_nodes];
        let mut touches_owned = vec![false; n_nodes];
        for (n, p) in procs.iter_mut().enumerate() {
            for l in self.octants(n).flatten() {
                p.insert(o.leaf_proc(l));
                touches_owned[n] |= o.is_owned(l);
            }
        }
        let mine: Vec<usize> = (0..n_nodes)
            .filter(|n| touches_owned[*n] && procs[*n].first() == Some(&rank))
            .collect();
        let counts = comm.all_gather(mine.len())?;
        let offset: usize = counts[..rank].iter().sum();

        let mut labels = vec![None; n_nodes];
        let mut outgoing: BTreeMap<usize, Vec<([i64; 3], usize)>> = BTreeMap::new();
        for (i, n) in mine.iter().enumerate() {
            labels[*n] = Some(offset + i);
            for p in procs[*n].iter().filter(|p| **p != rank) {
                outgoing
                    .entry(*p)
                    .or_default()
                    .push((self.node_key(*n), offset + i));
            }
        }
        for (key, label) in comm.exchange(outgoing)?.into_values().flatten() {
            if let Some(n) = self.find_node(&key) {
                if touches_owned[n] {
                    labels[n] = Some(label);
                }
            }
        }
        Ok(labels)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::{LocalCluster, SerialComm};
    use crate::geom::{self, BoundBox};
    use crate::octree::test::sphere_octree;
    use crate::octree::{InsideOutside, OctreeModifier};
    use crate::surface::box_surface;
    use std::sync::Arc;

    #[test]
    fn uniform_grid() {
        let o = sphere_octree(2);
        let a = OctreeAddressing::new(&o, true);
        assert_eq!(a.n_nodes(), 125);
        // 3 * 4 * 4 * 5 faces in a 4x4x4 grid
        assert_eq!(a.octree_faces().len(), 240);
        assert_eq!(a.octree_edges().len(), 300);
        let inner = a.leaf_leaves().row(21).len();
        assert_eq!(inner, 6);
        for f in 0..a.octree_faces().len() {
            assert_eq!(a.face_polygon(f).len(), 4);
        }
    }

    #[test]
    fn face_orientation() {
        let o = sphere_octree(1);
        let a = OctreeAddressing::new(&o, true);
        for (i, f) in a.octree_faces().iter().enumerate() {
            let pts: Vec<Point> = a.face_polygon(i).iter().map(|n| a.node_position(*n)).collect();
            let (normal, centre) = geom::polygon_normal_and_centre(&pts);
            let out = centre - o.leaf_centre(f.owner);
            assert!(normal.dot(&out) > 0.0, "face {i} points into its owner");
        }
    }

    #[test]
    fn hanging_nodes() {
        let mut o = sphere_octree(1);
        let mut refine = vec![false; 8];
        refine[0] = true;
        OctreeModifier::new(&mut o).refine_selected_boxes(&mut refine, false);
        let a = OctreeAddressing::new(&o, true);
        // 27 nodes of the coarse grid, plus 19 new ones inside leaf 0's region
        assert_eq!(a.n_nodes(), 27 + 19);

        // A coarse leaf next to the refined one sees hanging nodes on the
        // shared face's edges
        let coarse = o
            .find_leaf_label_for_position(&CubeCoordinates::new(1, 0, 0, 1))
            .unwrap();
        let faces: Vec<usize> = a.leaf_faces().row(coarse).to_vec();
        let shared = faces
            .iter()
            .filter(|f| {
                let f = &a.octree_faces()[**f];
                f.neighbour == Some(coarse) && o.leaf_level(f.owner) == 2
            })
            .count();
        assert_eq!(shared, 4);
        let largest = faces.iter().map(|f| a.face_polygon(*f).len()).max().unwrap();
        // Faces of the coarse leaf touching the refined octant along an edge
        // gain its midpoint
        assert_eq!(largest, 5);
    }

    #[test]
    fn node_types() {
        let mut o = sphere_octree(3);
        InsideOutside::new(&mut o, &SerialComm).run().unwrap();
        let a = OctreeAddressing::new(&o, false);
        let mut seen = [false; 3];
        for n in 0..a.n_nodes() {
            let t = a.node_type(n);
            seen[0] |= t == NodeType::INNERNODE;
            seen[1] |= t == NodeType::OUTERNODE;
            seen[2] |= t == NodeType::BOUNDARYNODE;
        }
        assert_eq!(seen, [true; 3]);
        // Nodes on the root boundary always touch the exterior
        assert!(a.node_type(a.leaf_nodes(0)[0]).contains(NodeType::OUTERNODE));
    }

    #[test]
    fn irregular_connection() {
        // Two cubes touching along one edge
        let bb = BoundBox::new(Point::zeros(), Point::repeat(1.0));
        let s = Arc::new(box_surface(&bb));
        let mut o = Octree::new(s, bb, false);
        let mut refine = vec![true];
        OctreeModifier::new(&mut o).refine_selected_boxes(&mut refine, false);
        let mut m = OctreeModifier::new(&mut o);
        for l in 0..8 {
            m.set_leaf_type(l, CubeType::Outside);
        }
        m.set_leaf_type(0, CubeType::Data);
        m.set_leaf_type(3, CubeType::Data);
        let mut a = OctreeAddressing::new(&o, true);
        assert_eq!(a.n_mesh_cells(), 2);
        assert_eq!(a.check_and_fix_irregular_connections(), 1);
        assert_eq!(a.n_mesh_cells(), 1);
    }

    #[test]
    fn global_labels() {
        let results = LocalCluster::run(2, |comm| {
            let mut o = sphere_octree(2);
            let mut m = OctreeModifier::new(&mut o);
            m.distribute_leaves_to_processors(comm).unwrap();
            m.add_layer_from_neighbouring_processors(comm).unwrap();
            let a = OctreeAddressing::new(&o, true);
            assert!(a.global_leaf_labels(&SerialComm).is_err());
            let leaves = a.global_leaf_labels(comm).unwrap();
            let nodes = a.global_node_labels(comm).unwrap();
            let by_key: BTreeMap<[i64; 3], usize> = (0..a.n_nodes())
                .filter_map(|n| nodes[n].map(|g| (a.node_key(n), g)))
                .collect();
            (leaves.iter().flatten().count(), o.n_leaves(), by_key)
        });
        for (labelled, n, _) in &results {
            assert_eq!(labelled, n);
        }
        // Shared nodes get the same label on both ranks
        let (a, b) = (&results[0].2, &results[1].2);
        let mut shared = 0;
        for (k, g) in a {
            if let Some(h) = b.get(k) {
                assert_eq!(g, h);
                shared += 1;
            }
        }
        assert_eq!(shared, 25);
        let all: BTreeSet<usize> = a.values().chain(b.values()).copied().collect();
        assert_eq!(all.len(), 125);
        assert_eq!(*all.iter().max().unwrap(), 124);
    }
}
