//! Tetrahedral decomposition of a polyhedral mesh
use super::{tet_quality, TetSimplex};
use crate::{geom::Point, graph::Graph, mesh::PolyMesh};
use arrayvec::ArrayVec;
use rayon::prelude::*;
use std::collections::HashMap;

/// Puts vertex `k` of a positive tetrahedron last, keeping it positive
const FREE_LAST: [[usize; 4]; 4] = [[1, 3, 2, 0], [0, 2, 3, 1], [0, 3, 1, 2], [0, 1, 2, 3]];

/// Tetrahedral view of a polyhedral mesh
///
/// Every cell is split into tetrahedra joining its faces to a node at the
/// cell centre; faces with more than three points are fanned from a node at
/// the face centre.  The first nodes are the mesh points, in the same order,
/// followed by face centres and then cell centres.  Centre nodes are never
/// smoothed; they are recomputed from the mesh points by
/// [`update_centres`](Self::update_centres).
#[derive(Clone, Debug)]
pub struct PartTetMesh {
    nodes: Vec<Point>,
    n_mesh_points: usize,
    /// Face centre nodes, with the points they are averaged from
    face_centres: Vec<(usize, Vec<usize>)>,
    /// First cell centre node
    first_cell_node: usize,
    cell_points: Graph,
    tets: Vec<[usize; 4]>,
    node_tets: Graph,
    locked: Vec<bool>,
}

impl PartTetMesh {
    /// Decomposes every cell of the mesh
    ///
    /// `locked` flags mesh points that must never move.
    pub fn new(mesh: &PolyMesh, locked: &[bool]) -> Self {
        debug_assert_eq!(locked.len(), mesh.n_points());
        let n_mesh_points = mesh.n_points();
        let mut nodes = mesh.points().to_vec();

        let mut face_node = HashMap::new();
        let mut face_centres = vec![];
        for (f, face) in mesh.faces().iter().enumerate() {
            if face.len() > 3 {
                let c = face.iter().map(|p| nodes[*p]).sum::<Point>() / face.len() as f64;
                face_node.insert(f, nodes.len());
                face_centres.push((nodes.len(), face.clone()));
                nodes.push(c);
            }
        }

        let first_cell_node = nodes.len();
        let cell_points = mesh.cell_points().clone();
        for c in 0..mesh.n_cells() {
            nodes.push(centre(&nodes, cell_points.row(c)));
        }

        let mut tets = vec![];
        for c in 0..mesh.n_cells() {
            let cc = first_cell_node + c;
            for f in mesh.cells().row(c) {
                let mut face = mesh.faces()[*f].clone();
                if mesh.owner()[*f] != c {
                    face.reverse();
                }
                match face_node.get(f) {
                    None => tets.push([face[0], face[2], face[1], cc]),
                    Some(fc) => {
                        for i in 0..face.len() {
                            let j = (i + 1) % face.len();
                            tets.push([face[i], *fc, face[j], cc]);
                        }
                    }
                }
            }
        }
        let pairs: Vec<(usize, usize)> = tets
            .iter()
            .enumerate()
            .flat_map(|(t, nodes)| nodes.iter().map(move |n| (*n, t)))
            .collect();
        let node_tets = Graph::from_pairs(nodes.len(), &pairs);

        let mut locked = locked.to_vec();
        locked.resize(nodes.len(), true);
        Self {
            nodes,
            n_mesh_points,
            face_centres,
            first_cell_node,
            cell_points,
            tets,
            node_tets,
            locked,
        }
    }

    /// Returns every node
    pub fn nodes(&self) -> &[Point] {
        &self.nodes
    }

    /// Returns the tetrahedra
    pub fn tets(&self) -> &[[usize; 4]] {
        &self.tets
    }

    /// Returns the tetrahedra around each node
    pub fn node_tets(&self) -> &Graph {
        &self.node_tets
    }

    /// Checks whether a node may move
    pub fn is_locked(&self, node: usize) -> bool {
        self.locked[node]
    }

    /// Locks a mesh point
    pub fn lock(&mut self, node: usize) {
        self.locked[node] = true;
    }

    /// Returns the mesh points that may move
    pub fn free_points(&self) -> Vec<usize> {
        (0..self.n_mesh_points).filter(|p| !self.locked[*p]).collect()
    }

    /// Returns the mesh points among the nodes of a tetrahedron
    pub fn tet_points(&self, t: usize) -> ArrayVec<usize, 4> {
        self.tets[t]
            .iter()
            .copied()
            .filter(|n| *n < self.n_mesh_points)
            .collect()
    }

    /// Builds the ring of tetrahedra around a node
    pub fn simplex(&self, node: usize) -> TetSimplex {
        let mut local = HashMap::new();
        let mut ring = vec![];
        let mut bases = vec![];
        for t in self.node_tets.row(node) {
            let tet = self.tets[*t];
            let Some(k) = tet.iter().position(|n| *n == node) else {
                continue;
            };
            let order = FREE_LAST[k];
            let mut base = [0; 3];
            for (b, i) in base.iter_mut().zip(&order[..3]) {
                let n = tet[*i];
                *b = *local.entry(n).or_insert_with(|| {
                    ring.push(self.nodes[n]);
                    ring.len() - 1
                });
            }
            bases.push(base);
        }
        TetSimplex::new(ring, self.nodes[node], &bases)
    }

    /// Moves a node
    pub fn update_vertex(&mut self, node: usize, p: Point) {
        self.nodes[node] = p;
    }

    /// Recomputes the face and cell centre nodes from the mesh points
    pub fn update_centres(&mut self) {
        let faces: Vec<Point> = self
            .face_centres
            .par_iter()
            .map(|(_, pts)| centre(&self.nodes, pts))
            .collect();
        for ((n, _), c) in self.face_centres.iter().zip(faces) {
            self.nodes[*n] = c;
        }
        let cells: Vec<Point> = (0..self.cell_points.n_rows())
            .into_par_iter()
            .map(|c| centre(&self.nodes, self.cell_points.row(c)))
            .collect();
        self.nodes[self.first_cell_node..].copy_from_slice(&cells);
    }

    /// Writes the mesh point nodes back into the mesh
    pub fn copy_to_mesh(&self, mesh: &mut PolyMesh) {
        mesh.points_mut()
            .copy_from_slice(&self.nodes[..self.n_mesh_points]);
    }

    /// Returns the quality of every tetrahedron
    pub fn qualities(&self) -> Vec<f64> {
        self.tets
            .par_iter()
            .map(|t| {
                let [a, b, c, d] = t.map(|n| self.nodes[n]);
                tet_quality(&a, &b, &c, &d)
            })
            .collect()
    }

    /// Returns the smallest tetrahedron quality around each node
    pub fn node_qualities(&self) -> Vec<f64> {
        let q = self.qualities();
        (0..self.nodes.len())
            .into_par_iter()
            .map(|n| {
                self.node_tets
                    .row(n)
                    .iter()
                    .map(|t| q[*t])
                    .fold(f64::INFINITY, f64::min)
            })
            .collect()
    }

    /// Returns the smallest tetrahedron quality
    pub fn min_quality(&self) -> f64 {
        self.qualities().into_iter().fold(f64::INFINITY, f64::min)
    }

    /// Returns the free mesh points of tetrahedra below the given quality
    pub fn bad_points(&self, threshold: f64) -> Vec<usize> {
        let mut bad = vec![false; self.n_mesh_points];
        for (t, q) in self.qualities().into_iter().enumerate() {
            if q < threshold {
                for p in self.tet_points(t) {
                    bad[p] = !self.locked[p];
                }
            }
        }
        (0..self.n_mesh_points).filter(|p| bad[*p]).collect()
    }

    /// Splits points into groups which never share a tetrahedron
    ///
    /// Points in one group can be smoothed concurrently, since moving one of
    /// them never changes the ring of another.
    pub fn colour(&self, points: &[usize]) -> Vec<Vec<usize>> {
        let mut colour: Vec<Option<usize>> = vec![None; self.n_mesh_points];
        let mut groups: Vec<Vec<usize>> = vec![];
        for &p in points {
            let mut used = vec![false; groups.len()];
            for t in self.node_tets.row(p) {
                for q in self.tet_points(*t) {
                    if let Some(c) = colour[q] {
                        used[c] = true;
                    }
                }
            }
            let c = used.iter().position(|u| !u).unwrap_or(groups.len());
            if c == groups.len() {
                groups.push(vec![]);
            }
            groups[c].push(p);
            colour[p] = Some(c);
        }
        groups
    }
}

fn centre(nodes: &[Point], pts: &[usize]) -> Point {
    pts.iter().map(|p| nodes[*p]).sum::<Point>() / pts.len().max(1) as f64
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::test::hex_block;
    use approx::assert_relative_eq;

    #[test]
    fn block_decomposition() {
        let m = hex_block(2);
        let locked = vec![false; m.n_points()];
        let t = PartTetMesh::new(&m, &locked);
        // 6 quads per hex, 4 tets per quad
        assert_eq!(t.tets().len(), 8 * 24);
        // 27 points, 36 face centres, 8 cell centres
        assert_eq!(t.nodes().len(), 27 + 36 + 8);
        for q in t.qualities() {
            assert!(q > 0.0);
        }
        let total: f64 = t
            .tets()
            .iter()
            .map(|tet| {
                let [a, b, c, d] = tet.map(|n| t.nodes()[n]);
                crate::geom::tet_volume(&a, &b, &c, &d)
            })
            .sum();
        assert_relative_eq!(total, 8.0, epsilon = 1e-12);
    }

    #[test]
    fn simplex_ring() {
        let m = hex_block(2);
        let t = PartTetMesh::new(&m, &vec![false; m.n_points()]);
        // The centre point of the block
        let s = t.simplex(13);
        assert_eq!(s.tets.len(), 8 * 6);
        assert!(s.is_valid_at(&s.position()));
        assert_relative_eq!(s.position(), Point::repeat(1.0));
        assert!(!s.is_valid_at(&Point::repeat(1.6)));
    }

    #[test]
    fn colouring() {
        let m = hex_block(2);
        let t = PartTetMesh::new(&m, &vec![false; m.n_points()]);
        let all = t.free_points();
        let groups = t.colour(&all);
        assert_eq!(groups.iter().map(|g| g.len()).sum::<usize>(), 27);
        for g in &groups {
            for (i, a) in g.iter().enumerate() {
                for b in &g[i + 1..] {
                    let shared = t
                        .node_tets()
                        .row(*a)
                        .iter()
                        .any(|x| t.node_tets().row(*b).contains(x));
                    assert!(!shared, "{a} and {b} share a tetrahedron");
                }
            }
        }
    }

    #[test]
    fn moved_point() {
        let mut m = hex_block(2);
        let mut locked = vec![true; m.n_points()];
        locked[13] = false;
        let mut t = PartTetMesh::new(&m, &locked);
        assert_eq!(t.free_points(), vec![13]);
        assert!(t.bad_points(0.0).is_empty());
        t.update_vertex(13, Point::repeat(1.9));
        t.update_centres();
        assert!(t.min_quality() < 0.0);
        assert_eq!(t.bad_points(0.0), vec![13]);
        t.copy_to_mesh(&mut m);
        assert_relative_eq!(m.points()[13], Point::repeat(1.9));
    }
}
