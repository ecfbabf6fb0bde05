//! Addressing of the boundary of a volume mesh
use super::PolyMesh;
use crate::{
    geom::{self, Point},
    graph::Graph,
};
use once_cell::sync::OnceCell;
use std::collections::HashMap;

#[derive(Debug)]
struct Edges {
    edges: Vec<[usize; 2]>,
    edge_faces: Graph,
    face_edges: Graph,
}

/// Boundary view of a [`PolyMesh`]
///
/// Boundary faces and points get their own dense labels (`bf` and `bp`); all
/// point lists still hold mesh point labels.  The engine copies what it
/// needs, so the mesh may be modified while it is alive; any change to the
/// mesh topology makes it stale.
#[derive(Debug)]
pub struct SurfaceEngine {
    face_labels: Vec<usize>,
    faces: Vec<Vec<usize>>,
    face_patches: Vec<usize>,
    face_owners: Vec<usize>,
    boundary_points: Vec<usize>,
    bp: HashMap<usize, usize>,
    point_faces: Graph,

    edges: OnceCell<Edges>,
    point_points: OnceCell<Graph>,
}

impl SurfaceEngine {
    /// Collects the boundary of a mesh
    pub fn new(mesh: &PolyMesh) -> Self {
        let range = mesh.boundary_faces();
        let face_labels: Vec<usize> = range.clone().collect();
        let faces: Vec<Vec<usize>> = range.clone().map(|f| mesh.faces()[f].clone()).collect();
        let face_patches = range
            .clone()
            .map(|f| mesh.face_patch(f).unwrap_or(0))
            .collect();
        let face_owners = range.map(|f| mesh.owner()[f]).collect();

        let mut boundary_points: Vec<usize> = faces.iter().flatten().copied().collect();
        boundary_points.sort_unstable();
        boundary_points.dedup();
        let bp: HashMap<usize, usize> = boundary_points
            .iter()
            .enumerate()
            .map(|(i, p)| (*p, i))
            .collect();
        let bp_ref = &bp;
        let pairs: Vec<(usize, usize)> = faces
            .iter()
            .enumerate()
            .flat_map(|(f, nodes)| nodes.iter().map(move |p| (bp_ref[p], f)))
            .collect();
        let point_faces = Graph::from_pairs(boundary_points.len(), &pairs);
        Self {
            face_labels,
            faces,
            face_patches,
            face_owners,
            boundary_points,
            bp,
            point_faces,
            edges: OnceCell::new(),
            point_points: OnceCell::new(),
        }
    }

    /// Returns the point lists of the boundary faces
    pub fn boundary_faces(&self) -> &[Vec<usize>] {
        &self.faces
    }

    /// Returns the mesh face label of each boundary face
    pub fn face_labels(&self) -> &[usize] {
        &self.face_labels
    }

    /// Returns the patch of each boundary face
    pub fn face_patches(&self) -> &[usize] {
        &self.face_patches
    }

    /// Returns the owner cell of each boundary face
    pub fn face_owners(&self) -> &[usize] {
        &self.face_owners
    }

    /// Returns the mesh label of each boundary point
    pub fn boundary_points(&self) -> &[usize] {
        &self.boundary_points
    }

    /// Returns the boundary label of a mesh point, if it is on the boundary
    pub fn bp(&self, point: usize) -> Option<usize> {
        self.bp.get(&point).copied()
    }

    /// Returns the boundary faces around each boundary point
    pub fn point_faces(&self) -> &Graph {
        &self.point_faces
    }

    fn edge_data(&self) -> &Edges {
        self.edges.get_or_init(|| {
            let mut lookup: HashMap<[usize; 2], usize> = HashMap::new();
            let mut edges = vec![];
            let mut face_edges = Graph::new();
            for face in &self.faces {
                let n = face.len();
                face_edges.append_row((0..n).map(|i| {
                    let (a, b) = (face[i], face[(i + 1) % n]);
                    let key = if a < b { [a, b] } else { [b, a] };
                    *lookup.entry(key).or_insert_with(|| {
                        edges.push(key);
                        edges.len() - 1
                    })
                }));
            }
            let edge_faces = face_edges.reverse(edges.len());
            Edges {
                edges,
                edge_faces,
                face_edges,
            }
        })
    }

    /// Returns the boundary edges, as sorted mesh point pairs
    pub fn edges(&self) -> &[[usize; 2]] {
        &self.edge_data().edges
    }

    /// Returns the boundary faces around each boundary edge
    pub fn edge_faces(&self) -> &Graph {
        &self.edge_data().edge_faces
    }

    /// Returns the edges of each boundary face
    pub fn face_edges(&self) -> &Graph {
        &self.edge_data().face_edges
    }

    /// Returns the boundary points sharing a boundary edge with each
    /// boundary point, as `bp` labels
    pub fn point_points(&self) -> &Graph {
        self.point_points.get_or_init(|| {
            let mut pairs = vec![];
            for [a, b] in self.edges() {
                let (a, b) = (self.bp[a], self.bp[b]);
                pairs.push((a, b));
                pairs.push((b, a));
            }
            pairs.sort_unstable();
            Graph::from_pairs(self.boundary_points.len(), &pairs)
        })
    }

    /// Returns the distinct patches around a boundary point, sorted
    pub fn point_patches(&self, bp: usize) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .point_faces
            .row(bp)
            .iter()
            .map(|f| self.face_patches[*f])
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Returns the area vector and centre of each boundary face
    pub fn face_geometry(&self, points: &[Point]) -> Vec<(Point, Point)> {
        self.faces
            .iter()
            .map(|f| {
                let pts: Vec<Point> = f.iter().map(|p| points[*p]).collect();
                geom::polygon_normal_and_centre(&pts)
            })
            .collect()
    }

    /// Returns the unit normal at each boundary point
    ///
    /// Normals are area-weighted averages of the surrounding face normals.
    pub fn point_normals(&self, points: &[Point]) -> Vec<Point> {
        let faces = self.face_geometry(points);
        (0..self.boundary_points.len())
            .map(|bp| {
                let n: Point = self.point_faces.row(bp).iter().map(|f| faces[*f].0).sum();
                n.try_normalize(f64::MIN_POSITIVE).unwrap_or(n)
            })
            .collect()
    }
}
