//! Lazily computed mesh connectivity
use super::PolyMesh;
use crate::graph::Graph;
use once_cell::sync::OnceCell;
use rayon::prelude::*;
use std::collections::HashMap;

#[derive(Debug)]
struct Edges {
    edges: Vec<[usize; 2]>,
    face_edges: Graph,
    edge_faces: Graph,
}

/// Cached connectivity tables of a [`PolyMesh`]
///
/// Every table is purely topological; it stays valid while points move and
/// is dropped by [`PolyMesh::clear_addressing`].
#[derive(Debug, Default)]
pub(crate) struct MeshAddressing {
    cells: OnceCell<Graph>,
    point_faces: OnceCell<Graph>,
    point_cells: OnceCell<Graph>,
    cell_points: OnceCell<Graph>,
    edges: OnceCell<Edges>,
    point_edges: OnceCell<Graph>,
    point_points: OnceCell<Graph>,
}

impl PolyMesh {
    /// Returns the faces of every cell
    pub fn cells(&self) -> &Graph {
        self.addressing.cells.get_or_init(|| {
            let mut pairs = Vec::with_capacity(self.faces.len() * 2);
            for (f, o) in self.owner.iter().enumerate() {
                pairs.push((*o, f));
            }
            for (f, n) in self.neighbour.iter().enumerate() {
                pairs.push((*n, f));
            }
            pairs.sort_unstable();
            Graph::from_pairs(self.n_cells, &pairs)
        })
    }

    /// Returns the faces around every point
    pub fn point_faces(&self) -> &Graph {
        self.addressing
            .point_faces
            .get_or_init(|| Graph::from_rows(self.faces.iter().cloned()).reverse(self.points.len()))
    }

    /// Returns the points of every cell, sorted
    pub fn cell_points(&self) -> &Graph {
        self.addressing.cell_points.get_or_init(|| {
            let cells = self.cells();
            let rows: Vec<Vec<usize>> = (0..self.n_cells)
                .into_par_iter()
                .map(|c| {
                    let mut pts: Vec<usize> = cells
                        .row(c)
                        .iter()
                        .flat_map(|f| self.faces[*f].iter().copied())
                        .collect();
                    pts.sort_unstable();
                    pts.dedup();
                    pts
                })
                .collect();
            Graph::from_rows(rows)
        })
    }

    /// Returns the cells around every point
    pub fn point_cells(&self) -> &Graph {
        self.addressing
            .point_cells
            .get_or_init(|| self.cell_points().reverse(self.points.len()))
    }

    fn edge_data(&self) -> &Edges {
        self.addressing.edges.get_or_init(|| {
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
                face_edges,
                edge_faces,
            }
        })
    }

    /// Returns the unique mesh edges, as sorted point pairs
    pub fn edges(&self) -> &[[usize; 2]] {
        &self.edge_data().edges
    }

    /// Returns the edges of every face
    ///
    /// Edge `i` of a face joins its points `i` and `i + 1`.
    pub fn face_edges(&self) -> &Graph {
        &self.edge_data().face_edges
    }

    /// Returns the faces around every edge
    pub fn edge_faces(&self) -> &Graph {
        &self.edge_data().edge_faces
    }

    /// Returns the edges around every point
    pub fn point_edges(&self) -> &Graph {
        self.addressing.point_edges.get_or_init(|| {
            let edges = self.edges();
            let pairs: Vec<(usize, usize)> = edges
                .iter()
                .enumerate()
                .flat_map(|(i, e)| [(e[0], i), (e[1], i)])
                .collect();
            Graph::from_pairs(self.points.len(), &pairs)
        })
    }

    /// Returns the points sharing an edge with every point
    pub fn point_points(&self) -> &Graph {
        self.addressing.point_points.get_or_init(|| {
            let edges = self.edges();
            let pe = self.point_edges();
            Graph::from_rows((0..self.points.len()).map(|p| {
                pe.row(p)
                    .iter()
                    .map(|e| {
                        let [a, b] = edges[*e];
                        if a == p { b } else { a }
                    })
                    .collect::<Vec<_>>()
            }))
        })
    }
}
