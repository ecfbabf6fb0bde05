//! Polyhedral template dual to a tetrahedral one
use super::{TetMesh, DEFAULT_PATCH};
use crate::{
    geom::{self, Point},
    mesh::{MeshBuilder, PolyMesh},
    Error,
};
use log::{info, warn};

/// Builds the dual of a tetrahedral mesh
///
/// Every interior point of the tetrahedral mesh becomes a cell; every edge
/// touching an interior point becomes a face through the centroids of the
/// tetrahedra around the edge.  Faces of edges reaching the boundary end up
/// on the template boundary.
pub struct VoronoiExtractor<'a> {
    tets: &'a TetMesh,
}

impl<'a> VoronoiExtractor<'a> {
    /// Builds an extractor over a tetrahedral mesh
    pub fn new(tets: &'a TetMesh) -> Self {
        Self { tets }
    }

    /// Orders the tetrahedra around an edge into a ring
    ///
    /// Returns `None` if they do not form a closed ring.
    fn edge_ring(&self, edge: [usize; 2], around: &[usize]) -> Option<Vec<usize>> {
        let others = |t: usize| -> [usize; 2] {
            let mut out = [usize::MAX; 2];
            let mut i = 0;
            for p in self.tets.tets[t] {
                if !edge.contains(&p) && i < 2 {
                    out[i] = p;
                    i += 1;
                }
            }
            out
        };
        let first = *around.first()?;
        let mut ring = vec![first];
        let mut used = vec![false; around.len()];
        used[0] = true;
        let mut next = others(first)[1];
        let target = others(first)[0];
        while next != target {
            let (i, t) = around
                .iter()
                .enumerate()
                .find(|(i, t)| !used[*i] && others(**t).contains(&next))?;
            used[i] = true;
            ring.push(*t);
            let [c, d] = others(*t);
            next = if c == next { d } else { c };
        }
        (ring.len() == around.len()).then_some(ring)
    }

    /// Creates the mesh
    pub fn create_mesh(&self) -> Result<PolyMesh, Error> {
        let t = self.tets;
        let boundary = t.boundary_points();
        let mut cell_of = vec![None; t.points.len()];
        let mut n_cells = 0;
        for (p, b) in boundary.iter().enumerate() {
            if !b {
                cell_of[p] = Some(n_cells);
                n_cells += 1;
            }
        }
        if n_cells == 0 {
            return Err(Error::EmptyMesh);
        }

        let centroids: Vec<Point> = t
            .tets
            .iter()
            .map(|tet| tet.iter().map(|p| t.points[*p]).sum::<Point>() / 4.0)
            .collect();
        let mut cells: Vec<Vec<Vec<usize>>> = vec![vec![]; n_cells];
        let mut n_open = 0;
        for (edge, around) in t.edge_tets() {
            let [a, b] = edge;
            if cell_of[a].is_none() && cell_of[b].is_none() {
                continue;
            }
            let Some(mut ring) = self.edge_ring(edge, &around) else {
                n_open += 1;
                continue;
            };
            let pts: Vec<Point> = ring.iter().map(|i| centroids[*i]).collect();
            let (normal, _) = geom::polygon_normal_and_centre(&pts);
            if normal.dot(&(t.points[b] - t.points[a])) < 0.0 {
                ring.reverse();
            }
            if let Some(c) = cell_of[a] {
                cells[c].push(ring.clone());
            }
            if let Some(c) = cell_of[b] {
                ring.reverse();
                cells[c].push(ring);
            }
        }
        if n_open > 0 {
            warn!("{n_open} interior edges have an open ring of tetrahedra");
        }

        let mut builder = MeshBuilder::with_points(centroids);
        for c in cells {
            builder.add_cell(c)?;
        }
        let mut mesh = builder.build(DEFAULT_PATCH)?;
        mesh.remove_unused_vertices();
        info!(
            "voronoi template: {} cells, {} points",
            mesh.n_cells(),
            mesh.n_points()
        );
        Ok(mesh)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::extract::{test::classified_sphere, TetExtractor};
    use crate::mesh::{quality::cell_centres_and_volumes, SurfaceEngine};
    use crate::octree::OctreeAddressing;

    #[test]
    fn dual_of_sphere_template() {
        let o = classified_sphere(3);
        let a = OctreeAddressing::new(&o, false);
        let t = TetExtractor::new(&a).create_tet_mesh().unwrap();
        let n_inner = t.boundary_points().iter().filter(|b| !**b).count();
        let m = VoronoiExtractor::new(&t).create_mesh().unwrap();
        assert_eq!(m.n_cells(), n_inner);
        let (_, vols) = cell_centres_and_volumes(&m);
        assert!(vols.iter().all(|v| *v > 0.0));

        let s = SurfaceEngine::new(&m);
        assert!(s.edge_faces().rows().all(|r| r.len() % 2 == 0));
    }

    #[test]
    fn single_interior_point() {
        // Eight tetrahedra around the origin, forming an octahedron
        let points = vec![
            Point::zeros(),
            Point::new(1.0, 0.0, 0.0),
            Point::new(-1.0, 0.0, 0.0),
            Point::new(0.0, 1.0, 0.0),
            Point::new(0.0, -1.0, 0.0),
            Point::new(0.0, 0.0, 1.0),
            Point::new(0.0, 0.0, -1.0),
        ];
        let mut tets = vec![];
        for x in [1, 2] {
            for y in [3, 4] {
                for z in [5, 6] {
                    let mut tet = [x, y, z, 0];
                    let [a, b, c, d] = tet.map(|p| points[p]);
                    if geom::tet_volume(&a, &b, &c, &d) < 0.0 {
                        tet.swap(0, 1);
                    }
                    tets.push(tet);
                }
            }
        }
        let t = TetMesh { points, tets };
        let m = VoronoiExtractor::new(&t).create_mesh().unwrap();
        assert_eq!(m.n_cells(), 1);
        // One face per edge from the centre, one point per tetrahedron
        assert_eq!(m.n_faces(), 6);
        assert_eq!(m.n_points(), 8);
        assert!(m.faces().iter().all(|f| f.len() == 4));
        let (c, vols) = cell_centres_and_volumes(&m);
        assert!(vols[0] > 0.0);
        approx::assert_relative_eq!(c[0], Point::zeros(), epsilon = 1e-12);
    }
}
