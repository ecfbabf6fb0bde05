//! Tetrahedral template built from octree nodes, face centres and leaf
//! centres
use super::DEFAULT_PATCH;
use crate::{
    geom::{self, Point},
    mesh::{tet_faces, MeshBuilder, PolyMesh},
    octree::OctreeAddressing,
    Error,
};
use log::info;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};

/// A plain tetrahedral mesh
///
/// Every tetrahedron is positively oriented, i.e. its four points give a
/// positive [`geom::tet_volume`].
#[derive(Clone, Debug, Default)]
pub struct TetMesh {
    /// Point positions
    pub points: Vec<Point>,
    /// Tetrahedra as point labels
    pub tets: Vec<[usize; 4]>,
}

impl TetMesh {
    /// Returns the faces used by only one tetrahedron, oriented outwards
    pub fn boundary_triangles(&self) -> Vec<[usize; 3]> {
        let mut count: HashMap<[usize; 3], (usize, [usize; 3])> = HashMap::new();
        for t in &self.tets {
            for f in tet_faces(*t) {
                let tri = [f[0], f[1], f[2]];
                let mut key = tri;
                key.sort_unstable();
                count.entry(key).or_insert((0, tri)).0 += 1;
            }
        }
        let mut out: Vec<[usize; 3]> = count
            .into_values()
            .filter(|(n, _)| *n == 1)
            .map(|(_, tri)| tri)
            .collect();
        out.sort_unstable();
        out
    }

    /// Flags the points lying on the boundary
    pub fn boundary_points(&self) -> Vec<bool> {
        let mut out = vec![false; self.points.len()];
        for tri in self.boundary_triangles() {
            for p in tri {
                out[p] = true;
            }
        }
        out
    }

    /// Returns every edge with the tetrahedra around it, ordered by edge
    pub fn edge_tets(&self) -> BTreeMap<[usize; 2], Vec<usize>> {
        let mut out: BTreeMap<[usize; 2], Vec<usize>> = BTreeMap::new();
        for (i, t) in self.tets.iter().enumerate() {
            for a in 0..4 {
                for b in a + 1..4 {
                    let key = if t[a] < t[b] { [t[a], t[b]] } else { [t[b], t[a]] };
                    out.entry(key).or_default().push(i);
                }
            }
        }
        out
    }

    /// Returns the signed volume of a tetrahedron
    pub fn tet_volume(&self, t: usize) -> f64 {
        let [a, b, c, d] = self.tets[t].map(|p| self.points[p]);
        geom::tet_volume(&a, &b, &c, &d)
    }

    /// Converts into a polyhedral mesh with every boundary face in the
    /// default patch
    pub fn to_poly_mesh(&self) -> Result<PolyMesh, Error> {
        let mut b = MeshBuilder::with_points(self.points.clone());
        for t in &self.tets {
            b.add_cell(tet_faces(*t))?;
        }
        b.build(DEFAULT_PATCH)
    }
}

/// Splits every mesh-cell leaf into tetrahedra
///
/// Each leaf gets a point at its centre and each of its faces a point at the
/// face centre.  Every edge of every face polygon (hanging nodes included)
/// then spans one tetrahedron with the two centres.  Faces shared with finer
/// leaves are the finer leaves' faces, so both sides of a refinement
/// transition are split the same way and the result is conforming.
pub struct TetExtractor<'a> {
    addressing: &'a OctreeAddressing<'a>,
}

impl<'a> TetExtractor<'a> {
    /// Builds an extractor over a classified octree's addressing
    pub fn new(addressing: &'a OctreeAddressing<'a>) -> Self {
        Self { addressing }
    }

    /// Creates the tetrahedra
    pub fn create_tet_mesh(&self) -> Result<TetMesh, Error> {
        let a = self.addressing;
        let o = a.octree();
        if o.is_quadtree() {
            return Err(Error::BadConfig(
                "tet",
                "tetrahedral templates need a 3D octree".to_owned(),
            ));
        }
        let cells: Vec<usize> = (0..o.n_leaves())
            .filter(|l| a.is_mesh_cell(*l) && o.is_owned(*l))
            .collect();
        if cells.is_empty() {
            return Err(Error::EmptyMesh);
        }

        let mut points = vec![];
        let mut node_point = vec![usize::MAX; a.n_nodes()];
        let mut face_point = vec![usize::MAX; a.octree_faces().len()];
        for l in &cells {
            for &f in a.leaf_faces().row(*l) {
                for n in a.face_polygon(f) {
                    if node_point[n] == usize::MAX {
                        node_point[n] = points.len();
                        points.push(a.node_position(n));
                    }
                }
            }
        }
        for l in &cells {
            for &f in a.leaf_faces().row(*l) {
                if face_point[f] == usize::MAX {
                    let c = a.octree_faces()[f]
                        .nodes
                        .iter()
                        .map(|n| a.node_position(*n))
                        .sum::<Point>()
                        / 4.0;
                    face_point[f] = points.len();
                    points.push(c);
                }
            }
        }
        let first_centre = points.len();
        points.extend(cells.iter().map(|l| o.leaf_centre(*l)));

        let tets: Vec<[usize; 4]> = cells
            .par_iter()
            .enumerate()
            .flat_map_iter(|(i, l)| {
                let cc = first_centre + i;
                let mut out = vec![];
                for &f in a.leaf_faces().row(*l) {
                    let mut polygon = a.face_polygon(f);
                    if a.octree_faces()[f].owner != *l {
                        polygon.reverse();
                    }
                    let fc = face_point[f];
                    let n = polygon.len();
                    for j in 0..n {
                        let (p, q) = (node_point[polygon[j]], node_point[polygon[(j + 1) % n]]);
                        out.push([p, fc, q, cc]);
                    }
                }
                out
            })
            .collect();
        info!(
            "tetrahedral template: {} tetrahedra from {} leaves",
            tets.len(),
            cells.len()
        );
        Ok(TetMesh { points, tets })
    }

    /// Creates the tetrahedra as a polyhedral mesh
    pub fn create_mesh(&self) -> Result<PolyMesh, Error> {
        self.create_tet_mesh()?.to_poly_mesh()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::extract::test::classified_sphere;
    use crate::mesh::quality::cell_centres_and_volumes;
    use crate::octree::{test::sphere_octree, CubeType, OctreeModifier};
    use approx::assert_relative_eq;

    #[test]
    fn uniform_split() {
        let o = classified_sphere(3);
        let a = OctreeAddressing::new(&o, false);
        let t = TetExtractor::new(&a).create_tet_mesh().unwrap();
        assert_eq!(t.tets.len(), 24 * a.n_mesh_cells());
        for i in 0..t.tets.len() {
            assert!(t.tet_volume(i) > 0.0, "tet {i} is inverted");
        }
        let m = t.to_poly_mesh().unwrap();
        assert_eq!(m.n_cells(), t.tets.len());
        let (_, vols) = cell_centres_and_volumes(&m);
        assert_relative_eq!(
            vols.iter().sum::<f64>(),
            a.n_mesh_cells() as f64 * 0.125,
            epsilon = 1e-9
        );
        assert_eq!(m.boundary_faces().len(), t.boundary_triangles().len());
    }

    #[test]
    fn refinement_transition_is_conforming() {
        let mut o = sphere_octree(1);
        let mut refine = vec![false; o.n_leaves()];
        refine[7] = true;
        let mut m = OctreeModifier::new(&mut o);
        m.refine_selected_boxes(&mut refine, false);
        for l in 0..m.octree().n_leaves() {
            m.set_leaf_type(l, CubeType::Inside);
        }
        let a = OctreeAddressing::new(&o, true);
        let t = TetExtractor::new(&a).create_tet_mesh().unwrap();
        // The builder rejects any face used inconsistently
        let m = t.to_poly_mesh().unwrap();
        let (_, vols) = cell_centres_and_volumes(&m);
        assert_relative_eq!(vols.iter().sum::<f64>(), 64.0, epsilon = 1e-9);
        assert!(vols.iter().all(|v| *v > 0.0));

        // Only the outer shell of the root box is boundary
        let boundary = t.boundary_points();
        for (p, b) in t.points.iter().zip(&boundary) {
            let on_box = p.iter().any(|v| (v.abs() - 2.0).abs() < 1e-12);
            assert_eq!(*b, on_box);
        }
    }

    #[test]
    fn quadtree_is_rejected() {
        let square = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let s = std::sync::Arc::new(crate::surface::extruded_polygon(&square, 0.0, 1.0));
        let bb = crate::geom::BoundBox::new(Point::zeros(), Point::repeat(1.0));
        let o = crate::octree::Octree::new(s, bb, true);
        let a = OctreeAddressing::new(&o, true);
        assert!(matches!(
            TetExtractor::new(&a).create_tet_mesh(),
            Err(Error::BadConfig(..))
        ));
    }
}
