//! Projection of a template's boundary onto the input surface
use crate::{
    geom::{self, Point},
    mesh::{PolyMesh, SurfaceEngine},
    octree::Octree,
};
use log::{debug, info};
use rayon::prelude::*;

/// Moves boundary points of a mesh onto the surface of an octree
///
/// Points lying only on `empty` patches (the sides of a 2D mesh) are never
/// moved; points shared between an `empty` patch and the walls keep their
/// `z` coordinate.
pub struct SurfaceMapper<'a> {
    mesh: &'a mut PolyMesh,
    octree: &'a Octree,
    engine: SurfaceEngine,
    /// Surface patch of each mesh patch, if one has the same name
    surface_patch: Vec<Option<usize>>,
    empty: Vec<bool>,
}

impl<'a> SurfaceMapper<'a> {
    /// Builds a mapper for the boundary of a mesh
    pub fn new(mesh: &'a mut PolyMesh, octree: &'a Octree) -> Self {
        let engine = SurfaceEngine::new(mesh);
        let surface = octree.surface();
        let surface_patch = mesh
            .patches()
            .iter()
            .map(|p| surface.patch_index(&p.name))
            .collect();
        let empty = mesh.patches().iter().map(|p| p.kind == "empty").collect();
        Self {
            mesh,
            octree,
            engine,
            surface_patch,
            empty,
        }
    }

    /// Returns the non-empty mesh patches around a boundary point
    fn wall_patches(&self, bp: usize) -> Vec<usize> {
        self.engine
            .point_patches(bp)
            .into_iter()
            .filter(|p| !self.empty[*p])
            .collect()
    }

    /// Checks whether a boundary point touches an `empty` patch
    fn on_empty(&self, bp: usize) -> bool {
        self.engine.point_patches(bp).iter().any(|p| self.empty[*p])
    }

    /// Returns the surface patches matching a point's mesh patches
    ///
    /// Returns `None` unless every wall patch around the point has a
    /// surface counterpart.
    fn surface_patches(&self, bp: usize) -> Option<Vec<usize>> {
        self.wall_patches(bp)
            .into_iter()
            .map(|p| self.surface_patch[p])
            .collect()
    }

    fn nearest(&self, p: &Point, patches: Option<&[usize]>) -> Option<Point> {
        let n = match patches {
            Some(patches) if !patches.is_empty() => {
                self.octree.find_nearest_surface_point_in_patches(p, patches)
            }
            _ => self.octree.find_nearest_surface_point(p),
        }?;
        Some(n.point)
    }

    fn apply(&mut self, moves: Vec<(usize, Point)>) -> usize {
        let n = moves.len();
        let points = self.mesh.points_mut();
        for (p, q) in moves {
            points[p] = q;
        }
        n
    }

    /// Pulls boundary points towards the surface before projection
    ///
    /// Each pass moves a point half way towards the average of the
    /// projections of its surrounding face centres, which spreads points
    /// evenly before they are snapped onto the surface.
    pub fn pre_map_vertices(&mut self, n_iterations: usize) {
        for iter in 0..n_iterations {
            let points = self.mesh.points();
            let centres: Vec<Option<Point>> = self
                .engine
                .face_geometry(points)
                .par_iter()
                .map(|(_, c)| self.nearest(c, None))
                .collect();
            let moves: Vec<(usize, Point)> = (0..self.engine.boundary_points().len())
                .into_par_iter()
                .filter(|bp| !self.wall_patches(*bp).is_empty())
                .filter_map(|bp| {
                    let faces = self.engine.point_faces().row(bp);
                    let targets: Vec<Point> =
                        faces.iter().filter_map(|f| centres[*f]).collect();
                    if targets.is_empty() {
                        return None;
                    }
                    let p = self.engine.boundary_points()[bp];
                    let avg = targets.iter().sum::<Point>() / targets.len() as f64;
                    let mut q = (points[p] + avg) / 2.0;
                    if self.on_empty(bp) {
                        q.z = points[p].z;
                    }
                    Some((p, q))
                })
                .collect();
            let n = self.apply(moves);
            debug!("pre-mapping pass {iter}: moved {n} points");
        }
    }

    /// Projects every boundary point onto the surface
    ///
    /// Points are projected onto the surface patches of the same names as
    /// their mesh patches when those exist, and onto the whole surface
    /// otherwise.  Returns the number of moved points.
    pub fn map_vertices(&mut self) -> usize {
        let points = self.mesh.points();
        let moves: Vec<(usize, Point)> = (0..self.engine.boundary_points().len())
            .into_par_iter()
            .filter(|bp| !self.wall_patches(*bp).is_empty())
            .filter_map(|bp| {
                let p = self.engine.boundary_points()[bp];
                let patches = self.surface_patches(bp);
                let mut q = self.nearest(&points[p], patches.as_deref())?;
                if self.on_empty(bp) {
                    q.z = points[p].z;
                }
                Some((p, q))
            })
            .collect();
        let n = self.apply(moves);
        info!("mapped {n} boundary points onto the surface");
        n
    }

    /// Snaps points between patches onto surface corners and feature edges
    ///
    /// A point surrounded by three or more surface patches goes to the
    /// nearest surface corner shared by those patches; a point between two
    /// patches goes to the nearest feature edge separating them.  Returns
    /// the number of moved corner and edge points.
    pub fn map_corners_and_edges(&mut self) -> (usize, usize) {
        let surf = self.octree.surface();
        let facets = surf.facets();
        let edge_patches = |e: usize| -> Vec<usize> {
            let mut out: Vec<usize> = surf
                .edge_facets()
                .row(e)
                .iter()
                .map(|f| facets[*f].patch)
                .collect();
            out.sort_unstable();
            out.dedup();
            out
        };
        let corner_patches: Vec<(usize, Vec<usize>)> = (0..surf.points().len())
            .filter(|p| surf.is_corner(*p))
            .map(|p| {
                let mut out: Vec<usize> = surf
                    .point_facets()
                    .row(p)
                    .iter()
                    .map(|f| facets[*f].patch)
                    .collect();
                out.sort_unstable();
                out.dedup();
                (p, out)
            })
            .collect();

        let points = self.mesh.points();
        let candidates: Vec<(usize, Vec<usize>)> = (0..self.engine.boundary_points().len())
            .filter_map(|bp| {
                let mut patches = self.surface_patches(bp)?;
                patches.sort_unstable();
                patches.dedup();
                (patches.len() >= 2).then_some((bp, patches))
            })
            .collect();

        let mut corners = vec![];
        let mut edges = vec![];
        for (bp, patches) in candidates {
            let p = self.engine.boundary_points()[bp];
            let mut q = if patches.len() >= 3 {
                let best = corner_patches
                    .iter()
                    .filter(|(_, cp)| patches.iter().all(|x| cp.contains(x)))
                    .map(|(c, _)| surf.points()[*c])
                    .min_by(|a, b| {
                        (a - points[p])
                            .norm_squared()
                            .total_cmp(&(b - points[p]).norm_squared())
                    });
                match best {
                    Some(c) => c,
                    None => continue,
                }
            } else {
                let accept = |e: usize| edge_patches(e) == patches;
                match self.octree.find_nearest_edge_point(&points[p], accept) {
                    Some((q, _, _)) => q,
                    None => continue,
                }
            };
            if self.on_empty(bp) {
                q.z = points[p].z;
            }
            if patches.len() >= 3 {
                corners.push((p, q));
            } else {
                edges.push((p, q));
            }
        }
        let n_corners = self.apply(corners);
        let n_edges = self.apply(edges);
        info!("mapped {n_corners} corner and {n_edges} edge points onto features");
        (n_corners, n_edges)
    }

    /// Returns the largest distance between a boundary face centre and the
    /// surface
    pub fn max_face_distance(&self) -> f64 {
        self.engine
            .face_geometry(self.mesh.points())
            .iter()
            .zip(self.engine.face_patches())
            .filter(|(_, p)| !self.empty[**p])
            .filter_map(|((_, c), _)| self.octree.find_nearest_surface_point(c))
            .map(|n| n.distance_squared.sqrt())
            .fold(0.0, f64::max)
    }
}

/// Checks whether a boundary face keeps its orientation after mapping
///
/// Returns the boundary faces (as mesh labels) whose normal now points
/// against the normal of the surface below their centre.
pub fn find_flipped_faces(mesh: &PolyMesh, octree: &Octree) -> Vec<usize> {
    let surf = octree.surface();
    mesh.boundary_faces()
        .filter(|f| {
            let pts: Vec<Point> = mesh.faces()[*f].iter().map(|p| mesh.points()[*p]).collect();
            let (n, c) = geom::polygon_normal_and_centre(&pts);
            octree
                .find_nearest_surface_point(&c)
                .is_some_and(|near| n.dot(&surf.facet_normal(near.facet)) < 0.0)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::extract::{test::classified_sphere, CartesianExtractor};
    use crate::geom::BoundBox;
    use crate::mesh::test::hex_block;
    use crate::octree::OctreeAddressing;
    use crate::surface::box_surface;
    use crate::topology::EdgeExtractor;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    #[test]
    fn sphere_projection() {
        let o = classified_sphere(3);
        let a = OctreeAddressing::new(&o, true);
        let mut m = CartesianExtractor::new(&a).create_mesh().unwrap();
        let mut mapper = SurfaceMapper::new(&mut m, &o);
        let before = mapper.max_face_distance();
        mapper.pre_map_vertices(2);
        mapper.map_vertices();
        let after = mapper.max_face_distance();
        assert!(after < before);

        let s = SurfaceEngine::new(&m);
        for p in s.boundary_points() {
            let n = o.find_nearest_surface_point(&m.points()[*p]).unwrap();
            assert!(n.distance_squared < 1e-20);
        }
    }

    #[test]
    fn corners_and_edges() {
        // A block slightly larger than the box surface
        let s = box_surface(&BoundBox::new(Point::zeros(), Point::repeat(2.0)));
        let bb = BoundBox::new(Point::repeat(-0.5), Point::repeat(2.5));
        let o = Octree::new(Arc::new(s), bb, false);
        let mut m = hex_block(2);
        for p in m.points_mut() {
            *p = (*p - Point::repeat(1.0)) * 1.1 + Point::repeat(1.0);
        }
        EdgeExtractor::new(&mut m, &o).extract_edges().unwrap();
        let mut mapper = SurfaceMapper::new(&mut m, &o);
        mapper.map_vertices();
        let (corners, edges) = mapper.map_corners_and_edges();
        assert_eq!(corners, 8);
        assert_eq!(edges, 12);
        for (p, q) in m.points().iter().zip(hex_block(2).points()) {
            assert_relative_eq!(p, q, epsilon = 1e-12);
        }
    }
}
