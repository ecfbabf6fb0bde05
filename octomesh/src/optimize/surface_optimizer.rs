//! Smoothing of boundary points on the input surface
use super::{PartTriMesh, TriSimplex};
use crate::{
    geom::{Matrix2D, Point},
    mesh::{PolyMesh, SurfaceEngine},
    octree::Octree,
};
use log::{debug, info};
use rayon::prelude::*;

/// Role of a boundary point during surface smoothing
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum PointKind {
    /// Inside a single patch
    Surface,
    /// On a feature edge between two patches
    Edge,
    /// Where three or more patches meet; never moved
    Corner,
    /// Only on `empty` patches; never moved
    Empty,
}

/// Smooths boundary points while keeping them on the surface
///
/// Points inside a patch are moved in their tangent plane to the average of
/// their neighbours (or, if that would fold a face, untangled with a 2D
/// Knupp metric) and projected back onto the patch.  Points on feature
/// edges are moved along the edge.  Corners never move.
pub struct MeshSurfaceOptimizer<'a> {
    mesh: &'a mut PolyMesh,
    octree: &'a Octree,
    engine: SurfaceEngine,
    part: PartTriMesh,
    /// Surface patches around each boundary point, sorted
    patches: Vec<Option<Vec<usize>>>,
    kind: Vec<PointKind>,
    on_empty: Vec<bool>,
    locked: Vec<bool>,
}

impl<'a> MeshSurfaceOptimizer<'a> {
    /// Classifies the boundary points of a mesh
    pub fn new(mesh: &'a mut PolyMesh, octree: &'a Octree) -> Self {
        let engine = SurfaceEngine::new(mesh);
        let part = PartTriMesh::new(&engine);
        let surface = octree.surface();
        let empty: Vec<bool> = mesh.patches().iter().map(|p| p.kind == "empty").collect();
        let surface_patch: Vec<Option<usize>> = mesh
            .patches()
            .iter()
            .map(|p| surface.patch_index(&p.name))
            .collect();

        let n = engine.boundary_points().len();
        let mut patches = Vec::with_capacity(n);
        let mut kind = Vec::with_capacity(n);
        let mut on_empty = Vec::with_capacity(n);
        for bp in 0..n {
            let all = engine.point_patches(bp);
            let walls: Vec<usize> = all.iter().copied().filter(|p| !empty[*p]).collect();
            on_empty.push(walls.len() < all.len());
            kind.push(match walls.len() {
                0 => PointKind::Empty,
                1 => PointKind::Surface,
                2 => PointKind::Edge,
                _ => PointKind::Corner,
            });
            let mapped: Option<Vec<usize>> = walls.iter().map(|p| surface_patch[*p]).collect();
            patches.push(mapped.map(|mut v| {
                v.sort_unstable();
                v.dedup();
                v
            }));
        }
        let locked = vec![false; mesh.n_points()];
        Self {
            mesh,
            octree,
            engine,
            part,
            patches,
            kind,
            on_empty,
            locked,
        }
    }

    /// Locks mesh points
    pub fn lock_points<I: IntoIterator<Item = usize>>(&mut self, points: I) {
        for p in points {
            self.locked[p] = true;
        }
    }

    /// Runs the given number of smoothing passes, returning the number of
    /// moves
    pub fn optimize_surface(&mut self, n_iterations: usize) -> usize {
        let mut total = 0;
        for i in 0..n_iterations {
            let edges = self.smooth_kind(PointKind::Edge);
            let surface = self.smooth_kind(PointKind::Surface);
            debug!("surface pass {i}: moved {edges} edge and {surface} surface points");
            total += edges + surface;
            if edges + surface == 0 {
                break;
            }
        }
        info!("surface smoothing moved points {total} times");
        total
    }

    fn smooth_kind(&mut self, kind: PointKind) -> usize {
        let active: Vec<usize> = (0..self.kind.len())
            .filter(|bp| {
                self.kind[*bp] == kind && !self.locked[self.engine.boundary_points()[*bp]]
            })
            .collect();
        let mut n = 0;
        for group in self.part.colour(&self.engine, &active) {
            let points = self.mesh.points();
            let normals = self.engine.point_normals(points);
            let moves: Vec<(usize, Point)> = group
                .par_iter()
                .filter_map(|bp| {
                    let target = match kind {
                        PointKind::Edge => self.edge_target(*bp, points)?,
                        _ => self.surface_target(*bp, points, &normals[*bp])?,
                    };
                    let p = self.engine.boundary_points()[*bp];
                    let (s, frame) = self.part.simplex(*bp, &points[p], &normals[*bp], points);
                    let valid = s.areas_at(frame.to_local(&target)).iter().all(|a| *a > 0.0);
                    let moved = (target - points[p]).norm() > 1e-12 * s_length(&s);
                    (valid && moved).then_some((p, target))
                })
                .collect();
            n += moves.len();
            let points = self.mesh.points_mut();
            for (p, q) in moves {
                points[p] = q;
            }
        }
        n
    }

    /// Keeps `z` for points on the sides of a 2D mesh
    fn constrain(&self, bp: usize, old: &Point, mut q: Point) -> Point {
        if self.on_empty[bp] {
            q.z = old.z;
        }
        q
    }

    /// Average of the feature edge neighbours, projected onto the surface
    /// feature edge between the point's patches
    fn edge_target(&self, bp: usize, points: &[Point]) -> Option<Point> {
        let p = self.engine.boundary_points()[bp];
        let neighbours: Vec<usize> = self
            .engine
            .point_points()
            .row(bp)
            .iter()
            .copied()
            .filter(|q| {
                matches!(self.kind[*q], PointKind::Edge | PointKind::Corner)
                    && self.is_feature_edge(bp, *q)
            })
            .collect();
        if neighbours.is_empty() {
            return None;
        }
        let avg = neighbours
            .iter()
            .map(|q| points[self.engine.boundary_points()[*q]])
            .sum::<Point>()
            / neighbours.len() as f64;
        let patches = self.patches[bp].as_ref()?;
        let surf = self.octree.surface();
        let accept = |e: usize| {
            let mut ps: Vec<usize> = surf
                .edge_facets()
                .row(e)
                .iter()
                .map(|f| surf.facets()[*f].patch)
                .collect();
            ps.sort_unstable();
            ps.dedup();
            &ps == patches
        };
        let (q, _, _) = self.octree.find_nearest_edge_point(&avg, accept)?;
        Some(self.constrain(bp, &points[p], q))
    }

    /// Checks whether the boundary edge between two boundary points
    /// separates two patches
    fn is_feature_edge(&self, a: usize, b: usize) -> bool {
        let pb = self.engine.boundary_points()[b];
        let mut patches: Vec<usize> = self
            .engine
            .point_faces()
            .row(a)
            .iter()
            .filter(|f| self.engine.boundary_faces()[**f].contains(&pb))
            .map(|f| self.engine.face_patches()[*f])
            .collect();
        patches.sort_unstable();
        patches.dedup();
        patches.len() > 1
    }

    /// Laplacian (or untangled) position in the tangent plane, projected
    /// back onto the point's patch
    fn surface_target(&self, bp: usize, points: &[Point], normal: &Point) -> Option<Point> {
        let p = self.engine.boundary_points()[bp];
        let row = self.engine.point_points().row(bp);
        if row.is_empty() {
            return None;
        }
        let (s, frame) = self.part.simplex(bp, &points[p], normal, points);
        let avg = row
            .iter()
            .map(|q| points[self.engine.boundary_points()[*q]])
            .sum::<Point>()
            / row.len() as f64;
        let mut x = frame.to_local(&avg);
        if !s.areas_at(x).iter().all(|a| *a > 0.0) {
            x = knupp_2d(&s)?;
        }
        let q = frame.to_global(x);
        let q = match self.patches[bp].as_deref() {
            Some(patches) => self.octree.find_nearest_surface_point_in_patches(&q, patches),
            None => self.octree.find_nearest_surface_point(&q),
        }?
        .point;
        Some(self.constrain(bp, &points[p], q))
    }
}

/// Typical edge length of a triangle ring
fn s_length(s: &TriSimplex) -> f64 {
    let f = s.free();
    let n = f.max(1) as f64;
    s.points[..f]
        .iter()
        .map(|p| (p[0] * p[0] + p[1] * p[1]).sqrt())
        .sum::<f64>()
        / n
}

/// Minimises the 2D Knupp untangling metric over the free vertex
///
/// Returns the new position if every triangle ends up counter-clockwise.
pub(crate) fn knupp_2d(s: &TriSimplex) -> Option<[f64; 2]> {
    let grads = s.area_gradients();
    let f = s.free();
    let x0 = s.points[f];
    let areas = s.areas_at(x0);
    let n = areas.len().max(1) as f64;
    let mean = (areas.iter().map(|a| a.abs()).sum::<f64>() / n).max(1e-12 * s_length(s).powi(2));
    let (beta, eps) = (0.05 * mean, 0.1 * mean);
    let metric = |x: [f64; 2]| -> f64 {
        s.areas_at(x)
            .iter()
            .map(|a| {
                let y = a - beta;
                (y * y + eps * eps).sqrt() - y
            })
            .sum()
    };

    let mut x = x0;
    let mut fx = metric(x);
    for _ in 0..50 {
        let mut g = [0.0; 2];
        let mut h = [[0.0; 2]; 2];
        for (a, d) in s.areas_at(x).iter().zip(&grads) {
            let y = a - beta;
            let r = (y * y + eps * eps).sqrt();
            let w = y / r - 1.0;
            let k = eps * eps / (r * r * r);
            for i in 0..2 {
                g[i] += d[i] * w;
                for j in 0..2 {
                    h[i][j] += d[i] * d[j] * k;
                }
            }
        }
        let dir = match Matrix2D(h).solve([-g[0], -g[1]]) {
            Ok(d) => d,
            Err(_) => [-g[0], -g[1]],
        };
        let mut t = 1.0;
        let mut accepted = None;
        for _ in 0..30 {
            let y = [x[0] + t * dir[0], x[1] + t * dir[1]];
            let fy = metric(y);
            if fy < fx {
                accepted = Some((y, fy));
                break;
            }
            t *= 0.5;
        }
        let Some((y, fy)) = accepted else {
            break;
        };
        let gain = fx - fy;
        x = y;
        fx = fy;
        if gain <= 1e-9 * fx.abs().max(f64::MIN_POSITIVE) {
            break;
        }
    }
    s.areas_at(x).iter().all(|a| *a > 0.0).then_some(x)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geom::BoundBox;
    use crate::mesh::test::hex_block;
    use crate::surface::box_surface;
    use crate::topology::EdgeExtractor;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    #[test]
    fn folded_ring() {
        let s = TriSimplex {
            points: vec![[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0], [0.0, -1.0], [1.4, 0.2]],
            triangles: vec![[0, 1, 4], [1, 2, 4], [2, 3, 4], [3, 0, 4]],
        };
        assert!(s.areas_at(s.points[4]).iter().any(|a| *a < 0.0));
        let x = knupp_2d(&s).unwrap();
        assert!(x[0].abs() < 1.0 && x[1].abs() < 1.0);
    }

    #[test]
    fn box_smoothing() {
        let s = box_surface(&BoundBox::new(Point::zeros(), Point::repeat(2.0)));
        let bb = BoundBox::new(Point::repeat(-0.5), Point::repeat(2.5));
        let o = Octree::new(Arc::new(s), bb, false);
        let mut m = hex_block(2);
        EdgeExtractor::new(&mut m, &o).extract_edges().unwrap();

        // Centre of the x = 0 side, and the middle of the edge y = z = 0
        m.points_mut()[12] = Point::new(0.0, 1.4, 0.7);
        m.points_mut()[1] = Point::new(1.3, 0.0, 0.0);
        let mut opt = MeshSurfaceOptimizer::new(&mut m, &o);
        assert!(opt.optimize_surface(3) >= 2);
        assert_relative_eq!(m.points()[12], Point::new(0.0, 1.0, 1.0), epsilon = 1e-9);
        assert_relative_eq!(m.points()[1], Point::new(1.0, 0.0, 0.0), epsilon = 1e-9);
        // Corners never move
        assert_eq!(m.points()[0], Point::zeros());
    }
}
