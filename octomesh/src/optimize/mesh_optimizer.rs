//! Volume mesh optimisation driver
use super::{MeshSurfaceOptimizer, PartTetMesh, SimplexSmoother};
use crate::{config::OptimisationSettings, geom::Point, mesh::PolyMesh, octree::Octree};
use log::{debug, info, warn};
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use std::collections::BTreeSet;

/// Name of the point subset holding vertices the optimiser could not fix
pub const BAD_POINTS_SUBSET: &str = "badPoints";

/// Relative tolerance passed to the simplex smoothers
const SMOOTHER_TOLERANCE: f64 = 1e-3;

/// Moves interior points to untangle the mesh and improve its quality
///
/// Boundary points are locked unless
/// [`optimize_surface`](Self::optimize_surface) is called; further points
/// can be locked explicitly.  Quality is measured on the tetrahedral
/// decomposition of the mesh ([`PartTetMesh`]).
pub struct MeshOptimizer<'a> {
    mesh: &'a mut PolyMesh,
    /// Points locked by the caller
    locked: Vec<bool>,
    boundary: Vec<bool>,
    settings: OptimisationSettings,
}

impl<'a> MeshOptimizer<'a> {
    /// Builds an optimiser with every boundary point locked
    pub fn new(mesh: &'a mut PolyMesh, settings: &OptimisationSettings) -> Self {
        let mut boundary = vec![false; mesh.n_points()];
        for f in mesh.boundary_faces() {
            for p in &mesh.faces()[f] {
                boundary[*p] = true;
            }
        }
        Self {
            locked: vec![false; mesh.n_points()],
            mesh,
            boundary,
            settings: settings.clone(),
        }
    }

    /// Returns the points the volume smoothers must not move
    fn fixed(&self) -> Vec<bool> {
        self.locked
            .iter()
            .zip(&self.boundary)
            .map(|(a, b)| *a || *b)
            .collect()
    }

    /// Locks the given points
    pub fn lock_points<I: IntoIterator<Item = usize>>(&mut self, points: I) {
        for p in points {
            self.locked[p] = true;
        }
    }

    /// Locks every point of the given cells
    pub fn lock_cells<I: IntoIterator<Item = usize>>(&mut self, cells: I) {
        for c in cells {
            for p in self.mesh.cell_points().row(c) {
                self.locked[*p] = true;
            }
        }
    }

    /// Locks the points of a named point subset, returning how many there
    /// were
    pub fn lock_point_subset(&mut self, name: &str) -> usize {
        let points: Vec<usize> = self
            .mesh
            .subsets()
            .points
            .get(name)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        let n = points.len();
        self.lock_points(points);
        n
    }

    /// Runs one smoother on the given points, colour by colour
    ///
    /// A move is kept only if `accept(old, new)` holds for the smallest
    /// tetrahedron quality around the point.  Returns the number of moved
    /// points.
    fn smooth(
        part: &mut PartTetMesh,
        points: &[usize],
        smoother: SimplexSmoother,
        accept: impl Fn(f64, f64) -> bool + Sync,
    ) -> usize {
        let mut n = 0;
        for group in part.colour(points) {
            let moves: Vec<(usize, Point)> = group
                .par_iter()
                .filter_map(|p| {
                    let mut s = part.simplex(*p);
                    let before = s.min_quality_at(&s.position());
                    if !smoother.optimize_node_position(&mut s, SMOOTHER_TOLERANCE) {
                        return None;
                    }
                    let after = s.min_quality_at(&s.position());
                    accept(before, after).then(|| (*p, s.position()))
                })
                .collect();
            n += moves.len();
            for (p, x) in moves {
                part.update_vertex(p, x);
            }
        }
        part.update_centres();
        n
    }

    /// Returns the free points sharing a tetrahedron with the given points
    fn grow(part: &PartTetMesh, points: &[usize]) -> Vec<usize> {
        let mut out: BTreeSet<usize> = points.iter().copied().collect();
        for p in points {
            for t in part.node_tets().row(*p) {
                out.extend(part.tet_points(*t).into_iter().filter(|q| !part.is_locked(*q)));
            }
        }
        out.into_iter().collect()
    }

    /// Untangles the mesh, returning the number of unresolved points
    ///
    /// Points of inverted tetrahedra are first moved by the
    /// [`MeshUntangler`](SimplexSmoother::MeshUntangler), then by the
    /// [`KnuppMetric`](SimplexSmoother::KnuppMetric) smoother.  When a pass
    /// fixes nothing, the region grows by one ring of neighbours.  Points
    /// still around inverted tetrahedra at the end are recorded in the
    /// [`BAD_POINTS_SUBSET`] (when constraints are enforced).
    pub fn untangle_mesh_fv(&mut self, n_iterations: usize) -> usize {
        let mut part = PartTetMesh::new(self.mesh, &self.fixed());
        let mut region: Vec<usize> = vec![];
        let mut n_inverted = usize::MAX;
        for i in 0..n_iterations {
            let bad = part.bad_points(0.0);
            if bad.is_empty() {
                break;
            }
            let inverted = part.qualities().iter().filter(|q| **q <= 0.0).count();
            if inverted >= n_inverted {
                region = Self::grow(&part, &region);
            }
            n_inverted = inverted;
            region.extend(bad);
            region.sort_unstable();
            region.dedup();
            debug!(
                "untangling pass {i}: {inverted} inverted tetrahedra, {} active points",
                region.len()
            );
            Self::smooth(&mut part, &region, SimplexSmoother::MeshUntangler, |a, b| b > a);
            Self::smooth(&mut part, &region, SimplexSmoother::KnuppMetric, |a, b| b > a);
        }
        part.copy_to_mesh(self.mesh);

        let q = part.qualities();
        let unresolved: BTreeSet<usize> = (0..q.len())
            .filter(|t| q[*t] <= 0.0)
            .flat_map(|t| part.tet_points(t))
            .collect();
        if unresolved.is_empty() {
            info!("mesh is untangled");
        } else {
            warn!("could not untangle the mesh around {} points", unresolved.len());
            if self.settings.enforce_geometry_constraints {
                self.mesh
                    .subsets_mut()
                    .points
                    .entry(BAD_POINTS_SUBSET.to_owned())
                    .or_default()
                    .extend(unresolved.iter().copied());
            }
        }
        unresolved.len()
    }

    /// Untangles the mesh and then improves tetrahedra below the minimum
    /// quality
    ///
    /// Moves are only kept if they do not lower the quality around the
    /// moved point.
    pub fn optimize_mesh_fv(&mut self) -> usize {
        let unresolved = self.untangle_mesh_fv(self.settings.n_iterations);
        let mut part = PartTetMesh::new(self.mesh, &self.fixed());
        for i in 0..self.settings.n_iterations {
            let bad = part.bad_points(self.settings.min_tet_quality);
            if bad.is_empty() {
                break;
            }
            let n = Self::smooth(&mut part, &bad, SimplexSmoother::VolumeOptimizer, |a, b| {
                b >= a
            });
            debug!("optimisation pass {i}: moved {n} of {} points", bad.len());
            if n == 0 {
                break;
            }
        }
        part.copy_to_mesh(self.mesh);
        info!("smallest tetrahedron quality is {:.4}", part.min_quality());
        unresolved
    }

    /// Greedy improvement of the worst quality in the mesh
    ///
    /// Each pass smooths the worst tenth of the free points (and every point
    /// below the minimum quality).  The loop stops when a pass improves the
    /// worst quality by less than the quality threshold; a pass which makes
    /// it worse is undone.  Returns the final worst quality.
    pub fn optimize_mesh_fv_best_quality(&mut self) -> f64 {
        let mut part = PartTetMesh::new(self.mesh, &self.fixed());
        let n = self.mesh.n_points();
        let mut best = part.min_quality();
        let mut saved = part.nodes()[..n].to_vec();
        for i in 0..self.settings.n_iterations {
            let q = part.node_qualities();
            let mut free = part.free_points();
            if free.is_empty() {
                break;
            }
            free.sort_by_key(|p| OrderedFloat(q[*p]));
            let worst = (free.len() / 10).max(1);
            let active: Vec<usize> = free
                .iter()
                .enumerate()
                .filter(|(j, p)| *j < worst || q[**p] < self.settings.min_tet_quality)
                .map(|(_, p)| *p)
                .collect();
            Self::smooth(&mut part, &active, SimplexSmoother::VolumeOptimizer, |a, b| {
                b >= a
            });
            let now = part.min_quality();
            debug!("best-quality pass {i}: worst quality {best:.4} -> {now:.4}");
            if now < best {
                for (p, x) in saved.iter().enumerate() {
                    part.update_vertex(p, *x);
                }
                part.update_centres();
                break;
            }
            let gain = now - best;
            best = now;
            saved.copy_from_slice(&part.nodes()[..n]);
            if gain < self.settings.quality_threshold {
                break;
            }
        }
        part.copy_to_mesh(self.mesh);
        info!("worst tetrahedron quality after optimisation is {best:.4}");
        best
    }

    /// Smooths the boundary points on the surface, keeping locked points
    /// in place
    pub fn optimize_surface(&mut self, octree: &Octree) {
        let n = self.settings.n_surface_iterations;
        let mut s = MeshSurfaceOptimizer::new(self.mesh, octree);
        s.lock_points(
            self.locked
                .iter()
                .enumerate()
                .filter(|(_, l)| **l)
                .map(|(p, _)| p),
        );
        s.optimize_surface(n);
    }
}
