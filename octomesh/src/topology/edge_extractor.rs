//! Patch assignment and feature-edge capture on a mapped template
use crate::{
    geom::{self, Point},
    mesh::{PolyMesh, SurfaceEngine},
    octree::Octree,
    Error,
};
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};

/// Assigns boundary faces to surface patches
///
/// Faces start in the patch of the nearest surface facet.  Assignments are
/// then revised so that patch borders run along surface feature edges: a
/// face changes patch when that lowers its deformation metric (distance of
/// its points from the patch, plus distance of its patch-border edges from
/// the nearest feature edge).  Surface corners get every one of their
/// patches at the nearest mesh point.
///
/// Faces in patches of type `empty` (the two sides of a 2D mesh) are never
/// reassigned; their patches are kept after the surface patches.
pub struct EdgeExtractor<'a> {
    mesh: &'a mut PolyMesh,
    octree: &'a Octree,
    engine: SurfaceEngine,
    patches: Vec<(String, String)>,
    /// Index into `patches` of every boundary face
    face_patch: Vec<usize>,
    fixed: Vec<bool>,
    edge_metric: HashMap<usize, f64>,
}

impl<'a> EdgeExtractor<'a> {
    /// Builds an extractor for a mesh whose boundary is mapped onto the
    /// octree's surface
    pub fn new(mesh: &'a mut PolyMesh, octree: &'a Octree) -> Self {
        let engine = SurfaceEngine::new(mesh);
        let surface = octree.surface();
        let mut patches: Vec<(String, String)> = surface
            .patches()
            .iter()
            .map(|p| (p.name.clone(), p.kind.clone()))
            .collect();
        let mut kept = BTreeMap::new();
        let mut fixed = vec![false; engine.boundary_faces().len()];
        let mut face_patch = vec![0; fixed.len()];
        for (bf, p) in engine.face_patches().iter().enumerate() {
            let patch = &mesh.patches()[*p];
            if patch.kind == "empty" {
                fixed[bf] = true;
                face_patch[bf] = *kept.entry(*p).or_insert_with(|| {
                    patches.push((patch.name.clone(), patch.kind.clone()));
                    patches.len() - 1
                });
            }
        }
        Self {
            mesh,
            octree,
            engine,
            patches,
            face_patch,
            fixed,
            edge_metric: HashMap::new(),
        }
    }

    fn face_points(&self, bf: usize) -> Vec<Point> {
        self.engine.boundary_faces()[bf]
            .iter()
            .map(|p| self.mesh.points()[*p])
            .collect()
    }

    /// Puts every free face into the patch of the nearest surface facet
    pub fn distribute_boundary_faces(&mut self) {
        let facets = self.octree.surface().facets();
        for bf in 0..self.face_patch.len() {
            if self.fixed[bf] {
                continue;
            }
            let (_, centre) = geom::polygon_normal_and_centre(&self.face_points(bf));
            if let Some(n) = self.octree.find_nearest_surface_point(&centre) {
                self.face_patch[bf] = facets[n.facet].patch;
            }
        }
    }

    /// Returns the patch of each boundary face
    pub fn face_patches(&self) -> &[usize] {
        &self.face_patch
    }

    /// Measures how far a face is from a surface patch
    ///
    /// The metric is the sum of squared distances from the face points to
    /// the patch, scaled by the face area.
    pub fn calculate_deformation_metric_for_face(&self, bf: usize, patch: usize) -> f64 {
        let pts = self.face_points(bf);
        let (n, _) = geom::polygon_normal_and_centre(&pts);
        let area = n.norm().max(f64::MIN_POSITIVE);
        pts.iter()
            .map(|p| {
                self.octree
                    .find_nearest_surface_point_in_patches(p, &[patch])
                    .map(|n| n.distance_squared)
                    .unwrap_or(area)
            })
            .sum::<f64>()
            / area
    }

    /// Measures how far a boundary edge is from the surface feature edges
    ///
    /// The ends and the midpoint of the edge are compared with the nearest
    /// feature edge; the squared distances are scaled by the squared edge
    /// length.  Without any feature edges every sample counts as one edge
    /// length away.
    pub fn calculate_deformation_metric_for_edge(&mut self, e: usize) -> f64 {
        if let Some(m) = self.edge_metric.get(&e) {
            return *m;
        }
        let [a, b] = self.engine.edges()[e];
        let (a, b) = (self.mesh.points()[a], self.mesh.points()[b]);
        let len2 = (b - a).norm_squared().max(f64::MIN_POSITIVE);
        let m = [a, b, (a + b) / 2.0]
            .iter()
            .map(|p| {
                self.octree
                    .find_nearest_edge_point(p, |_| true)
                    .map(|(_, d, _)| d)
                    .unwrap_or(len2)
            })
            .sum::<f64>()
            / len2;
        self.edge_metric.insert(e, m);
        m
    }

    /// Returns the faces sharing an edge with a face, with the shared edge
    fn edge_neighbours(&self, bf: usize) -> Vec<(usize, usize)> {
        let mut out = vec![];
        for &e in self.engine.face_edges().row(bf) {
            for &other in self.engine.edge_faces().row(e) {
                if other != bf {
                    out.push((e, other));
                }
            }
        }
        out
    }

    /// Moves faces which share no edge with a face of their own patch
    ///
    /// Such a face goes to the most common patch among its neighbours.
    /// Returns the number of changed faces.
    pub fn check_face_patches_topology(&mut self) -> usize {
        let mut changed = 0;
        for _ in 0..10 {
            let mut n = 0;
            for bf in 0..self.face_patch.len() {
                if self.fixed[bf] {
                    continue;
                }
                let mut count: BTreeMap<usize, usize> = BTreeMap::new();
                for (_, other) in self.edge_neighbours(bf) {
                    if !self.fixed[other] {
                        *count.entry(self.face_patch[other]).or_default() += 1;
                    }
                }
                if count.is_empty() || count.contains_key(&self.face_patch[bf]) {
                    continue;
                }
                let best = count
                    .iter()
                    .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
                    .map(|(p, _)| *p);
                if let Some(p) = best {
                    self.face_patch[bf] = p;
                    n += 1;
                }
            }
            changed += n;
            if n == 0 {
                break;
            }
        }
        if changed > 0 {
            debug!("moved {changed} isolated faces into a neighbouring patch");
        }
        changed
    }

    /// Total metric of a face if it were in `patch`
    fn face_cost(&mut self, bf: usize, patch: usize) -> f64 {
        let mut cost = self.calculate_deformation_metric_for_face(bf, patch);
        for (e, other) in self.edge_neighbours(bf) {
            if self.face_patch[other] != patch {
                cost += self.calculate_deformation_metric_for_edge(e);
            }
        }
        cost
    }

    /// Moves faces at patch borders into a neighbouring patch when that
    /// lowers their metric
    ///
    /// Returns the number of changed faces.
    pub fn check_face_patches_geometry(&mut self) -> usize {
        let mut changed = 0;
        for _ in 0..10 {
            let mut n = 0;
            for bf in 0..self.face_patch.len() {
                if self.fixed[bf] {
                    continue;
                }
                let own = self.face_patch[bf];
                let mut candidates: Vec<usize> = self
                    .edge_neighbours(bf)
                    .into_iter()
                    .filter(|(_, o)| !self.fixed[*o])
                    .map(|(_, o)| self.face_patch[o])
                    .filter(|p| *p != own)
                    .collect();
                if candidates.is_empty() {
                    continue;
                }
                candidates.sort_unstable();
                candidates.dedup();
                let mut best = (self.face_cost(bf, own), own);
                for c in candidates {
                    let cost = self.face_cost(bf, c);
                    if cost < best.0 * (1.0 - 1e-6) {
                        best = (cost, c);
                    }
                }
                if best.1 != own {
                    self.face_patch[bf] = best.1;
                    n += 1;
                }
            }
            changed += n;
            if n == 0 {
                break;
            }
        }
        if changed > 0 {
            debug!("moved {changed} faces to reduce the deformation metric");
        }
        changed
    }

    /// Makes sure every surface corner is represented in the mesh
    ///
    /// The mesh point nearest to a surface corner must be surrounded by
    /// faces of every patch meeting at the corner.  A missing patch is taken
    /// over by the face nearest to that patch among the faces whose current
    /// patch appears more than once around the point.  Returns the number of
    /// changed faces.
    pub fn check_corners(&mut self) -> usize {
        let corners = CornerEvaluator::new(self.octree, &self.engine)
            .corner_patches(self.mesh.points());
        let mut n = 0;
        for (bp, patches) in corners {
            n += self.assign_corner(bp, &patches);
        }
        n
    }

    fn assign_corner(&mut self, bp: usize, patches: &[usize]) -> usize {
        let faces = self.engine.point_faces().row(bp).to_vec();
        let mut n = 0;
        for patch in patches {
            if faces.iter().any(|f| self.face_patch[*f] == *patch) {
                continue;
            }
            let spare: Vec<usize> = faces
                .iter()
                .copied()
                .filter(|f| !self.fixed[*f])
                .filter(|f| {
                    faces
                        .iter()
                        .filter(|g| self.face_patch[**g] == self.face_patch[*f])
                        .count()
                        > 1
                })
                .collect();
            let best = spare
                .into_iter()
                .map(|f| (f, self.calculate_deformation_metric_for_face(f, *patch)))
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((f, _)) = best {
                self.face_patch[f] = *patch;
                n += 1;
            }
        }
        n
    }

    /// Writes the patch assignment back into the mesh
    pub fn update_mesh_patches(&mut self) -> Result<(), Error> {
        self.mesh.replace_boundary(&self.patches, &self.face_patch)
    }

    /// Runs the whole patch assignment and updates the mesh
    pub fn extract_edges(&mut self) -> Result<(), Error> {
        self.distribute_boundary_faces();
        let topo = self.check_face_patches_topology();
        let geo = self.check_face_patches_geometry();
        let topo2 = self.check_face_patches_topology();
        let corners = self.check_corners();
        info!(
            "patch assignment: {} faces changed by topology, {geo} by geometry, \
             {corners} at corners",
            topo + topo2
        );
        self.update_mesh_patches()
    }
}

/// Returns the mesh edges lying between two boundary patches
pub fn mesh_feature_edges(mesh: &PolyMesh) -> Vec<[usize; 2]> {
    let s = SurfaceEngine::new(mesh);
    s.edge_faces()
        .rows()
        .enumerate()
        .filter(|(_, faces)| {
            faces
                .iter()
                .any(|f| s.face_patches()[*f] != s.face_patches()[faces[0]])
        })
        .map(|(e, _)| s.edges()[e])
        .collect()
}

/// Finds where the surface corners land on a mesh boundary
pub struct CornerEvaluator<'a> {
    octree: &'a Octree,
    engine: &'a SurfaceEngine,
}

impl<'a> CornerEvaluator<'a> {
    /// Builds an evaluator over a boundary engine
    pub fn new(octree: &'a Octree, engine: &'a SurfaceEngine) -> Self {
        Self { octree, engine }
    }

    /// Returns, for each surface corner, the nearest boundary point (as a
    /// `bp` label) with the surface patches meeting at the corner
    pub fn corner_patches(&self, points: &[Point]) -> Vec<(usize, Vec<usize>)> {
        let surf = self.octree.surface();
        let mut out = vec![];
        if self.engine.boundary_points().is_empty() {
            return out;
        }
        for p in (0..surf.points().len()).filter(|p| surf.is_corner(*p)) {
            let target = surf.points()[p];
            let nearest = self
                .engine
                .boundary_points()
                .iter()
                .enumerate()
                .map(|(bp, q)| (bp, (points[*q] - target).norm_squared()))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(bp, _)| bp);
            let mut patches: Vec<usize> = surf
                .point_facets()
                .row(p)
                .iter()
                .map(|f| surf.facets()[*f].patch)
                .collect();
            patches.sort_unstable();
            patches.dedup();
            if let Some(bp) = nearest {
                out.push((bp, patches));
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geom::BoundBox;
    use crate::mesh::test::hex_block;
    use crate::surface::box_surface;
    use std::sync::Arc;

    fn box_octree() -> Octree {
        let s = box_surface(&BoundBox::new(Point::zeros(), Point::repeat(2.0)));
        let bb = BoundBox::new(Point::repeat(-0.5), Point::repeat(2.5));
        Octree::new(Arc::new(s), bb, false)
    }

    /// Finds the boundary face of the block with the given centre
    fn face_at(ex: &EdgeExtractor, centre: Point) -> usize {
        (0..ex.face_patch.len())
            .find(|bf| {
                let (_, c) = geom::polygon_normal_and_centre(&ex.face_points(*bf));
                (c - centre).norm() < 1e-9
            })
            .unwrap()
    }

    #[test]
    fn block_patches() {
        let o = box_octree();
        let mut m = hex_block(2);
        EdgeExtractor::new(&mut m, &o).extract_edges().unwrap();
        assert_eq!(m.patches().len(), 6);
        for (p, name) in m.patches().iter().zip(["xMin", "xMax", "yMin", "yMax", "zMin", "zMax"]) {
            assert_eq!(p.name, name);
            assert_eq!(p.size, 4);
        }
        assert_eq!(mesh_feature_edges(&m).len(), 24);
    }

    #[test]
    fn island_face() {
        let o = box_octree();
        let mut m = hex_block(2);
        let mut ex = EdgeExtractor::new(&mut m, &o);
        ex.distribute_boundary_faces();
        let x_min = o.surface().patch_index("xMin").unwrap();
        let z_min = o.surface().patch_index("zMin").unwrap();
        // A face in the middle of the top side cannot sit in xMin
        let f = face_at(&ex, Point::new(1.5, 1.5, 2.0));
        ex.face_patch[f] = x_min;
        assert_eq!(ex.check_face_patches_topology(), 1);
        assert_ne!(ex.face_patch[f], x_min);

        // Next to the xMin side it is no island, but it is far off
        let f = face_at(&ex, Point::new(0.5, 0.5, 0.0));
        ex.face_patch[f] = x_min;
        assert_eq!(ex.check_face_patches_topology(), 0);
        assert_eq!(ex.check_face_patches_geometry(), 1);
        assert_eq!(ex.face_patch[f], z_min);
    }

    #[test]
    fn corner() {
        let o = box_octree();
        let mut m = hex_block(2);
        let mut ex = EdgeExtractor::new(&mut m, &o);
        ex.distribute_boundary_faces();
        let x_min = o.surface().patch_index("xMin").unwrap();
        let z_min = o.surface().patch_index("zMin").unwrap();
        let f = face_at(&ex, Point::new(0.5, 0.5, 0.0));
        ex.face_patch[f] = x_min;
        assert_eq!(ex.check_corners(), 1);
        assert_eq!(ex.face_patch[f], z_min);
        assert_eq!(ex.check_corners(), 0);
    }

    #[test]
    fn metrics() {
        let o = box_octree();
        let mut m = hex_block(2);
        let mut ex = EdgeExtractor::new(&mut m, &o);
        let z_min = o.surface().patch_index("zMin").unwrap();
        let x_min = o.surface().patch_index("xMin").unwrap();
        let f = face_at(&ex, Point::new(0.5, 0.5, 0.0));
        assert!(ex.calculate_deformation_metric_for_face(f, z_min) < 1e-12);
        approx::assert_relative_eq!(
            ex.calculate_deformation_metric_for_face(f, x_min),
            2.0,
            epsilon = 1e-12
        );
        // An edge along the box edge is on a feature; one across a side
        // ends a full edge length away from it
        let on = ex.engine.edges().iter().position(|e| *e == [0, 1]).unwrap();
        let off = ex.engine.edges().iter().position(|e| *e == [1, 4]).unwrap();
        assert!(ex.calculate_deformation_metric_for_edge(on) < 1e-12);
        approx::assert_relative_eq!(
            ex.calculate_deformation_metric_for_edge(off),
            1.25,
            epsilon = 1e-12
        );
    }
}
