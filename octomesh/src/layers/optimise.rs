//! Smoothing of layer hairs
use super::{detect::LayerHairs, detect_boundary_layers, extrude::constrain_to_planes};
use crate::{
    config::BoundaryLayerSettings,
    geom::{polygon_normal_and_centre, Point},
    mesh::PolyMesh,
};
use log::{debug, info};
use std::collections::BTreeSet;

/// Number of passes for each hair smoothing stage
const N_PASSES: usize = 5;

/// Adjusts the directions and lengths of the hairs of an extruded layer
///
/// Only the top point of a hair ever moves.  A move is undone if it turns
/// any cell around the top point inside out.
pub struct BoundaryLayerOptimiser<'a> {
    mesh: &'a mut PolyMesh,
    hairs: LayerHairs,
}

impl<'a> BoundaryLayerOptimiser<'a> {
    /// Finds the layers of the mesh
    pub fn new(mesh: &'a mut PolyMesh) -> Self {
        let hairs = detect_boundary_layers(mesh);
        Self { mesh, hairs }
    }

    /// Returns the detected hairs
    pub fn hairs(&self) -> &LayerHairs {
        &self.hairs
    }

    fn hair_vector(&self, h: usize) -> Point {
        let [b, t] = self.hairs.hairs[h];
        self.mesh.points()[t] - self.mesh.points()[b]
    }

    /// Volume of a cell from the divergence theorem
    fn cell_volume(&self, c: usize) -> f64 {
        self.mesh
            .cell_faces_oriented(c)
            .iter()
            .map(|f| {
                let pts: Vec<Point> = f.iter().map(|p| self.mesh.points()[*p]).collect();
                let (a, x) = polygon_normal_and_centre(&pts);
                a.dot(&x)
            })
            .sum::<f64>()
            / 3.0
    }

    /// Moves the top of a hair, keeping the move only if the cells around it
    /// stay valid
    fn try_move(&mut self, h: usize, hair: Point) -> bool {
        let [b, t] = self.hairs.hairs[h];
        let cells: Vec<usize> = self.mesh.point_cells().row(t).to_vec();
        let old = self.mesh.points()[t];
        let x = self.mesh.points()[b] + hair;
        self.mesh.points_mut()[t] = x;
        if cells.iter().all(|c| self.cell_volume(*c) > 0.0) {
            true
        } else {
            self.mesh.points_mut()[t] = old;
            false
        }
    }

    /// Shortens hairs which are more than `max_ratio` times longer than a
    /// neighbouring hair, returning the number of moves
    pub fn optimise_thickness_variation(&mut self, max_ratio: f64, n_iterations: usize) -> usize {
        let mut total = 0;
        for i in 0..n_iterations {
            let lengths: Vec<f64> = (0..self.hairs.hairs.len())
                .map(|h| self.hair_vector(h).norm())
                .collect();
            let mut n = 0;
            for h in 0..lengths.len() {
                let limit = self
                    .hairs
                    .neighbours(h)
                    .iter()
                    .map(|q| lengths[*q] * max_ratio)
                    .fold(f64::INFINITY, f64::min);
                if lengths[h] > limit * (1.0 + 1e-9) {
                    let v = self.hair_vector(h) * (limit / lengths[h]);
                    n += usize::from(self.try_move(h, v));
                }
            }
            debug!("thickness pass {i}: shortened {n} hairs");
            total += n;
            if n == 0 {
                break;
            }
        }
        total
    }

    /// Blends the direction of each of the given hairs with the directions
    /// of its neighbours, keeping its length
    fn smooth_directions(
        &mut self,
        hairs: &[usize],
        neighbours: impl Fn(&LayerHairs, usize) -> Vec<usize>,
        constrain: impl Fn(&PolyMesh, &LayerHairs, usize, Point) -> Option<Point>,
        n_iterations: usize,
    ) -> usize {
        let mut total = 0;
        for _ in 0..n_iterations {
            let dirs: Vec<Point> = (0..self.hairs.hairs.len())
                .map(|h| self.hair_vector(h).normalize())
                .collect();
            let mut n = 0;
            for h in hairs {
                let near = neighbours(&self.hairs, *h);
                if near.is_empty() {
                    continue;
                }
                let sum: Point = near.iter().map(|q| dirs[*q]).sum::<Point>() + dirs[*h];
                let Some(d) = constrain(&*self.mesh, &self.hairs, *h, sum)
                    .and_then(|d| d.try_normalize(f64::MIN_POSITIVE))
                else {
                    continue;
                };
                if (d - dirs[*h]).norm() < 1e-9 {
                    continue;
                }
                let length = self.hair_vector(*h).norm();
                n += usize::from(self.try_move(*h, d * length));
            }
            total += n;
            if n == 0 {
                break;
            }
        }
        total
    }

    /// Smooths the directions of hairs away from the border of the layer
    pub fn optimise_hair_normals_inside(&mut self, n_iterations: usize) -> usize {
        let inside: Vec<usize> = (0..self.hairs.hairs.len())
            .filter(|h| !self.hairs.border[*h])
            .collect();
        self.smooth_directions(
            &inside,
            |hairs, h| hairs.neighbours(h),
            |_, _, _, d| Some(d),
            n_iterations,
        )
    }

    /// Smooths the directions of border hairs along the border, keeping them
    /// in the planes of the neighbouring boundary faces
    pub fn optimise_hair_normals_at_the_boundary(&mut self, n_iterations: usize) -> usize {
        let border: Vec<usize> = (0..self.hairs.hairs.len())
            .filter(|h| self.hairs.border[*h])
            .collect();
        self.smooth_directions(
            &border,
            |hairs, h| {
                hairs
                    .neighbours(h)
                    .into_iter()
                    .filter(|q| hairs.border[*q])
                    .collect()
            },
            |mesh, hairs, h, d| constrain_to_planes(&d, &border_normals(mesh, hairs, h)),
            n_iterations,
        )
    }

    /// Runs every hair smoothing stage, returning the number of moves
    pub fn optimise_layer(&mut self, settings: &BoundaryLayerSettings) -> usize {
        if self.hairs.is_empty() {
            return 0;
        }
        let n = self.optimise_hair_normals_at_the_boundary(N_PASSES)
            + self.optimise_hair_normals_inside(N_PASSES)
            + self.optimise_thickness_variation(settings.max_thickness_variation, N_PASSES);
        info!("smoothed {} hairs with {n} moves", self.hairs.hairs.len());
        n
    }
}

/// Normals of the boundary faces around the bottom of a hair which are not
/// layer bottoms
fn border_normals(mesh: &PolyMesh, hairs: &LayerHairs, h: usize) -> Vec<Point> {
    let bottoms: BTreeSet<usize> = hairs
        .hair_cells
        .row(h)
        .iter()
        .map(|c| hairs.cells[*c].face)
        .collect();
    let [b, _] = hairs.hairs[h];
    mesh.point_faces()
        .row(b)
        .iter()
        .filter(|f| !mesh.is_internal_face(**f) && !bottoms.contains(f))
        .map(|f| {
            let pts: Vec<Point> = mesh.faces()[*f].iter().map(|p| mesh.points()[*p]).collect();
            polygon_normal_and_centre(&pts).0
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::layers::extrude::test::bottom_layer_block;
    use approx::assert_relative_eq;

    fn hair_of(opt: &BoundaryLayerOptimiser, bottom: usize) -> usize {
        opt.hairs().hairs.iter().position(|[b, _]| *b == bottom).unwrap()
    }

    #[test]
    fn thickness_variation() {
        let mut m = bottom_layer_block();
        // Hair of the bottom centre point, lengthened to 0.9
        m.points_mut()[31] = Point::new(1.0, 1.0, 0.9);
        let mut opt = BoundaryLayerOptimiser::new(&mut m);
        assert_eq!(opt.optimise_thickness_variation(1.5, 5), 1);
        assert_relative_eq!(m.points()[31], Point::new(1.0, 1.0, 0.6), epsilon = 1e-12);
        assert_relative_eq!(m.points()[28], Point::new(1.0, 0.0, 0.4));
    }

    #[test]
    fn inside_directions() {
        let mut m = bottom_layer_block();
        m.points_mut()[31] = Point::new(1.2, 1.0, 0.4);
        let length = (m.points()[31] - m.points()[4]).norm();
        let mut opt = BoundaryLayerOptimiser::new(&mut m);
        let h = hair_of(&opt, 4);
        assert!(!opt.hairs().border[h]);
        assert!(opt.optimise_hair_normals_inside(1) > 0);
        let v = m.points()[31] - m.points()[4];
        assert_relative_eq!(v.norm(), length, epsilon = 1e-12);
        assert!(v.x > 0.0 && v.x < 0.2);
    }

    #[test]
    fn border_directions() {
        let mut m = bottom_layer_block();
        // Tilt the hair of (1, 0, 0) within its side plane
        m.points_mut()[28] = Point::new(1.2, 0.0, 0.4);
        let mut opt = BoundaryLayerOptimiser::new(&mut m);
        let h = hair_of(&opt, 1);
        assert!(opt.hairs().border[h]);
        assert!(opt.optimise_hair_normals_at_the_boundary(1) > 0);
        let v = m.points()[28] - m.points()[1];
        assert_relative_eq!(v.y, 0.0, epsilon = 1e-12);
        assert!(v.x > 0.0 && v.x < 0.2);
    }

    #[test]
    fn layer_without_changes() {
        let mut m = bottom_layer_block();
        let before = m.points().to_vec();
        let settings = BoundaryLayerSettings::default();
        let n = BoundaryLayerOptimiser::new(&mut m).optimise_layer(&settings);
        assert_eq!(n, 0);
        assert_eq!(m.points(), &before[..]);
    }
}
