//! Laplacian smoothing of interior points
use crate::{
    geom::Point,
    mesh::{quality, PolyMesh},
};
use log::debug;
use rayon::prelude::*;

/// Cheap smoother moving points to an average of their surroundings
///
/// Boundary points are always locked.  Every pass computes all new
/// positions from the old ones before applying them, so the result does not
/// depend on the point order.
pub struct LaplaceSmoother<'a> {
    mesh: &'a mut PolyMesh,
    locked: Vec<bool>,
}

impl<'a> LaplaceSmoother<'a> {
    /// Builds a smoother with every boundary point locked
    pub fn new(mesh: &'a mut PolyMesh) -> Self {
        let mut locked = vec![false; mesh.n_points()];
        for f in mesh.boundary_faces() {
            for p in &mesh.faces()[f] {
                locked[*p] = true;
            }
        }
        Self { mesh, locked }
    }

    /// Locks additional points
    pub fn lock_points<I: IntoIterator<Item = usize>>(&mut self, points: I) {
        for p in points {
            self.locked[p] = true;
        }
    }

    fn apply(&mut self, moves: Vec<(usize, Point)>) {
        let points = self.mesh.points_mut();
        for (p, q) in moves {
            points[p] = q;
        }
    }

    /// Moves points to the average of the points sharing an edge with them
    pub fn optimize_laplacian(&mut self, n_iterations: usize) {
        for i in 0..n_iterations {
            let mesh = &*self.mesh;
            let pp = mesh.point_points();
            let moves: Vec<(usize, Point)> = (0..mesh.n_points())
                .into_par_iter()
                .filter(|p| !self.locked[*p] && !pp.row(*p).is_empty())
                .map(|p| {
                    let row = pp.row(p);
                    let avg = row.iter().map(|q| mesh.points()[*q]).sum::<Point>()
                        / row.len() as f64;
                    (p, avg)
                })
                .collect();
            debug!("laplacian pass {i}: {} points", moves.len());
            self.apply(moves);
        }
    }

    /// Moves points to the average of the centres of their cells
    pub fn optimize_laplacian_pc(&mut self, n_iterations: usize) {
        self.cell_centre_passes(n_iterations, false)
    }

    /// Moves points to the volume-weighted average of the centres of their
    /// cells
    pub fn optimize_laplacian_wpc(&mut self, n_iterations: usize) {
        self.cell_centre_passes(n_iterations, true)
    }

    fn cell_centre_passes(&mut self, n_iterations: usize, weighted: bool) {
        for i in 0..n_iterations {
            let mesh = &*self.mesh;
            let (centres, volumes) = quality::cell_centres_and_volumes(mesh);
            let pc = mesh.point_cells();
            let moves: Vec<(usize, Point)> = (0..mesh.n_points())
                .into_par_iter()
                .filter(|p| !self.locked[*p])
                .filter_map(|p| {
                    let mut sum = Point::zeros();
                    let mut weight = 0.0;
                    for c in pc.row(p) {
                        let w = if weighted { volumes[*c].abs() } else { 1.0 };
                        sum += centres[*c] * w;
                        weight += w;
                    }
                    (weight > f64::MIN_POSITIVE).then(|| (p, sum / weight))
                })
                .collect();
            debug!("cell-centre laplacian pass {i}: {} points", moves.len());
            self.apply(moves);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::test::hex_block;
    use approx::assert_relative_eq;

    #[test]
    fn restores_centre() {
        for variant in 0..3 {
            let mut m = hex_block(2);
            m.points_mut()[13] = Point::new(1.3, 0.8, 1.1);
            let mut s = LaplaceSmoother::new(&mut m);
            match variant {
                0 => s.optimize_laplacian(1),
                1 => s.optimize_laplacian_pc(20),
                _ => s.optimize_laplacian_wpc(20),
            }
            assert_relative_eq!(m.points()[13], Point::repeat(1.0), epsilon = 1e-6);
            assert_eq!(m.points()[0], Point::zeros());
        }
    }

    #[test]
    fn locked_points() {
        let mut m = hex_block(2);
        let moved = Point::new(1.3, 0.8, 1.1);
        m.points_mut()[13] = moved;
        let mut s = LaplaceSmoother::new(&mut m);
        s.lock_points([13]);
        s.optimize_laplacian(3);
        assert_eq!(m.points()[13], moved);
    }
}
