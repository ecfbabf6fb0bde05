//! Repairs which make a template mappable onto the surface
use super::{decompose_cells, decompose_faces};
use crate::mesh::PolyMesh;
use crate::Error;
use log::{debug, info};

/// Cleans the topology of a mesh template before surface mapping
///
/// Three configurations cannot be projected onto a curved surface without
/// inverting something:
/// - a face which visits the boundary more than once, i.e. its boundary
///   points do not form one consecutive run;
/// - an internal face with every point on the boundary;
/// - a cell with every point on the boundary.
///
/// The first two are fixed by decomposing the face into triangles around a
/// new (internal) centre point, the last by decomposing the cell into
/// pyramids around its centre.
pub struct TopologicalCleaner<'a> {
    mesh: &'a mut PolyMesh,
}

impl<'a> TopologicalCleaner<'a> {
    /// Builds a cleaner for the given mesh
    pub fn new(mesh: &'a mut PolyMesh) -> Self {
        Self { mesh }
    }

    fn boundary_points(&self) -> Vec<bool> {
        let mut out = vec![false; self.mesh.n_points()];
        for f in self.mesh.boundary_faces() {
            for p in &self.mesh.faces()[f] {
                out[*p] = true;
            }
        }
        out
    }

    /// Flags internal faces which visit the boundary in more than one run
    fn check_non_consecutive_boundary_vertices(&self, boundary: &[bool]) -> Vec<bool> {
        let mut flags = vec![false; self.mesh.n_faces()];
        for f in 0..self.mesh.n_internal_faces() {
            let face = &self.mesh.faces()[f];
            let n = face.len();
            let runs = (0..n)
                .filter(|i| boundary[face[*i]] && !boundary[face[(i + n - 1) % n]])
                .count();
            if runs > 1 {
                flags[f] = true;
            }
        }
        flags
    }

    /// Flags internal faces with every point on the boundary
    fn check_non_mappable_faces(&self, boundary: &[bool], flags: &mut [bool]) -> usize {
        let mut n = 0;
        for f in 0..self.mesh.n_internal_faces() {
            if !flags[f] && self.mesh.faces()[f].iter().all(|p| boundary[*p]) {
                flags[f] = true;
                n += 1;
            }
        }
        n
    }

    /// Flags cells with every point on the boundary
    fn check_non_mappable_cells(&self, boundary: &[bool]) -> Vec<bool> {
        (0..self.mesh.n_cells())
            .map(|c| self.mesh.cell_points().row(c).iter().all(|p| boundary[*p]))
            .collect()
    }

    /// Runs the checks until none of them changes the mesh
    ///
    /// Returns `true` if the mesh was modified.
    pub fn clean_topology(&mut self) -> Result<bool, Error> {
        let mut changed = false;
        for iter in 0..10 {
            let boundary = self.boundary_points();
            let mut faces = self.check_non_consecutive_boundary_vertices(&boundary);
            let n_runs = faces.iter().filter(|f| **f).count();
            let n_faces = self.check_non_mappable_faces(&boundary, &mut faces);
            let n = decompose_faces(self.mesh, &faces)?;

            let boundary = self.boundary_points();
            let cells = self.check_non_mappable_cells(&boundary);
            let n_cells = decompose_cells(self.mesh, &cells)?;
            debug!(
                "cleaning pass {iter}: {n_runs} faces with split boundary runs, \
                 {n_faces} non-mappable faces, {n_cells} non-mappable cells"
            );
            if n + n_cells == 0 {
                break;
            }
            changed = true;
        }
        if changed {
            info!(
                "cleaned template topology: {} cells, {} points",
                self.mesh.n_cells(),
                self.mesh.n_points()
            );
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::{quality::cell_centres_and_volumes, test::hex_block};
    use approx::assert_relative_eq;

    #[test]
    fn single_layer_block() {
        // Every point of a 2x2x1 block is on the boundary
        let mut m = hex_block(2);
        let remove: Vec<bool> = (0..8).map(|c| c >= 4).collect();
        m.remove_cells(&remove, "walls").unwrap();
        assert_eq!(m.n_cells(), 4);

        assert!(TopologicalCleaner::new(&mut m).clean_topology().unwrap());
        let (_, vols) = cell_centres_and_volumes(&m);
        assert_relative_eq!(vols.iter().sum::<f64>(), 4.0, epsilon = 1e-12);
        assert!(vols.iter().all(|v| *v > 0.0));

        // Nothing left to fix
        let cleaner = TopologicalCleaner::new(&mut m);
        let boundary = cleaner.boundary_points();
        assert!(cleaner.check_non_mappable_cells(&boundary).iter().all(|c| !c));
        let mut faces = cleaner.check_non_consecutive_boundary_vertices(&boundary);
        assert_eq!(cleaner.check_non_mappable_faces(&boundary, &mut faces), 0);
        assert!(!TopologicalCleaner::new(&mut m).clean_topology().unwrap());
    }

    #[test]
    fn block_with_interior() {
        // Every cell of a 3x3x3 block touches one of the interior points
        let mut m = hex_block(3);
        let cleaner = TopologicalCleaner::new(&mut m);
        let boundary = cleaner.boundary_points();
        assert_eq!(boundary.iter().filter(|b| !**b).count(), 8);
        assert!(cleaner.check_non_mappable_cells(&boundary).iter().all(|c| !c));
        assert!(!TopologicalCleaner::new(&mut m).clean_topology().unwrap());
        assert_eq!(m.n_cells(), 27);
    }
}
