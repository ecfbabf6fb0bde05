//! Cartesian (hex-dominant) and 2D mesh generation
use super::{Pipeline, Template};
use crate::{comm::Communicator, config::MeshDict, mesh::PolyMesh, surface::TriSurface, Error};

/// Generates hex-dominant polyhedral meshes
///
/// Every inside leaf of the octree becomes one cell; leaves next to finer
/// leaves become polyhedra with split faces.
///
/// In 2D mode the surface must be a profile extruded along `z` (see
/// [`extruded_polygon`](crate::surface::extruded_polygon)).  The octree is
/// then a quadtree in the `x-y` plane and the mesh is one cell thick, with
/// its `z` faces in the `bottomEmptyFaces` and `topEmptyFaces` patches.
pub struct CartesianMeshGenerator<'a> {
    pipeline: Pipeline<'a>,
}

impl<'a> CartesianMeshGenerator<'a> {
    /// Prepares a 3D generator
    pub fn new(surface: TriSurface, dict: &'a MeshDict) -> Self {
        Self {
            pipeline: Pipeline::new(surface, dict, Template::Cartesian, false),
        }
    }

    /// Prepares a 2D generator
    pub fn new_2d(surface: TriSurface, dict: &'a MeshDict) -> Self {
        Self {
            pipeline: Pipeline::new(surface, dict, Template::Cartesian, true),
        }
    }

    /// Continues from a mesh written by an earlier, stopped run
    ///
    /// The steps skipped are set by `restart_after_step` in the
    /// dictionary's workflow settings.
    pub fn with_checkpoint(mut self, mesh: PolyMesh) -> Self {
        self.pipeline.checkpoint = Some(mesh);
        self
    }

    /// Runs the generator
    pub fn generate<C: Communicator + Sync>(self, comm: &C) -> Result<PolyMesh, Error> {
        self.pipeline.generate(comm)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::SerialComm;
    use crate::extract::{BOTTOM_EMPTY_PATCH, TOP_EMPTY_PATCH};
    use crate::geom::{BoundBox, Point};
    use crate::surface::{box_surface, extruded_polygon};
    use crate::workflow::WORKFLOW_KEY;

    #[test]
    fn unit_box() {
        let surface = box_surface(&BoundBox::new(Point::zeros(), Point::repeat(1.0)));
        let dict = MeshDict::with_max_cell_size(0.3);
        let mesh = CartesianMeshGenerator::new(surface, &dict)
            .generate(&SerialComm)
            .unwrap();
        assert!(mesh.n_cells() > 0);
        let ledger = &mesh.metadata()[WORKFLOW_KEY];
        assert_eq!(ledger["completedSteps"].as_array().unwrap().len(), 8);
    }

    #[test]
    fn square_2d() {
        let square = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let surface = extruded_polygon(&square, 0.0, 0.1);
        let dict = MeshDict::with_max_cell_size(0.3);
        let mesh = CartesianMeshGenerator::new_2d(surface, &dict)
            .generate(&SerialComm)
            .unwrap();
        assert!(mesh.n_cells() > 0);
        for name in [BOTTOM_EMPTY_PATCH, TOP_EMPTY_PATCH] {
            let p = mesh.patch_index(name).unwrap();
            assert_eq!(mesh.patches()[p].size, mesh.n_cells());
        }
    }

    #[test]
    fn missing_size() {
        let surface = box_surface(&BoundBox::new(Point::zeros(), Point::repeat(1.0)));
        let dict = MeshDict::default();
        assert!(matches!(
            CartesianMeshGenerator::new(surface, &dict).generate(&SerialComm),
            Err(Error::MissingEntry("max_cell_size"))
        ));
    }
}
