//! Tetrahedral mesh generation
use super::{Pipeline, Template};
use crate::{comm::Communicator, config::MeshDict, mesh::PolyMesh, surface::TriSurface, Error};

/// Generates tetrahedral meshes
///
/// Each mesh-cell leaf is split into tetrahedra joining its centre, the
/// centres of its faces and the edges of those faces, so leaves at
/// different levels meet conformally.
pub struct TetMeshGenerator<'a> {
    pipeline: Pipeline<'a>,
}

impl<'a> TetMeshGenerator<'a> {
    /// Prepares a generator
    pub fn new(surface: TriSurface, dict: &'a MeshDict) -> Self {
        Self {
            pipeline: Pipeline::new(surface, dict, Template::Tet, false),
        }
    }

    /// Continues from a mesh written by an earlier, stopped run
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
    use crate::config::WorkflowSettings;
    use crate::geom::{BoundBox, Point};
    use crate::surface::box_surface;

    #[test]
    fn template_only() {
        let surface = box_surface(&BoundBox::new(Point::zeros(), Point::repeat(1.0)));
        let dict = MeshDict {
            workflow: WorkflowSettings {
                stop_after_step: Some("templateGeneration".to_owned()),
                restart_after_step: None,
            },
            ..MeshDict::with_max_cell_size(0.5)
        };
        let mesh = TetMeshGenerator::new(surface, &dict)
            .generate(&SerialComm)
            .unwrap();
        assert!(mesh.n_cells() > 0);
        assert!(mesh.faces().iter().all(|f| f.len() == 3));
    }
}
