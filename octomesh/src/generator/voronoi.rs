//! Polyhedral mesh generation from the dual of the tetrahedral template
use super::{Pipeline, Template};
use crate::{comm::Communicator, config::MeshDict, mesh::PolyMesh, surface::TriSurface, Error};

/// Generates polyhedral meshes dual to the tetrahedral template
///
/// There is one cell per inner point of the tetrahedral template, bounded by
/// the faces joining the centres of the tetrahedra around each of its edges.
pub struct VoronoiMeshGenerator<'a> {
    pipeline: Pipeline<'a>,
}

impl<'a> VoronoiMeshGenerator<'a> {
    /// Prepares a generator
    pub fn new(surface: TriSurface, dict: &'a MeshDict) -> Self {
        Self {
            pipeline: Pipeline::new(surface, dict, Template::Voronoi, false),
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
