//! Top-level mesh generators
//!
//! A generator owns the input surface and runs the whole pipeline under a
//! [`WorkflowControls`] ledger: octree construction and template extraction,
//! topology cleaning, surface projection, patch assignment, feature edge
//! capture, boundary layers, optimisation and layer refinement.  The three
//! generators only differ in the template they extract.
//!
//! In a distributed run the octree is built by every rank; the leaves are
//! then gathered on rank 0, which runs the mesh stages alone.  Other ranks
//! return an empty mesh.
use crate::{
    comm::Communicator,
    config::MeshDict,
    extract::{
        CartesianExtractor, TetExtractor, VoronoiExtractor, BOTTOM_EMPTY_PATCH, TOP_EMPTY_PATCH,
    },
    layers::{
        refine_boundary_layers, BoundaryLayerOptimiser, BoundaryLayers, LAYER_CELLS_SUBSET,
    },
    mapping::SurfaceMapper,
    mesh::{quality, PolyMesh},
    octree::{Octree, OctreeAddressing, OctreeCreator, OctreeModifier},
    optimize::MeshOptimizer,
    surface::TriSurface,
    topology::{
        check_boundary_faces_sharing_two_edges, check_irregular_surface_connections,
        mesh_feature_edges, sort_edges_into_chains, EdgeExtractor, TopologicalCleaner,
    },
    workflow::WorkflowControls,
    Error,
};
use log::{info, warn};
use std::sync::Arc;

mod cartesian;
mod tet;
mod voronoi;

pub use cartesian::CartesianMeshGenerator;
pub use tet::TetMeshGenerator;
pub use voronoi::VoronoiMeshGenerator;

/// Passes of averaged pre-projection before boundary points are snapped to
/// the surface
const PRE_MAP_ITERATIONS: usize = 2;

/// Kind of mesh template extracted from the octree
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Template {
    Cartesian,
    Tet,
    Voronoi,
}

/// State shared by every generator
struct Pipeline<'a> {
    surface: Arc<TriSurface>,
    dict: &'a MeshDict,
    template: Template,
    quadtree: bool,
    checkpoint: Option<PolyMesh>,
}

impl<'a> Pipeline<'a> {
    fn new(surface: TriSurface, dict: &'a MeshDict, template: Template, quadtree: bool) -> Self {
        Self {
            surface: Arc::new(surface),
            dict,
            template,
            quadtree,
            checkpoint: None,
        }
    }

    /// Checks the parts of the dictionary that refer to the surface
    fn check_patches(&self) -> Result<(), Error> {
        if self.surface.facets().is_empty() {
            return Err(Error::EmptySurface);
        }
        let known = |name: &str| {
            self.surface.patch_index(name).is_some()
                || (self.quadtree && [BOTTOM_EMPTY_PATCH, TOP_EMPTY_PATCH].contains(&name))
        };
        let names = self
            .dict
            .patch_refinement
            .iter()
            .map(|p| p.patch.as_str())
            .chain(self.dict.boundary_layers.patch_layers.iter().map(|p| p.patch.as_str()));
        for name in names {
            if !known(name) {
                return Err(Error::UnknownPatch(name.to_owned()));
            }
        }
        Ok(())
    }

    /// Runs the pipeline on the configured thread pool
    fn generate<C: Communicator + Sync>(self, comm: &C) -> Result<PolyMesh, Error> {
        self.dict.validate()?;
        self.check_patches()?;
        let pool = self.dict.thread_pool()?;
        pool.run(|| self.run(comm))
    }

    /// Builds the octree on every rank, then meshes it on rank 0 only
    ///
    /// A mesh is never split between ranks; other ranks return an empty mesh
    /// once their leaves are gathered.
    fn run<C: Communicator>(&self, comm: &C) -> Result<PolyMesh, Error> {
        let mut controls = match &self.checkpoint {
            Some(m) => WorkflowControls::restore(&self.dict.workflow, m)?,
            None => WorkflowControls::new(&self.dict.workflow)?,
        };

        let creator = if self.quadtree {
            OctreeCreator::new_2d(self.surface.clone(), self.dict)
        } else {
            OctreeCreator::new(self.surface.clone(), self.dict)
        };
        let mut octree = creator.create_octree(comm)?;
        if comm.is_parallel() {
            OctreeModifier::new(&mut octree).gather_to_master(comm)?;
            if comm.rank() != 0 {
                return Ok(PolyMesh::default());
            }
        }

        let mut mesh = self.checkpoint.clone().unwrap_or_default();
        match self.steps(&mut controls, &octree, &mut mesh) {
            Ok(()) => controls.workflow_completed(),
            Err(Error::WorkflowStopped(step)) => info!("stopped after step `{step}`"),
            Err(e) => return Err(e),
        }
        controls.store(&mut mesh)?;
        Ok(mesh)
    }

    /// Runs every step that the controls let through
    fn steps(
        &self,
        w: &mut WorkflowControls,
        octree: &Octree,
        mesh: &mut PolyMesh,
    ) -> Result<(), Error> {
        if w.run_current_step("templateGeneration")? {
            *mesh = self.create_template(octree)?;
        }
        if w.run_current_step("surfaceTopology")? {
            self.surface_topology(mesh)?;
        }
        if w.run_current_step("surfaceProjection")? {
            self.surface_projection(octree, mesh);
        }
        if w.run_current_step("patchAssignment")? {
            self.patch_assignment(octree, mesh)?;
        }
        if w.run_current_step("edgeExtraction")? {
            self.edge_extraction(octree, mesh)?;
        }
        if w.run_current_step("boundaryLayerGeneration")? {
            self.boundary_layer_generation(mesh)?;
        }
        if w.run_current_step("meshOptimisation")? {
            self.mesh_optimisation(octree, mesh);
        }
        if w.run_current_step("boundaryLayerRefinement")? {
            refine_boundary_layers(mesh, &self.dict.boundary_layers)?;
        }
        Ok(())
    }

    fn create_template(&self, octree: &Octree) -> Result<PolyMesh, Error> {
        let mut addressing =
            OctreeAddressing::new(octree, self.dict.keep_cells_intersecting_boundary);
        let n = addressing.check_and_fix_irregular_connections();
        if n > 0 {
            info!("changed {n} leaves joined to the mesh by an edge or a vertex");
        }
        let mesh = match self.template {
            Template::Cartesian => CartesianExtractor::new(&addressing).create_mesh()?,
            Template::Tet => TetExtractor::new(&addressing).create_mesh()?,
            Template::Voronoi => {
                let tets = TetExtractor::new(&addressing).create_tet_mesh()?;
                VoronoiExtractor::new(&tets).create_mesh()?
            }
        };
        if mesh.n_cells() == 0 {
            return Err(Error::EmptyMesh);
        }
        info!(
            "{:?} template: {} points, {} faces, {} cells",
            self.template,
            mesh.n_points(),
            mesh.n_faces(),
            mesh.n_cells()
        );
        Ok(mesh)
    }

    fn surface_topology(&self, mesh: &mut PolyMesh) -> Result<(), Error> {
        // Every point of a one-cell-thick mesh is on the boundary
        if !self.quadtree {
            TopologicalCleaner::new(mesh).clean_topology()?;
        }
        let removed = check_irregular_surface_connections(mesh)?;
        let decomposed = check_boundary_faces_sharing_two_edges(mesh)?;
        if removed + decomposed > 0 {
            info!(
                "removed {removed} cells at non-manifold points, \
                 fixed {decomposed} cells with faces sharing two edges"
            );
        }
        Ok(())
    }

    fn surface_projection(&self, octree: &Octree, mesh: &mut PolyMesh) {
        let mut mapper = SurfaceMapper::new(mesh, octree);
        mapper.pre_map_vertices(PRE_MAP_ITERATIONS);
        mapper.map_vertices();
        let s = &self.dict.mesh_optimisation;
        MeshOptimizer::new(mesh, s).untangle_mesh_fv(s.n_iterations);
    }

    fn patch_assignment(&self, octree: &Octree, mesh: &mut PolyMesh) -> Result<(), Error> {
        let mut e = EdgeExtractor::new(mesh, octree);
        e.distribute_boundary_faces();
        e.update_mesh_patches()
    }

    fn edge_extraction(&self, octree: &Octree, mesh: &mut PolyMesh) -> Result<(), Error> {
        EdgeExtractor::new(mesh, octree).extract_edges()?;
        SurfaceMapper::new(mesh, octree).map_corners_and_edges();
        let chains = sort_edges_into_chains(&mesh_feature_edges(mesh));
        info!("captured {} feature edge chains", chains.len());

        let s = &self.dict.mesh_optimisation;
        let mut opt = MeshOptimizer::new(mesh, s);
        opt.optimize_surface(octree);
        opt.untangle_mesh_fv(s.n_iterations);
        Ok(())
    }

    fn boundary_layer_generation(&self, mesh: &mut PolyMesh) -> Result<(), Error> {
        let settings = &self.dict.boundary_layers;
        let n = BoundaryLayers::new(mesh, settings).add_layer_for_all_patches()?;
        if n > 0 && settings.optimise_layer {
            BoundaryLayerOptimiser::new(mesh).optimise_layer(settings);
        }
        Ok(())
    }

    fn mesh_optimisation(&self, octree: &Octree, mesh: &mut PolyMesh) {
        let layer: Vec<usize> = mesh
            .subsets()
            .cells
            .get(LAYER_CELLS_SUBSET)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        let mut opt = MeshOptimizer::new(mesh, &self.dict.mesh_optimisation);
        opt.lock_cells(layer);
        let unresolved = opt.optimize_mesh_fv();
        opt.optimize_surface(octree);
        opt.optimize_mesh_fv_best_quality();
        if unresolved > 0 {
            warn!("{unresolved} points are still in inverted cells");
        }
        quality::check_mesh(mesh);
    }
}
