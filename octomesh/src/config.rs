//! Mesh dictionary and thread pool configuration
use crate::{geom::Point, Error};
use serde::{Deserialize, Serialize};

/// Thread pool to use for multithreaded operations
#[derive(Debug)]
pub enum ThreadPool {
    /// User-provided pool
    Custom(rayon::ThreadPool),
    /// Global Rayon pool
    Global,
}

impl ThreadPool {
    /// Runs a function across the thread pool
    pub fn run<F: FnOnce() -> V + Send, V: Send>(&self, f: F) -> V {
        match self {
            ThreadPool::Custom(p) => p.install(f),
            ThreadPool::Global => f(),
        }
    }

    /// Returns the number of threads in the pool
    pub fn thread_count(&self) -> usize {
        match self {
            ThreadPool::Custom(p) => p.current_num_threads(),
            ThreadPool::Global => rayon::current_num_threads(),
        }
    }
}

/// Requested cell size for one surface patch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchRefinement {
    /// Patch name in the input surface
    pub patch: String,
    /// Target cell size at the patch
    pub cell_size: f64,
}

/// Refinement inside a simple object
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectRefinement {
    /// Axis-aligned box
    Box {
        /// Lower corner
        min: [f64; 3],
        /// Upper corner
        max: [f64; 3],
        /// Target cell size inside the box
        cell_size: f64,
    },
    /// Sphere
    Sphere {
        /// Centre of the sphere
        centre: [f64; 3],
        /// Radius of the sphere
        radius: f64,
        /// Target cell size inside the sphere
        cell_size: f64,
    },
}

impl ObjectRefinement {
    /// Returns the requested cell size
    pub fn cell_size(&self) -> f64 {
        match self {
            ObjectRefinement::Box { cell_size, .. }
            | ObjectRefinement::Sphere { cell_size, .. } => *cell_size,
        }
    }
}

/// Per-patch boundary layer settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatchLayers {
    /// Patch name in the input surface
    pub patch: String,
    /// Number of layers, overriding the global value
    #[serde(default)]
    pub n_layers: Option<usize>,
    /// Thickness ratio between consecutive layers
    #[serde(default)]
    pub thickness_ratio: Option<f64>,
    /// Upper limit on the thickness of the first layer
    #[serde(default)]
    pub max_first_layer_thickness: Option<f64>,
}

/// Boundary layer settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryLayerSettings {
    /// Number of layers for every patch (0 disables layers)
    pub n_layers: usize,
    /// Thickness ratio between consecutive layers
    pub thickness_ratio: f64,
    /// Upper limit on the thickness of the first layer
    pub max_first_layer_thickness: Option<f64>,
    /// Per-patch overrides
    pub patch_layers: Vec<PatchLayers>,
    /// Smooth layer thickness and hair directions after extrusion
    pub optimise_layer: bool,
    /// Maximum thickness ratio between neighbouring hairs
    pub max_thickness_variation: f64,
}

impl Default for BoundaryLayerSettings {
    fn default() -> Self {
        Self {
            n_layers: 0,
            thickness_ratio: 1.0,
            max_first_layer_thickness: None,
            patch_layers: vec![],
            optimise_layer: true,
            max_thickness_variation: 1.5,
        }
    }
}

/// Resolved layer parameters for a single patch
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LayerParameters {
    /// Number of layers
    pub n_layers: usize,
    /// Thickness ratio between consecutive layers
    pub thickness_ratio: f64,
    /// Upper limit on the thickness of the first layer
    pub max_first_layer_thickness: Option<f64>,
}

impl BoundaryLayerSettings {
    /// Returns the layer parameters for the given patch
    pub fn for_patch(&self, name: &str) -> LayerParameters {
        let p = self.patch_layers.iter().find(|p| p.patch == name);
        LayerParameters {
            n_layers: p.and_then(|p| p.n_layers).unwrap_or(self.n_layers),
            thickness_ratio: p
                .and_then(|p| p.thickness_ratio)
                .unwrap_or(self.thickness_ratio),
            max_first_layer_thickness: p
                .and_then(|p| p.max_first_layer_thickness)
                .or(self.max_first_layer_thickness),
        }
    }
}

/// Mesh quality optimisation settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimisationSettings {
    /// Maximum number of volume smoothing passes
    pub n_iterations: usize,
    /// Number of surface smoothing passes
    pub n_surface_iterations: usize,
    /// The best-quality loop stops once the worst quality improves by less
    /// than this amount in one pass
    pub quality_threshold: f64,
    /// Tetrahedra with a quality below this value are treated as bad
    pub min_tet_quality: f64,
    /// Record unresolved vertices instead of leaving them unmarked
    pub enforce_geometry_constraints: bool,
}

impl Default for OptimisationSettings {
    fn default() -> Self {
        Self {
            n_iterations: 20,
            n_surface_iterations: 3,
            quality_threshold: 1e-3,
            min_tet_quality: 0.05,
            enforce_geometry_constraints: true,
        }
    }
}

/// Checkpoint and restart settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Stop the generation after this step
    pub stop_after_step: Option<String>,
    /// Skip every step up to and including this one
    pub restart_after_step: Option<String>,
}

/// Meshing parameters
///
/// Only `max_cell_size` is mandatory; every other field has a default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshDict {
    /// Cell size in the interior of the domain
    pub max_cell_size: Option<f64>,
    /// Cell size at the boundary
    pub boundary_cell_size: Option<f64>,
    /// Distance from the boundary over which `boundary_cell_size` is kept
    pub boundary_cell_size_refinement_thickness: f64,
    /// Smallest cell size the automatic refinement may produce
    pub min_cell_size: Option<f64>,
    /// Cell size in leaves containing feature edges
    pub feature_edge_cell_size: Option<f64>,
    /// Keep every cell intersected by the surface
    pub keep_cells_intersecting_boundary: bool,
    /// Refine octree boxes in complete groups of siblings
    pub hex_refinement: bool,
    /// Enable curvature-driven automatic refinement
    pub curvature_refinement: bool,
    /// Normal deviation (degrees) above which a box is refined for curvature
    pub curvature_angle: f64,
    /// Enable proximity-driven automatic refinement
    pub proximity_refinement: bool,
    /// Dihedral angle (degrees) above which surface edges become features
    pub feature_angle: Option<f64>,
    /// Per-patch cell sizes
    pub patch_refinement: Vec<PatchRefinement>,
    /// Refinement inside boxes and spheres
    pub object_refinements: Vec<ObjectRefinement>,
    /// Boundary layer settings
    pub boundary_layers: BoundaryLayerSettings,
    /// Quality optimisation settings
    pub mesh_optimisation: OptimisationSettings,
    /// Checkpoint and restart settings
    pub workflow: WorkflowSettings,
    /// Reject input surfaces with open edges
    pub check_watertight: bool,
    /// Number of worker threads; `None` uses the global pool
    pub threads: Option<usize>,
}

impl Default for MeshDict {
    fn default() -> Self {
        Self {
            max_cell_size: None,
            boundary_cell_size: None,
            boundary_cell_size_refinement_thickness: 0.0,
            min_cell_size: None,
            feature_edge_cell_size: None,
            keep_cells_intersecting_boundary: false,
            hex_refinement: false,
            curvature_refinement: false,
            curvature_angle: 30.0,
            proximity_refinement: false,
            feature_angle: None,
            patch_refinement: vec![],
            object_refinements: vec![],
            boundary_layers: BoundaryLayerSettings::default(),
            mesh_optimisation: OptimisationSettings::default(),
            workflow: WorkflowSettings::default(),
            check_watertight: false,
            threads: None,
        }
    }
}

impl MeshDict {
    /// Builds a dictionary with only the mandatory entry set
    pub fn with_max_cell_size(size: f64) -> Self {
        Self {
            max_cell_size: Some(size),
            ..Self::default()
        }
    }

    /// Parses a dictionary from JSON text and validates it
    pub fn from_json(text: &str) -> Result<Self, Error> {
        let dict: Self = serde_json::from_str(text)?;
        dict.validate()?;
        Ok(dict)
    }

    /// Checks mandatory entries and value ranges
    pub fn validate(&self) -> Result<(), Error> {
        let max = self.max_cell_size()?;
        let positive = |name: &'static str, v: Option<f64>| match v {
            Some(v) if !(v > 0.0) => {
                Err(Error::BadConfig(name, format!("{v} is not positive")))
            }
            _ => Ok(()),
        };
        positive("max_cell_size", Some(max))?;
        positive("boundary_cell_size", self.boundary_cell_size)?;
        positive("min_cell_size", self.min_cell_size)?;
        positive("feature_edge_cell_size", self.feature_edge_cell_size)?;
        for p in &self.patch_refinement {
            positive("patch_refinement", Some(p.cell_size))?;
        }
        for o in &self.object_refinements {
            positive("object_refinements", Some(o.cell_size()))?;
        }
        if self.boundary_layers.thickness_ratio < 1.0 {
            return Err(Error::BadConfig(
                "thickness_ratio",
                format!("{} is below 1", self.boundary_layers.thickness_ratio),
            ));
        }
        if self.threads == Some(0) {
            return Err(Error::BadConfig("threads", "must be at least 1".to_owned()));
        }
        Ok(())
    }

    /// Returns the mandatory maximum cell size
    pub fn max_cell_size(&self) -> Result<f64, Error> {
        self.max_cell_size.ok_or(Error::MissingEntry("max_cell_size"))
    }

    /// Returns the boundary cell size, defaulting to the maximum cell size
    pub fn boundary_cell_size(&self) -> Result<f64, Error> {
        Ok(self.boundary_cell_size.unwrap_or(self.max_cell_size()?))
    }

    /// Builds the thread pool requested by `threads`
    pub fn thread_pool(&self) -> Result<ThreadPool, Error> {
        match self.threads {
            None => Ok(ThreadPool::Global),
            Some(n) => rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map(ThreadPool::Custom)
                .map_err(|e| Error::BadConfig("threads", e.to_string())),
        }
    }
}

/// Converts a dictionary triple into a point
pub(crate) fn to_point(p: &[f64; 3]) -> Point {
    Point::new(p[0], p[1], p[2])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_max_cell_size() {
        let r = MeshDict::from_json(r#"{ "boundary_cell_size": 0.1 }"#);
        assert!(matches!(r, Err(Error::MissingEntry("max_cell_size"))));
    }

    #[test]
    fn parse_full() {
        let d = MeshDict::from_json(
            r#"{
                "max_cell_size": 1.0,
                "patch_refinement": [{ "patch": "inlet", "cell_size": 0.25 }],
                "object_refinements": [
                    { "type": "sphere", "centre": [0, 0, 0], "radius": 1, "cell_size": 0.1 }
                ],
                "boundary_layers": {
                    "n_layers": 2,
                    "patch_layers": [{ "patch": "wall", "n_layers": 4 }]
                },
                "workflow": { "stop_after_step": "surfaceProjection" }
            }"#,
        )
        .unwrap();
        assert_eq!(d.boundary_cell_size().unwrap(), 1.0);
        assert_eq!(d.patch_refinement[0].cell_size, 0.25);
        assert_eq!(d.object_refinements[0].cell_size(), 0.1);
        assert_eq!(d.boundary_layers.for_patch("wall").n_layers, 4);
        assert_eq!(d.boundary_layers.for_patch("inlet").n_layers, 2);
        assert_eq!(
            d.workflow.stop_after_step.as_deref(),
            Some("surfaceProjection")
        );
    }

    #[test]
    fn rejects_bad_values() {
        let r = MeshDict::from_json(r#"{ "max_cell_size": -1.0 }"#);
        assert!(matches!(r, Err(Error::BadConfig("max_cell_size", _))));
        let r = MeshDict::from_json(r#"{ "max_cell_size": 1.0, "threads": 0 }"#);
        assert!(matches!(r, Err(Error::BadConfig("threads", _))));
    }

    #[test]
    fn custom_pool() {
        let d = MeshDict {
            threads: Some(2),
            ..MeshDict::with_max_cell_size(1.0)
        };
        let pool = d.thread_pool().unwrap();
        assert_eq!(pool.thread_count(), 2);
        assert_eq!(pool.run(|| 1 + 1), 2);
    }
}
