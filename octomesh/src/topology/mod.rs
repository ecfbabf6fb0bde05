//! Repairs to the topology of a mesh template
//!
//! The template extracted from the octree has a stair-stepped boundary.
//! Before it is projected to the surface, configurations that cannot be
//! mapped without tangling are removed or decomposed here; the edge
//! extractor then assigns boundary faces to surface patches.
mod chains;
mod cleaner;
mod decompose;
mod edge_extractor;
mod irregular;

pub use chains::sort_edges_into_chains;
pub use cleaner::TopologicalCleaner;
pub use decompose::{decompose_cells, decompose_faces};
pub use edge_extractor::{mesh_feature_edges, CornerEvaluator, EdgeExtractor};
pub use irregular::{
    check_boundary_faces_sharing_two_edges, check_irregular_surface_connections,
    non_manifold_points,
};
