//! Prismatic boundary layers
//!
//! Layers are built in two stages.  First a single layer of prisms is
//! [extruded](extrude_layer) from the selected wall patches: every wall point
//! grows a *hair* into the mesh, the existing cells retreat to the hair tips
//! and prisms fill the gap.  Hairs on the border of the selection stay in the
//! planes of the neighbouring patches.  After the mesh has been optimised,
//! the layer is [refined](refine_boundary_layers) into the requested number
//! of sub-layers with a geometric thickness progression.
//!
//! Extrusion records the bottom points in [`LAYER_POINTS_SUBSET`] and the
//! prisms in [`LAYER_CELLS_SUBSET`], so later steps (and restarted runs) can
//! find the layer again with [`detect_boundary_layers`].
mod boundary_layers;
mod detect;
mod extrude;
mod optimise;
mod refine;

pub use boundary_layers::BoundaryLayers;
pub use detect::{detect_boundary_layers, LayerCell, LayerHairs};
pub use extrude::extrude_layer;
pub use optimise::BoundaryLayerOptimiser;
pub use refine::refine_boundary_layers;

/// Name of the cell subset holding the layer prisms
pub const LAYER_CELLS_SUBSET: &str = "boundaryLayer";

/// Name of the point subset holding the bottom points of layer hairs
pub const LAYER_POINTS_SUBSET: &str = "boundaryLayerPoints";
