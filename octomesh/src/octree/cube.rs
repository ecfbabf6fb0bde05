//! Octree nodes
use super::coordinates::CubeCoordinates;
use serde::{Deserialize, Serialize};

/// Classification of a cube relative to the input surface
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
pub enum CubeType {
    /// Not classified yet
    Unknown,
    /// Outside of the meshed domain
    Outside,
    /// Intersected by the surface
    Data,
    /// Inside of the meshed domain
    Inside,
}

/// Owner of a placeholder cube, whose subtree lives on other ranks
pub const OTHER_PROC: usize = usize::MAX;

/// Coordinates plus classification and owner
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CubeBasic {
    /// Address of the cube
    pub coordinates: CubeCoordinates,
    /// Classification
    pub cube_type: CubeType,
    /// Owning rank, or [`OTHER_PROC`] for a placeholder
    pub proc_no: usize,
}

impl CubeBasic {
    /// Builds a new unclassified cube on rank 0
    pub fn new(coordinates: CubeCoordinates) -> Self {
        Self {
            coordinates,
            cube_type: CubeType::Unknown,
            proc_no: 0,
        }
    }
}

/// A live node in the octree arena
#[derive(Clone, Debug)]
pub struct OctreeCube {
    /// Coordinates, type and owner
    pub basic: CubeBasic,
    /// Index of the parent node (`None` for the root)
    pub parent: Option<usize>,
    /// Index of the first of 8 (or 4, in quadtree mode) contiguous children
    pub children: Option<usize>,
    /// Position in the leaf list; only valid for leaves
    pub leaf: Option<usize>,
    /// Row of the surface facets contained in this cube
    pub elements: Option<usize>,
    /// Row of the surface feature edges contained in this cube
    pub edges: Option<usize>,
}

impl OctreeCube {
    /// Builds a new leaf
    pub fn new(basic: CubeBasic, parent: Option<usize>) -> Self {
        Self {
            basic,
            parent,
            children: None,
            leaf: None,
            elements: None,
            edges: None,
        }
    }

    /// Checks whether the cube has no children
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Returns the cube coordinates
    pub fn coordinates(&self) -> &CubeCoordinates {
        &self.basic.coordinates
    }

    /// Returns the refinement level
    pub fn level(&self) -> u8 {
        self.basic.coordinates.level()
    }

    /// Returns the cube classification
    pub fn cube_type(&self) -> CubeType {
        self.basic.cube_type
    }

    /// Checks whether the cube contains surface facets
    pub fn has_elements(&self) -> bool {
        self.elements.is_some()
    }
}
