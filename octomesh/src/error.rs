//! Module containing the universal error type
use thiserror::Error;

/// Universal error type for mesh generation
#[derive(Error, Debug)]
pub enum Error {
    /// A mandatory dictionary entry is missing
    #[error("mandatory entry `{0}` is missing from the mesh dictionary")]
    MissingEntry(&'static str),

    /// A dictionary entry has an unusable value
    #[error("bad value for `{0}`: {1}")]
    BadConfig(&'static str, String),

    /// A patch named in the dictionary does not exist in the surface
    #[error("patch `{0}` does not exist in the input surface")]
    UnknownPatch(String),

    /// The input surface has no facets
    #[error("input surface has no facets")]
    EmptySurface,

    /// The input surface is not closed
    #[error("input surface is not watertight ({0} open edges)")]
    NonWatertightSurface(usize),

    /// The octree would need more levels than the coordinate type holds
    #[error("requested refinement level {0} exceeds the maximum of {1}")]
    LevelTooDeep(usize, u8),

    /// Unknown workflow step
    #[error("unknown workflow step `{0}`")]
    UnknownStep(String),

    /// The workflow was asked to stop after the given step
    #[error("mesh generation stopped after step `{0}`")]
    WorkflowStopped(String),

    /// A parallel-only operation was called in a single-process run
    #[error("`{0}` is only available in parallel runs")]
    SerialRun(&'static str),

    /// A peer in the communicator hung up during an exchange
    #[error("communication with rank {0} failed")]
    CommunicationFailed(usize),

    /// Could not solve a local linear system
    #[error("could not solve linear system: {0}")]
    SingularMatrix(&'static str),

    /// The extracted mesh has no cells
    #[error("mesh template has no cells")]
    EmptyMesh,

    /// Cells passed to the mesh builder do not form a valid mesh
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),

    /// Malformed STL input
    #[error("malformed STL input: {0}")]
    BadStl(String),

    /// IO error; see inner code for details
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error; see inner code for details
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
}
